use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use common::RecordingEntity;
use tracing::info;

/// Paths to record for `entities`, in processing order, each at most once.
pub fn drop_list_paths(entities: &[RecordingEntity]) -> Vec<PathBuf> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for entity in entities {
        for path in entity.ordered_files() {
            if seen.insert(path.clone()) {
                out.push(path);
            }
        }
    }
    out
}

/// Appends one path per line to the drop list, creating it when needed. The
/// whole batch goes out in a single write followed by a sync, so a failure
/// never reports success for a partial list.
pub fn append_drop_list(path: &Path, entities: &[RecordingEntity]) -> io::Result<Vec<PathBuf>> {
    let paths = drop_list_paths(entities);
    if paths.is_empty() {
        return Ok(paths);
    }

    // raw path bytes, so the list names exactly the files on disk
    let mut contents = Vec::new();
    for entry in &paths {
        contents.extend_from_slice(entry.as_os_str().as_encoded_bytes());
        contents.push(b'\n');
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(&contents)?;
    file.sync_all()?;
    info!("Appended {} paths to {:?}", paths.len(), path);
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{IdentityKey, Metadata};

    fn entity(title: &str, extensions: &[&str]) -> RecordingEntity {
        let base = format!("/hdd/movie/20230219 0230 - ARD - {}", title);
        RecordingEntity {
            key: IdentityKey::broadcast("20230219 0230", "ARD", title),
            files: extensions
                .iter()
                .map(|ext| PathBuf::from(format!("{}{}", base, ext)))
                .collect(),
            complete: true,
            metadata: Metadata::default(),
            search_key: title.to_lowercase(),
            attributes: Default::default(),
            comment: String::new(),
            first_seen: 0,
            last_seen: 0,
        }
    }

    #[test]
    fn appends_required_files_first_per_entity() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("dropped");
        fs::write(&list, "/earlier/entry.ts\n").unwrap();

        let entities = vec![
            entity("B", &[".ts.meta", ".ts", ".eit"]),
            entity("A", &[".ts", ".eit"]),
        ];
        let written = append_drop_list(&list, &entities).unwrap();
        assert_eq!(written.len(), 5);

        let contents = fs::read_to_string(&list).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(
            lines,
            vec![
                "/earlier/entry.ts",
                "/hdd/movie/20230219 0230 - ARD - B.eit",
                "/hdd/movie/20230219 0230 - ARD - B.ts",
                "/hdd/movie/20230219 0230 - ARD - B.ts.meta",
                "/hdd/movie/20230219 0230 - ARD - A.eit",
                "/hdd/movie/20230219 0230 - ARD - A.ts",
            ]
        );
    }

    #[test]
    fn duplicate_entities_write_each_path_once() {
        let one = entity("A", &[".ts", ".eit"]);
        let paths = drop_list_paths(&[one.clone(), one]);
        assert_eq!(paths.len(), 2);
    }

    #[test]
    fn unwritable_list_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        // a directory in place of the list file
        let list = dir.path().join("dropped");
        fs::create_dir_all(&list).unwrap();
        assert!(append_drop_list(&list, &[entity("A", &[".ts"])]).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn paths_are_written_byte_for_byte() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("dropped");
        let mut odd = entity("A", &[]);
        odd.files = [PathBuf::from(OsStr::from_bytes(b"/hdd/Caf\xE9.ts"))]
            .into_iter()
            .collect();
        append_drop_list(&list, &[odd]).unwrap();
        assert_eq!(fs::read(&list).unwrap(), b"/hdd/Caf\xE9.ts\n");
    }

    #[test]
    fn empty_batch_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("dropped");
        assert!(append_drop_list(&list, &[]).unwrap().is_empty());
        assert!(!list.exists());
    }
}
