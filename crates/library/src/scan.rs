use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use common::Category;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::ScanIssue;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub size: u64,
    /// Modification time in nanoseconds since the epoch, 0 when unknown.
    pub modified: u128,
}

#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Sorted by path, each path once even when roots overlap.
    pub files: Vec<ScannedFile>,
    pub roots_scanned: usize,
    pub unavailable_roots: Vec<PathBuf>,
    /// Each opened root as configured, paired with its canonical form.
    pub resolved_roots: Vec<(PathBuf, PathBuf)>,
    pub issues: Vec<ScanIssue>,
}

/// Walks every root recursively without following symlinks and collects the
/// regular files. A root that cannot be read is reported and skipped.
pub fn scan_roots(roots: &[PathBuf], category: Category) -> ScanOutcome {
    let mut found: BTreeMap<PathBuf, ScannedFile> = BTreeMap::new();
    let mut outcome = ScanOutcome::default();

    for (index, root) in roots.iter().enumerate() {
        debug!("Scanning {} root {} of {}: {:?}", category, index + 1, roots.len(), root);
        let root = match open_root(root) {
            Ok(canonical) => {
                outcome.resolved_roots.push((root.clone(), canonical.clone()));
                canonical
            }
            Err(err) => {
                warn!("Directory unreadable {:?}: {}", root, err);
                outcome.unavailable_roots.push(root.clone());
                outcome.issues.push(ScanIssue::DirectoryUnreadable {
                    root: root.clone(),
                    reason: err.to_string(),
                });
                continue;
            }
        };
        outcome.roots_scanned += 1;

        for entry in WalkDir::new(&root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Skipping unreadable entry under {:?}: {}", root, err);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    warn!("Failed to stat {:?}: {}", entry.path(), err);
                    continue;
                }
            };
            let modified = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            let path = entry.into_path();
            found.insert(
                path.clone(),
                ScannedFile {
                    path,
                    size: metadata.len(),
                    modified,
                },
            );
        }
    }

    outcome.files = found.into_values().collect();
    info!(
        "Scanned {} of {} {} directories, {} files",
        outcome.roots_scanned,
        roots.len(),
        category,
        outcome.files.len()
    );
    outcome
}

fn open_root(root: &Path) -> io::Result<PathBuf> {
    let absolute = fs::canonicalize(root)?;
    if !absolute.is_dir() {
        return Err(io::Error::new(io::ErrorKind::Other, "not a directory"));
    }
    // canonicalize succeeds on directories we may not list
    fs::read_dir(&absolute)?;
    Ok(absolute)
}
