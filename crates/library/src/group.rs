use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use common::{
    parse_file_name, search_key, stable_id, BroadcastName, Category, DownloadName, IdentityKey,
    Metadata, MetadataOrigin, ParsedName,
};
use tracing::{debug, warn};

use crate::scan::ScannedFile;
use crate::ScanIssue;

/// One logical recording as found on disk, before it meets the cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupedEntity {
    pub key: IdentityKey,
    pub files: BTreeSet<PathBuf>,
    pub complete: bool,
    pub metadata: Metadata,
    pub search_key: String,
    /// Fingerprint of the `.eit`/`.ts.meta` files; changes whenever one of
    /// them is modified, replaced or removed.
    pub companion_stamp: Option<String>,
}

#[derive(Debug)]
pub struct Grouping {
    pub category: Category,
    /// Sorted by identity key.
    pub entities: Vec<GroupedEntity>,
    pub issues: Vec<ScanIssue>,
    pub incomplete: usize,
}

enum Member<'a> {
    Broadcast(&'a ScannedFile, BroadcastName),
    Download(&'a ScannedFile, DownloadName),
}

impl Member<'_> {
    fn file(&self) -> &ScannedFile {
        match self {
            Member::Broadcast(file, _) | Member::Download(file, _) => file,
        }
    }
}

/// Buckets files by the identity key their names carry. Input order does not
/// matter; the result is sorted by key with each member list sorted by path.
pub fn group_files(category: Category, files: &[ScannedFile], dl_extensions: &[String]) -> Grouping {
    let mut buckets: BTreeMap<IdentityKey, Vec<Member<'_>>> = BTreeMap::new();
    let mut issues = Vec::new();

    for file in files {
        // names that are not UTF-8 cannot be keyed or stored
        let Some(name) = file.path.file_name().and_then(|name| name.to_str()) else {
            warn!("Unrecognized filename: {:?}", file.path);
            issues.push(ScanIssue::UnrecognizedFilename {
                path: file.path.clone(),
            });
            continue;
        };
        let member = match (category, parse_file_name(name)) {
            (Category::Broadcast, ParsedName::Broadcast(parsed)) => {
                let key = IdentityKey::broadcast(&parsed.timestamp, &parsed.channel, &parsed.title);
                Some((key, Member::Broadcast(file, parsed)))
            }
            (Category::Download, ParsedName::Download(parsed))
                if is_media_extension(&parsed.extension, dl_extensions) =>
            {
                let key = IdentityKey::download(
                    &parsed.title,
                    parsed.year,
                    &parsed.provider_id,
                    &parsed.version,
                );
                Some((key, Member::Download(file, parsed)))
            }
            _ => None,
        };
        match member {
            Some((key, member)) => buckets.entry(key).or_default().push(member),
            None => {
                warn!("Unrecognized filename: {:?}", file.path);
                issues.push(ScanIssue::UnrecognizedFilename {
                    path: file.path.clone(),
                });
            }
        }
    }

    let mut entities = Vec::with_capacity(buckets.len());
    let mut incomplete = 0;
    for (key, mut members) in buckets {
        members.sort_by(|a, b| a.file().path.cmp(&b.file().path));
        let entity = match category {
            Category::Broadcast => broadcast_entity(key, &members),
            Category::Download => download_entity(key, &members),
        };
        if !entity.complete {
            debug!("Incomplete recording {}: {:?}", entity.key, entity.files);
            incomplete += 1;
        }
        entities.push(entity);
    }

    Grouping {
        category,
        entities,
        issues,
        incomplete,
    }
}

fn is_media_extension(extension: &str, dl_extensions: &[String]) -> bool {
    dl_extensions
        .iter()
        .any(|ext| ext.trim_start_matches('.').eq_ignore_ascii_case(extension))
}

fn broadcast_entity(key: IdentityKey, members: &[Member<'_>]) -> GroupedEntity {
    let mut files = BTreeSet::new();
    let mut present = Vec::new();
    let mut video_size = 0u64;
    let mut stamp_input = String::new();
    let mut name: Option<&BroadcastName> = None;

    for member in members {
        let Member::Broadcast(file, parsed) = member else {
            continue;
        };
        files.insert(file.path.clone());
        present.push(parsed.extension);
        if parsed.extension == common::E2Extension::Ts {
            video_size = video_size.max(file.size);
        }
        if parsed.extension.is_companion() {
            stamp_input.push_str(&format!(
                "{}\u{1f}{}\u{1f}{}\n",
                file.path.to_string_lossy(),
                file.modified,
                file.size
            ));
        }
        name.get_or_insert(parsed);
    }

    let complete = common::E2_EXTENSIONS
        .iter()
        .filter(|ext| ext.is_required())
        .all(|ext| present.contains(ext));

    let metadata = match name {
        Some(parsed) => Metadata {
            title: parsed.title.clone(),
            channel: parsed.channel.clone(),
            timestamp: Some(parsed.display_timestamp()),
            file_size: video_size,
            origin: MetadataOrigin::Filename,
            ..Metadata::default()
        },
        None => Metadata::default(),
    };

    GroupedEntity {
        search_key: search_key(&metadata.title),
        key,
        files,
        complete,
        metadata,
        companion_stamp: if stamp_input.is_empty() {
            None
        } else {
            Some(stable_id(&stamp_input))
        },
    }
}

fn download_entity(key: IdentityKey, members: &[Member<'_>]) -> GroupedEntity {
    let mut files = BTreeSet::new();
    let mut size = 0u64;
    let mut name: Option<&DownloadName> = None;

    for member in members {
        let Member::Download(file, parsed) = member else {
            continue;
        };
        files.insert(file.path.clone());
        size = size.max(file.size);
        name.get_or_insert(parsed);
    }

    let metadata = match name {
        Some(parsed) => Metadata {
            title: parsed.title.clone(),
            channel: parsed.source.clone(),
            year: Some(parsed.year),
            description: format!("{} ({})", parsed.year, parsed.provider_id),
            file_size: size,
            origin: MetadataOrigin::Filename,
            ..Metadata::default()
        },
        None => Metadata::default(),
    };

    GroupedEntity {
        search_key: search_key(&metadata.title),
        key,
        files,
        complete: true,
        metadata,
        companion_stamp: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str) -> ScannedFile {
        ScannedFile {
            path: PathBuf::from(path),
            size: 10,
            modified: 1,
        }
    }

    fn media() -> Vec<String> {
        vec!["mp4".to_string(), ".mkv".to_string()]
    }

    const BASE: &str = "/hdd/movie/20230219 0230 - TELE 5 HD - Title";

    #[test]
    fn groups_one_complete_broadcast_and_reports_garbage() {
        let files = vec![
            file(&format!("{}.eit", BASE)),
            file(&format!("{}.ts", BASE)),
            file(&format!("{}.ts.meta", BASE)),
            file("/hdd/movie/garbage.txt"),
        ];
        let grouping = group_files(Category::Broadcast, &files, &media());
        assert_eq!(grouping.entities.len(), 1);
        let entity = &grouping.entities[0];
        assert_eq!(
            entity.key,
            IdentityKey::broadcast("20230219 0230", "TELE 5 HD", "Title")
        );
        assert_eq!(entity.files.len(), 3);
        assert!(entity.complete);
        assert_eq!(entity.metadata.timestamp.as_deref(), Some("2023-02-19 02:30"));
        assert_eq!(entity.metadata.channel, "TELE 5 HD");
        assert_eq!(entity.search_key, "title");
        assert!(entity.companion_stamp.is_some());
        assert_eq!(grouping.issues.len(), 1);
        assert!(matches!(
            &grouping.issues[0],
            ScanIssue::UnrecognizedFilename { path } if path.ends_with("garbage.txt")
        ));
    }

    #[test]
    fn grouping_ignores_input_order() {
        let mut files: Vec<ScannedFile> = [".ts.sc", ".ts", ".eit", ".ts.ap", ".ts.cuts", ".ts.meta"]
            .iter()
            .map(|ext| file(&format!("{}{}", BASE, ext)))
            .collect();
        let forward = group_files(Category::Broadcast, &files, &media());
        files.reverse();
        let backward = group_files(Category::Broadcast, &files, &media());
        files.swap(0, 3);
        let shuffled = group_files(Category::Broadcast, &files, &media());

        assert_eq!(forward.entities.len(), 1);
        assert_eq!(forward.entities, backward.entities);
        assert_eq!(forward.entities, shuffled.entities);
        assert_eq!(forward.entities[0].files.len(), 6);
    }

    #[test]
    fn missing_eit_is_incomplete_but_grouped() {
        let files = vec![file(&format!("{}.ts", BASE)), file(&format!("{}.ts.meta", BASE))];
        let grouping = group_files(Category::Broadcast, &files, &media());
        assert_eq!(grouping.entities.len(), 1);
        assert!(!grouping.entities[0].complete);
        assert_eq!(grouping.incomplete, 1);
        assert!(grouping.issues.is_empty());
    }

    #[test]
    fn download_versions_become_separate_entities() {
        let files = vec![
            file("/dl/Movie (2020) [tmdbid=5] - Source.mp4"),
            file("/dl/Movie (2020) [tmdbid=5] - Source (Remastered).mp4"),
        ];
        let grouping = group_files(Category::Download, &files, &media());
        assert_eq!(grouping.entities.len(), 2);
        assert!(grouping.issues.is_empty());
        let keys: Vec<String> = grouping.entities.iter().map(|e| e.key.to_string()).collect();
        assert_eq!(
            keys,
            vec![
                "dl:Movie (2020) [tmdbid=5]",
                "dl:Movie (2020) [tmdbid=5] (Remastered)"
            ]
        );
        let plain = &grouping.entities[0];
        assert_eq!(plain.metadata.year, Some(2020));
        assert_eq!(plain.metadata.channel, "Source");
        assert_eq!(plain.metadata.description, "2020 (tmdbid=5)");
    }

    #[test]
    fn download_rejects_non_media_and_broadcast_names() {
        let files = vec![
            file("/dl/Movie (2020) [tmdbid=5] - Source.nfo"),
            file(&format!("{}.ts", BASE)),
            file("/dl/Other (2019) [tmdbid=7] - WEB.MKV"),
        ];
        let grouping = group_files(Category::Download, &files, &media());
        assert_eq!(grouping.entities.len(), 1);
        assert_eq!(grouping.issues.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_name_is_unrecognized() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let name = OsStr::from_bytes(b"Caf\xE9 (2020) [tmdbid=2] - WEB.mp4");
        let bad = PathBuf::from("/dl").join(name);
        let files = vec![
            ScannedFile {
                path: bad.clone(),
                size: 10,
                modified: 1,
            },
            file("/dl/Movie (2020) [tmdbid=5] - Source.mp4"),
        ];
        let grouping = group_files(Category::Download, &files, &media());
        assert_eq!(grouping.entities.len(), 1);
        assert!(matches!(
            &grouping.issues[..],
            [ScanIssue::UnrecognizedFilename { path }] if *path == bad
        ));
    }

    #[test]
    fn companion_stamp_tracks_modification() {
        let mut files = vec![file(&format!("{}.eit", BASE)), file(&format!("{}.ts", BASE))];
        let before = group_files(Category::Broadcast, &files, &media());
        files[0].modified = 2;
        let after = group_files(Category::Broadcast, &files, &media());
        assert_ne!(
            before.entities[0].companion_stamp,
            after.entities[0].companion_stamp
        );
        files[1].modified = 5;
        let video_only = group_files(Category::Broadcast, &files, &media());
        assert_eq!(
            after.entities[0].companion_stamp,
            video_only.entities[0].companion_stamp
        );
    }
}
