use std::path::{Path, PathBuf};

use common::{search_key, E2Extension, MetadataOrigin};
use metadata::{read_eit, read_meta, EitInfo, MetaInfo};
use tracing::{debug, warn};

use crate::group::GroupedEntity;
use crate::ScanIssue;

/// Enriches a broadcast entity from its `.ts.meta` and `.eit` companions.
/// When neither parses, the filename metadata stays in place and the
/// failures come back as issues.
pub fn extract_metadata(entity: &mut GroupedEntity) -> Vec<ScanIssue> {
    let mut issues = Vec::new();
    let meta_path = companion(entity, E2Extension::TsMeta);
    let eit_path = companion(entity, E2Extension::Eit);

    let meta = meta_path.and_then(|path| match read_meta(&path) {
        Ok(info) => Some(info),
        Err(err) => {
            warn!("Metadata parse failed for {:?}: {}", path, err);
            issues.push(ScanIssue::MetadataParseError {
                path,
                reason: err.to_string(),
            });
            None
        }
    });
    let eit = eit_path.and_then(|path| match read_eit(&path) {
        Ok(info) => Some(info),
        Err(err) => {
            warn!("Event info parse failed for {:?}: {}", path, err);
            issues.push(ScanIssue::MetadataParseError {
                path,
                reason: err.to_string(),
            });
            None
        }
    });

    if meta.is_none() && eit.is_none() {
        return issues;
    }
    if let Some(meta) = &meta {
        apply_meta(entity, meta);
    }
    if let Some(eit) = &eit {
        apply_eit(entity, eit, meta.is_some());
    }
    entity.metadata.origin = MetadataOrigin::Companion;
    entity.metadata.stamp = entity.companion_stamp.clone();
    entity.search_key = search_key(&entity.metadata.title);
    debug!("Parsed companion metadata for {}", entity.key);
    issues
}

fn companion(entity: &GroupedEntity, extension: E2Extension) -> Option<PathBuf> {
    entity
        .files
        .iter()
        .find(|path| file_extension(path) == Some(extension))
        .cloned()
}

fn file_extension(path: &Path) -> Option<E2Extension> {
    let name = path.file_name()?.to_string_lossy();
    E2Extension::from_file_name(&name)
}

fn apply_meta(entity: &mut GroupedEntity, meta: &MetaInfo) {
    let metadata = &mut entity.metadata;
    if !meta.title.is_empty() {
        metadata.title = meta.title.clone();
    }
    if !meta.channel.is_empty() {
        metadata.channel = meta.channel.clone();
    }
    metadata.description = meta.description.clone();
    if meta.duration_secs.is_some() {
        metadata.duration_secs = meta.duration_secs;
    }
}

fn apply_eit(entity: &mut GroupedEntity, eit: &EitInfo, have_meta: bool) {
    let metadata = &mut entity.metadata;
    if !have_meta && !eit.title.is_empty() {
        metadata.title = eit.title.clone();
    }
    if metadata.description.is_empty() {
        metadata.description = eit.short_text.clone();
    }
    let extended = eit.extended_text.trim();
    if !extended.is_empty() {
        metadata.extended_description = Some(extended.to_string());
    }
    if metadata.duration_secs.is_none() {
        metadata.duration_secs = eit.duration_secs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::fs;

    use common::{IdentityKey, Metadata};

    const META: &str = "1:0:19:EF10:421:1:C00000:0:0:0::TELE 5 HD\n\
Der Titel\n\
Der Titel - Spielfilm\n\
1676770200\n\
\n\
486000000\n";

    fn entity(dir: &Path, extensions: &[&str]) -> GroupedEntity {
        let base = "20230219 0230 - TELE 5 HD - Title";
        let files: BTreeSet<PathBuf> = extensions
            .iter()
            .map(|ext| dir.join(format!("{}{}", base, ext)))
            .collect();
        GroupedEntity {
            key: IdentityKey::broadcast("20230219 0230", "TELE 5 HD", "Title"),
            files,
            complete: true,
            metadata: Metadata {
                title: "Title".to_string(),
                channel: "TELE 5 HD".to_string(),
                timestamp: Some("2023-02-19 02:30".to_string()),
                ..Metadata::default()
            },
            search_key: "title".to_string(),
            companion_stamp: Some("stamp".to_string()),
        }
    }

    fn eit_bytes() -> Vec<u8> {
        let mut short = b"deu".to_vec();
        short.push(9);
        short.extend_from_slice(b"EIT Titel");
        short.push(4);
        short.extend_from_slice(b"Kurz");
        let mut extended = vec![0x00];
        extended.extend_from_slice(b"deu");
        extended.push(0);
        extended.push(12);
        extended.extend_from_slice(b"Lange Inhalt");

        let mut descriptors = vec![0x4D, short.len() as u8];
        descriptors.extend(short);
        descriptors.push(0x4E);
        descriptors.push(extended.len() as u8);
        descriptors.extend(extended);

        let mut out = vec![0x00, 0x01, 0xEA, 0x5A, 0x02, 0x30, 0x00, 0x01, 0x00, 0x00];
        out.push(0x80);
        out.push(descriptors.len() as u8);
        out.extend(descriptors);
        out
    }

    #[test]
    fn meta_and_eit_enrich_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let mut entity = entity(dir.path(), &[".eit", ".ts", ".ts.meta"]);
        for path in &entity.files {
            if path.to_string_lossy().ends_with(".ts.meta") {
                fs::write(path, META).unwrap();
            } else if path.to_string_lossy().ends_with(".eit") {
                fs::write(path, eit_bytes()).unwrap();
            }
        }

        let issues = extract_metadata(&mut entity);
        assert!(issues.is_empty());
        assert_eq!(entity.metadata.title, "Der Titel");
        assert_eq!(entity.metadata.description, "~ - Spielfilm");
        assert_eq!(entity.metadata.duration_secs, Some(5400));
        assert_eq!(
            entity.metadata.extended_description.as_deref(),
            Some("Lange Inhalt")
        );
        assert_eq!(entity.metadata.origin, MetadataOrigin::Companion);
        assert_eq!(entity.metadata.stamp.as_deref(), Some("stamp"));
        assert_eq!(entity.search_key, "dertitel");
    }

    #[test]
    fn eit_alone_supplies_title_and_duration() {
        let dir = tempfile::tempdir().unwrap();
        let mut entity = entity(dir.path(), &[".eit", ".ts"]);
        for path in &entity.files {
            if path.to_string_lossy().ends_with(".eit") {
                fs::write(path, eit_bytes()).unwrap();
            }
        }
        let issues = extract_metadata(&mut entity);
        assert!(issues.is_empty());
        assert_eq!(entity.metadata.title, "EIT Titel");
        assert_eq!(entity.metadata.description, "Kurz");
        assert_eq!(entity.metadata.duration_secs, Some(3600));
    }

    #[test]
    fn malformed_companions_keep_filename_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let mut entity = entity(dir.path(), &[".eit", ".ts", ".ts.meta"]);
        for path in &entity.files {
            fs::write(path, b"x").unwrap();
        }
        let before = entity.metadata.clone();
        let issues = extract_metadata(&mut entity);
        assert_eq!(issues.len(), 2);
        assert!(issues
            .iter()
            .all(|issue| matches!(issue, ScanIssue::MetadataParseError { .. })));
        assert_eq!(entity.metadata, before);
    }

    #[test]
    fn no_companions_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut entity = entity(dir.path(), &[".ts"]);
        let before = entity.clone();
        assert!(extract_metadata(&mut entity).is_empty());
        assert_eq!(entity, before);
    }
}
