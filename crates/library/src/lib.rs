use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::{Attribute, Category, E2Extension, IdentityKey, MetadataOrigin, RecordingEntity};
use metadata::{read_eit, read_eit_printable, read_meta, EitInfo, MetaInfo, MetadataError};
use parking_lot::Mutex;
use tracing::{info, warn};

pub mod cache;
pub mod config;
pub mod droplist;
pub mod extract;
pub mod group;
pub mod query;
pub mod rules;
pub mod scan;

pub use cache::{CacheError, EntryCache, LoadReport, ReconcileReport};
pub use config::{CatalogSettings, ConfigError, DvrConfig};
pub use query::{CatalogSummary, SortField, SortOrder};

/// A per-item problem met during a run. These are reported and skipped,
/// never raised.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScanIssue {
    DirectoryUnreadable { root: PathBuf, reason: String },
    UnrecognizedFilename { path: PathBuf },
    MetadataParseError { path: PathBuf, reason: String },
    CacheLoadCorruption { key: String, reason: String },
}

impl fmt::Display for ScanIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanIssue::DirectoryUnreadable { root, reason } => {
                write!(f, "directory unreadable {:?}: {}", root, reason)
            }
            ScanIssue::UnrecognizedFilename { path } => {
                write!(f, "unrecognized filename {:?}", path)
            }
            ScanIssue::MetadataParseError { path, reason } => {
                write!(f, "metadata parse error {:?}: {}", path, reason)
            }
            ScanIssue::CacheLoadCorruption { key, reason } => {
                write!(f, "corrupt cache row {}: {}", key, reason)
            }
        }
    }
}

#[derive(Debug)]
pub enum CatalogError {
    Cache(CacheError),
    Metadata(MetadataError),
    DropListWrite {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogError::Cache(err) => write!(f, "cache error: {}", err),
            CatalogError::Metadata(err) => write!(f, "metadata error: {}", err),
            CatalogError::DropListWrite { path, source } => {
                write!(f, "failed to write drop list {:?}: {}", path, source)
            }
        }
    }
}

impl std::error::Error for CatalogError {}

impl From<CacheError> for CatalogError {
    fn from(err: CacheError) -> Self {
        CatalogError::Cache(err)
    }
}

impl From<MetadataError> for CatalogError {
    fn from(err: MetadataError) -> Self {
        CatalogError::Metadata(err)
    }
}

#[derive(Debug)]
pub struct RunSummary {
    pub category: Category,
    pub directories_scanned: usize,
    pub directories_unreadable: usize,
    pub files_processed: usize,
    pub unrecognized: usize,
    pub incomplete: usize,
    pub metadata_parsed: usize,
    pub metadata_errors: usize,
    pub reconcile: ReconcileReport,
    pub total_entries: usize,
    pub issues: Vec<ScanIssue>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} total entries | {} files in {} directories ({} in cache, {} new) and {} purged",
            self.category,
            self.total_entries,
            self.files_processed,
            self.directories_scanned,
            self.reconcile.unchanged_count,
            self.reconcile.new_count,
            self.reconcile.purged_count
        )?;
        if self.directories_unreadable > 0 {
            write!(f, ", {} directories unreadable", self.directories_unreadable)?;
        }
        if self.unrecognized > 0 {
            write!(f, ", {} unrecognized files", self.unrecognized)?;
        }
        if self.incomplete > 0 {
            write!(f, ", {} incomplete", self.incomplete)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct DropReport {
    pub written_paths: Vec<PathBuf>,
    pub purged_entities: Vec<IdentityKey>,
    /// Set when the drop list was written but the cache could not be saved
    /// afterwards.
    pub flush_warning: Option<String>,
}

/// Companion files of a broadcast, parsed fresh from disk.
#[derive(Debug, Default)]
pub struct CompanionInfo {
    pub meta: Option<MetaInfo>,
    pub eit: Option<EitInfo>,
}

/// The catalog engine: scans configured roots into the entry cache and
/// serves reads and attribute edits. Every mutation goes through one lock.
#[derive(Clone)]
pub struct Catalog {
    settings: Arc<CatalogSettings>,
    cache: Arc<Mutex<EntryCache>>,
}

impl Catalog {
    pub fn open(settings: CatalogSettings) -> Result<(Self, LoadReport), CatalogError> {
        let (cache, report) = EntryCache::open(&settings.cache_path)?;
        if !report.issues.is_empty() {
            warn!("Skipped {} corrupt cache rows", report.issues.len());
        }
        let catalog = Self {
            settings: Arc::new(settings),
            cache: Arc::new(Mutex::new(cache)),
        };
        Ok((catalog, report))
    }

    pub fn settings(&self) -> &CatalogSettings {
        &self.settings
    }

    /// One scan pass over a category's roots. Scanning and companion parsing
    /// run without holding the cache lock.
    pub fn refresh(&self, category: Category) -> Result<RunSummary, CatalogError> {
        let roots = self.settings.roots(category);
        let scan = scan::scan_roots(roots, category);
        let mut grouping = group::group_files(category, &scan.files, &self.settings.dl_extensions);

        let mut issues = scan.issues;
        let unrecognized = grouping.issues.len();
        issues.append(&mut grouping.issues);

        let stale: Vec<usize> = {
            let cache = self.cache.lock();
            grouping
                .entities
                .iter()
                .enumerate()
                .filter(|(_, entity)| match entity.companion_stamp.as_deref() {
                    Some(stamp) => !cache.has_current_metadata(&entity.key, Some(stamp)),
                    None => false,
                })
                .map(|(index, _)| index)
                .collect()
        };

        let mut metadata_parsed = 0;
        let mut metadata_errors = 0;
        for index in stale {
            let entity = &mut grouping.entities[index];
            let found = extract::extract_metadata(entity);
            if entity.metadata.origin == MetadataOrigin::Companion {
                metadata_parsed += 1;
            }
            metadata_errors += found.len();
            issues.extend(found);
        }

        let (reconcile, total_entries) = {
            let mut cache = self.cache.lock();
            for (configured, canonical) in &scan.resolved_roots {
                cache.remember_root(configured, canonical);
            }
            let report = cache.reconcile(category, grouping.entities, &scan.unavailable_roots);
            cache.flush()?;
            (report, cache.count(category))
        };

        let summary = RunSummary {
            category,
            directories_scanned: scan.roots_scanned,
            directories_unreadable: scan.unavailable_roots.len(),
            files_processed: scan.files.len(),
            unrecognized,
            incomplete: grouping.incomplete,
            metadata_parsed,
            metadata_errors,
            reconcile,
            total_entries,
            issues,
        };
        info!("{}", summary);
        Ok(summary)
    }

    pub fn refresh_all(&self) -> Result<Vec<RunSummary>, CatalogError> {
        Category::ALL
            .iter()
            .map(|category| self.refresh(*category))
            .collect()
    }

    pub fn set_attribute(
        &self,
        key: &IdentityKey,
        attribute: Attribute,
        on: bool,
    ) -> Result<bool, CatalogError> {
        Ok(self.cache.lock().set_attribute(key, attribute, on)?)
    }

    pub fn set_comment(&self, key: &IdentityKey, text: &str) -> Result<(), CatalogError> {
        Ok(self.cache.lock().set_comment(key, text)?)
    }

    pub fn set_comment_all(&self, keys: &[IdentityKey], text: &str) -> Result<usize, CatalogError> {
        Ok(self.cache.lock().set_comment_all(keys, text)?)
    }

    pub fn query_all(&self, category: Option<Category>) -> Vec<RecordingEntity> {
        self.cache.lock().query_all(category)
    }

    pub fn get(&self, key: &IdentityKey) -> Option<RecordingEntity> {
        self.cache.lock().get(key).cloned()
    }

    pub fn find(&self, prefix: &str) -> Vec<RecordingEntity> {
        let cache = self.cache.lock();
        query::find(cache.rows(), prefix).into_iter().cloned().collect()
    }

    pub fn marked_for_drop(&self, category: Option<Category>) -> BTreeSet<IdentityKey> {
        rules::entities_marked_for_drop(self.cache.lock().rows(), category)
    }

    pub fn summary(&self) -> CatalogSummary {
        let cache = self.cache.lock();
        let rows: Vec<&RecordingEntity> = cache.rows().collect();
        CatalogSummary::from_rows(rows.iter().copied())
    }

    /// Records every file of `keys` in the drop list, then forgets the
    /// entries. Unknown keys fail the call before anything is written, and
    /// a failed write leaves the cache untouched.
    pub fn drop(&self, keys: &[IdentityKey]) -> Result<DropReport, CatalogError> {
        let mut cache = self.cache.lock();
        let mut seen = BTreeSet::new();
        let mut entities = Vec::new();
        for key in keys {
            if !seen.insert(key.clone()) {
                continue;
            }
            let entity = cache
                .get(key)
                .cloned()
                .ok_or_else(|| CacheError::UnknownEntry(key.clone()))?;
            entities.push(entity);
        }
        if entities.is_empty() {
            return Ok(DropReport::default());
        }

        let path = &self.settings.drop_list_path;
        let written_paths = droplist::append_drop_list(path, &entities).map_err(|source| {
            CatalogError::DropListWrite {
                path: path.clone(),
                source,
            }
        })?;

        let ordered: Vec<IdentityKey> = entities.iter().map(|entity| entity.key.clone()).collect();
        let purged_entities = cache
            .remove(&ordered)
            .into_iter()
            .map(|entity| entity.key)
            .collect();

        let flush_warning = match cache.flush() {
            Ok(()) => None,
            Err(err) => {
                warn!("Drop list written but cache flush failed: {}", err);
                Some(err.to_string())
            }
        };

        Ok(DropReport {
            written_paths,
            purged_entities,
            flush_warning,
        })
    }

    pub fn drop_marked(&self, category: Option<Category>) -> Result<DropReport, CatalogError> {
        let keys: Vec<IdentityKey> = self.marked_for_drop(category).into_iter().collect();
        self.drop(&keys)
    }

    /// The raw `.eit` of a broadcast as printable text, if it has one.
    pub fn eit_text(&self, key: &IdentityKey) -> Result<Option<String>, CatalogError> {
        let eit = {
            let cache = self.cache.lock();
            let entity = cache
                .get(key)
                .ok_or_else(|| CacheError::UnknownEntry(key.clone()))?;
            entity.files.iter().find(|path| is_eit(path)).cloned()
        };
        match eit {
            Some(path) => Ok(Some(read_eit_printable(&path)?)),
            None => Ok(None),
        }
    }

    /// Everything the `.ts.meta` and `.eit` of an entry carry, including the
    /// fields the catalog does not keep. A companion that fails to parse is
    /// logged and left empty.
    pub fn companion_info(&self, key: &IdentityKey) -> Result<CompanionInfo, CatalogError> {
        let files = {
            let cache = self.cache.lock();
            let entity = cache
                .get(key)
                .ok_or_else(|| CacheError::UnknownEntry(key.clone()))?;
            entity.files.clone()
        };
        let mut info = CompanionInfo::default();
        for path in &files {
            match companion_kind(path) {
                Some(E2Extension::TsMeta) => match read_meta(path) {
                    Ok(meta) => info.meta = Some(meta),
                    Err(err) => warn!("Metadata parse failed for {:?}: {}", path, err),
                },
                Some(E2Extension::Eit) => match read_eit(path) {
                    Ok(eit) => info.eit = Some(eit),
                    Err(err) => warn!("Event info parse failed for {:?}: {}", path, err),
                },
                _ => {}
            }
        }
        Ok(info)
    }

    pub fn flush(&self) -> Result<(), CatalogError> {
        Ok(self.cache.lock().flush()?)
    }
}

fn companion_kind(path: &Path) -> Option<E2Extension> {
    path.file_name()
        .and_then(|name| E2Extension::from_file_name(&name.to_string_lossy()))
}

fn is_eit(path: &Path) -> bool {
    companion_kind(path) == Some(E2Extension::Eit)
}
