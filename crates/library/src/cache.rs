use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::{Attribute, Category, IdentityKey, MetadataOrigin, RecordingEntity};
use redb::{
    CommitError, Database, DatabaseError, ReadableTable, StorageError, TableDefinition, TableError,
    TransactionError,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::group::GroupedEntity;
use crate::rules::{self, AttributeConflict};
use crate::ScanIssue;

const CACHE_VERSION: u32 = 1;
const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
const ENTRIES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("entries");
const META_VERSION_KEY: &str = "version";
const META_ROOTS_KEY: &str = "roots";

#[derive(Debug)]
pub enum CacheError {
    Io(std::io::Error),
    Redb(redb::Error),
    Json(serde_json::Error),
    VersionMismatch(u32),
    UnknownEntry(IdentityKey),
    InvalidAttributeTransition {
        key: IdentityKey,
        conflict: AttributeConflict,
    },
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::Io(err) => write!(f, "io error: {}", err),
            CacheError::Redb(err) => write!(f, "db error: {}", err),
            CacheError::Json(err) => write!(f, "json error: {}", err),
            CacheError::VersionMismatch(version) => {
                write!(f, "cache version mismatch: {}", version)
            }
            CacheError::UnknownEntry(key) => write!(f, "unknown entry: {}", key),
            CacheError::InvalidAttributeTransition { key, conflict } => {
                write!(f, "invalid attribute transition for {}: {}", key, conflict)
            }
        }
    }
}

impl std::error::Error for CacheError {}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(err)
    }
}

impl From<redb::Error> for CacheError {
    fn from(err: redb::Error) -> Self {
        CacheError::Redb(err)
    }
}

impl From<DatabaseError> for CacheError {
    fn from(err: DatabaseError) -> Self {
        CacheError::Redb(err.into())
    }
}

impl From<TableError> for CacheError {
    fn from(err: TableError) -> Self {
        CacheError::Redb(err.into())
    }
}

impl From<TransactionError> for CacheError {
    fn from(err: TransactionError) -> Self {
        CacheError::Redb(err.into())
    }
}

impl From<StorageError> for CacheError {
    fn from(err: StorageError) -> Self {
        CacheError::Redb(err.into())
    }
}

impl From<CommitError> for CacheError {
    fn from(err: CommitError) -> Self {
        CacheError::Redb(err.into())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Json(err)
    }
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: usize,
    pub issues: Vec<ScanIssue>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub new_count: usize,
    pub unchanged_count: usize,
    /// Vanished rows that carried attributes or a comment.
    pub purged_count: usize,
    /// All vanished rows, including attribute-free ones.
    pub removed_count: usize,
    /// Vanished rows kept because their root could not be scanned.
    pub kept_unavailable: usize,
}

/// In-memory copy of every row, written back to redb on `flush`.
pub struct EntryCache {
    db: Database,
    rows: BTreeMap<IdentityKey, RecordingEntity>,
    dirty: BTreeSet<IdentityKey>,
    removed: BTreeSet<IdentityKey>,
    /// Last canonical form seen for each configured root.
    roots: BTreeMap<PathBuf, PathBuf>,
    roots_dirty: bool,
    version_written: bool,
}

impl EntryCache {
    /// Loads every row. Rows that fail to decode or break the attribute
    /// invariant are skipped and reported; the rest loads.
    pub fn open(path: &Path) -> Result<(Self, LoadReport), CacheError> {
        let db = open_or_create_db(path)?;
        let version_written = match read_version(&db)? {
            Some(version) if version == CACHE_VERSION => true,
            Some(version) => return Err(CacheError::VersionMismatch(version)),
            None => false,
        };

        let mut report = LoadReport::default();
        let mut rows = BTreeMap::new();
        {
            let read_txn = db.begin_read()?;
            match read_txn.open_table(ENTRIES_TABLE) {
                Ok(table) => {
                    for entry in table.iter()? {
                        let entry = entry?;
                        let raw_key = entry.0.value().to_string();
                        match decode_row(&raw_key, entry.1.value()) {
                            Ok(row) => {
                                rows.insert(row.key.clone(), row);
                            }
                            Err(reason) => {
                                warn!("Skipping corrupt cache row {}: {}", raw_key, reason);
                                report.issues.push(ScanIssue::CacheLoadCorruption {
                                    key: raw_key,
                                    reason,
                                });
                            }
                        }
                    }
                }
                Err(TableError::TableDoesNotExist(_)) => {}
                Err(err) => return Err(err.into()),
            };
        }
        report.loaded = rows.len();
        info!("Loaded {} cache entries from {:?}", report.loaded, path);
        let roots = read_roots(&db)?;

        Ok((
            Self {
                db,
                rows,
                dirty: BTreeSet::new(),
                removed: BTreeSet::new(),
                roots,
                roots_dirty: false,
                version_written,
            },
            report,
        ))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn count(&self, category: Category) -> usize {
        self.rows.keys().filter(|key| key.category() == category).count()
    }

    pub fn get(&self, key: &IdentityKey) -> Option<&RecordingEntity> {
        self.rows.get(key)
    }

    pub fn rows(&self) -> impl Iterator<Item = &RecordingEntity> {
        self.rows.values()
    }

    /// True when the row already holds metadata parsed from companions that
    /// have not changed since.
    pub fn has_current_metadata(&self, key: &IdentityKey, stamp: Option<&str>) -> bool {
        match (self.rows.get(key), stamp) {
            (Some(row), Some(stamp)) => {
                row.metadata.origin == MetadataOrigin::Companion
                    && row.metadata.stamp.as_deref() == Some(stamp)
            }
            _ => false,
        }
    }

    /// Records where a configured root pointed when it last opened, so its
    /// rows are still recognized after the target goes away.
    pub fn remember_root(&mut self, configured: &Path, canonical: &Path) {
        if self.roots.get(configured).map(PathBuf::as_path) != Some(canonical) {
            debug!("Root {:?} resolves to {:?}", configured, canonical);
            self.roots.insert(configured.to_path_buf(), canonical.to_path_buf());
            self.roots_dirty = true;
        }
    }

    pub fn known_root(&self, configured: &Path) -> Option<&Path> {
        self.roots.get(configured).map(PathBuf::as_path)
    }

    /// Upserts one category's scan result and deletes the rows of that
    /// category that were not found. Rows with a file under one of
    /// `unavailable_roots`, or under the last known target of one, are left
    /// alone.
    pub fn reconcile(
        &mut self,
        category: Category,
        entities: Vec<GroupedEntity>,
        unavailable_roots: &[PathBuf],
    ) -> ReconcileReport {
        let now = now_secs();
        let mut report = ReconcileReport::default();
        let mut seen = BTreeSet::new();

        for entity in entities {
            if entity.key.category() != category {
                continue;
            }
            seen.insert(entity.key.clone());
            match self.rows.get_mut(&entity.key) {
                Some(row) => {
                    report.unchanged_count += 1;
                    let keep_parsed = entity.metadata.origin == MetadataOrigin::Filename
                        && row.metadata.origin == MetadataOrigin::Companion
                        && entity.companion_stamp.is_some()
                        && row.metadata.stamp == entity.companion_stamp;
                    if keep_parsed {
                        row.metadata.file_size = entity.metadata.file_size;
                    } else {
                        row.metadata = entity.metadata;
                        row.search_key = entity.search_key;
                    }
                    row.files = entity.files;
                    row.complete = entity.complete;
                    row.last_seen = now;
                    self.dirty.insert(row.key.clone());
                }
                None => {
                    report.new_count += 1;
                    debug!("New entry {}", entity.key);
                    let row = RecordingEntity {
                        key: entity.key.clone(),
                        files: entity.files,
                        complete: entity.complete,
                        metadata: entity.metadata,
                        search_key: entity.search_key,
                        attributes: Default::default(),
                        comment: String::new(),
                        first_seen: now,
                        last_seen: now,
                    };
                    self.removed.remove(&entity.key);
                    self.dirty.insert(entity.key.clone());
                    self.rows.insert(entity.key, row);
                }
            }
        }

        let mut blocked: Vec<PathBuf> = unavailable_roots.to_vec();
        blocked.extend(
            unavailable_roots
                .iter()
                .filter_map(|root| self.roots.get(root).cloned()),
        );

        let vanished: Vec<IdentityKey> = self
            .rows
            .values()
            .filter(|row| row.category() == category && !seen.contains(&row.key))
            .filter(|row| {
                let unavailable = row
                    .files
                    .iter()
                    .any(|file| blocked.iter().any(|root| file.starts_with(root)));
                if unavailable {
                    report.kept_unavailable += 1;
                }
                !unavailable
            })
            .map(|row| row.key.clone())
            .collect();

        for row in self.remove(&vanished) {
            report.removed_count += 1;
            if row.has_user_state() {
                info!("Purged vanished entry {} ({})", row.key, row.flags());
                report.purged_count += 1;
            }
        }

        report
    }

    /// Switches one attribute. Returns whether the row changed; a conflicting
    /// change is rejected and leaves the row as it was.
    pub fn set_attribute(
        &mut self,
        key: &IdentityKey,
        attribute: Attribute,
        on: bool,
    ) -> Result<bool, CacheError> {
        let row = self
            .rows
            .get_mut(key)
            .ok_or_else(|| CacheError::UnknownEntry(key.clone()))?;
        let next = rules::transition(row.attributes, attribute, on).map_err(|conflict| {
            CacheError::InvalidAttributeTransition {
                key: key.clone(),
                conflict,
            }
        })?;
        if next == row.attributes {
            return Ok(false);
        }
        row.attributes = next;
        self.dirty.insert(key.clone());
        Ok(true)
    }

    pub fn set_comment(&mut self, key: &IdentityKey, text: &str) -> Result<(), CacheError> {
        self.set_comment_all(std::slice::from_ref(key), text).map(|_| ())
    }

    /// Sets the same comment on every key, or on none of them when one key is
    /// unknown.
    pub fn set_comment_all(&mut self, keys: &[IdentityKey], text: &str) -> Result<usize, CacheError> {
        if let Some(missing) = keys.iter().find(|key| !self.rows.contains_key(*key)) {
            return Err(CacheError::UnknownEntry(missing.clone()));
        }
        let text = text.trim();
        let mut changed = 0;
        for key in keys {
            if let Some(row) = self.rows.get_mut(key) {
                if row.comment != text {
                    row.comment = text.to_string();
                    self.dirty.insert(key.clone());
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    /// Snapshots in key order, optionally restricted to one category.
    pub fn query_all(&self, category: Option<Category>) -> Vec<RecordingEntity> {
        self.rows
            .values()
            .filter(|row| category.map(|c| row.category() == c).unwrap_or(true))
            .cloned()
            .collect()
    }

    pub fn remove(&mut self, keys: &[IdentityKey]) -> Vec<RecordingEntity> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(row) = self.rows.remove(key) {
                self.dirty.remove(key);
                self.removed.insert(key.clone());
                out.push(row);
            }
        }
        out
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
            || !self.removed.is_empty()
            || self.roots_dirty
            || !self.version_written
    }

    /// Writes pending changes in one transaction. Nothing is marked clean
    /// unless the commit succeeds. A row that cannot be encoded is logged and
    /// left out; it stays in memory but is not retried.
    pub fn flush(&mut self) -> Result<(), CacheError> {
        if !self.is_dirty() {
            return Ok(());
        }
        let mut encoded = Vec::with_capacity(self.dirty.len());
        for key in &self.dirty {
            let Some(row) = self.rows.get(key) else {
                continue;
            };
            match encode_value(row) {
                Ok(bytes) => encoded.push((key.to_string(), bytes)),
                Err(err) => warn!("Not saving cache entry {}: {}", key, err),
            }
        }
        let roots = if self.roots_dirty {
            match encode_value(&self.roots) {
                Ok(bytes) => Some(bytes),
                Err(err) => {
                    warn!("Not saving root locations: {}", err);
                    None
                }
            }
        } else {
            None
        };

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ENTRIES_TABLE)?;
            for key in &self.removed {
                table.remove(key.to_string().as_str())?;
            }
            for (key, bytes) in &encoded {
                table.insert(key.as_str(), bytes.as_slice())?;
            }
            let mut meta = write_txn.open_table(META_TABLE)?;
            let version = encode_value(&CACHE_VERSION)?;
            meta.insert(META_VERSION_KEY, version.as_slice())?;
            if let Some(bytes) = &roots {
                meta.insert(META_ROOTS_KEY, bytes.as_slice())?;
            }
        }
        write_txn.commit()?;
        debug!(
            "Flushed {} of {} changed and {} removed cache entries",
            encoded.len(),
            self.dirty.len(),
            self.removed.len()
        );
        self.dirty.clear();
        self.removed.clear();
        self.roots_dirty = false;
        self.version_written = true;
        Ok(())
    }
}

fn open_or_create_db(path: &Path) -> Result<Database, CacheError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    if path.exists() {
        Ok(Database::open(path)?)
    } else {
        Ok(Database::create(path)?)
    }
}

fn read_version(db: &Database) -> Result<Option<u32>, CacheError> {
    let read_txn = db.begin_read()?;
    let table = match read_txn.open_table(META_TABLE) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let version = match table.get(META_VERSION_KEY)? {
        Some(value) => Some(decode_value(value.value())?),
        None => None,
    };
    Ok(version)
}

// A damaged root record is dropped rather than failing the load.
fn read_roots(db: &Database) -> Result<BTreeMap<PathBuf, PathBuf>, CacheError> {
    let read_txn = db.begin_read()?;
    let table = match read_txn.open_table(META_TABLE) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(BTreeMap::new()),
        Err(err) => return Err(err.into()),
    };
    let roots = match table.get(META_ROOTS_KEY)? {
        Some(value) => decode_value(value.value()).unwrap_or_else(|err| {
            warn!("Ignoring unreadable root locations: {}", err);
            BTreeMap::new()
        }),
        None => BTreeMap::new(),
    };
    Ok(roots)
}

fn decode_row(raw_key: &str, bytes: &[u8]) -> Result<RecordingEntity, String> {
    let key: IdentityKey = raw_key.parse().map_err(|err: common::KeyParseError| err.to_string())?;
    let row: RecordingEntity = decode_value(bytes).map_err(|err| err.to_string())?;
    if row.key != key {
        return Err(format!("row is stored under {} but names {}", key, row.key));
    }
    rules::validate(&row.attributes).map_err(|conflict| conflict.to_string())?;
    Ok(row)
}

fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, CacheError> {
    Ok(serde_json::to_vec(value)?)
}

fn decode_value<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, CacheError> {
    Ok(serde_json::from_slice(bytes)?)
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs()
}
