use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

mod naming;

pub use naming::{
    parse_file_name, BroadcastName, DownloadName, E2Extension, ParsedName, E2_EXTENSIONS,
};

const KEY_SEP: &str = ":";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Broadcast,
    Download,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Broadcast, Category::Download];

    pub fn label(self) -> &'static str {
        match self {
            Category::Broadcast => "rec",
            Category::Download => "dl",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "rec" | "broadcast" => Some(Category::Broadcast),
            "dl" | "download" => Some(Category::Download),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Identity of one logical recording, unique within its category.
///
/// The textual form is `<category label>:<name>`, e.g.
/// `rec:20230219 0230 - TELE 5 HD - Title`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IdentityKey {
    category: Category,
    name: String,
}

impl IdentityKey {
    pub fn broadcast(timestamp: &str, channel: &str, title: &str) -> Self {
        Self {
            category: Category::Broadcast,
            name: format!("{} - {} - {}", timestamp, channel, title),
        }
    }

    pub fn download(title: &str, year: i32, provider_id: &str, version: &str) -> Self {
        let mut name = format!("{} ({}) [{}]", title, year, provider_id);
        if !version.is_empty() {
            name.push_str(" (");
            name.push_str(version);
            name.push(')');
        }
        Self {
            category: Category::Download,
            name,
        }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.category.label(), KEY_SEP, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyParseError(pub String);

impl fmt::Display for KeyParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid identity key: {}", self.0)
    }
}

impl std::error::Error for KeyParseError {}

impl FromStr for IdentityKey {
    type Err = KeyParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (label, name) = value
            .split_once(KEY_SEP)
            .ok_or_else(|| KeyParseError(value.to_string()))?;
        let category =
            Category::from_label(label).ok_or_else(|| KeyParseError(value.to_string()))?;
        if name.trim().is_empty() {
            return Err(KeyParseError(value.to_string()));
        }
        Ok(Self {
            category,
            name: name.to_string(),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Attribute {
    Good,
    Drop,
    Mastered,
}

impl Attribute {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "good" | "g" => Some(Attribute::Good),
            "drop" | "d" => Some(Attribute::Drop),
            "mastered" | "m" => Some(Attribute::Mastered),
            _ => None,
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Attribute::Good => "good",
            Attribute::Drop => "drop",
            Attribute::Mastered => "mastered",
        };
        f.write_str(name)
    }
}

/// User-assigned flags. Drop and Mastered must never both be set; the cache
/// validates every change before committing it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Attributes {
    pub good: bool,
    pub drop: bool,
    pub mastered: bool,
}

impl Attributes {
    pub fn get(&self, attribute: Attribute) -> bool {
        match attribute {
            Attribute::Good => self.good,
            Attribute::Drop => self.drop,
            Attribute::Mastered => self.mastered,
        }
    }

    pub fn with(mut self, attribute: Attribute, on: bool) -> Self {
        match attribute {
            Attribute::Good => self.good = on,
            Attribute::Drop => self.drop = on,
            Attribute::Mastered => self.mastered = on,
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        !self.good && !self.drop && !self.mastered
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataOrigin {
    #[default]
    Filename,
    Companion,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub title: String,
    /// Broadcast channel, or the release source for downloads.
    pub channel: String,
    /// `YYYY-MM-DD HH:MM`, broadcasts only.
    pub timestamp: Option<String>,
    pub year: Option<i32>,
    pub duration_secs: Option<u32>,
    pub description: String,
    pub extended_description: Option<String>,
    pub file_size: u64,
    pub origin: MetadataOrigin,
    /// Fingerprint of the companion files the record was parsed from.
    pub stamp: Option<String>,
}

impl Metadata {
    /// End of the broadcast, `HH:MM`, when both start and duration are known.
    pub fn end_time(&self) -> Option<String> {
        let start = self.timestamp.as_deref()?;
        let duration = self.duration_secs?;
        naming::end_time(start, duration)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingEntity {
    pub key: IdentityKey,
    pub files: BTreeSet<PathBuf>,
    pub complete: bool,
    pub metadata: Metadata,
    pub search_key: String,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub first_seen: u64,
    #[serde(default)]
    pub last_seen: u64,
}

impl RecordingEntity {
    pub fn category(&self) -> Category {
        self.key.category()
    }

    /// Files in drop-list order: required files first, then optional
    /// companions, each tier ordered by extension rank and path.
    pub fn ordered_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<&PathBuf> = self.files.iter().collect();
        files.sort_by_key(|path| (file_rank(self.category(), path), (*path).clone()));
        files.into_iter().cloned().collect()
    }

    /// Compact `DGMC` flags, `.` for anything unset.
    pub fn flags(&self) -> String {
        let mut out = String::with_capacity(4);
        out.push(if self.attributes.drop { 'D' } else { '.' });
        out.push(if self.attributes.good { 'G' } else { '.' });
        out.push(if self.attributes.mastered { 'M' } else { '.' });
        out.push(if self.comment.is_empty() { '.' } else { 'C' });
        out
    }

    pub fn has_user_state(&self) -> bool {
        !self.attributes.is_empty() || !self.comment.is_empty()
    }
}

fn file_rank(category: Category, path: &Path) -> (u8, usize) {
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    match category {
        Category::Broadcast => match E2Extension::from_file_name(&name) {
            Some(ext) => (u8::from(!ext.is_required()), ext.rank()),
            None => (2, 0),
        },
        Category::Download => (0, 0),
    }
}

/// Normalized title used for searching and grouping related entries:
/// lowercase, German umlauts transliterated, everything but `[a-z0-9]` removed.
pub fn search_key(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    for ch in line.chars().flat_map(char::to_lowercase) {
        match ch {
            'ä' => out.push_str("ae"),
            'ö' => out.push_str("oe"),
            'ü' => out.push_str("ue"),
            'ß' => out.push_str("ss"),
            c if c.is_ascii_lowercase() || c.is_ascii_digit() => out.push(c),
            _ => {}
        }
    }
    out
}

pub fn stable_id(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}
