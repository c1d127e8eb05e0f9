use std::fs;
use std::path::Path;

mod eit;

pub use eit::{parse_eit, EitInfo};

/// Enigma2 stores lengths in 90 kHz PTS ticks.
const PTS_PER_SECOND: u64 = 90_000;

/// Contents of an Enigma2 `.ts.meta` file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MetaInfo {
    pub service_ref: String,
    pub channel: String,
    pub title: String,
    pub description: String,
    pub recorded_at: Option<u64>,
    pub tags: Vec<String>,
    pub duration_secs: Option<u32>,
    pub file_size: Option<u64>,
}

#[derive(Debug)]
pub enum MetadataError {
    Io(std::io::Error),
    Malformed(String),
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "io error: {}", err),
            MetadataError::Malformed(reason) => write!(f, "malformed metadata: {}", reason),
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Io(err)
    }
}

pub fn read_meta(path: &Path) -> Result<MetaInfo, MetadataError> {
    let data = fs::read(path)?;
    parse_meta(&String::from_utf8_lossy(&data))
}

pub fn read_eit(path: &Path) -> Result<EitInfo, MetadataError> {
    let data = fs::read(path)?;
    parse_eit(&data)
}

/// The raw event table as text: every byte outside the printable ASCII range
/// becomes `.`.
pub fn read_eit_printable(path: &Path) -> Result<String, MetadataError> {
    let data = fs::read(path)?;
    Ok(printable_ascii(&data))
}

pub fn parse_meta(text: &str) -> Result<MetaInfo, MetadataError> {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() < 3 {
        return Err(MetadataError::Malformed(format!(
            "expected at least 3 lines, found {}",
            lines.len()
        )));
    }

    let service_ref = lines[0].trim().to_string();
    let channel = service_ref
        .rsplit(':')
        .next()
        .unwrap_or("")
        .trim()
        .to_string();
    let title = lines[1].trim().to_string();
    let description = strip_title_prefix(lines[2].trim(), &title);

    let mut info = MetaInfo {
        service_ref,
        channel,
        title,
        description,
        ..MetaInfo::default()
    };

    info.recorded_at = lines.get(3).and_then(|line| parse_number(line));
    if let Some(line) = lines.get(4) {
        info.tags = line
            .split_whitespace()
            .map(|tag| tag.to_string())
            .collect();
    }
    info.duration_secs = lines
        .get(5)
        .and_then(|line| parse_number(line))
        .filter(|pts| *pts > 0)
        .map(|pts| (pts / PTS_PER_SECOND).min(u64::from(u32::MAX)) as u32);
    info.file_size = lines
        .get(6)
        .and_then(|line| parse_number(line))
        .filter(|size| *size > 0);

    Ok(info)
}

fn parse_number(line: &str) -> Option<u64> {
    line.trim().parse().ok()
}

// Receivers often repeat the title at the start of the description.
fn strip_title_prefix(description: &str, title: &str) -> String {
    if title.is_empty() {
        return description.to_string();
    }
    match description.strip_prefix(title) {
        Some(rest) => format!("~{}", rest).trim().to_string(),
        None => description.to_string(),
    }
}

fn printable_ascii(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| {
            if (b' '..b'~').contains(b) {
                char::from(*b)
            } else {
                '.'
            }
        })
        .collect()
}
