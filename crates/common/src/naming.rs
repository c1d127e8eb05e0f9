use time::macros::format_description;
use time::{Duration, PrimitiveDateTime};

/// Files an Enigma2 receiver writes for one recording, in canonical order.
pub const E2_EXTENSIONS: [E2Extension; 6] = [
    E2Extension::Eit,
    E2Extension::Ts,
    E2Extension::TsAp,
    E2Extension::TsCuts,
    E2Extension::TsMeta,
    E2Extension::TsSc,
];

const TIMESTAMP_LEN: usize = 13;
const FIELD_SEP: &str = " - ";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum E2Extension {
    Eit,
    Ts,
    TsAp,
    TsCuts,
    TsMeta,
    TsSc,
}

impl E2Extension {
    pub fn suffix(self) -> &'static str {
        match self {
            E2Extension::Eit => ".eit",
            E2Extension::Ts => ".ts",
            E2Extension::TsAp => ".ts.ap",
            E2Extension::TsCuts => ".ts.cuts",
            E2Extension::TsMeta => ".ts.meta",
            E2Extension::TsSc => ".ts.sc",
        }
    }

    /// A broadcast entity is complete once every required file is present.
    pub fn is_required(self) -> bool {
        matches!(self, E2Extension::Eit | E2Extension::Ts)
    }

    pub fn is_companion(self) -> bool {
        matches!(self, E2Extension::Eit | E2Extension::TsMeta)
    }

    pub fn rank(self) -> usize {
        E2_EXTENSIONS
            .iter()
            .position(|ext| *ext == self)
            .unwrap_or(E2_EXTENSIONS.len())
    }

    pub fn from_file_name(name: &str) -> Option<Self> {
        split_e2_extension(name).map(|(_, ext)| ext)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BroadcastName {
    /// Raw `YYYYMMDD HHMM` token as it appears in the filename.
    pub timestamp: String,
    pub recorded_at: PrimitiveDateTime,
    pub channel: String,
    pub title: String,
    pub extension: E2Extension,
}

impl BroadcastName {
    /// `YYYY-MM-DD HH:MM`
    pub fn display_timestamp(&self) -> String {
        format_timestamp(self.recorded_at)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadName {
    pub title: String,
    pub year: i32,
    /// `provider=id`, e.g. `tmdbid=5`.
    pub provider_id: String,
    pub source: String,
    pub version: String,
    pub extension: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParsedName {
    Broadcast(BroadcastName),
    Download(DownloadName),
    Unrecognized,
}

/// Tries the broadcast layout first, then the download layout.
pub fn parse_file_name(file_name: &str) -> ParsedName {
    if let Some(name) = parse_broadcast(file_name) {
        return ParsedName::Broadcast(name);
    }
    if let Some(name) = parse_download(file_name) {
        return ParsedName::Download(name);
    }
    ParsedName::Unrecognized
}

fn split_e2_extension(name: &str) -> Option<(&str, E2Extension)> {
    E2_EXTENSIONS
        .iter()
        .find_map(|ext| name.strip_suffix(ext.suffix()).map(|stem| (stem, *ext)))
}

fn parse_broadcast(file_name: &str) -> Option<BroadcastName> {
    let (stem, extension) = split_e2_extension(file_name)?;
    let timestamp = stem.get(..TIMESTAMP_LEN)?;
    let recorded_at = PrimitiveDateTime::parse(
        timestamp,
        format_description!("[year][month][day] [hour][minute]"),
    )
    .ok()?;
    let rest = stem[TIMESTAMP_LEN..].strip_prefix(FIELD_SEP)?;
    let (channel, title) = rest.split_once(FIELD_SEP)?;
    let channel = channel.trim();
    let title = title.trim();
    if channel.is_empty() || title.is_empty() {
        return None;
    }
    Some(BroadcastName {
        timestamp: timestamp.to_string(),
        recorded_at,
        channel: channel.to_string(),
        title: title.to_string(),
        extension,
    })
}

fn parse_download(file_name: &str) -> Option<DownloadName> {
    let (stem, extension) = file_name.rsplit_once('.')?;
    if extension.is_empty() || extension.contains(' ') {
        return None;
    }
    // the title is the shortest prefix followed by ` (YYYY) [key=value] - `
    let mut search_from = 0;
    while let Some(offset) = stem[search_from..].find(" (") {
        let at = search_from + offset;
        if at > 0 {
            if let Some(name) = parse_download_tail(&stem[..at], &stem[at + 2..], extension) {
                return Some(name);
            }
        }
        search_from = at + 2;
    }
    None
}

fn parse_download_tail(title: &str, tail: &str, extension: &str) -> Option<DownloadName> {
    let year_str = tail.get(..4)?;
    if !year_str.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let year = year_str.parse::<i32>().ok()?;
    let tail = tail[4..].strip_prefix(") [")?;
    let close = tail.find(']')?;
    let provider_id = &tail[..close];
    let (provider, _) = provider_id.split_once('=')?;
    if provider.trim().is_empty() {
        return None;
    }
    let rest = tail[close + 1..].strip_prefix(FIELD_SEP)?;
    let (source, version) = split_version(rest);
    if source.is_empty() {
        return None;
    }
    Some(DownloadName {
        title: title.to_string(),
        year,
        provider_id: provider_id.to_string(),
        source: source.to_string(),
        version: version.to_string(),
        extension: extension.to_string(),
    })
}

fn split_version(rest: &str) -> (&str, &str) {
    let trimmed = rest.trim_end();
    if !trimmed.ends_with(')') {
        return (trimmed, "");
    }
    let open = match trimmed.rfind(" (") {
        Some(idx) => idx,
        None => return (trimmed, ""),
    };
    let version = trimmed[open + 2..trimmed.len() - 1].trim();
    let source = trimmed[..open].trim_end();
    if version.is_empty() || source.is_empty() {
        return (trimmed, "");
    }
    (source, version)
}

pub(crate) fn format_timestamp(value: PrimitiveDateTime) -> String {
    value
        .format(format_description!("[year]-[month]-[day] [hour]:[minute]"))
        .unwrap_or_default()
}

pub(crate) fn end_time(start: &str, duration_secs: u32) -> Option<String> {
    let start = PrimitiveDateTime::parse(
        start,
        format_description!("[year]-[month]-[day] [hour]:[minute]"),
    )
    .ok()?;
    let end = start.checked_add(Duration::seconds(i64::from(duration_secs)))?;
    end.format(format_description!("[hour]:[minute]")).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broadcast(name: &str) -> BroadcastName {
        match parse_file_name(name) {
            ParsedName::Broadcast(parsed) => parsed,
            other => panic!("expected broadcast for {:?}, got {:?}", name, other),
        }
    }

    fn download(name: &str) -> DownloadName {
        match parse_file_name(name) {
            ParsedName::Download(parsed) => parsed,
            other => panic!("expected download for {:?}, got {:?}", name, other),
        }
    }

    #[test]
    fn parses_broadcast_names_for_every_extension() {
        for ext in E2_EXTENSIONS {
            let name = format!("20230219 0230 - TELE 5 HD - Title{}", ext.suffix());
            let parsed = broadcast(&name);
            assert_eq!(parsed.timestamp, "20230219 0230");
            assert_eq!(parsed.channel, "TELE 5 HD");
            assert_eq!(parsed.title, "Title");
            assert_eq!(parsed.extension, ext);
            assert_eq!(parsed.display_timestamp(), "2023-02-19 02:30");
        }
    }

    #[test]
    fn broadcast_title_may_contain_separators() {
        let parsed = broadcast("20221231 2015 - ZDF HD - Krimi - Der Fall - Teil 2.ts.cuts");
        assert_eq!(parsed.channel, "ZDF HD");
        assert_eq!(parsed.title, "Krimi - Der Fall - Teil 2");
        assert_eq!(parsed.extension, E2Extension::TsCuts);
    }

    #[test]
    fn rejects_broadcast_with_bad_timestamp() {
        assert_eq!(
            parse_file_name("20231345 9999 - ARD - News.ts"),
            ParsedName::Unrecognized
        );
        assert_eq!(parse_file_name("2023 - ARD - News.ts"), ParsedName::Unrecognized);
        assert_eq!(
            parse_file_name("20230219 0230 - ARD.ts"),
            ParsedName::Unrecognized
        );
    }

    #[test]
    fn parses_download_names() {
        let parsed = download("Movie (2020) [tmdbid=5] - Source.mp4");
        assert_eq!(parsed.title, "Movie");
        assert_eq!(parsed.year, 2020);
        assert_eq!(parsed.provider_id, "tmdbid=5");
        assert_eq!(parsed.source, "Source");
        assert_eq!(parsed.version, "");
        assert_eq!(parsed.extension, "mp4");

        let parsed = download("Movie (2020) [tmdbid=5] - Source (Remastered).mp4");
        assert_eq!(parsed.source, "Source");
        assert_eq!(parsed.version, "Remastered");
    }

    #[test]
    fn download_title_may_contain_parentheses() {
        let parsed = download("Solaris (Director's Cut) (1972) [imdbid=tt0069293] - BluRay.mkv");
        assert_eq!(parsed.title, "Solaris (Director's Cut)");
        assert_eq!(parsed.year, 1972);
        assert_eq!(parsed.provider_id, "imdbid=tt0069293");
        assert_eq!(parsed.source, "BluRay");
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_file_name("garbage.txt"), ParsedName::Unrecognized);
        assert_eq!(parse_file_name("Movie (2020) - Source.mp4"), ParsedName::Unrecognized);
        assert_eq!(
            parse_file_name("Movie (2020) [tmdbid5] - Source.mp4"),
            ParsedName::Unrecognized
        );
        assert_eq!(parse_file_name("no extension"), ParsedName::Unrecognized);
    }

    #[test]
    fn required_and_companion_extensions() {
        assert!(E2Extension::Eit.is_required());
        assert!(E2Extension::Ts.is_required());
        assert!(!E2Extension::TsMeta.is_required());
        assert!(E2Extension::TsMeta.is_companion());
        assert!(!E2Extension::TsSc.is_companion());
    }

    #[test]
    fn end_time_wraps_midnight() {
        assert_eq!(end_time("2023-02-19 23:30", 3600).as_deref(), Some("00:30"));
        assert_eq!(end_time("not a timestamp", 60), None);
    }
}
