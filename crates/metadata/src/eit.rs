//! DVB event information as Enigma2 stores it next to a recording: one event
//! section body (ETSI EN 300 468, 5.2.4) without the table header.

use time::macros::format_description;
use time::{Date, PrimitiveDateTime, Time};

use crate::MetadataError;

const HEADER_LEN: usize = 12;
const SHORT_EVENT_TAG: u8 = 0x4D;
const EXTENDED_EVENT_TAG: u8 = 0x4E;
const MJD_TO_JULIAN_DAY: i32 = 2_400_001;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EitInfo {
    pub event_id: u16,
    /// UTC start, `YYYY-MM-DD HH:MM`.
    pub start: Option<String>,
    pub duration_secs: Option<u32>,
    pub language: Option<String>,
    pub title: String,
    pub short_text: String,
    pub extended_text: String,
}

pub fn parse_eit(data: &[u8]) -> Result<EitInfo, MetadataError> {
    if data.len() < HEADER_LEN {
        return Err(malformed(format!(
            "event header needs {} bytes, found {}",
            HEADER_LEN,
            data.len()
        )));
    }

    let mut info = EitInfo {
        event_id: u16::from_be_bytes([data[0], data[1]]),
        start: decode_start(&data[2..7]),
        duration_secs: decode_bcd_duration(&data[7..10]),
        ..EitInfo::default()
    };

    let loop_len = (usize::from(data[10] & 0x0F) << 8) | usize::from(data[11]);
    let end = (HEADER_LEN + loop_len).min(data.len());
    let mut pos = HEADER_LEN;

    while pos + 2 <= end {
        let tag = data[pos];
        let len = usize::from(data[pos + 1]);
        let body_start = pos + 2;
        let body_end = body_start + len;
        if body_end > end {
            return Err(malformed(format!(
                "descriptor 0x{:02X} at {} overruns the event ({} > {})",
                tag, pos, body_end, end
            )));
        }
        let body = &data[body_start..body_end];
        match tag {
            SHORT_EVENT_TAG => read_short_event(body, &mut info)?,
            EXTENDED_EVENT_TAG => read_extended_event(body, &mut info)?,
            _ => {}
        }
        pos = body_end;
    }

    Ok(info)
}

fn read_short_event(body: &[u8], info: &mut EitInfo) -> Result<(), MetadataError> {
    let mut reader = Reader::new(body);
    let language = reader.take(3)?;
    let name_len = reader.byte()?;
    let name = reader.take(usize::from(name_len))?;
    let text_len = reader.byte()?;
    let text = reader.take(usize::from(text_len))?;

    if info.language.is_none() {
        info.language = Some(String::from_utf8_lossy(language).to_string());
    }
    info.title = decode_text(name);
    info.short_text = decode_text(text);
    Ok(())
}

fn read_extended_event(body: &[u8], info: &mut EitInfo) -> Result<(), MetadataError> {
    let mut reader = Reader::new(body);
    let _number = reader.byte()?;
    let language = reader.take(3)?;
    let items_len = reader.byte()?;
    reader.take(usize::from(items_len))?;
    let text_len = reader.byte()?;
    let text = reader.take(usize::from(text_len))?;

    if info.language.is_none() {
        info.language = Some(String::from_utf8_lossy(language).to_string());
    }
    // long descriptions are split over consecutive descriptors
    info.extended_text.push_str(&decode_text(text));
    Ok(())
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn byte(&mut self) -> Result<u8, MetadataError> {
        Ok(self.take(1)?[0])
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], MetadataError> {
        let end = self.pos + len;
        if end > self.data.len() {
            return Err(malformed(format!(
                "descriptor field needs {} bytes at offset {}, {} left",
                len,
                self.pos,
                self.data.len() - self.pos
            )));
        }
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }
}

fn malformed(reason: String) -> MetadataError {
    MetadataError::Malformed(reason)
}

fn decode_start(bytes: &[u8]) -> Option<String> {
    let mjd = u16::from_be_bytes([bytes[0], bytes[1]]);
    if mjd == 0xFFFF {
        return None;
    }
    let date = Date::from_julian_day(i32::from(mjd) + MJD_TO_JULIAN_DAY).ok()?;
    let time = Time::from_hms(bcd(bytes[2])?, bcd(bytes[3])?, bcd(bytes[4])?).ok()?;
    PrimitiveDateTime::new(date, time)
        .format(format_description!("[year]-[month]-[day] [hour]:[minute]"))
        .ok()
}

fn decode_bcd_duration(bytes: &[u8]) -> Option<u32> {
    let hours = u32::from(bcd(bytes[0])?);
    let minutes = u32::from(bcd(bytes[1])?);
    let seconds = u32::from(bcd(bytes[2])?);
    if minutes > 59 || seconds > 59 {
        return None;
    }
    Some(hours * 3600 + minutes * 60 + seconds)
}

fn bcd(byte: u8) -> Option<u8> {
    let high = byte >> 4;
    let low = byte & 0x0F;
    if high > 9 || low > 9 {
        return None;
    }
    Some(high * 10 + low)
}

/// Decodes a DVB text field. A leading byte below 0x20 selects the character
/// table; 0x15 is UTF-8, 0x11 is UCS-2, everything else is read as Latin-1.
fn decode_text(bytes: &[u8]) -> String {
    let raw = match bytes.first() {
        None => return String::new(),
        Some(0x15) => String::from_utf8_lossy(&bytes[1..]).to_string(),
        Some(0x11) => {
            let units: Vec<u16> = bytes[1..]
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            char::decode_utf16(units)
                .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
                .collect()
        }
        Some(0x10) => latin1(bytes.get(3..).unwrap_or(&[])),
        Some(selector) if *selector < 0x20 => latin1(&bytes[1..]),
        Some(_) => latin1(bytes),
    };
    strip_control_codes(&raw)
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|b| char::from(*b)).collect()
}

// 0x80..=0x9F are DVB control codes; 0x8A is the only one worth keeping.
fn strip_control_codes(text: &str) -> String {
    text.chars()
        .filter_map(|c| match c {
            '\u{8A}' => Some('\n'),
            '\u{80}'..='\u{9F}' => None,
            c => Some(c),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short_event(name: &[u8], text: &[u8]) -> Vec<u8> {
        let mut body = b"deu".to_vec();
        body.push(name.len() as u8);
        body.extend_from_slice(name);
        body.push(text.len() as u8);
        body.extend_from_slice(text);
        let mut out = vec![SHORT_EVENT_TAG, body.len() as u8];
        out.extend(body);
        out
    }

    fn extended_event(number: u8, text: &[u8]) -> Vec<u8> {
        let mut body = vec![number];
        body.extend_from_slice(b"deu");
        body.push(0);
        body.push(text.len() as u8);
        body.extend_from_slice(text);
        let mut out = vec![EXTENDED_EVENT_TAG, body.len() as u8];
        out.extend(body);
        out
    }

    fn event(descriptors: &[Vec<u8>]) -> Vec<u8> {
        let payload: Vec<u8> = descriptors.concat();
        // 2023-02-19 is MJD 59994; 02:30:00 start, 01:30:00 duration
        let mut out = vec![0x12, 0x34, 0xEA, 0x5A, 0x02, 0x30, 0x00, 0x01, 0x30, 0x00];
        out.push(0x80 | ((payload.len() >> 8) as u8 & 0x0F));
        out.push(payload.len() as u8);
        out.extend(payload);
        out
    }

    #[test]
    fn parses_header_and_descriptors() {
        let data = event(&[
            short_event(b"Title", b"Spielfilm"),
            extended_event(0x01, b"First half, "),
            extended_event(0x11, b"second half."),
        ]);
        let info = parse_eit(&data).unwrap();
        assert_eq!(info.event_id, 0x1234);
        assert_eq!(info.start.as_deref(), Some("2023-02-19 02:30"));
        assert_eq!(info.duration_secs, Some(5400));
        assert_eq!(info.language.as_deref(), Some("deu"));
        assert_eq!(info.title, "Title");
        assert_eq!(info.short_text, "Spielfilm");
        assert_eq!(info.extended_text, "First half, second half.");
    }

    #[test]
    fn decodes_character_tables() {
        assert_eq!(decode_text(b"\x15Gr\xC3\xBC\xC3\x9Fe"), "Grüße");
        assert_eq!(decode_text(b"\x05Caf\xE9"), "Café");
        assert_eq!(decode_text(b"Zeile 1\x8AZeile 2\x86"), "Zeile 1\nZeile 2");
        assert_eq!(decode_text(b""), "");
    }

    #[test]
    fn rejects_short_header() {
        assert!(matches!(
            parse_eit(&[0x00, 0x01, 0x02]),
            Err(MetadataError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_overrunning_descriptor() {
        let mut data = event(&[short_event(b"Title", b"Text")]);
        // claim a longer name than the descriptor holds
        data[HEADER_LEN + 5] = 0x40;
        assert!(matches!(parse_eit(&data), Err(MetadataError::Malformed(_))));
    }

    #[test]
    fn undefined_start_and_duration_are_none() {
        let data = vec![0, 1, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x80, 0x00];
        let info = parse_eit(&data).unwrap();
        assert_eq!(info.start, None);
        assert_eq!(info.duration_secs, None);
        assert!(info.title.is_empty());
    }
}
