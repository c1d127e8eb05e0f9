use std::collections::HashMap;
use std::fmt;

use common::{search_key, RecordingEntity};

use crate::rules;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortField {
    Title,
    Channel,
    Date,
    Time,
    Size,
    Duration,
    Good,
    Drop,
    Mastered,
    /// Entries sharing the search key.
    Count,
    MaxSize,
    SumSize,
    AvgSize,
    AnyDrop,
    AnyGood,
    AnyMastered,
}

impl SortField {
    pub fn from_name(name: &str) -> Option<Self> {
        let field = match name.to_ascii_lowercase().as_str() {
            "title" => SortField::Title,
            "channel" | "source" => SortField::Channel,
            "date" => SortField::Date,
            "time" => SortField::Time,
            "size" => SortField::Size,
            "duration" => SortField::Duration,
            "good" => SortField::Good,
            "drop" | "dropped" => SortField::Drop,
            "mastered" => SortField::Mastered,
            "count" => SortField::Count,
            "max_size" => SortField::MaxSize,
            "sum_size" => SortField::SumSize,
            "avg_size" => SortField::AvgSize,
            "any_drop" => SortField::AnyDrop,
            "any_good" => SortField::AnyGood,
            "any_mastered" => SortField::AnyMastered,
            _ => return None,
        };
        Some(field)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum SortValue {
    Number(u64),
    Text(String),
}

#[derive(Default)]
struct GroupStats {
    count: u64,
    max_size: u64,
    sum_size: u64,
    any_drop: bool,
    any_good: bool,
    any_mastered: bool,
}

/// Sorts snapshots in place. Ties fall back to the search key and then the
/// identity key, both ascending, so the order is total.
pub fn sort_entities(rows: &mut Vec<RecordingEntity>, field: SortField, order: SortOrder) {
    let groups = group_stats(rows);
    let mut keyed: Vec<(SortValue, RecordingEntity)> = rows
        .drain(..)
        .map(|row| (sort_value(&row, field, &groups), row))
        .collect();
    keyed.sort_by(|(a_value, a), (b_value, b)| {
        let primary = match order {
            SortOrder::Ascending => a_value.cmp(b_value),
            SortOrder::Descending => b_value.cmp(a_value),
        };
        primary
            .then_with(|| a.search_key.cmp(&b.search_key))
            .then_with(|| a.key.cmp(&b.key))
    });
    rows.extend(keyed.into_iter().map(|(_, row)| row));
}

fn group_stats(rows: &[RecordingEntity]) -> HashMap<String, GroupStats> {
    let mut groups: HashMap<String, GroupStats> = HashMap::new();
    for row in rows {
        let stats = groups.entry(row.search_key.clone()).or_default();
        stats.count += 1;
        stats.max_size = stats.max_size.max(row.metadata.file_size);
        stats.sum_size += row.metadata.file_size;
        stats.any_drop |= row.attributes.drop;
        stats.any_good |= row.attributes.good;
        stats.any_mastered |= row.attributes.mastered;
    }
    groups
}

fn sort_value(
    row: &RecordingEntity,
    field: SortField,
    groups: &HashMap<String, GroupStats>,
) -> SortValue {
    let flag = |on: bool| SortValue::Number(u64::from(on));
    let stats = groups.get(&row.search_key);
    let group = |pick: fn(&GroupStats) -> u64| SortValue::Number(stats.map(pick).unwrap_or(0));
    match field {
        SortField::Title => SortValue::Text(row.search_key.clone()),
        SortField::Channel => SortValue::Text(row.metadata.channel.to_lowercase()),
        SortField::Date => SortValue::Text(date_part(row)),
        SortField::Time => SortValue::Text(time_part(row)),
        SortField::Size => SortValue::Number(row.metadata.file_size),
        SortField::Duration => {
            SortValue::Number(u64::from(row.metadata.duration_secs.unwrap_or(0)))
        }
        SortField::Good => flag(row.attributes.good),
        SortField::Drop => flag(row.attributes.drop),
        SortField::Mastered => flag(row.attributes.mastered),
        SortField::Count => group(|s| s.count),
        SortField::MaxSize => group(|s| s.max_size),
        SortField::SumSize => group(|s| s.sum_size),
        SortField::AvgSize => group(|s| if s.count == 0 { 0 } else { s.sum_size / s.count }),
        SortField::AnyDrop => group(|s| u64::from(s.any_drop)),
        SortField::AnyGood => group(|s| u64::from(s.any_good)),
        SortField::AnyMastered => group(|s| u64::from(s.any_mastered)),
    }
}

// downloads carry only a year
fn date_part(row: &RecordingEntity) -> String {
    match (&row.metadata.timestamp, row.metadata.year) {
        (Some(timestamp), _) => timestamp.split(' ').next().unwrap_or("").to_string(),
        (None, Some(year)) => format!("{:04}", year),
        (None, None) => String::new(),
    }
}

fn time_part(row: &RecordingEntity) -> String {
    row.metadata
        .timestamp
        .as_deref()
        .and_then(|timestamp| timestamp.split(' ').nth(1))
        .unwrap_or("")
        .to_string()
}

/// Rows whose search key starts with the normalized `prefix`.
pub fn find<'a, I>(rows: I, prefix: &str) -> Vec<&'a RecordingEntity>
where
    I: IntoIterator<Item = &'a RecordingEntity>,
{
    let needle = search_key(prefix);
    rows.into_iter()
        .filter(|row| row.search_key.starts_with(&needle))
        .collect()
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CatalogSummary {
    pub marked_for_drop: usize,
    pub drop_bytes: u64,
    pub good: usize,
    pub mastered: usize,
    pub total: usize,
}

impl CatalogSummary {
    pub fn from_rows<'a, I>(rows: I) -> Self
    where
        I: IntoIterator<Item = &'a RecordingEntity> + Clone,
    {
        let marked = rules::entities_marked_for_drop(rows.clone(), None);
        let mut summary = CatalogSummary {
            marked_for_drop: marked.len(),
            ..CatalogSummary::default()
        };
        for row in rows {
            summary.total += 1;
            if row.attributes.good {
                summary.good += 1;
            }
            if row.attributes.mastered {
                summary.mastered += 1;
            }
            if marked.contains(&row.key) {
                summary.drop_bytes += row.metadata.file_size;
            }
        }
        summary
    }

    pub fn drop_gib(&self) -> f64 {
        self.drop_bytes as f64 / GIB
    }
}

impl fmt::Display for CatalogSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "drop: {} ({:.2} GiB) | good: {} | mastered: {} | total: {}",
            self.marked_for_drop,
            self.drop_gib(),
            self.good,
            self.mastered,
            self.total
        )
    }
}
