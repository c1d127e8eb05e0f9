use std::env;

use common::{Attribute, Category, IdentityKey, RecordingEntity};
use library::config::{config_path_from_env, load_or_create_config};
use library::query::sort_entities;
use library::{Catalog, CatalogSettings, CompanionInfo, SortField, SortOrder};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: dvrcat <command>
  scan                          rescan all roots
  list [rec|dl] [field] [desc]  list entries, optionally sorted
  find <title prefix>           search by normalized title
  set <key> <good|drop|mastered> <on|off>
  comment <key> <text>          set or clear (empty text) a comment
  info <key>                    metadata and raw event info
  drop [rec|dl]                 write marked entries to the drop list
  summary                       attribute counts";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = config_path_from_env();
    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Created default config at {:?}", config_path);
    }
    let settings = CatalogSettings::from_config(&config_path, &config);
    let (catalog, load) = Catalog::open(settings)?;
    for issue in &load.issues {
        warn!("{}", issue);
    }

    let args: Vec<String> = env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("scan");
    let rest = args.get(1..).unwrap_or(&[]);

    match command {
        "scan" => {
            for summary in catalog.refresh_all()? {
                for issue in &summary.issues {
                    warn!("{}", issue);
                }
                println!("{}", summary);
            }
        }
        "list" => {
            let category = rest.first().and_then(|value| Category::from_label(value));
            let offset = usize::from(category.is_some());
            let mut rows = catalog.query_all(category);
            if let Some(name) = rest.get(offset) {
                let field = SortField::from_name(name)
                    .ok_or_else(|| format!("unknown sort field: {}", name))?;
                let order = match rest.get(offset + 1).map(String::as_str) {
                    Some("desc") => SortOrder::Descending,
                    _ => SortOrder::Ascending,
                };
                sort_entities(&mut rows, field, order);
            }
            for row in &rows {
                print_row(row);
            }
        }
        "find" => {
            let prefix = rest.join(" ");
            for row in catalog.find(&prefix) {
                print_row(&row);
            }
        }
        "set" => {
            let [key, attribute, state] = rest else {
                return Err(USAGE.into());
            };
            let key: IdentityKey = key.parse()?;
            let attribute = Attribute::from_name(attribute)
                .ok_or_else(|| format!("unknown attribute: {}", attribute))?;
            let on = match state.as_str() {
                "on" | "1" | "true" => true,
                "off" | "0" | "false" => false,
                other => return Err(format!("expected on or off, got {}", other).into()),
            };
            if catalog.set_attribute(&key, attribute, on)? {
                println!("{} {} {}", key, attribute, if on { "set" } else { "cleared" });
            }
            catalog.flush()?;
        }
        "comment" => {
            let Some((key, text)) = rest.split_first() else {
                return Err(USAGE.into());
            };
            let key: IdentityKey = key.parse()?;
            catalog.set_comment(&key, &text.join(" "))?;
            catalog.flush()?;
        }
        "info" => {
            let key: IdentityKey = rest.first().ok_or(USAGE)?.parse()?;
            let row = catalog
                .get(&key)
                .ok_or_else(|| format!("unknown entry: {}", key))?;
            print_info(&row);
            print_companions(&catalog.companion_info(&key)?);
            if let Some(text) = catalog.eit_text(&key)? {
                println!("eit:\n{}", text);
            }
        }
        "drop" => {
            let category = rest.first().and_then(|value| Category::from_label(value));
            let report = catalog.drop_marked(category)?;
            println!(
                "dropped {} entries, {} paths written to {:?}",
                report.purged_entities.len(),
                report.written_paths.len(),
                catalog.settings().drop_list_path
            );
            if let Some(warning) = report.flush_warning {
                warn!("cache not saved after drop: {}", warning);
            }
        }
        "summary" => println!("{}", catalog.summary()),
        _ => return Err(USAGE.into()),
    }

    Ok(())
}

fn print_row(row: &RecordingEntity) {
    println!("{}", format_row(row));
}

/// One listing line. The key comes first so it can be pasted into `set`,
/// `comment` and `info`.
fn format_row(row: &RecordingEntity) -> String {
    let when = row
        .metadata
        .timestamp
        .clone()
        .or_else(|| row.metadata.year.map(|year| year.to_string()))
        .unwrap_or_default();
    format!(
        "{}\t{} {:>16} {:>5} {:>7.2}G {:<12} {}{}",
        row.key,
        row.flags(),
        when,
        row.metadata
            .duration_secs
            .map(|secs| format!("{}m", secs / 60))
            .unwrap_or_default(),
        row.metadata.file_size as f64 / (1024.0 * 1024.0 * 1024.0),
        row.metadata.channel,
        row.metadata.title,
        if row.complete { "" } else { " (incomplete)" }
    )
}

fn print_info(row: &RecordingEntity) {
    println!("key:         {}", row.key);
    println!("title:       {}", row.metadata.title);
    println!("channel:     {}", row.metadata.channel);
    if let Some(timestamp) = &row.metadata.timestamp {
        match row.metadata.end_time() {
            Some(end) => println!("time:        {} - {}", timestamp, end),
            None => println!("time:        {}", timestamp),
        }
    }
    if !row.metadata.description.is_empty() {
        println!("description: {}", row.metadata.description);
    }
    if let Some(extended) = &row.metadata.extended_description {
        println!("extended:    {}", extended);
    }
    println!("flags:       {}", row.flags());
    if !row.comment.is_empty() {
        println!("comment:     {}", row.comment);
    }
    for path in row.ordered_files() {
        println!("file:        {}", path.display());
    }
}

fn print_companions(info: &CompanionInfo) {
    if let Some(meta) = &info.meta {
        println!("service:     {}", meta.service_ref);
        if let Some(recorded_at) = meta.recorded_at {
            println!("recorded:    {}", recorded_at);
        }
        if !meta.tags.is_empty() {
            println!("tags:        {}", meta.tags.join(" "));
        }
        if let Some(size) = meta.file_size {
            println!("meta size:   {}", size);
        }
    }
    if let Some(eit) = &info.eit {
        println!("event id:    {}", eit.event_id);
        if let Some(start) = &eit.start {
            println!("event start: {} UTC", start);
        }
        if let Some(language) = &eit.language {
            println!("language:    {}", language);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{search_key, Metadata};

    #[test]
    fn row_starts_with_a_usable_key() {
        let key = IdentityKey::broadcast("20230219 0230", "TELE 5 HD", "Title");
        let row = RecordingEntity {
            key: key.clone(),
            files: Default::default(),
            complete: false,
            metadata: Metadata {
                title: "Title".to_string(),
                channel: "TELE 5 HD".to_string(),
                timestamp: Some("2023-02-19 02:30".to_string()),
                ..Metadata::default()
            },
            search_key: search_key("Title"),
            attributes: Default::default(),
            comment: String::new(),
            first_seen: 0,
            last_seen: 0,
        };
        let line = format_row(&row);
        let (first, rest) = line.split_once('\t').unwrap();
        assert_eq!(first, "rec:20230219 0230 - TELE 5 HD - Title");
        assert_eq!(first.parse::<IdentityKey>().unwrap(), key);
        assert!(rest.ends_with("Title (incomplete)"));
    }
}
