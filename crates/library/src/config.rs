use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use common::Category;
use serde::{Deserialize, Serialize};

pub const CONFIG_VERSION: u32 = 1;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DvrConfig {
    pub version: u32,
    /// Enigma2 movie directories.
    pub rec_paths: Vec<String>,
    pub dl_paths: Vec<String>,
    pub cache_path: String,
    pub drop_list_path: String,
    pub dl_extensions: Vec<String>,
}

impl Default for DvrConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            rec_paths: Vec::new(),
            dl_paths: Vec::new(),
            cache_path: "dvrcat.redb".to_string(),
            drop_list_path: "dropped".to_string(),
            dl_extensions: default_dl_extensions(),
        }
    }
}

fn default_dl_extensions() -> Vec<String> {
    ["mp4", "mkv", "avi", "m4v", "webm"]
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn config_path_from_env() -> PathBuf {
    match env::var("DVR_CONFIG") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("config.yaml")),
        Err(_) => PathBuf::from("config.yaml"),
    }
}

/// Loads the config, writing a default one first when none exists. The bool
/// is true when the file was created.
pub fn load_or_create_config(path: &Path) -> Result<(DvrConfig, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut config: DvrConfig = serde_yaml::from_str(&contents)?;
        if config.version < CONFIG_VERSION {
            config.version = CONFIG_VERSION;
        }
        if config.cache_path.trim().is_empty() {
            config.cache_path = "dvrcat.redb".to_string();
        }
        if config.drop_list_path.trim().is_empty() {
            config.drop_list_path = "dropped".to_string();
        }
        if config.dl_extensions.is_empty() {
            config.dl_extensions = default_dl_extensions();
        }
        return Ok((config, false));
    }

    let config = DvrConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

pub fn save_config(path: &Path, config: &DvrConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}

pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value);
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}

/// Everything the catalog needs, with paths already resolved.
#[derive(Clone, Debug)]
pub struct CatalogSettings {
    pub rec_paths: Vec<PathBuf>,
    pub dl_paths: Vec<PathBuf>,
    pub cache_path: PathBuf,
    pub drop_list_path: PathBuf,
    pub dl_extensions: Vec<String>,
}

impl CatalogSettings {
    pub fn from_config(config_path: &Path, config: &DvrConfig) -> Self {
        let roots = |values: &[String]| -> Vec<PathBuf> {
            values
                .iter()
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .map(|value| resolve_path(config_path, value))
                .collect()
        };
        Self {
            rec_paths: roots(&config.rec_paths),
            dl_paths: roots(&config.dl_paths),
            cache_path: resolve_path(config_path, config.cache_path.trim()),
            drop_list_path: resolve_path(config_path, config.drop_list_path.trim()),
            dl_extensions: config.dl_extensions.clone(),
        }
    }

    pub fn roots(&self, category: Category) -> &[PathBuf] {
        match category {
            Category::Broadcast => &self.rec_paths,
            Category::Download => &self.dl_paths,
        }
    }
}
