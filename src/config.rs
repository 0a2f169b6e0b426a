//! Settings for editstamp
//!
//! The settings object is loaded once at startup, owned by the [`Updater`]
//! and written back after every mutation. It also carries the content-hash
//! cache, so the on-disk file is the single piece of persisted state.
//!
//! [`Updater`]: crate::updater::Updater

use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Deserializer, Serialize};
use crate::hash_cache::HashCache;
use crate::store::VaultError;

/// Default date pattern, matches the format most note apps use for date properties
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// Directory (relative to the vault root) holding the settings file
pub const SETTINGS_DIR: &str = ".editstamp";
pub const SETTINGS_FILE: &str = "settings.json";

/// Time zone used to render and read back timestamps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeZoneMode {
    #[default]
    Local,
    Utc,
}

impl std::str::FromStr for TimeZoneMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "utc" => Ok(Self::Utc),
            other => Err(format!("unknown timezone mode: {}", other)),
        }
    }
}

/// Persisted settings, stored as camelCase JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// strftime pattern used for both writing and reading dates
    pub date_format: String,
    /// Emit all-digit renderings as numbers instead of strings
    pub enable_number_properties: bool,
    pub enable_create_time: bool,
    pub header_updated: String,
    pub header_created: String,
    pub min_minutes_between_saves: u32,
    /// Older settings files stored a single folder string here
    #[serde(deserialize_with = "string_or_list")]
    pub ignore_global_folder: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub ignore_created_folder: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub ignore_files: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub enable_experimental_hash: bool,
    pub timezone: TimeZoneMode,
    pub file_hash_map: HashCache,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            enable_number_properties: false,
            enable_create_time: true,
            header_updated: "updated".to_string(),
            header_created: "created".to_string(),
            min_minutes_between_saves: 1,
            ignore_global_folder: Vec::new(),
            ignore_created_folder: Vec::new(),
            ignore_files: Vec::new(),
            enable_experimental_hash: false,
            timezone: TimeZoneMode::Local,
            file_hash_map: HashCache::new(),
        }
    }
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        // An empty legacy string would prefix-match every path
        Some(OneOrMany::One(folder)) if folder.is_empty() => Vec::new(),
        Some(OneOrMany::One(folder)) => vec![folder],
        Some(OneOrMany::Many(folders)) => folders,
    })
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Settings {
    /// Apply `EDITSTAMP_*` environment variables on top of the loaded values
    pub fn from_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("EDITSTAMP_DATE_FORMAT") {
            if !val.is_empty() {
                self.date_format = val;
            }
        }

        if let Ok(val) = std::env::var("EDITSTAMP_MIN_MINUTES") {
            if let Ok(minutes) = val.parse::<u32>() {
                self.min_minutes_between_saves = minutes;
            }
        }

        if let Ok(val) = std::env::var("EDITSTAMP_TIMEZONE") {
            match val.parse::<TimeZoneMode>() {
                Ok(mode) => self.timezone = mode,
                Err(err) => tracing::warn!("Ignoring EDITSTAMP_TIMEZONE: {}", err),
            }
        }

        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.header_updated.trim().is_empty() {
            return Err("headerUpdated must not be empty".to_string());
        }

        if self.enable_create_time && self.header_created.trim().is_empty() {
            return Err("headerCreated must not be empty".to_string());
        }

        if self.enable_create_time && self.header_created == self.header_updated {
            return Err("headerCreated and headerUpdated must differ".to_string());
        }

        validate_date_format(&self.date_format)
    }

    pub fn is_ignored_folder(&self, path: &str) -> bool {
        self.ignore_global_folder.iter().any(|folder| path.starts_with(folder.as_str()))
    }

    pub fn is_ignored_created_folder(&self, path: &str) -> bool {
        self.ignore_created_folder.iter().any(|folder| path.starts_with(folder.as_str()))
    }
}

/// Reject empty patterns and unknown strftime specifiers
pub fn validate_date_format(pattern: &str) -> Result<(), String> {
    if pattern.is_empty() {
        return Err("dateFormat must not be empty".to_string());
    }
    if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
        return Err(format!("dateFormat is not a valid strftime pattern: {}", pattern));
    }
    Ok(())
}

/// Loads and saves [`Settings`]. A store without a path keeps settings in memory only.
#[derive(Debug, Clone, Default)]
pub struct SettingsStore {
    path: Option<PathBuf>,
}

impl SettingsStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: Some(path.into()) }
    }

    pub fn in_memory() -> Self {
        Self { path: None }
    }

    /// Default settings location inside a vault
    pub fn for_vault<P: AsRef<Path>>(root: P) -> Self {
        Self::new(root.as_ref().join(SETTINGS_DIR).join(SETTINGS_FILE))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Load settings, falling back to defaults when the file does not exist yet
    pub fn load(&self) -> Result<Settings> {
        let Some(path) = &self.path else {
            return Ok(Settings::default());
        };
        if !path.exists() {
            tracing::debug!("No settings file at {}, using defaults", path.display());
            return Ok(Settings::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let settings: Settings = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))?;
        Ok(settings)
    }

    /// Write settings via a temp file and rename so a crash never leaves half a file
    pub fn save(&self, settings: &Settings) -> Result<(), VaultError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let settings_err = |message: String| VaultError::Settings {
            path: path.clone(),
            message,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| settings_err(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(settings).map_err(|e| settings_err(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| settings_err(e.to_string()))?;
        fs::rename(&tmp, path).map_err(|e| settings_err(e.to_string()))?;
        Ok(())
    }
}
