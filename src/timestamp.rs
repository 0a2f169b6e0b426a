//! Timestamp decisions for the created/updated front-matter fields
//!
//! [`apply_timestamps`] is the heart of editstamp: given a document's metadata
//! view and its file times it decides which of the two fields to write. The
//! updated field is debounced, so a burst of saves inside the configured
//! interval produces a single write.

use std::fmt::Write as _;
use std::sync::OnceLock;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use crate::config::{Settings, TimeZoneMode};
use crate::store::{FileStat, Metadata};

#[derive(Debug, Error)]
pub enum TimestampError {
    #[error("Cannot render a date with pattern {pattern:?}")]
    InvalidPattern { pattern: String },
}

/// A rendered date, either as text or, for all-digit renderings in numeric mode, a number
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampValue {
    Text(String),
    Number(i64),
}

impl From<TimestampValue> for Value {
    fn from(value: TimestampValue) -> Self {
        match value {
            TimestampValue::Text(text) => Value::String(text),
            TimestampValue::Number(number) => Value::from(number),
        }
    }
}

fn all_digits() -> &'static Regex {
    static ALL_DIGITS: OnceLock<Regex> = OnceLock::new();
    ALL_DIGITS.get_or_init(|| Regex::new(r"^[0-9]+$").expect("static regex is valid"))
}

/// Renders and reads back dates with one pattern in one time zone
#[derive(Debug, Clone, Copy)]
pub struct DateCodec<'a> {
    pattern: &'a str,
    numeric: bool,
    timezone: TimeZoneMode,
}

impl<'a> DateCodec<'a> {
    pub fn new(pattern: &'a str, numeric: bool, timezone: TimeZoneMode) -> Self {
        Self { pattern, numeric, timezone }
    }

    pub fn from_settings(settings: &'a Settings) -> Self {
        Self::new(
            &settings.date_format,
            settings.enable_number_properties,
            settings.timezone,
        )
    }

    /// Epoch milliseconds to an instant; `None` only when out of chrono's range
    pub fn from_epoch_millis(millis: i64) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(millis)
    }

    /// Render `instant` as text with the configured pattern
    pub fn render(&self, instant: DateTime<Utc>) -> Result<String, TimestampError> {
        let mut out = String::new();
        let written = match self.timezone {
            TimeZoneMode::Local => write!(out, "{}", instant.with_timezone(&Local).format(self.pattern)),
            TimeZoneMode::Utc => write!(out, "{}", instant.format(self.pattern)),
        };
        written.map_err(|_| TimestampError::InvalidPattern {
            pattern: self.pattern.to_string(),
        })?;
        Ok(out)
    }

    pub fn format(&self, instant: DateTime<Utc>) -> Result<TimestampValue, TimestampError> {
        let text = self.render(instant)?;
        if self.numeric && all_digits().is_match(&text) {
            if let Ok(number) = text.parse::<i64>() {
                return Ok(TimestampValue::Number(number));
            }
        }
        Ok(TimestampValue::Text(text))
    }

    /// Parse text under the configured pattern. Failures are `None`, never errors.
    pub fn parse_text(&self, text: &str) -> Option<DateTime<Utc>> {
        let text = text.trim();
        if let Ok(with_offset) = DateTime::parse_from_str(text, self.pattern) {
            return Some(with_offset.with_timezone(&Utc));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, self.pattern) {
            // %s describes an absolute instant, not a wall-clock time
            if self.pattern.contains("%s") {
                return Some(Utc.from_utc_datetime(&naive));
            }
            return self.localize(naive);
        }
        if let Ok(date) = NaiveDate::parse_from_str(text, self.pattern) {
            return self.localize(date.and_hms_opt(0, 0, 0)?);
        }
        None
    }

    /// Parse an existing metadata value.
    ///
    /// Numbers are read back through their decimal text first; integers the
    /// pattern cannot read are taken as epoch milliseconds.
    pub fn parse_value(&self, value: &Value) -> Option<DateTime<Utc>> {
        match value {
            Value::String(text) => self.parse_text(text),
            Value::Number(number) => self
                .parse_text(&number.to_string())
                .or_else(|| number.as_i64().and_then(Self::from_epoch_millis)),
            _ => None,
        }
    }

    fn localize(&self, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
        match self.timezone {
            TimeZoneMode::Utc => Some(Utc.from_utc_datetime(&naive)),
            TimeZoneMode::Local => Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|local| local.with_timezone(&Utc)),
        }
    }
}

/// Which fields one invocation wrote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StampChanges {
    pub created: bool,
    pub updated: bool,
}

impl StampChanges {
    pub fn any(&self) -> bool {
        self.created || self.updated
    }
}

/// Missing, null, empty text, `false` and zero all count as "no value"
fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(text)) => text.is_empty(),
        Some(Value::Bool(flag)) => !flag,
        Some(Value::Number(number)) => number.as_f64() == Some(0.0),
        Some(Value::Array(_)) | Some(Value::Object(_)) => false,
    }
}

/// Decide and apply the created/updated writes for one document.
///
/// The created field is only ever filled in, never replaced. The updated
/// field is written when it is missing or unreadable, or when `mtime` is
/// strictly later than the stored value plus the debounce interval.
pub fn apply_timestamps(
    metadata: &mut Metadata,
    path: &str,
    stat: FileStat,
    settings: &Settings,
) -> Result<StampChanges, TimestampError> {
    let codec = DateCodec::from_settings(settings);
    let mut changes = StampChanges::default();

    let (Some(mtime), Some(ctime)) = (
        DateCodec::from_epoch_millis(stat.mtime),
        DateCodec::from_epoch_millis(stat.ctime),
    ) else {
        tracing::debug!("File times of {} are out of range, skipping", path);
        return Ok(changes);
    };

    // Render both up front so a bad pattern leaves the view untouched
    let created_value = codec.format(ctime)?;
    let updated_value = codec.format(mtime)?;

    let created_key = settings.header_created.as_str();
    if is_blank(metadata.get(created_key))
        && settings.enable_create_time
        && !settings.is_ignored_created_folder(path)
    {
        metadata.insert(created_key.to_string(), created_value.into());
        changes.created = true;
    }

    let updated_key = settings.header_updated.as_str();
    let current = metadata
        .get(updated_key)
        .filter(|value| !is_blank(Some(*value)))
        .and_then(|value| codec.parse_value(value));

    let write_updated = match current {
        None => true,
        Some(previous) => {
            let interval = chrono::Duration::minutes(i64::from(settings.min_minutes_between_saves));
            match previous.checked_add_signed(interval) {
                Some(next_allowed) => mtime > next_allowed,
                None => false,
            }
        }
    };

    if write_updated {
        metadata.insert(updated_key.to_string(), updated_value.into());
        changes.updated = true;
    } else {
        tracing::debug!("Skipping {} of {}: inside the debounce interval", updated_key, path);
    }

    Ok(changes)
}
