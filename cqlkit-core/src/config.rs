//! Configuration values for the encoders and the execution engine
//!
//! Every value here is immutable once built and is handed to the component
//! that needs it at construction time.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, Local, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{self, Write as _};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default timestamp pattern: ISO-8601 with milliseconds and numeric offset
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

/// Time zone timestamps are rendered in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimeZoneSetting {
    /// The zone of the machine running the export
    #[default]
    Local,
    Utc,
    /// Fixed offset in seconds east of UTC
    Offset(i32),
}

/// Strftime-style pattern used for `timestamp` cells
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateFormat {
    pattern: String,
    time_zone: TimeZoneSetting,
}

impl Default for DateFormat {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_DATE_FORMAT.to_string(),
            time_zone: TimeZoneSetting::default(),
        }
    }
}

impl DateFormat {
    /// Validate and build a date format
    pub fn new(pattern: impl Into<String>, time_zone: TimeZoneSetting) -> Result<Self> {
        let pattern = pattern.into();
        if pattern.is_empty()
            || StrftimeItems::new(&pattern).any(|item| matches!(item, Item::Error))
        {
            return Err(Error::argument(format!("Invalid date format: {}", pattern)));
        }
        if let TimeZoneSetting::Offset(secs) = time_zone {
            if FixedOffset::east_opt(secs).is_none() {
                return Err(Error::argument(format!("Invalid time zone offset: {}s", secs)));
            }
        }
        Ok(Self { pattern, time_zone })
    }

    /// Same pattern rendered in UTC
    pub fn utc(pattern: impl Into<String>) -> Result<Self> {
        Self::new(pattern, TimeZoneSetting::Utc)
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn time_zone(&self) -> TimeZoneSetting {
        self.time_zone
    }

    /// Render milliseconds since the epoch
    pub fn format_millis(&self, millis: i64) -> Result<String> {
        let instant = DateTime::<Utc>::from_timestamp_millis(millis)
            .ok_or_else(|| Error::argument(format!("timestamp out of range: {}", millis)))?;

        let mut out = String::new();
        let written = match self.time_zone {
            TimeZoneSetting::Utc => write!(out, "{}", instant.format(&self.pattern)),
            TimeZoneSetting::Local => {
                write!(out, "{}", instant.with_timezone(&Local).format(&self.pattern))
            }
            TimeZoneSetting::Offset(secs) => {
                let offset = FixedOffset::east_opt(secs).ok_or_else(|| {
                    Error::configuration(format!("Invalid time zone offset: {}s", secs))
                })?;
                write!(out, "{}", instant.with_timezone(&offset).format(&self.pattern))
            }
        };
        written.map_err(|_| {
            Error::configuration(format!("Invalid date format: {}", self.pattern))
        })?;
        Ok(out)
    }
}

/// Options shared by every output format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Pattern for `timestamp` cells
    pub date_format: DateFormat,
    /// Text columns whose content is nested as JSON instead of quoted
    pub json_columns: BTreeSet<String>,
    /// Prefix every record with a run-wide line number
    pub line_numbers: bool,
    /// Emit the CSV header row
    pub header: bool,
    /// Wrap JSON records in a single top-level array
    pub json_array: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            date_format: DateFormat::default(),
            json_columns: BTreeSet::new(),
            line_numbers: false,
            header: true,
            json_array: false,
        }
    }
}

impl EncoderConfig {
    /// Register comma separated embedded-JSON column names
    pub fn with_json_columns(mut self, columns: &str) -> Self {
        self.json_columns.extend(
            columns
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
        );
        self
    }

    pub fn is_json_column(&self, name: &str) -> bool {
        self.json_columns.contains(name)
    }
}

/// Fixed retry budget applied to every query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Re-executions allowed after the first failure
    pub retries: u32,
    /// Pause between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            delay: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    pub fn immediate(retries: u32) -> Self {
        Self {
            retries,
            delay: Duration::ZERO,
        }
    }
}

/// Consistency level requested for every statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Consistency {
    Any,
    #[default]
    One,
    Two,
    Three,
    Quorum,
    All,
    LocalQuorum,
    EachQuorum,
    Serial,
    LocalSerial,
    LocalOne,
}

impl FromStr for Consistency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let level = match s.trim().to_lowercase().as_str() {
            "any" => Consistency::Any,
            "one" => Consistency::One,
            "two" => Consistency::Two,
            "three" => Consistency::Three,
            "quorum" => Consistency::Quorum,
            "all" => Consistency::All,
            "local_quorum" => Consistency::LocalQuorum,
            "each_quorum" => Consistency::EachQuorum,
            "serial" => Consistency::Serial,
            "local_serial" => Consistency::LocalSerial,
            "local_one" => Consistency::LocalOne,
            _ => return Err(Error::argument(format!("Invalid consistency level: {}", s))),
        };
        Ok(level)
    }
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Consistency::Any => "ANY",
            Consistency::One => "ONE",
            Consistency::Two => "TWO",
            Consistency::Three => "THREE",
            Consistency::Quorum => "QUORUM",
            Consistency::All => "ALL",
            Consistency::LocalQuorum => "LOCAL_QUORUM",
            Consistency::EachQuorum => "EACH_QUORUM",
            Consistency::Serial => "SERIAL",
            Consistency::LocalSerial => "LOCAL_SERIAL",
            Consistency::LocalOne => "LOCAL_ONE",
        };
        write!(f, "{}", name)
    }
}

/// Execution engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Number of queries in flight; `<= 1` runs sequentially
    pub parallelism: usize,
    pub consistency: Consistency,
    pub retry: RetryPolicy,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            parallelism: 1,
            consistency: Consistency::One,
            retry: RetryPolicy::default(),
        }
    }
}

impl ExecutionConfig {
    pub fn is_parallel(&self) -> bool {
        self.parallelism > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_date_format_in_utc() {
        let format = DateFormat::utc(DEFAULT_DATE_FORMAT).unwrap();
        assert_eq!(
            format.format_millis(1_436_918_400_123).unwrap(),
            "2015-07-15T00:00:00.123+0000"
        );
    }

    #[test]
    fn test_fixed_offset_date_format() {
        let format = DateFormat::new("%Y-%m-%d %H:%M", TimeZoneSetting::Offset(8 * 3600)).unwrap();
        assert_eq!(format.format_millis(0).unwrap(), "1970-01-01 08:00");
    }

    #[test]
    fn test_invalid_date_format_is_rejected() {
        assert!(matches!(
            DateFormat::utc("%Y-%Q"),
            Err(Error::Argument(_))
        ));
        assert!(DateFormat::utc("").is_err());
    }

    #[test]
    fn test_json_columns_parsing() {
        let config = EncoderConfig::default().with_json_columns("payload, meta,,");
        assert!(config.is_json_column("payload"));
        assert!(config.is_json_column("meta"));
        assert_eq!(config.json_columns.len(), 2);
    }

    #[test]
    fn test_consistency_parsing() {
        assert_eq!("local_quorum".parse::<Consistency>().unwrap(), Consistency::LocalQuorum);
        assert_eq!("ONE".parse::<Consistency>().unwrap(), Consistency::One);
        assert!("most".parse::<Consistency>().is_err());
    }

    #[test]
    fn test_default_retry_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.retries, 3);
        assert_eq!(policy.delay, Duration::from_secs(3));
    }
}
