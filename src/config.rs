use crate::error::ConfigError;
use lazy_static::lazy_static;
use log::LevelFilter;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

lazy_static! {
    static ref DURATION_FULL: Regex =
        Regex::new(r"^(?:[0-9]+(?:\.[0-9]+)?(?:ns|us|µs|ms|s|m|h))+$").unwrap();
    static ref DURATION_PART: Regex =
        Regex::new(r"([0-9]+)(?:\.([0-9]+))?(ns|us|µs|ms|s|m|h)").unwrap();
    static ref COUNTRY_CODE: Regex = Regex::new(r"^[1-9][0-9]{0,2}$").unwrap();
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    /// Home country code used to normalize national numbers, without `+`.
    pub country_code: String,
    #[serde(with = "duration_format")]
    pub stats_interval: Duration,
    pub lists: ListsConfig,
    pub tarpit: TarpitConfig,
    pub audit_files: AuditFilesConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ListsConfig {
    pub block_paths: Vec<PathBuf>,
    pub allow_paths: Vec<PathBuf>,
    /// Reload automatically when a list file changes.
    pub watch: bool,
}

/// Delays of the blocked-call sequence. Zero skips the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TarpitConfig {
    #[serde(with = "duration_format")]
    pub pre_answer_delay: Duration,
    #[serde(with = "duration_format")]
    pub answer_delay: Duration,
    #[serde(with = "duration_format")]
    pub hangup_delay: Duration,
}

/// CSV audit targets. A missing path disables that stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditFilesConfig {
    pub blocked_numbers: Option<PathBuf>,
    pub allowed_numbers: Option<PathBuf>,
}

impl Default for TarpitConfig {
    fn default() -> Self {
        TarpitConfig {
            pre_answer_delay: Duration::from_millis(100),
            answer_delay: Duration::from_millis(100),
            hangup_delay: Duration::from_secs(1),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: "info".to_string(),
            country_code: "44".to_string(),
            stats_interval: Duration::from_secs(10),
            lists: ListsConfig {
                block_paths: vec![PathBuf::from("/etc/callscreen/blocklist")],
                allow_paths: Vec::new(),
                watch: false,
            },
            tarpit: TarpitConfig::default(),
            audit_files: AuditFilesConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !COUNTRY_CODE.is_match(&self.country_code) {
            return Err(ConfigError::Invalid(format!(
                "country_code must be 1-3 digits without a leading + or 0, got '{}'",
                self.country_code
            )));
        }
        if self.stats_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "stats_interval must be greater than zero".to_string(),
            ));
        }
        self.log_level_filter()?;
        Ok(())
    }

    pub fn log_level_filter(&self) -> Result<LevelFilter, ConfigError> {
        LevelFilter::from_str(&self.log_level).map_err(|_| {
            ConfigError::Invalid(format!(
                "log_level must be one of off, error, warn, info, debug, trace, got '{}'",
                self.log_level
            ))
        })
    }
}

/// Parse a duration such as `250ms`, `1s` or `1m30s`. Every number must carry
/// a unit.
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    if !DURATION_FULL.is_match(text) {
        return Err(format!(
            "invalid duration '{text}': expected a number followed by a unit (ns, us, ms, s, m, h)"
        ));
    }

    let out_of_range = || format!("invalid duration '{text}': out of range");
    let mut total: u128 = 0;
    for part in DURATION_PART.captures_iter(text) {
        let unit: u128 = match &part[3] {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60 * 1_000_000_000,
            _ => 3_600 * 1_000_000_000,
        };
        let whole: u128 = part[1].parse().map_err(|_| out_of_range())?;
        total = whole
            .checked_mul(unit)
            .and_then(|nanos| total.checked_add(nanos))
            .ok_or_else(out_of_range)?;

        if let Some(fraction) = part.get(2) {
            let digits = fraction.as_str();
            // Anything past nanosecond precision is dropped
            let digits = &digits[..digits.len().min(18)];
            let value: u128 = digits.parse().unwrap_or(0);
            total = total
                .checked_add(value * unit / 10u128.pow(digits.len() as u32))
                .ok_or_else(out_of_range)?;
        }
    }

    u64::try_from(total)
        .map(Duration::from_nanos)
        .map_err(|_| out_of_range())
}

pub fn format_duration(duration: Duration) -> String {
    if duration.is_zero() {
        return "0s".to_string();
    }
    let secs = duration.as_secs();
    let nanos = duration.subsec_nanos();
    if nanos == 0 {
        if secs % 3600 == 0 {
            format!("{}h", secs / 3600)
        } else if secs % 60 == 0 {
            format!("{}m", secs / 60)
        } else {
            format!("{secs}s")
        }
    } else if nanos % 1_000_000 == 0 {
        format!("{}ms", duration.as_millis())
    } else if nanos % 1_000 == 0 {
        format!("{}us", duration.as_micros())
    } else {
        format!("{}ns", duration.as_nanos())
    }
}

mod duration_format {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}
