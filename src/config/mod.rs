use crate::error::{MemmonError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

const BYTE_SUFFIXES: &[(&str, u64)] = &[
    ("kb", 1024),
    ("mb", 1024 * 1024),
    ("gb", 1024 * 1024 * 1024),
];

const SECOND_SUFFIXES: &[(&str, u64)] = &[("s", 1), ("m", 60), ("h", 60 * 60), ("d", 60 * 60 * 24)];

/// Parse an integer with an optional case-insensitive multiplier suffix
fn parse_suffixed(value: &str, suffixes: &[(&str, u64)]) -> Option<u64> {
    let value = value.trim().to_ascii_lowercase();

    for (suffix, multiplier) in suffixes {
        if let Some(number) = value.strip_suffix(suffix) {
            return number.trim().parse::<u64>().ok()?.checked_mul(*multiplier);
        }
    }

    value.parse::<u64>().ok()
}

/// Parse a byte size such as `10000`, `512KB`, `200MB` or `1GB`
pub fn parse_byte_size(value: &str) -> Result<u64> {
    parse_suffixed(value, BYTE_SUFFIXES).ok_or_else(|| MemmonError::InvalidSize(value.to_string()))
}

/// Parse a duration such as `30`, `30s`, `5m`, `2h` or `1d`
pub fn parse_seconds(value: &str) -> Result<Duration> {
    parse_suffixed(value, SECOND_SUFFIXES)
        .map(Duration::from_secs)
        .ok_or_else(|| MemmonError::InvalidDuration(value.to_string()))
}

/// Parse a `name=size` pair
pub fn parse_name_size(value: &str) -> Result<(String, u64)> {
    let mut parts = value.split('=');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), Some(size), None) if !name.is_empty() => {
            Ok((name.to_string(), parse_byte_size(size)?))
        }
        _ => Err(MemmonError::InvalidThreshold(value.to_string())),
    }
}

/// Memory thresholds for the process, group and global scopes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Thresholds {
    /// Limits keyed by process name or `group:name`
    programs: BTreeMap<String, u64>,
    /// Limits keyed by group name
    groups: BTreeMap<String, u64>,
    /// Limit applied to every managed process
    any: Option<u64>,
}

impl Thresholds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the limit for a process name or `group:name` key, replacing any previous value
    pub fn set_program(&mut self, key: impl Into<String>, limit: u64) {
        self.programs.insert(key.into(), limit);
    }

    /// Set the limit for a group, replacing any previous value
    pub fn set_group(&mut self, group: impl Into<String>, limit: u64) {
        self.groups.insert(group.into(), limit);
    }

    pub fn set_any(&mut self, limit: u64) {
        self.any = Some(limit);
    }

    pub fn program_limit(&self, key: &str) -> Option<u64> {
        self.programs.get(key).copied()
    }

    pub fn group_limit(&self, group: &str) -> Option<u64> {
        self.groups.get(group).copied()
    }

    pub fn any_limit(&self) -> Option<u64> {
        self.any
    }

    /// Whether no scope has a threshold configured
    pub fn is_empty(&self) -> bool {
        self.programs.is_empty() && self.groups.is_empty() && self.any.is_none()
    }

    /// Status lines describing the active thresholds, keys sorted
    pub fn describe(&self) -> Vec<String> {
        let mut status = Vec::new();

        if !self.programs.is_empty() {
            status.push(format!("Checking programs {}", join_limits(&self.programs)));
        }
        if !self.groups.is_empty() {
            status.push(format!("Checking groups {}", join_limits(&self.groups)));
        }
        if let Some(any) = self.any {
            status.push(format!("Checking any={}", any));
        }

        status
    }
}

fn join_limits(limits: &BTreeMap<String, u64>) -> String {
    limits
        .iter()
        .map(|(key, limit)| format!("{}={}", key, limit))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Measurement backend used to read process RSS
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SamplerKind {
    /// Query `ps`, which reports kilobytes
    #[default]
    Ps,
    /// Read the process table through sysinfo
    Sysinfo,
}

/// Immutable watchdog configuration handed to the event loop
#[derive(Debug, Clone, Default)]
pub struct WatchdogConfig {
    /// Sum the RSS of each process with all of its descendants
    pub cumulative: bool,
    pub thresholds: Thresholds,
    /// Minimum interval between two restarts of the same process (zero disables)
    pub cooldown: Duration,
    /// Listener name attached to log output
    pub name: Option<String>,
    pub sampler: SamplerKind,
}

impl WatchdogConfig {
    /// Apply values from a configuration file on top of this configuration
    pub fn apply_file(&mut self, file: ConfigFile) -> Result<()> {
        if let Some(cumulative) = file.cumulative {
            self.cumulative = cumulative;
        }
        for (key, size) in file.programs {
            self.thresholds.set_program(key, size.bytes()?);
        }
        for (group, size) in file.groups {
            self.thresholds.set_group(group, size.bytes()?);
        }
        if let Some(any) = file.any {
            self.thresholds.set_any(any.bytes()?);
        }
        if let Some(cooldown) = file.cooldown {
            self.cooldown = cooldown.seconds()?;
        }
        if file.name.is_some() {
            self.name = file.name;
        }
        if let Some(sampler) = file.sampler {
            self.sampler = sampler;
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.thresholds.is_empty() {
            return Err(MemmonError::ConfigError(
                "no program, group or any threshold configured".to_string(),
            ));
        }
        Ok(())
    }
}

/// A size or duration written either as a bare integer or in suffix notation
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SuffixedValue {
    Plain(u64),
    Text(String),
}

impl SuffixedValue {
    pub fn bytes(&self) -> Result<u64> {
        match self {
            SuffixedValue::Plain(bytes) => Ok(*bytes),
            SuffixedValue::Text(text) => parse_byte_size(text),
        }
    }

    pub fn seconds(&self) -> Result<Duration> {
        match self {
            SuffixedValue::Plain(secs) => Ok(Duration::from_secs(*secs)),
            SuffixedValue::Text(text) => parse_seconds(text),
        }
    }
}

/// On-disk configuration (TOML or JSON)
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub cumulative: Option<bool>,
    #[serde(default)]
    pub programs: BTreeMap<String, SuffixedValue>,
    #[serde(default)]
    pub groups: BTreeMap<String, SuffixedValue>,
    #[serde(default)]
    pub any: Option<SuffixedValue>,
    #[serde(default)]
    pub cooldown: Option<SuffixedValue>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sampler: Option<SamplerKind>,
}

impl ConfigFile {
    /// Load a configuration file (supports TOML and JSON)
    pub fn from_file(path: &Path) -> Result<ConfigFile> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| MemmonError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        match extension {
            "toml" => Self::parse_toml(&contents),
            "json" => Self::parse_json(&contents),
            _ => Err(MemmonError::InvalidConfig(format!(
                "Unsupported file format: {}. Use .toml or .json",
                extension
            ))),
        }
    }

    fn parse_toml(contents: &str) -> Result<ConfigFile> {
        toml::from_str(contents)
            .map_err(|e| MemmonError::InvalidConfig(format!("Failed to parse TOML: {}", e)))
    }

    fn parse_json(contents: &str) -> Result<ConfigFile> {
        serde_json::from_str(contents)
            .map_err(|e| MemmonError::InvalidConfig(format!("Failed to parse JSON: {}", e)))
    }
}
