use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::AppError;

pub const DEFAULT_PIPE_NAME: &str = "AACSpeakHelper";
const APP_DIR: &str = "AACSpeakHelper";
pub const DEFAULT_LOG_MAX_BYTES: u64 = 1024 * 1024;

/// Process-level settings, read once at startup.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub pipe_name: String,
    pub audio_dir: PathBuf,
    pub voices_dir: PathBuf,
    pub settings_file: Option<PathBuf>,
    pub cache_threshold_days: u64,
    pub sweep_interval: Duration,
    pub job_timeout: Duration,
    pub log_file: Option<PathBuf>,
    pub log_max_bytes: u64,
}

impl ServerSettings {
    pub fn from_env() -> Result<Self, AppError> {
        let app_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);

        Ok(Self {
            pipe_name: env_or("PIPE_NAME", DEFAULT_PIPE_NAME.to_string()),
            audio_dir: std::env::var("AUDIO_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| app_dir.join("Audio Files")),
            voices_dir: std::env::var("VOICES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| app_dir.join("models")),
            settings_file: std::env::var("SETTINGS_FILE").ok().map(PathBuf::from),
            cache_threshold_days: env_number("CACHE_THRESHOLD_DAYS", 7)?,
            sweep_interval: Duration::from_secs(env_number(
                "CACHE_SWEEP_INTERVAL_SECS",
                24 * 60 * 60,
            )?),
            job_timeout: Duration::from_secs(env_number("JOB_TIMEOUT_SECS", 30)?),
            log_file: log_file_from_env(),
            log_max_bytes: env_number("LOG_MAX_BYTES", DEFAULT_LOG_MAX_BYTES)?,
        })
    }

    /// Defaults the engines fall back to when a request carries no section.
    pub fn load_defaults(&self) -> Result<ConfigMap, AppError> {
        match &self.settings_file {
            Some(path) => ConfigMap::from_toml_file(path),
            None => Ok(ConfigMap::default()),
        }
    }
}

/// `LOG_FILE`, read before the rest of the settings so logging starts first.
pub fn log_file_from_env() -> Option<PathBuf> {
    std::env::var("LOG_FILE").ok().map(PathBuf::from)
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_number(key: &str, default: u64) -> Result<u64, AppError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{} must be a number, got '{}'", key, raw))),
        Err(_) => Ok(default),
    }
}

/// Section -> key -> value, the shape of both the settings file and the
/// `config` object of a request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigMap {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl ConfigMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON object of objects. Non-string scalars are kept in
    /// their JSON text form so `true`, `1` and `"True"` all read back.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, AppError> {
        let object = value
            .as_object()
            .ok_or_else(|| AppError::Schema("config must be an object".into()))?;

        let mut map = Self::new();
        for (section, options) in object {
            let options = options.as_object().ok_or_else(|| {
                AppError::Schema(format!("config section '{}' must be an object", section))
            })?;
            for (key, value) in options {
                map.set(section, key, json_scalar_to_string(value));
            }
        }
        Ok(map)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, AppError> {
        let table: toml::Table = raw
            .parse()
            .map_err(|e: toml::de::Error| AppError::Config(e.to_string()))?;

        let mut map = Self::new();
        for (section, options) in table {
            let toml::Value::Table(options) = options else {
                return Err(AppError::Config(format!(
                    "settings entry '{}' must be a table",
                    section
                )));
            };
            for (key, value) in options {
                let value = match value {
                    toml::Value::String(s) => s,
                    other => other.to_string(),
                };
                map.set(&section, &key, value);
            }
        }
        Ok(map)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|options| options.get(key))
            .map(String::as_str)
    }

    /// Like `get`, but treats an empty value as missing.
    pub fn get_non_empty(&self, section: &str, key: &str) -> Option<&str> {
        self.get(section, key).map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn get_bool(&self, section: &str, key: &str, fallback: bool) -> bool {
        self.get(section, key).and_then(parse_bool).unwrap_or(fallback)
    }

    /// Overlay `other` on top of `self`; keys in `other` win.
    pub fn merged_with(&self, other: &ConfigMap) -> ConfigMap {
        let mut merged = self.clone();
        for (section, options) in &other.sections {
            for (key, value) in options {
                merged.set(section, key, value.clone());
            }
        }
        merged
    }
}

pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Some(true),
        "0" | "no" | "false" | "off" => Some(false),
        _ => None,
    }
}

fn json_scalar_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
