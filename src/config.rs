use crate::models::DEFAULT_MIRROR;
use crate::pipeline::Flows;
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid value {value:?} for {key}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
}

/// Service settings, read from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub registry_db: PathBuf,
    pub model_dir: PathBuf,
    pub model_download: bool,
    /// Base URL the model files are fetched from.
    pub model_mirror: String,
    pub ocr_threads: usize,
    pub flows: Flows,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 8402,
            registry_db: PathBuf::from("/data/registry.db"),
            model_dir: PathBuf::from("/data/models"),
            model_download: true,
            model_mirror: DEFAULT_MIRROR.to_string(),
            ocr_threads: 4,
            flows: Flows::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars().collect())
    }

    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        if let Some(port) = parse(&vars, "PORT")? {
            config.port = port;
        }
        if let Some(path) = vars.get("REGISTRY_DB") {
            config.registry_db = PathBuf::from(path);
        }
        if let Some(path) = vars.get("MODEL_DIR") {
            config.model_dir = PathBuf::from(path);
        }
        if let Some(value) = vars.get("MODEL_DOWNLOAD") {
            config.model_download = parse_bool("MODEL_DOWNLOAD", value)?;
        }
        if let Some(mirror) = vars.get("MODEL_MIRROR") {
            let mirror = mirror.trim();
            if !(mirror.starts_with("http://") || mirror.starts_with("https://")) {
                return Err(invalid("MODEL_MIRROR", mirror));
            }
            config.model_mirror = mirror.to_string();
        }
        if let Some(threads) = parse::<usize>(&vars, "OCR_THREADS")? {
            if threads == 0 {
                return Err(invalid("OCR_THREADS", "0"));
            }
            config.ocr_threads = threads;
        }
        if let Some(threshold) = parse::<f32>(&vars, "RECORD_SCAN_THRESHOLD")? {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(invalid("RECORD_SCAN_THRESHOLD", &threshold.to_string()));
            }
            config.flows.record.policy.threshold = Some(threshold);
        }
        Ok(config)
    }
}

fn invalid(key: &'static str, value: &str) -> ConfigError {
    ConfigError {
        key,
        value: value.to_string(),
    }
}

fn parse<T: FromStr>(vars: &HashMap<String, String>, key: &'static str) -> Result<Option<T>, ConfigError> {
    vars.get(key)
        .map(|v| v.trim().parse().map_err(|_| invalid(key, v)))
        .transpose()
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}
