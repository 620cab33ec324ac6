use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const MEGABYTE: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub encoder_path: PathBuf,
    pub max_file_size: usize,
    pub max_batch_size: usize,
    pub allowed_extensions: Vec<String>,
    pub min_confidence: f64,
    pub max_confidence: f64,
    pub request_timeout: Duration,
    pub cors_origins: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            model_path: PathBuf::from("models/best_model.pt"),
            tokenizer_path: PathBuf::from("models/tokenizer.json"),
            encoder_path: PathBuf::from("models/feature_extractor.pt"),
            max_file_size: 10 * MEGABYTE,
            max_batch_size: 3,
            allowed_extensions: split_list("jpg,jpeg,png,bmp,gif"),
            min_confidence: 0.60,
            max_confidence: 0.94,
            request_timeout: Duration::from_secs(30),
            cors_origins: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup, starting from the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup("HOST") {
            config.host = host;
        }
        if let Some(port) = parse_var(&lookup, "PORT")? {
            config.port = port;
        }
        if let Some(path) = lookup("MODEL_PATH") {
            config.model_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("TOKENIZER_PATH") {
            config.tokenizer_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("ENCODER_PATH") {
            config.encoder_path = PathBuf::from(path);
        }
        if let Some(mb) = parse_var::<usize, _>(&lookup, "MAX_FILE_SIZE_MB")? {
            config.max_file_size = mb.checked_mul(MEGABYTE).ok_or_else(|| ConfigError::Invalid {
                key: "MAX_FILE_SIZE_MB",
                value: mb.to_string(),
                reason: "value overflows the byte limit".to_string(),
            })?;
        }
        if let Some(size) = parse_var(&lookup, "MAX_BATCH_SIZE")? {
            if size == 0 {
                return Err(ConfigError::Invalid {
                    key: "MAX_BATCH_SIZE",
                    value: "0".to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
            config.max_batch_size = size;
        }
        if let Some(list) = lookup("ALLOWED_EXTENSIONS") {
            config.allowed_extensions = split_list(&list);
        }
        if let Some(min) = parse_var(&lookup, "MIN_CONFIDENCE")? {
            config.min_confidence = min;
        }
        if let Some(max) = parse_var(&lookup, "MAX_CONFIDENCE")? {
            config.max_confidence = max;
        }
        if let Some(secs) = parse_var(&lookup, "REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(origins) = lookup("CORS_ALLOWED_ORIGINS") {
            config.cors_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(String::from)
                .collect();
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let band_ok = (0.0..=1.0).contains(&self.min_confidence)
            && (0.0..=1.0).contains(&self.max_confidence)
            && self.min_confidence <= self.max_confidence;
        if !band_ok {
            return Err(ConfigError::Invalid {
                key: "MIN_CONFIDENCE/MAX_CONFIDENCE",
                value: format!("{}..{}", self.min_confidence, self.max_confidence),
                reason: "confidence band must satisfy 0 <= min <= max <= 1".to_string(),
            });
        }
        if self.allowed_extensions.is_empty() {
            return Err(ConfigError::Invalid {
                key: "ALLOWED_EXTENSIONS",
                value: String::new(),
                reason: "at least one extension is required".to_string(),
            });
        }
        Ok(())
    }

    pub fn clamp_confidence(&self, confidence: f64) -> f64 {
        if confidence.is_nan() {
            return self.min_confidence;
        }
        confidence.clamp(self.min_confidence, self.max_confidence)
    }
}

fn parse_var<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                key,
                value: raw,
                reason: e.to_string(),
            }),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}
