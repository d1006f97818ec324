// presentation-coach/crates/presentation-coach/src/config.rs

use anyhow::{Context, Result};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::admission::AdmissionConfig;
use crate::model_runtime::prompt_format::{DEFAULT_TEMPERATURE, VISION_SEQ_LEN};
use crate::model_runtime::{ModelKind, ModelPaths};
use crate::worker_threads::SessionConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub vision_model_path: String,
    pub vision_tokenizer_path: String,
    pub audio_encoder_path: String,
    pub audio_decoder_path: String,
    pub audio_tokenizer_path: String,
    pub min_interval_ms: u64,
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub session_timeout_seconds: u64,
    pub stop_grace_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vision_model_path: String::new(),
            vision_tokenizer_path: String::new(),
            audio_encoder_path: String::new(),
            audio_decoder_path: String::new(),
            audio_tokenizer_path: String::new(),
            min_interval_ms: 3000,
            max_new_tokens: VISION_SEQ_LEN,
            temperature: DEFAULT_TEMPERATURE,
            session_timeout_seconds: 30,
            stop_grace_ms: 2000,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }

        let config = Self::from_lookup(|key| env::var(key).ok())?;
        config.warn_missing_files();
        Ok(config)
    }

    /// Builds a config from `COACH_*` keys resolved through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let config = Self {
            vision_model_path: text("COACH_VISION_MODEL_PATH", &defaults.vision_model_path),
            vision_tokenizer_path: text("COACH_VISION_TOKENIZER_PATH", &defaults.vision_tokenizer_path),
            audio_encoder_path: text("COACH_AUDIO_ENCODER_PATH", &defaults.audio_encoder_path),
            audio_decoder_path: text("COACH_AUDIO_DECODER_PATH", &defaults.audio_decoder_path),
            audio_tokenizer_path: text("COACH_AUDIO_TOKENIZER_PATH", &defaults.audio_tokenizer_path),
            min_interval_ms: parse_or(&lookup, "COACH_MIN_INTERVAL_MS", defaults.min_interval_ms)?,
            max_new_tokens: parse_or(&lookup, "COACH_MAX_NEW_TOKENS", defaults.max_new_tokens)?,
            temperature: parse_or(&lookup, "COACH_TEMPERATURE", defaults.temperature)?,
            session_timeout_seconds: parse_or(&lookup, "COACH_SESSION_TIMEOUT_SECONDS", defaults.session_timeout_seconds)?,
            stop_grace_ms: parse_or(&lookup, "COACH_STOP_GRACE_MS", defaults.stop_grace_ms)?,
        };

        if config.max_new_tokens == 0 {
            return Err(anyhow::anyhow!("COACH_MAX_NEW_TOKENS must be greater than zero"));
        }
        if config.session_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("COACH_SESSION_TIMEOUT_SECONDS must be greater than zero"));
        }

        Ok(config)
    }

    /// Model files are the deployment's business; the core never touches the
    /// filesystem, so a missing file only earns a warning here.
    fn warn_missing_files(&self) {
        let files = [
            ("COACH_VISION_MODEL_PATH", &self.vision_model_path),
            ("COACH_VISION_TOKENIZER_PATH", &self.vision_tokenizer_path),
            ("COACH_AUDIO_ENCODER_PATH", &self.audio_encoder_path),
            ("COACH_AUDIO_DECODER_PATH", &self.audio_decoder_path),
            ("COACH_AUDIO_TOKENIZER_PATH", &self.audio_tokenizer_path),
        ];
        for (key, path) in files {
            if !path.is_empty() && !Path::new(path).exists() {
                warn!("{} set but file doesn't exist: {}", key, path);
            }
        }
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- Vision Model: {}", display_path(&self.vision_model_path));
        info!("- Vision Tokenizer: {}", display_path(&self.vision_tokenizer_path));
        info!("- Audio Encoder: {}", display_path(&self.audio_encoder_path));
        info!("- Audio Decoder: {}", display_path(&self.audio_decoder_path));
        info!("- Audio Tokenizer: {}", display_path(&self.audio_tokenizer_path));
        info!("- Min Interval: {}ms", self.min_interval_ms);
        info!("- Max New Tokens: {}", self.max_new_tokens);
        info!("- Temperature: {}", self.temperature);
        info!("- Session Timeout: {}s", self.session_timeout_seconds);
        info!("- Stop Grace: {}ms", self.stop_grace_ms);
    }

    pub fn admission_config(&self) -> AdmissionConfig {
        AdmissionConfig {
            min_interval: Duration::from_millis(self.min_interval_ms),
            model: ModelKind::Vision,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_tokens: self.max_new_tokens,
            timeout: Duration::from_secs(self.session_timeout_seconds),
            stop_grace: Duration::from_millis(self.stop_grace_ms),
            ..SessionConfig::default()
        }
    }

    /// Paths for `kind`, or `None` when its model file is not configured.
    pub fn model_paths(&self, kind: ModelKind) -> Option<ModelPaths> {
        let (model, tokenizer) = match kind {
            ModelKind::Vision => (&self.vision_model_path, &self.vision_tokenizer_path),
            ModelKind::AudioEncoder => (&self.audio_encoder_path, &self.audio_tokenizer_path),
            ModelKind::AudioDecoder => (&self.audio_decoder_path, &self.audio_tokenizer_path),
        };
        if model.is_empty() {
            None
        } else {
            Some(ModelPaths::new(model, tokenizer))
        }
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "(not configured)"
    } else {
        path
    }
}
