use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::error::ConfigError;

/// Player configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlayerConfig {
    /// Whether call audio playback may be started at all
    pub enabled: bool,
    /// File played when no explicit file is requested
    pub audio_file: Option<PathBuf>,
    pub engine: EngineConfig,
    pub output: OutputConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            audio_file: None,
            engine: EngineConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

/// Transfer loop and decoder tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Bounded wait in microseconds for one decoder poll while input is still being submitted
    pub poll_timeout_us: u64,
    /// Sink buffer size as a multiple of the device minimum
    pub buffer_multiplier: usize,
    /// Encoded units the decoder accepts before reporting back-pressure
    pub decoder_input_queue: usize,
    /// Decoded frames buffered ahead of the sink
    pub decoder_output_queue: usize,
}

impl EngineConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_micros(self.poll_timeout_us)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_timeout_us: 500,
            buffer_multiplier: 3,
            decoder_input_queue: 4,
            decoder_output_queue: 8,
        }
    }
}

/// How the telephony output route is recognised among the host's output devices
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    /// Exact device name of the telephony route. Takes precedence over keywords.
    pub telephony_device: Option<String>,
    /// Case-insensitive name fragments identifying a telephony route
    pub telephony_keywords: Vec<String>,
    /// Floor applied to the device's reported minimum buffer
    pub min_buffer_ms: u64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            telephony_device: None,
            telephony_keywords: vec![
                "telephony".to_string(),
                "voice".to_string(),
                "call".to_string(),
            ],
            min_buffer_ms: 20,
        }
    }
}

/// Configuration manager for loading and saving settings
pub struct ConfigManager {
    config: PlayerConfig,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path()?;
        let config = Self::load_config(&config_path).unwrap_or_else(|e| {
            log::warn!("Ignoring unreadable configuration at {}: {}", config_path.display(), e);
            PlayerConfig::default()
        });

        Ok(Self {
            config,
            config_path,
        })
    }

    /// Open a configuration stored at an explicit path
    pub fn with_path(config_path: PathBuf) -> Result<Self, ConfigError> {
        let config = Self::load_config(&config_path)?;
        Ok(Self {
            config,
            config_path,
        })
    }

    pub fn get_config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn set_enabled(&mut self, enabled: bool) -> Result<(), ConfigError> {
        self.config.enabled = enabled;
        self.save_config()
    }

    pub fn set_audio_file(&mut self, audio_file: Option<PathBuf>) -> Result<(), ConfigError> {
        if self.config.audio_file == audio_file {
            return Ok(());
        }
        self.config.audio_file = audio_file;
        self.save_config()
    }

    fn get_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::home_dir()
            .ok_or(ConfigError::ConfigDirNotFound)?
            .join(".config")
            .join("echocast");

        std::fs::create_dir_all(&config_dir)
            .map_err(ConfigError::IoError)?;

        Ok(config_dir.join("config.toml"))
    }

    fn load_config(path: &Path) -> Result<PlayerConfig, ConfigError> {
        if !path.exists() {
            return Ok(PlayerConfig::default());
        }

        let config_content = std::fs::read_to_string(path)
            .map_err(ConfigError::IoError)?;

        let config: PlayerConfig = toml::from_str(&config_content)
            .map_err(ConfigError::DeserializationError)?;

        Ok(config)
    }

    fn save_config(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(ConfigError::IoError)?;
        }

        let config_content = toml::to_string_pretty(&self.config)
            .map_err(ConfigError::SerializationError)?;

        std::fs::write(&self.config_path, config_content)
            .map_err(ConfigError::IoError)?;

        Ok(())
    }
}
