//! Engine configuration.
//!
//! Values can be built in code with the `with_*` builders or loaded from JSON.
//! Every engine validates its configuration once at construction.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Samples rendered between two looks at the frame exchange. Smaller values
/// pick up new partials sooner but cost more CPU.
pub const DEFAULT_BLOCK_SIZE: usize = 32;

pub const DEFAULT_VOICES: usize = 8;
pub const DEFAULT_VOICES_PER_WORKER: usize = 1;

/// Sink buffer in bytes. Around 1024 or more is needed on most hosts at 44.1kHz.
pub const DEFAULT_SINK_BUFFER_SIZE: usize = 2048;

pub const DEFAULT_VOLUME_MULTIPLIER: f64 = 2000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub block_size: usize,
    pub voices: usize,
    pub voices_per_worker: usize,
    pub sink_buffer_size: usize,
    pub volume_multiplier: f64,
    pub seed: u64,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
            voices: DEFAULT_VOICES,
            voices_per_worker: DEFAULT_VOICES_PER_WORKER,
            sink_buffer_size: DEFAULT_SINK_BUFFER_SIZE,
            volume_multiplier: DEFAULT_VOLUME_MULTIPLIER,
            seed: 0,
        }
    }

    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn with_block_size(mut self, samples: usize) -> Self {
        self.block_size = samples;
        self
    }

    pub fn with_voices(mut self, voices: usize) -> Self {
        self.voices = voices;
        self
    }

    pub fn with_voices_per_worker(mut self, voices: usize) -> Self {
        self.voices_per_worker = voices;
        self
    }

    pub fn with_sink_buffer_size(mut self, bytes: usize) -> Self {
        self.sink_buffer_size = bytes;
        self
    }

    pub fn with_volume_multiplier(mut self, multiplier: f64) -> Self {
        self.volume_multiplier = multiplier;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> CoreResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| CoreError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> CoreResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| CoreError::ConfigIo(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> CoreResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| CoreError::InvalidConfig(e.to_string()))
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.sample_rate == 0 {
            return Err(CoreError::InvalidConfig("sample_rate must be positive".into()));
        }
        if self.voices == 0 {
            return Err(CoreError::InvalidConfig("voices must be at least 1".into()));
        }
        if self.voices_per_worker == 0 {
            return Err(CoreError::InvalidConfig(
                "voices_per_worker must be at least 1".into(),
            ));
        }
        if self.block_size == 0 {
            return Err(CoreError::InvalidConfig("block_size must be at least 1".into()));
        }
        // two bytes per sample
        if self.block_size * 2 > self.sink_buffer_size {
            return Err(CoreError::InvalidConfig(format!(
                "block_size {} does not fit in a {} byte sink buffer",
                self.block_size, self.sink_buffer_size
            )));
        }
        if !self.volume_multiplier.is_finite() || self.volume_multiplier < 0.0 {
            return Err(CoreError::InvalidConfig(
                "volume_multiplier must be finite and non-negative".into(),
            ));
        }
        Ok(())
    }

    /// Highest frequency a partial may have and still be rendered.
    pub fn nyquist(&self) -> f64 {
        self.sample_rate as f64 / 2.0
    }

    /// Latency added by one sink buffer, in milliseconds.
    pub fn sink_latency_ms(&self) -> f32 {
        (self.sink_buffer_size as f32 / 2.0 / self.sample_rate as f32) * 1000.0
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} voices ({} per worker) @ {}Hz, block: {}, sink buffer: {} bytes",
            self.voices,
            self.voices_per_worker,
            self.sample_rate,
            self.block_size,
            self.sink_buffer_size
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sample_rate, 44_100);
        assert_eq!(config.block_size, 32);
        assert_eq!(config.nyquist(), 22_050.0);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json_str(r#"{ "voices": 16, "voices_per_worker": 4 }"#)
            .unwrap();
        assert_eq!(config.voices, 16);
        assert_eq!(config.voices_per_worker, 4);
        assert_eq!(config.sample_rate, DEFAULT_SAMPLE_RATE);
    }

    #[test]
    fn test_json_round_trip() {
        let config = EngineConfig::new().with_seed(42).with_voices(3);
        let text = config.to_json_string().unwrap();
        assert_eq!(EngineConfig::from_json_str(&text).unwrap(), config);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(EngineConfig::new().with_voices(0).validate().is_err());
        assert!(EngineConfig::new().with_voices_per_worker(0).validate().is_err());
        assert!(EngineConfig::new().with_block_size(0).validate().is_err());
        assert!(EngineConfig::new()
            .with_block_size(2048)
            .with_sink_buffer_size(2048)
            .validate()
            .is_err());
        assert!(matches!(
            EngineConfig::from_json_str(r#"{ "sample_rate": 0 }"#),
            Err(CoreError::InvalidConfig(_))
        ));
        assert!(EngineConfig::from_json_str("not json").is_err());
    }
}
