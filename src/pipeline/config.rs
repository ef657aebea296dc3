//! Runtime configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio::StreamFormat;
use crate::visual::RowMode;

/// Environment variable naming a JSON config file.
pub const CONFIG_ENV: &str = "PHOBZ_LIVE_CONFIG";

/// Errors loading or validating a [`VisualizerConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Settings for one visualizer session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualizerConfig {
    /// PCM format the decoder produces and the device plays.
    pub output_format: StreamFormat,
    /// Capacity of the playback queue in bytes.
    pub queue_bytes: usize,
    pub frames_per_buffer: u32,
    /// Sample-frames pulled from the decoder per read.
    pub read_chunk_samples: usize,
    /// Rows in the circular texture.
    pub rows: u32,
    /// Columns per row.
    pub chunk_size: u32,
    pub row_mode: RowMode,
    /// Played sample-frames between two rows.
    pub hop_samples: u64,
    /// Bound on the transfer fence wait; `u64::MAX` waits forever.
    pub fence_timeout_ns: u64,
    pub window_width: u32,
    pub window_height: u32,
}

impl Default for VisualizerConfig {
    fn default() -> Self {
        Self {
            output_format: StreamFormat::STEREO_F32_192K,
            queue_bytes: 1 << 20,
            frames_per_buffer: 256,
            read_chunk_samples: 1024,
            rows: 1024,
            chunk_size: 4096,
            row_mode: RowMode::Waveform,
            hop_samples: 3200,
            fence_timeout_ns: u64::MAX,
            window_width: 1280,
            window_height: 720,
        }
    }
}

impl VisualizerConfig {
    /// Load from the file named by `PHOBZ_LIVE_CONFIG`, or use defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    /// Load and validate a JSON config file. Missing fields take defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let format = &self.output_format;
        if format.channels == 0 || format.sample_rate == 0 {
            return Err(invalid("output format needs channels and a sample rate"));
        }
        if !format.sample_format.is_playable() {
            return Err(invalid(format!(
                "output sample format {:?} cannot be played",
                format.sample_format
            )));
        }
        if self.rows == 0 || self.chunk_size == 0 {
            return Err(invalid("rows and chunk_size must be non-zero"));
        }
        if self.row_mode == RowMode::Spectrum && !self.chunk_size.is_power_of_two() {
            return Err(invalid("spectrum rows need a power-of-two chunk_size"));
        }
        if self.queue_bytes < format.frame_bytes() * self.read_chunk_samples.max(1) {
            return Err(invalid("queue_bytes must hold at least one read chunk"));
        }
        if self.read_chunk_samples == 0 || self.hop_samples == 0 {
            return Err(invalid("read_chunk_samples and hop_samples must be non-zero"));
        }
        Ok(())
    }

    /// Fence wait bound, `None` meaning no limit.
    pub fn fence_timeout(&self) -> Option<Duration> {
        match self.fence_timeout_ns {
            u64::MAX => None,
            ns => Some(Duration::from_nanos(ns)),
        }
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SampleFormat;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = VisualizerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.output_format.frame_bytes(), 8);
        assert_eq!(config.fence_timeout(), None);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "rows": 256, "row_mode": "spectrum", "fence_timeout_ns": 1000 }}"#)
            .unwrap();

        let config = VisualizerConfig::load(file.path()).unwrap();
        assert_eq!(config.rows, 256);
        assert_eq!(config.row_mode, RowMode::Spectrum);
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.fence_timeout(), Some(Duration::from_micros(1)));
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = VisualizerConfig {
            rows: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.rows = 16;
        config.row_mode = RowMode::Spectrum;
        config.chunk_size = 1000;
        assert!(config.validate().is_err());

        config.row_mode = RowMode::Waveform;
        config.output_format.sample_format = SampleFormat::F64;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = VisualizerConfig::load(Path::new("/nonexistent/live.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
