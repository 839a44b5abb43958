// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

use crate::RenderSize;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_frames_in_flight must be at least 1")]
    NoFramesInFlight,
    #[error("window size {width}x{height} must be non-zero")]
    ZeroWindowSize { width: u32, height: u32 },
}

/// Construction-time settings for the engine. Every field has a default so a
/// partial TOML table is accepted.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub window_width: u32,
    pub window_height: u32,
    pub max_frames_in_flight: u32,
    pub enable_validation: bool,
    pub title: String,
    pub clear_color: [f32; 4],
    /// Directory holding `vert.spv` / `frag.spv`. `None` uses the shaders
    /// built into the backend.
    pub shader_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_width: 800,
            window_height: 600,
            max_frames_in_flight: 2,
            enable_validation: cfg!(debug_assertions),
            title: "cubelet".to_owned(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            shader_dir: None,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_frames_in_flight == 0 {
            return Err(ConfigError::NoFramesInFlight);
        }
        if self.window_width == 0 || self.window_height == 0 {
            return Err(ConfigError::ZeroWindowSize {
                width: self.window_width,
                height: self.window_height,
            });
        }
        Ok(())
    }

    pub fn window_size(&self) -> RenderSize {
        RenderSize {
            width: self.window_width,
            height: self.window_height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.window_size(), RenderSize { width: 800, height: 600 });
        assert_eq!(cfg.max_frames_in_flight, 2);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg: EngineConfig = toml::from_str("max_frames_in_flight = 3\n").unwrap();
        assert_eq!(cfg.max_frames_in_flight, 3);
        assert_eq!(cfg.window_width, 800);
        assert!(cfg.shader_dir.is_none());
    }

    #[test]
    fn test_zero_frames_rejected() {
        let cfg: EngineConfig = toml::from_str("max_frames_in_flight = 0\n").unwrap();
        assert_eq!(cfg.validate(), Err(ConfigError::NoFramesInFlight));
    }

    #[test]
    fn test_zero_window_rejected() {
        let cfg = EngineConfig {
            window_height: 0,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::ZeroWindowSize { width: 800, height: 0 })
        ));
    }

    #[test]
    fn test_malformed_toml_is_an_error() {
        assert!(toml::from_str::<EngineConfig>("window_width = \"wide\"\n").is_err());
    }
}
