//! Engine configuration
//!
//! Provides the engine's tunable parameters plus generic YAML config
//! loading/saving and a standard config file location. The loaders are
//! generic so frontends can persist their own config types alongside the
//! engine's.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::types::{DEFAULT_BUFFER_SIZE, DEFAULT_SAMPLE_RATE};

/// Tunable parameters of the engine core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Frames produced per processing cycle
    pub buffer_size: usize,
    /// Cadence of the supervising main loop, in ticks per second
    pub main_loop_hz: f64,
    /// Capacity of the structural task queue
    pub task_queue_capacity: usize,
    /// Capacity of the engine event bus
    pub event_bus_capacity: usize,
}

impl EngineConfig {
    /// Processing cycles per second implied by sample rate and buffer size
    pub fn cycles_per_second(&self) -> f64 {
        f64::from(self.sample_rate) / self.buffer_size.max(1) as f64
    }

    /// Duration of one cycle's worth of frames, in seconds
    pub fn cycle_seconds(&self) -> f64 {
        self.buffer_size as f64 / f64::from(self.sample_rate.max(1))
    }

    /// Convert a duration in seconds to a frame count at this sample rate
    pub fn seconds_to_frames(&self, seconds: f64) -> usize {
        (seconds * f64::from(self.sample_rate)).round().max(0.0) as usize
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            main_loop_hz: 60.0,
            task_queue_capacity: 1024,
            event_bus_capacity: 1024,
        }
    }
}

/// Default directory for sluice configuration files
///
/// Returns `{config_dir}/sluice` (e.g. `~/.config/sluice` on Linux).
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sluice")
}

/// Default path of a named config file
pub fn default_config_path(filename: &str) -> PathBuf {
    default_config_dir().join(filename)
}

/// Load configuration from a YAML file
///
/// A missing or unparseable file falls back to the default config with a
/// warning, so a broken config never prevents engine startup.
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        log::info!("load_config: {:?} does not exist, using defaults", path);
        return T::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<T>(&contents) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("load_config: failed to parse {:?}: {}, using defaults", path, e);
                T::default()
            }
        },
        Err(e) => {
            log::warn!("load_config: failed to read {:?}: {}, using defaults", path, e);
            T::default()
        }
    }
}

/// Save configuration to a YAML file, creating parent directories
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;
    std::fs::write(path, yaml).with_context(|| format!("Failed to write config file: {:?}", path))?;

    log::info!("save_config: wrote {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycles_per_second() {
        let config = EngineConfig {
            sample_rate: 48_000,
            buffer_size: 480,
            ..Default::default()
        };
        assert_eq!(config.cycles_per_second(), 100.0);
        assert_eq!(config.seconds_to_frames(0.5), 24_000);
    }

    #[test]
    fn test_load_nonexistent_returns_default() {
        let config: EngineConfig = load_config(Path::new("/nonexistent/sluice/config.yaml"));
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");

        let config = EngineConfig {
            sample_rate: 44_100,
            buffer_size: 256,
            ..Default::default()
        };
        save_config(&config, &path).unwrap();

        let loaded: EngineConfig = load_config(&path);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");
        std::fs::write(&path, "sample_rate: 96000\n").unwrap();

        let loaded: EngineConfig = load_config(&path);
        assert_eq!(loaded.sample_rate, 96_000);
        assert_eq!(loaded.buffer_size, EngineConfig::default().buffer_size);
    }
}
