//! Appliance configuration.
//!
//! One explicit structure covers every tunable: volume discovery, copy
//! policy, timing, and hardware pin assignments. Shipped defaults match the
//! field-deployed appliance; a TOML file overrides any subset of them.

use globset::Glob;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{CopyError, CopyResult};

/// GPIO pin assignments for the lamps and buttons (BCM numbering).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PinConfig {
    pub status_lamp: u32,
    pub progress_lamp: u32,
    pub error_lamp: u32,
    pub source_mounted_lamp: u32,
    pub dest_mounted_lamp: u32,
    pub go_button: u32,
    pub cancel_button: u32,
    pub eject_button: u32,
    pub power_button: u32,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            status_lamp: 18,
            progress_lamp: 27,
            error_lamp: 22,
            source_mounted_lamp: 23,
            dest_mounted_lamp: 24,
            go_button: 4,
            cancel_button: 17,
            eject_button: 5,
            power_button: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory under which removable volumes are mounted.
    pub mount_root: PathBuf,
    /// Filename whose presence at a volume root marks it as a destination.
    pub marker_name: String,
    /// External sync tool binary.
    pub tool_path: String,
    /// System-artifact globs excluded from every copy and reconciliation pass.
    pub exclude_patterns: Vec<String>,
    /// Extensions deferred to the size-filtered second copy phase.
    pub filtered_extensions: Vec<String>,
    /// Minimum size for a filtered-extension file to be copied at all.
    pub min_filtered_bytes: u64,
    /// Control-loop polling interval.
    pub poll_interval_ms: u64,
    /// Mount-presence lamp refresh interval.
    pub mount_check_interval_secs: u64,
    /// Progress estimator sampling period.
    pub progress_interval_secs: u64,
    /// Grace period for a cancelled copy process to exit.
    pub cancel_grace_secs: u64,
    /// How long a button must stay pressed to count as held.
    pub hold_threshold_ms: u64,
    pub pins: PinConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mount_root: PathBuf::from("/media/pi"),
            marker_name: "CARDCOPY_DESTINATION".to_string(),
            tool_path: "rsync".to_string(),
            exclude_patterns: vec![
                ".Trashes".to_string(),
                ".fsevents*".to_string(),
                "System*".to_string(),
                ".Spotlight*".to_string(),
            ],
            filtered_extensions: vec!["wav".to_string(), "WAV".to_string()],
            // ~1 second of uncompressed audio; anything smaller is a spurious capture
            min_filtered_bytes: 100_000,
            poll_interval_ms: 50,
            mount_check_interval_secs: 1,
            progress_interval_secs: 6,
            cancel_grace_secs: 5,
            hold_threshold_ms: 1000,
            pins: PinConfig::default(),
        }
    }
}

impl Config {
    /// Loads and validates a TOML config file. Missing fields fall back to
    /// the shipped defaults.
    pub fn load(path: &Path) -> CopyResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CopyResult<()> {
        for pattern in &self.exclude_patterns {
            Glob::new(pattern).map_err(|e| CopyError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
        }
        for ext in &self.filtered_extensions {
            if ext.is_empty() || ext.contains('.') || ext.contains('/') {
                return Err(CopyError::Config(format!(
                    "filtered extension '{}' must be a bare extension",
                    ext
                )));
            }
        }
        if self.marker_name.is_empty() || self.marker_name.contains('/') {
            return Err(CopyError::Config(
                "marker_name must be a plain filename".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(CopyError::Config("poll_interval_ms must be nonzero".to_string()));
        }
        if self.progress_interval_secs == 0 {
            return Err(CopyError::Config(
                "progress_interval_secs must be nonzero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn mount_check_interval(&self) -> Duration {
        Duration::from_secs(self.mount_check_interval_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }

    pub fn hold_threshold(&self) -> Duration {
        Duration::from_millis(self.hold_threshold_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cardcopy.toml");
        std::fs::write(&path, "mount_root = \"/mnt/cards\"\nmin_filtered_bytes = 2048\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.mount_root, PathBuf::from("/mnt/cards"));
        assert_eq!(config.min_filtered_bytes, 2048);
        assert_eq!(config.marker_name, "CARDCOPY_DESTINATION");
        assert_eq!(config.pins.go_button, 4);
    }

    #[test]
    fn rejects_invalid_glob() {
        let config = Config {
            exclude_patterns: vec!["[".to_string()],
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CopyError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn rejects_dotted_extension() {
        let config = Config {
            filtered_extensions: vec![".wav".to_string()],
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(CopyError::Config(_))));
    }

    #[test]
    fn rejects_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cardcopy.toml");
        std::fs::write(&path, "mount_roott = \"/mnt\"\n").unwrap();
        assert!(matches!(Config::load(&path), Err(CopyError::ConfigParse(_))));
    }

    #[test]
    fn durations_scale_from_fields() {
        let config = Config::default();
        assert_eq!(config.poll_interval(), Duration::from_millis(50));
        assert_eq!(config.cancel_grace(), Duration::from_secs(5));
        assert_eq!(config.hold_threshold(), Duration::from_millis(1000));
    }
}
