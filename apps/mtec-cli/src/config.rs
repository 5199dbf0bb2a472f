use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Name the bus is opened under.
    pub endpoint: String,
    pub registers: PathBuf,
    pub reconnect_cooldown_secs: u64,
    /// Decimals shown for scaled values in table output.
    pub float_decimals: usize,
    /// Default `watch` interval.
    pub refresh_secs: u64,
    /// Register bank to seed the mock bus with.
    pub snapshot: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            endpoint: "mock0".to_string(),
            registers: PathBuf::from("registers.yaml"),
            reconnect_cooldown_secs: 30,
            float_decimals: 3,
            refresh_secs: 10,
            snapshot: None,
        }
    }
}

impl AppConfig {
    /// Load from `path`, or fall back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_yaml_str(&contents).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn reconnect_cooldown(&self) -> Duration {
        Duration::from_secs(self.reconnect_cooldown_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let cfg = AppConfig::load(Path::new("/nonexistent/mtec.yaml")).unwrap();
        assert_eq!(cfg.registers, PathBuf::from("registers.yaml"));
        assert_eq!(cfg.reconnect_cooldown(), Duration::from_secs(30));
        assert_eq!(cfg.float_decimals, 3);
        assert!(cfg.snapshot.is_none());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let cfg = AppConfig::from_yaml_str("refresh_secs: 5\nsnapshot: bank.yaml\n").unwrap();
        assert_eq!(cfg.refresh_interval(), Duration::from_secs(5));
        assert_eq!(cfg.snapshot, Some(PathBuf::from("bank.yaml")));
        assert_eq!(cfg.endpoint, "mock0");
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        assert!(AppConfig::from_yaml_str("refresh_secs: soon\n").is_err());
    }
}
