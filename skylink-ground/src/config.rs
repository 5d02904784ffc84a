//! Configuration for the ground service.

use std::path::Path;

use serde::{Deserialize, Serialize};
use skylink_core::LinkConfig;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundConfig {
    /// Link supervisor settings.
    pub link: LinkConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Optional log file path. If empty, logs to stderr.
    pub file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: String::new(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl GroundConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use skylink_core::TransportMode;

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&GroundConfig::default()).unwrap();
        assert!(text.contains("[link]"));
        assert!(text.contains("heartbeat_loss_ms"));
        assert!(text.contains("[logging]"));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let text = r#"
            [link]
            mode = "tcp"
            ground_address = "192.168.4.1"
            settle_window_ms = 2500
        "#;
        let cfg: GroundConfig = toml::from_str(text).unwrap();
        assert_eq!(cfg.link.mode, TransportMode::Stream);
        assert_eq!(cfg.link.ground_addr().to_string(), "192.168.4.1:5760");
        assert_eq!(cfg.link.settle_window_ms, 2500);
        assert_eq!(cfg.link.heartbeat_loss_ms, 5000);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let cfg = GroundConfig::load(Path::new("/nonexistent/skylink-ground.toml"));
        assert_eq!(cfg.link, LinkConfig::default());
    }

    #[test]
    fn write_then_load() {
        let path = std::env::temp_dir().join(format!(
            "skylink-ground-test-{}.toml",
            std::process::id()
        ));
        GroundConfig::write_default(&path).unwrap();
        let cfg = GroundConfig::load(&path);
        std::fs::remove_file(&path).unwrap();
        assert_eq!(cfg.link, LinkConfig::default());
        assert!(cfg.logging.file.is_empty());
    }
}
