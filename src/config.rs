//! TOML-backed configuration for the CLI surface.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::llm::OllamaConfig;

/// Top-level configuration, loadable from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RippleConfig {
    /// Backend connection settings.
    pub backend: OllamaConfig,
    /// Whether a cascade run ends with a consolidation pass.
    pub consolidate: bool,
}

impl RippleConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<RippleConfig, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_partial_config_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "consolidate = true\n\n[backend]\nmodel = \"mistral\"").unwrap();
        let config = RippleConfig::load(file.path()).unwrap();
        assert!(config.consolidate);
        assert_eq!(config.backend.model, "mistral");
        assert_eq!(config.backend.base_url, "http://localhost:11434");
    }

    #[test]
    fn invalid_toml_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "backend = not toml").unwrap();
        let err = RippleConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = RippleConfig::load(Path::new("/nonexistent/ripple.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
