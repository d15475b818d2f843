//! Runtime configuration for the planning engine.
//!
//! `Settings` is loaded from an optional TOML file and then overlaid with
//! `MCP_`-prefixed environment variables, matching the convention used by
//! the Python reference CLI this crate's behavior is ported from.

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{ErrorCode, TrellisError, TrellisResult};

pub const SCHEMA_VERSION: &str = "1.1";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Settings {
    pub planning_root: PathBuf,
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub debug_mode: bool,
    #[serde(default = "default_true")]
    pub auto_create_dirs: bool,
}

fn default_schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8765
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            planning_root: PathBuf::from("./planning"),
            schema_version: default_schema_version(),
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            debug_mode: false,
            auto_create_dirs: true,
        }
    }
}

impl Settings {
    /// Loads settings from `path` (if it exists) and then applies
    /// `MCP_`-prefixed environment overrides on top.
    pub fn load(path: Option<&Path>) -> TrellisResult<Self> {
        let mut settings = match path {
            Some(p) if p.exists() => {
                let text = std::fs::read_to_string(p).map_err(TrellisError::from)?;
                toml::from_str(&text).map_err(|e| {
                    TrellisError::new(ErrorCode::InvalidField, format!("invalid config file: {e}"))
                })?
            }
            _ => Settings::default(),
        };
        settings.apply_env_overrides();
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("MCP_PLANNING_ROOT") {
            self.planning_root = PathBuf::from(v);
        }
        if let Ok(v) = env::var("MCP_HOST") {
            self.host = v;
        }
        if let Ok(v) = env::var("MCP_PORT") {
            if let Ok(port) = v.parse() {
                self.port = port;
            }
        }
        if let Ok(v) = env::var("MCP_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = env::var("MCP_DEBUG_MODE") {
            self.debug_mode = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = env::var("MCP_AUTO_CREATE_DIRS") {
            self.auto_create_dirs = v == "1" || v.eq_ignore_ascii_case("true");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.schema_version, "1.1");
        assert_eq!(settings.port, 8765);
        assert!(settings.auto_create_dirs);
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let settings = Settings::load(Some(Path::new("/nonexistent/trellis.toml"))).unwrap();
        assert_eq!(settings.host, "127.0.0.1");
    }

    #[test]
    fn env_override_wins_over_file_default() {
        // SAFETY: test runs single-threaded within this process's view of
        // this var; no other test reads MCP_PORT.
        unsafe {
            env::set_var("MCP_PORT", "9999");
        }
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.port, 9999);
        unsafe {
            env::remove_var("MCP_PORT");
        }
    }
}
