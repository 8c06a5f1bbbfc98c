//! Server settings read from the same file as the profiles.
//!
//! Example config file:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8060"
//! log_format = "json"
//! timeout_ms = 5000
//! template = "templates/custom.hbs"
//!
//! [profiles]
//! ops = "https://oapi.dingtalk.com/robot/send?access_token=xxxx"
//! oncall = { url = "https://oapi.dingtalk.com/robot/send?access_token=yyyy", secret = "SEC000", mention = { all = true } }
//! ```
//!
//! The `profiles` table is owned by `ding_core::ProfileTable` and is re-read
//! on every reload; everything under `[server]` is read once at startup.
//! Files ending in `.yml`/`.yaml` are parsed as YAML with the same layout.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use ding_core::ConfigFormat;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Timeout for each call to DingTalk.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub template: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            log_format: default_log_format(),
            timeout_ms: default_timeout_ms(),
            template: None,
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8060))
}

fn default_log_format() -> String {
    "pretty".into()
}

fn default_timeout_ms() -> u64 {
    5000
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        let mut config = Self::parse(&content, ConfigFormat::from_path(path))
            .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))?;

        // A relative template path is taken relative to the config file.
        if let (Some(template), Some(dir)) = (config.server.template.as_mut(), path.parent()) {
            if template.is_relative() {
                *template = dir.join(&*template);
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn parse(content: &str, format: ConfigFormat) -> Result<Self, String> {
        match format {
            ConfigFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
            ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.timeout_ms == 0 {
            return Err("timeout_ms must be greater than zero".into());
        }
        validate_log_format(&self.server.log_format)
    }
}

pub fn validate_log_format(format: &str) -> Result<(), String> {
    match format {
        "pretty" | "json" => Ok(()),
        other => Err(format!(
            "Invalid log_format '{}': must be 'pretty' or 'json'",
            other
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_server_section_absent() {
        let config = AppConfig::parse(
            "[profiles]\nops = \"https://example.com/hook\"\n",
            ConfigFormat::Toml,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.server.listen.port(), 8060);
        assert_eq!(config.server.log_format, "pretty");
        assert_eq!(config.server.timeout_ms, 5000);
        assert!(config.server.template.is_none());
    }

    #[test]
    fn parse_full_toml() {
        let config = AppConfig::parse(
            r#"
[server]
listen = "127.0.0.1:9090"
log_format = "json"
timeout_ms = 1500
template = "/etc/dingtalk/custom.hbs"

[profiles]
ops = "https://example.com/hook"
"#,
            ConfigFormat::Toml,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.server.listen.port(), 9090);
        assert_eq!(config.server.log_format, "json");
        assert_eq!(config.server.timeout_ms, 1500);
        assert_eq!(
            config.server.template.as_deref(),
            Some(Path::new("/etc/dingtalk/custom.hbs"))
        );
    }

    #[test]
    fn parse_yaml() {
        let config = AppConfig::parse(
            "server:\n  listen: 127.0.0.1:8061\nprofiles:\n  ops: https://example.com/hook\n",
            ConfigFormat::Yaml,
        )
        .unwrap();
        assert_eq!(config.server.listen.port(), 8061);
    }

    #[test]
    fn relative_template_resolves_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[server]\ntemplate = \"custom.hbs\"\n[profiles]\nops = \"https://example.com\"\n",
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.server.template, Some(dir.path().join("custom.hbs")));
    }

    #[test]
    fn validate_rejects_invalid_log_format() {
        let config =
            AppConfig::parse("[server]\nlog_format = \"xml\"\n", ConfigFormat::Toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Invalid log_format"), "{}", err);
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let config = AppConfig::parse("[server]\ntimeout_ms = 0\n", ConfigFormat::Toml).unwrap();
        assert!(config.validate().is_err());
    }
}
