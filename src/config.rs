//! Tunnel configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `TORALIZE_*` environment variables, then command-line overrides.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_PROXY_ADDR: &str = "127.0.0.1:9050";
pub const DEFAULT_IDENTIFIER: &str = "toraliz";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// SOCKS4 proxy as `host:port`.
    pub proxy_addr: String,
    /// Sent in the USERID field of every request.
    pub identifier: String,
    /// Refuse replies whose first byte is not 0x00.
    pub strict_reply: bool,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    /// Idle limit while draining the relayed response.
    #[serde(with = "humantime_serde")]
    pub relay_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proxy_addr: DEFAULT_PROXY_ADDR.to_string(),
            identifier: DEFAULT_IDENTIFIER.to_string(),
            strict_reply: false,
            connect_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(10),
            relay_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    pub fn load_from_file(path: &Path) -> Result<Config> {
        tracing::debug!("Loading configuration from: {}", path.display());
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    /// Override fields from `TORALIZE_*` variables that are set.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("TORALIZE_PROXY_ADDR") {
            self.proxy_addr = addr;
        }
        if let Some(ident) = lookup("TORALIZE_IDENTIFIER") {
            self.identifier = ident;
        }
        if let Some(strict) = lookup("TORALIZE_STRICT_REPLY") {
            self.strict_reply = strict
                .parse::<bool>()
                .with_context(|| format!("Invalid TORALIZE_STRICT_REPLY: {}", strict))?;
        }
        let durations: [(&str, &mut Duration); 4] = [
            ("TORALIZE_CONNECT_TIMEOUT", &mut self.connect_timeout),
            ("TORALIZE_WRITE_TIMEOUT", &mut self.write_timeout),
            ("TORALIZE_READ_TIMEOUT", &mut self.read_timeout),
            ("TORALIZE_RELAY_TIMEOUT", &mut self.relay_timeout),
        ];
        for (key, slot) in durations {
            if let Some(value) = lookup(key) {
                *slot = humantime::parse_duration(&value)
                    .with_context(|| format!("Invalid {}: {}", key, value))?;
            }
        }
        Ok(())
    }

    pub fn merge_with_cli_args(
        &mut self,
        proxy: Option<&str>,
        identifier: Option<&str>,
        read_timeout: Option<Duration>,
        relay_timeout: Option<Duration>,
        strict: bool,
    ) {
        if let Some(proxy) = proxy {
            self.proxy_addr = proxy.to_string();
        }
        if let Some(identifier) = identifier {
            self.identifier = identifier.to_string();
        }
        if let Some(timeout) = read_timeout {
            self.read_timeout = timeout;
        }
        if let Some(timeout) = relay_timeout {
            self.relay_timeout = timeout;
        }
        if strict {
            self.strict_reply = true;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.proxy_addr.trim().is_empty() {
            return Err(anyhow!("proxy_addr must not be empty"));
        }
        if self.identifier.as_bytes().contains(&0) {
            return Err(anyhow!("identifier must not contain a NUL byte"));
        }
        let durations = [
            ("connect_timeout", self.connect_timeout),
            ("write_timeout", self.write_timeout),
            ("read_timeout", self.read_timeout),
            ("relay_timeout", self.relay_timeout),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(anyhow!("{} must be greater than zero", name));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.proxy_addr, "127.0.0.1:9050");
        assert_eq!(config.identifier, "toraliz");
        assert!(!config.strict_reply);
        assert_eq!(config.read_timeout, Duration::from_secs(10));
        assert_eq!(config.write_timeout, Duration::from_secs(10));
        assert_eq!(config.relay_timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            proxy_addr = "10.0.0.2:1080"
            read_timeout = "2s 500ms"
            "#,
        )
        .unwrap();
        assert_eq!(config.proxy_addr, "10.0.0.2:1080");
        assert_eq!(config.read_timeout, Duration::from_millis(2500));
        assert_eq!(config.identifier, DEFAULT_IDENTIFIER);
        assert_eq!(config.relay_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "identifier = \"bob\"\nstrict_reply = true\nconnect_timeout = \"3s\"").unwrap();
        let config = Config::load_from_file(file.path()).unwrap();
        assert_eq!(config.identifier, "bob");
        assert!(config.strict_reply);
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_load_rejects_zero_timeout() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "write_timeout = \"0s\"").unwrap();
        assert!(Config::load_from_file(file.path()).is_err());
    }

    #[test]
    fn test_validate_rejects_nul_identifier() {
        let config = Config {
            identifier: "to\0r".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TORALIZE_PROXY_ADDR", "proxy.local:1080"),
            ("TORALIZE_STRICT_REPLY", "true"),
            ("TORALIZE_RELAY_TIMEOUT", "1m"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config
            .apply_vars(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.proxy_addr, "proxy.local:1080");
        assert!(config.strict_reply);
        assert_eq!(config.relay_timeout, Duration::from_secs(60));
        assert_eq!(config.read_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_env_bad_duration() {
        let mut config = Config::default();
        let result = config.apply_vars(|key| {
            (key == "TORALIZE_READ_TIMEOUT").then(|| "soon".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_overrides_win() {
        let mut config = Config::default();
        config.merge_with_cli_args(Some("1.2.3.4:1080"), None, Some(Duration::from_secs(1)), None, true);
        assert_eq!(config.proxy_addr, "1.2.3.4:1080");
        assert_eq!(config.identifier, DEFAULT_IDENTIFIER);
        assert_eq!(config.read_timeout, Duration::from_secs(1));
        assert!(config.strict_reply);
    }
}
