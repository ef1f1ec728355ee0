use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::paths::Paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    #[serde(default = "default_bridge_host")]
    pub host: String,
    #[serde(default = "default_bridge_port")]
    pub port: u16,
    /// How long a forwarded request may wait for the extension's answer.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Upper bound on any single read from a TCP client, including the idle
    /// wait between two requests on a kept-alive connection.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    #[serde(default)]
    pub require_auth: bool,
}

fn default_bridge_host() -> String {
    "127.0.0.1".to_string()
}

fn default_bridge_port() -> u16 {
    8765
}

fn default_request_timeout() -> u64 {
    60
}

fn default_read_timeout() -> u64 {
    60
}

fn default_max_line_bytes() -> usize {
    16 * 1024 * 1024
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: default_bridge_host(),
            port: default_bridge_port(),
            request_timeout_secs: default_request_timeout(),
            read_timeout_secs: default_read_timeout(),
            max_line_bytes: default_max_line_bytes(),
            require_auth: false,
        }
    }
}

impl BridgeConfig {
    /// Resolve the listen address. Only loopback addresses are accepted:
    /// the bridge has no transport security and must never be reachable
    /// from another host.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let host = self.host.trim();
        let ip: IpAddr = if host.eq_ignore_ascii_case("localhost") {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            host.parse()
                .map_err(|_| Error::Config(format!("invalid bridge host '{}'", host)))?
        };
        if !ip.is_loopback() {
            return Err(Error::Config(format!(
                "bridge host must be a loopback address, got {}",
                ip
            )));
        }
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Mirror stderr logging into the state directory's native_host.log.
    #[serde(default = "default_log_file")]
    pub file: bool,
}

fn default_log_file() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: default_log_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

}

const TOKENS_NOTE: &str =
    "Add bridge access tokens here. Clients authenticate with 'AUTH <token>' as their first line.";

/// Shared secrets accepted by the bridge's `AUTH` handshake, persisted as
/// `{"tokens": [...], "note": "..."}`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TokenStore {
    #[serde(default)]
    pub tokens: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl TokenStore {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let store: TokenStore = serde_json::from_str(&content)?;
        Ok(store)
    }

    /// Load the token file, creating an empty one with an explanatory note
    /// when it does not exist yet.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        tracing::warn!(path = %path.display(), "Tokens file not found, creating an empty one");
        let store = Self {
            tokens: Vec::new(),
            note: Some(TOKENS_NOTE.to_string()),
        };
        store.save(path)?;
        Ok(store)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns false when the token was already present.
    pub fn add(&mut self, token: &str) -> Result<bool> {
        validate_token(token)?;
        if self.contains(token) {
            return Ok(false);
        }
        self.tokens.push(token.to_string());
        Ok(true)
    }

    pub fn remove(&mut self, token: &str) -> bool {
        let before = self.tokens.len();
        self.tokens.retain(|t| t != token);
        self.tokens.len() != before
    }

    pub fn contains(&self, token: &str) -> bool {
        self.tokens.iter().any(|t| t == token)
    }

    /// The usable tokens. Blank entries in a hand-edited file are ignored.
    pub fn token_set(&self) -> HashSet<String> {
        self.tokens
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }
}

fn validate_token(token: &str) -> Result<()> {
    if token.is_empty() {
        return Err(Error::Config("token must not be empty".to_string()));
    }
    if token.chars().any(char::is_whitespace) {
        return Err(Error::Config("token must not contain whitespace".to_string()));
    }
    Ok(())
}

/// A fresh random token, e.g. `tr_3f1c...` (67 chars).
pub fn generate_token() -> String {
    format!(
        "tr_{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_defaults_from_empty_json() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.bridge.port, 8765);
        assert_eq!(cfg.bridge.request_timeout(), Duration::from_secs(60));
        assert!(!cfg.bridge.require_auth);
        assert!(cfg.logging.file);
        assert_eq!(
            cfg.bridge.socket_addr().unwrap(),
            "127.0.0.1:8765".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_camel_case_keys() {
        let raw = r#"{"bridge": {"port": 9000, "requireAuth": true, "requestTimeoutSecs": 5}}"#;
        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.bridge.port, 9000);
        assert!(cfg.bridge.require_auth);
        assert_eq!(cfg.bridge.request_timeout_secs, 5);
        assert_eq!(cfg.bridge.read_timeout_secs, 60);
    }

    #[test]
    fn test_socket_addr_rejects_wildcard() {
        let mut bridge = BridgeConfig::default();
        bridge.host = "0.0.0.0".to_string();
        assert!(matches!(bridge.socket_addr(), Err(Error::Config(_))));
        bridge.host = "192.168.1.10".to_string();
        assert!(bridge.socket_addr().is_err());
        bridge.host = "::1".to_string();
        assert!(bridge.socket_addr().unwrap().ip().is_loopback());
        bridge.host = "localhost".to_string();
        assert!(bridge.socket_addr().is_ok());
    }

    #[test]
    fn test_config_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::with_base(dir.path().to_path_buf());
        assert_eq!(Config::load_or_default(&paths).unwrap().bridge.port, 8765);

        std::fs::create_dir_all(&paths.config).unwrap();
        std::fs::write(
            paths.config_file(),
            r#"{"bridge": {"port": 9911, "requireAuth": true}, "logging": {"file": false}}"#,
        )
        .unwrap();
        let loaded = Config::load_or_default(&paths).unwrap();
        assert_eq!(loaded.bridge.port, 9911);
        assert!(loaded.bridge.require_auth);
        assert!(!loaded.logging.file);
        assert_eq!(loaded.bridge.request_timeout_secs, 60);
    }

    #[test]
    fn test_token_store_create_add_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        let mut store = TokenStore::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert!(store.tokens.is_empty());
        assert!(store.note.is_some());

        assert!(store.add("abc").unwrap());
        assert!(!store.add("abc").unwrap());
        assert!(store.add("has space").is_err());
        assert!(store.add("").is_err());
        store.save(&path).unwrap();

        let mut reloaded = TokenStore::load(&path).unwrap();
        assert!(reloaded.contains("abc"));
        assert!(reloaded.remove("abc"));
        assert!(!reloaded.remove("abc"));
    }

    #[test]
    fn test_token_set_skips_blank_entries() {
        let store: TokenStore =
            serde_json::from_str(r#"{"tokens": ["abc", "  ", "def"]}"#).unwrap();
        let set = store.token_set();
        assert_eq!(set.len(), 2);
        assert!(set.contains("abc"));
        assert!(set.contains("def"));
    }

    #[test]
    fn test_generate_token_is_unique() {
        let a = generate_token();
        let b = generate_token();
        assert!(a.starts_with("tr_"));
        assert_eq!(a.len(), 67);
        assert_ne!(a, b);
    }
}
