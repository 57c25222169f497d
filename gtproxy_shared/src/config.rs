//! Configuration system.
//!
//! Loads proxy configuration from JSON strings (file IO left to app).
//! Every section and field carries a serde default so a partial file
//! merges with the built-in configuration.

use serde::{Deserialize, Serialize};

/// Default inbound datagram port.
pub const DEFAULT_SERVER_PORT: u16 = 16999;
/// Default upstream HTTPS host.
pub const DEFAULT_SERVER_ADDRESS: &str = "www.growtopia1.com";
/// Default command prefix.
pub const DEFAULT_COMMAND_PREFIX: char = '/';

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub log: LogConfig,
    pub command: CommandConfig,
    pub web: WebConfig,
    pub scripts: ScriptsConfig,
}

/// Inbound listener and upstream host selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Inbound datagram port. Replaced by a nearby free port when bound.
    pub port: u16,
    /// Preferred upstream HTTPS host.
    pub address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_SERVER_PORT,
            address: DEFAULT_SERVER_ADDRESS.to_string(),
        }
    }
}

/// Outbound side and advisory client identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
    /// Advisory only; never injected into wire payloads.
    pub game_version: String,
    /// Advisory only.
    pub protocol: u16,
    /// `cloudflare`, `google`, `quad9`, `system`, or a comma-separated
    /// list of resolver addresses.
    pub dns_server: String,
    /// Local port for the outbound datagram socket; 0 = ephemeral.
    pub local_port: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            game_version: "4.61".to_string(),
            protocol: 192,
            dns_server: "cloudflare".to_string(),
            local_port: 0,
        }
    }
}

/// Log level and traffic logging gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LogConfig {
    /// One of `error`, `warn`, `info`, `debug`, `trace`.
    pub level: String,
    /// Log decoded text frames.
    pub print_message: bool,
    /// Log tank packet headers.
    pub print_game_update_packet: bool,
    /// Log decoded variant lists.
    pub print_variant: bool,
    /// Hex-dump extra buffers.
    pub print_extra: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            print_message: false,
            print_game_update_packet: false,
            print_variant: false,
            print_extra: false,
        }
    }
}

impl LogConfig {
    /// The configured level if recognized, `info` otherwise.
    pub fn level_or_default(&self) -> &str {
        match self.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => &self.level,
            _ => "info",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Single-character command prefix. Invalid values revert to `/`.
    pub prefix: String,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_COMMAND_PREFIX.to_string(),
        }
    }
}

impl CommandConfig {
    /// The prefix as a char, reverting to `/` unless the configured value
    /// is exactly one character.
    pub fn prefix_char(&self) -> char {
        let mut chars = self.prefix.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => c,
            _ => DEFAULT_COMMAND_PREFIX,
        }
    }
}

/// HTTPS interceptor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WebConfig {
    pub port: u16,
    pub cert_path: String,
    pub key_path: String,
    /// Strip `#maint`/`maint` lines from bootstrap responses.
    pub ignore_maintenance: bool,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            port: 443,
            cert_path: "data/cert.pem".to_string(),
            key_path: "data/key.pem".to_string(),
            ignore_maintenance: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptsConfig {
    pub enabled: bool,
    /// Retained for config compatibility; the plugin registry is
    /// compile-time.
    pub path: String,
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "scripts".to_string(),
        }
    }
}

impl ProxyConfig {
    /// Parses config from JSON, merging absent keys with defaults.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_merges_with_defaults() {
        let cfg = ProxyConfig::from_json_str(
            r#"{ "server": { "port": 17000 }, "web": { "ignoreMaintenance": true } }"#,
        )
        .unwrap();
        assert_eq!(cfg.server.port, 17000);
        assert_eq!(cfg.server.address, DEFAULT_SERVER_ADDRESS);
        assert!(cfg.web.ignore_maintenance);
        assert_eq!(cfg.web.port, 443);
        assert_eq!(cfg.command.prefix_char(), '/');
    }

    #[test]
    fn invalid_prefix_reverts_to_default() {
        let cfg =
            ProxyConfig::from_json_str(r#"{ "command": { "prefix": "!!" } }"#).unwrap();
        assert_eq!(cfg.command.prefix_char(), '/');
        let cfg = ProxyConfig::from_json_str(r#"{ "command": { "prefix": "" } }"#).unwrap();
        assert_eq!(cfg.command.prefix_char(), '/');
        let cfg = ProxyConfig::from_json_str(r#"{ "command": { "prefix": "!" } }"#).unwrap();
        assert_eq!(cfg.command.prefix_char(), '!');
    }

    #[test]
    fn unknown_log_level_falls_back() {
        let cfg = ProxyConfig::from_json_str(r#"{ "log": { "level": "loud" } }"#).unwrap();
        assert_eq!(cfg.log.level_or_default(), "info");
    }

    #[test]
    fn roundtrips_through_json() {
        let cfg = ProxyConfig::default();
        let text = cfg.to_json_string().unwrap();
        let back = ProxyConfig::from_json_str(&text).unwrap();
        assert_eq!(back.server.port, cfg.server.port);
        assert_eq!(back.client.dns_server, cfg.client.dns_server);
    }
}
