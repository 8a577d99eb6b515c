//! Config schema types (server, database, matchmaking, connections, messages,
//! logging).

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MingleConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(rename = "match")]
    pub matchmaking: MatchConfig,
    pub conn: ConnConfig,
    pub msg: MessageConfig,
    pub logging: LoggingConfig,
}

/// HTTP/WebSocket listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8917,
        }
    }
}

/// SQLite database location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite file, or `:memory:` for an in-memory store.
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "mingle.db".into(),
        }
    }
}

/// Matchmaking cadence and ballot lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Matcher cadence in milliseconds.
    pub tick_interval_ms: u64,
    /// Pending-match deadline in milliseconds.
    pub ballot_ttl_ms: u64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 3_000,
            ballot_ttl_ms: 120_000,
        }
    }
}

/// Per-connection outbound delivery limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnConfig {
    /// Per-connection outbound buffer, in events.
    pub send_queue: usize,
    /// Per-event delivery deadline in milliseconds.
    pub send_timeout_ms: u64,
}

impl Default for ConnConfig {
    fn default() -> Self {
        Self {
            send_queue: 256,
            send_timeout_ms: 5_000,
        }
    }
}

/// Message content and paging limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageConfig {
    /// Messages larger than this (in bytes, after trimming) are rejected.
    pub max_content_bytes: usize,
    /// Hard upper bound for page sizes on message listings.
    pub page_size_max: u32,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            max_content_bytes: 4_096,
            page_size_max: 100,
        }
    }
}

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level (trace, debug, info, warn, error).
    pub level: String,
    /// Emit JSON log lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = MingleConfig::default();
        assert_eq!(cfg.matchmaking.tick_interval_ms, 3_000);
        assert_eq!(cfg.matchmaking.ballot_ttl_ms, 120_000);
        assert_eq!(cfg.conn.send_queue, 256);
        assert_eq!(cfg.conn.send_timeout_ms, 5_000);
        assert_eq!(cfg.msg.max_content_bytes, 4_096);
        assert_eq!(cfg.msg.page_size_max, 100);
    }

    #[test]
    fn match_section_uses_match_key() {
        let cfg: MingleConfig = toml::from_str(
            "[match]\ntick_interval_ms = 500\n\n[msg]\nmax_content_bytes = 2048\n",
        )
        .unwrap();
        assert_eq!(cfg.matchmaking.tick_interval_ms, 500);
        assert_eq!(cfg.matchmaking.ballot_ttl_ms, 120_000);
        assert_eq!(cfg.msg.max_content_bytes, 2_048);
    }
}
