//! Configuration validation.
//!
//! Catches values that would make the coordinator misbehave (zero intervals,
//! empty queues, page sizes above the hard cap) before the server starts.

use crate::schema::MingleConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "match.tick_interval_ms"
    pub path: &'static str,
    pub message: String,
}

impl Diagnostic {
    fn error(path: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            path,
            message: message.into(),
        }
    }

    fn warning(path: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            path,
            message: message.into(),
        }
    }
}

/// Validate a loaded config. Errors should abort startup; warnings are logged.
#[must_use]
pub fn validate(cfg: &MingleConfig) -> Vec<Diagnostic> {
    let mut diags = Vec::new();

    if cfg.matchmaking.tick_interval_ms == 0 {
        diags.push(Diagnostic::error(
            "match.tick_interval_ms",
            "tick interval must be positive",
        ));
    }
    if cfg.matchmaking.ballot_ttl_ms == 0 {
        diags.push(Diagnostic::error(
            "match.ballot_ttl_ms",
            "ballot TTL must be positive",
        ));
    }
    if cfg.matchmaking.ballot_ttl_ms < cfg.matchmaking.tick_interval_ms {
        diags.push(Diagnostic::warning(
            "match.ballot_ttl_ms",
            "ballot TTL shorter than one matcher tick; most ballots will expire unseen",
        ));
    }

    if cfg.conn.send_queue == 0 {
        diags.push(Diagnostic::error(
            "conn.send_queue",
            "send queue must hold at least one event",
        ));
    }
    if cfg.conn.send_timeout_ms == 0 {
        diags.push(Diagnostic::error(
            "conn.send_timeout_ms",
            "send timeout must be positive",
        ));
    }

    if cfg.msg.max_content_bytes == 0 {
        diags.push(Diagnostic::error(
            "msg.max_content_bytes",
            "max content size must be positive",
        ));
    }
    if cfg.msg.page_size_max == 0 || cfg.msg.page_size_max > 100 {
        diags.push(Diagnostic::error(
            "msg.page_size_max",
            "page size cap must be between 1 and 100",
        ));
    }

    if cfg.server.port == 0 {
        diags.push(Diagnostic::error("server.port", "port must be nonzero"));
    }

    diags
}

/// Returns `true` if any diagnostic is an error.
#[must_use]
pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(|d| d.severity == Severity::Error)
}
