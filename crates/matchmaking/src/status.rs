//! Per-user status machine.

use serde::{Deserialize, Serialize};

/// Where a user currently is in the matchmaking flow.
///
/// Legal transitions:
///
/// ```text
/// Offline ⇄ Online ⇄ Searching → Pending → InChat → Online
///                                    └──────────────→ Online
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Offline,
    Online,
    Searching,
    Pending,
    InChat,
}

impl UserStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Online => "online",
            Self::Searching => "searching",
            Self::Pending => "pending",
            Self::InChat => "in_chat",
        }
    }

    /// Whether `self → to` is one of the legal edges. Forbidden moves
    /// (`InChat → Searching`, `Offline → Pending`, …) return `false`.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        use UserStatus::*;
        matches!(
            (self, to),
            (Offline, Online)
                | (Online, Offline)
                | (Online, Searching)
                | (Searching, Online)
                | (Searching, Pending)
                | (Pending, Online)
                | (Pending, InChat)
                | (InChat, Online)
        )
    }
}

impl std::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
