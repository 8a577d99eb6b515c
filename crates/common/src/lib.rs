//! Clock abstraction, cancellable timers, and id generation shared across
//! all mingle crates.

pub mod clock;
pub mod timer;

pub use {
    clock::{Clock, ManualClock, SystemClock, unix_ms},
    timer::TimerHandle,
};

/// Generate a fresh string id (UUID v4).
#[must_use]
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
