//! Notification hub: per-session watchdogs pushing concordance progress to
//! WebSocket clients.

pub mod hub;
pub mod session;
pub mod watchdog;

pub use hub::{Hub, SharedHub};
pub use session::Session;
pub use watchdog::Watchdog;
