//! Side-channel notifications.
//!
//! Provides the notification types the orchestrator emits while serving
//! requests and the sink trait hosts implement to receive them.

mod notification;
mod sink;

pub use notification::*;
pub use sink::*;
