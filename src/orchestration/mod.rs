//! Long-running tasks wiring the chain client to the engines.

pub mod listener;

pub use listener::{Listener, ListenerConfig, ListenerError, NotificationSummary};
