// ABOUTME: Session event log and live event bus for Warden
// ABOUTME: Durable ordered history per session plus fan-out to streaming subscribers

pub mod bus;
pub mod error;
pub mod hub;
mod locks;
pub mod log;
pub mod types;

pub use bus::{EventBus, DEFAULT_BUFFER};
pub use error::{EventError, Result};
pub use hub::{EventHub, EventStream};
pub use log::{EventLog, SqliteEventLog};
pub use types::{Event, EventKind, EventPayload, LogLevel, ToolResult};
