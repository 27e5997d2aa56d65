pub mod config;
pub mod console;
pub mod gate;
pub mod runtime;

pub use config::{ClientConfig, ConfigError, SavedConfig, resolve_config};
pub use gate::{Backoff, ConnectionGate, ConnectionState, RetryPolicy};
pub use runtime::{ReconnectPolicy, Session, open};
