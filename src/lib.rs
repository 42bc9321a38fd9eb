//! Serial Sharer Library
//!
//! Lets several upstream controllers share one downstream serial device that
//! only understands a single conversation at a time. Each controller gets a
//! session; sessions take turns through an arbiter that grants exclusive use
//! of the shared link for one request/reply exchange.
//!
//! # Modules
//!
//! - `link`: Line-oriented serial link abstraction (real port and mock)
//! - `arbiter`: Holder slot and shared link ownership
//! - `session`: Per-controller forwarding state machine
//! - `supervisor`: Session startup, signal handling and shutdown
//! - `shutdown`: Cancellation flag shared by all workers
//! - `config`: Configuration management with TOML support
//! - `error`: Session and application errors
//! - `logging`: Tracing subscriber setup

pub mod arbiter;
pub mod config;
pub mod error;
pub mod link;
pub mod logging;
pub mod session;
pub mod shutdown;
pub mod supervisor;

// Re-export commonly used types for convenience
pub use arbiter::{Arbiter, ArbiterStats, ControllerId, SlotPermit};
pub use error::{SessionError, SharerError, SharerResult};
pub use link::{
    open_all, LineLink, LinkError, LinkHandle, LinkResult, LinkSettings, MockLink, ReadOutcome,
    SerialLink,
};
pub use session::{ClientSession, CycleOutcome, SessionReport, SessionSettings, SessionStats};
pub use shutdown::Shutdown;
pub use supervisor::{RunSummary, StopReason, Supervisor, SupervisorSettings};

// Re-export config types
pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
