//! Local and remote dev-project launcher.
//!
//! Two halves share one surface:
//! - a process supervisor that launches project instances across execution
//!   contexts (native, or bridged into a WSL distribution), relays their
//!   sanitized output, autodetects the served port, and tears down whole
//!   process trees on stop
//! - a pooled SSH layer that keeps at most one authenticated session per
//!   remote host and runs a fault-tolerant discovery pipeline over it
//!
//! [`Devhost`] assembles both plus the settings store behind uniform
//! [`devhost_protocol::ApiResponse`] envelopes.

pub mod api;
pub mod context;
pub mod error;
pub mod notify;
pub mod project;
pub mod remote;
pub mod sanitize;
pub mod settings;
pub mod supervisor;

pub use api::Devhost;
pub use error::{DevhostError, DevhostResult};
