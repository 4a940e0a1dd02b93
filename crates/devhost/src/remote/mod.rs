//! Remote host support: session pool, discovery pipeline, output parsers.

pub mod discovery;
pub mod parsers;
pub mod pool;

pub use discovery::{PooledRunner, RemoteRunner, discover};
pub use pool::{ConnectOutcome, ExecOutput, SessionPool};
