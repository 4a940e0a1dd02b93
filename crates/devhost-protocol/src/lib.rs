//! Shared wire types for devhost.
//!
//! Everything that crosses a component boundary lives here: the ordered relay
//! event stream, the uniform result envelope every exposed operation returns,
//! persisted remote-host records, and the host inventory snapshot produced by
//! the discovery pipeline.

pub mod envelope;
pub mod events;
pub mod hosts;
pub mod snapshot;

pub use envelope::ApiResponse;
pub use events::RelayEvent;
pub use hosts::{AuthMethod, HostConfig};
pub use snapshot::{
    ContainerEntry, HostInventorySnapshot, ListeningSocket, OsIdentity, ProcessManagerEntry,
    ProjectRoot, ProxySite, ServiceUnit,
};
