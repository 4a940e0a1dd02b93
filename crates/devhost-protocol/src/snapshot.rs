//! Host inventory snapshot types.
//!
//! A snapshot is the aggregated, point-in-time result of running all discovery
//! probes against one remote session. Every collection defaults to empty: a
//! probe that failed contributes nothing rather than poisoning the snapshot.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// OS identity from `/etc/os-release` and `uname`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OsIdentity {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub kernel: String,
}

/// A running container reported by the container runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerEntry {
    pub id: String,
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub ports: String,
}

/// One entry from the process-manager listing (pm2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessManagerEntry {
    pub name: String,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub status: String,
}

/// A filtered service-manager unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceUnit {
    pub unit: String,
    #[serde(default)]
    pub active: String,
    #[serde(default)]
    pub description: String,
}

/// A reverse-proxy site block: name, document root, upstream target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxySite {
    pub server_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<String>,
}

/// A listening socket with best-effort owning process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListeningSocket {
    pub address: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

/// A candidate project root with the manifest kinds found inside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRoot {
    pub path: String,
    pub manifests: Vec<String>,
}

/// Aggregated result of running all discovery probes against one session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostInventorySnapshot {
    #[serde(default)]
    pub os: OsIdentity,
    #[serde(default)]
    pub containers: Vec<ContainerEntry>,
    #[serde(default)]
    pub process_manager: Vec<ProcessManagerEntry>,
    #[serde(default)]
    pub multiplexer_sessions: Vec<String>,
    #[serde(default)]
    pub service_units: Vec<ServiceUnit>,
    #[serde(default)]
    pub proxy_sites: Vec<ProxySite>,
    #[serde(default)]
    pub sockets: Vec<ListeningSocket>,
    #[serde(default)]
    pub project_roots: Vec<ProjectRoot>,
    /// Derived capability tags, in rule-table order.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl HostInventorySnapshot {
    /// Project roots grouped by containing directory, keyed in sorted order.
    pub fn roots_by_directory(&self) -> BTreeMap<String, Vec<String>> {
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for root in &self.project_roots {
            grouped
                .entry(root.path.clone())
                .or_default()
                .extend(root.manifests.iter().cloned());
        }
        grouped
    }
}
