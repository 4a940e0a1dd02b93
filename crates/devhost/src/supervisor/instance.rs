//! Supervised instance types and per-instance state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::context::ExecutionContext;

/// Identity of one supervised process: `(project key, instance id)`.
/// Unique across the whole registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceKey {
    pub project: String,
    pub instance: String,
}

impl InstanceKey {
    pub fn new(project: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            instance: instance.into(),
        }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project, self.instance)
    }
}

/// How the instance's runtime is launched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LaunchMethod {
    /// A long-running dev command managed directly by the supervisor.
    #[default]
    ProcessManager,
    /// A container runtime drives the process (`docker compose up`).
    Container,
}

impl LaunchMethod {
    /// Tool expected on PATH for this method; named in `ToolMissing` errors.
    pub fn expected_tool(&self, command: Option<&str>) -> String {
        match self {
            LaunchMethod::ProcessManager => command.unwrap_or("npm").to_string(),
            LaunchMethod::Container => "docker".to_string(),
        }
    }
}

/// Per-instance lifecycle state.
///
/// `Starting → Running → (PortUpdated)* → Stopping → {Stopped, Crashed}`.
/// The terminal states are never stored: reaching one removes the entry from
/// the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Starting,
    Running,
    Stopping,
}

/// Launch request for one instance.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LaunchSpec {
    /// Command to run for the process-manager method (program + args).
    /// Ignored for the container method, which drives the compose CLI.
    #[serde(default)]
    pub command: Vec<String>,

    /// Requested port; validated into `[1024, 65535]`.
    pub requested_port: i64,

    pub method: LaunchMethod,

    /// Project directory; classified into an execution context at start.
    pub cwd: String,

    /// Suppresses the "starting" notification and crash reporting.
    #[serde(default)]
    pub background: bool,

    /// Compose services to bring up for the container method.
    #[serde(default)]
    pub container_services: Vec<String>,

    /// Extra environment for the launched process.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Registry entry for one running instance.
#[derive(Debug, Clone)]
pub struct ProcessInstance {
    pub key: InstanceKey,
    pub context: ExecutionContext,
    pub pid: Option<u32>,
    pub requested_port: u16,
    pub observed_port: Option<u16>,
    /// Set the first time autodetection fires; never flips back.
    pub port_locked: bool,
    pub method: LaunchMethod,
    pub cwd: String,
    pub started_at: DateTime<Utc>,
    pub background: bool,
    pub state: InstanceState,
}

impl ProcessInstance {
    /// The port reported to callers: the observed port is authoritative over
    /// the requested one once locked.
    pub fn effective_port(&self) -> u16 {
        if self.port_locked {
            self.observed_port.unwrap_or(self.requested_port)
        } else {
            self.requested_port
        }
    }
}

/// Result of a successful `start`: pid plus the *requested* port (the
/// observed port arrives later via a `port-changed` event).
#[derive(Debug, Clone, Serialize)]
pub struct StartResult {
    pub pid: Option<u32>,
    pub port: u16,
}

/// Summary row for `list_running`.
#[derive(Debug, Clone, Serialize)]
pub struct RunningInstance {
    pub port: u16,
    pub method: LaunchMethod,
    pub pid: Option<u32>,
}
