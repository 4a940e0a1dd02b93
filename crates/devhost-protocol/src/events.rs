//! Relay events emitted by the process supervisor.
//!
//! Events are delivered to the relay in arrival order. Consumers multiplex on
//! the `(project, instance)` identity carried by each variant.

use serde::{Deserialize, Serialize};

/// Events relayed from supervised processes to the log/event observer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RelayEvent {
    /// A sanitized chunk of process output.
    LogData {
        project: String,
        instance: String,
        chunk: String,
    },

    /// Port autodetection fired. Emitted at most once per instance.
    PortChanged {
        project: String,
        instance: String,
        port: u16,
    },

    /// The underlying process exited and was removed from the registry.
    Stopped {
        project: String,
        instance: String,
        /// Exit code if the process exited normally.
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<i32>,
    },

    /// A chunk from a container log stream.
    DockerLog { project: String, chunk: String },

    /// The container log stream closed.
    DockerLogEnd { project: String },
}

impl RelayEvent {
    /// Project key the event belongs to.
    pub fn project(&self) -> &str {
        match self {
            RelayEvent::LogData { project, .. }
            | RelayEvent::PortChanged { project, .. }
            | RelayEvent::Stopped { project, .. }
            | RelayEvent::DockerLog { project, .. }
            | RelayEvent::DockerLogEnd { project } => project,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_tags() {
        let ev = RelayEvent::PortChanged {
            project: "web".into(),
            instance: "dev".into(),
            port: 5175,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["kind"], "port-changed");
        assert_eq!(json["port"], 5175);
    }

    #[test]
    fn test_stopped_omits_null_code() {
        let ev = RelayEvent::Stopped {
            project: "web".into(),
            instance: "dev".into(),
            code: None,
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(!json.contains("code"));
    }
}
