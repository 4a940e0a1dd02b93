//! Remote host discovery pipeline.
//!
//! Given a ready session, discovery issues a fixed battery of read-only
//! probes *together* and joins them: every probe already carries its own
//! timeout and failure boundary, so serializing them here would only
//! multiply worst-case latency by the probe count. A failed probe
//! contributes an empty result; the pipeline as a whole never fails because
//! one probe failed.

use async_trait::async_trait;
use log::debug;

use super::parsers;
use super::pool::{ExecOutput, SessionPool};
use crate::error::DevhostResult;
use devhost_protocol::HostInventorySnapshot;

/// Per-probe timeout.
const PROBE_TIMEOUT_MS: u64 = 10_000;

/// Bounded-depth remote search for project manifests, excluding known
/// vendor/build directories.
const PROJECT_ROOT_PROBE: &str = "find ~ -maxdepth 4 \
     \\( -name node_modules -o -name .git -o -name vendor -o -name target -o -name dist \\) -prune \
     -o -type f \\( -name package.json -o -name Cargo.toml -o -name pyproject.toml \
     -o -name requirements.txt -o -name go.mod -o -name docker-compose.yml \
     -o -name compose.yaml \\) -print 2>/dev/null | head -200";

/// Seam between the pipeline and the transport, so tests can fail arbitrary
/// probes. The pool provides the production implementation.
#[async_trait]
pub trait RemoteRunner: Send + Sync {
    async fn run(&self, command: &str) -> DevhostResult<ExecOutput>;
}

/// Production runner: one pooled session, per-probe timeout.
pub struct PooledRunner<'a> {
    pool: &'a SessionPool,
    host_id: String,
}

impl<'a> PooledRunner<'a> {
    pub fn new(pool: &'a SessionPool, host_id: impl Into<String>) -> Self {
        Self {
            pool,
            host_id: host_id.into(),
        }
    }
}

#[async_trait]
impl RemoteRunner for PooledRunner<'_> {
    async fn run(&self, command: &str) -> DevhostResult<ExecOutput> {
        self.pool.exec(&self.host_id, command, PROBE_TIMEOUT_MS).await
    }
}

/// Run the full probe battery and derive capability tags.
pub async fn discover(runner: &dyn RemoteRunner) -> HostInventorySnapshot {
    let (os, containers, process_manager, multiplexer, units, sites, sockets, roots) = tokio::join!(
        probe(runner, "cat /etc/os-release 2>/dev/null; uname -sr"),
        probe(
            runner,
            "docker ps --format '{{.ID}}\t{{.Names}}\t{{.Image}}\t{{.Status}}\t{{.Ports}}'",
        ),
        probe(runner, "pm2 jlist"),
        probe(runner, "tmux list-sessions -F '#{session_name}'"),
        probe(
            runner,
            "systemctl list-units --type=service --state=running --plain --no-legend",
        ),
        probe(
            runner,
            "cat /etc/nginx/sites-enabled/* /etc/nginx/conf.d/*.conf 2>/dev/null",
        ),
        probe(runner, "ss -tlnp 2>/dev/null || netstat -tlnp 2>/dev/null"),
        probe(runner, PROJECT_ROOT_PROBE),
    );

    let mut snapshot = HostInventorySnapshot {
        os: os.as_deref().map(parsers::parse_os_identity).unwrap_or_default(),
        containers: parse_or_default(containers, parsers::parse_container_listing),
        process_manager: parse_or_default(process_manager, parsers::parse_pm2_listing),
        multiplexer_sessions: parse_or_default(multiplexer, parsers::parse_multiplexer_sessions),
        service_units: parse_or_default(units, parsers::parse_service_units),
        proxy_sites: parse_or_default(sites, parsers::parse_proxy_sites),
        sockets: parse_or_default(sockets, parsers::parse_listening_sockets),
        project_roots: parse_or_default(roots, parsers::parse_project_roots),
        capabilities: Vec::new(),
    };
    snapshot.capabilities = derive_capabilities(&snapshot);
    snapshot
}

/// One probe behind its own failure boundary: any failure (transport error,
/// timeout, nonzero exit) reduces to `None`, never propagates.
async fn probe(runner: &dyn RemoteRunner, command: &str) -> Option<String> {
    match runner.run(command).await {
        Ok(output) if output.exit_code.unwrap_or(1) == 0 => Some(output.stdout),
        Ok(output) => {
            debug!(
                "probe exited with {:?}: {}",
                output.exit_code,
                command.split_whitespace().next().unwrap_or("")
            );
            None
        }
        Err(e) => {
            debug!("probe failed: {e}");
            None
        }
    }
}

fn parse_or_default<T>(raw: Option<String>, parse: fn(&str) -> Vec<T>) -> Vec<T> {
    raw.as_deref().map(parse).unwrap_or_default()
}

/// Fixed, ordered capability rule table. The tag list's order is this
/// table's order — not sorted, not deduplicated beyond what the rules
/// themselves guarantee.
const CAPABILITY_RULES: &[(&str, fn(&HostInventorySnapshot) -> bool)] = &[
    ("docker", |s| {
        !s.containers.is_empty() || unit_contains(s, &["docker"])
    }),
    ("pm2", |s| !s.process_manager.is_empty()),
    ("tmux", |s| !s.multiplexer_sessions.is_empty()),
    ("nginx", |s| {
        !s.proxy_sites.is_empty() || unit_contains(s, &["nginx"])
    }),
    ("apache", |s| unit_contains(s, &["apache", "httpd"])),
    ("postgres", |s| unit_contains(s, &["postgres"])),
    ("mysql", |s| unit_contains(s, &["mysql", "mariadb"])),
    ("redis", |s| unit_contains(s, &["redis"])),
    ("mongodb", |s| unit_contains(s, &["mongo"])),
    ("node", |s| has_manifest(s, "package.json")),
    ("rust", |s| has_manifest(s, "Cargo.toml")),
    ("python", |s| {
        has_manifest(s, "pyproject.toml") || has_manifest(s, "requirements.txt")
    }),
    ("go", |s| has_manifest(s, "go.mod")),
    ("compose", |s| {
        has_manifest(s, "docker-compose.yml") || has_manifest(s, "compose.yaml")
    }),
];

fn unit_contains(snapshot: &HostInventorySnapshot, needles: &[&str]) -> bool {
    snapshot.service_units.iter().any(|unit| {
        let lowered = unit.unit.to_ascii_lowercase();
        needles.iter().any(|needle| lowered.contains(needle))
    })
}

fn has_manifest(snapshot: &HostInventorySnapshot, name: &str) -> bool {
    snapshot
        .project_roots
        .iter()
        .any(|root| root.manifests.iter().any(|m| m == name))
}

/// Evaluate the rule table over the aggregated snapshot, in table order.
pub fn derive_capabilities(snapshot: &HostInventorySnapshot) -> Vec<String> {
    CAPABILITY_RULES
        .iter()
        .filter(|(_, applies)| applies(snapshot))
        .map(|(tag, _)| (*tag).to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DevhostError;
    use devhost_protocol::{ProjectRoot, ServiceUnit};
    use std::collections::HashSet;

    /// Fake runner that fails every probe whose command starts with one of
    /// the configured prefixes.
    struct FlakyRunner {
        fail_prefixes: Vec<&'static str>,
        outputs: Vec<(&'static str, &'static str)>,
    }

    #[async_trait]
    impl RemoteRunner for FlakyRunner {
        async fn run(&self, command: &str) -> DevhostResult<ExecOutput> {
            if self.fail_prefixes.iter().any(|p| command.starts_with(p)) {
                return Err(DevhostError::Timeout(10));
            }
            let stdout = self
                .outputs
                .iter()
                .find(|(prefix, _)| command.starts_with(prefix))
                .map(|(_, out)| (*out).to_string())
                .unwrap_or_default();
            Ok(ExecOutput {
                stdout,
                stderr: String::new(),
                exit_code: Some(0),
            })
        }
    }

    #[tokio::test]
    async fn test_discover_survives_five_failed_probes() {
        let runner = FlakyRunner {
            fail_prefixes: vec!["docker", "pm2", "tmux", "ss", "find"],
            outputs: vec![
                ("cat /etc/os-release", "NAME=\"Debian GNU/Linux\"\nLinux 6.1.0-18-amd64"),
                (
                    "systemctl",
                    "nginx.service loaded active running A high performance web server",
                ),
                (
                    "cat /etc/nginx",
                    "server {\n    server_name app.example.com;\n}",
                ),
            ],
        };
        let snapshot = discover(&runner).await;

        // The five failed probes contribute empty results.
        assert!(snapshot.containers.is_empty());
        assert!(snapshot.process_manager.is_empty());
        assert!(snapshot.multiplexer_sessions.is_empty());
        assert!(snapshot.sockets.is_empty());
        assert!(snapshot.project_roots.is_empty());

        // The three healthy ones are populated.
        assert_eq!(snapshot.os.name, "Debian GNU/Linux");
        assert_eq!(snapshot.service_units.len(), 1);
        assert_eq!(snapshot.proxy_sites.len(), 1);
        assert_eq!(snapshot.capabilities, vec!["nginx"]);
    }

    #[tokio::test]
    async fn test_nonzero_probe_exit_is_empty_not_fatal() {
        struct FailingExit;
        #[async_trait]
        impl RemoteRunner for FailingExit {
            async fn run(&self, _command: &str) -> DevhostResult<ExecOutput> {
                Ok(ExecOutput {
                    stdout: "noise".to_string(),
                    stderr: String::new(),
                    exit_code: Some(127),
                })
            }
        }
        let snapshot = discover(&FailingExit).await;
        assert!(snapshot.containers.is_empty());
        assert!(snapshot.capabilities.is_empty());
    }

    #[test]
    fn test_capability_order_is_rule_order() {
        let snapshot = HostInventorySnapshot {
            service_units: vec![
                ServiceUnit {
                    unit: "redis-server.service".into(),
                    active: "running".into(),
                    description: String::new(),
                },
                ServiceUnit {
                    unit: "docker.service".into(),
                    active: "running".into(),
                    description: String::new(),
                },
            ],
            project_roots: vec![ProjectRoot {
                path: "/srv/api".into(),
                manifests: vec!["Cargo.toml".into()],
            }],
            ..Default::default()
        };
        let tags = derive_capabilities(&snapshot);
        // docker before redis before rust, regardless of input order.
        assert_eq!(tags, vec!["docker", "redis", "rust"]);
        let unique: HashSet<_> = tags.iter().collect();
        assert_eq!(unique.len(), tags.len());
    }
}
