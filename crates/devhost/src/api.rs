//! Uniform operation surface.
//!
//! Every exposed operation returns an `ApiResponse` envelope so callers (the
//! CLI today, an IPC layer tomorrow) handle one shape. The facade owns the
//! supervisor, the session pool, and the settings store.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::error::DevhostError;
use crate::project::{self, FsManifestInspector, ManifestInspector, ProjectProbe};
use crate::remote::{ConnectOutcome, ExecOutput, PooledRunner, SessionPool, discover};
use crate::settings::SettingsStore;
use crate::supervisor::{LaunchSpec, ProcessSupervisor, RunningInstance, StartResult};
use devhost_protocol::{ApiResponse, HostConfig, HostInventorySnapshot, RelayEvent};

/// Default timeout for ad-hoc remote commands, in milliseconds.
const DEFAULT_EXEC_TIMEOUT_MS: u64 = 30_000;

/// The assembled service: supervisor, session pool, settings.
pub struct Devhost {
    supervisor: ProcessSupervisor,
    pool: SessionPool,
    settings: SettingsStore,
    inspector: Arc<dyn ManifestInspector>,
}

impl Devhost {
    pub fn new() -> Self {
        Self::with_settings(SettingsStore::new())
    }

    pub fn with_settings(settings: SettingsStore) -> Self {
        Self {
            supervisor: ProcessSupervisor::new(),
            pool: SessionPool::new(),
            settings,
            inspector: Arc::new(FsManifestInspector),
        }
    }

    /// Subscribe to the ordered relay event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.supervisor.subscribe()
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    // =========================================================================
    // Local lifecycle
    // =========================================================================

    pub async fn start(
        &self,
        project: &str,
        instance: &str,
        spec: LaunchSpec,
    ) -> ApiResponse<StartResult> {
        if let Err(e) = project::validate_identifier(project)
            .and_then(|()| project::validate_identifier(instance))
        {
            return ApiResponse::err(e.to_string());
        }
        self.supervisor.start(project, instance, spec).await.into()
    }

    pub async fn stop(&self, project: &str, instance: &str) -> ApiResponse<()> {
        self.supervisor.stop(project, instance).await.into()
    }

    pub async fn list_running(&self) -> ApiResponse<HashMap<String, HashMap<String, RunningInstance>>> {
        ApiResponse::ok(self.supervisor.list_running().await)
    }

    /// Inspect a project directory: manifest, container definition, services.
    pub fn probe_project(&self, root: &str) -> ApiResponse<ProjectProbe> {
        ApiResponse::ok(self.inspector.probe(Path::new(root)))
    }

    pub async fn stream_container_logs(&self, project: &str, cwd: &str) -> ApiResponse<()> {
        self.supervisor.stream_container_logs(project, cwd).await.into()
    }

    pub async fn stop_container_logs(&self, project: &str) -> ApiResponse<()> {
        self.supervisor.stop_container_logs(project).await;
        ApiResponse::ok(())
    }

    // =========================================================================
    // Remote sessions
    // =========================================================================

    /// Connect to a host from the settings store by id.
    pub async fn connect(&self, host_id: &str) -> ApiResponse<ConnectOutcome> {
        let Some(config) = self.host_config(host_id) else {
            return ApiResponse::err(format!("unknown host '{host_id}'"));
        };
        self.pool.connect(&config).await.into()
    }

    /// Connect with an explicit config, persisting it for later use.
    pub async fn connect_with(&self, config: HostConfig) -> ApiResponse<ConnectOutcome> {
        if let Err(e) = self.settings.store_host(config.clone()) {
            return ApiResponse::err(e.to_string());
        }
        self.pool.connect(&config).await.into()
    }

    pub async fn disconnect(&self, host_id: &str) -> ApiResponse<()> {
        self.pool.disconnect(host_id).await;
        ApiResponse::ok(())
    }

    pub async fn connected_hosts(&self) -> ApiResponse<Vec<String>> {
        ApiResponse::ok(self.pool.connected_hosts().await)
    }

    /// Run the discovery pipeline over a connected host.
    pub async fn discover(&self, host_id: &str) -> ApiResponse<HostInventorySnapshot> {
        if !self.pool.is_connected(host_id).await {
            return ApiResponse::err(DevhostError::NotConnected(host_id.to_string()).to_string());
        }
        let runner = PooledRunner::new(&self.pool, host_id);
        ApiResponse::ok(discover(&runner).await)
    }

    /// Run one ad-hoc command on a connected host.
    pub async fn exec(
        &self,
        host_id: &str,
        command: &str,
        timeout_ms: Option<u64>,
    ) -> ApiResponse<ExecOutput> {
        let timeout = timeout_ms
            .or(self.settings.load().exec_timeout_ms)
            .unwrap_or(DEFAULT_EXEC_TIMEOUT_MS);
        self.pool.exec(host_id, command, timeout).await.into()
    }

    /// Persisted hosts, with passwords never echoed back.
    pub fn hosts(&self) -> ApiResponse<Vec<HostConfig>> {
        let mut hosts = self.settings.load().hosts;
        for host in &mut hosts {
            if let devhost_protocol::AuthMethod::Password { password } = &mut host.auth {
                password.clear();
            }
        }
        ApiResponse::ok(hosts)
    }

    pub fn remove_host(&self, host_id: &str) -> ApiResponse<()> {
        self.settings.remove_host(host_id).into()
    }

    /// Terminate every instance, close every session.
    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
        self.pool.shutdown().await;
    }

    fn host_config(&self, host_id: &str) -> Option<HostConfig> {
        self.settings
            .load()
            .hosts
            .into_iter()
            .find(|host| host.id == host_id)
    }
}

impl Default for Devhost {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::LaunchMethod;

    fn store_in(dir: &tempfile::TempDir) -> SettingsStore {
        SettingsStore::with_path(dir.path().join("config.toml"))
    }

    #[tokio::test]
    async fn test_invalid_identifier_rejected_in_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let devhost = Devhost::with_settings(store_in(&dir));
        let response = devhost
            .start(
                "web app",
                "dev",
                LaunchSpec {
                    command: vec!["true".into()],
                    requested_port: 3000,
                    method: LaunchMethod::ProcessManager,
                    cwd: "/tmp".into(),
                    ..Default::default()
                },
            )
            .await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("web app"));
    }

    #[tokio::test]
    async fn test_connect_unknown_host_is_envelope_error() {
        let dir = tempfile::tempdir().unwrap();
        let devhost = Devhost::with_settings(store_in(&dir));
        let response = devhost.connect("nowhere").await;
        assert!(!response.success);
    }

    #[tokio::test]
    async fn test_discover_requires_session() {
        let dir = tempfile::tempdir().unwrap();
        let devhost = Devhost::with_settings(store_in(&dir));
        let response = devhost.discover("vps").await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("no active session"));
    }

    #[tokio::test]
    async fn test_hosts_never_echo_passwords() {
        let dir = tempfile::tempdir().unwrap();
        let devhost = Devhost::with_settings(store_in(&dir));
        devhost
            .settings
            .save(crate::settings::SettingsUpdate {
                hosts: Some(vec![HostConfig::with_password(
                    "vps", "1.2.3.4", "deploy", "s3cret",
                )]),
                ..Default::default()
            })
            .unwrap();

        let hosts = devhost.hosts().data.unwrap();
        match &hosts[0].auth {
            devhost_protocol::AuthMethod::Password { password } => assert!(password.is_empty()),
            other => panic!("unexpected auth: {other:?}"),
        }
    }
}
