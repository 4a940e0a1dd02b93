//! Process lifecycle supervision.
//!
//! The supervisor owns the registry of running instances and drives
//! spawn/monitor/stop/kill across execution contexts. Per instance it runs:
//! - reader tasks that sanitize output, feed port autodetection, and relay
//!   every chunk to the event stream in arrival order
//! - a watcher task that owns the child handle, waits for exit, and is the
//!   only place an entry is removed from the registry
//!
//! `stop` only *requests* termination; the watcher observing the exit event
//! is the ground truth for process death.

mod instance;
mod ports;

pub use instance::{
    InstanceKey, InstanceState, LaunchMethod, LaunchSpec, ProcessInstance, RunningInstance,
    StartResult,
};
pub use ports::{detect_port, validate_port};

use chrono::Utc;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;

use crate::context::{self, ExecutionContext, TranslateOptions};
use crate::error::{DevhostError, DevhostResult};
use crate::notify::{LogNotifier, NotificationSink};
use crate::sanitize::sanitize;
use devhost_protocol::RelayEvent;

/// Size of the relay event broadcast channel.
const EVENT_BUFFER_SIZE: usize = 512;

/// Delay before the fallback port-freeing step after a stop request.
const STOP_GRACE: Duration = Duration::from_millis(750);

/// Compose definition filenames recognized next to a project.
const COMPOSE_FILES: [&str; 4] = [
    "docker-compose.yml",
    "docker-compose.yaml",
    "compose.yml",
    "compose.yaml",
];

type InstanceMap = Arc<RwLock<HashMap<InstanceKey, ProcessInstance>>>;

/// Owns the instance registry and the container log-stream registry.
pub struct ProcessSupervisor {
    instances: InstanceMap,
    log_streams: Arc<RwLock<HashMap<String, JoinHandle<()>>>>,
    events: broadcast::Sender<RelayEvent>,
    notifier: Arc<dyn NotificationSink>,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::with_notifier(Arc::new(LogNotifier))
    }

    pub fn with_notifier(notifier: Arc<dyn NotificationSink>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self {
            instances: Arc::new(RwLock::new(HashMap::new())),
            log_streams: Arc::new(RwLock::new(HashMap::new())),
            events,
            notifier,
        }
    }

    /// Subscribe to the ordered relay event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.events.subscribe()
    }

    /// Launch an instance and register it.
    ///
    /// Returns the pid and the *requested* port; the observed port arrives
    /// later through a `port-changed` event once autodetection fires.
    pub async fn start(
        &self,
        project: &str,
        instance: &str,
        spec: LaunchSpec,
    ) -> DevhostResult<StartResult> {
        if !validate_port(spec.requested_port) {
            return Err(DevhostError::InvalidPort(spec.requested_port));
        }
        let requested_port = spec.requested_port as u16;
        let key = InstanceKey::new(project, instance);

        let (program, args, tool) = build_launch_command(&spec)?;
        let invocation = context::translate(
            &program,
            &args,
            &TranslateOptions {
                cwd: spec.cwd.clone(),
                env: spec.env.clone(),
            },
        )?;
        let exec_context = context::resolve(&spec.cwd)?;

        // Check and reserve under one write-lock critical section: no window
        // where two concurrent starts both pass the check.
        let mut child = {
            let mut instances = self.instances.write().await;
            if instances.contains_key(&key) {
                return Err(DevhostError::AlreadyRunning {
                    project: project.to_string(),
                    instance: instance.to_string(),
                });
            }

            let mut cmd = Command::new(&invocation.program);
            cmd.args(&invocation.args)
                .envs(&invocation.env)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
            if let Some(cwd) = &invocation.cwd {
                cmd.current_dir(cwd);
            }
            #[cfg(unix)]
            cmd.process_group(0);

            let child = cmd.spawn().map_err(|e| DevhostError::from_spawn(e, &tool))?;

            instances.insert(
                key.clone(),
                ProcessInstance {
                    key: key.clone(),
                    context: exec_context,
                    pid: child.id(),
                    requested_port,
                    observed_port: None,
                    port_locked: false,
                    method: spec.method,
                    cwd: spec.cwd.clone(),
                    started_at: Utc::now(),
                    background: spec.background,
                    state: InstanceState::Starting,
                },
            );
            child
        };

        let pid = child.id();
        info!("started {key} (pid {pid:?}, requested port {requested_port})");

        if !spec.background {
            self.notifier.notify(
                "Starting",
                &format!("{key} on port {requested_port}"),
                false,
            );
        }

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(Self::read_stream(
                self.instances.clone(),
                self.events.clone(),
                key.clone(),
                stdout,
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(Self::read_stream(
                self.instances.clone(),
                self.events.clone(),
                key.clone(),
                stderr,
            ));
        }

        tokio::spawn(Self::watch_exit(
            self.instances.clone(),
            self.events.clone(),
            self.notifier.clone(),
            key.clone(),
            child,
        ));

        // Monitoring is attached; the watcher may already have removed a
        // fast-exiting entry, in which case there is nothing to transition.
        if let Some(entry) = self.instances.write().await.get_mut(&key) {
            entry.state = InstanceState::Running;
        }

        Ok(StartResult {
            pid,
            port: requested_port,
        })
    }

    /// Request termination of an instance.
    ///
    /// Success means "termination requested". The entry stays registered
    /// until the watcher observes the exit event.
    pub async fn stop(&self, project: &str, instance: &str) -> DevhostResult<()> {
        let key = InstanceKey::new(project, instance);
        let entry = {
            let mut instances = self.instances.write().await;
            let Some(entry) = instances.get_mut(&key) else {
                return Err(DevhostError::NotFound {
                    project: project.to_string(),
                    instance: instance.to_string(),
                });
            };
            entry.state = InstanceState::Stopping;
            entry.clone()
        };

        if entry.method == LaunchMethod::Container {
            spawn_container_teardown(&entry);
        }

        self.terminate(&entry);
        Ok(())
    }

    /// Running instances grouped by project, then instance id.
    pub async fn list_running(&self) -> HashMap<String, HashMap<String, RunningInstance>> {
        let instances = self.instances.read().await;
        let mut listing: HashMap<String, HashMap<String, RunningInstance>> = HashMap::new();
        for entry in instances.values() {
            listing
                .entry(entry.key.project.clone())
                .or_default()
                .insert(
                    entry.key.instance.clone(),
                    RunningInstance {
                        port: entry.effective_port(),
                        method: entry.method,
                        pid: entry.pid,
                    },
                );
        }
        listing
    }

    /// Current registry entry for an identity, if present.
    pub async fn snapshot(&self, project: &str, instance: &str) -> Option<ProcessInstance> {
        let key = InstanceKey::new(project, instance);
        self.instances.read().await.get(&key).cloned()
    }

    /// Number of registered instances.
    pub async fn instance_count(&self) -> usize {
        self.instances.read().await.len()
    }

    /// Tail the container logs for a project, relaying `docker-log` chunks
    /// and one `docker-log-end` when the stream closes. At most one streamer
    /// per project.
    pub async fn stream_container_logs(&self, project: &str, cwd: &str) -> DevhostResult<()> {
        self.stream_logs_with(project, "docker", &["compose", "logs", "-f", "--no-color"], cwd)
            .await
    }

    async fn stream_logs_with(
        &self,
        project: &str,
        program: &str,
        args: &[&str],
        cwd: &str,
    ) -> DevhostResult<()> {
        let mut streams = self.log_streams.write().await;
        if streams.contains_key(project) {
            return Ok(());
        }

        let mut child = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            // The streamer task is aborted on stop; the follower must not
            // outlive the dropped child handle.
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DevhostError::from_spawn(e, program))?;

        let events = self.events.clone();
        let log_streams = self.log_streams.clone();
        let project_key = project.to_string();
        let handle = tokio::spawn(async move {
            if let Some(stdout) = child.stdout.take() {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let _ = events.send(RelayEvent::DockerLog {
                        project: project_key.clone(),
                        chunk: sanitize(&line),
                    });
                }
            }
            let _ = child.wait().await;
            let _ = events.send(RelayEvent::DockerLogEnd {
                project: project_key.clone(),
            });
            log_streams.write().await.remove(&project_key);
        });
        streams.insert(project.to_string(), handle);
        Ok(())
    }

    /// Stop tailing container logs for a project, if a streamer is active.
    pub async fn stop_container_logs(&self, project: &str) {
        if let Some(handle) = self.log_streams.write().await.remove(project) {
            handle.abort();
            let _ = self.events.send(RelayEvent::DockerLogEnd {
                project: project.to_string(),
            });
        }
    }

    /// Terminate every registered instance and drain the registry.
    ///
    /// Individual termination failures (already exited, permission denied)
    /// are logged and never abort the remaining iterations.
    pub async fn shutdown(&self) {
        let entries: Vec<ProcessInstance> = {
            let instances = self.instances.read().await;
            instances.values().cloned().collect()
        };
        for entry in &entries {
            if entry.method == LaunchMethod::Container {
                spawn_container_teardown(entry);
            }
            self.terminate(entry);
        }
        self.instances.write().await.clear();

        let mut streams = self.log_streams.write().await;
        for (project, handle) in streams.drain() {
            debug!("aborting container log stream for {project}");
            handle.abort();
        }
        info!("supervisor shut down ({} instances signaled)", entries.len());
    }

    /// Context- and platform-specific termination. Best-effort on every step;
    /// the bridge-side and host-side kills carry no ordering guarantee.
    fn terminate(&self, entry: &ProcessInstance) {
        let port = entry.effective_port();
        match &entry.context {
            ExecutionContext::Bridged { bridge_id, .. } => {
                // Bridge-internal process trees are invisible to host-level
                // signaling: ask the bridge to kill whatever holds the port,
                // then take down the host-side launcher and its descendants.
                bridge_kill_port(bridge_id, port);
                if let Some(pid) = entry.pid {
                    kill_process_tree(pid);
                }
            }
            ExecutionContext::Native => {
                if let Some(pid) = entry.pid {
                    kill_process_tree(pid);
                }
            }
        }

        // The primary signal may not have reached every descendant: after a
        // short grace delay, forcibly free the observed port.
        let context = entry.context.clone();
        tokio::spawn(async move {
            tokio::time::sleep(STOP_GRACE).await;
            free_port(&context, port);
        });
    }

    /// Reader task: every chunk in arrival order is sanitized, fed to port
    /// autodetection until the port locks, and relayed to the log observer.
    async fn read_stream<R: AsyncRead + Unpin>(
        instances: InstanceMap,
        events: broadcast::Sender<RelayEvent>,
        key: InstanceKey,
        stream: R,
    ) {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let chunk = sanitize(&line);

            if let Some(port) = detect_port(&chunk) {
                // Re-check under the lock: stdout and stderr race, and the
                // port must lock exactly once.
                let newly_locked = {
                    let mut map = instances.write().await;
                    match map.get_mut(&key) {
                        Some(entry) if !entry.port_locked => {
                            entry.observed_port = Some(port);
                            entry.port_locked = true;
                            true
                        }
                        _ => false,
                    }
                };
                if newly_locked {
                    debug!("{key}: autodetected port {port}");
                    let _ = events.send(RelayEvent::PortChanged {
                        project: key.project.clone(),
                        instance: key.instance.clone(),
                        port,
                    });
                }
            }

            let _ = events.send(RelayEvent::LogData {
                project: key.project.clone(),
                instance: key.instance.clone(),
                chunk,
            });
        }
    }

    /// Watcher task: owns the child, waits for the exit event, and performs
    /// the single registry removal for this identity.
    async fn watch_exit(
        instances: InstanceMap,
        events: broadcast::Sender<RelayEvent>,
        notifier: Arc<dyn NotificationSink>,
        key: InstanceKey,
        mut child: tokio::process::Child,
    ) {
        let waited = child.wait().await;
        let removed = instances.write().await.remove(&key);

        match waited {
            Ok(status) => {
                let code = status.code();
                info!("{key} exited with {code:?}");
                let _ = events.send(RelayEvent::Stopped {
                    project: key.project.clone(),
                    instance: key.instance.clone(),
                    code,
                });
                let foreground = removed.as_ref().is_some_and(|e| !e.background);
                if foreground && matches!(code, Some(c) if c != 0) {
                    notifier.notify(
                        "Instance crashed",
                        &format!("{key} exited with code {}", code.unwrap_or(-1)),
                        false,
                    );
                }
            }
            Err(e) => {
                warn!("{key}: wait failed: {e}");
                let _ = events.send(RelayEvent::Stopped {
                    project: key.project.clone(),
                    instance: key.instance.clone(),
                    code: None,
                });
                notifier.notify("Instance error", &format!("{key}: {e}"), false);
            }
        }
    }
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the (program, args, expected tool) triple for a launch spec.
fn build_launch_command(spec: &LaunchSpec) -> DevhostResult<(String, Vec<String>, String)> {
    match spec.method {
        LaunchMethod::ProcessManager => {
            let Some((program, rest)) = spec.command.split_first() else {
                return Err(DevhostError::InvalidInput(
                    "a launch command is required for the process-manager method".to_string(),
                ));
            };
            Ok((
                program.clone(),
                rest.to_vec(),
                spec.method.expected_tool(Some(program)),
            ))
        }
        LaunchMethod::Container => {
            let mut args = vec![
                "compose".to_string(),
                "up".to_string(),
                "--no-color".to_string(),
            ];
            args.extend(spec.container_services.iter().cloned());
            Ok(("docker".to_string(), args, spec.method.expected_tool(None)))
        }
    }
}

/// Whether a compose definition exists next to the project.
fn compose_file_exists(cwd: &str) -> bool {
    COMPOSE_FILES
        .iter()
        .any(|name| Path::new(cwd).join(name).exists())
}

/// Best-effort, fire-and-forget compose "down" (or container "stop" when no
/// compose definition exists) ahead of process termination.
fn spawn_container_teardown(entry: &ProcessInstance) {
    let cwd = entry.cwd.clone();
    let project = entry.key.project.clone();
    tokio::spawn(async move {
        let result = if compose_file_exists(&cwd) {
            Command::new("docker")
                .args(["compose", "down"])
                .current_dir(&cwd)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
        } else {
            Command::new("docker")
                .args(["stop", &project])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
        };
        if let Err(e) = result {
            debug!("container teardown for {project} failed: {e}");
        }
    });
}

/// Ask the bridge to kill whatever holds a port inside the distribution.
fn bridge_kill_port(bridge_id: &str, port: u16) {
    let bridge_id = bridge_id.to_string();
    tokio::spawn(async move {
        let result = Command::new("wsl.exe")
            .args(["-d", &bridge_id, "--", "sh", "-c"])
            .arg(format!("fuser -k {port}/tcp"))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = result {
            debug!("bridge kill-by-port on {bridge_id} failed: {e}");
        }
    });
}

/// Signal a process and its descendants.
#[cfg(unix)]
fn kill_process_tree(pid: u32) {
    let pid = pid as i32;
    // Signal the process group first; fall back to the pid directly if the
    // group signal is refused (already exited, not a group leader).
    let group_result = unsafe { libc::kill(-pid, libc::SIGTERM) };
    if group_result != 0 {
        let direct = unsafe { libc::kill(pid, libc::SIGTERM) };
        if direct != 0 {
            debug!("signal to pid {pid} refused (already exited?)");
        }
    }
}

/// Signal a process and its descendant tree on platforms without process
/// groups.
#[cfg(not(unix))]
fn kill_process_tree(pid: u32) {
    tokio::spawn(async move {
        let result = Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = result {
            debug!("taskkill for pid {pid} failed: {e}");
        }
    });
}

/// Forcibly free a port by killing its current holder.
fn free_port(context: &ExecutionContext, port: u16) {
    match context {
        ExecutionContext::Bridged { bridge_id, .. } => bridge_kill_port(bridge_id, port),
        ExecutionContext::Native => {
            #[cfg(unix)]
            {
                tokio::spawn(async move {
                    let _ = Command::new("sh")
                        .arg("-c")
                        .arg(format!("fuser -k {port}/tcp"))
                        .stdin(Stdio::null())
                        .stdout(Stdio::null())
                        .stderr(Stdio::null())
                        .status()
                        .await;
                });
            }
            #[cfg(not(unix))]
            debug!("no native port-freeing fallback on this platform (port {port})");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_process_manager_command() {
        let spec = LaunchSpec {
            command: vec!["npm".into(), "run".into(), "dev".into()],
            requested_port: 3000,
            method: LaunchMethod::ProcessManager,
            cwd: "/srv/web".into(),
            ..Default::default()
        };
        let (program, args, tool) = build_launch_command(&spec).unwrap();
        assert_eq!(program, "npm");
        assert_eq!(args, vec!["run", "dev"]);
        assert_eq!(tool, "npm");
    }

    #[test]
    fn test_build_container_command_includes_services() {
        let spec = LaunchSpec {
            requested_port: 3000,
            method: LaunchMethod::Container,
            cwd: "/srv/web".into(),
            container_services: vec!["web".into(), "db".into()],
            ..Default::default()
        };
        let (program, args, tool) = build_launch_command(&spec).unwrap();
        assert_eq!(program, "docker");
        assert_eq!(args, vec!["compose", "up", "--no-color", "web", "db"]);
        assert_eq!(tool, "docker");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stopping_log_stream_kills_follower() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ticks");
        let script = format!(
            "while true; do echo x >> {}; sleep 0.05; done",
            marker.display()
        );

        let supervisor = ProcessSupervisor::new();
        supervisor
            .stream_logs_with("proj", "sh", &["-c", &script], dir.path().to_str().unwrap())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(marker.exists());

        supervisor.stop_container_logs("proj").await;
        // Allow the kill to land, then verify the writer is really gone.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let after_stop = std::fs::metadata(&marker).unwrap().len();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(std::fs::metadata(&marker).unwrap().len(), after_stop);
    }

    #[test]
    fn test_empty_process_manager_command_rejected() {
        let spec = LaunchSpec {
            requested_port: 3000,
            method: LaunchMethod::ProcessManager,
            cwd: "/srv/web".into(),
            ..Default::default()
        };
        assert!(matches!(
            build_launch_command(&spec),
            Err(DevhostError::InvalidInput(_))
        ));
    }
}
