//! Authenticated SSH session pool.
//!
//! The pool owns at most one session per host id. A session is registered
//! only once the transport is ready and authenticated; any transport error
//! observed later deregisters it, so the registry never holds a half-open
//! entry.

use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use russh::client::{self, AuthResult, Handle};
use russh::keys::{PrivateKeyWithHashAlg, decode_secret_key, load_secret_key};
use russh::{ChannelMsg, Disconnect};

use crate::error::{DevhostError, DevhostResult};
use devhost_protocol::{AuthMethod, HostConfig};

/// Interval at which registered sessions are checked for asynchronous closes.
const CLOSE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Service name under which passwords are held in the platform secret store.
const SECRET_SERVICE: &str = "devhost";

/// Output of one remote command.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code reported by the remote side; `None` when the channel closed
    /// without one. A nonzero code means the command ran and failed, which is
    /// distinct from a timeout ("no answer").
    pub exit_code: Option<i32>,
}

/// Tri-state connect result. Failure is the `Err` arm of the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectOutcome {
    Connected,
    AlreadyConnected,
}

struct ClientHandler;

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Host key verification is delegated to the operator's known-hosts
        // workflow; the pool accepts the presented key.
        Ok(true)
    }
}

type SessionMap = Arc<RwLock<HashMap<String, Arc<Handle<ClientHandler>>>>>;

/// Liveness view of a registered session, seamed so registry admission is
/// testable without a transport.
trait SessionHandle {
    fn is_closed(&self) -> bool;
}

impl SessionHandle for Handle<ClientHandler> {
    fn is_closed(&self) -> bool {
        Handle::is_closed(self)
    }
}

/// Register a handle unless a live session already holds the id. A closed
/// leftover entry is replaced.
fn admit<H: SessionHandle>(
    sessions: &mut HashMap<String, Arc<H>>,
    id: &str,
    handle: Arc<H>,
) -> bool {
    if sessions.get(id).is_some_and(|existing| !existing.is_closed()) {
        return false;
    }
    sessions.insert(id.to_string(), handle);
    true
}

/// Pool of authenticated sessions, keyed by host id.
pub struct SessionPool {
    sessions: SessionMap,
}

impl SessionPool {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Open and register a session for `config.id`.
    ///
    /// Returns `AlreadyConnected` without opening a second connection when a
    /// ready session exists. A transport error during connect leaves no
    /// entry registered.
    pub async fn connect(&self, config: &HostConfig) -> DevhostResult<ConnectOutcome> {
        {
            let sessions = self.sessions.read().await;
            if let Some(handle) = sessions.get(&config.id)
                && !handle.is_closed()
            {
                return Ok(ConnectOutcome::AlreadyConnected);
            }
        }

        let ssh_config = Arc::new(client::Config::default());
        let mut handle =
            client::connect(ssh_config, (config.host.as_str(), config.port), ClientHandler)
                .await
                .map_err(|e| DevhostError::Transport(e.to_string()))?;

        let auth = match &config.auth {
            AuthMethod::Password { password } => {
                let password = resolve_password(config, password);
                handle
                    .authenticate_password(&config.username, password)
                    .await
                    .map_err(|e| DevhostError::Transport(e.to_string()))?
            }
            AuthMethod::KeyFile { path, passphrase } => {
                let expanded = shellexpand::tilde(path).into_owned();
                let key = load_secret_key(&expanded, passphrase.as_deref()).map_err(|e| {
                    DevhostError::AuthenticationFailed(format!("{}: {e}", config.id))
                })?;
                self.authenticate_key(&mut handle, &config.username, key)
                    .await?
            }
            AuthMethod::KeyInline { key, passphrase } => {
                let key = decode_secret_key(key, passphrase.as_deref()).map_err(|e| {
                    DevhostError::AuthenticationFailed(format!("{}: {e}", config.id))
                })?;
                self.authenticate_key(&mut handle, &config.username, key)
                    .await?
            }
        };

        if !matches!(auth, AuthResult::Success) {
            return Err(DevhostError::AuthenticationFailed(config.id.clone()));
        }

        let handle = Arc::new(handle);
        let admitted = {
            let mut sessions = self.sessions.write().await;
            admit(&mut sessions, &config.id, handle.clone())
        };
        if !admitted {
            // A concurrent connect for the same id won the registration; this
            // transport must not stay open unregistered.
            let _ = handle
                .disconnect(Disconnect::ByApplication, "superseded", "en")
                .await;
            return Ok(ConnectOutcome::AlreadyConnected);
        }
        info!("session ready for host '{}'", config.id);

        // Deregister on asynchronous close, however the session was obtained.
        let sessions = self.sessions.clone();
        let id = config.id.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(CLOSE_POLL_INTERVAL).await;
                let registered = {
                    let map = sessions.read().await;
                    map.get(&id).is_some_and(|entry| Arc::ptr_eq(entry, &handle))
                };
                if !registered {
                    break;
                }
                if handle.is_closed() {
                    warn!("session for host '{id}' closed by transport");
                    sessions.write().await.remove(&id);
                    break;
                }
            }
        });

        Ok(ConnectOutcome::Connected)
    }

    async fn authenticate_key(
        &self,
        handle: &mut Handle<ClientHandler>,
        username: &str,
        key: russh::keys::PrivateKey,
    ) -> DevhostResult<AuthResult> {
        let hash = handle
            .best_supported_rsa_hash()
            .await
            .map_err(|e| DevhostError::Transport(e.to_string()))?
            .flatten();
        handle
            .authenticate_publickey(username, PrivateKeyWithHashAlg::new(Arc::new(key), hash))
            .await
            .map_err(|e| DevhostError::Transport(e.to_string()))
    }

    /// Close and deregister a session. Tolerates an absent or already-closed
    /// session.
    pub async fn disconnect(&self, id: &str) {
        if let Some(handle) = self.sessions.write().await.remove(id) {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "devhost disconnect", "en")
                .await;
            info!("session for host '{id}' closed");
        } else {
            debug!("disconnect for unknown host '{id}' ignored");
        }
    }

    /// Whether a ready session exists for the host id.
    pub async fn is_connected(&self, id: &str) -> bool {
        let sessions = self.sessions.read().await;
        sessions.get(id).is_some_and(|handle| !handle.is_closed())
    }

    /// Run one command on a ready session.
    ///
    /// Fails with `NotConnected` immediately when no ready session exists —
    /// strictly before any timeout elapses. The timeout cancels the local
    /// wait only; the remote command may still be executing.
    pub async fn exec(&self, id: &str, command: &str, timeout_ms: u64) -> DevhostResult<ExecOutput> {
        let handle = {
            let sessions = self.sessions.read().await;
            sessions.get(id).cloned()
        };
        let Some(handle) = handle else {
            return Err(DevhostError::NotConnected(id.to_string()));
        };
        if handle.is_closed() {
            self.sessions.write().await.remove(id);
            return Err(DevhostError::NotConnected(id.to_string()));
        }

        let run = run_command(&handle, command);
        match tokio::time::timeout(Duration::from_millis(timeout_ms), run).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => {
                // Transport failure: never leave a half-open entry behind.
                self.sessions.write().await.remove(id);
                Err(DevhostError::Transport(e.to_string()))
            }
            Err(_) => Err(DevhostError::Timeout(timeout_ms)),
        }
    }

    /// Ids of all registered sessions.
    pub async fn connected_hosts(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Close every session and drain the registry.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        for id in ids {
            self.disconnect(&id).await;
        }
    }
}

impl Default for SessionPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Issue one exec channel and accumulate its output until close.
async fn run_command(
    handle: &Handle<ClientHandler>,
    command: &str,
) -> Result<ExecOutput, russh::Error> {
    let mut channel = handle.channel_open_session().await?;
    channel.exec(true, command).await?;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut exit_code = None;

    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
            ChannelMsg::ExtendedData { ref data, ext: 1 } => stderr.extend_from_slice(data),
            ChannelMsg::ExitStatus { exit_status } => exit_code = Some(exit_status as i32),
            _ => {}
        }
    }

    Ok(ExecOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_code,
    })
}

/// Resolve a password that may be held in the platform secret store.
///
/// Lookup is lazy and best-effort: when the store is unavailable or the
/// lookup fails, the stored value is used as-is.
fn resolve_password(config: &HostConfig, raw: &str) -> String {
    if !config.password_encrypted {
        return raw.to_string();
    }
    match keyring::Entry::new(SECRET_SERVICE, &config.id).and_then(|entry| entry.get_password()) {
        Ok(password) => password,
        Err(e) => {
            warn!(
                "secret store lookup for host '{}' failed, using stored value: {e}",
                config.id
            );
            raw.to_string()
        }
    }
}
