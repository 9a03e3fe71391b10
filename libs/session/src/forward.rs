//! Port forwarding for one SSH connection.
//!
//! Three shapes: local binds tunneled to a remote endpoint over
//! direct-tcpip channels, remote binds the peer forwards back to a local
//! endpoint, and a local SOCKS5 bind for dynamic forwarding. Every entry
//! tracks its own status and last error; the enclosing session stops all
//! binds on disconnect and restarts the recoverable ones after a
//! reconnect.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicU64, Ordering};

use termweave_shared::{ForwardType, PortForwardConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::SessionError;
use crate::remote::{ForwardTargets, SshHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardStatus {
    Stopped,
    Active,
    Failed,
}

/// Read-only view of one entry for status displays.
#[derive(Debug, Clone)]
pub struct ForwardSnapshot {
    pub id: u64,
    pub config: PortForwardConfig,
    pub status: ForwardStatus,
    pub last_error: Option<String>,
}

struct ForwardEntry {
    config: PortForwardConfig,
    status: ForwardStatus,
    last_error: Option<String>,
    task: Option<JoinHandle<()>>,
    /// Set when the connection dropped underneath an active entry; such
    /// entries restart on reconnect even without `auto_start`.
    was_running: bool,
}

pub struct PortForwardManager {
    entries: Mutex<BTreeMap<u64, ForwardEntry>>,
    next_id: AtomicU64,
}

impl Default for PortForwardManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PortForwardManager {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Add an entry without starting it.
    pub async fn register(&self, config: PortForwardConfig) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().await.insert(
            id,
            ForwardEntry {
                config,
                status: ForwardStatus::Stopped,
                last_error: None,
                task: None,
                was_running: false,
            },
        );
        id
    }

    /// Register every profile entry and start the `auto_start` ones.
    /// Returns how many came up.
    pub async fn start_configured(
        &self,
        handle: &SshHandle,
        targets: &ForwardTargets,
        configs: &[PortForwardConfig],
    ) -> usize {
        let mut started = 0;
        for config in configs {
            let auto = config.auto_start;
            let id = self.register(config.clone()).await;
            if auto {
                match self.start(id, handle, targets).await {
                    Ok(()) => started += 1,
                    Err(e) => warn!(forward = %config.describe(), error = %e, "auto-start failed"),
                }
            }
        }
        started
    }

    /// Bring one entry up.
    pub async fn start(
        &self,
        id: u64,
        handle: &SshHandle,
        targets: &ForwardTargets,
    ) -> Result<(), SessionError> {
        let config = {
            let entries = self.entries.lock().await;
            let entry = entries
                .get(&id)
                .ok_or_else(|| SessionError::Forward(format!("no forward entry {id}")))?;
            if entry.status == ForwardStatus::Active {
                return Ok(());
            }
            entry.config.clone()
        };

        let outcome = match config.forward_type {
            ForwardType::Local => self.start_local(&config, handle).await,
            ForwardType::Remote => self.start_remote(&config, handle, targets).await,
            ForwardType::Dynamic => self.start_dynamic(&config, handle).await,
        };

        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(&id) {
            match outcome {
                Ok(task) => {
                    entry.status = ForwardStatus::Active;
                    entry.last_error = None;
                    entry.task = task;
                    info!(forward = %config.describe(), "forward active");
                    Ok(())
                }
                Err(e) => {
                    entry.status = ForwardStatus::Failed;
                    entry.last_error = Some(e.to_string());
                    Err(e)
                }
            }
        } else {
            outcome.map(|task| {
                if let Some(task) = task {
                    task.abort();
                }
            })
        }
    }

    async fn start_local(
        &self,
        config: &PortForwardConfig,
        handle: &SshHandle,
    ) -> Result<Option<JoinHandle<()>>, SessionError> {
        let listener = TcpListener::bind((config.local_bind.as_str(), config.local_port))
            .await
            .map_err(|e| {
                SessionError::Forward(format!(
                    "bind {}:{} failed: {e}",
                    config.local_bind, config.local_port
                ))
            })?;
        let handle = handle.clone();
        let remote_host = config.remote_host.clone();
        let remote_port = config.remote_port;

        let task = tokio::spawn(async move {
            loop {
                let (mut socket, peer) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "forward accept failed");
                        break;
                    }
                };
                let handle = handle.clone();
                let remote_host = remote_host.clone();
                tokio::spawn(async move {
                    let channel = {
                        let mut guard = handle.lock().await;
                        guard
                            .channel_open_direct_tcpip(
                                remote_host.as_str(),
                                remote_port as u32,
                                peer.ip().to_string(),
                                peer.port() as u32,
                            )
                            .await
                    };
                    match channel {
                        Ok(channel) => {
                            let mut stream = channel.into_stream();
                            let _ = tokio::io::copy_bidirectional(&mut stream, &mut socket).await;
                        }
                        Err(e) => {
                            debug!(error = %e, "direct-tcpip open failed");
                        }
                    }
                });
            }
        });
        Ok(Some(task))
    }

    async fn start_remote(
        &self,
        config: &PortForwardConfig,
        handle: &SshHandle,
        targets: &ForwardTargets,
    ) -> Result<Option<JoinHandle<()>>, SessionError> {
        targets
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(
                config.remote_port as u32,
                (config.local_bind.clone(), config.local_port),
            );
        {
            let mut guard = handle.lock().await;
            guard
                .tcpip_forward("0.0.0.0", config.remote_port as u32)
                .await
                .map_err(|e| {
                    targets
                        .lock()
                        .unwrap_or_else(|p| p.into_inner())
                        .remove(&(config.remote_port as u32));
                    SessionError::Forward(format!(
                        "remote bind on port {} failed: {e}",
                        config.remote_port
                    ))
                })?;
        }
        // Incoming connections arrive through the connection handler; no
        // local task to keep.
        Ok(None)
    }

    async fn start_dynamic(
        &self,
        config: &PortForwardConfig,
        handle: &SshHandle,
    ) -> Result<Option<JoinHandle<()>>, SessionError> {
        let listener = TcpListener::bind((config.local_bind.as_str(), config.local_port))
            .await
            .map_err(|e| {
                SessionError::Forward(format!(
                    "bind {}:{} failed: {e}",
                    config.local_bind, config.local_port
                ))
            })?;
        let handle = handle.clone();

        let task = tokio::spawn(async move {
            loop {
                let (socket, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "socks accept failed");
                        break;
                    }
                };
                let handle = handle.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_socks5(socket, handle).await {
                        trace!(error = %e, "socks connection ended");
                    }
                });
            }
        });
        Ok(Some(task))
    }

    /// Stop one entry and close its bind.
    pub async fn stop(&self, id: u64, targets: &ForwardTargets) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(&id) {
            if let Some(task) = entry.task.take() {
                task.abort();
            }
            if entry.config.forward_type == ForwardType::Remote {
                targets
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .remove(&(entry.config.remote_port as u32));
            }
            entry.status = ForwardStatus::Stopped;
            entry.was_running = false;
            debug!(forward = %entry.config.describe(), "forward stopped");
        }
    }

    /// Close every bind. With `mark_recoverable`, active entries are
    /// remembered so a reconnect can bring them back.
    pub async fn stop_all(&self, targets: &ForwardTargets, mark_recoverable: bool) {
        let mut entries = self.entries.lock().await;
        for entry in entries.values_mut() {
            let was_active = entry.status == ForwardStatus::Active;
            if let Some(task) = entry.task.take() {
                task.abort();
            }
            entry.status = ForwardStatus::Stopped;
            entry.was_running = mark_recoverable && was_active;
        }
        targets.lock().unwrap_or_else(|p| p.into_inner()).clear();
        debug!("all forwards stopped");
    }

    /// After a reconnect: restart `auto_start` entries plus the ones that
    /// were running when the connection dropped. Returns descriptions of
    /// the recovered (previously running) entries.
    pub async fn restart_recoverable(
        &self,
        handle: &SshHandle,
        targets: &ForwardTargets,
    ) -> Vec<String> {
        let candidates: Vec<(u64, bool, String)> = {
            let entries = self.entries.lock().await;
            entries
                .iter()
                .filter(|(_, e)| {
                    e.status != ForwardStatus::Active && (e.config.auto_start || e.was_running)
                })
                .map(|(id, e)| (*id, e.was_running, e.config.describe()))
                .collect()
        };

        let mut recovered = Vec::new();
        for (id, was_running, description) in candidates {
            match self.start(id, handle, targets).await {
                Ok(()) => {
                    if was_running {
                        recovered.push(description);
                    }
                    if let Some(entry) = self.entries.lock().await.get_mut(&id) {
                        entry.was_running = false;
                    }
                }
                Err(e) => warn!(forward = %description, error = %e, "restart failed"),
            }
        }
        recovered
    }

    pub async fn snapshots(&self) -> Vec<ForwardSnapshot> {
        let entries = self.entries.lock().await;
        entries
            .iter()
            .map(|(id, e)| ForwardSnapshot {
                id: *id,
                config: e.config.clone(),
                status: e.status,
                last_error: e.last_error.clone(),
            })
            .collect()
    }
}

/// Minimal SOCKS5 server side: no-auth negotiation, CONNECT only, then a
/// direct-tcpip bridge through the SSH transport.
async fn serve_socks5(mut socket: TcpStream, handle: SshHandle) -> std::io::Result<()> {
    let mut greeting = [0u8; 2];
    socket.read_exact(&mut greeting).await?;
    if greeting[0] != 0x05 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "not a SOCKS5 client",
        ));
    }
    let mut methods = vec![0u8; greeting[1] as usize];
    socket.read_exact(&mut methods).await?;
    socket.write_all(&[0x05, 0x00]).await?;

    let mut request = [0u8; 4];
    socket.read_exact(&mut request).await?;
    if request[1] != 0x01 {
        // Command not supported.
        socket
            .write_all(&[0x05, 0x07, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
            .await?;
        return Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "only CONNECT is supported",
        ));
    }

    let target_host = match request[3] {
        0x01 => {
            let mut addr = [0u8; 4];
            socket.read_exact(&mut addr).await?;
            Ipv4Addr::from(addr).to_string()
        }
        0x03 => {
            let mut len = [0u8; 1];
            socket.read_exact(&mut len).await?;
            let mut name = vec![0u8; len[0] as usize];
            socket.read_exact(&mut name).await?;
            String::from_utf8_lossy(&name).into_owned()
        }
        0x04 => {
            let mut addr = [0u8; 16];
            socket.read_exact(&mut addr).await?;
            Ipv6Addr::from(addr).to_string()
        }
        _ => {
            socket
                .write_all(&[0x05, 0x08, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await?;
            return Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "unknown address type",
            ));
        }
    };
    let mut port_bytes = [0u8; 2];
    socket.read_exact(&mut port_bytes).await?;
    let target_port = u16::from_be_bytes(port_bytes);

    let channel = {
        let mut guard = handle.lock().await;
        guard
            .channel_open_direct_tcpip(target_host.as_str(), target_port as u32, "127.0.0.1", 0)
            .await
    };
    let channel = match channel {
        Ok(channel) => channel,
        Err(e) => {
            socket
                .write_all(&[0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await?;
            return Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                e.to_string(),
            ));
        }
    };

    socket
        .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
        .await?;
    let mut stream = channel.into_stream();
    let _ = tokio::io::copy_bidirectional(&mut stream, &mut socket).await;
    Ok(())
}
