//! SSH session host.
//!
//! Opens a `russh` transport, authenticates from the profile (stored
//! password ciphertext or an OpenSSH key file), and drives a single shell
//! channel with PTY attributes. Commands on the shell stream are
//! delimited by a prompt marker carrying `$?`, so exit codes survive the
//! merged PTY stream; one-off commands can instead run on ephemeral exec
//! channels. Each connection also owns a port-forward manager.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use russh::client::{self, AuthResult, Handler};
use russh::{ChannelMsg, Disconnect};
use termweave_shared::{AuthMethod, SecretStore, SshProfile};
use termweave_shared::helper::generate_simple_id;
use tokio::sync::{Mutex, broadcast, watch};
use tracing::{debug, info, trace, warn};

use crate::decode::StreamDecoder;
use crate::error::SessionError;
use crate::forward::PortForwardManager;
use crate::local::trim_command_echo;
use crate::session::{
    CommandResult, OutputEvent, SessionKind, SessionState, TerminalSession, effective_timeout,
};

/// Literal the host appends to every shell-stream command; the digits that
/// follow it in the output are the command's exit code.
pub const PROMPT_MARKER: &str = "###PROMPT_END###";

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// PTY attributes of the shell channel.
const TERM: &str = "xterm-256color";
const PTY_COLS: u32 = 120;
const PTY_ROWS: u32 = 30;

/// How long the pump holds the channel lock waiting for one message.
const PUMP_WAIT: Duration = Duration::from_millis(100);

/// Local endpoints for active remote forwards, keyed by the remote bind
/// port. The connection handler consults this when the peer opens a
/// forwarded channel back to us.
pub(crate) type ForwardTargets = Arc<StdMutex<HashMap<u32, (String, u16)>>>;

pub struct ClientHandler {
    forward_targets: ForwardTargets,
}

impl Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: russh::Channel<client::Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        let target = self
            .forward_targets
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&connected_port)
            .cloned();
        let Some((host, port)) = target else {
            debug!(
                connected_address,
                connected_port, "forwarded channel with no registered target"
            );
            return Ok(());
        };
        trace!(
            originator_address,
            originator_port, host, port, "bridging forwarded channel"
        );
        tokio::spawn(async move {
            match tokio::net::TcpStream::connect((host.as_str(), port)).await {
                Ok(mut tcp) => {
                    let mut stream = channel.into_stream();
                    let _ = tokio::io::copy_bidirectional(&mut stream, &mut tcp).await;
                }
                Err(e) => {
                    warn!(host, port, error = %e, "remote forward target unreachable");
                }
            }
        });
        Ok(())
    }
}

pub(crate) type SshHandle = Arc<Mutex<client::Handle<ClientHandler>>>;

struct SshChannels {
    handle: SshHandle,
    shell: Arc<Mutex<russh::Channel<client::Msg>>>,
}

pub struct SshSession {
    id: String,
    profile: SshProfile,
    secrets: Arc<SecretStore>,
    state_tx: watch::Sender<SessionState>,
    output_tx: broadcast::Sender<OutputEvent>,
    /// Transport and shell channel, present exactly while connected.
    channels: Arc<Mutex<Option<SshChannels>>>,
    forwards: Arc<PortForwardManager>,
    forward_targets: ForwardTargets,
    cwd: Arc<StdMutex<String>>,
    disposed: Arc<AtomicBool>,
    /// Shell-stream commands are serialized; concurrent executes wait here.
    exec_lock: Mutex<()>,
}

impl SshSession {
    pub fn new(profile: SshProfile, secrets: Arc<SecretStore>) -> Self {
        let id = format!("ssh-{}", generate_simple_id(8));
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        let (output_tx, _) = broadcast::channel(1024);
        let forward_targets: ForwardTargets = Arc::new(StdMutex::new(HashMap::new()));

        Self {
            id,
            profile,
            secrets,
            state_tx,
            output_tx,
            channels: Arc::new(Mutex::new(None)),
            forwards: Arc::new(PortForwardManager::new()),
            forward_targets,
            cwd: Arc::new(StdMutex::new("~".to_string())),
            disposed: Arc::new(AtomicBool::new(false)),
            exec_lock: Mutex::new(()),
        }
    }

    pub fn profile(&self) -> &SshProfile {
        &self.profile
    }

    pub fn forwards(&self) -> Arc<PortForwardManager> {
        Arc::clone(&self.forwards)
    }

    fn is_connected(&self) -> bool {
        *self.state_tx.borrow() == SessionState::Connected
    }

    fn current_cwd(&self) -> String {
        self.cwd
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    async fn authenticate(
        &self,
        handle: &mut client::Handle<ClientHandler>,
    ) -> Result<(), SessionError> {
        match &self.profile.auth {
            AuthMethod::Password { ciphertext } => {
                let password = self.secrets.decrypt(ciphertext)?;
                let result = handle
                    .authenticate_password(&self.profile.username, &password)
                    .await
                    .map_err(|e| SessionError::AuthFailed(format!("password auth: {e}")))?;
                match result {
                    AuthResult::Success => Ok(()),
                    _ => Err(SessionError::AuthFailed(
                        "server rejected the password".to_string(),
                    )),
                }
            }
            AuthMethod::PrivateKey {
                key_path,
                passphrase_ciphertext,
            } => {
                // PuTTY keys are a different container format; russh reads
                // OpenSSH/PKCS#8 only.
                if key_path.to_lowercase().ends_with(".ppk") {
                    return Err(SessionError::KeyError(format!(
                        "{key_path}: PuTTY .ppk keys are not supported, export an OpenSSH key \
                         (puttygen key.ppk -O private-openssh)"
                    )));
                }
                let passphrase = match passphrase_ciphertext {
                    Some(ct) => Some(self.secrets.decrypt(ct)?),
                    None => None,
                };
                let keypair = russh::keys::load_secret_key(key_path, passphrase.as_deref())
                    .map_err(|e| SessionError::KeyError(format!("{key_path}: {e}")))?;
                let result = handle
                    .authenticate_publickey(
                        &self.profile.username,
                        russh::keys::PrivateKeyWithHashAlg::new(
                            Arc::new(keypair),
                            Some(russh::keys::HashAlg::Sha256),
                        ),
                    )
                    .await
                    .map_err(|e| SessionError::AuthFailed(format!("public key auth: {e}")))?;
                match result {
                    AuthResult::Success => Ok(()),
                    _ => Err(SessionError::AuthFailed(
                        "server rejected the key".to_string(),
                    )),
                }
            }
        }
    }

    /// Pump the shell channel: decode everything that arrives and publish
    /// it as output events. Holds the channel lock only while polling so
    /// writers can interleave.
    fn spawn_pump(&self, shell: Arc<Mutex<russh::Channel<client::Msg>>>) {
        let session_id = self.id.clone();
        let output_tx = self.output_tx.clone();
        let disposed = Arc::clone(&self.disposed);
        let state_tx = self.state_tx.clone();
        let channels = Arc::clone(&self.channels);

        tokio::spawn(async move {
            let mut decoder = StreamDecoder::new();
            loop {
                if disposed.load(Ordering::SeqCst) {
                    break;
                }
                let msg = {
                    let mut channel = shell.lock().await;
                    match tokio::time::timeout(PUMP_WAIT, channel.wait()).await {
                        Ok(msg) => msg,
                        Err(_) => continue,
                    }
                };
                match msg {
                    Some(ChannelMsg::Data { data }) => {
                        let chunk = decoder.feed(&data);
                        if !chunk.is_empty() && !disposed.load(Ordering::SeqCst) {
                            let _ = output_tx.send(OutputEvent::new(
                                &session_id,
                                chunk.clean,
                                chunk.raw,
                                false,
                            ));
                        }
                    }
                    Some(ChannelMsg::ExtendedData { data, .. }) => {
                        let chunk = decoder.feed(&data);
                        if !chunk.is_empty() && !disposed.load(Ordering::SeqCst) {
                            let _ = output_tx.send(OutputEvent::new(
                                &session_id,
                                chunk.clean,
                                chunk.raw,
                                true,
                            ));
                        }
                    }
                    Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                        if !disposed.load(Ordering::SeqCst) {
                            warn!(session_id = %session_id, "shell channel closed by peer");
                            // Connected implies live handles; drop them with
                            // the state flip.
                            channels.lock().await.take();
                            let _ = state_tx.send(SessionState::Disconnected);
                        }
                        break;
                    }
                    Some(_) => {}
                }
            }
            trace!(session_id = %session_id, "shell pump exited");
        });
    }

    /// Run one command over a fresh exec channel. Loses shell state, but
    /// needs no marker and yields the real exit status.
    pub async fn execute_ephemeral(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandResult, SessionError> {
        if !self.is_connected() {
            return Ok(CommandResult::disconnected(&self.current_cwd()));
        }
        let timeout = effective_timeout(timeout);
        let started = Instant::now();

        let handle = {
            let guard = self.channels.lock().await;
            match guard.as_ref() {
                Some(channels) => Arc::clone(&channels.handle),
                None => return Ok(CommandResult::disconnected(&self.current_cwd())),
            }
        };

        let result = tokio::time::timeout(timeout, async {
            let mut channel = {
                let mut handle = handle.lock().await;
                handle
                    .channel_open_session()
                    .await
                    .map_err(|e| SessionError::SshError(format!("exec channel: {e}")))?
            };
            channel
                .exec(true, command)
                .await
                .map_err(|e| SessionError::SshError(format!("exec request: {e}")))?;

            let mut decoder = StreamDecoder::new();
            let mut err_decoder = StreamDecoder::new();
            let mut output = String::new();
            let mut error = String::new();
            let mut exit_code = 0i32;
            loop {
                match channel.wait().await {
                    Some(ChannelMsg::Data { data }) => {
                        output.push_str(&decoder.feed(&data).clean);
                    }
                    Some(ChannelMsg::ExtendedData { data, .. }) => {
                        error.push_str(&err_decoder.feed(&data).clean);
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        exit_code = exit_status as i32;
                    }
                    Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => break,
                    Some(_) => {}
                }
            }
            output.push_str(&decoder.flush().clean);
            error.push_str(&err_decoder.flush().clean);
            Ok::<_, SessionError>((output, error, exit_code))
        })
        .await;

        match result {
            Ok(Ok((output, error, exit_code))) => Ok(CommandResult {
                output,
                error,
                exit_code,
                duration: started.elapsed(),
                current_directory: self.current_cwd(),
                is_timeout: false,
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(CommandResult {
                output: String::new(),
                error: format!("command timed out after {timeout:?}"),
                exit_code: -1,
                duration: started.elapsed(),
                current_directory: self.current_cwd(),
                is_timeout: true,
            }),
        }
    }

    async fn refresh_cwd(&self) {
        match self.execute_ephemeral("pwd", Some(Duration::from_secs(5))).await {
            Ok(result) if result.exit_code == 0 => {
                let pwd = result.output.trim();
                if !pwd.is_empty() && pwd.starts_with('/') {
                    *self.cwd.lock().unwrap_or_else(|p| p.into_inner()) = pwd.to_string();
                }
            }
            Ok(_) => {}
            Err(e) => debug!(session_id = %self.id, error = %e, "pwd probe failed"),
        }
    }

    /// Restart forwards after a reconnect: `auto_start` entries plus
    /// whatever was running when the connection dropped. Returns the
    /// descriptions of recovered entries.
    pub async fn restore_forwards(&self) -> Vec<String> {
        let handle = {
            let guard = self.channels.lock().await;
            match guard.as_ref() {
                Some(channels) => Arc::clone(&channels.handle),
                None => return Vec::new(),
            }
        };
        self.forwards
            .restart_recoverable(&handle, &self.forward_targets)
            .await
    }
}

#[async_trait]
impl TerminalSession for SshSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SessionKind {
        SessionKind::Ssh
    }

    fn display_name(&self) -> String {
        format!("{}@{}", self.profile.username, self.profile.host)
    }

    fn shell_type(&self) -> String {
        "ssh".to_string()
    }

    fn profile_name(&self) -> Option<String> {
        Some(self.profile.profile_name.clone())
    }

    fn state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    fn current_directory(&self) -> String {
        self.current_cwd()
    }

    fn subscribe_output(&self) -> broadcast::Receiver<OutputEvent> {
        self.output_tx.subscribe()
    }

    async fn connect(&self) -> Result<(), SessionError> {
        if self.is_connected() {
            return Ok(());
        }
        if self.disposed.load(Ordering::SeqCst) {
            return Err(SessionError::Disconnected(self.id.clone()));
        }
        let _ = self.state_tx.send(SessionState::Connecting);

        let connect_result = async {
            let config = Arc::new(client::Config::default());
            let handler = ClientHandler {
                forward_targets: Arc::clone(&self.forward_targets),
            };
            let mut handle = tokio::time::timeout(
                HANDSHAKE_TIMEOUT,
                client::connect(
                    config,
                    (self.profile.host.as_str(), self.profile.port),
                    handler,
                ),
            )
            .await
            .map_err(|_| SessionError::ConnectTimeout(HANDSHAKE_TIMEOUT))?
            .map_err(|e| SessionError::SshError(format!("connection failed: {e}")))?;

            self.authenticate(&mut handle).await?;

            let channel = handle
                .channel_open_session()
                .await
                .map_err(|e| SessionError::SshError(format!("failed to open channel: {e}")))?;
            channel
                .request_pty(true, TERM, PTY_COLS, PTY_ROWS, 0, 0, &[])
                .await
                .map_err(|e| SessionError::SshError(format!("failed to request PTY: {e}")))?;
            channel
                .request_shell(true)
                .await
                .map_err(|e| SessionError::SshError(format!("failed to request shell: {e}")))?;

            Ok::<_, SessionError>((handle, channel))
        }
        .await;

        let (handle, channel) = match connect_result {
            Ok(pair) => pair,
            Err(e) => {
                let _ = self.state_tx.send(SessionState::Error);
                return Err(e);
            }
        };

        let handle = Arc::new(Mutex::new(handle));
        let shell = Arc::new(Mutex::new(channel));
        {
            let mut guard = self.channels.lock().await;
            *guard = Some(SshChannels {
                handle: Arc::clone(&handle),
                shell: Arc::clone(&shell),
            });
        }

        // State flips before the pump can publish anything.
        let _ = self.state_tx.send(SessionState::Connected);
        self.spawn_pump(shell);

        let auto_started = self
            .forwards
            .start_configured(&handle, &self.forward_targets, &self.profile.port_forwardings)
            .await;
        if auto_started > 0 {
            info!(session_id = %self.id, auto_started, "auto-start forwards up");
        }

        self.refresh_cwd().await;
        info!(
            session_id = %self.id,
            host = %self.profile.host,
            "ssh session connected"
        );
        Ok(())
    }

    async fn disconnect(&self) {
        self.forwards.stop_all(&self.forward_targets, true).await;
        let channels = self.channels.lock().await.take();
        if let Some(channels) = channels {
            {
                let mut shell = channels.shell.lock().await;
                let _ = shell.eof().await;
                let _ = shell.close().await;
            }
            let mut handle = channels.handle.lock().await;
            let _ = handle
                .disconnect(Disconnect::ByApplication, "", "English")
                .await;
        }
        let _ = self.state_tx.send(SessionState::Disconnected);
        info!(session_id = %self.id, "ssh session disconnected");
    }

    async fn execute(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandResult, SessionError> {
        if !self.is_connected() {
            return Ok(CommandResult::disconnected(&self.current_cwd()));
        }
        let _guard = self.exec_lock.lock().await;
        let timeout = effective_timeout(timeout);
        let started = Instant::now();

        let mut rx = self.output_tx.subscribe();

        {
            let guard = self.channels.lock().await;
            let Some(channels) = guard.as_ref() else {
                return Ok(CommandResult::disconnected(&self.current_cwd()));
            };
            let shell = channels.shell.lock().await;
            let line = format!("{}; echo '{}'$?\n", command.trim_end(), PROMPT_MARKER);
            shell
                .data(line.as_bytes())
                .await
                .map_err(|e| SessionError::SshError(format!("failed to send command: {e}")))?;
        }
        trace!(session_id = %self.id, command, "sent command to shell stream");

        let collected = collect_until_marker(&mut rx, timeout).await;
        let accumulated = collected.accumulated;

        let duration = started.elapsed();
        let result = match collected.hit {
            Some((marker_start, exit_code)) => {
                let before = accumulated.get(..marker_start).unwrap_or("");
                let output = trim_command_echo(before, command);
                debug!(
                    session_id = %self.id,
                    exit_code,
                    duration_ms = duration.as_millis() as u64,
                    "shell-stream command completed"
                );
                CommandResult {
                    output,
                    error: String::new(),
                    exit_code,
                    duration,
                    current_directory: self.current_cwd(),
                    is_timeout: false,
                }
            }
            None => {
                // Marker never arrived: keep the stream alive and hand back
                // whatever was produced.
                let output = trim_command_echo(&accumulated, command);
                warn!(session_id = %self.id, timeout_ms = timeout.as_millis() as u64, "shell-stream command timed out");
                CommandResult {
                    output,
                    error: String::new(),
                    exit_code: -1,
                    duration,
                    current_directory: self.current_cwd(),
                    is_timeout: true,
                }
            }
        };

        if result.exit_code == 0 {
            self.refresh_cwd().await;
        }
        Ok(result)
    }

    async fn write_raw(&self, text: &str) -> Result<(), SessionError> {
        let guard = self.channels.lock().await;
        let Some(channels) = guard.as_ref() else {
            return Err(SessionError::Disconnected(self.id.clone()));
        };
        let shell = channels.shell.lock().await;
        shell
            .data(text.as_bytes())
            .await
            .map_err(|e| SessionError::SshError(format!("write failed: {e}")))
    }

    async fn cancel_current(&self) -> Result<(), SessionError> {
        self.write_raw("\x03").await
    }

    async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.disconnect().await;
        info!(session_id = %self.id, "ssh session disposed");
    }
}

pub(crate) struct MarkerCollect {
    pub accumulated: String,
    /// `(marker byte offset, exit code)` when the marker arrived in time.
    pub hit: Option<(usize, i32)>,
}

/// Drain clean output events until the completion marker shows up or the
/// deadline passes. On timeout the partial accumulation is preserved.
pub(crate) async fn collect_until_marker(
    rx: &mut broadcast::Receiver<OutputEvent>,
    timeout: Duration,
) -> MarkerCollect {
    let deadline = Instant::now() + timeout;
    let mut accumulated = String::new();
    let hit = loop {
        let now = Instant::now();
        if now >= deadline {
            break None;
        }
        match tokio::time::timeout(deadline - now, rx.recv()).await {
            Ok(Ok(event)) => {
                if !event.is_error_channel {
                    accumulated.push_str(&event.clean);
                }
                if let Some(hit) = find_marker_exit(&accumulated) {
                    break Some(hit);
                }
            }
            Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                warn!(skipped, "marker collection lagged behind the stream");
            }
            Ok(Err(broadcast::error::RecvError::Closed)) => break None,
            Err(_) => break None,
        }
    };
    MarkerCollect { accumulated, hit }
}

/// Locate the completion marker followed by the exit code digits.
/// Returns `(byte offset of the marker, exit code)`.
///
/// The echoed command line contains the marker too, but quoted and
/// followed by `$?` rather than digits, so requiring digits right after
/// the literal skips it.
fn find_marker_exit(accumulated: &str) -> Option<(usize, i32)> {
    let mut search_from = 0;
    while let Some(rel) = accumulated.get(search_from..)?.find(PROMPT_MARKER) {
        let start = search_from + rel;
        let after = start + PROMPT_MARKER.len();
        let digits: String = accumulated
            .get(after..)?
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if !digits.is_empty() {
            // Digits must be complete: require a non-digit (or enough
            // lookahead) after them so "12" is not a truncated "120".
            let has_terminator = accumulated
                .get(after + digits.len()..)
                .is_some_and(|rest| !rest.is_empty());
            if has_terminator || digits.len() >= 3 {
                if let Ok(code) = digits.parse::<i32>() {
                    return Some((start, code));
                }
            }
        }
        search_from = after;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_with_exit_code_is_found() {
        let text = "abc\n###PROMPT_END###0\n";
        let (start, code) = find_marker_exit(text).unwrap();
        assert_eq!(code, 0);
        assert_eq!(&text[..start], "abc\n");
    }

    #[test]
    fn echoed_command_marker_is_skipped() {
        // The echo of the command itself carries `'$?` after the literal.
        let text = "ls; echo '###PROMPT_END###'$?\nfile.txt\n###PROMPT_END###0\n";
        let (start, code) = find_marker_exit(text).unwrap();
        assert_eq!(code, 0);
        assert!(text[..start].contains("file.txt"));
    }

    #[test]
    fn nonzero_exit_code_is_parsed() {
        let text = "boom\n###PROMPT_END###127\n";
        let (_, code) = find_marker_exit(text).unwrap();
        assert_eq!(code, 127);
    }

    #[test]
    fn marker_without_digits_is_not_a_hit() {
        let text = "echo '###PROMPT_END###'$?";
        assert!(find_marker_exit(text).is_none());
    }

    #[test]
    fn trailing_digits_without_terminator_wait_for_more() {
        // "1" might be the first digit of "127"; without a following byte
        // the scan must not conclude yet.
        let text = "out\n###PROMPT_END###1";
        assert!(find_marker_exit(text).is_none());
        let complete = "out\n###PROMPT_END###1\n";
        let (_, code) = find_marker_exit(complete).unwrap();
        assert_eq!(code, 1);
    }

    #[test]
    fn user_output_containing_random_text_does_not_confuse_extraction() {
        // A command that prints an arbitrary string plus the real marker.
        let text = "echo x9f3k; echo '###PROMPT_END###'$?\nx9f3k\n###PROMPT_END###0\n";
        let (start, code) = find_marker_exit(text).unwrap();
        assert_eq!(code, 0);
        let body = trim_command_echo(&text[..start], "echo x9f3k");
        assert_eq!(body, "x9f3k");
    }

    #[tokio::test]
    async fn marker_collection_extracts_echoed_shell_output() {
        // A shell stream that echoes the command, prints `abc`, then the
        // marker with the substituted exit code.
        let (tx, mut rx) = broadcast::channel(16);
        tokio::spawn(async move {
            for chunk in [
                "ls; echo '###PROMPT_END###'$?\r\n",
                "abc\r\n",
                "###PROMPT_END###0\r\n",
            ] {
                let _ = tx.send(OutputEvent::new(
                    "s1",
                    chunk.to_string(),
                    chunk.to_string(),
                    false,
                ));
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let collected = collect_until_marker(&mut rx, Duration::from_secs(2)).await;
        let (start, code) = collected.hit.expect("marker should be found");
        assert_eq!(code, 0);
        let body = trim_command_echo(collected.accumulated.get(..start).unwrap_or(""), "ls");
        assert_eq!(body.trim(), "abc");
    }

    #[tokio::test]
    async fn timeout_preserves_partial_output_without_marker() {
        // The stream emits `partial` and then stalls forever.
        let (tx, mut rx) = broadcast::channel(16);
        let _keep_alive = tx.clone();
        let _ = tx.send(OutputEvent::new(
            "s1",
            "partial\n".to_string(),
            "partial\n".to_string(),
            false,
        ));

        let started = Instant::now();
        let collected = collect_until_marker(&mut rx, Duration::from_millis(500)).await;
        assert!(collected.hit.is_none(), "no marker, no hit");
        assert_eq!(collected.accumulated, "partial\n");
        assert!(
            started.elapsed() >= Duration::from_millis(450),
            "should have waited out the timeout"
        );
    }

    #[tokio::test]
    async fn execute_on_disconnected_session_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let secrets = Arc::new(SecretStore::open_at(dir.path()).unwrap());
        let profile = SshProfile {
            profile_name: "test".to_string(),
            host: "127.0.0.1".to_string(),
            port: 22,
            username: "nobody".to_string(),
            auth: AuthMethod::Password {
                ciphertext: secrets.encrypt("pw").unwrap(),
            },
            port_forwardings: Vec::new(),
            is_favorite: false,
            last_connected: None,
        };
        let session = SshSession::new(profile, secrets);
        let result = session.execute("ls", None).await.unwrap();
        assert_eq!(result.exit_code, -1);
        assert!(result.error.contains("not connected"));
    }

    #[tokio::test]
    async fn ppk_keys_are_rejected_with_guidance() {
        let dir = tempfile::tempdir().unwrap();
        let secrets = Arc::new(SecretStore::open_at(dir.path()).unwrap());
        let profile = SshProfile {
            profile_name: "putty".to_string(),
            host: "127.0.0.1".to_string(),
            port: 1, // nothing listens here; auth must fail before use anyway
            username: "dev".to_string(),
            auth: AuthMethod::PrivateKey {
                key_path: "/keys/id.ppk".to_string(),
                passphrase_ciphertext: None,
            },
            port_forwardings: Vec::new(),
            is_favorite: false,
            last_connected: None,
        };
        let session = SshSession::new(profile, secrets);
        // Connect fails fast at the TCP layer or the key check; either way
        // the session must land in the error state without handles.
        let err = session.connect().await.unwrap_err();
        let message = err.to_string();
        assert!(
            message.contains("ppk") || message.contains("connection failed"),
            "unexpected error: {message}"
        );
        assert_eq!(*session.state().borrow(), SessionState::Error);
        assert!(session.channels.lock().await.is_none());
    }
}
