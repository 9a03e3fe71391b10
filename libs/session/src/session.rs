//! Common contract for local and SSH sessions.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use termweave_shared::ShellKind;
use tokio::sync::{broadcast, watch};

use crate::error::SessionError;

/// Applied when `execute` is called with no timeout, or with a zero
/// timeout (the "use the default" convention).
pub const DEFAULT_EXECUTE_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolve a caller-supplied timeout to the effective one.
pub fn effective_timeout(timeout: Option<Duration>) -> Duration {
    match timeout {
        Some(t) if !t.is_zero() => t,
        _ => DEFAULT_EXECUTE_TIMEOUT,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionKind {
    LocalShell(ShellKind),
    Ssh,
}

impl SessionKind {
    pub fn is_ssh(&self) -> bool {
        matches!(self, SessionKind::Ssh)
    }
}

/// One chunk of output from a session, in arrival order.
///
/// `clean` has escape sequences removed; `raw` preserves them for the
/// interactive renderer. `is_error_channel` is only true for the stderr
/// reader of a fallback-mode local session and SSH extended data —
/// pseudo-console output is merged by the OS.
#[derive(Debug, Clone)]
pub struct OutputEvent {
    pub session_id: String,
    pub is_error_channel: bool,
    pub clean: String,
    pub raw: String,
    pub timestamp: DateTime<Utc>,
}

impl OutputEvent {
    pub fn new(session_id: &str, clean: String, raw: String, is_error_channel: bool) -> Self {
        Self {
            session_id: session_id.to_string(),
            is_error_channel,
            clean,
            raw,
            timestamp: Utc::now(),
        }
    }
}

/// Outcome of one `execute` call.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub output: String,
    pub error: String,
    pub exit_code: i32,
    pub duration: Duration,
    pub current_directory: String,
    pub is_timeout: bool,
}

impl CommandResult {
    /// The immediate result for an `execute` on a session that is not
    /// connected: nothing was dispatched.
    pub fn disconnected(current_directory: &str) -> Self {
        Self {
            output: String::new(),
            error: "session is not connected".to_string(),
            exit_code: -1,
            duration: Duration::ZERO,
            current_directory: current_directory.to_string(),
            is_timeout: false,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.is_timeout
    }
}

/// Keys that need their VT encoding when forwarded in interactive mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialKey {
    Tab,
    Enter,
    Escape,
    Backspace,
    ArrowUp,
    ArrowDown,
    ArrowRight,
    ArrowLeft,
    Home,
    End,
    PageUp,
    PageDown,
    Delete,
    CtrlC,
    CtrlD,
    CtrlZ,
}

impl SpecialKey {
    pub fn bytes(&self) -> &'static [u8] {
        match self {
            SpecialKey::Tab => b"\t",
            SpecialKey::Enter => b"\r",
            SpecialKey::Escape => b"\x1b",
            SpecialKey::Backspace => b"\x7f",
            SpecialKey::ArrowUp => b"\x1b[A",
            SpecialKey::ArrowDown => b"\x1b[B",
            SpecialKey::ArrowRight => b"\x1b[C",
            SpecialKey::ArrowLeft => b"\x1b[D",
            SpecialKey::Home => b"\x1b[H",
            SpecialKey::End => b"\x1b[F",
            SpecialKey::PageUp => b"\x1b[5~",
            SpecialKey::PageDown => b"\x1b[6~",
            SpecialKey::Delete => b"\x1b[3~",
            SpecialKey::CtrlC => b"\x03",
            SpecialKey::CtrlD => b"\x04",
            SpecialKey::CtrlZ => b"\x1a",
        }
    }
}

/// Contract shared by [`crate::local::LocalSession`] and
/// [`crate::remote::SshSession`].
///
/// Implementations guarantee: disposal is idempotent; no output events are
/// published after disposal; and the state watch reaches `Connected`
/// before the first connected-mode event so observers never race.
#[async_trait]
pub trait TerminalSession: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> SessionKind;

    fn display_name(&self) -> String;

    /// Human-readable shell flavor ("PowerShell", "bash", "ssh").
    fn shell_type(&self) -> String;

    /// Name of the SSH profile backing this session, when there is one.
    /// Persisted in the restore descriptor.
    fn profile_name(&self) -> Option<String> {
        None
    }

    /// True when the local host fell back to redirected pipes because no
    /// pseudo-console was available. Resize and interactive mode degrade.
    fn fallback_mode(&self) -> bool {
        false
    }

    /// The single source of truth for the connection lifecycle.
    fn state(&self) -> watch::Receiver<SessionState>;

    /// Tracked working directory (updated by `cd` parsing locally, `pwd`
    /// probes remotely).
    fn current_directory(&self) -> String;

    fn subscribe_output(&self) -> broadcast::Receiver<OutputEvent>;

    async fn connect(&self) -> Result<(), SessionError>;

    async fn disconnect(&self);

    /// Run one command to completion. A `None` or zero timeout means
    /// [`DEFAULT_EXECUTE_TIMEOUT`]. On a disconnected session this returns
    /// immediately with a negative exit code and no dispatch.
    async fn execute(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandResult, SessionError>;

    /// Forward text verbatim (interactive keystrokes, escape sequences).
    async fn write_raw(&self, text: &str) -> Result<(), SessionError>;

    async fn send_special_key(&self, key: SpecialKey) -> Result<(), SessionError> {
        let bytes = key.bytes();
        self.write_raw(std::str::from_utf8(bytes).unwrap_or_default())
            .await
    }

    /// Interrupt whatever is running (Ctrl-C to a PTY child, kill in
    /// fallback mode).
    async fn cancel_current(&self) -> Result<(), SessionError>;

    /// Tear down: cancel, terminate the child/channel, release handles.
    async fn dispose(&self);

    /// Tab focus hooks. Sessions resume/pause expensive observers here.
    fn on_activated(&self) {}

    fn on_deactivated(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_timeout_means_default() {
        assert_eq!(effective_timeout(None), DEFAULT_EXECUTE_TIMEOUT);
        assert_eq!(
            effective_timeout(Some(Duration::ZERO)),
            DEFAULT_EXECUTE_TIMEOUT
        );
        assert_eq!(
            effective_timeout(Some(Duration::from_secs(5))),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn disconnected_result_shape() {
        let result = CommandResult::disconnected("/var/tmp");
        assert_eq!(result.exit_code, -1);
        assert!(!result.success());
        assert!(result.error.contains("not connected"));
        assert_eq!(result.current_directory, "/var/tmp");
    }

    #[test]
    fn special_keys_have_vt_encodings() {
        assert_eq!(SpecialKey::ArrowUp.bytes(), b"\x1b[A");
        assert_eq!(SpecialKey::CtrlC.bytes(), &[0x03]);
        assert_eq!(SpecialKey::Tab.bytes(), b"\t");
    }
}
