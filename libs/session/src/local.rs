//! Local shell host on a pseudo-console.
//!
//! Spawns the configured shell attached to a PTY via `portable-pty` and
//! streams its output through the stateful decoder. When no pseudo-console
//! is available the host falls back to a plain child process with
//! redirected pipes; the weaker semantics (no resize, no VT, separate
//! stderr) are surfaced through [`TerminalSession::fallback_mode`].

use std::io::{ErrorKind, Read, Write};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};
use termweave_shared::ShellKind;
use termweave_shared::helper::generate_simple_id;
use tokio::sync::{Mutex, broadcast, watch};
use tracing::{debug, info, trace, warn};

use crate::decode::StreamDecoder;
use crate::error::SessionError;
use crate::session::{
    CommandResult, OutputEvent, SessionKind, SessionState, TerminalSession, effective_timeout,
};

/// Initial pseudo-console dimensions.
const DEFAULT_COLS: u16 = 130;
const DEFAULT_ROWS: u16 = 40;

/// Reads from the child are considered settled after this long without
/// new bytes.
const STABILITY_INTERVAL: Duration = Duration::from_millis(500);

/// Output collection never runs longer than this, even while bytes keep
/// trickling in (prevents a chatty child from stalling `execute`).
const SETTLE_CAP: Duration = Duration::from_secs(2);

const READ_BUF_SIZE: usize = 4096;

enum LocalHandles {
    Pty {
        master: Box<dyn MasterPty + Send>,
        writer: Box<dyn Write + Send>,
        child: Box<dyn Child + Send + Sync>,
    },
    Process {
        child: std::process::Child,
        stdin: std::process::ChildStdin,
    },
}

pub struct LocalSession {
    id: String,
    shell: ShellKind,
    display_name: String,
    state_tx: watch::Sender<SessionState>,
    output_tx: broadcast::Sender<OutputEvent>,
    /// OS handles, present exactly while the session is connected.
    handles: Arc<StdMutex<Option<LocalHandles>>>,
    cwd: Arc<StdMutex<String>>,
    fallback: AtomicBool,
    disposed: Arc<AtomicBool>,
    /// Serializes `execute` calls; interleaved commands would corrupt the
    /// echo trimming.
    exec_lock: Mutex<()>,
}

impl LocalSession {
    pub fn new(shell: ShellKind, working_directory: Option<String>) -> Self {
        let id = format!("local-{}", generate_simple_id(8));
        let display_name = shell.label().to_string();
        let cwd = working_directory.unwrap_or_else(|| {
            std::env::current_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| "/".to_string())
        });
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        let (output_tx, _) = broadcast::channel(1024);

        Self {
            id,
            shell,
            display_name,
            state_tx,
            output_tx,
            handles: Arc::new(StdMutex::new(None)),
            cwd: Arc::new(StdMutex::new(cwd)),
            fallback: AtomicBool::new(false),
            disposed: Arc::new(AtomicBool::new(false)),
            exec_lock: Mutex::new(()),
        }
    }

    fn is_connected(&self) -> bool {
        *self.state_tx.borrow() == SessionState::Connected
    }

    fn current_cwd(&self) -> String {
        lock_unpoisoned(&self.cwd).clone()
    }

    /// Forward the pseudo-console size. `(0, 0)` is a no-op, and fallback
    /// mode has nothing to resize.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError> {
        if cols == 0 && rows == 0 {
            return Ok(());
        }
        let guard = lock_unpoisoned(&self.handles);
        match guard.as_ref() {
            Some(LocalHandles::Pty { master, .. }) => master
                .resize(PtySize {
                    rows,
                    cols,
                    pixel_width: 0,
                    pixel_height: 0,
                })
                .map_err(|e| SessionError::PtyError(format!("resize failed: {e}"))),
            Some(LocalHandles::Process { .. }) => Ok(()),
            None => Err(SessionError::Disconnected(self.id.clone())),
        }
    }

    fn connect_pty(&self) -> Result<(), SessionError> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: DEFAULT_ROWS,
                cols: DEFAULT_COLS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::PtyError(format!("failed to open PTY: {e}")))?;

        let (program, args) = self.shell.command_line();
        let mut cmd = CommandBuilder::new(&program);
        cmd.args(&args);
        cmd.cwd(self.current_cwd());

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::SpawnFailed(format!("{program}: {e}")))?;
        // The console owns the child-side ends now; keeping our copy of the
        // slave open would stop EOF from ever reaching the reader.
        drop(pair.slave);

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::PtyError(format!("failed to take PTY writer: {e}")))?;
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SessionError::PtyError(format!("failed to clone PTY reader: {e}")))?;

        *lock_unpoisoned(&self.handles) = Some(LocalHandles::Pty {
            master: pair.master,
            writer,
            child,
        });

        let _ = self.state_tx.send(SessionState::Connected);
        spawn_reader(
            self.id.clone(),
            self.output_tx.clone(),
            Arc::clone(&self.disposed),
            reader,
            false,
        );
        Ok(())
    }

    fn connect_process(&self) -> Result<(), SessionError> {
        let (program, args) = self.shell.command_line();
        let mut child = std::process::Command::new(&program)
            .args(&args)
            .current_dir(self.current_cwd())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SessionError::SpawnFailed(format!("{program}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SessionError::SpawnFailed("child stdin missing".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SessionError::SpawnFailed("child stdout missing".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SessionError::SpawnFailed("child stderr missing".to_string()))?;

        *lock_unpoisoned(&self.handles) = Some(LocalHandles::Process { child, stdin });
        self.fallback.store(true, Ordering::SeqCst);

        let _ = self.state_tx.send(SessionState::Connected);
        spawn_reader(
            self.id.clone(),
            self.output_tx.clone(),
            Arc::clone(&self.disposed),
            Box::new(stdout),
            false,
        );
        spawn_reader(
            self.id.clone(),
            self.output_tx.clone(),
            Arc::clone(&self.disposed),
            Box::new(stderr),
            true,
        );
        Ok(())
    }

    fn write_bytes(&self, bytes: &[u8]) -> Result<(), SessionError> {
        let mut guard = lock_unpoisoned(&self.handles);
        match guard.as_mut() {
            Some(LocalHandles::Pty { writer, .. }) => {
                writer.write_all(bytes)?;
                writer.flush()?;
                Ok(())
            }
            Some(LocalHandles::Process { stdin, .. }) => {
                stdin.write_all(bytes)?;
                stdin.flush()?;
                Ok(())
            }
            None => Err(SessionError::Disconnected(self.id.clone())),
        }
    }

    /// Collect clean output until it settles, the settle cap passes, or
    /// the caller's timeout expires.
    async fn collect_output(
        &self,
        rx: &mut broadcast::Receiver<OutputEvent>,
        timeout: Duration,
    ) -> (String, String, bool) {
        let started = Instant::now();
        let hard_deadline = started + timeout;
        let cap_deadline = started + SETTLE_CAP.min(timeout);
        let mut output = String::new();
        let mut error = String::new();
        let mut last_data = Instant::now();
        let mut is_timeout = false;

        loop {
            let silence_deadline = last_data + STABILITY_INTERVAL;
            let deadline = silence_deadline.min(cap_deadline).min(hard_deadline);
            let now = Instant::now();
            if now >= deadline {
                is_timeout = now >= hard_deadline;
                break;
            }
            match tokio::time::timeout(deadline - now, rx.recv()).await {
                Ok(Ok(event)) => {
                    if event.is_error_channel {
                        error.push_str(&event.clean);
                    } else {
                        output.push_str(&event.clean);
                    }
                    last_data = Instant::now();
                }
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    warn!(session_id = %self.id, skipped, "output receiver lagged");
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => break,
                Err(_) => {
                    let now = Instant::now();
                    is_timeout = now >= hard_deadline;
                    break;
                }
            }
        }
        (output, error, is_timeout)
    }

    fn track_cd(&self, command: &str) {
        if let Some(target) = parse_cd_target(command) {
            let mut cwd = lock_unpoisoned(&self.cwd);
            let resolved = resolve_path(&cwd, &target);
            trace!(session_id = %self.id, from = %*cwd, to = %resolved, "tracked cd");
            *cwd = resolved;
        }
    }
}

#[async_trait]
impl TerminalSession for LocalSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SessionKind {
        SessionKind::LocalShell(self.shell.clone())
    }

    fn display_name(&self) -> String {
        self.display_name.clone()
    }

    fn shell_type(&self) -> String {
        self.shell.label().to_string()
    }

    fn fallback_mode(&self) -> bool {
        self.fallback.load(Ordering::SeqCst)
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

        match self.connect_pty() {
            Ok(()) => {
                info!(session_id = %self.id, shell = %self.display_name, "local PTY session connected");
                Ok(())
            }
            Err(SessionError::PtyError(pty_err)) => {
                // No pseudo-console on this host. Degrade to plain pipes.
                warn!(session_id = %self.id, error = %pty_err, "PTY unavailable, using process fallback");
                match self.connect_process() {
                    Ok(()) => {
                        info!(session_id = %self.id, "local session connected in fallback mode");
                        Ok(())
                    }
                    Err(e) => {
                        let _ = self.state_tx.send(SessionState::Error);
                        Err(e)
                    }
                }
            }
            Err(e) => {
                let _ = self.state_tx.send(SessionState::Error);
                Err(e)
            }
        }
    }

    async fn disconnect(&self) {
        self.dispose().await;
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
        self.write_bytes(format!("{}\n", command.trim_end()).as_bytes())?;
        trace!(session_id = %self.id, command, "wrote command to child");

        let (raw_output, error, is_timeout) = self.collect_output(&mut rx, timeout).await;
        let duration = started.elapsed();
        let output = trim_command_echo(&raw_output, command);

        if !is_timeout {
            self.track_cd(command);
        }

        debug!(
            session_id = %self.id,
            duration_ms = duration.as_millis() as u64,
            output_len = output.len(),
            is_timeout,
            "command completed"
        );

        Ok(CommandResult {
            output,
            error,
            // The quiescence path has no exit-code channel; the shell merges
            // everything into the PTY stream.
            exit_code: 0,
            duration,
            current_directory: self.current_cwd(),
            is_timeout,
        })
    }

    async fn write_raw(&self, text: &str) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::Disconnected(self.id.clone()));
        }
        self.write_bytes(text.as_bytes())
    }

    async fn cancel_current(&self) -> Result<(), SessionError> {
        let mut guard = lock_unpoisoned(&self.handles);
        match guard.as_mut() {
            Some(LocalHandles::Pty { writer, .. }) => {
                // Ctrl-C through the console; the line discipline delivers
                // SIGINT (or the Windows equivalent) to the foreground group.
                writer.write_all(&[0x03])?;
                writer.flush()?;
                Ok(())
            }
            Some(LocalHandles::Process { child, .. }) => {
                child.kill().map_err(SessionError::Io)?;
                Ok(())
            }
            None => Err(SessionError::Disconnected(self.id.clone())),
        }
    }

    async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let handles = lock_unpoisoned(&self.handles).take();
        if let Some(handles) = handles {
            match handles {
                LocalHandles::Pty {
                    master,
                    writer,
                    mut child,
                } => {
                    if let Err(e) = child.kill() {
                        debug!(session_id = %self.id, error = %e, "child kill during dispose");
                    }
                    let _ = child.wait();
                    drop(writer);
                    drop(master);
                }
                LocalHandles::Process { mut child, stdin } => {
                    drop(stdin);
                    let _ = child.kill();
                    let _ = child.wait();
                }
            }
        }
        let _ = self.state_tx.send(SessionState::Disconnected);
        info!(session_id = %self.id, "local session disposed");
    }
}

fn lock_unpoisoned<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Dedicated blocking reader; exits on EOF or read error. Never touches
/// shared state besides the broadcast sender.
fn spawn_reader(
    session_id: String,
    output_tx: broadcast::Sender<OutputEvent>,
    disposed: Arc<AtomicBool>,
    mut reader: Box<dyn Read + Send>,
    is_error_channel: bool,
) {
    std::thread::spawn(move || {
        let mut decoder = StreamDecoder::new();
        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if disposed.load(Ordering::SeqCst) {
                        break;
                    }
                    let chunk = decoder.feed(&buf[..n]);
                    if !chunk.is_empty() {
                        let _ = output_tx.send(OutputEvent::new(
                            &session_id,
                            chunk.clean,
                            chunk.raw,
                            is_error_channel,
                        ));
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        if !disposed.load(Ordering::SeqCst) {
            let tail = decoder.flush();
            if !tail.is_empty() {
                let _ = output_tx.send(OutputEvent::new(
                    &session_id,
                    tail.clean,
                    tail.raw,
                    is_error_channel,
                ));
            }
        }
        trace!(session_id = %session_id, is_error_channel, "reader exited");
    });
}

/// Remove the echoed command line and the trailing prompt line from
/// collected output. Shared with the SSH host, whose shell stream echoes
/// the same way.
pub(crate) fn trim_command_echo(output: &str, command: &str) -> String {
    let command = command.trim();
    let mut lines: Vec<&str> = output.lines().collect();

    if let Some(first) = lines.first()
        && (first.trim() == command || first.contains(command))
    {
        lines.remove(0);
    }
    while lines.first().is_some_and(|l| l.trim().is_empty()) {
        lines.remove(0);
    }
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    if lines.last().is_some_and(|l| is_prompt_line(l)) {
        lines.pop();
    }
    lines.join("\n")
}

/// A line that is only a shell prompt waiting for input.
fn is_prompt_line(line: &str) -> bool {
    let trimmed = line.trim_end();
    if trimmed.is_empty() {
        return false;
    }
    if matches!(trimmed, "$" | "#" | ">" | "%") {
        return true;
    }
    let ends_like_prompt = trimmed.ends_with('$')
        || trimmed.ends_with('#')
        || trimmed.ends_with('%')
        || trimmed.ends_with('>');
    ends_like_prompt && (trimmed.len() < 50 && (trimmed.contains('@') || trimmed.starts_with('[')))
}

/// The argument of a `cd`-family command, unquoted. `None` when the
/// command does not change directory.
fn parse_cd_target(command: &str) -> Option<String> {
    let trimmed = command.trim();
    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let verb = parts.next()?.to_lowercase();
    if !matches!(verb.as_str(), "cd" | "chdir" | "set-location" | "pushd") {
        return None;
    }
    let arg = parts.next().map(str::trim).unwrap_or("");
    let arg = arg
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| arg.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
        .unwrap_or(arg);
    if arg.is_empty() || arg == "-" {
        // `cd` alone goes home; `cd -` needs shell state we do not track.
        return if arg.is_empty() {
            dirs::home_dir().map(|p| p.display().to_string())
        } else {
            None
        };
    }
    Some(arg.to_string())
}

/// Resolve `target` against `base`, folding `.` and `..` without touching
/// the filesystem (the child shell is the source of truth; this mirror is
/// best-effort).
fn resolve_path(base: &str, target: &str) -> String {
    let target = if let Some(rest) = target.strip_prefix("~") {
        match dirs::home_dir() {
            Some(home) => format!("{}{}", home.display(), rest),
            None => target.to_string(),
        }
    } else {
        target.to_string()
    };

    let is_absolute = target.starts_with('/')
        || target.starts_with('\\')
        || (target.len() >= 3
            && target.as_bytes()[1] == b':'
            && (target.as_bytes()[2] == b'/' || target.as_bytes()[2] == b'\\'));

    let mut stack: Vec<String> = Vec::new();
    let mut prefix = String::new();

    let seed = if is_absolute { &target } else { base };
    if seed.len() >= 2 && seed.as_bytes()[1] == b':' {
        prefix = seed.chars().take(2).collect();
    }

    let mut push_components = |path: &str, stack: &mut Vec<String>| {
        for part in path.split(['/', '\\']) {
            match part {
                "" | "." => {}
                ".." => {
                    stack.pop();
                }
                other => {
                    if other.len() == 2 && other.as_bytes()[1] == b':' {
                        continue;
                    }
                    stack.push(other.to_string());
                }
            }
        }
    };

    if !is_absolute {
        push_components(base, &mut stack);
    }
    push_components(&target, &mut stack);

    let sep = if prefix.is_empty() { "/" } else { "\\" };
    if stack.is_empty() {
        if prefix.is_empty() {
            "/".to_string()
        } else {
            format!("{prefix}{sep}")
        }
    } else {
        format!("{prefix}{sep}{}", stack.join(sep))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cd_target_parses_variants() {
        assert_eq!(parse_cd_target("cd /tmp"), Some("/tmp".to_string()));
        assert_eq!(parse_cd_target("CD ..\\src"), Some("..\\src".to_string()));
        assert_eq!(
            parse_cd_target("Set-Location \"C:\\Program Files\""),
            Some("C:\\Program Files".to_string())
        );
        assert_eq!(parse_cd_target("pushd 'my dir'"), Some("my dir".to_string()));
        assert_eq!(parse_cd_target("echo cd /tmp"), None);
        assert_eq!(parse_cd_target("cd -"), None);
    }

    #[test]
    fn relative_paths_resolve_against_cwd() {
        assert_eq!(resolve_path("/home/dev", "projects"), "/home/dev/projects");
        assert_eq!(resolve_path("/home/dev/projects", ".."), "/home/dev");
        assert_eq!(resolve_path("/home/dev", "./a/../b"), "/home/dev/b");
        assert_eq!(resolve_path("/", ".."), "/");
    }

    #[test]
    fn absolute_paths_replace_cwd() {
        assert_eq!(resolve_path("/home/dev", "/var/log"), "/var/log");
        assert_eq!(resolve_path("C:\\Users\\dev", "D:\\data"), "D:\\data");
        assert_eq!(
            resolve_path("C:\\Users\\dev", "..\\other"),
            "C:\\Users\\other"
        );
    }

    #[test]
    fn echo_and_prompt_are_trimmed() {
        let raw = "echo hello-world\nhello-world\n\nuser@host:~$ ";
        assert_eq!(trim_command_echo(raw, "echo hello-world"), "hello-world");
    }

    #[test]
    fn multiline_output_survives_trimming() {
        let raw = "ls\na.txt\nb.txt\n$ ";
        assert_eq!(trim_command_echo(raw, "ls"), "a.txt\nb.txt");
    }

    #[test]
    fn prompt_detection_is_conservative() {
        assert!(is_prompt_line("user@host:~$"));
        assert!(is_prompt_line("[dev@box tmp]$"));
        assert!(is_prompt_line("$"));
        assert!(!is_prompt_line("total 42"));
        assert!(!is_prompt_line("PS C:\\> some output that is not a prompt because it is long"));
        assert!(!is_prompt_line("money: 5$"));
    }

    #[tokio::test]
    async fn execute_on_disconnected_session_short_circuits() {
        let session = LocalSession::new(ShellKind::GitBash, Some("/work".to_string()));
        let result = session.execute("echo hi", None).await.unwrap();
        assert_eq!(result.exit_code, -1);
        assert!(result.error.contains("not connected"));
        assert_eq!(result.current_directory, "/work");
    }

    #[tokio::test]
    async fn dispose_is_idempotent_without_connect() {
        let session = LocalSession::new(ShellKind::Cmd, None);
        session.dispose().await;
        session.dispose().await;
        assert_eq!(*session.state().borrow(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn state_starts_disconnected_without_handles() {
        let session = LocalSession::new(ShellKind::PowerShell, None);
        assert_eq!(*session.state().borrow(), SessionState::Disconnected);
        assert!(lock_unpoisoned(&session.handles).is_none());
        assert!(!session.fallback_mode());
    }

    #[cfg(unix)]
    mod live {
        use super::*;

        fn sh() -> ShellKind {
            ShellKind::Custom {
                executable_path: "/bin/sh".to_string(),
                arguments: vec!["-i".to_string()],
            }
        }

        #[tokio::test]
        async fn pty_smoke_echo_round_trip() {
            let session = LocalSession::new(sh(), None);
            if session.connect().await.is_err() {
                // No PTY in this environment; covered by fallback test.
                return;
            }
            assert_eq!(*session.state().borrow(), SessionState::Connected);

            let result = session
                .execute("echo hello-world", Some(Duration::from_secs(10)))
                .await
                .unwrap();
            assert!(
                result.output.contains("hello-world"),
                "output should contain the echo, got: '{}'",
                result.output
            );
            assert_eq!(result.exit_code, 0);
            assert!(!result.is_timeout);
            assert!(result.duration > Duration::ZERO);

            session.dispose().await;
            assert_eq!(*session.state().borrow(), SessionState::Disconnected);
        }

        #[tokio::test]
        async fn cd_updates_tracked_directory() {
            let session = LocalSession::new(sh(), Some("/".to_string()));
            if session.connect().await.is_err() {
                return;
            }
            let _ = session
                .execute("cd /tmp", Some(Duration::from_secs(10)))
                .await
                .unwrap();
            assert_eq!(session.current_directory(), "/tmp");
            session.dispose().await;
        }

        #[tokio::test]
        async fn resize_zero_is_a_no_op() {
            let session = LocalSession::new(sh(), None);
            if session.connect().await.is_err() {
                return;
            }
            session.resize(0, 0).unwrap();
            session.resize(80, 24).unwrap();
            session.dispose().await;
        }

        #[tokio::test]
        async fn output_events_carry_clean_and_raw() {
            let session = LocalSession::new(sh(), None);
            if session.connect().await.is_err() {
                return;
            }
            let mut rx = session.subscribe_output();
            let _ = session
                .execute("printf 'plain-marker-text\\n'", Some(Duration::from_secs(10)))
                .await
                .unwrap();

            let mut saw_marker = false;
            while let Ok(event) =
                tokio::time::timeout(Duration::from_millis(200), rx.recv()).await
            {
                if let Ok(event) = event {
                    assert!(!event.clean.contains('\x1b'));
                    if event.clean.contains("plain-marker-text") {
                        saw_marker = true;
                    }
                } else {
                    break;
                }
            }
            assert!(saw_marker, "decoded output should surface the marker text");
            session.dispose().await;
        }
    }
}
