use std::time::Duration;

/// Errors raised by the session hosts.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session is not connected: {0}")]
    Disconnected(String),

    #[error("failed to spawn shell: {0}")]
    SpawnFailed(String),

    #[error("PTY error: {0}")]
    PtyError(String),

    #[error("SSH error: {0}")]
    SshError(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("private key error: {0}")]
    KeyError(String),

    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("operation was cancelled")]
    Cancelled,

    #[error("port forward failed: {0}")]
    Forward(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("secret store error: {0}")]
    Secret(#[from] termweave_shared::SecretStoreError),
}
