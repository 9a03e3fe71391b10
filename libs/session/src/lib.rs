//! Session hosting for termweave.
//!
//! This crate is the heart of the multiplexer: the local pseudo-console
//! host, the SSH host with its prompt-marker protocol and port-forwarding
//! manager, the common session contract both implement, the streaming
//! output decoder, the line/interactive output handler pair, the
//! ring-bounded per-session logs, and the tab manager that owns it all.
//!
//! # Architecture
//!
//! - [`session::TerminalSession`]: common contract for local and SSH hosts
//! - [`local::LocalSession`]: pseudo-console host via `portable-pty`, with
//!   a redirected-pipes fallback when no PTY is available
//! - [`remote::SshSession`]: `russh` shell channel with marker-delimited
//!   command execution and per-connection tunnels
//! - [`manager::SessionManager`]: tab lifecycle, activation hooks, bounded
//!   message/block logs, background timers

pub mod block;
pub mod decode;
pub mod error;
pub mod forward;
pub mod local;
pub mod manager;
pub mod output;
pub mod remote;
pub mod ring;
pub mod session;

pub use block::{BlockStatus, CommandBlock, SharedBlock};
pub use error::SessionError;
pub use local::LocalSession;
pub use manager::SessionManager;
pub use output::{LineBatcher, OutputHandler, RawPresenter};
pub use remote::SshSession;
pub use ring::{RingChange, RingLog};
pub use session::{
    CommandResult, OutputEvent, SessionKind, SessionState, SpecialKey, TerminalSession,
    DEFAULT_EXECUTE_TIMEOUT,
};
