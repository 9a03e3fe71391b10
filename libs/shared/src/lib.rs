//! Shared configuration, profiles, and secret handling for termweave.
//!
//! Everything in this crate is plain data plus small I/O helpers: the JSON
//! settings document, SSH/local-shell profiles, the session restore
//! descriptors, and the user-scoped secret store the SSH host uses to
//! decrypt stored passwords.

pub mod config;
pub mod helper;
pub mod models;
pub mod secret;

pub use config::{AppConfig, ConfigError, ConfigStore, EmbeddingConfig, EmbeddingKind};
pub use models::{
    AuthMethod, DescriptorKind, ForwardType, LocalShellProfile, PortForwardConfig,
    SessionDescriptor, ShellKind, SshProfile,
};
pub use secret::{SecretStore, SecretStoreError};
