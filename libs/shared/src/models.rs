//! Profile and descriptor types shared between the session hosts and the
//! settings document.

use serde::{Deserialize, Serialize};

/// Which shell a local session spawns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShellKind {
    PowerShell,
    Cmd,
    WslBash,
    GitBash,
    Custom {
        executable_path: String,
        #[serde(default)]
        arguments: Vec<String>,
    },
}

impl ShellKind {
    /// Program + arguments this shell launches with.
    pub fn command_line(&self) -> (String, Vec<String>) {
        match self {
            ShellKind::PowerShell => ("pwsh".to_string(), vec!["-NoLogo".to_string()]),
            ShellKind::Cmd => ("cmd.exe".to_string(), Vec::new()),
            ShellKind::WslBash => ("wsl.exe".to_string(), Vec::new()),
            ShellKind::GitBash => (
                "bash".to_string(),
                vec!["--login".to_string(), "-i".to_string()],
            ),
            ShellKind::Custom {
                executable_path,
                arguments,
            } => (executable_path.clone(), arguments.clone()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            ShellKind::PowerShell => "PowerShell",
            ShellKind::Cmd => "cmd",
            ShellKind::WslBash => "WSL",
            ShellKind::GitBash => "Git Bash",
            ShellKind::Custom { .. } => "custom",
        }
    }
}

/// A named local-shell launch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalShellProfile {
    pub display_name: String,
    #[serde(flatten)]
    pub shell: ShellKind,
}

/// How an SSH profile authenticates.
///
/// Password and key passphrase are stored as opaque ciphertext produced by
/// [`crate::secret::SecretStore::encrypt`]; the SSH host decrypts them at
/// connect time and never persists the plaintext.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AuthMethod {
    Password {
        ciphertext: String,
    },
    PrivateKey {
        key_path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        passphrase_ciphertext: Option<String>,
    },
}

/// The three SSH tunneling shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardType {
    /// Bind locally, tunnel to a remote endpoint.
    Local,
    /// Ask the peer to bind remotely, tunnel back to a local endpoint.
    Remote,
    /// Bind locally as a SOCKS5 proxy.
    Dynamic,
}

/// One persisted port-forwarding rule inside an SSH profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortForwardConfig {
    pub forward_type: ForwardType,
    #[serde(default = "default_bind")]
    pub local_bind: String,
    pub local_port: u16,
    /// Unused for `Dynamic`.
    #[serde(default)]
    pub remote_host: String,
    #[serde(default)]
    pub remote_port: u16,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

impl PortForwardConfig {
    pub fn describe(&self) -> String {
        match self.forward_type {
            ForwardType::Local => format!(
                "{}:{} -> {}:{}",
                self.local_bind, self.local_port, self.remote_host, self.remote_port
            ),
            ForwardType::Remote => format!(
                "remote:{} -> {}:{}",
                self.remote_port, self.local_bind, self.local_port
            ),
            ForwardType::Dynamic => format!("socks5://{}:{}", self.local_bind, self.local_port),
        }
    }
}

/// A saved SSH connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshProfile {
    pub profile_name: String,
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    pub auth: AuthMethod,
    #[serde(default)]
    pub port_forwardings: Vec<PortForwardConfig>,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_connected: Option<chrono::DateTime<chrono::Utc>>,
}

fn default_ssh_port() -> u16 {
    22
}

impl SshProfile {
    pub fn address(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }
}

/// The shape each open tab is persisted as on shutdown and rebuilt from on
/// startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub kind: DescriptorKind,
    pub tab_header: String,
    pub shell_type: String,
    pub working_directory: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_profile_name: Option<String>,
    #[serde(default)]
    pub use_block_ui: bool,
    pub tab_index: usize,
    #[serde(default)]
    pub is_selected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorKind {
    LocalShell(ShellKind),
    Ssh,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_kind_roundtrips_through_json() {
        let kind = ShellKind::Custom {
            executable_path: "/usr/bin/fish".to_string(),
            arguments: vec!["-l".to_string()],
        };
        let json = serde_json::to_string(&kind).unwrap();
        let back: ShellKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, kind);
    }

    #[test]
    fn ssh_profile_defaults_port_22() {
        let json = r#"{
            "profile_name": "build box",
            "host": "build.internal",
            "username": "ci",
            "auth": { "method": "password", "ciphertext": "AAAA" }
        }"#;
        let profile: SshProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.port, 22);
        assert!(profile.port_forwardings.is_empty());
    }

    #[test]
    fn forward_describe_shapes() {
        let local = PortForwardConfig {
            forward_type: ForwardType::Local,
            local_bind: "127.0.0.1".to_string(),
            local_port: 8080,
            remote_host: "db.internal".to_string(),
            remote_port: 5432,
            auto_start: true,
            name: None,
        };
        assert_eq!(local.describe(), "127.0.0.1:8080 -> db.internal:5432");

        let dynamic = PortForwardConfig {
            forward_type: ForwardType::Dynamic,
            local_bind: "127.0.0.1".to_string(),
            local_port: 1080,
            remote_host: String::new(),
            remote_port: 0,
            auto_start: false,
            name: None,
        };
        assert_eq!(dynamic.describe(), "socks5://127.0.0.1:1080");
    }
}
