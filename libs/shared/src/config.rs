//! The JSON settings document.
//!
//! A single file under the per-user data directory carries everything the
//! core reads: AI provider selection, SSH profiles, embedding thresholds,
//! and the session-restore preferences. UI-only settings in the same file
//! are preserved verbatim on round-trip via the `extra` capture.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::models::{SessionDescriptor, SshProfile};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[source] std::io::Error),

    #[error("failed to write config file: {0}")]
    Write(#[source] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("no per-user data directory available on this platform")]
    NoDataDir,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiProvider {
    OpenAi,
    Anthropic,
    Google,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    pub provider: AiProvider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    /// Opaque ciphertext produced by the secret store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: AiProvider::OpenAi,
            model_id: None,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingKind {
    Disabled,
    LocalOnnx,
    Api,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(rename = "type")]
    pub kind: EmbeddingKind,
    /// Cosine cutoff below which a vector match is not a cache hit.
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
    /// Stronger cutoff some callers use to skip the AI entirely.
    #[serde(default = "default_cache_hit_threshold")]
    pub cache_hit_threshold: f32,
}

fn default_min_similarity() -> f32 {
    0.75
}

fn default_cache_hit_threshold() -> f32 {
    0.85
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            kind: EmbeddingKind::Disabled,
            min_similarity: default_min_similarity(),
            cache_hit_threshold: default_cache_hit_threshold(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SshConfig {
    #[serde(default)]
    pub profiles: Vec<SshProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_profile: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionPrefs {
    #[serde(default)]
    pub restore_on_start: bool,
    #[serde(default)]
    pub states: Vec<SessionDescriptor>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub session: SessionPrefs,
    /// Settings the core does not interpret (theme, language, window layout).
    /// Kept so a save does not drop what the UI wrote.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl AppConfig {
    pub fn find_ssh_profile(&self, name: &str) -> Option<&SshProfile> {
        self.ssh.profiles.iter().find(|p| p.profile_name == name)
    }
}

/// Loads and saves the settings document at a fixed path.
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Store under the per-user data directory (`<data>/termweave/settings.json`).
    pub fn open_default() -> Result<Self, ConfigError> {
        let dir = dirs::data_dir().ok_or(ConfigError::NoDataDir)?.join("termweave");
        Ok(Self::open_at(dir.join("settings.json")))
    }

    pub fn open_at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document, or return defaults when the file does not exist yet.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        if !self.path.exists() {
            return Ok(AppConfig::default());
        }
        let content = fs::read_to_string(&self.path).map_err(ConfigError::Read)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, config: &AppConfig) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::Write)?;
        }
        let content = serde_json::to_string_pretty(config)?;
        fs::write(&self.path, content).map_err(ConfigError::Write)?;
        tracing::debug!(path = %self.path.display(), "saved settings document");
        Ok(())
    }
}
