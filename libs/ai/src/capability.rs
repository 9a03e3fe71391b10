//! Traits the application's model backends implement.

use async_trait::async_trait;

use crate::types::{CommandTranslation, ErrorAnalysis};

#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("translator failed: {0}")]
    Translator(String),

    #[error("embedding service failed: {0}")]
    Embedding(String),

    #[error("provider is not configured: {0}")]
    NotConfigured(String),
}

/// Ambient information passed along with a translation request so the model
/// can produce shell-appropriate output.
#[derive(Debug, Clone, Default)]
pub struct TranslationContext {
    /// Shell flavor of the target session ("PowerShell", "bash", ...).
    pub shell: Option<String>,
    pub current_directory: Option<String>,
    /// SSH profile name when the command targets a remote host.
    pub server_profile: Option<String>,
    /// Recent commands from the same session, oldest first.
    pub recent_commands: Vec<String>,
}

/// Natural language to shell command, plus failure analysis.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(
        &self,
        user_input: &str,
        context: Option<&TranslationContext>,
    ) -> Result<CommandTranslation, AiError>;

    async fn analyze_error(
        &self,
        command: &str,
        stderr: &str,
        context: Option<&TranslationContext>,
    ) -> Result<ErrorAnalysis, AiError>;
}

/// Dense-vector embedding of free text, used by the hybrid history cache.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Output dimension of this backend (384, 768, or 1536).
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, AiError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AiError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}
