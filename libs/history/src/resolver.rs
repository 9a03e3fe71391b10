//! Hybrid cache resolution.
//!
//! Order of attack for a user input: embed and look for a dense match
//! above the similarity cutoff, then a lexical `find_similar` hit above
//! the rank cutoff, then give up and let the caller ask the translator.
//! Hits bump the matched row's use count. An embedding failure silently
//! degrades to the lexical path; it never surfaces to the user.

use std::sync::Arc;

use termweave_ai::{CommandTranslation, EmbeddingProvider};
use termweave_shared::EmbeddingConfig;
use tracing::{debug, trace};

use crate::error::HistoryError;
use crate::store::{HistoryRecord, HistoryStore, NewHistoryRecord};

/// BM25 ranks at or below this count as a lexical cache hit (lower is
/// better; FTS5 ranks are negative).
const FTS_RANK_CUTOFF: f64 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMethod {
    Embedding,
    Fts,
}

#[derive(Debug, Clone)]
pub struct CacheHit {
    pub record: HistoryRecord,
    pub method: CacheMethod,
    /// Cosine similarity for embedding hits; lexical hits carry none.
    pub similarity: Option<f32>,
}

#[derive(Debug, Clone)]
pub enum Resolution {
    Hit(CacheHit),
    /// Nothing cached: call the translator, then persist via
    /// [`HybridResolver::record_translation`].
    Miss,
}

impl Resolution {
    pub fn is_hit(&self) -> bool {
        matches!(self, Resolution::Hit(_))
    }
}

pub struct HybridResolver {
    store: Arc<HistoryStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    config: EmbeddingConfig,
}

impl HybridResolver {
    pub fn new(
        store: Arc<HistoryStore>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        config: EmbeddingConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    /// The stronger cutoff some callers use to skip the AI entirely even
    /// when it is selected.
    pub fn cache_hit_threshold(&self) -> f32 {
        self.config.cache_hit_threshold
    }

    pub async fn resolve(&self, user_input: &str) -> Result<Resolution, HistoryError> {
        if let Some(embedder) = &self.embedder {
            match embedder.embed(user_input).await {
                Ok(vector) => {
                    let hits = self
                        .store
                        .search_vector(&vector, self.config.min_similarity, 1)
                        .await?;
                    if let Some((record, similarity)) = hits.into_iter().next() {
                        debug!(
                            user_input,
                            similarity,
                            matched = %record.generated_command,
                            "embedding cache hit"
                        );
                        self.store.increment_use_count(record.id).await?;
                        return Ok(Resolution::Hit(CacheHit {
                            record,
                            method: CacheMethod::Embedding,
                            similarity: Some(similarity),
                        }));
                    }
                }
                Err(e) => {
                    // Dense retrieval is an optimization; the lexical path
                    // still answers.
                    debug!(error = %e, "embedding failed, trying lexical");
                }
            }
        }

        let similar = self.store.find_similar(user_input, None).await?;
        if let Some((record, rank)) = similar.into_iter().next()
            && rank <= FTS_RANK_CUTOFF
        {
            debug!(user_input, rank, matched = %record.generated_command, "fts cache hit");
            self.store.increment_use_count(record.id).await?;
            return Ok(Resolution::Hit(CacheHit {
                record,
                method: CacheMethod::Fts,
                similarity: None,
            }));
        }

        trace!(user_input, "cache miss");
        Ok(Resolution::Miss)
    }

    /// Persist a fresh translation after a miss; embeds it when an
    /// embedder is configured so the row joins the dense index.
    pub async fn record_translation(
        &self,
        user_input: &str,
        translation: &CommandTranslation,
        server_profile: Option<&str>,
        is_success: bool,
    ) -> Result<i64, HistoryError> {
        let embedding = match &self.embedder {
            Some(embedder) => match embedder.embed(user_input).await {
                Ok(vector) => Some(vector),
                Err(e) => {
                    debug!(error = %e, "embedding new row failed, storing without vector");
                    None
                }
            },
            None => None,
        };

        let record = NewHistoryRecord {
            user_input: user_input.to_string(),
            generated_command: translation.command.clone(),
            original_command: None,
            explanation: translation.explanation.clone(),
            output: None,
            error: None,
            server_profile: server_profile.map(str::to_string),
            is_success,
            was_edited: false,
            executed_at: chrono::Utc::now(),
        };
        self.store.add(&record, embedding.as_deref()).await
    }
}
