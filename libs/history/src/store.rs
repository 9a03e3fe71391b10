//! The history store.

use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::db::init_schema;
use crate::error::HistoryError;
use crate::vector::{cosine_similarity, deserialize_embedding, serialize_embedding};

/// Vector search scans at most this many recent successful rows.
const VECTOR_SCAN_LIMIT: i64 = 1000;

/// `bm25()` column weights for [`HistoryStore::find_similar`]:
/// user_input dominates, output barely counts.
const SIMILAR_WEIGHTS: (f64, f64, f64, f64) = (10.0, 1.0, 0.5, 0.1);

const DEFAULT_SIMILAR_LIMIT: usize = 5;

/// A stored translation, as read back from the file.
#[derive(Debug, Clone)]
pub struct HistoryRecord {
    pub id: i64,
    pub user_input: String,
    pub generated_command: String,
    pub original_command: Option<String>,
    pub explanation: Option<String>,
    pub output: Option<String>,
    pub error: Option<String>,
    pub server_profile: Option<String>,
    pub is_success: bool,
    pub was_edited: bool,
    pub is_seed: bool,
    pub executed_at: DateTime<Utc>,
    pub embedding: Option<Vec<f32>>,
    pub use_count: i64,
}

/// Insert shape; also the schema of the shipped seed file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewHistoryRecord {
    pub user_input: String,
    pub generated_command: String,
    #[serde(default)]
    pub original_command: Option<String>,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub server_profile: Option<String>,
    pub is_success: bool,
    #[serde(default)]
    pub was_edited: bool,
    #[serde(default = "Utc::now")]
    pub executed_at: DateTime<Utc>,
}

impl NewHistoryRecord {
    pub fn successful(user_input: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            user_input: user_input.into(),
            generated_command: command.into(),
            original_command: None,
            explanation: None,
            output: None,
            error: None,
            server_profile: None,
            is_success: true,
            was_edited: false,
            executed_at: Utc::now(),
        }
    }
}

/// Aggregated view over successful rows, grouped by generated command.
#[derive(Debug, Clone)]
pub struct FrequentCommand {
    pub command: String,
    pub description: String,
    pub explanation: Option<String>,
    pub sum_use_count: i64,
    pub execution_count: i64,
    pub last_used: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct HistoryStatistics {
    pub total: i64,
    pub successes: i64,
    pub per_profile: Vec<(String, i64)>,
}

#[derive(Deserialize)]
struct HistoryRow {
    id: i64,
    user_input: String,
    generated_command: String,
    original_command: Option<String>,
    explanation: Option<String>,
    output: Option<String>,
    error: Option<String>,
    server_profile: Option<String>,
    is_success: i64,
    was_edited: i64,
    is_seed: i64,
    executed_at: String,
    embedding: Option<String>,
    use_count: i64,
}

impl TryFrom<HistoryRow> for HistoryRecord {
    type Error = HistoryError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        let executed_at = DateTime::parse_from_rfc3339(&row.executed_at)
            .map_err(|e| HistoryError::Decode(format!("executed_at: {e}")))?
            .with_timezone(&Utc);
        let embedding = match row.embedding {
            Some(encoded) if !encoded.is_empty() => Some(deserialize_embedding(&encoded)?),
            _ => None,
        };
        Ok(HistoryRecord {
            id: row.id,
            user_input: row.user_input,
            generated_command: row.generated_command,
            original_command: row.original_command,
            explanation: row.explanation,
            output: row.output,
            error: row.error,
            server_profile: row.server_profile,
            is_success: row.is_success != 0,
            was_edited: row.was_edited != 0,
            is_seed: row.is_seed != 0,
            executed_at,
            embedding,
            use_count: row.use_count,
        })
    }
}

const SELECT_COLUMNS: &str = "id, user_input, generated_command, original_command, explanation, \
     output, error, server_profile, is_success, was_edited, is_seed, executed_at, embedding, use_count";

/// Qualified column list for queries joined against the FTS table, whose
/// own columns would otherwise shadow these names.
const SELECT_COLUMNS_H: &str = "h.id, h.user_input, h.generated_command, h.original_command, \
     h.explanation, h.output, h.error, h.server_profile, h.is_success, h.was_edited, h.is_seed, \
     h.executed_at, h.embedding, h.use_count";

pub struct HistoryStore {
    conn: Connection,
    /// Rows that failed to persist (disk full, locked file). They are
    /// retried in front of the next successful append so a transient
    /// store failure costs a status-bar warning, not history.
    pending: tokio::sync::Mutex<Vec<(NewHistoryRecord, Option<Vec<f32>>)>>,
}

impl HistoryStore {
    /// Open (or create) the history file and ensure the schema.
    pub async fn open(path: &Path) -> Result<Self, HistoryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| HistoryError::Open(format!("create directory: {e}")))?;
        }
        let db = libsql::Builder::new_local(path.display().to_string())
            .build()
            .await
            .map_err(|e| HistoryError::Open(format!("open database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| HistoryError::Open(format!("connect: {e}")))?;
        init_schema(&conn).await?;
        debug!(path = %path.display(), "history store open");
        Ok(Self {
            conn,
            pending: tokio::sync::Mutex::new(Vec::new()),
        })
    }

    /// Append with in-memory fallback: when the write fails the record is
    /// queued and `None` is returned; queued rows are flushed before the
    /// next append that succeeds.
    pub async fn add_or_queue(
        &self,
        record: &NewHistoryRecord,
        embedding: Option<&[f32]>,
    ) -> Option<i64> {
        let mut pending = self.pending.lock().await;
        while let Some((queued, queued_embedding)) = pending.first().cloned() {
            match self.insert(&queued, queued_embedding.as_deref(), false).await {
                Ok(_) => {
                    pending.remove(0);
                }
                Err(e) => {
                    debug!(error = %e, "store still failing, keeping queue");
                    pending.push((record.clone(), embedding.map(<[f32]>::to_vec)));
                    return None;
                }
            }
        }
        match self.insert(record, embedding, false).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "history append failed, queued in memory");
                pending.push((record.clone(), embedding.map(<[f32]>::to_vec)));
                None
            }
        }
    }

    /// Number of rows waiting in the in-memory fallback queue.
    pub async fn pending_appends(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Insert one record, optionally with its embedding. Returns the rowid.
    pub async fn add(
        &self,
        record: &NewHistoryRecord,
        embedding: Option<&[f32]>,
    ) -> Result<i64, HistoryError> {
        self.insert(record, embedding, false).await
    }

    async fn insert(
        &self,
        record: &NewHistoryRecord,
        embedding: Option<&[f32]>,
        is_seed: bool,
    ) -> Result<i64, HistoryError> {
        self.conn
            .execute(
                "INSERT INTO command_history (user_input, generated_command, original_command, \
                 explanation, output, error, server_profile, is_success, was_edited, is_seed, \
                 executed_at, embedding) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    record.user_input.as_str(),
                    record.generated_command.as_str(),
                    record.original_command.clone(),
                    record.explanation.clone(),
                    record.output.clone(),
                    record.error.clone(),
                    record.server_profile.clone(),
                    record.is_success as i64,
                    record.was_edited as i64,
                    is_seed as i64,
                    record.executed_at.to_rfc3339(),
                    embedding.map(serialize_embedding),
                ),
            )
            .await?;
        Ok(self.conn.last_insert_rowid())
    }

    pub async fn update_embedding(&self, id: i64, vector: &[f32]) -> Result<(), HistoryError> {
        self.conn
            .execute(
                "UPDATE command_history SET embedding = ? WHERE id = ?",
                (serialize_embedding(vector), id),
            )
            .await?;
        Ok(())
    }

    pub async fn increment_use_count(&self, id: i64) -> Result<(), HistoryError> {
        self.conn
            .execute(
                "UPDATE command_history SET use_count = use_count + 1 WHERE id = ?",
                [id],
            )
            .await?;
        Ok(())
    }

    pub async fn get(&self, id: i64) -> Result<Option<HistoryRecord>, HistoryError> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {SELECT_COLUMNS} FROM command_history WHERE id = ?"),
                [id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => {
                let row: HistoryRow =
                    libsql::de::from_row(&row).map_err(|e| HistoryError::Decode(e.to_string()))?;
                Ok(Some(row.try_into()?))
            }
            None => Ok(None),
        }
    }

    /// Lexical search, BM25-ordered. When the FTS engine rejects the query
    /// text, degrade to substring matching.
    pub async fn search_text(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>, HistoryError> {
        let fts = match self
            .conn
            .query(
                &format!(
                    "SELECT {SELECT_COLUMNS_H} FROM command_history h \
                     JOIN history_fts f ON h.id = f.rowid \
                     WHERE history_fts MATCH ? ORDER BY bm25(history_fts) LIMIT ?"
                ),
                (query, limit as i64),
            )
            .await
        {
            // A syntax error can also surface while stepping the rows.
            Ok(rows) => self.collect_records(rows).await,
            Err(e) => Err(HistoryError::Query(e)),
        };

        match fts {
            Ok(records) => Ok(records),
            Err(HistoryError::Query(e)) => {
                debug!(query, error = %e, "fts query rejected, falling back to LIKE");
                let pattern = format!("%{query}%");
                let rows = self
                    .conn
                    .query(
                        &format!(
                            "SELECT {SELECT_COLUMNS} FROM command_history \
                             WHERE user_input LIKE ?1 OR generated_command LIKE ?1 \
                                OR explanation LIKE ?1 OR output LIKE ?1 \
                             ORDER BY executed_at DESC LIMIT ?2"
                        ),
                        (pattern, limit as i64),
                    )
                    .await?;
                self.collect_records(rows).await
            }
            Err(e) => Err(e),
        }
    }

    /// BM25 against `user_input` first and foremost: words of three or
    /// more characters, column weights (10.0, 1.0, 0.5, 0.1), top 5 by
    /// default. Returns `(record, rank)`; lower rank is better.
    pub async fn find_similar(
        &self,
        user_input: &str,
        limit: Option<usize>,
    ) -> Result<Vec<(HistoryRecord, f64)>, HistoryError> {
        let terms: Vec<String> = user_input
            .split_whitespace()
            .map(|word| {
                word.chars()
                    .filter(|c| c.is_alphanumeric())
                    .collect::<String>()
            })
            .filter(|w| w.chars().count() >= 3)
            .map(|w| format!("\"{w}\""))
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let match_expr = format!("user_input : ({})", terms.join(" OR "));
        let (w0, w1, w2, w3) = SIMILAR_WEIGHTS;
        let limit = limit.unwrap_or(DEFAULT_SIMILAR_LIMIT);

        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {SELECT_COLUMNS_H}, bm25(history_fts, {w0}, {w1}, {w2}, {w3}) AS rank \
                     FROM command_history h JOIN history_fts f ON h.id = f.rowid \
                     WHERE history_fts MATCH ? ORDER BY rank LIMIT ?"
                ),
                (match_expr, limit as i64),
            )
            .await?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await? {
            let rank: f64 = row
                .get(14)
                .map_err(|e| HistoryError::Decode(format!("rank column: {e}")))?;
            let parsed: HistoryRow =
                libsql::de::from_row(&row).map_err(|e| HistoryError::Decode(e.to_string()))?;
            results.push((parsed.try_into()?, rank));
        }
        Ok(results)
    }

    /// Dense retrieval: scan the most recent successful embedded rows,
    /// score in memory, filter by the cutoff.
    pub async fn search_vector(
        &self,
        query_vector: &[f32],
        min_similarity: f32,
        limit: usize,
    ) -> Result<Vec<(HistoryRecord, f32)>, HistoryError> {
        let rows = self
            .conn
            .query(
                &format!(
                    "SELECT {SELECT_COLUMNS} FROM command_history \
                     WHERE is_success = 1 AND embedding IS NOT NULL \
                     ORDER BY executed_at DESC LIMIT ?"
                ),
                [VECTOR_SCAN_LIMIT],
            )
            .await?;
        let candidates = self.collect_records(rows).await?;

        let mut scored: Vec<(HistoryRecord, f32)> = candidates
            .into_iter()
            .filter_map(|record| {
                let similarity = record
                    .embedding
                    .as_deref()
                    .map(|embedding| cosine_similarity(query_vector, embedding))?;
                (similarity >= min_similarity).then_some((record, similarity))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    /// Successful rows grouped by generated command, ordered by summed
    /// use count then execution count. Deterministic: the description and
    /// explanation come from the most recent row of each group.
    pub async fn frequent_commands(
        &self,
        limit: usize,
        profile: Option<&str>,
    ) -> Result<Vec<FrequentCommand>, HistoryError> {
        #[derive(Deserialize)]
        struct FrequentRow {
            generated_command: String,
            user_input: String,
            explanation: Option<String>,
            total_use: i64,
            executions: i64,
            last_used: String,
        }

        let base = "SELECT generated_command, user_input, explanation, \
                    SUM(use_count) AS total_use, COUNT(*) AS executions, \
                    MAX(executed_at) AS last_used \
                    FROM command_history WHERE is_success = 1";
        let tail = "GROUP BY generated_command \
                    ORDER BY total_use DESC, executions DESC LIMIT ?";

        let mut rows = match profile {
            Some(profile) => {
                self.conn
                    .query(
                        &format!("{base} AND server_profile = ? {tail}"),
                        (profile, limit as i64),
                    )
                    .await?
            }
            None => {
                self.conn
                    .query(&format!("{base} {tail}"), [limit as i64])
                    .await?
            }
        };

        let mut results = Vec::new();
        while let Some(row) = rows.next().await? {
            let row: FrequentRow =
                libsql::de::from_row(&row).map_err(|e| HistoryError::Decode(e.to_string()))?;
            let last_used = DateTime::parse_from_rfc3339(&row.last_used)
                .map_err(|e| HistoryError::Decode(format!("last_used: {e}")))?
                .with_timezone(&Utc);
            results.push(FrequentCommand {
                command: row.generated_command,
                description: row.user_input,
                explanation: row.explanation,
                sum_use_count: row.total_use,
                execution_count: row.executions,
                last_used,
            });
        }
        Ok(results)
    }

    pub async fn statistics(&self) -> Result<HistoryStatistics, HistoryError> {
        let total = self.scalar("SELECT COUNT(*) FROM command_history").await?;
        let successes = self
            .scalar("SELECT COUNT(*) FROM command_history WHERE is_success = 1")
            .await?;

        let mut per_profile = Vec::new();
        let mut rows = self
            .conn
            .query(
                "SELECT coalesce(server_profile, 'local') AS profile, COUNT(*) AS n \
                 FROM command_history GROUP BY profile ORDER BY n DESC",
                (),
            )
            .await?;
        while let Some(row) = rows.next().await? {
            let profile: String = row
                .get(0)
                .map_err(|e| HistoryError::Decode(e.to_string()))?;
            let count: i64 = row
                .get(1)
                .map_err(|e| HistoryError::Decode(e.to_string()))?;
            per_profile.push((profile, count));
        }

        Ok(HistoryStatistics {
            total,
            successes,
            per_profile,
        })
    }

    /// One-time seed ingest. A second call is a no-op as long as any
    /// seed-flagged row remains.
    pub async fn import_seed(&self, records: &[NewHistoryRecord]) -> Result<usize, HistoryError> {
        let existing = self
            .scalar("SELECT COUNT(*) FROM command_history WHERE is_seed = 1")
            .await?;
        if existing > 0 {
            debug!(existing, "seed already imported");
            return Ok(0);
        }

        self.conn.execute("BEGIN", ()).await?;
        let mut imported = 0usize;
        for record in records {
            match self.insert(record, None, true).await {
                Ok(_) => imported += 1,
                Err(e) => {
                    warn!(error = %e, "seed row failed, rolling back");
                    self.conn.execute("ROLLBACK", ()).await?;
                    return Err(e);
                }
            }
        }
        self.conn.execute("COMMIT", ()).await?;
        info!(imported, "seed data imported");
        Ok(imported)
    }

    async fn scalar(&self, sql: &str) -> Result<i64, HistoryError> {
        let mut rows = self.conn.query(sql, ()).await?;
        match rows.next().await? {
            Some(row) => row.get(0).map_err(|e| HistoryError::Decode(e.to_string())),
            None => Ok(0),
        }
    }

    async fn collect_records(
        &self,
        mut rows: libsql::Rows,
    ) -> Result<Vec<HistoryRecord>, HistoryError> {
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            let parsed: HistoryRow =
                libsql::de::from_row(&row).map_err(|e| HistoryError::Decode(e.to_string()))?;
            records.push(parsed.try_into()?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_temp() -> (tempfile::TempDir, HistoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::open(&dir.path().join("history.db"))
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn add_then_get_round_trips() {
        let (_dir, store) = open_temp().await;
        let mut record = NewHistoryRecord::successful("list files", "ls -la");
        record.explanation = Some("lists everything".to_string());
        record.server_profile = Some("staging".to_string());

        let id = store.add(&record, Some(&[0.25, -0.5, 1.0])).await.unwrap();
        let loaded = store.get(id).await.unwrap().unwrap();

        assert_eq!(loaded.user_input, "list files");
        assert_eq!(loaded.generated_command, "ls -la");
        assert_eq!(loaded.explanation.as_deref(), Some("lists everything"));
        assert_eq!(loaded.server_profile.as_deref(), Some("staging"));
        assert!(loaded.is_success);
        assert!(!loaded.is_seed);
        assert_eq!(loaded.embedding.as_deref(), Some(&[0.25, -0.5, 1.0][..]));
        assert_eq!(loaded.use_count, 0);
    }

    #[tokio::test]
    async fn triggers_keep_the_fts_index_in_sync() {
        let (_dir, store) = open_temp().await;
        store
            .add(
                &NewHistoryRecord::successful("compress the logs folder", "tar czf logs.tar.gz logs/"),
                None,
            )
            .await
            .unwrap();

        let hits = store.search_text("compress", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].generated_command, "tar czf logs.tar.gz logs/");
    }

    #[tokio::test]
    async fn invalid_fts_query_falls_back_to_like() {
        let (_dir, store) = open_temp().await;
        store
            .add(
                &NewHistoryRecord::successful("show disk (usage)", "df -h"),
                None,
            )
            .await
            .unwrap();

        // Unbalanced quote is an FTS5 syntax error.
        let hits = store.search_text("disk (", 10).await.unwrap();
        assert_eq!(hits.len(), 1, "LIKE fallback should still match");
    }

    #[tokio::test]
    async fn find_similar_prefers_user_input_matches() {
        let (_dir, store) = open_temp().await;
        store
            .add(
                &NewHistoryRecord::successful("restart the web server", "systemctl restart nginx"),
                None,
            )
            .await
            .unwrap();
        let mut noise = NewHistoryRecord::successful("check uptime", "uptime");
        noise.output = Some("the web server has been up restart pending".to_string());
        store.add(&noise, None).await.unwrap();

        let hits = store.find_similar("restart web server", None).await.unwrap();
        assert!(!hits.is_empty());
        assert_eq!(
            hits[0].0.generated_command, "systemctl restart nginx",
            "user_input match must outrank output match"
        );
        // Lower bm25 rank is better.
        if hits.len() > 1 {
            assert!(hits[0].1 <= hits[1].1);
        }
    }

    #[tokio::test]
    async fn find_similar_ignores_short_words() {
        let (_dir, store) = open_temp().await;
        store
            .add(&NewHistoryRecord::successful("go up", "cd .."), None)
            .await
            .unwrap();
        // Every word is under three characters: no query is sent at all.
        let hits = store.find_similar("go up", None).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn vector_search_filters_and_orders() {
        let (_dir, store) = open_temp().await;
        store
            .add(
                &NewHistoryRecord::successful("close match", "cmd-a"),
                Some(&[1.0, 0.0]),
            )
            .await
            .unwrap();
        store
            .add(
                &NewHistoryRecord::successful("far match", "cmd-b"),
                Some(&[0.0, 1.0]),
            )
            .await
            .unwrap();
        let mut failed = NewHistoryRecord::successful("failed row", "cmd-c");
        failed.is_success = false;
        store.add(&failed, Some(&[1.0, 0.0])).await.unwrap();

        let hits = store.search_vector(&[1.0, 0.0], 0.75, 10).await.unwrap();
        assert_eq!(hits.len(), 1, "orthogonal and failed rows are excluded");
        assert_eq!(hits[0].0.generated_command, "cmd-a");
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn use_count_increments() {
        let (_dir, store) = open_temp().await;
        let id = store
            .add(&NewHistoryRecord::successful("x", "echo x"), None)
            .await
            .unwrap();
        store.increment_use_count(id).await.unwrap();
        store.increment_use_count(id).await.unwrap();
        assert_eq!(store.get(id).await.unwrap().unwrap().use_count, 2);
    }

    #[tokio::test]
    async fn embedding_can_be_attached_later() {
        let (_dir, store) = open_temp().await;
        let id = store
            .add(&NewHistoryRecord::successful("y", "echo y"), None)
            .await
            .unwrap();
        assert!(store.get(id).await.unwrap().unwrap().embedding.is_none());

        store.update_embedding(id, &[0.5, 0.5]).await.unwrap();
        assert_eq!(
            store.get(id).await.unwrap().unwrap().embedding.as_deref(),
            Some(&[0.5, 0.5][..])
        );
    }

    #[tokio::test]
    async fn frequent_commands_aggregate_by_generated_command() {
        let (_dir, store) = open_temp().await;
        for _ in 0..3 {
            let id = store
                .add(&NewHistoryRecord::successful("list", "ls -la"), None)
                .await
                .unwrap();
            store.increment_use_count(id).await.unwrap();
        }
        let id = store
            .add(&NewHistoryRecord::successful("disk", "df -h"), None)
            .await
            .unwrap();
        store.increment_use_count(id).await.unwrap();

        let frequent = store.frequent_commands(10, None).await.unwrap();
        assert_eq!(frequent.len(), 2);
        assert_eq!(frequent[0].command, "ls -la");
        assert_eq!(frequent[0].sum_use_count, 3);
        assert_eq!(frequent[0].execution_count, 3);
        assert_eq!(frequent[1].command, "df -h");
    }

    #[tokio::test]
    async fn frequent_commands_honor_profile_filter() {
        let (_dir, store) = open_temp().await;
        let mut remote = NewHistoryRecord::successful("remote list", "ls /srv");
        remote.server_profile = Some("prod".to_string());
        store.add(&remote, None).await.unwrap();
        store
            .add(&NewHistoryRecord::successful("local list", "ls"), None)
            .await
            .unwrap();

        let frequent = store.frequent_commands(10, Some("prod")).await.unwrap();
        assert_eq!(frequent.len(), 1);
        assert_eq!(frequent[0].command, "ls /srv");
    }

    #[tokio::test]
    async fn statistics_count_totals_and_profiles() {
        let (_dir, store) = open_temp().await;
        store
            .add(&NewHistoryRecord::successful("a", "echo a"), None)
            .await
            .unwrap();
        let mut failed = NewHistoryRecord::successful("b", "boom");
        failed.is_success = false;
        store.add(&failed, None).await.unwrap();
        let mut remote = NewHistoryRecord::successful("c", "ls");
        remote.server_profile = Some("prod".to_string());
        store.add(&remote, None).await.unwrap();

        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.successes, 2);
        assert!(stats.per_profile.contains(&("local".to_string(), 2)));
        assert!(stats.per_profile.contains(&("prod".to_string(), 1)));
    }

    #[tokio::test]
    async fn seed_import_happens_exactly_once() {
        let (_dir, store) = open_temp().await;
        let seed = vec![
            NewHistoryRecord::successful("show processes", "ps aux"),
            NewHistoryRecord::successful("free memory", "free -h"),
        ];

        assert_eq!(store.import_seed(&seed).await.unwrap(), 2);
        assert_eq!(store.import_seed(&seed).await.unwrap(), 0);
        assert_eq!(store.statistics().await.unwrap().total, 2);

        let record = store.search_text("processes", 1).await.unwrap();
        assert!(record[0].is_seed);
    }

    #[tokio::test]
    async fn add_or_queue_persists_when_the_store_is_healthy() {
        let (_dir, store) = open_temp().await;
        let id = store
            .add_or_queue(&NewHistoryRecord::successful("q", "echo q"), None)
            .await;
        assert!(id.is_some());
        assert_eq!(store.pending_appends().await, 0);
        assert_eq!(store.statistics().await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn reopen_preserves_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");
        {
            let store = HistoryStore::open(&path).await.unwrap();
            store
                .add(&NewHistoryRecord::successful("persist me", "true"), None)
                .await
                .unwrap();
        }
        let store = HistoryStore::open(&path).await.unwrap();
        assert_eq!(store.statistics().await.unwrap().total, 1);
        assert_eq!(store.search_text("persist", 5).await.unwrap().len(), 1);
    }
}
