#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("failed to open history store: {0}")]
    Open(String),

    #[error("query failed: {0}")]
    Query(#[from] libsql::Error),

    #[error("row decode failed: {0}")]
    Decode(String),

    #[error("embedding codec error: {0}")]
    Vector(String),
}
