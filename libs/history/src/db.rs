//! Schema for the history file.
//!
//! `command_history` is the primary table; `history_fts` is an
//! external-content FTS5 index over its four text columns, kept in sync
//! by the insert/delete/update triggers so callers never write the index
//! directly.

use libsql::Connection;

use crate::error::HistoryError;

pub async fn init_schema(conn: &Connection) -> Result<(), HistoryError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS command_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_input TEXT NOT NULL,
            generated_command TEXT NOT NULL,
            original_command TEXT,
            explanation TEXT,
            output TEXT,
            error TEXT,
            server_profile TEXT,
            is_success INTEGER NOT NULL DEFAULT 0,
            was_edited INTEGER NOT NULL DEFAULT 0,
            is_seed INTEGER NOT NULL DEFAULT 0,
            executed_at TEXT NOT NULL,
            embedding TEXT,
            use_count INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_history_executed
            ON command_history(executed_at DESC);
        CREATE INDEX IF NOT EXISTS idx_history_profile
            ON command_history(server_profile);

        CREATE VIRTUAL TABLE IF NOT EXISTS history_fts USING fts5(
            user_input, generated_command, explanation, output,
            content='command_history', content_rowid='id'
        );

        CREATE TRIGGER IF NOT EXISTS history_ai
        AFTER INSERT ON command_history BEGIN
            INSERT INTO history_fts(rowid, user_input, generated_command, explanation, output)
            VALUES (new.id, new.user_input, new.generated_command,
                    coalesce(new.explanation, ''), coalesce(new.output, ''));
        END;

        CREATE TRIGGER IF NOT EXISTS history_ad
        AFTER DELETE ON command_history BEGIN
            INSERT INTO history_fts(history_fts, rowid, user_input, generated_command, explanation, output)
            VALUES ('delete', old.id, old.user_input, old.generated_command,
                    coalesce(old.explanation, ''), coalesce(old.output, ''));
        END;

        CREATE TRIGGER IF NOT EXISTS history_au
        AFTER UPDATE ON command_history BEGIN
            INSERT INTO history_fts(history_fts, rowid, user_input, generated_command, explanation, output)
            VALUES ('delete', old.id, old.user_input, old.generated_command,
                    coalesce(old.explanation, ''), coalesce(old.output, ''));
            INSERT INTO history_fts(rowid, user_input, generated_command, explanation, output)
            VALUES (new.id, new.user_input, new.generated_command,
                    coalesce(new.explanation, ''), coalesce(new.output, ''));
        END;",
    )
    .await?;
    Ok(())
}
