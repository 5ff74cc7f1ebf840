use rusqlite::Connection;
use tracing::info;

use crate::StoreError;

pub fn run(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id            TEXT PRIMARY KEY,
            email         TEXT NOT NULL UNIQUE,
            name          TEXT NOT NULL,
            password      TEXT NOT NULL,
            remote_token  TEXT NOT NULL,
            partner_code  TEXT NOT NULL UNIQUE,
            cursor        TEXT NOT NULL DEFAULT '{}',
            created_at    TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Mirrored remote records of every kind. uid is the reconciliation
        -- key: unique per user and kind, assigned by the remote service.
        CREATE TABLE IF NOT EXISTS records (
            id          INTEGER PRIMARY KEY,
            user_id     TEXT NOT NULL REFERENCES users(id),
            kind        TEXT NOT NULL,
            uid         TEXT NOT NULL,
            data        TEXT NOT NULL,
            image       BLOB,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(user_id, kind, uid)
        );

        CREATE INDEX IF NOT EXISTS idx_records_user_kind
            ON records(user_id, kind);

        CREATE TABLE IF NOT EXISTS partner_edges (
            source_id   TEXT NOT NULL REFERENCES users(id),
            target_id   TEXT NOT NULL REFERENCES users(id),
            approved    INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (source_id, target_id),
            CHECK (source_id <> target_id)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
