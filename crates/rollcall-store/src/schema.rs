//! SQL schema for the Rollcall SQLite store.
//!
//! Executed once at connection startup. `PRAGMA user_version` records the
//! schema revision for later migrations.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- One row per person; a new enrollment replaces the previous embedding.
CREATE TABLE IF NOT EXISTS identities (
    identity_id   TEXT PRIMARY KEY,
    display_name  TEXT NOT NULL,
    embedding     BLOB NOT NULL,   -- little-endian f32 values
    model_version TEXT
);

-- Append-only. No UPDATE or DELETE is ever issued against this table.
CREATE TABLE IF NOT EXISTS attendance (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_id  TEXT NOT NULL,
    display_name TEXT NOT NULL,   -- name at time of recording
    date         TEXT NOT NULL,   -- YYYY-MM-DD, server local
    time         TEXT NOT NULL,   -- HH:MM:SS, server local
    confidence   TEXT
);

-- At most one record per identity per day.
CREATE UNIQUE INDEX IF NOT EXISTS attendance_identity_date_idx
    ON attendance(identity_id, date);
CREATE INDEX IF NOT EXISTS attendance_recent_idx
    ON attendance(date DESC, time DESC);

PRAGMA user_version = 1;
";
