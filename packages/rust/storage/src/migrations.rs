//! SQL migration definitions for the TaxDesk database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: portal_state, scan_runs, documents, FTS5",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Change-detection state, one row per state key ('global')
CREATE TABLE IF NOT EXISTS portal_state (
    key        TEXT PRIMARY KEY,
    last_run   TEXT,
    seen_json  TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Scan history
CREATE TABLE IF NOT EXISTS scan_runs (
    id          TEXT PRIMARY KEY,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    stats_json  TEXT
);

-- Classified documents
CREATE TABLE IF NOT EXISTS documents (
    id            TEXT PRIMARY KEY,
    fingerprint   TEXT NOT NULL UNIQUE,
    portal_id     TEXT NOT NULL,
    portal_type   TEXT NOT NULL,
    title         TEXT NOT NULL,
    url           TEXT NOT NULL,
    published_at  TEXT NOT NULL,
    detected_at   TEXT NOT NULL,
    partition_id  TEXT NOT NULL,
    strategy      TEXT NOT NULL,
    confidence    REAL,
    tags          TEXT NOT NULL,
    rationale     TEXT NOT NULL,
    metadata_json TEXT
);

CREATE INDEX IF NOT EXISTS idx_documents_partition ON documents(partition_id);
CREATE INDEX IF NOT EXISTS idx_documents_portal ON documents(portal_id);

-- Full-text search on documents
CREATE VIRTUAL TABLE IF NOT EXISTS documents_fts USING fts5(
    title,
    tags,
    url,
    content=documents,
    content_rowid=rowid,
    tokenize='unicode61 remove_diacritics 2'
);

-- Triggers to keep FTS in sync with documents table
CREATE TRIGGER IF NOT EXISTS documents_fts_insert AFTER INSERT ON documents BEGIN
    INSERT INTO documents_fts(rowid, title, tags, url)
    VALUES (new.rowid, new.title, new.tags, new.url);
END;

CREATE TRIGGER IF NOT EXISTS documents_fts_delete AFTER DELETE ON documents BEGIN
    INSERT INTO documents_fts(documents_fts, rowid, title, tags, url)
    VALUES ('delete', old.rowid, old.title, old.tags, old.url);
END;

CREATE TRIGGER IF NOT EXISTS documents_fts_update AFTER UPDATE ON documents BEGIN
    INSERT INTO documents_fts(documents_fts, rowid, title, tags, url)
    VALUES ('delete', old.rowid, old.title, old.tags, old.url);
    INSERT INTO documents_fts(rowid, title, tags, url)
    VALUES (new.rowid, new.title, new.tags, new.url);
END;

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
    ]
}
