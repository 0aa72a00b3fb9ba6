//! Database schema for the page store

/// Current schema version, recorded in `store_info`
pub const SCHEMA_VERSION: u32 = 1;

/// SQL schema for the page store
pub const SCHEMA_SQL: &str = r#"
-- One row per fetched URI; a refetch replaces the row
CREATE TABLE IF NOT EXISTS pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uri TEXT NOT NULL UNIQUE,
    host TEXT NOT NULL,
    fetch_status INTEGER NOT NULL,
    content_type TEXT,
    content_length INTEGER NOT NULL DEFAULT 0,
    content_digest TEXT,
    path_from_seed TEXT NOT NULL,
    via TEXT,
    outlinks INTEGER NOT NULL DEFAULT 0,
    fetch_attempts INTEGER NOT NULL DEFAULT 0,
    thread INTEGER,
    written_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pages_host ON pages(host);
CREATE INDEX IF NOT EXISTS idx_pages_status ON pages(fetch_status);

-- Store-wide facts: crawl name, schema version
CREATE TABLE IF NOT EXISTS store_info (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO store_info (key, value) VALUES ('schema-version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}
