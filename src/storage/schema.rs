//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Harvester database.

/// SQL schema for the database
///
/// `site_id` columns carry no foreign key: the admin layer may delete a site
/// while its task and page history is kept.
pub const SCHEMA_SQL: &str = r#"
-- Sites to crawl (owned by the admin layer)
CREATE TABLE IF NOT EXISTS sites (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    start_url TEXT NOT NULL,
    status TEXT NOT NULL,
    max_depth INTEGER NOT NULL,
    max_pages INTEGER NOT NULL,
    crawl_delay REAL NOT NULL DEFAULT 0,
    link_pattern TEXT,
    extraction_config TEXT,
    crawl_interval_hours INTEGER,
    last_crawl_at TEXT,
    next_crawl_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- One row per crawl run
CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_id INTEGER NOT NULL,
    status TEXT NOT NULL,
    pages_crawled INTEGER NOT NULL DEFAULT 0,
    pages_parsed INTEGER NOT NULL DEFAULT 0,
    pages_failed INTEGER NOT NULL DEFAULT 0,
    pages_skipped_duplicate INTEGER NOT NULL DEFAULT 0,
    products_found INTEGER NOT NULL DEFAULT 0,
    products_created INTEGER NOT NULL DEFAULT 0,
    products_updated INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    started_at TEXT,
    finished_at TEXT,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_tasks_site ON tasks(site_id);

-- Crawl state per URL, updated in place across runs
CREATE TABLE IF NOT EXISTS pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_id INTEGER NOT NULL,
    task_id INTEGER NOT NULL REFERENCES tasks(id),
    url TEXT NOT NULL,
    url_hash TEXT NOT NULL,
    content_hash TEXT,
    depth INTEGER NOT NULL,
    version INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    is_product_page INTEGER NOT NULL DEFAULT 0,
    parsed_data TEXT,
    parse_error TEXT,
    product_id TEXT,
    first_seen_at TEXT NOT NULL,
    last_crawled_at TEXT,
    UNIQUE(site_id, url_hash)
);

CREATE INDEX IF NOT EXISTS idx_pages_site_status ON pages(site_id, status);

-- Canonical product records
CREATE TABLE IF NOT EXISTS products (
    id TEXT PRIMARY KEY,
    source_site_id INTEGER NOT NULL,
    source_url TEXT NOT NULL,
    name TEXT NOT NULL,
    price REAL,
    currency TEXT,
    data TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_products_site ON products(source_site_id);
"#;

/// Initializes the database schema
///
/// Safe to call on every open.
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
