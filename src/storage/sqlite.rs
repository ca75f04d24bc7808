//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the repository traits.

use crate::dedup::url_hash;
use crate::extract::{ProductRecord, SelectorConfig};
use crate::state::{PageStatus, SiteStatus, TaskStatus};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{
    PageStore, RecordSink, SiteStore, StorageError, StorageResult, StoreFactory, TaskStore,
};
use crate::storage::{NewSite, PageRecord, SiteRecord, TaskRecord, TaskStats};
use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;

const SITE_COLUMNS: &str = "id, name, start_url, status, max_depth, max_pages, crawl_delay, \
     link_pattern, extraction_config, crawl_interval_hours, last_crawl_at, next_crawl_at, created_at";

const TASK_COLUMNS: &str = "id, site_id, status, pages_crawled, pages_parsed, pages_failed, \
     pages_skipped_duplicate, products_found, products_created, products_updated, \
     created_at, started_at, finished_at, error_message";

const PAGE_COLUMNS: &str = "id, site_id, task_id, url, url_hash, content_hash, depth, version, \
     status, is_product_page, parsed_data, parse_error, product_id, first_seen_at, last_crawled_at";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens or creates the database at `path`
    ///
    /// Several stores may hold the same file open at once (one per crawl
    /// run); WAL mode and a busy timeout let them write without failing.
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

/// Opens a fresh `SqliteStorage` on the same file for every caller
#[derive(Debug, Clone)]
pub struct SqliteStoreFactory {
    path: PathBuf,
}

impl SqliteStoreFactory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StoreFactory for SqliteStoreFactory {
    type Store = SqliteStorage;

    fn open(&self) -> StorageResult<SqliteStorage> {
        SqliteStorage::new(&self.path)
    }
}

fn json_column<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(text) => serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        None => Ok(None),
    }
}

fn site_from_row(row: &Row<'_>) -> rusqlite::Result<SiteRecord> {
    Ok(SiteRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        start_url: row.get(2)?,
        status: SiteStatus::from_db_string(&row.get::<_, String>(3)?)
            .unwrap_or(SiteStatus::Inactive),
        max_depth: row.get(4)?,
        max_pages: row.get(5)?,
        crawl_delay: row.get(6)?,
        link_pattern: row.get(7)?,
        extraction_config: json_column::<SelectorConfig>(row, 8)?,
        crawl_interval_hours: row.get(9)?,
        last_crawl_at: row.get(10)?,
        next_crawl_at: row.get(11)?,
        created_at: row.get(12)?,
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<TaskRecord> {
    let counter = |idx: usize| row.get::<_, i64>(idx).map(|v| v.max(0) as u64);
    Ok(TaskRecord {
        id: row.get(0)?,
        site_id: row.get(1)?,
        status: TaskStatus::from_db_string(&row.get::<_, String>(2)?)
            .unwrap_or(TaskStatus::Failed),
        stats: TaskStats {
            pages_crawled: counter(3)?,
            pages_parsed: counter(4)?,
            pages_failed: counter(5)?,
            pages_skipped_duplicate: counter(6)?,
            products_found: counter(7)?,
            products_created: counter(8)?,
            products_updated: counter(9)?,
        },
        created_at: row.get(10)?,
        started_at: row.get(11)?,
        finished_at: row.get(12)?,
        error_message: row.get(13)?,
    })
}

fn page_from_row(row: &Row<'_>) -> rusqlite::Result<PageRecord> {
    Ok(PageRecord {
        id: row.get(0)?,
        site_id: row.get(1)?,
        task_id: row.get(2)?,
        url: row.get(3)?,
        url_hash: row.get(4)?,
        content_hash: row.get(5)?,
        depth: row.get(6)?,
        version: row.get(7)?,
        status: PageStatus::from_db_string(&row.get::<_, String>(8)?)
            .unwrap_or(PageStatus::Pending),
        is_product_page: row.get(9)?,
        parsed_data: row.get(10)?,
        parse_error: row.get(11)?,
        product_id: row.get(12)?,
        first_seen_at: row.get(13)?,
        last_crawled_at: row.get(14)?,
    })
}

impl SiteStore for SqliteStorage {
    fn create_site(&mut self, site: &NewSite) -> StorageResult<SiteRecord> {
        let now = Utc::now().to_rfc3339();
        let extraction = site
            .extraction_config
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.conn.execute(
            "INSERT INTO sites (name, start_url, status, max_depth, max_pages, crawl_delay,
                link_pattern, extraction_config, crawl_interval_hours, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                site.name,
                site.start_url,
                site.status.to_db_string(),
                site.max_depth,
                site.max_pages,
                site.crawl_delay,
                site.link_pattern,
                extraction,
                site.crawl_interval_hours,
                now,
            ],
        )?;

        self.get_site(self.conn.last_insert_rowid())
    }

    fn get_site(&self, site_id: i64) -> StorageResult<SiteRecord> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM sites WHERE id = ?1", SITE_COLUMNS),
                params![site_id],
                site_from_row,
            )
            .optional()?
            .ok_or(StorageError::SiteNotFound(site_id))
    }

    fn find_site_by_name(&self, name: &str) -> StorageResult<Option<SiteRecord>> {
        let site = self
            .conn
            .query_row(
                &format!("SELECT {} FROM sites WHERE name = ?1", SITE_COLUMNS),
                params![name],
                site_from_row,
            )
            .optional()?;
        Ok(site)
    }

    fn update_site(&mut self, site_id: i64, site: &NewSite) -> StorageResult<SiteRecord> {
        let now = Utc::now().to_rfc3339();
        let extraction = site
            .extraction_config
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let updated = self.conn.execute(
            "UPDATE sites SET name = ?1, start_url = ?2, status = ?3, max_depth = ?4,
                max_pages = ?5, crawl_delay = ?6, link_pattern = ?7, extraction_config = ?8,
                crawl_interval_hours = ?9, updated_at = ?10
             WHERE id = ?11",
            params![
                site.name,
                site.start_url,
                site.status.to_db_string(),
                site.max_depth,
                site.max_pages,
                site.crawl_delay,
                site.link_pattern,
                extraction,
                site.crawl_interval_hours,
                now,
                site_id,
            ],
        )?;

        if updated == 0 {
            return Err(StorageError::SiteNotFound(site_id));
        }
        self.get_site(site_id)
    }

    fn mark_crawled(
        &mut self,
        site_id: i64,
        last_crawl_at: &str,
        next_crawl_at: Option<&str>,
    ) -> StorageResult<()> {
        let updated = self.conn.execute(
            "UPDATE sites SET last_crawl_at = ?1, next_crawl_at = ?2 WHERE id = ?3",
            params![last_crawl_at, next_crawl_at, site_id],
        )?;
        if updated == 0 {
            return Err(StorageError::SiteNotFound(site_id));
        }
        Ok(())
    }

    fn list_sites(&self) -> StorageResult<Vec<SiteRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM sites ORDER BY id", SITE_COLUMNS))?;
        let sites = stmt
            .query_map([], site_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sites)
    }
}

impl TaskStore for SqliteStorage {
    fn create_task(&mut self, site_id: i64) -> StorageResult<TaskRecord> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO tasks (site_id, status, created_at) VALUES (?1, ?2, ?3)",
            params![site_id, TaskStatus::Pending.to_db_string(), now],
        )?;
        self.get_task(self.conn.last_insert_rowid())
    }

    fn get_task(&self, task_id: i64) -> StorageResult<TaskRecord> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
                params![task_id],
                task_from_row,
            )
            .optional()?
            .ok_or(StorageError::TaskNotFound(task_id))
    }

    fn transition_task(
        &mut self,
        task_id: i64,
        to: TaskStatus,
        error_message: Option<&str>,
    ) -> StorageResult<TaskRecord> {
        let current = self.get_task(task_id)?;
        if !current.status.can_transition_to(to) {
            return Err(StorageError::InvalidTransition {
                task_id,
                from: current.status,
                to,
            });
        }

        let now = Utc::now().to_rfc3339();
        let started_at = if to == TaskStatus::Running {
            Some(now.clone())
        } else {
            current.started_at
        };
        let finished_at = if to.is_terminal() { Some(now) } else { None };

        self.conn.execute(
            "UPDATE tasks SET status = ?1, started_at = ?2, finished_at = ?3,
                error_message = COALESCE(?4, error_message)
             WHERE id = ?5",
            params![
                to.to_db_string(),
                started_at,
                finished_at,
                error_message,
                task_id
            ],
        )?;

        self.get_task(task_id)
    }

    fn increment_stats(&mut self, task_id: i64, delta: &TaskStats) -> StorageResult<()> {
        let terminal: Vec<&str> = TaskStatus::all()
            .iter()
            .filter(|s| s.is_terminal())
            .map(|s| s.to_db_string())
            .collect();

        let updated = self.conn.execute(
            "UPDATE tasks SET
                pages_crawled = pages_crawled + ?1,
                pages_parsed = pages_parsed + ?2,
                pages_failed = pages_failed + ?3,
                pages_skipped_duplicate = pages_skipped_duplicate + ?4,
                products_found = products_found + ?5,
                products_created = products_created + ?6,
                products_updated = products_updated + ?7
             WHERE id = ?8 AND status NOT IN (?9, ?10, ?11)",
            params![
                delta.pages_crawled as i64,
                delta.pages_parsed as i64,
                delta.pages_failed as i64,
                delta.pages_skipped_duplicate as i64,
                delta.products_found as i64,
                delta.products_created as i64,
                delta.products_updated as i64,
                task_id,
                terminal[0],
                terminal[1],
                terminal[2],
            ],
        )?;

        if updated == 0 {
            // Distinguish a missing task from a terminal one
            self.get_task(task_id)?;
        }
        Ok(())
    }

    fn list_tasks(&self, site_id: i64) -> StorageResult<Vec<TaskRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM tasks WHERE site_id = ?1 ORDER BY id DESC",
            TASK_COLUMNS
        ))?;
        let tasks = stmt
            .query_map(params![site_id], task_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }
}

impl PageStore for SqliteStorage {
    fn get_or_create_page(
        &mut self,
        site_id: i64,
        task_id: i64,
        url: &str,
        depth: u32,
    ) -> StorageResult<(PageRecord, bool)> {
        let hash = url_hash(url);
        let now = Utc::now().to_rfc3339();

        // Concurrent runs over one site may race to create the same page
        let inserted = self.conn.execute(
            "INSERT INTO pages (site_id, task_id, url, url_hash, depth, version, status,
                is_product_page, first_seen_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, 0, ?7)
             ON CONFLICT(site_id, url_hash) DO NOTHING",
            params![
                site_id,
                task_id,
                url,
                hash,
                depth,
                PageStatus::Pending.to_db_string(),
                now
            ],
        )?;

        let page = self
            .get_page_by_url_hash(site_id, &hash)?
            .ok_or_else(|| StorageError::InvalidRecord(format!("page {} vanished", url)))?;
        Ok((page, inserted == 1))
    }

    fn get_page(&self, page_id: i64) -> StorageResult<PageRecord> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM pages WHERE id = ?1", PAGE_COLUMNS),
                params![page_id],
                page_from_row,
            )
            .optional()?
            .ok_or(StorageError::PageNotFound(page_id))
    }

    fn get_page_by_url_hash(
        &self,
        site_id: i64,
        url_hash: &str,
    ) -> StorageResult<Option<PageRecord>> {
        let page = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM pages WHERE site_id = ?1 AND url_hash = ?2",
                    PAGE_COLUMNS
                ),
                params![site_id, url_hash],
                page_from_row,
            )
            .optional()?;
        Ok(page)
    }

    fn update_page(&mut self, page: &PageRecord) -> StorageResult<()> {
        let updated = self.conn.execute(
            "UPDATE pages SET task_id = ?1, content_hash = ?2, depth = ?3, version = ?4,
                status = ?5, is_product_page = ?6, parsed_data = ?7, parse_error = ?8,
                product_id = ?9, last_crawled_at = ?10
             WHERE id = ?11",
            params![
                page.task_id,
                page.content_hash,
                page.depth,
                page.version,
                page.status.to_db_string(),
                page.is_product_page,
                page.parsed_data,
                page.parse_error,
                page.product_id,
                page.last_crawled_at,
                page.id,
            ],
        )?;
        if updated == 0 {
            return Err(StorageError::PageNotFound(page.id));
        }
        Ok(())
    }

    fn count_pages(&self, site_id: i64) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM pages WHERE site_id = ?1",
            params![site_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_pages_by_status(&self, site_id: i64, status: PageStatus) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM pages WHERE site_id = ?1 AND status = ?2",
            params![site_id, status.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn list_pages(&self, site_id: i64) -> StorageResult<Vec<PageRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM pages WHERE site_id = ?1 ORDER BY id",
            PAGE_COLUMNS
        ))?;
        let pages = stmt
            .query_map(params![site_id], page_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pages)
    }
}

impl RecordSink for SqliteStorage {
    fn upsert_product(&mut self, product: &ProductRecord) -> StorageResult<bool> {
        let id = product
            .id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| StorageError::InvalidRecord("product has no id".to_string()))?;
        let data = serde_json::to_string(product)?;
        let now = Utc::now().to_rfc3339();

        // Take the write lock up front: a deferred read lock cannot be
        // upgraded once another store has committed
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let existed = tx
            .query_row("SELECT 1 FROM products WHERE id = ?1", params![id], |_| Ok(()))
            .optional()?
            .is_some();

        if existed {
            tx.execute(
                "UPDATE products SET source_site_id = ?1, source_url = ?2, name = ?3,
                    price = ?4, currency = ?5, data = ?6, updated_at = ?7
                 WHERE id = ?8",
                params![
                    product.source_site_id,
                    product.source_url,
                    product.name,
                    product.price,
                    product.currency,
                    data,
                    now,
                    id
                ],
            )?;
        } else {
            tx.execute(
                "INSERT INTO products (id, source_site_id, source_url, name, price, currency,
                    data, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    id,
                    product.source_site_id,
                    product.source_url,
                    product.name,
                    product.price,
                    product.currency,
                    data,
                    now
                ],
            )?;
        }
        tx.commit()?;

        Ok(!existed)
    }

    fn get_product(&self, id: &str) -> StorageResult<Option<ProductRecord>> {
        let data: Option<String> = self
            .conn
            .query_row(
                "SELECT data FROM products WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        match data {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    fn count_products(&self, site_id: i64) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM products WHERE source_site_id = ?1",
            params![site_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}
