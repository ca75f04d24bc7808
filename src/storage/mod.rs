//! Storage module for persisting crawl data
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite database initialization and schema management
//! - Site, task and page records (the crawl history)
//! - The product record sink
//!
//! Every crawl run opens its own store through a `StoreFactory`, so a run never
//! shares a connection or transaction with whoever triggered it.

mod schema;
mod sqlite;
mod traits;

pub use sqlite::{SqliteStorage, SqliteStoreFactory};
pub use traits::{
    CrawlStore, PageStore, RecordSink, SiteStore, StorageError, StorageResult, StoreFactory,
    TaskStore,
};

use crate::extract::SelectorConfig;
use crate::state::{PageStatus, SiteStatus, TaskStatus};
use chrono::{DateTime, Duration, Utc};
use std::path::Path;

/// Opens (or creates) the SQLite store at the given path
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    SqliteStorage::new(path)
}

/// A site as stored by the admin layer
#[derive(Debug, Clone, PartialEq)]
pub struct SiteRecord {
    pub id: i64,
    pub name: String,
    pub start_url: String,
    pub status: SiteStatus,
    pub max_depth: u32,
    pub max_pages: u32,
    /// Seconds between fetches
    pub crawl_delay: f64,
    pub link_pattern: Option<String>,
    /// Selector map; `None` selects model based extraction
    pub extraction_config: Option<SelectorConfig>,
    pub crawl_interval_hours: Option<u32>,
    pub last_crawl_at: Option<String>,
    pub next_crawl_at: Option<String>,
    pub created_at: String,
}

impl SiteRecord {
    pub fn is_active(&self) -> bool {
        self.status == SiteStatus::Active
    }

    /// When the next crawl is due, given a crawl finishing at `finished`
    pub fn next_crawl_after(&self, finished: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.crawl_interval_hours
            .map(|hours| finished + Duration::hours(i64::from(hours)))
    }
}

/// Writable site fields, used for creation and for syncing from config
#[derive(Debug, Clone, PartialEq)]
pub struct NewSite {
    pub name: String,
    pub start_url: String,
    pub status: SiteStatus,
    pub max_depth: u32,
    pub max_pages: u32,
    pub crawl_delay: f64,
    pub link_pattern: Option<String>,
    pub extraction_config: Option<SelectorConfig>,
    pub crawl_interval_hours: Option<u32>,
}

/// Aggregate counters of a task
///
/// Also used as a delta for `TaskStore::increment_stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStats {
    pub pages_crawled: u64,
    pub pages_parsed: u64,
    pub pages_failed: u64,
    pub pages_skipped_duplicate: u64,
    pub products_found: u64,
    pub products_created: u64,
    pub products_updated: u64,
}

impl TaskStats {
    /// Adds another set of counters to this one
    pub fn add(&mut self, other: &TaskStats) {
        self.pages_crawled += other.pages_crawled;
        self.pages_parsed += other.pages_parsed;
        self.pages_failed += other.pages_failed;
        self.pages_skipped_duplicate += other.pages_skipped_duplicate;
        self.products_found += other.products_found;
        self.products_created += other.products_created;
        self.products_updated += other.products_updated;
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// One execution of a site crawl
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub id: i64,
    pub site_id: i64,
    pub status: TaskStatus,
    pub stats: TaskStats,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub error_message: Option<String>,
}

/// Durable crawl state of one URL within a site
#[derive(Debug, Clone, PartialEq)]
pub struct PageRecord {
    pub id: i64,
    pub site_id: i64,
    /// The task that last touched this page
    pub task_id: i64,
    pub url: String,
    pub url_hash: String,
    pub content_hash: Option<String>,
    pub depth: u32,
    /// Bumped only when `content_hash` changes
    pub version: u32,
    pub status: PageStatus,
    pub is_product_page: bool,
    /// Extracted product as JSON
    pub parsed_data: Option<String>,
    pub parse_error: Option<String>,
    pub product_id: Option<String>,
    pub first_seen_at: String,
    pub last_crawled_at: Option<String>,
}
