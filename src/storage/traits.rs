//! Repository traits and error types
//!
//! The crawl core consumes storage only through these traits. Writes take
//! `&mut self`; a store is owned by exactly one crawl run or request.

use crate::extract::ProductRecord;
use crate::state::{PageStatus, TaskStatus};
use crate::storage::{NewSite, PageRecord, SiteRecord, TaskRecord, TaskStats};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Site not found: {0}")]
    SiteNotFound(i64),

    #[error("Task not found: {0}")]
    TaskNotFound(i64),

    #[error("Page not found: {0}")]
    PageNotFound(i64),

    #[error("Invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: i64,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Site repository
///
/// Sites belong to the admin layer; the crawl core only reads them and
/// stamps crawl times.
pub trait SiteStore {
    fn create_site(&mut self, site: &NewSite) -> StorageResult<SiteRecord>;

    /// Gets a site by ID, failing with `SiteNotFound` if it does not exist
    fn get_site(&self, site_id: i64) -> StorageResult<SiteRecord>;

    fn find_site_by_name(&self, name: &str) -> StorageResult<Option<SiteRecord>>;

    /// Overwrites the writable fields of a site
    fn update_site(&mut self, site_id: i64, site: &NewSite) -> StorageResult<SiteRecord>;

    /// Records the end of a successful crawl
    fn mark_crawled(
        &mut self,
        site_id: i64,
        last_crawl_at: &str,
        next_crawl_at: Option<&str>,
    ) -> StorageResult<()>;

    fn list_sites(&self) -> StorageResult<Vec<SiteRecord>>;
}

/// Task repository
pub trait TaskStore {
    /// Creates a task in the `Pending` state
    fn create_task(&mut self, site_id: i64) -> StorageResult<TaskRecord>;

    fn get_task(&self, task_id: i64) -> StorageResult<TaskRecord>;

    /// Moves a task forward through its lifecycle
    ///
    /// Sets `started_at` on entering `Running` and `finished_at` on entering
    /// a terminal state. Backward or sideways moves are rejected.
    fn transition_task(
        &mut self,
        task_id: i64,
        to: TaskStatus,
        error_message: Option<&str>,
    ) -> StorageResult<TaskRecord>;

    /// Adds the given deltas to the task's counters
    ///
    /// A no-op once the task is terminal.
    fn increment_stats(&mut self, task_id: i64, delta: &TaskStats) -> StorageResult<()>;

    /// Tasks of a site, newest first
    fn list_tasks(&self, site_id: i64) -> StorageResult<Vec<TaskRecord>>;
}

/// Page repository
pub trait PageStore {
    /// Looks up a page by the hash of its URL, creating it when absent
    ///
    /// Returns the page and whether it was created by this call. An existing
    /// row is returned untouched.
    fn get_or_create_page(
        &mut self,
        site_id: i64,
        task_id: i64,
        url: &str,
        depth: u32,
    ) -> StorageResult<(PageRecord, bool)>;

    fn get_page(&self, page_id: i64) -> StorageResult<PageRecord>;

    fn get_page_by_url_hash(&self, site_id: i64, url_hash: &str)
        -> StorageResult<Option<PageRecord>>;

    /// Writes back every mutable column of a page
    fn update_page(&mut self, page: &PageRecord) -> StorageResult<()>;

    fn count_pages(&self, site_id: i64) -> StorageResult<u64>;

    fn count_pages_by_status(&self, site_id: i64, status: PageStatus) -> StorageResult<u64>;

    fn list_pages(&self, site_id: i64) -> StorageResult<Vec<PageRecord>>;
}

/// Canonical product store
pub trait RecordSink {
    /// Inserts or replaces a product by id
    ///
    /// Returns true if no product with this id existed before the write.
    fn upsert_product(&mut self, product: &ProductRecord) -> StorageResult<bool>;

    fn get_product(&self, id: &str) -> StorageResult<Option<ProductRecord>>;

    fn count_products(&self, site_id: i64) -> StorageResult<u64>;
}

/// Everything a crawl run needs from storage
pub trait CrawlStore: SiteStore + TaskStore + PageStore + RecordSink + Send {}

impl<T> CrawlStore for T where T: SiteStore + TaskStore + PageStore + RecordSink + Send {}

/// Opens independent stores, one per run or request
pub trait StoreFactory: Send + Sync + 'static {
    type Store: CrawlStore + 'static;

    fn open(&self) -> StorageResult<Self::Store>;
}
