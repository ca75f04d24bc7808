//! Statistics generation from the crawl database
//!
//! This module provides functionality for extracting and displaying
//! per-site crawl statistics from the storage layer.

use crate::state::PageStatus;
use crate::storage::{
    PageStore, RecordSink, SiteRecord, SiteStore, StorageResult, TaskRecord, TaskStore,
};
use std::collections::HashMap;
use std::fmt::Write;

/// Crawl statistics of one site
#[derive(Debug, Clone)]
pub struct SiteStatistics {
    pub site: SiteRecord,

    /// Pages ever recorded for the site
    pub total_pages: u64,

    /// Count of pages by status (zero counts omitted)
    pub pages_by_status: HashMap<PageStatus, u64>,

    /// Products whose source is this site
    pub products: u64,

    /// Number of crawl tasks run so far
    pub task_count: usize,

    /// The most recent task, if any
    pub latest_task: Option<TaskRecord>,
}

/// Loads statistics of one site
pub fn load_site_statistics<S>(store: &S, site_id: i64) -> StorageResult<SiteStatistics>
where
    S: SiteStore + TaskStore + PageStore + RecordSink,
{
    let site = store.get_site(site_id)?;
    let total_pages = store.count_pages(site_id)?;

    let mut pages_by_status = HashMap::new();
    for status in PageStatus::all() {
        let count = store.count_pages_by_status(site_id, status)?;
        if count > 0 {
            pages_by_status.insert(status, count);
        }
    }

    let products = store.count_products(site_id)?;
    let tasks = store.list_tasks(site_id)?;

    Ok(SiteStatistics {
        site,
        total_pages,
        pages_by_status,
        products,
        task_count: tasks.len(),
        latest_task: tasks.into_iter().next(),
    })
}

/// One line describing a task's outcome
pub fn format_task_summary(task: &TaskRecord) -> String {
    let s = &task.stats;
    let mut line = format!(
        "task {} [{}]: {} crawled, {} parsed, {} failed, {} unchanged; products {} found ({} new, {} updated)",
        task.id,
        task.status,
        s.pages_crawled,
        s.pages_parsed,
        s.pages_failed,
        s.pages_skipped_duplicate,
        s.products_found,
        s.products_created,
        s.products_updated,
    );
    if let Some(error) = &task.error_message {
        let _ = write!(line, " - error: {}", error);
    }
    line
}

/// Renders statistics as a text block
pub fn render_statistics(stats: &SiteStatistics) -> String {
    let mut out = String::new();
    let site = &stats.site;

    let _ = writeln!(out, "=== {} (site {}) ===", site.name, site.id);
    let _ = writeln!(out, "  Start URL: {}", site.start_url);
    let _ = writeln!(out, "  Status: {}", site.status);
    let _ = writeln!(
        out,
        "  Last crawl: {}",
        site.last_crawl_at.as_deref().unwrap_or("never")
    );
    if let Some(next) = &site.next_crawl_at {
        let _ = writeln!(out, "  Next crawl due: {}", next);
    }

    let _ = writeln!(out, "  Pages: {}", stats.total_pages);
    let mut counts: Vec<_> = stats.pages_by_status.iter().collect();
    counts.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.to_db_string().cmp(b.0.to_db_string())));
    for (status, count) in counts {
        let percentage = if stats.total_pages > 0 {
            (*count as f64 / stats.total_pages as f64) * 100.0
        } else {
            0.0
        };
        let _ = writeln!(out, "    {}: {} ({:.1}%)", status, count, percentage);
    }

    let _ = writeln!(out, "  Products: {}", stats.products);
    let _ = writeln!(out, "  Tasks: {}", stats.task_count);
    if let Some(task) = &stats.latest_task {
        let _ = writeln!(out, "  Latest {}", format_task_summary(task));
    }

    out
}

/// Prints statistics to stdout
pub fn print_statistics(stats: &SiteStatistics) {
    println!("{}", render_statistics(stats));
}
