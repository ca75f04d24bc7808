//! Output module for crawl summaries
//!
//! This module handles:
//! - Loading per-site statistics from storage
//! - Rendering site statistics and task outcomes for the CLI

pub mod stats;

pub use stats::{
    format_task_summary, load_site_statistics, print_statistics, render_statistics,
    SiteStatistics,
};

use crate::storage::{PageStore, RecordSink, SiteStore, StorageResult, TaskStore};

/// Loads statistics for every known site, in site ID order
pub fn load_all_statistics<S>(store: &S) -> StorageResult<Vec<SiteStatistics>>
where
    S: SiteStore + TaskStore + PageStore + RecordSink,
{
    store
        .list_sites()?
        .iter()
        .map(|site| load_site_statistics(store, site.id))
        .collect()
}
