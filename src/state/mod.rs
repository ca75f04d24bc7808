//! State module for tracking crawl progress
//!
//! This module provides the lifecycle enums persisted by the storage layer.
//!
//! # Components
//!
//! - `TaskStatus`: Lifecycle of one crawl run (monotonic, forward-only)
//! - `PageStatus`: Outcome of the last extraction attempt for a page
//! - `SiteStatus`: Whether a site may be crawled at all

mod page_status;
mod task_status;

// Re-export main types
pub use page_status::{PageStatus, SiteStatus};
pub use task_status::TaskStatus;
