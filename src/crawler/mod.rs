//! Crawler module for site walking and page processing
//!
//! This module contains the core crawling logic, including:
//! - The `Fetcher` capability and its HTTP implementation
//! - Link extraction and filtering
//! - The per-run orchestrator (BFS walk, dedup, extraction, stats)
//! - The trigger that starts runs as independent workers

mod fetcher;
mod links;
mod orchestrator;
mod trigger;

pub use fetcher::{FetchError, FetchSession, Fetcher, HttpFetcher, WaitStrategy};
pub use links::extract_links;
pub use orchestrator::{Orchestrator, RunSettings};
pub use trigger::{CrawlHandle, Crawler};
