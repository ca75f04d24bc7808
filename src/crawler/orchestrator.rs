//! Crawl orchestrator - one breadth-first run over one site
//!
//! The run is a single sequential loop:
//! 1. Pop `(url, depth)` off a FIFO frontier, skipping URLs already visited
//! 2. Fetch it (bounded by the per-fetch timeout); a failed fetch is logged
//!    and the item abandoned
//! 3. Look up or create the page by URL hash and compare content hashes;
//!    unchanged content is counted as a duplicate and not re-extracted
//! 4. Otherwise bump the page version and run the extraction strategy
//! 5. Below `max_depth`, push newly discovered links at `depth + 1`
//! 6. Sleep `crawl_delay` before the next fetch
//!
//! Only storage failures, a vanished site or a bad site configuration end a
//! run early; they fail the task. Per-page problems never do.

use crate::crawler::fetcher::{FetchError, FetchSession, Fetcher, WaitStrategy};
use crate::crawler::links::extract_links;
use crate::dedup::{content_hash, derive_product_id, has_changed};
use crate::extract::{Extraction, ExtractionStrategy};
use crate::state::{PageStatus, TaskStatus};
use crate::storage::{CrawlStore, SiteRecord, StorageError, TaskStats};
use crate::url::{parse_http_url, strip_fragment, LinkPattern};
use crate::{ConfigError, Result};
use chrono::Utc;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Per-run knobs that do not live on the site
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Upper bound for a single fetch
    pub fetch_timeout: Duration,

    /// Passed through to the fetch session
    pub wait_strategy: WaitStrategy,

    /// Prompt truncation for model based extraction
    pub max_content_chars: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(30),
            wait_strategy: WaitStrategy::Load,
            max_content_chars: 15_000,
        }
    }
}

/// How the frontier walk ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WalkOutcome {
    Exhausted,
    Cancelled,
}

/// Executes one crawl task against one store
pub struct Orchestrator<S: CrawlStore> {
    store: S,
    fetcher: Arc<dyn Fetcher>,
    strategy: ExtractionStrategy,
    settings: RunSettings,
    cancel: CancellationToken,
}

impl<S: CrawlStore> Orchestrator<S> {
    pub fn new(
        store: S,
        fetcher: Arc<dyn Fetcher>,
        strategy: ExtractionStrategy,
        settings: RunSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            fetcher,
            strategy,
            settings,
            cancel,
        }
    }

    /// Runs the task to a terminal state
    ///
    /// Returns the final task status. An `Err` means the task row itself
    /// could not be updated.
    pub async fn run(&mut self, task_id: i64, site: &SiteRecord) -> Result<TaskStatus> {
        self.store
            .transition_task(task_id, TaskStatus::Running, None)?;
        tracing::info!(
            site_id = site.id,
            task_id,
            strategy = self.strategy.name(),
            "Starting crawl of {}",
            site.start_url
        );

        let mut session = match self.fetcher.open_session().await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(site_id = site.id, task_id, "Failed to open fetch session: {}", e);
                self.store
                    .transition_task(task_id, TaskStatus::Failed, Some(&e.to_string()))?;
                return Ok(TaskStatus::Failed);
            }
        };

        let started = Instant::now();
        let walked = self.walk(task_id, site, session.as_mut()).await;
        session.close().await;

        let outcome = match walked {
            Ok(WalkOutcome::Exhausted) => self.mark_site_crawled(site).map(|_| WalkOutcome::Exhausted),
            other => other,
        };

        let status = match outcome {
            Ok(WalkOutcome::Exhausted) => {
                self.store
                    .transition_task(task_id, TaskStatus::Completed, None)?
                    .status
            }
            Ok(WalkOutcome::Cancelled) => {
                tracing::info!(site_id = site.id, task_id, "Crawl cancelled");
                self.store
                    .transition_task(task_id, TaskStatus::Cancelled, None)?
                    .status
            }
            Err(e) => {
                tracing::error!(site_id = site.id, task_id, "Crawl failed: {}", e);
                self.store
                    .transition_task(task_id, TaskStatus::Failed, Some(&e.to_string()))?
                    .status
            }
        };

        let stats = self.store.get_task(task_id)?.stats;
        tracing::info!(
            site_id = site.id,
            task_id,
            status = %status,
            pages_crawled = stats.pages_crawled,
            products_found = stats.products_found,
            "Crawl finished in {:?}",
            started.elapsed()
        );

        Ok(status)
    }

    /// Walks the frontier until it is empty, the page budget is spent or
    /// the run is cancelled
    async fn walk(
        &mut self,
        task_id: i64,
        site: &SiteRecord,
        session: &mut dyn FetchSession,
    ) -> Result<WalkOutcome> {
        let mut start_url = parse_http_url(&site.start_url)?;
        strip_fragment(&mut start_url);
        let pattern = site
            .link_pattern
            .as_deref()
            .map(LinkPattern::new)
            .transpose()?;

        let max_pages = site.max_pages as usize;
        let delay = Duration::try_from_secs_f64(site.crawl_delay.max(0.0)).map_err(|e| {
            ConfigError::Validation(format!(
                "site {} has an unusable crawl delay {}: {}",
                site.id, site.crawl_delay, e
            ))
        })?;

        let mut frontier: VecDeque<(Url, u32)> = VecDeque::new();
        let mut enqueued: HashSet<String> = HashSet::new();
        let mut visited: HashSet<String> = HashSet::new();

        enqueued.insert(start_url.to_string());
        frontier.push_back((start_url, 0));

        let mut crawled = 0usize;
        let started = Instant::now();

        while crawled < max_pages {
            if self.cancel.is_cancelled() {
                return Ok(WalkOutcome::Cancelled);
            }

            let Some((url, depth)) = frontier.pop_front() else {
                tracing::debug!(site_id = site.id, task_id, "Frontier is empty");
                break;
            };
            if !visited.insert(url.to_string()) {
                continue;
            }

            // The site may be deleted by the admin layer while we run
            self.store.get_site(site.id)?;

            tracing::debug!(site_id = site.id, task_id, url = %url, depth, "Fetching");
            let fetched = fetch_with_timeout(
                session,
                &url,
                self.settings.wait_strategy,
                self.settings.fetch_timeout,
            )
            .await;

            match fetched {
                Ok(html) => {
                    self.process_page(task_id, site, &url, depth, &html).await?;
                    crawled += 1;

                    if depth < site.max_depth {
                        for link in extract_links(&html, &url, pattern.as_ref()) {
                            if enqueued.len() >= max_pages {
                                break;
                            }
                            if enqueued.insert(link.to_string()) {
                                frontier.push_back((link, depth + 1));
                            }
                        }
                    }

                    if crawled % 10 == 0 {
                        let rate = crawled as f64 / started.elapsed().as_secs_f64().max(0.001);
                        tracing::info!(
                            site_id = site.id,
                            task_id,
                            "Progress: {} pages crawled, {} in frontier, {:.2} pages/sec",
                            crawled,
                            frontier.len(),
                            rate
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(site_id = site.id, task_id, url = %url, depth, "Fetch failed: {}", e);
                }
            }

            if !delay.is_zero() && !frontier.is_empty() && crawled < max_pages {
                tokio::select! {
                    _ = self.cancel.cancelled() => return Ok(WalkOutcome::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        Ok(WalkOutcome::Exhausted)
    }

    /// Records one fetched page and extracts it if its content changed
    async fn process_page(
        &mut self,
        task_id: i64,
        site: &SiteRecord,
        url: &Url,
        depth: u32,
        html: &str,
    ) -> Result<()> {
        let (mut page, created) =
            self.store
                .get_or_create_page(site.id, task_id, url.as_str(), depth)?;
        let hash = content_hash(html);

        page.task_id = task_id;
        page.depth = depth;
        page.last_crawled_at = Some(Utc::now().to_rfc3339());

        if !created && !has_changed(page.content_hash.as_deref(), &hash) {
            self.store.update_page(&page)?;
            self.store.increment_stats(
                task_id,
                &TaskStats {
                    pages_crawled: 1,
                    pages_skipped_duplicate: 1,
                    ..Default::default()
                },
            )?;
            tracing::debug!(site_id = site.id, task_id, url = %url, "Content unchanged");
            return Ok(());
        }

        page.content_hash = Some(hash);
        page.version += 1;

        let mut delta = TaskStats {
            pages_crawled: 1,
            ..Default::default()
        };

        match self.strategy.extract(html, url).await {
            Ok(Extraction::Product(mut product)) => {
                product.source_site_id = site.id;
                product.source_url = url.to_string();
                if product.id.as_deref().map_or(true, |id| id.trim().is_empty()) {
                    product.id = Some(derive_product_id(site.id, &page.url_hash));
                }

                let is_new = self.store.upsert_product(&product)?;

                page.status = PageStatus::Parsed;
                page.is_product_page = true;
                page.parsed_data =
                    Some(serde_json::to_string(&product).map_err(StorageError::from)?);
                page.parse_error = None;
                page.product_id = product.id.clone();

                delta.pages_parsed = 1;
                delta.products_found = 1;
                if is_new {
                    delta.products_created = 1;
                } else {
                    delta.products_updated = 1;
                }
                tracing::debug!(
                    site_id = site.id,
                    task_id,
                    url = %url,
                    is_new,
                    "Extracted product '{}'",
                    product.name
                );
            }
            Ok(Extraction::NotAProduct) => {
                page.status = PageStatus::Skipped;
                page.is_product_page = false;
                page.parsed_data = None;
                page.parse_error = None;
                page.product_id = None;
            }
            Err(e) => {
                tracing::warn!(site_id = site.id, task_id, url = %url, "Extraction failed: {}", e);
                page.status = PageStatus::Failed;
                page.is_product_page = false;
                page.parsed_data = None;
                page.parse_error = Some(e.to_string());
                page.product_id = None;
                delta.pages_failed = 1;
            }
        }

        self.store.update_page(&page)?;
        self.store.increment_stats(task_id, &delta)?;
        Ok(())
    }

    fn mark_site_crawled(&mut self, site: &SiteRecord) -> Result<()> {
        let now = Utc::now();
        let next = site.next_crawl_after(now).map(|t| t.to_rfc3339());
        self.store
            .mark_crawled(site.id, &now.to_rfc3339(), next.as_deref())?;
        Ok(())
    }

    /// Gives the store back, e.g. to inspect it after a run
    pub fn into_store(self) -> S {
        self.store
    }
}

async fn fetch_with_timeout(
    session: &mut dyn FetchSession,
    url: &Url,
    wait: WaitStrategy,
    timeout: Duration,
) -> std::result::Result<String, FetchError> {
    match tokio::time::timeout(timeout, session.fetch(url, wait)).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout(timeout)),
    }
}
