//! Crawl trigger
//!
//! `Crawler::start_crawl` is the only inbound operation of the crawl core.
//! It registers a pending task using a short-lived store, then hands the run
//! to a spawned worker that opens its own store. Callers learn the outcome
//! from the task row, not from a return value.

use crate::crawler::fetcher::Fetcher;
use crate::crawler::orchestrator::{Orchestrator, RunSettings};
use crate::extract::{ExtractionModel, ExtractionStrategy};
use crate::state::TaskStatus;
use crate::storage::{SiteStore, StorageError, StoreFactory, TaskStore};
use crate::{HarvestError, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Handle to a running crawl
#[derive(Debug)]
pub struct CrawlHandle {
    pub task_id: i64,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl CrawlHandle {
    /// Asks the run to stop after its current page
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token that cancels this run when triggered
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Waits for the worker to exit
    pub async fn wait(self) -> Result<()> {
        self.join.await?;
        Ok(())
    }
}

/// Starts crawl runs, one worker per call
pub struct Crawler<F: StoreFactory> {
    factory: Arc<F>,
    fetcher: Arc<dyn Fetcher>,
    model: Option<Arc<dyn ExtractionModel>>,
    settings: RunSettings,
}

impl<F: StoreFactory> Crawler<F> {
    pub fn new(factory: F, fetcher: Arc<dyn Fetcher>, settings: RunSettings) -> Self {
        Self {
            factory: Arc::new(factory),
            fetcher,
            model: None,
            settings,
        }
    }

    /// Sets the model used by sites without a selector config
    pub fn with_model(mut self, model: Arc<dyn ExtractionModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Registers a task for the site and starts its run in the background
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// * `SiteNotFound` - No site with this ID exists
    /// * `SiteInactive` - The site is switched off; no task is created
    pub fn start_crawl(&self, site_id: i64) -> Result<CrawlHandle> {
        let task_id = {
            let mut store = self.factory.open()?;
            let site = match store.get_site(site_id) {
                Ok(site) => site,
                Err(StorageError::SiteNotFound(id)) => return Err(HarvestError::SiteNotFound(id)),
                Err(e) => return Err(e.into()),
            };
            if !site.is_active() {
                return Err(HarvestError::SiteInactive(site_id));
            }
            store.create_task(site_id)?.id
        };

        let cancel = CancellationToken::new();
        let join = tokio::spawn(run_task(
            Arc::clone(&self.factory),
            Arc::clone(&self.fetcher),
            self.model.clone(),
            self.settings.clone(),
            site_id,
            task_id,
            cancel.clone(),
        ));

        tracing::info!(site_id, task_id, "Crawl task started");
        Ok(CrawlHandle {
            task_id,
            cancel,
            join,
        })
    }
}

/// Worker body: owns its store for the whole run
async fn run_task<F: StoreFactory>(
    factory: Arc<F>,
    fetcher: Arc<dyn Fetcher>,
    model: Option<Arc<dyn ExtractionModel>>,
    settings: RunSettings,
    site_id: i64,
    task_id: i64,
    cancel: CancellationToken,
) {
    let mut store = match factory.open() {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(site_id, task_id, "Failed to open store for crawl: {}", e);
            return;
        }
    };

    let prepared = store.get_site(site_id).map_err(HarvestError::from).and_then(|site| {
        let strategy =
            ExtractionStrategy::for_site(&site, model, settings.max_content_chars)?;
        Ok((site, strategy))
    });

    let (site, strategy) = match prepared {
        Ok(prepared) => prepared,
        Err(e) => {
            tracing::error!(site_id, task_id, "Crawl could not start: {}", e);
            if let Err(e) = store.transition_task(task_id, TaskStatus::Failed, Some(&e.to_string()))
            {
                tracing::error!(site_id, task_id, "Failed to record task failure: {}", e);
            }
            return;
        }
    };

    let mut orchestrator = Orchestrator::new(store, fetcher, strategy, settings, cancel);
    if let Err(e) = orchestrator.run(task_id, &site).await {
        tracing::error!(site_id, task_id, "Crawl task aborted: {}", e);
    }
}
