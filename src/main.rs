//! Harvester main entry point
//!
//! This is the command-line interface for the Harvester site crawler. It acts
//! as the trigger: sites from the config are synced into the database, then a
//! crawl is started for each selected active site.

use anyhow::{bail, Context};
use clap::Parser;
use harvester::config::{load_config_with_hash, Config};
use harvester::crawler::{CrawlHandle, Crawler, HttpFetcher, RunSettings};
use harvester::extract::OpenAiModel;
use harvester::output::{
    format_task_summary, load_all_statistics, load_site_statistics, print_statistics,
};
use harvester::storage::{SiteRecord, SiteStore, SqliteStorage, SqliteStoreFactory, TaskStore};
use harvester::TaskStatus;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Harvester: an incremental site crawler and product extractor
///
/// Harvester walks each configured site breadth-first within its depth, page
/// and rate budgets, re-extracts only pages whose content changed since the
/// last run, and upserts the products it finds.
#[derive(Parser, Debug)]
#[command(name = "harvester")]
#[command(version)]
#[command(about = "An incremental site crawler and product extractor", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Only crawl the site with this name
    #[arg(long, value_name = "NAME")]
    site: Option<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be crawled without crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if let Some(name) = &cli.site {
        if !config.sites.iter().any(|s| &s.name == name) {
            bail!("no site named '{}' in {}", name, cli.config.display());
        }
    }

    if cli.dry_run {
        handle_dry_run(&config, cli.site.as_deref());
        return Ok(());
    }

    let db_path = Path::new(&config.storage.database_path);
    let mut storage = SqliteStorage::new(db_path)
        .with_context(|| format!("failed to open database {}", db_path.display()))?;
    let sites = sync_sites(&mut storage, &config, cli.site.as_deref())?;

    if cli.stats {
        let statistics = match &cli.site {
            Some(_) => sites
                .iter()
                .map(|site| load_site_statistics(&storage, site.id))
                .collect::<Result<Vec<_>, _>>()?,
            // Includes sites that have since been removed from the config
            None => load_all_statistics(&storage)?,
        };
        for stats in &statistics {
            print_statistics(stats);
        }
        return Ok(());
    }
    drop(storage);

    handle_crawl(&config, sites).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("harvester=info,warn"),
            1 => EnvFilter::new("harvester=debug,info"),
            2 => EnvFilter::new("harvester=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Creates or updates the configured sites, returning the selected ones
fn sync_sites(
    storage: &mut SqliteStorage,
    config: &Config,
    only: Option<&str>,
) -> anyhow::Result<Vec<SiteRecord>> {
    let mut selected = Vec::new();
    for entry in &config.sites {
        let new_site = entry.to_new_site();
        let site = match storage.find_site_by_name(&entry.name)? {
            Some(existing) => storage.update_site(existing.id, &new_site)?,
            None => {
                let created = storage.create_site(&new_site)?;
                tracing::info!(site_id = created.id, "Registered site '{}'", created.name);
                created
            }
        };

        if only.map_or(true, |name| name == site.name) {
            selected.push(site);
        }
    }
    Ok(selected)
}

/// Handles the --dry-run mode: shows what would be crawled
fn handle_dry_run(config: &Config, only: Option<&str>) {
    println!("=== Harvester Dry Run ===\n");

    println!("Storage:");
    println!("  Database: {}", config.storage.database_path);

    println!("\nFetcher:");
    println!("  User agent: {}", config.fetcher.user_agent);
    println!("  Timeout: {}s", config.fetcher.timeout_secs);
    println!("  Wait strategy: {}", config.fetcher.wait_strategy);

    match &config.model {
        Some(model) => {
            println!("\nModel:");
            println!("  Endpoint: {}", model.endpoint);
            println!("  Model: {}", model.model);
            println!("  Max content chars: {}", model.max_content_chars);
        }
        None => println!("\nModel: not configured"),
    }

    let sites: Vec<_> = config
        .sites
        .iter()
        .filter(|s| only.map_or(true, |name| name == s.name))
        .collect();

    println!("\nSites ({}):", sites.len());
    for site in &sites {
        let strategy = if site.extraction.is_some() {
            "selector"
        } else {
            "model"
        };
        println!(
            "  - {} [{}] {}",
            site.name,
            if site.active { "active" } else { "inactive" },
            site.start_url
        );
        println!(
            "    depth <= {}, pages <= {}, delay {}s, strategy {}",
            site.max_depth, site.max_pages, site.crawl_delay, strategy
        );
        if let Some(pattern) = &site.link_pattern {
            println!("    link pattern: {}", pattern);
        }
        if site.extraction.is_none() && config.model.is_none() {
            println!("    ! no selectors and no model: this site's crawl would fail");
        }
    }

    println!("\n✓ Configuration is valid");
    println!(
        "✓ Would crawl {} active site(s)",
        sites.iter().filter(|s| s.active).count()
    );
}

fn build_model(config: &Config) -> anyhow::Result<Option<OpenAiModel>> {
    let Some(model) = &config.model else {
        return Ok(None);
    };

    let api_key = match &model.api_key_env {
        Some(var) => match std::env::var(var) {
            Ok(key) => Some(key),
            Err(_) => {
                tracing::warn!("Environment variable {} is not set; calling model without a key", var);
                None
            }
        },
        None => None,
    };

    let client = OpenAiModel::new(
        &model.endpoint,
        &model.model,
        api_key,
        Duration::from_secs(model.timeout_secs),
    )
    .context("failed to build model client")?;
    Ok(Some(client))
}

/// Handles the main crawl operation
async fn handle_crawl(config: &Config, sites: Vec<SiteRecord>) -> anyhow::Result<()> {
    let fetcher = HttpFetcher::new(
        &config.fetcher.user_agent,
        Duration::from_secs(config.fetcher.timeout_secs),
    )
    .context("failed to build HTTP client")?;

    let settings = RunSettings {
        fetch_timeout: Duration::from_secs(config.fetcher.timeout_secs),
        wait_strategy: config.fetcher.wait_strategy,
        max_content_chars: config
            .model
            .as_ref()
            .map_or(RunSettings::default().max_content_chars, |m| m.max_content_chars),
    };

    let factory = SqliteStoreFactory::new(&config.storage.database_path);
    let mut crawler = Crawler::new(factory.clone(), Arc::new(fetcher), settings);
    if let Some(model) = build_model(config)? {
        crawler = crawler.with_model(Arc::new(model));
    }

    let mut handles: Vec<(String, CrawlHandle)> = Vec::new();
    for site in &sites {
        if !site.is_active() {
            tracing::info!(site_id = site.id, "Skipping inactive site '{}'", site.name);
            continue;
        }
        let handle = crawler
            .start_crawl(site.id)
            .with_context(|| format!("failed to start crawl of '{}'", site.name))?;
        handles.push((site.name.clone(), handle));
    }

    if handles.is_empty() {
        tracing::info!("No active sites to crawl");
        return Ok(());
    }

    let tokens: Vec<_> = handles.iter().map(|(_, h)| h.cancellation_token()).collect();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping crawls after the current page");
            for token in tokens {
                token.cancel();
            }
        }
    });

    let mut task_ids = Vec::new();
    for (name, handle) in handles {
        let task_id = handle.task_id;
        if let Err(e) = handle.wait().await {
            tracing::error!(task_id, "Crawl worker for '{}' panicked: {}", name, e);
        }
        task_ids.push((name, task_id));
    }

    let storage = SqliteStorage::new(factory.path())?;
    let mut failed = 0;
    for (name, task_id) in task_ids {
        let task = storage.get_task(task_id)?;
        if task.status == TaskStatus::Failed {
            failed += 1;
        }
        println!("{}: {}", name, format_task_summary(&task));
    }

    if failed > 0 {
        bail!("{} crawl(s) failed", failed);
    }
    Ok(())
}
