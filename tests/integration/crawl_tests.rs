//! Integration tests for the crawler
//!
//! Runs go through `Crawler::start_crawl` against a file backed SQLite store,
//! exactly as the CLI drives them. Most tests use an in-memory web so the
//! frontier is fully scripted; one test crawls a wiremock server over HTTP.

use async_trait::async_trait;
use harvester::crawler::{
    Crawler, FetchError, FetchSession, Fetcher, HttpFetcher, RunSettings, WaitStrategy,
};
use harvester::dedup::{derive_product_id, url_hash};
use harvester::extract::{ExtractionError, ExtractionModel, SelectorConfig};
use harvester::storage::{
    NewSite, PageStore, RecordSink, SiteRecord, SiteStore, SqliteStorage, SqliteStoreFactory,
    TaskRecord, TaskStore,
};
use harvester::{HarvestError, PageStatus, SiteStatus, TaskStatus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const START: &str = "https://shop.test/";

type FetchHook = Arc<dyn Fn(&Url) + Send + Sync>;

/// A scripted web: URLs missing from the map answer with HTTP 500
#[derive(Clone, Default)]
struct FakeWeb {
    pages: Arc<Mutex<HashMap<String, String>>>,
    fetched: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicUsize>,
    hook: Option<FetchHook>,
}

impl FakeWeb {
    fn with_pages(pages: &[(&str, &str)]) -> Self {
        let web = Self::default();
        for (url, html) in pages {
            web.set(url, html);
        }
        web
    }

    fn set(&self, url: &str, html: &str) {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), html.to_string());
    }

    fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    /// How many sessions have been closed
    fn closes(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

struct FakeSession {
    web: FakeWeb,
}

#[async_trait]
impl Fetcher for FakeWeb {
    async fn open_session(&self) -> Result<Box<dyn FetchSession>, FetchError> {
        Ok(Box::new(FakeSession { web: self.clone() }))
    }
}

#[async_trait]
impl FetchSession for FakeSession {
    async fn fetch(&mut self, url: &Url, _wait: WaitStrategy) -> Result<String, FetchError> {
        self.web.fetched.lock().unwrap().push(url.to_string());
        if let Some(hook) = &self.web.hook {
            hook(url);
        }
        self.web
            .pages
            .lock()
            .unwrap()
            .get(url.as_str())
            .cloned()
            .ok_or(FetchError::Http { status: 500 })
    }

    async fn close(&mut self) {
        self.web.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Answers with a canned reply chosen by the page URL in the prompt
struct ScriptedModel {
    replies: HashMap<String, String>,
}

#[async_trait]
impl ExtractionModel for ScriptedModel {
    async fn complete(&self, prompt: &str) -> Result<String, ExtractionError> {
        let url = prompt
            .lines()
            .find_map(|line| line.strip_prefix("Page URL: "))
            .unwrap_or_default();
        self.replies
            .get(url)
            .cloned()
            .ok_or_else(|| ExtractionError::Model(format!("no reply scripted for {}", url)))
    }
}

fn selectors() -> SelectorConfig {
    let mut config = SelectorConfig {
        product_page_indicator: Some(".product".to_string()),
        ..Default::default()
    };
    config.fields.insert("name".to_string(), "h1.title".to_string());
    config.fields.insert("price".to_string(), ".price".to_string());
    config
}

fn new_site(name: &str, max_depth: u32, max_pages: u32) -> NewSite {
    NewSite {
        name: name.to_string(),
        start_url: START.to_string(),
        status: SiteStatus::Active,
        max_depth,
        max_pages,
        crawl_delay: 0.0,
        link_pattern: None,
        extraction_config: Some(selectors()),
        crawl_interval_hours: None,
    }
}

fn product_html(name: &str, price: &str) -> String {
    format!(
        r#"<html><body><div class="product"><h1 class="title">{}</h1><span class="price">{}</span></div></body></html>"#,
        name, price
    )
}

struct Harness {
    _dir: TempDir,
    factory: SqliteStoreFactory,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let factory = SqliteStoreFactory::new(dir.path().join("harvester.db"));
        Self { _dir: dir, factory }
    }

    fn store(&self) -> SqliteStorage {
        SqliteStorage::new(self.factory.path()).expect("Failed to open DB")
    }

    fn add_site(&self, site: &NewSite) -> SiteRecord {
        self.store().create_site(site).expect("Failed to create site")
    }

    fn crawler(&self, web: &FakeWeb) -> Crawler<SqliteStoreFactory> {
        let settings = RunSettings {
            fetch_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        Crawler::new(self.factory.clone(), Arc::new(web.clone()), settings)
    }

    async fn crawl(&self, crawler: &Crawler<SqliteStoreFactory>, site_id: i64) -> TaskRecord {
        let handle = crawler.start_crawl(site_id).expect("Failed to start crawl");
        let task_id = handle.task_id;
        tokio::time::timeout(Duration::from_secs(10), handle.wait())
            .await
            .expect("Crawl did not finish")
            .expect("Crawl worker panicked");
        self.store().get_task(task_id).expect("Failed to load task")
    }
}

#[tokio::test]
async fn test_depth_zero_crawls_only_start_url() {
    let harness = Harness::new();
    let site = harness.add_site(&new_site("shop", 0, 50));
    let web = FakeWeb::with_pages(&[(
        START,
        r#"<a href="/a">A</a><a href="/b">B</a><a href="/c">C</a>"#,
    )]);

    let task = harness.crawl(&harness.crawler(&web), site.id).await;

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.stats.pages_crawled, 1);
    assert_eq!(web.fetched(), vec![START.to_string()]);
    assert_eq!(harness.store().count_pages(site.id).unwrap(), 1);
    assert_eq!(web.closes(), 1);
}

#[tokio::test]
async fn test_missing_name_marks_page_skipped() {
    let harness = Harness::new();
    let site = harness.add_site(&new_site("shop", 0, 10));
    let web = FakeWeb::with_pages(&[(
        START,
        r#"<div class="product"><span class="price">9.99</span></div>"#,
    )]);

    let task = harness.crawl(&harness.crawler(&web), site.id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.stats.pages_crawled, 1);
    assert_eq!(task.stats.products_found, 0);

    let store = harness.store();
    let page = &store.list_pages(site.id).unwrap()[0];
    assert_eq!(page.status, PageStatus::Skipped);
    assert!(!page.is_product_page);
    assert!(page.parsed_data.is_none());
    assert_eq!(store.count_products(site.id).unwrap(), 0);
}

#[tokio::test]
async fn test_invalid_model_reply_fails_page_and_run_continues() {
    let harness = Harness::new();
    let mut model_site = new_site("model-shop", 1, 10);
    model_site.extraction_config = None;
    let site = harness.add_site(&model_site);

    let web = FakeWeb::with_pages(&[
        (START, r#"<a href="/broken">x</a><a href="/teapot">y</a>"#),
        ("https://shop.test/broken", "<p>Broken</p>"),
        ("https://shop.test/teapot", "<h1>Teapot</h1><p>$24.50</p>"),
    ]);
    let replies = HashMap::from([
        (START.to_string(), r#"{"is_product_page": false}"#.to_string()),
        (
            "https://shop.test/broken".to_string(),
            "I could not find a product here.".to_string(),
        ),
        (
            "https://shop.test/teapot".to_string(),
            r#"Sure: {"is_product_page": true, "name": "Teapot", "price": "24.50"}"#.to_string(),
        ),
    ]);
    let crawler = harness
        .crawler(&web)
        .with_model(Arc::new(ScriptedModel { replies }));

    let task = harness.crawl(&crawler, site.id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.stats.pages_crawled, 3);
    assert_eq!(task.stats.pages_failed, 1);
    assert_eq!(task.stats.pages_parsed, 1);
    assert_eq!(task.stats.products_created, 1);

    let store = harness.store();
    let broken = store
        .get_page_by_url_hash(site.id, &url_hash("https://shop.test/broken"))
        .unwrap()
        .expect("page recorded");
    assert_eq!(broken.status, PageStatus::Failed);
    assert!(broken.parse_error.as_deref().is_some_and(|e| !e.is_empty()));

    let id = derive_product_id(site.id, &url_hash("https://shop.test/teapot"));
    let product = store.get_product(&id).unwrap().expect("product stored");
    assert_eq!(product.name, "Teapot");
    assert_eq!(product.price, Some(24.5));
}

#[tokio::test]
async fn test_unchanged_content_is_not_reextracted() {
    let harness = Harness::new();
    let site = harness.add_site(&new_site("shop", 1, 10));
    let web = FakeWeb::with_pages(&[
        (START, r#"<a href="/mug">Mug</a>"#),
        ("https://shop.test/mug", product_html("Mug", "$12.00").as_str()),
    ]);
    let crawler = harness.crawler(&web);

    let first = harness.crawl(&crawler, site.id).await;
    assert_eq!(first.stats.pages_crawled, 2);
    assert_eq!(first.stats.pages_skipped_duplicate, 0);
    assert_eq!(first.stats.products_created, 1);

    let mug_hash = url_hash("https://shop.test/mug");
    let version_after_first = harness
        .store()
        .get_page_by_url_hash(site.id, &mug_hash)
        .unwrap()
        .unwrap()
        .version;

    let second = harness.crawl(&crawler, site.id).await;
    assert_eq!(second.status, TaskStatus::Completed);
    assert_eq!(second.stats.pages_crawled, 2);
    assert_eq!(second.stats.pages_skipped_duplicate, 2);
    assert_eq!(second.stats.products_found, 0);

    let mug = harness
        .store()
        .get_page_by_url_hash(site.id, &mug_hash)
        .unwrap()
        .unwrap();
    assert_eq!(mug.version, version_after_first);
    assert_eq!(mug.task_id, second.id);
    assert_eq!(mug.status, PageStatus::Parsed);

    // A price change is new content: re-extracted and upserted in place
    web.set("https://shop.test/mug", &product_html("Mug", "$10.00"));
    let third = harness.crawl(&crawler, site.id).await;
    assert_eq!(third.stats.pages_skipped_duplicate, 1);
    assert_eq!(third.stats.products_updated, 1);
    assert_eq!(third.stats.products_created, 0);

    let store = harness.store();
    let mug = store.get_page_by_url_hash(site.id, &mug_hash).unwrap().unwrap();
    assert_eq!(mug.version, version_after_first + 1);
    let product = store
        .get_product(mug.product_id.as_deref().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(product.price, Some(10.0));
    assert_eq!(store.count_products(site.id).unwrap(), 1);
}

#[tokio::test]
async fn test_fetch_failure_does_not_stop_run() {
    let harness = Harness::new();
    let site = harness.add_site(&new_site("shop", 1, 50));

    let links: String = (1..=9)
        .map(|i| format!(r#"<a href="/p{}">{}</a>"#, i, i))
        .collect();
    let web = FakeWeb::with_pages(&[(START, links.as_str())]);
    for i in (1..=9).filter(|i| *i != 5) {
        web.set(
            &format!("https://shop.test/p{}", i),
            &product_html(&format!("Item {}", i), "1.00"),
        );
    }

    let task = harness.crawl(&harness.crawler(&web), site.id).await;

    assert_eq!(web.fetched().len(), 10);
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.stats.pages_crawled, 9);
    assert_eq!(web.closes(), 1);
    assert_eq!(task.stats.products_created, 8);
    assert!(task.error_message.is_none());

    let store = harness.store();
    assert_eq!(store.count_pages(site.id).unwrap(), 9);
    assert!(store
        .get_page_by_url_hash(site.id, &url_hash("https://shop.test/p5"))
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_links_respect_depth_host_and_fragments() {
    let harness = Harness::new();
    let site = harness.add_site(&new_site("shop", 1, 50));
    let web = FakeWeb::with_pages(&[
        (
            START,
            r##"<a href="/a#reviews">A</a>
                <a href="/a">A again</a>
                <a href="https://elsewhere.test/x">Other shop</a>
                <a href="mailto:help@shop.test">Mail</a>"##,
        ),
        ("https://shop.test/a", r#"<a href="/b">Too deep</a>"#),
        ("https://shop.test/b", "<p>never fetched</p>"),
    ]);

    let task = harness.crawl(&harness.crawler(&web), site.id).await;

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(
        web.fetched(),
        vec![START.to_string(), "https://shop.test/a".to_string()]
    );

    let pages = harness.store().list_pages(site.id).unwrap();
    assert!(pages.iter().all(|p| p.depth <= site.max_depth));
    assert!(pages.iter().all(|p| !p.url.contains('#')));
}

#[tokio::test]
async fn test_link_pattern_filters_frontier() {
    let harness = Harness::new();
    let mut config = new_site("shop", 1, 50);
    config.link_pattern = Some("/products/*".to_string());
    let site = harness.add_site(&config);
    let web = FakeWeb::with_pages(&[
        (
            START,
            r#"<a href="/products/mug">Mug</a><a href="/blog/news">News</a>"#,
        ),
        ("https://shop.test/products/mug", product_html("Mug", "3").as_str()),
        ("https://shop.test/blog/news", "<p>news</p>"),
    ]);

    let task = harness.crawl(&harness.crawler(&web), site.id).await;

    assert_eq!(task.stats.pages_crawled, 2);
    assert!(!web.fetched().contains(&"https://shop.test/blog/news".to_string()));
}

#[tokio::test]
async fn test_site_removed_mid_run_fails_task() {
    let harness = Harness::new();
    let site = harness.add_site(&new_site("shop", 1, 50));

    let db_path = harness.factory.path().to_path_buf();
    let site_id = site.id;
    let mut web = FakeWeb::with_pages(&[
        (START, r#"<a href="/a">A</a><a href="/b">B</a>"#),
        ("https://shop.test/a", product_html("A", "1").as_str()),
        ("https://shop.test/b", product_html("B", "2").as_str()),
    ]);
    web.hook = Some(Arc::new(move |url: &Url| {
        if url.path() == "/a" {
            let conn = rusqlite::Connection::open(&db_path).unwrap();
            conn.execute("DELETE FROM sites WHERE id = ?1", [site_id])
                .unwrap();
        }
    }));

    let task = harness.crawl(&harness.crawler(&web), site.id).await;

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task
        .error_message
        .as_deref()
        .is_some_and(|e| e.contains("not found")));
    assert_eq!(task.stats.pages_crawled, 2);
    assert!(task.finished_at.is_some());

    // Work done before the removal is kept
    let store = harness.store();
    assert_eq!(store.list_pages(site_id).unwrap().len(), 2);
    assert!(!web.fetched().contains(&"https://shop.test/b".to_string()));
    assert_eq!(web.closes(), 1);
}

#[tokio::test]
async fn test_cancel_stops_run() {
    let harness = Harness::new();
    let mut config = new_site("slow-shop", 1, 50);
    config.crawl_delay = 30.0;
    let site = harness.add_site(&config);
    let web = FakeWeb::with_pages(&[
        (START, r#"<a href="/a">A</a><a href="/b">B</a>"#),
        ("https://shop.test/a", product_html("A", "1").as_str()),
    ]);

    let handle = harness
        .crawler(&web)
        .start_crawl(site.id)
        .expect("Failed to start crawl");
    let task_id = handle.task_id;

    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("Cancelled crawl did not stop")
        .unwrap();

    let store = harness.store();
    let task = store.get_task(task_id).unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(task.stats.pages_crawled <= 1);
    assert!(store.get_site(site.id).unwrap().last_crawl_at.is_none());
    assert_eq!(web.closes(), 1);
}

#[tokio::test]
async fn test_model_site_without_model_fails_task() {
    let harness = Harness::new();
    let mut config = new_site("model-shop", 1, 10);
    config.extraction_config = None;
    let site = harness.add_site(&config);
    let web = FakeWeb::with_pages(&[(START, "<h1>Hi</h1>")]);

    let task = harness.crawl(&harness.crawler(&web), site.id).await;

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error_message.is_some());
    assert!(task.stats.is_zero());
    assert!(web.fetched().is_empty());
}

#[tokio::test]
async fn test_start_crawl_rejects_unknown_and_inactive_sites() {
    let harness = Harness::new();
    let mut config = new_site("closed-shop", 1, 10);
    config.status = SiteStatus::Inactive;
    let site = harness.add_site(&config);
    let crawler = harness.crawler(&FakeWeb::default());

    match crawler.start_crawl(9999) {
        Err(HarvestError::SiteNotFound(9999)) => {}
        other => panic!("Expected SiteNotFound, got {:?}", other.map(|h| h.task_id)),
    }
    match crawler.start_crawl(site.id) {
        Err(HarvestError::SiteInactive(id)) => assert_eq!(id, site.id),
        other => panic!("Expected SiteInactive, got {:?}", other.map(|h| h.task_id)),
    }

    assert!(harness.store().list_tasks(site.id).unwrap().is_empty());
}

#[tokio::test]
async fn test_completed_crawl_schedules_next_run() {
    let harness = Harness::new();
    let mut config = new_site("shop", 0, 10);
    config.crawl_interval_hours = Some(24);
    let site = harness.add_site(&config);
    let web = FakeWeb::with_pages(&[(START, "<p>home</p>")]);

    let task = harness.crawl(&harness.crawler(&web), site.id).await;
    assert_eq!(task.status, TaskStatus::Completed);

    let site = harness.store().get_site(site.id).unwrap();
    let last = chrono::DateTime::parse_from_rfc3339(site.last_crawl_at.as_deref().unwrap()).unwrap();
    let next = chrono::DateTime::parse_from_rfc3339(site.next_crawl_at.as_deref().unwrap()).unwrap();
    assert_eq!(next - last, chrono::Duration::hours(24));
}

#[tokio::test]
async fn test_full_crawl_over_http() {
    // Start a mock server
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(
                    r#"<html><body>
                    <a href="/kettle">Kettle</a>
                    <a href="/toaster">Toaster</a>
                    <a href="/catalog.pdf">Catalog</a>
                    </body></html>"#,
                    "text/html; charset=utf-8",
                ),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/kettle"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(product_html("Kettle", "$39.90"), "text/html"),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/toaster"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/catalog.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"%PDF-1.4".to_vec())
                .insert_header("content-type", "application/pdf"),
        )
        .mount(&mock_server)
        .await;

    let harness = Harness::new();
    let mut config = new_site("kitchen", 1, 20);
    config.start_url = format!("{}/", base_url);
    let site = harness.add_site(&config);

    let fetcher = HttpFetcher::new("harvester-test/1.0", Duration::from_secs(5))
        .expect("Failed to build fetcher");
    let crawler = Crawler::new(
        harness.factory.clone(),
        Arc::new(fetcher),
        RunSettings::default(),
    );

    let task = harness.crawl(&crawler, site.id).await;

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.stats.pages_crawled, 2);
    assert_eq!(task.stats.products_created, 1);

    let store = harness.store();
    let kettle_url = format!("{}/kettle", base_url);
    let id = derive_product_id(site.id, &url_hash(&kettle_url));
    let product = store.get_product(&id).unwrap().expect("product stored");
    assert_eq!(product.name, "Kettle");
    assert_eq!(product.price, Some(39.9));
    assert_eq!(product.source_url, kettle_url);
    assert_eq!(product.source_site_id, site.id);
}
