//! Integration tests for the crawl controller
//!
//! These tests use wiremock to create mock HTTP servers and run whole
//! crawls through the controller, its worker pool and the standard
//! pipeline.

use crawl_controller::config::{load_order, CrawlOrder};
use crawl_controller::crawler::{list_checkpoints, CrawlController, CRAWL_LOG};
use crawl_controller::frontier::{Frontier, MemoryFrontier};
use crawl_controller::pipeline::{
    DecideRules, Processor, ProcessorChain, ProcessorChainList, ProcessorContext, ProcessorError,
};
use crawl_controller::processors::build_chains;
use crawl_controller::state::status;
use crawl_controller::storage::{page_store_path, PageStore};
use crawl_controller::uri::fetch_status::{S_ROBOTS_PRECLUDED, S_RUNTIME_EXCEPTION};
use crawl_controller::{CrawlError, CrawlState, CrawlUri};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const STANDARD_CHAINS: &str = r#"
[[chain]]
name = "fetch"

[[chain.processor]]
kind = "preselector"

[[chain.processor]]
kind = "precondition"

[[chain.processor]]
kind = "fetch-http"

[[chain]]
name = "extract"

[[chain.processor]]
kind = "extract-html"

[[chain.processor]]
kind = "page-writer"

[[chain]]
name = "post"

[[chain.processor]]
kind = "crawl-state-updater"

[[chain.processor]]
kind = "link-scheduler"
"#;

const WAIT: Duration = Duration::from_secs(20);

/// Writes a crawl order for a job under `dir` and loads it back
fn create_test_order(dir: &Path, seeds: &[String], threads: usize) -> CrawlOrder {
    let seeds: Vec<String> = seeds.iter().map(|s| format!("\"{}\"", s)).collect();
    let text = format!(
        r#"
[crawl]
name = "integration"
max-toe-threads = {threads}
max-retries = 0
retry-delay-ms = 10
progress-interval-sec = 1
next-poll-ms = 20

[disk]
path = "{path}"

[user-agent]
crawler-name = "TestBot"
crawler-version = "1.0.0"
contact-url = "https://example.com/contact"
contact-email = "test@example.com"

[scope]
seeds = [{seeds}]

{chains}
"#,
        threads = threads,
        path = dir.join("job").display(),
        seeds = seeds.join(", "),
        chains = STANDARD_CHAINS
    );
    let order_path = dir.join("order.toml");
    std::fs::write(&order_path, text).expect("Failed to write order");
    load_order(&order_path).expect("Failed to load order")
}

/// Runs controller calls that block off the test's async workers
async fn blocking<T, F>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .expect("Blocking task panicked")
}

/// Initializes and starts a crawl; returns the controller and its frontier
async fn start_crawl(
    order: CrawlOrder,
    chains: Option<ProcessorChainList>,
) -> (Arc<CrawlController>, Arc<MemoryFrontier>) {
    blocking(move || {
        let chains = match chains {
            Some(chains) => chains,
            None => build_chains(&order).expect("Failed to build chains"),
        };
        let frontier = Arc::new(MemoryFrontier::new(&order));
        let controller = CrawlController::from_order(order).expect("Failed to create controller");
        controller
            .initialize(Arc::clone(&frontier) as Arc<dyn Frontier>, chains)
            .expect("Failed to initialize crawl");
        controller.request_crawl_start().expect("Failed to start crawl");
        (controller, frontier)
    })
    .await
}

async fn wait_for(controller: &Arc<CrawlController>, wanted: CrawlState) -> CrawlState {
    let controller = Arc::clone(controller);
    blocking(move || controller.wait_for_state(|s| s == wanted, Some(WAIT))).await
}

/// Polls `check` until it holds or `WAIT` passes
async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

async fn mount_html(server: &MockServer, route: &str, body: String, delay: Duration) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(body, "text/html")
                .set_delay(delay),
        )
        .mount(server)
        .await;
}

async fn mount_robots(server: &MockServer, body: &str) {
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

/// Index page linking to `/page1` .. `/page<count>`
fn index_page(count: usize) -> String {
    let links: String = (1..=count)
        .map(|i| format!(r#"<a href="/page{}">Page {}</a>"#, i, i))
        .collect();
    format!("<html><body>{}</body></html>", links)
}

fn crawl_log(order: &CrawlOrder) -> String {
    std::fs::read_to_string(order.logs_dir().join(CRAWL_LOG)).expect("Failed to read crawl log")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_full_crawl_single_host() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    mount_robots(&mock_server, "User-agent: *\nAllow: /").await;
    mount_html(&mock_server, "/", index_page(2), Duration::ZERO).await;
    for i in 1..=2 {
        let body = format!("<html><body>Content {}<a href=\"/\">home</a></body></html>", i);
        mount_html(&mock_server, &format!("/page{}", i), body, Duration::ZERO).await;
    }

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let order = create_test_order(dir.path(), &[format!("{}/", base_url)], 2);
    let (controller, frontier) = start_crawl(order.clone(), None).await;

    assert_eq!(wait_for(&controller, CrawlState::Finished).await, CrawlState::Finished);
    assert_eq!(controller.exit_reason(), status::FINISHED);
    assert_eq!(controller.looping_toe_count(), 0);

    // robots.txt, the index and both pages
    assert_eq!(frontier.succeeded_fetch_count(), 4);
    assert_eq!(frontier.in_flight_count(), 0);

    let store = PageStore::open(&page_store_path(&order)).expect("Failed to open page store");
    assert_eq!(store.count_pages().expect("Failed to count pages"), 4);
    let index = store
        .page(&format!("{}/", base_url))
        .expect("Failed to read page")
        .expect("Index page missing");
    assert_eq!(index.fetch_status, 200);
    assert_eq!(index.outlinks, 2);
    let page = store
        .page(&format!("{}/page1", base_url))
        .expect("Failed to read page")
        .expect("Page 1 missing");
    assert_eq!(page.path_from_seed, "L");

    let log = crawl_log(&order);
    assert_eq!(log.lines().count(), 5, "deferred index plus four fetches:\n{}", log);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_robots_txt_respect() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    mount_robots(&mock_server, "User-agent: *\nDisallow: /admin").await;
    let index = r#"<html><body><a href="/allowed">Allowed</a><a href="/admin">Admin</a></body></html>"#;
    mount_html(&mock_server, "/", index.to_string(), Duration::ZERO).await;
    mount_html(&mock_server, "/allowed", "<html>ok</html>".to_string(), Duration::ZERO).await;
    mount_html(&mock_server, "/admin", "<html>secret</html>".to_string(), Duration::ZERO).await;

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let order = create_test_order(dir.path(), &[format!("{}/", base_url)], 1);
    let (controller, _frontier) = start_crawl(order.clone(), None).await;
    assert_eq!(wait_for(&controller, CrawlState::Finished).await, CrawlState::Finished);

    let requests = mock_server
        .received_requests()
        .await
        .expect("Request recording disabled");
    assert!(requests.iter().all(|r| r.url.path() != "/admin"));
    assert!(requests.iter().any(|r| r.url.path() == "/allowed"));

    let log = crawl_log(&order);
    let admin = log
        .lines()
        .find(|l| l.contains("/admin"))
        .expect("No crawl log line for /admin");
    assert!(admin.contains(&S_ROBOTS_PRECLUDED.to_string()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pause_checkpoint_and_resume() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    mount_robots(&mock_server, "User-agent: *\nAllow: /").await;
    mount_html(&mock_server, "/", index_page(6), Duration::ZERO).await;
    for i in 1..=6 {
        let body = format!("<html>page {}</html>", i);
        mount_html(&mock_server, &format!("/page{}", i), body, Duration::from_millis(200)).await;
    }

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let order = create_test_order(dir.path(), &[format!("{}/", base_url)], 2);
    let (controller, _frontier) = start_crawl(order.clone(), None).await;

    // Not paused yet: refused without a state change
    let c = Arc::clone(&controller);
    let refused = blocking(move || c.request_crawl_checkpoint()).await;
    assert!(matches!(refused, Err(CrawlError::IllegalState { .. })));
    assert!(matches!(
        controller.state(),
        CrawlState::Running | CrawlState::Finished
    ));

    let c = Arc::clone(&controller);
    blocking(move || c.request_crawl_pause()).await;
    let state = wait_for(&controller, CrawlState::Paused).await;
    if state == CrawlState::Finished {
        // The crawl beat the pause request; nothing left to check
        return;
    }
    assert_eq!(state, CrawlState::Paused);
    assert_eq!(controller.active_toe_count(), 0);

    let c = Arc::clone(&controller);
    let checkpoint = blocking(move || c.request_crawl_checkpoint())
        .await
        .expect("Checkpoint failed");
    assert!(checkpoint.join("controller.toml").exists());
    assert_eq!(controller.state(), CrawlState::Paused);
    assert_eq!(
        list_checkpoints(&order.checkpoints_dir()).expect("Failed to list checkpoints"),
        vec![checkpoint]
    );

    let c = Arc::clone(&controller);
    blocking(move || c.request_crawl_resume()).await;
    assert_eq!(wait_for(&controller, CrawlState::Finished).await, CrawlState::Finished);
    assert_eq!(controller.exit_reason(), status::FINISHED);

    let store = PageStore::open(&page_store_path(&order)).expect("Failed to open page store");
    assert_eq!(store.count_pages().expect("Failed to count pages"), 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_while_workers_busy() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    mount_robots(&mock_server, "User-agent: *\nAllow: /").await;
    mount_html(&mock_server, "/", index_page(6), Duration::ZERO).await;
    for i in 1..=6 {
        let body = format!("<html>page {}</html>", i);
        mount_html(&mock_server, &format!("/page{}", i), body, Duration::from_millis(1500)).await;
    }

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let order = create_test_order(dir.path(), &[format!("{}/", base_url)], 3);
    let (controller, frontier) = start_crawl(order, None).await;

    let busy = eventually(|| controller.active_toe_count() == 3).await;
    assert!(busy, "workers never all became busy");

    let c = Arc::clone(&controller);
    blocking(move || c.request_crawl_stop(status::ABORTED))
        .await
        .expect("Stop request failed");

    assert_eq!(wait_for(&controller, CrawlState::Finished).await, CrawlState::Finished);
    assert_eq!(controller.exit_reason(), status::ABORTED);
    assert_eq!(controller.looping_toe_count(), 0);
    // The three items in flight were finished, not dropped
    assert_eq!(frontier.in_flight_count(), 0);
    assert!(frontier.finished_uri_count() >= 5);

    // Stopping a finished crawl changes nothing
    let c = Arc::clone(&controller);
    blocking(move || c.request_crawl_stop(status::FINISHED))
        .await
        .expect("Stop of a finished crawl failed");
    assert_eq!(controller.exit_reason(), status::ABORTED);
}

/// Stage that fails on chosen paths and marks everything else fetched
struct Flaky;

impl Processor for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    fn inner_process(
        &self,
        _ctx: &ProcessorContext,
        curi: &mut CrawlUri,
    ) -> Result<(), ProcessorError> {
        match curi.uri().path() {
            "/error" => Err(ProcessorError::Runtime("stage failed".to_string())),
            "/panic" => panic!("stage panicked"),
            _ => {
                curi.set_fetch_status(200);
                Ok(())
            }
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stage_errors_do_not_stop_the_worker() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let seeds: Vec<String> = ["error", "panic", "a", "b"]
        .iter()
        .map(|p| format!("http://example.com/{}", p))
        .collect();
    let order = create_test_order(dir.path(), &seeds, 1);
    let chains = ProcessorChainList::new(vec![ProcessorChain::new(
        "fetch",
        vec![(Arc::new(Flaky) as _, DecideRules::accept_all())],
    )])
    .expect("Failed to build chains");

    let (controller, frontier) = start_crawl(order.clone(), Some(chains)).await;
    assert_eq!(wait_for(&controller, CrawlState::Finished).await, CrawlState::Finished);
    assert_eq!(frontier.finished_uri_count(), 4);
    assert_eq!(frontier.succeeded_fetch_count(), 2);

    let log = crawl_log(&order);
    let line_for = |p: &str| {
        log.lines()
            .find(|l| l.contains(&format!("http://example.com/{} ", p)))
            .unwrap_or_else(|| panic!("No crawl log line for /{}:\n{}", p, log))
            .to_string()
    };
    let error = line_for("error");
    assert!(error.contains(&S_RUNTIME_EXCEPTION.to_string()));
    assert!(error.contains("err=Runtime"));
    assert!(line_for("panic").contains("err=Panic"));
    assert!(line_for("b").contains(" 200 "));
}
