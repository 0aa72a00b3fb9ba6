//! HTTP fetching
//!
//! This stage performs the GET for each http(s) item on the crawl's async
//! runtime, blocking the calling worker until the response is read:
//! - Records status code, content type and a length-bounded body
//! - Redirect targets become outlinks (redirects are never followed inline)
//! - Network failures map to crawler status codes
//! - Per-server fetch counters are kept in the server cache

use crate::config::CrawlOrder;
use crate::pipeline::{Processor, ProcessorContext, ProcessorError};
use crate::uri::fetch_status::{
    S_CONNECT_FAILED, S_CONNECT_LOST, S_DOMAIN_UNRESOLVABLE, S_TIMEOUT,
};
use crate::uri::{resolve_link, CandidateUri, CrawlUri, HOP_REDIRECT};
use crate::ConfigError;
use reqwest::header::{HeaderName, CONTENT_TYPE, LOCATION};
use reqwest::{redirect::Policy, Client, Response};
use std::error::Error as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use url::Url;

/// Default bound on a response body (`<name>.max-length-bytes`)
pub const DEFAULT_MAX_LENGTH_BYTES: u64 = 1024 * 1024;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// What came back from one request
#[derive(Debug)]
enum FetchOutcome {
    Response {
        status: u16,
        content_type: Option<String>,
        location: Option<String>,
        body: Vec<u8>,
        truncated: bool,
    },
    Failed {
        status: i32,
        message: String,
    },
}

pub struct FetchHttp {
    name: String,
    client: Client,
    fetched: AtomicU64,
    failed: AtomicU64,
    bytes: AtomicU64,
}

impl FetchHttp {
    /// Creates the stage with a client identifying as the order's user agent
    pub fn new(name: &str, order: &CrawlOrder) -> Result<Self, ConfigError> {
        let client = build_http_client(&order.user_agent_string()).map_err(|e| {
            ConfigError::Validation(format!("processor '{}': cannot build HTTP client: {}", name, e))
        })?;
        Ok(Self {
            name: name.to_string(),
            client,
            fetched: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        })
    }
}

/// Builds the HTTP client shared by every worker
///
/// Redirects are not followed; the redirect target is scheduled as an
/// outlink of the redirecting item instead.
pub fn build_http_client(user_agent: &str) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent)
        .timeout(REQUEST_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT)
        .redirect(Policy::none())
        .gzip(true)
        .brotli(true)
        .build()
}

/// Maps a request error onto a crawler status code
fn classify_error(e: &reqwest::Error) -> i32 {
    if e.is_timeout() {
        S_TIMEOUT
    } else if e.is_connect() {
        if is_dns_failure(e) {
            S_DOMAIN_UNRESOLVABLE
        } else {
            S_CONNECT_FAILED
        }
    } else {
        S_CONNECT_LOST
    }
}

fn is_dns_failure(e: &reqwest::Error) -> bool {
    let mut source = e.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if text.contains("dns error") || text.contains("failed to lookup address") {
            return true;
        }
        source = cause.source();
    }
    false
}

fn header_value(response: &Response, name: HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Sends the GET and reads at most `max_length` body bytes
///
/// Only a failed buffer reservation is an error; every network problem
/// is an outcome.
async fn fetch(client: &Client, url: Url, max_length: u64) -> Result<FetchOutcome, ProcessorError> {
    let mut response = match client.get(url).send().await {
        Ok(response) => response,
        Err(e) => {
            return Ok(FetchOutcome::Failed {
                status: classify_error(&e),
                message: e.to_string(),
            })
        }
    };

    let status = response.status().as_u16();
    let content_type = header_value(&response, CONTENT_TYPE);
    let location = header_value(&response, LOCATION);

    let limit = usize::try_from(max_length).unwrap_or(usize::MAX);
    let mut body: Vec<u8> = Vec::new();
    let mut truncated = false;
    loop {
        let chunk = match response.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                return Ok(FetchOutcome::Failed {
                    status: classify_error(&e),
                    message: e.to_string(),
                })
            }
        };
        let room = limit - body.len();
        let take = chunk.len().min(room);
        body.try_reserve(take)?;
        body.extend_from_slice(&chunk[..take]);
        if take < chunk.len() {
            truncated = true;
            break;
        }
    }

    Ok(FetchOutcome::Response {
        status,
        content_type,
        location,
        body,
        truncated,
    })
}

impl Processor for FetchHttp {
    fn name(&self) -> &str {
        &self.name
    }

    fn inner_process(
        &self,
        ctx: &ProcessorContext,
        curi: &mut CrawlUri,
    ) -> Result<(), ProcessorError> {
        if !matches!(curi.uri().scheme(), "http" | "https") {
            return Ok(());
        }
        ctx.check_for_interrupt()?;

        let key = format!("{}.max-length-bytes", self.name);
        let max_length = ctx
            .settings()
            .u64_attribute(&key, Some(curi), DEFAULT_MAX_LENGTH_BYTES);

        curi.increment_fetch_attempts();
        curi.mark_fetch_began();
        let outcome = ctx
            .runtime()
            .block_on(fetch(&self.client, curi.uri().clone(), max_length));
        curi.mark_fetch_completed();

        match outcome? {
            FetchOutcome::Response {
                status,
                content_type,
                location,
                body,
                truncated,
            } => {
                let length = body.len() as u64;
                tracing::debug!("{} {} {} ({} bytes)", self.name, status, curi, length);
                curi.set_fetch_status(i32::from(status));
                curi.set_content_type(content_type);
                curi.set_content_length(length);
                curi.set_body(Some(body));
                if truncated {
                    curi.add_annotation("lenTrunc");
                }
                if (300..400).contains(&status) {
                    if let Some(location) = location {
                        match resolve_link(curi.uri(), &location) {
                            Ok(Some(target)) => {
                                let redirect = CandidateUri::discovered(target, curi, HOP_REDIRECT);
                                curi.add_outlink(redirect);
                            }
                            Ok(None) => {}
                            Err(e) => ctx.logs().uri_error(&location, curi, &e.to_string()),
                        }
                    }
                }

                self.fetched.fetch_add(1, Ordering::Relaxed);
                self.bytes.fetch_add(length, Ordering::Relaxed);
                ctx.server_cache()
                    .update(&curi.server_key(), |server| server.note_fetch(length));
            }
            FetchOutcome::Failed { status, message } => {
                tracing::debug!("{} failed {}: {}", self.name, curi, message);
                self.failed.fetch_add(1, Ordering::Relaxed);
                curi.set_fetch_status(status);
            }
        }

        ctx.check_for_interrupt()
    }

    fn report(&self) -> String {
        format!(
            "Processor: {}\n  Responses: {}\n  Network failures: {}\n  Body bytes: {}\n",
            self.name,
            self.fetched.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
            self.bytes.load(Ordering::Relaxed)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::testing::Harness;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn stage(harness: &Harness) -> FetchHttp {
        FetchHttp::new("fetch-http", harness.ctx.order()).unwrap()
    }

    fn curi(s: &str) -> CrawlUri {
        CrawlUri::new(Url::parse(s).unwrap())
    }

    #[test]
    fn test_fetch_records_response() {
        let harness = Harness::new("");
        let server = harness.runtime.block_on(async {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/page"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_raw("<html>hello</html>", "text/html; charset=utf-8"),
                )
                .mount(&server)
                .await;
            server
        });

        let mut page = curi(&format!("{}/page", server.uri()));
        stage(&harness).inner_process(&harness.ctx, &mut page).unwrap();

        assert_eq!(page.fetch_status(), 200);
        assert_eq!(page.content_type(), Some("text/html; charset=utf-8"));
        assert_eq!(page.body(), Some(&b"<html>hello</html>"[..]));
        assert_eq!(page.content_length(), 18);
        assert_eq!(page.fetch_attempts(), 1);
        assert!(page.fetch_completed().is_some());

        let record = harness.ctx.server_cache().server(&page.server_key());
        assert_eq!(record.fetch_count(), 1);
        assert_eq!(record.byte_count(), 18);
    }

    #[test]
    fn test_body_is_bounded() {
        let harness = Harness::new("");
        harness.settings.set_global("fetch-http.max-length-bytes", 4);
        let server = harness.runtime.block_on(async {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(200).set_body_string("0123456789"))
                .mount(&server)
                .await;
            server
        });

        let mut page = curi(&format!("{}/big", server.uri()));
        stage(&harness).inner_process(&harness.ctx, &mut page).unwrap();
        assert_eq!(page.body(), Some(&b"0123"[..]));
        assert!(page.annotations().iter().any(|a| a == "lenTrunc"));
    }

    #[test]
    fn test_redirect_becomes_outlink() {
        let harness = Harness::new("");
        let server = harness.runtime.block_on(async {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/old"))
                .respond_with(ResponseTemplate::new(301).insert_header("location", "/new"))
                .mount(&server)
                .await;
            server
        });

        let mut page = curi(&format!("{}/old", server.uri()));
        stage(&harness).inner_process(&harness.ctx, &mut page).unwrap();
        assert_eq!(page.fetch_status(), 301);
        assert_eq!(page.outlinks().len(), 1);
        assert_eq!(page.outlinks()[0].uri.path(), "/new");
        assert!(page.outlinks()[0].path_from_seed.ends_with('R'));
    }

    #[test]
    fn test_connection_refused() {
        let harness = Harness::new("");
        // Bind then drop a listener so the port is known to be closed
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let fetcher = stage(&harness);
        let mut page = curi(&format!("http://127.0.0.1:{}/", port));
        fetcher.inner_process(&harness.ctx, &mut page).unwrap();
        assert_eq!(page.fetch_status(), S_CONNECT_FAILED);
        assert_eq!(page.fetch_attempts(), 1);
        assert!(page.body().is_none());
        assert!(fetcher.report().contains("Network failures: 1"));
    }

    #[test]
    fn test_interrupted_worker_does_not_fetch() {
        use std::sync::atomic::AtomicBool;
        use std::sync::Arc;

        let harness = Harness::new("");
        let ctx = harness
            .ctx
            .for_worker(1, Arc::new(AtomicBool::new(true)));
        let mut page = curi("http://example.com/");
        let err = stage(&harness).inner_process(&ctx, &mut page).unwrap_err();
        assert!(matches!(err, ProcessorError::Interrupted));
        assert_eq!(page.fetch_attempts(), 0);
    }
}
