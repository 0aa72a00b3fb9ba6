//! The work item flowing through the processing pipeline

use crate::uri::fetch_status::{self, S_DEFERRED, S_UNATTEMPTED};
use crate::uri::normalize::canonicalize;
use chrono::{DateTime, Utc};
use std::fmt;
use url::Url;

/// Hop letter for a followed link
pub const HOP_LINK: char = 'L';
/// Hop letter for a prerequisite (robots.txt and the like)
pub const HOP_PREREQUISITE: char = 'P';
/// Hop letter for a redirect or canonical link
pub const HOP_REDIRECT: char = 'R';
/// Hop letter for an embedded resource
pub const HOP_EMBED: char = 'E';

/// A URI discovered but not yet scheduled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateUri {
    pub uri: Url,
    pub via: Option<Url>,
    /// Hop letters from the seed to this URI; empty for seeds
    pub path_from_seed: String,
    pub is_seed: bool,
    /// Schedule even if the URI was seen before (prerequisites)
    pub force_fetch: bool,
}

impl CandidateUri {
    /// Creates a seed candidate
    pub fn seed(uri: Url) -> Self {
        Self {
            uri,
            via: None,
            path_from_seed: String::new(),
            is_seed: true,
            force_fetch: false,
        }
    }

    /// Creates a candidate discovered from `via` through one hop of kind `hop`
    pub fn discovered(uri: Url, via: &CrawlUri, hop: char) -> Self {
        let mut path_from_seed = via.path_from_seed().to_string();
        path_from_seed.push(hop);
        Self {
            uri,
            via: Some(via.uri().clone()),
            path_from_seed,
            is_seed: false,
            force_fetch: false,
        }
    }

    /// Canonical de-duplication key
    pub fn canonical_key(&self) -> String {
        canonicalize(&self.uri)
    }

    /// Number of followed-link hops from the seed
    pub fn link_hops(&self) -> usize {
        self.path_from_seed.chars().filter(|c| *c == HOP_LINK).count()
    }
}

/// Represents one URI in flight through the crawler
///
/// A `CrawlUri` is created by the frontier when a worker asks for work,
/// mutated in place by each processing stage, and handed back to the
/// frontier exactly once.
#[derive(Debug, Clone)]
pub struct CrawlUri {
    uri: Url,
    via: Option<Url>,
    path_from_seed: String,
    is_seed: bool,
    force_fetch: bool,

    fetch_status: i32,
    fetch_attempts: u32,
    deferrals: u32,
    annotations: Vec<String>,
    thread_number: Option<u32>,

    content_type: Option<String>,
    content_length: u64,
    body: Option<Vec<u8>>,
    outlinks: Vec<CandidateUri>,
    link_extracted: bool,

    prerequisite: bool,
    prerequisite_uri: Option<CandidateUri>,
    runtime_error: Option<String>,

    scheduled_at: DateTime<Utc>,
    fetch_began: Option<DateTime<Utc>>,
    fetch_completed: Option<DateTime<Utc>>,

    // pipeline position
    current_chain: Option<usize>,
    current_processor: Option<usize>,
    next_chain: Option<usize>,
    next_processor: Option<usize>,
    entry_processor: Option<usize>,
}

impl CrawlUri {
    /// Creates a new work item for `uri`
    pub fn new(uri: Url) -> Self {
        Self {
            uri,
            via: None,
            path_from_seed: String::new(),
            is_seed: false,
            force_fetch: false,
            fetch_status: S_UNATTEMPTED,
            fetch_attempts: 0,
            deferrals: 0,
            annotations: Vec::new(),
            thread_number: None,
            content_type: None,
            content_length: 0,
            body: None,
            outlinks: Vec::new(),
            link_extracted: false,
            prerequisite: false,
            prerequisite_uri: None,
            runtime_error: None,
            scheduled_at: Utc::now(),
            fetch_began: None,
            fetch_completed: None,
            current_chain: None,
            current_processor: None,
            next_chain: None,
            next_processor: None,
            entry_processor: None,
        }
    }

    /// Creates a work item from a scheduled candidate
    pub fn from_candidate(candidate: CandidateUri) -> Self {
        let mut curi = Self::new(candidate.uri);
        curi.via = candidate.via;
        curi.path_from_seed = candidate.path_from_seed;
        curi.is_seed = candidate.is_seed;
        curi.force_fetch = candidate.force_fetch;
        curi
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn via(&self) -> Option<&Url> {
        self.via.as_ref()
    }

    pub fn path_from_seed(&self) -> &str {
        &self.path_from_seed
    }

    pub fn is_seed(&self) -> bool {
        self.is_seed
    }

    pub fn force_fetch(&self) -> bool {
        self.force_fetch
    }

    /// Lowercased host of the URI, empty if it has none
    pub fn host(&self) -> String {
        self.uri.host_str().unwrap_or_default().to_lowercase()
    }

    /// `host:port` key identifying the server this URI lives on
    pub fn server_key(&self) -> String {
        format!(
            "{}:{}",
            self.host(),
            self.uri.port_or_known_default().unwrap_or(80)
        )
    }

    /// Canonical de-duplication key
    pub fn canonical_key(&self) -> String {
        canonicalize(&self.uri)
    }

    /// Number of followed-link hops from the seed
    pub fn link_hops(&self) -> usize {
        self.path_from_seed.chars().filter(|c| *c == HOP_LINK).count()
    }

    pub fn fetch_status(&self) -> i32 {
        self.fetch_status
    }

    pub fn set_fetch_status(&mut self, status: i32) {
        self.fetch_status = status;
    }

    pub fn is_success(&self) -> bool {
        fetch_status::is_success(self.fetch_status)
    }

    pub fn fetch_attempts(&self) -> u32 {
        self.fetch_attempts
    }

    pub fn increment_fetch_attempts(&mut self) {
        self.fetch_attempts += 1;
    }

    pub fn deferrals(&self) -> u32 {
        self.deferrals
    }

    pub fn increment_deferrals(&mut self) {
        self.deferrals += 1;
    }

    /// Restores attempt counters carried over from a checkpoint
    pub(crate) fn restore_counts(&mut self, fetch_attempts: u32, deferrals: u32) {
        self.fetch_attempts = fetch_attempts;
        self.deferrals = deferrals;
    }

    pub fn annotations(&self) -> &[String] {
        &self.annotations
    }

    pub fn add_annotation(&mut self, annotation: impl Into<String>) {
        self.annotations.push(annotation.into());
    }

    pub fn thread_number(&self) -> Option<u32> {
        self.thread_number
    }

    pub fn set_thread_number(&mut self, serial: u32) {
        self.thread_number = Some(serial);
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn set_content_type(&mut self, content_type: Option<String>) {
        self.content_type = content_type;
    }

    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    pub fn set_content_length(&mut self, length: u64) {
        self.content_length = length;
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    pub fn set_body(&mut self, body: Option<Vec<u8>>) {
        self.body = body;
    }

    pub fn outlinks(&self) -> &[CandidateUri] {
        &self.outlinks
    }

    pub fn add_outlink(&mut self, outlink: CandidateUri) {
        self.outlinks.push(outlink);
    }

    pub fn take_outlinks(&mut self) -> Vec<CandidateUri> {
        std::mem::take(&mut self.outlinks)
    }

    pub fn has_been_link_extracted(&self) -> bool {
        self.link_extracted
    }

    pub fn link_extraction_finished(&mut self) {
        self.link_extracted = true;
    }

    /// True if this URI is itself a prerequisite of other URIs
    pub fn is_prerequisite(&self) -> bool {
        self.prerequisite
    }

    pub fn set_prerequisite(&mut self, prerequisite: bool) {
        self.prerequisite = prerequisite;
    }

    pub fn prerequisite_uri(&self) -> Option<&CandidateUri> {
        self.prerequisite_uri.as_ref()
    }

    pub fn runtime_error(&self) -> Option<&str> {
        self.runtime_error.as_deref()
    }

    pub fn set_runtime_error(&mut self, message: impl Into<String>) {
        self.runtime_error = Some(message.into());
    }

    pub fn scheduled_at(&self) -> DateTime<Utc> {
        self.scheduled_at
    }

    pub fn fetch_began(&self) -> Option<DateTime<Utc>> {
        self.fetch_began
    }

    pub fn mark_fetch_began(&mut self) {
        self.fetch_began = Some(Utc::now());
    }

    pub fn fetch_completed(&self) -> Option<DateTime<Utc>> {
        self.fetch_completed
    }

    pub fn mark_fetch_completed(&mut self) {
        self.fetch_completed = Some(Utc::now());
    }

    /// Defers this item behind `prerequisite` and skips to `post_chain`
    ///
    /// The item's status becomes [`S_DEFERRED`](fetch_status::S_DEFERRED);
    /// the post-processing chain then schedules the prerequisite and the
    /// frontier requeues this item behind it.
    pub fn mark_prerequisite(&mut self, prerequisite: Url, post_chain: usize) {
        let mut candidate = CandidateUri::discovered(prerequisite, self, HOP_PREREQUISITE);
        candidate.force_fetch = true;
        self.prerequisite_uri = Some(candidate);
        self.fetch_status = S_DEFERRED;
        self.skip_to_chain(post_chain);
    }

    /// Clears per-attempt results before the item is handed out again
    pub fn reset_for_retry(&mut self) {
        self.fetch_status = S_UNATTEMPTED;
        self.content_type = None;
        self.content_length = 0;
        self.body = None;
        self.outlinks.clear();
        self.link_extracted = false;
        self.prerequisite_uri = None;
        self.runtime_error = None;
        self.fetch_began = None;
        self.fetch_completed = None;
        self.thread_number = None;
        self.current_chain = None;
        self.current_processor = None;
        self.next_chain = None;
        self.next_processor = None;
        self.entry_processor = None;
    }

    // ===== Pipeline position =====

    /// Positions the item at the start of the pipeline
    pub fn begin_traversal(&mut self) {
        self.current_chain = None;
        self.current_processor = None;
        self.next_chain = Some(0);
        self.next_processor = None;
        self.entry_processor = None;
    }

    /// Enters chain `index`; `following` is that chain's default next chain
    ///
    /// The first stage to run is 0 unless a skip to a specific stage of
    /// this chain was requested earlier.
    pub fn begin_chain(&mut self, index: usize, following: Option<usize>) {
        self.current_chain = Some(index);
        self.current_processor = None;
        self.next_processor = Some(self.entry_processor.take().unwrap_or(0));
        self.next_chain = following;
    }

    /// Index of the chain being traversed
    pub fn current_chain(&self) -> Option<usize> {
        self.current_chain
    }

    /// Index (within the current chain) of the stage being run
    pub fn current_processor(&self) -> Option<usize> {
        self.current_processor
    }

    pub fn set_current_processor(&mut self, index: usize) {
        self.current_processor = Some(index);
    }

    pub fn next_chain(&self) -> Option<usize> {
        self.next_chain
    }

    pub fn next_processor(&self) -> Option<usize> {
        self.next_processor
    }

    /// Sets the stage that runs after the current one (within the chain)
    pub fn set_next_processor(&mut self, index: Option<usize>) {
        self.next_processor = index;
    }

    /// Ends the current chain and continues with chain `index`
    ///
    /// Skips only move forward: a target at or before the current chain
    /// just ends the current chain and traversal continues with its
    /// default successor.
    pub fn skip_to_chain(&mut self, index: usize) {
        self.next_processor = None;
        self.entry_processor = None;
        match self.current_chain {
            Some(current) if index <= current => {}
            _ => self.next_chain = Some(index),
        }
    }

    /// Skips forward to stage `processor` of chain `chain`
    ///
    /// Ignored when the target is not after the current stage.
    pub fn skip_to_processor(&mut self, chain: usize, processor: usize) {
        match self.current_chain {
            Some(current) if chain == current => {
                if self.current_processor.map_or(true, |p| processor > p) {
                    self.next_processor = Some(processor);
                }
            }
            Some(current) if chain < current => {}
            _ => {
                self.next_processor = None;
                self.next_chain = Some(chain);
                self.entry_processor = Some(processor);
            }
        }
    }

    /// One-line summary: URI, discovery path and via
    pub fn single_line_report(&self) -> String {
        format!(
            "{} {} {}",
            self.uri,
            if self.path_from_seed.is_empty() {
                "-"
            } else {
                &self.path_from_seed
            },
            self.via.as_ref().map(|v| v.as_str()).unwrap_or("-")
        )
    }

    /// Copy without the response body, for reporting and kill recovery
    pub fn snapshot(&self) -> Self {
        let mut copy = self.clone();
        copy.body = None;
        copy
    }
}

impl fmt::Display for CrawlUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uri::fetch_status::S_RUNTIME_EXCEPTION;

    fn curi(s: &str) -> CrawlUri {
        CrawlUri::new(Url::parse(s).unwrap())
    }

    #[test]
    fn test_new_is_unattempted() {
        let c = curi("http://example.com/");
        assert_eq!(c.fetch_status(), S_UNATTEMPTED);
        assert!(c.annotations().is_empty());
        assert_eq!(c.server_key(), "example.com:80");
    }

    #[test]
    fn test_discovered_path_and_hops() {
        let seed = CrawlUri::from_candidate(CandidateUri::seed(
            Url::parse("http://example.com/").unwrap(),
        ));
        let child = CandidateUri::discovered(
            Url::parse("http://example.com/a").unwrap(),
            &seed,
            HOP_LINK,
        );
        assert_eq!(child.path_from_seed, "L");
        assert_eq!(child.via.as_ref().unwrap().as_str(), "http://example.com/");

        let grandchild_parent = CrawlUri::from_candidate(child);
        let robots = CandidateUri::discovered(
            Url::parse("http://example.com/robots.txt").unwrap(),
            &grandchild_parent,
            HOP_PREREQUISITE,
        );
        assert_eq!(robots.path_from_seed, "LP");
        assert_eq!(robots.link_hops(), 1);
    }

    #[test]
    fn test_chain_skip_is_forward_only() {
        let mut c = curi("http://example.com/");
        c.begin_traversal();
        c.begin_chain(0, Some(1));
        c.skip_to_chain(3);
        assert_eq!(c.next_chain(), Some(3));
        assert_eq!(c.next_processor(), None);

        c.begin_chain(3, Some(4));
        c.skip_to_chain(1);
        assert_eq!(c.next_chain(), Some(4));
        assert_eq!(c.next_processor(), None);
    }

    #[test]
    fn test_processor_skip_within_chain() {
        let mut c = curi("http://example.com/");
        c.begin_traversal();
        c.begin_chain(0, None);
        c.set_current_processor(1);
        c.skip_to_processor(0, 0);
        assert_eq!(c.next_processor(), Some(0));
        c.set_next_processor(Some(2));
        c.skip_to_processor(0, 1);
        assert_eq!(c.next_processor(), Some(2));
        c.skip_to_processor(0, 4);
        assert_eq!(c.next_processor(), Some(4));
    }

    #[test]
    fn test_processor_skip_into_later_chain() {
        let mut c = curi("http://example.com/");
        c.begin_traversal();
        c.begin_chain(0, Some(1));
        c.set_current_processor(0);
        c.skip_to_processor(2, 1);
        assert_eq!(c.next_processor(), None);
        assert_eq!(c.next_chain(), Some(2));
        c.begin_chain(2, None);
        assert_eq!(c.next_processor(), Some(1));
    }

    #[test]
    fn test_mark_prerequisite() {
        let mut c = curi("http://example.com/page");
        c.begin_traversal();
        c.begin_chain(0, Some(1));
        c.mark_prerequisite(Url::parse("http://example.com/robots.txt").unwrap(), 4);
        assert_eq!(c.fetch_status(), S_DEFERRED);
        assert_eq!(c.next_chain(), Some(4));
        let prereq = c.prerequisite_uri().unwrap();
        assert!(prereq.force_fetch);
        assert_eq!(prereq.path_from_seed, "P");
    }

    #[test]
    fn test_reset_for_retry_keeps_identity() {
        let mut c = curi("http://example.com/page");
        c.set_fetch_status(S_RUNTIME_EXCEPTION);
        c.increment_fetch_attempts();
        c.add_annotation("err=Io");
        c.set_body(Some(b"x".to_vec()));
        c.reset_for_retry();
        assert_eq!(c.fetch_status(), S_UNATTEMPTED);
        assert_eq!(c.fetch_attempts(), 1);
        assert_eq!(c.annotations().len(), 1);
        assert!(c.body().is_none());
    }

    #[test]
    fn test_single_line_report() {
        let c = curi("http://example.com/");
        assert_eq!(c.single_line_report(), "http://example.com/ - -");
    }

    #[test]
    fn test_snapshot_drops_body() {
        let mut c = curi("http://example.com/");
        c.set_body(Some(vec![1, 2, 3]));
        assert!(c.snapshot().body().is_none());
        assert_eq!(c.body(), Some(&[1u8, 2, 3][..]));
    }
}
