//! In-memory frontier
//!
//! Items are ordered by priority class (prerequisites first), then by the
//! number of followed links from their seed, then by arrival. URIs are
//! de-duplicated by canonical key; a prerequisite may be forced past the
//! seen set but never queued twice.
//!
//! Deferred items park behind their prerequisite and are requeued once the
//! prerequisite finishes. Retryable failures are snoozed for the retry
//! delay before going back on the queue.

use super::journal::{self, JournalEntry, RecoverJournal};
use super::{Frontier, FrontierError};
use crate::config::CrawlOrder;
use crate::settings::Settings;
use crate::uri::fetch_status::{
    self, S_BLOCKED_BY_USER, S_DEFERRED, S_OUT_OF_SCOPE, S_PREREQUISITE_FAILURE,
    S_ROBOTS_PRECLUDED,
};
use crate::uri::{canonicalize, parse_http_uri, CandidateUri, CrawlUri};
use chrono::Utc;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use url::Url;

/// File name of the frontier's part of a checkpoint
pub const FRONTIER_SNAPSHOT_NAME: &str = "frontier.toml";

/// Deferrals after which an item fails with a prerequisite failure
pub const MAX_DEFERRALS: u32 = 5;

const PRIORITY_PREREQUISITE: u8 = 0;
const PRIORITY_NORMAL: u8 = 1;

struct Queued {
    priority: u8,
    hops: usize,
    ordinal: u64,
    curi: CrawlUri,
}

impl Queued {
    fn key(&self) -> (u8, usize, u64) {
        (self.priority, self.hops, self.ordinal)
    }
}

// BinaryHeap is a max-heap; reversed so the smallest key pops first
impl Ord for Queued {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.key().cmp(&self.key())
    }
}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Queued {}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    discovered: u64,
    finished: u64,
    succeeded: u64,
    failed: u64,
    disregarded: u64,
    total_bytes: u64,
}

enum Outcome {
    Succeeded,
    Failed,
    Disregarded,
}

fn classify(curi: &CrawlUri) -> Outcome {
    match curi.fetch_status() {
        s if fetch_status::is_success(s) => Outcome::Succeeded,
        S_OUT_OF_SCOPE | S_BLOCKED_BY_USER | S_ROBOTS_PRECLUDED => Outcome::Disregarded,
        _ => Outcome::Failed,
    }
}

struct Inner {
    queue: BinaryHeap<Queued>,
    snoozed: Vec<(Instant, CrawlUri)>,
    /// Deferred items keyed by their prerequisite's canonical key
    waiting: HashMap<String, Vec<CrawlUri>>,
    /// Snapshots of handed-out items, keyed by canonical key
    in_flight: HashMap<String, CrawlUri>,
    seen: HashSet<String>,
    /// Keys queued, snoozed, waiting or in flight
    pending: HashSet<String>,
    next_ordinal: u64,
    paused: bool,
    terminated: bool,
    counters: Counters,
}

impl Inner {
    fn new() -> Self {
        Self {
            queue: BinaryHeap::new(),
            snoozed: Vec::new(),
            waiting: HashMap::new(),
            in_flight: HashMap::new(),
            seen: HashSet::new(),
            pending: HashSet::new(),
            next_ordinal: 0,
            paused: true,
            terminated: false,
            counters: Counters::default(),
        }
    }

    fn enqueue(&mut self, curi: CrawlUri) {
        let priority = if curi.force_fetch() {
            PRIORITY_PREREQUISITE
        } else {
            PRIORITY_NORMAL
        };
        let item = Queued {
            priority,
            hops: curi.link_hops(),
            ordinal: self.next_ordinal,
            curi,
        };
        self.next_ordinal += 1;
        self.queue.push(item);
    }

    fn wake_snoozed(&mut self, now: Instant) {
        let mut i = 0;
        while i < self.snoozed.len() {
            if self.snoozed[i].0 <= now {
                let (_, curi) = self.snoozed.swap_remove(i);
                self.enqueue(curi);
            } else {
                i += 1;
            }
        }
    }

    fn earliest_wake(&self) -> Option<Instant> {
        self.snoozed.iter().map(|(at, _)| *at).min()
    }

    fn release_waiters(&mut self, prerequisite_key: &str) {
        if let Some(items) = self.waiting.remove(prerequisite_key) {
            for curi in items {
                self.enqueue(curi);
            }
        }
    }

    fn waiting_count(&self) -> usize {
        self.waiting.values().map(Vec::len).sum()
    }

    fn queued_count(&self) -> usize {
        self.queue.len() + self.snoozed.len() + self.waiting_count()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct FrontierSnapshot {
    written: String,
    discovered: u64,
    finished: u64,
    succeeded: u64,
    failed: u64,
    disregarded: u64,
    total_bytes: u64,
    #[serde(default)]
    seen: Vec<String>,
    #[serde(default, rename = "item")]
    items: Vec<SnapshotItem>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct SnapshotItem {
    uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    via: Option<String>,
    #[serde(default)]
    path_from_seed: String,
    #[serde(default)]
    is_seed: bool,
    #[serde(default)]
    force_fetch: bool,
    #[serde(default)]
    fetch_attempts: u32,
    #[serde(default)]
    deferrals: u32,
}

impl SnapshotItem {
    fn of(curi: &CrawlUri) -> Self {
        Self {
            uri: curi.uri().to_string(),
            via: curi.via().map(Url::to_string),
            path_from_seed: curi.path_from_seed().to_string(),
            is_seed: curi.is_seed(),
            force_fetch: curi.force_fetch(),
            fetch_attempts: curi.fetch_attempts(),
            deferrals: curi.deferrals(),
        }
    }

    fn into_curi(self) -> Option<CrawlUri> {
        let uri = parse_http_uri(&self.uri).ok()?;
        let candidate = CandidateUri {
            uri,
            via: self.via.as_deref().and_then(|v| Url::parse(v).ok()),
            path_from_seed: self.path_from_seed,
            is_seed: self.is_seed,
            force_fetch: self.force_fetch,
        };
        let mut curi = CrawlUri::from_candidate(candidate);
        curi.restore_counts(self.fetch_attempts, self.deferrals);
        Some(curi)
    }
}

/// A frontier holding all of its state in memory
///
/// Starts paused; [`start`](Frontier::start) releases work to the workers.
pub struct MemoryFrontier {
    inner: Mutex<Inner>,
    available: Condvar,
    seeds: Vec<String>,
    max_retries: AtomicU32,
    retry_delay_ms: AtomicU64,
    journal: Mutex<Option<RecoverJournal>>,
}

impl MemoryFrontier {
    /// Creates a frontier for the crawl described by `order`
    pub fn new(order: &CrawlOrder) -> Self {
        Self::with_limits(
            order.scope.seeds.clone(),
            order.crawl.max_retries,
            Duration::from_millis(order.crawl.retry_delay_ms),
        )
    }

    /// Creates a frontier with explicit seeds and retry policy
    pub fn with_limits(seeds: Vec<String>, max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
            available: Condvar::new(),
            seeds,
            max_retries: AtomicU32::new(max_retries),
            retry_delay_ms: AtomicU64::new(retry_delay.as_millis() as u64),
            journal: Mutex::new(None),
        }
    }

    /// Items currently handed out to workers
    pub fn in_flight_count(&self) -> usize {
        self.inner.lock().in_flight.len()
    }

    /// Deferred items waiting for a prerequisite
    pub fn waiting_count(&self) -> usize {
        self.inner.lock().waiting_count()
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    fn write_journal<F>(&self, write: F)
    where
        F: FnOnce(&RecoverJournal) -> std::io::Result<()>,
    {
        if let Some(journal) = self.journal.lock().as_ref() {
            if let Err(e) = write(journal) {
                tracing::warn!("Failed to write recover journal: {}", e);
            }
        }
    }
}

impl Frontier for MemoryFrontier {
    fn initialize(&self, logs_dir: &Path) -> Result<(), FrontierError> {
        let journal = RecoverJournal::open(logs_dir)?;
        tracing::debug!("Recover journal opened at {}", journal.path().display());
        *self.journal.lock() = Some(journal);
        Ok(())
    }

    fn start(&self) {
        tracing::info!("Frontier started");
        self.unpause();
    }

    fn next(&self, timeout: Duration) -> Result<Option<CrawlUri>, FrontierError> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        let entered_paused = inner.paused;
        loop {
            if inner.terminated {
                return Err(FrontierError::Ended);
            }
            if inner.paused && !entered_paused {
                return Ok(None);
            }
            let now = Instant::now();
            if !inner.paused {
                inner.wake_snoozed(now);
                if let Some(item) = inner.queue.pop() {
                    let curi = item.curi;
                    inner.in_flight.insert(curi.canonical_key(), curi.snapshot());
                    return Ok(Some(curi));
                }
            }
            if now >= deadline {
                return Ok(None);
            }
            let wake = match inner.earliest_wake() {
                Some(at) if !inner.paused && at < deadline => at,
                _ => deadline,
            };
            self.available.wait_until(&mut inner, wake);
        }
    }

    fn finished(&self, mut curi: CrawlUri) -> Result<(), FrontierError> {
        let key = curi.canonical_key();
        let outcome = {
            let mut inner = self.inner.lock();
            inner.in_flight.remove(&key);
            let status = curi.fetch_status();

            if status == S_DEFERRED && curi.deferrals() < MAX_DEFERRALS {
                curi.increment_deferrals();
                let prerequisite = curi.prerequisite_uri().map(CandidateUri::canonical_key);
                curi.reset_for_retry();
                match prerequisite {
                    Some(p) if inner.pending.contains(&p) => {
                        inner.waiting.entry(p).or_default().push(curi)
                    }
                    _ => inner.enqueue(curi),
                }
                self.available.notify_one();
                return Ok(());
            }

            if status == S_DEFERRED {
                curi.set_fetch_status(S_PREREQUISITE_FAILURE);
            } else if fetch_status::is_retryable(status)
                && curi.fetch_attempts() < self.max_retries.load(Ordering::Relaxed)
            {
                tracing::debug!(
                    "Snoozing {} for retry (status {}, attempt {})",
                    curi,
                    status,
                    curi.fetch_attempts()
                );
                curi.reset_for_retry();
                let at =
                    Instant::now() + Duration::from_millis(self.retry_delay_ms.load(Ordering::Relaxed));
                inner.snoozed.push((at, curi));
                self.available.notify_all();
                return Ok(());
            }

            inner.pending.remove(&key);
            inner.counters.finished += 1;
            let outcome = classify(&curi);
            match outcome {
                Outcome::Succeeded => {
                    inner.counters.succeeded += 1;
                    inner.counters.total_bytes += curi.content_length();
                }
                Outcome::Failed => inner.counters.failed += 1,
                Outcome::Disregarded => inner.counters.disregarded += 1,
            }
            inner.release_waiters(&key);
            self.available.notify_all();
            outcome
        };

        self.write_journal(|j| match outcome {
            Outcome::Succeeded => j.succeeded(&curi),
            Outcome::Failed => j.failed(&curi),
            Outcome::Disregarded => j.disregarded(&curi),
        });
        Ok(())
    }

    fn schedule(&self, candidate: CandidateUri) -> Result<bool, FrontierError> {
        let key = candidate.canonical_key();
        {
            let mut inner = self.inner.lock();
            if inner.pending.contains(&key) {
                return Ok(false);
            }
            if !inner.seen.insert(key.clone()) && !candidate.force_fetch {
                return Ok(false);
            }
            inner.pending.insert(key);
            inner.counters.discovered += 1;
            inner.enqueue(CrawlUri::from_candidate(candidate.clone()));
        }
        self.available.notify_one();
        self.write_journal(|j| j.added(&candidate));
        Ok(true)
    }

    fn pause(&self) {
        self.inner.lock().paused = true;
        self.available.notify_all();
    }

    fn unpause(&self) {
        self.inner.lock().paused = false;
        self.available.notify_all();
    }

    fn terminate(&self) {
        self.inner.lock().terminated = true;
        self.available.notify_all();
    }

    fn is_empty(&self) -> bool {
        let inner = self.inner.lock();
        inner.queued_count() == 0 && inner.in_flight.is_empty()
    }

    fn queued_uri_count(&self) -> u64 {
        self.inner.lock().queued_count() as u64
    }

    fn finished_uri_count(&self) -> u64 {
        self.inner.lock().counters.finished
    }

    fn succeeded_fetch_count(&self) -> u64 {
        self.inner.lock().counters.succeeded
    }

    fn failed_fetch_count(&self) -> u64 {
        self.inner.lock().counters.failed
    }

    fn disregarded_uri_count(&self) -> u64 {
        self.inner.lock().counters.disregarded
    }

    fn total_bytes(&self) -> u64 {
        self.inner.lock().counters.total_bytes
    }

    fn discovered_uri_count(&self) -> u64 {
        self.inner.lock().counters.discovered
    }

    fn load_seeds(&self) -> Result<usize, FrontierError> {
        let mut queued = 0;
        for seed in &self.seeds {
            match parse_http_uri(seed) {
                Ok(url) => {
                    if self.schedule(CandidateUri::seed(url))? {
                        queued += 1;
                    }
                }
                Err(e) => tracing::warn!("Skipping invalid seed {}: {}", seed, e),
            }
        }
        tracing::info!("Loaded {} seeds into frontier", queued);
        Ok(queued)
    }

    fn import_recover_log(&self, path: &Path, retain_failures: bool) -> Result<usize, FrontierError> {
        let entries = journal::read_entries(path)
            .map_err(|e| FrontierError::Journal(format!("{}: {}", path.display(), e)))?;

        let key_of = |uri: &str| parse_http_uri(uri).ok().map(|u| canonicalize(&u));
        let mut done = HashSet::new();
        for entry in &entries {
            match entry {
                JournalEntry::Succeeded(uri) => done.extend(key_of(uri)),
                JournalEntry::Failed(uri) | JournalEntry::Disregarded(uri) if !retain_failures => {
                    done.extend(key_of(uri))
                }
                _ => {}
            }
        }
        self.inner.lock().seen.extend(done.iter().cloned());

        let mut scheduled = 0;
        for entry in entries {
            let JournalEntry::Added {
                uri,
                path_from_seed,
                via,
            } = entry
            else {
                continue;
            };
            let Ok(url) = parse_http_uri(&uri) else {
                continue;
            };
            if done.contains(&canonicalize(&url)) {
                continue;
            }
            let candidate = CandidateUri {
                uri: url,
                via: via.as_deref().and_then(|v| Url::parse(v).ok()),
                is_seed: path_from_seed.is_empty(),
                path_from_seed,
                force_fetch: false,
            };
            if self.schedule(candidate)? {
                scheduled += 1;
            }
        }
        tracing::info!(
            "Imported recover log {}: {} scheduled, {} already done",
            path.display(),
            scheduled,
            done.len()
        );
        Ok(scheduled)
    }

    fn checkpoint(&self, dir: &Path) -> Result<(), FrontierError> {
        self.write_journal(RecoverJournal::flush);

        let snapshot = {
            let inner = self.inner.lock();
            let mut queued: Vec<&Queued> = inner.queue.iter().collect();
            queued.sort_by(|a, b| b.cmp(a));

            let mut items: Vec<SnapshotItem> =
                queued.iter().map(|q| SnapshotItem::of(&q.curi)).collect();
            items.extend(inner.in_flight.values().map(SnapshotItem::of));
            items.extend(inner.snoozed.iter().map(|(_, c)| SnapshotItem::of(c)));
            items.extend(inner.waiting.values().flatten().map(SnapshotItem::of));

            let mut seen: Vec<String> = inner.seen.iter().cloned().collect();
            seen.sort();

            let c = inner.counters;
            FrontierSnapshot {
                written: Utc::now().to_rfc3339(),
                discovered: c.discovered,
                finished: c.finished,
                succeeded: c.succeeded,
                failed: c.failed,
                disregarded: c.disregarded,
                total_bytes: c.total_bytes,
                seen,
                items,
            }
        };

        let text = toml::to_string(&snapshot).map_err(|e| FrontierError::Snapshot(e.to_string()))?;
        std::fs::write(dir.join(FRONTIER_SNAPSHOT_NAME), text)?;
        tracing::debug!("Frontier checkpointed with {} items", snapshot.items.len());
        Ok(())
    }

    fn recover(&self, dir: &Path) -> Result<(), FrontierError> {
        let path = dir.join(FRONTIER_SNAPSHOT_NAME);
        let text = std::fs::read_to_string(&path)?;
        let snapshot: FrontierSnapshot =
            toml::from_str(&text).map_err(|e| FrontierError::Snapshot(e.to_string()))?;

        let mut inner = self.inner.lock();
        inner.counters = Counters {
            discovered: snapshot.discovered,
            finished: snapshot.finished,
            succeeded: snapshot.succeeded,
            failed: snapshot.failed,
            disregarded: snapshot.disregarded,
            total_bytes: snapshot.total_bytes,
        };
        inner.seen.extend(snapshot.seen);
        let mut restored = 0;
        for item in snapshot.items {
            if let Some(curi) = item.into_curi() {
                let key = curi.canonical_key();
                inner.seen.insert(key.clone());
                if inner.pending.insert(key) {
                    inner.enqueue(curi);
                    restored += 1;
                }
            }
        }
        tracing::info!(
            "Recovered {} queued URIs from {}",
            restored,
            path.display()
        );
        Ok(())
    }

    fn final_tasks(&self) {
        self.write_journal(RecoverJournal::flush);
    }

    fn kick_update(&self, settings: &dyn Settings) {
        let retries = settings.u64_attribute(
            "frontier.max-retries",
            None,
            self.max_retries.load(Ordering::Relaxed) as u64,
        );
        self.max_retries
            .store(retries.min(u32::MAX as u64) as u32, Ordering::Relaxed);
        let delay = settings.u64_attribute(
            "frontier.retry-delay-ms",
            None,
            self.retry_delay_ms.load(Ordering::Relaxed),
        );
        self.retry_delay_ms.store(delay, Ordering::Relaxed);
    }

    fn report(&self) -> String {
        let inner = self.inner.lock();
        let c = inner.counters;
        format!(
            "Frontier report - {}\n -----===== STATS =====-----\n Discovered:    {}\n Queued:        {}\n Finished:      {}\n  Successfully: {}\n  Failed:       {}\n  Disregarded:  {}\n In flight:     {}\n Snoozed:       {}\n Waiting on prerequisites: {}\n Paused:        {}\n",
            Utc::now().format("%Y%m%d%H%M"),
            c.discovered,
            inner.queue.len(),
            c.finished,
            c.succeeded,
            c.failed,
            c.disregarded,
            inner.in_flight.len(),
            inner.snoozed.len(),
            inner.waiting_count(),
            inner.paused,
        )
    }
}
