//! Progress statistics
//!
//! Elapsed crawl time excludes time spent paused. A reporting task on the
//! controller's runtime writes one line per interval to the progress log.

use crate::crawler::report::format_elapsed;
use chrono::Utc;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Header line of the progress statistics log
pub const PROGRESS_LEGEND: &str = "[timestamp] [discovered] [queued] [downloaded] [doc/s(avg)] [KB/s(avg)] [dl-failures] [busy-thread] [elapsed]";

/// Counters sampled for one progress line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub discovered: u64,
    pub queued: u64,
    pub downloaded: u64,
    pub failures: u64,
    pub bytes: u64,
    pub busy_threads: usize,
    pub total_threads: usize,
}

#[derive(Debug, Default)]
struct Timing {
    started: Option<Instant>,
    paused_since: Option<Instant>,
    paused_total: Duration,
    last_sample: Option<(Instant, u64, u64)>,
}

#[derive(Debug, Default)]
pub struct StatisticsTracker {
    timing: Mutex<Timing>,
}

impl StatisticsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note_started(&self) {
        let mut t = self.timing.lock();
        if t.started.is_none() {
            t.started = Some(Instant::now());
        }
    }

    pub fn note_paused(&self) {
        let mut t = self.timing.lock();
        if t.paused_since.is_none() {
            t.paused_since = Some(Instant::now());
        }
    }

    pub fn note_resumed(&self) {
        let mut t = self.timing.lock();
        if let Some(since) = t.paused_since.take() {
            t.paused_total += since.elapsed();
        }
    }

    /// Crawl time so far, not counting pauses
    pub fn elapsed(&self) -> Duration {
        let t = self.timing.lock();
        Self::elapsed_of(&t, Instant::now())
    }

    fn elapsed_of(t: &Timing, now: Instant) -> Duration {
        let Some(started) = t.started else {
            return Duration::ZERO;
        };
        let paused = t.paused_total + t.paused_since.map_or(Duration::ZERO, |s| now - s);
        (now - started).saturating_sub(paused)
    }

    /// Formats one progress line and remembers it for current rates
    pub fn progress_line(&self, snap: &ProgressSnapshot) -> String {
        let now = Instant::now();
        let mut t = self.timing.lock();
        let elapsed = Self::elapsed_of(&t, now).as_secs_f64();

        let avg_docs = if elapsed > 0.0 {
            snap.downloaded as f64 / elapsed
        } else {
            0.0
        };
        let avg_kb = if elapsed > 0.0 {
            snap.bytes as f64 / 1024.0 / elapsed
        } else {
            0.0
        };
        let (cur_docs, cur_kb) = match t.last_sample {
            Some((at, docs, bytes)) if now > at => {
                let secs = (now - at).as_secs_f64();
                (
                    snap.downloaded.saturating_sub(docs) as f64 / secs,
                    snap.bytes.saturating_sub(bytes) as f64 / 1024.0 / secs,
                )
            }
            _ => (avg_docs, avg_kb),
        };
        t.last_sample = Some((now, snap.downloaded, snap.bytes));

        format!(
            "{} {:>12} {:>12} {:>12} {:.2}({:.2}) {:.0}({:.0}) {:>12} {:>6}/{} {}",
            Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
            snap.discovered,
            snap.queued,
            snap.downloaded,
            cur_docs,
            avg_docs,
            cur_kb,
            avg_kb,
            snap.failures,
            snap.busy_threads,
            snap.total_threads,
            format_elapsed(Self::elapsed_of(&t, now))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_elapsed_is_zero_before_start() {
        let stats = StatisticsTracker::new();
        assert_eq!(stats.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_pauses_are_excluded() {
        let stats = StatisticsTracker::new();
        stats.note_started();
        stats.note_paused();
        thread::sleep(Duration::from_millis(60));
        let paused = stats.elapsed();
        assert!(paused < Duration::from_millis(30));
        stats.note_resumed();
        thread::sleep(Duration::from_millis(20));
        assert!(stats.elapsed() >= Duration::from_millis(20));
        assert!(stats.elapsed() < Duration::from_millis(60));
    }

    #[test]
    fn test_progress_line_columns() {
        let stats = StatisticsTracker::new();
        stats.note_started();
        let line = stats.progress_line(&ProgressSnapshot {
            discovered: 10,
            queued: 4,
            downloaded: 6,
            failures: 1,
            bytes: 2048,
            busy_threads: 2,
            total_threads: 4,
        });
        let fields: Vec<&str> = line.split_whitespace().collect();
        assert_eq!(fields[1], "10");
        assert_eq!(fields[2], "4");
        assert_eq!(fields[3], "6");
        assert_eq!(fields[6], "1");
        assert_eq!(fields[7], "2/4");
    }
}
