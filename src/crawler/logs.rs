//! The crawl's own log files
//!
//! These are the operational record of a crawl, separate from diagnostic
//! `tracing` output:
//!
//! - `crawl.log`: one line per work item returned to the frontier
//! - `runtime-errors.log`: recoverable and serious processing errors
//! - `uri-errors.log`: discovered links that could not be used
//! - `progress-statistics.log`: one statistics line per reporting interval

use crate::uri::CrawlUri;
use chrono::Utc;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const CRAWL_LOG: &str = "crawl.log";
pub const RUNTIME_ERRORS_LOG: &str = "runtime-errors.log";
pub const URI_ERRORS_LOG: &str = "uri-errors.log";
pub const PROGRESS_LOG: &str = "progress-statistics.log";

const LOG_NAMES: [&str; 4] = [CRAWL_LOG, RUNTIME_ERRORS_LOG, URI_ERRORS_LOG, PROGRESS_LOG];

struct LogFiles {
    crawl: BufWriter<File>,
    runtime_errors: BufWriter<File>,
    uri_errors: BufWriter<File>,
    progress: BufWriter<File>,
}

impl LogFiles {
    fn open(dir: &Path) -> io::Result<Self> {
        let open = |name: &str| -> io::Result<BufWriter<File>> {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(name))?;
            Ok(BufWriter::new(file))
        };
        Ok(Self {
            crawl: open(CRAWL_LOG)?,
            runtime_errors: open(RUNTIME_ERRORS_LOG)?,
            uri_errors: open(URI_ERRORS_LOG)?,
            progress: open(PROGRESS_LOG)?,
        })
    }

    fn flush(&mut self) -> io::Result<()> {
        self.crawl.flush()?;
        self.runtime_errors.flush()?;
        self.uri_errors.flush()?;
        self.progress.flush()
    }
}

/// Writers for the crawl log files in one directory
pub struct CrawlLogs {
    dir: PathBuf,
    files: Mutex<Option<LogFiles>>,
}

impl CrawlLogs {
    /// Opens (appending) every log file in `dir`, creating it if needed
    pub fn open(dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            files: Mutex::new(Some(LogFiles::open(dir)?)),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Paths of every log file
    pub fn paths(&self) -> Vec<PathBuf> {
        LOG_NAMES.iter().map(|n| self.dir.join(n)).collect()
    }

    /// Records a work item handed back to the frontier
    pub fn crawled(&self, curi: &CrawlUri) {
        let annotations = if curi.annotations().is_empty() {
            "-".to_string()
        } else {
            curi.annotations().join(",")
        };
        let line = format!(
            "{} {:>5} {:>10} {} {} {} {} #{:03} {}\n",
            Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            curi.fetch_status(),
            curi.content_length(),
            curi.uri(),
            non_empty(curi.path_from_seed()),
            curi.via().map(|v| v.as_str()).unwrap_or("-"),
            curi.content_type().unwrap_or("-"),
            curi.thread_number().unwrap_or(0),
            annotations
        );
        self.write(|f| &mut f.crawl, &line, false);
    }

    /// Records a processing error on `curi` inside stage `processor`
    pub fn runtime_error(&self, curi: &CrawlUri, processor: &str, step: &str, error: &str) {
        let text = format!(
            "{} {} {} processor={} step={}\n {}\n",
            Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            curi.fetch_status(),
            curi.single_line_report(),
            processor,
            step,
            error.replace('\n', "\n ")
        );
        self.write(|f| &mut f.runtime_errors, &text, true);
    }

    /// Records a discovered link that could not be turned into a URI
    pub fn uri_error(&self, href: &str, via: &CrawlUri, error: &str) {
        let line = format!(
            "{} {} {} {}\n",
            Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            href,
            via.uri(),
            error
        );
        self.write(|f| &mut f.uri_errors, &line, false);
    }

    /// Appends one line to the progress statistics log
    pub fn progress(&self, line: &str) {
        self.write(|f| &mut f.progress, &format!("{}\n", line), true);
    }

    pub fn flush(&self) -> io::Result<()> {
        match self.files.lock().as_mut() {
            Some(files) => files.flush(),
            None => Ok(()),
        }
    }

    /// Renames every log to `<name><suffix>` and starts fresh files
    ///
    /// # Returns
    ///
    /// The paths of the rotated files
    pub fn rotate(&self, suffix: &str) -> io::Result<Vec<PathBuf>> {
        let mut files = self.files.lock();
        if let Some(mut open) = files.take() {
            open.flush()?;
        }
        let mut rotated = Vec::new();
        for name in LOG_NAMES {
            let current = self.dir.join(name);
            if current.exists() {
                let target = self.dir.join(format!("{}{}", name, suffix));
                fs::rename(&current, &target)?;
                rotated.push(target);
            }
        }
        *files = Some(LogFiles::open(&self.dir)?);
        Ok(rotated)
    }

    /// Flushes and closes every file; later writes are dropped
    pub fn close(&self) {
        if let Some(mut files) = self.files.lock().take() {
            if let Err(e) = files.flush() {
                tracing::warn!("Failed to flush crawl logs: {}", e);
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.files.lock().is_none()
    }

    fn write<F>(&self, pick: F, text: &str, flush: bool)
    where
        F: FnOnce(&mut LogFiles) -> &mut BufWriter<File>,
    {
        let mut files = self.files.lock();
        let Some(files) = files.as_mut() else {
            return;
        };
        let writer = pick(files);
        let result = writer
            .write_all(text.as_bytes())
            .and_then(|_| if flush { writer.flush() } else { Ok(()) });
        if let Err(e) = result {
            tracing::warn!("Failed to write crawl log: {}", e);
        }
    }
}

fn non_empty(s: &str) -> &str {
    if s.is_empty() {
        "-"
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn curi() -> CrawlUri {
        let mut c = CrawlUri::new(Url::parse("http://example.com/page").unwrap());
        c.set_fetch_status(200);
        c.set_content_length(512);
        c.set_thread_number(3);
        c.add_annotation("err=Runtime");
        c
    }

    #[test]
    fn test_crawled_line() {
        let dir = tempfile::tempdir().unwrap();
        let logs = CrawlLogs::open(dir.path()).unwrap();
        logs.crawled(&curi());
        logs.close();

        let text = fs::read_to_string(dir.path().join(CRAWL_LOG)).unwrap();
        assert!(text.contains("  200        512 http://example.com/page - - - #003 err=Runtime"));
    }

    #[test]
    fn test_runtime_error_entry() {
        let dir = tempfile::tempdir().unwrap();
        let logs = CrawlLogs::open(dir.path()).unwrap();
        logs.runtime_error(&curi(), "fetch-http", "ABOUT_TO_BEGIN_PROCESSOR", "boom\nsecond");
        let text = fs::read_to_string(dir.path().join(RUNTIME_ERRORS_LOG)).unwrap();
        assert!(text.contains("processor=fetch-http step=ABOUT_TO_BEGIN_PROCESSOR"));
        assert!(text.contains(" boom\n second\n"));
    }

    #[test]
    fn test_rotate_keeps_old_files() {
        let dir = tempfile::tempdir().unwrap();
        let logs = CrawlLogs::open(dir.path()).unwrap();
        logs.progress("first");
        let rotated = logs.rotate(".cp00001").unwrap();
        assert_eq!(rotated.len(), 4);
        logs.progress("second");
        logs.close();

        let old = fs::read_to_string(dir.path().join("progress-statistics.log.cp00001")).unwrap();
        let new = fs::read_to_string(dir.path().join(PROGRESS_LOG)).unwrap();
        assert_eq!(old, "first\n");
        assert_eq!(new, "second\n");
    }

    #[test]
    fn test_writes_after_close_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let logs = CrawlLogs::open(dir.path()).unwrap();
        logs.close();
        assert!(logs.is_closed());
        logs.progress("ignored");
        assert_eq!(
            fs::read_to_string(dir.path().join(PROGRESS_LOG)).unwrap(),
            ""
        );
    }
}
