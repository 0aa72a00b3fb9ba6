//! Report helpers and the crawl manifest

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Formats a duration the conventional way: `1h2m3s`, `4s250ms`, `12ms`
pub fn format_elapsed(d: Duration) -> String {
    let total_ms = d.as_millis();
    if total_ms == 0 {
        return "0ms".to_string();
    }
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let seconds = (total_ms / 1000) % 60;
    let millis = total_ms % 1000;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{}h", hours));
    }
    if minutes > 0 {
        out.push_str(&format!("{}m", minutes));
    }
    if seconds > 0 {
        out.push_str(&format!("{}s", seconds));
    }
    if millis > 0 && hours == 0 && minutes == 0 {
        out.push_str(&format!("{}ms", millis));
    }
    out
}

/// Kind of file listed in the manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    Config,
    Log,
    Report,
}

impl ManifestKind {
    pub fn letter(&self) -> char {
        match self {
            ManifestKind::Config => 'C',
            ManifestKind::Log => 'L',
            ManifestKind::Report => 'R',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ManifestEntry {
    kind: ManifestKind,
    path: PathBuf,
    bundle: bool,
}

/// Files the crawl produced or depended on
#[derive(Debug, Default)]
pub struct Manifest {
    entries: Mutex<Vec<ManifestEntry>>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `path` unless already listed; `bundle` marks it for inclusion
    /// in a crawl bundle
    pub fn add(&self, kind: ManifestKind, path: &Path, bundle: bool) {
        let mut entries = self.entries.lock();
        if entries.iter().any(|e| e.path == path) {
            return;
        }
        entries.push(ManifestEntry {
            kind,
            path: path.to_path_buf(),
            bundle,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// One line per file: kind letter, `+` if bundled, then the path
    pub fn report(&self) -> String {
        self.entries
            .lock()
            .iter()
            .map(|e| {
                format!(
                    "{}{} {}\n",
                    e.kind.letter(),
                    if e.bundle { "+" } else { " " },
                    e.path.display()
                )
            })
            .collect()
    }
}
