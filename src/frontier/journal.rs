//! Recover journal
//!
//! One line per frontier event, so a crashed crawl can be rebuilt:
//!
//! ```text
//! F+ <uri> <path-from-seed|-> <via|->   scheduled
//! Fs <uri>                              finished, success
//! Ff <uri>                              finished, failure
//! Fd <uri>                              finished, disregarded
//! ```

use crate::uri::{CandidateUri, CrawlUri};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const RECOVER_LOG_NAME: &str = "recover.log";

const ADDED: &str = "F+";
const SUCCEEDED: &str = "Fs";
const FAILED: &str = "Ff";
const DISREGARDED: &str = "Fd";

/// A parsed journal line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    Added {
        uri: String,
        path_from_seed: String,
        via: Option<String>,
    },
    Succeeded(String),
    Failed(String),
    Disregarded(String),
}

/// Append-only writer of the recover journal
pub struct RecoverJournal {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl RecoverJournal {
    /// Opens (appending) the journal in `dir`
    pub fn open(dir: &Path) -> io::Result<Self> {
        let path = dir.join(RECOVER_LOG_NAME);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn added(&self, candidate: &CandidateUri) -> io::Result<()> {
        let path = if candidate.path_from_seed.is_empty() {
            "-"
        } else {
            candidate.path_from_seed.as_str()
        };
        let via = candidate.via.as_ref().map(|v| v.as_str()).unwrap_or("-");
        self.write_line(&format!("{} {} {} {}", ADDED, candidate.uri, path, via))
    }

    pub fn succeeded(&self, curi: &CrawlUri) -> io::Result<()> {
        self.write_line(&format!("{} {}", SUCCEEDED, curi.uri()))
    }

    pub fn failed(&self, curi: &CrawlUri) -> io::Result<()> {
        self.write_line(&format!("{} {}", FAILED, curi.uri()))
    }

    pub fn disregarded(&self, curi: &CrawlUri) -> io::Result<()> {
        self.write_line(&format!("{} {}", DISREGARDED, curi.uri()))
    }

    pub fn flush(&self) -> io::Result<()> {
        self.writer.lock().flush()
    }

    fn write_line(&self, line: &str) -> io::Result<()> {
        let mut writer = self.writer.lock();
        writeln!(writer, "{}", line)
    }
}

/// Reads every well-formed entry of a journal file, skipping others
pub fn read_entries(path: &Path) -> io::Result<Vec<JournalEntry>> {
    let reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    for line in reader.lines() {
        if let Some(entry) = parse_line(&line?) {
            entries.push(entry);
        }
    }
    Ok(entries)
}

fn parse_line(line: &str) -> Option<JournalEntry> {
    let mut parts = line.split_whitespace();
    let tag = parts.next()?;
    let uri = parts.next()?.to_string();
    match tag {
        ADDED => {
            let path_from_seed = match parts.next() {
                Some("-") | None => String::new(),
                Some(p) => p.to_string(),
            };
            let via = match parts.next() {
                Some("-") | None => None,
                Some(v) => Some(v.to_string()),
            };
            Some(JournalEntry::Added {
                uri,
                path_from_seed,
                via,
            })
        }
        SUCCEEDED => Some(JournalEntry::Succeeded(uri)),
        FAILED => Some(JournalEntry::Failed(uri)),
        DISREGARDED => Some(JournalEntry::Disregarded(uri)),
        _ => None,
    }
}
