//! The pool of worker threads
//!
//! Workers live in a map keyed by serial number. Serials start at 1 and are
//! never reused. The pool grows by spawning and shrinks only by asking
//! workers to retire after their current item; the one forced path is an
//! explicit kill by serial.

use crate::crawler::controller::CrawlController;
use crate::crawler::toe_thread::{self, Step, ToeThread};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

pub struct ToePool {
    controller: Weak<CrawlController>,
    toes: Mutex<BTreeMap<u32, Arc<ToeThread>>>,
    next_serial: AtomicU32,
    target: AtomicUsize,
}

impl ToePool {
    pub(crate) fn new(controller: Weak<CrawlController>) -> Self {
        Self {
            controller,
            toes: Mutex::new(BTreeMap::new()),
            next_serial: AtomicU32::new(1),
            target: AtomicUsize::new(0),
        }
    }

    /// Target number of workers
    pub fn target_size(&self) -> usize {
        self.target.load(Ordering::Acquire)
    }

    /// Moves the pool toward `size` workers
    ///
    /// Missing workers are spawned at once. Extra workers (the newest
    /// first) are marked to retire and leave after their current item.
    pub fn set_size(&self, size: usize) -> io::Result<()> {
        self.target.store(size, Ordering::Release);
        let Some(controller) = self.controller.upgrade() else {
            return Ok(());
        };

        let mut toes = self.toes.lock();
        let working: Vec<Arc<ToeThread>> = toes
            .values()
            .filter(|t| !t.is_retiring() && !t.is_interrupted())
            .cloned()
            .collect();

        if working.len() < size {
            for _ in working.len()..size {
                let toe = self.spawn(&controller)?;
                toes.insert(toe.serial(), toe);
            }
        } else if working.len() > size {
            for toe in working.iter().rev().take(working.len() - size) {
                tracing::debug!("Retiring {}", toe.name());
                toe.retire();
            }
        }
        Ok(())
    }

    fn spawn(&self, controller: &Arc<CrawlController>) -> io::Result<Arc<ToeThread>> {
        let serial = self.next_serial.fetch_add(1, Ordering::AcqRel);
        let toe = Arc::new(ToeThread::new(serial));
        controller.note_toe_spawned();

        let worker = Arc::clone(&toe);
        let ctl = Arc::clone(controller);
        let spawned = thread::Builder::new()
            .name(toe.name().to_string())
            .spawn(move || toe_thread::run(worker, ctl));
        if let Err(e) = spawned {
            controller.note_toe_spawn_failed();
            return Err(e);
        }
        tracing::debug!("Spawned {}", toe.name());
        Ok(toe)
    }

    /// Kills worker `serial`, optionally spawning a replacement
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The worker was found and killed
    /// * `Ok(false)` - No live worker has that serial
    pub fn kill_thread(&self, serial: u32, replace: bool) -> io::Result<bool> {
        let Some(controller) = self.controller.upgrade() else {
            return Ok(false);
        };
        let Some(toe) = self.toes.lock().remove(&serial) else {
            return Ok(false);
        };
        controller.kill_toe(&toe);

        if replace {
            let fresh = self.spawn(&controller)?;
            tracing::info!("Replaced killed {} with {}", toe.name(), fresh.name());
            self.toes.lock().insert(fresh.serial(), fresh);
        }
        Ok(true)
    }

    /// Forgets a worker that has exited
    pub(crate) fn remove(&self, serial: u32) {
        self.toes.lock().remove(&serial);
    }

    /// Workers holding an item and not interrupted
    pub fn active_toe_count(&self) -> usize {
        self.toes.lock().values().filter(|t| t.is_active()).count()
    }

    /// Workers a pause still has to wait for
    pub fn claiming_or_active_count(&self) -> usize {
        self.toes
            .lock()
            .values()
            .filter(|t| t.is_claiming_or_active())
            .count()
    }

    /// All live workers, retiring ones included
    pub fn toe_count(&self) -> usize {
        self.toes.lock().len()
    }

    pub fn toe(&self, serial: u32) -> Option<Arc<ToeThread>> {
        self.toes.lock().get(&serial).cloned()
    }

    pub fn serials(&self) -> Vec<u32> {
        self.toes.lock().keys().copied().collect()
    }

    fn snapshot(&self) -> Vec<Arc<ToeThread>> {
        self.toes.lock().values().cloned().collect()
    }

    /// Full report of every worker
    pub fn report(&self, crawl_name: &str) -> String {
        let toes = self.snapshot();
        let active = toes.iter().filter(|t| t.is_active()).count();
        let mut out = format!(
            "Toe threads report - {}\n Job being crawled: {}\n Number of toe threads in pool: {} ({} active)\n",
            Utc::now().format("%Y%m%d%H%M"),
            crawl_name,
            toes.len(),
            active
        );
        for toe in &toes {
            out.push_str(&format!("   ToeThread #{}\n", toe.serial()));
            out.push_str(&toe.report());
        }
        out
    }

    /// Header line plus one line per worker
    pub fn compact_report(&self) -> String {
        let toes = self.snapshot();
        let active = toes.iter().filter(|t| t.is_active()).count();
        let mut out = format!("{} threads ({} active)\n", toes.len(), active);
        for toe in &toes {
            out.push_str(&toe.compact_report());
            out.push('\n');
        }
        out
    }

    /// Worker count plus the two most common steps
    pub fn single_line_report(&self) -> String {
        let toes = self.snapshot();
        let mut counts: HashMap<Step, usize> = HashMap::new();
        for toe in &toes {
            *counts.entry(toe.step()).or_insert(0) += 1;
        }
        let mut ranked: Vec<(Step, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let mut out = format!("{} threads: ", toes.len());
        for (step, count) in ranked.iter().take(2) {
            out.push_str(&format!("{} {}; ", count, step));
        }
        if ranked.len() > 2 {
            out.push_str("etc...");
        }
        out.trim_end().to_string()
    }
}
