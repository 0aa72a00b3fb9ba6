//! The crawl controller
//!
//! `CrawlController` owns the crawl state machine and everything a running
//! crawl needs: the frontier, the processor chains, the worker pool, the
//! server cache, the crawl logs and a small async runtime. It is shared
//! between the operator (whoever calls the `request_*` methods), the worker
//! threads, and the statistics task, so every method takes `&self`.
//!
//! State changes happen under one control mutex and are announced through a
//! condition variable, so [`CrawlController::wait_for_state`] never misses a
//! transition. Listener notifications are delivered in the same order as
//! the transitions that caused them.

use crate::config::{CrawlOrder, MAX_TOE_THREADS};
use crate::crawler::checkpoint::{self, Checkpointer, ControllerSnapshot, InProgressCheckpoint};
use crate::crawler::gate::ContinueGate;
use crate::crawler::listener::{self, CrawlStatusListener};
use crate::crawler::logs::CrawlLogs;
use crate::crawler::report::{Manifest, ManifestKind};
use crate::crawler::runtime::CrawlRuntime;
use crate::crawler::stats::{ProgressSnapshot, StatisticsTracker, PROGRESS_LEGEND};
use crate::crawler::toe_pool::ToePool;
use crate::crawler::toe_thread::{ToeThread, WorkerEnv};
use crate::frontier::Frontier;
use crate::pipeline::{ProcessorChainList, ProcessorContext};
use crate::server::ServerCache;
use crate::settings::{OrderSettings, Settings};
use crate::state::{status, CrawlState};
use crate::storage;
use crate::{CrawlError, Result};
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Size of the memory block released on the serious-error path
pub const RESERVE_MEMORY_BYTES: usize = 6 * 1024 * 1024;

/// Names accepted by [`CrawlController::report`]
pub const REPORT_NAMES: [&str; 6] = [
    "processors",
    "manifest",
    "frontier",
    "servers",
    "toe-threads",
    "compact",
];

#[derive(Debug)]
struct Control {
    exit_reason: String,
    pending_stop: Option<String>,
}

/// Collaborators that exist between `initialize` and the end of the crawl
struct Components {
    frontier: Arc<dyn Frontier>,
    chains: Arc<ProcessorChainList>,
    pool: Arc<ToePool>,
    server_cache: Arc<ServerCache>,
    logs: Arc<CrawlLogs>,
    context: ProcessorContext,
    stats_task: Option<JoinHandle<()>>,
    // dropped last: shuts down the runtime
    runtime: CrawlRuntime,
}

pub struct CrawlController {
    me: Weak<CrawlController>,
    order: Arc<CrawlOrder>,
    settings: Arc<dyn Settings>,
    state: AtomicU8,
    control: Mutex<Control>,
    state_changed: Condvar,
    listeners: Mutex<Vec<Arc<dyn CrawlStatusListener>>>,
    components: RwLock<Option<Components>>,
    looping: AtomicUsize,
    gate: ContinueGate,
    reserve: Mutex<Option<Vec<u8>>>,
    manifest: Manifest,
    stats: StatisticsTracker,
    started_at: Mutex<Option<DateTime<Utc>>>,
    stop_completing: AtomicBool,
}

impl CrawlController {
    /// Creates a controller in the `Nascent` state
    pub fn new(order: CrawlOrder, settings: Arc<dyn Settings>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            order: Arc::new(order),
            settings,
            state: AtomicU8::new(CrawlState::Nascent.to_u8()),
            control: Mutex::new(Control {
                exit_reason: status::FINISHED_ABNORMAL.to_string(),
                pending_stop: None,
            }),
            state_changed: Condvar::new(),
            listeners: Mutex::new(Vec::new()),
            components: RwLock::new(None),
            looping: AtomicUsize::new(0),
            gate: ContinueGate::new(),
            reserve: Mutex::new(None),
            manifest: Manifest::new(),
            stats: StatisticsTracker::new(),
            started_at: Mutex::new(None),
            stop_completing: AtomicBool::new(false),
        })
    }

    /// Creates a controller whose settings come from the order itself
    pub fn from_order(order: CrawlOrder) -> Result<Arc<Self>> {
        let settings = OrderSettings::from_order(&order)?;
        Ok(Self::new(order, Arc::new(settings)))
    }

    pub fn order(&self) -> &CrawlOrder {
        &self.order
    }

    pub fn settings(&self) -> &dyn Settings {
        self.settings.as_ref()
    }

    pub fn state(&self) -> CrawlState {
        CrawlState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Why the crawl ended, or will end if stopped abnormally
    pub fn exit_reason(&self) -> String {
        self.control.lock().exit_reason.clone()
    }

    pub fn add_listener(&self, listener: Arc<dyn CrawlStatusListener>) {
        self.listeners.lock().push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn statistics(&self) -> &StatisticsTracker {
        &self.stats
    }

    pub fn frontier(&self) -> Option<Arc<dyn Frontier>> {
        self.components
            .read()
            .as_ref()
            .map(|c| Arc::clone(&c.frontier))
    }

    pub fn toe_pool(&self) -> Option<Arc<ToePool>> {
        self.components.read().as_ref().map(|c| Arc::clone(&c.pool))
    }

    pub fn server_cache(&self) -> Option<Arc<ServerCache>> {
        self.components
            .read()
            .as_ref()
            .map(|c| Arc::clone(&c.server_cache))
    }

    fn chains(&self) -> Option<Arc<ProcessorChainList>> {
        self.components
            .read()
            .as_ref()
            .map(|c| Arc::clone(&c.chains))
    }

    fn logs(&self) -> Option<Arc<CrawlLogs>> {
        self.components.read().as_ref().map(|c| Arc::clone(&c.logs))
    }

    // ===== State transitions =====

    /// Moves to `next` if legal; the caller holds the control lock
    fn transition(&self, _control: &MutexGuard<'_, Control>, next: CrawlState) -> bool {
        let current = self.state();
        if !current.can_transition_to(next) {
            tracing::warn!("Ignoring illegal transition {} -> {}", current, next);
            return false;
        }
        self.state.store(next.to_u8(), Ordering::SeqCst);
        self.state_changed.notify_all();
        tracing::debug!("Crawl state {} -> {}", current, next);
        true
    }

    /// Releases the control lock and tells every listener about `state`
    ///
    /// The listener lock is taken before the control lock is released so
    /// notifications keep the order of the transitions.
    fn announce(&self, control: MutexGuard<'_, Control>, state: CrawlState, message: &str) {
        let listeners = self.listeners.lock();
        drop(control);
        for l in listeners.iter() {
            listener::dispatch(l.as_ref(), state, message);
        }
    }

    /// Blocks until `predicate` holds for the current state or `timeout`
    /// passes; returns the state last seen
    pub fn wait_for_state<P>(&self, predicate: P, timeout: Option<Duration>) -> CrawlState
    where
        P: Fn(CrawlState) -> bool,
    {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut control = self.control.lock();
        loop {
            let state = self.state();
            if predicate(state) {
                return state;
            }
            match deadline {
                Some(deadline) => {
                    if self
                        .state_changed
                        .wait_until(&mut control, deadline)
                        .timed_out()
                    {
                        return self.state();
                    }
                }
                None => self.state_changed.wait(&mut control),
            }
        }
    }

    // ===== Setup =====

    /// Prepares the crawl: directories, logs, frontier contents, runtime
    /// and the worker pool
    ///
    /// Any failure here is fatal; the crawl moves to `Finished` without
    /// ever running and the error names the step that failed.
    pub fn initialize(
        &self,
        frontier: Arc<dyn Frontier>,
        chains: ProcessorChainList,
    ) -> Result<()> {
        {
            let control = self.control.lock();
            let state = self.state();
            if state != CrawlState::Nascent {
                return Err(CrawlError::IllegalState {
                    operation: "initialize",
                    state,
                });
            }
            self.transition(&control, CrawlState::Preparing);
        }
        tracing::info!("Initializing crawl {}", self.order.crawl.name);

        if let Err(e) = self.setup(frontier, chains) {
            tracing::error!("Crawl {} failed to initialize: {}", self.order.crawl.name, e);
            self.abandon_setup();
            return Err(e);
        }
        tracing::info!(
            "Crawl {} initialized with {} toe threads",
            self.order.crawl.name,
            self.toe_count()
        );
        Ok(())
    }

    fn step_failed(&self, step: &'static str) -> impl FnOnce(CrawlError) -> CrawlError + '_ {
        move |source| CrawlError::Initialization {
            crawl: self.order.crawl.name.clone(),
            step,
            source: Box::new(source),
        }
    }

    fn setup(&self, frontier: Arc<dyn Frontier>, chains: ProcessorChainList) -> Result<()> {
        let order = &self.order;
        let logs_dir = order.logs_dir();

        (|| -> io::Result<()> {
            fs::create_dir_all(order.job_dir())?;
            fs::create_dir_all(&logs_dir)?;
            fs::create_dir_all(order.checkpoints_dir())?;
            fs::create_dir_all(order.state_dir())?;
            fs::create_dir_all(order.scratch_dir())
        })()
        .map_err(|e| self.step_failed("setting up disk")(e.into()))?;

        let logs = CrawlLogs::open(&logs_dir)
            .map(Arc::new)
            .map_err(|e| self.step_failed("opening crawl logs")(e.into()))?;
        logs.progress(PROGRESS_LEGEND);

        let runtime =
            CrawlRuntime::new().map_err(|e| self.step_failed("starting async runtime")(e.into()))?;

        frontier
            .initialize(&logs_dir)
            .map_err(|e| self.step_failed("setting up frontier")(e.into()))?;
        self.fill_frontier(frontier.as_ref())?;

        let mut reserve = Vec::new();
        reserve
            .try_reserve_exact(RESERVE_MEMORY_BYTES)
            .map_err(|e| {
                self.step_failed("reserving emergency memory")(
                    io::Error::new(io::ErrorKind::OutOfMemory, e).into(),
                )
            })?;
        *self.reserve.lock() = Some(reserve);

        if let Some(path) = &order.source_path {
            self.manifest.add(ManifestKind::Config, path, true);
        }
        for path in logs.paths() {
            self.manifest.add(ManifestKind::Log, &path, true);
        }

        let chains = Arc::new(chains);
        let server_cache = Arc::new(ServerCache::new());
        let context = ProcessorContext::new(
            Arc::clone(&self.order),
            Arc::clone(&self.settings),
            Arc::clone(&frontier),
            Arc::clone(&server_cache),
            Arc::clone(&logs),
            runtime.handle().clone(),
            chains.post_chain_index(),
        );
        let pool = Arc::new(ToePool::new(self.me.clone()));

        *self.components.write() = Some(Components {
            frontier,
            chains,
            pool: Arc::clone(&pool),
            server_cache,
            logs,
            context,
            stats_task: None,
            runtime,
        });

        pool.set_size(self.configured_toe_threads())
            .map_err(|e| self.step_failed("starting toe threads")(e.into()))
    }

    /// Loads the frontier from a checkpoint, or from the seeds and an
    /// optional recover journal
    fn fill_frontier(&self, frontier: &dyn Frontier) -> Result<()> {
        let disk = &self.order.disk;
        if let Some(name) = &disk.recover_checkpoint {
            let dir = self.order.checkpoints_dir().join(name);
            match ControllerSnapshot::read(&dir) {
                Ok(snapshot) => tracing::info!(
                    "Recovering crawl {} from checkpoint {} (written {})",
                    snapshot.crawl_name,
                    name,
                    snapshot.written
                ),
                Err(e) => tracing::warn!("Checkpoint {} has no controller snapshot: {}", name, e),
            }
            frontier
                .recover(&dir)
                .map_err(|e| self.step_failed("recovering checkpoint")(e.into()))?;
            return Ok(());
        }

        let seeds = frontier
            .load_seeds()
            .map_err(|e| self.step_failed("loading seeds")(e.into()))?;
        tracing::info!("Loaded {} seeds", seeds);

        if let Some(log) = &disk.recover_log {
            let path = self.resolve_in_job(log);
            let imported = frontier
                .import_recover_log(&path, disk.recover_retain_failures)
                .map_err(|e| self.step_failed("importing recover log")(e.into()))?;
            tracing::info!("Imported {} URIs from {}", imported, path.display());
        }
        Ok(())
    }

    fn resolve_in_job(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.order.job_dir().join(p)
        }
    }

    /// Tears down whatever `setup` managed to build
    fn abandon_setup(&self) {
        {
            let mut control = self.control.lock();
            control.exit_reason = status::FINISHED_ABNORMAL.to_string();
            self.transition(&control, CrawlState::Stopping);
        }
        let taken = self.components.write().take();
        if let Some(c) = taken {
            c.frontier.terminate();
            c.pool.set_size(0).ok();
            c.logs.close();
        }
        self.stop_completing.store(true, Ordering::Release);
        let control = self.control.lock();
        self.transition(&control, CrawlState::Finished);
    }

    fn configured_toe_threads(&self) -> usize {
        let threads = self.settings.u64_attribute(
            "crawl.max-toe-threads",
            None,
            self.order.crawl.max_toe_threads as u64,
        );
        usize::try_from(threads)
            .unwrap_or(MAX_TOE_THREADS)
            .min(MAX_TOE_THREADS)
    }

    // ===== Start =====

    /// Starts a prepared crawl
    ///
    /// Runs the processors' initial tasks, moves through `Started` to
    /// `Running`, starts the statistics task and lets the frontier hand out
    /// work. With `pause-at-start` the crawl pauses at once instead.
    pub fn request_crawl_start(&self) -> Result<()> {
        {
            let control = self.control.lock();
            let state = self.state();
            if state != CrawlState::Preparing {
                return Err(CrawlError::IllegalState {
                    operation: "start",
                    state,
                });
            }
            drop(control);
        }
        let (Some(frontier), Some(chains)) = (self.frontier(), self.chains()) else {
            return Err(CrawlError::IllegalState {
                operation: "start",
                state: self.state(),
            });
        };

        chains.initial_tasks();

        {
            let mut control = self.control.lock();
            control.exit_reason = status::FINISHED_ABNORMAL.to_string();
            if !self.transition(&control, CrawlState::Started) {
                return Err(CrawlError::IllegalState {
                    operation: "start",
                    state: self.state(),
                });
            }
            self.announce(control, CrawlState::Started, status::PENDING);
        }

        self.stats.note_started();
        *self.started_at.lock() = Some(Utc::now());

        {
            let control = self.control.lock();
            self.transition(&control, CrawlState::Running);
            self.announce(control, CrawlState::Running, status::RUNNING);
        }
        tracing::info!("Crawl {} started", self.order.crawl.name);

        self.start_progress_task();
        if self.order.crawl.pause_at_start {
            tracing::info!("Pausing at start");
            self.request_crawl_pause();
        } else {
            frontier.start();
        }
        Ok(())
    }

    fn start_progress_task(&self) {
        let interval = Duration::from_secs(self.order.crawl.progress_interval_sec.max(1));
        let weak = self.me.clone();
        let mut guard = self.components.write();
        let Some(c) = guard.as_mut() else {
            return;
        };
        c.stats_task = Some(c.runtime.handle().spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(controller) = weak.upgrade() else {
                    break;
                };
                if controller.state().is_ending() {
                    break;
                }
                let tick = tokio::task::spawn_blocking(move || controller.progress_tick());
                if tick.await.is_err() {
                    break;
                }
            }
        }));
    }

    fn progress_tick(&self) {
        self.log_progress();
        self.check_finish();
    }

    /// Samples the crawl's counters
    pub fn progress_snapshot(&self) -> ProgressSnapshot {
        let guard = self.components.read();
        let Some(c) = guard.as_ref() else {
            return ProgressSnapshot::default();
        };
        ProgressSnapshot {
            discovered: c.frontier.discovered_uri_count(),
            queued: c.frontier.queued_uri_count(),
            downloaded: c.frontier.succeeded_fetch_count(),
            failures: c.frontier.failed_fetch_count(),
            bytes: c.frontier.total_bytes(),
            busy_threads: c.pool.active_toe_count(),
            total_threads: c.pool.toe_count(),
        }
    }

    /// One progress statistics line for the current counters
    pub fn progress_statistics_line(&self) -> String {
        self.stats.progress_line(&self.progress_snapshot())
    }

    fn log_progress(&self) {
        let line = self.progress_statistics_line();
        tracing::debug!("{}", line);
        if let Some(logs) = self.logs() {
            logs.progress(&line);
        }
    }

    // ===== Pause and resume =====

    /// Asks every worker to pause after its current item
    ///
    /// The crawl is `Pausing` until no worker holds an item, then `Paused`.
    /// Does nothing if the crawl is already pausing or paused, or cannot
    /// pause from its current state.
    pub fn request_crawl_pause(&self) {
        let frontier = self.frontier();
        let control = self.control.lock();
        let state = self.state();
        if matches!(state, CrawlState::Pausing | CrawlState::Paused)
            || !state.can_transition_to(CrawlState::Pausing)
        {
            tracing::debug!("Pause not applicable while {}", state);
            return;
        }
        if let Some(frontier) = &frontier {
            frontier.pause();
        }
        self.transition(&control, CrawlState::Pausing);
        self.announce(control, CrawlState::Pausing, status::WAITING_FOR_PAUSE);
        tracing::info!("Crawl {} pausing", self.order.crawl.name);

        if self.pause_blockers() == 0 {
            self.complete_pause();
        }
    }

    /// Called by a worker that is no longer holding an item while the
    /// crawl is pausing
    pub fn toe_paused(&self) {
        if self.state() == CrawlState::Pausing && self.pause_blockers() == 0 {
            self.complete_pause();
        }
    }

    fn complete_pause(&self) {
        let control = self.control.lock();
        if self.state() != CrawlState::Pausing {
            return;
        }
        self.transition(&control, CrawlState::Paused);
        self.stats.note_paused();
        self.announce(control, CrawlState::Paused, status::PAUSED);
        tracing::info!("Crawl {} paused", self.order.crawl.name);
    }

    /// Resumes a pausing or paused crawl
    ///
    /// Also leaves single-thread mode.
    pub fn request_crawl_resume(&self) {
        let frontier = self.frontier();
        let control = self.control.lock();
        let state = self.state();
        if !matches!(state, CrawlState::Pausing | CrawlState::Paused) {
            tracing::debug!("Resume not applicable while {}", state);
            return;
        }
        self.multi_thread_mode();
        self.transition(&control, CrawlState::Running);
        self.stats.note_resumed();
        if let Some(frontier) = &frontier {
            frontier.unpause();
        }
        self.announce(control, CrawlState::Running, status::RUNNING);
        tracing::info!("Crawl {} resumed", self.order.crawl.name);
    }

    // ===== Stop =====

    /// Ends the crawl for `reason`
    ///
    /// Workers finish their current item and exit; the crawl is `Finished`
    /// once the last one has. A stop requested while checkpointing happens
    /// when the checkpoint completes.
    pub fn request_crawl_stop(&self, reason: &str) -> Result<()> {
        if reason.trim().is_empty() {
            return Err(CrawlError::InvalidArgument(
                "stop reason must not be empty".to_string(),
            ));
        }
        let mut control = self.control.lock();
        let state = self.state();
        match state {
            CrawlState::Stopping | CrawlState::Finished => Ok(()),
            CrawlState::Checkpointing => {
                tracing::info!("Stop requested during checkpoint; deferring");
                control.pending_stop = Some(reason.to_string());
                Ok(())
            }
            s if s.can_transition_to(CrawlState::Stopping) => {
                self.begin_crawl_stop(control, reason);
                Ok(())
            }
            s => Err(CrawlError::IllegalState {
                operation: "stop",
                state: s,
            }),
        }
    }

    fn begin_crawl_stop(&self, mut control: MutexGuard<'_, Control>, reason: &str) {
        control.exit_reason = reason.to_string();
        control.pending_stop = None;
        if !self.transition(&control, CrawlState::Stopping) {
            return;
        }
        self.announce(control, CrawlState::Stopping, reason);
        tracing::info!("Crawl {} stopping: {}", self.order.crawl.name, reason);

        if let Some(frontier) = self.frontier() {
            frontier.terminate();
            frontier.unpause();
        }
        self.gate.open();

        if self.looping_toe_count() == 0 {
            self.complete_stop();
        }
    }

    /// Called by every worker as its last act
    pub(crate) fn toe_ended(&self, serial: u32) {
        if let Some(pool) = self.toe_pool() {
            pool.remove(serial);
        }
        let previous = self
            .looping
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .unwrap_or(0);
        tracing::debug!("ToeThread #{} ended; {} still looping", serial, previous.saturating_sub(1));

        match self.state() {
            CrawlState::Stopping if previous <= 1 => self.complete_stop(),
            CrawlState::Pausing => self.toe_paused(),
            _ => {}
        }
    }

    fn complete_stop(&self) {
        if self.stop_completing.swap(true, Ordering::AcqRel) {
            return;
        }
        self.log_progress();

        let taken = self.components.write().take();
        if let Some(mut c) = taken {
            if let Some(task) = c.stats_task.take() {
                task.abort();
            }
            c.chains.final_tasks();
            c.frontier.final_tasks();
            c.logs.close();

            let reason = {
                let control = self.control.lock();
                let reason = control.exit_reason.clone();
                self.transition(&control, CrawlState::Finished);
                self.announce(control, CrawlState::Finished, &reason);
                reason
            };
            tracing::info!("Crawl {} finished: {}", self.order.crawl.name, reason);
        } else {
            let control = self.control.lock();
            let reason = control.exit_reason.clone();
            self.transition(&control, CrawlState::Finished);
            self.announce(control, CrawlState::Finished, &reason);
        }
        *self.reserve.lock() = None;
    }

    /// Ends or pauses the crawl once its work is done or a limit is hit
    pub fn check_finish(&self) {
        if self.state() != CrawlState::Running {
            return;
        }
        let Some(reason) = self.finish_reason() else {
            return;
        };
        if self.order.crawl.pause_at_finish {
            tracing::info!("Crawl would finish ({}); pausing instead", reason);
            self.request_crawl_pause();
        } else if let Err(e) = self.request_crawl_stop(reason) {
            tracing::debug!("Finish not applied: {}", e);
        }
    }

    fn finish_reason(&self) -> Option<&'static str> {
        let frontier = self.frontier()?;
        let limit = |key: &str, default: u64| self.settings.u64_attribute(key, None, default);
        let crawl = &self.order.crawl;

        let max_bytes = limit("crawl.max-bytes-download", crawl.max_bytes_download);
        if max_bytes > 0 && frontier.total_bytes() >= max_bytes {
            return Some(status::FINISHED_DATA_LIMIT);
        }
        let max_docs = limit("crawl.max-document-download", crawl.max_document_download);
        if max_docs > 0 && frontier.succeeded_fetch_count() >= max_docs {
            return Some(status::FINISHED_DOCUMENT_LIMIT);
        }
        let max_time = limit("crawl.max-time-sec", crawl.max_time_sec);
        if max_time > 0 && self.stats.elapsed() >= Duration::from_secs(max_time) {
            return Some(status::FINISHED_TIME_LIMIT);
        }
        if frontier.is_empty() {
            return Some(status::FINISHED);
        }
        None
    }

    // ===== Checkpoint =====

    /// Writes a checkpoint of the paused crawl
    ///
    /// # Returns
    ///
    /// * `Ok(PathBuf)` - Directory of the completed checkpoint
    /// * `Err(CrawlError::CheckpointInProgress)` - Another checkpoint is
    ///   being written
    /// * `Err(CrawlError::IllegalState)` - The crawl is not paused
    /// * `Err(_)` - A step failed; the partial checkpoint was removed and
    ///   the crawl is paused again
    pub fn request_crawl_checkpoint(&self) -> Result<PathBuf> {
        {
            let control = self.control.lock();
            match self.state() {
                CrawlState::Checkpointing => return Err(CrawlError::CheckpointInProgress),
                CrawlState::Paused => {}
                state => {
                    return Err(CrawlError::IllegalState {
                        operation: "checkpoint",
                        state,
                    })
                }
            }
            self.transition(&control, CrawlState::Checkpointing);
        }

        let result = self.write_checkpoint();
        match &result {
            Ok(dir) => {
                self.manifest.add(ManifestKind::Report, dir, false);
                tracing::info!("Checkpoint written to {}", dir.display());
            }
            Err(e) => tracing::error!("Checkpoint failed: {}", e),
        }

        let mut control = self.control.lock();
        self.transition(&control, CrawlState::Paused);
        if let Some(reason) = control.pending_stop.take() {
            self.begin_crawl_stop(control, &reason);
        }
        result
    }

    fn write_checkpoint(&self) -> Result<PathBuf> {
        let checkpointer = Checkpointer::new(self.order.checkpoints_dir());
        let staged = checkpointer.begin(&Utc::now().format("%Y%m%d%H%M%S").to_string())?;
        tracing::info!("Writing checkpoint {}", staged.name());
        match self.fill_checkpoint(&staged) {
            Ok(()) => Ok(staged.commit()?),
            Err(e) => {
                staged.abort();
                Err(e)
            }
        }
    }

    fn fill_checkpoint(&self, staged: &InProgressCheckpoint) -> Result<()> {
        let dir = staged.path();
        for l in self.listeners.lock().iter() {
            l.crawl_checkpoint(dir)?;
        }

        let (frontier, logs) = match (self.frontier(), self.logs()) {
            (Some(f), Some(l)) => (f, l),
            _ => {
                return Err(CrawlError::IllegalState {
                    operation: "checkpoint",
                    state: self.state(),
                })
            }
        };
        let rotated = logs.rotate(&format!(".{}", staged.name()))?;
        checkpoint::write_rotation_marker(dir, &rotated)?;
        frontier.checkpoint(dir)?;

        let pages = storage::page_store_path(&self.order);
        if storage::snapshot_page_store(&pages, &dir.join(storage::PAGE_STORE_NAME))? {
            tracing::debug!("Page store snapshot added to {}", staged.name());
        }

        if let Some(source) = &self.order.source_path {
            if let Some(name) = source.file_name() {
                fs::copy(source, dir.join(name))?;
            }
        }

        self.controller_snapshot(frontier.as_ref()).write(dir)
    }

    fn controller_snapshot(&self, frontier: &dyn Frontier) -> ControllerSnapshot {
        ControllerSnapshot {
            crawl_name: self.order.crawl.name.clone(),
            order_hash: self.order.source_hash.clone(),
            exit_reason: self.exit_reason(),
            written: Utc::now().to_rfc3339(),
            started: self.started_at.lock().map(|t| t.to_rfc3339()),
            elapsed_ms: self.stats.elapsed().as_millis() as u64,
            discovered: frontier.discovered_uri_count(),
            queued: frontier.queued_uri_count(),
            finished: frontier.finished_uri_count(),
            succeeded: frontier.succeeded_fetch_count(),
            failed: frontier.failed_fetch_count(),
            disregarded: frontier.disregarded_uri_count(),
            total_bytes: frontier.total_bytes(),
            toe_count: self.toe_count() as u64,
            target_toe_count: self.toe_pool().map_or(0, |p| p.target_size()) as u64,
        }
    }

    // ===== Single-thread mode =====

    /// Lets only one worker at a time proceed
    ///
    /// Workers check for permission before taking an item and before each
    /// stage, so a worker already mid-item stops at its next stage.
    pub fn single_thread_mode(&self) {
        tracing::warn!("Entering single-thread mode");
        self.gate.close();
    }

    /// Leaves single-thread mode
    pub fn multi_thread_mode(&self) {
        if self.gate.is_closed() {
            tracing::info!("Leaving single-thread mode");
        }
        self.gate.open();
    }

    pub fn is_single_thread_mode(&self) -> bool {
        self.gate.is_closed()
    }

    /// Waits for permission to take work; false if `abandon` became true
    /// first
    pub(crate) fn acquire_continue_permission<F>(&self, abandon: F) -> bool
    where
        F: Fn() -> bool,
    {
        self.gate.acquire(abandon)
    }

    pub(crate) fn release_continue_permission(&self) {
        self.gate.release();
    }

    /// Drops the emergency memory reserve
    pub fn free_reserve_memory(&self) {
        if self.reserve.lock().take().is_some() {
            tracing::warn!("Released {} bytes of reserve memory", RESERVE_MEMORY_BYTES);
        }
    }

    pub fn has_reserve_memory(&self) -> bool {
        self.reserve.lock().is_some()
    }

    // ===== Pool =====

    pub(crate) fn note_toe_spawned(&self) {
        self.looping.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn note_toe_spawn_failed(&self) {
        self.looping
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .ok();
    }

    pub(crate) fn kill_toe(&self, toe: &ToeThread) {
        match (self.frontier(), self.logs()) {
            (Some(frontier), Some(logs)) => toe.kill(frontier.as_ref(), &logs),
            _ => tracing::warn!("Cannot kill {}: crawl is not set up", toe.name()),
        }
    }

    pub(crate) fn worker_env(&self, serial: u32, interrupted: Arc<AtomicBool>) -> Option<WorkerEnv> {
        let guard = self.components.read();
        let c = guard.as_ref()?;
        Some(WorkerEnv {
            frontier: Arc::clone(&c.frontier),
            chains: Arc::clone(&c.chains),
            ctx: c.context.for_worker(serial, interrupted),
            logs: Arc::clone(&c.logs),
            poll: Duration::from_millis(self.order.crawl.next_poll_ms.max(1)),
        })
    }

    /// Kills worker `serial`, returning its item to the frontier, and
    /// optionally replaces it
    pub fn kill_thread(&self, serial: u32, replace: bool) -> Result<bool> {
        match self.toe_pool() {
            Some(pool) => Ok(pool.kill_thread(serial, replace)?),
            None => Ok(false),
        }
    }

    /// Workers that have not exited yet
    pub fn looping_toe_count(&self) -> usize {
        self.looping.load(Ordering::Acquire)
    }

    /// Workers currently holding an item
    pub fn active_toe_count(&self) -> usize {
        self.toe_pool().map_or(0, |p| p.active_toe_count())
    }

    pub fn toe_count(&self) -> usize {
        self.toe_pool().map_or(0, |p| p.toe_count())
    }

    /// Workers holding an item or waiting for one from the frontier
    fn pause_blockers(&self) -> usize {
        self.toe_pool().map_or(0, |p| p.claiming_or_active_count())
    }

    /// Re-reads settings that may change while the crawl runs
    pub fn kick_update(&self) -> Result<()> {
        let threads = self.configured_toe_threads();
        let (pool, frontier, chains) = {
            let guard = self.components.read();
            let Some(c) = guard.as_ref() else {
                return Ok(());
            };
            (
                Arc::clone(&c.pool),
                Arc::clone(&c.frontier),
                Arc::clone(&c.chains),
            )
        };
        if !self.state().is_ending() {
            pool.set_size(threads)?;
        }
        frontier.kick_update(self.settings.as_ref());
        chains.kick_update(self.settings.as_ref());
        tracing::info!("Settings updated; toe threads target {}", threads);
        Ok(())
    }

    // ===== Reports =====

    /// Named report, one of [`REPORT_NAMES`]
    pub fn report(&self, name: &str) -> Option<String> {
        let crawl = &self.order.crawl.name;
        match name {
            "manifest" => Some(self.manifest.report()),
            "processors" => self.chains().map(|c| c.report(crawl)),
            "frontier" => self.frontier().map(|f| f.report()),
            "servers" => self.server_cache().map(|s| s.report()),
            "toe-threads" => self.toe_pool().map(|p| p.report(crawl)),
            "compact" => Some(self.toe_pool_compact_report()),
            _ => None,
        }
    }

    pub fn toe_pool_compact_report(&self) -> String {
        self.toe_pool()
            .map(|p| p.compact_report())
            .unwrap_or_else(|| "0 threads (0 active)\n".to_string())
    }

    pub fn toe_pool_single_line_report(&self) -> String {
        self.toe_pool()
            .map(|p| p.single_line_report())
            .unwrap_or_else(|| "0 threads:".to_string())
    }

    /// One line: state, toe threads and frontier counters
    pub fn single_line_report(&self) -> String {
        let snap = self.progress_snapshot();
        format!(
            "{} - {} - {} discovered, {} queued, {} downloaded, {} failed",
            self.state(),
            self.toe_pool_single_line_report(),
            snap.discovered,
            snap.queued,
            snap.downloaded,
            snap.failures
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_order;
    use crate::frontier::MemoryFrontier;
    use crate::pipeline::{Processor, ProcessorChain, ProcessorError, SharedProcessor};
    use crate::uri::fetch_status::{S_PROCESSING_THREAD_KILLED, S_SERIOUS_ERROR};
    use crate::uri::CrawlUri;
    use std::sync::atomic::AtomicUsize;

    fn order_in(dir: &Path, threads: usize) -> CrawlOrder {
        let text = format!(
            r#"
[crawl]
name = "unit"
next-poll-ms = 10

[disk]
path = "{path}"

[user-agent]
crawler-name = "UnitBot"
crawler-version = "1.0"
contact-url = "https://example.com/bot"
contact-email = "bot@example.com"

[scope]
seeds = ["http://example.com/"]

[[chain]]
name = "post"

[[chain.processor]]
kind = "noop"
"#,
            path = dir.display()
        );
        let mut order = parse_order(&text).unwrap();
        order.crawl.max_toe_threads = threads;
        order
    }

    struct Noop;

    impl crate::pipeline::Processor for Noop {
        fn name(&self) -> &str {
            "noop"
        }

        fn inner_process(
            &self,
            _ctx: &ProcessorContext,
            _curi: &mut crate::uri::CrawlUri,
        ) -> std::result::Result<(), crate::pipeline::ProcessorError> {
            Ok(())
        }
    }

    fn empty_chains() -> ProcessorChainList {
        ProcessorChainList::new(vec![ProcessorChain::new(
            "post",
            vec![(Arc::new(Noop), crate::pipeline::DecideRules::accept_all())],
        )])
        .unwrap()
    }

    #[derive(Default)]
    struct Counting {
        events: Mutex<Vec<String>>,
        checkpoints: AtomicUsize,
    }

    impl CrawlStatusListener for Counting {
        fn crawl_started(&self, m: &str) {
            self.events.lock().push(format!("started:{}", m));
        }
        fn crawl_pausing(&self, _m: &str) {
            self.events.lock().push("pausing".to_string());
        }
        fn crawl_paused(&self, _m: &str) {
            self.events.lock().push("paused".to_string());
        }
        fn crawl_resuming(&self, _m: &str) {
            self.events.lock().push("running".to_string());
        }
        fn crawl_ending(&self, m: &str) {
            self.events.lock().push(format!("ending:{}", m));
        }
        fn crawl_ended(&self, m: &str) {
            self.events.lock().push(format!("ended:{}", m));
        }
        fn crawl_checkpoint(&self, dir: &Path) -> io::Result<()> {
            self.checkpoints.fetch_add(1, Ordering::SeqCst);
            fs::write(dir.join("listener.txt"), "ok")
        }
    }

    fn controller(dir: &Path, threads: usize) -> Arc<CrawlController> {
        let order = order_in(dir, threads);
        let frontier: Arc<dyn Frontier> = Arc::new(MemoryFrontier::new(&order));
        let controller = CrawlController::from_order(order).unwrap();
        controller.initialize(frontier, empty_chains()).unwrap();
        controller
    }

    #[test]
    fn test_initialize_prepares_job_directories() {
        let dir = tempfile::tempdir().unwrap();
        let c = controller(dir.path(), 0);
        assert_eq!(c.state(), CrawlState::Preparing);
        assert!(dir.path().join("logs").join("crawl.log").exists());
        assert!(dir.path().join("checkpoints").is_dir());
        assert!(c.has_reserve_memory());
        assert_eq!(c.frontier().unwrap().queued_uri_count(), 1);
        assert!(c.manifest().report().contains("crawl.log"));
    }

    #[test]
    fn test_initialize_twice_is_illegal() {
        let dir = tempfile::tempdir().unwrap();
        let c = controller(dir.path(), 0);
        let order = order_in(dir.path(), 0);
        let again = c.initialize(Arc::new(MemoryFrontier::new(&order)), empty_chains());
        assert!(matches!(
            again,
            Err(CrawlError::IllegalState {
                operation: "initialize",
                ..
            })
        ));
    }

    #[test]
    fn test_failed_recovery_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut order = order_in(dir.path(), 0);
        order.disk.recover_checkpoint = Some("cp00009-20240101000000".to_string());
        let frontier: Arc<dyn Frontier> = Arc::new(MemoryFrontier::new(&order));
        let c = CrawlController::from_order(order).unwrap();
        let err = c.initialize(frontier, empty_chains()).unwrap_err();
        assert!(matches!(
            err,
            CrawlError::Initialization {
                step: "recovering checkpoint",
                ..
            }
        ));
        assert_eq!(c.state(), CrawlState::Finished);
        assert!(c.frontier().is_none());
    }

    #[test]
    fn test_pause_with_no_workers_completes_at_once() {
        let dir = tempfile::tempdir().unwrap();
        let c = controller(dir.path(), 0);
        let listener = Arc::new(Counting::default());
        c.add_listener(listener.clone());

        c.request_crawl_start().unwrap();
        c.request_crawl_pause();
        assert_eq!(c.state(), CrawlState::Paused);
        c.request_crawl_pause();

        c.request_crawl_resume();
        assert_eq!(c.state(), CrawlState::Running);
        assert_eq!(
            *listener.events.lock(),
            vec![
                format!("started:{}", status::PENDING),
                "running".to_string(),
                "pausing".to_string(),
                "paused".to_string(),
                "running".to_string(),
            ]
        );
        c.request_crawl_stop(status::ABORTED).unwrap();
    }

    #[test]
    fn test_stop_with_no_workers_finishes_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let c = controller(dir.path(), 0);
        let listener = Arc::new(Counting::default());
        c.add_listener(listener.clone());
        c.request_crawl_start().unwrap();

        assert!(matches!(
            c.request_crawl_stop("  "),
            Err(CrawlError::InvalidArgument(_))
        ));
        c.request_crawl_stop(status::ABORTED).unwrap();
        assert_eq!(c.state(), CrawlState::Finished);
        assert_eq!(c.exit_reason(), status::ABORTED);
        assert!(c.frontier().is_none());
        assert!(!c.has_reserve_memory());

        let events = listener.events.lock();
        assert_eq!(events.last().unwrap(), &format!("ended:{}", status::ABORTED));
        assert_eq!(
            events.iter().filter(|e| e.starts_with("ended:")).count(),
            1
        );
    }

    #[test]
    fn test_checkpoint_requires_pause() {
        let dir = tempfile::tempdir().unwrap();
        let c = controller(dir.path(), 0);
        c.request_crawl_start().unwrap();
        assert!(matches!(
            c.request_crawl_checkpoint(),
            Err(CrawlError::IllegalState {
                operation: "checkpoint",
                state: CrawlState::Running
            })
        ));
        assert_eq!(c.state(), CrawlState::Running);
        c.request_crawl_stop(status::ABORTED).unwrap();
    }

    #[test]
    fn test_checkpoint_writes_every_part() {
        let dir = tempfile::tempdir().unwrap();
        let c = controller(dir.path(), 0);
        let listener = Arc::new(Counting::default());
        c.add_listener(listener.clone());
        c.request_crawl_start().unwrap();
        c.request_crawl_pause();

        let cp = c.request_crawl_checkpoint().unwrap();
        assert_eq!(c.state(), CrawlState::Paused);
        let name = cp.file_name().unwrap().to_str().unwrap().to_string();
        assert!(name.starts_with("cp00001-"));
        assert!(cp.join("listener.txt").exists());
        assert!(cp.join(crate::frontier::FRONTIER_SNAPSHOT_NAME).exists());
        assert!(cp.join(checkpoint::ROTATION_MARKER_NAME).exists());
        let snapshot = ControllerSnapshot::read(&cp).unwrap();
        assert_eq!(snapshot.crawl_name, "unit");
        assert_eq!(snapshot.queued, 1);
        assert!(dir
            .path()
            .join("logs")
            .join(format!("crawl.log.{}", name))
            .exists());

        let second = c.request_crawl_checkpoint().unwrap();
        assert!(second
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("cp00002-"));
        assert_eq!(listener.checkpoints.load(Ordering::SeqCst), 2);
        c.request_crawl_stop(status::ABORTED).unwrap();
    }

    #[test]
    fn test_failed_checkpoint_is_removed_and_crawl_stays_paused() {
        struct Failing;
        impl CrawlStatusListener for Failing {
            fn crawl_checkpoint(&self, _dir: &Path) -> io::Result<()> {
                Err(io::Error::new(io::ErrorKind::Other, "listener refused"))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let c = controller(dir.path(), 0);
        c.add_listener(Arc::new(Failing));
        c.request_crawl_start().unwrap();
        c.request_crawl_pause();

        assert!(c.request_crawl_checkpoint().is_err());
        assert_eq!(c.state(), CrawlState::Paused);
        let leftovers: Vec<_> = fs::read_dir(dir.path().join("checkpoints"))
            .unwrap()
            .collect();
        assert!(leftovers.is_empty());
        c.request_crawl_stop(status::ABORTED).unwrap();
    }

    #[test]
    fn test_wait_for_state_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let c = controller(dir.path(), 0);
        let seen = c.wait_for_state(|s| s == CrawlState::Finished, Some(Duration::from_millis(20)));
        assert_eq!(seen, CrawlState::Preparing);
    }

    #[test]
    fn test_single_thread_mode_and_reserve() {
        let dir = tempfile::tempdir().unwrap();
        let c = controller(dir.path(), 0);
        c.single_thread_mode();
        assert!(c.is_single_thread_mode());
        c.free_reserve_memory();
        assert!(!c.has_reserve_memory());
        c.multi_thread_mode();
        assert!(!c.is_single_thread_mode());
    }

    #[test]
    fn test_reports() {
        let dir = tempfile::tempdir().unwrap();
        let c = controller(dir.path(), 0);
        for name in REPORT_NAMES {
            assert!(c.report(name).is_some(), "missing report {}", name);
        }
        assert!(c.report("bogus").is_none());
        assert!(c
            .report("processors")
            .unwrap()
            .contains("Job being crawled:    unit"));
        assert!(c.single_line_report().starts_with("PREPARING - 0 threads:"));
    }

    // ===== Live workers =====

    type Action =
        Box<dyn Fn(&ProcessorContext, &mut CrawlUri) -> std::result::Result<(), ProcessorError> + Send + Sync>;

    /// Stage that records `<name> <path>` for every item, then runs `action`
    struct Scripted {
        name: String,
        trace: Arc<Mutex<Vec<String>>>,
        action: Action,
    }

    impl Processor for Scripted {
        fn name(&self) -> &str {
            &self.name
        }

        fn inner_process(
            &self,
            ctx: &ProcessorContext,
            curi: &mut CrawlUri,
        ) -> std::result::Result<(), ProcessorError> {
            self.trace
                .lock()
                .push(format!("{} {}", self.name, curi.uri().path()));
            (self.action)(ctx, curi)
        }
    }

    fn scripted<F>(name: &str, trace: &Arc<Mutex<Vec<String>>>, action: F) -> SharedProcessor
    where
        F: Fn(&ProcessorContext, &mut CrawlUri) -> std::result::Result<(), ProcessorError>
            + Send
            + Sync
            + 'static,
    {
        Arc::new(Scripted {
            name: name.to_string(),
            trace: Arc::clone(trace),
            action: Box::new(action),
        })
    }

    fn pass(name: &str, trace: &Arc<Mutex<Vec<String>>>) -> SharedProcessor {
        scripted(name, trace, |_, _| Ok(()))
    }

    fn chain(name: &str, stages: Vec<SharedProcessor>) -> ProcessorChain {
        ProcessorChain::new(
            name,
            stages
                .into_iter()
                .map(|p| (p, crate::pipeline::DecideRules::accept_all()))
                .collect(),
        )
    }

    fn live_order(dir: &Path, threads: usize, paths: &[&str]) -> CrawlOrder {
        let mut order = order_in(dir, threads);
        order.crawl.max_retries = 0;
        order.scope.seeds = paths
            .iter()
            .map(|p| format!("http://example.com{}", p))
            .collect();
        order
    }

    fn live(
        order: CrawlOrder,
        frontier: Arc<dyn Frontier>,
        chains: Vec<ProcessorChain>,
    ) -> Arc<CrawlController> {
        let controller = CrawlController::from_order(order).unwrap();
        controller
            .initialize(frontier, ProcessorChainList::new(chains).unwrap())
            .unwrap();
        controller
    }

    fn eventually<F: Fn() -> bool>(check: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn wait_finished(c: &CrawlController) {
        let state = c.wait_for_state(|s| s == CrawlState::Finished, Some(Duration::from_secs(10)));
        assert_eq!(state, CrawlState::Finished);
    }

    fn traced(trace: &Arc<Mutex<Vec<String>>>, path: &str) -> Vec<String> {
        trace
            .lock()
            .iter()
            .filter(|line| line.ends_with(&format!(" {}", path)))
            .map(|line| line.split(' ').next().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn test_workers_visit_every_stage_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let order = live_order(dir.path(), 2, &["/", "/other"]);
        let frontier: Arc<dyn Frontier> = Arc::new(MemoryFrontier::new(&order));
        let trace = Arc::new(Mutex::new(Vec::new()));
        let c = live(
            order,
            frontier,
            vec![
                chain("fetch", vec![pass("a", &trace), pass("b", &trace)]),
                chain("extract", vec![pass("c", &trace)]),
                chain("post", vec![pass("d", &trace)]),
            ],
        );
        c.request_crawl_start().unwrap();
        wait_finished(&c);

        assert_eq!(c.exit_reason(), status::FINISHED);
        for path in ["/", "/other"] {
            assert_eq!(traced(&trace, path), vec!["a", "b", "c", "d"]);
        }
    }

    #[test]
    fn test_stage_skips_redirect_the_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let order = live_order(dir.path(), 1, &["/plain", "/to-post", "/to-stage"]);
        let frontier: Arc<dyn Frontier> = Arc::new(MemoryFrontier::new(&order));
        let trace = Arc::new(Mutex::new(Vec::new()));
        let router = scripted("a", &trace, |_, curi| {
            match curi.uri().path() {
                "/to-post" => curi.skip_to_chain(2),
                "/to-stage" => curi.skip_to_processor(1, 1),
                _ => {}
            }
            Ok(())
        });
        let c = live(
            order,
            frontier,
            vec![
                chain("fetch", vec![router, pass("b", &trace)]),
                chain("extract", vec![pass("c", &trace), pass("d", &trace)]),
                chain("post", vec![pass("e", &trace)]),
            ],
        );
        c.request_crawl_start().unwrap();
        wait_finished(&c);

        assert_eq!(traced(&trace, "/plain"), vec!["a", "b", "c", "d", "e"]);
        assert_eq!(traced(&trace, "/to-post"), vec!["a", "e"]);
        assert_eq!(traced(&trace, "/to-stage"), vec!["a", "d", "e"]);
    }

    #[test]
    fn test_single_thread_mode_holds_worker_before_next_stage() {
        let dir = tempfile::tempdir().unwrap();
        let order = live_order(dir.path(), 1, &["/"]);
        let frontier: Arc<dyn Frontier> = Arc::new(MemoryFrontier::new(&order));
        let trace = Arc::new(Mutex::new(Vec::new()));
        let slow = scripted("slow", &trace, |_, _| {
            std::thread::sleep(Duration::from_millis(300));
            Ok(())
        });
        let c = live(
            order,
            frontier,
            vec![chain("fetch", vec![slow, pass("second", &trace)])],
        );
        c.request_crawl_start().unwrap();
        assert!(eventually(|| !traced(&trace, "/").is_empty()));

        c.single_thread_mode();
        std::thread::sleep(Duration::from_millis(700));
        assert_eq!(traced(&trace, "/"), vec!["slow"]);
        assert_eq!(c.active_toe_count(), 1);

        c.multi_thread_mode();
        wait_finished(&c);
        assert_eq!(traced(&trace, "/"), vec!["slow", "second"]);
    }

    /// Memory frontier that lingers between taking an item off its queue
    /// and handing it to the worker
    struct SlowHandoff {
        inner: MemoryFrontier,
        delay: Duration,
        handing_off: AtomicBool,
    }

    impl Frontier for SlowHandoff {
        fn initialize(&self, logs_dir: &Path) -> std::result::Result<(), crate::frontier::FrontierError> {
            self.inner.initialize(logs_dir)
        }
        fn start(&self) {
            self.inner.start()
        }
        fn next(
            &self,
            timeout: Duration,
        ) -> std::result::Result<Option<CrawlUri>, crate::frontier::FrontierError> {
            let item = self.inner.next(timeout)?;
            if item.is_some() {
                self.handing_off.store(true, Ordering::SeqCst);
                std::thread::sleep(self.delay);
            }
            Ok(item)
        }
        fn finished(&self, curi: CrawlUri) -> std::result::Result<(), crate::frontier::FrontierError> {
            self.inner.finished(curi)
        }
        fn schedule(
            &self,
            candidate: crate::uri::CandidateUri,
        ) -> std::result::Result<bool, crate::frontier::FrontierError> {
            self.inner.schedule(candidate)
        }
        fn pause(&self) {
            self.inner.pause()
        }
        fn unpause(&self) {
            self.inner.unpause()
        }
        fn terminate(&self) {
            self.inner.terminate()
        }
        fn is_empty(&self) -> bool {
            self.inner.is_empty()
        }
        fn queued_uri_count(&self) -> u64 {
            self.inner.queued_uri_count()
        }
        fn finished_uri_count(&self) -> u64 {
            self.inner.finished_uri_count()
        }
        fn succeeded_fetch_count(&self) -> u64 {
            self.inner.succeeded_fetch_count()
        }
        fn failed_fetch_count(&self) -> u64 {
            self.inner.failed_fetch_count()
        }
        fn disregarded_uri_count(&self) -> u64 {
            self.inner.disregarded_uri_count()
        }
        fn total_bytes(&self) -> u64 {
            self.inner.total_bytes()
        }
        fn discovered_uri_count(&self) -> u64 {
            self.inner.discovered_uri_count()
        }
        fn load_seeds(&self) -> std::result::Result<usize, crate::frontier::FrontierError> {
            self.inner.load_seeds()
        }
        fn checkpoint(&self, dir: &Path) -> std::result::Result<(), crate::frontier::FrontierError> {
            self.inner.checkpoint(dir)
        }
        fn recover(&self, dir: &Path) -> std::result::Result<(), crate::frontier::FrontierError> {
            self.inner.recover(dir)
        }
        fn report(&self) -> String {
            self.inner.report()
        }
    }

    #[test]
    fn test_pause_waits_for_item_being_handed_out() {
        let dir = tempfile::tempdir().unwrap();
        let order = live_order(dir.path(), 1, &["/"]);
        let frontier = Arc::new(SlowHandoff {
            inner: MemoryFrontier::new(&order),
            delay: Duration::from_millis(300),
            handing_off: AtomicBool::new(false),
        });
        let trace = Arc::new(Mutex::new(Vec::new()));
        let c = live(
            order,
            frontier.clone(),
            vec![chain("fetch", vec![pass("only", &trace)])],
        );
        c.request_crawl_start().unwrap();
        assert!(eventually(|| frontier.handing_off.load(Ordering::SeqCst)));

        c.request_crawl_pause();
        assert_eq!(c.state(), CrawlState::Pausing);
        let state = c.wait_for_state(|s| s == CrawlState::Paused, Some(Duration::from_secs(10)));
        assert_eq!(state, CrawlState::Paused);
        assert_eq!(c.active_toe_count(), 0);
        assert_eq!(frontier.finished_uri_count(), 1);
        assert_eq!(traced(&trace, "/"), vec!["only"]);

        c.request_crawl_stop(status::ABORTED).unwrap();
        wait_finished(&c);
    }

    #[test]
    fn test_kill_thread_returns_the_item_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let order = live_order(dir.path(), 1, &["/"]);
        let memory = Arc::new(MemoryFrontier::new(&order));
        let trace = Arc::new(Mutex::new(Vec::new()));
        let release = Arc::new(AtomicBool::new(false));
        let gate = Arc::clone(&release);
        let blocker = scripted("blocker", &trace, move |_, _| {
            let deadline = Instant::now() + Duration::from_secs(10);
            while !gate.load(Ordering::SeqCst) && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(())
        });
        let c = live(
            order,
            memory.clone(),
            vec![
                chain("fetch", vec![blocker]),
                chain("post", vec![pass("after", &trace)]),
            ],
        );
        c.request_crawl_start().unwrap();
        assert!(eventually(|| c.active_toe_count() == 1));
        let serial = c.toe_pool().unwrap().serials()[0];

        assert!(c.kill_thread(serial, true).unwrap());
        assert_eq!(memory.finished_uri_count(), 1);
        assert_eq!(memory.failed_fetch_count(), 1);
        assert_eq!(memory.in_flight_count(), 0);
        assert!(!c.kill_thread(serial, false).unwrap());

        release.store(true, Ordering::SeqCst);
        wait_finished(&c);
        assert_eq!(memory.finished_uri_count(), 1);
        assert_eq!(traced(&trace, "/"), vec!["blocker"]);

        let log = fs::read_to_string(dir.path().join("logs").join("crawl.log")).unwrap();
        assert_eq!(log.lines().count(), 1);
        assert!(log.contains(&S_PROCESSING_THREAD_KILLED.to_string()));
        assert!(log.contains("killed"));
    }

    #[test]
    fn test_pool_converges_to_new_size() {
        let dir = tempfile::tempdir().unwrap();
        let c = controller(dir.path(), 2);
        let pool = c.toe_pool().unwrap();
        assert_eq!(pool.toe_count(), 2);

        pool.set_size(5).unwrap();
        assert_eq!(pool.toe_count(), 5);
        assert!(eventually(|| c.looping_toe_count() == 5));
        assert_eq!(pool.serials(), vec![1, 2, 3, 4, 5]);

        pool.set_size(1).unwrap();
        assert!(eventually(|| pool.toe_count() == 1 && c.looping_toe_count() == 1));
        assert_eq!(pool.serials(), vec![1]);

        c.request_crawl_stop(status::ABORTED).unwrap();
        wait_finished(&c);
        assert_eq!(c.looping_toe_count(), 0);
    }

    #[test]
    fn test_resource_exhaustion_pauses_in_single_thread_mode() {
        let dir = tempfile::tempdir().unwrap();
        let order = live_order(dir.path(), 2, &["/"]);
        let frontier: Arc<dyn Frontier> = Arc::new(MemoryFrontier::new(&order));
        let trace = Arc::new(Mutex::new(Vec::new()));
        let hungry = scripted("hungry", &trace, |_, curi| {
            curi.set_fetch_status(200);
            Err(ProcessorError::ResourceExhausted("no buffer".to_string()))
        });
        let c = live(
            order,
            frontier,
            vec![
                chain("fetch", vec![hungry]),
                chain("post", vec![pass("after", &trace)]),
            ],
        );
        assert!(c.has_reserve_memory());
        c.request_crawl_start().unwrap();

        let state = c.wait_for_state(|s| s == CrawlState::Paused, Some(Duration::from_secs(10)));
        assert_eq!(state, CrawlState::Paused);
        assert!(c.is_single_thread_mode());
        assert!(!c.has_reserve_memory());
        assert_eq!(traced(&trace, "/"), vec!["hungry"]);

        c.request_crawl_stop(status::ABORTED).unwrap();
        wait_finished(&c);
        let log = fs::read_to_string(dir.path().join("logs").join("crawl.log")).unwrap();
        let line = log.lines().next().unwrap();
        assert!(line.contains(&S_SERIOUS_ERROR.to_string()));
        assert!(line.contains("err=ResourceExhausted"));
        assert!(line.contains("os200"));
        let errors =
            fs::read_to_string(dir.path().join("logs").join("runtime-errors.log")).unwrap();
        assert!(errors.contains("Serious error: Resources exhausted: no buffer"));
    }
}
