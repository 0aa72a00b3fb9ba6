//! Worker threads
//!
//! Each `ToeThread` is one OS thread repeatedly taking a work item from the
//! frontier, running it through every chain of the pipeline, and handing it
//! back. The shared record kept here is what the pool, the controller and
//! the reports see of the thread.
//!
//! The worker's current-item slot holds a body-less copy of the item it is
//! processing, refreshed at every stage boundary. Whoever takes the copy
//! out of the slot (the worker on its return path, or a killer) is the one
//! that returns the item to the frontier, so every item goes back exactly
//! once.
//!
//! For pausing, a worker counts from the moment it asks the frontier for
//! work until it has handed the item back, so a pause cannot complete
//! while an item is on its way to a worker.

use crate::crawler::controller::CrawlController;
use crate::crawler::logs::CrawlLogs;
use crate::crawler::report::format_elapsed;
use crate::frontier::{Frontier, FrontierError};
use crate::pipeline::{Processor, ProcessorChainList, ProcessorContext, ProcessorError, Stage};
use crate::state::CrawlState;
use crate::uri::fetch_status::{S_PROCESSING_THREAD_KILLED, S_RUNTIME_EXCEPTION, S_SERIOUS_ERROR};
use crate::uri::CrawlUri;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Coarse position of a worker in its loop, for reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Step {
    Nascent,
    AboutToGetUri,
    AboutToBeginChain,
    AboutToBeginProcessor,
    DoneWithProcessors,
    HandlingRuntimeException,
    AboutToReturnUri,
    FinishingProcess,
    Finished,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Nascent => "NASCENT",
            Step::AboutToGetUri => "ABOUT_TO_GET_URI",
            Step::AboutToBeginChain => "ABOUT_TO_BEGIN_CHAIN",
            Step::AboutToBeginProcessor => "ABOUT_TO_BEGIN_PROCESSOR",
            Step::DoneWithProcessors => "DONE_WITH_PROCESSORS",
            Step::HandlingRuntimeException => "HANDLING_RUNTIME_EXCEPTION",
            Step::AboutToReturnUri => "ABOUT_TO_RETURN_URI",
            Step::FinishingProcess => "FINISHING_PROCESS",
            Step::Finished => "FINISHED",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct Activity {
    step: Step,
    step_since: Instant,
    processor: Option<String>,
    last_start: Option<(Instant, DateTime<Utc>)>,
    last_finish: Option<(Instant, DateTime<Utc>)>,
    items_processed: u64,
}

/// What the crawl's collaborators look like from one worker
pub(crate) struct WorkerEnv {
    pub frontier: Arc<dyn Frontier>,
    pub chains: Arc<ProcessorChainList>,
    pub ctx: ProcessorContext,
    pub logs: Arc<CrawlLogs>,
    pub poll: Duration,
}

/// Shared record of one worker thread
#[derive(Debug)]
pub struct ToeThread {
    serial: u32,
    name: String,
    current: Mutex<Option<CrawlUri>>,
    /// Set while waiting in `Frontier::next`
    claiming: AtomicBool,
    activity: Mutex<Activity>,
    retiring: AtomicBool,
    interrupted: Arc<AtomicBool>,
}

impl ToeThread {
    pub(crate) fn new(serial: u32) -> Self {
        Self {
            serial,
            name: format!("ToeThread #{}", serial),
            current: Mutex::new(None),
            claiming: AtomicBool::new(false),
            activity: Mutex::new(Activity {
                step: Step::Nascent,
                step_since: Instant::now(),
                processor: None,
                last_start: None,
                last_finish: None,
                items_processed: 0,
            }),
            retiring: AtomicBool::new(false),
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn step(&self) -> Step {
        self.activity.lock().step
    }

    /// Name of the stage being run, if any
    pub fn current_processor(&self) -> Option<String> {
        self.activity.lock().processor.clone()
    }

    /// Copy of the item being processed, without its body
    pub fn current_uri(&self) -> Option<CrawlUri> {
        self.current.lock().clone()
    }

    pub fn items_processed(&self) -> u64 {
        self.activity.lock().items_processed
    }

    /// True while holding an item and not interrupted
    pub fn is_active(&self) -> bool {
        !self.is_interrupted() && self.current.lock().is_some()
    }

    /// True while asking the frontier for an item or holding one, and not
    /// interrupted; a pause waits for this to clear
    pub fn is_claiming_or_active(&self) -> bool {
        if self.is_interrupted() {
            return false;
        }
        self.claiming.load(Ordering::SeqCst) || self.current.lock().is_some()
    }

    fn set_claiming(&self, claiming: bool) {
        self.claiming.store(claiming, Ordering::SeqCst);
    }

    /// Replaces the slot's copy with `curi`'s current state, unless a
    /// killer has already taken it
    fn refresh(&self, curi: &CrawlUri) {
        let mut current = self.current.lock();
        if current.is_some() {
            *current = Some(curi.snapshot());
        }
    }

    pub fn is_retiring(&self) -> bool {
        self.retiring.load(Ordering::Acquire)
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    /// Asks the worker to exit after its current item
    pub fn retire(&self) {
        self.retiring.store(true, Ordering::Release);
    }

    fn should_exit(&self) -> bool {
        self.is_interrupted() || self.is_retiring()
    }

    fn set_step(&self, step: Step, processor: Option<&str>) {
        let mut a = self.activity.lock();
        a.step = step;
        a.step_since = Instant::now();
        a.processor = processor.map(str::to_string);
    }

    /// Interrupts the worker and returns its item on its behalf
    ///
    /// The item, if the worker still holds one, goes back to the frontier
    /// with the killed status. The worker notices the interrupt at its next
    /// check and exits without returning the item a second time.
    pub(crate) fn kill(&self, frontier: &dyn Frontier, logs: &CrawlLogs) {
        self.interrupted.store(true, Ordering::Release);
        let taken = self.current.lock().take();
        match taken {
            Some(curi) => {
                tracing::warn!("Killing {} while processing {}", self.name, curi);
                self.return_killed(curi, frontier, logs);
            }
            None => tracing::warn!("Killing {} (no item in hand)", self.name),
        }
    }

    fn return_killed(&self, mut curi: CrawlUri, frontier: &dyn Frontier, logs: &CrawlLogs) {
        curi.set_fetch_status(S_PROCESSING_THREAD_KILLED);
        curi.add_annotation("killed");
        logs.crawled(&curi);
        if let Err(e) = frontier.finished(curi) {
            tracing::error!("{} failed to return killed item: {}", self.name, e);
        }
    }

    // ===== Reports =====

    /// One line for the pool's compact report
    pub fn compact_report(&self) -> String {
        let now = Instant::now();
        let current = self.current.lock().clone();
        let a = self.activity.lock();
        let mut out = format!("#{} ", self.serial);
        match current {
            Some(curi) => {
                out.push_str(&format!(
                    "{} {} ({}) ACTIVE for {}",
                    a.processor.as_deref().unwrap_or("-"),
                    curi.uri(),
                    curi.fetch_attempts(),
                    since(a.last_start.map(|(i, _)| i), now)
                ));
            }
            None => {
                out.push_str(&format!(
                    " [no CrawlURI] WAITING for {}",
                    since(a.last_finish.map(|(i, _)| i), now)
                ));
            }
        }
        out.push_str(&format!(
            " at {} for {}",
            a.step,
            format_elapsed(now.duration_since(a.step_since))
        ));
        out
    }

    /// Multi-line report of this worker
    pub fn report(&self) -> String {
        let now = Instant::now();
        let current = self.current.lock().clone();
        let a = self.activity.lock();
        let mut out = format!("[{}\n", self.name);
        match current {
            Some(curi) => {
                out.push_str(&format!(
                    " {} {} attempts\n",
                    curi.single_line_report(),
                    curi.fetch_attempts()
                ));
                out.push_str(&format!(
                    "    in processor: {}\n",
                    a.processor.as_deref().unwrap_or("-")
                ));
                if let Some((_, at)) = a.last_start {
                    out.push_str(&format!("    ACTIVE since {}\n", at.to_rfc3339()));
                }
            }
            None => {
                out.push_str(" -no CrawlURI- \n");
                if let Some((_, at)) = a.last_finish {
                    out.push_str(&format!("    WAITING since {}\n", at.to_rfc3339()));
                }
            }
        }
        out.push_str(&format!(
            "    step: {} for {}\n",
            a.step,
            format_elapsed(now.duration_since(a.step_since))
        ));
        out.push_str(&format!("    processed: {}\n", a.items_processed));
        out.push_str("]\n");
        out
    }
}

fn since(at: Option<Instant>, now: Instant) -> String {
    match at {
        Some(at) => format_elapsed(now.duration_since(at)),
        None => "-".to_string(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// Body of a worker thread
///
/// Always ends by telling the controller the worker has exited.
pub(crate) fn run(toe: Arc<ToeThread>, controller: Arc<CrawlController>) {
    tracing::debug!("{} started", toe.name);
    if let Some(env) = controller.worker_env(toe.serial, Arc::clone(&toe.interrupted)) {
        let mut locals: HashMap<String, Box<dyn Processor>> = HashMap::new();
        Worker {
            toe: &toe,
            controller: &controller,
            env: &env,
        }
        .work_loop(&mut locals);
        drop(locals);
    }

    toe.set_step(Step::Finished, None);
    toe.set_claiming(false);
    toe.current.lock().take();
    controller.release_continue_permission();
    tracing::debug!("{} finished", toe.name);
    controller.toe_ended(toe.serial);
}

struct Worker<'a> {
    toe: &'a ToeThread,
    controller: &'a CrawlController,
    env: &'a WorkerEnv,
}

impl Worker<'_> {
    fn work_loop(&self, locals: &mut HashMap<String, Box<dyn Processor>>) {
        loop {
            if self.toe.should_exit() {
                break;
            }
            self.controller.check_finish();

            self.toe.set_step(Step::AboutToGetUri, None);
            if !self
                .controller
                .acquire_continue_permission(|| self.toe.should_exit())
            {
                break;
            }

            self.toe.set_claiming(true);
            if self.controller.state().holds_workers() {
                self.toe.set_claiming(false);
                self.controller.release_continue_permission();
                self.controller.toe_paused();
                self.controller
                    .wait_for_state(|s| !s.holds_workers(), Some(self.env.poll));
                continue;
            }

            let curi = match self.env.frontier.next(self.env.poll) {
                Ok(Some(curi)) => curi,
                Ok(None) => {
                    self.toe.set_claiming(false);
                    self.controller.release_continue_permission();
                    if self.controller.state() == CrawlState::Pausing {
                        self.controller.toe_paused();
                    }
                    continue;
                }
                Err(FrontierError::Ended) => {
                    self.toe.set_claiming(false);
                    self.controller.release_continue_permission();
                    break;
                }
                Err(e) => {
                    tracing::error!("{} cannot get work: {}", self.toe.name, e);
                    self.toe.set_claiming(false);
                    self.controller.release_continue_permission();
                    break;
                }
            };

            self.process(curi, locals);

            self.toe.set_step(Step::FinishingProcess, None);
            if self.controller.state() == CrawlState::Pausing {
                self.controller.toe_paused();
            }
            self.controller.release_continue_permission();
        }
    }

    fn process(&self, mut curi: CrawlUri, locals: &mut HashMap<String, Box<dyn Processor>>) {
        curi.set_thread_number(self.toe.serial);
        *self.toe.current.lock() = Some(curi.snapshot());
        self.toe.set_claiming(false);
        {
            let mut a = self.toe.activity.lock();
            a.last_start = Some((Instant::now(), Utc::now()));
        }

        if self.toe.is_interrupted() {
            self.return_item(curi, true);
            return;
        }

        curi.begin_traversal();
        match self.traverse(&mut curi, locals) {
            Ok(()) => {}
            Err(ProcessorError::Interrupted) => {
                self.return_item(curi, true);
                return;
            }
            Err(e) if e.is_serious() => self.serious_error(&mut curi, &e),
            Err(e) => self.recoverable_error(&mut curi, &e),
        }

        self.toe.set_step(Step::DoneWithProcessors, None);
        self.return_item(curi, false);
    }

    /// Runs `curi` through the chains, following its next-chain and
    /// next-processor pointers
    fn traverse(
        &self,
        curi: &mut CrawlUri,
        locals: &mut HashMap<String, Box<dyn Processor>>,
    ) -> Result<(), ProcessorError> {
        while let Some(chain_index) = curi.next_chain() {
            let Some(chain) = self.env.chains.chain(chain_index) else {
                break;
            };
            self.toe.set_step(Step::AboutToBeginChain, None);
            curi.begin_chain(chain_index, chain.default_next_chain());

            while let Some(stage_index) = curi.next_processor() {
                let Some(stage) = chain.stage(stage_index) else {
                    break;
                };
                self.toe
                    .set_step(Step::AboutToBeginProcessor, Some(stage.name()));
                self.env.ctx.check_for_interrupt()?;
                if !self
                    .controller
                    .acquire_continue_permission(|| self.toe.is_interrupted())
                {
                    return Err(ProcessorError::Interrupted);
                }
                curi.set_current_processor(stage_index);
                self.toe.refresh(curi);

                let instance = self.instance_for(stage, locals)?;
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    stage.process(instance, &self.env.ctx, curi)
                }));
                match outcome {
                    Ok(result) => result?,
                    Err(payload) => return Err(ProcessorError::Panic(panic_message(&*payload))),
                }
                self.toe.refresh(curi);
            }
        }
        Ok(())
    }

    /// The processor instance this worker uses for `stage`
    fn instance_for<'s>(
        &self,
        stage: &'s Stage,
        locals: &'s mut HashMap<String, Box<dyn Processor>>,
    ) -> Result<&'s dyn Processor, ProcessorError> {
        let shared: &'s dyn Processor = &**stage.processor();
        if !shared.instance_per_worker() {
            return Ok(shared);
        }
        let instance = match locals.entry(stage.name().to_string()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                tracing::debug!("{} creating its own {}", self.toe.name, stage.name());
                e.insert(shared.create_worker_local_instance(self.toe.serial)?)
            }
        };
        Ok(&**instance)
    }

    fn recoverable_error(&self, curi: &mut CrawlUri, err: &ProcessorError) {
        let processor = self.toe.current_processor().unwrap_or_default();
        self.toe
            .set_step(Step::HandlingRuntimeException, Some(&processor));
        curi.set_fetch_status(S_RUNTIME_EXCEPTION);
        curi.add_annotation(format!("err={}", err.kind_name()));
        curi.set_runtime_error(err.to_string());
        self.env.logs.runtime_error(
            curi,
            &processor,
            Step::AboutToBeginProcessor.as_str(),
            &err.to_string(),
        );
        tracing::warn!(
            "{} recoverable problem with {} in {}: {}",
            self.toe.name,
            curi,
            processor,
            err
        );
    }

    fn serious_error(&self, curi: &mut CrawlUri, err: &ProcessorError) {
        let processor = self.toe.current_processor().unwrap_or_default();
        tracing::debug!(
            "{}: thread priority cannot be raised portably; continuing at normal priority",
            self.toe.name
        );
        self.controller.single_thread_mode();
        self.controller.free_reserve_memory();
        self.controller.request_crawl_pause();

        curi.add_annotation(format!("err={}", err.kind_name()));
        curi.add_annotation(format!("os{}", curi.fetch_status()));
        curi.set_fetch_status(S_SERIOUS_ERROR);
        curi.set_runtime_error(err.to_string());

        let pool_report = self.controller.toe_pool_compact_report();
        self.env.logs.runtime_error(
            curi,
            &processor,
            self.toe.step().as_str(),
            &format!("Serious error: {}\n{}", err, pool_report),
        );
        tracing::error!(
            "{} serious error on {} in {}: {} (single-thread mode engaged, pause requested)",
            self.toe.name,
            curi,
            processor,
            err
        );
    }

    /// Hands `curi` back unless a killer already did
    fn return_item(&self, curi: CrawlUri, killed: bool) {
        self.toe.set_step(Step::AboutToReturnUri, None);
        let claimed = self.toe.current.lock().take().is_some();
        if claimed {
            if killed {
                self.toe
                    .return_killed(curi, self.env.frontier.as_ref(), &self.env.logs);
            } else {
                self.env.logs.crawled(&curi);
                if let Err(e) = self.env.frontier.finished(curi) {
                    tracing::error!("{} failed to return item: {}", self.toe.name, e);
                }
            }
        }
        let mut a = self.toe.activity.lock();
        a.last_finish = Some((Instant::now(), Utc::now()));
        a.items_processed += 1;
    }
}
