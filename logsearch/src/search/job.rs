use rayon::prelude::*;
use rayon::ThreadPool;
use serde::Serialize;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use super::matcher::LineMatcher;
use super::params::SearchParameters;
use super::scanner::FileScanner;
use crate::config::SearchConfig;
use crate::errors::{SearchError, SearchResult};
use crate::metrics::ScanMetrics;
use crate::results::{FileSearchResults, ResultModel};

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique job identifier
pub type JobId = u64;

/// Lifecycle of a search job.
///
/// ```text
/// New ──begin──▶ Searching ──cancel──▶ Canceling ──▶ Canceled
///                    │ └──────────────────────────────▶ Finished
///                    └─(invalid pattern, pool fault)──▶ Error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Status {
    New = 0,
    Searching = 1,
    Canceling = 2,
    Canceled = 3,
    Finished = 4,
    Error = 5,
}

impl Status {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Status::New,
            1 => Status::Searching,
            2 => Status::Canceling,
            3 => Status::Canceled,
            4 => Status::Finished,
            _ => Status::Error,
        }
    }

    /// Canceled, Finished and Error admit no further transitions
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Canceled | Status::Finished | Status::Error)
    }

    /// Scans may still be running
    pub fn is_active(self) -> bool {
        matches!(self, Status::Searching | Status::Canceling)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::New => "new",
            Status::Searching => "searching",
            Status::Canceling => "canceling",
            Status::Canceled => "canceled",
            Status::Finished => "finished",
            Status::Error => "error",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEventKind {
    Started,
    /// Percentage of files completed
    Progress(u8),
    Canceled,
    Finished,
    /// The job moved to `Status::Error`; carries the reason
    Failed(String),
}

impl JobEventKind {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobEventKind::Canceled | JobEventKind::Finished | JobEventKind::Failed(_)
        )
    }
}

/// A notification emitted by a job, tagged with a handle to it
#[derive(Debug, Clone)]
pub struct JobEvent {
    pub job: JobHandle,
    pub kind: JobEventKind,
}

struct JobState {
    /// Completed files as (index in the request, results), in completion order
    results: Vec<(usize, FileSearchResults)>,
    listeners: Vec<Sender<JobEvent>>,
    error: Option<String>,
}

struct JobInner {
    id: JobId,
    params: SearchParameters,
    config: SearchConfig,
    pool: Option<Arc<ThreadPool>>,
    status: AtomicU8,
    cancel_flag: AtomicBool,
    completed: AtomicUsize,
    metrics: Arc<ScanMetrics>,
    state: Mutex<JobState>,
    terminal: Condvar,
}

/// One execution of a search request.
///
/// `SearchJob` is a cheap, cloneable owning reference. Status transitions,
/// result appends and event emission are serialized by a per-job mutex;
/// `status()` and `progress()` read atomics and never block.
///
/// Events are delivered through `std::sync::mpsc` channels obtained from
/// [`SearchJob::subscribe`]. They are sent from the thread that caused them
/// (the caller of `begin`/`cancel`, a scan worker, or the job's coordinator
/// thread) and arrive in emission order on whichever thread reads the
/// receiver. After the terminal event the job drops all its senders, so a
/// receiver iterator ends by itself.
#[derive(Clone)]
pub struct SearchJob {
    inner: Arc<JobInner>,
}

/// Non-owning reference to a job.
///
/// Handles stay valid for as long as something owns the job; once a
/// `SearchManager` has reaped the job and its last scan has returned,
/// [`JobHandle::get`] returns `None`.
#[derive(Clone)]
pub struct JobHandle {
    id: JobId,
    inner: Weak<JobInner>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Upgrades to an owning reference if the job still exists
    pub fn get(&self) -> Option<SearchJob> {
        self.inner.upgrade().map(|inner| SearchJob { inner })
    }

    /// Status of the job, or `None` once it has been released
    pub fn status(&self) -> Option<Status> {
        self.inner
            .upgrade()
            .map(|inner| Status::from_u8(inner.status.load(Ordering::Acquire)))
    }

    pub fn is_released(&self) -> bool {
        self.inner.strong_count() == 0
    }
}

impl PartialEq for JobHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for JobHandle {}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .field("released", &self.is_released())
            .finish()
    }
}

impl fmt::Debug for SearchJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchJob")
            .field("id", &self.inner.id)
            .field("status", &self.status())
            .field("pattern", &self.inner.params.pattern)
            .field("files", &self.inner.params.files.len())
            .finish()
    }
}

/// Percentage of `completed` out of `total`, rounded, held below 100 until
/// every file is done
fn percent(completed: usize, total: usize) -> u8 {
    if total == 0 || completed == 0 {
        return 0;
    }
    let rounded = (completed * 100 + total / 2) / total;
    if completed < total {
        rounded.min(99) as u8
    } else {
        100
    }
}

impl SearchJob {
    /// Creates a job with default configuration that runs on rayon's global pool
    pub fn new(params: SearchParameters) -> Self {
        Self::with_config(params, SearchConfig::default(), None)
    }

    /// Creates a job that scans on `pool`, or on rayon's global pool if `None`
    pub fn with_config(
        params: SearchParameters,
        config: SearchConfig,
        pool: Option<Arc<ThreadPool>>,
    ) -> Self {
        let id = NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            inner: Arc::new(JobInner {
                id,
                params,
                config,
                pool,
                status: AtomicU8::new(Status::New as u8),
                cancel_flag: AtomicBool::new(false),
                completed: AtomicUsize::new(0),
                metrics: Arc::new(ScanMetrics::new()),
                state: Mutex::new(JobState {
                    results: Vec::new(),
                    listeners: Vec::new(),
                    error: None,
                }),
                terminal: Condvar::new(),
            }),
        }
    }

    pub fn id(&self) -> JobId {
        self.inner.id
    }

    pub fn params(&self) -> &SearchParameters {
        &self.inner.params
    }

    pub fn handle(&self) -> JobHandle {
        JobHandle {
            id: self.inner.id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn metrics(&self) -> &ScanMetrics {
        &self.inner.metrics
    }

    /// Lock-free snapshot of the current status
    pub fn status(&self) -> Status {
        Status::from_u8(self.inner.status.load(Ordering::Acquire))
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel_flag.load(Ordering::Acquire)
    }

    /// Reason the job failed, if it is in `Status::Error`
    pub fn error(&self) -> Option<String> {
        self.lock_state().error.clone()
    }

    pub fn total_files(&self) -> usize {
        self.inner.params.files.len()
    }

    pub fn completed_files(&self) -> usize {
        self.inner.completed.load(Ordering::Acquire)
    }

    /// Percent of files completed, 0..=100. Never decreases, and reads 100
    /// only for a job that finished.
    pub fn progress(&self) -> u8 {
        self.capped_percent(self.completed_files())
    }

    /// Sum of matches over the files completed so far
    pub fn total_matches(&self) -> usize {
        self.lock_state()
            .results
            .iter()
            .map(|(_, result)| result.matches.len())
            .sum()
    }

    /// Snapshot of the completed files, in completion order
    pub fn results(&self) -> Vec<FileSearchResults> {
        self.lock_state()
            .results
            .iter()
            .map(|(_, result)| result.clone())
            .collect()
    }

    /// Opens a new event stream for this job.
    ///
    /// A job that is already terminal returns a receiver that is closed.
    pub fn subscribe(&self) -> Receiver<JobEvent> {
        let (tx, rx) = mpsc::channel();
        self.connect(tx);
        rx
    }

    /// Registers `tx` as a listener. Returns false if the job is terminal.
    pub(crate) fn connect(&self, tx: Sender<JobEvent>) -> bool {
        let mut state = self.lock_state();
        if self.is_terminal() {
            return false;
        }
        state.listeners.push(tx);
        true
    }

    /// Drops every listener
    pub fn disconnect(&self) {
        let mut state = self.lock_state();
        if !state.listeners.is_empty() {
            debug!(
                "Search job #{}: dropping {} listeners",
                self.inner.id,
                state.listeners.len()
            );
        }
        state.listeners.clear();
    }

    /// Starts the search.
    ///
    /// Valid only on a new job. Emits `Started`, compiles the pattern and
    /// hands the file list to a coordinator thread, then returns without
    /// waiting for any scan. An invalid pattern moves the job to
    /// `Status::Error` (with a `Failed` event) and is also returned here.
    pub fn begin(&self) -> SearchResult<()> {
        let mut state = self.lock_state();
        let status = self.status();
        if status != Status::New {
            warn!(
                "Search job #{}: begin ignored in {} state",
                self.inner.id, status
            );
            return Err(SearchError::invalid_state("begin", status));
        }

        self.set_status(Status::Searching);
        info!(
            "Search job #{} started: '{}' ({}) over {} files",
            self.inner.id,
            self.inner.params.pattern,
            self.inner.params.mode,
            self.total_files()
        );
        self.emit(&mut state, JobEventKind::Started);

        let matcher = match LineMatcher::with_metrics(&self.inner.params, &self.inner.metrics) {
            Ok(matcher) => matcher,
            Err(e) => {
                self.fail(&mut state, &e);
                return Err(e);
            }
        };
        let scanner = FileScanner::from_config(
            matcher,
            Arc::clone(&self.inner.metrics),
            &self.inner.config,
        );

        let job = self.clone();
        let spawned = thread::Builder::new()
            .name(format!("search-job-{}", self.inner.id))
            .spawn(move || job.run(scanner));

        if let Err(e) = spawned {
            let err = SearchError::worker_pool(format!("cannot spawn coordinator thread: {}", e));
            self.fail(&mut state, &err);
            return Err(err);
        }

        Ok(())
    }

    /// Requests cooperative cancellation.
    ///
    /// Running scans stop at their next line and files not yet started are
    /// skipped. Calling it again, or on a terminal job, does nothing.
    /// A job that has not begun returns `InvalidState`.
    pub fn cancel(&self) -> SearchResult<()> {
        let _state = self.lock_state();
        match self.status() {
            Status::New => {
                warn!("Search job #{}: cancel before begin", self.inner.id);
                Err(SearchError::invalid_state("cancel", Status::New))
            }
            Status::Searching => {
                self.inner.cancel_flag.store(true, Ordering::Release);
                self.set_status(Status::Canceling);
                info!("Search job #{} canceling", self.inner.id);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Blocks until the job is terminal and returns its final status.
    ///
    /// Returns immediately with `Status::New` for a job that was never begun.
    pub fn wait(&self) -> Status {
        let state = self.lock_state();
        if self.status() == Status::New {
            return Status::New;
        }
        let _state = self
            .inner
            .terminal
            .wait_while(state, |_| !self.is_terminal())
            .unwrap_or_else(PoisonError::into_inner);
        self.status()
    }

    /// Like [`SearchJob::wait`] but gives up after `timeout`, returning `None`
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Status> {
        let state = self.lock_state();
        if self.status() == Status::New {
            return Some(Status::New);
        }
        let (_state, result) = self
            .inner
            .terminal
            .wait_timeout_while(state, timeout, |_| !self.is_terminal())
            .unwrap_or_else(PoisonError::into_inner);
        if result.timed_out() {
            None
        } else {
            Some(self.status())
        }
    }

    /// Builds the file → matches model.
    ///
    /// Only available once the job is Finished or Canceled; a canceled job
    /// yields the files that completed before cancellation took effect.
    pub fn to_result_model(&self) -> Option<ResultModel> {
        match self.status() {
            Status::Finished | Status::Canceled => {
                let state = self.lock_state();
                Some(ResultModel::build(
                    state.results.iter().map(|(index, result)| (*index, result)),
                ))
            }
            _ => None,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, JobState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, status: Status) {
        self.inner.status.store(status as u8, Ordering::Release);
    }

    fn emit(&self, state: &mut JobState, kind: JobEventKind) {
        let event = JobEvent {
            job: self.handle(),
            kind,
        };
        state
            .listeners
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Moves to a terminal state: drops listeners and wakes waiters
    fn settle(&self, state: &mut JobState, status: Status, kind: JobEventKind) {
        self.set_status(status);
        self.emit(state, kind);
        state.listeners.clear();
        self.inner.terminal.notify_all();
    }

    fn fail(&self, state: &mut JobState, err: &SearchError) {
        warn!("Search job #{} failed: {}", self.inner.id, err);
        let message = err.to_string();
        state.error = Some(message.clone());
        self.settle(state, Status::Error, JobEventKind::Failed(message));
    }

    /// Progress for `completed` files. Once cancellation is requested the
    /// job can no longer finish, so it stays below 100.
    fn capped_percent(&self, completed: usize) -> u8 {
        let progress = percent(completed, self.total_files());
        if self.is_cancelled() {
            progress.min(99)
        } else {
            progress
        }
    }

    /// Settles a job whose scans have all returned
    fn conclude(&self, state: &mut JobState) {
        if self.is_cancelled() {
            info!(
                "Search job #{} canceled: {} of {} files completed",
                self.inner.id,
                state.results.len(),
                self.total_files()
            );
            self.settle(state, Status::Canceled, JobEventKind::Canceled);
        } else {
            info!(
                "Search job #{} finished: {} files",
                self.inner.id,
                state.results.len()
            );
            self.settle(state, Status::Finished, JobEventKind::Finished);
        }
    }

    /// Coordinator: fans the file list out over the pool.
    ///
    /// The job normally settles inside the append of its last file. The
    /// coordinator settles it only when that never happens: an empty file
    /// list, files skipped after cancellation, or a panicking worker.
    fn run(self, scanner: FileScanner) {
        let started = Instant::now();
        let files = &self.inner.params.files;

        let scan_all = || {
            files.par_iter().enumerate().for_each(|(index, path)| {
                if self.is_cancelled() {
                    trace!("Skipping {} after cancellation", path.display());
                    return;
                }
                let result = scanner.scan(path, || self.is_cancelled());
                self.append(index, result);
            })
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match &self.inner.pool {
            Some(pool) => pool.install(scan_all),
            None => scan_all(),
        }));

        let mut state = self.lock_state();
        if outcome.is_err() {
            if !self.is_terminal() {
                self.fail(&mut state, &SearchError::worker_pool("a scan worker panicked"));
            }
            return;
        }
        if !self.is_terminal() {
            self.conclude(&mut state);
        }
        drop(state);

        debug!(
            "Search job #{} coordinator done after {:?}",
            self.inner.id,
            started.elapsed()
        );
        self.inner.metrics.log_stats();
    }

    /// Appends one completed file and reports progress. The last file
    /// decides the outcome: Canceled if cancellation was requested by then,
    /// Finished otherwise.
    fn append(&self, index: usize, result: FileSearchResults) {
        let mut state = self.lock_state();
        if self.is_terminal() {
            return;
        }
        state.results.push((index, result));
        let completed = self.inner.completed.fetch_add(1, Ordering::AcqRel) + 1;
        let progress = self.capped_percent(completed);
        debug!(
            "Search job #{}: {}/{} files ({}%)",
            self.inner.id,
            completed,
            self.total_files(),
            progress
        );
        self.emit(&mut state, JobEventKind::Progress(progress));

        if completed == self.total_files() {
            self.conclude(&mut state);
        }
    }
}
