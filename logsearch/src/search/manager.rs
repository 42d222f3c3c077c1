use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use tracing::{debug, info, warn};

use super::job::{JobEvent, JobEventKind, JobHandle, JobId, SearchJob, Status};
use super::params::SearchParameters;
use crate::config::SearchConfig;
use crate::errors::{SearchError, SearchResult};

pub type ProgressCallback = Box<dyn Fn(u8, &SearchJob) + Send + Sync + 'static>;
pub type CompleteCallback = Box<dyn Fn(Status, &SearchJob) + Send + Sync + 'static>;

/// Per-submission hooks, run on the manager's dispatcher thread.
///
/// Callbacks may call back into the manager; no manager lock is held while
/// they run.
#[derive(Default)]
pub struct SearchCallbacks {
    on_progress: Option<ProgressCallback>,
    on_complete: Option<CompleteCallback>,
}

impl SearchCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(u8, &SearchJob) + Send + Sync + 'static,
    {
        self.on_progress = Some(Box::new(f));
        self
    }

    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: Fn(Status, &SearchJob) + Send + Sync + 'static,
    {
        self.on_complete = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for SearchCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchCallbacks")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

/// Manager-level notifications, relayed from the jobs it owns
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    Started { job: JobHandle },
    Progress { percent: u8, job: JobHandle },
    Complete { status: Status, job: JobHandle },
}

impl ManagerEvent {
    pub fn job(&self) -> &JobHandle {
        match self {
            ManagerEvent::Started { job }
            | ManagerEvent::Progress { job, .. }
            | ManagerEvent::Complete { job, .. } => job,
        }
    }
}

struct ManagerState {
    /// Oldest first; the back is the current job
    queue: VecDeque<SearchJob>,
    callbacks: HashMap<JobId, Arc<SearchCallbacks>>,
    subscribers: Vec<Sender<ManagerEvent>>,
    events: Sender<JobEvent>,
}

struct ManagerInner {
    config: SearchConfig,
    pool: Arc<ThreadPool>,
    state: Mutex<ManagerState>,
}

/// Owns search jobs and the worker pool they share.
///
/// Submitting a new search cancels the one still running, so at most one
/// job is ever `Searching`. Jobs that reach a terminal state are reaped
/// from the queue except the most recent one, whose results stay available
/// through [`SearchManager::current_job`].
///
/// Job events are funneled into a single dispatcher thread which runs
/// [`SearchCallbacks`], reaps, and forwards [`ManagerEvent`]s to
/// subscribers. `SearchManager` is a cheap handle; clones share one manager.
#[derive(Clone)]
pub struct SearchManager {
    inner: Arc<ManagerInner>,
}

impl fmt::Debug for SearchManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchManager")
            .field("threads", &self.inner.pool.current_num_threads())
            .field("jobs", &self.queue_len())
            .finish()
    }
}

impl SearchManager {
    /// Creates a manager with a pool of `config.thread_count` workers
    pub fn new(config: SearchConfig) -> SearchResult<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.thread_count.get())
            .thread_name(|i| format!("logsearch-worker-{}", i))
            .build()
            .map_err(|e| SearchError::worker_pool(e.to_string()))?;

        let (events, rx) = mpsc::channel();
        let inner = Arc::new(ManagerInner {
            config,
            pool: Arc::new(pool),
            state: Mutex::new(ManagerState {
                queue: VecDeque::new(),
                callbacks: HashMap::new(),
                subscribers: Vec::new(),
                events,
            }),
        });

        let weak = Arc::downgrade(&inner);
        thread::Builder::new()
            .name("logsearch-dispatch".to_string())
            .spawn(move || dispatch(rx, weak))
            .map_err(|e| SearchError::worker_pool(format!("cannot spawn dispatcher: {}", e)))?;

        info!(
            "Search manager ready with {} worker threads",
            inner.pool.current_num_threads()
        );
        Ok(Self { inner })
    }

    pub fn config(&self) -> &SearchConfig {
        &self.inner.config
    }

    /// Starts a new search, canceling the current one if it is still running
    pub fn submit(&self, params: SearchParameters) -> JobHandle {
        self.submit_with(params, SearchCallbacks::new())
    }

    /// Like [`SearchManager::submit`], with per-job callbacks.
    ///
    /// The returned handle is the current job once this returns, even when
    /// the job failed to start (for example on an invalid regex); check its
    /// status or wait for its `Complete` event.
    pub fn submit_with(&self, params: SearchParameters, callbacks: SearchCallbacks) -> JobHandle {
        let job = SearchJob::with_config(
            params,
            self.inner.config.clone(),
            Some(Arc::clone(&self.inner.pool)),
        );

        {
            let mut state = self.inner.lock_state();
            if let Some(current) = state.queue.back() {
                if current.status() == Status::Searching {
                    debug!(
                        "Search job #{} superseded by #{}",
                        current.id(),
                        job.id()
                    );
                    let _ = current.cancel();
                }
            }
            job.connect(state.events.clone());
            if callbacks.on_progress.is_some() || callbacks.on_complete.is_some() {
                state.callbacks.insert(job.id(), Arc::new(callbacks));
            }
            state.queue.push_back(job.clone());

            // Begun under the queue lock, so a concurrent submit always sees
            // this job as Searching and cancels it
            if let Err(e) = job.begin() {
                warn!("Search job #{} did not start: {}", job.id(), e);
            }
        }

        job.handle()
    }

    /// The most recently submitted job, if any
    pub fn current_job(&self) -> Option<JobHandle> {
        self.inner
            .lock_state()
            .queue
            .back()
            .map(SearchJob::handle)
    }

    /// True if the current job is Searching or Canceling
    pub fn is_searching(&self) -> bool {
        self.inner
            .lock_state()
            .queue
            .back()
            .map(|job| job.status().is_active())
            .unwrap_or(false)
    }

    /// Cancels the running job.
    ///
    /// Also sweeps older jobs; none of them should still be searching.
    pub fn cancel_current(&self) {
        let state = self.inner.lock_state();
        let mut jobs = state.queue.iter().rev();

        if let Some(current) = jobs.next() {
            if current.status() == Status::Searching {
                let _ = current.cancel();
            }
        }
        for job in jobs {
            if job.status() == Status::Searching {
                warn!("Search job #{} was still searching behind a newer job", job.id());
                let _ = job.cancel();
            }
        }
    }

    /// Cancels everything, waits for every job to settle, and keeps only the
    /// most recent job.
    ///
    /// Blocks the caller until in-flight scans have observed cancellation.
    pub fn clear(&self) {
        let pending: Vec<SearchJob> = {
            let state = self.inner.lock_state();
            for job in &state.queue {
                if job.status() == Status::Searching {
                    let _ = job.cancel();
                }
            }
            state
                .queue
                .iter()
                .filter(|job| !job.is_terminal())
                .cloned()
                .collect()
        };

        for job in pending {
            let status = job.wait();
            debug!("Search job #{} settled as {}", job.id(), status);
        }

        let mut state = self.inner.lock_state();
        reap(&mut state);
    }

    pub fn queue_len(&self) -> usize {
        self.inner.lock_state().queue.len()
    }

    /// Handles to every job still owned, oldest first
    pub fn jobs(&self) -> Vec<JobHandle> {
        self.inner
            .lock_state()
            .queue
            .iter()
            .map(SearchJob::handle)
            .collect()
    }

    /// Opens a stream of manager events for all future jobs
    pub fn subscribe(&self) -> Receiver<ManagerEvent> {
        let (tx, rx) = mpsc::channel();
        self.inner.lock_state().subscribers.push(tx);
        rx
    }
}

impl ManagerInner {
    fn lock_state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle_event(&self, event: JobEvent) {
        let Some(job) = event.job.get() else {
            return;
        };

        let callbacks = {
            let state = self.lock_state();
            if !state.queue.iter().any(|queued| queued.id() == job.id()) {
                debug!("Dropping event for released search job #{}", job.id());
                return;
            }
            state.callbacks.get(&job.id()).cloned()
        };

        let handle = event.job;
        match event.kind {
            JobEventKind::Started => {
                self.broadcast(ManagerEvent::Started { job: handle });
            }
            JobEventKind::Progress(percent) => {
                if let Some(on_progress) = callbacks.as_ref().and_then(|c| c.on_progress.as_ref()) {
                    on_progress(percent, &job);
                }
                self.broadcast(ManagerEvent::Progress {
                    percent,
                    job: handle,
                });
            }
            JobEventKind::Canceled | JobEventKind::Finished | JobEventKind::Failed(_) => {
                let status = job.status();
                reap(&mut self.lock_state());

                if let Some(on_complete) = callbacks.as_ref().and_then(|c| c.on_complete.as_ref()) {
                    on_complete(status, &job);
                }
                self.broadcast(ManagerEvent::Complete {
                    status,
                    job: handle,
                });
            }
        }
    }

    fn broadcast(&self, event: ManagerEvent) {
        self.lock_state()
            .subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for job in state.queue.drain(..) {
            let _ = job.cancel();
            job.disconnect();
        }
        state.callbacks.clear();
        state.subscribers.clear();
        debug!("Search manager dropped");
    }
}

/// Drops terminal jobs except the most recent one
fn reap(state: &mut ManagerState) {
    let last = state.queue.back().map(SearchJob::id);
    let mut released = Vec::new();

    state.queue.retain(|job| {
        let keep = Some(job.id()) == last || !job.is_terminal();
        if !keep {
            released.push(job.clone());
        }
        keep
    });

    for job in released {
        job.disconnect();
        state.callbacks.remove(&job.id());
        debug!("Released search job #{} ({})", job.id(), job.status());
    }
}

/// Relays job events until every sender is gone or the manager is dropped
fn dispatch(rx: Receiver<JobEvent>, manager: Weak<ManagerInner>) {
    for event in rx {
        let Some(inner) = manager.upgrade() else {
            break;
        };
        inner.handle_event(event);
    }
    debug!("Search dispatcher exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::params::Mode;
    use std::fs;
    use std::num::NonZeroUsize;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    const WAIT: Duration = Duration::from_secs(30);

    fn manager() -> SearchManager {
        let config = SearchConfig {
            thread_count: NonZeroUsize::new(2).unwrap(),
            ..SearchConfig::default()
        };
        SearchManager::new(config).unwrap()
    }

    fn big_corpus(dir: &TempDir, count: usize) -> Vec<PathBuf> {
        let content: String = (0..2000).map(|i| format!("entry {} foo\n", i)).collect();
        (0..count)
            .map(|i| {
                let path = dir.path().join(format!("f{}.log", i));
                fs::write(&path, &content).unwrap();
                path
            })
            .collect()
    }

    fn wait_complete(rx: &Receiver<ManagerEvent>, id: JobId) -> Status {
        loop {
            match rx.recv_timeout(WAIT).unwrap() {
                ManagerEvent::Complete { status, job } if job.id() == id => return status,
                _ => {}
            }
        }
    }

    #[test]
    fn test_submit_runs_to_completion() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "foo\nbar\nfoo").unwrap();

        let manager = manager();
        let events = manager.subscribe();
        let handle = manager.submit(SearchParameters::new("foo", Mode::Contains).with_files([&path]));

        assert_eq!(wait_complete(&events, handle.id()), Status::Finished);
        assert_eq!(manager.current_job(), Some(handle.clone()));
        assert!(!manager.is_searching());

        let job = handle.get().unwrap();
        assert_eq!(job.to_result_model().unwrap().match_count(), 2);
    }

    #[test]
    fn test_resubmit_supersedes_running_job() {
        let dir = tempdir().unwrap();
        let files = big_corpus(&dir, 200);

        let manager = manager();
        let events = manager.subscribe();
        let first = manager.submit(SearchParameters::new("foo", Mode::Contains).with_files(files.clone()));
        let first_job = first.get().unwrap();
        let second = manager.submit(SearchParameters::new("entry", Mode::Contains).with_files(files));

        assert_eq!(manager.current_job(), Some(second.clone()));
        assert!(matches!(
            first_job.status(),
            Status::Canceling | Status::Canceled | Status::Finished
        ));

        assert_eq!(wait_complete(&events, second.id()), Status::Finished);
        assert_ne!(first_job.wait(), Status::Searching);
    }

    #[test]
    fn test_invalid_regex_becomes_current_in_error() {
        let manager = manager();
        let events = manager.subscribe();
        let handle = manager.submit(SearchParameters::new("(unclosed", Mode::Regex));

        assert_eq!(manager.current_job(), Some(handle.clone()));
        assert_eq!(handle.status(), Some(Status::Error));
        assert_eq!(wait_complete(&events, handle.id()), Status::Error);
    }

    #[test]
    fn test_clear_leaves_most_recent_job() {
        let dir = tempdir().unwrap();
        let files = big_corpus(&dir, 50);

        let manager = manager();
        for pattern in ["foo", "entry", "1", "2"] {
            manager.submit(SearchParameters::new(pattern, Mode::Contains).with_files(files.clone()));
        }
        let last = manager.current_job().unwrap();

        manager.clear();

        assert_eq!(manager.queue_len(), 1);
        assert_eq!(manager.jobs(), vec![last.clone()]);
        assert!(last.status().unwrap().is_terminal());
        assert!(!manager.is_searching());
    }

    #[test]
    fn test_cancel_current() {
        let dir = tempdir().unwrap();
        let files = big_corpus(&dir, 300);

        let manager = manager();
        let events = manager.subscribe();
        let handle = manager.submit(SearchParameters::new("foo", Mode::Contains).with_files(files));
        manager.cancel_current();

        let status = wait_complete(&events, handle.id());
        assert!(matches!(status, Status::Canceled | Status::Finished));
        assert!(!manager.is_searching());
    }

    #[test]
    fn test_callbacks_fire_on_dispatcher() {
        let dir = tempdir().unwrap();
        let files = big_corpus(&dir, 5);

        let manager = manager();
        let progress_calls = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = mpsc::channel();

        let counter = Arc::clone(&progress_calls);
        let done_tx = Mutex::new(done_tx);
        let callbacks = SearchCallbacks::new()
            .on_progress(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .on_complete(move |status, job| {
                let tx = done_tx.lock().unwrap();
                tx.send((status, job.total_matches())).unwrap();
            });

        manager.submit_with(
            SearchParameters::new("foo", Mode::Contains).with_files(files),
            callbacks,
        );

        let (status, matches) = done_rx.recv_timeout(WAIT).unwrap();
        assert_eq!(status, Status::Finished);
        assert_eq!(matches, 5 * 2000);
        assert_eq!(progress_calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_concurrent_submits_leave_one_searching() {
        let dir = tempdir().unwrap();
        let files = big_corpus(&dir, 100);
        let manager = manager();

        for _ in 0..20 {
            let barrier = Arc::new(std::sync::Barrier::new(8));
            let submitters: Vec<_> = (0..8)
                .map(|i| {
                    let manager = manager.clone();
                    let barrier = Arc::clone(&barrier);
                    let files = files.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        manager.submit(
                            SearchParameters::new(format!("entry {}", i), Mode::Contains)
                                .with_files(files),
                        )
                    })
                })
                .collect();

            let handles: Vec<JobHandle> = submitters
                .into_iter()
                .map(|t| t.join().unwrap())
                .collect();

            let searching = handles
                .iter()
                .filter(|h| h.status() == Some(Status::Searching))
                .count();
            assert!(searching <= 1, "{} jobs searching at once", searching);

            manager.clear();
            assert_eq!(manager.queue_len(), 1);
        }
    }

    #[test]
    fn test_terminal_jobs_are_reaped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "foo\n").unwrap();

        let manager = manager();
        let events = manager.subscribe();

        let first = manager.submit(SearchParameters::new("foo", Mode::Contains).with_files([&path]));
        wait_complete(&events, first.id());
        let second = manager.submit(SearchParameters::new("foo", Mode::Contains).with_files([&path]));
        wait_complete(&events, second.id());

        assert_eq!(manager.jobs(), vec![second]);
    }
}
