//! Concurrent line search over a list of files.
//!
//! The pieces, bottom up:
//!
//! - [`params`]: what to search for (`SearchParameters`, `Mode`, `Scope`)
//! - [`matcher`]: decides whether one line matches (`LineMatcher`)
//! - [`scanner`]: walks one file line by line (`FileScanner`)
//! - [`job`]: one cancellable execution over many files (`SearchJob`)
//! - [`manager`]: queue of jobs sharing a worker pool (`SearchManager`)
//!
//! Files of a job are scanned in parallel on a rayon pool. Each scan checks
//! the job's cancellation flag before every line, so a cancel takes effect
//! within one line per worker:
//!
//! ```rust,ignore
//! files.par_iter().enumerate().for_each(|(index, path)| {
//!     if job.is_cancelled() { return; }
//!     let result = scanner.scan(path, || job.is_cancelled());
//!     job.append(index, result);
//! });
//! ```

pub mod job;
pub mod manager;
pub mod matcher;
pub mod params;
pub mod scanner;

pub use job::{JobEvent, JobEventKind, JobHandle, JobId, SearchJob, Status};
pub use manager::{ManagerEvent, SearchCallbacks, SearchManager};
pub use matcher::{matches, LineMatcher, LiteralKind, MatchStrategy};
pub use params::{Mode, Scope, SearchParameters};
pub use scanner::FileScanner;
