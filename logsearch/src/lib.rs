pub mod config;
pub mod errors;
pub mod metrics;
pub mod results;
pub mod search;

pub use config::{EncodingMode, SearchConfig};
pub use errors::{SearchError, SearchResult};
pub use metrics::{ScanMetrics, ScanStats};
pub use results::{FileNode, FileSearchResults, Match, ResultModel, ResultRow};
pub use search::{
    JobEvent, JobEventKind, JobHandle, JobId, ManagerEvent, Mode, Scope, SearchCallbacks,
    SearchJob, SearchManager, SearchParameters, Status,
};
