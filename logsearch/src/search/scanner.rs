use memmap2::Mmap;
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::matcher::LineMatcher;
use crate::config::{EncodingMode, SearchConfig};
use crate::errors::{SearchError, SearchResult};
use crate::metrics::ScanMetrics;
use crate::results::{FileSearchResults, Match};

const BUFFER_CAPACITY: usize = 65536;

/// How a walk over a file's lines ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Walk {
    Completed,
    Cancelled,
}

/// Scans single files line by line.
///
/// Every failure is soft: the file's result simply holds whatever matched
/// before the failure, which for an unopenable file is nothing.
#[derive(Debug)]
pub struct FileScanner {
    matcher: LineMatcher,
    metrics: Arc<ScanMetrics>,
    encoding_mode: EncodingMode,
    mmap_threshold: u64,
}

impl FileScanner {
    pub fn new(
        matcher: LineMatcher,
        metrics: Arc<ScanMetrics>,
        encoding_mode: EncodingMode,
        mmap_threshold: u64,
    ) -> Self {
        Self {
            matcher,
            metrics,
            encoding_mode,
            mmap_threshold,
        }
    }

    pub fn from_config(matcher: LineMatcher, metrics: Arc<ScanMetrics>, config: &SearchConfig) -> Self {
        Self::new(matcher, metrics, config.encoding, config.mmap_threshold)
    }

    pub fn metrics(&self) -> &ScanMetrics {
        &self.metrics
    }

    /// Scans `path`, checking `cancelled` before every line.
    ///
    /// Returns the matches found up to the point where the scan stopped.
    pub fn scan<F>(&self, path: &Path, cancelled: F) -> FileSearchResults
    where
        F: Fn() -> bool,
    {
        trace!("Scanning file: {}", path.display());
        let mut results = FileSearchResults::new(path);

        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) => {
                let err = SearchError::from_io(path, e);
                warn!("Cannot open file {}: {}", path.display(), err);
                self.metrics.record_unreadable();
                return results;
            }
        };

        let size = file.metadata().map(|m| m.len()).unwrap_or(0);
        let mut lines = 0usize;

        let outcome = if size > 0 && size >= self.mmap_threshold {
            self.metrics.record_mapped_file(size);
            self.walk_mapped(path, &file, &cancelled, &mut lines, &mut results.matches)
        } else {
            self.metrics.record_buffered_file(size);
            self.walk_buffered(path, file, &cancelled, &mut lines, &mut results.matches)
        };

        self.metrics.record_lines(lines as u64);

        match outcome {
            Ok(Walk::Completed) => {}
            Ok(Walk::Cancelled) => {
                debug!(
                    "Scan of {} cancelled after {} lines",
                    path.display(),
                    lines
                );
                self.metrics.record_cut_short();
            }
            Err(e) => {
                warn!(
                    "Stopped scanning {} after {} lines: {}",
                    path.display(),
                    lines,
                    e
                );
                self.metrics.record_cut_short();
            }
        }

        trace!(
            "Found {} matches in file {}",
            results.matches.len(),
            path.display()
        );
        results
    }

    fn walk_buffered(
        &self,
        path: &Path,
        file: File,
        cancelled: &dyn Fn() -> bool,
        line_number: &mut usize,
        matches: &mut Vec<Match>,
    ) -> SearchResult<Walk> {
        let mut reader = BufReader::with_capacity(BUFFER_CAPACITY, file);
        let mut buffer = Vec::with_capacity(256);

        loop {
            if cancelled() {
                return Ok(Walk::Cancelled);
            }

            buffer.clear();
            if reader.read_until(b'\n', &mut buffer)? == 0 {
                return Ok(Walk::Completed);
            }

            *line_number += 1;
            self.process_line(path, &buffer, *line_number, matches)?;
        }
    }

    fn walk_mapped(
        &self,
        path: &Path,
        file: &File,
        cancelled: &dyn Fn() -> bool,
        line_number: &mut usize,
        matches: &mut Vec<Match>,
    ) -> SearchResult<Walk> {
        // SAFETY: the map is read-only and dropped before this function returns.
        let mmap = unsafe { Mmap::map(file) }.map_err(SearchError::IoError)?;
        let mut rest: &[u8] = &mmap;

        while !rest.is_empty() {
            if cancelled() {
                return Ok(Walk::Cancelled);
            }

            let (line, next) = match rest.iter().position(|&b| b == b'\n') {
                Some(end) => rest.split_at(end + 1),
                None => rest.split_at(rest.len()),
            };
            rest = next;

            *line_number += 1;
            self.process_line(path, line, *line_number, matches)?;
        }

        Ok(Walk::Completed)
    }

    fn process_line(
        &self,
        path: &Path,
        raw: &[u8],
        line_number: usize,
        matches: &mut Vec<Match>,
    ) -> SearchResult<()> {
        let raw = trim_line_ending(raw);
        let line: Cow<'_, str> = match self.encoding_mode {
            EncodingMode::Lossy => String::from_utf8_lossy(raw),
            EncodingMode::FailFast => Cow::Borrowed(
                std::str::from_utf8(raw)
                    .map_err(|_| SearchError::encoding_error(path, line_number))?,
            ),
        };

        if self.matcher.is_match(&line) {
            matches.push(Match::new(line_number, line.into_owned()));
        }
        Ok(())
    }
}

/// Strips a trailing `\n` or `\r\n`
fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
