use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Counters collected while a job scans its files.
///
/// Every counter is a relaxed atomic; workers update them concurrently and
/// readers get an approximate snapshot until the job is terminal.
#[derive(Debug, Default)]
pub struct ScanMetrics {
    files_scanned: AtomicU64,
    files_unreadable: AtomicU64,
    files_cut_short: AtomicU64,
    buffered_files: AtomicU64,
    mapped_files: AtomicU64,
    lines_read: AtomicU64,
    bytes_read: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl ScanMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a file that was opened and read through a buffered reader
    pub fn record_buffered_file(&self, size: u64) {
        self.files_scanned.fetch_add(1, Ordering::Relaxed);
        self.buffered_files.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(size, Ordering::Relaxed);
    }

    /// Records a file that was memory mapped
    pub fn record_mapped_file(&self, size: u64) {
        self.files_scanned.fetch_add(1, Ordering::Relaxed);
        self.mapped_files.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(size, Ordering::Relaxed);
        debug!("Memory mapped {} bytes", size);
    }

    /// Records a file that could not be opened or read at all
    pub fn record_unreadable(&self) {
        self.files_unreadable.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a file whose scan stopped early (cancellation, read or decode error)
    pub fn record_cut_short(&self) {
        self.files_cut_short.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lines(&self, lines: u64) {
        self.lines_read.fetch_add(lines, Ordering::Relaxed);
    }

    /// Records a compiled pattern lookup
    pub fn record_cache_operation(&self, hit: bool) {
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get_stats(&self) -> ScanStats {
        ScanStats {
            files_scanned: self.files_scanned.load(Ordering::Relaxed),
            files_unreadable: self.files_unreadable.load(Ordering::Relaxed),
            files_cut_short: self.files_cut_short.load(Ordering::Relaxed),
            buffered_files: self.buffered_files.load(Ordering::Relaxed),
            mapped_files: self.mapped_files.load(Ordering::Relaxed),
            lines_read: self.lines_read.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            "Scan stats:\n\
             Files scanned/unreadable/cut short: {}/{}/{}\n\
             Files buffered/mapped: {}/{}\n\
             Lines read: {}\n\
             Bytes read: {}\n\
             Pattern cache hits/misses: {}/{}",
            stats.files_scanned,
            stats.files_unreadable,
            stats.files_cut_short,
            stats.buffered_files,
            stats.mapped_files,
            stats.lines_read,
            stats.bytes_read,
            stats.cache_hits,
            stats.cache_misses
        );
    }
}

/// Point-in-time copy of `ScanMetrics`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub files_scanned: u64,
    pub files_unreadable: u64,
    pub files_cut_short: u64,
    pub buffered_files: u64,
    pub mapped_files: u64,
    pub lines_read: u64,
    pub bytes_read: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}
