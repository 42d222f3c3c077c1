use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use std::sync::Arc;
use tracing::debug;

use super::params::{Mode, SearchParameters};
use crate::errors::{SearchError, SearchResult};
use crate::metrics::ScanMetrics;

/// Compiled regexes keyed by (source, case-insensitive).
static PATTERN_CACHE: Lazy<DashMap<(String, bool), Arc<Regex>>> = Lazy::new(DashMap::new);

/// The non-regex modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralKind {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
}

impl LiteralKind {
    /// `None` for `Mode::Regex`
    pub fn from_mode(mode: Mode) -> Option<Self> {
        match mode {
            Mode::Equals => Some(LiteralKind::Equals),
            Mode::Contains => Some(LiteralKind::Contains),
            Mode::StartsWith => Some(LiteralKind::StartsWith),
            Mode::EndsWith => Some(LiteralKind::EndsWith),
            Mode::Regex => None,
        }
    }
}

/// Strategy for matching a single line
#[derive(Debug, Clone)]
pub enum MatchStrategy {
    /// Plain `str` predicates, used for case-sensitive literal modes
    Simple { kind: LiteralKind, pattern: String },
    /// Compiled regex, used for `Mode::Regex` and for case-insensitive literal modes
    Regex(Arc<Regex>),
}

/// Decides whether a line matches a job's pattern configuration.
///
/// Built once per job and shared by every worker; `is_match` takes `&self`
/// and has no side effects.
#[derive(Debug, Clone)]
pub struct LineMatcher {
    strategy: MatchStrategy,
}

impl LineMatcher {
    /// Builds the matcher for `params`, failing on an invalid regex
    pub fn new(params: &SearchParameters) -> SearchResult<Self> {
        Self::with_metrics(params, &ScanMetrics::new())
    }

    /// Builds the matcher and records pattern cache hits in `metrics`
    pub fn with_metrics(params: &SearchParameters, metrics: &ScanMetrics) -> SearchResult<Self> {
        let case_insensitive = !params.case_sensitive;

        let strategy = match LiteralKind::from_mode(params.mode) {
            None => MatchStrategy::Regex(Self::compile(
                &params.pattern,
                case_insensitive,
                metrics,
            )?),
            Some(kind) if case_insensitive => {
                let source = Self::literal_source(kind, &params.pattern);
                MatchStrategy::Regex(Self::compile(&source, true, metrics)?)
            }
            Some(kind) => MatchStrategy::Simple {
                kind,
                pattern: params.pattern.clone(),
            },
        };

        debug!(
            "Pattern '{}' ({}, case {}) uses {} strategy",
            params.pattern,
            params.mode,
            if params.case_sensitive {
                "sensitive"
            } else {
                "insensitive"
            },
            match strategy {
                MatchStrategy::Simple { .. } => "simple",
                MatchStrategy::Regex(_) => "regex",
            }
        );

        Ok(Self { strategy })
    }

    pub fn strategy(&self) -> &MatchStrategy {
        &self.strategy
    }

    /// Returns true if `line` matches
    pub fn is_match(&self, line: &str) -> bool {
        match &self.strategy {
            MatchStrategy::Simple { kind, pattern } => match kind {
                LiteralKind::Equals => line == pattern,
                LiteralKind::Contains => line.contains(pattern.as_str()),
                LiteralKind::StartsWith => line.starts_with(pattern.as_str()),
                LiteralKind::EndsWith => line.ends_with(pattern.as_str()),
            },
            MatchStrategy::Regex(regex) => regex.is_match(line),
        }
    }

    /// Regex source equivalent to a literal mode
    fn literal_source(kind: LiteralKind, pattern: &str) -> String {
        let escaped = regex::escape(pattern);
        match kind {
            LiteralKind::Equals => format!(r"\A{}\z", escaped),
            LiteralKind::StartsWith => format!(r"\A{}", escaped),
            LiteralKind::EndsWith => format!(r"{}\z", escaped),
            LiteralKind::Contains => escaped,
        }
    }

    fn compile(
        source: &str,
        case_insensitive: bool,
        metrics: &ScanMetrics,
    ) -> SearchResult<Arc<Regex>> {
        let key = (source.to_string(), case_insensitive);
        if let Some(entry) = PATTERN_CACHE.get(&key) {
            metrics.record_cache_operation(true);
            return Ok(Arc::clone(entry.value()));
        }

        let regex = RegexBuilder::new(source)
            .case_insensitive(case_insensitive)
            .unicode(true)
            .build()
            .map_err(|e| SearchError::invalid_pattern(e.to_string()))?;
        let regex = Arc::new(regex);

        metrics.record_cache_operation(false);
        PATTERN_CACHE.insert(key, Arc::clone(&regex));
        Ok(regex)
    }
}

/// One-off check of a single line against `params`.
///
/// Compiles (or fetches from cache) the pattern on every call; scanners build
/// a `LineMatcher` once instead.
pub fn matches(line: &str, params: &SearchParameters) -> SearchResult<bool> {
    Ok(LineMatcher::new(params)?.is_match(line))
}
