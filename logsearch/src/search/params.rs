use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::errors::SearchError;

/// Line comparison strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    Equals,
    #[default]
    Contains,
    StartsWith,
    EndsWith,
    Regex,
}

impl Mode {
    pub const ALL: [Mode; 5] = [
        Mode::Equals,
        Mode::Contains,
        Mode::StartsWith,
        Mode::EndsWith,
        Mode::Regex,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Equals => "equals",
            Mode::Contains => "contains",
            Mode::StartsWith => "starts-with",
            Mode::EndsWith => "ends-with",
            Mode::Regex => "regex",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "equals" => Ok(Mode::Equals),
            "contains" => Ok(Mode::Contains),
            "starts-with" | "startswith" => Ok(Mode::StartsWith),
            "ends-with" | "endswith" => Ok(Mode::EndsWith),
            "regex" => Ok(Mode::Regex),
            other => Err(SearchError::config_error(format!(
                "Unknown search mode '{}'",
                other
            ))),
        }
    }
}

/// Which files the caller gathered. Carried along for the caller's benefit;
/// the engine itself only ever looks at `SearchParameters::files`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    #[default]
    Folder,
    CurrentFile,
    AllOpened,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Folder => "folder",
            Scope::CurrentFile => "current-file",
            Scope::AllOpened => "all-opened",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "folder" => Ok(Scope::Folder),
            "current-file" | "currentfile" => Ok(Scope::CurrentFile),
            "all-opened" | "allopened" => Ok(Scope::AllOpened),
            other => Err(SearchError::config_error(format!(
                "Unknown search scope '{}'",
                other
            ))),
        }
    }
}

/// One search request. Immutable once handed to a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchParameters {
    pub pattern: String,
    pub mode: Mode,
    pub scope: Scope,
    /// Files to search, in aggregation order. Duplicates are allowed.
    pub files: Vec<PathBuf>,
    pub case_sensitive: bool,
}

impl SearchParameters {
    pub fn new(pattern: impl Into<String>, mode: Mode) -> Self {
        Self {
            pattern: pattern.into(),
            mode,
            scope: Scope::default(),
            files: Vec::new(),
            case_sensitive: false,
        }
    }

    pub fn with_files<I, P>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_round_trips_through_names() {
        for mode in Mode::ALL {
            assert_eq!(mode.as_str().parse::<Mode>().unwrap(), mode);
        }
        assert_eq!("StartsWith".parse::<Mode>().unwrap(), Mode::StartsWith);
        assert_eq!("ends_with".parse::<Mode>().unwrap(), Mode::EndsWith);
        assert!("fuzzy".parse::<Mode>().is_err());
    }

    #[test]
    fn test_scope_parsing() {
        assert_eq!("folder".parse::<Scope>().unwrap(), Scope::Folder);
        assert_eq!("current-file".parse::<Scope>().unwrap(), Scope::CurrentFile);
        assert_eq!("ALL_OPENED".parse::<Scope>().unwrap(), Scope::AllOpened);
        assert!("everywhere".parse::<Scope>().is_err());
    }

    #[test]
    fn test_builder_keeps_file_order_and_duplicates() {
        let params = SearchParameters::new("foo", Mode::Contains)
            .with_files(["b.log", "a.log", "b.log"])
            .with_scope(Scope::AllOpened)
            .case_sensitive(true);

        assert_eq!(
            params.files,
            vec![
                PathBuf::from("b.log"),
                PathBuf::from("a.log"),
                PathBuf::from("b.log")
            ]
        );
        assert_eq!(params.scope, Scope::AllOpened);
        assert!(params.case_sensitive);
    }

    #[test]
    fn test_defaults_are_case_insensitive_contains() {
        let params = SearchParameters::new("x", Mode::default());
        assert_eq!(params.mode, Mode::Contains);
        assert!(!params.case_sensitive);
        assert!(params.files.is_empty());
    }
}
