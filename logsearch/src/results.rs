//! Search result types.
//!
//! Workers produce one `FileSearchResults` per scanned file. A job keeps them
//! in completion order; `ResultModel::build` turns them into the two-level
//! file → matches shape the presentation layer walks, in the order the files
//! were listed in the request.
//!
//! ```text
//! ResultModel
//! ├── FileNode  app.log   (/var/log/app.log)
//! │   ├── Match 12  "ERROR: disk full"
//! │   └── Match 98  "ERROR: retry failed"
//! └── FileNode  db.log    (/var/log/db.log)
//! ```

use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A single matching line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Match {
    /// 1-based line number within the file
    pub line_number: usize,
    /// The full text of the line, without its terminator
    pub line_content: String,
}

impl Match {
    pub fn new(line_number: usize, line_content: impl Into<String>) -> Self {
        Self {
            line_number,
            line_content: line_content.into(),
        }
    }
}

/// All matches found in one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSearchResults {
    /// Display name (last path component)
    pub file_name: String,
    /// The path as given in the request; identity key for the file
    pub file_path: PathBuf,
    /// Matches in ascending line order
    pub matches: Vec<Match>,
}

impl FileSearchResults {
    /// Creates an empty result for `path`
    pub fn new(path: &Path) -> Self {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Self {
            file_name,
            file_path: path.to_path_buf(),
            matches: Vec::new(),
        }
    }

    pub fn match_count(&self) -> usize {
        self.matches.len()
    }
}

/// A file entry in the result model together with its matches
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileNode {
    pub file_name: String,
    pub file_path: PathBuf,
    pub matches: Vec<Match>,
}

/// One flattened (file, match) pair, carrying what a caller needs to jump
/// to the line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResultRow<'a> {
    pub file_name: &'a str,
    pub file_path: &'a Path,
    pub line_number: usize,
    pub line_content: &'a str,
}

/// Two-level file → matches view of a finished search
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResultModel {
    pub files: Vec<FileNode>,
}

impl ResultModel {
    /// Builds the model from `(request index, results)` pairs.
    ///
    /// Files are ordered by their index in the request. A path listed more
    /// than once shows up as a single node, at its first position, holding
    /// the matches of every occurrence in request order.
    pub fn build<'a, I>(results: I) -> Self
    where
        I: IntoIterator<Item = (usize, &'a FileSearchResults)>,
    {
        let mut ordered: Vec<(usize, &FileSearchResults)> = results.into_iter().collect();
        ordered.sort_by_key(|(index, _)| *index);

        let mut files: Vec<FileNode> = Vec::with_capacity(ordered.len());
        let mut seen: HashMap<&Path, usize> = HashMap::new();

        for (_, result) in ordered {
            if let Some(&node) = seen.get(result.file_path.as_path()) {
                files[node].matches.extend(result.matches.iter().cloned());
                continue;
            }
            seen.insert(result.file_path.as_path(), files.len());
            files.push(FileNode {
                file_name: result.file_name.clone(),
                file_path: result.file_path.clone(),
                matches: result.matches.clone(),
            });
        }

        Self { files }
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn match_count(&self) -> usize {
        self.files.iter().map(|f| f.matches.len()).sum()
    }

    pub fn files_with_matches(&self) -> usize {
        self.files.iter().filter(|f| !f.matches.is_empty()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn file(&self, path: &Path) -> Option<&FileNode> {
        self.files.iter().find(|f| f.file_path == path)
    }

    /// Iterates every match as a flat row, file by file
    pub fn rows(&self) -> impl Iterator<Item = ResultRow<'_>> {
        self.files.iter().flat_map(|file| {
            file.matches.iter().map(move |m| ResultRow {
                file_name: &file.file_name,
                file_path: &file.file_path,
                line_number: m.line_number,
                line_content: &m.line_content,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_result(path: &str, lines: &[(usize, &str)]) -> FileSearchResults {
        let mut result = FileSearchResults::new(Path::new(path));
        result.matches = lines.iter().map(|(n, l)| Match::new(*n, *l)).collect();
        result
    }

    #[test]
    fn test_file_results_creation() {
        let result = FileSearchResults::new(Path::new("/var/log/app.log"));
        assert_eq!(result.file_name, "app.log");
        assert_eq!(result.file_path, PathBuf::from("/var/log/app.log"));
        assert_eq!(result.match_count(), 0);
    }

    #[test]
    fn test_model_follows_request_order() {
        let a = file_result("/logs/a.log", &[(1, "foo"), (3, "foo")]);
        let b = file_result("/logs/b.log", &[(2, "foo bar")]);
        let c = file_result("/logs/c.log", &[]);

        // Completion order differs from request order
        let model = ResultModel::build(vec![(2, &c), (0, &a), (1, &b)]);

        let names: Vec<_> = model.files.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(names, vec!["a.log", "b.log", "c.log"]);
        assert_eq!(model.file_count(), 3);
        assert_eq!(model.match_count(), 3);
        assert_eq!(model.files_with_matches(), 2);
        assert_eq!(model.files[0].matches[1].line_number, 3);
    }

    #[test]
    fn test_model_merges_duplicate_paths() {
        let first = file_result("/logs/a.log", &[(1, "foo"), (5, "foo")]);
        let other = file_result("/logs/b.log", &[(2, "foo")]);
        let again = file_result("/logs/a.log", &[(1, "foo")]);

        // completion order differs from request order
        let model = ResultModel::build(vec![(2, &again), (1, &other), (0, &first)]);
        assert_eq!(model.file_count(), 2);
        assert_eq!(model.match_count(), 4);
        assert_eq!(model.files[0].file_path, Path::new("/logs/a.log"));
        let lines: Vec<usize> = model.files[0].matches.iter().map(|m| m.line_number).collect();
        assert_eq!(lines, vec![1, 5, 1]);
    }

    #[test]
    fn test_rows_carry_navigation_data() {
        let a = file_result("/logs/a.log", &[(4, "x")]);
        let b = file_result("/logs/b.log", &[(7, "y"), (9, "z")]);
        let model = ResultModel::build(vec![(0, &a), (1, &b)]);

        let rows: Vec<_> = model.rows().collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].file_name, "a.log");
        assert_eq!(rows[0].line_number, 4);
        assert_eq!(rows[2].file_path, Path::new("/logs/b.log"));
        assert_eq!(rows[2].line_content, "z");
        assert!(model.file(Path::new("/logs/b.log")).is_some());
        assert!(model.file(Path::new("/logs/missing.log")).is_none());
    }

    #[test]
    fn test_empty_model() {
        let model = ResultModel::build(Vec::new());
        assert!(model.is_empty());
        assert_eq!(model.match_count(), 0);
        assert_eq!(model.rows().count(), 0);
    }
}
