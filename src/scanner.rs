/// Recursive, side-effect-free discovery of candidate files.
///
/// A scan never descends into the quarantine area and never returns the
/// ledger file (or its temporary twin), so operations on the active tree
/// cannot rediscover quarantined files or their own history.
use crate::config::CompiledFilters;
use std::path::{Component, Path, PathBuf};
use tracing::warn;
use walkdir::{DirEntry, WalkDir};

/// Name of the reserved directory, directly under the root, that holds
/// quarantined files.
pub const QUARANTINE_DIR_NAME: &str = "__dirward_quarantine__";

/// Which files a scan selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanPredicate {
    /// File names ending with the given literal suffix (case-sensitive).
    Suffix(String),
    /// Every file.
    Any,
}

impl ScanPredicate {
    pub fn suffix(suffix: impl Into<String>) -> Self {
        ScanPredicate::Suffix(suffix.into())
    }

    pub fn matches(&self, file_name: &str) -> bool {
        match self {
            ScanPredicate::Suffix(suffix) => file_name.ends_with(suffix.as_str()),
            ScanPredicate::Any => true,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ScanPredicate::Suffix(suffix) => format!("*{}", suffix),
            ScanPredicate::Any => "*".to_string(),
        }
    }
}

/// The sorted set of paths a scan produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateSet {
    paths: Vec<PathBuf>,
}

impl CandidateSet {
    pub fn from_paths(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        self.paths.iter()
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn into_paths(self) -> Vec<PathBuf> {
        self.paths
    }
}

/// Walks a processing root.
#[derive(Debug, Clone)]
pub struct Scanner {
    root: PathBuf,
    quarantine_root: PathBuf,
    excluded_files: Vec<PathBuf>,
    filters: CompiledFilters,
}

impl Scanner {
    /// Creates a scanner for `root` applying `filters`.
    pub fn new(root: impl Into<PathBuf>, filters: CompiledFilters) -> Self {
        let root = root.into();
        Self {
            quarantine_root: root.join(QUARANTINE_DIR_NAME),
            root,
            excluded_files: Vec::new(),
            filters,
        }
    }

    /// Never return `path`, wherever it is under the root.
    pub fn exclude_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.excluded_files.push(path.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn quarantine_root(&self) -> &Path {
        &self.quarantine_root
    }

    /// Returns every file under the root accepted by `predicate` and the
    /// configured filters, sorted by path.
    pub fn scan(&self, predicate: &ScanPredicate) -> CandidateSet {
        let mut paths: Vec<PathBuf> = self
            .walk_active_tree()
            .filter(|entry| predicate.matches(&entry.file_name().to_string_lossy()))
            .map(|entry| entry.into_path())
            .collect();
        paths.sort();
        CandidateSet::from_paths(paths)
    }

    /// Every accepted file of the active tree, in walk order.
    ///
    /// Exposed for passes that need to group files by directory.
    pub fn walk_active_tree(&self) -> impl Iterator<Item = DirEntry> + '_ {
        WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| entry.path() != self.quarantine_root.as_path())
            .filter_map(|result| match result {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry during scan");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter(move |entry| !self.excluded_files.iter().any(|p| p == entry.path()))
            .filter(move |entry| {
                let relative = entry.path().strip_prefix(&self.root).unwrap_or(entry.path());
                self.filters.should_include(relative)
            })
    }

    /// Lists every file currently in the quarantine area, sorted.
    ///
    /// Configured filters do not apply here: everything quarantined is listed.
    pub fn scan_quarantine(&self) -> CandidateSet {
        if !self.quarantine_root.is_dir() {
            return CandidateSet::default();
        }
        let mut paths: Vec<PathBuf> = WalkDir::new(&self.quarantine_root)
            .into_iter()
            .filter_map(|result| match result {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable quarantine entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect();
        paths.sort();
        CandidateSet::from_paths(paths)
    }

    /// True when `path` lies inside the quarantine area. Paths with `..`
    /// components never do.
    pub fn is_quarantined_path(&self, path: &Path) -> bool {
        path.starts_with(&self.quarantine_root) && !path.components().any(|c| c == Component::ParentDir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, rel).unwrap();
        path
    }

    #[test]
    fn test_suffix_scan_is_recursive_and_sorted() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        touch(root, "b.txt");
        touch(root, "a.txt");
        touch(root, "nested/deeper/c.txt");
        touch(root, "nested/d.log");

        let scanner = Scanner::new(root, CompiledFilters::default());
        let found = scanner.scan(&ScanPredicate::suffix(".txt"));

        assert_eq!(
            found.paths(),
            &[
                root.join("a.txt"),
                root.join("b.txt"),
                root.join("nested/deeper/c.txt"),
            ]
        );
    }

    #[test]
    fn test_scan_skips_quarantine_area_and_ledger() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        touch(root, "keep.json");
        touch(root, &format!("{}/old.json", QUARANTINE_DIR_NAME));
        let ledger = touch(root, "ledger.json");

        let scanner =
            Scanner::new(root, CompiledFilters::permissive()).exclude_file(ledger.clone());
        let found = scanner.scan(&ScanPredicate::suffix(".json"));

        assert_eq!(found.paths(), &[root.join("keep.json")]);
        assert!(found.iter().all(|p| !scanner.is_quarantined_path(p)));
    }

    #[test]
    fn test_nested_dir_with_reserved_name_is_not_skipped() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        let nested = touch(root, &format!("album/{}/x.jpg", QUARANTINE_DIR_NAME));

        let scanner = Scanner::new(root, CompiledFilters::default());
        assert_eq!(scanner.scan(&ScanPredicate::Any).paths(), &[nested]);
    }

    #[test]
    fn test_repeated_scans_are_identical() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        for rel in ["z.jpg", "a/b.jpg", "a/c.png", "m.jpg"] {
            touch(root, rel);
        }

        let scanner = Scanner::new(root, CompiledFilters::default());
        let first = scanner.scan(&ScanPredicate::suffix(".jpg"));
        let second = scanner.scan(&ScanPredicate::suffix(".jpg"));
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn test_filters_apply_relative_to_root() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        touch(root, "node_modules/pkg/a.js");
        touch(root, "src/a.js");
        touch(root, ".hidden.js");

        let config = crate::config::AppConfig {
            filters: crate::config::FilterRules {
                exclude: crate::config::ExcludeRules {
                    patterns: vec!["node_modules/**".to_string()],
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        };
        let scanner = Scanner::new(root, config.compile_filters().unwrap());

        assert_eq!(
            scanner.scan(&ScanPredicate::suffix(".js")).paths(),
            &[root.join("src/a.js")]
        );
    }

    #[test]
    fn test_scan_quarantine_lists_everything() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        let scanner = Scanner::new(root, CompiledFilters::default());
        assert!(scanner.scan_quarantine().is_empty());

        let a = touch(root, &format!("{}/x/.hidden", QUARANTINE_DIR_NAME));
        let b = touch(root, &format!("{}/y.jpg", QUARANTINE_DIR_NAME));
        let listed = scanner.scan_quarantine();
        assert_eq!(listed.len(), 2);
        assert!(listed.paths().contains(&a));
        assert!(listed.paths().contains(&b));
    }
}
