//! Browsing the ledger: text filtering, one-line rendering and export.

use crate::error::{LifecycleError, LifecycleResult};
use crate::ledger::{Ledger, LedgerEntry, LedgerState, TIMESTAMP_FORMAT};
use std::fs;
use std::path::{Path, PathBuf};

/// A snapshot of the ledger for display.
#[derive(Debug, Clone)]
pub struct HistoryView {
    entries: Vec<LedgerEntry>,
    skipped_records: usize,
    unavailable: Option<String>,
}

impl HistoryView {
    pub fn load(ledger: &Ledger) -> Self {
        match ledger.load() {
            LedgerState::Missing => Self::from_entries(Vec::new()),
            LedgerState::Loaded {
                entries,
                skipped_records,
            } => Self {
                entries,
                skipped_records,
                unavailable: None,
            },
            LedgerState::Unavailable { reason } => Self {
                entries: Vec::new(),
                skipped_records: 0,
                unavailable: Some(reason),
            },
        }
    }

    pub fn from_entries(entries: Vec<LedgerEntry>) -> Self {
        Self {
            entries,
            skipped_records: 0,
            unavailable: None,
        }
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn skipped_records(&self) -> usize {
        self.skipped_records
    }

    /// Why the ledger could not be read, if it could not.
    pub fn unavailable(&self) -> Option<&str> {
        self.unavailable.as_deref()
    }

    /// Entries whose text contains `query`, case-insensitively, oldest
    /// first. An empty query matches everything.
    pub fn filter(&self, query: &str) -> Vec<&LedgerEntry> {
        let query = query.trim().to_lowercase();
        self.entries
            .iter()
            .filter(|entry| query.is_empty() || searchable_text(entry).contains(&query))
            .collect()
    }

    /// Filtered entries as display lines.
    pub fn render(&self, query: &str) -> Vec<String> {
        self.filter(query).into_iter().map(format_entry).collect()
    }

    /// Writes the filtered lines to `path` and returns how many were written.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::ReportWrite`] if the file cannot be written.
    pub fn export(&self, query: &str, path: &Path) -> LifecycleResult<usize> {
        let lines = self.render(query);
        let mut text = lines.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        fs::write(path, text).map_err(|source| LifecycleError::ReportWrite {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(lines.len())
    }
}

/// Renders `[date] ACTION | source → target | HASH: hex`.
pub fn format_entry(entry: &LedgerEntry) -> String {
    let mut line = format!(
        "[{}] {} | {}",
        entry.timestamp.format(TIMESTAMP_FORMAT),
        entry.action.label().to_uppercase(),
        display(entry.source_path.as_ref().or(entry.quarantine_path.as_ref()))
    );
    let target = match (&entry.dest_path, &entry.quarantine_path) {
        (Some(dest), _) => Some(dest),
        (None, Some(quarantine)) if entry.source_path.is_some() => Some(quarantine),
        _ => None,
    };
    if let Some(target) = target {
        line.push_str(&format!(" → {}", target.display()));
    }
    let hash = entry
        .content_hash
        .map(|h| h.to_hex())
        .unwrap_or_default();
    line.push_str(&format!(" | HASH: {}", hash));
    line
}

fn display(path: Option<&PathBuf>) -> String {
    path.map(|p| p.display().to_string()).unwrap_or_default()
}

fn searchable_text(entry: &LedgerEntry) -> String {
    let wire_action = serde_json::to_value(entry.action)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    format!(
        "{} {} {} {} {} {} {}",
        wire_action,
        entry.action.label(),
        display(entry.source_path.as_ref()),
        display(entry.dest_path.as_ref()),
        display(entry.quarantine_path.as_ref()),
        entry.timestamp.format(TIMESTAMP_FORMAT),
        entry.content_hash.map(|h| h.to_hex()).unwrap_or_default()
    )
    .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::hash_reader;
    use crate::ledger::{Action, PendingEntry};
    use tempfile::TempDir;

    fn sample_ledger(dir: &Path) -> Ledger {
        let ledger = Ledger::new(dir.join("ledger.json"));
        let hash = hash_reader("content".as_bytes()).unwrap();
        ledger
            .append(vec![
                PendingEntry::new(Action::Renamed, hash)
                    .source("/photos/a.txt")
                    .dest("/photos/a.bak"),
                PendingEntry::new(Action::Quarantined, hash)
                    .source("/photos/b.jpg")
                    .quarantine("/photos/q/b.jpg"),
                PendingEntry::new(Action::Purged, hash).quarantine("/photos/q/b.jpg"),
            ])
            .unwrap();
        ledger
    }

    #[test]
    fn test_format_entry() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let view = HistoryView::load(&sample_ledger(temp_dir.path()));
        let lines = view.render("");
        let hex = hash_reader("content".as_bytes()).unwrap().to_hex();

        assert!(lines[0].ends_with(&format!("RENAMED | /photos/a.txt → /photos/a.bak | HASH: {}", hex)));
        assert!(lines[0].starts_with('['));
        assert!(lines[1].contains("QUARANTINED | /photos/b.jpg → /photos/q/b.jpg"));
        assert!(lines[2].contains("PURGED | /photos/q/b.jpg | HASH:"));
    }

    #[test]
    fn test_filter_is_case_insensitive_and_matches_both_vocabularies() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let view = HistoryView::load(&sample_ledger(temp_dir.path()));

        assert_eq!(view.filter("B.JPG").len(), 2);
        assert_eq!(view.filter("renombrado").len(), 1);
        assert_eq!(view.filter("renamed").len(), 1);
        assert_eq!(view.filter("  ").len(), 3);
        assert!(view.filter("nothing-like-this").is_empty());
    }

    #[test]
    fn test_export_writes_filtered_lines() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let view = HistoryView::load(&sample_ledger(temp_dir.path()));
        let out = temp_dir.path().join("history.txt");

        assert_eq!(view.export("purg", &out).unwrap(), 1);
        let text = fs::read_to_string(&out).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("PURGED"));
    }

    #[test]
    fn test_unavailable_ledger_is_reported() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("ledger.json");
        fs::write(&path, "42").unwrap();

        let view = HistoryView::load(&Ledger::new(&path));
        assert!(view.entries().is_empty());
        assert!(view.unavailable().is_some());
    }
}
