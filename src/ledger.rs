/// The append-only operation ledger.
///
/// Every lifecycle transition is recorded as a [`LedgerEntry`] in a JSON
/// array on disk. The file is rewritten wholesale on each append (read full,
/// extend, write full) under a process-wide lock keyed by its path, and the
/// write goes through a temporary file plus rename so a reader never sees a
/// partial record.
///
/// Reading is permissive: a missing store is an empty history, and a store
/// that cannot be parsed is surfaced as [`LedgerState::Unavailable`] rather
/// than as an error, so callers keep working without history. Single
/// records that do not parse are skipped on read but kept on disk.
use crate::error::{LifecycleError, LifecycleResult};
use crate::hasher::ContentHash;
use chrono::{Local, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use tracing::{debug, warn};

/// On-disk timestamp format of the `fecha` field.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The kind of transition a ledger entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "renombrado")]
    Renamed,
    #[serde(rename = "revertido")]
    Reverted,
    #[serde(rename = "cuarentena")]
    Quarantined,
    #[serde(rename = "restaurado")]
    Restored,
    #[serde(rename = "purgado")]
    Purged,
    #[serde(rename = "eliminado")]
    Deleted,
}

impl Action {
    /// Short English label used in terminal output.
    pub fn label(&self) -> &'static str {
        match self {
            Action::Renamed => "renamed",
            Action::Reverted => "reverted",
            Action::Quarantined => "quarantined",
            Action::Restored => "restored",
            Action::Purged => "purged",
            Action::Deleted => "deleted",
        }
    }
}

/// An entry that has not been written yet and so carries no timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub action: Action,
    pub source_path: Option<PathBuf>,
    pub dest_path: Option<PathBuf>,
    pub quarantine_path: Option<PathBuf>,
    pub content_hash: Option<ContentHash>,
}

impl PendingEntry {
    pub fn new(action: Action, content_hash: ContentHash) -> Self {
        Self {
            action,
            source_path: None,
            dest_path: None,
            quarantine_path: None,
            content_hash: Some(content_hash),
        }
    }

    pub fn source(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_path = Some(path.into());
        self
    }

    pub fn dest(mut self, path: impl Into<PathBuf>) -> Self {
        self.dest_path = Some(path.into());
        self
    }

    pub fn quarantine(mut self, path: impl Into<PathBuf>) -> Self {
        self.quarantine_path = Some(path.into());
        self
    }

    fn stamp(self, timestamp: NaiveDateTime) -> LedgerEntry {
        LedgerEntry {
            action: self.action,
            source_path: self.source_path,
            dest_path: self.dest_path,
            quarantine_path: self.quarantine_path,
            content_hash: self.content_hash,
            timestamp,
        }
    }
}

/// An immutable record of one transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    #[serde(rename = "accion")]
    pub action: Action,
    #[serde(
        rename = "archivo_original",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub source_path: Option<PathBuf>,
    #[serde(
        rename = "archivo_nuevo",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub dest_path: Option<PathBuf>,
    #[serde(
        rename = "archivo_cuarentena",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub quarantine_path: Option<PathBuf>,
    #[serde(rename = "hash", default)]
    pub content_hash: Option<ContentHash>,
    #[serde(rename = "fecha", with = "fecha_format")]
    pub timestamp: NaiveDateTime,
}

mod fecha_format {
    use super::TIMESTAMP_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.format(TIMESTAMP_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT).map_err(serde::de::Error::custom)
    }
}

/// What was found when the backing store was read.
#[derive(Debug, Clone)]
pub enum LedgerState {
    /// No ledger file exists yet.
    Missing,
    /// The ledger parsed; `skipped_records` counts array items that did not.
    Loaded {
        entries: Vec<LedgerEntry>,
        skipped_records: usize,
    },
    /// The file exists but is unreadable or not a JSON array.
    Unavailable { reason: String },
}

impl LedgerState {
    /// The recorded history, oldest first. Empty unless `Loaded`.
    pub fn entries(&self) -> &[LedgerEntry] {
        match self {
            LedgerState::Loaded { entries, .. } => entries,
            LedgerState::Missing | LedgerState::Unavailable { .. } => &[],
        }
    }

    pub fn into_entries(self) -> Vec<LedgerEntry> {
        match self {
            LedgerState::Loaded { entries, .. } => entries,
            LedgerState::Missing | LedgerState::Unavailable { .. } => Vec::new(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, LedgerState::Unavailable { .. })
    }

    /// Scans from the newest entry backward and returns the first match.
    pub fn find_latest<P>(&self, predicate: P) -> Option<&LedgerEntry>
    where
        P: Fn(&LedgerEntry) -> bool,
    {
        self.entries().iter().rev().find(|entry| predicate(entry))
    }

    /// Converts an `Unavailable` state into the matching error, for reporting.
    pub fn unavailable_error(&self, path: &Path) -> Option<LifecycleError> {
        match self {
            LedgerState::Unavailable { reason } => Some(LifecycleError::LedgerUnavailable {
                path: path.to_path_buf(),
                reason: reason.clone(),
            }),
            _ => None,
        }
    }
}

/// Handle to a ledger file.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the temporary file used while rewriting the ledger.
    pub fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Reads the backing store into an explicit state.
    pub fn load(&self) -> LedgerState {
        let records = match self.read_records() {
            Ok(Some(records)) => records,
            Ok(None) => return LedgerState::Missing,
            Err(reason) => {
                warn!(path = %self.path.display(), %reason, "ledger unavailable, continuing without history");
                return LedgerState::Unavailable { reason };
            }
        };

        let mut entries = Vec::with_capacity(records.len());
        let mut skipped_records = 0;
        for (index, record) in records.into_iter().enumerate() {
            match serde_json::from_value::<LedgerEntry>(record) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    debug!(index, error = %e, "skipping unparsable ledger record");
                    skipped_records += 1;
                }
            }
        }
        if skipped_records > 0 {
            warn!(path = %self.path.display(), skipped_records, "some ledger records could not be parsed");
        }

        LedgerState::Loaded {
            entries,
            skipped_records,
        }
    }

    /// The raw records of the store: `None` when it does not exist, an error
    /// message when it cannot be read or is not a JSON array.
    fn read_records(&self) -> Result<Option<Vec<Value>>, String> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.to_string()),
        };
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Array(records)) => Ok(Some(records)),
            Ok(_) => Err("top-level value is not an array".to_string()),
            Err(e) => Err(format!("JSON parse error: {}", e)),
        }
    }

    /// Returns the full history, oldest first. Never fails.
    pub fn read_all(&self) -> Vec<LedgerEntry> {
        self.load().into_entries()
    }

    /// Scans from the newest entry backward and returns the first match.
    pub fn find_latest<P>(&self, predicate: P) -> Option<LedgerEntry>
    where
        P: Fn(&LedgerEntry) -> bool,
    {
        self.load().find_latest(predicate).cloned()
    }

    /// Appends a batch of entries, all stamped with the same local time.
    ///
    /// Concurrent appends to the same ledger path are serialized. When the
    /// existing store is corrupt it is set aside as
    /// `<name>.corrupt-<timestamp>` before the new log is written, so no
    /// history is thrown away.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::LedgerWrite`] when the new log cannot be
    /// serialized or written.
    pub fn append(&self, pending: Vec<PendingEntry>) -> LifecycleResult<Vec<LedgerEntry>> {
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let lock = lock_for(&self.path);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        // Sub-second precision is not persisted.
        let now = Local::now().naive_local();
        let now = now.with_nanosecond(0).unwrap_or(now);

        // Records this version cannot parse are carried over untouched.
        let mut records = match self.read_records() {
            Ok(records) => records.unwrap_or_default(),
            Err(reason) => {
                self.preserve_corrupt(&reason)?;
                Vec::new()
            }
        };

        let stamped: Vec<LedgerEntry> = pending.into_iter().map(|p| p.stamp(now)).collect();
        for entry in &stamped {
            records.push(serde_json::to_value(entry).map_err(|e| self.write_error(e))?);
        }

        let json = serde_json::to_string_pretty(&records).map_err(|e| self.write_error(e))?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| self.write_error(e))?;
        }
        let temp_path = self.temp_path();
        fs::write(&temp_path, json).map_err(|e| self.write_error(e))?;
        fs::rename(&temp_path, &self.path).map_err(|e| self.write_error(e))?;

        debug!(path = %self.path.display(), appended = stamped.len(), total = records.len(), "ledger appended");
        Ok(stamped)
    }

    fn preserve_corrupt(&self, reason: &str) -> LifecycleResult<()> {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".corrupt-{}", Local::now().format("%Y%m%d-%H%M%S")));
        let backup = self.path.with_file_name(name);
        warn!(
            path = %self.path.display(),
            backup = %backup.display(),
            reason,
            "setting corrupt ledger aside before appending"
        );
        fs::rename(&self.path, &backup).map_err(|e| self.write_error(e))
    }

    fn write_error(&self, e: impl std::fmt::Display) -> LifecycleError {
        LifecycleError::LedgerWrite {
            path: self.path.clone(),
            reason: e.to_string(),
        }
    }
}

/// Returns the lock guarding read-modify-write cycles on `path`.
fn lock_for(path: &Path) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    let mut locks = LOCKS
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    locks.entry(path.to_path_buf()).or_default().clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::hash_reader;
    use tempfile::TempDir;

    fn digest(content: &str) -> ContentHash {
        hash_reader(content.as_bytes()).unwrap()
    }

    #[test]
    fn test_missing_ledger_reads_empty() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let ledger = Ledger::new(temp_dir.path().join("ledger.json"));

        assert!(matches!(ledger.load(), LedgerState::Missing));
        assert!(ledger.read_all().is_empty());
        assert!(ledger.find_latest(|_| true).is_none());
    }

    #[test]
    fn test_append_preserves_order_and_shares_timestamp() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let ledger = Ledger::new(temp_dir.path().join("ledger.json"));

        ledger
            .append(vec![
                PendingEntry::new(Action::Renamed, digest("a")).source("/r/a.txt").dest("/r/a.bak"),
                PendingEntry::new(Action::Renamed, digest("b")).source("/r/b.txt").dest("/r/b.bak"),
            ])
            .unwrap();
        ledger
            .append(vec![PendingEntry::new(Action::Deleted, digest("c")).source("/r/c.txt")])
            .unwrap();

        let entries = ledger.read_all();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].source_path, Some(PathBuf::from("/r/a.txt")));
        assert_eq!(entries[1].source_path, Some(PathBuf::from("/r/b.txt")));
        assert_eq!(entries[2].action, Action::Deleted);
        assert_eq!(entries[0].timestamp, entries[1].timestamp);
    }

    #[test]
    fn test_earlier_entries_unchanged_by_later_appends() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let ledger = Ledger::new(temp_dir.path().join("ledger.json"));

        let first = ledger
            .append(vec![PendingEntry::new(Action::Quarantined, digest("x"))
                .source("/r/x")
                .quarantine("/r/q/x")])
            .unwrap();
        ledger
            .append(vec![PendingEntry::new(Action::Purged, digest("x")).quarantine("/r/q/x")])
            .unwrap();

        assert_eq!(ledger.read_all()[0], first[0]);
    }

    #[test]
    fn test_find_latest_scans_from_tail() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let ledger = Ledger::new(temp_dir.path().join("ledger.json"));

        ledger
            .append(vec![PendingEntry::new(Action::Quarantined, digest("old"))
                .source("/r/old")
                .quarantine("/r/q/f")])
            .unwrap();
        ledger
            .append(vec![PendingEntry::new(Action::Quarantined, digest("new"))
                .source("/r/new")
                .quarantine("/r/q/f")])
            .unwrap();

        let latest = ledger
            .find_latest(|e| e.quarantine_path.as_deref() == Some(Path::new("/r/q/f")))
            .unwrap();
        assert_eq!(latest.source_path, Some(PathBuf::from("/r/new")));
    }

    #[test]
    fn test_corrupt_ledger_is_unavailable_and_preserved_on_append() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("ledger.json");
        fs::write(&path, "{ not json").unwrap();
        let ledger = Ledger::new(&path);

        let state = ledger.load();
        assert!(state.is_unavailable());
        assert!(state.entries().is_empty());
        assert!(matches!(
            state.unavailable_error(&path),
            Some(LifecycleError::LedgerUnavailable { .. })
        ));

        ledger
            .append(vec![PendingEntry::new(Action::Deleted, digest("d")).source("/r/d")])
            .unwrap();
        assert_eq!(ledger.read_all().len(), 1);

        let backups = fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".corrupt-"))
            .count();
        assert_eq!(backups, 1);
    }

    #[test]
    fn test_wire_format_uses_original_field_names() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("ledger.json");
        let ledger = Ledger::new(&path);
        ledger
            .append(vec![PendingEntry::new(Action::Renamed, digest("w"))
                .source("/r/w.txt")
                .dest("/r/w.bak")])
            .unwrap();

        let raw: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let record = &raw[0];
        assert_eq!(record["accion"], "renombrado");
        assert_eq!(record["archivo_original"], "/r/w.txt");
        assert_eq!(record["archivo_nuevo"], "/r/w.bak");
        assert!(record.get("archivo_cuarentena").is_none());
        assert_eq!(record["hash"], digest("w").to_hex());
        let fecha = record["fecha"].as_str().unwrap();
        assert!(NaiveDateTime::parse_from_str(fecha, TIMESTAMP_FORMAT).is_ok());
    }

    #[test]
    fn test_unparsable_record_is_skipped_not_fatal() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("ledger.json");
        fs::write(
            &path,
            r#"[
                {"accion": "renombrado", "archivo_original": "/a", "archivo_nuevo": "/b", "hash": null, "fecha": "2024-01-15 13:45:22"},
                {"accion": "desconocido", "fecha": "2024-01-15 13:45:22"}
            ]"#,
        )
        .unwrap();

        match Ledger::new(&path).load() {
            LedgerState::Loaded {
                entries,
                skipped_records,
            } => {
                assert_eq!(entries.len(), 1);
                assert_eq!(skipped_records, 1);
                assert_eq!(entries[0].content_hash, None);
            }
            other => panic!("unexpected state: {:?}", other),
        }
    }

    #[test]
    fn test_append_keeps_unparsable_records() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("ledger.json");
        fs::write(
            &path,
            r#"[
                {"accion": "renombrado", "archivo_original": "/a", "archivo_nuevo": "/b", "hash": null, "fecha": "2024-01-15 13:45:22"},
                {"accion": "movido", "archivo_original": "/c", "fecha": "2024-01-15 13:45:22"}
            ]"#,
        )
        .unwrap();

        let ledger = Ledger::new(&path);
        let hash = hash_reader("d".as_bytes()).unwrap();
        ledger
            .append(vec![PendingEntry::new(Action::Deleted, hash).source("/d")])
            .unwrap();

        let raw: Vec<Value> = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw.len(), 3);
        assert_eq!(raw[1]["accion"], "movido");
        assert_eq!(raw[1]["archivo_original"], "/c");
        assert_eq!(raw[2]["accion"], "eliminado");

        let entries = ledger.read_all();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].action, Action::Deleted);
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_concurrent_appends_lose_nothing() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("ledger.json");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ledger = Ledger::new(&path);
                std::thread::spawn(move || {
                    ledger
                        .append(vec![PendingEntry::new(Action::Deleted, digest(&i.to_string()))
                            .source(format!("/r/{}", i))])
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(Ledger::new(&path).read_all().len(), 8);
    }
}
