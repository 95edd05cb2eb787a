//! Write-Ahead Log (C2) — append-only, fsync'd, JSON-lines record of every
//! operation's lifecycle, so a crash between steps can be replayed.
//!
//! Adapted from `original_source/server/session/wal.py`'s `WriteAheadLog`,
//! but with real rotation/append durability routed through
//! [`crate::io::append_locked`] and [`crate::io::atomic_write`] rather than
//! the teacher's in-memory-only `snapshot/journal.rs` shape.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::WalError;
use crate::io::{append_locked, atomic_write};
use crate::time::now_iso;
use crate::value::Value;

/// The kind of a WAL record. See module docs for how BEGIN/terminal records
/// pair up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalEntryType {
    Begin,
    Data,
    Commit,
    Rollback,
    Checkpoint,
}

/// One WAL record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    pub sequence: u64,
    pub entry_type: WalEntryType,
    pub op_id: String,
    pub timestamp: String,
    pub data: Value,
}

const CHECKPOINT_OP_ID: &str = "_checkpoint";

/// One in-flight operation discovered by [`WriteAheadLog::uncommitted_operations`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UncommittedOperation {
    pub op_id: String,
    pub sequence: u64,
    pub timestamp: String,
    pub op_type: Option<String>,
    pub args: Option<Value>,
}

/// Aggregate counts returned by [`WriteAheadLog::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct WalStats {
    pub session_id: String,
    pub current_sequence: u64,
    pub total_entries: usize,
    pub begin_count: usize,
    pub data_count: usize,
    pub commit_count: usize,
    pub rollback_count: usize,
    pub checkpoint_count: usize,
    pub uncommitted_count: usize,
    pub file_size_bytes: u64,
    pub entries_since_checkpoint: u64,
}

/// C2: the per-session write-ahead log.
pub struct WriteAheadLog {
    session_id: Option<String>,
    current_file: Option<PathBuf>,
    wal_dir: Option<PathBuf>,
    max_size_bytes: u64,
    checkpoint_interval: u64,
    sequence: u64,
    entries_since_checkpoint: u64,
}

impl WriteAheadLog {
    pub fn new() -> Self {
        WriteAheadLog {
            session_id: None,
            current_file: None,
            wal_dir: None,
            max_size_bytes: 10 * 1024 * 1024,
            checkpoint_interval: 100,
            sequence: 0,
            entries_since_checkpoint: 0,
        }
    }

    /// Start or resume logging for `session_id`, picking up the sequence
    /// counter from the most recent rotated file if one exists.
    pub fn start_session(&mut self, config: &EngineConfig, session_id: &str) -> Result<(), WalError> {
        self.max_size_bytes = config.max_wal_size_bytes;
        self.checkpoint_interval = config.wal_checkpoint_interval;
        self.wal_dir = Some(config.wal_dir());

        let existing = find_latest_wal(config, session_id)?;
        let (file, seq) = match existing {
            Some(path) => {
                let seq = last_sequence(&path);
                (path, seq)
            }
            None => (config.wal_path(session_id, 0), 0),
        };

        self.session_id = Some(session_id.to_string());
        self.current_file = Some(file);
        self.sequence = seq;
        self.entries_since_checkpoint = 0;
        Ok(())
    }

    fn session_id(&self) -> Result<&str, WalError> {
        self.session_id
            .as_deref()
            .ok_or_else(|| WalError::NotFound("<no active session>".into()))
    }

    fn append(&mut self, entry_type: WalEntryType, op_id: &str, data: Value) -> Result<u64, WalError> {
        let sid = self.session_id()?.to_string();
        self.sequence += 1;
        let entry = WalEntry {
            sequence: self.sequence,
            entry_type,
            op_id: op_id.to_string(),
            timestamp: now_iso(),
            data,
        };
        let line = serde_json::to_vec(&entry).map_err(|e| WalError::Durability {
            session_id: sid.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;

        let path = self.current_file.clone().expect("session started");
        let projected = path.metadata().map(|m| m.len()).unwrap_or(0) + line.len() as u64 + 1;
        if projected > self.max_size_bytes {
            self.rotate(&sid)?;
        }

        let path = self.current_file.clone().expect("session started");
        append_locked(&path, &line).map_err(|e| WalError::Durability {
            session_id: sid.clone(),
            source: e,
        })?;

        self.entries_since_checkpoint += 1;
        if entry_type != WalEntryType::Checkpoint && self.entries_since_checkpoint >= self.checkpoint_interval {
            self.write_checkpoint(Value::Null)?;
        }
        Ok(self.sequence)
    }

    fn rotate(&mut self, session_id: &str) -> Result<(), WalError> {
        let dir = self.wal_dir.clone().expect("session started");
        let prefix = format!("wal_{}.", session_id);
        let count = std::fs::read_dir(&dir)
            .map(|rd| {
                rd.filter_map(|e| e.ok())
                    .filter(|e| {
                        let name = e.file_name().to_string_lossy().to_string();
                        if !name.starts_with(&prefix) || !name.ends_with(".log") {
                            return false;
                        }
                        name[prefix.len()..name.len() - 4].parse::<u32>().is_ok()
                    })
                    .count()
            })
            .unwrap_or(0);
        let next_index = (count as u32) + 1;
        self.current_file = Some(dir.join(format!("wal_{}.{}.log", session_id, next_index)));
        self.write_checkpoint(Value::Null)
    }

    pub fn log_begin(&mut self, op_id: &str, op_type: &str, args: Value) -> Result<u64, WalError> {
        let mut map = std::collections::BTreeMap::new();
        map.insert("op_type".to_string(), Value::from(op_type));
        map.insert("args".to_string(), args);
        self.append(WalEntryType::Begin, op_id, Value::Map(map))
    }

    pub fn log_data(&mut self, op_id: &str, key: &str, value: Value) -> Result<u64, WalError> {
        let mut map = std::collections::BTreeMap::new();
        map.insert(key.to_string(), value);
        self.append(WalEntryType::Data, op_id, Value::Map(map))
    }

    pub fn log_commit(&mut self, op_id: &str, result: Value) -> Result<u64, WalError> {
        let mut map = std::collections::BTreeMap::new();
        map.insert("result".to_string(), result);
        self.append(WalEntryType::Commit, op_id, Value::Map(map))
    }

    pub fn log_rollback(&mut self, op_id: &str, error: &str) -> Result<u64, WalError> {
        let mut map = std::collections::BTreeMap::new();
        map.insert("error".to_string(), Value::from(error));
        self.append(WalEntryType::Rollback, op_id, Value::Map(map))
    }

    pub fn write_checkpoint(&mut self, state: Value) -> Result<u64, WalError> {
        let sid = self.session_id()?.to_string();
        self.sequence += 1;
        let data = if state.is_null() {
            let mut m = std::collections::BTreeMap::new();
            m.insert("checkpoint_seq".to_string(), Value::Int(self.sequence as i64));
            Value::Map(m)
        } else {
            state
        };
        let entry = WalEntry {
            sequence: self.sequence,
            entry_type: WalEntryType::Checkpoint,
            op_id: CHECKPOINT_OP_ID.to_string(),
            timestamp: now_iso(),
            data,
        };
        let line = serde_json::to_vec(&entry).map_err(|e| WalError::Durability {
            session_id: sid.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;
        let path = self.current_file.clone().expect("session started");
        append_locked(&path, &line).map_err(|e| WalError::Durability { session_id: sid, source: e })?;
        self.entries_since_checkpoint = 0;
        Ok(self.sequence)
    }

    /// All session WAL files in write order: the base file first (it is
    /// the oldest segment, written before any rotation), then numbered
    /// rotated siblings ascending.
    fn all_files(&self) -> Vec<PathBuf> {
        let dir = match &self.wal_dir {
            Some(d) => d,
            None => return Vec::new(),
        };
        let sid = match &self.session_id {
            Some(s) => s,
            None => return Vec::new(),
        };
        let mut numbered: Vec<(u32, PathBuf)> = std::fs::read_dir(dir)
            .map(|rd| {
                rd.filter_map(|e| e.ok())
                    .filter_map(|e| {
                        let name = e.file_name().to_string_lossy().to_string();
                        let prefix = format!("wal_{}.", sid);
                        if !name.starts_with(&prefix) || !name.ends_with(".log") {
                            return None;
                        }
                        let middle = &name[prefix.len()..name.len() - 4];
                        middle.parse::<u32>().ok().map(|n| (n, e.path()))
                    })
                    .collect()
            })
            .unwrap_or_default();
        numbered.sort_by_key(|(n, _)| *n);
        let base = dir.join(format!("wal_{}.log", sid));
        let mut files = Vec::with_capacity(numbered.len() + 1);
        if base.exists() {
            files.push(base);
        }
        files.extend(numbered.into_iter().map(|(_, p)| p));
        files
    }

    /// Entries with sequence greater than `from_sequence`, oldest first,
    /// optionally filtered to one set of entry types. Unparsable lines are
    /// logged and skipped rather than aborting recovery.
    pub fn read_entries(&self, from_sequence: u64, types: Option<&[WalEntryType]>) -> Vec<WalEntry> {
        let mut out = Vec::new();
        for path in self.all_files() {
            let content = match std::fs::read_to_string(&path) {
                Ok(c) => c,
                Err(_) => continue,
            };
            for (lineno, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<WalEntry>(line) {
                    Ok(entry) => {
                        if entry.sequence <= from_sequence {
                            continue;
                        }
                        if let Some(types) = types {
                            if !types.contains(&entry.entry_type) {
                                continue;
                            }
                        }
                        out.push(entry);
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            line = lineno + 1,
                            error = %e,
                            "skipping malformed wal record"
                        );
                    }
                }
            }
        }
        out
    }

    /// Operations with a BEGIN record but no matching COMMIT/ROLLBACK,
    /// ordered by sequence.
    pub fn uncommitted_operations(&self) -> Vec<UncommittedOperation> {
        let mut begun: std::collections::BTreeMap<String, WalEntry> = std::collections::BTreeMap::new();
        let mut completed: std::collections::HashSet<String> = std::collections::HashSet::new();

        for entry in self.read_entries(0, None) {
            match entry.entry_type {
                WalEntryType::Begin => {
                    begun.insert(entry.op_id.clone(), entry);
                }
                WalEntryType::Commit | WalEntryType::Rollback => {
                    completed.insert(entry.op_id.clone());
                }
                _ => {}
            }
        }

        let mut out: Vec<UncommittedOperation> = begun
            .into_iter()
            .filter(|(op_id, _)| !completed.contains(op_id))
            .map(|(op_id, entry)| {
                let (op_type, args) = match &entry.data {
                    Value::Map(m) => (
                        m.get("op_type").and_then(|v| v.as_str()).map(|s| s.to_string()),
                        m.get("args").cloned(),
                    ),
                    _ => (None, None),
                };
                UncommittedOperation {
                    op_id,
                    sequence: entry.sequence,
                    timestamp: entry.timestamp,
                    op_type,
                    args,
                }
            })
            .collect();
        out.sort_by_key(|o| o.sequence);
        out
    }

    pub fn last_checkpoint(&self) -> Option<WalEntry> {
        self.read_entries(0, Some(&[WalEntryType::Checkpoint])).into_iter().last()
    }

    /// All non-checkpoint entries after the last checkpoint (or after
    /// `from_sequence` if given).
    pub fn replay_from_checkpoint(&self, from_sequence: Option<u64>) -> Vec<WalEntry> {
        let start = from_sequence.unwrap_or_else(|| self.last_checkpoint().map(|e| e.sequence).unwrap_or(0));
        self.read_entries(start, None)
            .into_iter()
            .filter(|e| e.entry_type != WalEntryType::Checkpoint)
            .collect()
    }

    pub fn operation_log(&self, op_id: &str) -> Vec<WalEntry> {
        self.read_entries(0, None).into_iter().filter(|e| e.op_id == op_id).collect()
    }

    /// Rewrite the live file keeping the most recent `keep_entries` plus any
    /// entry belonging to a still-uncommitted operation. Returns the count
    /// of records dropped. Compaction never discards evidence needed to
    /// recover an in-flight operation (spec's compaction-preservation
    /// property).
    pub fn compact(&mut self, keep_entries: usize) -> Result<usize, WalError> {
        let sid = self.session_id()?.to_string();
        let path = match &self.current_file {
            Some(p) if p.exists() => p.clone(),
            _ => return Ok(0),
        };
        let entries = self.read_entries(0, None);
        if entries.len() <= keep_entries {
            return Ok(0);
        }

        let uncommitted: std::collections::HashSet<String> =
            self.uncommitted_operations().into_iter().map(|o| o.op_id).collect();

        let split = entries.len() - keep_entries;
        let (old, recent) = entries.split_at(split);
        let mut kept: Vec<WalEntry> = recent.to_vec();
        kept.extend(old.iter().filter(|e| uncommitted.contains(&e.op_id)).cloned());
        kept.sort_by_key(|e| e.sequence);

        let removed = entries.len() - kept.len();
        if removed > 0 {
            let mut buf = Vec::new();
            for entry in &kept {
                let line = serde_json::to_vec(entry).map_err(|e| WalError::Durability {
                    session_id: sid.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
                })?;
                buf.extend_from_slice(&line);
                buf.push(b'\n');
            }
            atomic_write(&path, &buf).map_err(|e| WalError::Durability { session_id: sid, source: e })?;
        }
        Ok(removed)
    }

    pub fn stats(&self) -> Result<WalStats, WalError> {
        let sid = self.session_id()?.to_string();
        let entries = self.read_entries(0, None);
        let file_size = self
            .current_file
            .as_ref()
            .and_then(|p| p.metadata().ok())
            .map(|m| m.len())
            .unwrap_or(0);
        Ok(WalStats {
            session_id: sid,
            current_sequence: self.sequence,
            total_entries: entries.len(),
            begin_count: entries.iter().filter(|e| e.entry_type == WalEntryType::Begin).count(),
            data_count: entries.iter().filter(|e| e.entry_type == WalEntryType::Data).count(),
            commit_count: entries.iter().filter(|e| e.entry_type == WalEntryType::Commit).count(),
            rollback_count: entries.iter().filter(|e| e.entry_type == WalEntryType::Rollback).count(),
            checkpoint_count: entries.iter().filter(|e| e.entry_type == WalEntryType::Checkpoint).count(),
            uncommitted_count: self.uncommitted_operations().len(),
            file_size_bytes: file_size,
            entries_since_checkpoint: self.entries_since_checkpoint,
        })
    }

    pub fn current_sequence(&self) -> u64 {
        self.sequence
    }
}

impl Default for WriteAheadLog {
    fn default() -> Self {
        Self::new()
    }
}

fn find_latest_wal(config: &EngineConfig, session_id: &str) -> Result<Option<PathBuf>, WalError> {
    let dir = config.wal_dir();
    let mut numbered: Vec<(u32, PathBuf)> = std::fs::read_dir(&dir)
        .map(|rd| {
            rd.filter_map(|e| e.ok())
                .filter_map(|e| {
                    let name = e.file_name().to_string_lossy().to_string();
                    let prefix = format!("wal_{}.", session_id);
                    if !name.starts_with(&prefix) || !name.ends_with(".log") {
                        return None;
                    }
                    let middle = &name[prefix.len()..name.len() - 4];
                    middle.parse::<u32>().ok().map(|n| (n, e.path()))
                })
                .collect()
        })
        .unwrap_or_default();
    numbered.sort_by_key(|(n, _)| std::cmp::Reverse(*n));
    if let Some((_, path)) = numbered.into_iter().next() {
        return Ok(Some(path));
    }
    let base = config.wal_path(session_id, 0);
    Ok(if base.exists() { Some(base) } else { None })
}

fn last_sequence(path: &PathBuf) -> u64 {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return 0,
    };
    let mut last = 0;
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(entry) = serde_json::from_str::<WalEntry>(line) {
            last = last.max(entry.sequence);
        }
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn wal_in(dir: &std::path::Path) -> (WriteAheadLog, EngineConfig) {
        let cfg = EngineConfig::new(dir);
        let mut wal = WriteAheadLog::new();
        wal.start_session(&cfg, "s1").unwrap();
        (wal, cfg)
    }

    #[test]
    fn begin_commit_round_trip() {
        let dir = tempdir().unwrap();
        let (mut wal, _cfg) = wal_in(dir.path());
        wal.log_begin("op1", "echo", Value::Null).unwrap();
        wal.log_commit("op1", Value::from("done")).unwrap();
        assert!(wal.uncommitted_operations().is_empty());
    }

    #[test]
    fn uncommitted_operation_detected() {
        let dir = tempdir().unwrap();
        let (mut wal, _cfg) = wal_in(dir.path());
        wal.log_begin("op1", "echo", Value::from("hi")).unwrap();
        let uncommitted = wal.uncommitted_operations();
        assert_eq!(uncommitted.len(), 1);
        assert_eq!(uncommitted[0].op_id, "op1");
        assert_eq!(uncommitted[0].op_type.as_deref(), Some("echo"));
    }

    #[test]
    fn sequence_resumes_after_reopen() {
        let dir = tempdir().unwrap();
        let cfg = EngineConfig::new(dir.path());
        {
            let mut wal = WriteAheadLog::new();
            wal.start_session(&cfg, "s1").unwrap();
            wal.log_begin("op1", "echo", Value::Null).unwrap();
            wal.log_commit("op1", Value::Null).unwrap();
        }
        let mut wal2 = WriteAheadLog::new();
        wal2.start_session(&cfg, "s1").unwrap();
        assert_eq!(wal2.current_sequence(), 2);
    }

    #[test]
    fn rotation_creates_new_numbered_file() {
        let dir = tempdir().unwrap();
        let mut cfg = EngineConfig::new(dir.path());
        cfg.max_wal_size_bytes = 10; // force rotation on first write
        let mut wal = WriteAheadLog::new();
        wal.start_session(&cfg, "s1").unwrap();
        wal.log_begin("op1", "echo", Value::Null).unwrap();
        assert!(cfg.wal_dir().join("wal_s1.1.log").exists());
    }

    #[test]
    fn compact_preserves_uncommitted_entries() {
        let dir = tempdir().unwrap();
        let (mut wal, _cfg) = wal_in(dir.path());
        for i in 0..5 {
            let op = format!("op{}", i);
            wal.log_begin(&op, "echo", Value::Null).unwrap();
            wal.log_commit(&op, Value::Null).unwrap();
        }
        wal.log_begin("still-open", "echo", Value::Null).unwrap();
        let removed = wal.compact(2).unwrap();
        assert!(removed > 0);
        let uncommitted = wal.uncommitted_operations();
        assert_eq!(uncommitted.len(), 1);
        assert_eq!(uncommitted[0].op_id, "still-open");
    }

    #[test]
    fn malformed_line_is_skipped_not_fatal() {
        let dir = tempdir().unwrap();
        let (mut wal, cfg) = wal_in(dir.path());
        wal.log_begin("op1", "echo", Value::Null).unwrap();
        let path = cfg.wal_path("s1", 0);
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("not valid json\n");
        std::fs::write(&path, content).unwrap();
        let entries = wal.read_entries(0, None);
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn checkpoint_marks_entries_since_checkpoint_zero() {
        let dir = tempdir().unwrap();
        let (mut wal, _cfg) = wal_in(dir.path());
        wal.log_begin("op1", "echo", Value::Null).unwrap();
        wal.write_checkpoint(Value::Null).unwrap();
        let stats = wal.stats().unwrap();
        assert_eq!(stats.entries_since_checkpoint, 0);
        assert_eq!(stats.checkpoint_count, 1);
    }
}
