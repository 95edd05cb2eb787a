//! Checkpoint manager (C3) — periodic, checksum-verified snapshots of
//! session state that bound WAL replay time.
//!
//! Adapted from `original_source/server/session/checkpoint.py`'s
//! `CheckpointManager`/`Checkpoint`, with the non-atomic temp-write-then-rename
//! in that source upgraded to the shared [`crate::io::atomic_write`] helper
//! and the checksum kept as the teacher's FNV-1a hash rather than adding a
//! crypto-hash dependency (see DESIGN.md).

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::CheckpointError;
use crate::io::atomic_write;
use crate::time::{checkpoint_id as make_checkpoint_id, now_iso};
use crate::value::ValueMap;

/// A point-in-time snapshot of session state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    pub session_id: String,
    pub sequence: u64,
    pub timestamp: String,
    pub state: ValueMap,
    pub operations_pending: Vec<String>,
    pub operations_in_progress: Vec<String>,
    pub working_memory: ValueMap,
    pub metadata: ValueMap,
}

impl Checkpoint {
    /// FNV-1a 64-bit checksum over the canonical (sorted-key) JSON encoding
    /// of the checkpoint body, rendered as 16 lowercase hex digits.
    pub fn checksum(&self) -> String {
        let canonical = serde_json::to_string(&CanonicalView::from(self))
            .expect("checkpoint fields are always serializable");
        fnv1a_hex(canonical.as_bytes())
    }
}

/// Field-sorted view used only to compute a stable checksum; BTreeMap
/// already sorts keys, so this mirrors `json.dumps(..., sort_keys=True)`.
#[derive(Serialize)]
struct CanonicalView<'a> {
    checkpoint_id: &'a str,
    session_id: &'a str,
    sequence: u64,
    timestamp: &'a str,
    state: &'a ValueMap,
    operations_pending: &'a Vec<String>,
    operations_in_progress: &'a Vec<String>,
    working_memory: &'a ValueMap,
    metadata: &'a ValueMap,
}

impl<'a> From<&'a Checkpoint> for CanonicalView<'a> {
    fn from(c: &'a Checkpoint) -> Self {
        CanonicalView {
            checkpoint_id: &c.checkpoint_id,
            session_id: &c.session_id,
            sequence: c.sequence,
            timestamp: &c.timestamp,
            state: &c.state,
            operations_pending: &c.operations_pending,
            operations_in_progress: &c.operations_in_progress,
            working_memory: &c.working_memory,
            metadata: &c.metadata,
        }
    }
}

pub(crate) fn fnv1a_hex(bytes: &[u8]) -> String {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    format!("{:016x}", hash)
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredCheckpoint {
    #[serde(flatten)]
    checkpoint: Checkpoint,
    #[serde(rename = "_checksum")]
    checksum: String,
}

/// Summary row returned by `list_checkpoints`.
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointSummary {
    pub checkpoint_id: String,
    pub session_id: String,
    pub timestamp: String,
    pub sequence: u64,
    pub ops_pending: usize,
    pub ops_in_progress: usize,
}

/// Recovery-planning hints returned by `recovery_info`.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryInfo {
    pub has_checkpoint: bool,
    pub latest_checkpoint_id: Option<String>,
    pub latest_timestamp: Option<String>,
    pub latest_sequence: u64,
    pub available_checkpoints: usize,
}

/// C3: the per-session checkpoint policy and store.
pub struct CheckpointManager {
    session_id: Option<String>,
    checkpoints_dir: std::path::PathBuf,
    max_checkpoints: usize,
    auto_checkpoint_ops: u64,
    auto_checkpoint_secs: u64,
    ops_since_checkpoint: u64,
    last_checkpoint_unix: u64,
    current_sequence: u64,
}

impl CheckpointManager {
    pub fn new() -> Self {
        CheckpointManager {
            session_id: None,
            checkpoints_dir: std::path::PathBuf::new(),
            max_checkpoints: 10,
            auto_checkpoint_ops: 10,
            auto_checkpoint_secs: 300,
            ops_since_checkpoint: 0,
            last_checkpoint_unix: 0,
            current_sequence: 0,
        }
    }

    pub fn start_session(&mut self, config: &EngineConfig, session_id: &str) {
        self.session_id = Some(session_id.to_string());
        self.checkpoints_dir = config.checkpoints_dir();
        self.max_checkpoints = config.max_checkpoints;
        self.auto_checkpoint_ops = config.auto_checkpoint_ops;
        self.auto_checkpoint_secs = config.auto_checkpoint_secs;
        self.ops_since_checkpoint = 0;
        self.last_checkpoint_unix = unix_now();
        self.current_sequence = 0;
    }

    pub fn record_operation(&mut self) {
        self.ops_since_checkpoint += 1;
    }

    pub fn update_sequence(&mut self, sequence: u64) {
        self.current_sequence = sequence;
    }

    pub fn should_checkpoint(&self) -> bool {
        if self.session_id.is_none() {
            return false;
        }
        if self.ops_since_checkpoint >= self.auto_checkpoint_ops {
            return true;
        }
        unix_now().saturating_sub(self.last_checkpoint_unix) >= self.auto_checkpoint_secs
    }

    fn path_for(&self, checkpoint_id: &str) -> std::path::PathBuf {
        self.checkpoints_dir.join(format!("ckpt_{}.json", checkpoint_id))
    }

    /// Create and persist a checkpoint if one is due, or unconditionally
    /// when `force` is set. Returns `None` when none was needed.
    pub fn create_checkpoint(
        &mut self,
        state: ValueMap,
        operations_pending: Vec<String>,
        operations_in_progress: Vec<String>,
        working_memory: ValueMap,
        metadata: ValueMap,
        force: bool,
    ) -> Result<Option<Checkpoint>, CheckpointError> {
        let session_id = match &self.session_id {
            Some(s) => s.clone(),
            None => return Ok(None),
        };
        if !force && !self.should_checkpoint() {
            return Ok(None);
        }

        let checkpoint = Checkpoint {
            checkpoint_id: make_checkpoint_id(&session_id),
            session_id: session_id.clone(),
            sequence: self.current_sequence,
            timestamp: now_iso(),
            state,
            operations_pending,
            operations_in_progress,
            working_memory,
            metadata,
        };

        self.save(&checkpoint)?;
        self.ops_since_checkpoint = 0;
        self.last_checkpoint_unix = unix_now();
        self.prune(&session_id);
        Ok(Some(checkpoint))
    }

    fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let checksum = checkpoint.checksum();
        let stored = StoredCheckpoint { checkpoint: checkpoint.clone(), checksum };
        let bytes = serde_json::to_vec_pretty(&stored).map_err(|e| CheckpointError::Durability {
            session_id: checkpoint.session_id.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;
        atomic_write(&self.path_for(&checkpoint.checkpoint_id), &bytes).map_err(|e| {
            CheckpointError::Durability { session_id: checkpoint.session_id.clone(), source: e }
        })
    }

    /// Load one checkpoint by id, verifying its checksum. Returns
    /// `ChecksumMismatch` rather than silently treating a tampered file as
    /// missing, so callers can decide whether to fall back to an older one.
    pub fn load_checkpoint(&self, checkpoint_id: &str) -> Result<Checkpoint, CheckpointError> {
        let path = self.path_for(checkpoint_id);
        let raw = std::fs::read_to_string(&path)
            .map_err(|_| CheckpointError::NotFound(checkpoint_id.to_string()))?;
        let stored: StoredCheckpoint = serde_json::from_str(&raw)
            .map_err(|_| CheckpointError::NotFound(checkpoint_id.to_string()))?;
        let actual = stored.checkpoint.checksum();
        if actual != stored.checksum {
            return Err(CheckpointError::ChecksumMismatch(checkpoint_id.to_string()));
        }
        Ok(stored.checkpoint)
    }

    fn list_files(&self, session_id: Option<&str>) -> Vec<std::path::PathBuf> {
        let session_id = session_id.or(self.session_id.as_deref());
        let mut files: Vec<(std::time::SystemTime, std::path::PathBuf)> = std::fs::read_dir(&self.checkpoints_dir)
            .map(|rd| {
                rd.filter_map(|e| e.ok())
                    .filter(|e| {
                        let name = e.file_name().to_string_lossy().to_string();
                        if !name.starts_with("ckpt_") || !name.ends_with(".json") {
                            return false;
                        }
                        match session_id {
                            Some(sid) => name.contains(sid),
                            None => true,
                        }
                    })
                    .filter_map(|e| e.metadata().ok().and_then(|m| m.modified().ok()).map(|t| (t, e.path())))
                    .collect()
            })
            .unwrap_or_default();
        files.sort_by(|a, b| b.0.cmp(&a.0));
        files.into_iter().map(|(_, p)| p).collect()
    }

    fn id_from_path(path: &std::path::Path) -> Option<String> {
        path.file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .and_then(|stem| stem.strip_prefix("ckpt_").map(|s| s.to_string()))
    }

    pub fn get_latest_checkpoint(&self, session_id: Option<&str>) -> Option<Checkpoint> {
        for path in self.list_files(session_id) {
            if let Some(id) = Self::id_from_path(&path) {
                if let Ok(ckpt) = self.load_checkpoint(&id) {
                    return Some(ckpt);
                }
            }
        }
        None
    }

    pub fn list_checkpoints(&self, session_id: Option<&str>, limit: usize) -> Vec<CheckpointSummary> {
        self.list_files(session_id)
            .into_iter()
            .take(limit)
            .filter_map(|path| {
                let id = Self::id_from_path(&path)?;
                let raw = std::fs::read_to_string(&path).ok()?;
                let stored: StoredCheckpoint = serde_json::from_str(&raw).ok()?;
                Some(CheckpointSummary {
                    checkpoint_id: id,
                    session_id: stored.checkpoint.session_id,
                    timestamp: stored.checkpoint.timestamp,
                    sequence: stored.checkpoint.sequence,
                    ops_pending: stored.checkpoint.operations_pending.len(),
                    ops_in_progress: stored.checkpoint.operations_in_progress.len(),
                })
            })
            .collect()
    }

    fn prune(&self, session_id: &str) -> usize {
        let files = self.list_files(Some(session_id));
        let mut removed = 0;
        for path in files.into_iter().skip(self.max_checkpoints) {
            if std::fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        removed
    }

    pub fn delete_checkpoint(&self, checkpoint_id: &str) -> bool {
        std::fs::remove_file(self.path_for(checkpoint_id)).is_ok()
    }

    /// Recover state from a specific checkpoint, or the latest one for the
    /// active session if `checkpoint_id` is `None`.
    pub fn recover_from_checkpoint(&self, checkpoint_id: Option<&str>) -> Result<Option<Checkpoint>, CheckpointError> {
        match checkpoint_id {
            Some(id) => Ok(Some(self.load_checkpoint(id)?)),
            None => Ok(self.get_latest_checkpoint(None)),
        }
    }

    pub fn recovery_info(&self) -> RecoveryInfo {
        let latest = self.get_latest_checkpoint(None);
        RecoveryInfo {
            has_checkpoint: latest.is_some(),
            latest_checkpoint_id: latest.as_ref().map(|c| c.checkpoint_id.clone()),
            latest_timestamp: latest.as_ref().map(|c| c.timestamp.clone()),
            latest_sequence: latest.as_ref().map(|c| c.sequence).unwrap_or(0),
            available_checkpoints: self.list_files(self.session_id.as_deref()).len(),
        }
    }
}

impl Default for CheckpointManager {
    fn default() -> Self {
        Self::new()
    }
}

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manager_in(dir: &std::path::Path) -> CheckpointManager {
        let cfg = EngineConfig::new(dir);
        let mut mgr = CheckpointManager::new();
        mgr.start_session(&cfg, "s1");
        mgr
    }

    #[test]
    fn force_checkpoint_creates_and_persists() {
        let dir = tempdir().unwrap();
        let mut mgr = manager_in(dir.path());
        let ckpt = mgr
            .create_checkpoint(ValueMap::new(), vec![], vec![], ValueMap::new(), ValueMap::new(), true)
            .unwrap()
            .unwrap();
        let loaded = mgr.load_checkpoint(&ckpt.checkpoint_id).unwrap();
        assert_eq!(loaded.session_id, "s1");
    }

    #[test]
    fn unforced_checkpoint_skipped_until_due() {
        let dir = tempdir().unwrap();
        let mut mgr = manager_in(dir.path());
        let result = mgr
            .create_checkpoint(ValueMap::new(), vec![], vec![], ValueMap::new(), ValueMap::new(), false)
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn op_count_triggers_checkpoint() {
        let dir = tempdir().unwrap();
        let mut mgr = manager_in(dir.path());
        for _ in 0..10 {
            mgr.record_operation();
        }
        assert!(mgr.should_checkpoint());
    }

    #[test]
    fn tampered_checkpoint_fails_checksum() {
        let dir = tempdir().unwrap();
        let mut mgr = manager_in(dir.path());
        let ckpt = mgr
            .create_checkpoint(ValueMap::new(), vec![], vec![], ValueMap::new(), ValueMap::new(), true)
            .unwrap()
            .unwrap();
        let path = mgr.path_for(&ckpt.checkpoint_id);
        let raw = std::fs::read_to_string(&path).unwrap();
        let mut json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        json["sequence"] = serde_json::json!(9999);
        std::fs::write(&path, serde_json::to_vec_pretty(&json).unwrap()).unwrap();
        let err = mgr.load_checkpoint(&ckpt.checkpoint_id);
        assert!(matches!(err, Err(CheckpointError::ChecksumMismatch(_))));
    }

    #[test]
    fn pruning_keeps_only_max_checkpoints() {
        let dir = tempdir().unwrap();
        let cfg = EngineConfig::new(dir.path());
        let mut mgr = CheckpointManager::new();
        mgr.start_session(&cfg, "s1");
        mgr.max_checkpoints = 2;
        for _ in 0..4 {
            mgr.create_checkpoint(ValueMap::new(), vec![], vec![], ValueMap::new(), ValueMap::new(), true)
                .unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(mgr.list_checkpoints(Some("s1"), 100).len(), 2);
    }

    #[test]
    fn latest_checkpoint_is_most_recently_modified() {
        let dir = tempdir().unwrap();
        let mut mgr = manager_in(dir.path());
        let first = mgr
            .create_checkpoint(ValueMap::new(), vec![], vec![], ValueMap::new(), ValueMap::new(), true)
            .unwrap()
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = mgr
            .create_checkpoint(ValueMap::new(), vec![], vec![], ValueMap::new(), ValueMap::new(), true)
            .unwrap()
            .unwrap();
        let latest = mgr.get_latest_checkpoint(None).unwrap();
        assert_eq!(latest.checkpoint_id, second.checkpoint_id);
        assert_ne!(first.checkpoint_id, second.checkpoint_id);
    }
}
