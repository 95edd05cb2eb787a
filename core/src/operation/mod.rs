//! OperationTracker (C1) — a persisted state machine per operation.
//!
//! Adapted from `original_source/server/session/operations.py`'s
//! `OperationTracker`/`Operation`, rearchitected per the design notes: no
//! module-level singleton (the tracker is an explicit value owned by the
//! session engine), and `args`/`result`/`metadata` use the tagged `Value`
//! container instead of runtime-typed dicts.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::TrackerError;
use crate::io::atomic_write;
use crate::time::{now_iso, op_id};
use crate::value::{Value, ValueMap};

/// The operation state machine. See module docs for the allowed edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    Queued,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Recovering,
}

impl OperationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::Queued => "queued",
            OperationState::InProgress => "in_progress",
            OperationState::Completed => "completed",
            OperationState::Failed => "failed",
            OperationState::Cancelled => "cancelled",
            OperationState::Recovering => "recovering",
        }
    }
}

/// One tracked unit of work inside a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub op_id: String,
    pub op_type: String,
    pub state: OperationState,
    pub args: ValueMap,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub parent_op_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub metadata: ValueMap,
}

impl Operation {
    pub fn can_retry(&self) -> bool {
        self.state == OperationState::Failed && self.retry_count < self.max_retries
    }
}

/// Filter used by `get_operations_by_state` style queries and the CLI's
/// `op.list` surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationFilter {
    Pending,
    Failed,
    FailedRetryable,
    History,
}

impl OperationFilter {
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "pending" => Ok(OperationFilter::Pending),
            "failed" => Ok(OperationFilter::Failed),
            "failed_retryable" => Ok(OperationFilter::FailedRetryable),
            "history" => Ok(OperationFilter::History),
            other => Err(format!("unknown operation filter: '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OperationsFile {
    session_id: String,
    updated_at: String,
    operations: Vec<serde_json::Value>,
}

/// Status summary returned by `get_status_summary`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSummary {
    pub total: usize,
    pub queued: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub recovering: usize,
}

/// C1: the per-session operation set and its state machine.
pub struct OperationTracker {
    session_id: Option<String>,
    operations_path: Option<PathBuf>,
    operations: BTreeMap<String, Operation>,
}

impl OperationTracker {
    pub fn new() -> Self {
        OperationTracker {
            session_id: None,
            operations_path: None,
            operations: BTreeMap::new(),
        }
    }

    /// Ensure a session-scoped operations file, loading prior operations if
    /// one already exists for this id.
    pub fn start_session(
        &mut self,
        config: &EngineConfig,
        session_id: &str,
    ) -> Result<(), TrackerError> {
        let path = config.operations_path(session_id);
        self.operations = if path.exists() {
            load_operations(&path, session_id)
        } else {
            BTreeMap::new()
        };
        self.session_id = Some(session_id.to_string());
        self.operations_path = Some(path);
        Ok(())
    }

    fn require_path(&self) -> Result<(&str, &PathBuf), TrackerError> {
        let sid = self
            .session_id
            .as_deref()
            .ok_or_else(|| TrackerError::NotFound("<no active session>".into()))?;
        let path = self.operations_path.as_ref().expect("session started");
        Ok((sid, path))
    }

    fn save(&self) -> Result<(), TrackerError> {
        let (sid, path) = self.require_path()?;
        let file = OperationsFile {
            session_id: sid.to_string(),
            updated_at: now_iso(),
            operations: self
                .operations
                .values()
                .map(|op| serde_json::to_value(op).unwrap_or(serde_json::Value::Null))
                .collect(),
        };
        let bytes = serde_json::to_vec_pretty(&file).map_err(|e| TrackerError::Durability {
            session_id: sid.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;
        atomic_write(path, &bytes).map_err(|e| TrackerError::Durability {
            session_id: sid.to_string(),
            source: e,
        })
    }

    pub fn queue_operation(
        &mut self,
        op_type: &str,
        args: ValueMap,
        parent_op_id: Option<String>,
        max_retries: u32,
        metadata: ValueMap,
    ) -> Result<String, TrackerError> {
        let id = op_id();
        let now = now_iso();
        let op = Operation {
            op_id: id.clone(),
            op_type: op_type.to_string(),
            state: OperationState::Queued,
            args,
            result: None,
            error: None,
            retry_count: 0,
            max_retries,
            parent_op_id,
            created_at: now.clone(),
            updated_at: now,
            started_at: None,
            completed_at: None,
            metadata,
        };
        self.operations.insert(id.clone(), op);
        self.save()?;
        Ok(id)
    }

    fn transition<F: FnOnce(&mut Operation)>(
        &mut self,
        id: &str,
        allowed: &[OperationState],
        action: &'static str,
        apply: F,
    ) -> Result<(), TrackerError> {
        let from;
        {
            let op = self
                .operations
                .get_mut(id)
                .ok_or_else(|| TrackerError::NotFound(id.to_string()))?;
            if !allowed.contains(&op.state) {
                return Err(TrackerError::InvalidTransition {
                    op_id: id.to_string(),
                    from: op.state.as_str().to_string(),
                    action,
                });
            }
            from = op.state;
            let _ = from;
            apply(op);
            op.updated_at = now_iso();
        }
        self.save()
    }

    pub fn start_operation(&mut self, id: &str) -> Result<(), TrackerError> {
        let now = now_iso();
        self.transition(
            id,
            &[OperationState::Queued, OperationState::Recovering],
            "start",
            |op| {
                op.state = OperationState::InProgress;
                op.started_at = Some(now);
            },
        )
    }

    pub fn complete_operation(
        &mut self,
        id: &str,
        result: Option<Value>,
    ) -> Result<(), TrackerError> {
        let now = now_iso();
        self.transition(id, &[OperationState::InProgress], "complete", |op| {
            op.state = OperationState::Completed;
            op.result = result;
            op.completed_at = Some(now);
        })
    }

    pub fn fail_operation(&mut self, id: &str, error: &str) -> Result<(), TrackerError> {
        let now = now_iso();
        let error = error.to_string();
        self.transition(id, &[OperationState::InProgress], "fail", |op| {
            op.state = OperationState::Failed;
            op.error = Some(error);
            op.completed_at = Some(now);
        })
    }

    pub fn retry_operation(&mut self, id: &str) -> Result<(), TrackerError> {
        {
            let op = self
                .operations
                .get(id)
                .ok_or_else(|| TrackerError::NotFound(id.to_string()))?;
            if op.state != OperationState::Failed {
                return Err(TrackerError::InvalidTransition {
                    op_id: id.to_string(),
                    from: op.state.as_str().to_string(),
                    action: "retry",
                });
            }
            if op.retry_count >= op.max_retries {
                return Err(TrackerError::InvalidTransition {
                    op_id: id.to_string(),
                    from: op.state.as_str().to_string(),
                    action: "retry",
                });
            }
        }
        self.transition(id, &[OperationState::Failed], "retry", |op| {
            op.state = OperationState::Queued;
            op.retry_count += 1;
            op.error = None;
            op.result = None;
            op.started_at = None;
            op.completed_at = None;
        })
    }

    pub fn cancel_operation(&mut self, id: &str) -> Result<(), TrackerError> {
        self.transition(
            id,
            &[OperationState::Queued, OperationState::Recovering],
            "cancel",
            |op| {
                op.state = OperationState::Cancelled;
            },
        )
    }

    /// Move every `in_progress` operation to `recovering`; return their ids.
    pub fn recover_interrupted_operations(&mut self) -> Result<Vec<String>, TrackerError> {
        let now = now_iso();
        let ids: Vec<String> = self
            .operations
            .values()
            .filter(|op| op.state == OperationState::InProgress)
            .map(|op| op.op_id.clone())
            .collect();
        for id in &ids {
            if let Some(op) = self.operations.get_mut(id) {
                op.state = OperationState::Recovering;
                op.updated_at = now.clone();
            }
        }
        if !ids.is_empty() {
            self.save()?;
        }
        Ok(ids)
    }

    pub fn get_operation(&self, id: &str) -> Option<&Operation> {
        self.operations.get(id)
    }

    pub fn get_operations_by_state(&self, state: OperationState) -> Vec<&Operation> {
        self.operations.values().filter(|op| op.state == state).collect()
    }

    pub fn get_in_progress_operations(&self) -> Vec<&Operation> {
        self.get_operations_by_state(OperationState::InProgress)
    }

    pub fn get_queued_operations(&self) -> Vec<&Operation> {
        self.get_operations_by_state(OperationState::Queued)
    }

    pub fn get_failed_operations(&self) -> Vec<&Operation> {
        self.get_operations_by_state(OperationState::Failed)
    }

    pub fn list_by_filter(&self, filter: OperationFilter) -> Vec<&Operation> {
        match filter {
            OperationFilter::Pending => self
                .operations
                .values()
                .filter(|op| {
                    matches!(op.state, OperationState::Queued | OperationState::InProgress)
                })
                .collect(),
            OperationFilter::Failed => self.get_failed_operations(),
            OperationFilter::FailedRetryable => {
                self.operations.values().filter(|op| op.can_retry()).collect()
            }
            OperationFilter::History => self.get_operation_history(),
        }
    }

    /// All operations, most recently updated first.
    pub fn get_operation_history(&self) -> Vec<&Operation> {
        let mut ops: Vec<&Operation> = self.operations.values().collect();
        ops.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        ops
    }

    pub fn get_status_summary(&self) -> StatusSummary {
        let mut s = StatusSummary {
            total: self.operations.len(),
            queued: 0,
            in_progress: 0,
            completed: 0,
            failed: 0,
            cancelled: 0,
            recovering: 0,
        };
        for op in self.operations.values() {
            match op.state {
                OperationState::Queued => s.queued += 1,
                OperationState::InProgress => s.in_progress += 1,
                OperationState::Completed => s.completed += 1,
                OperationState::Failed => s.failed += 1,
                OperationState::Cancelled => s.cancelled += 1,
                OperationState::Recovering => s.recovering += 1,
            }
        }
        s
    }

    /// Remove completed operations whose `completed_at` is older than
    /// `max_age_hours`. Returns the count removed.
    pub fn cleanup_completed(&mut self, max_age_hours: i64) -> Result<usize, TrackerError> {
        let cutoff = chrono::Utc::now() - chrono::Duration::hours(max_age_hours);
        let to_remove: Vec<String> = self
            .operations
            .values()
            .filter(|op| {
                op.state == OperationState::Completed
                    && op
                        .completed_at
                        .as_deref()
                        .and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
                        .map(|t| t < cutoff)
                        .unwrap_or(false)
            })
            .map(|op| op.op_id.clone())
            .collect();
        for id in &to_remove {
            self.operations.remove(id);
        }
        if !to_remove.is_empty() {
            self.save()?;
        }
        Ok(to_remove.len())
    }
}

impl Default for OperationTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn load_operations(path: &PathBuf, session_id: &str) -> BTreeMap<String, Operation> {
    let mut map = BTreeMap::new();
    let raw = match std::fs::read_to_string(path) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(session_id, error = %e, "could not read operations file");
            return map;
        }
    };
    let file: OperationsFile = match serde_json::from_str(&raw) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(session_id, error = %e, "could not parse operations file");
            return map;
        }
    };
    for raw_op in file.operations {
        match serde_json::from_value::<Operation>(raw_op) {
            Ok(op) => {
                map.insert(op.op_id.clone(), op);
            }
            Err(e) => {
                tracing::warn!(session_id, error = %e, "skipping unparsable operation record");
            }
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn tracker_in(dir: &std::path::Path) -> (OperationTracker, EngineConfig) {
        let cfg = EngineConfig::new(dir);
        let mut t = OperationTracker::new();
        t.start_session(&cfg, "s1").unwrap();
        (t, cfg)
    }

    #[test]
    fn queue_then_start_then_complete() {
        let dir = tempdir().unwrap();
        let (mut t, _cfg) = tracker_in(dir.path());
        let id = t.queue_operation("echo", ValueMap::new(), None, 0, ValueMap::new()).unwrap();
        assert_eq!(t.get_operation(&id).unwrap().state, OperationState::Queued);
        t.start_operation(&id).unwrap();
        assert_eq!(t.get_operation(&id).unwrap().state, OperationState::InProgress);
        assert!(t.get_operation(&id).unwrap().started_at.is_some());
        t.complete_operation(&id, Some(Value::from("hi"))).unwrap();
        let op = t.get_operation(&id).unwrap();
        assert_eq!(op.state, OperationState::Completed);
        assert_eq!(op.result, Some(Value::from("hi")));
    }

    #[test]
    fn invalid_transition_rejected() {
        let dir = tempdir().unwrap();
        let (mut t, _cfg) = tracker_in(dir.path());
        let id = t.queue_operation("work", ValueMap::new(), None, 1, ValueMap::new()).unwrap();
        // cannot complete a queued op directly
        let err = t.complete_operation(&id, None);
        assert!(err.is_err());
        assert_eq!(t.get_operation(&id).unwrap().state, OperationState::Queued);
    }

    #[test]
    fn retry_exhaustion() {
        let dir = tempdir().unwrap();
        let (mut t, _cfg) = tracker_in(dir.path());
        let id = t.queue_operation("work", ValueMap::new(), None, 2, ValueMap::new()).unwrap();

        for _ in 0..2 {
            t.start_operation(&id).unwrap();
            t.fail_operation(&id, "boom").unwrap();
            t.retry_operation(&id).unwrap();
        }
        t.start_operation(&id).unwrap();
        t.fail_operation(&id, "boom again").unwrap();
        let err = t.retry_operation(&id);
        assert!(err.is_err());
        let op = t.get_operation(&id).unwrap();
        assert_eq!(op.state, OperationState::Failed);
        assert_eq!(op.retry_count, 2);
    }

    #[test]
    fn recover_interrupted_moves_in_progress_to_recovering() {
        let dir = tempdir().unwrap();
        let (mut t, _cfg) = tracker_in(dir.path());
        let id = t.queue_operation("work", ValueMap::new(), None, 0, ValueMap::new()).unwrap();
        t.start_operation(&id).unwrap();
        let recovered = t.recover_interrupted_operations().unwrap();
        assert_eq!(recovered, vec![id.clone()]);
        assert_eq!(t.get_operation(&id).unwrap().state, OperationState::Recovering);
    }

    #[test]
    fn recovering_can_be_cancelled_or_restarted() {
        let dir = tempdir().unwrap();
        let (mut t, _cfg) = tracker_in(dir.path());
        let id = t.queue_operation("work", ValueMap::new(), None, 0, ValueMap::new()).unwrap();
        t.start_operation(&id).unwrap();
        t.recover_interrupted_operations().unwrap();
        t.start_operation(&id).unwrap();
        assert_eq!(t.get_operation(&id).unwrap().state, OperationState::InProgress);
    }

    #[test]
    fn persistence_round_trip_across_tracker_instances() {
        let dir = tempdir().unwrap();
        let cfg = EngineConfig::new(dir.path());
        let id = {
            let mut t = OperationTracker::new();
            t.start_session(&cfg, "s1").unwrap();
            let id = t.queue_operation("work", ValueMap::new(), None, 0, ValueMap::new()).unwrap();
            t.start_operation(&id).unwrap();
            id
        };
        let mut t2 = OperationTracker::new();
        t2.start_session(&cfg, "s1").unwrap();
        assert_eq!(t2.get_operation(&id).unwrap().state, OperationState::InProgress);
    }

    #[test]
    fn status_summary_counts() {
        let dir = tempdir().unwrap();
        let (mut t, _cfg) = tracker_in(dir.path());
        let a = t.queue_operation("a", ValueMap::new(), None, 0, ValueMap::new()).unwrap();
        let b = t.queue_operation("b", ValueMap::new(), None, 0, ValueMap::new()).unwrap();
        t.start_operation(&a).unwrap();
        t.cancel_operation(&b).unwrap();
        let summary = t.get_status_summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.in_progress, 1);
        assert_eq!(summary.cancelled, 1);
    }

    #[test]
    fn skips_unparsable_record_on_load() {
        let dir = tempdir().unwrap();
        let cfg = EngineConfig::new(dir.path());
        let path = cfg.operations_path("s1");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            r#"{"session_id":"s1","updated_at":"now","operations":[{"bogus":true}]}"#,
        )
        .unwrap();
        let mut t = OperationTracker::new();
        t.start_session(&cfg, "s1").unwrap();
        assert_eq!(t.get_status_summary().total, 0);
    }
}
