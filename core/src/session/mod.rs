//! SessionManager (C4) — owns the public API, sequences C1/C2/C3, and
//! implements crash recovery plus the auxiliary session facets (rename,
//! GitHub pointer, documents, tags, search, clone).
//!
//! Adapted from `original_source/server/session/manager.py`'s
//! `RobustSessionManager`, de-singletonized into an explicit engine value
//! per the design notes, with the heartbeat loop rewritten onto
//! `other_examples/…session_tracking.rs`'s `tokio::select!` idiom since
//! Rust cannot run async cleanup in `Drop`.

mod state;

pub use state::{Document, DocumentType, GithubPointer, SessionState, SessionStatus};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::checkpoint::{Checkpoint, CheckpointManager, RecoveryInfo};
use crate::config::EngineConfig;
use crate::error::{CoreError, Result, SessionError};
use crate::io::atomic_write;
use crate::operation::{Operation, OperationFilter, OperationTracker, StatusSummary};
use crate::time::{now_iso, session_id as make_session_id};
use crate::value::{Value, ValueMap};
use crate::wal::{UncommittedOperation, WalStats, WriteAheadLog};

/// Result of `start_session`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StartSummary {
    pub session_id: String,
    pub status: &'static str,
    pub project: String,
    pub goal: String,
    pub started_at: String,
}

/// Result of `resume_session`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ResumeSummary {
    pub session_id: String,
    pub status: &'static str,
    pub project: String,
    pub goal: String,
    pub recoveries: u32,
    pub interrupted_operations: Vec<String>,
    pub uncommitted_operations: Vec<UncommittedOperation>,
    pub last_checkpoint: RecoveryInfo,
}

/// Result of `end_session`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EndSummary {
    pub status: &'static str,
    pub summary: Option<String>,
    pub operations: StatusSummary,
}

/// Comprehensive point-in-time status, as returned by `session.status()`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusReport {
    pub session: SessionState,
    pub operations: StatusSummary,
    pub wal: WalStats,
    pub recovery_info: RecoveryInfo,
}

/// Outcome of a tracked operation: either a result `Value`, or a failure
/// message. Unlike a durability error (which propagates as `Err` from
/// `run_tracked`), this represents the caller's own business-logic outcome.
#[derive(Debug, Clone)]
pub enum TrackedOutcome {
    Completed { op_id: String, result: Value },
    Failed { op_id: String, error: String },
}

/// Handle passed into a tracked operation's body; lets the caller log
/// intermediate data without reaching back into the manager.
pub struct OperationScope<'a> {
    op_id: String,
    wal: &'a mut WriteAheadLog,
}

impl<'a> OperationScope<'a> {
    pub fn op_id(&self) -> &str {
        &self.op_id
    }

    pub fn log_data(&mut self, key: &str, value: Value) -> Result<u64> {
        Ok(self.wal.log_data(&self.op_id, key, value)?)
    }
}

/// A cooperative cancellation signal for a tracked operation, paired with
/// [`CancellationHandle`].
pub struct Cancellation(watch::Receiver<bool>);

/// The sending half of a cancellation pair; `cancel()` tells the matching
/// [`Cancellation`] to stop the in-flight tracked operation.
#[derive(Clone)]
pub struct CancellationHandle(watch::Sender<bool>);

impl CancellationHandle {
    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

pub fn cancellation_pair() -> (CancellationHandle, Cancellation) {
    let (tx, rx) = watch::channel(false);
    (CancellationHandle(tx), Cancellation(rx))
}

/// C4: the session coordinator.
pub struct SessionManager {
    config: EngineConfig,
    tracker: OperationTracker,
    wal: WriteAheadLog,
    checkpoints: CheckpointManager,
    session: Option<Arc<AsyncMutex<SessionState>>>,
    heartbeat_stop: Option<mpsc::Sender<()>>,
    heartbeat_handle: Option<JoinHandle<()>>,
}

impl SessionManager {
    pub fn new(config: EngineConfig) -> Self {
        SessionManager {
            config,
            tracker: OperationTracker::new(),
            wal: WriteAheadLog::new(),
            checkpoints: CheckpointManager::new(),
            session: None,
            heartbeat_stop: None,
            heartbeat_handle: None,
        }
    }

    fn session_handle(&self) -> Result<Arc<AsyncMutex<SessionState>>> {
        self.session.clone().ok_or(CoreError::Session(SessionError::NoActiveSession))
    }

    async fn save_session(&self) -> Result<()> {
        let handle = self.session_handle()?;
        let state = handle.lock().await;
        write_session_file(&self.config, &state)
    }

    pub async fn start_session(
        &mut self,
        project: String,
        project_path: String,
        goal: String,
        session_id: Option<String>,
        context: ValueMap,
        metadata: ValueMap,
    ) -> Result<StartSummary> {
        let now = now_iso();
        let id = session_id.unwrap_or_else(make_session_id);

        let state = SessionState {
            session_id: id.clone(),
            project: project.clone(),
            project_path,
            goal: goal.clone(),
            started_at: now.clone(),
            updated_at: now.clone(),
            status: SessionStatus::Active,
            heartbeat_at: now.clone(),
            connection_drops: 0,
            recoveries: 0,
            context,
            metadata,
            name: None,
            github: None,
            documents: Vec::new(),
            tags: Vec::new(),
        };

        self.tracker.start_session(&self.config, &id)?;
        self.wal.start_session(&self.config, &id)?;
        self.checkpoints.start_session(&self.config, &id);

        let mut start_args = ValueMap::new();
        start_args.insert("project".into(), Value::from(project.as_str()));
        start_args.insert("goal".into(), Value::from(goal.as_str()));
        self.wal.log_begin("_session_start", "session_start", Value::Map(start_args))?;

        self.session = Some(Arc::new(AsyncMutex::new(state)));
        self.save_session().await?;
        self.create_checkpoint(true).await?;
        self.start_heartbeat();

        Ok(StartSummary { session_id: id, status: "started", project, goal, started_at: now })
    }

    pub async fn resume_session(&mut self, session_id: Option<String>) -> Result<ResumeSummary> {
        let id = match session_id.or_else(|| find_latest_session(&self.config)) {
            Some(id) => id,
            None => return Err(CoreError::Session(SessionError::NotFound("<none>".into()))),
        };

        let mut state = load_session_file(&self.config, &id)
            .ok_or_else(|| CoreError::Session(SessionError::NotFound(id.clone())))?;

        let now = now_iso();
        state.status = SessionStatus::Recovered;
        state.recoveries += 1;
        state.connection_drops += 1;
        state.updated_at = now.clone();
        state.heartbeat_at = now;

        self.tracker.start_session(&self.config, &id)?;
        self.wal.start_session(&self.config, &id)?;
        self.checkpoints.start_session(&self.config, &id);

        let interrupted = self.tracker.recover_interrupted_operations()?;
        let uncommitted = self.wal.uncommitted_operations();

        let mut recovery_args = ValueMap::new();
        recovery_args.insert(
            "interrupted_operations".into(),
            Value::Array(interrupted.iter().cloned().map(Value::from).collect()),
        );
        recovery_args.insert("uncommitted_operations".into(), Value::Int(uncommitted.len() as i64));
        self.wal.log_begin("_session_recovery", "session_recovery", Value::Map(recovery_args))?;

        let project = state.project.clone();
        let goal = state.goal.clone();
        let recoveries = state.recoveries;

        self.session = Some(Arc::new(AsyncMutex::new(state)));
        self.save_session().await?;
        self.start_heartbeat();

        Ok(ResumeSummary {
            session_id: id,
            status: "resumed",
            project,
            goal,
            recoveries,
            interrupted_operations: interrupted,
            uncommitted_operations: uncommitted,
            last_checkpoint: self.checkpoints.recovery_info(),
        })
    }

    fn start_heartbeat(&mut self) {
        if self.heartbeat_handle.is_some() {
            return;
        }
        let handle = self.session.clone().expect("session active");
        let config = self.config.clone();
        let interval_secs = self.config.heartbeat_interval_secs;
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now = now_iso();
                        let mut state = handle.lock().await;
                        state.heartbeat_at = now.clone();
                        state.updated_at = now;
                        if let Err(e) = write_session_file(&config, &state) {
                            tracing::warn!(error = %e, "heartbeat failed to persist session state");
                        }
                    }
                    _ = stop_rx.recv() => break,
                }
            }
        });

        self.heartbeat_stop = Some(stop_tx);
        self.heartbeat_handle = Some(join);
    }

    async fn stop_heartbeat(&mut self) {
        if let Some(stop) = self.heartbeat_stop.take() {
            let _ = stop.send(()).await;
        }
        if let Some(handle) = self.heartbeat_handle.take() {
            let _ = handle.await;
        }
    }

    /// The tracked-operation scope: queue, BEGIN, run the body, then
    /// COMMIT/ROLLBACK based on its outcome, followed by checkpoint-trigger
    /// accounting. `cancel`, if given, lets an external caller interrupt an
    /// in-flight body; cancellation is recorded as a ROLLBACK with error
    /// "cancelled", matching queued-operation cancellation semantics.
    pub async fn run_tracked<F, Fut>(
        &mut self,
        op_type: &str,
        args: ValueMap,
        max_retries: u32,
        cancel: Option<Cancellation>,
        body: F,
    ) -> Result<TrackedOutcome>
    where
        F: FnOnce(OperationScope<'_>) -> Fut,
        Fut: Future<Output = std::result::Result<Value, String>>,
    {
        if self.session.is_none() {
            return Err(CoreError::Session(SessionError::NoActiveSession));
        }

        let op_id = self.tracker.queue_operation(op_type, args.clone(), None, max_retries, ValueMap::new())?;
        self.wal.log_begin(&op_id, op_type, Value::Map(args))?;
        self.tracker.start_operation(&op_id)?;

        let scope = OperationScope { op_id: op_id.clone(), wal: &mut self.wal };

        let outcome = match cancel {
            Some(Cancellation(mut rx)) => {
                tokio::select! {
                    result = body(scope) => result,
                    _ = rx.changed() => Err("cancelled".to_string()),
                }
            }
            None => body(scope).await,
        };

        let outcome = match outcome {
            Ok(result) => {
                self.tracker.complete_operation(&op_id, Some(result.clone()))?;
                self.wal.log_commit(&op_id, result.clone())?;
                TrackedOutcome::Completed { op_id: op_id.clone(), result }
            }
            Err(error) => {
                self.tracker.fail_operation(&op_id, &error)?;
                self.wal.log_rollback(&op_id, &error)?;
                TrackedOutcome::Failed { op_id: op_id.clone(), error }
            }
        };

        self.checkpoints.record_operation();
        self.checkpoints.update_sequence(self.wal.current_sequence());
        if self.checkpoints.should_checkpoint() {
            self.create_checkpoint(false).await?;
        }

        Ok(outcome)
    }

    async fn create_checkpoint(&mut self, force: bool) -> Result<Option<Checkpoint>> {
        let handle = match &self.session {
            Some(h) => h.clone(),
            None => return Ok(None),
        };
        let state = handle.lock().await;

        let pending: Vec<String> = self.tracker.get_queued_operations().iter().map(|op| op.op_id.clone()).collect();
        let in_progress: Vec<String> =
            self.tracker.get_in_progress_operations().iter().map(|op| op.op_id.clone()).collect();
        let working_memory = state.context.clone();
        let state_map = session_state_to_map(&state);
        drop(state);

        self.checkpoints.update_sequence(self.wal.current_sequence());
        let checkpoint = self.checkpoints.create_checkpoint(
            state_map,
            pending,
            in_progress,
            working_memory,
            ValueMap::new(),
            force,
        )?;

        if let Some(cp) = &checkpoint {
            let mut marker = ValueMap::new();
            marker.insert("checkpoint_id".into(), Value::from(cp.checkpoint_id.as_str()));
            marker.insert("sequence".into(), Value::Int(cp.sequence as i64));
            self.wal.write_checkpoint(Value::Map(marker))?;
        }

        Ok(checkpoint)
    }

    pub async fn force_checkpoint(&mut self) -> Result<Checkpoint> {
        self.create_checkpoint(true)
            .await?
            .ok_or_else(|| CoreError::Session(SessionError::NoActiveSession))
    }

    pub async fn update_context(&mut self, key: &str, value: Value) -> Result<()> {
        let handle = self.session_handle()?;
        {
            let mut state = handle.lock().await;
            state.context.insert(key.to_string(), value);
            state.updated_at = now_iso();
        }
        self.save_session().await
    }

    pub async fn get_context(&self, key: &str) -> Result<Option<Value>> {
        let handle = self.session_handle()?;
        let state = handle.lock().await;
        Ok(state.context.get(key).cloned())
    }

    pub async fn end_session(&mut self, summary: Option<String>) -> Result<EndSummary> {
        let handle = self.session_handle()?;
        self.stop_heartbeat().await;
        self.create_checkpoint(true).await?;

        let mut end_args = ValueMap::new();
        end_args.insert("summary".into(), summary.clone().map(Value::from).unwrap_or(Value::Null));
        end_args.insert("ended_at".into(), Value::from(now_iso().as_str()));
        self.wal.log_commit("_session_end", Value::Map(end_args))?;

        {
            let mut state = handle.lock().await;
            state.status = SessionStatus::Completed;
            state.updated_at = now_iso();
        }
        self.save_session().await?;

        let operations = self.tracker.get_status_summary();
        self.session = None;

        Ok(EndSummary { status: "ended", summary, operations })
    }

    pub async fn get_status(&self) -> Result<StatusReport> {
        let handle = self.session_handle()?;
        let session = handle.lock().await.clone();
        Ok(StatusReport {
            session,
            operations: self.tracker.get_status_summary(),
            wal: self.wal.stats()?,
            recovery_info: self.checkpoints.recovery_info(),
        })
    }

    pub fn get_operation(&self, op_id: &str) -> Option<&Operation> {
        self.tracker.get_operation(op_id)
    }

    pub fn list_operations(&self, filter: OperationFilter) -> Vec<&Operation> {
        self.tracker.list_by_filter(filter)
    }

    pub fn retry_operation(&mut self, op_id: &str) -> Result<()> {
        Ok(self.tracker.retry_operation(op_id)?)
    }

    pub fn cancel_operation(&mut self, op_id: &str) -> Result<()> {
        self.tracker.cancel_operation(op_id)?;
        self.wal.log_rollback(op_id, "cancelled")?;
        Ok(())
    }

    // -- auxiliary session facets -------------------------------------

    pub async fn rename_session(&mut self, name: &str) -> Result<()> {
        let handle = self.session_handle()?;
        {
            let mut state = handle.lock().await;
            state.name = Some(name.to_string());
            state.updated_at = now_iso();
        }
        self.save_session().await
    }

    pub async fn connect_github(&mut self, repo_url: &str, branch: Option<String>) -> Result<()> {
        let handle = self.session_handle()?;
        let pointer = GithubPointer::parse(repo_url, branch, now_iso())
            .ok_or_else(|| CoreError::Session(SessionError::InvalidGithubUrl(repo_url.to_string())))?;
        let mut state = handle.lock().await;
        state.github = Some(pointer);
        state.updated_at = now_iso();
        drop(state);
        self.save_session().await
    }

    pub async fn disconnect_github(&mut self) -> Result<()> {
        let handle = self.session_handle()?;
        let mut state = handle.lock().await;
        state.github = None;
        state.updated_at = now_iso();
        drop(state);
        self.save_session().await
    }

    pub async fn github_info(&self) -> Result<Option<GithubPointer>> {
        let handle = self.session_handle()?;
        Ok(handle.lock().await.github.clone())
    }

    pub async fn add_document(&mut self, doc: Document) -> Result<()> {
        let handle = self.session_handle()?;
        let mut state = handle.lock().await;
        state.documents.push(doc);
        state.updated_at = now_iso();
        drop(state);
        self.save_session().await
    }

    pub async fn remove_document(&mut self, doc_id: &str) -> Result<()> {
        let handle = self.session_handle()?;
        let mut state = handle.lock().await;
        let before = state.documents.len();
        state.documents.retain(|d| d.doc_id != doc_id);
        if state.documents.len() == before {
            return Err(CoreError::Session(SessionError::DocumentNotFound(doc_id.to_string())));
        }
        state.updated_at = now_iso();
        drop(state);
        self.save_session().await
    }

    pub async fn list_documents(&self) -> Result<Vec<Document>> {
        let handle = self.session_handle()?;
        Ok(handle.lock().await.documents.clone())
    }

    pub async fn add_tags(&mut self, tags: &[String]) -> Result<()> {
        let handle = self.session_handle()?;
        let mut state = handle.lock().await;
        for tag in tags {
            if !state.tags.contains(tag) {
                state.tags.push(tag.clone());
            }
        }
        state.updated_at = now_iso();
        drop(state);
        self.save_session().await
    }

    pub async fn remove_tags(&mut self, tags: &[String]) -> Result<()> {
        let handle = self.session_handle()?;
        let mut state = handle.lock().await;
        state.tags.retain(|t| !tags.contains(t));
        state.updated_at = now_iso();
        drop(state);
        self.save_session().await
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn current_state(&self) -> Result<SessionState> {
        let handle = self.session_handle()?;
        Ok(handle.lock().await.clone())
    }
}

/// Summary row for `session.list` / `session.search`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub project: String,
    pub goal: String,
    pub name: Option<String>,
    pub status: SessionStatus,
    pub started_at: String,
    pub updated_at: String,
    pub recoveries: u32,
    pub tags: Vec<String>,
}

pub(crate) fn load_all_sessions(config: &EngineConfig) -> Vec<(std::time::SystemTime, SessionState)> {
    std::fs::read_dir(config.session_dir())
        .map(|rd| {
            rd.filter_map(|e| e.ok())
                .filter(|e| {
                    let name = e.file_name().to_string_lossy().to_string();
                    name.starts_with("robust_") && name.ends_with(".json")
                })
                .filter_map(|e| {
                    let mtime = e.metadata().ok()?.modified().ok()?;
                    let raw = std::fs::read_to_string(e.path()).ok()?;
                    let state: SessionState = serde_json::from_str(&raw).ok()?;
                    Some((mtime, state))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// List the most recently updated sessions, newest first.
pub fn list_sessions(config: &EngineConfig, limit: usize) -> Vec<SessionSummary> {
    let mut sessions = load_all_sessions(config);
    sessions.sort_by(|a, b| b.0.cmp(&a.0));
    sessions.into_iter().take(limit).map(|(_, s)| summarize(&s)).collect()
}

/// Search sessions by substring match on name/goal/project, tag
/// membership, and exact status, newest first.
pub fn search_sessions(
    config: &EngineConfig,
    query: Option<&str>,
    tags: Option<&[String]>,
    project: Option<&str>,
    status: Option<SessionStatus>,
    limit: usize,
) -> Vec<SessionSummary> {
    let mut sessions = load_all_sessions(config);
    sessions.sort_by(|a, b| b.0.cmp(&a.0));
    sessions
        .into_iter()
        .map(|(_, s)| s)
        .filter(|s| {
            if let Some(q) = query {
                let q = q.to_lowercase();
                let hay = format!("{} {} {}", s.name.clone().unwrap_or_default(), s.goal, s.project).to_lowercase();
                if !hay.contains(&q) {
                    return false;
                }
            }
            if let Some(tags) = tags {
                if !tags.iter().all(|t| s.tags.contains(t)) {
                    return false;
                }
            }
            if let Some(project) = project {
                if s.project != project {
                    return false;
                }
            }
            if let Some(status) = status {
                if s.status != status {
                    return false;
                }
            }
            true
        })
        .take(limit)
        .map(|s| summarize(&s))
        .collect()
}

pub fn delete_session(config: &EngineConfig, session_id: &str) -> bool {
    std::fs::remove_file(config.session_state_path(session_id)).is_ok()
}

/// Duplicate a session's state under a fresh id, resetting recovery
/// counters and (optionally) overriding its goal. The clone starts
/// `Paused`; the caller resumes it explicitly to make it active.
pub fn clone_session(config: &EngineConfig, session_id: &str, new_goal: Option<String>) -> Result<String> {
    let mut state =
        load_session_file(config, session_id).ok_or_else(|| CoreError::Session(SessionError::NotFound(session_id.to_string())))?;

    let now = now_iso();
    let new_id = make_session_id();
    state.session_id = new_id.clone();
    if let Some(goal) = new_goal {
        state.goal = goal;
    }
    state.status = SessionStatus::Paused;
    state.started_at = now.clone();
    state.updated_at = now.clone();
    state.heartbeat_at = now;
    state.connection_drops = 0;
    state.recoveries = 0;

    write_session_file(config, &state)?;
    Ok(new_id)
}

fn summarize(state: &SessionState) -> SessionSummary {
    SessionSummary {
        session_id: state.session_id.clone(),
        project: state.project.clone(),
        goal: state.goal.clone(),
        name: state.name.clone(),
        status: state.status,
        started_at: state.started_at.clone(),
        updated_at: state.updated_at.clone(),
        recoveries: state.recoveries,
        tags: state.tags.clone(),
    }
}

pub(crate) fn write_session_file(config: &EngineConfig, state: &SessionState) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(state)?;
    atomic_write(&config.session_state_path(&state.session_id), &bytes)
        .map_err(|e| CoreError::Session(SessionError::Durability { source: e }))
}

pub(crate) fn load_session_file(config: &EngineConfig, session_id: &str) -> Option<SessionState> {
    let raw = std::fs::read_to_string(config.session_state_path(session_id)).ok()?;
    serde_json::from_str(&raw).ok()
}

fn find_latest_session(config: &EngineConfig) -> Option<String> {
    load_all_sessions(config)
        .into_iter()
        .max_by_key(|(mtime, _)| *mtime)
        .map(|(_, s)| s.session_id)
}

/// Flatten a `SessionState` into the `ValueMap` stored as a checkpoint's
/// `state` field.
fn session_state_to_map(state: &SessionState) -> ValueMap {
    let json = serde_json::to_value(state).expect("SessionState always serializes");
    json_to_value(json).as_map().cloned().unwrap_or_default()
}

fn json_to_value(v: serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(a) => Value::Array(a.into_iter().map(json_to_value).collect()),
        serde_json::Value::Object(o) => {
            Value::Map(o.into_iter().map(|(k, v)| (k, json_to_value(v))).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn start_session_creates_files_and_checkpoint() {
        let dir = tempdir().unwrap();
        let cfg = EngineConfig::new(dir.path());
        let mut mgr = SessionManager::new(cfg.clone());
        let summary = mgr
            .start_session("proj".into(), "/p".into(), "goal".into(), Some("sess1".into()), ValueMap::new(), ValueMap::new())
            .await
            .unwrap();
        assert_eq!(summary.session_id, "sess1");
        assert!(cfg.session_state_path("sess1").exists());
        mgr.end_session(None).await.unwrap();
    }

    #[tokio::test]
    async fn run_tracked_completes_successfully() {
        let dir = tempdir().unwrap();
        let cfg = EngineConfig::new(dir.path());
        let mut mgr = SessionManager::new(cfg);
        mgr.start_session("proj".into(), "/p".into(), "goal".into(), Some("sess1".into()), ValueMap::new(), ValueMap::new())
            .await
            .unwrap();

        let outcome = mgr
            .run_tracked("echo", ValueMap::new(), 0, None, |mut scope| async move {
                scope.log_data("step", Value::from("ran")).unwrap();
                Ok(Value::from("done"))
            })
            .await
            .unwrap();

        match outcome {
            TrackedOutcome::Completed { result, .. } => assert_eq!(result, Value::from("done")),
            TrackedOutcome::Failed { .. } => panic!("expected completion"),
        }
        mgr.end_session(None).await.unwrap();
    }

    #[tokio::test]
    async fn run_tracked_records_failure() {
        let dir = tempdir().unwrap();
        let cfg = EngineConfig::new(dir.path());
        let mut mgr = SessionManager::new(cfg);
        mgr.start_session("proj".into(), "/p".into(), "goal".into(), Some("sess1".into()), ValueMap::new(), ValueMap::new())
            .await
            .unwrap();

        let outcome = mgr
            .run_tracked("echo", ValueMap::new(), 0, None, |_scope| async move { Err("boom".to_string()) })
            .await
            .unwrap();

        match outcome {
            TrackedOutcome::Failed { error, .. } => assert_eq!(error, "boom"),
            TrackedOutcome::Completed { .. } => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn run_tracked_cancellation_rolls_back() {
        let dir = tempdir().unwrap();
        let cfg = EngineConfig::new(dir.path());
        let mut mgr = SessionManager::new(cfg);
        mgr.start_session("proj".into(), "/p".into(), "goal".into(), Some("sess1".into()), ValueMap::new(), ValueMap::new())
            .await
            .unwrap();

        let (handle, cancel) = cancellation_pair();
        handle.cancel();

        let outcome = mgr
            .run_tracked("slow", ValueMap::new(), 0, Some(cancel), |_scope| async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Value::Null)
            })
            .await
            .unwrap();

        match outcome {
            TrackedOutcome::Failed { error, .. } => assert_eq!(error, "cancelled"),
            TrackedOutcome::Completed { .. } => panic!("expected cancellation"),
        }
    }

    #[tokio::test]
    async fn resume_session_finds_interrupted_operations() {
        let dir = tempdir().unwrap();
        let cfg = EngineConfig::new(dir.path());
        {
            let mut mgr = SessionManager::new(cfg.clone());
            mgr.start_session("proj".into(), "/p".into(), "goal".into(), Some("sess1".into()), ValueMap::new(), ValueMap::new())
                .await
                .unwrap();
            let op_id = mgr.tracker.queue_operation("echo", ValueMap::new(), None, 0, ValueMap::new()).unwrap();
            mgr.tracker.start_operation(&op_id).unwrap();
            mgr.wal.log_begin(&op_id, "echo", Value::Null).unwrap();
            // simulate crash: manager dropped without end_session
        }

        let mut mgr2 = SessionManager::new(cfg);
        let resumed = mgr2.resume_session(Some("sess1".into())).await.unwrap();
        assert_eq!(resumed.recoveries, 1);
        assert_eq!(resumed.interrupted_operations.len(), 1);
    }

    #[tokio::test]
    async fn github_pointer_round_trips() {
        let dir = tempdir().unwrap();
        let cfg = EngineConfig::new(dir.path());
        let mut mgr = SessionManager::new(cfg);
        mgr.start_session("proj".into(), "/p".into(), "goal".into(), Some("sess1".into()), ValueMap::new(), ValueMap::new())
            .await
            .unwrap();
        mgr.connect_github("https://github.com/rust-lang/rust", None).await.unwrap();
        let info = mgr.github_info().await.unwrap().unwrap();
        assert_eq!(info.repo, "rust");
        mgr.disconnect_github().await.unwrap();
        assert!(mgr.github_info().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_github_url_rejected() {
        let dir = tempdir().unwrap();
        let cfg = EngineConfig::new(dir.path());
        let mut mgr = SessionManager::new(cfg);
        mgr.start_session("proj".into(), "/p".into(), "goal".into(), Some("sess1".into()), ValueMap::new(), ValueMap::new())
            .await
            .unwrap();
        let err = mgr.connect_github("https://example.com/a/b", None).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn list_and_search_sessions() {
        let dir = tempdir().unwrap();
        let cfg = EngineConfig::new(dir.path());
        let mut mgr = SessionManager::new(cfg.clone());
        mgr.start_session("proj-a".into(), "/p".into(), "fix the bug".into(), Some("sess1".into()), ValueMap::new(), ValueMap::new())
            .await
            .unwrap();
        mgr.add_tags(&["urgent".to_string()]).await.unwrap();

        let listed = list_sessions(&cfg, 10);
        assert_eq!(listed.len(), 1);

        let found = search_sessions(&cfg, Some("bug"), None, None, None, 10);
        assert_eq!(found.len(), 1);
        let not_found = search_sessions(&cfg, Some("nonexistent"), None, None, None, 10);
        assert!(not_found.is_empty());
    }
}
