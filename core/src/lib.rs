//! robust-session-core — a crash-safe session execution engine.
//!
//! Five components compose the public surface:
//! - [`operation`] (C1): persisted operation state machine.
//! - [`wal`] (C2): append-only write-ahead log.
//! - [`checkpoint`] (C3): periodic, checksum-verified state snapshots.
//! - [`session`] (C4): the coordinator tying C1–C3 together, plus crash
//!   recovery and auxiliary session facets.
//! - [`templates`], [`export`], [`analytics`] (C5): presets, portability,
//!   and read-only reporting built on top of C4.
//!
//! [`Engine`] is the single entry point a caller is expected to hold: one
//! instance per active session, constructed from an [`EngineConfig`].

pub mod analytics;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod export;
mod io;
pub mod operation;
pub mod recovery;
pub mod session;
pub mod templates;
pub mod time;
pub mod value;
pub mod wal;

use std::path::Path;

use config::EngineConfig;
use error::{CoreError, Result, SessionError};
use session::{
    cancellation_pair, CancellationHandle, Document, DocumentType, EndSummary, GithubPointer, OperationScope, ResumeSummary,
    SessionManager, SessionState, SessionStatus, StartSummary, StatusReport, TrackedOutcome,
};
use templates::{SessionTemplate, TemplateManager, TemplateSummary};
use time::now_iso;
use value::{Value, ValueMap};

pub use operation::{Operation, OperationFilter, OperationState, StatusSummary};
pub use session::SessionSummary;

/// The engine facade: one [`SessionManager`] plus the template registry,
/// sharing a single [`EngineConfig`].
pub struct Engine {
    config: EngineConfig,
    manager: SessionManager,
    templates: TemplateManager,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let templates = TemplateManager::load(&config);
        let manager = SessionManager::new(config.clone());
        Engine { config, manager, templates }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // -- session.* ------------------------------------------------------

    pub async fn session_start(
        &mut self,
        project: String,
        project_path: String,
        goal: String,
        context: ValueMap,
    ) -> Result<StartSummary> {
        self.manager.start_session(project, project_path, goal, None, context, ValueMap::new()).await
    }

    pub async fn session_resume(&mut self, session_id: Option<String>) -> Result<ResumeSummary> {
        self.manager.resume_session(session_id).await
    }

    pub async fn session_status(&self) -> Result<StatusReport> {
        self.manager.get_status().await
    }

    pub async fn session_checkpoint(&mut self) -> Result<checkpoint::Checkpoint> {
        self.manager.force_checkpoint().await
    }

    pub async fn session_end(&mut self, summary: Option<String>) -> Result<EndSummary> {
        self.manager.end_session(summary).await
    }

    pub fn session_list(&self, limit: usize) -> Vec<SessionSummary> {
        session::list_sessions(&self.config, limit)
    }

    pub async fn session_rename(&mut self, name: &str) -> Result<()> {
        self.manager.rename_session(name).await
    }

    #[allow(clippy::too_many_arguments)]
    pub fn session_search(
        &self,
        query: Option<&str>,
        tags: Option<&[String]>,
        project: Option<&str>,
        status: Option<SessionStatus>,
        limit: usize,
    ) -> Vec<SessionSummary> {
        session::search_sessions(&self.config, query, tags, project, status, limit)
    }

    pub fn session_delete(&self, session_id: &str) -> bool {
        session::delete_session(&self.config, session_id)
    }

    pub fn session_clone(&self, session_id: &str, new_goal: Option<String>) -> Result<String> {
        session::clone_session(&self.config, session_id, new_goal)
    }

    // -- op.* -------------------------------------------------------------

    pub fn op_status(&self, op_id: &str) -> Option<&Operation> {
        self.manager.get_operation(op_id)
    }

    pub fn op_list(&self, filter: OperationFilter) -> Vec<&Operation> {
        self.manager.list_operations(filter)
    }

    pub fn op_retry(&mut self, op_id: &str) -> Result<()> {
        self.manager.retry_operation(op_id)
    }

    pub fn op_cancel(&mut self, op_id: &str) -> Result<()> {
        self.manager.cancel_operation(op_id)
    }

    /// Run a unit of work inside a tracked, crash-safe operation scope.
    /// See [`SessionManager::run_tracked`] for the exact queue/BEGIN/
    /// COMMIT-or-ROLLBACK sequencing.
    pub async fn run_tracked<F, Fut>(&mut self, op_type: &str, args: ValueMap, max_retries: u32, body: F) -> Result<TrackedOutcome>
    where
        F: FnOnce(OperationScope<'_>) -> Fut,
        Fut: std::future::Future<Output = std::result::Result<Value, String>>,
    {
        self.manager.run_tracked(op_type, args, max_retries, None, body).await
    }

    /// Like [`Engine::run_tracked`], but returns a handle that can cancel
    /// the in-flight body from another task.
    pub async fn run_tracked_cancellable<F, Fut>(
        &mut self,
        op_type: &str,
        args: ValueMap,
        max_retries: u32,
        body: F,
    ) -> (CancellationHandle, impl std::future::Future<Output = Result<TrackedOutcome>> + '_)
    where
        F: FnOnce(OperationScope<'_>) -> Fut + 'static,
        Fut: std::future::Future<Output = std::result::Result<Value, String>>,
    {
        let (handle, cancel) = cancellation_pair();
        (handle, self.manager.run_tracked(op_type, args, max_retries, Some(cancel), body))
    }

    // -- context.* --------------------------------------------------------

    pub async fn context_set(&mut self, key: &str, value: Value) -> Result<()> {
        self.manager.update_context(key, value).await
    }

    pub async fn context_get(&self, key: &str) -> Result<Option<Value>> {
        self.manager.get_context(key).await
    }

    // -- github.* ---------------------------------------------------------

    pub async fn github_connect(&mut self, repo_url: &str, branch: Option<String>) -> Result<()> {
        self.manager.connect_github(repo_url, branch).await
    }

    pub async fn github_disconnect(&mut self) -> Result<()> {
        self.manager.disconnect_github().await
    }

    pub async fn github_info(&self) -> Result<Option<GithubPointer>> {
        self.manager.github_info().await
    }

    // -- doc.* --------------------------------------------------------------

    pub async fn doc_add(
        &mut self,
        name: &str,
        path: &str,
        doc_type: DocumentType,
        description: &str,
    ) -> Result<String> {
        let doc_id = format!("doc_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);
        let content_hash = match doc_type {
            DocumentType::File => std::fs::read(path).ok().map(|bytes| checkpoint::fnv1a_hex(&bytes)),
            _ => None,
        };
        let doc = Document {
            doc_id: doc_id.clone(),
            name: name.to_string(),
            path: path.to_string(),
            doc_type,
            content_hash,
            added_at: now_iso(),
            description: description.to_string(),
            metadata: ValueMap::new(),
        };
        self.manager.add_document(doc).await?;
        Ok(doc_id)
    }

    pub async fn doc_remove(&mut self, doc_id: &str) -> Result<()> {
        self.manager.remove_document(doc_id).await
    }

    pub async fn doc_list(&self) -> Result<Vec<Document>> {
        self.manager.list_documents().await
    }

    // -- tags.* -------------------------------------------------------------

    pub async fn tags_add(&mut self, tags: &[String]) -> Result<()> {
        self.manager.add_tags(tags).await
    }

    pub async fn tags_remove(&mut self, tags: &[String]) -> Result<()> {
        self.manager.remove_tags(tags).await
    }

    // -- template.* -----------------------------------------------------

    pub fn template_list(&self) -> Vec<TemplateSummary> {
        self.templates.list_templates()
    }

    pub fn template_get(&self, template_id: &str) -> Option<&SessionTemplate> {
        self.templates.get_template(template_id)
    }

    /// Start a session from a template: render its goal, seed context and
    /// tags, and connect its GitHub repo if it names one.
    pub async fn template_use(
        &mut self,
        template_id: &str,
        project: String,
        project_path: String,
        goal_vars: &std::collections::BTreeMap<String, String>,
    ) -> Result<StartSummary> {
        let template = self
            .templates
            .get_template(template_id)
            .ok_or_else(|| CoreError::Session(SessionError::TemplateNotFound(template_id.to_string())))?
            .clone();

        let goal = template.render_goal(goal_vars);
        let context = template.context.clone();
        let summary = self.manager.start_session(project, project_path, goal, None, context, ValueMap::new()).await?;

        if !template.tags.is_empty() {
            self.manager.add_tags(&template.tags).await?;
        }
        if let Some(repo) = &template.github_repo {
            self.manager.connect_github(repo, None).await?;
        }
        self.templates.record_use(template_id)?;

        Ok(summary)
    }

    pub fn template_create(
        &mut self,
        name: &str,
        description: &str,
        goal_template: &str,
        tags: Vec<String>,
        context: ValueMap,
        github_repo: Option<String>,
    ) -> Result<String> {
        self.templates.create_template(name, description, goal_template, tags, context, github_repo)
    }

    pub async fn template_from_session(&mut self, name: &str, description: &str) -> Result<String> {
        let state = self.manager.current_state().await?;
        self.templates.create_template_from_session(&state, name, description)
    }

    pub fn template_delete(&mut self, template_id: &str) -> Result<()> {
        self.templates.delete_template(template_id)
    }

    // -- session.export / import / clone ---------------------------------

    pub fn session_export(
        &self,
        session_id: &str,
        output_path: Option<&Path>,
        include_checkpoints: bool,
    ) -> Result<export::ExportResult> {
        export::export_session(&self.config, session_id, output_path, include_checkpoints, false)
    }

    pub fn session_import(&self, input_path: &Path) -> Result<export::ImportResult> {
        export::import_session(&self.config, input_path)
    }

    // -- analytics.* ------------------------------------------------------

    pub fn analytics_summary(&self) -> analytics::SummaryStats {
        analytics::summary(&self.config)
    }

    pub fn analytics_project(&self, project: &str) -> analytics::ProjectStats {
        analytics::project(&self.config, project)
    }

    pub fn analytics_timeline(&self, days: u32) -> analytics::ActivityTimeline {
        analytics::timeline(&self.config, days)
    }

    pub fn analytics_tags(&self) -> Vec<analytics::TagStats> {
        analytics::tags(&self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn start_status_end_round_trip() {
        let dir = tempdir().unwrap();
        let mut engine = Engine::new(EngineConfig::new(dir.path()));

        let start = engine.session_start("proj".into(), "/tmp/proj".into(), "ship it".into(), ValueMap::new()).await.unwrap();
        assert_eq!(start.status, "started");

        let status = engine.session_status().await.unwrap();
        assert_eq!(status.session.session_id, start.session_id);

        let end = engine.session_end(Some("done".into())).await.unwrap();
        assert_eq!(end.status, "ended");
    }

    #[tokio::test]
    async fn template_use_seeds_tags_and_goal() {
        let dir = tempdir().unwrap();
        let mut engine = Engine::new(EngineConfig::new(dir.path()));

        let mut vars = std::collections::BTreeMap::new();
        vars.insert("description".into(), "crash on startup".into());

        let start = engine.template_use("bugfix", "proj".into(), "/tmp/proj".into(), &vars).await.unwrap();
        assert_eq!(start.goal, "Fix bug: crash on startup");

        let status = engine.session_status().await.unwrap();
        assert!(status.session.tags.contains(&"bugfix".to_string()));
    }

    #[tokio::test]
    async fn doc_add_hashes_local_file_content() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("notes.txt");
        std::fs::write(&file_path, b"hello world").unwrap();

        let mut engine = Engine::new(EngineConfig::new(dir.path()));
        engine.session_start("proj".into(), "/tmp/proj".into(), "goal".into(), ValueMap::new()).await.unwrap();

        engine
            .doc_add("notes", file_path.to_str().unwrap(), DocumentType::File, "design notes")
            .await
            .unwrap();

        let docs = engine.doc_list().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert!(docs[0].content_hash.is_some());
    }

    #[test]
    fn session_clone_resets_counters() {
        let dir = tempdir().unwrap();
        let cfg = EngineConfig::new(dir.path());
        let state = SessionState {
            session_id: "sess_a".into(),
            project: "proj".into(),
            project_path: "/tmp".into(),
            goal: "original".into(),
            started_at: now_iso(),
            updated_at: now_iso(),
            status: SessionStatus::Completed,
            heartbeat_at: now_iso(),
            connection_drops: 3,
            recoveries: 2,
            context: ValueMap::new(),
            metadata: ValueMap::new(),
            name: None,
            github: None,
            documents: Vec::new(),
            tags: Vec::new(),
        };
        session::write_session_file(&cfg, &state).unwrap();

        let new_id = session::clone_session(&cfg, "sess_a", Some("new goal".into())).unwrap();
        let cloned = session::load_session_file(&cfg, &new_id).unwrap();
        assert_eq!(cloned.goal, "new goal");
        assert_eq!(cloned.recoveries, 0);
        assert_eq!(cloned.status, SessionStatus::Paused);
    }
}
