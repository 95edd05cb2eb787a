//! SessionTemplate + TemplateManager (C5) — reusable session presets with
//! seven built-ins, plus user-defined templates persisted alongside them.
//!
//! Adapted from `original_source/server/session/templates.py`'s
//! `SessionTemplate`/`BUILTIN_TEMPLATES`/`TemplateManager`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{CoreError, Result, SessionError};
use crate::io::atomic_write;
use crate::time::now_iso;
use crate::value::ValueMap;

/// A reusable starting point for `start_session`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTemplate {
    pub template_id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub project_pattern: String,
    #[serde(default)]
    pub goal_template: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub documents: Vec<ValueMap>,
    #[serde(default)]
    pub context: ValueMap,
    #[serde(default)]
    pub github_repo: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub use_count: u32,
}

impl SessionTemplate {
    fn builtin(id: &str, name: &str, description: &str, goal_template: &str, tags: &[&str]) -> Self {
        SessionTemplate {
            template_id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            project_pattern: String::new(),
            goal_template: goal_template.to_string(),
            tags: tags.iter().map(|s| s.to_string()).collect(),
            documents: Vec::new(),
            context: ValueMap::new(),
            github_repo: None,
            created_at: String::new(),
            use_count: 0,
        }
    }

    /// Substitute `{placeholder}` tokens in `goal_template` from `vars`.
    /// Unmatched placeholders are left verbatim.
    pub fn render_goal(&self, vars: &BTreeMap<String, String>) -> String {
        let mut goal = self.goal_template.clone();
        for (k, v) in vars {
            goal = goal.replace(&format!("{{{}}}", k), v);
        }
        goal
    }
}

fn builtin_templates() -> Vec<SessionTemplate> {
    use crate::value::Value;

    let mut bugfix = SessionTemplate::builtin(
        "bugfix",
        "Bug Fix",
        "Template for debugging and fixing issues",
        "Fix bug: {description}",
        &["bugfix", "debug"],
    );
    bugfix
        .context
        .insert("workflow".into(), Value::from("investigate -> reproduce -> fix -> test -> document"));

    let mut feature = SessionTemplate::builtin(
        "feature",
        "New Feature",
        "Template for implementing new features",
        "Implement feature: {description}",
        &["feature", "development"],
    );
    feature
        .context
        .insert("workflow".into(), Value::from("design -> implement -> test -> document -> review"));

    let mut refactor = SessionTemplate::builtin(
        "refactor",
        "Refactoring",
        "Template for code refactoring tasks",
        "Refactor: {description}",
        &["refactor", "cleanup"],
    );
    refactor.context.insert("workflow".into(), Value::from("analyze -> plan -> refactor -> test -> verify"));

    let mut research = SessionTemplate::builtin(
        "research",
        "Research & Learning",
        "Template for exploring and learning new topics",
        "Research: {topic}",
        &["research", "learning"],
    );
    research.context.insert("workflow".into(), Value::from("explore -> document -> summarize -> apply"));

    let mut review = SessionTemplate::builtin(
        "review",
        "Code Review",
        "Template for reviewing code changes",
        "Review: {pr_or_changes}",
        &["review", "quality"],
    );
    review.context.insert(
        "checklist".into(),
        Value::Array(vec!["correctness", "security", "performance", "style", "tests"].into_iter().map(Value::from).collect()),
    );

    let mut ops = SessionTemplate::builtin(
        "ops",
        "DevOps Task",
        "Template for infrastructure and operations tasks",
        "DevOps: {task}",
        &["devops", "infrastructure"],
    );
    ops.context.insert(
        "checklist".into(),
        Value::Array(vec!["backup", "test", "deploy", "verify", "document"].into_iter().map(Value::from).collect()),
    );

    vec![
        SessionTemplate::builtin("blank", "Blank Session", "Empty session with no preset configuration", "", &[]),
        bugfix,
        feature,
        refactor,
        research,
        review,
        ops,
    ]
}

fn is_builtin(id: &str) -> bool {
    matches!(id, "blank" | "bugfix" | "feature" | "refactor" | "research" | "review" | "ops")
}

/// Listing row for `template.list()`.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateSummary {
    pub template_id: String,
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub use_count: u32,
    pub is_builtin: bool,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct TemplatesFile {
    templates: Vec<SessionTemplate>,
}

/// C5: the template registry for one engine instance.
pub struct TemplateManager {
    templates: BTreeMap<String, SessionTemplate>,
    path: std::path::PathBuf,
}

impl TemplateManager {
    pub fn load(config: &EngineConfig) -> Self {
        let mut templates = BTreeMap::new();
        for t in builtin_templates() {
            templates.insert(t.template_id.clone(), t);
        }

        let path = config.templates_path();
        if let Ok(raw) = std::fs::read_to_string(&path) {
            if let Ok(file) = serde_json::from_str::<TemplatesFile>(&raw) {
                for t in file.templates {
                    templates.insert(t.template_id.clone(), t);
                }
            } else {
                tracing::warn!(path = %path.display(), "could not parse custom templates file");
            }
        }

        TemplateManager { templates, path }
    }

    fn save(&self) -> Result<()> {
        let custom: Vec<SessionTemplate> =
            self.templates.values().filter(|t| !is_builtin(&t.template_id)).cloned().collect();
        let bytes = serde_json::to_vec_pretty(&TemplatesFile { templates: custom })?;
        atomic_write(&self.path, &bytes).map_err(|e| CoreError::Session(SessionError::Durability { source: e }))
    }

    pub fn list_templates(&self) -> Vec<TemplateSummary> {
        self.templates
            .values()
            .map(|t| TemplateSummary {
                template_id: t.template_id.clone(),
                name: t.name.clone(),
                description: t.description.clone(),
                tags: t.tags.clone(),
                use_count: t.use_count,
                is_builtin: is_builtin(&t.template_id),
            })
            .collect()
    }

    pub fn get_template(&self, template_id: &str) -> Option<&SessionTemplate> {
        self.templates.get(template_id)
    }

    pub fn create_template(
        &mut self,
        name: &str,
        description: &str,
        goal_template: &str,
        tags: Vec<String>,
        context: ValueMap,
        github_repo: Option<String>,
    ) -> Result<String> {
        let id = format!("tmpl_{}", &Uuid::new_v4().simple().to_string()[..8]);
        let template = SessionTemplate {
            template_id: id.clone(),
            name: name.to_string(),
            description: description.to_string(),
            project_pattern: String::new(),
            goal_template: goal_template.to_string(),
            tags,
            documents: Vec::new(),
            context,
            github_repo,
            created_at: now_iso(),
            use_count: 0,
        };
        self.templates.insert(id.clone(), template);
        self.save()?;
        Ok(id)
    }

    pub fn create_template_from_session(
        &mut self,
        state: &crate::session::SessionState,
        name: &str,
        description: &str,
    ) -> Result<String> {
        let id = format!("tmpl_{}", &Uuid::new_v4().simple().to_string()[..8]);
        let description = if description.is_empty() {
            format!("Created from session {}", state.session_id)
        } else {
            description.to_string()
        };
        let template = SessionTemplate {
            template_id: id.clone(),
            name: name.to_string(),
            description,
            project_pattern: state.project.clone(),
            goal_template: state.goal.clone(),
            tags: state.tags.clone(),
            documents: Vec::new(),
            context: state.context.clone(),
            github_repo: state.github.as_ref().map(|g| g.repo_url.clone()),
            created_at: now_iso(),
            use_count: 0,
        };
        self.templates.insert(id.clone(), template);
        self.save()?;
        Ok(id)
    }

    pub fn delete_template(&mut self, template_id: &str) -> Result<()> {
        if is_builtin(template_id) {
            return Err(CoreError::Session(SessionError::BuiltinTemplate(template_id.to_string())));
        }
        if self.templates.remove(template_id).is_none() {
            return Err(CoreError::Session(SessionError::TemplateNotFound(template_id.to_string())));
        }
        self.save()
    }

    pub fn record_use(&mut self, template_id: &str) -> Result<()> {
        let template = self
            .templates
            .get_mut(template_id)
            .ok_or_else(|| CoreError::Session(SessionError::TemplateNotFound(template_id.to_string())))?;
        template.use_count += 1;
        if !is_builtin(template_id) {
            self.save()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn seven_builtins_present() {
        let dir = tempdir().unwrap();
        let cfg = EngineConfig::new(dir.path());
        let mgr = TemplateManager::load(&cfg);
        let ids: Vec<&str> = mgr.list_templates().iter().map(|t| t.template_id.as_str()).collect();
        for expected in ["blank", "bugfix", "feature", "refactor", "research", "review", "ops"] {
            assert!(ids.contains(&expected), "missing builtin {}", expected);
        }
    }

    #[test]
    fn builtins_cannot_be_deleted() {
        let dir = tempdir().unwrap();
        let cfg = EngineConfig::new(dir.path());
        let mut mgr = TemplateManager::load(&cfg);
        let err = mgr.delete_template("bugfix");
        assert!(err.is_err());
    }

    #[test]
    fn custom_template_persists_across_loads() {
        let dir = tempdir().unwrap();
        let cfg = EngineConfig::new(dir.path());
        let id = {
            let mut mgr = TemplateManager::load(&cfg);
            mgr.create_template("My Template", "desc", "Do {thing}", vec!["x".into()], ValueMap::new(), None).unwrap()
        };
        let mgr2 = TemplateManager::load(&cfg);
        assert!(mgr2.get_template(&id).is_some());
    }

    #[test]
    fn render_goal_substitutes_placeholders() {
        let dir = tempdir().unwrap();
        let cfg = EngineConfig::new(dir.path());
        let mgr = TemplateManager::load(&cfg);
        let tmpl = mgr.get_template("bugfix").unwrap();
        let mut vars = BTreeMap::new();
        vars.insert("description".to_string(), "null pointer".to_string());
        assert_eq!(tmpl.render_goal(&vars), "Fix bug: null pointer");
    }

    #[test]
    fn record_use_increments_count() {
        let dir = tempdir().unwrap();
        let cfg = EngineConfig::new(dir.path());
        let mut mgr = TemplateManager::load(&cfg);
        mgr.record_use("bugfix").unwrap();
        assert_eq!(mgr.get_template("bugfix").unwrap().use_count, 1);
    }
}
