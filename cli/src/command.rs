//! Command — the typed interface for every subcommand this CLI exposes.
//!
//! Each variant mirrors one entry from the tool surface: `session.start`,
//! `op.retry`, `template.use`, and so on. The CLI never talks to a daemon —
//! it opens the engine's data directory directly and runs to completion.

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SessionStart { project: String, project_path: String, goal: String },
    SessionResume { session_id: Option<String> },
    SessionStatus,
    SessionCheckpoint,
    SessionEnd { summary: Option<String> },
    SessionList { limit: usize },
    SessionRename { name: String },
    SessionSearch { query: Option<String>, tags: Vec<String>, project: Option<String>, status: Option<String>, limit: usize },
    SessionDelete { session_id: String },
    SessionClone { session_id: String, new_goal: Option<String> },
    SessionExport { session_id: String, output_path: Option<String>, include_checkpoints: bool },
    SessionImport { input_path: String },

    OpStatus { op_id: String },
    OpList { filter: String, limit: Option<usize> },
    OpRetry { op_id: String },
    OpCancel { op_id: String },

    ContextSet { key: String, value: String },
    ContextGet { key: String },

    GithubConnect { repo_url: String, branch: Option<String> },
    GithubDisconnect,
    GithubInfo,

    DocAdd { name: String, path: String, doc_type: Option<String>, description: Option<String> },
    DocRemove { doc_id: String },
    DocList,

    TagsAdd { tags: Vec<String> },
    TagsRemove { tags: Vec<String> },

    TemplateList,
    TemplateUse { template_id: String, project: String, project_path: String, goal_vars: Vec<(String, String)> },
    TemplateCreate { name: String, description: String, goal_template: String },
    TemplateFromSession { name: String, description: String },

    AnalyticsSummary,
    AnalyticsProject { project: String },
    AnalyticsTimeline { days: u32 },
    AnalyticsTags,

    Help { topic: Option<String> },
}
