//! Persisted session state and the value types it carries: status,
//! GitHub pointer, and attached documents.

use serde::{Deserialize, Serialize};

use crate::value::ValueMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Paused,
    Recovered,
    Completed,
    Imported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    File,
    Url,
    Text,
}

/// A document attached to a session: a file, a URL, or an inline note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: String,
    pub name: String,
    pub path: String,
    pub doc_type: DocumentType,
    pub content_hash: Option<String>,
    pub added_at: String,
    pub description: String,
    pub metadata: ValueMap,
}

/// A connected GitHub repository, parsed from `https://github.com/<owner>/<repo>[.git]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubPointer {
    pub repo_url: String,
    pub owner: String,
    pub repo: String,
    pub branch: Option<String>,
    pub connected_at: String,
}

impl GithubPointer {
    /// Parse an owner/repo pair out of a GitHub HTTPS URL, rejecting
    /// anything else.
    pub fn parse(repo_url: &str, branch: Option<String>, connected_at: String) -> Option<Self> {
        let rest = repo_url.strip_prefix("https://github.com/")?;
        let rest = rest.strip_suffix(".git").unwrap_or(rest);
        let mut parts = rest.splitn(2, '/');
        let owner = parts.next()?;
        let repo = parts.next()?;
        if owner.is_empty() || repo.is_empty() || repo.contains('/') {
            return None;
        }
        Some(GithubPointer {
            repo_url: repo_url.to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            branch,
            connected_at,
        })
    }
}

/// Complete session state, persisted verbatim to `robust_<session_id>.json`
/// and carried inside every checkpoint's `state` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub project: String,
    pub project_path: String,
    pub goal: String,
    pub started_at: String,
    pub updated_at: String,
    pub status: SessionStatus,
    pub heartbeat_at: String,
    #[serde(default)]
    pub connection_drops: u32,
    #[serde(default)]
    pub recoveries: u32,
    #[serde(default)]
    pub context: ValueMap,
    #[serde(default)]
    pub metadata: ValueMap,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub github: Option<GithubPointer>,
    #[serde(default)]
    pub documents: Vec<Document>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn github_parses_https_url_with_git_suffix() {
        let gh = GithubPointer::parse("https://github.com/rust-lang/rust.git", None, "now".into()).unwrap();
        assert_eq!(gh.owner, "rust-lang");
        assert_eq!(gh.repo, "rust");
    }

    #[test]
    fn github_rejects_non_github_url() {
        assert!(GithubPointer::parse("https://gitlab.com/a/b", None, "now".into()).is_none());
    }

    #[test]
    fn github_rejects_missing_repo() {
        assert!(GithubPointer::parse("https://github.com/rust-lang", None, "now".into()).is_none());
    }
}
