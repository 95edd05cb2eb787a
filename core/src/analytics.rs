//! SessionAnalytics (C5) — read-only aggregation over persisted session
//! state: fleet-wide summary stats, per-project stats, an activity
//! timeline, and tag usage.
//!
//! Adapted from `original_source/server/session/templates.py`'s
//! `SessionAnalytics`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::EngineConfig;
use crate::session::{self, SessionState, SessionStatus};

#[derive(Debug, Clone, Serialize)]
pub struct SummaryStats {
    pub total_sessions: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_project: BTreeMap<String, usize>,
    pub total_recoveries: u32,
    pub total_connection_drops: u32,
    pub recovery_rate: f64,
    pub avg_session_duration_minutes: f64,
    pub sessions_with_github: usize,
    pub sessions_with_docs: usize,
    pub total_documents: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectStats {
    pub project: String,
    pub session_count: usize,
    pub recent_goals: Vec<String>,
    pub common_tags: Vec<String>,
    pub total_recoveries: u32,
    pub has_github: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineDay {
    pub date: String,
    pub sessions_started: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityTimeline {
    pub days: Vec<TimelineDay>,
    pub avg_per_day: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TagStats {
    pub tag: String,
    pub count: usize,
    pub projects: Vec<String>,
}

fn status_key(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Active => "active",
        SessionStatus::Paused => "paused",
        SessionStatus::Recovered => "recovered",
        SessionStatus::Completed => "completed",
        SessionStatus::Imported => "imported",
    }
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}

fn all_states(config: &EngineConfig) -> Vec<SessionState> {
    session::load_all_sessions(config).into_iter().map(|(_, s)| s).collect()
}

/// Fleet-wide summary across every known session.
pub fn summary(config: &EngineConfig) -> SummaryStats {
    let sessions = all_states(config);
    let total = sessions.len();

    let mut by_status = BTreeMap::new();
    let mut by_project = BTreeMap::new();
    let mut total_recoveries = 0u32;
    let mut total_connection_drops = 0u32;
    let mut sessions_with_github = 0usize;
    let mut sessions_with_docs = 0usize;
    let mut total_documents = 0usize;
    let mut duration_minutes_sum = 0.0;
    let mut duration_samples = 0usize;

    for s in &sessions {
        *by_status.entry(status_key(s.status).to_string()).or_insert(0) += 1;
        *by_project.entry(s.project.clone()).or_insert(0) += 1;
        total_recoveries += s.recoveries;
        total_connection_drops += s.connection_drops;
        if s.github.is_some() {
            sessions_with_github += 1;
        }
        if !s.documents.is_empty() {
            sessions_with_docs += 1;
        }
        total_documents += s.documents.len();

        if let (Some(start), Some(end)) = (parse_ts(&s.started_at), parse_ts(&s.updated_at)) {
            let minutes = (end - start).num_seconds() as f64 / 60.0;
            if minutes >= 0.0 {
                duration_minutes_sum += minutes;
                duration_samples += 1;
            }
        }
    }

    let recovery_rate = if total > 0 {
        sessions.iter().filter(|s| s.recoveries > 0).count() as f64 / total as f64
    } else {
        0.0
    };
    let avg_session_duration_minutes = if duration_samples > 0 {
        duration_minutes_sum / duration_samples as f64
    } else {
        0.0
    };

    SummaryStats {
        total_sessions: total,
        by_status,
        by_project,
        total_recoveries,
        total_connection_drops,
        recovery_rate,
        avg_session_duration_minutes,
        sessions_with_github,
        sessions_with_docs,
        total_documents,
    }
}

/// Stats scoped to one project.
pub fn project(config: &EngineConfig, project: &str) -> ProjectStats {
    let mut sessions: Vec<SessionState> = all_states(config).into_iter().filter(|s| s.project == project).collect();
    sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

    let recent_goals = sessions.iter().take(5).map(|s| s.goal.clone()).collect();

    let mut seen_tags = Vec::new();
    for s in &sessions {
        for tag in &s.tags {
            if !seen_tags.contains(tag) {
                seen_tags.push(tag.clone());
            }
        }
    }

    ProjectStats {
        project: project.to_string(),
        session_count: sessions.len(),
        recent_goals,
        common_tags: seen_tags,
        total_recoveries: sessions.iter().map(|s| s.recoveries).sum(),
        has_github: sessions.iter().any(|s| s.github.is_some()),
    }
}

/// Sessions started per day over the last `days` days, oldest first, with
/// zero-filled gaps.
pub fn timeline(config: &EngineConfig, days: u32) -> ActivityTimeline {
    let now = Utc::now();
    let cutoff = now - chrono::Duration::days(days as i64);

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for s in all_states(config) {
        if let Some(started) = parse_ts(&s.started_at) {
            if started >= cutoff {
                let day = started.format("%Y-%m-%d").to_string();
                *counts.entry(day).or_insert(0) += 1;
            }
        }
    }

    let mut out = Vec::new();
    for offset in (0..days).rev() {
        let day = (now - chrono::Duration::days(offset as i64)).format("%Y-%m-%d").to_string();
        let sessions_started = counts.get(&day).copied().unwrap_or(0);
        out.push(TimelineDay { date: day, sessions_started });
    }

    let total: usize = out.iter().map(|d| d.sessions_started).sum();
    let avg_per_day = if out.is_empty() { 0.0 } else { total as f64 / out.len() as f64 };

    ActivityTimeline { days: out, avg_per_day }
}

/// Tag usage across every session, most-used first, capped to the top 20.
pub fn tags(config: &EngineConfig) -> Vec<TagStats> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut projects: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for s in all_states(config) {
        for tag in &s.tags {
            *counts.entry(tag.clone()).or_insert(0) += 1;
            let list = projects.entry(tag.clone()).or_default();
            if !list.contains(&s.project) {
                list.push(s.project.clone());
            }
        }
    }

    let mut rows: Vec<TagStats> = counts
        .into_iter()
        .map(|(tag, count)| TagStats {
            projects: projects.remove(&tag).unwrap_or_default(),
            tag,
            count,
        })
        .collect();
    rows.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.tag.cmp(&b.tag)));
    rows.truncate(20);
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueMap;
    use tempfile::tempdir;

    fn state(id: &str, project: &str, tags: &[&str]) -> SessionState {
        SessionState {
            session_id: id.to_string(),
            project: project.to_string(),
            project_path: "/tmp".into(),
            goal: format!("goal for {}", id),
            started_at: "2026-07-20T00:00:00.000Z".into(),
            updated_at: "2026-07-20T01:00:00.000Z".into(),
            status: SessionStatus::Completed,
            heartbeat_at: "2026-07-20T01:00:00.000Z".into(),
            connection_drops: 1,
            recoveries: 1,
            context: ValueMap::new(),
            metadata: ValueMap::new(),
            name: None,
            github: None,
            documents: Vec::new(),
            tags: tags.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn summary_counts_sessions_and_recoveries() {
        let dir = tempdir().unwrap();
        let cfg = EngineConfig::new(dir.path());
        session::write_session_file(&cfg, &state("a", "proj1", &["x"])).unwrap();
        session::write_session_file(&cfg, &state("b", "proj2", &["y"])).unwrap();

        let stats = summary(&cfg);
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.total_recoveries, 2);
        assert_eq!(stats.avg_session_duration_minutes, 60.0);
    }

    #[test]
    fn project_stats_scoped_to_one_project() {
        let dir = tempdir().unwrap();
        let cfg = EngineConfig::new(dir.path());
        session::write_session_file(&cfg, &state("a", "proj1", &["x"])).unwrap();
        session::write_session_file(&cfg, &state("b", "proj2", &["y"])).unwrap();

        let stats = project(&cfg, "proj1");
        assert_eq!(stats.session_count, 1);
        assert_eq!(stats.common_tags, vec!["x".to_string()]);
    }

    #[test]
    fn tag_analysis_sorted_by_count_desc() {
        let dir = tempdir().unwrap();
        let cfg = EngineConfig::new(dir.path());
        session::write_session_file(&cfg, &state("a", "proj1", &["hot", "cold"])).unwrap();
        session::write_session_file(&cfg, &state("b", "proj2", &["hot"])).unwrap();

        let rows = tags(&cfg);
        assert_eq!(rows[0].tag, "hot");
        assert_eq!(rows[0].count, 2);
    }

    #[test]
    fn timeline_zero_fills_missing_days() {
        let dir = tempdir().unwrap();
        let cfg = EngineConfig::new(dir.path());
        let line = timeline(&cfg, 7);
        assert_eq!(line.days.len(), 7);
    }
}
