//! SessionExporter (C5) — export a session (optionally with its checkpoints
//! and WAL) to a portable JSON envelope, and import/clone one back in.
//!
//! Adapted from `original_source/server/session/templates.py`'s
//! `SessionExporter`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::checkpoint::Checkpoint;
use crate::config::EngineConfig;
use crate::error::{CoreError, Result, SessionError};
use crate::io::atomic_write;
use crate::session::{self, SessionState, SessionStatus};
use crate::time::now_iso;
use crate::wal::WalEntry;

const ENVELOPE_VERSION: &str = "1.0";

/// The portable on-disk export format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportEnvelope {
    pub version: String,
    pub exported_at: String,
    pub session: SessionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoints: Option<Vec<Checkpoint>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wal: Option<Vec<WalEntry>>,
}

/// Result of a single export.
#[derive(Debug, Clone, Serialize)]
pub struct ExportResult {
    pub session_id: String,
    pub output_path: PathBuf,
    pub size_bytes: u64,
}

/// Result of an import.
#[derive(Debug, Clone, Serialize)]
pub struct ImportResult {
    pub session_id: String,
    pub output_path: PathBuf,
}

fn read_checkpoints(config: &EngineConfig, session_id: &str) -> Vec<Checkpoint> {
    let dir = config.checkpoints_dir();
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return Vec::new();
    };
    let mut checkpoints: Vec<Checkpoint> = entries
        .filter_map(|e| e.ok())
        .filter(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            name.starts_with(&format!("ckpt_{}", session_id)) && name.ends_with(".json")
        })
        .filter_map(|e| {
            let raw = std::fs::read_to_string(e.path()).ok()?;
            let value: serde_json::Value = serde_json::from_str(&raw).ok()?;
            serde_json::from_value::<Checkpoint>(value).ok()
        })
        .collect();
    checkpoints.sort_by_key(|c| c.sequence);
    checkpoints
}

fn read_wal_entries(config: &EngineConfig, session_id: &str) -> Vec<WalEntry> {
    let dir = config.wal_dir();
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            name.starts_with(&format!("wal_{}", session_id)) && name.ends_with(".log")
        })
        .map(|e| e.path())
        .collect();
    files.sort();

    let mut out = Vec::new();
    for path in files {
        let Ok(raw) = std::fs::read_to_string(&path) else {
            continue;
        };
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(entry) = serde_json::from_str::<WalEntry>(line) {
                out.push(entry);
            }
        }
    }
    out.sort_by_key(|e| e.sequence);
    out
}

/// Export one session to `output_path`, or a default path under the
/// session directory if `output_path` is `None`.
pub fn export_session(
    config: &EngineConfig,
    session_id: &str,
    output_path: Option<&Path>,
    include_checkpoints: bool,
    include_wal: bool,
) -> Result<ExportResult> {
    let state =
        session::load_session_file(config, session_id).ok_or_else(|| CoreError::Session(SessionError::NotFound(session_id.to_string())))?;

    let envelope = ExportEnvelope {
        version: ENVELOPE_VERSION.to_string(),
        exported_at: now_iso(),
        session: state,
        checkpoints: include_checkpoints.then(|| read_checkpoints(config, session_id)),
        wal: include_wal.then(|| read_wal_entries(config, session_id)),
    };

    let path = output_path.map(PathBuf::from).unwrap_or_else(|| {
        config
            .session_dir()
            .join(format!("session_export_{}_{}.json", session_id, now_iso().replace([':', '.'], "-")))
    });

    let bytes = serde_json::to_vec_pretty(&envelope)?;
    atomic_write(&path, &bytes).map_err(|e| CoreError::Session(SessionError::Durability { source: e }))?;

    Ok(ExportResult {
        session_id: session_id.to_string(),
        output_path: path,
        size_bytes: bytes.len() as u64,
    })
}

/// Export every known session to `output_dir`, checkpoints and WAL excluded.
pub fn export_all_sessions(config: &EngineConfig, output_dir: &Path) -> Result<Vec<ExportResult>> {
    let sessions = session::load_all_sessions(config);
    let mut results = Vec::new();
    for (_, state) in sessions {
        let path = output_dir.join(format!("session_export_{}.json", state.session_id));
        results.push(export_session(config, &state.session_id, Some(&path), false, false)?);
    }
    Ok(results)
}

/// Import an exported envelope, assigning it a fresh session id and marking
/// it `imported`. The original file is left untouched.
pub fn import_session(config: &EngineConfig, envelope_path: &Path) -> Result<ImportResult> {
    let raw = std::fs::read_to_string(envelope_path).map_err(|e| CoreError::Session(SessionError::Durability { source: e }))?;
    let envelope: ExportEnvelope = serde_json::from_str(&raw)?;

    let old_id = envelope.session.session_id.clone();
    let new_id = format!("imported_{}_{}", old_id, &Uuid::new_v4().simple().to_string()[..4]);

    let mut state = envelope.session;
    state.session_id = new_id.clone();
    state.status = SessionStatus::Imported;
    state.updated_at = now_iso();

    session::write_session_file(config, &state)?;

    Ok(ImportResult {
        session_id: new_id,
        output_path: config.session_state_path(&state.session_id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueMap;
    use tempfile::tempdir;

    fn sample_state(id: &str) -> SessionState {
        SessionState {
            session_id: id.to_string(),
            project: "proj".into(),
            project_path: "/tmp/proj".into(),
            goal: "ship it".into(),
            started_at: now_iso(),
            updated_at: now_iso(),
            status: SessionStatus::Active,
            heartbeat_at: now_iso(),
            connection_drops: 0,
            recoveries: 0,
            context: ValueMap::new(),
            metadata: ValueMap::new(),
            name: None,
            github: None,
            documents: Vec::new(),
            tags: Vec::new(),
        }
    }

    #[test]
    fn export_then_import_round_trips_with_new_id() {
        let dir = tempdir().unwrap();
        let cfg = EngineConfig::new(dir.path());
        let state = sample_state("sess_a");
        session::write_session_file(&cfg, &state).unwrap();

        let exported = export_session(&cfg, "sess_a", None, false, false).unwrap();
        assert_eq!(exported.session_id, "sess_a");

        let imported = import_session(&cfg, &exported.output_path).unwrap();
        assert_ne!(imported.session_id, "sess_a");
        assert!(imported.session_id.starts_with("imported_sess_a_"));

        let reloaded = session::load_session_file(&cfg, &imported.session_id).unwrap();
        assert_eq!(reloaded.status, SessionStatus::Imported);
    }

    #[test]
    fn export_missing_session_errors() {
        let dir = tempdir().unwrap();
        let cfg = EngineConfig::new(dir.path());
        assert!(export_session(&cfg, "nope", None, false, false).is_err());
    }

    #[test]
    fn export_all_sessions_writes_one_file_each() {
        let dir = tempdir().unwrap();
        let cfg = EngineConfig::new(dir.path());
        session::write_session_file(&cfg, &sample_state("a")).unwrap();
        session::write_session_file(&cfg, &sample_state("b")).unwrap();

        let out_dir = tempdir().unwrap();
        let results = export_all_sessions(&cfg, out_dir.path()).unwrap();
        assert_eq!(results.len(), 2);
        for r in &results {
            assert!(r.output_path.exists());
        }
    }
}
