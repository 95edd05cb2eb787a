//! Explicit engine configuration.
//!
//! The source material keeps one module-level singleton per component
//! (tracker, WAL, checkpointer, manager). The underlying requirement is a
//! single logical owner per process, not a global — so every policy knob is
//! collected here and passed explicitly to `Engine::new`, which makes
//! construction (and therefore test isolation) an ordinary function call.

use std::path::PathBuf;

/// All policy knobs for one engine instance, plus the base directory its
/// session data lives under.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root directory; session data lives under `<base>/data/session/`.
    pub base_dir: PathBuf,

    /// WAL file rotates once the next append would exceed this size.
    pub max_wal_size_bytes: u64,
    /// WAL writes an internal `CHECKPOINT` marker every this-many entries.
    pub wal_checkpoint_interval: u64,

    /// Maximum checkpoints retained per session; older ones are pruned.
    pub max_checkpoints: usize,
    /// Checkpoint is due once this many operations have completed since
    /// the last one.
    pub auto_checkpoint_ops: u64,
    /// Checkpoint is due once this many seconds have elapsed since the
    /// last one.
    pub auto_checkpoint_secs: u64,

    /// Heartbeat write interval.
    pub heartbeat_interval_secs: u64,
    /// A session is considered dropped by observers once its heartbeat is
    /// older than this. Read-side heuristic only; not enforced here.
    pub drop_detection_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            base_dir: PathBuf::from("."),
            max_wal_size_bytes: 10 * 1024 * 1024,
            wal_checkpoint_interval: 100,
            max_checkpoints: 10,
            auto_checkpoint_ops: 10,
            auto_checkpoint_secs: 300,
            heartbeat_interval_secs: 30,
            drop_detection_timeout_secs: 120,
        }
    }
}

impl EngineConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        EngineConfig {
            base_dir: base_dir.into(),
            ..Default::default()
        }
    }

    pub fn session_dir(&self) -> PathBuf {
        self.base_dir.join("data").join("session")
    }

    pub fn session_state_path(&self, session_id: &str) -> PathBuf {
        self.session_dir().join(format!("robust_{}.json", session_id))
    }

    pub fn operations_dir(&self) -> PathBuf {
        self.session_dir().join("operations")
    }

    pub fn operations_path(&self, session_id: &str) -> PathBuf {
        self.operations_dir().join(format!("ops_{}.json", session_id))
    }

    pub fn wal_dir(&self) -> PathBuf {
        self.session_dir().join("wal")
    }

    pub fn wal_path(&self, session_id: &str, index: u32) -> PathBuf {
        if index == 0 {
            self.wal_dir().join(format!("wal_{}.log", session_id))
        } else {
            self.wal_dir().join(format!("wal_{}.{}.log", session_id, index))
        }
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.session_dir().join("checkpoints")
    }

    pub fn checkpoint_path(&self, checkpoint_id: &str) -> PathBuf {
        self.checkpoints_dir().join(format!("ckpt_{}.json", checkpoint_id))
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.session_dir().join("templates")
    }

    pub fn templates_path(&self) -> PathBuf {
        self.templates_dir().join("custom_templates.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.max_wal_size_bytes, 10 * 1024 * 1024);
        assert_eq!(cfg.wal_checkpoint_interval, 100);
        assert_eq!(cfg.max_checkpoints, 10);
        assert_eq!(cfg.auto_checkpoint_ops, 10);
        assert_eq!(cfg.auto_checkpoint_secs, 300);
        assert_eq!(cfg.heartbeat_interval_secs, 30);
        assert_eq!(cfg.drop_detection_timeout_secs, 120);
    }

    #[test]
    fn paths_follow_layout() {
        let cfg = EngineConfig::new("/base");
        assert_eq!(
            cfg.session_state_path("abc"),
            PathBuf::from("/base/data/session/robust_abc.json")
        );
        assert_eq!(
            cfg.operations_path("abc"),
            PathBuf::from("/base/data/session/operations/ops_abc.json")
        );
        assert_eq!(
            cfg.wal_path("abc", 0),
            PathBuf::from("/base/data/session/wal/wal_abc.log")
        );
        assert_eq!(
            cfg.wal_path("abc", 2),
            PathBuf::from("/base/data/session/wal/wal_abc.2.log")
        );
        assert_eq!(
            cfg.templates_path(),
            PathBuf::from("/base/data/session/templates/custom_templates.json")
        );
    }
}
