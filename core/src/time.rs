//! Timestamp and id helpers.
//!
//! All persisted timestamps are UTC strings with a trailing `Z`, never
//! wall-clock-local times, so the JSON format stays portable.

use chrono::Utc;
use uuid::Uuid;

/// Current time as an RFC-3339 string with a trailing `Z`.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Current time as epoch milliseconds, for checkpoint-id timestamps and
/// interval arithmetic where a string isn't wanted.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// `{session_id}_{YYYYMMDD_HHMMSS_mmm}` — millisecond resolution so
/// checkpoints created within the same wall-clock second still get
/// distinct, monotonically increasing ids.
pub fn checkpoint_id(session_id: &str) -> String {
    let now = Utc::now();
    format!("{}_{}_{:03}", session_id, now.format("%Y%m%d_%H%M%S"), now.timestamp_subsec_millis())
}

/// `rsess_<timestamp>_<short-hex>` session id.
pub fn session_id() -> String {
    let ts = Utc::now().format("%Y%m%d%H%M%S");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("rsess_{}_{}", ts, &suffix[..8])
}

/// `op_<short-hex>` operation id.
pub fn op_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("op_{}", &suffix[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_iso_ends_with_z() {
        assert!(now_iso().ends_with('Z'));
    }

    #[test]
    fn session_id_has_expected_prefix() {
        let id = session_id();
        assert!(id.starts_with("rsess_"));
    }

    #[test]
    fn op_id_has_expected_prefix_and_length() {
        let id = op_id();
        assert!(id.starts_with("op_"));
        assert_eq!(id.len(), "op_".len() + 12);
    }

    #[test]
    fn op_ids_are_unique() {
        assert_ne!(op_id(), op_id());
    }
}
