use chrono::{DateTime, Utc};
use serde::Serialize;

/// Operator view of the dispatcher. Slot indices are 1-based here, as they
/// are in logs.
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStats {
    pub total_keys: usize,
    pub healthy_keys: usize,
    pub unhealthy_keys: usize,
    pub current_key_index: usize,
    pub preambles_loaded: usize,
    pub active_chat_sessions: usize,
    pub total_errors: u64,
    pub key_statuses: Vec<KeyStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeyStats {
    pub index: usize,
    pub healthy: bool,
    pub error_count: u32,
    pub last_used: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub preamble_loaded: bool,
}

/// Outcome of one probe round across all keys.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthReport {
    /// 0-based slots that answered the probe
    pub healthy: Vec<usize>,
    /// 0-based slots that failed, with the error text
    pub failed: Vec<(usize, String)>,
}

impl HealthReport {
    #[must_use]
    pub fn all_healthy(&self) -> bool {
        self.failed.is_empty()
    }
}
