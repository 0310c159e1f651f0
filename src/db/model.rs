use crate::model::{BatchStatus, Diagnostic, EntryStatus};
use chrono::{DateTime, Utc};

/// Persisted batch row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub id: i64,
    pub name: String,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
}

/// Persisted batch entry with its ordered diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub id: i64,
    pub batch_id: i64,
    pub status: EntryStatus,
    pub content: Vec<u8>,
    pub metadata: String,
    pub continued: bool,
    pub tracking_id: String,
    pub priority: i64,
    pub diagnostics: Vec<Diagnostic>,
}
