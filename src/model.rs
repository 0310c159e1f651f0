use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Severity of a diagnostic attached to a batch entry.
///
/// `Ok` diagnostics are informational; they show up in the rendered log
/// text but are dropped from the result item's diagnostic list.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Ok,
    Warning,
    Error,
    Fatal,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Ok => "OK",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }

    pub fn parse(s: &str) -> Option<Severity> {
        match s {
            "OK" => Some(Severity::Ok),
            "WARNING" => Some(Severity::Warning),
            "ERROR" => Some(Severity::Error),
            "FATAL" => Some(Severity::Fatal),
            _ => None,
        }
    }

    /// Label used when rendering the consumer-system log text. The
    /// downstream log format has no FATAL level, so FATAL renders as ERROR.
    pub fn consumer_label(&self) -> &'static str {
        match self {
            Severity::Ok => "OK",
            Severity::Warning => "WARNING",
            Severity::Error | Severity::Fatal => "ERROR",
        }
    }

    /// Whether this severity forces the owning result item to FAILURE.
    pub fn is_failure(&self) -> bool {
        matches!(self, Severity::Error | Severity::Fatal)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }
}

/// Persisted state of a batch entry.
///
/// This core only ever writes `Pending`, `Ignored` and `Failed`. `Ok` is
/// written by the external batch-exchange system once it has delivered a
/// pending entry; we recognise it when reassembling the result chunk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EntryStatus {
    Pending,
    Ok,
    Ignored,
    Failed,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "PENDING",
            EntryStatus::Ok => "OK",
            EntryStatus::Ignored => "IGNORED",
            EntryStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<EntryStatus> {
        match s {
            "PENDING" => Some(EntryStatus::Pending),
            "OK" => Some(EntryStatus::Ok),
            "IGNORED" => Some(EntryStatus::Ignored),
            "FAILED" => Some(EntryStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BatchStatus {
    Pending,
    Completed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "PENDING",
            BatchStatus::Completed => "COMPLETED",
        }
    }

    pub fn parse(s: &str) -> Option<BatchStatus> {
        match s {
            "PENDING" => Some(BatchStatus::Pending),
            "COMPLETED" => Some(BatchStatus::Completed),
            _ => None,
        }
    }
}

/// Delivery outcome assigned to a chunk item by upstream processing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ItemOutcome {
    Failure,
    Ignore,
    Success,
}

/// One record-level unit within an inbound chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkItem {
    pub id: i64,
    pub outcome: ItemOutcome,
    #[serde(default)]
    pub tracking_id: Option<String>,
    /// Addi container payload; meaningful only for `Success` items.
    #[serde(default)]
    pub data: Vec<u8>,
}

/// Inbound chunk message as delivered by the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMessage {
    pub job_id: i64,
    pub chunk_id: i64,
    pub priority: i64,
    pub items: Vec<ChunkItem>,
}

/// Status of a result item reported back to the job authority.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResultItemStatus {
    Failure,
    Ignore,
    Success,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultItem {
    pub id: i64,
    pub status: ResultItemStatus,
    pub diagnostics: Vec<Diagnostic>,
    /// Rendered consumer-system log text.
    pub data: String,
    pub tracking_id: String,
}

/// Result chunk uploaded to the job authority once a batch completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultChunk {
    pub job_id: i64,
    pub chunk_id: i64,
    pub items: Vec<ResultItem>,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid batch name '{0}': expected '<jobId>-<chunkId>'")]
pub struct BatchNameError(pub String);

/// Canonical batch identifier, `"<jobId>-<chunkId>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchName {
    pub job_id: i64,
    pub chunk_id: i64,
}

impl BatchName {
    pub fn new(job_id: i64, chunk_id: i64) -> Self {
        Self { job_id, chunk_id }
    }
}

impl fmt::Display for BatchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.job_id, self.chunk_id)
    }
}

impl FromStr for BatchName {
    type Err = BatchNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('-').collect();
        let [job, chunk] = parts.as_slice() else {
            return Err(BatchNameError(s.to_string()));
        };
        let job_id = job.parse().map_err(|_| BatchNameError(s.to_string()))?;
        let chunk_id = chunk.parse().map_err(|_| BatchNameError(s.to_string()))?;
        Ok(BatchName { job_id, chunk_id })
    }
}
