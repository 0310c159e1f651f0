//! Job-authority client.
//!
//! The only call this sink makes is the idempotent chunk upload: the job
//! store silently accepts a duplicate chunk for the same (job, chunk)
//! pair, which is what makes the finalizer's crash-then-retry safe.

use crate::model::ResultChunk;
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("invalid job-store URL: {0}")]
    Url(String),
    #[error("failed to reach job-store: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("job-store responded {status}: {body}")]
    Http { status: StatusCode, body: String },
}

#[async_trait]
pub trait JobStoreService: Send + Sync {
    /// Upload a result chunk. Safe to call more than once for the same
    /// (job id, chunk id); duplicates are accepted without effect.
    async fn add_chunk_ignoring_duplicates(&self, chunk: &ResultChunk) -> Result<(), JobStoreError>;
}

#[derive(Clone)]
pub struct JobStoreClient {
    http: Client,
    base_url: Url,
}

impl fmt::Debug for JobStoreClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobStoreClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl JobStoreClient {
    /// `timeout` bounds the whole upload call; a timed-out upload surfaces
    /// as a retryable transport error and the batch stays claimed-but-intact.
    pub fn new(base_url: Url, timeout: Duration) -> Self {
        let http = Client::builder()
            .user_agent("batch-exchange-sink/0.1")
            .timeout(timeout)
            .build()
            .expect("reqwest client");
        Self { http, base_url }
    }

    fn chunk_url(&self, job_id: i64, chunk_id: i64) -> Result<Url, JobStoreError> {
        self.base_url
            .join(&format!("jobs/{}/chunks/{}", job_id, chunk_id))
            .map_err(|err| JobStoreError::Url(err.to_string()))
    }
}

#[async_trait]
impl JobStoreService for JobStoreClient {
    async fn add_chunk_ignoring_duplicates(&self, chunk: &ResultChunk) -> Result<(), JobStoreError> {
        let url = self.chunk_url(chunk.job_id, chunk.chunk_id)?;
        let res = self.http.post(url).json(chunk).send().await?;

        if res.status() == StatusCode::CONFLICT {
            info!(
                job_id = chunk.job_id,
                chunk_id = chunk.chunk_id,
                "job-store already has this chunk, ignoring duplicate"
            );
            return Ok(());
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(JobStoreError::Http { status, body });
        }
        Ok(())
    }
}
