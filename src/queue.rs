//! Inbound chunk-queue boundary.
//!
//! The queue broker is an external collaborator; the sink only needs
//! receive and ack. Delivery is at-least-once: a delivery that is never
//! acked comes back, so the consumer relies on batch-name dedup rather
//! than on exactly-once semantics.

use crate::model::ChunkMessage;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::fmt;

/// One received chunk message plus the receipt needed to ack it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub receipt: String,
    pub message: ChunkMessage,
}

#[async_trait]
pub trait ChunkQueue: Send + Sync {
    /// Fetch the next delivery, or `None` when the queue is empty.
    async fn receive(&self) -> Result<Option<Delivery>>;

    /// Acknowledge a delivery so the broker stops redelivering it.
    async fn ack(&self, receipt: &str) -> Result<()>;
}

#[derive(Deserialize)]
struct DeliveryPayload {
    receipt: String,
    chunk: ChunkMessage,
}

/// HTTP poll-based queue client.
///
/// `GET {base}/queues/{name}/next` answers 200 with a delivery payload or
/// 204 when the queue is empty; `DELETE {base}/queues/{name}/deliveries/{receipt}`
/// acks.
#[derive(Clone)]
pub struct HttpChunkQueue {
    http: Client,
    base_url: Url,
    queue: String,
}

impl fmt::Debug for HttpChunkQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpChunkQueue")
            .field("base_url", &self.base_url)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl HttpChunkQueue {
    pub fn new(base_url: Url, queue: String) -> Self {
        let http = Client::builder()
            .user_agent("batch-exchange-sink/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            queue,
        }
    }
}

#[async_trait]
impl ChunkQueue for HttpChunkQueue {
    async fn receive(&self) -> Result<Option<Delivery>> {
        let url = self
            .base_url
            .join(&format!("queues/{}/next", self.queue))
            .context("invalid queue base URL")?;
        let res = self
            .http
            .get(url)
            .send()
            .await
            .context("failed to reach queue broker")?;
        if res.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("queue broker error {}: {}", status, body));
        }
        let payload: DeliveryPayload = res
            .json()
            .await
            .context("invalid delivery payload JSON")?;
        Ok(Some(Delivery {
            receipt: payload.receipt,
            message: payload.chunk,
        }))
    }

    async fn ack(&self, receipt: &str) -> Result<()> {
        let url = self
            .base_url
            .join(&format!("queues/{}/deliveries/{}", self.queue, receipt))
            .context("invalid queue base URL")?;
        let res = self
            .http
            .delete(url)
            .send()
            .await
            .context("failed to reach queue broker")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("queue ack error {}: {}", status, body));
        }
        Ok(())
    }
}
