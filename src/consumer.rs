//! Ingestion consumer: turns an inbound chunk message into a persisted
//! batch plus its entries.

use crate::db::{self, Batch, Pool};
use crate::entries::build_entries;
use crate::metrics::Metrics;
use crate::model::{BatchName, ChunkMessage};
use crate::queue::ChunkQueue;
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Persist one chunk as a batch in a single transaction.
///
/// Any failure aborts without partial persistence; the unacked message is
/// redelivered and `create_batch`'s name dedup makes the re-run harmless.
#[instrument(skip_all, fields(job_id = msg.job_id, chunk_id = msg.chunk_id))]
pub async fn handle_chunk(pool: &Pool, metrics: &dyn Metrics, msg: &ChunkMessage) -> Result<Batch> {
    let name = BatchName::new(msg.job_id, msg.chunk_id);
    let mut entries = Vec::with_capacity(msg.items.len());
    for item in &msg.items {
        entries.extend(build_entries(item, msg.priority, &name));
    }
    let batch = db::create_batch(pool, &name, &entries)
        .await
        .with_context(|| format!("failed to persist batch {}", name))?;
    metrics.chunk_ingested(entries.len());
    info!(
        batch_id = batch.id,
        entries = entries.len(),
        status = batch.status.as_str(),
        "chunk ingested"
    );
    Ok(batch)
}

/// Queue-driven consumer loop. Runs until the task is dropped; several
/// instances may run in parallel against the same store.
pub async fn run_consumer(
    queue: &dyn ChunkQueue,
    pool: &Pool,
    metrics: &dyn Metrics,
    idle_sleep: Duration,
) {
    loop {
        match queue.receive().await {
            Ok(Some(delivery)) => {
                match handle_chunk(pool, metrics, &delivery.message).await {
                    Ok(_) => {
                        if let Err(err) = queue.ack(&delivery.receipt).await {
                            // The broker will redeliver; dedup absorbs it.
                            warn!(?err, receipt = %delivery.receipt, "failed to ack delivery");
                        }
                    }
                    Err(err) => {
                        warn!(?err, receipt = %delivery.receipt, "failed to ingest chunk, leaving unacked");
                    }
                }
            }
            Ok(None) => tokio::time::sleep(idle_sleep).await,
            Err(err) => {
                warn!(?err, "queue receive failed");
                tokio::time::sleep(idle_sleep).await;
            }
        }
    }
}
