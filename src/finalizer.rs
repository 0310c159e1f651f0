//! Reassembles a completed batch into a result chunk and uploads it to
//! the job authority.

use crate::db::{self, BatchEntry, Pool};
use crate::jobstore::JobStoreService;
use crate::metrics::Metrics;
use crate::model::{BatchName, EntryStatus, ResultChunk, ResultItem, ResultItemStatus};
use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, instrument};

/// Claim the next completed batch, upload its result chunk and retire it.
///
/// Returns `false` when no completed batch exists. A batch name that does
/// not parse is fatal: the stored data needs operator attention, the error
/// is propagated loudly instead of being skipped, and the claim is kept so
/// the failure re-surfaces once per claim-timeout window. Every other
/// failure after the claim (entry load, upload, delete) releases the claim
/// and propagates; the batch stays intact and the next tick retries. The
/// upload is idempotent at the job store, so a crash between upload and
/// delete cannot duplicate the chunk.
#[instrument(skip_all)]
pub async fn finalize_next_completed_batch(
    pool: &Pool,
    jobstore: &dyn JobStoreService,
    metrics: &dyn Metrics,
    claim_timeout_secs: i64,
) -> Result<bool> {
    let Some(batch) = db::claim_next_completed_batch(pool, claim_timeout_secs).await? else {
        return Ok(false);
    };

    let name: BatchName = batch
        .name
        .parse()
        .with_context(|| format!("batch {} has unrecoverable name", batch.id))?;

    let entries = match db::entries_of(pool, batch.id).await {
        Ok(entries) => entries,
        Err(err) => {
            db::release_claim(pool, batch.id).await?;
            return Err(err)
                .with_context(|| format!("failed to load entries for batch {}", name));
        }
    };
    let items = entries
        .iter()
        .enumerate()
        .map(|(index, entry)| result_item(index as i64, entry))
        .collect();
    let chunk = ResultChunk {
        job_id: name.job_id,
        chunk_id: name.chunk_id,
        items,
    };

    if let Err(err) = jobstore.add_chunk_ignoring_duplicates(&chunk).await {
        db::release_claim(pool, batch.id).await?;
        metrics.finalize_failed();
        return Err(err).with_context(|| format!("failed to upload chunk for batch {}", name));
    }

    if let Err(err) = db::delete_batch(pool, batch.id).await {
        // The chunk is already uploaded; re-claiming just repeats the
        // idempotent upload before retrying the delete.
        db::release_claim(pool, batch.id).await?;
        return Err(err).with_context(|| format!("failed to retire batch {}", name));
    }
    metrics.batch_finalized(entries.len());
    info!(
        batch = %name,
        entries = entries.len(),
        age_secs = (Utc::now() - batch.created_at).num_seconds(),
        "batch finalized"
    );
    Ok(true)
}

/// Map one persisted entry to its result item.
///
/// The log text renders every diagnostic in order; the result diagnostics
/// keep only severities above OK. Any ERROR or FATAL diagnostic makes the
/// item a FAILURE regardless of the entry's own status.
fn result_item(id: i64, entry: &BatchEntry) -> ResultItem {
    let mut data = String::new();
    for diagnostic in &entry.diagnostics {
        data.push_str(&format!(
            "Consumer system responded with {}: {}\n",
            diagnostic.severity.consumer_label(),
            diagnostic.message
        ));
    }

    let diagnostics: Vec<_> = entry
        .diagnostics
        .iter()
        .filter(|d| d.severity != crate::model::Severity::Ok)
        .cloned()
        .collect();

    let status = if entry.diagnostics.iter().any(|d| d.severity.is_failure()) {
        ResultItemStatus::Failure
    } else if entry.status == EntryStatus::Ignored {
        ResultItemStatus::Ignore
    } else {
        ResultItemStatus::Success
    };

    ResultItem {
        id,
        status,
        diagnostics,
        data,
        tracking_id: entry.tracking_id.clone(),
    }
}
