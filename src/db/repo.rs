use super::model::{Batch, BatchEntry};
use super::Pool;
use crate::entries::NewEntry;
use crate::model::{BatchName, BatchStatus, Diagnostic, EntryStatus, Severity};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::collections::HashMap;
use tracing::{instrument, warn};

/// Persist a batch and all of its entries in one transaction.
///
/// Batch status is computed once, at creation: COMPLETED iff no entry is
/// PENDING. Creation is idempotent on the batch name so that an at-least-once
/// queue redelivering a chunk cannot produce a second batch; the existing
/// row is returned and nothing is inserted.
#[instrument(skip_all, fields(batch = %name))]
pub async fn create_batch(pool: &Pool, name: &BatchName, entries: &[NewEntry]) -> Result<Batch> {
    let mut tx = pool.begin().await?;

    let name_str = name.to_string();
    if let Some(existing) = fetch_batch_by_name(&mut *tx, &name_str).await? {
        warn!(batch_id = existing.id, "batch already exists, skipping redelivered chunk");
        return Ok(existing);
    }

    let status = if entries.iter().any(|e| e.status == EntryStatus::Pending) {
        BatchStatus::Pending
    } else {
        BatchStatus::Completed
    };

    let row = sqlx::query(
        "INSERT INTO batches (name, status) VALUES (?, ?) RETURNING id, created_at",
    )
    .bind(&name_str)
    .bind(status.as_str())
    .fetch_one(&mut *tx)
    .await?;
    let batch_id: i64 = row.get("id");
    let created_at: DateTime<Utc> = row.get("created_at");

    for entry in entries {
        let entry_id: i64 = sqlx::query(
            "INSERT INTO entries (batch_id, status, content, metadata, continued, tracking_id, priority) \
             VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(batch_id)
        .bind(entry.status.as_str())
        .bind(&entry.content)
        .bind(&entry.metadata)
        .bind(entry.continued)
        .bind(&entry.tracking_id)
        .bind(entry.priority)
        .fetch_one(&mut *tx)
        .await?
        .get("id");

        for (seq, diagnostic) in entry.diagnostics.iter().enumerate() {
            sqlx::query(
                "INSERT INTO diagnostics (entry_id, seq, severity, message) VALUES (?, ?, ?, ?)",
            )
            .bind(entry_id)
            .bind(seq as i64)
            .bind(diagnostic.severity.as_str())
            .bind(&diagnostic.message)
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;
    Ok(Batch {
        id: batch_id,
        name: name_str,
        status,
        created_at,
    })
}

async fn fetch_batch_by_name<'e, E>(executor: E, name: &str) -> Result<Option<Batch>>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let row = sqlx::query("SELECT id, name, status, created_at FROM batches WHERE name = ?")
        .bind(name)
        .fetch_optional(executor)
        .await?;
    row.map(batch_from_row).transpose()
}

fn batch_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Batch> {
    let status_str: String = row.get("status");
    let status = BatchStatus::parse(&status_str)
        .ok_or_else(|| anyhow!("batch has unknown status {}", status_str))?;
    Ok(Batch {
        id: row.get("id"),
        name: row.get("name"),
        status,
        created_at: row.get("created_at"),
    })
}

/// Claim the next batch whose entries have all left PENDING.
///
/// Completion is detected from entry state directly, never from the stored
/// batch status, so batches created PENDING become eligible as soon as the
/// batch-exchange system has resolved their last entry. The claim is an
/// optimistic CAS on `claimed_at`, verified by the affected row count, so
/// two concurrent finalizers never claim the same batch. A claim older than
/// `claim_timeout_secs` is treated as abandoned by a crashed finalizer and
/// may be re-claimed.
#[instrument(skip_all)]
pub async fn claim_next_completed_batch(
    pool: &Pool,
    claim_timeout_secs: i64,
) -> Result<Option<Batch>> {
    let stale = format!("-{} seconds", claim_timeout_secs);
    loop {
        let row = sqlx::query(
            "SELECT b.id, b.name, b.status, b.created_at FROM batches b \
             WHERE (b.claimed_at IS NULL OR datetime(b.claimed_at) <= datetime('now', ?)) \
             AND NOT EXISTS (SELECT 1 FROM entries e WHERE e.batch_id = b.id AND e.status = 'PENDING') \
             ORDER BY b.id ASC LIMIT 1",
        )
        .bind(&stale)
        .fetch_optional(pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let batch = batch_from_row(row)?;

        let claimed = sqlx::query(
            "UPDATE batches SET claimed_at = CURRENT_TIMESTAMP \
             WHERE id = ? AND (claimed_at IS NULL OR datetime(claimed_at) <= datetime('now', ?))",
        )
        .bind(batch.id)
        .bind(&stale)
        .execute(pool)
        .await?;

        if claimed.rows_affected() == 1 {
            return Ok(Some(batch));
        }
        // Lost the race to a concurrent finalizer; look for another batch.
    }
}

/// Release a claim after a failed upload so the next tick retries at once.
#[instrument(skip_all)]
pub async fn release_claim(pool: &Pool, batch_id: i64) -> Result<()> {
    sqlx::query("UPDATE batches SET claimed_at = NULL WHERE id = ?")
        .bind(batch_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Load a batch's entries in insertion order, diagnostics in seq order.
#[instrument(skip_all)]
pub async fn entries_of(pool: &Pool, batch_id: i64) -> Result<Vec<BatchEntry>> {
    let rows = sqlx::query(
        "SELECT id, batch_id, status, content, metadata, continued, tracking_id, priority \
         FROM entries WHERE batch_id = ? ORDER BY id ASC",
    )
    .bind(batch_id)
    .fetch_all(pool)
    .await?;

    let mut diagnostics = diagnostics_by_entry(pool, batch_id).await?;
    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let status_str: String = row.get("status");
        let status = EntryStatus::parse(&status_str)
            .ok_or_else(|| anyhow!("entry has unknown status {}", status_str))?;
        let entry_id: i64 = row.get("id");
        entries.push(BatchEntry {
            id: entry_id,
            batch_id: row.get("batch_id"),
            status,
            content: row.get("content"),
            metadata: row.get("metadata"),
            continued: row.get("continued"),
            tracking_id: row.get("tracking_id"),
            priority: row.get("priority"),
            diagnostics: diagnostics.remove(&entry_id).unwrap_or_default(),
        });
    }
    Ok(entries)
}

/// One round trip for every diagnostic of the batch, grouped per entry
/// with seq order preserved.
async fn diagnostics_by_entry(
    pool: &Pool,
    batch_id: i64,
) -> Result<HashMap<i64, Vec<Diagnostic>>> {
    let rows = sqlx::query(
        "SELECT d.entry_id, d.severity, d.message FROM diagnostics d \
         JOIN entries e ON e.id = d.entry_id \
         WHERE e.batch_id = ? ORDER BY d.entry_id ASC, d.seq ASC",
    )
    .bind(batch_id)
    .fetch_all(pool)
    .await?;

    let mut grouped: HashMap<i64, Vec<Diagnostic>> = HashMap::new();
    for row in rows {
        let severity_str: String = row.get("severity");
        let severity = Severity::parse(&severity_str)
            .ok_or_else(|| anyhow!("diagnostic has unknown severity {}", severity_str))?;
        grouped
            .entry(row.get("entry_id"))
            .or_default()
            .push(Diagnostic {
                severity,
                message: row.get("message"),
            });
    }
    Ok(grouped)
}

/// Delete a batch together with its entries and their diagnostics.
#[instrument(skip_all)]
pub async fn delete_batch(pool: &Pool, batch_id: i64) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        "DELETE FROM diagnostics WHERE entry_id IN (SELECT id FROM entries WHERE batch_id = ?)",
    )
    .bind(batch_id)
    .execute(&mut *tx)
    .await?;
    sqlx::query("DELETE FROM entries WHERE batch_id = ?")
        .bind(batch_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM batches WHERE id = ?")
        .bind(batch_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}
