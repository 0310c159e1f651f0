//! Maps one inbound chunk item to the batch entries persisted for it.

use crate::model::{BatchName, ChunkItem, Diagnostic, EntryStatus, ItemOutcome, Severity};
use crate::records::split_records;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use thiserror::Error;

/// A batch entry that has not yet been persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub status: EntryStatus,
    pub content: Vec<u8>,
    pub metadata: String,
    pub continued: bool,
    pub tracking_id: String,
    pub priority: i64,
    pub diagnostics: Vec<Diagnostic>,
}

impl NewEntry {
    fn terminal(status: EntryStatus, tracking_id: String, priority: i64, diagnostic: Diagnostic) -> Self {
        Self {
            status,
            content: Vec::new(),
            metadata: String::new(),
            continued: false,
            tracking_id,
            priority,
            diagnostics: vec![diagnostic],
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoutingMetadataError {
    #[error("record metadata is not valid UTF-8")]
    NotUtf8,
    #[error("record metadata has no submitter attribute")]
    MissingSubmitter,
}

static SUBMITTER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"submitter\s*=\s*"([^"]*)""#).expect("valid submitter regex"));

/// Re-encode the record's XML metadata fragment as the JSON routing object
/// understood by the batch-exchange system.
pub fn routing_metadata(metadata: &[u8]) -> Result<String, RoutingMetadataError> {
    let text = std::str::from_utf8(metadata).map_err(|_| RoutingMetadataError::NotUtf8)?;
    let captures = SUBMITTER_RE
        .captures(text)
        .ok_or(RoutingMetadataError::MissingSubmitter)?;
    Ok(json!({ "submitter": &captures[1] }).to_string())
}

/// Build the ordered entry list for one chunk item.
///
/// FAILURE and IGNORE items collapse to a single IGNORED entry. SUCCESS
/// items are split into one PENDING entry per addi record; any framing or
/// routing-metadata failure collapses the whole item to a single FAILED
/// entry carrying the parse failure as an ERROR diagnostic.
pub fn build_entries(item: &ChunkItem, priority: i64, batch_name: &BatchName) -> Vec<NewEntry> {
    let item_tracking_id = item.tracking_id.clone().unwrap_or_default();
    match item.outcome {
        ItemOutcome::Failure => vec![NewEntry::terminal(
            EntryStatus::Ignored,
            item_tracking_id,
            priority,
            Diagnostic::new(Severity::Ok, "Failed by processor"),
        )],
        ItemOutcome::Ignore => vec![NewEntry::terminal(
            EntryStatus::Ignored,
            item_tracking_id,
            priority,
            Diagnostic::new(Severity::Ok, "Ignored by processor"),
        )],
        ItemOutcome::Success => match split_success_item(item, priority, batch_name) {
            Ok(entries) => entries,
            Err(reason) => vec![NewEntry::terminal(
                EntryStatus::Failed,
                item_tracking_id,
                priority,
                Diagnostic::new(Severity::Error, reason),
            )],
        },
    }
}

fn split_success_item(
    item: &ChunkItem,
    priority: i64,
    batch_name: &BatchName,
) -> Result<Vec<NewEntry>, String> {
    let records = split_records(&item.data).map_err(|err| err.to_string())?;
    if records.is_empty() {
        return Err("item payload contains no records".to_string());
    }

    let tracking_id = match &item.tracking_id {
        Some(id) if !id.is_empty() => id.clone(),
        _ if records.len() == 1 => format!("io:{}-{}", batch_name, item.id),
        _ => {
            return Err(format!(
                "item without tracking id split into {} records",
                records.len()
            ))
        }
    };

    let last = records.len() - 1;
    records
        .into_iter()
        .enumerate()
        .map(|(index, record)| {
            let metadata = routing_metadata(&record.metadata).map_err(|err| err.to_string())?;
            Ok(NewEntry {
                status: EntryStatus::Pending,
                content: record.content,
                metadata,
                continued: index < last,
                tracking_id: tracking_id.clone(),
                priority,
                diagnostics: Vec::new(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::to_addi;

    const META: &[u8] = br#"<es:referencedata><es:info submitter="870970"/></es:referencedata>"#;

    fn item(id: i64, outcome: ItemOutcome, tracking_id: Option<&str>, data: Vec<u8>) -> ChunkItem {
        ChunkItem {
            id,
            outcome,
            tracking_id: tracking_id.map(str::to_string),
            data,
        }
    }

    fn name() -> BatchName {
        BatchName::new(3, 1)
    }

    #[test]
    fn failure_item_becomes_single_ignored_entry() {
        let entries = build_entries(
            &item(1, ItemOutcome::Failure, Some("t-1"), vec![]),
            4,
            &name(),
        );
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.status, EntryStatus::Ignored);
        assert!(entry.content.is_empty());
        assert!(entry.metadata.is_empty());
        assert_eq!(entry.tracking_id, "t-1");
        assert_eq!(entry.priority, 4);
        assert_eq!(
            entry.diagnostics,
            vec![Diagnostic::new(Severity::Ok, "Failed by processor")]
        );
    }

    #[test]
    fn ignore_item_becomes_single_ignored_entry() {
        let entries = build_entries(&item(2, ItemOutcome::Ignore, None, vec![]), 4, &name());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, EntryStatus::Ignored);
        assert_eq!(
            entries[0].diagnostics,
            vec![Diagnostic::new(Severity::Ok, "Ignored by processor")]
        );
    }

    #[test]
    fn malformed_payload_becomes_single_failed_entry() {
        let entries = build_entries(
            &item(3, ItemOutcome::Success, Some("t-3"), b"not addi".to_vec()),
            4,
            &name(),
        );
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.status, EntryStatus::Failed);
        assert_eq!(entry.diagnostics.len(), 1);
        assert_eq!(entry.diagnostics[0].severity, Severity::Error);
        assert!(entry.content.is_empty());
    }

    #[test]
    fn unparsable_routing_metadata_becomes_single_failed_entry() {
        let data = to_addi(&[(b"<no-submitter/>", b"record")]);
        let entries = build_entries(&item(3, ItemOutcome::Success, Some("t-3"), data), 4, &name());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, EntryStatus::Failed);
        assert!(entries[0].diagnostics[0]
            .message
            .contains("no submitter attribute"));
    }

    #[test]
    fn single_record_with_empty_tracking_id_gets_synthesized_id() {
        let data = to_addi(&[(META, b"record")]);
        let entries = build_entries(&item(4, ItemOutcome::Success, None, data), 4, &name());
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.status, EntryStatus::Pending);
        assert_eq!(entry.tracking_id, "io:3-1-4");
        assert_eq!(entry.content, b"record");
        assert_eq!(entry.metadata, r#"{"submitter":"870970"}"#);
        assert!(!entry.continued);
        assert!(entry.diagnostics.is_empty());
    }

    #[test]
    fn multi_record_item_shares_tracking_id_and_sets_continued() {
        let data = to_addi(&[(META, b"r1"), (META, b"r2"), (META, b"r3")]);
        let entries = build_entries(&item(5, ItemOutcome::Success, Some("t-5"), data), 4, &name());
        assert_eq!(entries.len(), 3);
        for entry in &entries {
            assert_eq!(entry.status, EntryStatus::Pending);
            assert_eq!(entry.tracking_id, "t-5");
        }
        assert_eq!(
            entries.iter().map(|e| e.continued).collect::<Vec<_>>(),
            vec![true, true, false]
        );
        assert_eq!(entries[2].content, b"r3");
    }

    #[test]
    fn multi_record_item_without_tracking_id_fails() {
        let data = to_addi(&[(META, b"r1"), (META, b"r2")]);
        let entries = build_entries(&item(6, ItemOutcome::Success, None, data), 4, &name());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, EntryStatus::Failed);
    }

    #[test]
    fn empty_payload_fails() {
        let entries = build_entries(&item(7, ItemOutcome::Success, Some("t"), vec![]), 4, &name());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, EntryStatus::Failed);
        assert!(entries[0].diagnostics[0].message.contains("no records"));
    }

    #[test]
    fn routing_metadata_extracts_submitter() {
        assert_eq!(
            routing_metadata(META).unwrap(),
            r#"{"submitter":"870970"}"#
        );
        assert_eq!(
            routing_metadata(b"<x/>"),
            Err(RoutingMetadataError::MissingSubmitter)
        );
        assert_eq!(
            routing_metadata(&[0xff, 0xfe]),
            Err(RoutingMetadataError::NotUtf8)
        );
    }
}
