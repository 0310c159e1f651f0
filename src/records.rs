//! Reader for the addi record container format.
//!
//! An addi buffer holds zero or more records; each record is a decimal
//! ASCII length line, the metadata block, a newline, then the same again
//! for the content block:
//!
//! ```text
//! <metadata length>\n<metadata bytes>\n<content length>\n<content bytes>\n
//! ```
//!
//! Parsing is a pure function of the buffer; the reader holds no other
//! state and can be recreated to restart from the beginning.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MalformedRecord {
    #[error("invalid length prefix at offset {offset}")]
    BadLengthPrefix { offset: usize },
    #[error("block of {declared} bytes at offset {offset} overruns buffer of {available} remaining bytes")]
    Truncated {
        offset: usize,
        declared: usize,
        available: usize,
    },
    #[error("missing newline after block ending at offset {offset}")]
    MissingSeparator { offset: usize },
}

/// One decoded record: the routing metadata block and the payload block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddiRecord {
    pub metadata: Vec<u8>,
    pub content: Vec<u8>,
}

/// Lazy iterator over the records of an addi buffer.
///
/// Yields `Err` once on the first framing violation and then fuses.
pub struct AddiReader<'a> {
    buf: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> AddiReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            failed: false,
        }
    }

    fn read_block(&mut self) -> Result<Vec<u8>, MalformedRecord> {
        let start = self.pos;
        let mut len: usize = 0;
        let mut digits = 0;
        while let Some(&b) = self.buf.get(self.pos) {
            match b {
                b'0'..=b'9' => {
                    len = len
                        .checked_mul(10)
                        .and_then(|n| n.checked_add((b - b'0') as usize))
                        .ok_or(MalformedRecord::BadLengthPrefix { offset: start })?;
                    digits += 1;
                    self.pos += 1;
                }
                b'\n' => break,
                _ => return Err(MalformedRecord::BadLengthPrefix { offset: start }),
            }
        }
        if digits == 0 || self.buf.get(self.pos) != Some(&b'\n') {
            return Err(MalformedRecord::BadLengthPrefix { offset: start });
        }
        self.pos += 1;

        let available = self.buf.len() - self.pos;
        if len > available {
            return Err(MalformedRecord::Truncated {
                offset: self.pos,
                declared: len,
                available,
            });
        }
        let block = self.buf[self.pos..self.pos + len].to_vec();
        self.pos += len;

        if self.buf.get(self.pos) != Some(&b'\n') {
            return Err(MalformedRecord::MissingSeparator { offset: self.pos });
        }
        self.pos += 1;
        Ok(block)
    }
}

impl Iterator for AddiReader<'_> {
    type Item = Result<AddiRecord, MalformedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.buf.len() {
            return None;
        }
        let record = match self.read_block() {
            Ok(metadata) => self
                .read_block()
                .map(|content| AddiRecord { metadata, content }),
            Err(err) => Err(err),
        };
        if record.is_err() {
            self.failed = true;
        }
        Some(record)
    }
}

/// Eagerly decode every record in the buffer, failing on the first
/// framing violation.
pub fn split_records(buf: &[u8]) -> Result<Vec<AddiRecord>, MalformedRecord> {
    AddiReader::new(buf).collect()
}

/// Encode records back into the addi container layout. Used by tests and
/// fixtures; the sink itself only reads.
pub fn to_addi(records: &[(&[u8], &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    for (metadata, content) in records {
        out.extend_from_slice(format!("{}\n", metadata.len()).as_bytes());
        out.extend_from_slice(metadata);
        out.push(b'\n');
        out.extend_from_slice(format!("{}\n", content.len()).as_bytes());
        out.extend_from_slice(content);
        out.push(b'\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffer_yields_nothing() {
        assert_eq!(split_records(b"").unwrap(), vec![]);
    }

    #[test]
    fn single_record() {
        let buf = to_addi(&[(b"meta", b"content")]);
        let records = split_records(&buf).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].metadata, b"meta");
        assert_eq!(records[0].content, b"content");
    }

    #[test]
    fn multiple_concatenated_records() {
        let buf = to_addi(&[(b"m1", b"c1"), (b"m2", b"c2"), (b"m3", b"c3")]);
        let records = split_records(&buf).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].metadata, b"m2");
        assert_eq!(records[2].content, b"c3");
    }

    #[test]
    fn zero_length_blocks_are_valid() {
        let records = split_records(b"0\n\n0\n\n").unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].metadata.is_empty());
        assert!(records[0].content.is_empty());
    }

    #[test]
    fn length_overrunning_buffer_fails() {
        let err = split_records(b"100\nshort\n").unwrap_err();
        assert!(matches!(err, MalformedRecord::Truncated { declared: 100, .. }));
    }

    #[test]
    fn non_numeric_length_fails() {
        let err = split_records(b"abc\nxyz\n").unwrap_err();
        assert_eq!(err, MalformedRecord::BadLengthPrefix { offset: 0 });
    }

    #[test]
    fn missing_trailing_newline_fails() {
        let err = split_records(b"4\nmeta").unwrap_err();
        assert_eq!(err, MalformedRecord::MissingSeparator { offset: 6 });
    }

    #[test]
    fn truncated_second_block_fails() {
        let err = split_records(b"4\nmeta\n9\nshort\n").unwrap_err();
        assert!(matches!(err, MalformedRecord::Truncated { declared: 9, .. }));
    }

    #[test]
    fn reader_fuses_after_error() {
        let mut reader = AddiReader::new(b"x\n");
        assert!(reader.next().unwrap().is_err());
        assert!(reader.next().is_none());
    }

    #[test]
    fn reader_is_restartable() {
        let buf = to_addi(&[(b"m", b"c")]);
        let first: Vec<_> = AddiReader::new(&buf).collect();
        let second: Vec<_> = AddiReader::new(&buf).collect();
        assert_eq!(first, second);
    }
}
