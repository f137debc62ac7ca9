// SPDX-FileCopyrightText: 2026 PANGOLIN Project Team
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Wire-level primitives
//!
//! The grid speaks a framed text protocol over plain TCP, with UDP
//! datagrams for discovery. Framing is terminator-based, not
//! length-prefixed: a record ends at the first occurrence of the
//! configured terminator in the accumulated byte stream.

pub mod announce;
pub mod command;
pub mod connection;

pub use connection::{Connection, Received};

use serde::{Deserialize, Serialize};

/// Record terminator for a framed byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Terminator {
    /// One record per line.
    Newline,
    /// Multi-line records, ended by a line holding a single `.`.
    DotLine,
}

/// Accumulates raw bytes and yields complete terminator-delimited records.
///
/// Bytes after the last complete terminator stay buffered until more input
/// arrives, so records are never split or merged regardless of how the
/// stream is chunked.
#[derive(Debug)]
pub struct RecordFramer {
    terminator: Terminator,
    buf: Vec<u8>,
}

impl RecordFramer {
    pub fn new(terminator: Terminator) -> Self {
        RecordFramer {
            terminator,
            buf: Vec::new(),
        }
    }

    /// Append raw bytes from the stream.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete record, if one is buffered.
    pub fn next_record(&mut self) -> Option<String> {
        match self.terminator {
            Terminator::Newline => {
                let end = self.buf.iter().position(|&b| b == b'\n')?;
                let mut record = self.buf[..end].to_vec();
                self.buf.drain(..=end);
                if record.last() == Some(&b'\r') {
                    record.pop();
                }
                Some(String::from_utf8_lossy(&record).into_owned())
            }
            Terminator::DotLine => {
                // A record ends at the first line that is exactly ".".
                if self.buf.starts_with(b".\n") {
                    self.buf.drain(..2);
                    return Some(String::new());
                }
                let end = self
                    .buf
                    .windows(3)
                    .position(|w| w == b"\n.\n")?;
                let record = String::from_utf8_lossy(&self.buf[..end]).into_owned();
                self.buf.drain(..end + 3);
                Some(record)
            }
        }
    }

    /// Pop every complete record currently buffered, in receipt order.
    pub fn drain_records(&mut self) -> Vec<String> {
        let mut records = vec![];
        while let Some(record) = self.next_record() {
            records.push(record);
        }
        records
    }

    /// Bytes buffered past the last complete terminator.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }
}

/// Append `record` plus the terminator to `out`.
pub(crate) fn frame_record(out: &mut Vec<u8>, record: &str, terminator: Terminator) {
    out.extend_from_slice(record.as_bytes());
    match terminator {
        Terminator::Newline => out.push(b'\n'),
        Terminator::DotLine => out.extend_from_slice(b"\n.\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newline_framing_basics() {
        let mut framer = RecordFramer::new(Terminator::Newline);
        framer.push(b"run a b\nls\npartial");
        assert_eq!(framer.drain_records(), vec!["run a b", "ls"]);
        assert_eq!(framer.pending_len(), "partial".len());
        framer.push(b" rest\n");
        assert_eq!(framer.drain_records(), vec!["partial rest"]);
    }

    #[test]
    fn newline_framing_across_chunks() {
        let mut framer = RecordFramer::new(Terminator::Newline);
        for chunk in [b"ru" as &[u8], b"n x", b"\nl", b"s\n"] {
            framer.push(chunk);
        }
        assert_eq!(framer.drain_records(), vec!["run x", "ls"]);
    }

    #[test]
    fn crlf_is_tolerated() {
        let mut framer = RecordFramer::new(Terminator::Newline);
        framer.push(b"version\r\n");
        assert_eq!(framer.drain_records(), vec!["version"]);
    }

    #[test]
    fn empty_records_pass_through() {
        let mut framer = RecordFramer::new(Terminator::Newline);
        framer.push(b"\n\nls\n");
        assert_eq!(framer.drain_records(), vec!["", "", "ls"]);
    }

    #[test]
    fn dotline_framing() {
        let mut framer = RecordFramer::new(Terminator::DotLine);
        framer.push(b"line one\nline two\n.\nnext");
        assert_eq!(framer.drain_records(), vec!["line one\nline two"]);
        framer.push(b"\n.\n");
        assert_eq!(framer.drain_records(), vec!["next"]);
    }

    #[test]
    fn dotline_empty_record() {
        let mut framer = RecordFramer::new(Terminator::DotLine);
        framer.push(b".\n");
        assert_eq!(framer.drain_records(), vec![""]);
    }

    #[test]
    fn frame_and_reparse() {
        let mut wire = Vec::new();
        frame_record(&mut wire, "run k p x 300", Terminator::Newline);
        frame_record(&mut wire, "ls", Terminator::Newline);
        let mut framer = RecordFramer::new(Terminator::Newline);
        framer.push(&wire);
        assert_eq!(framer.drain_records(), vec!["run k p x 300", "ls"]);
    }
}
