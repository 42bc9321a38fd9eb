//! Splits a byte stream into lines with a length bound.

use super::traits::ReadOutcome;
use memchr::memchr;

/// Accumulates received bytes and hands out complete lines.
#[derive(Debug)]
pub(crate) struct LineAssembler {
    pending: Vec<u8>,
    max_line: usize,
    /// Bytes already dropped from the current overlong line.
    overrun: Option<usize>,
}

impl LineAssembler {
    pub(crate) fn new(max_line: usize) -> Self {
        Self {
            pending: Vec::with_capacity(max_line.min(4096)),
            max_line,
            overrun: None,
        }
    }

    pub(crate) fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Next complete line, if one is buffered.
    ///
    /// Returns `None` when only a partial line is buffered. A partial line
    /// that already exceeds the bound is dropped right away and reported as
    /// `Overrun` once its terminator arrives.
    pub(crate) fn next_outcome(&mut self) -> Option<ReadOutcome> {
        match memchr(b'\n', &self.pending) {
            Some(pos) => {
                let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                if let Some(dropped) = self.overrun.take() {
                    return Some(ReadOutcome::Overrun(dropped + line.len()));
                }
                if line.len() > self.max_line {
                    return Some(ReadOutcome::Overrun(line.len()));
                }
                Some(ReadOutcome::Line(line))
            }
            None => {
                // A full-length line may still be waiting for the `\n` of its CRLF.
                let allowed = self.max_line + usize::from(self.pending.last() == Some(&b'\r'));
                if self.pending.len() > allowed {
                    *self.overrun.get_or_insert(0) += self.pending.len();
                    self.pending.clear();
                }
                None
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.pending.clear();
        self.overrun = None;
    }

    pub(crate) fn buffered(&self) -> usize {
        self.pending.len()
    }
}
