//! Reassembly of engine output fragments into lines.
//!
//! `recv` returns whatever a single read produced, which may be half a line
//! or several lines at once. Callers that think in protocol lines push every
//! fragment into a [`LineAssembler`] and pull complete lines back out.

use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct LineAssembler {
    partial: Vec<u8>,
    ready: VecDeque<String>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment. Complete lines become available from [`next_line`](Self::next_line).
    pub fn push(&mut self, fragment: &[u8]) {
        for &byte in fragment {
            if byte == b'\n' {
                let mut line = std::mem::take(&mut self.partial);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                self.ready
                    .push_back(String::from_utf8_lossy(&line).into_owned());
            } else {
                self.partial.push(byte);
            }
        }
    }

    /// Next complete line, without its line terminator.
    pub fn next_line(&mut self) -> Option<String> {
        self.ready.pop_front()
    }

    pub fn has_partial(&self) -> bool {
        !self.partial.is_empty()
    }

    /// Take the bytes of an unterminated trailing line.
    pub fn take_partial(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            return None;
        }
        let partial = std::mem::take(&mut self.partial);
        Some(String::from_utf8_lossy(&partial).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_split_across_fragments() {
        let mut lines = LineAssembler::new();
        lines.push(b"id name Sto");
        assert_eq!(lines.next_line(), None);
        assert!(lines.has_partial());

        lines.push(b"ckfish\nuci");
        assert_eq!(lines.next_line().as_deref(), Some("id name Stockfish"));
        assert_eq!(lines.next_line(), None);

        lines.push(b"ok\n");
        assert_eq!(lines.next_line().as_deref(), Some("uciok"));
        assert!(!lines.has_partial());
    }

    #[test]
    fn test_several_lines_in_one_fragment() {
        let mut lines = LineAssembler::new();
        lines.push(b"readyok\r\nbestmove e2e4\n\n");
        assert_eq!(lines.next_line().as_deref(), Some("readyok"));
        assert_eq!(lines.next_line().as_deref(), Some("bestmove e2e4"));
        assert_eq!(lines.next_line().as_deref(), Some(""));
        assert_eq!(lines.next_line(), None);
    }

    #[test]
    fn test_take_partial() {
        let mut lines = LineAssembler::new();
        lines.push(b"info depth 1\ninfo dep");
        assert_eq!(lines.take_partial().as_deref(), Some("info dep"));
        assert_eq!(lines.take_partial(), None);
        assert_eq!(lines.next_line().as_deref(), Some("info depth 1"));
    }
}
