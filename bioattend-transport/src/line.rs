//! Reassembly of newline-terminated lines from partial reads

use bioattend_core::constants::MAX_LINE_LENGTH;
use bioattend_core::FRAME_TERMINATOR;
use bytes::{Buf, BytesMut};
use tracing::{trace, warn};

use crate::error::{Error, Result};

/// Byte accumulator that yields complete lines
///
/// Serial reads return whatever arrived so far, which may be half a line or
/// several lines. Completed lines are trimmed; blank lines are skipped.
/// A run of bytes longer than the limit without a terminator is dropped up to
/// the next terminator.
#[derive(Debug)]
pub struct LineBuffer {
    buf: BytesMut,
    max_len: usize,
    discarding: bool,
}

impl LineBuffer {
    /// Create buffer with the default line limit
    pub fn new() -> Self {
        Self::with_max_len(MAX_LINE_LENGTH)
    }

    /// Create buffer with a custom line limit
    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(max_len.min(4096)),
            max_len,
            discarding: false,
        }
    }

    /// Append received bytes
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Take the next complete line
    ///
    /// Returns `None` until a terminator has been received. A line that is
    /// not valid UTF-8 is consumed and reported as [`Error::Decode`].
    pub fn next_line(&mut self) -> Option<Result<String>> {
        loop {
            let Some(pos) = self.buf.iter().position(|&b| b == FRAME_TERMINATOR) else {
                if self.buf.len() > self.max_len {
                    warn!(
                        "Discarding {} bytes without line terminator",
                        self.buf.len()
                    );
                    self.buf.clear();
                    self.discarding = true;
                }
                return None;
            };

            let raw = self.buf.split_to(pos + 1);

            if self.discarding {
                self.discarding = false;
                continue;
            }

            let body = &raw[..pos];
            let text = match std::str::from_utf8(body) {
                Ok(text) => text.trim(),
                Err(_) => {
                    trace!("Undecodable line: {}", hex::encode(body));
                    return Some(Err(Error::Decode { len: body.len() }));
                }
            };

            if text.is_empty() {
                continue;
            }

            return Some(Ok(text.to_string()));
        }
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.buf.clear();
        self.discarding = false;
    }

    /// Number of buffered bytes
    pub fn len(&self) -> usize {
        self.buf.remaining()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_partial_reads() {
        let mut buffer = LineBuffer::new();

        buffer.extend(b"F:MAT");
        assert!(buffer.next_line().is_none());

        buffer.extend(b"CH:7\r\nID:");
        assert_eq!(buffer.next_line().unwrap().unwrap(), "F:MATCH:7");
        assert!(buffer.next_line().is_none());

        buffer.extend(b"-1\n");
        assert_eq!(buffer.next_line().unwrap().unwrap(), "ID:-1");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiple_lines_in_one_read() {
        let mut buffer = LineBuffer::new();
        buffer.extend(b"F:one\nF:two\n\n  \nF:three\n");

        assert_eq!(buffer.next_line().unwrap().unwrap(), "F:one");
        assert_eq!(buffer.next_line().unwrap().unwrap(), "F:two");
        assert_eq!(buffer.next_line().unwrap().unwrap(), "F:three");
        assert!(buffer.next_line().is_none());
    }

    #[test]
    fn test_invalid_utf8_is_dropped() {
        let mut buffer = LineBuffer::new();
        buffer.extend(&[0xFF, 0xFE, b'\n']);
        buffer.extend(b"F:ok\n");

        assert!(matches!(
            buffer.next_line(),
            Some(Err(Error::Decode { len: 2 }))
        ));
        assert_eq!(buffer.next_line().unwrap().unwrap(), "F:ok");
    }

    #[test]
    fn test_overlong_line_is_discarded() {
        let mut buffer = LineBuffer::with_max_len(8);
        buffer.extend(b"0123456789");
        assert!(buffer.next_line().is_none());
        assert!(buffer.is_empty());

        buffer.extend(b"abc\nID:3\n");
        assert_eq!(buffer.next_line().unwrap().unwrap(), "ID:3");
    }
}
