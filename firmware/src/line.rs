#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Line framing shared by the operator console and the relay link.
//!
//! Both USB CDC ports carry newline-terminated text. Incoming packets are fed
//! byte by byte into a [`LineAssembler`]; outgoing text is cut into
//! packet-sized [`Frame`]s.

use core::str;

use heapless::{String, Vec};

/// Bytes carried by one USB full-speed bulk packet.
pub const FRAME_SIZE: usize = 64;

/// One packet worth of bytes.
pub type Frame = Vec<u8, FRAME_SIZE>;

/// Result of feeding one byte.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Feed {
    /// Keep feeding.
    Pending,
    /// A complete line is waiting in [`LineAssembler::take_line`].
    Ready,
    /// The line exceeded capacity and was discarded up to its terminator.
    Overflow,
}

/// Errors reported while extracting a line.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LineError {
    InvalidUtf8,
}

/// Accumulates bytes until `\r` or `\n`.
pub struct LineAssembler<const N: usize> {
    buffer: Vec<u8, N>,
    overflowed: bool,
}

impl<const N: usize> LineAssembler<N> {
    pub const fn new() -> Self {
        Self {
            buffer: Vec::new(),
            overflowed: false,
        }
    }

    pub fn feed(&mut self, byte: u8) -> Feed {
        match byte {
            b'\r' | b'\n' => {
                if self.overflowed {
                    self.clear();
                    Feed::Overflow
                } else if self.buffer.is_empty() {
                    Feed::Pending
                } else {
                    Feed::Ready
                }
            }
            0x08 | 0x7f => {
                self.buffer.pop();
                Feed::Pending
            }
            value => {
                if !self.overflowed && self.buffer.push(value).is_err() {
                    self.overflowed = true;
                }
                Feed::Pending
            }
        }
    }

    /// Returns the assembled line and resets the buffer.
    pub fn take_line(&mut self) -> Result<String<N>, LineError> {
        let bytes = core::mem::take(&mut self.buffer);
        self.overflowed = false;
        let text = str::from_utf8(&bytes).map_err(|_| LineError::InvalidUtf8)?;
        let mut line = String::new();
        line.push_str(text.trim()).map_err(|_| LineError::InvalidUtf8)?;
        Ok(line)
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.overflowed = false;
    }
}

/// Splits `text` into packet-sized frames.
pub fn frames(text: &str) -> impl Iterator<Item = Frame> + '_ {
    text.as_bytes()
        .chunks(FRAME_SIZE)
        .filter_map(|chunk| Frame::from_slice(chunk).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all<const N: usize>(assembler: &mut LineAssembler<N>, bytes: &[u8]) -> Feed {
        let mut last = Feed::Pending;
        for byte in bytes {
            last = assembler.feed(*byte);
            if last != Feed::Pending {
                break;
            }
        }
        last
    }

    #[test]
    fn crlf_yields_one_line() {
        let mut assembler = LineAssembler::<32>::new();
        assert_eq!(feed_all(&mut assembler, b"STATUS p1\r"), Feed::Ready);
        assert_eq!(assembler.take_line().unwrap().as_str(), "STATUS p1");
        assert_eq!(assembler.feed(b'\n'), Feed::Pending);
    }

    #[test]
    fn backspace_edits_the_line() {
        let mut assembler = LineAssembler::<16>::new();
        assert_eq!(feed_all(&mut assembler, b"buz\x7fy\n"), Feed::Ready);
        assert_eq!(assembler.take_line().unwrap().as_str(), "buy");
    }

    #[test]
    fn overflow_discards_until_terminator() {
        let mut assembler = LineAssembler::<4>::new();
        assert_eq!(feed_all(&mut assembler, b"toolong\n"), Feed::Overflow);
        assert_eq!(feed_all(&mut assembler, b"ok\n"), Feed::Ready);
        assert_eq!(assembler.take_line().unwrap().as_str(), "ok");
    }

    #[test]
    fn frames_cover_the_whole_text() {
        let text = "x".repeat(FRAME_SIZE + 10);
        let sizes: std::vec::Vec<usize> = frames(&text).map(|frame| frame.len()).collect();
        assert_eq!(sizes, [FRAME_SIZE, 10]);
    }
}
