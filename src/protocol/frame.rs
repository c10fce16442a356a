//! Line framing over a size-limited transport.
//!
//! Outbound commands are terminated with a newline and split into chunks
//! that fit a single transport write:
//! ```text
//! "imudata:0.1,0.2,0.3,1.0,2.0,3.0\n"
//! ┌────────────────────┬───────────────┐
//! │ 20 bytes           │ rest (<= 20)  │
//! └────────────────────┴───────────────┘
//! ```
//! Inbound notifications arrive with arbitrary boundaries and are
//! reassembled into complete lines by [`LineDecoder`].

use bytes::{Buf, Bytes, BytesMut};

use crate::error::FrameError;

/// Line terminator byte.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Largest write every peripheral accepts.
///
/// The minimum BLE ATT MTU is 23 bytes; 3 bytes go to the ATT header.
pub const UART_SAFE_SIZE: usize = 20;

/// Appends the line terminator to a command.
///
/// Returns an empty buffer for an empty command so that nothing is written.
#[must_use]
pub fn encode_line(command: &str) -> Bytes {
    if command.is_empty() {
        return Bytes::new();
    }

    let mut buf = BytesMut::with_capacity(command.len() + 1);
    buf.extend_from_slice(command.as_bytes());
    buf.extend_from_slice(&[LINE_TERMINATOR]);
    buf.freeze()
}

/// Splits a payload into chunks of at most `size` bytes.
///
/// An empty payload yields no chunks and a payload of exactly `size`
/// bytes yields a single chunk.
///
/// # Panics
///
/// Panics if `size` is zero.
#[must_use]
pub fn chunk(payload: &Bytes, size: usize) -> Vec<Bytes> {
    assert!(size > 0, "chunk size must be positive");

    let mut chunks = Vec::with_capacity(payload.len().div_ceil(size));
    let mut offset = 0;
    while offset < payload.len() {
        let end = (offset + size).min(payload.len());
        chunks.push(payload.slice(offset..end));
        offset = end;
    }
    chunks
}

/// Longest line the decoder keeps, excluding the terminator.
///
/// Bytes past this without a terminator are dropped up to the next one.
pub const MAX_LINE_LEN: usize = 512;

/// Reassembles newline-terminated lines from partial notifications.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: BytesMut,
    /// Prefix of `buffer` already known to hold no terminator.
    scanned: usize,
    /// Dropping the tail of an oversized line until its terminator.
    discarding: bool,
}

impl LineDecoder {
    /// Creates a new line decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds data into the decoder.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next complete line.
    ///
    /// Returns `Ok(Some(line))` without its terminator, `Ok(None)` if no
    /// terminator is buffered yet, or an error if the line is not UTF-8 or
    /// exceeds [`MAX_LINE_LEN`]. A failed line is consumed so the next call
    /// continues after it.
    ///
    /// # Errors
    ///
    /// Returns a `FrameError` if the line is not valid UTF-8 or too long.
    pub fn decode(&mut self) -> Result<Option<String>, FrameError> {
        loop {
            let Some(offset) = self.buffer[self.scanned..]
                .iter()
                .position(|&b| b == LINE_TERMINATOR)
            else {
                return self.hold_partial();
            };

            let line = self.buffer.split_to(self.scanned + offset);
            self.buffer.advance(1);
            self.scanned = 0;

            if self.discarding {
                self.discarding = false;
                continue;
            }
            if line.len() > MAX_LINE_LEN {
                return Err(FrameError::TooLong {
                    size: line.len(),
                    max: MAX_LINE_LEN,
                });
            }

            let text = std::str::from_utf8(&line)?;
            return Ok(Some(text.to_owned()));
        }
    }

    fn hold_partial(&mut self) -> Result<Option<String>, FrameError> {
        if self.discarding {
            self.buffer.clear();
            self.scanned = 0;
            return Ok(None);
        }

        let size = self.buffer.len();
        if size > MAX_LINE_LEN {
            tracing::trace!("dropping {size} bytes of an unterminated line");
            self.buffer.clear();
            self.scanned = 0;
            self.discarding = true;
            return Err(FrameError::TooLong {
                size,
                max: MAX_LINE_LEN,
            });
        }

        self.scanned = size;
        Ok(None)
    }

    /// Returns the number of bytes of the unterminated partial line.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
        self.discarding = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(decoder: &mut LineDecoder) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = decoder.decode().unwrap() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn test_encode_line() {
        assert_eq!(encode_line("ping"), Bytes::from_static(b"ping\n"));
        assert!(encode_line("").is_empty());
    }

    #[test]
    fn test_chunk_long_command() {
        let payload = encode_line("imudata:0.01,0.02,0.03,1.50,2.50,3.50");
        let chunks = chunk(&payload, UART_SAFE_SIZE);

        assert_eq!(chunks.len(), payload.len().div_ceil(UART_SAFE_SIZE));
        assert!(chunks.iter().all(|c| c.len() <= UART_SAFE_SIZE));
        assert_eq!(chunks.concat(), payload.to_vec());
    }

    #[test]
    fn test_chunk_exact_boundary() {
        // 19 characters plus the terminator
        let payload = encode_line("setsettings:1234,56");
        assert_eq!(payload.len(), UART_SAFE_SIZE);

        let chunks = chunk(&payload, UART_SAFE_SIZE);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], payload);
    }

    #[test]
    fn test_chunk_empty() {
        assert!(chunk(&Bytes::new(), UART_SAFE_SIZE).is_empty());
    }

    #[test]
    fn test_decode_complete_line() {
        let mut decoder = LineDecoder::new();
        decoder.feed(b"battery:87\n");

        assert_eq!(decoder.decode().unwrap(), Some("battery:87".to_owned()));
        assert_eq!(decoder.decode().unwrap(), None);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decode_partial_line() {
        let mut decoder = LineDecoder::new();

        decoder.feed(b"firm");
        assert_eq!(decoder.decode().unwrap(), None);
        assert_eq!(decoder.buffered(), 4);

        decoder.feed(b"ware:1.2\nti");
        assert_eq!(decoder.decode().unwrap(), Some("firmware:1.2".to_owned()));
        assert_eq!(decoder.decode().unwrap(), None);
        assert_eq!(decoder.buffered(), 2);
    }

    #[test]
    fn test_decode_fragment_boundaries_do_not_matter() {
        let blob: &[u8] = b"ping\ntime:12,30,00,19,10,26\nbattery:87\nimu";

        let mut whole = LineDecoder::new();
        whole.feed(blob);
        let expected = drain(&mut whole);

        for size in 1..blob.len() {
            let mut decoder = LineDecoder::new();
            let mut lines = Vec::new();
            for piece in blob.chunks(size) {
                decoder.feed(piece);
                lines.extend(drain(&mut decoder));
            }
            assert_eq!(lines, expected, "fragment size {size}");
            assert_eq!(decoder.buffered(), 3);
        }
    }

    #[test]
    fn test_decode_split_multibyte_character() {
        let mut decoder = LineDecoder::new();
        let text = "firmware:v1·2\n".as_bytes();
        let split = text.iter().position(|&b| b == 0xC2).unwrap() + 1;

        decoder.feed(&text[..split]);
        assert_eq!(decoder.decode().unwrap(), None);
        decoder.feed(&text[split..]);
        assert_eq!(decoder.decode().unwrap(), Some("firmware:v1·2".to_owned()));
    }

    #[test]
    fn test_decode_invalid_line_is_isolated() {
        let mut decoder = LineDecoder::new();
        decoder.feed(b"bad\xff\nping\n");

        assert!(decoder.decode().is_err());
        assert_eq!(decoder.decode().unwrap(), Some("ping".to_owned()));
    }

    #[test]
    fn test_unterminated_flood_is_bounded() {
        let mut decoder = LineDecoder::new();
        let mut too_long = 0;

        for _ in 0..5000 {
            decoder.feed(&[b'a'; UART_SAFE_SIZE]);
            match decoder.decode() {
                Ok(None) => {}
                Err(FrameError::TooLong { max, .. }) => {
                    assert_eq!(max, MAX_LINE_LEN);
                    too_long += 1;
                }
                other => panic!("unexpected {other:?}"),
            }
            assert!(decoder.buffered() <= MAX_LINE_LEN + UART_SAFE_SIZE);
        }
        assert_eq!(too_long, 1);

        // The tail of the flood ends at the next terminator
        decoder.feed(b"tail\nping\n");
        assert_eq!(decoder.decode().unwrap(), Some("ping".to_owned()));
        assert_eq!(decoder.decode().unwrap(), None);
    }

    #[test]
    fn test_oversized_complete_line_is_isolated() {
        let mut decoder = LineDecoder::new();
        let mut data = vec![b'x'; MAX_LINE_LEN + 1];
        data.extend_from_slice(b"\nbattery:87\n");
        decoder.feed(&data);

        assert!(matches!(
            decoder.decode(),
            Err(FrameError::TooLong { size, .. }) if size == MAX_LINE_LEN + 1
        ));
        assert_eq!(decoder.decode().unwrap(), Some("battery:87".to_owned()));
    }

    #[test]
    fn test_line_at_limit_is_kept() {
        let mut decoder = LineDecoder::new();
        let line = "y".repeat(MAX_LINE_LEN);
        decoder.feed(line.as_bytes());
        assert_eq!(decoder.decode().unwrap(), None);
        decoder.feed(b"\n");
        assert_eq!(decoder.decode().unwrap(), Some(line));
    }
}
