use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::*;

/// Splits a byte stream on `\n` without ever failing on content.
///
/// Bytes that are not valid UTF-8 are replaced, so a corrupted record still
/// reaches the parser and is rejected there instead of ending the stream.
/// Lines longer than `max_length` are dropped up to the next newline.
#[derive(Clone, Debug)]
pub struct TelemetryLineCodec {
    max_length: usize,
    // Bytes already searched for a newline
    next_index: usize,
    is_discarding: bool,
}

impl TelemetryLineCodec {
    pub fn new_with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            is_discarding: false,
        }
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

impl Decoder for TelemetryLineCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        loop {
            let read_to = buf.len().min(self.max_length.saturating_add(1));
            let newline = buf[self.next_index..read_to]
                .iter()
                .position(|byte| *byte == b'\n');

            match (self.is_discarding, newline) {
                (true, Some(offset)) => {
                    buf.advance(self.next_index + offset + 1);
                    self.is_discarding = false;
                    self.next_index = 0;
                }
                (true, None) => {
                    buf.advance(read_to);
                    self.next_index = 0;
                    if buf.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(offset)) => {
                    let newline_index = self.next_index + offset;
                    self.next_index = 0;
                    let line = buf.split_to(newline_index + 1);
                    return Ok(Some(decode_line(&line[..newline_index])));
                }
                (false, None) if buf.len() > self.max_length => {
                    warn!("Discarding line longer than {} bytes", self.max_length);
                    self.is_discarding = true;
                    self.next_index = 0;
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }

        self.next_index = 0;
        if self.is_discarding {
            buf.clear();
            self.is_discarding = false;
            return Ok(None);
        }

        if buf.is_empty() {
            return Ok(None);
        }

        // Last line without a trailing newline
        let line = buf.split_to(buf.len());
        Ok(Some(decode_line(&line)))
    }
}
