//! TCP framing: `<ascii-decimal-len>\n<payload-bytes>\n`, with a legacy
//! fallback for readers that send an unframed line as the whole payload.
//!
//! Grounded on `moire_wire::{encode_frame, decode_frame, FrameCodecError}`
//! (4-byte big-endian length prefix); the spec's transport instead requires
//! an ASCII-decimal length, so the prefix encoding differs, but the
//! "fallible conversion between a length and a byte slice, one error enum"
//! shape is the same.

use std::fmt;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

pub const DEFAULT_MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameCodecError {
    PayloadTooLarge { len: usize, max: usize },
    Truncated,
    Io(String),
}

impl fmt::Display for FrameCodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameCodecError::PayloadTooLarge { len, max } => {
                write!(f, "payload too large: {len} > {max}")
            }
            FrameCodecError::Truncated => write!(f, "frame truncated before length-declared end"),
            FrameCodecError::Io(msg) => write!(f, "frame io error: {msg}"),
        }
    }
}

impl std::error::Error for FrameCodecError {}

/// Encode one length-prefixed frame: decimal length, newline, payload,
/// trailing newline.
pub fn encode_frame(payload: &[u8], max_payload_bytes: usize) -> Result<Vec<u8>, FrameCodecError> {
    if payload.len() > max_payload_bytes {
        return Err(FrameCodecError::PayloadTooLarge {
            len: payload.len(),
            max: max_payload_bytes,
        });
    }
    let mut out = Vec::with_capacity(payload.len() + 24);
    out.extend_from_slice(payload.len().to_string().as_bytes());
    out.push(b'\n');
    out.extend_from_slice(payload);
    out.push(b'\n');
    Ok(out)
}

pub fn encode_frame_default(payload: &[u8]) -> Result<Vec<u8>, FrameCodecError> {
    encode_frame(payload, DEFAULT_MAX_FRAME_BYTES)
}

/// Decode a single frame already known to be exactly `<len>\n<payload>\n`
/// (used by tests and by callers that already buffered a whole frame).
pub fn decode_frame(frame: &[u8], max_payload_bytes: usize) -> Result<&[u8], FrameCodecError> {
    let nl = frame
        .iter()
        .position(|b| *b == b'\n')
        .ok_or(FrameCodecError::Truncated)?;
    let len_text = std::str::from_utf8(&frame[..nl]).map_err(|e| FrameCodecError::Io(e.to_string()))?;
    let len: usize = len_text
        .parse()
        .map_err(|_| FrameCodecError::Io(format!("invalid frame length: {len_text:?}")))?;
    if len > max_payload_bytes {
        return Err(FrameCodecError::PayloadTooLarge {
            len,
            max: max_payload_bytes,
        });
    }
    let start = nl + 1;
    let end = start + len;
    if frame.len() < end + 1 {
        return Err(FrameCodecError::Truncated);
    }
    Ok(&frame[start..end])
}

pub fn decode_frame_default(frame: &[u8]) -> Result<&[u8], FrameCodecError> {
    decode_frame(frame, DEFAULT_MAX_FRAME_BYTES)
}

/// Read one frame off an async buffered reader, honouring the legacy
/// fallback: if the first line is not a bare decimal length, the line
/// itself (minus its trailing newline) is the whole payload.
///
/// Returns `Ok(None)` on a clean EOF before any bytes were read.
pub async fn read_frame<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    max_payload_bytes: usize,
) -> Result<Option<Vec<u8>>, FrameCodecError> {
    let mut line = Vec::new();
    let read = reader
        .read_until(b'\n', &mut line)
        .await
        .map_err(|e| FrameCodecError::Io(e.to_string()))?;
    if read == 0 {
        return Ok(None);
    }
    if line.last() == Some(&b'\n') {
        line.pop();
    }

    if let Ok(len_text) = std::str::from_utf8(&line) {
        if let Ok(len) = len_text.parse::<usize>() {
            if len > max_payload_bytes {
                return Err(FrameCodecError::PayloadTooLarge {
                    len,
                    max: max_payload_bytes,
                });
            }
            let mut payload = vec![0u8; len];
            reader
                .read_exact(&mut payload)
                .await
                .map_err(|e| FrameCodecError::Io(e.to_string()))?;
            // Consume the trailing delimiter newline, if present.
            let mut trailer = [0u8; 1];
            let _ = reader.read_exact(&mut trailer).await;
            return Ok(Some(payload));
        }
    }

    // Legacy mode: the line itself is the payload.
    Ok(Some(line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[test]
    fn framing_round_trips_arbitrary_payload_bytes() {
        let payload = b"hello\nworld\n\x00\x01binary";
        let frame = encode_frame_default(payload).unwrap();
        let decoded = decode_frame_default(&frame).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn oversize_payload_is_rejected_at_encode_time() {
        let payload = vec![0u8; 16];
        let err = encode_frame(&payload, 8).unwrap_err();
        assert_eq!(
            err,
            FrameCodecError::PayloadTooLarge { len: 16, max: 8 }
        );
    }

    #[tokio::test]
    async fn read_frame_handles_length_prefixed_message() {
        let mut input = Vec::new();
        input.extend_from_slice(b"5\nhello\n");
        let mut reader = BufReader::new(&input[..]);
        let frame = read_frame(&mut reader, DEFAULT_MAX_FRAME_BYTES)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame, b"hello");
    }

    #[tokio::test]
    async fn read_frame_falls_back_to_legacy_unframed_line() {
        let mut input = Vec::new();
        input.extend_from_slice(b"{\"op\":\"ping\"}\n");
        let mut reader = BufReader::new(&input[..]);
        let frame = read_frame(&mut reader, DEFAULT_MAX_FRAME_BYTES)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame, b"{\"op\":\"ping\"}");
    }

    #[tokio::test]
    async fn read_frame_returns_none_on_clean_eof() {
        let input: Vec<u8> = Vec::new();
        let mut reader = BufReader::new(&input[..]);
        let frame = read_frame(&mut reader, DEFAULT_MAX_FRAME_BYTES).await.unwrap();
        assert!(frame.is_none());
    }
}
