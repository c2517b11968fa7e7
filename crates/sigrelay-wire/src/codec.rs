use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::envelope::Envelope;
use crate::error::{FrameError, Result};

/// Frame header: magic (2) + length (4) = 6 bytes.
pub const HEADER_SIZE: usize = 6;

/// Magic bytes: "SR" (0x53 0x52).
pub const MAGIC: [u8; 2] = [0x53, 0x52];

/// Default maximum payload size: 1 MiB.
///
/// Session descriptions are a few KiB; anything near this limit is garbage.
pub const DEFAULT_MAX_PAYLOAD: usize = 1024 * 1024;

/// Encode one payload into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬───────────┬──────────────────────┐
/// │ Magic (2B)   │ Length    │ Payload              │
/// │ 0x53 0x52    │ (4B LE)   │ (JSON envelope)      │
/// │ "SR"         │           │                      │
/// └──────────────┴───────────┴──────────────────────┘
/// ```
pub fn encode_frame(payload: &[u8], max_payload: usize, dst: &mut BytesMut) -> Result<()> {
    let max = max_payload.min(u32::MAX as usize);
    if payload.len() > max {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&MAGIC);
    dst.put_u32_le(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Decode one frame payload from a buffer.
///
/// `Ok(None)` means the frame is still incomplete and nothing was consumed.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Bytes>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    if src[0..2] != MAGIC {
        return Err(FrameError::InvalidMagic);
    }

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&src[2..6]);
    let payload_len = u32::from_le_bytes(len_bytes) as usize;

    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    Ok(Some(src.split_to(payload_len).freeze()))
}

/// Configuration for the envelope codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 1 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// `tokio_util` codec turning a byte stream into [`Envelope`]s and back.
///
/// Frames whose payload is not a valid envelope are logged and skipped; the
/// stream stays usable. Framing errors (bad magic, oversize) are returned and
/// end the stream.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeCodec {
    config: FrameConfig,
}

impl EnvelopeCodec {
    /// Create a codec with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec with explicit configuration.
    pub fn with_config(config: FrameConfig) -> Self {
        Self { config }
    }

    /// Current codec configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Envelope>> {
        while let Some(payload) = decode_frame(src, self.config.max_payload_size)? {
            match Envelope::from_slice(&payload) {
                Ok(envelope) => return Ok(Some(envelope)),
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        size = payload.len(),
                        "dropping malformed envelope"
                    );
                }
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Envelope>> {
        match self.decode(src)? {
            Some(envelope) => Ok(Some(envelope)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<()> {
        let payload = item.to_vec()?;
        encode_frame(&payload, self.config.max_payload_size, dst)
    }
}
