//! `StubCodec` — deterministic placeholder backend without a native codec.
//!
//! Used in tests and wherever a real encoder binding is not linked in.
//! Frames it produces are bit-exact reproducible for the same input and
//! carry a valid frame header byte, so the full pipeline — slicing,
//! rotation, hand-off, slice reading — can be exercised end-to-end.
//! Decoding a stub frame yields silence; the payload is a digest, not
//! compressed speech.

use tracing::debug;

use crate::buffering::chunk::{PcmChunk, CHUNK_SAMPLES};
use crate::codec::{CodecMode, FrameDecoder, FrameEncoder};
use crate::error::{Result, TesseraError};

/// Deterministic stand-in for a real encoder session.
pub struct StubEncoder {
    mode: Option<CodecMode>,
    /// When set, silent chunks produce no output — mimics DTX suppression
    /// so callers see the "zero-length encode result" path.
    dtx: bool,
}

impl StubEncoder {
    pub fn new() -> Self {
        Self {
            mode: None,
            dtx: false,
        }
    }

    pub fn with_dtx(mut self, dtx: bool) -> Self {
        self.dtx = dtx;
        self
    }
}

impl Default for StubEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameEncoder for StubEncoder {
    fn open(&mut self, mode: CodecMode) -> Result<()> {
        debug!(%mode, dtx = self.dtx, "StubEncoder::open");
        self.mode = Some(mode);
        Ok(())
    }

    fn encode(&mut self, chunk: &PcmChunk) -> Result<Vec<u8>> {
        let mode = self
            .mode
            .ok_or_else(|| TesseraError::Codec("encode called before open".into()))?;

        if chunk.samples.len() != CHUNK_SAMPLES {
            return Err(TesseraError::Codec(format!(
                "chunk has {} samples, expected {CHUNK_SAMPLES}",
                chunk.samples.len()
            )));
        }

        if self.dtx && chunk.samples.iter().all(|&s| s == 0) {
            return Ok(Vec::new());
        }

        let mut frame = vec![0u8; mode.frame_size()];
        frame[0] = mode.header_byte();
        // Payload: a rolling digest of the samples. Deterministic and
        // input-sensitive, which is all the pipeline needs from a stub.
        let mut acc: u32 = 0x9E37;
        for (i, &sample) in chunk.samples.iter().enumerate() {
            acc = acc
                .rotate_left(5)
                .wrapping_add(sample as u16 as u32)
                .wrapping_add(i as u32);
            let slot = 1 + (i % (frame.len() - 1));
            frame[slot] ^= (acc & 0xFF) as u8;
        }
        Ok(frame)
    }

    fn close(&mut self) {
        debug!("StubEncoder::close");
        self.mode = None;
    }
}

/// Decoder counterpart to [`StubEncoder`].
///
/// Validates frame shape against the mode table and emits silence —
/// stub payloads are not invertible.
pub struct StubDecoder {
    open: bool,
}

impl StubDecoder {
    pub fn new() -> Self {
        Self { open: false }
    }
}

impl Default for StubDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder for StubDecoder {
    fn open(&mut self) -> Result<()> {
        debug!("StubDecoder::open");
        self.open = true;
        Ok(())
    }

    fn decode(&mut self, frame: &[u8]) -> Result<PcmChunk> {
        if !self.open {
            return Err(TesseraError::Codec("decode called before open".into()));
        }
        let header = *frame
            .first()
            .ok_or_else(|| TesseraError::Codec("empty frame".into()))?;
        let mode = CodecMode::from_header_byte(header)
            .ok_or_else(|| TesseraError::Codec(format!("unknown frame type in header {header:#04x}")))?;
        if frame.len() != mode.frame_size() {
            return Err(TesseraError::Codec(format!(
                "{mode} frame has {} bytes, expected {}",
                frame.len(),
                mode.frame_size()
            )));
        }
        Ok(PcmChunk::silence())
    }

    fn close(&mut self) {
        debug!("StubDecoder::close");
        self.open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_chunk() -> PcmChunk {
        PcmChunk::new((0..CHUNK_SAMPLES as i16).collect())
    }

    #[test]
    fn encode_before_open_errors() {
        let mut enc = StubEncoder::new();
        assert!(enc.encode(&ramp_chunk()).is_err());
    }

    #[test]
    fn frames_have_mode_size_and_header() {
        for mode in CodecMode::ALL {
            let mut enc = StubEncoder::new();
            enc.open(mode).unwrap();
            let frame = enc.encode(&ramp_chunk()).unwrap();
            assert_eq!(frame.len(), mode.frame_size());
            assert_eq!(CodecMode::from_header_byte(frame[0]), Some(mode));
        }
    }

    #[test]
    fn encoding_is_deterministic_and_input_sensitive() {
        let mut enc = StubEncoder::new();
        enc.open(CodecMode::Mr122).unwrap();
        let a = enc.encode(&ramp_chunk()).unwrap();
        let b = enc.encode(&ramp_chunk()).unwrap();
        assert_eq!(a, b);

        let other = enc.encode(&PcmChunk::silence()).unwrap();
        assert_ne!(a, other);
    }

    #[test]
    fn dtx_suppresses_silent_chunks_only() {
        let mut enc = StubEncoder::new().with_dtx(true);
        enc.open(CodecMode::Mr122).unwrap();
        assert!(enc.encode(&PcmChunk::silence()).unwrap().is_empty());
        assert!(!enc.encode(&ramp_chunk()).unwrap().is_empty());
    }

    #[test]
    fn decoder_round_trips_frame_shape() {
        let mut enc = StubEncoder::new();
        enc.open(CodecMode::Mr59).unwrap();
        let frame = enc.encode(&ramp_chunk()).unwrap();

        let mut dec = StubDecoder::new();
        dec.open().unwrap();
        let pcm = dec.decode(&frame).unwrap();
        assert!(pcm.is_encodable());
    }

    #[test]
    fn decoder_rejects_wrong_length_frames() {
        let mut dec = StubDecoder::new();
        dec.open().unwrap();
        // MR122 header with an MR475-sized body.
        let mut frame = vec![0u8; 13];
        frame[0] = CodecMode::Mr122.header_byte();
        assert!(dec.decode(&frame).is_err());
    }

    #[test]
    fn session_reopens_after_close() {
        let mut enc = StubEncoder::new();
        enc.open(CodecMode::Mr475).unwrap();
        enc.close();
        assert!(enc.encode(&ramp_chunk()).is_err());
        enc.open(CodecMode::Mr475).unwrap();
        assert!(enc.encode(&ramp_chunk()).is_ok());
    }
}
