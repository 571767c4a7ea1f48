//! Frame codec abstraction.
//!
//! The `FrameEncoder`/`FrameDecoder` traits decouple the pipeline from any
//! specific codec backend (the deterministic stub, an opencore-amr FFI
//! binding, etc.).
//!
//! `&mut self` on `encode`/`decode` intentionally expresses that codec
//! sessions are stateful — predictor memories, DTX hangover, etc. A session
//! is owned by exactly one stage and only ever touched by that stage's
//! worker thread, so no internal locking is required.

pub mod stub;

use crate::buffering::chunk::PcmChunk;
use crate::error::Result;

/// One codec output frame, exactly as stored in a slice file.
pub type CompressedFrame = Vec<u8>;

/// The AMR-NB encoding modes and their stored frame sizes.
///
/// Frame sizes are for the storage format (RFC 4867): one frame-type
/// header byte plus the packed speech bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecMode {
    /// 4.75 kbit/s
    Mr475,
    /// 5.15 kbit/s
    Mr515,
    /// 5.90 kbit/s
    Mr59,
    /// 6.70 kbit/s
    Mr67,
    /// 7.40 kbit/s
    Mr74,
    /// 7.95 kbit/s
    Mr795,
    /// 10.2 kbit/s
    Mr102,
    /// 12.2 kbit/s
    Mr122,
}

impl CodecMode {
    /// Every mode, in frame-type order.
    pub const ALL: [CodecMode; 8] = [
        CodecMode::Mr475,
        CodecMode::Mr515,
        CodecMode::Mr59,
        CodecMode::Mr67,
        CodecMode::Mr74,
        CodecMode::Mr795,
        CodecMode::Mr102,
        CodecMode::Mr122,
    ];

    /// Frame type index as carried in the frame header byte.
    pub fn frame_type(self) -> u8 {
        match self {
            CodecMode::Mr475 => 0,
            CodecMode::Mr515 => 1,
            CodecMode::Mr59 => 2,
            CodecMode::Mr67 => 3,
            CodecMode::Mr74 => 4,
            CodecMode::Mr795 => 5,
            CodecMode::Mr102 => 6,
            CodecMode::Mr122 => 7,
        }
    }

    /// Total stored frame size in bytes, header byte included.
    pub fn frame_size(self) -> usize {
        match self {
            CodecMode::Mr475 => 13,
            CodecMode::Mr515 => 14,
            CodecMode::Mr59 => 16,
            CodecMode::Mr67 => 18,
            CodecMode::Mr74 => 20,
            CodecMode::Mr795 => 21,
            CodecMode::Mr102 => 27,
            CodecMode::Mr122 => 32,
        }
    }

    /// Nominal bitrate, for display.
    pub fn bitrate_label(self) -> &'static str {
        match self {
            CodecMode::Mr475 => "4.75 kbit/s",
            CodecMode::Mr515 => "5.15 kbit/s",
            CodecMode::Mr59 => "5.90 kbit/s",
            CodecMode::Mr67 => "6.70 kbit/s",
            CodecMode::Mr74 => "7.40 kbit/s",
            CodecMode::Mr795 => "7.95 kbit/s",
            CodecMode::Mr102 => "10.2 kbit/s",
            CodecMode::Mr122 => "12.2 kbit/s",
        }
    }

    /// The frame header byte for a good frame of this mode:
    /// frame type in bits 3–6, quality bit set.
    pub fn header_byte(self) -> u8 {
        (self.frame_type() << 3) | 0x04
    }

    /// Recover the mode from a frame header byte. Returns `None` for
    /// SID/NO_DATA and reserved frame types, which never appear in
    /// slices written by this crate.
    pub fn from_header_byte(byte: u8) -> Option<Self> {
        match (byte >> 3) & 0x0F {
            0 => Some(CodecMode::Mr475),
            1 => Some(CodecMode::Mr515),
            2 => Some(CodecMode::Mr59),
            3 => Some(CodecMode::Mr67),
            4 => Some(CodecMode::Mr74),
            5 => Some(CodecMode::Mr795),
            6 => Some(CodecMode::Mr102),
            7 => Some(CodecMode::Mr122),
            _ => None,
        }
    }
}

impl Default for CodecMode {
    /// The recording default — highest narrowband quality.
    fn default() -> Self {
        CodecMode::Mr122
    }
}

impl std::fmt::Display for CodecMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CodecMode::Mr475 => "MR475",
            CodecMode::Mr515 => "MR515",
            CodecMode::Mr59 => "MR59",
            CodecMode::Mr67 => "MR67",
            CodecMode::Mr74 => "MR74",
            CodecMode::Mr795 => "MR795",
            CodecMode::Mr102 => "MR102",
            CodecMode::Mr122 => "MR122",
        };
        f.write_str(name)
    }
}

/// Contract for encoder backends.
///
/// A session lifecycle is `open` → zero or more `encode` calls → `close`.
/// `open`/`close` are only called while the owning stage's worker is not
/// running; `encode` is only called from that worker.
pub trait FrameEncoder: Send + 'static {
    /// Initialise the session for `mode`. Called once per recording run.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be initialised.
    fn open(&mut self, mode: CodecMode) -> Result<()>;

    /// Compress one 20 ms chunk into a stored frame.
    ///
    /// An empty return value means "no output this call" (e.g. DTX
    /// suppression) and must not be written downstream.
    fn encode(&mut self, chunk: &PcmChunk) -> Result<Vec<u8>>;

    /// Release the session. Idempotent.
    fn close(&mut self);
}

/// Contract for decoder backends, symmetric to [`FrameEncoder`].
pub trait FrameDecoder: Send + 'static {
    /// Initialise the session. The mode is carried per-frame in the
    /// frame header, so none is passed here.
    fn open(&mut self) -> Result<()>;

    /// Decompress one stored frame into a 20 ms PCM chunk.
    fn decode(&mut self, frame: &[u8]) -> Result<PcmChunk>;

    /// Release the session. Idempotent.
    fn close(&mut self);
}
