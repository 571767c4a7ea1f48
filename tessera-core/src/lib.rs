//! # tessera-core
//!
//! Reusable streaming voice recorder SDK.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → AudioCapture → SPSC RingBuffer → capture worker
//!                                                    │ 160-sample chunks
//!                                              EncodeStage (codec session)
//!                                                    │ compressed frames
//!                                              SliceStage  ◄── rotation timer
//!                                                    │ sealed slice files
//!                                              HandoffStage → SliceSink
//!                                                    │
//!                                       broadcast::Sender<SliceEvent>
//! ```
//!
//! The audio callback is zero-alloc. Each stage runs one dedicated worker
//! fed through an unbounded FIFO channel; stopping a stage drains its
//! queue completely before returning, so no audio is lost across
//! start/stop or rotation boundaries.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod codec;
pub mod engine;
pub mod error;
pub mod events;
pub mod slice;

// Convenience re-exports for downstream crates
pub use codec::{CodecMode, CompressedFrame, FrameDecoder, FrameEncoder};
pub use engine::{LogSink, Recorder, RecorderConfig, SliceSink};
pub use error::TesseraError;
pub use events::{RecorderStatus, RecorderStatusEvent, SliceEvent};
pub use slice::{SealedSlice, SLICE_MAGIC};
