//! Encode stage: PCM chunks in, compressed frames out.
//!
//! The stage owns the codec session outright. While running, the session
//! lives on the worker thread and is touched by nothing else; `stop()`
//! joins the worker and takes the session back for the next run, so no
//! locking around codec calls is ever needed.
//!
//! ## Drain guarantee
//!
//! `stop()` disconnects the feed side of the stage's channel and then
//! joins the worker. A crossbeam channel keeps delivering already-queued
//! items after disconnection, so every chunk accepted before `stop()` is
//! encoded and pushed downstream exactly once before `stop()` returns.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::buffering::chunk::{PcmChunk, CHUNK_SAMPLES};
use crate::codec::{CodecMode, CompressedFrame, FrameEncoder};
use crate::engine::{ChunkConsumer, FrameConsumer, PipelineDiagnostics};
use crate::error::{Result, TesseraError};

pub struct EncodeStage {
    mode: CodecMode,
    downstream: Arc<dyn FrameConsumer>,
    diagnostics: Arc<PipelineDiagnostics>,
    inner: Mutex<EncodeInner>,
}

struct EncodeInner {
    /// Present while stopped; moved into the worker while running.
    codec: Option<Box<dyn FrameEncoder>>,
    worker: Option<EncodeWorker>,
}

struct EncodeWorker {
    chunk_tx: Sender<PcmChunk>,
    handle: JoinHandle<Box<dyn FrameEncoder>>,
}

impl EncodeStage {
    pub fn new(
        codec: Box<dyn FrameEncoder>,
        mode: CodecMode,
        downstream: Arc<dyn FrameConsumer>,
        diagnostics: Arc<PipelineDiagnostics>,
    ) -> Self {
        Self {
            mode,
            downstream,
            diagnostics,
            inner: Mutex::new(EncodeInner {
                codec: Some(codec),
                worker: None,
            }),
        }
    }

    /// Open the codec session and launch the worker. No-op when already
    /// running.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.worker.is_some() {
            debug!("encode stage already running");
            return Ok(());
        }

        let mut codec = inner
            .codec
            .take()
            .ok_or_else(|| TesseraError::Codec("encoder session unavailable".into()))?;
        if let Err(e) = codec.open(self.mode) {
            inner.codec = Some(codec);
            return Err(e);
        }

        let (chunk_tx, chunk_rx) = unbounded::<PcmChunk>();
        let downstream = Arc::clone(&self.downstream);
        let diagnostics = Arc::clone(&self.diagnostics);
        let handle = thread::Builder::new()
            .name("encode".into())
            .spawn(move || run_worker(codec, chunk_rx, downstream, diagnostics))
            .map_err(TesseraError::Io)?;

        inner.worker = Some(EncodeWorker { chunk_tx, handle });
        info!(mode = %self.mode, "encode stage started");
        Ok(())
    }

    /// Accept one chunk for encoding. Non-blocking.
    ///
    /// Chunks of any length other than [`CHUNK_SAMPLES`] are dropped
    /// silently (the codec would reject them anyway).
    pub fn feed(&self, chunk: PcmChunk) {
        if chunk.samples.len() != CHUNK_SAMPLES {
            debug!(
                len = chunk.samples.len(),
                "dropping chunk of unexpected length"
            );
            self.diagnostics
                .chunks_rejected
                .fetch_add(1, Ordering::Relaxed);
            return;
        }

        let inner = self.inner.lock();
        match &inner.worker {
            Some(worker) => {
                self.diagnostics.chunks_fed.fetch_add(1, Ordering::Relaxed);
                let _ = worker.chunk_tx.send(chunk);
            }
            None => debug!("encode stage not running; chunk dropped"),
        }
    }

    /// Drain every queued chunk through the codec, release the session,
    /// and stop the worker. Blocks until the drain completes. No-op when
    /// already stopped.
    pub fn stop(&self) {
        let worker = self.inner.lock().worker.take();
        let Some(worker) = worker else {
            debug!("encode stage not running");
            return;
        };

        drop(worker.chunk_tx);
        match worker.handle.join() {
            Ok(codec) => self.inner.lock().codec = Some(codec),
            Err(_) => warn!("encode worker panicked; codec session lost"),
        }
        info!("encode stage stopped");
    }
}

impl ChunkConsumer for EncodeStage {
    fn feed_chunk(&self, chunk: PcmChunk) {
        self.feed(chunk);
    }
}

fn run_worker(
    mut codec: Box<dyn FrameEncoder>,
    chunk_rx: Receiver<PcmChunk>,
    downstream: Arc<dyn FrameConsumer>,
    diagnostics: Arc<PipelineDiagnostics>,
) -> Box<dyn FrameEncoder> {
    while let Ok(chunk) = chunk_rx.recv() {
        match codec.encode(&chunk) {
            Ok(frame) if frame.is_empty() => {
                // No output this call (DTX suppression and the like).
                diagnostics
                    .encodes_suppressed
                    .fetch_add(1, Ordering::Relaxed);
            }
            Ok(frame) => {
                diagnostics.frames_encoded.fetch_add(1, Ordering::Relaxed);
                downstream.feed_frame(frame);
            }
            Err(e) => {
                // Session assumed still valid; drop this chunk only.
                diagnostics.encode_errors.fetch_add(1, Ordering::Relaxed);
                warn!("encode failed, dropping chunk: {e}");
            }
        }
    }
    codec.close();
    codec
}
