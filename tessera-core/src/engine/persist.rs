//! Slice stage: compressed frames in, rotation-bounded files out.
//!
//! Two threads touch the current slice writer — this stage's worker
//! (appending frames) and whoever calls `rotate()` (the rotation timer,
//! or a caller forcing a cut). Both go through the same
//! `parking_lot::Mutex`, so a rotation can never interleave with a
//! half-written frame.
//!
//! When no writer is open (a rotation failed), the worker holds the frame
//! it popped and retries on a short sleep; frames queue up behind it in
//! arrival order until a rotation succeeds. Only `rotate()` forwards a
//! sealed slice downstream — the stop-time drain seals the last file to
//! disk without announcing it.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::codec::CompressedFrame;
use crate::engine::{FrameConsumer, PipelineDiagnostics, SliceConsumer};
use crate::error::{Result, TesseraError};
use crate::slice::SliceWriter;

/// How long the worker waits between retries while no slice is open.
const NO_SLICE_RETRY_MS: u64 = 5;

pub struct SliceStage {
    dir: PathBuf,
    downstream: Arc<dyn SliceConsumer>,
    diagnostics: Arc<PipelineDiagnostics>,
    /// The currently open slice, shared between worker and rotation.
    current: Arc<Mutex<Option<SliceWriter>>>,
    /// Cleared by `stop()` so the drain stops waiting for rotations that
    /// will never come.
    running: Arc<AtomicBool>,
    worker: Mutex<Option<SliceStageWorker>>,
}

struct SliceStageWorker {
    frame_tx: Sender<CompressedFrame>,
    handle: JoinHandle<()>,
}

impl SliceStage {
    pub fn new(
        dir: PathBuf,
        downstream: Arc<dyn SliceConsumer>,
        diagnostics: Arc<PipelineDiagnostics>,
    ) -> Self {
        Self {
            dir,
            downstream,
            diagnostics,
            current: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    /// Open the first slice (when none is open) and launch the worker.
    /// No-op when already running. A failed initial rotation is not fatal:
    /// the stage starts stalled and recovers at the next `rotate()`.
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            debug!("slice stage already running");
            return Ok(());
        }

        if self.current.lock().is_none() {
            self.rotate();
        }

        self.running.store(true, Ordering::SeqCst);
        let (frame_tx, frame_rx) = unbounded::<CompressedFrame>();
        let current = Arc::clone(&self.current);
        let running = Arc::clone(&self.running);
        let diagnostics = Arc::clone(&self.diagnostics);
        let handle = thread::Builder::new()
            .name("slice".into())
            .spawn(move || run_worker(frame_rx, current, running, diagnostics))
            .map_err(TesseraError::Io)?;

        *worker = Some(SliceStageWorker { frame_tx, handle });
        info!(dir = %self.dir.display(), "slice stage started");
        Ok(())
    }

    /// Accept one compressed frame for persistence. Non-blocking.
    pub fn feed(&self, frame: CompressedFrame) {
        let worker = self.worker.lock();
        match &*worker {
            Some(w) => {
                let _ = w.frame_tx.send(frame);
            }
            None => debug!("slice stage not running; frame dropped"),
        }
    }

    /// Seal the current slice (forwarding it downstream) and open the next
    /// one. Safe to call from any thread, concurrently with the worker.
    ///
    /// If the new slice cannot be created, the stage is left with no open
    /// writer: frames stall in the queue until a later rotation succeeds.
    pub fn rotate(&self) {
        let mut current = self.current.lock();

        if let Some(writer) = current.take() {
            match writer.seal() {
                Ok(sealed) => {
                    info!(
                        path = %sealed.path.display(),
                        frames = sealed.frame_count,
                        payload_bytes = sealed.payload_bytes,
                        "slice sealed"
                    );
                    self.diagnostics.slices_sealed.fetch_add(1, Ordering::Relaxed);
                    self.downstream.feed_slice(sealed);
                }
                Err(e) => warn!("failed to seal slice: {e}"),
            }
        }

        match SliceWriter::create(&self.dir) {
            Ok(writer) => *current = Some(writer),
            Err(e) => warn!(
                dir = %self.dir.display(),
                "slice rotation failed, persisting stalled until next rotation: {e}"
            ),
        }
    }

    /// Drain every queued frame into the current slice, flush it to disk
    /// without forwarding, and stop the worker. Blocks until the drain
    /// completes. No-op when already stopped.
    pub fn stop(&self) {
        let worker = self.worker.lock().take();
        let Some(worker) = worker else {
            debug!("slice stage not running");
            return;
        };

        self.running.store(false, Ordering::SeqCst);
        drop(worker.frame_tx);
        if worker.handle.join().is_err() {
            warn!("slice worker panicked");
        }
        info!("slice stage stopped");
    }
}

impl FrameConsumer for SliceStage {
    fn feed_frame(&self, frame: CompressedFrame) {
        self.feed(frame);
    }
}

fn run_worker(
    frame_rx: Receiver<CompressedFrame>,
    current: Arc<Mutex<Option<SliceWriter>>>,
    running: Arc<AtomicBool>,
    diagnostics: Arc<PipelineDiagnostics>,
) {
    while let Ok(frame) = frame_rx.recv() {
        write_frame(&frame, &current, &running, &diagnostics);
    }

    // Drained. Seal the last slice to disk; only a rotation forwards it.
    if let Some(writer) = current.lock().take() {
        match writer.seal() {
            Ok(sealed) => info!(
                path = %sealed.path.display(),
                frames = sealed.frame_count,
                "final slice flushed to disk (not forwarded)"
            ),
            Err(e) => warn!("failed to flush final slice: {e}"),
        }
    }
}

fn write_frame(
    frame: &[u8],
    current: &Mutex<Option<SliceWriter>>,
    running: &AtomicBool,
    diagnostics: &PipelineDiagnostics,
) {
    loop {
        {
            let mut cur = current.lock();
            if let Some(writer) = cur.as_mut() {
                match writer.append(frame) {
                    Ok(()) => {
                        diagnostics.frames_written.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        diagnostics.frames_dropped.fetch_add(1, Ordering::Relaxed);
                        warn!("failed to append frame, dropping: {e}");
                    }
                }
                return;
            }
        }

        if !running.load(Ordering::SeqCst) {
            diagnostics.frames_dropped.fetch_add(1, Ordering::Relaxed);
            warn!("no open slice during drain; frame dropped");
            return;
        }

        // No destination; hold this frame (and queue order) until a
        // rotation succeeds.
        thread::sleep(Duration::from_millis(NO_SLICE_RETRY_MS));
    }
}
