//! `Recorder` — top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! Recorder::new()
//!     └─► start()    → stages up (hand-off → slice → encode), capture
//!         │            worker spawned, rotation timer armed,
//!         │            status = Recording
//!         └─► stop()  → timer cancelled, capture joined, stages drained
//!                       (encode → slice → hand-off), status = Stopped
//! ```
//!
//! `start()`/`stop()` are idempotent no-ops when called in the state they
//! would produce, and the recorder can be restarted after a stop.
//!
//! ## Threading
//!
//! One worker thread per stage plus the capture worker and the rotation
//! timer. `cpal::Stream` is `!Send` on Windows/macOS (COM / CoreAudio
//! thread affinity), so the stream is opened *inside* the capture worker
//! and never crosses a thread boundary. A sync oneshot channel propagates
//! any open-device error back to the `start()` caller.
//!
//! Stages are started consumers-first and stopped producers-first, so an
//! item in flight always finds its downstream stage alive and every
//! stop-time drain flows downhill.

pub mod encode;
pub mod handoff;
pub mod persist;

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::{
    audio::{
        resample::{f32_to_i16, RateConverter},
        AudioCapture,
    },
    buffering::{
        chunk::{ChunkAssembler, PcmChunk, SAMPLE_RATE},
        create_audio_ring, Consumer,
    },
    codec::{CodecMode, CompressedFrame, FrameEncoder},
    error::{Result, TesseraError},
    events::{RecorderStatus, RecorderStatusEvent, SliceEvent},
    slice::SealedSlice,
};

pub use encode::EncodeStage;
pub use handoff::{HandoffStage, LogSink, SliceSink};
pub use persist::SliceStage;

/// Broadcast channel capacity: 256 events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// Samples drained from the ring buffer per capture-loop iteration.
/// 20 ms at 48 kHz; also the rubato input block size.
const DRAIN_CHUNK: usize = 960;

/// Sleep when the ring is empty (avoids busy-wait burning a core).
const SLEEP_EMPTY_MS: u64 = 5;

/// Accepts PCM chunks — the seam between capture and encode.
pub trait ChunkConsumer: Send + Sync + 'static {
    fn feed_chunk(&self, chunk: PcmChunk);
}

/// Accepts compressed frames — the seam between encode and slicing.
pub trait FrameConsumer: Send + Sync + 'static {
    fn feed_frame(&self, frame: CompressedFrame);
}

/// Accepts sealed slices — the seam between slicing and hand-off.
pub trait SliceConsumer: Send + Sync + 'static {
    fn feed_slice(&self, slice: SealedSlice);
}

/// Shared pipeline counters for observability.
#[derive(Debug, Default)]
pub struct PipelineDiagnostics {
    pub chunks_fed: AtomicU64,
    pub chunks_rejected: AtomicU64,
    pub frames_encoded: AtomicU64,
    pub encodes_suppressed: AtomicU64,
    pub encode_errors: AtomicU64,
    pub frames_written: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub slices_sealed: AtomicU64,
    pub slices_delivered: AtomicU64,
    pub delivery_errors: AtomicU64,
}

impl PipelineDiagnostics {
    pub fn reset(&self) {
        self.chunks_fed.store(0, Ordering::Relaxed);
        self.chunks_rejected.store(0, Ordering::Relaxed);
        self.frames_encoded.store(0, Ordering::Relaxed);
        self.encodes_suppressed.store(0, Ordering::Relaxed);
        self.encode_errors.store(0, Ordering::Relaxed);
        self.frames_written.store(0, Ordering::Relaxed);
        self.frames_dropped.store(0, Ordering::Relaxed);
        self.slices_sealed.store(0, Ordering::Relaxed);
        self.slices_delivered.store(0, Ordering::Relaxed);
        self.delivery_errors.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            chunks_fed: self.chunks_fed.load(Ordering::Relaxed),
            chunks_rejected: self.chunks_rejected.load(Ordering::Relaxed),
            frames_encoded: self.frames_encoded.load(Ordering::Relaxed),
            encodes_suppressed: self.encodes_suppressed.load(Ordering::Relaxed),
            encode_errors: self.encode_errors.load(Ordering::Relaxed),
            frames_written: self.frames_written.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            slices_sealed: self.slices_sealed.load(Ordering::Relaxed),
            slices_delivered: self.slices_delivered.load(Ordering::Relaxed),
            delivery_errors: self.delivery_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DiagnosticsSnapshot {
    pub chunks_fed: u64,
    pub chunks_rejected: u64,
    pub frames_encoded: u64,
    pub encodes_suppressed: u64,
    pub encode_errors: u64,
    pub frames_written: u64,
    pub frames_dropped: u64,
    pub slices_sealed: u64,
    pub slices_delivered: u64,
    pub delivery_errors: u64,
}

/// Configuration for [`Recorder`].
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Directory slice files are written into (created if absent).
    pub slice_dir: PathBuf,
    /// How often the current slice is sealed and a new one opened.
    /// Default: 20 s.
    pub rotation_interval: Duration,
    /// Codec mode for the whole run. Default: MR122.
    pub mode: CodecMode,
    /// Input device by name; `None` selects the system default.
    pub preferred_input_device: Option<String>,
}

impl RecorderConfig {
    pub fn new(slice_dir: impl Into<PathBuf>) -> Self {
        Self {
            slice_dir: slice_dir.into(),
            rotation_interval: Duration::from_secs(20),
            mode: CodecMode::default(),
            preferred_input_device: None,
        }
    }
}

/// The top-level recorder handle.
///
/// `Recorder` is `Send + Sync` — all fields use interior mutability.
/// Wrap in `Arc<Recorder>` to share between a control surface and
/// event-forwarding tasks.
pub struct Recorder {
    config: RecorderConfig,
    encode: Arc<EncodeStage>,
    slicer: Arc<SliceStage>,
    handoff: Arc<HandoffStage>,
    /// `true` while capture + stages are active.
    running: Arc<AtomicBool>,
    status: Arc<Mutex<RecorderStatus>>,
    status_tx: broadcast::Sender<RecorderStatusEvent>,
    slice_tx: broadcast::Sender<SliceEvent>,
    diagnostics: Arc<PipelineDiagnostics>,
    workers: Mutex<Option<RecorderWorkers>>,
}

struct RecorderWorkers {
    capture: JoinHandle<()>,
    timer: JoinHandle<()>,
    /// Dropping this disconnects the timer's stop channel, ending it.
    timer_stop: Sender<()>,
}

impl Recorder {
    /// Create a recorder that logs sealed slices instead of shipping them.
    pub fn new(config: RecorderConfig, encoder: Box<dyn FrameEncoder>) -> Self {
        Self::with_sink(config, encoder, Arc::new(LogSink))
    }

    /// Create a recorder delivering sealed slices through `sink`.
    pub fn with_sink(
        config: RecorderConfig,
        encoder: Box<dyn FrameEncoder>,
        sink: Arc<dyn SliceSink>,
    ) -> Self {
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (slice_tx, _) = broadcast::channel(BROADCAST_CAP);
        let diagnostics = Arc::new(PipelineDiagnostics::default());

        let handoff = Arc::new(HandoffStage::new(
            sink,
            slice_tx.clone(),
            Arc::clone(&diagnostics),
        ));
        let slicer = Arc::new(SliceStage::new(
            config.slice_dir.clone(),
            Arc::clone(&handoff) as Arc<dyn SliceConsumer>,
            Arc::clone(&diagnostics),
        ));
        let encode = Arc::new(EncodeStage::new(
            encoder,
            config.mode,
            Arc::clone(&slicer) as Arc<dyn FrameConsumer>,
            Arc::clone(&diagnostics),
        ));

        Self {
            config,
            encode,
            slicer,
            handoff,
            running: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(RecorderStatus::Idle)),
            status_tx,
            slice_tx,
            diagnostics,
            workers: Mutex::new(None),
        }
    }

    /// Start the pipeline.
    ///
    /// Blocks until the audio device is confirmed open (or fails), then
    /// returns; capture and encoding continue on background threads.
    /// A no-op when already running.
    pub fn start(&self) -> Result<()> {
        let mut workers = self.workers.lock();
        if workers.is_some() {
            info!("recorder already running");
            return Ok(());
        }

        self.diagnostics.reset();

        // Consumers come up first so nothing in flight finds its
        // downstream stage missing.
        if let Err(e) = self.handoff.start() {
            self.fail(&e);
            return Err(e);
        }
        if let Err(e) = self.slicer.start() {
            self.handoff.stop();
            self.fail(&e);
            return Err(e);
        }
        if let Err(e) = self.encode.start() {
            self.slicer.stop();
            self.handoff.stop();
            self.fail(&e);
            return Err(e);
        }

        self.running.store(true, Ordering::SeqCst);

        // Sync oneshot: the capture worker signals open success/failure.
        // Carries the actual capture sample rate on success.
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();
        let encode = Arc::clone(&self.encode) as Arc<dyn ChunkConsumer>;
        let running = Arc::clone(&self.running);
        let preferred = self.config.preferred_input_device.clone();

        let capture = match thread::Builder::new()
            .name("capture".into())
            .spawn(move || run_capture(preferred, encode, running, open_tx))
        {
            Ok(handle) => handle,
            Err(e) => {
                let err = TesseraError::Io(e);
                self.abort_start(None);
                self.fail(&err);
                return Err(err);
            }
        };

        match open_rx.recv() {
            Ok(Ok(rate)) => {
                info!(capture_rate = rate, "audio capture confirmed");
            }
            Ok(Err(e)) => {
                self.abort_start(Some(capture));
                self.fail(&e);
                return Err(e);
            }
            Err(_) => {
                // Channel closed before a message was sent — the worker died.
                let err = TesseraError::Other(anyhow::anyhow!(
                    "capture worker died before confirming device open"
                ));
                self.abort_start(Some(capture));
                self.fail(&err);
                return Err(err);
            }
        }

        // Rotation timer: seals the current slice every interval.
        let (timer_stop, timer_stop_rx) = crossbeam_channel::bounded::<()>(1);
        let slicer = Arc::clone(&self.slicer);
        let interval = self.config.rotation_interval;
        let timer = match thread::Builder::new().name("slice-timer".into()).spawn(move || {
            let ticker = crossbeam_channel::tick(interval);
            loop {
                crossbeam_channel::select! {
                    recv(ticker) -> _ => slicer.rotate(),
                    recv(timer_stop_rx) -> _ => break,
                }
            }
        }) {
            Ok(handle) => handle,
            Err(e) => {
                let err = TesseraError::Io(e);
                self.abort_start(Some(capture));
                self.fail(&err);
                return Err(err);
            }
        };

        *workers = Some(RecorderWorkers {
            capture,
            timer,
            timer_stop,
        });
        self.set_status(RecorderStatus::Recording, None);
        info!(
            dir = %self.config.slice_dir.display(),
            interval_secs = self.config.rotation_interval.as_secs(),
            mode = %self.config.mode,
            "recorder started"
        );
        Ok(())
    }

    /// Stop the pipeline, draining every stage. A no-op when not running.
    ///
    /// The final partial slice is flushed to disk but not handed off;
    /// call [`Recorder::rotate`] first to get it delivered.
    pub fn stop(&self) {
        let mut workers = self.workers.lock();
        let Some(w) = workers.take() else {
            debug!("recorder not running");
            return;
        };

        info!("recorder stopping");
        drop(w.timer_stop);
        let _ = w.timer.join();

        self.running.store(false, Ordering::SeqCst);
        let _ = w.capture.join();

        // Producers drain first so everything flows downhill.
        self.encode.stop();
        self.slicer.stop();
        self.handoff.stop();

        self.set_status(RecorderStatus::Stopped, None);
        info!("recorder stopped");
    }

    /// Force a slice boundary now: seal the current slice (forwarding it
    /// to hand-off) and open the next one. Ignored when not running.
    pub fn rotate(&self) {
        if !self.running.load(Ordering::SeqCst) {
            debug!("rotate ignored; recorder not running");
            return;
        }
        self.slicer.rotate();
    }

    /// Whether the pipeline is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current recorder status (snapshot).
    pub fn status(&self) -> RecorderStatus {
        *self.status.lock()
    }

    /// Subscribe to sealed-slice announcements.
    pub fn subscribe_slices(&self) -> broadcast::Receiver<SliceEvent> {
        self.slice_tx.subscribe()
    }

    /// Subscribe to status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<RecorderStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Snapshot of pipeline counters for observability.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    fn abort_start(&self, capture: Option<JoinHandle<()>>) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = capture {
            let _ = handle.join();
        }
        self.encode.stop();
        self.slicer.stop();
        self.handoff.stop();
    }

    fn fail(&self, err: &TesseraError) {
        self.set_status(RecorderStatus::Error, Some(err.to_string()));
    }

    fn set_status(&self, new_status: RecorderStatus, detail: Option<String>) {
        *self.status.lock() = new_status;
        let _ = self.status_tx.send(RecorderStatusEvent {
            status: new_status,
            detail,
        });
    }
}

/// Capture worker: device → ring → resample → 160-sample chunks → encode.
///
/// Owns the cpal stream for its whole life (the stream is `!Send`).
fn run_capture(
    preferred_device: Option<String>,
    encode: Arc<dyn ChunkConsumer>,
    running: Arc<AtomicBool>,
    open_tx: std::sync::mpsc::Sender<Result<u32>>,
) {
    let (producer, mut consumer) = create_audio_ring();

    let capture =
        match AudioCapture::open_with_preference(producer, Arc::clone(&running), preferred_device.as_deref()) {
            Ok(c) => c,
            Err(e) => {
                let _ = open_tx.send(Err(e));
                return;
            }
        };
    let capture_rate = capture.sample_rate;

    let mut converter = match RateConverter::new(capture_rate, SAMPLE_RATE, DRAIN_CHUNK) {
        Ok(r) => r,
        Err(e) => {
            error!("failed to create resampler: {e}");
            let _ = open_tx.send(Err(e));
            return;
        }
    };

    let _ = open_tx.send(Ok(capture_rate));

    // Scratch buffer, reused each iteration.
    let mut raw = vec![0f32; DRAIN_CHUNK];
    let mut assembler = ChunkAssembler::new();

    while running.load(Ordering::Relaxed) {
        let n = consumer.pop_slice(&mut raw);
        if n == 0 {
            // Nothing captured yet — yield instead of spinning.
            thread::sleep(Duration::from_millis(SLEEP_EMPTY_MS));
            continue;
        }

        let resampled = converter.process(&raw[..n]);
        if resampled.is_empty() {
            // Partial block — rubato is waiting for more input.
            continue;
        }

        assembler.push(&f32_to_i16(&resampled));
        while let Some(chunk) = assembler.next_chunk() {
            encode.feed_chunk(chunk);
        }
    }

    capture.stop();
    debug!("capture worker exiting");
    // Stream drops here, releasing the audio device on this thread.
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::stub::StubEncoder;

    #[test]
    fn config_defaults_match_recording_profile() {
        let config = RecorderConfig::new("/tmp/record");
        assert_eq!(config.rotation_interval, Duration::from_secs(20));
        assert_eq!(config.mode, CodecMode::Mr122);
        assert!(config.preferred_input_device.is_none());
    }

    #[test]
    fn recorder_is_idle_until_started() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(
            RecorderConfig::new(dir.path()),
            Box::new(StubEncoder::new()),
        );
        assert_eq!(recorder.status(), RecorderStatus::Idle);
        assert!(!recorder.is_running());
    }

    #[test]
    fn stop_and_rotate_are_no_ops_when_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(
            RecorderConfig::new(dir.path()),
            Box::new(StubEncoder::new()),
        );
        recorder.stop();
        recorder.rotate();
        assert_eq!(recorder.status(), RecorderStatus::Idle);
        // No slice directory side effects before start.
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn diagnostics_reset_clears_counters() {
        let diag = PipelineDiagnostics::default();
        diag.chunks_fed.store(7, Ordering::Relaxed);
        diag.slices_sealed.store(3, Ordering::Relaxed);
        diag.reset();
        let snap = diag.snapshot();
        assert_eq!(snap.chunks_fed, 0);
        assert_eq!(snap.slices_sealed, 0);
    }
}
