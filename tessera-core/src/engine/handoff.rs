//! Hand-off stage: sealed slices out to the delivery collaborator.
//!
//! Rotation happens on the timer thread and must never wait on delivery
//! I/O, so this stage queues each sealed slice and forwards it from its
//! own worker. The actual transport is behind [`SliceSink`]; the default
//! [`LogSink`] only logs receipt and leaves the file where it is.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::engine::{PipelineDiagnostics, SliceConsumer};
use crate::error::{Result, TesseraError};
use crate::events::SliceEvent;
use crate::slice::SealedSlice;

/// Delivery collaborator for sealed slices.
///
/// Implementations ship the file to wherever it goes — an upload queue, a
/// message bus, another directory. A delivery error leaves the file on
/// disk untouched; the stage logs and moves on.
pub trait SliceSink: Send + Sync + 'static {
    fn deliver(&self, slice: &SealedSlice) -> Result<()>;
}

/// Default sink: log the sealed slice and do nothing else.
pub struct LogSink;

impl SliceSink for LogSink {
    fn deliver(&self, slice: &SealedSlice) -> Result<()> {
        info!(
            path = %slice.path.display(),
            frames = slice.frame_count,
            payload_bytes = slice.payload_bytes,
            "slice ready for delivery"
        );
        Ok(())
    }
}

pub struct HandoffStage {
    sink: Arc<dyn SliceSink>,
    events_tx: broadcast::Sender<SliceEvent>,
    seq: Arc<AtomicU64>,
    diagnostics: Arc<PipelineDiagnostics>,
    worker: Mutex<Option<HandoffWorker>>,
}

struct HandoffWorker {
    slice_tx: Sender<SealedSlice>,
    handle: JoinHandle<()>,
}

impl HandoffStage {
    pub fn new(
        sink: Arc<dyn SliceSink>,
        events_tx: broadcast::Sender<SliceEvent>,
        diagnostics: Arc<PipelineDiagnostics>,
    ) -> Self {
        Self {
            sink,
            events_tx,
            seq: Arc::new(AtomicU64::new(0)),
            diagnostics,
            worker: Mutex::new(None),
        }
    }

    /// Launch the delivery worker. No-op when already running.
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            debug!("hand-off stage already running");
            return Ok(());
        }

        let (slice_tx, slice_rx) = unbounded::<SealedSlice>();
        let sink = Arc::clone(&self.sink);
        let events_tx = self.events_tx.clone();
        let seq = Arc::clone(&self.seq);
        let diagnostics = Arc::clone(&self.diagnostics);
        let handle = thread::Builder::new()
            .name("handoff".into())
            .spawn(move || run_worker(slice_rx, sink, events_tx, seq, diagnostics))
            .map_err(TesseraError::Io)?;

        *worker = Some(HandoffWorker { slice_tx, handle });
        info!("hand-off stage started");
        Ok(())
    }

    /// Accept one sealed slice for delivery. Non-blocking.
    pub fn feed(&self, slice: SealedSlice) {
        let worker = self.worker.lock();
        match &*worker {
            Some(w) => {
                let _ = w.slice_tx.send(slice);
            }
            None => debug!(
                path = %slice.path.display(),
                "hand-off stage not running; slice left on disk"
            ),
        }
    }

    /// Drain pending deliveries and stop the worker. No-op when stopped.
    pub fn stop(&self) {
        let worker = self.worker.lock().take();
        let Some(worker) = worker else {
            debug!("hand-off stage not running");
            return;
        };

        drop(worker.slice_tx);
        if worker.handle.join().is_err() {
            warn!("hand-off worker panicked");
        }
        info!("hand-off stage stopped");
    }
}

impl SliceConsumer for HandoffStage {
    fn feed_slice(&self, slice: SealedSlice) {
        self.feed(slice);
    }
}

fn run_worker(
    slice_rx: Receiver<SealedSlice>,
    sink: Arc<dyn SliceSink>,
    events_tx: broadcast::Sender<SliceEvent>,
    seq: Arc<AtomicU64>,
    diagnostics: Arc<PipelineDiagnostics>,
) {
    while let Ok(slice) = slice_rx.recv() {
        match sink.deliver(&slice) {
            Ok(()) => {
                diagnostics.slices_delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                diagnostics.delivery_errors.fetch_add(1, Ordering::Relaxed);
                warn!(path = %slice.path.display(), "slice delivery failed: {e}");
            }
        }

        // Announced regardless of delivery outcome — the slice exists and
        // is sealed; a send error only means no one is listening.
        let event = SliceEvent {
            seq: seq.fetch_add(1, Ordering::Relaxed),
            path: slice.path.clone(),
            frame_count: slice.frame_count,
            payload_bytes: slice.payload_bytes,
        };
        let _ = events_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    struct CollectSink {
        delivered: Mutex<Vec<PathBuf>>,
        fail: bool,
    }

    impl CollectSink {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                delivered: Mutex::new(Vec::new()),
                fail,
            })
        }
    }

    impl SliceSink for CollectSink {
        fn deliver(&self, slice: &SealedSlice) -> Result<()> {
            if self.fail {
                return Err(TesseraError::Other(anyhow::anyhow!("unreachable endpoint")));
            }
            self.delivered.lock().push(slice.path.clone());
            Ok(())
        }
    }

    fn sealed(name: &str, frames: u64) -> SealedSlice {
        SealedSlice {
            path: PathBuf::from(format!("/tmp/{name}.amr")),
            frame_count: frames,
            payload_bytes: frames * 32,
        }
    }

    fn recv_event(rx: &mut broadcast::Receiver<SliceEvent>, timeout: Duration) -> SliceEvent {
        let start = Instant::now();
        loop {
            match rx.try_recv() {
                Ok(ev) => return ev,
                Err(broadcast::error::TryRecvError::Empty) => {
                    assert!(start.elapsed() < timeout, "timed out waiting for slice event");
                    thread::sleep(Duration::from_millis(2));
                }
                Err(e) => panic!("slice event channel: {e}"),
            }
        }
    }

    #[test]
    fn delivers_slices_and_announces_in_order() {
        let (events_tx, mut events_rx) = broadcast::channel(16);
        let sink = CollectSink::new(false);
        let diagnostics = Arc::new(PipelineDiagnostics::default());
        let stage = HandoffStage::new(Arc::clone(&sink) as _, events_tx, diagnostics);

        stage.start().unwrap();
        stage.feed(sealed("a", 10));
        stage.feed(sealed("b", 20));
        stage.stop();

        assert_eq!(
            *sink.delivered.lock(),
            vec![PathBuf::from("/tmp/a.amr"), PathBuf::from("/tmp/b.amr")]
        );

        let first = recv_event(&mut events_rx, Duration::from_secs(1));
        let second = recv_event(&mut events_rx, Duration::from_secs(1));
        assert_eq!(first.seq, 0);
        assert_eq!(first.frame_count, 10);
        assert_eq!(second.seq, 1);
        assert_eq!(second.frame_count, 20);
    }

    #[test]
    fn delivery_failure_still_announces_the_slice() {
        let (events_tx, mut events_rx) = broadcast::channel(16);
        let sink = CollectSink::new(true);
        let diagnostics = Arc::new(PipelineDiagnostics::default());
        let stage = HandoffStage::new(
            Arc::clone(&sink) as _,
            events_tx,
            Arc::clone(&diagnostics),
        );

        stage.start().unwrap();
        stage.feed(sealed("a", 5));
        stage.stop();

        assert!(sink.delivered.lock().is_empty());
        assert_eq!(diagnostics.delivery_errors.load(Ordering::Relaxed), 1);
        let event = recv_event(&mut events_rx, Duration::from_secs(1));
        assert_eq!(event.frame_count, 5);
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let (events_tx, _events_rx) = broadcast::channel(16);
        let sink = CollectSink::new(false);
        let diagnostics = Arc::new(PipelineDiagnostics::default());
        let stage = HandoffStage::new(Arc::clone(&sink) as _, events_tx, diagnostics);

        stage.start().unwrap();
        stage.start().unwrap();
        stage.stop();
        stage.stop();
    }

    #[test]
    fn feeding_while_stopped_leaves_slice_on_disk() {
        let (events_tx, _events_rx) = broadcast::channel(16);
        let sink = CollectSink::new(false);
        let diagnostics = Arc::new(PipelineDiagnostics::default());
        let stage = HandoffStage::new(Arc::clone(&sink) as _, events_tx, diagnostics);

        stage.feed(sealed("orphan", 1));
        assert!(sink.delivered.lock().is_empty());
    }
}
