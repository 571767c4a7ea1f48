//! End-to-end pipeline properties, driven without audio hardware:
//! chunks are fed straight into the encode stage, exactly where the
//! capture worker would hand them over.

use std::fs;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::broadcast;

use tessera_core::buffering::chunk::{PcmChunk, CHUNK_SAMPLES};
use tessera_core::codec::stub::StubEncoder;
use tessera_core::codec::{CodecMode, FrameEncoder};
use tessera_core::engine::{
    EncodeStage, HandoffStage, PipelineDiagnostics, SliceConsumer, SliceStage, SliceSink,
};
use tessera_core::error::Result;
use tessera_core::{SealedSlice, SliceEvent, SLICE_MAGIC};

struct CollectSink {
    delivered: Mutex<Vec<SealedSlice>>,
}

impl CollectSink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            delivered: Mutex::new(Vec::new()),
        })
    }
}

impl SliceSink for CollectSink {
    fn deliver(&self, slice: &SealedSlice) -> Result<()> {
        self.delivered.lock().push(slice.clone());
        Ok(())
    }
}

struct Pipeline {
    encode: Arc<EncodeStage>,
    slicer: Arc<SliceStage>,
    handoff: Arc<HandoffStage>,
    diagnostics: Arc<PipelineDiagnostics>,
    sink: Arc<CollectSink>,
    slice_events: broadcast::Receiver<SliceEvent>,
}

/// Wire encode → slice → hand-off the way the recorder does.
fn build_pipeline(dir: &std::path::Path, dtx: bool) -> Pipeline {
    let diagnostics = Arc::new(PipelineDiagnostics::default());
    let (slice_tx, slice_events) = broadcast::channel(64);
    let sink = CollectSink::new();

    let handoff = Arc::new(HandoffStage::new(
        Arc::clone(&sink) as Arc<dyn SliceSink>,
        slice_tx,
        Arc::clone(&diagnostics),
    ));
    let slicer = Arc::new(SliceStage::new(
        dir.to_path_buf(),
        Arc::clone(&handoff) as Arc<dyn SliceConsumer>,
        Arc::clone(&diagnostics),
    ));
    let encode = Arc::new(EncodeStage::new(
        Box::new(StubEncoder::new().with_dtx(dtx)),
        CodecMode::Mr122,
        Arc::clone(&slicer) as _,
        Arc::clone(&diagnostics),
    ));

    handoff.start().unwrap();
    slicer.start().unwrap();
    encode.start().unwrap();

    Pipeline {
        encode,
        slicer,
        handoff,
        diagnostics,
        sink,
        slice_events,
    }
}

fn stop_pipeline(p: &Pipeline) {
    p.encode.stop();
    p.slicer.stop();
    p.handoff.stop();
}

fn chunk_with_tag(tag: i16) -> PcmChunk {
    let mut samples = vec![0i16; CHUNK_SAMPLES];
    samples[0] = tag;
    samples[1] = tag.wrapping_mul(3);
    PcmChunk::new(samples)
}

fn wait_for<F: Fn() -> bool>(cond: F, timeout: Duration) {
    let start = Instant::now();
    while !cond() {
        assert!(start.elapsed() < timeout, "condition not met in time");
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn thousand_chunks_two_rotations_two_slices() {
    let dir = tempfile::tempdir().unwrap();
    let mut p = build_pipeline(dir.path(), false);

    // Reference encodings from an identical, independent session.
    let mut reference = StubEncoder::new();
    reference.open(CodecMode::Mr122).unwrap();
    let expected_payload: Vec<u8> = (0..1000i16)
        .flat_map(|tag| reference.encode(&chunk_with_tag(tag)).unwrap())
        .collect();

    for tag in 0..500i16 {
        p.encode.feed(chunk_with_tag(tag));
    }
    wait_for(
        || p.diagnostics.frames_written.load(Ordering::Relaxed) == 500,
        Duration::from_secs(5),
    );
    p.slicer.rotate();

    for tag in 500..1000i16 {
        p.encode.feed(chunk_with_tag(tag));
    }
    wait_for(
        || p.diagnostics.frames_written.load(Ordering::Relaxed) == 1000,
        Duration::from_secs(5),
    );
    p.slicer.rotate();

    stop_pipeline(&p);

    let delivered = p.sink.delivered.lock().clone();
    assert_eq!(delivered.len(), 2, "exactly two slices forwarded");
    assert_eq!(delivered[0].frame_count, 500);
    assert_eq!(delivered[1].frame_count, 500);

    let mut combined = Vec::new();
    for slice in &delivered {
        let bytes = fs::read(&slice.path).unwrap();
        assert_eq!(&bytes[..6], &SLICE_MAGIC, "every slice starts with magic");
        combined.extend_from_slice(&bytes[6..]);
    }
    assert_eq!(
        combined.len() as u64,
        delivered.iter().map(|s| s.payload_bytes).sum::<u64>()
    );
    assert_eq!(combined, expected_payload, "payloads concatenate in feed order");

    // Slice events mirror the deliveries, in sequence order.
    let first = p.slice_events.try_recv().unwrap();
    let second = p.slice_events.try_recv().unwrap();
    assert_eq!(first.seq, 0);
    assert_eq!(second.seq, 1);
    assert_eq!(first.path, delivered[0].path);
}

#[test]
fn orchestrated_stop_drains_both_stages_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let p = build_pipeline(dir.path(), false);

    // A burst larger than the workers can clear before stop lands.
    for tag in 0..800i16 {
        p.encode.feed(chunk_with_tag(tag));
    }
    stop_pipeline(&p);

    let snap = p.diagnostics.snapshot();
    assert_eq!(snap.frames_encoded, 800, "encode drained everything");
    assert_eq!(snap.frames_written, 800, "slice stage drained everything");
    assert!(p.sink.delivered.lock().is_empty(), "stop never forwards");

    // The lone slice on disk holds all 800 frames.
    let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(entries.len(), 1);
    let bytes = fs::read(entries[0].as_ref().unwrap().path()).unwrap();
    assert_eq!(bytes.len(), 6 + 800 * CodecMode::Mr122.frame_size());
}

#[test]
fn dtx_suppressed_chunks_produce_no_frames_downstream() {
    let dir = tempfile::tempdir().unwrap();
    let p = build_pipeline(dir.path(), true);

    for tag in 0..10i16 {
        p.encode.feed(chunk_with_tag(tag + 1)); // audible
        p.encode.feed(PcmChunk::silence()); // suppressed by DTX
    }
    stop_pipeline(&p);

    let snap = p.diagnostics.snapshot();
    assert_eq!(snap.chunks_fed, 20);
    assert_eq!(snap.frames_encoded, 10);
    assert_eq!(snap.encodes_suppressed, 10);
    assert_eq!(snap.frames_written, 10);
}

#[test]
fn malformed_chunks_are_invisible_downstream() {
    let dir = tempfile::tempdir().unwrap();
    let p = build_pipeline(dir.path(), false);

    p.encode.feed(PcmChunk::new(vec![1; 8]));
    p.encode.feed(PcmChunk::new(vec![1; CHUNK_SAMPLES * 2]));
    p.encode.feed(chunk_with_tag(5));
    stop_pipeline(&p);

    let snap = p.diagnostics.snapshot();
    assert_eq!(snap.chunks_rejected, 2);
    assert_eq!(snap.frames_written, 1);
}

#[test]
fn restart_reuses_the_stages_without_duplicating_output() {
    let dir = tempfile::tempdir().unwrap();
    let p = build_pipeline(dir.path(), false);

    for tag in 0..5i16 {
        p.encode.feed(chunk_with_tag(tag));
    }
    stop_pipeline(&p);
    assert_eq!(p.diagnostics.frames_written.load(Ordering::Relaxed), 5);

    // Second run over the same stages.
    p.handoff.start().unwrap();
    p.slicer.start().unwrap();
    p.encode.start().unwrap();
    for tag in 0..5i16 {
        p.encode.feed(chunk_with_tag(tag));
    }
    stop_pipeline(&p);

    assert_eq!(p.diagnostics.frames_written.load(Ordering::Relaxed), 10);
    // Two runs, one flushed slice each.
    let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(entries.len(), 2);
}
