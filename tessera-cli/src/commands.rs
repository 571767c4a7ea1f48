//! Subcommand implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, ValueEnum};
use tracing::info;

use tessera_core::audio::device::list_input_devices;
use tessera_core::buffering::chunk::{CHUNK_MILLIS, SAMPLE_RATE};
use tessera_core::codec::stub::{StubDecoder, StubEncoder};
use tessera_core::slice::reader::{decode_slice, SliceReader};
use tessera_core::{CodecMode, Recorder, RecorderConfig};

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum ModeArg {
    Mr475,
    Mr515,
    Mr59,
    Mr67,
    Mr74,
    Mr795,
    Mr102,
    Mr122,
}

impl From<ModeArg> for CodecMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Mr475 => CodecMode::Mr475,
            ModeArg::Mr515 => CodecMode::Mr515,
            ModeArg::Mr59 => CodecMode::Mr59,
            ModeArg::Mr67 => CodecMode::Mr67,
            ModeArg::Mr74 => CodecMode::Mr74,
            ModeArg::Mr795 => CodecMode::Mr795,
            ModeArg::Mr102 => CodecMode::Mr102,
            ModeArg::Mr122 => CodecMode::Mr122,
        }
    }
}

#[derive(Args)]
pub struct RecordArgs {
    /// Slice storage directory (default: the platform cache directory)
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Rotation interval, e.g. "20s", "1m30s"
    #[arg(long, default_value = "20s", value_parser = humantime::parse_duration)]
    pub interval: Duration,

    /// Codec mode
    #[arg(long, value_enum, default_value = "mr122")]
    pub mode: ModeArg,

    /// Input device name (see `tessera devices`)
    #[arg(long)]
    pub device: Option<String>,

    /// Suppress output frames for silent chunks
    #[arg(long)]
    pub dtx: bool,

    /// Rotate once more on shutdown so the final partial slice is
    /// handed off instead of only flushed to disk
    #[arg(long)]
    pub deliver_final: bool,
}

/// Run the recording pipeline until Ctrl-C.
///
/// Recording goes through the stub codec backend; swap in a native
/// encoder binding via `Recorder::new` when one is linked.
pub async fn record(args: RecordArgs) -> anyhow::Result<()> {
    let dir = match args.dir {
        Some(dir) => dir,
        None => default_slice_dir()?,
    };

    let mut config = RecorderConfig::new(dir);
    config.rotation_interval = args.interval;
    config.mode = args.mode.into();
    config.preferred_input_device = args.device;

    let encoder = Box::new(StubEncoder::new().with_dtx(args.dtx));
    let recorder = Arc::new(Recorder::new(config, encoder));

    let mut slices = recorder.subscribe_slices();
    let watcher = tokio::spawn(async move {
        while let Ok(event) = slices.recv().await {
            info!(
                seq = event.seq,
                path = %event.path.display(),
                frames = event.frame_count,
                "slice delivered"
            );
        }
    });

    recorder.start().context("failed to start recorder")?;
    info!("recording — press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for Ctrl-C")?;

    if args.deliver_final {
        recorder.rotate();
    }
    recorder.stop();
    watcher.abort();

    let snap = recorder.diagnostics_snapshot();
    info!(
        chunks = snap.chunks_fed,
        frames_encoded = snap.frames_encoded,
        frames_written = snap.frames_written,
        slices_delivered = snap.slices_delivered,
        "session summary"
    );
    Ok(())
}

fn default_slice_dir() -> anyhow::Result<PathBuf> {
    let base = dirs::cache_dir().context("no cache directory on this platform")?;
    Ok(base.join("tessera").join("record"))
}

pub fn devices() -> anyhow::Result<()> {
    let devices = list_input_devices();
    if devices.is_empty() {
        bail!("no audio input devices found");
    }
    for device in devices {
        let marker = if device.is_default { "  (default)" } else { "" };
        println!("{}{marker}", device.name);
    }
    Ok(())
}

pub fn info(slice: &Path) -> anyhow::Result<()> {
    let mut reader = SliceReader::open(slice)?;
    let mut counts = [0u64; 8];
    let mut frames = 0u64;
    let mut payload_bytes = 0u64;

    while let Some(frame) = reader.next_frame()? {
        if let Some(mode) = CodecMode::from_header_byte(frame[0]) {
            counts[mode.frame_type() as usize] += 1;
        }
        frames += 1;
        payload_bytes += frame.len() as u64;
    }

    println!("{}", slice.display());
    println!("  frames:   {frames}");
    println!("  payload:  {payload_bytes} bytes");
    println!(
        "  duration: {:.1} s",
        (frames * CHUNK_MILLIS) as f64 / 1000.0
    );
    for mode in CodecMode::ALL {
        let count = counts[mode.frame_type() as usize];
        if count > 0 {
            println!("  {mode} ({}): {count}", mode.bitrate_label());
        }
    }
    Ok(())
}

pub fn decode(slice: &Path, output: &Path) -> anyhow::Result<()> {
    let mut decoder = StubDecoder::new();
    let chunks = decode_slice(slice, &mut decoder)?;

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(output, spec)
        .with_context(|| format!("failed to create {}", output.display()))?;
    for chunk in &chunks {
        for &sample in &chunk.samples {
            writer.write_sample(sample)?;
        }
    }
    writer.finalize()?;

    println!(
        "wrote {} ({} chunks, {:.1} s)",
        output.display(),
        chunks.len(),
        chunks.len() as f64 * (CHUNK_MILLIS as f64 / 1000.0)
    );
    Ok(())
}
