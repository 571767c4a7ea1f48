//! Slice files: rotation-bounded containers of compressed frames.
//!
//! ## File format
//!
//! ```text
//! offset 0   6-byte magic  23 21 41 4D 52 0A   ("#!AMR\n")
//! offset 6   frame ‖ frame ‖ frame ‖ …         (no in-band boundaries)
//! ```
//!
//! Frame boundaries are not stored; a reader derives each frame's length
//! from its header byte via the mode table (see [`reader`]).

pub mod reader;

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use rand::Rng;
use tracing::info;

use crate::error::Result;

/// Magic bytes every slice file starts with.
pub const SLICE_MAGIC: [u8; 6] = [0x23, 0x21, 0x41, 0x4D, 0x52, 0x0A];

/// File extension for slice files.
pub const SLICE_EXTENSION: &str = "amr";

/// A sealed, immutable slice as announced to the hand-off stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedSlice {
    /// Where the slice lives on disk.
    pub path: PathBuf,
    /// Number of frames written after the magic header.
    pub frame_count: u64,
    /// Total frame payload bytes (magic header excluded).
    pub payload_bytes: u64,
}

/// Append-only writer for the currently open slice.
///
/// Created by rotation, written by the slice stage worker, consumed by
/// [`SliceWriter::seal`]. The magic header is written at creation so even
/// a frameless slice is a valid file.
pub struct SliceWriter {
    path: PathBuf,
    out: BufWriter<File>,
    frame_count: u64,
    payload_bytes: u64,
}

impl SliceWriter {
    /// Create a uniquely-named slice file in `dir`, creating the directory
    /// if absent, and write the magic header.
    pub fn create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.{SLICE_EXTENSION}", opaque_id()));
        let file = File::create(&path)?;
        let mut out = BufWriter::new(file);
        out.write_all(&SLICE_MAGIC)?;
        info!(path = %path.display(), "opened new slice");
        Ok(Self {
            path,
            out,
            frame_count: 0,
            payload_bytes: 0,
        })
    }

    /// Append one compressed frame.
    pub fn append(&mut self, frame: &[u8]) -> Result<()> {
        self.out.write_all(frame)?;
        self.frame_count += 1;
        self.payload_bytes += frame.len() as u64;
        Ok(())
    }

    /// Flush and close, yielding the immutable slice record.
    pub fn seal(mut self) -> Result<SealedSlice> {
        self.out.flush()?;
        Ok(SealedSlice {
            path: self.path,
            frame_count: self.frame_count,
            payload_bytes: self.payload_bytes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

/// Random 128-bit hex identifier for slice file names.
fn opaque_id() -> String {
    let id: u128 = rand::thread_rng().gen();
    format!("{id:032x}")
}
