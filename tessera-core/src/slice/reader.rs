//! Reading slice files back into frames and PCM.
//!
//! Slices store no frame boundaries. Each frame's length is derived from
//! its header byte: the frame type selects a fixed stored size from the
//! mode table. A reader that encounters a frame type outside the eight
//! speech modes, or a truncated final frame, reports the slice as
//! malformed rather than guessing.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use crate::buffering::chunk::PcmChunk;
use crate::codec::{CodecMode, FrameDecoder};
use crate::error::{Result, TesseraError};
use crate::slice::SLICE_MAGIC;

/// Streaming frame reader over one slice file.
pub struct SliceReader {
    path: PathBuf,
    input: BufReader<File>,
}

impl SliceReader {
    /// Open `path` and verify the magic header.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut input = BufReader::new(file);

        let mut magic = [0u8; SLICE_MAGIC.len()];
        input
            .read_exact(&mut magic)
            .map_err(|_| malformed(path, "file shorter than the magic header"))?;
        if magic != SLICE_MAGIC {
            return Err(malformed(path, "magic header mismatch"));
        }

        Ok(Self {
            path: path.to_path_buf(),
            input,
        })
    }

    /// Read the next frame, or `None` at a clean end of file.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let mut header = [0u8; 1];
        match self.input.read(&mut header)? {
            0 => return Ok(None),
            _ => {}
        }

        let mode = CodecMode::from_header_byte(header[0]).ok_or_else(|| {
            malformed(
                &self.path,
                &format!("unknown frame type in header byte {:#04x}", header[0]),
            )
        })?;

        let mut frame = vec![0u8; mode.frame_size()];
        frame[0] = header[0];
        self.input
            .read_exact(&mut frame[1..])
            .map_err(|_| malformed(&self.path, &format!("truncated {mode} frame")))?;
        Ok(Some(frame))
    }

    /// Collect every remaining frame.
    pub fn read_frames(mut self) -> Result<Vec<Vec<u8>>> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }
}

/// Decode every frame of a slice through `decoder`, yielding PCM chunks
/// in slice order. Opens and closes the decoder session around the run.
pub fn decode_slice(path: &Path, decoder: &mut dyn FrameDecoder) -> Result<Vec<PcmChunk>> {
    let mut reader = SliceReader::open(path)?;
    decoder.open()?;
    let mut chunks = Vec::new();
    let outcome = loop {
        match reader.next_frame() {
            Ok(Some(frame)) => match decoder.decode(&frame) {
                Ok(chunk) => chunks.push(chunk),
                Err(e) => break Err(e),
            },
            Ok(None) => break Ok(chunks),
            Err(e) => break Err(e),
        }
    };
    decoder.close();
    outcome
}

fn malformed(path: &Path, detail: &str) -> TesseraError {
    TesseraError::MalformedSlice {
        path: path.to_path_buf(),
        detail: detail.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::chunk::{PcmChunk, CHUNK_SAMPLES};
    use crate::codec::stub::{StubDecoder, StubEncoder};
    use crate::codec::FrameEncoder;
    use crate::slice::SliceWriter;
    use std::io::Write;

    fn write_slice(frames: &[Vec<u8>]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SliceWriter::create(dir.path()).unwrap();
        for frame in frames {
            writer.append(frame).unwrap();
        }
        let sealed = writer.seal().unwrap();
        (dir, sealed.path)
    }

    fn stub_frames(count: usize, mode: CodecMode) -> Vec<Vec<u8>> {
        let mut enc = StubEncoder::new();
        enc.open(mode).unwrap();
        (0..count)
            .map(|i| {
                let chunk = PcmChunk::new(vec![i as i16 + 1; CHUNK_SAMPLES]);
                enc.encode(&chunk).unwrap()
            })
            .collect()
    }

    #[test]
    fn splits_written_frames_back_out() {
        let frames = stub_frames(5, CodecMode::Mr122);
        let (_dir, path) = write_slice(&frames);

        let read = SliceReader::open(&path).unwrap().read_frames().unwrap();
        assert_eq!(read, frames);
    }

    #[test]
    fn handles_mixed_modes_in_one_slice() {
        let mut frames = stub_frames(2, CodecMode::Mr475);
        frames.extend(stub_frames(2, CodecMode::Mr122));
        let (_dir, path) = write_slice(&frames);

        let read = SliceReader::open(&path).unwrap().read_frames().unwrap();
        assert_eq!(read.len(), 4);
        assert_eq!(read, frames);
    }

    #[test]
    fn empty_slice_yields_no_frames() {
        let (_dir, path) = write_slice(&[]);
        let read = SliceReader::open(&path).unwrap().read_frames().unwrap();
        assert!(read.is_empty());
    }

    #[test]
    fn rejects_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bogus.amr");
        std::fs::write(&path, b"#!WAV\n").unwrap();
        assert!(matches!(
            SliceReader::open(&path),
            Err(TesseraError::MalformedSlice { .. })
        ));
    }

    #[test]
    fn rejects_truncated_final_frame() {
        let frames = stub_frames(1, CodecMode::Mr122);
        let (_dir, path) = write_slice(&frames);
        // Chop the last byte off.
        let bytes = std::fs::read(&path).unwrap();
        let mut file = File::create(&path).unwrap();
        file.write_all(&bytes[..bytes.len() - 1]).unwrap();

        let mut reader = SliceReader::open(&path).unwrap();
        assert!(matches!(
            reader.next_frame(),
            Err(TesseraError::MalformedSlice { .. })
        ));
    }

    #[test]
    fn rejects_reserved_frame_types() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reserved.amr");
        let mut bytes = SLICE_MAGIC.to_vec();
        bytes.push(0x0F << 3); // NO_DATA frame type
        std::fs::write(&path, bytes).unwrap();

        let mut reader = SliceReader::open(&path).unwrap();
        assert!(reader.next_frame().is_err());
    }

    #[test]
    fn decode_slice_yields_one_chunk_per_frame() {
        let frames = stub_frames(3, CodecMode::Mr67);
        let (_dir, path) = write_slice(&frames);

        let mut decoder = StubDecoder::new();
        let chunks = decode_slice(&path, &mut decoder).unwrap();
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.is_encodable()));
    }
}
