use thiserror::Error;

/// All errors produced by tessera-core.
#[derive(Debug, Error)]
pub enum TesseraError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("codec error: {0}")]
    Codec(String),

    #[error("malformed slice file {path}: {detail}")]
    MalformedSlice {
        path: std::path::PathBuf,
        detail: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, TesseraError>;
