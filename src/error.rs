use thiserror::Error;

/// All errors produced by the EmoBot core.
#[derive(Debug, Error)]
pub enum EmoBotError {
    #[error("invalid transport encoding: {0}")]
    InvalidEncoding(String),

    #[error("malformed audio: {len} bytes is not a whole number of {channels}-channel pcm16 frames")]
    MalformedAudio { len: usize, channels: u16 },

    #[error("audio output device not ready")]
    DeviceNotReady,

    #[error("{device} access denied")]
    PermissionDenied { device: &'static str },

    #[error("service error: {0}")]
    Service(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EmoBotError>;
