use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest frame body accepted on the wire.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Largest run of raw bytes that still fits one frame after encoding.
pub const MAX_FRAME_DATA: usize = MAX_FRAME_LEN / 4 * 3 - 64;

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("failed to connect to {path}: {source}")]
    Connect { path: PathBuf, source: io::Error },
    #[error("failed to bind {path}: {source}")]
    Bind { path: PathBuf, source: io::Error },
    #[error("another console is already listening at {0}")]
    InUse(PathBuf),
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),
    #[error("invalid frame: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ---------------------------------------------------------------------------
// Wire messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Command line a wrapper runs. Always the first frame of a link.
    Announcement { command_line: String },
    /// Sanitized pty output, wrapper to console.
    Output {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    /// Bytes for the pty input, console to wrapper.
    Input {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
}

impl Frame {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Announcement { .. } => "announcement",
            Self::Output { .. } => "output",
            Self::Input { .. } => "input",
        }
    }
}

mod base64_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Length-prefixed JSON framing
// ---------------------------------------------------------------------------

/// Write a frame as a 4-byte big-endian length prefix followed by JSON.
pub async fn write_frame<W>(stream: &mut W, frame: &Frame) -> Result<(), IpcError>
where
    W: AsyncWrite + Unpin,
{
    let payload = serde_json::to_vec(frame)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(IpcError::FrameTooLarge(payload.len()));
    }
    let len = (payload.len() as u32).to_be_bytes();
    stream.write_all(&len).await?;
    stream.write_all(&payload).await?;
    stream.flush().await?;
    Ok(())
}

/// Read a length-prefixed JSON frame.
///
/// Returns `None` when the peer closed the stream between frames.
pub async fn read_frame<R>(stream: &mut R) -> Result<Option<Frame>, IpcError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_FRAME_LEN {
        return Err(IpcError::FrameTooLarge(len));
    }

    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok(Some(serde_json::from_slice(&payload)?))
}
