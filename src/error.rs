//! Error taxonomy for the protocol and snapshot layers.
//!
//! Per-client protocol failures close that client and leave the server
//! running; snapshot decode failures abort the restore and leave the
//! terminal untouched. Everything else in the core recovers locally
//! (malformed terminal input is logged and dropped, out-of-range snapshot
//! fields are clipped rather than rejected).

use thiserror::Error;

/// Fatal conditions for a single RFB client connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unsupported protocol version {0:?}")]
    BadVersion(String),

    #[error("authentication failed")]
    AuthFailed,

    #[error("unsupported pixel format: {0} bpp, true-colour={1}")]
    UnsupportedPixelFormat(u8, bool),

    #[error("malformed {0} message")]
    Malformed(&'static str),
}

/// Failures while restoring a terminal state snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot truncated")]
    Truncated,

    #[error("bad snapshot magic")]
    BadMagic,

    #[error("unsupported snapshot version {0}")]
    BadVersion(u32),
}
