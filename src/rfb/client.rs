//! Per-client RFB connection state.
//!
//! A client record is slot data only — the protocol logic lives in the
//! session (`rfb::Session`), which owns the terminal the messages act on.
//! Each record carries the read-handler state machine (what the next
//! message fragment is and how many bytes it needs), the negotiated pixel
//! format and encoders, feature flags from SetEncodings, the dirty-region
//! tracker, and the pending-message summary drained at refresh time.

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::dirty::DirtyTracker;
use crate::render::Depth;

use super::pixel::{PixelEncoder, PixelFormat};

/// Client slots per server.
pub const MAX_CLIENTS: usize = 8;

/// Longest ClientCutText the server keeps.
pub const MAX_CUT_TEXT: usize = 1 << 20;

// Encodings and pseudo-encodings the server recognises.
pub const ENCODING_RAW: i32 = 0;
pub const ENCODING_COPY_RECT: i32 = 1;
pub const ENCODING_HEXTILE: i32 = 5;
pub const ENCODING_DESKTOP_RESIZE: i32 = -223;
pub const ENCODING_CURSOR: i32 = -239;
pub const ENCODING_XEN_CLIENT: i32 = -254;
pub const ENCODING_VNCVIEWER_TAG: i32 = -255;
pub const ENCODING_POINTER_TYPE_CHANGE: i32 = -257;

/// What the connection expects to read next, with its byte count.
///
/// The outer loop splits the input buffer only when the full count has
/// arrived, so every handler sees exactly one complete fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadHandler {
    /// 12-byte version string.
    Version,
    /// 16-byte DES response.
    AuthResponse,
    /// 1-byte ClientInit (shared flag).
    ClientInit,
    /// 1-byte message id.
    MessageId,
    /// 3 pad + 16-byte pixel format.
    SetPixelFormat,
    /// 1 pad + u16 count.
    SetEncodingsHeader,
    /// `n` signed 32-bit encoding ids.
    SetEncodingsIds(u16),
    /// incremental + x, y, w, h.
    FramebufferUpdateRequest,
    /// down + 2 pad + keysym.
    KeyEvent,
    /// button mask + x + y.
    PointerEvent,
    /// 3 pad + u32 length.
    CutTextHeader,
    /// The cut text itself.
    CutTextData(u32),
    /// down + 2 pad + u32 scancode (extension message 254).
    ScanCodeEvent,
}

impl ReadHandler {
    pub fn expected(self) -> usize {
        match self {
            ReadHandler::Version => 12,
            ReadHandler::AuthResponse => 16,
            ReadHandler::ClientInit | ReadHandler::MessageId => 1,
            ReadHandler::SetPixelFormat => 19,
            ReadHandler::SetEncodingsHeader => 3,
            ReadHandler::SetEncodingsIds(n) => usize::from(n) * 4,
            ReadHandler::FramebufferUpdateRequest => 9,
            ReadHandler::KeyEvent | ReadHandler::ScanCodeEvent => 7,
            ReadHandler::PointerEvent => 5,
            ReadHandler::CutTextHeader => 7,
            ReadHandler::CutTextData(n) => n as usize,
        }
    }
}

/// Feature flags accumulated from SetEncodings.
#[derive(Debug, Clone, Copy, Default)]
pub struct Features {
    pub has_hextile: bool,
    pub has_copy_rect: bool,
    pub has_resize: bool,
    pub has_pointer_type_change: bool,
    pub has_cursor_encoding: bool,
    pub is_xen_client: bool,
    pub is_vncviewer: bool,
}

/// One connected client.
#[derive(Debug)]
pub struct Client {
    /// Peer label for logging.
    pub peer: String,
    /// Outbound frames to the socket writer task.
    pub tx: mpsc::UnboundedSender<Bytes>,
    /// Abort handle for the socket reader task.
    pub reader: AbortHandle,

    pub handler: ReadHandler,
    pub inbuf: BytesMut,
    pub outbuf: BytesMut,
    /// Set by the first FramebufferUpdateRequest; updates flow after it.
    pub ready: bool,

    pub format: PixelFormat,
    pub encoder: PixelEncoder,
    pub features: Features,
    /// Hextile background memory, client pixel space.
    pub hextile_bg: Option<u32>,

    pub absolute_pointer: bool,
    pub last_x: u16,
    pub last_y: u16,
    pub last_buttons: u8,

    pub dirty: DirtyTracker,
    pub pending_resize: bool,
    pub pending_bell: u32,
    pub pending_cut_text: Option<Vec<u8>>,
    pub pending_cursor: bool,
    pub pending_pointer_type: bool,

    /// Challenge sent during VNC auth, kept for verification.
    pub challenge: [u8; 16],
}

impl Client {
    pub fn new(
        peer: String,
        tx: mpsc::UnboundedSender<Bytes>,
        reader: AbortHandle,
        depth: Depth,
        fb_width: usize,
        fb_height: usize,
    ) -> Self {
        let format = PixelFormat::native(depth);
        Self {
            peer,
            tx,
            reader,
            handler: ReadHandler::Version,
            inbuf: BytesMut::new(),
            outbuf: BytesMut::new(),
            ready: false,
            format,
            encoder: PixelEncoder::select(format, depth),
            features: Features::default(),
            hextile_bg: None,
            absolute_pointer: true,
            last_x: 0,
            last_y: 0,
            last_buttons: 0,
            dirty: DirtyTracker::new(fb_width, fb_height),
            pending_resize: false,
            pending_bell: 0,
            pending_cut_text: None,
            pending_cursor: false,
            pending_pointer_type: false,
            challenge: [0; 16],
        }
    }

    /// Past the handshake: participates in updates and input dispatch.
    pub fn is_running(&self) -> bool {
        !matches!(
            self.handler,
            ReadHandler::Version | ReadHandler::AuthResponse | ReadHandler::ClientInit
        )
    }

    /// Hand the accumulated output buffer to the writer task as one frame.
    /// Frames are written in order, so everything appended between flushes
    /// is contiguous on the wire.
    pub fn flush(&mut self) {
        if !self.outbuf.is_empty() {
            let frame = self.outbuf.split().freeze();
            let _ = self.tx.send(frame);
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_byte_counts_match_wire_format() {
        assert_eq!(ReadHandler::Version.expected(), 12);
        assert_eq!(ReadHandler::SetPixelFormat.expected(), 19);
        assert_eq!(ReadHandler::SetEncodingsIds(3).expected(), 12);
        assert_eq!(ReadHandler::FramebufferUpdateRequest.expected(), 9);
        assert_eq!(ReadHandler::KeyEvent.expected(), 7);
        assert_eq!(ReadHandler::PointerEvent.expected(), 5);
        assert_eq!(ReadHandler::CutTextData(100).expected(), 100);
    }
}
