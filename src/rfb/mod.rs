//! RFB 3.3 server core.
//!
//! One [`Session`] serves a single terminal to up to eight clients:
//!
//! ```text
//! TcpListener ──accept──► per-client reader task ──mpsc──► Session::run
//!                                                           │  (select!)
//! PTY reader ───────────────────────────────────mpsc──────► │
//! refresh deadline (adaptive 30ms..2s) ─────────────────────┘
//!                        │
//!                        ▼
//!        per-client writer task ◄──mpsc── outbuf frames
//! ```
//!
//! The session task is the single owner of the terminal system and all
//! client slots; reader/writer tasks only shuttle bytes, so all protocol
//! state transitions happen on one task in arrival order.
//!
//! Submodules:
//!
//! * [`client`]  — per-client slot data and the read-handler machine.
//! * [`pixel`]   — pixel formats, raw encoder, format conversion.
//! * [`hextile`] — the Hextile tile encoder.
//! * [`auth`]    — VNC DES challenge/response.

pub mod auth;
pub mod client;
pub mod hextile;
pub mod pixel;

use std::time::Duration;

use anyhow::{Context, Result};
use bytes::{BufMut, Bytes, BytesMut};
use statig::prelude::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::dirty::PendingRect;
use crate::error::ProtocolError;
use crate::font::{FONT_HEIGHT, FONT_WIDTH};
use crate::keymap;
use crate::pty::{HostEvent, HostPty, HostSink};
use crate::state_machine::session_sm::{
    SessionEvent as SmEvent, SessionMachine, State as SmState,
};
use crate::system::{DisplaySink, Rect, TerminalSystem};
use crate::term::selection::{BUTTON_LEFT, BUTTON_MIDDLE, BUTTON_RIGHT};

use client::{
    Client, Features, ReadHandler, ENCODING_COPY_RECT, ENCODING_CURSOR, ENCODING_DESKTOP_RESIZE,
    ENCODING_HEXTILE, ENCODING_POINTER_TYPE_CHANGE, ENCODING_RAW, ENCODING_VNCVIEWER_TAG,
    ENCODING_XEN_CLIENT, MAX_CLIENTS, MAX_CUT_TEXT,
};
use pixel::{PixelEncoder, PixelFormat};

/// Refresh pacing: start fast, back off while idle, snap back on input.
const REFRESH_BASE_MS: u64 = 30;
const REFRESH_INC_MS: u64 = 50;
const REFRESH_MAX_MS: u64 = 2000;
/// After this long with nothing to send, a 1x1 null update keeps minimised
/// viewers from losing sync.
const MAX_IDLE_MS: u64 = 5000;

/// Protocol version the server speaks.
const VERSION_STRING: &[u8; 12] = b"RFB 003.003\n";

/// Events the socket reader tasks feed into the session.
#[derive(Debug)]
pub enum NetEvent {
    Data(usize, Vec<u8>),
    Gone(usize),
}

/// Server-side options the session needs beyond the terminal itself.
#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    /// VNC password; `None` disables authentication.
    pub password: Option<String>,
    /// Emit raw scancodes to the host instead of terminal byte sequences.
    pub graphic_keyboard: bool,
}

pub struct Session {
    listener: TcpListener,
    pub system: TerminalSystem,
    host: HostPty,
    host_rx: mpsc::UnboundedReceiver<HostEvent>,
    opts: ServerOptions,

    clients: [Option<Client>; MAX_CLIENTS],
    net_tx: mpsc::UnboundedSender<NetEvent>,
    net_rx: mpsc::UnboundedReceiver<NetEvent>,

    /// Region clients currently care about (last FramebufferUpdateRequest).
    visible: Rect,
    interval_ms: u64,
    next_tick: Instant,
    last_update: Instant,

    /// Last ClientCutText, pasted on middle click.
    client_cut_text: Vec<u8>,
    /// Key state by scancode slot, for Ctrl/Alt resolution.
    key_state: [bool; 256],
    /// Host-side NumLock belief, reconciled against keypad keysyms.
    numlock: bool,
    /// Insert key latch (`ESC [4h` / `ESC [4l` alternation).
    insert_toggle: bool,

    clipboard: Option<arboard::Clipboard>,
    machine: statig::blocking::StateMachine<SessionMachine>,
}

impl Session {
    pub fn new(
        listener: TcpListener,
        system: TerminalSystem,
        host: HostPty,
        host_rx: mpsc::UnboundedReceiver<HostEvent>,
        opts: ServerOptions,
    ) -> Self {
        let (net_tx, net_rx) = mpsc::unbounded_channel();
        let now = Instant::now();
        let visible = Rect::new(0, 0, system.term.fb().width(), system.term.fb().height());
        let mut machine = SessionMachine::default().state_machine();
        machine.handle(&SmEvent::HostStarted);
        Self {
            listener,
            system,
            host,
            host_rx,
            opts,
            clients: Default::default(),
            net_tx,
            net_rx,
            visible,
            interval_ms: REFRESH_BASE_MS,
            next_tick: now + Duration::from_millis(REFRESH_BASE_MS),
            last_update: now,
            client_cut_text: Vec::new(),
            key_state: [false; 256],
            numlock: true,
            insert_toggle: false,
            clipboard: None,
            machine,
        }
    }

    /// Serve until the host stream closes.
    pub async fn run(&mut self) -> Result<()> {
        let local = self.listener.local_addr().context("listener address")?;
        info!(%local, "RFB server listening");
        loop {
            if matches!(self.machine.state(), SmState::Closing {}) {
                break;
            }
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((sock, peer)) => self.accept_client(sock, peer.to_string()),
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                Some(ev) = self.net_rx.recv() => self.net_event(ev),
                Some(ev) = self.host_rx.recv() => self.host_event(ev),
                _ = tokio::time::sleep_until(self.next_tick) => self.refresh_tick(),
            }
        }
        info!("session closing");
        self.host.kill();
        Ok(())
    }

    // -----------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------

    fn accept_client(&mut self, sock: TcpStream, peer: String) {
        let Some(slot) = self.clients.iter().position(Option::is_none) else {
            warn!(peer, "refusing client: all slots busy");
            return;
        };
        let _ = sock.set_nodelay(true);
        let (mut read_half, mut write_half) = sock.into_split();

        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if write_half.write_all(&frame).await.is_err() {
                    break;
                }
            }
        });

        let net_tx = self.net_tx.clone();
        let reader = tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            loop {
                match read_half.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if net_tx.send(NetEvent::Data(slot, buf[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                }
            }
            let _ = net_tx.send(NetEvent::Gone(slot));
        });

        let fb = self.system.term.fb();
        let mut client = Client::new(
            peer.clone(),
            tx,
            reader.abort_handle(),
            fb.depth(),
            fb.width(),
            fb.height(),
        );
        client.outbuf.put_slice(VERSION_STRING);
        client.flush();
        info!(client = slot, peer, "client connected");
        self.clients[slot] = Some(client);
    }

    fn remove_client(&mut self, slot: usize, why: &str) {
        if let Some(client) = self.clients[slot].take() {
            info!(client = slot, peer = %client.peer, why, "client disconnected");
        }
        let connected = self.clients.iter().flatten().count();
        debug!(connected, "clients connected");
    }

    /// Close every client tagged as a local vncviewer except `keep`.
    fn close_tagged_clients(&mut self, keep: usize) {
        for slot in 0..MAX_CLIENTS {
            if slot == keep {
                continue;
            }
            let tagged = self.clients[slot]
                .as_ref()
                .is_some_and(|c| c.features.is_vncviewer);
            if tagged {
                self.remove_client(slot, "superseded by new vncviewer");
            }
        }
    }

    // -----------------------------------------------------------------
    // Event dispatch
    // -----------------------------------------------------------------

    fn net_event(&mut self, ev: NetEvent) {
        match ev {
            NetEvent::Data(slot, data) => {
                if let Some(client) = self.clients[slot].as_mut() {
                    client.inbuf.extend_from_slice(&data);
                    if let Err(e) = self.drain_client_input(slot) {
                        warn!(client = slot, error = %e, "protocol error");
                        self.remove_client(slot, "protocol error");
                    }
                }
            }
            NetEvent::Gone(slot) => self.remove_client(slot, "connection closed"),
        }
    }

    fn host_event(&mut self, ev: HostEvent) {
        match ev {
            HostEvent::Output(bytes) => self.feed_host(&bytes),
            HostEvent::Closed => {
                self.machine.handle(&SmEvent::HostEof);
            }
        }
    }

    /// Feed host output through the emulator, fanning display effects out
    /// to every running client.
    fn feed_host(&mut self, bytes: &[u8]) {
        let mut cut_capture = None;
        {
            let mut sink = Fanout {
                clients: &mut self.clients,
                cut_capture: &mut cut_capture,
            };
            self.system.term.feed(bytes, &mut sink);
        }
        let replies = self.system.term.take_replies();
        if !replies.is_empty() {
            self.host.write_bytes(&replies);
        }
        if let Some(text) = cut_capture {
            self.copy_to_clipboard(&text);
        }
    }

    fn copy_to_clipboard(&mut self, text: &[u8]) {
        // Selection text is Latin-1; widen it for the host clipboard.
        let s: String = text.iter().map(|&b| char::from(b)).collect();
        if self.clipboard.is_none() {
            self.clipboard = arboard::Clipboard::new().ok();
        }
        if let Some(cb) = &mut self.clipboard {
            if let Err(e) = cb.set_text(s) {
                debug!(error = %e, "host clipboard unavailable");
            }
        }
    }

    // -----------------------------------------------------------------
    // Protocol: the read-handler loop
    // -----------------------------------------------------------------

    fn drain_client_input(&mut self, slot: usize) -> Result<(), ProtocolError> {
        loop {
            let Some(client) = self.clients[slot].as_mut() else {
                return Ok(());
            };
            let expected = client.handler.expected();
            if client.inbuf.len() < expected {
                return Ok(());
            }
            let fragment = client.inbuf.split_to(expected).freeze();
            self.process_fragment(slot, fragment)?;
        }
    }

    fn process_fragment(&mut self, slot: usize, b: Bytes) -> Result<(), ProtocolError> {
        let Some(client) = self.clients[slot].as_mut() else {
            return Ok(());
        };
        match client.handler {
            ReadHandler::Version => self.version_handshake(slot, &b),
            ReadHandler::AuthResponse => self.auth_response(slot, &b),
            ReadHandler::ClientInit => self.client_init(slot),
            ReadHandler::MessageId => self.message_id(slot, b[0]),
            ReadHandler::SetPixelFormat => self.set_pixel_format(slot, &b),
            ReadHandler::SetEncodingsHeader => {
                let n = u16::from_be_bytes([b[1], b[2]]);
                if n > 1024 {
                    return Err(ProtocolError::Malformed("SetEncodings"));
                }
                client.handler = if n == 0 {
                    ReadHandler::MessageId
                } else {
                    ReadHandler::SetEncodingsIds(n)
                };
                Ok(())
            }
            ReadHandler::SetEncodingsIds(_) => self.set_encodings(slot, &b),
            ReadHandler::FramebufferUpdateRequest => self.update_request(slot, &b),
            ReadHandler::KeyEvent => {
                client.handler = ReadHandler::MessageId;
                let down = b[0] != 0;
                let keysym = u32::from_be_bytes([b[3], b[4], b[5], b[6]]);
                self.key_event(keysym, down);
                self.wake(true);
                Ok(())
            }
            ReadHandler::PointerEvent => {
                client.handler = ReadHandler::MessageId;
                let buttons = b[0];
                let x = u16::from_be_bytes([b[1], b[2]]);
                let y = u16::from_be_bytes([b[3], b[4]]);
                self.pointer_event(slot, buttons, x, y);
                self.wake(true);
                Ok(())
            }
            ReadHandler::CutTextHeader => {
                let len = u32::from_be_bytes([b[3], b[4], b[5], b[6]]);
                if len as usize > MAX_CUT_TEXT {
                    return Err(ProtocolError::Malformed("ClientCutText"));
                }
                client.handler = if len == 0 {
                    ReadHandler::MessageId
                } else {
                    ReadHandler::CutTextData(len)
                };
                if len == 0 {
                    self.client_cut_text.clear();
                }
                Ok(())
            }
            ReadHandler::CutTextData(_) => {
                client.handler = ReadHandler::MessageId;
                self.client_cut_text = b[..b.len().min(MAX_CUT_TEXT)].to_vec();
                debug!(client = slot, len = self.client_cut_text.len(), "cut text stored");
                Ok(())
            }
            ReadHandler::ScanCodeEvent => {
                client.handler = ReadHandler::MessageId;
                let down = b[0] != 0;
                let code = u32::from_be_bytes([b[3], b[4], b[5], b[6]]);
                self.host.write_scancode(code as u16, down);
                Ok(())
            }
        }
    }

    fn version_handshake(&mut self, slot: usize, b: &[u8]) -> Result<(), ProtocolError> {
        let ok = b.starts_with(b"RFB ")
            && b[11] == b'\n'
            && b[7] == b'.'
            && b[4..7] == *b"003"
            && (b[8..11] == *b"003" || b[8..11] == *b"004");
        if !ok {
            return Err(ProtocolError::BadVersion(
                String::from_utf8_lossy(b).into_owned(),
            ));
        }
        let has_password = self.opts.password.is_some();
        let Some(client) = self.clients[slot].as_mut() else {
            return Ok(());
        };
        if has_password {
            client.challenge = auth::make_challenge();
            client.outbuf.put_u32(2); // security: VNC auth
            let challenge = client.challenge;
            client.outbuf.put_slice(&challenge);
            client.handler = ReadHandler::AuthResponse;
        } else {
            client.outbuf.put_u32(1); // security: none
            client.handler = ReadHandler::ClientInit;
        }
        client.flush();
        Ok(())
    }

    fn auth_response(&mut self, slot: usize, b: &[u8]) -> Result<(), ProtocolError> {
        let password = self.opts.password.clone().unwrap_or_default();
        let Some(client) = self.clients[slot].as_mut() else {
            return Ok(());
        };
        let mut response = [0u8; 16];
        response.copy_from_slice(b);
        if auth::verify_response(&password, &client.challenge, &response) {
            client.outbuf.put_u32(0);
            client.handler = ReadHandler::ClientInit;
            client.flush();
            Ok(())
        } else {
            let reason = b"Authentication failure";
            client.outbuf.put_u32(1);
            client.outbuf.put_u32(reason.len() as u32);
            client.outbuf.put_slice(reason);
            client.flush();
            Err(ProtocolError::AuthFailed)
        }
    }

    fn client_init(&mut self, slot: usize) -> Result<(), ProtocolError> {
        let fb = self.system.term.fb();
        let (w, h, depth) = (fb.width(), fb.height(), fb.depth());
        let title = self.system.title.clone();
        let Some(client) = self.clients[slot].as_mut() else {
            return Ok(());
        };
        client.outbuf.put_u16(w as u16);
        client.outbuf.put_u16(h as u16);
        PixelFormat::native(depth).write_to(&mut client.outbuf);
        client.outbuf.put_u32(title.len() as u32);
        client.outbuf.put_slice(title.as_bytes());
        client.flush();
        client.handler = ReadHandler::MessageId;
        client.dirty.mark_all();
        let connected = self.clients.iter().flatten().filter(|c| c.is_running()).count();
        info!(client = slot, connected, "client initialised");
        self.wake(false);
        Ok(())
    }

    fn message_id(&mut self, slot: usize, id: u8) -> Result<(), ProtocolError> {
        let Some(client) = self.clients[slot].as_mut() else {
            return Ok(());
        };
        client.handler = match id {
            0 => ReadHandler::SetPixelFormat,
            2 => ReadHandler::SetEncodingsHeader,
            3 => ReadHandler::FramebufferUpdateRequest,
            4 => ReadHandler::KeyEvent,
            5 => ReadHandler::PointerEvent,
            6 => ReadHandler::CutTextHeader,
            254 => ReadHandler::ScanCodeEvent,
            _ => return Err(ProtocolError::Malformed("unknown message id")),
        };
        Ok(())
    }

    fn set_pixel_format(&mut self, slot: usize, b: &[u8]) -> Result<(), ProtocolError> {
        let format = PixelFormat::parse(&b[3..19]);
        format.validate()?;
        let depth = self.system.term.fb().depth();
        let Some(client) = self.clients[slot].as_mut() else {
            return Ok(());
        };
        client.format = format;
        client.encoder = PixelEncoder::select(format, depth);
        client.hextile_bg = None;
        client.handler = ReadHandler::MessageId;
        client.dirty.mark_all();
        if client.features.has_cursor_encoding {
            client.pending_cursor = true;
        }
        if client.features.has_pointer_type_change {
            client.pending_pointer_type = true;
        }
        debug!(
            client = slot,
            bpp = format.bits_per_pixel,
            big_endian = format.big_endian,
            zero_copy = matches!(client.encoder, PixelEncoder::ZeroCopy),
            "pixel format set"
        );
        Ok(())
    }

    fn set_encodings(&mut self, slot: usize, b: &[u8]) -> Result<(), ProtocolError> {
        let Some(client) = self.clients[slot].as_mut() else {
            return Ok(());
        };
        let mut features = Features::default();
        for id_bytes in b.chunks_exact(4) {
            let id = i32::from_be_bytes([id_bytes[0], id_bytes[1], id_bytes[2], id_bytes[3]]);
            match id {
                ENCODING_RAW => {}
                ENCODING_COPY_RECT => features.has_copy_rect = true,
                ENCODING_HEXTILE => features.has_hextile = true,
                ENCODING_DESKTOP_RESIZE => features.has_resize = true,
                ENCODING_CURSOR => features.has_cursor_encoding = true,
                ENCODING_XEN_CLIENT => features.is_xen_client = true,
                ENCODING_VNCVIEWER_TAG => features.is_vncviewer = true,
                ENCODING_POINTER_TYPE_CHANGE => features.has_pointer_type_change = true,
                other => trace!(client = slot, encoding = other, "encoding ignored"),
            }
        }
        client.features = features;
        client.handler = ReadHandler::MessageId;
        if features.has_cursor_encoding {
            client.pending_cursor = true;
        }
        if features.has_pointer_type_change {
            // The terminal host pointer is absolute; tell the client once.
            client.pending_pointer_type = true;
        }
        debug!(client = slot, ?features, "encodings set");
        if features.is_vncviewer {
            self.close_tagged_clients(slot);
        }
        Ok(())
    }

    fn update_request(&mut self, slot: usize, b: &[u8]) -> Result<(), ProtocolError> {
        let incremental = b[0] != 0;
        let x = usize::from(u16::from_be_bytes([b[1], b[2]]));
        let y = usize::from(u16::from_be_bytes([b[3], b[4]]));
        let w = usize::from(u16::from_be_bytes([b[5], b[6]]));
        let h = usize::from(u16::from_be_bytes([b[7], b[8]]));
        let rect = Rect::new(x, y, w, h);
        let Some(client) = self.clients[slot].as_mut() else {
            return Ok(());
        };
        client.handler = ReadHandler::MessageId;
        client.ready = true;
        if !incremental {
            client.dirty.mark(rect);
        }
        self.visible = rect;
        self.wake(false);
        Ok(())
    }

    // -----------------------------------------------------------------
    // Input dispatch
    // -----------------------------------------------------------------

    fn key_event(&mut self, keysym: u32, down: bool) {
        if let Some(code) = keymap::keysym_to_scancode(keysym) {
            self.key_state[keymap::scancode_slot(code)] = down;
            if self.opts.graphic_keyboard && !keymap::is_modifier_keysym(keysym) {
                self.host.write_scancode(code, down);
                return;
            }
        }
        if keymap::is_modifier_keysym(keysym) {
            if keymap::is_numlock_keysym(keysym) && down {
                self.numlock = !self.numlock;
            }
            return;
        }
        if keymap::is_keypad_keysym(keysym) {
            self.sync_numlock(keysym);
        }
        if !down {
            return;
        }
        let ctrl = self.key_state[keymap::scancode_slot(0x1D)]
            || self.key_state[keymap::scancode_slot(0xE01D)];
        let alt = self.key_state[keymap::scancode_slot(0x38)]
            || self.key_state[keymap::scancode_slot(0xE038)];
        let bytes = keymap::keysym_to_bytes(
            keysym,
            self.system.term.cursorkey_mode,
            ctrl,
            alt,
            self.numlock,
            &mut self.insert_toggle,
        );
        if !bytes.is_empty() {
            self.host.write_bytes(&bytes);
        }
    }

    /// Press the virtual NumLock key when the client's keypad keysyms
    /// disagree with the host-side NumLock belief.
    fn sync_numlock(&mut self, keysym: u32) {
        let client_numlock = match keysym {
            keymap::keysym::KP_0..=0xFFB9 | keymap::keysym::KP_DECIMAL => true,
            0xFF95..=0xFF9F => false,
            _ => return,
        };
        if client_numlock != self.numlock {
            self.host.write_scancode(keymap::SCANCODE_NUMLOCK, true);
            self.host.write_scancode(keymap::SCANCODE_NUMLOCK, false);
            self.numlock = client_numlock;
        }
    }

    fn pointer_event(&mut self, slot: usize, buttons: u8, x: u16, y: u16) {
        let fb_w = self.system.term.fb().width();
        let fb_h = self.system.term.fb().height();
        let (last_buttons, middle_only);
        {
            let Some(client) = self.clients[slot].as_mut() else {
                return;
            };
            last_buttons = client.last_buttons;
            client.last_buttons = buttons;
            client.last_x = x;
            client.last_y = y;
            middle_only =
                buttons & !last_buttons & BUTTON_MIDDLE != 0 && buttons == BUTTON_MIDDLE;
        }

        // Wheel: RFB buttons 4/5 are single-step press events.
        let dz: i8 = if buttons & !last_buttons & 0x08 != 0 {
            -1
        } else if buttons & !last_buttons & 0x10 != 0 {
            1
        } else {
            0
        };

        if middle_only && !self.client_cut_text.is_empty() {
            let paste = self.client_cut_text.clone();
            self.host.write_bytes(&paste);
        }

        let mask = (buttons & 0x01) * BUTTON_LEFT
            | ((buttons >> 1) & 0x01) * BUTTON_MIDDLE
            | ((buttons >> 2) & 0x01) * BUTTON_RIGHT;
        let nx = (usize::from(x).min(fb_w - 1) * 0x7FFF / (fb_w - 1).max(1)) as u16;
        let ny = (usize::from(y).min(fb_h - 1) * 0x7FFF / (fb_h - 1).max(1)) as u16;

        let mut cut_capture = None;
        {
            let mut sink = Fanout {
                clients: &mut self.clients,
                cut_capture: &mut cut_capture,
            };
            self.system.term.mouse_event(nx, ny, dz, mask, &mut sink);
        }
        if let Some(text) = cut_capture {
            // Selection committed: publish as server cut text everywhere.
            self.copy_to_clipboard(&text);
        }
    }

    // -----------------------------------------------------------------
    // Refresh
    // -----------------------------------------------------------------

    /// Schedule the next tick now; `reset_interval` also snaps the pacing
    /// back to the base (input just happened).
    fn wake(&mut self, reset_interval: bool) {
        if reset_interval {
            self.interval_ms = REFRESH_BASE_MS;
        }
        self.next_tick = Instant::now();
    }

    fn refresh_tick(&mut self) {
        let now = Instant::now();
        let idle_ms = now.duration_since(self.last_update).as_millis() as u64;
        let mut sent_any = false;
        for slot in 0..MAX_CLIENTS {
            let running = self.clients[slot]
                .as_ref()
                .is_some_and(|c| c.is_running() && c.ready);
            if !running {
                continue;
            }
            if idle_ms >= MAX_IDLE_MS {
                if let Some(client) = self.clients[slot].as_mut() {
                    if client.dirty.is_clear() && !client.pending_resize && !client.pending_cursor {
                        client.dirty.push_rect(PendingRect::NullUpdate);
                    }
                }
            }
            sent_any |= self.send_client_update(slot);
        }
        if sent_any {
            self.interval_ms = (self.interval_ms / 2).max(REFRESH_BASE_MS);
            self.last_update = now;
        } else {
            self.interval_ms = (self.interval_ms + REFRESH_INC_MS).min(REFRESH_MAX_MS);
        }
        self.next_tick = now + Duration::from_millis(self.interval_ms);
    }

    /// Build and send one refresh payload for a client. Returns true if
    /// anything went on the wire.
    fn send_client_update(&mut self, slot: usize) -> bool {
        let visible = self.visible;
        let fb = self.system.term.fb();
        let Some(client) = self.clients[slot].as_mut() else {
            return false;
        };

        // Out-of-band messages first: bells, then cut text.
        for _ in 0..client.pending_bell {
            client.outbuf.put_u8(2);
        }
        client.pending_bell = 0;
        if let Some(text) = client.pending_cut_text.take() {
            client.outbuf.put_u8(3);
            client.outbuf.put_bytes(0, 3);
            client.outbuf.put_u32(text.len() as u32);
            client.outbuf.put_slice(&text);
        }

        // Framebuffer update rectangles.
        let (stripes, explicit) = client.dirty.drain(visible);
        let mut rects = 0u16;
        let mut body = BytesMut::new();

        if client.pending_resize {
            client.pending_resize = false;
            put_rect_header(&mut body, Rect::new(0, 0, fb.width(), fb.height()), ENCODING_DESKTOP_RESIZE);
            rects += 1;
        }

        let payload_encoding = if client.features.has_hextile {
            ENCODING_HEXTILE
        } else {
            ENCODING_RAW
        };
        for stripe in stripes {
            put_rect_header(&mut body, stripe, payload_encoding);
            if client.features.has_hextile {
                hextile::encode_hextile(
                    fb,
                    &client.encoder,
                    &client.format,
                    stripe,
                    &mut client.hextile_bg,
                    &mut body,
                );
            } else {
                client.encoder.encode_raw(fb, stripe, &client.format, &mut body);
            }
            rects += 1;
        }

        for pending in explicit {
            match pending {
                PendingRect::CopyRect { src_x, src_y, dst } => {
                    put_rect_header(&mut body, dst, ENCODING_COPY_RECT);
                    body.put_u16(src_x as u16);
                    body.put_u16(src_y as u16);
                    rects += 1;
                }
                PendingRect::NullUpdate => {
                    let dot = Rect::new(0, 0, 1, 1);
                    put_rect_header(&mut body, dot, ENCODING_RAW);
                    client.encoder.encode_raw(fb, dot, &client.format, &mut body);
                    rects += 1;
                }
            }
        }

        if client.pending_cursor {
            client.pending_cursor = false;
            put_cursor_rect(&mut body, &client.encoder, &client.format);
            rects += 1;
        }
        if client.pending_pointer_type {
            client.pending_pointer_type = false;
            put_rect_header(
                &mut body,
                Rect::new(usize::from(client.absolute_pointer), 0, 0, 0),
                ENCODING_POINTER_TYPE_CHANGE,
            );
            rects += 1;
        }

        if rects > 0 {
            client.outbuf.put_u8(0);
            client.outbuf.put_u8(0);
            client.outbuf.put_u16(rects);
            client.outbuf.put_slice(&body);
        }

        if client.outbuf.is_empty() {
            false
        } else {
            client.flush();
            true
        }
    }
}

/// Write one rectangle header: position, size, encoding.
fn put_rect_header(out: &mut BytesMut, rect: Rect, encoding: i32) {
    out.put_u16(rect.x as u16);
    out.put_u16(rect.y as u16);
    out.put_u16(rect.w as u16);
    out.put_u16(rect.h as u16);
    out.put_i32(encoding);
}

/// Cursor pseudo-rect: an 8x16 block in the client's white, full mask.
fn put_cursor_rect(out: &mut BytesMut, encoder: &PixelEncoder, format: &PixelFormat) {
    put_rect_header(
        out,
        Rect::new(0, 0, FONT_WIDTH, FONT_HEIGHT),
        ENCODING_CURSOR,
    );
    // Client-space white: every channel at max.
    let value = u32::from(format.red_max) << format.red_shift
        | u32::from(format.green_max) << format.green_shift
        | u32::from(format.blue_max) << format.blue_shift;
    for _ in 0..FONT_WIDTH * FONT_HEIGHT {
        encoder.put_px(out, value, format);
    }
    // Mask: one byte per row at this width, all bits set.
    out.put_bytes(0xFF, FONT_HEIGHT);
}

// ---------------------------------------------------------------------------
// Display fan-out
// ---------------------------------------------------------------------------

/// Applies emulator display effects to every running client's tracker.
struct Fanout<'a> {
    clients: &'a mut [Option<Client>; MAX_CLIENTS],
    /// Committed selection text, captured for the host clipboard bridge.
    cut_capture: &'a mut Option<Vec<u8>>,
}

impl Fanout<'_> {
    fn running<'b>(&'b mut self) -> impl Iterator<Item = &'b mut Client> + 'b {
        self.clients
            .iter_mut()
            .flatten()
            .filter(|c| c.is_running())
    }
}

impl DisplaySink for Fanout<'_> {
    fn dpy_update(&mut self, rect: Rect) {
        for client in self.running() {
            client.dirty.mark(rect);
        }
    }

    fn dpy_copy_rect(&mut self, src_x: usize, src_y: usize, dst: Rect) {
        for client in self.running() {
            if client.features.has_copy_rect {
                client
                    .dirty
                    .push_rect(PendingRect::CopyRect { src_x, src_y, dst });
            } else {
                client.dirty.mark(dst);
            }
        }
    }

    fn dpy_resize(&mut self, width: usize, height: usize) {
        for client in self.running() {
            client.dirty.resize(width, height);
            client.dirty.mark_all();
            if client.features.has_resize {
                client.pending_resize = true;
            }
        }
    }

    fn dpy_bell(&mut self) {
        for client in self.running() {
            client.pending_bell += 1;
        }
    }

    fn dpy_cut_text(&mut self, text: &[u8]) {
        *self.cut_capture = Some(text.to_vec());
        for client in self.running() {
            client.pending_cut_text = Some(text.to_vec());
        }
    }
}
