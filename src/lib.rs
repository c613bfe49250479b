//! rfbterm: an interactive text terminal served over RFB/VNC.
//!
//! A host PTY produces a byte stream that a built-in VT102-family emulator
//! renders into a cell grid and an internal framebuffer; dirty regions are
//! encoded (Raw/Hextile) and streamed to RFB 3.3 clients, while client
//! keyboard, pointer and cut-text events feed back into the PTY.
//!
//! Module map, leaves first:
//!
//! * [`cell`]          — cell grid ring with scrollback.
//! * [`charset`]       — Unicode → glyph-byte codec tables.
//! * [`font`]          — embedded 8x16 bitmap fonts.
//! * [`render`]        — software framebuffer (8/15/16/32 bpp) and glyph paint.
//! * [`term`]          — the terminal emulator state machine.
//! * [`dirty`]         — per-client dirty-region tracking.
//! * [`keymap`]        — keysym → scancode and keysym → byte tables.
//! * [`pty`]           — host PTY collaborator with the chunked write queue.
//! * [`rfb`]           — the RFB server core.
//! * [`system`]        — `TerminalSystem` and the display capability trait.
//! * [`state_machine`] — session lifecycle machine.
//! * [`config`]        — defaults / TOML / CLI layering.
//! * [`logging`]       — env-gated file logging.
//! * [`error`]         — protocol and snapshot error taxonomy.

pub mod cell;
pub mod charset;
pub mod config;
pub mod dirty;
pub mod error;
pub mod font;
pub mod keymap;
pub mod logging;
pub mod pty;
pub mod render;
pub mod rfb;
pub mod state_machine;
pub mod system;
pub mod term;
