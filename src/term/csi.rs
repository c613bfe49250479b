//! CSI parameter accumulation and final-byte dispatch.
//!
//! Parameters are decimal integers separated by `;`, at most
//! [`MAX_ESC_PARAMS`](super::MAX_ESC_PARAMS); a leading `?` marks private
//! modes. Unknown finals are dropped with a trace so a misbehaving host
//! cannot wedge the parser.

use tracing::trace;

use crate::cell::Cell;
use crate::charset::Codec;
use crate::system::DisplaySink;

use super::{ParseState, Terminal, MAX_ESC_PARAMS};

impl Terminal {
    pub(crate) fn csi_byte(&mut self, b: u8, dpy: &mut dyn DisplaySink) {
        match b {
            b'0'..=b'9' => {
                if self.nb_esc_params == 0 {
                    self.nb_esc_params = 1;
                }
                let p = &mut self.esc_params[self.nb_esc_params - 1];
                *p = (*p * 10 + i32::from(b - b'0')).min(0xFFFF);
                self.has_esc_param = true;
            }
            b';' => {
                if self.nb_esc_params < MAX_ESC_PARAMS {
                    self.nb_esc_params += 1;
                } else {
                    // Overflowing parameters collapse into the last slot.
                    trace!("CSI parameter overflow clamped");
                }
            }
            b'?' => self.has_qmark = true,
            0x40..=0x7E => {
                self.state = ParseState::Norm;
                self.csi_dispatch(b, dpy);
            }
            _ => {
                // Interlopers (say, a stray control byte) abort the sequence.
                trace!(byte = b, "unexpected byte inside CSI");
                self.state = ParseState::Norm;
            }
        }
    }

    /// Parameter `i`, or `default` when absent or zero.
    fn param(&self, i: usize, default: i32) -> i32 {
        let v = if i < self.nb_esc_params {
            self.esc_params[i]
        } else {
            0
        };
        if v == 0 { default } else { v }
    }

    /// Parameter `i` exactly as sent (0 when absent).
    fn raw_param(&self, i: usize) -> i32 {
        if i < self.nb_esc_params {
            self.esc_params[i]
        } else {
            0
        }
    }

    fn csi_dispatch(&mut self, final_byte: u8, dpy: &mut dyn DisplaySink) {
        let n = self.param(0, 1) as isize;
        match final_byte {
            b'@' => self.insert_chars(n as usize, dpy),
            b'A' => {
                let floor = if self.y >= self.sr_top { self.sr_top } else { 0 };
                self.y = (self.y as isize - n).max(floor as isize) as usize;
                self.wrapped = false;
            }
            b'B' => {
                let cap = if self.y <= self.sr_bottom {
                    self.sr_bottom
                } else {
                    self.height() - 1
                };
                self.y = ((self.y as isize + n) as usize).min(cap);
                self.wrapped = false;
            }
            b'C' => {
                self.x = self.clip_x(self.x as isize + n);
                self.wrapped = false;
            }
            b'D' => {
                self.x = self.clip_x(self.x as isize - n);
                self.wrapped = false;
            }
            b'E' => {
                let cap = if self.y <= self.sr_bottom {
                    self.sr_bottom
                } else {
                    self.height() - 1
                };
                self.y = ((self.y as isize + n) as usize).min(cap);
                self.x = 0;
                self.wrapped = false;
            }
            b'F' => {
                let floor = if self.y >= self.sr_top { self.sr_top } else { 0 };
                self.y = (self.y as isize - n).max(floor as isize) as usize;
                self.x = 0;
                self.wrapped = false;
            }
            b'G' | b'`' => {
                self.x = self.clip_x(self.param(0, 1) as isize - 1);
                self.wrapped = false;
            }
            b'H' | b'f' => {
                let mut row = self.param(0, 1) as isize - 1;
                let col = self.param(1, 1) as isize - 1;
                if self.origin_mode {
                    row += self.sr_top as isize;
                }
                self.y = self.clip_y(row);
                if self.origin_mode {
                    self.y = self.y.clamp(self.sr_top, self.sr_bottom);
                }
                self.x = self.clip_x(col);
                self.wrapped = false;
            }
            b'J' => self.erase_display(self.raw_param(0), dpy),
            b'K' => self.erase_line(self.raw_param(0), dpy),
            b'L' => {
                if self.y >= self.sr_top && self.y <= self.sr_bottom {
                    self.scroll_down(self.y, self.sr_bottom, n as usize, dpy);
                }
            }
            b'M' => {
                if self.y >= self.sr_top && self.y <= self.sr_bottom {
                    self.scroll_up(self.y, self.sr_bottom, n as usize, dpy);
                }
            }
            b'P' => self.delete_chars(n as usize, dpy),
            b'X' => self.erase_chars(n as usize, dpy),
            b'c' => {
                if self.raw_param(0) == 0 {
                    // DA: VT102.
                    self.reply(b"\x1b[?6c");
                }
            }
            b'd' => {
                self.y = self.clip_y(self.param(0, 1) as isize - 1);
                self.wrapped = false;
            }
            b'h' => self.set_modes(true),
            b'l' => self.set_modes(false),
            b'm' => self.select_graphic_rendition(),
            b'n' => self.device_status_report(),
            b'r' => self.set_scroll_region(),
            b's' => self.save_cursor(),
            b'u' => self.restore_cursor(),
            b'x' => {
                // DECREQTPARM: no parity, 8 bits, 19200 both ways.
                let sol = self.raw_param(0) + 2;
                let reply = format!("\x1b[{sol};1;1;120;120;1;0x");
                self.reply(reply.as_bytes());
            }
            _ => trace!(final_byte, "unknown CSI final"),
        }
    }

    // -----------------------------------------------------------------
    // Editing
    // -----------------------------------------------------------------

    /// ICH: insert `n` blanks at the cursor, shifting the tail right.
    fn insert_chars(&mut self, n: usize, dpy: &mut dyn DisplaySink) {
        let cols = self.width();
        let n = n.clamp(1, cols - self.x);
        let y = self.y;
        for xx in (self.x + n..cols).rev() {
            let moved = *self.grid.cell(xx - n, y);
            *self.grid.cell_mut(xx, y) = moved;
        }
        let erase = self.erase_attrib();
        for xx in self.x..self.x + n {
            *self.grid.cell_mut(xx, y) = Cell::blank(erase);
        }
        self.mend_wide_runs(y);
        self.repaint_row_span(y, self.x, cols, dpy);
    }

    /// DCH: shift left by `n`, then blank the rightmost `n` cells.
    fn delete_chars(&mut self, n: usize, dpy: &mut dyn DisplaySink) {
        let cols = self.width();
        let n = n.clamp(1, cols - self.x);
        let y = self.y;
        for xx in self.x..cols - n {
            let moved = *self.grid.cell(xx + n, y);
            *self.grid.cell_mut(xx, y) = moved;
        }
        let erase = self.erase_attrib();
        for xx in cols - n..cols {
            *self.grid.cell_mut(xx, y) = Cell::blank(erase);
        }
        self.mend_wide_runs(y);
        self.repaint_row_span(y, self.x, cols, dpy);
    }

    /// ECH: erase `n` cells in place.
    fn erase_chars(&mut self, n: usize, dpy: &mut dyn DisplaySink) {
        let cols = self.width();
        let n = n.clamp(1, cols - self.x);
        let y = self.y;
        self.unlink_wide(self.x, y);
        if self.x + n < cols {
            self.unlink_wide(self.x + n - 1, y);
        }
        let erase = self.erase_attrib();
        for xx in self.x..self.x + n {
            *self.grid.cell_mut(xx, y) = Cell::blank(erase);
        }
        self.repaint_row_span(y, self.x, self.x + n, dpy);
    }

    /// After a row shift, orphaned halves of two-column glyphs are blanked
    /// so the row never shows a dangling head or tail.
    fn mend_wide_runs(&mut self, y: usize) {
        let cols = self.width();
        for x in 0..cols {
            let cell = *self.grid.cell(x, y);
            if cell.cattrib.spanned {
                let orphan = x == 0 || self.grid.cell(x - 1, y).cattrib.span != 2;
                if orphan {
                    let attrib = cell.attrib;
                    *self.grid.cell_mut(x, y) = Cell::blank(attrib);
                }
            } else if cell.cattrib.span == 2 {
                let widowed = x + 1 >= cols || !self.grid.cell(x + 1, y).cattrib.spanned;
                if widowed {
                    let attrib = cell.attrib;
                    *self.grid.cell_mut(x, y) = Cell::blank(attrib);
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Erase
    // -----------------------------------------------------------------

    fn erase_display(&mut self, mode: i32, dpy: &mut dyn DisplaySink) {
        let (cols, rows) = (self.width(), self.height());
        let erase = self.erase_attrib();
        match mode {
            0 => {
                self.grid.clear_line(self.y, self.x, cols, erase);
                if self.y + 1 < rows {
                    self.grid.clear(0, self.y + 1, cols, rows - self.y - 1, erase);
                }
                self.repaint_row_span(self.y, self.x, cols, dpy);
                self.repaint_rows(self.y + 1, rows, dpy);
            }
            1 => {
                if self.y > 0 {
                    self.grid.clear(0, 0, cols, self.y, erase);
                }
                self.grid.clear_line(self.y, 0, self.x + 1, erase);
                self.repaint_rows(0, self.y, dpy);
                self.repaint_row_span(self.y, 0, self.x + 1, dpy);
            }
            2 => {
                self.grid.clear(0, 0, cols, rows, erase);
                self.repaint_rows(0, rows, dpy);
            }
            _ => trace!(mode, "unknown ED mode"),
        }
    }

    fn erase_line(&mut self, mode: i32, dpy: &mut dyn DisplaySink) {
        let cols = self.width();
        let erase = self.erase_attrib();
        match mode {
            0 => {
                self.grid.clear_line(self.y, self.x, cols, erase);
                self.repaint_row_span(self.y, self.x, cols, dpy);
            }
            1 => {
                self.grid.clear_line(self.y, 0, self.x + 1, erase);
                self.repaint_row_span(self.y, 0, self.x + 1, dpy);
            }
            2 => {
                self.grid.clear_line(self.y, 0, cols, erase);
                self.repaint_row_span(self.y, 0, cols, dpy);
            }
            _ => trace!(mode, "unknown EL mode"),
        }
    }

    // -----------------------------------------------------------------
    // Modes
    // -----------------------------------------------------------------

    fn set_modes(&mut self, set: bool) {
        for i in 0..self.nb_esc_params.max(1) {
            let p = self.raw_param(i);
            if self.has_qmark {
                match p {
                    1 => self.cursorkey_mode = set,
                    2 => self.utf = !set,
                    6 => {
                        self.origin_mode = set;
                        self.x = 0;
                        self.y = if set { self.sr_top } else { 0 };
                        self.wrapped = false;
                    }
                    7 => self.autowrap = set,
                    25 => {
                        self.cursor_visible = set;
                        // The show/hide pass around feed() repaints the cell.
                    }
                    _ => trace!(mode = p, set, "unknown private mode"),
                }
            } else {
                match p {
                    3 => self.display_ctrl = set,
                    4 => self.insert_mode = set,
                    _ => trace!(mode = p, set, "unknown mode"),
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // SGR
    // -----------------------------------------------------------------

    fn select_graphic_rendition(&mut self) {
        for i in 0..self.nb_esc_params.max(1) {
            match self.raw_param(i) {
                0 => {
                    let font = self.attrib.font;
                    self.attrib = self.attrib_default;
                    self.attrib.font = font;
                }
                1 => self.attrib.bold = true,
                4 => self.attrib.underline = true,
                5 => self.attrib.blink = true,
                7 => self.attrib.inverse = true,
                8 => self.attrib.invisible = true,
                10 => {
                    self.codecs[self.cur_slot] = Codec::Lat1;
                    self.display_ctrl = false;
                    self.toggle_meta = false;
                }
                11 => {
                    self.codecs[self.cur_slot] = Codec::IbmPc;
                    self.display_ctrl = true;
                    self.toggle_meta = false;
                }
                12 => {
                    self.codecs[self.cur_slot] = Codec::IbmPc;
                    self.display_ctrl = true;
                    self.toggle_meta = true;
                }
                22 => self.attrib.bold = false,
                24 => self.attrib.underline = false,
                25 => self.attrib.blink = false,
                27 => self.attrib.inverse = false,
                28 => self.attrib.invisible = false,
                p @ 30..=37 => self.attrib.fg = (p - 30) as u8,
                38 => {
                    self.attrib.fg = self.attrib_default.fg;
                    self.attrib.underline = true;
                }
                39 => {
                    self.attrib.fg = self.attrib_default.fg;
                    self.attrib.underline = false;
                }
                p @ 40..=47 => self.attrib.bg = (p - 40) as u8,
                49 => self.attrib.bg = self.attrib_default.bg,
                p => trace!(param = p, "unknown SGR parameter"),
            }
        }
    }

    // -----------------------------------------------------------------
    // Reports and regions
    // -----------------------------------------------------------------

    fn device_status_report(&mut self) {
        match self.raw_param(0) {
            5 => self.reply(b"\x1b[0n"),
            6 => {
                let row = if self.origin_mode {
                    self.y.saturating_sub(self.sr_top) + 1
                } else {
                    self.y + 1
                };
                let reply = format!("\x1b[{};{}R", row, self.x + 1);
                self.reply(reply.as_bytes());
            }
            p => trace!(param = p, "unknown DSR request"),
        }
    }

    fn set_scroll_region(&mut self) {
        let rows = self.height() as i32;
        let top = self.param(0, 1).clamp(1, rows) - 1;
        let bottom = self.param(1, rows).clamp(1, rows) - 1;
        if top >= bottom {
            trace!(top, bottom, "degenerate scroll region ignored");
            return;
        }
        self.sr_top = top as usize;
        self.sr_bottom = bottom as usize;
        self.x = 0;
        self.y = if self.origin_mode { self.sr_top } else { 0 };
        self.wrapped = false;
    }
}
