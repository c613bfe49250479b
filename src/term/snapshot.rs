//! Durable terminal state snapshots.
//!
//! The format is a little-endian field sequence behind an `RFBT` magic and
//! a version word. Restoring clips every numeric field to its valid domain
//! before use — a corrupt snapshot yields a safe (if odd-looking) terminal,
//! never an out-of-bounds access. A snapshot whose geometry disagrees with
//! the current terminal triggers a resize before cell data is loaded.

use bytes::{Buf, BufMut};

use crate::cell::{CellAttrib, CellBuffer, TextAttrib};
use crate::error::SnapshotError;
use crate::system::DisplaySink;

use super::{ParseState, Selection, Terminal, MAX_ESC_PARAMS};

const MAGIC: &[u8; 4] = b"RFBT";
const VERSION: u32 = 1;

/// Hard ceilings applied when restoring geometry fields.
const MAX_COLS: i32 = 1024;
const MAX_ROWS: i32 = 512;
const MAX_TOTAL: i32 = 0x10000;

impl Terminal {
    /// Serialise the full emulator state.
    pub fn save_state(&self) -> Vec<u8> {
        let g = &self.grid;
        let mut out = Vec::with_capacity(64 + g.raw_cells().len() * 5);
        out.put_slice(MAGIC);
        out.put_u32_le(VERSION);

        out.put_i32_le(g.width() as i32);
        out.put_i32_le(g.height() as i32);
        out.put_i32_le(g.total_height() as i32);
        out.put_i32_le(self.sr_bottom as i32);
        out.put_i32_le(self.sr_top as i32);
        out.put_i32_le(g.y_base() as i32);
        out.put_i32_le(g.y_scroll() as i32);
        out.put_u8(u8::from(self.wrapped));
        out.put_i32_le(self.x as i32);
        out.put_i32_le(self.y as i32);
        out.put_i32_le(self.saved_x as i32);
        out.put_i32_le(self.saved_y as i32);
        out.put_i32_le(g.backscroll() as i32);
        out.put_i32_le(g.total_height() as i32);
        out.put_u8(u8::from(self.cursor_visible));
        out.put_u8(u8::from(self.autowrap));
        out.put_u8(u8::from(self.wrapped));
        out.put_u8(u8::from(self.insert_mode));
        out.put_u8(u8::from(self.cursorkey_mode));
        out.put_u8(u8::from(self.display_ctrl));
        out.put_u8(u8::from(self.toggle_meta));
        out.put_u16_le(self.attrib_default.pack());
        out.put_u16_le(self.attrib.pack());
        out.put_u16_le(self.saved_attrib.pack());
        for cell in g.raw_cells() {
            out.put_u8(cell.glyph);
            out.put_u16_le(cell.attrib.pack());
            out.put_u16_le(cell.cattrib.pack());
        }
        out.put_i32_le(self.state.to_i32());
        for i in 0..MAX_ESC_PARAMS {
            out.put_i32_le(self.esc_params[i]);
        }
        out.put_i32_le(self.nb_esc_params as i32);
        out.put_i32_le(i32::from(self.has_esc_param));
        out.put_i32_le(i32::from(self.has_qmark));
        for sel in &self.selections {
            out.put_i32_le(sel.start_x as i32);
            out.put_i32_le(sel.start_y as i32);
            out.put_i32_le(sel.end_x as i32);
            out.put_i32_le(sel.end_y as i32);
        }
        out.put_i32_le(i32::from(self.selecting));
        out.put_i32_le(self.mouse_x as i32);
        out.put_i32_le(self.mouse_y as i32);
        out.put_i32_le(self.unicode_index as i32);
        out.put_slice(&self.unicode_data);
        out.put_i32_le(self.unicode_length as i32);
        out
    }

    /// Restore state from `bytes`, clipping fields to their domains.
    pub fn load_state(&mut self, bytes: &[u8], dpy: &mut dyn DisplaySink) -> Result<(), SnapshotError> {
        let mut buf = bytes;
        let need = |buf: &[u8], n: usize| -> Result<(), SnapshotError> {
            if buf.remaining() < n {
                Err(SnapshotError::Truncated)
            } else {
                Ok(())
            }
        };

        need(buf, 8)?;
        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if &magic != MAGIC {
            return Err(SnapshotError::BadMagic);
        }
        let version = buf.get_u32_le();
        if version != VERSION {
            return Err(SnapshotError::BadVersion(version));
        }

        need(buf, 4 * 7 + 1 + 4 * 6 + 7 + 2 * 3)?;
        let width = buf.get_i32_le().clamp(2, MAX_COLS) as usize;
        let height = buf.get_i32_le().clamp(1, MAX_ROWS) as usize;
        let total_height = buf.get_i32_le().clamp(height as i32, MAX_TOTAL) as usize;
        let sr_bottom = buf.get_i32_le();
        let sr_top = buf.get_i32_le();
        let y_base = buf.get_i32_le().rem_euclid(total_height as i32) as usize;
        let y_scroll = buf.get_i32_le().max(0) as usize;
        let wrapped = buf.get_u8() != 0;
        let x = buf.get_i32_le().clamp(0, width as i32 - 1) as usize;
        let y = buf.get_i32_le().clamp(0, height as i32 - 1) as usize;
        let saved_x = buf.get_i32_le().clamp(0, width as i32 - 1) as usize;
        let saved_y = buf.get_i32_le().clamp(0, height as i32 - 1) as usize;
        let backscroll = buf.get_i32_le().max(0) as usize;
        let _total_again = buf.get_i32_le();
        let cursor_visible = buf.get_u8() != 0;
        let autowrap = buf.get_u8() != 0;
        let wrapped_again = buf.get_u8() != 0;
        let insert_mode = buf.get_u8() != 0;
        let cursorkey_mode = buf.get_u8() != 0;
        let display_ctrl = buf.get_u8() != 0;
        let toggle_meta = buf.get_u8() != 0;
        let attrib_default = TextAttrib::unpack(buf.get_u16_le());
        let attrib = TextAttrib::unpack(buf.get_u16_le());
        let saved_attrib = TextAttrib::unpack(buf.get_u16_le());

        let n_cells = width * total_height;
        need(buf, n_cells * 5)?;
        let mut grid = CellBuffer::new(width, height, total_height);
        {
            let cells = grid.raw_cells_mut();
            for cell in cells.iter_mut().take(n_cells) {
                cell.glyph = buf.get_u8();
                cell.attrib = TextAttrib::unpack(buf.get_u16_le());
                cell.cattrib = CellAttrib::unpack(buf.get_u16_le());
            }
        }
        grid.restore_view(y_base, y_scroll, backscroll);

        need(buf, 4 * (1 + MAX_ESC_PARAMS + 3 + 8 + 1 + 2 + 1) + 7 + 4)?;
        let state = ParseState::from_i32(buf.get_i32_le());
        let mut esc_params = [0i32; MAX_ESC_PARAMS];
        for p in &mut esc_params {
            *p = buf.get_i32_le().clamp(0, 0xFFFF);
        }
        let nb_esc_params = buf.get_i32_le().clamp(0, MAX_ESC_PARAMS as i32) as usize;
        let has_esc_param = buf.get_i32_le() != 0;
        let has_qmark = buf.get_i32_le() != 0;
        let mut selections = [Selection::default(); 2];
        for sel in &mut selections {
            sel.start_x = buf.get_i32_le().clamp(0, width as i32 - 1) as usize;
            sel.start_y = buf.get_i32_le().rem_euclid(total_height as i32) as usize;
            sel.end_x = buf.get_i32_le().clamp(0, width as i32 - 1) as usize;
            sel.end_y = buf.get_i32_le().rem_euclid(total_height as i32) as usize;
        }
        let selecting = buf.get_i32_le() != 0;
        let mouse_x = buf.get_i32_le().clamp(0, width as i32 - 1) as usize;
        let mouse_y = buf.get_i32_le().clamp(0, height as i32 - 1) as usize;
        let unicode_index = buf.get_i32_le().clamp(0, 6) as usize;
        let mut unicode_data = [0u8; 7];
        buf.copy_to_slice(&mut unicode_data);
        let unicode_length = buf.get_i32_le().clamp(0, 6) as usize;

        // Geometry first, then state: the framebuffer must match the grid
        // before the repaint below.
        let resized = width != self.width() || height != self.height();
        self.grid = grid;
        if resized {
            self.fb.resize(
                width * crate::font::FONT_WIDTH,
                height * crate::font::FONT_HEIGHT,
            );
            dpy.dpy_resize(self.fb.width(), self.fb.height());
        }
        self.sr_top = sr_top.clamp(0, height as i32 - 1) as usize;
        self.sr_bottom = sr_bottom.clamp(self.sr_top as i32, height as i32 - 1) as usize;
        self.x = x;
        self.y = y;
        self.saved_x = saved_x;
        self.saved_y = saved_y;
        self.wrapped = wrapped || wrapped_again;
        self.cursor_visible = cursor_visible;
        self.autowrap = autowrap;
        self.insert_mode = insert_mode;
        self.cursorkey_mode = cursorkey_mode;
        self.display_ctrl = display_ctrl;
        self.toggle_meta = toggle_meta;
        self.attrib_default = attrib_default;
        self.attrib = attrib;
        self.saved_attrib = saved_attrib;
        self.state = state;
        self.esc_params = esc_params;
        self.nb_esc_params = nb_esc_params;
        self.has_esc_param = has_esc_param;
        self.has_qmark = has_qmark;
        self.selections = selections;
        self.selecting = selecting;
        // Restored cells carry their highlight bits; treat the committed
        // range as visible so the next selection clears it.
        self.sel_visible = true;
        self.mouse_x = mouse_x;
        self.mouse_y = mouse_y;
        self.unicode_index = unicode_index.min(unicode_length);
        self.unicode_data = unicode_data;
        self.unicode_length = unicode_length;

        self.repaint_view(dpy);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::Depth;
    use crate::system::NullSink;

    fn term() -> Terminal {
        Terminal::new(20, 5, Depth::D8, 10)
    }

    #[test]
    fn round_trip_preserves_screen_and_cursor() {
        let mut a = term();
        let mut sink = NullSink;
        a.feed(b"hello\r\nworld\x1b[1;7H!", &mut sink);
        let snap = a.save_state();

        let mut b = term();
        b.load_state(&snap, &mut sink).unwrap();
        assert_eq!((b.x, b.y), (a.x, a.y));
        for y in 0..5 {
            for x in 0..20 {
                assert_eq!(b.grid.cell(x, y), a.grid.cell(x, y), "cell {x},{y}");
            }
        }
    }

    #[test]
    fn rejects_bad_magic_and_version() {
        let mut t = term();
        let mut sink = NullSink;
        assert!(matches!(
            t.load_state(b"XXXX\x01\x00\x00\x00", &mut sink),
            Err(SnapshotError::BadMagic)
        ));
        let mut snap = term().save_state();
        snap[4] = 0xEE;
        assert!(matches!(
            t.load_state(&snap, &mut sink),
            Err(SnapshotError::BadVersion(_))
        ));
    }

    #[test]
    fn truncated_snapshot_is_rejected() {
        let snap = term().save_state();
        let mut t = term();
        let mut sink = NullSink;
        assert!(matches!(
            t.load_state(&snap[..snap.len() / 2], &mut sink),
            Err(SnapshotError::Truncated)
        ));
    }

    #[test]
    fn out_of_range_fields_are_clipped() {
        let mut a = term();
        let mut snap = a.save_state();
        // Corrupt the cursor x field (offset: magic 8 + 7*4 ints + wrapped 1).
        let off = 8 + 28 + 1;
        snap[off..off + 4].copy_from_slice(&9999i32.to_le_bytes());
        let mut sink = NullSink;
        a.load_state(&snap, &mut sink).unwrap();
        assert!(a.x < a.width());
    }

    #[test]
    fn geometry_change_resizes_before_cells() {
        let mut small = Terminal::new(10, 3, Depth::D8, 4);
        let mut sink = NullSink;
        small.feed(b"abc", &mut sink);
        let snap = small.save_state();

        let mut big = Terminal::new(80, 25, Depth::D8, 100);
        let mut rec = crate::system::RecordingSink::default();
        big.load_state(&snap, &mut rec).unwrap();
        assert_eq!(big.width(), 10);
        assert_eq!(big.height(), 3);
        assert_eq!(rec.resizes, vec![(80, 48)]);
        assert_eq!(big.grid.cell(0, 0).glyph, b'a');
    }
}
