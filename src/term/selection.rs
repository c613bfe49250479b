//! Pointer-driven text selection.
//!
//! Selections live in *virtual* (ring) coordinates so they stay anchored to
//! their lines while the screen scrolls. `selections[0]` tracks the drag in
//! progress; `selections[1]` holds the committed range. On release the
//! selected text is extracted — rows whose last cell carries the `wrapped`
//! attribute join their successor without a newline — and handed to the
//! display sink as cut text.

use crate::font::{FONT_HEIGHT, FONT_WIDTH};
use crate::system::{DisplaySink, Rect};

use super::Terminal;

/// Pointer button bits as dispatched by the server.
pub const BUTTON_LEFT: u8 = 0x01;
pub const BUTTON_MIDDLE: u8 = 0x02;
pub const BUTTON_RIGHT: u8 = 0x04;

/// An inclusive cell range in virtual coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Selection {
    pub start_x: usize,
    pub start_y: usize,
    pub end_x: usize,
    pub end_y: usize,
}

impl Terminal {
    /// Handle a pointer event. `nx`/`ny` are normalised to `0..=0x7FFF`
    /// across the framebuffer; `dz` is the wheel step; `buttons` is the
    /// current button state ([`BUTTON_LEFT`] etc.).
    pub fn mouse_event(&mut self, nx: u16, ny: u16, dz: i8, buttons: u8, dpy: &mut dyn DisplaySink) {
        let cols = self.width();
        let rows = self.height();
        let cx = (usize::from(nx) * cols / 0x8000).min(cols - 1);
        let cy = (usize::from(ny) * rows / 0x8000).min(rows - 1);
        self.mouse_x = cx;
        self.mouse_y = cy;

        if dz != 0 {
            // Wheel up (negative) digs into history.
            self.scroll_view(-isize::from(dz), dpy);
        }

        let pressed = buttons & !self.mouse_buttons;
        let released = !buttons & self.mouse_buttons;
        self.mouse_buttons = buttons;

        let v = self.grid.screen_to_virtual(cy);
        if pressed & BUTTON_LEFT != 0 && !self.selecting {
            self.clear_selection(dpy);
            self.selections[0] = Selection {
                start_x: cx,
                start_y: v,
                end_x: cx,
                end_y: v,
            };
            self.selecting = true;
            let sel = self.selections[0];
            self.highlight(sel, true, dpy);
        } else if self.selecting && buttons & BUTTON_LEFT != 0 {
            if self.selections[0].end_x != cx || self.selections[0].end_y != v {
                let old = self.selections[0];
                self.highlight(old, false, dpy);
                self.selections[0].end_x = cx;
                self.selections[0].end_y = v;
                let new = self.selections[0];
                self.highlight(new, true, dpy);
            }
        } else if released & BUTTON_LEFT != 0 && self.selecting {
            self.selecting = false;
            self.selections[1] = self.selections[0];
            self.sel_visible = true;
            let text = self.extract_selection(self.selections[1]);
            if !text.is_empty() {
                dpy.dpy_cut_text(&text);
            }
        }
    }

    /// Drop any committed highlight from the screen.
    pub(crate) fn clear_selection(&mut self, dpy: &mut dyn DisplaySink) {
        if self.sel_visible {
            let sel = self.selections[1];
            self.highlight(sel, false, dpy);
            self.sel_visible = false;
        }
        if self.selecting {
            let sel = self.selections[0];
            self.highlight(sel, false, dpy);
            self.selecting = false;
        }
    }

    /// Age of a ring row relative to the oldest stored line; used to order
    /// selection endpoints across the ring seam.
    fn line_age(&self, v: usize) -> usize {
        let total = self.grid.total_height();
        let oldest = (self.grid.y_base() + total - self.grid.backscroll()) % total;
        (v + total - oldest) % total
    }

    /// Normalised `(start, end)` with start not after end in reading order.
    fn ordered(&self, sel: Selection) -> ((usize, usize), (usize, usize)) {
        let a = (self.line_age(sel.start_y), sel.start_x);
        let b = (self.line_age(sel.end_y), sel.end_x);
        if a <= b {
            ((a.0, a.1), (b.0, b.1))
        } else {
            ((b.0, b.1), (a.0, a.1))
        }
    }

    fn age_to_virtual(&self, age: usize) -> usize {
        let total = self.grid.total_height();
        let oldest = (self.grid.y_base() + total - self.grid.backscroll()) % total;
        (oldest + age) % total
    }

    /// Toggle the highlight attribute across the selection and repaint any
    /// affected on-view cells.
    fn highlight(&mut self, sel: Selection, on: bool, dpy: &mut dyn DisplaySink) {
        let ((age0, x0), (age1, x1)) = self.ordered(sel);
        let cols = self.width();
        let rows = self.height();
        for age in age0..=age1 {
            let v = self.age_to_virtual(age);
            let from = if age == age0 { x0 } else { 0 };
            let to = if age == age1 { x1 } else { cols - 1 };
            for x in from..=to.min(cols - 1) {
                self.grid.cell_at_mut(x, v).cattrib.highlit = on;
            }
            let view_row = self.grid.virtual_to_screen(v);
            if view_row < rows {
                for x in from..=to.min(cols - 1) {
                    let cell = *self.grid.cell_at(x, v);
                    self.fb
                        .put_glyph(x, view_row, cell.glyph, cell.attrib, cell.cattrib, false);
                }
                dpy.dpy_update(Rect::new(
                    from * FONT_WIDTH,
                    view_row * FONT_HEIGHT,
                    (to.min(cols - 1) + 1 - from) * FONT_WIDTH,
                    FONT_HEIGHT,
                ));
            }
        }
    }

    /// Pull the selected text out of the grid as Latin-1 bytes.
    fn extract_selection(&self, sel: Selection) -> Vec<u8> {
        let ((age0, x0), (age1, x1)) = self.ordered(sel);
        let cols = self.width();
        let mut out = Vec::new();
        for age in age0..=age1 {
            let v = self.age_to_virtual(age);
            let from = if age == age0 { x0 } else { 0 };
            let to = if age == age1 { x1 } else { cols - 1 };
            let mut line = Vec::new();
            for x in from..=to.min(cols - 1) {
                let cell = self.grid.cell_at(x, v);
                if cell.cattrib.spanned {
                    continue;
                }
                line.push(if cell.glyph == 0 { b' ' } else { cell.glyph });
            }
            // Trailing blanks are padding, not content.
            while line.last() == Some(&b' ') {
                line.pop();
            }
            out.extend_from_slice(&line);
            let joins_next = self.grid.cell_at(cols - 1, v).cattrib.wrapped;
            if age != age1 && !joins_next {
                out.push(b'\n');
            }
        }
        out
    }
}
