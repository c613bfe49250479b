//! Cell grid with scrollback for the terminal screen.
//!
//! The grid is a ring of `total_height x width` cells. The visible screen is
//! a `height`-row window into the ring; everything above it (up to
//! `total_height - height` rows) is scrollback history.
//!
//! Coordinate spaces:
//!   - *terminal* rows: `0..height` below `y_base` — where the emulator
//!     writes, regardless of how far the user has scrolled back.
//!   - *view* rows: `0..height` of what is currently displayed, offset by
//!     `y_scroll` into history. `screen_to_virtual` maps these.
//!   - *virtual* rows: ring indices `0..total_height`, stable across
//!     scrolling. Selections are recorded in virtual coordinates.
//!
//! Scrolling the whole screen advances `y_base` around the ring (cheap, and
//! the vacated rows become history); scrolling a sub-region moves rows in
//! place via [`CellBuffer::scroll_cells`] without touching `y_base`.

// ---------------------------------------------------------------------------
// Text attributes
// ---------------------------------------------------------------------------

/// Per-cell text attributes, packed into 16 bits for state snapshots.
///
/// `fg`/`bg` are 4-bit colour indices (0..=7 named colours; bold/blink lift
/// them into the bright half of the palette at paint time). `font` selects
/// the glyph bitmap: 0 = text font, 1 = graphics font.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextAttrib {
    pub fg: u8,
    pub bg: u8,
    pub bold: bool,
    pub underline: bool,
    pub blink: bool,
    pub inverse: bool,
    pub invisible: bool,
    pub used: bool,
    pub font: u8,
}

/// Default foreground colour index (white).
pub const DEFAULT_FG: u8 = 7;
/// Default background colour index (black).
pub const DEFAULT_BG: u8 = 0;

impl Default for TextAttrib {
    fn default() -> Self {
        Self {
            fg: DEFAULT_FG,
            bg: DEFAULT_BG,
            bold: false,
            underline: false,
            blink: false,
            inverse: false,
            invisible: false,
            used: false,
            font: 0,
        }
    }
}

impl TextAttrib {
    pub fn pack(self) -> u16 {
        u16::from(self.fg & 0x0F)
            | u16::from(self.bg & 0x0F) << 4
            | u16::from(self.bold) << 8
            | u16::from(self.underline) << 9
            | u16::from(self.blink) << 10
            | u16::from(self.inverse) << 11
            | u16::from(self.invisible) << 12
            | u16::from(self.used) << 13
            | u16::from(self.font & 1) << 14
    }

    pub fn unpack(bits: u16) -> Self {
        Self {
            fg: (bits & 0x0F) as u8,
            bg: (bits >> 4 & 0x0F) as u8,
            bold: bits & 1 << 8 != 0,
            underline: bits & 1 << 9 != 0,
            blink: bits & 1 << 10 != 0,
            inverse: bits & 1 << 11 != 0,
            invisible: bits & 1 << 12 != 0,
            used: bits & 1 << 13 != 0,
            font: (bits >> 14 & 1) as u8,
        }
    }
}

// ---------------------------------------------------------------------------
// Cell attributes
// ---------------------------------------------------------------------------

/// Per-cell layout attributes, packed into 16 bits for state snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellAttrib {
    /// Highlighted by the active selection.
    pub highlit: bool,
    /// The logical line continues on the next screen row (autowrap ran).
    pub wrapped: bool,
    /// Columns this glyph occupies (1 or 2).
    pub span: u8,
    /// This cell is the continuation half of a two-column glyph.
    pub spanned: bool,
}

impl Default for CellAttrib {
    fn default() -> Self {
        Self {
            highlit: false,
            wrapped: false,
            span: 1,
            spanned: false,
        }
    }
}

impl CellAttrib {
    pub fn pack(self) -> u16 {
        u16::from(self.highlit)
            | u16::from(self.wrapped) << 1
            | u16::from(self.span.clamp(1, 2) - 1) << 2
            | u16::from(self.spanned) << 3
    }

    pub fn unpack(bits: u16) -> Self {
        Self {
            highlit: bits & 1 != 0,
            wrapped: bits & 1 << 1 != 0,
            span: (bits >> 2 & 1) as u8 + 1,
            spanned: bits & 1 << 3 != 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Cell
// ---------------------------------------------------------------------------

/// One character position: a glyph byte in the active font's codepage plus
/// its attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cell {
    pub glyph: u8,
    pub attrib: TextAttrib,
    pub cattrib: CellAttrib,
}

impl Cell {
    /// A blank cell carrying the given text attributes.
    pub fn blank(attrib: TextAttrib) -> Self {
        Self {
            glyph: b' ',
            attrib,
            cattrib: CellAttrib::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// CellBuffer
// ---------------------------------------------------------------------------

/// Ring buffer of cells: visible screen plus scrollback history.
#[derive(Debug, Clone)]
pub struct CellBuffer {
    width: usize,
    height: usize,
    total_height: usize,
    /// Ring row of the top terminal line.
    y_base: usize,
    /// Rows the view is currently scrolled back into history.
    y_scroll: usize,
    /// History rows currently populated (`<= total_height - height`).
    backscroll: usize,
    cells: Vec<Cell>,
}

impl CellBuffer {
    pub fn new(width: usize, height: usize, total_height: usize) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let total_height = total_height.max(height);
        Self {
            width,
            height,
            total_height,
            y_base: 0,
            y_scroll: 0,
            backscroll: 0,
            cells: vec![Cell::default(); width * total_height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn total_height(&self) -> usize {
        self.total_height
    }

    pub fn y_base(&self) -> usize {
        self.y_base
    }

    pub fn y_scroll(&self) -> usize {
        self.y_scroll
    }

    pub fn backscroll(&self) -> usize {
        self.backscroll
    }

    /// Map a view row (0 at the top of the displayed window, which may be
    /// scrolled back into history) to its ring row.
    pub fn screen_to_virtual(&self, y: usize) -> usize {
        (self.y_base + self.total_height - self.y_scroll + y) % self.total_height
    }

    /// Map a ring row back to a view row. The result is only on screen when
    /// it lands in `0..height`; other values mean the row is not displayed.
    pub fn virtual_to_screen(&self, v: usize) -> usize {
        (v + self.total_height + self.y_scroll - self.y_base) % self.total_height
    }

    /// Map a terminal row (emulator space, ignores view scrolling) to its
    /// ring row.
    pub fn term_to_virtual(&self, y: usize) -> usize {
        (self.y_base + y) % self.total_height
    }

    pub fn cell_at(&self, x: usize, virtual_y: usize) -> &Cell {
        &self.cells[virtual_y % self.total_height * self.width + x]
    }

    pub fn cell_at_mut(&mut self, x: usize, virtual_y: usize) -> &mut Cell {
        &mut self.cells[virtual_y % self.total_height * self.width + x]
    }

    /// The cell at terminal coordinates (emulator space).
    pub fn cell(&self, x: usize, y: usize) -> &Cell {
        self.cell_at(x, self.term_to_virtual(y))
    }

    pub fn cell_mut(&mut self, x: usize, y: usize) -> &mut Cell {
        let v = self.term_to_virtual(y);
        self.cell_at_mut(x, v)
    }

    /// The cell at view coordinates (what is displayed at row `y`).
    pub fn view_cell(&self, x: usize, y: usize) -> &Cell {
        self.cell_at(x, self.screen_to_virtual(y))
    }

    /// Clear columns `from_x..to_x` of one terminal row to blanks.
    pub fn clear_line(&mut self, row: usize, from_x: usize, to_x: usize, attrib: TextAttrib) {
        let v = self.term_to_virtual(row);
        let to_x = to_x.min(self.width);
        for x in from_x.min(to_x)..to_x {
            *self.cell_at_mut(x, v) = Cell::blank(attrib);
        }
    }

    /// Clear a rectangle of terminal rows: columns `from_x..to_x`, rows
    /// `start_y..start_y + rows`.
    pub fn clear(&mut self, from_x: usize, start_y: usize, to_x: usize, rows: usize, attrib: TextAttrib) {
        for y in start_y..(start_y + rows).min(self.height) {
            self.clear_line(y, from_x, to_x, attrib);
        }
    }

    /// Move rows within the terminal band `top..=bottom` by `by` positions
    /// (positive = towards the top), clearing the vacated rows. `y_base` is
    /// not touched; this is the in-place path for sub-region scrolling.
    pub fn scroll_cells(&mut self, top: usize, bottom: usize, by: isize, attrib: TextAttrib) {
        let bottom = bottom.min(self.height.saturating_sub(1));
        if top > bottom || by == 0 {
            return;
        }
        let band = bottom - top + 1;
        let n = by.unsigned_abs().min(band);
        if by > 0 {
            // Rows move up: row (top + n + i) -> (top + i).
            for i in 0..band - n {
                let src = self.term_to_virtual(top + n + i);
                let dst = self.term_to_virtual(top + i);
                self.copy_row(src, dst);
            }
            for y in bottom + 1 - n..=bottom {
                self.clear_line(y, 0, self.width, attrib);
            }
        } else {
            // Rows move down: row (bottom - n - i) -> (bottom - i).
            for i in 0..band - n {
                let src = self.term_to_virtual(bottom - n - i);
                let dst = self.term_to_virtual(bottom - i);
                self.copy_row(src, dst);
            }
            for y in top..top + n {
                self.clear_line(y, 0, self.width, attrib);
            }
        }
    }

    fn copy_row(&mut self, src_v: usize, dst_v: usize) {
        if src_v == dst_v {
            return;
        }
        let w = self.width;
        let (src, dst) = (src_v * w, dst_v * w);
        // Distinct ring rows, so the ranges never overlap.
        for i in 0..w {
            self.cells[dst + i] = self.cells[src + i];
        }
    }

    /// Full-screen scroll up by `n` rows via the ring: the vacated rows
    /// become scrollback history and the exposed bottom rows are cleared.
    pub fn ring_scroll_up(&mut self, n: usize, attrib: TextAttrib) {
        let n = n.min(self.height);
        self.y_base = (self.y_base + n) % self.total_height;
        self.backscroll = (self.backscroll + n).min(self.total_height - self.height);
        for y in self.height - n..self.height {
            self.clear_line(y, 0, self.width, attrib);
        }
    }

    /// Full-screen scroll down by `n` rows via the ring (reverse line feed
    /// at the top of the screen); consumes history rows.
    pub fn ring_scroll_down(&mut self, n: usize, attrib: TextAttrib) {
        let n = n.min(self.height);
        self.y_base = (self.y_base + self.total_height - n) % self.total_height;
        self.backscroll = self.backscroll.saturating_sub(n);
        for y in 0..n {
            self.clear_line(y, 0, self.width, attrib);
        }
    }

    /// Adjust the view scroll, clamped to the populated history. Returns
    /// true if the viewport moved.
    pub fn scroll_view(&mut self, delta: isize) -> bool {
        let want = if delta >= 0 {
            self.y_scroll.saturating_add(delta as usize)
        } else {
            self.y_scroll.saturating_sub(delta.unsigned_abs())
        };
        let clamped = want.min(self.backscroll);
        if clamped == self.y_scroll {
            return false;
        }
        self.y_scroll = clamped;
        true
    }

    pub fn reset_view(&mut self) {
        self.y_scroll = 0;
    }

    /// Resize the grid, preserving content by line index: history stays
    /// above, screen line `i` remains screen line `i`, new columns are
    /// default-filled and excess columns truncated.
    pub fn resize(&mut self, width: usize, height: usize, total_height: usize) {
        let width = width.max(1);
        let height = height.max(1);
        let total_height = total_height.max(height);
        let keep_hist = self.backscroll.min(total_height - height);
        let mut next = vec![Cell::default(); width * total_height];

        let copy_w = width.min(self.width);
        // History: the most recent `keep_hist` rows, oldest first at ring 0.
        for i in 0..keep_hist {
            let src_v = (self.y_base + self.total_height - (keep_hist - i)) % self.total_height;
            for x in 0..copy_w {
                next[i * width + x] = *self.cell_at(x, src_v);
            }
        }
        // Screen rows, top-aligned.
        for y in 0..height.min(self.height) {
            let src_v = self.term_to_virtual(y);
            for x in 0..copy_w {
                next[(keep_hist + y) * width + x] = *self.cell_at(x, src_v);
            }
        }

        self.cells = next;
        self.width = width;
        self.height = height;
        self.total_height = total_height;
        self.y_base = keep_hist;
        self.backscroll = keep_hist;
        self.y_scroll = self.y_scroll.min(keep_hist);
    }

    /// Restore ring geometry from a snapshot. Values are clipped to the
    /// buffer's valid domain rather than trusted.
    pub fn restore_view(&mut self, y_base: usize, y_scroll: usize, backscroll: usize) {
        self.y_base = y_base % self.total_height;
        self.backscroll = backscroll.min(self.total_height - self.height);
        self.y_scroll = y_scroll.min(self.backscroll);
    }

    /// Raw access for snapshot encode/decode, row-major by ring row.
    pub fn raw_cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn raw_cells_mut(&mut self) -> &mut [Cell] {
        &mut self.cells
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attrib_pack_round_trip() {
        let a = TextAttrib {
            fg: 3,
            bg: 5,
            bold: true,
            underline: false,
            blink: true,
            inverse: false,
            invisible: true,
            used: true,
            font: 1,
        };
        assert_eq!(TextAttrib::unpack(a.pack()), a);

        let c = CellAttrib {
            highlit: true,
            wrapped: true,
            span: 2,
            spanned: false,
        };
        assert_eq!(CellAttrib::unpack(c.pack()), c);
    }

    #[test]
    fn ring_round_trip() {
        let mut buf = CellBuffer::new(10, 4, 16);
        buf.ring_scroll_up(3, TextAttrib::default());
        for y in 0..4 {
            let v = buf.screen_to_virtual(y);
            assert_eq!(buf.virtual_to_screen(v), y);
        }
    }

    #[test]
    fn ring_scroll_extends_backscroll() {
        let mut buf = CellBuffer::new(4, 2, 6);
        let attr = TextAttrib::default();
        buf.cell_mut(0, 0).glyph = b'a';
        buf.ring_scroll_up(1, attr);
        assert_eq!(buf.backscroll(), 1);
        // The old top row is one row back in history.
        buf.scroll_view(1);
        assert_eq!(buf.view_cell(0, 0).glyph, b'a');
        // Emulator writes keep landing on the unscrolled screen.
        buf.cell_mut(0, 0).glyph = b'z';
        assert_eq!(buf.view_cell(0, 0).glyph, b'a');
        buf.reset_view();
        assert_eq!(buf.view_cell(0, 0).glyph, b'z');
        // Backscroll is capped at total_height - height.
        for _ in 0..10 {
            buf.ring_scroll_up(1, attr);
        }
        assert_eq!(buf.backscroll(), 4);
    }

    #[test]
    fn scroll_cells_moves_band_only() {
        let mut buf = CellBuffer::new(3, 5, 5);
        let attr = TextAttrib::default();
        for y in 0..5 {
            buf.cell_mut(0, y).glyph = b'0' + y as u8;
        }
        buf.scroll_cells(1, 3, 1, attr);
        assert_eq!(buf.cell(0, 0).glyph, b'0');
        assert_eq!(buf.cell(0, 1).glyph, b'2');
        assert_eq!(buf.cell(0, 2).glyph, b'3');
        assert_eq!(buf.cell(0, 3).glyph, b' ');
        assert_eq!(buf.cell(0, 4).glyph, b'4');
        assert_eq!(buf.y_base(), 0);

        buf.scroll_cells(1, 3, -1, attr);
        assert_eq!(buf.cell(0, 1).glyph, b' ');
        assert_eq!(buf.cell(0, 2).glyph, b'2');
        assert_eq!(buf.cell(0, 3).glyph, b'3');
    }

    #[test]
    fn resize_preserves_screen_by_line_index() {
        let mut buf = CellBuffer::new(4, 3, 8);
        for y in 0..3 {
            buf.cell_mut(0, y).glyph = b'a' + y as u8;
        }
        buf.resize(6, 2, 10);
        assert_eq!(buf.cell(0, 0).glyph, b'a');
        assert_eq!(buf.cell(0, 1).glyph, b'b');
        // Widened columns come up blank.
        assert_eq!(buf.cell(5, 0).glyph, 0);
    }

    #[test]
    fn resize_keeps_history() {
        let mut buf = CellBuffer::new(4, 2, 6);
        let attr = TextAttrib::default();
        buf.cell_mut(0, 0).glyph = b'h';
        buf.ring_scroll_up(1, attr);
        buf.resize(4, 2, 6);
        assert_eq!(buf.backscroll(), 1);
        buf.scroll_view(1);
        assert_eq!(buf.view_cell(0, 0).glyph, b'h');
    }
}
