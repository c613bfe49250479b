//! Embedded 8x16 bitmap fonts.
//!
//! Two 4096-byte bitmaps are compiled into the binary, one glyph row per
//! byte with the MSB as the leftmost pixel:
//!
//!   - `font_text.fnt` — ISO 8859-1 glyph order, used by the LAT1/USER
//!     codecs.
//!   - `font_graf.fnt` — CP437 glyph order with the DEC special graphics
//!     bank at 0x60..0x7E, used by the GRAF/IBMPC codecs.
//!
//! The assets are regenerated with `tools/mkfont.py`.

pub const FONT_WIDTH: usize = 8;
pub const FONT_HEIGHT: usize = 16;

static FONT_TEXT: &[u8; 256 * FONT_HEIGHT] = include_bytes!("../assets/font_text.fnt");
static FONT_GRAF: &[u8; 256 * FONT_HEIGHT] = include_bytes!("../assets/font_graf.fnt");

/// The 16 row bytes of a glyph in the given font slot bitmap (0 = text,
/// anything else = graphics).
pub fn glyph_rows(font: u8, glyph: u8) -> &'static [u8] {
    let data: &[u8] = if font == 0 { FONT_TEXT } else { FONT_GRAF };
    let off = glyph as usize * FONT_HEIGHT;
    &data[off..off + FONT_HEIGHT]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn space_is_blank_and_block_is_solid() {
        assert!(glyph_rows(0, b' ').iter().all(|&b| b == 0));
        // CP437 full block at 0xDB in the graphics font.
        assert!(glyph_rows(1, 0xDB).iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn dec_horizontal_line_has_one_full_row() {
        let rows = glyph_rows(1, 0x71);
        assert_eq!(rows.iter().filter(|&&b| b == 0xFF).count(), 1);
    }
}
