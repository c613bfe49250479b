//! Hextile encoding (RFB encoding 5).
//!
//! Rectangles are cut into 16x16 tiles (edge tiles smaller); each tile
//! picks the cheapest of: all-background (mask only), foreground subrects,
//! coloured subrects, or raw pixels. The background pixel value persists
//! from tile to tile per client and is only respecified when it changes; a
//! raw tile invalidates it.

use bytes::{BufMut, BytesMut};

use crate::render::Framebuffer;
use crate::system::Rect;

use super::pixel::{PixelEncoder, PixelFormat};

pub const HEXTILE_RAW: u8 = 1 << 0;
pub const HEXTILE_BACKGROUND_SPECIFIED: u8 = 1 << 1;
pub const HEXTILE_FOREGROUND_SPECIFIED: u8 = 1 << 2;
pub const HEXTILE_ANY_SUBRECTS: u8 = 1 << 3;
pub const HEXTILE_SUBRECTS_COLOURED: u8 = 1 << 4;

const TILE: usize = 16;

/// Append the Hextile payload for `rect`. `last_bg` is the client's
/// persistent background value in client pixel space.
pub fn encode_hextile(
    fb: &Framebuffer,
    enc: &PixelEncoder,
    format: &PixelFormat,
    rect: Rect,
    last_bg: &mut Option<u32>,
    out: &mut BytesMut,
) {
    let mut ty = rect.y;
    while ty < rect.y + rect.h {
        let th = TILE.min(rect.y + rect.h - ty);
        let mut tx = rect.x;
        while tx < rect.x + rect.w {
            let tw = TILE.min(rect.x + rect.w - tx);
            encode_tile(fb, enc, format, Rect::new(tx, ty, tw, th), last_bg, out);
            tx += TILE;
        }
        ty += TILE;
    }
}

fn encode_tile(
    fb: &Framebuffer,
    enc: &PixelEncoder,
    format: &PixelFormat,
    tile: Rect,
    last_bg: &mut Option<u32>,
    out: &mut BytesMut,
) {
    // Tile pixels in client space, row-major.
    let mut px = Vec::with_capacity(tile.w * tile.h);
    for y in tile.y..tile.y + tile.h {
        for x in tile.x..tile.x + tile.w {
            px.push(enc.convert(fb.pixel_at(x, y), fb.depth()));
        }
    }

    // Colour census, insertion-ordered so ties stay deterministic.
    let mut census: Vec<(u32, usize)> = Vec::new();
    for &v in &px {
        match census.iter_mut().find(|(c, _)| *c == v) {
            Some((_, n)) => *n += 1,
            None => census.push((v, 1)),
        }
    }

    if census.len() == 1 {
        let bg = census[0].0;
        if *last_bg == Some(bg) {
            out.put_u8(0);
        } else {
            out.put_u8(HEXTILE_BACKGROUND_SPECIFIED);
            enc.put_px(out, bg, format);
            *last_bg = Some(bg);
        }
        return;
    }

    let bpp = format.bytes_per_pixel();
    let raw_len = 1 + tile.w * tile.h * bpp;
    let bg = census.iter().max_by_key(|&&(_, n)| n).map(|&(c, _)| c).unwrap_or(0);
    let bg_cost = if *last_bg == Some(bg) { 0 } else { bpp };

    if census.len() == 2 {
        let fg = census.iter().find(|&&(c, _)| c != bg).map(|&(c, _)| c).unwrap_or(0);
        let runs = subrect_runs(&px, tile.w, tile.h, |v| v == fg);
        let cost = 1 + bg_cost + bpp + 1 + 2 * runs.len();
        if runs.len() <= 255 && cost < raw_len {
            let mut mask = HEXTILE_FOREGROUND_SPECIFIED | HEXTILE_ANY_SUBRECTS;
            if bg_cost > 0 {
                mask |= HEXTILE_BACKGROUND_SPECIFIED;
            }
            out.put_u8(mask);
            if bg_cost > 0 {
                enc.put_px(out, bg, format);
            }
            enc.put_px(out, fg, format);
            out.put_u8(runs.len() as u8);
            for (x, y, w) in runs {
                out.put_u8((x << 4 | y) as u8);
                out.put_u8(((w - 1) << 4) as u8);
            }
            *last_bg = Some(bg);
            return;
        }
    } else {
        let runs = coloured_runs(&px, tile.w, tile.h, bg);
        let cost = 1 + bg_cost + 1 + runs.len() * (bpp + 2);
        if runs.len() <= 255 && cost < raw_len {
            let mut mask = HEXTILE_ANY_SUBRECTS | HEXTILE_SUBRECTS_COLOURED;
            if bg_cost > 0 {
                mask |= HEXTILE_BACKGROUND_SPECIFIED;
            }
            out.put_u8(mask);
            if bg_cost > 0 {
                enc.put_px(out, bg, format);
            }
            out.put_u8(runs.len() as u8);
            for (colour, x, y, w) in runs {
                enc.put_px(out, colour, format);
                out.put_u8((x << 4 | y) as u8);
                out.put_u8(((w - 1) << 4) as u8);
            }
            *last_bg = Some(bg);
            return;
        }
    }

    // Raw tile; the background value is no longer defined afterwards.
    out.put_u8(HEXTILE_RAW);
    for &v in &px {
        enc.put_px(out, v, format);
    }
    *last_bg = None;
}

/// Horizontal runs of pixels matching `pred`, as `(x, y, w)` with `w <= 16`.
fn subrect_runs(px: &[u32], w: usize, h: usize, pred: impl Fn(u32) -> bool) -> Vec<(usize, usize, usize)> {
    let mut runs = Vec::new();
    for y in 0..h {
        let mut x = 0;
        while x < w {
            if pred(px[y * w + x]) {
                let start = x;
                while x < w && pred(px[y * w + x]) {
                    x += 1;
                }
                runs.push((start, y, x - start));
            } else {
                x += 1;
            }
        }
    }
    runs
}

/// Horizontal runs of same-coloured non-background pixels.
fn coloured_runs(px: &[u32], w: usize, h: usize, bg: u32) -> Vec<(u32, usize, usize, usize)> {
    let mut runs = Vec::new();
    for y in 0..h {
        let mut x = 0;
        while x < w {
            let v = px[y * w + x];
            if v == bg {
                x += 1;
                continue;
            }
            let start = x;
            while x < w && px[y * w + x] == v {
                x += 1;
            }
            runs.push((v, start, y, x - start));
        }
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::Depth;

    fn setup() -> (Framebuffer, PixelEncoder, PixelFormat) {
        let fb = Framebuffer::new(32, 32, Depth::D8);
        let pf = PixelFormat::native(Depth::D8);
        let enc = PixelEncoder::select(pf, Depth::D8);
        (fb, enc, pf)
    }

    #[test]
    fn uniform_tile_with_known_background_is_one_byte() {
        let (mut fb, enc, pf) = setup();
        fb.fill_rect(0, 0, 16, 16, 4);
        let mut out = BytesMut::new();
        let mut last_bg = None;
        encode_hextile(&fb, &enc, &pf, Rect::new(0, 0, 16, 16), &mut last_bg, &mut out);
        // First tile: background specified.
        assert_eq!(out[0], HEXTILE_BACKGROUND_SPECIFIED);
        assert_eq!(out.len(), 2);

        // Same colour again: the single zero mask byte.
        let mut out2 = BytesMut::new();
        encode_hextile(&fb, &enc, &pf, Rect::new(0, 0, 16, 16), &mut last_bg, &mut out2);
        assert_eq!(&out2[..], &[0x00]);
    }

    #[test]
    fn two_colour_tile_uses_foreground_subrects() {
        let (mut fb, enc, pf) = setup();
        fb.fill_rect(0, 0, 16, 16, 0);
        fb.fill_rect(2, 3, 4, 1, 15);
        let mut out = BytesMut::new();
        let mut last_bg = None;
        encode_hextile(&fb, &enc, &pf, Rect::new(0, 0, 16, 16), &mut last_bg, &mut out);
        let mask = out[0];
        assert_ne!(mask & HEXTILE_FOREGROUND_SPECIFIED, 0);
        assert_ne!(mask & HEXTILE_ANY_SUBRECTS, 0);
        assert_eq!(mask & HEXTILE_SUBRECTS_COLOURED, 0);
        // mask, bg, fg, count, one subrect (xy, wh).
        assert_eq!(out.len(), 1 + 1 + 1 + 1 + 2);
        assert_eq!(out[3], 1); // one subrect
        assert_eq!(out[4], 2 << 4 | 3);
        assert_eq!(out[5], 3 << 4);
    }

    #[test]
    fn tile_areas_cover_rect_exactly() {
        // 40x24 rect: tiles 16,16,8 x 16,8 — areas must sum to w*h.
        let mut total = 0;
        let (w, h) = (40usize, 24usize);
        let mut y = 0;
        while y < h {
            let th = TILE.min(h - y);
            let mut x = 0;
            while x < w {
                let tw = TILE.min(w - x);
                assert!(tw <= 16 && th <= 16);
                total += tw * th;
                x += TILE;
            }
            y += TILE;
        }
        assert_eq!(total, w * h);
    }

    #[test]
    fn noisy_tile_falls_back_to_raw() {
        let (mut fb, enc, pf) = setup();
        // Checker of many colours: every pixel distinct along the diagonal.
        for y in 0..16 {
            for x in 0..16 {
                fb.fill_rect(x, y, 1, 1, ((x * 7 + y * 13) % 16) as u8);
            }
        }
        let mut out = BytesMut::new();
        let mut last_bg = Some(99);
        encode_hextile(&fb, &enc, &pf, Rect::new(0, 0, 16, 16), &mut last_bg, &mut out);
        assert_eq!(out[0] & HEXTILE_RAW, HEXTILE_RAW);
        assert_eq!(out.len(), 1 + 256);
        assert_eq!(last_bg, None);
    }
}
