//! RFB pixel formats and the per-client raw encoder.
//!
//! Every client declares a true-colour pixel format (SetPixelFormat or the
//! ServerInit default). When it matches the internal framebuffer bit for
//! bit, rectangles are copied straight out of the framebuffer (the
//! zero-copy path); otherwise each pixel is unpacked into channels,
//! rescaled by `(client_max + 1) / (native_max + 1)`, repacked with the
//! client's shifts, and serialised in the client's byte order.

use bytes::{BufMut, BytesMut};

use crate::error::ProtocolError;
use crate::render::{Depth, Framebuffer};
use crate::system::Rect;

/// The 16-byte RFB PIXEL_FORMAT block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    pub bits_per_pixel: u8,
    pub depth: u8,
    pub big_endian: bool,
    pub true_colour: bool,
    pub red_max: u16,
    pub green_max: u16,
    pub blue_max: u16,
    pub red_shift: u8,
    pub green_shift: u8,
    pub blue_shift: u8,
}

impl PixelFormat {
    /// The server's native format for the internal framebuffer depth.
    pub fn native(depth: Depth) -> Self {
        let (red_max, green_max, blue_max) = depth.maxes();
        let (red_shift, green_shift, blue_shift) = depth.shifts();
        Self {
            bits_per_pixel: depth.bits_per_pixel(),
            depth: depth.depth_bits(),
            big_endian: cfg!(target_endian = "big"),
            true_colour: true,
            red_max,
            green_max,
            blue_max,
            red_shift,
            green_shift,
            blue_shift,
        }
    }

    /// Decode the wire block (16 bytes; caller guarantees the length).
    pub fn parse(b: &[u8]) -> Self {
        Self {
            bits_per_pixel: b[0],
            depth: b[1],
            big_endian: b[2] != 0,
            true_colour: b[3] != 0,
            red_max: u16::from_be_bytes([b[4], b[5]]),
            green_max: u16::from_be_bytes([b[6], b[7]]),
            blue_max: u16::from_be_bytes([b[8], b[9]]),
            red_shift: b[10],
            green_shift: b[11],
            blue_shift: b[12],
        }
    }

    pub fn write_to(&self, out: &mut BytesMut) {
        out.put_u8(self.bits_per_pixel);
        out.put_u8(self.depth);
        out.put_u8(u8::from(self.big_endian));
        out.put_u8(u8::from(self.true_colour));
        out.put_u16(self.red_max);
        out.put_u16(self.green_max);
        out.put_u16(self.blue_max);
        out.put_u8(self.red_shift);
        out.put_u8(self.green_shift);
        out.put_u8(self.blue_shift);
        out.put_bytes(0, 3);
    }

    pub fn bytes_per_pixel(&self) -> usize {
        usize::from(self.bits_per_pixel) / 8
    }

    /// Formats the server refuses to serve.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if !self.true_colour || !matches!(self.bits_per_pixel, 8 | 16 | 32) {
            return Err(ProtocolError::UnsupportedPixelFormat(
                self.bits_per_pixel,
                self.true_colour,
            ));
        }
        Ok(())
    }

    /// True when pixels can be copied from the framebuffer untouched.
    pub fn matches_native(&self, depth: Depth) -> bool {
        *self == Self::native(depth)
    }
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// Per-client raw pixel encoder, chosen at SetPixelFormat time.
#[derive(Debug, Clone)]
pub enum PixelEncoder {
    /// Client format equals the framebuffer format.
    ZeroCopy,
    /// Channel-rescaling converter.
    Convert { format: PixelFormat },
}

impl PixelEncoder {
    pub fn select(format: PixelFormat, native_depth: Depth) -> Self {
        if format.matches_native(native_depth) {
            PixelEncoder::ZeroCopy
        } else {
            PixelEncoder::Convert { format }
        }
    }

    /// Translate one native pixel value into the client's value space.
    pub fn convert(&self, native: u32, depth: Depth) -> u32 {
        match self {
            PixelEncoder::ZeroCopy => native,
            PixelEncoder::Convert { format } => {
                let (smr, smg, smb) = depth.maxes();
                let (ssr, ssg, ssb) = depth.shifts();
                let rescale = |v: u32, smax: u16, cmax: u16| {
                    v * (u32::from(cmax) + 1) / (u32::from(smax) + 1)
                };
                let r = rescale(native >> ssr & u32::from(smr), smr, format.red_max);
                let g = rescale(native >> ssg & u32::from(smg), smg, format.green_max);
                let b = rescale(native >> ssb & u32::from(smb), smb, format.blue_max);
                r << format.red_shift | g << format.green_shift | b << format.blue_shift
            }
        }
    }

    /// Serialise one client-space pixel value in the client's byte order.
    pub fn put_px(&self, out: &mut BytesMut, value: u32, format: &PixelFormat) {
        match (format.bytes_per_pixel(), format.big_endian) {
            (1, _) => out.put_u8(value as u8),
            (2, true) => out.put_u16(value as u16),
            (2, false) => out.put_u16_le(value as u16),
            (_, true) => out.put_u32(value),
            (_, false) => out.put_u32_le(value),
        }
    }

    /// Append the Raw-encoding payload for `rect`.
    pub fn encode_raw(&self, fb: &Framebuffer, rect: Rect, format: &PixelFormat, out: &mut BytesMut) {
        match self {
            PixelEncoder::ZeroCopy => {
                let bpp = fb.bytes_per_pixel();
                let stride = fb.stride();
                out.reserve(rect.w * rect.h * bpp);
                for y in rect.y..rect.y + rect.h {
                    let start = y * stride + rect.x * bpp;
                    out.put_slice(&fb.data()[start..start + rect.w * bpp]);
                }
            }
            PixelEncoder::Convert { .. } => {
                out.reserve(rect.w * rect.h * format.bytes_per_pixel());
                for y in rect.y..rect.y + rect.h {
                    for x in rect.x..rect.x + rect.w {
                        let v = self.convert(fb.pixel_at(x, y), fb.depth());
                        self.put_px(out, v, format);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_block_round_trip() {
        let pf = PixelFormat::native(Depth::D16);
        let mut buf = BytesMut::new();
        pf.write_to(&mut buf);
        assert_eq!(buf.len(), 16);
        assert_eq!(PixelFormat::parse(&buf), pf);
    }

    #[test]
    fn native_block_for_depth_8() {
        let pf = PixelFormat::native(Depth::D8);
        assert_eq!(pf.bits_per_pixel, 8);
        assert_eq!(pf.depth, 8);
        assert_eq!((pf.red_max, pf.green_max, pf.blue_max), (7, 7, 3));
        assert_eq!((pf.red_shift, pf.green_shift, pf.blue_shift), (5, 2, 0));
    }

    #[test]
    fn validate_rejects_odd_formats() {
        let mut pf = PixelFormat::native(Depth::D32);
        pf.true_colour = false;
        assert!(pf.validate().is_err());
        let mut pf = PixelFormat::native(Depth::D32);
        pf.bits_per_pixel = 24;
        assert!(pf.validate().is_err());
    }

    #[test]
    fn zero_copy_output_equals_framebuffer_bytes() {
        let mut fb = Framebuffer::new(8, 4, Depth::D32);
        fb.fill_rect(0, 0, 8, 4, 11);
        let pf = PixelFormat::native(Depth::D32);
        let enc = PixelEncoder::select(pf, Depth::D32);
        assert!(matches!(enc, PixelEncoder::ZeroCopy));
        let mut out = BytesMut::new();
        enc.encode_raw(&fb, Rect::new(0, 0, 8, 4), &pf, &mut out);
        assert_eq!(&out[..], fb.data());
    }

    #[test]
    fn convert_rescales_channels() {
        // Native D16 red (5 bits, max 31) into client 32bpp (max 255).
        let client = PixelFormat {
            bits_per_pixel: 32,
            depth: 24,
            big_endian: false,
            true_colour: true,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 16,
            green_shift: 8,
            blue_shift: 0,
        };
        let enc = PixelEncoder::select(client, Depth::D16);
        let native_red = 31u32 << 11;
        let v = enc.convert(native_red, Depth::D16);
        assert_eq!(v >> 16 & 0xFF, 31 * 256 / 32);
        assert_eq!(v & 0xFFFF, 0);
    }

    #[test]
    fn eight_bpp_bgr233_client() {
        let client = PixelFormat {
            bits_per_pixel: 8,
            depth: 8,
            big_endian: false,
            true_colour: true,
            red_max: 7,
            green_max: 7,
            blue_max: 3,
            red_shift: 0,
            green_shift: 3,
            blue_shift: 6,
        };
        let enc = PixelEncoder::select(client, Depth::D32);
        // Pure white native.
        let v = enc.convert(0x00FF_FFFF, Depth::D32);
        assert_eq!(v, 7 | 7 << 3 | 3 << 6);
        let mut out = BytesMut::new();
        enc.put_px(&mut out, v, &client);
        assert_eq!(&out[..], &[0xFF]);
    }
}
