//! Packed 1-bit bitmap handed to the printer transport.

use image::{GrayImage, Luma};

use crate::{ConvertError, Result};

/// A monochrome bitmap packed 8 pixels per byte.
///
/// Bit 7 of each byte is the leftmost pixel. A set bit is a printed (black)
/// dot. `width` is always a multiple of 8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrinterImage {
    width: u32,
    height: u32,
    bits: Vec<u8>,
}

impl PrinterImage {
    /// Wrap an already packed buffer, checking the size invariant.
    pub fn from_bits(width: u32, height: u32, bits: Vec<u8>) -> Result<Self> {
        if width == 0 || width % 8 != 0 {
            return Err(ConvertError::Validation(format!(
                "bitmap width must be a positive multiple of 8, got {width}"
            )));
        }
        if height == 0 {
            return Err(ConvertError::Validation(
                "bitmap height must be greater than 0".into(),
            ));
        }
        let expected = (width / 8) as usize * height as usize;
        if bits.len() != expected {
            return Err(ConvertError::Validation(format!(
                "bitmap buffer must be {expected} bytes, got {}",
                bits.len()
            )));
        }
        Ok(Self {
            width,
            height,
            bits,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bits(&self) -> &[u8] {
        &self.bits
    }

    pub fn into_bits(self) -> Vec<u8> {
        self.bits
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        (self.width / 8) as usize
    }

    /// Whether the dot at `(x, y)` is printed.
    pub fn pixel(&self, x: u32, y: u32) -> bool {
        let byte = self.bits[y as usize * self.stride() + (x / 8) as usize];
        byte & (0x80 >> (x % 8)) != 0
    }

    /// Unpack into rows of one byte per pixel (0 = white, 1 = black),
    /// the row format printer protocols encode from.
    pub fn to_rows(&self) -> Vec<Vec<u8>> {
        self.bits
            .chunks(self.stride())
            .map(|row| {
                row.iter()
                    .flat_map(|&byte| (0..8).map(move |bit| (byte >> (7 - bit)) & 1))
                    .collect()
            })
            .collect()
    }

    /// Render as a grayscale preview (printed dots are black).
    pub fn to_luma(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            if self.pixel(x, y) {
                Luma([0])
            } else {
                Luma([255])
            }
        })
    }

    /// Encode as a binary PBM (P4) file. P4 uses the same MSB-first packing
    /// with 1 = black, so the buffer is written as is.
    pub fn to_pbm(&self) -> Vec<u8> {
        let header = format!("P4\n{} {}\n", self.width, self.height);
        let mut out = Vec::with_capacity(header.len() + self.bits.len());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&self.bits);
        out
    }
}
