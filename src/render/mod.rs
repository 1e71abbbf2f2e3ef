//! Software rendering of the test images
//!
//! Everything is drawn into a [`Canvas`] holding `x2r10g10b10` pixels, which has
//! enough precision for every format in the table. The canvas is then either packed
//! into the target buffer using the channel layout of its [`FbFormat`], or handed to
//! pixman for the conversion. The second path also fills a [`Reference`] copy which
//! the buffer contents are compared against.

use drm_fourcc::DrmFourcc;
use pixman::{FormatCode, Image, Operation};
use tracing::trace;

use crate::format::{FbFormat, Layout};

pub mod font;
mod image;
mod pattern;

pub use self::image::{draw_image, load_image, ImageError};
pub use self::pattern::{bar_height, test_pattern, PAD};

/// Errors converting the canvas into a buffer
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RenderError {
    /// pixman has no matching format
    #[error("format {0} not supported by pixman")]
    Unsupported(&'static str),
    /// pixman needs 32 bit aligned lines
    #[error("stride {0} is not a multiple of 4")]
    Stride(usize),
    /// The destination is smaller than the canvas
    #[error("buffer too small: need {expected} bytes, got {actual}")]
    BufferTooSmall {
        /// bytes needed
        expected: usize,
        /// bytes available
        actual: usize,
    },
    /// pixman refused to wrap the memory
    #[error("pixman image creation failed")]
    Pixman,
}

/// A color with 10 bit components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Color {
    /// Red, 0..=1023
    pub r: u16,
    /// Green, 0..=1023
    pub g: u16,
    /// Blue, 0..=1023
    pub b: u16,
}

impl Color {
    /// Black
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0 };
    /// White
    pub const WHITE: Color = Color {
        r: 1023,
        g: 1023,
        b: 1023,
    };

    /// Widens 8 bit components.
    pub fn from_rgb8(r: u8, g: u8, b: u8) -> Color {
        let widen = |c: u8| (u16::from(c) << 2) | (u16::from(c) >> 6);
        Color {
            r: widen(r),
            g: widen(g),
            b: widen(b),
        }
    }

    /// Pixel value in `x2r10g10b10`
    pub fn to_x2r10g10b10(self) -> u32 {
        (u32::from(self.r.min(1023)) << 20) | (u32::from(self.g.min(1023)) << 10) | u32::from(self.b.min(1023))
    }

    /// Unpacks an `x2r10g10b10` pixel value.
    pub fn from_x2r10g10b10(pixel: u32) -> Color {
        Color {
            r: ((pixel >> 20) & 0x3ff) as u16,
            g: ((pixel >> 10) & 0x3ff) as u16,
            b: (pixel & 0x3ff) as u16,
        }
    }
}

/// Drawing surface in `x2r10g10b10`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canvas {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
}

impl Canvas {
    /// Creates a black canvas.
    pub fn new(width: u32, height: u32) -> Canvas {
        Canvas {
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
        }
    }

    /// Width in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw pixel values, line by line without padding
    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    /// Color at `(x, y)`, black outside of the canvas.
    pub fn pixel(&self, x: u32, y: u32) -> Color {
        if x >= self.width || y >= self.height {
            return Color::BLACK;
        }
        Color::from_x2r10g10b10(self.pixels[(y * self.width + x) as usize])
    }

    /// Sets a single pixel, ignoring coordinates outside of the canvas.
    pub fn put(&mut self, x: u32, y: u32, color: Color) {
        if x < self.width && y < self.height {
            self.pixels[(y * self.width + x) as usize] = color.to_x2r10g10b10();
        }
    }

    /// Fills a rectangle, clipped to the canvas.
    pub fn fill_rect(&mut self, x: u32, y: u32, w: u32, h: u32, color: Color) {
        let x_end = x.saturating_add(w).min(self.width);
        let y_end = y.saturating_add(h).min(self.height);
        if x >= x_end {
            return;
        }
        let value = color.to_x2r10g10b10();
        for line in y..y_end {
            let start = (line * self.width) as usize;
            self.pixels[start + x as usize..start + x_end as usize].fill(value);
        }
    }

    /// Draws `text` with its top left corner at `(x, y)`, each font pixel `scale` pixels wide.
    pub fn draw_text(&mut self, x: u32, y: u32, text: &str, scale: u32, color: Color) {
        let scale = scale.max(1);
        for (i, c) in text.chars().enumerate() {
            let cx = x + i as u32 * font::ADVANCE * scale;
            if cx >= self.width {
                break;
            }
            for gy in 0..font::GLYPH_HEIGHT {
                for gx in 0..font::GLYPH_WIDTH {
                    if font::is_set(c, gx, gy) {
                        self.fill_rect(cx + gx * scale, y + gy * scale, scale, scale, color);
                    }
                }
            }
        }
    }

    /// Converts the canvas into `dst` using the channel layout of the target format.
    ///
    /// `dst` holds `pitch` bytes per line; lines which do not fit are skipped.
    pub fn pack_into(&self, dst: &mut [u8], pitch: usize, layout: &Layout) {
        let cpp = (layout.bpp() / 8) as usize;
        let mut cache = (u32::MAX, 0u32);
        for (y, line) in dst.chunks_mut(pitch).take(self.height as usize).enumerate() {
            let src = &self.pixels[y * self.width as usize..(y + 1) * self.width as usize];
            for (pixel, out) in src.iter().zip(line.chunks_exact_mut(cpp)) {
                if cache.0 != *pixel {
                    let c = Color::from_x2r10g10b10(*pixel);
                    cache = (*pixel, layout.pack(c.r, c.g, c.b));
                }
                layout.store(out, cache.1);
            }
        }
        trace!(w = self.width, h = self.height, pitch, "packed canvas");
    }

    /// Converts the canvas into `dst` with pixman.
    pub fn composite_into(&self, dst: &mut [u8], pitch: usize, format: &FbFormat) -> Result<(), RenderError> {
        let dst_format = format.pixman().ok_or(RenderError::Unsupported(format.name))?;
        let src_format = FormatCode::try_from(DrmFourcc::Xrgb2101010).map_err(|_| RenderError::Pixman)?;
        if pitch % 4 != 0 || dst.as_ptr() as usize % 4 != 0 {
            return Err(RenderError::Stride(pitch));
        }
        let expected = pitch * self.height as usize;
        if dst.len() < expected {
            return Err(RenderError::BufferTooSmall {
                expected,
                actual: dst.len(),
            });
        }
        let (w, h) = (self.width as usize, self.height as usize);

        // SAFETY: pixman only reads the source, both images are dropped before the borrows end
        let src = unsafe {
            Image::from_raw_mut(src_format, w, h, self.pixels.as_ptr() as *mut u32, w * 4, false)
        }
        .map_err(|_| RenderError::Pixman)?;
        // SAFETY: dst is aligned and holds `pitch * h` bytes, checked above
        let target = unsafe { Image::from_raw_mut(dst_format, w, h, dst.as_mut_ptr() as *mut u32, pitch, false) }
            .map_err(|_| RenderError::Pixman)?;

        target.composite32(Operation::Src, &src, None, (0, 0), (0, 0), (0, 0), (w as i32, h as i32));
        trace!(format = format.name, w, h, pitch, "composited canvas");
        Ok(())
    }
}

/// Reference copy of the expected buffer contents
///
/// Lines are 32 bit aligned, so pixman can write into it.
#[derive(Debug, Clone)]
pub struct Reference {
    data: Vec<u32>,
    pitch: usize,
    height: u32,
}

impl Reference {
    /// Allocates a zeroed reference with `pitch` bytes per line.
    pub fn new(pitch: usize, height: u32) -> Reference {
        let pitch = (pitch + 3) & !3;
        Reference {
            data: vec![0; pitch / 4 * height as usize],
            pitch,
            height,
        }
    }

    /// Bytes per line
    pub fn pitch(&self) -> usize {
        self.pitch
    }

    /// Number of lines
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Contents
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: u32 has no invalid byte patterns and a stricter alignment than u8
        unsafe { std::slice::from_raw_parts(self.data.as_ptr() as *const u8, self.data.len() * 4) }
    }

    /// Mutable contents
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above, borrowed mutably through self
        unsafe { std::slice::from_raw_parts_mut(self.data.as_mut_ptr() as *mut u8, self.data.len() * 4) }
    }
}

/// Compares two images line by line.
///
/// Only the first `line_len` bytes of each line are compared, padding may differ.
/// Returns the number of the first mismatching line.
pub fn compare_lines(
    a: &[u8],
    pitch_a: usize,
    b: &[u8],
    pitch_b: usize,
    line_len: usize,
    height: u32,
) -> Result<(), usize> {
    for line in 0..height as usize {
        let la = a.get(line * pitch_a..line * pitch_a + line_len);
        let lb = b.get(line * pitch_b..line * pitch_b + line_len);
        match (la, lb) {
            (Some(la), Some(lb)) if la == lb => continue,
            _ => return Err(line),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::find;

    #[test]
    fn color_conversion() {
        assert_eq!(Color::WHITE.to_x2r10g10b10(), 0x3fff_ffff);
        assert_eq!(Color::from_rgb8(255, 0, 128), Color { r: 1023, g: 0, b: 514 });
        let c = Color { r: 1, g: 512, b: 1000 };
        assert_eq!(Color::from_x2r10g10b10(c.to_x2r10g10b10()), c);
    }

    #[test]
    fn rect_clipping() {
        let mut canvas = Canvas::new(4, 3);
        canvas.fill_rect(2, 1, 10, 10, Color::WHITE);
        assert_eq!(canvas.pixel(1, 1), Color::BLACK);
        assert_eq!(canvas.pixel(2, 1), Color::WHITE);
        assert_eq!(canvas.pixel(3, 2), Color::WHITE);
        assert_eq!(canvas.pixel(3, 0), Color::BLACK);
        canvas.fill_rect(5, 0, 1, 1, Color::WHITE);
        canvas.put(7, 7, Color::WHITE);
    }

    #[test]
    fn text() {
        let mut canvas = Canvas::new(20, 10);
        canvas.draw_text(1, 1, "T", 2, Color::WHITE);
        // top bar of the T spans 10 pixels at scale 2
        assert!((1..11).all(|x| canvas.pixel(x, 1) == Color::WHITE));
        assert_eq!(canvas.pixel(11, 1), Color::BLACK);
        // stem
        assert_eq!(canvas.pixel(5, 9), Color::WHITE);
        assert_eq!(canvas.pixel(3, 9), Color::BLACK);
    }

    #[test]
    fn pack_formats() {
        let mut canvas = Canvas::new(2, 2);
        canvas.put(0, 0, Color { r: 1023, g: 0, b: 0 });
        canvas.put(1, 1, Color::WHITE);

        let xr24 = find("XR24").unwrap().layout().unwrap();
        let mut buf = vec![0u8; 12 * 2];
        canvas.pack_into(&mut buf, 12, &xr24);
        assert_eq!(&buf[0..4], &[0x00, 0x00, 0xff, 0xff]);
        assert_eq!(&buf[4..8], &[0x00, 0x00, 0x00, 0xff]);
        assert_eq!(&buf[8..12], &[0; 4], "padding is untouched");
        assert_eq!(&buf[16..20], &[0xff; 4]);

        let rg16 = find("RG16").unwrap().layout().unwrap();
        let mut buf = vec![0u8; 4 * 2];
        canvas.pack_into(&mut buf, 4, &rg16);
        assert_eq!(&buf[0..2], &0xf800u16.to_le_bytes());
        assert_eq!(&buf[6..8], &0xffffu16.to_le_bytes());
    }

    #[test]
    fn composite_xrgb() {
        let mut canvas = Canvas::new(8, 4);
        canvas.fill_rect(0, 0, 4, 4, Color::WHITE);
        let format = find("XR24").unwrap();

        let mut out = Reference::new(32, 4);
        canvas.composite_into(out.as_bytes_mut(), 32, format).unwrap();
        let bytes = out.as_bytes();
        for line in 0..4 {
            let white = &bytes[line * 32..line * 32 + 4];
            let black = &bytes[line * 32 + 16..line * 32 + 20];
            assert_eq!(&white[..3], &[0xff, 0xff, 0xff]);
            assert_eq!(&black[..3], &[0, 0, 0]);
        }
    }

    #[test]
    fn composite_checks_buffer() {
        let canvas = Canvas::new(8, 4);
        let format = find("XR24").unwrap();
        let mut small = Reference::new(32, 2);
        assert_eq!(
            canvas.composite_into(small.as_bytes_mut(), 32, format),
            Err(RenderError::BufferTooSmall {
                expected: 128,
                actual: 64
            })
        );
        let mut odd = Reference::new(32, 4);
        assert_eq!(
            canvas.composite_into(odd.as_bytes_mut(), 30, format),
            Err(RenderError::Stride(30))
        );
    }

    #[test]
    fn reference_alignment() {
        let reference = Reference::new(30, 3);
        assert_eq!(reference.pitch(), 32);
        assert_eq!(reference.as_bytes().len(), 96);
        assert_eq!(reference.height(), 3);
    }

    #[test]
    fn line_compare() {
        let a = [1u8, 2, 3, 9, 4, 5, 6, 9];
        let b = [1u8, 2, 3, 4, 5, 6];
        assert_eq!(compare_lines(&a, 4, &b, 3, 3, 2), Ok(()));
        let c = [1u8, 2, 3, 4, 5, 7];
        assert_eq!(compare_lines(&a, 4, &c, 3, 3, 2), Err(1));
        assert_eq!(compare_lines(&a, 4, &b[..4], 3, 3, 2), Err(1));
    }
}
