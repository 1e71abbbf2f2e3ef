//! Hardware cursor test

use std::io;

use drm::{buffer::DrmFourcc, control::Device as ControlDevice, DriverCapability};
use tracing::debug;

use super::{dumb::DumbBuffer, AccessError, DrmOutput};
use crate::utils::Mapping;

const SET_CURSOR_IOCTL: &str = "DRM_IOCTL_MODE_CURSOR2";
const MOVE_CURSOR_IOCTL: &str = "DRM_IOCTL_MODE_CURSOR";

/// A cursor image shown on an output
#[derive(Debug)]
pub struct Cursor {
    buffer: DumbBuffer,
    _mapping: Mapping,
    size: (u32, u32),
}

impl Cursor {
    /// Creates a cursor of the size the driver asks for and fills it with the test pattern.
    pub fn new(output: &DrmOutput) -> Result<Cursor, AccessError> {
        let card = output.card();
        let (width, height) = cursor_size(
            card.cap(DriverCapability::CursorWidth)?,
            card.cap(DriverCapability::CursorHeight)?,
        )
        .map_err(|source| card.access_error("Invalid cursor size", source))?;
        debug!(width, height, "cursor size");

        let buffer = DumbBuffer::with_bpp(card, (width, height), DrmFourcc::Argb8888, 32)?;
        let mut mapping = buffer.map()?;
        let pitch = buffer.view().pitch as usize;
        if let Some(mem) = mapping.as_mut_slice() {
            for (y, line) in mem.chunks_exact_mut(pitch).take(height as usize).enumerate() {
                for (x, pixel) in line.chunks_exact_mut(4).take(width as usize).enumerate() {
                    pixel.copy_from_slice(&pattern(x as u32, y as u32, width, height).to_le_bytes());
                }
            }
        }

        Ok(Cursor {
            buffer,
            _mapping: mapping,
            size: (width, height),
        })
    }

    /// Shows the cursor in the middle of the screen, hotspot at the cursor centre.
    #[allow(deprecated)]
    pub fn show(&self, output: &DrmOutput) -> Result<(), AccessError> {
        let card = output.card();
        let (w, h) = output.size();
        let (cw, ch) = self.size;
        let view = self.buffer.view();
        card.set_cursor2(output.crtc(), Some(&view), ((cw / 2) as i32, (ch / 2) as i32))
            .map_err(|source| card.access_error(SET_CURSOR_IOCTL, source))?;
        card.move_cursor(output.crtc(), ((w / 2) as i32, (h / 2) as i32))
            .map_err(|source| card.access_error(MOVE_CURSOR_IOCTL, source))
    }
}

/// Checks the cursor size reported by the `CURSOR_WIDTH`/`CURSOR_HEIGHT` caps.
fn cursor_size(width: u64, height: u64) -> io::Result<(u32, u32)> {
    match (u32::try_from(width), u32::try_from(height)) {
        (Ok(w), Ok(h)) if w > 0 && h > 0 => Ok((w, h)),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("driver reports cursor size {}x{}", width, height),
        )),
    }
}

/// ARGB value of the cursor test image at `(x, y)`.
///
/// An opaque white border, a white diagonal band fading in from left to right,
/// transparent everywhere else.
pub fn pattern(x: u32, y: u32, width: u32, height: u32) -> u32 {
    if x == 0 || y == 0 || x == width - 1 || y == height - 1 {
        0xffff_ffff
    } else if x.abs_diff(y) <= 2 {
        let alpha = x * 256 / height;
        0x00ff_ffff | (alpha << 24)
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::{cursor_size, pattern, MOVE_CURSOR_IOCTL, SET_CURSOR_IOCTL};

    #[test]
    fn ioctl_names() {
        // set_cursor2 issues CURSOR2, move_cursor the plain CURSOR ioctl
        assert_eq!(SET_CURSOR_IOCTL, "DRM_IOCTL_MODE_CURSOR2");
        assert_eq!(MOVE_CURSOR_IOCTL, "DRM_IOCTL_MODE_CURSOR");
    }

    #[test]
    fn zero_cursor_size_is_rejected() {
        assert_eq!(cursor_size(64, 64).unwrap(), (64, 64));
        assert_eq!(cursor_size(256, 128).unwrap(), (256, 128));
        assert!(cursor_size(0, 64).is_err());
        assert!(cursor_size(64, 0).is_err());
        assert!(cursor_size(u64::MAX, 64).is_err());
    }

    #[test]
    fn border_is_opaque_white() {
        for i in 0..64 {
            assert_eq!(pattern(i, 0, 64, 64), 0xffffffff);
            assert_eq!(pattern(0, i, 64, 64), 0xffffffff);
            assert_eq!(pattern(i, 63, 64, 64), 0xffffffff);
            assert_eq!(pattern(63, i, 64, 64), 0xffffffff);
        }
    }

    #[test]
    fn diagonal_band() {
        assert_eq!(pattern(32, 32, 64, 64), 0x80ffffff);
        assert_eq!(pattern(32, 30, 64, 64), 0x80ffffff);
        assert_eq!(pattern(30, 32, 64, 64), 0x78ffffff);
        assert_eq!(pattern(1, 1, 64, 64), 0x04ffffff);
        assert_eq!(pattern(32, 29, 64, 64), 0);
        assert_eq!(pattern(29, 32, 64, 64), 0);
    }

    #[test]
    fn transparent_elsewhere() {
        assert_eq!(pattern(10, 40, 64, 64), 0);
        assert_eq!(pattern(40, 10, 64, 64), 0);
    }
}
