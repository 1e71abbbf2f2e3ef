//! Legacy framebuffer devices (`/dev/fbN`)
//!
//! [`FbInfo::query`] reads the fixed and variable screen info of a device. An
//! [`FbDevice`] additionally switches the console to graphics mode, maps the video
//! memory and installs a linear palette; everything is restored on drop.

use std::{
    ffi::CStr,
    fmt, io,
    os::unix::io::{AsFd, AsRawFd, BorrowedFd, OwnedFd},
    path::PathBuf,
};

use rustix::fs::OFlags;
use tracing::{debug, info, info_span, warn};

use crate::{
    format::{self, Channel, FbFormat},
    session::{self, Session},
    utils::Mapping,
};

mod ffi;

/// Errors of the framebuffer device access
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The device could not be opened
    #[error(transparent)]
    Open(#[from] session::Error),
    /// An ioctl failed
    #[error("ioctl {op}: {source}")]
    Ioctl {
        /// The failing request
        op: &'static str,
        /// Underlying error
        #[source]
        source: io::Error,
    },
    /// Only packed pixel layouts are supported
    #[error("can handle only packed pixel frame buffers")]
    NotPackedPixels,
    /// No known format matches the bitfields
    #[error("unsupported framebuffer format ({0} bpp)")]
    UnsupportedFormat(u32),
    /// Mapping the video memory failed
    #[error("mmap: {0}")]
    Mmap(#[source] io::Error),
}

fn ioctl_error(op: &'static str) -> impl FnOnce(nix::Error) -> Error {
    move |err| Error::Ioctl {
        op,
        source: err.into(),
    }
}

/// Path of framebuffer device `nr`
pub fn fb_path(nr: u32) -> PathBuf {
    PathBuf::from(format!("/dev/fb{}", nr))
}

/// Color channel description of the variable screen info
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bitfield {
    /// Position of the least significant bit
    pub offset: u32,
    /// Width in bits
    pub length: u32,
}

impl From<ffi::fb_bitfield> for Bitfield {
    fn from(field: ffi::fb_bitfield) -> Self {
        Bitfield {
            offset: field.offset,
            length: field.length,
        }
    }
}

/// Screen information of a framebuffer device
#[derive(Debug, Clone)]
pub struct FbInfo {
    fix: ffi::fb_fix_screeninfo,
    var: ffi::fb_var_screeninfo,
}

impl FbInfo {
    /// Reads fixed and variable screen info from an open device.
    pub fn query<F: AsFd>(fd: F) -> Result<FbInfo, Error> {
        let fd = fd.as_fd().as_raw_fd();
        let mut fix = ffi::fb_fix_screeninfo::default();
        let mut var = ffi::fb_var_screeninfo::default();
        // SAFETY: both structs match the kernel layout
        unsafe {
            ffi::fbioget_fscreeninfo(fd, &mut fix).map_err(ioctl_error("FBIOGET_FSCREENINFO"))?;
            ffi::fbioget_vscreeninfo(fd, &mut var).map_err(ioctl_error("FBIOGET_VSCREENINFO"))?;
        }
        Ok(FbInfo { fix, var })
    }

    /// Driver identification
    pub fn id(&self) -> String {
        let bytes = self.fix.id.map(|c| c as u8);
        CStr::from_bytes_until_nul(&bytes)
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Visible resolution
    pub fn size(&self) -> (u32, u32) {
        (self.var.xres, self.var.yres)
    }

    /// Bits per pixel
    pub fn bpp(&self) -> u32 {
        self.var.bits_per_pixel
    }

    /// Bytes per line
    pub fn line_length(&self) -> u32 {
        self.fix.line_length
    }

    /// Red, green, blue and alpha channels
    pub fn rgba(&self) -> [Bitfield; 4] {
        [
            self.var.red.into(),
            self.var.green.into(),
            self.var.blue.into(),
            self.var.transp.into(),
        ]
    }

    /// Finds the format table entry matching the channel layout.
    pub fn format(&self) -> Option<&'static FbFormat> {
        let [r, g, b, a] = self.rgba();
        format::find_by_layout(
            self.bpp(),
            &[
                (Channel::Red, r.offset, r.length),
                (Channel::Green, g.offset, g.length),
                (Channel::Blue, b.offset, b.length),
                (Channel::Alpha, a.offset, a.length),
            ],
        )
    }

    /// `bpp, rgba r,g,b,a` as shown in the test pattern
    pub fn depth_info(&self) -> String {
        let [r, g, b, a] = self.rgba();
        format!(
            "{} bpp, rgba {},{},{},{}",
            self.bpp(),
            r.length,
            g.length,
            b.length,
            a.length
        )
    }

    fn is_direct_color(&self) -> bool {
        self.fix.visual == ffi::FB_VISUAL_DIRECTCOLOR
    }

    fn has_cmap(&self) -> bool {
        self.var.bits_per_pixel == 8 || self.is_direct_color()
    }
}

/// One line summary: `fbN: id, WxH, N bpp, r/g/b/a R/G/B/A`
#[derive(Debug)]
pub struct Summary<'a>(pub u32, pub &'a FbInfo);

impl fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Summary(nr, info) = self;
        let (w, h) = info.size();
        let [r, g, b, a] = info.rgba();
        write!(
            f,
            "fb{}: {}, {}x{}, {} bpp, r/g/b/a {}/{}/{}/{}",
            nr,
            info.id(),
            w,
            h,
            info.bpp(),
            r.length,
            g.length,
            b.length,
            a.length
        )
    }
}

/// Opens `/dev/fb<nr>` and queries it.
pub fn query<S>(nr: u32, session: &mut S) -> Result<FbInfo, Error>
where
    S: Session,
    session::Error: From<S::Error>,
{
    let fd = session
        .open(&fb_path(nr), OFlags::RDWR)
        .map_err(session::Error::from)?;
    FbInfo::query(&fd)
}

/// A color map as used by `FBIOGETCMAP`/`FBIOPUTCMAP`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    /// Red ramp
    pub red: Vec<u16>,
    /// Green ramp
    pub green: Vec<u16>,
    /// Blue ramp
    pub blue: Vec<u16>,
}

impl Palette {
    fn empty() -> Palette {
        Palette {
            red: vec![0; 256],
            green: vec![0; 256],
            blue: vec![0; 256],
        }
    }

    /// Linear ramps for channels `r`, `g` and `b` bits wide.
    pub fn linear(r: u32, g: u32, b: u32) -> Palette {
        let ramp = |bits: u32| {
            let size = 256u32 >> (8 - bits.min(8));
            (0..size).map(|i| color_scale(i, size)).collect::<Vec<_>>()
        };
        Palette {
            red: ramp(r),
            green: ramp(g),
            blue: ramp(b),
        }
    }

    /// Number of entries of the longest ramp
    pub fn len(&self) -> usize {
        self.red.len().max(self.green.len()).max(self.blue.len())
    }

    /// Returns true if all ramps are empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cmap(&mut self) -> ffi::fb_cmap {
        let len = self.len();
        for ramp in [&mut self.red, &mut self.green, &mut self.blue] {
            ramp.resize(len, 0);
        }
        ffi::fb_cmap {
            start: 0,
            len: len as u32,
            red: self.red.as_mut_ptr(),
            green: self.green.as_mut_ptr(),
            blue: self.blue.as_mut_ptr(),
            transp: std::ptr::null_mut(),
        }
    }
}

fn color_scale(n: u32, max: u32) -> u16 {
    (65535.0 * n as f32 / max as f32).clamp(0.0, 65535.0) as u16
}

/// An initialized framebuffer device, ready to draw into
pub struct FbDevice {
    fd: OwnedFd,
    nr: u32,
    info: FbInfo,
    saved_var: ffi::fb_var_screeninfo,
    saved_cmap: Option<Palette>,
    kd_mode: Option<libc::c_int>,
    format: &'static FbFormat,
    mapping: Option<Mapping>,
    span: tracing::Span,
}

impl fmt::Debug for FbDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FbDevice")
            .field("nr", &self.nr)
            .field("id", &self.info.id())
            .field("format", &self.format.name)
            .field("mapping", &self.mapping)
            .finish_non_exhaustive()
    }
}

impl AsFd for FbDevice {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl FbDevice {
    /// Opens `/dev/fb<nr>` and prepares it for drawing.
    ///
    /// Switches the console on stdin to graphics mode, pans to the upper left corner,
    /// clears the screen and installs a linear palette for direct color visuals.
    pub fn init<S>(nr: u32, session: &mut S) -> Result<FbDevice, Error>
    where
        S: Session,
        session::Error: From<S::Error>,
    {
        let span = info_span!("fbdev", device = nr);
        let _guard = span.enter();

        let kd_mode = {
            let mut mode = 0;
            // SAFETY: KDGETMODE writes a single int
            match unsafe { ffi::kd_get_mode(libc::STDIN_FILENO, &mut mode) } {
                Ok(_) => Some(mode),
                Err(err) => {
                    eprintln!("ioctl KDGETMODE: {}", io::Error::from(err));
                    None
                }
            }
        };

        let fd = session
            .open(&fb_path(nr), OFlags::RDWR)
            .map_err(session::Error::from)?;
        let saved = FbInfo::query(&fd)?;
        let saved_cmap = if saved.has_cmap() {
            let mut palette = Palette::empty();
            let mut cmap = palette.cmap();
            // SAFETY: the cmap points to three 256 entry buffers owned by palette
            unsafe { ffi::fbiogetcmap(fd.as_raw_fd(), &mut cmap) }.map_err(ioctl_error("FBIOGETCMAP"))?;
            Some(palette)
        } else {
            None
        };

        // from here on the device restores itself on drop
        let mut dev = FbDevice {
            saved_var: saved.var,
            info: saved,
            fd,
            nr,
            saved_cmap,
            kd_mode,
            format: &format::FORMATS[0],
            mapping: None,
            span: span.clone(),
        };

        if dev.kd_mode.is_some() {
            // SAFETY: plain int argument
            if let Err(err) = unsafe { ffi::kd_set_mode(libc::STDIN_FILENO, ffi::KD_GRAPHICS) } {
                eprintln!("ioctl KDSETMODE: {}", io::Error::from(err));
            }
        }

        dev.info = FbInfo::query(&dev.fd)?;
        if dev.info.fix.type_ != ffi::FB_TYPE_PACKED_PIXELS {
            return Err(Error::NotPackedPixels);
        }
        dev.format = dev
            .info
            .format()
            .ok_or(Error::UnsupportedFormat(dev.info.bpp()))?;
        info!(format = dev.format.name, id = %dev.info.id(), "framebuffer format");

        let page_mask = rustix::param::page_size() as u64 - 1;
        let offset = dev.info.fix.smem_start as u64 & page_mask;
        let len = dev.info.fix.smem_len as usize + offset as usize;
        let mapping = Mapping::new(&dev.fd, len, 0, true)
            .map_err(Error::Mmap)?
            .with_skip(offset as usize);
        debug!(len, offset, "mapped video memory");
        dev.mapping = Some(mapping);

        if dev.info.var.xoffset != 0 || dev.info.var.yoffset != 0 {
            dev.info.var.xoffset = 0;
            dev.info.var.yoffset = 0;
            // SAFETY: var info as read from the device
            unsafe { ffi::fbiopan_display(dev.fd.as_raw_fd(), &dev.info.var) }
                .map_err(ioctl_error("FBIOPAN_DISPLAY"))?;
        }

        let visible = dev.info.line_length() as usize * dev.info.var.yres as usize;
        if let Some(mem) = dev.memory() {
            let len = visible.min(mem.len());
            mem[..len].fill(0);
        }

        if dev.info.is_direct_color() {
            let [r, g, b, _] = dev.info.rgba();
            let mut palette = Palette::linear(r.length, g.length, b.length);
            let mut cmap = palette.cmap();
            // SAFETY: the cmap points to buffers of cmap.len entries owned by palette
            unsafe { ffi::fbioputcmap(dev.fd.as_raw_fd(), &mut cmap) }.map_err(ioctl_error("FBIOPUTCMAP"))?;
        }

        drop(_guard);
        Ok(dev)
    }

    /// Screen information
    pub fn info(&self) -> &FbInfo {
        &self.info
    }

    /// Pixel format of the video memory
    pub fn format(&self) -> &'static FbFormat {
        self.format
    }

    /// Device number
    pub fn nr(&self) -> u32 {
        self.nr
    }

    /// The mapped video memory, starting at the first visible pixel
    pub fn memory(&mut self) -> Option<&mut [u8]> {
        self.mapping.as_mut().and_then(|m| m.as_mut_slice())
    }
}

impl Drop for FbDevice {
    fn drop(&mut self) {
        let _guard = self.span.enter();
        self.mapping.take();
        let fd = self.fd.as_raw_fd();
        // SAFETY: var info as read from the device
        if let Err(err) = unsafe { ffi::fbioput_vscreeninfo(fd, &self.saved_var) } {
            warn!(?err, "ioctl FBIOPUT_VSCREENINFO");
        }
        if let Some(palette) = self.saved_cmap.as_mut() {
            let mut cmap = palette.cmap();
            // SAFETY: the cmap points to buffers owned by palette
            if let Err(err) = unsafe { ffi::fbioputcmap(fd, &mut cmap) } {
                warn!(?err, "ioctl FBIOPUTCMAP");
            }
        }
        if let Some(mode) = self.kd_mode {
            // SAFETY: plain int argument
            if let Err(err) = unsafe { ffi::kd_set_mode(libc::STDIN_FILENO, mode) } {
                warn!(?err, "ioctl KDSETMODE");
            }
        }
        debug!("framebuffer restored");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(bpp: u32, fields: [(u32, u32); 4]) -> FbInfo {
        let field = |(offset, length): (u32, u32)| ffi::fb_bitfield {
            offset,
            length,
            msb_right: 0,
        };
        let mut fix = ffi::fb_fix_screeninfo::default();
        fix.id[..7].copy_from_slice(&b"testfb\0".map(|c| c as libc::c_char));
        let var = ffi::fb_var_screeninfo {
            xres: 1024,
            yres: 768,
            bits_per_pixel: bpp,
            red: field(fields[0]),
            green: field(fields[1]),
            blue: field(fields[2]),
            transp: field(fields[3]),
            ..Default::default()
        };
        FbInfo { fix, var }
    }

    #[test]
    fn linear_palette() {
        let palette = Palette::linear(5, 6, 5);
        assert_eq!(palette.red.len(), 32);
        assert_eq!(palette.green.len(), 64);
        assert_eq!(palette.blue.len(), 32);
        assert_eq!(palette.len(), 64);
        assert_eq!(palette.red[0], 0);
        assert_eq!(palette.red[1], 2047);
        assert_eq!(palette.green[63], 64511);

        let palette = Palette::linear(8, 8, 8);
        assert_eq!(palette.len(), 256);
        assert_eq!(palette.blue[128], 32767);
    }

    #[test]
    fn format_matching() {
        let xrgb = info(32, [(16, 8), (8, 8), (0, 8), (0, 0)]);
        assert_eq!(xrgb.format().map(|f| f.name), Some("XR24"));

        let rgb565 = info(16, [(11, 5), (5, 6), (0, 5), (0, 0)]);
        assert_eq!(rgb565.format().map(|f| f.name), Some("RG16"));

        let odd = info(8, [(0, 3), (3, 3), (6, 2), (0, 0)]);
        assert_eq!(odd.format(), None);
    }

    #[test]
    fn summary_line() {
        let fb = info(32, [(16, 8), (8, 8), (0, 8), (24, 8)]);
        assert_eq!(
            Summary(0, &fb).to_string(),
            "fb0: testfb, 1024x768, 32 bpp, r/g/b/a 8/8/8/8"
        );
        assert_eq!(fb.depth_info(), "32 bpp, rgba 8,8,8,8");
    }
}
