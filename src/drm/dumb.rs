//! Dumb buffers and the framebuffers attached to them

use std::{
    num::NonZeroU32,
    os::unix::io::{AsFd, BorrowedFd, OwnedFd},
};

use drm::{
    buffer::{Buffer as DrmBuffer, DrmFourcc, DrmModifier, Handle, PlanarBuffer},
    control::{dumbbuffer, framebuffer, Device as ControlDevice, FbCmd2Flags},
};
use tracing::{debug, trace, warn};

use super::{AccessError, DrmCard};
use crate::{format::FbFormat, utils::Mapping};

/// Buffer object size used to probe formats
pub const PROBE_SIZE: (u32, u32) = (64, 64);

/// Plain description of a single-plane buffer object
///
/// Used to attach framebuffers to buffers which were not created as dumb buffers
/// on the same device, like imported dma-bufs or virtio-gpu resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferView {
    /// GEM handle
    pub handle: Handle,
    /// Width and height in pixels
    pub size: (u32, u32),
    /// Bytes per line
    pub pitch: u32,
    /// Memory layout
    pub format: DrmFourcc,
}

impl BufferView {
    /// Builds a view from a raw GEM handle, `None` for the invalid handle 0.
    pub fn from_raw(handle: u32, size: (u32, u32), pitch: u32, format: DrmFourcc) -> Option<BufferView> {
        NonZeroU32::new(handle).map(|handle| BufferView {
            handle: Handle::from(handle),
            size,
            pitch,
            format,
        })
    }

    /// Size of the buffer contents in bytes
    pub fn len(&self) -> usize {
        self.pitch as usize * self.size.1 as usize
    }

    /// Returns true if the buffer has no pixels
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DrmBuffer for BufferView {
    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn format(&self) -> DrmFourcc {
        self.format
    }

    fn pitch(&self) -> u32 {
        self.pitch
    }

    fn handle(&self) -> Handle {
        self.handle
    }
}

impl PlanarBuffer for BufferView {
    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn format(&self) -> DrmFourcc {
        self.format
    }

    fn modifier(&self) -> Option<DrmModifier> {
        None
    }

    fn pitches(&self) -> [u32; 4] {
        [self.pitch, 0, 0, 0]
    }

    fn handles(&self) -> [Option<Handle>; 4] {
        [Some(self.handle), None, None, None]
    }

    fn offsets(&self) -> [u32; 4] {
        [0, 0, 0, 0]
    }
}

/// A dumb buffer, destroyed on drop
#[derive(Debug)]
pub struct DumbBuffer {
    card: DrmCard,
    buffer: Option<dumbbuffer::DumbBuffer>,
    view: BufferView,
}

impl DumbBuffer {
    /// Creates a dumb buffer with the bpp of `format`.
    pub fn new(card: &DrmCard, size: (u32, u32), format: &FbFormat) -> Result<DumbBuffer, AccessError> {
        DumbBuffer::with_bpp(card, size, format.fourcc, format.bpp)
    }

    /// Creates a dumb buffer with an explicit bpp.
    pub fn with_bpp(
        card: &DrmCard,
        size: (u32, u32),
        fourcc: DrmFourcc,
        bpp: u32,
    ) -> Result<DumbBuffer, AccessError> {
        let buffer = card
            .create_dumb_buffer(size, fourcc, bpp)
            .map_err(|source| card.access_error("DRM_IOCTL_MODE_CREATE_DUMB", source))?;
        let view = BufferView {
            handle: DrmBuffer::handle(&buffer),
            size: DrmBuffer::size(&buffer),
            pitch: DrmBuffer::pitch(&buffer),
            format: fourcc,
        };
        trace!(handle = ?view.handle, ?size, pitch = view.pitch, bpp, "created dumb buffer");
        Ok(DumbBuffer {
            card: card.clone(),
            buffer: Some(buffer),
            view,
        })
    }

    /// Description of the buffer
    pub fn view(&self) -> BufferView {
        self.view
    }

    /// Maps the buffer read-write.
    pub fn map(&self) -> Result<Mapping, AccessError> {
        let map = drm_ffi::mode::dumbbuffer::map(self.card.as_fd(), u32::from(self.view.handle), 0, 0)
            .map_err(|source| self.card.access_error("DRM_IOCTL_MODE_MAP_DUMB", source))?;
        Mapping::new(&self.card, self.view.len(), map.offset, true)
            .map_err(|source| self.card.access_error("framebuffer mmap", source))
    }

    /// Exports the buffer as dma-buf.
    pub fn export(&self) -> Result<OwnedFd, AccessError> {
        export(&self.card, self.view.handle)
    }
}

impl Drop for DumbBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            trace!(handle = ?self.view.handle, "destroying dumb buffer");
            if let Err(err) = self.card.destroy_dumb_buffer(buffer) {
                warn!(?err, "failed to destroy dumb buffer");
            }
        }
    }
}

/// Exports a GEM handle as dma-buf.
pub fn export(card: &DrmCard, handle: Handle) -> Result<OwnedFd, AccessError> {
    let flags = (libc::O_CLOEXEC | libc::O_RDWR) as u32;
    card.buffer_to_prime_fd(handle, flags)
        .map_err(|source| card.access_error("drmPrimeHandleToFD", source))
}

/// A buffer object imported from a dma-buf, its handle is closed on drop
#[derive(Debug)]
pub struct ImportedBuffer {
    card: DrmCard,
    view: BufferView,
}

impl ImportedBuffer {
    /// Imports `fd` into `card`, taking size, pitch and format from the exporting side.
    pub fn import(card: &DrmCard, fd: BorrowedFd<'_>, like: &BufferView) -> Result<ImportedBuffer, AccessError> {
        let handle = card
            .prime_fd_to_buffer(fd)
            .map_err(|source| card.access_error("drmPrimeFDToHandle", source))?;
        debug!(?handle, "imported dma-buf");
        Ok(ImportedBuffer {
            card: card.clone(),
            view: BufferView { handle, ..*like },
        })
    }

    /// Description of the buffer
    pub fn view(&self) -> BufferView {
        self.view
    }
}

impl Drop for ImportedBuffer {
    fn drop(&mut self) {
        if let Err(err) = drm_ffi::gem::close(self.card.as_fd(), u32::from(self.view.handle)) {
            warn!(?err, "failed to close gem handle");
        }
    }
}

/// A framebuffer, removed on drop
#[derive(Debug)]
pub struct Framebuffer {
    card: DrmCard,
    fb: framebuffer::Handle,
}

impl Framebuffer {
    /// Attaches a framebuffer to `buffer`.
    ///
    /// Legacy formats use `ADDFB` with depth and bpp, all others `ADDFB2` with the fourcc.
    pub fn add(card: &DrmCard, buffer: &BufferView, format: &FbFormat) -> Result<Framebuffer, AccessError> {
        let fb = if format.legacy {
            card.add_framebuffer(buffer, format.depth, format.bpp)
                .map_err(|source| card.access_error("drmModeAddFB() failed", source))?
        } else {
            card.add_planar_framebuffer(buffer, FbCmd2Flags::empty())
                .map_err(|source| card.access_error("drmModeAddFB2() failed", source))?
        };
        trace!(?fb, format = format.name, "added framebuffer");
        Ok(Framebuffer { card: card.clone(), fb })
    }

    /// Wraps a framebuffer created elsewhere.
    pub fn from_handle(card: &DrmCard, fb: framebuffer::Handle) -> Framebuffer {
        Framebuffer { card: card.clone(), fb }
    }

    /// The framebuffer handle
    pub fn handle(&self) -> framebuffer::Handle {
        self.fb
    }
}

impl AsRef<framebuffer::Handle> for Framebuffer {
    fn as_ref(&self) -> &framebuffer::Handle {
        &self.fb
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        trace!(fb = ?self.fb, "destroying framebuffer");
        if let Err(err) = self.card.destroy_framebuffer(self.fb) {
            warn!(fb = ?self.fb, ?err, "failed to destroy framebuffer");
        }
    }
}

/// Checks whether the device can create framebuffers in `format`.
///
/// Creates a small dumb buffer and attaches a framebuffer, both are removed again.
pub fn probe_format(card: &DrmCard, format: &FbFormat) -> bool {
    let buffer = match DumbBuffer::new(card, PROBE_SIZE, format) {
        Ok(buffer) => buffer,
        Err(err) => {
            trace!(format = format.name, %err, "probe: no dumb buffer");
            return false;
        }
    };
    let ok = Framebuffer::add(card, &buffer.view(), format).is_ok();
    trace!(format = format.name, ok, "probed format");
    ok
}
