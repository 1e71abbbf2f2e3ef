use std::{
    ffi::c_void,
    fmt, io,
    os::unix::io::AsFd,
    ptr::{self, NonNull},
    slice,
};

use rustix::mm::{madvise, mmap, munmap, Advice, MapFlags, ProtFlags};
use tracing::{trace, warn};

/// Shared memory mapping of a buffer object, dma-buf or framebuffer device.
///
/// The mapping is removed on drop.
pub struct Mapping {
    ptr: NonNull<c_void>,
    len: usize,
    skip: usize,
    writable: bool,
}

impl fmt::Debug for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapping")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .field("skip", &self.skip)
            .field("writable", &self.writable)
            .finish()
    }
}

impl Mapping {
    /// Maps `len` bytes of `fd` starting at `offset`.
    pub fn new<F: AsFd>(fd: F, len: usize, offset: u64, writable: bool) -> io::Result<Mapping> {
        let prot = if writable {
            ProtFlags::READ | ProtFlags::WRITE
        } else {
            ProtFlags::READ
        };
        // SAFETY: a fresh shared mapping which does not alias any rust allocation
        let ptr = unsafe { mmap(ptr::null_mut(), len, prot, MapFlags::SHARED, fd, offset)? };
        let ptr = NonNull::new(ptr).ok_or_else(|| io::Error::from(io::ErrorKind::AddrNotAvailable))?;
        trace!(?ptr, len, offset, "mapped");
        Ok(Mapping {
            ptr,
            len,
            skip: 0,
            writable,
        })
    }

    /// Hides the first `skip` bytes of the mapping from the slice accessors.
    ///
    /// Used when the interesting data does not start at a page boundary.
    pub fn with_skip(mut self, skip: usize) -> Mapping {
        self.skip = skip.min(self.len);
        self
    }

    /// Length of the visible part of the mapping.
    pub fn len(&self) -> usize {
        self.len - self.skip
    }

    /// Returns true if the visible part is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Contents of the mapping.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for len bytes for the lifetime of self
        unsafe { slice::from_raw_parts((self.ptr.as_ptr() as *const u8).add(self.skip), self.len()) }
    }

    /// Mutable contents of the mapping, `None` for read-only mappings.
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        if !self.writable {
            return None;
        }
        // SAFETY: ptr is valid and writable for len bytes, borrowed mutably through self
        Some(unsafe { slice::from_raw_parts_mut((self.ptr.as_ptr() as *mut u8).add(self.skip), self.len()) })
    }

    /// Drops the backing pages, the next access faults them in again.
    pub fn zap(&self) -> io::Result<()> {
        // SAFETY: the range is exactly the mapping created in `new`
        unsafe { madvise(self.ptr.as_ptr(), self.len, Advice::LinuxDontNeed)? };
        Ok(())
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: the range is exactly the mapping created in `new`, no borrows outlive self
        if let Err(err) = unsafe { munmap(self.ptr.as_ptr(), self.len) } {
            warn!(?err, "munmap failed");
        }
    }
}
