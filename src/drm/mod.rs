//! Access to DRM/KMS display devices.
//!
//! A [`DrmCard`] wraps an open primary node (`/dev/dri/cardN`) or a lease fd.
//! It implements the [`drm::Device`] and [`drm::control::Device`] traits, so all
//! of the mode-setting API of the [`drm`] crate is available on it. On top of that
//! this module provides
//!
//! - [`DrmOutput`], a connector/mode/crtc combination ready to show framebuffers,
//! - [`dumb`] buffers and framebuffers attached to them,
//! - the hardware [`cursor`] test,
//! - the device listing of `drminfo` in [`info`],
//! - [`lease`]s obtained from a running X server,
//! - the [`virtio`]-gpu specific ioctls.
//!
//! Every ioctl failure is reported as an [`AccessError`] naming the operation
//! and the device.

use std::{
    fmt,
    os::unix::io::{AsFd, BorrowedFd, OwnedFd},
    path::{Path, PathBuf},
    sync::Arc,
};

use drm::{control::Device as ControlDevice, Device as BasicDevice, DriverCapability};
use rustix::fs::OFlags;
use tracing::{debug, info, info_span, warn};

use crate::session::Session;

pub mod cursor;
pub mod dumb;
mod error;
pub mod info;
pub mod lease;
pub mod names;
pub mod node;
mod output;
pub mod virtio;

pub use self::error::{AccessError, Error};
pub use self::output::DrmOutput;

bitflags::bitflags! {
    /// PRIME (dma-buf sharing) support of a driver
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PrimeCaps: u64 {
        /// Buffers of other devices can be imported
        const IMPORT = 0x1;
        /// Buffers can be exported as dma-buf
        const EXPORT = 0x2;
    }
}

/// Name and version of the kernel driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    /// Driver name, e.g. `i915`
    pub name: String,
    /// Major version
    pub major: i32,
    /// Minor version
    pub minor: i32,
    /// Patch level
    pub patchlevel: i32,
    /// Driver date
    pub date: String,
    /// Driver description
    pub desc: String,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, v{}.{}.{}", self.name, self.major, self.minor, self.patchlevel)
    }
}

#[derive(Debug)]
struct InternalDrmCard {
    fd: OwnedFd,
    path: Option<PathBuf>,
    privileged: bool,
    span: tracing::Span,
}

impl AsFd for InternalDrmCard {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}
impl BasicDevice for InternalDrmCard {}
impl ControlDevice for InternalDrmCard {}

impl Drop for InternalDrmCard {
    fn drop(&mut self) {
        let _guard = self.span.enter();
        info!("Dropping device: {:?}", self.path);
        if self.privileged {
            if let Err(err) = self.release_master_lock() {
                warn!("Failed to drop drm master state. Error: {}", err);
            }
        }
    }
}

/// Ref-counted handle of an open DRM card
///
/// Clones share the file descriptor; the master lock is released once the last
/// clone is dropped.
#[derive(Debug, Clone)]
pub struct DrmCard(Arc<InternalDrmCard>);

impl AsFd for DrmCard {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.fd.as_fd()
    }
}
impl BasicDevice for DrmCard {}
impl ControlDevice for DrmCard {}

impl DrmCard {
    /// Opens `/dev/dri/card<nr>` read-write through `session`.
    pub fn open<S>(nr: u32, session: &mut S) -> Result<DrmCard, Error>
    where
        S: Session,
        crate::session::Error: From<S::Error>,
    {
        let path = node::card_path(nr);
        let fd = session
            .open(&path, OFlags::RDWR)
            .map_err(crate::session::Error::from)?;
        Ok(DrmCard::new(fd, Some(path)))
    }

    /// Wraps an already open device, e.g. a lease fd handed out by an X server.
    ///
    /// This function will try to acquire the master lock for the device and
    /// release the lock on drop again.
    pub fn new(fd: OwnedFd, path: Option<PathBuf>) -> DrmCard {
        let span = info_span!("drm", device = ?path);
        let mut dev = InternalDrmCard {
            fd,
            path,
            privileged: false,
            span,
        };

        {
            let _guard = dev.span.enter();
            // We want to modeset, so we better be the master. Newer kernels grant
            // this permission anyway if no other process is already the master.
            if dev.acquire_master_lock().is_err() {
                warn!("Unable to become drm master, assuming unprivileged mode");
            } else {
                dev.privileged = true;
            }
        }

        DrmCard(Arc::new(dev))
    }

    /// Path of the device node, `None` for lease fds.
    pub fn path(&self) -> Option<&Path> {
        self.0.path.as_deref()
    }

    /// Returns true if the master lock is held.
    pub fn is_privileged(&self) -> bool {
        self.0.privileged
    }

    pub(crate) fn access_error(&self, errmsg: &'static str, source: std::io::Error) -> AccessError {
        AccessError {
            errmsg,
            dev: self.0.path.clone(),
            source,
        }
    }

    /// Queries name and version of the kernel driver.
    pub fn version(&self) -> Result<Version, AccessError> {
        let mut name = Vec::new();
        let mut date = Vec::new();
        let mut desc = Vec::new();
        let version = drm_ffi::get_version(self.as_fd(), Some(&mut name), Some(&mut date), Some(&mut desc))
            .map_err(|err| self.access_error("Error getting driver version", err))?;
        Ok(Version {
            name: lossy_string(&name),
            major: version.version_major,
            minor: version.version_minor,
            patchlevel: version.version_patchlevel,
            date: lossy_string(&date),
            desc: lossy_string(&desc),
        })
    }

    /// Bus id of the device, `None` if the driver does not provide one.
    pub fn bus_id(&self) -> Option<String> {
        match self.get_bus_id() {
            Ok(id) if !id.is_empty() => Some(id.to_string_lossy().into_owned()),
            Ok(_) => None,
            Err(err) => {
                debug!(?err, "no bus id");
                None
            }
        }
    }

    /// Queries a driver capability.
    pub fn cap(&self, cap: DriverCapability) -> Result<u64, AccessError> {
        self.get_driver_capability(cap)
            .map_err(|source| self.access_error("Error getting driver capability", source))
    }

    /// Queries the PRIME capabilities.
    pub fn prime_caps(&self) -> Result<PrimeCaps, AccessError> {
        let caps = self
            .get_driver_capability(DriverCapability::Prime)
            .map_err(|source| self.access_error("drmGetCap(DRM_CAP_PRIME)", source))?;
        Ok(PrimeCaps::from_bits_truncate(caps))
    }
}

/// Converts a string buffer filled in by the kernel, stopping at the first nul.
fn lossy_string(buf: &[i8]) -> String {
    let bytes: Vec<u8> = buf.iter().take_while(|&&c| c != 0).map(|&c| c as u8).collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Finds and opens the first card driven by `driver`, e.g. `vgem`.
pub fn find_driver<S>(driver: &str, session: &mut S) -> Result<DrmCard, Error>
where
    S: Session,
    crate::session::Error: From<S::Error>,
{
    let nodes = node::primary_nodes().map_err(|source| AccessError {
        errmsg: "Error listing drm devices",
        dev: None,
        source,
    })?;
    for node in nodes {
        let card = match DrmCard::open(node.index(), session) {
            Ok(card) => card,
            Err(err) => {
                debug!(%node, ?err, "skipping device");
                continue;
            }
        };
        match card.version() {
            Ok(version) if version.name == driver => {
                info!(%node, driver, "found device");
                return Ok(card);
            }
            _ => continue,
        }
    }
    Err(Error::DriverNotFound(driver.to_string()))
}

#[cfg(test)]
mod tests {
    use super::{lossy_string, Version};

    #[test]
    fn kernel_strings_stop_at_nul() {
        let buf: Vec<i8> = b"virtio_gpu\0junk".iter().map(|&b| b as i8).collect();
        assert_eq!(lossy_string(&buf), "virtio_gpu");
        let buf: Vec<i8> = b"i915".iter().map(|&b| b as i8).collect();
        assert_eq!(lossy_string(&buf), "i915");
        assert_eq!(lossy_string(&[]), "");
    }

    #[test]
    fn version_display() {
        let version = Version {
            name: "vgem".into(),
            major: 1,
            minor: 0,
            patchlevel: 0,
            date: "20120112".into(),
            desc: "Virtual GEM provider".into(),
        };
        assert_eq!(version.to_string(), "vgem, v1.0.0");
    }
}
