//! virtio-gpu specific ioctls.
//!
//! Besides the capability table printed by `virtiotest` this covers the minimal
//! 2D resource workflow: create a resource, map it, fill it, transfer it to the host
//! and wait for the transfer before scanning it out.

#![allow(non_camel_case_types)]

use std::{
    io::{self, Write},
    os::{raw::c_int, unix::io::AsFd, unix::io::AsRawFd},
};

use nix::{errno::Errno, ioctl_readwrite};
use tracing::{debug, trace, warn};

use super::{dumb::BufferView, node, AccessError, DrmCard, Error};
use crate::{format::FbFormat, utils::Mapping};

const DRM_IOCTL_BASE: u8 = b'd';

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
struct drm_virtgpu_map {
    offset: u64,
    handle: u32,
    pad: u32,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
struct drm_virtgpu_getparam {
    param: u64,
    value: u64,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
struct drm_virtgpu_resource_create {
    target: u32,
    format: u32,
    bind: u32,
    width: u32,
    height: u32,
    depth: u32,
    array_size: u32,
    last_level: u32,
    nr_samples: u32,
    flags: u32,
    bo_handle: u32,
    res_handle: u32,
    size: u32,
    stride: u32,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
struct drm_virtgpu_3d_box {
    x: u32,
    y: u32,
    z: u32,
    w: u32,
    h: u32,
    d: u32,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
struct drm_virtgpu_3d_transfer_to_host {
    bo_handle: u32,
    r#box: drm_virtgpu_3d_box,
    level: u32,
    offset: u32,
    stride: u32,
    layer_stride: u32,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
struct drm_virtgpu_3d_wait {
    handle: u32,
    flags: u32,
}

ioctl_readwrite!(virtgpu_map, DRM_IOCTL_BASE, 0x41, drm_virtgpu_map);
ioctl_readwrite!(virtgpu_getparam, DRM_IOCTL_BASE, 0x43, drm_virtgpu_getparam);
ioctl_readwrite!(virtgpu_resource_create, DRM_IOCTL_BASE, 0x44, drm_virtgpu_resource_create);
ioctl_readwrite!(virtgpu_transfer_to_host, DRM_IOCTL_BASE, 0x47, drm_virtgpu_3d_transfer_to_host);
ioctl_readwrite!(virtgpu_wait, DRM_IOCTL_BASE, 0x48, drm_virtgpu_3d_wait);

const PIPE_TEXTURE_2D: u32 = 2;
const VIRGL_BIND_RENDER_TARGET: u32 = 1 << 1;
const VIRGL_BIND_SCANOUT: u32 = 1 << 18;

/// `VIRTGPU_PARAM_*` values queried by [`VirtioGpu::param`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    /// virgl 3D acceleration
    Virgl3d = 1,
    /// Capset query fix
    CapsetQueryFix = 2,
    /// Blob resources
    ResourceBlob = 3,
    /// Host visible memory
    HostVisible = 4,
    /// Cross device resource sharing
    CrossDevice = 5,
    /// Context init ioctl
    ContextInit = 6,
    /// Bitmask of supported capsets
    SupportedCapsetIds = 7,
}

impl Param {
    /// All parameters, in ioctl order
    pub const ALL: [Param; 7] = [
        Param::Virgl3d,
        Param::CapsetQueryFix,
        Param::ResourceBlob,
        Param::HostVisible,
        Param::CrossDevice,
        Param::ContextInit,
        Param::SupportedCapsetIds,
    ];

    /// Short name as printed by `virtiotest`
    pub fn name(&self) -> &'static str {
        match self {
            Param::Virgl3d => "virgl-3d",
            Param::CapsetQueryFix => "capset-fix",
            Param::ResourceBlob => "resource-blob",
            Param::HostVisible => "host-visible",
            Param::CrossDevice => "cross-device",
            Param::ContextInit => "context-init",
            Param::SupportedCapsetIds => "capset-ids",
        }
    }
}

/// Name of a `VIRTGPU_CAPSET_*` id, `None` if unknown.
pub fn capset_name(id: u32) -> Option<&'static str> {
    match id {
        1 => Some("virgl"),
        2 => Some("virgl2"),
        3 => Some("gfxstream-vulkan"),
        4 => Some("venus"),
        5 => Some("cross-domain"),
        6 => Some("drm"),
        7 => Some("gfxstream-gles"),
        8 => Some("gfxstream-composer"),
        _ => None,
    }
}

/// Splits the capset id bitmask into ids.
pub fn capset_ids(mask: u64) -> Vec<u32> {
    (0..64).filter(|bit| mask & (1u64 << bit) != 0).collect()
}

/// A card checked to be a virtio-gpu
#[derive(Debug, Clone)]
pub struct VirtioGpu {
    card: DrmCard,
}

impl VirtioGpu {
    /// Checks card `nr` in sysfs and wraps the open `card`.
    pub fn new(card: &DrmCard, nr: u32) -> Result<VirtioGpu, Error> {
        if !node::is_virtio(nr) {
            return Err(Error::NotVirtio(nr));
        }
        Ok(VirtioGpu { card: card.clone() })
    }

    /// The device
    pub fn card(&self) -> &DrmCard {
        &self.card
    }

    /// Queries a parameter, `None` if the kernel does not know it.
    pub fn param(&self, param: Param) -> Result<Option<u64>, AccessError> {
        let mut value: c_int = 0;
        let mut args = drm_virtgpu_getparam {
            param: param as u64,
            value: &mut value as *mut c_int as u64,
        };
        // SAFETY: the kernel writes a single int to `value`, which outlives the call
        match unsafe { virtgpu_getparam(self.card.as_fd().as_raw_fd(), &mut args) } {
            Ok(_) => {
                trace!(param = param.name(), value, "getparam");
                Ok(Some(value as u32 as u64))
            }
            Err(Errno::EINVAL) => Ok(None),
            Err(err) => Err(self
                .card
                .access_error("DRM_IOCTL_VIRTGPU_GETPARAM", err.into())),
        }
    }

    /// Prints the `virtio capabilities` table.
    pub fn print_caps(&self, out: &mut dyn Write) -> Result<(), Error> {
        writeln!(out, "virtio capabilities")?;
        for param in Param::ALL {
            match self.param(param)? {
                Some(value) => writeln!(out, "    {:<12}: {}", param.name(), value)?,
                None => writeln!(out, "    {:<12}: not available", param.name())?,
            }
        }
        Ok(())
    }

    /// Prints the supported capsets, one per line.
    pub fn print_capsets(&self, out: &mut dyn Write) -> Result<(), Error> {
        let mask = self.param(Param::SupportedCapsetIds)?.unwrap_or(0);
        for id in capset_ids(mask) {
            match capset_name(id) {
                Some(name) => writeln!(out, "{}", name)?,
                None => writeln!(out, "capset #{}", id)?,
            }
        }
        Ok(())
    }

    /// Creates a 2D resource usable as scanout buffer.
    pub fn create_resource(&self, size: (u32, u32), format: &'static FbFormat) -> Result<VirtioResource, Error> {
        let virtio_format = format.virtio.ok_or(Error::UnsupportedFormat(format.name))?;
        let (width, height) = size;
        let stride = width * format.cpp();
        let mut args = drm_virtgpu_resource_create {
            target: PIPE_TEXTURE_2D,
            format: virtio_format,
            bind: VIRGL_BIND_RENDER_TARGET | VIRGL_BIND_SCANOUT,
            width,
            height,
            depth: 1,
            array_size: 1,
            size: stride * height,
            stride,
            ..Default::default()
        };
        // SAFETY: args is a valid resource_create struct
        unsafe { virtgpu_resource_create(self.card.as_fd().as_raw_fd(), &mut args) }
            .map_err(|err| self.card.access_error("DRM_IOCTL_VIRTGPU_RESOURCE_CREATE", err.into()))?;
        debug!(bo = args.bo_handle, res = args.res_handle, width, height, "created resource");

        let view = BufferView::from_raw(args.bo_handle, size, stride, format.fourcc).ok_or_else(|| {
            self.card.access_error(
                "DRM_IOCTL_VIRTGPU_RESOURCE_CREATE",
                io::Error::new(io::ErrorKind::InvalidData, "kernel returned handle 0"),
            )
        })?;
        Ok(VirtioResource {
            card: self.card.clone(),
            view,
        })
    }
}

/// A virtio-gpu resource, its GEM handle is closed on drop
#[derive(Debug)]
pub struct VirtioResource {
    card: DrmCard,
    view: BufferView,
}

impl VirtioResource {
    /// Description of the buffer
    pub fn view(&self) -> BufferView {
        self.view
    }

    fn handle(&self) -> u32 {
        u32::from(self.view.handle)
    }

    /// Maps the guest side of the resource.
    pub fn map(&self) -> Result<Mapping, AccessError> {
        let mut args = drm_virtgpu_map {
            handle: self.handle(),
            ..Default::default()
        };
        // SAFETY: args is a valid map struct
        unsafe { virtgpu_map(self.card.as_fd().as_raw_fd(), &mut args) }
            .map_err(|err| self.card.access_error("DRM_IOCTL_VIRTGPU_MAP", err.into()))?;
        Mapping::new(&self.card, self.view.len(), args.offset, true)
            .map_err(|source| self.card.access_error("resource mmap", source))
    }

    /// Copies the guest memory of the resource to the host.
    pub fn transfer_to_host(&self) -> Result<(), AccessError> {
        let (w, h) = self.view.size;
        let mut args = drm_virtgpu_3d_transfer_to_host {
            bo_handle: self.handle(),
            r#box: drm_virtgpu_3d_box {
                w,
                h,
                d: 1,
                ..Default::default()
            },
            stride: self.view.pitch,
            ..Default::default()
        };
        // SAFETY: args is a valid transfer struct
        unsafe { virtgpu_transfer_to_host(self.card.as_fd().as_raw_fd(), &mut args) }
            .map_err(|err| self.card.access_error("DRM_IOCTL_VIRTGPU_TRANSFER_TO_HOST", err.into()))?;
        Ok(())
    }

    /// Waits until the host is done with the resource.
    pub fn wait(&self) -> Result<(), AccessError> {
        let mut args = drm_virtgpu_3d_wait {
            handle: self.handle(),
            flags: 0,
        };
        // SAFETY: args is a valid wait struct
        unsafe { virtgpu_wait(self.card.as_fd().as_raw_fd(), &mut args) }
            .map_err(|err| self.card.access_error("DRM_IOCTL_VIRTGPU_WAIT", err.into()))?;
        Ok(())
    }
}

impl Drop for VirtioResource {
    fn drop(&mut self) {
        if let Err(err) = drm_ffi::gem::close(self.card.as_fd(), self.handle()) {
            warn!(?err, "failed to close resource handle");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_names() {
        let names = Param::ALL.iter().map(Param::name).collect::<Vec<_>>();
        assert_eq!(
            names,
            [
                "virgl-3d",
                "capset-fix",
                "resource-blob",
                "host-visible",
                "cross-device",
                "context-init",
                "capset-ids"
            ]
        );
        assert_eq!(Param::SupportedCapsetIds as u64, 7);
    }

    #[test]
    fn capsets() {
        assert_eq!(capset_ids(0), Vec::<u32>::new());
        assert_eq!(capset_ids(0b10110), vec![1, 2, 4]);
        assert_eq!(capset_name(4), Some("venus"));
        assert_eq!(capset_name(42), None);
    }

    #[test]
    fn ioctl_struct_sizes() {
        assert_eq!(std::mem::size_of::<drm_virtgpu_resource_create>(), 56);
        assert_eq!(std::mem::size_of::<drm_virtgpu_3d_transfer_to_host>(), 40);
        assert_eq!(std::mem::size_of::<drm_virtgpu_map>(), 16);
    }
}
