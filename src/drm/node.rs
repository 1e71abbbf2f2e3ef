//! Device nodes and the sysfs side of a DRM card

use std::{
    fmt::{self, Display, Formatter},
    fs, io,
    os::unix::ffi::OsStrExt,
    path::{Path, PathBuf},
};

use rustix::fs::{major, minor, stat, Dev as dev_t};
use tracing::{debug, info};

const DRI_DIR: &str = "/dev/dri";
const SYSFS_DRM: &str = "/sys/class/drm";

/// Path of the primary node of card `nr`.
pub fn card_path(nr: u32) -> PathBuf {
    Path::new(DRI_DIR).join(format!("card{}", nr))
}

/// A node which refers to a DRM device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DrmNode {
    dev: dev_t,
    ty: NodeType,
}

impl DrmNode {
    /// Creates a DRM node from path.
    pub fn from_path<A: AsRef<Path>>(path: A) -> Result<DrmNode, CreateDrmNodeError> {
        let stat = stat(path.as_ref()).map_err(Into::<io::Error>::into)?;
        DrmNode::from_dev_id(stat.st_rdev)
    }

    /// Creates a DRM node from a dev_t
    pub fn from_dev_id(dev: dev_t) -> Result<DrmNode, CreateDrmNodeError> {
        if !is_device_drm(dev) {
            return Err(CreateDrmNodeError::NotDrmNode);
        }
        let ty = NodeType::from_minor(minor(dev)).ok_or(CreateDrmNodeError::NotDrmNode)?;
        Ok(DrmNode { dev, ty })
    }

    /// Returns the type of the DRM node.
    pub fn ty(&self) -> NodeType {
        self.ty
    }

    /// Index of the node within its type, `0` for `card0` and `renderD128`.
    pub fn index(&self) -> u32 {
        minor(self.dev) - self.ty.minor_base()
    }

    /// Returns the path of the specified node type matching the device, if available.
    pub fn dev_path_with_type(&self, ty: NodeType) -> Option<PathBuf> {
        let dir = format!("/sys/dev/char/{}:{}/device/drm", major(self.dev), minor(self.dev));
        fs::read_dir(dir)
            .ok()?
            .flatten()
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(ty.minor_name_prefix()))
            .map(|name| Path::new(DRI_DIR).join(name))
            .find(|path| path.exists())
    }
}

impl Display for DrmNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.ty.minor_name_prefix(), minor(self.dev))
    }
}

/// A type of node
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum NodeType {
    /// A primary node, used for mode-setting.
    Primary,
    /// A control node. No DRM API uses these.
    Control,
    /// A render node, buffer allocation and rendering only.
    Render,
}

impl NodeType {
    /*
    The type of the DRM node is determined by the minor number ranges.

    0-63 -> Primary
    64-127 -> Control
    128-255 -> Render
    */
    fn from_minor(minor: u32) -> Option<NodeType> {
        match minor >> 6 {
            0 => Some(NodeType::Primary),
            1 => Some(NodeType::Control),
            2 => Some(NodeType::Render),
            _ => None,
        }
    }

    fn minor_base(&self) -> u32 {
        match self {
            NodeType::Primary => 0,
            NodeType::Control => 64,
            NodeType::Render => 128,
        }
    }

    /// Returns a string representing the prefix of a minor device's name.
    pub fn minor_name_prefix(&self) -> &'static str {
        match self {
            NodeType::Primary => "card",
            NodeType::Control => "controlD",
            NodeType::Render => "renderD",
        }
    }
}

/// An error that may occur when creating a DrmNode from a device path.
#[derive(Debug, thiserror::Error)]
pub enum CreateDrmNodeError {
    /// Some underlying IO error occured while trying to create a DRM node.
    #[error("{0}")]
    Io(#[from] io::Error),

    /// The device is not a DRM node.
    #[error("the device does not refer to a DRM node.")]
    NotDrmNode,
}

fn is_device_drm(dev: dev_t) -> bool {
    let path = format!("/sys/dev/char/{}:{}/device/drm", major(dev), minor(dev));
    stat(path.as_str()).is_ok()
}

/// Lists the primary nodes present in `/dev/dri`, ordered by index.
pub fn primary_nodes() -> io::Result<Vec<DrmNode>> {
    let mut nodes = fs::read_dir(DRI_DIR)?
        .flatten()
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("card"))
        .filter_map(|entry| DrmNode::from_path(entry.path()).ok())
        .filter(|node| node.ty() == NodeType::Primary)
        .collect::<Vec<_>>();
    nodes.sort_by_key(DrmNode::index);
    Ok(nodes)
}

/// Returns true if card `nr` sits on a virtio bus.
///
/// The sysfs link of the card points into the device tree, for a virtio-gpu
/// that path runs through a `virtioN` device.
pub fn is_virtio(nr: u32) -> bool {
    let link = Path::new(SYSFS_DRM).join(format!("card{}", nr));
    match fs::read_link(&link) {
        Ok(target) => target.to_string_lossy().contains("/virtio"),
        Err(err) => {
            debug!(path = %link.display(), ?err, "readlink failed");
            false
        }
    }
}

/// Unbinds the kernel driver from the device behind card `nr`.
///
/// Writes the device name to the `unbind` file of its driver, which makes the
/// driver drop the device while it is still in use.
pub fn unbind_driver(nr: u32) -> io::Result<()> {
    let link = Path::new(SYSFS_DRM).join(format!("card{}", nr)).join("device");
    let device = fs::canonicalize(&link).map_err(|err| {
        io::Error::new(
            err.kind(),
            format!("{}: can't resolve sysfs device path", link.display()),
        )
    })?;
    let name = device
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "sysfs device has no name"))?;
    let unbind = device.join("driver").join("unbind");
    info!(device = %device.display(), "unbinding driver");
    fs::write(&unbind, name.as_bytes())
        .map_err(|err| io::Error::new(err.kind(), format!("open {}: {}", unbind.display(), err)))
}

#[cfg(test)]
mod tests {
    use rustix::fs::makedev;

    use super::*;

    #[test]
    fn minor_ranges() {
        assert_eq!(NodeType::from_minor(0), Some(NodeType::Primary));
        assert_eq!(NodeType::from_minor(63), Some(NodeType::Primary));
        assert_eq!(NodeType::from_minor(64), Some(NodeType::Control));
        assert_eq!(NodeType::from_minor(128), Some(NodeType::Render));
        assert_eq!(NodeType::from_minor(255), Some(NodeType::Render));
        assert_eq!(NodeType::from_minor(256), None);
    }

    #[test]
    fn non_drm_devices_are_rejected() {
        // 1:3 is /dev/null
        assert!(matches!(
            DrmNode::from_dev_id(makedev(1, 3)),
            Err(CreateDrmNodeError::NotDrmNode)
        ));
        assert!(DrmNode::from_path("/dev/null").is_err());
    }

    #[test]
    fn card_paths() {
        assert_eq!(card_path(0), PathBuf::from("/dev/dri/card0"));
        assert_eq!(card_path(12), PathBuf::from("/dev/dri/card12"));
    }
}
