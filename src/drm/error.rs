use std::{io, path::PathBuf};

/// Errors thrown while talking to a DRM device
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The device could not be opened
    #[error(transparent)]
    Open(#[from] crate::session::Error),
    /// An ioctl on the device failed
    #[error(transparent)]
    Access(#[from] AccessError),
    /// There is no connected output with modes
    #[error("no usable output found")]
    NoOutput,
    /// The requested output does not exist
    #[error("output {0} not found")]
    OutputNotFound(String),
    /// The output has no modes
    #[error("output {0} has no modes")]
    NoModes(String),
    /// The requested mode is not supported by the output
    #[error("mode {mode} not found on output {output}")]
    ModeNotFound {
        /// Requested mode
        mode: String,
        /// Output name
        output: String,
    },
    /// No encoder could be found for the output
    #[error("no encoder found for output {0}")]
    NoEncoder(String),
    /// No crtc could be found for the output
    #[error("no crtc found for output {0}")]
    NoCrtc(String),
    /// No device driven by the given driver exists
    #[error("no {0} device found")]
    DriverNotFound(String),
    /// The card is not a virtio-gpu
    #[error("card{0}: not a virtio-gpu device")]
    NotVirtio(u32),
    /// Writing a report failed
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The framebuffer format cannot be used with this operation
    #[error("format {0} not supported here")]
    UnsupportedFormat(&'static str),
}

/// A failed ioctl or syscall on a DRM device
#[derive(thiserror::Error, Debug)]
#[error("{errmsg}{}: {source}", .dev.as_ref().map(|dev| format!(" ({})", dev.display())).unwrap_or_default())]
pub struct AccessError {
    /// Error message associated to the access error
    pub errmsg: &'static str,
    /// Device on which the error was generated
    pub dev: Option<PathBuf>,
    /// Underlying device error
    #[source]
    pub source: io::Error,
}
