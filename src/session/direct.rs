//! Implementation of the [`Session`] trait by opening device nodes directly.

use std::{os::unix::io::OwnedFd, path::Path};

use rustix::fs::{open, Mode, OFlags};
use tracing::debug;

use super::{Error, Session};

/// [`Session`] using plain `open(2)`
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectSession;

impl Session for DirectSession {
    type Error = Error;

    fn open(&mut self, path: &Path, flags: OFlags) -> Result<OwnedFd, Error> {
        debug!(path = %path.display(), ?flags, "opening device");
        open(path, flags | OFlags::CLOEXEC, Mode::empty()).map_err(|err| Error::Open {
            path: path.to_path_buf(),
            source: err.into(),
        })
    }
}
