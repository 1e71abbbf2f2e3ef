//!
//! Device access for unprivileged processes.
//!
//! Device nodes are opened directly when the permissions allow it. Inside a logind
//! session with a seat (`XDG_SEAT` and `XDG_SESSION_ID` set) the tools additionally take
//! control of the session, so nodes the user may not open can be handed out by logind
//! via `TakeDevice`.
//!
//! The following mechanisms are currently provided:
//!     - direct - plain `open(2)`
//!     - logind - `org.freedesktop.login1.Session` over the system bus
//!
use std::{io, os::unix::io::OwnedFd, path::Path, path::PathBuf};

use rustix::fs::OFlags;
use tracing::{debug, info};

pub mod direct;
#[cfg(feature = "backend_session_logind")]
pub mod logind;

pub use self::direct::DirectSession;
#[cfg(feature = "backend_session_logind")]
pub use self::logind::LogindSession;

/// General session interface.
///
/// Provides a way to open devices.
pub trait Session {
    /// Error type of the implementation
    type Error: std::error::Error;

    /// Opens a device at the given `path` with the given flags.
    fn open(&mut self, path: &Path, flags: OFlags) -> Result<OwnedFd, Self::Error>;
}

/// Errors returned when opening a device failed
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The device could not be opened
    #[error("open {}: {source}", .path.display())]
    Open {
        /// Device path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },
    /// logind refused to hand out the device
    #[cfg(feature = "backend_session_logind")]
    #[error(transparent)]
    Logind(#[from] logind::Error),
}

/// [`Session`] using the best available interface
///
/// Devices are opened directly first, falling back to logind if a logind session
/// could be set up.
#[derive(Debug, Default)]
pub struct AutoSession {
    direct: DirectSession,
    #[cfg(feature = "backend_session_logind")]
    logind: Option<LogindSession>,
}

impl AutoSession {
    /// Creates a session with direct access only.
    pub fn direct() -> AutoSession {
        AutoSession::default()
    }

    /// Creates a session, taking control of the logind session if there is one.
    ///
    /// Failing to talk to logind is not fatal, the session then only opens devices directly.
    pub fn new() -> AutoSession {
        #[cfg(feature = "backend_session_logind")]
        {
            let logind = match LogindSession::new() {
                Ok(Some(session)) => {
                    info!("took control of logind session");
                    Some(session)
                }
                Ok(None) => {
                    debug!("no logind seat session, opening devices directly");
                    None
                }
                Err(err) => {
                    debug!(?err, "logind session unavailable");
                    let _ = logind_unavailable(&mut io::stderr(), &err);
                    None
                }
            };
            AutoSession {
                direct: DirectSession,
                logind,
            }
        }

        #[cfg(not(feature = "backend_session_logind"))]
        {
            AutoSession::direct()
        }
    }

    /// Returns true if devices may be obtained via logind.
    pub fn has_logind(&self) -> bool {
        #[cfg(feature = "backend_session_logind")]
        {
            self.logind.is_some()
        }

        #[cfg(not(feature = "backend_session_logind"))]
        {
            false
        }
    }
}

impl Session for AutoSession {
    type Error = Error;

    fn open(&mut self, path: &Path, flags: OFlags) -> Result<OwnedFd, Error> {
        let err = match self.direct.open(path, flags) {
            Ok(fd) => return Ok(fd),
            Err(err) => err,
        };

        #[cfg(feature = "backend_session_logind")]
        if let Some(logind) = self.logind.as_mut() {
            debug!(path = %path.display(), ?err, "direct open failed, asking logind");
            return Ok(logind.open(path, flags)?);
        }

        Err(err)
    }
}

/// The single user visible line for a logind session that could not be taken.
#[cfg(feature = "backend_session_logind")]
fn logind_unavailable<W: io::Write>(out: &mut W, err: &dyn std::fmt::Display) -> io::Result<()> {
    writeln!(out, "logind: {}", err)
}

#[cfg(all(test, feature = "backend_session_logind"))]
mod tests {
    use super::logind_unavailable;

    #[test]
    fn logind_failure_is_one_line() {
        let mut out = Vec::new();
        logind_unavailable(&mut out, &"org.freedesktop.login1 not provided").unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "logind: org.freedesktop.login1 not provided\n"
        );
    }
}
