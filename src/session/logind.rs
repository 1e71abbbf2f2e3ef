//! Implementation of the [`Session`] trait through the logind dbus interface.
//!
//! This requires systemd and dbus to be available and started on the system.
//! The session only takes control of the caller's own session
//! (`/org/freedesktop/login1/session/self`) and releases it again on drop.

use std::{
    env, fmt, io,
    os::unix::io::{AsRawFd, FromRawFd, OwnedFd},
    path::Path,
    time::Duration,
};

use dbus::blocking::Connection;
use rustix::fs::{major, minor, stat, OFlags};
use tracing::{debug, info_span, trace, warn};

use super::Session;

const LOGIND_DEST: &str = "org.freedesktop.login1";
const SESSION_PATH: &str = "/org/freedesktop/login1/session/self";
const SESSION_IFACE: &str = "org.freedesktop.login1.Session";
const TIMEOUT: Duration = Duration::from_millis(5000);

/// [`Session`] via the logind dbus interface
pub struct LogindSession {
    conn: Connection,
    span: tracing::Span,
}

impl fmt::Debug for LogindSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogindSession")
            .field("path", &SESSION_PATH)
            .finish_non_exhaustive()
    }
}

impl LogindSession {
    /// Tries to take control of the current logind session.
    ///
    /// Returns `Ok(None)` when the process does not run in a seat session.
    pub fn new() -> Result<Option<LogindSession>, Error> {
        if env::var_os("XDG_SEAT").is_none() || env::var_os("XDG_SESSION_ID").is_none() {
            return Ok(None);
        }
        let span = info_span!("backend_session", session_type = "logind");
        let _guard = span.enter();

        let conn = Connection::new_system().map_err(Error::FailedDbusConnection)?;
        let session = LogindSession {
            conn,
            span: span.clone(),
        };
        session.call::<_, ()>("TakeControl", (false,))?;
        debug!("TakeControl done");
        Ok(Some(session))
    }

    fn call<A, R>(&self, member: &'static str, args: A) -> Result<R, Error>
    where
        A: dbus::arg::AppendAll,
        R: dbus::arg::ReadAll,
    {
        trace!(member, "dbus call");
        let proxy = self.conn.with_proxy(LOGIND_DEST, SESSION_PATH, TIMEOUT);
        proxy
            .method_call(SESSION_IFACE, member, args)
            .map_err(|source| Error::DbusCallFailed { member, source })
    }
}

impl Session for LogindSession {
    type Error = Error;

    fn open(&mut self, path: &Path, _flags: OFlags) -> Result<OwnedFd, Error> {
        let _guard = self.span.enter();
        let stat = stat(path).map_err(|err| Error::FailedToStatDevice(err.into()))?;
        let (major, minor) = (major(stat.st_rdev), minor(stat.st_rdev));
        let (fd, inactive): (dbus::arg::OwnedFd, bool) = self.call("TakeDevice", (major, minor))?;
        if inactive {
            warn!(path = %path.display(), "device is paused, session is not in the foreground");
        }

        // SAFETY: logind passed us ownership of the descriptor
        let fd = unsafe { OwnedFd::from_raw_fd(fd.into_fd()) };
        let fd = rustix::io::fcntl_dupfd_cloexec(&fd, 0).map_err(|err| Error::Dup(err.into()))?;
        eprintln!("open {}: got fd {} via logind.", path.display(), fd.as_raw_fd());
        Ok(fd)
    }
}

impl Drop for LogindSession {
    fn drop(&mut self) {
        let _guard = self.span.enter();
        if let Err(err) = self.call::<_, ()>("ReleaseControl", ()) {
            warn!(?err, "failed to release logind session control");
        }
    }
}

/// Errors related to logind sessions
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Failed to connect to dbus system socket
    #[error("Failed to connect to dbus system socket")]
    FailedDbusConnection(#[source] dbus::Error),
    /// DBus method call failed
    #[error("{member} failed: {}", .source.message().unwrap_or("unknown error"))]
    DbusCallFailed {
        /// Method called
        member: &'static str,
        /// DBus error
        #[source]
        source: dbus::Error,
    },
    /// Failed to stat device
    #[error("Failed to stat device")]
    FailedToStatDevice(#[source] io::Error),
    /// Failed to duplicate the received file descriptor
    #[error("Failed to duplicate device fd")]
    Dup(#[source] io::Error),
}
