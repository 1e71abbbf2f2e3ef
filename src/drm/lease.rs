//! DRM leases
//!
//! A lease hands a single output of a running display server over to the tools.
//! Currently leases can be requested from an X server (RandR 1.6), selected by a
//! set `DISPLAY` environment variable.

use std::env;

use super::DrmCard;

/// Errors while obtaining a lease
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// There is no display server to lease from
    #[error("drm-lease: don't know where to lease from.")]
    NoServer,
    /// Built without RandR support
    #[error("drm-lease: compiled without xrandr support.")]
    Unsupported,
    /// Talking to the X server failed
    #[cfg(feature = "backend_x11_lease")]
    #[error("drm-lease: {0}")]
    X11(#[from] x11::X11LeaseError),
}

/// A leased output
///
/// The connection to the lessor is kept open as long as the lease is used.
#[derive(Debug)]
pub struct DrmLease {
    card: DrmCard,
    #[cfg(feature = "backend_x11_lease")]
    _lessor: x11::Lessor,
}

impl DrmLease {
    /// The leased device
    pub fn card(&self) -> &DrmCard {
        &self.card
    }
}

/// Leases `output` from the running display server.
pub fn lease(output: &str) -> Result<DrmLease, Error> {
    if env::var_os("DISPLAY").is_none() {
        return Err(Error::NoServer);
    }

    #[cfg(feature = "backend_x11_lease")]
    {
        let (lessor, fd) = x11::lease(output)?;
        Ok(DrmLease {
            card: DrmCard::new(fd, None),
            _lessor: lessor,
        })
    }

    #[cfg(not(feature = "backend_x11_lease"))]
    {
        let _ = output;
        Err(Error::Unsupported)
    }
}

#[cfg(feature = "backend_x11_lease")]
mod x11 {
    use std::{fmt, os::unix::io::OwnedFd};

    use tracing::{debug, info};
    use x11rb::{
        connection::{Connection, RequestConnection},
        errors::{ConnectError, ConnectionError, ReplyError, ReplyOrIdError},
        protocol::{
            randr::{self, ConnectionExt as _},
            xproto,
        },
        rust_connection::RustConnection,
        x11_utils::X11Error,
    };

    const RANDR_VERSION: (u32, u32) = (1, 6);

    /// Errors talking to the X server
    #[derive(thiserror::Error, Debug)]
    pub enum X11LeaseError {
        /// Connecting to the X server failed.
        #[error("can not connect to X server: {0}")]
        ConnectionFailed(#[from] ConnectError),
        /// The display has no such screen
        #[error("X server has no screen {0}")]
        NoScreen(usize),
        /// No RandR extension
        #[error("xrandr extension not present")]
        MissingExtension,
        /// RandR too old for leases
        #[error("xrandr: server v{0}.{1}, need v1.6 for leases")]
        WrongVersion(u32, u32),
        /// The requested output does not exist
        #[error("xrandr: no output found")]
        NoOutput,
        /// No crtc can drive the output
        #[error("xrandr: crtc not found")]
        NoCrtc,
        /// The server refused the lease
        #[error("xrandr: create lease failed: {}", DisplayX11Error(.0))]
        CreateLease(X11Error),
        /// Some protocol error occurred
        #[error("xrandr: {0}")]
        Protocol(#[from] ReplyOrIdError),
    }

    impl From<ReplyError> for X11LeaseError {
        fn from(err: ReplyError) -> Self {
            Self::Protocol(err.into())
        }
    }

    impl From<ConnectionError> for X11LeaseError {
        fn from(err: ConnectionError) -> Self {
            Self::Protocol(err.into())
        }
    }

    struct DisplayX11Error<'a>(&'a X11Error);

    impl fmt::Display for DisplayX11Error<'_> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(
                f,
                "{:?} (code {}, op {}:{})",
                self.0.error_kind, self.0.error_code, self.0.major_opcode, self.0.minor_opcode
            )
        }
    }

    pub struct Lessor {
        _conn: RustConnection,
        lease: randr::Lease,
    }

    impl fmt::Debug for Lessor {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Lessor").field("lease", &self.lease).finish_non_exhaustive()
        }
    }

    fn find_output(
        conn: &RustConnection,
        res: &randr::GetScreenResourcesReply,
        name: &str,
    ) -> Result<randr::Output, X11LeaseError> {
        for output in &res.outputs {
            let info = conn.randr_get_output_info(*output, res.config_timestamp)?.reply()?;
            if info.name == name.as_bytes() {
                return Ok(*output);
            }
        }
        Err(X11LeaseError::NoOutput)
    }

    /// A crtc which drives only `output`, or else the first idle one which could drive it.
    fn find_crtc(
        conn: &RustConnection,
        res: &randr::GetScreenResourcesReply,
        output: randr::Output,
    ) -> Result<randr::Crtc, X11LeaseError> {
        for crtc in &res.crtcs {
            let info = conn.randr_get_crtc_info(*crtc, res.config_timestamp)?.reply()?;
            if info.mode != 0 {
                if info.outputs == [output] {
                    return Ok(*crtc);
                }
            } else if info.possible.contains(&output) {
                return Ok(*crtc);
            }
        }
        Err(X11LeaseError::NoCrtc)
    }

    pub fn lease(name: &str) -> Result<(Lessor, OwnedFd), X11LeaseError> {
        let (conn, screen) = RustConnection::connect(None)?;
        let root: xproto::Window = conn
            .setup()
            .roots
            .get(screen)
            .map(|screen| screen.root)
            .ok_or(X11LeaseError::NoScreen(screen))?;

        if conn.extension_information(randr::X11_EXTENSION_NAME)?.is_none() {
            return Err(X11LeaseError::MissingExtension);
        }
        let version = conn
            .randr_query_version(RANDR_VERSION.0, RANDR_VERSION.1)?
            .reply()?;
        eprintln!(
            "drm-lease: xrandr: client v{}.{:x}, server v{}.{:x}",
            RANDR_VERSION.0, RANDR_VERSION.1, version.major_version, version.minor_version
        );
        if (version.major_version, version.minor_version) < RANDR_VERSION {
            return Err(X11LeaseError::WrongVersion(
                version.major_version,
                version.minor_version,
            ));
        }

        let res = conn.randr_get_screen_resources(root)?.reply()?;
        let output = find_output(&conn, &res, name)?;
        eprintln!("drm-lease: xrandr: using output 0x{:x}", output);
        let crtc = find_crtc(&conn, &res, output)?;
        eprintln!("drm-lease: xrandr: using crtc 0x{:x}", crtc);

        let lease = conn.generate_id()?;
        debug!(lease, output, crtc, "creating lease");
        let reply = conn
            .randr_create_lease(root, lease, &[crtc], &[output])?
            .reply()
            .map_err(|err| match err {
                ReplyError::X11Error(err) => X11LeaseError::CreateLease(err),
                err => err.into(),
            })?;
        info!(output = name, "got lease");
        let fd: OwnedFd = reply.master_fd.into();
        Ok((Lessor { _conn: conn, lease }, fd))
    }
}
