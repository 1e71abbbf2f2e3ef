//! Keypress handling on the controlling terminal
//!
//! The tools show their output until a key is pressed or a timeout expires.
//! [`RawTty`] switches stdin to non-canonical, non-echoing, non-blocking mode and
//! restores the previous settings on drop. When stdin is not a terminal nothing is
//! changed and [`RawTty::wait`] simply sleeps.

use std::{
    io::{self, Stdin},
    os::unix::io::AsFd,
    thread,
    time::Duration,
};

use rustix::{
    event::{poll, PollFd, PollFlags},
    fs::{fcntl_getfl, fcntl_setfl, OFlags},
    termios::{isatty, tcgetattr, tcsetattr, LocalModes, OptionalActions, SpecialCodeIndex, Termios},
};
use tracing::{debug, trace, warn};

/// stdin in raw mode
#[derive(Debug)]
pub struct RawTty {
    stdin: Stdin,
    saved: Option<(Termios, OFlags)>,
}

impl RawTty {
    /// Puts stdin into raw mode if it is a terminal.
    pub fn new() -> io::Result<RawTty> {
        let stdin = io::stdin();
        if !isatty(stdin.as_fd()) {
            debug!("stdin is not a tty");
            return Ok(RawTty { stdin, saved: None });
        }

        let flags = fcntl_getfl(stdin.as_fd())?;
        let termios = tcgetattr(stdin.as_fd())?;

        let mut raw = termios.clone();
        raw.local_modes.remove(LocalModes::ICANON | LocalModes::ECHO);
        raw.special_codes[SpecialCodeIndex::VMIN] = 1;
        raw.special_codes[SpecialCodeIndex::VTIME] = 0;
        fcntl_setfl(stdin.as_fd(), flags | OFlags::NONBLOCK)?;
        tcsetattr(stdin.as_fd(), OptionalActions::Flush, &raw)?;
        trace!("tty in raw mode");

        Ok(RawTty {
            stdin,
            saved: Some((termios, flags)),
        })
    }

    /// Returns true if stdin is a terminal.
    pub fn is_tty(&self) -> bool {
        self.saved.is_some()
    }

    /// Waits up to `secs` seconds for a keypress, forever if `secs` is zero.
    ///
    /// Returns true if input is pending.
    pub fn wait(&self, secs: u32) -> io::Result<bool> {
        if !self.is_tty() {
            thread::sleep(Duration::from_secs(secs.into()));
            return Ok(false);
        }
        let timeout = match secs {
            0 => -1,
            secs => secs.saturating_mul(1000).min(i32::MAX as u32) as i32,
        };
        let mut fds = [PollFd::new(&self.stdin, PollFlags::IN)];
        loop {
            match poll(&mut fds, timeout) {
                Ok(n) => return Ok(n > 0),
                Err(rustix::io::Errno::INTR) => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Reads and discards pending input.
    pub fn drain(&self) {
        if !self.is_tty() {
            return;
        }
        let mut buf = [0u8; 64];
        loop {
            match rustix::io::read(self.stdin.as_fd(), &mut buf) {
                Ok(0) => break,
                Ok(n) => trace!(n, "discarded input"),
                Err(rustix::io::Errno::INTR) => continue,
                Err(_) => break,
            }
        }
    }
}

impl Drop for RawTty {
    fn drop(&mut self) {
        let Some((termios, flags)) = self.saved.take() else {
            return;
        };
        if let Err(err) = fcntl_setfl(self.stdin.as_fd(), flags) {
            warn!(?err, "failed to restore stdin flags");
        }
        if let Err(err) = tcsetattr(self.stdin.as_fd(), OptionalActions::Now, &termios) {
            warn!(?err, "failed to restore terminal");
        }
    }
}

/// Waits for a keypress (or the timeout) and eats the input.
pub fn wait_for_key(secs: u32) -> io::Result<()> {
    let tty = RawTty::new()?;
    tty.wait(secs)?;
    tty.drain();
    Ok(())
}
