//! Shared plumbing of the command line tools: logging setup, device selection and the
//! common exit path.

use std::{error::Error, io::Write, process};

use clap::CommandFactory;
use drminfo::{
    drm::{
        lease::{self, DrmLease},
        DrmCard,
    },
    session::AutoSession,
};
use tracing_subscriber::EnvFilter;

/// Result of a tool's `run()`, the exit code on success
pub type Result<T = i32> = std::result::Result<T, Box<dyn Error>>;

/// Installs the log subscriber.
///
/// The filter is read from `RUST_LOG` and defaults to `warn`. Logs go to stderr, stdout
/// is reserved for the test protocol.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Prints the bash completion script of `C` to stdout and exits.
pub fn complete_bash<C: CommandFactory>() -> ! {
    print!("{}", drminfo::complete::bash(&C::command()));
    let _ = std::io::stdout().flush();
    process::exit(0)
}

/// Exits with the code returned by `result`, printing `<tool>: <error>` on failure.
pub fn exit(tool: &str, result: Result) -> ! {
    match result {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("{}: {}", tool, error_chain(err.as_ref()));
            process::exit(1)
        }
    }
}

/// Formats an error followed by its sources, `outer: inner: innermost`.
///
/// Sources whose text is already part of the message are skipped.
pub fn error_chain(err: &dyn Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(err) = source {
        let msg = err.to_string();
        if !text.contains(&msg) {
            text.push_str(": ");
            text.push_str(&msg);
        }
        source = err.source();
    }
    text
}

/// The device a tool works on
///
/// Either card `nr`, or a card obtained by leasing an output from the running
/// display server. The lease is held as long as this value lives.
#[derive(Debug)]
pub struct Device {
    /// The opened card
    pub card: DrmCard,
    /// Number of the card, `None` for leases
    pub nr: Option<u32>,
    _lease: Option<DrmLease>,
}

impl Device {
    /// Leases `output` if given, opens `/dev/dri/card<nr>` otherwise.
    pub fn open(nr: u32, lease_output: Option<&str>, session: &mut AutoSession) -> Result<Device> {
        match lease_output {
            Some(output) => {
                let lease = lease::lease(output)?;
                Ok(Device {
                    card: lease.card().clone(),
                    nr: None,
                    _lease: Some(lease),
                })
            }
            None => Ok(Device {
                card: DrmCard::open(nr, session)?,
                nr: Some(nr),
                _lease: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Layer(&'static str, Option<Box<Layer>>);

    impl std::fmt::Display for Layer {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.0)
        }
    }

    impl Error for Layer {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            self.1.as_deref().map(|err| err as &(dyn Error + 'static))
        }
    }

    #[test]
    fn chain() {
        let err = Layer("open /dev/dri/card9", Some(Box::new(Layer("No such file or directory", None))));
        assert_eq!(error_chain(&err), "open /dev/dri/card9: No such file or directory");
    }

    #[test]
    fn chain_skips_repeated_sources() {
        let err = Layer("ioctl: Permission denied", Some(Box::new(Layer("Permission denied", None))));
        assert_eq!(error_chain(&err), "ioctl: Permission denied");
    }
}
