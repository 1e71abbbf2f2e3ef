use std::io::{self, Write};

use clap::Parser;
use drminfo::{
    drm::{info, DrmOutput},
    session::AutoSession,
};
use drminfo_tools::{Device, Result};
use tracing::debug;

/// Print information about DRM devices
#[derive(Parser, Debug)]
#[command(name = "drminfo", version, about, long_about = None)]
struct Cli {
    /// Pick card
    #[arg(short, long, value_name = "NR", default_value_t = 0)]
    card: u32,
    /// Print everything: capabilities, crtcs, planes and properties
    #[arg(short = 'a', long)]
    all: bool,
    /// Print usable framebuffer formats, one per line
    #[arg(short = 'F', long)]
    formats: bool,
    /// List all cards
    #[arg(short = 'l', long)]
    list: bool,
    /// Output used to probe primary plane formats
    #[arg(short, long, value_name = "NAME")]
    output: Option<String>,
    /// Video mode of the output
    #[arg(short, long, value_name = "MODE")]
    mode: Option<String>,
    /// Get a drm lease for output
    #[arg(long, value_name = "OUTPUT")]
    lease: Option<String>,
    /// Print bash completion script
    #[arg(long)]
    complete_bash: bool,
}

fn run(cli: Cli) -> Result {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    if cli.list {
        info::list_cards(&mut out)?;
        return Ok(0);
    }

    let mut session = AutoSession::new();
    let dev = Device::open(cli.card, cli.lease.as_deref(), &mut session)?;

    if !cli.all && !cli.formats {
        info::print_info(&dev.card, &mut out)?;
        return Ok(0);
    }

    // primary plane probing needs an output, only an explicitly requested one is mandatory
    let output = match DrmOutput::new(&dev.card, cli.output.as_deref(), cli.mode.as_deref()) {
        Ok(output) => Some(output),
        Err(err) if cli.output.is_none() && cli.mode.is_none() => {
            debug!(%err, "not probing primary plane");
            None
        }
        Err(err) => return Err(err.into()),
    };

    if cli.formats {
        info::print_format_names(&dev.card, output.as_ref(), &mut out)?;
    } else {
        info::print_all(&dev.card, output.as_ref(), &mut out)?;
    }
    out.flush()?;
    Ok(0)
}

fn main() {
    let cli = Cli::parse();
    if cli.complete_bash {
        drminfo_tools::complete_bash::<Cli>();
    }
    drminfo_tools::init_logging();
    drminfo_tools::exit("drminfo", run(cli))
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};

    use super::Cli;

    #[test]
    fn cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn options() {
        let cli = Cli::try_parse_from(["drminfo", "-c", "1", "-F", "-o", "DP-1"]).unwrap();
        assert_eq!(cli.card, 1);
        assert!(cli.formats);
        assert_eq!(cli.output.as_deref(), Some("DP-1"));
        assert!(Cli::try_parse_from(["drminfo", "-c", "x"]).is_err());
    }
}
