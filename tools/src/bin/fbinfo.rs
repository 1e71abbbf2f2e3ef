use std::io::{self, Write};

use clap::Parser;
use drminfo::{
    fbdev::{self, Summary},
    session::AutoSession,
};
use drminfo_tools::Result;
use tracing::debug;

/// Print information about framebuffer devices
#[derive(Parser, Debug)]
#[command(name = "fbinfo", version, about, long_about = None)]
struct Cli {
    /// Pick framebuffer, default is all of them
    #[arg(short, long, value_name = "NR")]
    framebuffer: Option<u32>,
    /// Print bash completion script
    #[arg(long)]
    complete_bash: bool,
}

fn run(cli: Cli) -> Result {
    let mut session = AutoSession::direct();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    if let Some(nr) = cli.framebuffer {
        let info = fbdev::query(nr, &mut session)?;
        writeln!(out, "{}", Summary(nr, &info))?;
        return Ok(0);
    }

    for nr in 0.. {
        match fbdev::query(nr, &mut session) {
            Ok(info) => writeln!(out, "{}", Summary(nr, &info))?,
            Err(err) if nr == 0 => return Err(err.into()),
            Err(err) => {
                debug!(nr, %err, "last framebuffer");
                break;
            }
        }
    }
    Ok(0)
}

fn main() {
    let cli = Cli::parse();
    if cli.complete_bash {
        drminfo_tools::complete_bash::<Cli>();
    }
    drminfo_tools::init_logging();
    drminfo_tools::exit("fbinfo", run(cli))
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
        assert_eq!(Cli::try_parse_from(["fbinfo"]).unwrap().framebuffer, None);
        assert_eq!(Cli::try_parse_from(["fbinfo", "-f", "1"]).unwrap().framebuffer, Some(1));
    }
}
