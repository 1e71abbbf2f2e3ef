use std::io;

use clap::Parser;
use drminfo::{
    prime::{self, Selection},
    selftest::Reporter,
    session::AutoSession,
};
use drminfo_tools::Result;
use tracing::info;

/// Test dma-buf sharing between DRM devices
#[derive(Parser, Debug)]
#[command(name = "prime", version, about, long_about = None)]
struct Cli {
    /// List cards
    #[arg(short, long)]
    list: bool,
    /// Export from this card
    #[arg(short, long, value_name = "NR")]
    export: Option<u32>,
    /// Import into this card
    #[arg(short, long, value_name = "NR")]
    import: Option<u32>,
    /// Print bash completion script
    #[arg(long)]
    complete_bash: bool,
}

fn run(cli: Cli) -> Result {
    let mut session = AutoSession::new();
    let mut report = Reporter::with_indent(io::stderr(), 3, 6);
    let mut selection = Selection::new(cli.export, cli.import);

    for nr in 0.. {
        if !prime::card_accessible(nr) {
            break;
        }
        let dev = prime::probe(nr, &mut session, &mut report)?;
        if cli.list {
            continue;
        }
        prime::dumb_test(&dev, &mut report);
        prime::gbm_test(&dev, &mut report);
        selection.update(nr, dev.caps);
    }

    if cli.list {
        return Ok(0);
    }
    match selection.pair() {
        Some((ex, im)) => prime::export_import(ex, im, &mut session, &mut report)?,
        None => info!(?selection, "no card pair for export/import test"),
    }
    Ok(0)
}

fn main() {
    let cli = Cli::parse();
    if cli.complete_bash {
        drminfo_tools::complete_bash::<Cli>();
    }
    drminfo_tools::init_logging();
    drminfo_tools::exit("prime", run(cli))
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
        let cli = Cli::try_parse_from(["prime", "-e", "1", "-i", "0"]).unwrap();
        assert_eq!((cli.export, cli.import), (Some(1), Some(0)));
        assert!(!cli.list);
    }
}
