use std::io::{self, Write};

use clap::Parser;
use drminfo::{drm::DrmOutput, egl::EglOutput, session::AutoSession, tty};
use drminfo_tools::{Device, Result};

/// Render with OpenGL through EGL and GBM and show the result
#[derive(Parser, Debug)]
#[command(name = "egltest", version, about, long_about = None)]
struct Cli {
    /// Autotest mode
    #[arg(short, long)]
    autotest: bool,
    /// Print device info
    #[arg(short, long)]
    info: bool,
    /// Print extensions
    #[arg(short = 'x', long)]
    exts: bool,
    /// Pick card
    #[arg(short, long, value_name = "NR", default_value_t = 0)]
    card: u32,
    /// Pick output
    #[arg(short, long, value_name = "NAME")]
    output: Option<String>,
    /// Pick video mode
    #[arg(short, long, value_name = "MODE")]
    mode: Option<String>,
    /// Set sleep time
    #[arg(short, long, value_name = "SECS", default_value_t = 60)]
    sleep: u32,
    /// Get a drm lease for output
    #[arg(long, value_name = "OUTPUT")]
    lease: Option<String>,
    /// Print bash completion script
    #[arg(long)]
    complete_bash: bool,
}

/// One extension name per line.
fn print_extensions<W: Write>(out: &mut W, extensions: &[String]) -> io::Result<()> {
    for ext in extensions {
        writeln!(out, "{}", ext)?;
    }
    Ok(())
}

fn run(cli: Cli) -> Result {
    let mut session = AutoSession::new();
    let dev = Device::open(cli.card, cli.lease.as_deref(), &mut session)?;
    let output = DrmOutput::new(&dev.card, cli.output.as_deref(), cli.mode.as_deref())?;
    let mut egl = EglOutput::new(&output)?;

    if cli.info || cli.exts {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        if cli.info {
            write!(out, "{}", egl.info())?;
        }
        if cli.exts {
            print_extensions(&mut out, &egl.extensions())?;
        }
        return Ok(0);
    }

    egl.draw();
    egl.flush(&output)?;

    if cli.autotest {
        println!("---ok---");
        io::stdout().flush()?;
    }
    tty::wait_for_key(cli.sleep)?;

    // the egl surface has to go before the output restores the crtc
    drop(egl);
    drop(output);
    Ok(0)
}

fn main() {
    let cli = Cli::parse();
    if cli.complete_bash {
        drminfo_tools::complete_bash::<Cli>();
    }
    drminfo_tools::init_logging();
    drminfo_tools::exit("egltest", run(cli))
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};

    use super::{print_extensions, Cli};

    #[test]
    fn cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn options() {
        let cli = Cli::try_parse_from(["egltest", "-i", "-x", "-s", "5"]).unwrap();
        assert!(cli.info && cli.exts);
        assert_eq!(cli.sleep, 5);
        assert_eq!(cli.card, 0);
    }

    #[test]
    fn extensions_one_per_line() {
        let exts = vec!["GL_ARB_multitexture".to_string(), "GL_EXT_bgra".to_string()];
        let mut out = Vec::new();
        print_extensions(&mut out, &exts).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "GL_ARB_multitexture\nGL_EXT_bgra\n");
    }
}
