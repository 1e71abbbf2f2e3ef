use std::{
    io::{self, Write},
    path::PathBuf,
};

use clap::Parser;
use drminfo::{
    fbdev::FbDevice,
    render::{self, Canvas},
    session::AutoSession,
    tty,
};
use drminfo_tools::Result;

/// Draw a test pattern on a framebuffer device
#[derive(Parser, Debug)]
#[command(name = "fbtest", version, about, long_about = None)]
struct Cli {
    /// Autotest mode (don't print hardware info)
    #[arg(short, long)]
    autotest: bool,
    /// Pick framebuffer
    #[arg(short, long, value_name = "NR", default_value_t = 0)]
    framebuffer: u32,
    /// Set sleep time
    #[arg(short, long, value_name = "SECS", default_value_t = 60)]
    sleep: u32,
    /// Load and display image <FILE>
    #[arg(short, long, value_name = "FILE")]
    image: Option<PathBuf>,
    /// Print bash completion script
    #[arg(long)]
    complete_bash: bool,
}

fn run(cli: Cli) -> Result {
    let image = cli.image.as_deref().map(render::load_image).transpose()?;

    // logind does not hand out framebuffer devices
    let mut session = AutoSession::direct();
    let mut fb = FbDevice::init(cli.framebuffer, &mut session)?;

    let info = fb.info().clone();
    let (width, height) = info.size();
    let mut canvas = Canvas::new(width, height);
    match &image {
        Some(image) => render::draw_image(&mut canvas, image),
        None => {
            let mode = format!("mode: {}x{}", width, height);
            let depth = info.depth_info();
            let driver = format!("fb driver: {}", info.id());
            let mut lines = vec![mode.as_str(), depth.as_str()];
            if !cli.autotest {
                lines.push(driver.as_str());
            }
            render::test_pattern(&mut canvas, &lines);
        }
    }

    let layout = fb.format().layout()?;
    let pitch = info.line_length() as usize;
    let mem = fb.memory().ok_or("framebuffer not mapped")?;
    canvas.pack_into(mem, pitch, &layout);

    if cli.autotest {
        println!("---ok---");
        io::stdout().flush()?;
    }
    tty::wait_for_key(cli.sleep)?;
    Ok(0)
}

fn main() {
    let cli = Cli::parse();
    if cli.complete_bash {
        drminfo_tools::complete_bash::<Cli>();
    }
    drminfo_tools::init_logging();
    drminfo_tools::exit("fbtest", run(cli))
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
    fn image_completes_files() {
        let script = drminfo::complete::bash(&Cli::command());
        assert!(script.contains("--image"));
        assert!(script.contains("--framebuffer"));
    }
}
