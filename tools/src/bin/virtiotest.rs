use std::io::{self, Write};

use clap::Parser;
use drminfo::{
    drm::{
        dumb::Framebuffer,
        virtio::VirtioGpu,
        DrmCard, DrmOutput,
    },
    format::{self, FbFormat, FORMATS},
    render::{self, Canvas},
    session::AutoSession,
    tty,
};
use drminfo_tools::Result;
use tracing::info;

/// Exercise virtio-gpu resources
#[derive(Parser, Debug)]
#[command(name = "virtiotest", version, about, long_about = None)]
struct Cli {
    /// Pick card
    #[arg(short, long, value_name = "NR", default_value_t = 0)]
    card: u32,
    /// Print device info
    #[arg(short, long)]
    info: bool,
    /// List supported capsets
    #[arg(short, long)]
    list: bool,
    /// Autotest mode (don't print hardware info)
    #[arg(short, long)]
    autotest: bool,
    /// Set sleep time
    #[arg(short, long, value_name = "SECS", default_value_t = 60)]
    sleep: u32,
    /// Pick framebuffer format
    #[arg(short, long, value_name = "FMT")]
    format: Option<String>,
    /// Pick output
    #[arg(short, long, value_name = "NAME")]
    output: Option<String>,
    /// Pick video mode
    #[arg(short, long, value_name = "MODE")]
    mode: Option<String>,
    /// Print bash completion script
    #[arg(long)]
    complete_bash: bool,
}

fn virtio_formats() -> impl Iterator<Item = &'static FbFormat> {
    FORMATS.iter().filter(|fmt| fmt.virtio.is_some())
}

fn run(cli: Cli) -> Result {
    let fmt = match cli.format.as_deref() {
        Some(name) => match format::find(name).filter(|fmt| fmt.virtio.is_some()) {
            Some(fmt) => fmt,
            None => {
                eprintln!("unknown format {}, valid choices are:", name);
                for fmt in virtio_formats() {
                    eprintln!("    {}", fmt.describe(false));
                }
                return Ok(1);
            }
        },
        None => virtio_formats().next().ok_or("no virtio format known")?,
    };

    let mut session = AutoSession::new();
    let card = DrmCard::open(cli.card, &mut session)?;
    let gpu = VirtioGpu::new(&card, cli.card)?;

    if cli.info || cli.list {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        if cli.info {
            gpu.print_caps(&mut out)?;
        }
        if cli.list {
            gpu.print_capsets(&mut out)?;
        }
        return Ok(0);
    }

    let output = DrmOutput::new(&card, cli.output.as_deref(), cli.mode.as_deref())?;
    let (width, height) = output.size();
    let resource = gpu.create_resource((width, height), fmt)?;
    let view = resource.view();
    let mut mapping = resource.map()?;

    let mut info = vec![format!("mode: {}x{}", width, height), fmt.addfb_info()];
    if !cli.autotest {
        let version = card.version()?;
        info.push(format!("drm driver: {}, output {}", version.name, output.name()));
    }
    let mut canvas = Canvas::new(width, height);
    render::test_pattern(&mut canvas, &info.iter().map(String::as_str).collect::<Vec<_>>());
    let mem = mapping.as_mut_slice().ok_or("resource mapping is read-only")?;
    canvas.pack_into(mem, view.pitch as usize, &fmt.layout()?);

    resource.transfer_to_host()?;
    resource.wait()?;
    info!(format = fmt.name, width, height, "resource transferred");

    let fb = Framebuffer::add(&card, &view, fmt)?;
    output.show_fb(fb.handle())?;

    if cli.autotest {
        println!("---ok---");
        io::stdout().flush()?;
    }
    tty::wait_for_key(cli.sleep)?;

    drop(output);
    Ok(0)
}

fn main() {
    let cli = Cli::parse();
    if cli.complete_bash {
        drminfo_tools::complete_bash::<Cli>();
    }
    drminfo_tools::init_logging();
    drminfo_tools::exit("virtiotest", run(cli))
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};

    use super::*;

    #[test]
    fn cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn options() {
        let cli = Cli::try_parse_from(["virtiotest", "-i", "-l", "-c", "1"]).unwrap();
        assert!(cli.info && cli.list);
        assert_eq!(cli.card, 1);
    }

    #[test]
    fn default_format_is_virtio_capable() {
        let fmt = virtio_formats().next().unwrap();
        assert_eq!(fmt.name, "XR24");
        assert!(virtio_formats().all(|fmt| fmt.bpp == 32));
    }
}
