use std::{
    io::{self, Write},
    os::unix::io::{AsFd, OwnedFd},
    path::PathBuf,
    process, thread,
    time::Duration,
};

use clap::Parser;
use drminfo::{
    drm::{
        self,
        cursor::Cursor,
        dumb::{self, DumbBuffer, Framebuffer, ImportedBuffer},
        node, DrmOutput, PrimeCaps,
    },
    format::{self, FbFormat, Layout, FORMATS},
    render::{self, Canvas, Reference},
    selftest::{self, Reporter},
    session::AutoSession,
    tty,
    utils::Mapping,
};
use drminfo_tools::{Device, Result};
use nix::{
    sys::wait::{waitpid, WaitStatus},
    unistd::{fork, ForkResult},
};
use tracing::{debug, info, warn};

/// Draw a test pattern into a dumb framebuffer and check the buffer contents
#[derive(Parser, Debug)]
#[command(name = "drmtest", version, about, long_about = None)]
struct Cli {
    /// Pixman mode
    #[arg(short, long)]
    pixman: bool,
    /// Autotest mode (don't print hardware info)
    #[arg(short, long)]
    autotest: bool,
    /// Run dma-buf tests
    #[arg(long)]
    dmabuf: bool,
    /// vgem dma-buf import test
    #[arg(long)]
    vgem: bool,
    /// Driver unbind test
    #[arg(long)]
    unbind: bool,
    /// Try set cursor
    #[arg(long)]
    cursor: bool,
    /// Pick card
    #[arg(short, long, value_name = "NR", default_value_t = 0)]
    card: u32,
    /// Pick output
    #[arg(short, long, value_name = "NAME")]
    output: Option<String>,
    /// Set sleep time
    #[arg(short, long, value_name = "SECS", default_value_t = 60)]
    sleep: u32,
    /// Try <COUNT> display updates, with <SECS> delay
    #[arg(short, long, value_name = "COUNT", default_value_t = 0)]
    update: u32,
    /// Load and display image <FILE>
    #[arg(short, long, value_name = "FILE")]
    image: Option<PathBuf>,
    /// Pick framebuffer format
    #[arg(short, long, value_name = "FMT")]
    format: Option<String>,
    /// Pick video mode
    #[arg(short, long, value_name = "MODE")]
    mode: Option<String>,
    /// Get a drm lease for output
    #[arg(long, value_name = "OUTPUT")]
    lease: Option<String>,
    /// Print bash completion script
    #[arg(long)]
    complete_bash: bool,
}

/// Formats the tool can draw into
fn usable(fmt: &FbFormat, pixman: bool) -> bool {
    !pixman || fmt.pixman().is_some()
}

/// Framebuffer memory and the copies the contents are checked against
struct Screen {
    format: &'static FbFormat,
    layout: Layout,
    pitch: usize,
    canvas: Canvas,
    picture: Option<Canvas>,
    reference: Option<Reference>,
    info: Vec<String>,
}

impl Screen {
    fn draw(&mut self, fbmem: &mut Mapping, update: u32) -> Result<()> {
        if update > 0 {
            let test = format!("test #{}", update);
            render::test_pattern(&mut self.canvas, &["display update", &test]);
        } else if let Some(picture) = &self.picture {
            self.canvas.clone_from(picture);
        } else {
            let info = self.info.iter().map(String::as_str).collect::<Vec<_>>();
            render::test_pattern(&mut self.canvas, &info);
        }

        let mem = fbmem.as_mut_slice().ok_or("framebuffer mapping is read-only")?;
        match &mut self.reference {
            Some(reference) => {
                self.canvas.composite_into(mem, self.pitch, self.format)?;
                let pitch = reference.pitch();
                self.canvas
                    .composite_into(reference.as_bytes_mut(), pitch, self.format)?;
            }
            None => self.canvas.pack_into(mem, self.pitch, &self.layout),
        }
        Ok(())
    }

    fn compare<W: Write>(&self, report: &mut Reporter<W>, name: &str, mem: &[u8]) {
        let Some(reference) = &self.reference else {
            return;
        };
        let line_len = self.canvas.width() as usize * self.format.cpp() as usize;
        match render::compare_lines(
            reference.as_bytes(),
            reference.pitch(),
            mem,
            self.pitch,
            line_len,
            reference.height(),
        ) {
            Ok(()) => report.test(name, true, None),
            Err(line) => report.test(name, false, Some(&format_args!("mismatch line {}", line))),
        }
    }

    /// Compares the mapped buffers with the reference, needs pixman mode.
    fn check_content<W: Write>(
        &self,
        report: &mut Reporter<W>,
        group: &str,
        fbmem: &Mapping,
        dmabuf: Option<&Mapping>,
    ) {
        if self.reference.is_none() {
            return;
        }
        report.head(group);
        self.compare(report, "check mmap", fbmem.as_slice());
        if let Some(dmabuf) = dmabuf {
            self.compare(report, "check dma-buf", dmabuf.as_slice());
        }
    }
}

/// Re-reads the buffers in a child process and merges its results.
fn check_after_fork(
    screen: &Screen,
    report: &mut Reporter,
    fbmem: &Mapping,
    dmabuf: Option<&Mapping>,
) -> Result<()> {
    let _ = io::stderr().flush();
    // SAFETY: the process is single threaded, the child only reads memory and exits
    match unsafe { fork() }? {
        ForkResult::Child => {
            let mut child = Reporter::default();
            screen.check_content(&mut child, "post-fork content", fbmem, dmabuf);
            // skip destructors, the parent still owns the devices
            process::exit(child.status())
        }
        ForkResult::Parent { child } => {
            match waitpid(child, None)? {
                WaitStatus::Exited(_, status) => {
                    let (passed, failed) = selftest::decode_status(status);
                    debug!(passed, failed, "child results");
                    report.add(passed, failed);
                }
                status => {
                    warn!(?status, "child did not exit normally");
                    report.add(0, 1);
                }
            }
            Ok(())
        }
    }
}

fn run(cli: Cli) -> Result {
    let pixman = cli.pixman || cli.dmabuf;

    let format = match cli.format.as_deref() {
        Some(name) => match format::find(name) {
            Some(fmt) => Some(fmt),
            None => {
                eprintln!("unknown format {}, valid choices are:", name);
                for fmt in FORMATS.iter().filter(|fmt| usable(fmt, pixman)) {
                    eprintln!("    {}", fmt.describe(false));
                }
                return Ok(1);
            }
        },
        None => None,
    };
    let image = cli.image.as_deref().map(render::load_image).transpose()?;

    let mut session = AutoSession::new();
    let dev = Device::open(cli.card, cli.lease.as_deref(), &mut session)?;
    let output = DrmOutput::new(&dev.card, cli.output.as_deref(), cli.mode.as_deref())?;
    let version = dev.card.version()?;
    let caps = dev.card.prime_caps()?;

    if cli.dmabuf && !caps.contains(PrimeCaps::EXPORT) {
        return Err(format!("dmabuf export not supported by {}", version.name).into());
    }
    if cli.vgem && !caps.contains(PrimeCaps::IMPORT) {
        return Err(format!("dmabuf import not supported by {}", version.name).into());
    }
    let vgem = if cli.vgem {
        Some(drm::find_driver("vgem", &mut session)?)
    } else {
        None
    };

    let fmt = match format {
        Some(fmt) => fmt,
        None => FORMATS
            .iter()
            .filter(|fmt| usable(fmt, pixman))
            .find(|fmt| dumb::probe_format(&dev.card, fmt) && output.probe_primary(fmt.fourcc))
            .ok_or("no usable drm format found")?,
    };
    if !usable(fmt, pixman) {
        return Err(format!("format {} not supported by pixman", fmt.name).into());
    }
    info!(format = fmt.name, pixman, "using format");

    let mut report = Reporter::default();
    let (width, height) = output.size();

    // with --vgem the buffer lives on vgem and is shown through the imported dma-buf
    let buffer = DumbBuffer::new(vgem.as_ref().unwrap_or(&dev.card), (width, height), fmt)?;
    let view = buffer.view();
    let mut fbmem = buffer.map()?;

    let mut dmabuf_fd: Option<OwnedFd> = None;
    let mut dmabuf_mem: Option<Mapping> = None;
    if cli.dmabuf || vgem.is_some() {
        report.head("create dma-buf");
        if let Some(fd) = report.test_result("dma-buf export", buffer.export()) {
            dmabuf_mem = report.test_result("dma-buf mmap", Mapping::new(&fd, view.len(), 0, false));
            dmabuf_fd = Some(fd);
        }
    }

    let imported = match &vgem {
        Some(_) => {
            let fd = dmabuf_fd.as_ref().ok_or("import vgem dmabuf failed")?;
            Some(
                ImportedBuffer::import(&dev.card, fd.as_fd(), &view)
                    .map_err(|err| format!("import vgem dmabuf failed: {}", err))?,
            )
        }
        None => None,
    };
    let fb = Framebuffer::add(
        &dev.card,
        &imported.as_ref().map_or(view, ImportedBuffer::view),
        fmt,
    )?;

    let picture = image.map(|image| {
        let mut canvas = Canvas::new(width, height);
        render::draw_image(&mut canvas, &image);
        canvas
    });
    let mut info = vec![format!("mode: {}x{}", width, height), fmt.addfb_info()];
    if !cli.autotest {
        info.push(format!("drm driver: {}, output {}", version.name, output.name()));
    }
    let mut screen = Screen {
        format: fmt,
        layout: fmt.layout()?,
        pitch: view.pitch as usize,
        canvas: Canvas::new(width, height),
        picture,
        reference: pixman.then(|| Reference::new(view.pitch as usize, height)),
        info,
    };

    let show = |screen: &mut Screen, fbmem: &mut Mapping, update: u32| -> Result<()> {
        screen.draw(fbmem, update)?;
        if let Err(err) = output.dirty_fb(fb.handle()) {
            debug!(%err, "dirty fb");
        }
        Ok(())
    };

    show(&mut screen, &mut fbmem, 0)?;
    screen.check_content(&mut report, "pre-show content", &fbmem, dmabuf_mem.as_ref());
    output.show_fb(fb.handle())?;
    screen.check_content(&mut report, "post-show content", &fbmem, dmabuf_mem.as_ref());
    fbmem.zap()?;
    if let Some(mem) = &dmabuf_mem {
        mem.zap()?;
    }
    screen.check_content(&mut report, "post-zap content", &fbmem, dmabuf_mem.as_ref());
    check_after_fork(&screen, &mut report, &fbmem, dmabuf_mem.as_ref())?;

    for update in 1..=cli.update {
        thread::sleep(Duration::from_secs(cli.sleep.into()));
        show(&mut screen, &mut fbmem, update)?;
        screen.check_content(&mut report, "post-update content", &fbmem, dmabuf_mem.as_ref());
    }

    if cli.unbind {
        match dev.nr {
            Some(nr) => {
                if let Err(err) = node::unbind_driver(nr) {
                    eprintln!("unbind: {}", err);
                }
            }
            None => eprintln!("unbind: not supported for leases"),
        }
    }

    let _cursor = if cli.cursor {
        let cursor = Cursor::new(&output)?;
        cursor.show(&output)?;
        Some(cursor)
    } else {
        None
    };

    if cli.autotest {
        println!("---ok---");
        io::stdout().flush()?;
    }
    tty::wait_for_key(cli.sleep)?;

    drop(output);
    Ok(report.summary())
}

fn main() {
    let cli = Cli::parse();
    if cli.complete_bash {
        drminfo_tools::complete_bash::<Cli>();
    }
    drminfo_tools::init_logging();
    drminfo_tools::exit("drmtest", run(cli))
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};
    use drminfo::{format, render::Canvas};

    use super::*;

    #[test]
    fn cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["drmtest"]).unwrap();
        assert_eq!(cli.card, 0);
        assert_eq!(cli.sleep, 60);
        assert_eq!(cli.update, 0);
        assert!(!cli.pixman && !cli.dmabuf);
    }

    #[test]
    fn options() {
        let cli = Cli::try_parse_from([
            "drmtest", "-a", "--dmabuf", "-s", "3", "-u", "2", "-f", "XR24", "--lease", "HDMI-1",
        ])
        .unwrap();
        assert!(cli.autotest && cli.dmabuf);
        assert_eq!((cli.sleep, cli.update), (3, 2));
        assert_eq!(cli.format.as_deref(), Some("XR24"));
        assert_eq!(cli.lease.as_deref(), Some("HDMI-1"));
    }

    #[test]
    fn completion_lists_options() {
        let script = drminfo::complete::bash(&Cli::command());
        assert!(script.contains("--dmabuf"));
        assert!(script.contains("--lease"));
        assert!(script.contains("complete -F _drmtest_complete drmtest"));
    }

    #[test]
    fn content_check() {
        let fmt = format::find("XR24").unwrap();
        let (width, height) = (32, 8);
        let pitch = width as usize * 4;
        let mut screen = Screen {
            format: fmt,
            layout: fmt.layout().unwrap(),
            pitch,
            canvas: Canvas::new(width, height),
            picture: None,
            reference: Some(Reference::new(pitch, height)),
            info: Vec::new(),
        };
        // a Reference is used as fake framebuffer memory, pixman wants it 32 bit aligned
        let mut mem = Reference::new(pitch, height);
        render::test_pattern(&mut screen.canvas, &[]);
        let reference = screen.reference.as_mut().unwrap();
        let ref_pitch = reference.pitch();
        screen
            .canvas
            .composite_into(reference.as_bytes_mut(), ref_pitch, fmt)
            .unwrap();
        screen.canvas.composite_into(mem.as_bytes_mut(), pitch, fmt).unwrap();

        let mut report = Reporter::new(Vec::new());
        screen.compare(&mut report, "check mmap", mem.as_bytes());
        mem.as_bytes_mut()[5 * pitch] ^= 0xff;
        screen.compare(&mut report, "check mmap", mem.as_bytes());
        assert_eq!((report.passed(), report.failed()), (1, 1));
        let text = String::from_utf8(report.into_inner()).unwrap();
        assert!(text.contains("FAILED (mismatch line 5)"));
    }
}
