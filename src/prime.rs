//! dma-buf sharing tests (`prime`)
//!
//! Each card is checked for its PRIME capabilities, then dumb and GBM buffers are
//! exported and mapped. Finally a GBM buffer is exported from one card and imported
//! into another one.

use std::{
    io::{self, Write},
    os::unix::io::{AsFd, OwnedFd},
    path::PathBuf,
};

use drm_fourcc::DrmFourcc;
use gbm::{BufferObject, BufferObjectFlags};
use rustix::fs::{access, Access};
use tracing::{debug, info};

use crate::{
    drm::{dumb::DumbBuffer, node::card_path, DrmCard, PrimeCaps},
    selftest::Reporter,
    session::{self, Session},
    utils::Mapping,
};

/// Size of the test buffers
pub const TEST_SIZE: (u32, u32) = (640, 480);

/// Errors aborting the export/import test
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A card could not be opened
    #[error(transparent)]
    Drm(#[from] crate::drm::Error),
    /// GBM could not be initialized on a card
    #[error("{}: gbm init ({role}) failed", .path.display())]
    Gbm {
        /// Device path
        path: PathBuf,
        /// `ex` or `im`
        role: &'static str,
        /// Underlying error
        #[source]
        source: io::Error,
    },
    /// A test step failed
    #[error("{0} failed")]
    Step(&'static str),
}

/// An opened card with its PRIME capabilities
#[derive(Debug)]
pub struct PrimeDevice {
    /// Card number
    pub nr: u32,
    /// The device
    pub card: DrmCard,
    /// Import and export support
    pub caps: PrimeCaps,
}

/// Returns true if `/dev/dri/card<nr>` exists and is accessible read-write.
pub fn card_accessible(nr: u32) -> bool {
    access(&card_path(nr), Access::READ_OK | Access::WRITE_OK).is_ok()
}

/// Opens a card and prints driver and capabilities.
pub fn probe<S, W>(nr: u32, session: &mut S, report: &mut Reporter<W>) -> Result<PrimeDevice, crate::drm::Error>
where
    S: Session,
    session::Error: From<S::Error>,
    W: Write,
{
    let card = DrmCard::open(nr, session)?;
    let version = card.version()?;
    report.line(format_args!("{}:", card_path(nr).display()));
    report.line(format_args!("   driver: {}", version));

    let caps = card.prime_caps()?;
    report.head("device capabilities");
    report.value("prime import", yes_no(caps.contains(PrimeCaps::IMPORT)));
    report.value("prime export", yes_no(caps.contains(PrimeCaps::EXPORT)));
    debug!(nr, ?caps, "prime caps");

    Ok(PrimeDevice { nr, card, caps })
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

fn mmap_dmabuf<W: Write>(fd: &OwnedFd, report: &mut Reporter<W>) {
    let len = (TEST_SIZE.0 * TEST_SIZE.1 * 4) as usize;
    report.test_result("mmap dmabuf", Mapping::new(fd, len, 0, false));
}

/// Creates a dumb buffer, exports and maps it.
pub fn dumb_test<W: Write>(dev: &PrimeDevice, report: &mut Reporter<W>) {
    report.head("test dumb buffer (ioctl)");
    let Some(buffer) = report.test_result(
        "create buffer",
        DumbBuffer::with_bpp(&dev.card, TEST_SIZE, DrmFourcc::Xrgb8888, 32),
    ) else {
        return;
    };
    if !dev.caps.contains(PrimeCaps::EXPORT) {
        return;
    }
    if let Some(fd) = report.test_result("export buffer", buffer.export()) {
        mmap_dmabuf(&fd, report);
    }
}

fn create_bo(gbm: &gbm::Device<DrmCard>) -> io::Result<BufferObject<()>> {
    gbm.create_buffer_object::<()>(
        TEST_SIZE.0,
        TEST_SIZE.1,
        DrmFourcc::Xrgb8888,
        BufferObjectFlags::empty(),
    )
}

/// Creates a GBM buffer, exports and maps it.
pub fn gbm_test<W: Write>(dev: &PrimeDevice, report: &mut Reporter<W>) {
    report.head("test gbm buffer (mesa-libgbm)");
    let Some(gbm) = report.test_result("create gbm dev", gbm::Device::new(dev.card.clone())) else {
        return;
    };
    let Some(bo) = report.test_result("create gbm bo", create_bo(&gbm)) else {
        return;
    };
    if !dev.caps.contains(PrimeCaps::EXPORT) {
        return;
    }
    if let Some(fd) = report.test_result("export gbm bo", bo.fd()) {
        mmap_dmabuf(&fd, report);
    }
}

/// Choice of the exporting and the importing card
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Selection {
    /// Exporting card
    pub ex: Option<u32>,
    /// Importing card
    pub im: Option<u32>,
    fixed_ex: bool,
    fixed_im: bool,
}

impl Selection {
    /// Starts with the cards given on the command line, if any.
    pub fn new(ex: Option<u32>, im: Option<u32>) -> Selection {
        Selection {
            ex,
            im,
            fixed_ex: ex.is_some(),
            fixed_im: im.is_some(),
        }
    }

    /// Considers card `nr`.
    ///
    /// The first exporting and importing cards are picked, preferring a pair of
    /// two different cards.
    pub fn update(&mut self, nr: u32, caps: PrimeCaps) {
        if caps.contains(PrimeCaps::EXPORT) && !self.fixed_ex && (self.ex.is_none() || self.ex == self.im) {
            self.ex = Some(nr);
        }
        if caps.contains(PrimeCaps::IMPORT) && !self.fixed_im && (self.im.is_none() || self.im == self.ex) {
            self.im = Some(nr);
        }
    }

    /// The pair to test, if there are two different cards.
    pub fn pair(&self) -> Option<(u32, u32)> {
        match (self.ex, self.im) {
            (Some(ex), Some(im)) if ex != im => Some((ex, im)),
            _ => None,
        }
    }
}

/// Exports a GBM buffer from card `ex` and imports it into card `im`.
pub fn export_import<S, W>(ex: u32, im: u32, session: &mut S, report: &mut Reporter<W>) -> Result<(), Error>
where
    S: Session,
    session::Error: From<S::Error>,
    W: Write,
{
    report.line(format_args!("test export/import: card {} -> card {}", ex, im));

    let card_ex = DrmCard::open(ex, session)?;
    let gbm_ex = gbm::Device::new(card_ex).map_err(|source| Error::Gbm {
        path: card_path(ex),
        role: "ex",
        source,
    })?;
    let card_im = DrmCard::open(im, session)?;
    let gbm_im = gbm::Device::new(card_im).map_err(|source| Error::Gbm {
        path: card_path(im),
        role: "im",
        source,
    })?;

    let bo_ex = report
        .test_result("create gbm bo", create_bo(&gbm_ex))
        .ok_or(Error::Step("create gbm bo"))?;
    let dmabuf = report
        .test_result("export gbm bo", bo_ex.fd())
        .ok_or(Error::Step("export gbm bo"))?;
    let _bo_im = report
        .test_result(
            "import gbm bo",
            gbm_im.import_buffer_object_from_dma_buf::<()>(
                dmabuf.as_fd(),
                TEST_SIZE.0,
                TEST_SIZE.1,
                TEST_SIZE.0 * 4,
                DrmFourcc::Xrgb8888,
                BufferObjectFlags::empty(),
            ),
        )
        .ok_or(Error::Step("import gbm bo"))?;
    info!(ex, im, "imported buffer");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOTH: PrimeCaps = PrimeCaps::IMPORT.union(PrimeCaps::EXPORT);

    #[test]
    fn two_capable_cards() {
        let mut sel = Selection::new(None, None);
        sel.update(0, BOTH);
        assert_eq!(sel.pair(), None);
        sel.update(1, BOTH);
        assert_eq!((sel.ex, sel.im), (Some(1), Some(0)));
        assert_eq!(sel.pair(), Some((1, 0)));
        sel.update(2, BOTH);
        assert_eq!(sel.pair(), Some((1, 0)));
    }

    #[test]
    fn exporter_and_importer() {
        let mut sel = Selection::new(None, None);
        sel.update(0, PrimeCaps::EXPORT);
        sel.update(1, PrimeCaps::empty());
        sel.update(2, PrimeCaps::IMPORT);
        assert_eq!(sel.pair(), Some((0, 2)));
    }

    #[test]
    fn fixed_cards() {
        let mut sel = Selection::new(Some(3), None);
        sel.update(0, BOTH);
        sel.update(1, BOTH);
        assert_eq!(sel.pair(), Some((3, 0)));

        let mut sel = Selection::new(Some(1), Some(1));
        sel.update(0, BOTH);
        assert_eq!(sel.pair(), None);
    }

    #[test]
    fn single_card() {
        let mut sel = Selection::new(None, None);
        sel.update(0, BOTH);
        assert_eq!((sel.ex, sel.im), (Some(0), Some(0)));
        assert_eq!(sel.pair(), None);
    }
}
