//! Framebuffer format table.
//!
//! Every format the tools know how to create, draw into and display is listed in [`FORMATS`].
//! Entries carry the channel layout in the notation used by `drm_fourcc.h`, which is
//! enough to pack pixels without any per-format code:
//!
//! ```
//! # use drminfo::format::find;
//! let xr24 = find("XR24").unwrap();
//! assert_eq!(xr24.fields, "x:R:G:B");
//! assert_eq!(xr24.layout().unwrap().pack(1023, 0, 0), 0xffff0000);
//! ```
//!
//! Legacy entries are added with the depth/bpp based `ADDFB` ioctl instead of `ADDFB2`.
//! They still name a fourcc describing their memory layout, used for drawing.

use std::fmt;

use drm_fourcc::DrmFourcc;

/// virtio-gpu (and virgl) format codes
pub mod virtio {
    /// `VIRTIO_GPU_FORMAT_B8G8R8A8_UNORM`
    pub const B8G8R8A8_UNORM: u32 = 1;
    /// `VIRTIO_GPU_FORMAT_B8G8R8X8_UNORM`
    pub const B8G8R8X8_UNORM: u32 = 2;
    /// `VIRTIO_GPU_FORMAT_A8R8G8B8_UNORM`
    pub const A8R8G8B8_UNORM: u32 = 3;
    /// `VIRTIO_GPU_FORMAT_X8R8G8B8_UNORM`
    pub const X8R8G8B8_UNORM: u32 = 4;
    /// `VIRTIO_GPU_FORMAT_R8G8B8A8_UNORM`
    pub const R8G8B8A8_UNORM: u32 = 67;
    /// `VIRTIO_GPU_FORMAT_X8B8G8R8_UNORM`
    pub const X8B8G8R8_UNORM: u32 = 68;
    /// `VIRTIO_GPU_FORMAT_A8B8G8R8_UNORM`
    pub const A8B8G8R8_UNORM: u32 = 121;
    /// `VIRTIO_GPU_FORMAT_R8G8B8X8_UNORM`
    pub const R8G8B8X8_UNORM: u32 = 134;
}

/// Description of a framebuffer format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FbFormat {
    /// Name used on the command line, the fourcc code for most formats
    pub name: &'static str,
    /// Channels from the most to the least significant bits, e.g. `x:R:G:B`
    pub fields: &'static str,
    /// Bit widths of the channels, e.g. `8:8:8:8`
    pub bits: &'static str,
    /// Bits per pixel
    pub bpp: u32,
    /// Used bits per pixel, the depth passed to legacy `ADDFB`
    pub depth: u32,
    /// Memory layout as DRM fourcc code
    pub fourcc: DrmFourcc,
    /// Framebuffers must be created with legacy `ADDFB`
    pub legacy: bool,
    /// Matching virtio-gpu format code
    pub virtio: Option<u32>,
}

macro_rules! fb_formats {
    (
        $(
            $(#[$legacy: ident])?
            $name: literal => $fourcc: ident {
                fields: $fields: literal,
                bits: $bits: literal,
                bpp: $bpp: expr,
                depth: $depth: expr
                $(, virtio: $virtio: expr)? $(,)?
            }
        ),* $(,)?
    ) => {
        /// All known framebuffer formats, in order of preference.
        pub static FORMATS: &[FbFormat] = &[
            $(
                FbFormat {
                    name: $name,
                    fields: $fields,
                    bits: $bits,
                    bpp: $bpp,
                    depth: $depth,
                    fourcc: DrmFourcc::$fourcc,
                    legacy: fb_formats!(@legacy $($legacy)?),
                    virtio: fb_formats!(@virtio $($virtio)?),
                },
            )*
        ];
    };
    (@legacy legacy) => { true };
    (@legacy) => { false };
    (@virtio $virtio: expr) => { Some($virtio) };
    (@virtio) => { None };
}

fb_formats! {
    // 32 bpp, 8 bits per channel
    "XR24" => Xrgb8888 { fields: "x:R:G:B", bits: "8:8:8:8", bpp: 32, depth: 24, virtio: virtio::B8G8R8X8_UNORM },
    "XB24" => Xbgr8888 { fields: "x:B:G:R", bits: "8:8:8:8", bpp: 32, depth: 24, virtio: virtio::R8G8B8X8_UNORM },
    "RX24" => Rgbx8888 { fields: "R:G:B:x", bits: "8:8:8:8", bpp: 32, depth: 24, virtio: virtio::X8B8G8R8_UNORM },
    "BX24" => Bgrx8888 { fields: "B:G:R:x", bits: "8:8:8:8", bpp: 32, depth: 24, virtio: virtio::X8R8G8B8_UNORM },
    "AR24" => Argb8888 { fields: "A:R:G:B", bits: "8:8:8:8", bpp: 32, depth: 32, virtio: virtio::B8G8R8A8_UNORM },
    "AB24" => Abgr8888 { fields: "A:B:G:R", bits: "8:8:8:8", bpp: 32, depth: 32, virtio: virtio::R8G8B8A8_UNORM },
    "RA24" => Rgba8888 { fields: "R:G:B:A", bits: "8:8:8:8", bpp: 32, depth: 32, virtio: virtio::A8B8G8R8_UNORM },
    "BA24" => Bgra8888 { fields: "B:G:R:A", bits: "8:8:8:8", bpp: 32, depth: 32, virtio: virtio::A8R8G8B8_UNORM },

    // 32 bpp, 10 bits per color channel
    "XR30" => Xrgb2101010 { fields: "x:R:G:B", bits: "2:10:10:10", bpp: 32, depth: 30 },
    "XB30" => Xbgr2101010 { fields: "x:B:G:R", bits: "2:10:10:10", bpp: 32, depth: 30 },
    "RX30" => Rgbx1010102 { fields: "R:G:B:x", bits: "10:10:10:2", bpp: 32, depth: 30 },
    "BX30" => Bgrx1010102 { fields: "B:G:R:x", bits: "10:10:10:2", bpp: 32, depth: 30 },

    // 24 bpp
    "RG24" => Rgb888 { fields: "R:G:B", bits: "8:8:8", bpp: 24, depth: 24 },
    "BG24" => Bgr888 { fields: "B:G:R", bits: "8:8:8", bpp: 24, depth: 24 },

    // 16 bpp, 4 bits per channel
    "XR12" => Xrgb4444 { fields: "x:R:G:B", bits: "4:4:4:4", bpp: 16, depth: 12 },
    "XB12" => Xbgr4444 { fields: "x:B:G:R", bits: "4:4:4:4", bpp: 16, depth: 12 },
    "RX12" => Rgbx4444 { fields: "R:G:B:x", bits: "4:4:4:4", bpp: 16, depth: 12 },
    "BX12" => Bgrx4444 { fields: "B:G:R:x", bits: "4:4:4:4", bpp: 16, depth: 12 },
    "AR12" => Argb4444 { fields: "A:R:G:B", bits: "4:4:4:4", bpp: 16, depth: 16 },
    "AB12" => Abgr4444 { fields: "A:B:G:R", bits: "4:4:4:4", bpp: 16, depth: 16 },
    "RA12" => Rgba4444 { fields: "R:G:B:A", bits: "4:4:4:4", bpp: 16, depth: 16 },
    "BA12" => Bgra4444 { fields: "B:G:R:A", bits: "4:4:4:4", bpp: 16, depth: 16 },

    // 16 bpp, 5 bits per color channel
    "XR15" => Xrgb1555 { fields: "x:R:G:B", bits: "1:5:5:5", bpp: 16, depth: 15 },
    "XB15" => Xbgr1555 { fields: "x:B:G:R", bits: "1:5:5:5", bpp: 16, depth: 15 },
    "RX15" => Rgbx5551 { fields: "R:G:B:x", bits: "5:5:5:1", bpp: 16, depth: 15 },
    "BX15" => Bgrx5551 { fields: "B:G:R:x", bits: "5:5:5:1", bpp: 16, depth: 15 },
    "AR15" => Argb1555 { fields: "A:R:G:B", bits: "1:5:5:5", bpp: 16, depth: 16 },
    "AB15" => Abgr1555 { fields: "A:B:G:R", bits: "1:5:5:5", bpp: 16, depth: 16 },
    "RA15" => Rgba5551 { fields: "R:G:B:A", bits: "5:5:5:1", bpp: 16, depth: 16 },
    "BA15" => Bgra5551 { fields: "B:G:R:A", bits: "5:5:5:1", bpp: 16, depth: 16 },

    // 16 bpp, 5:6:5
    "RG16" => Rgb565 { fields: "R:G:B", bits: "5:6:5", bpp: 16, depth: 16 },
    "BG16" => Bgr565 { fields: "B:G:R", bits: "5:6:5", bpp: 16, depth: 16 },

    // depth/bpp pairs understood by legacy ADDFB
    #[legacy] "32-24" => Xrgb8888 { fields: "x:R:G:B", bits: "8:8:8:8", bpp: 32, depth: 24, virtio: virtio::B8G8R8X8_UNORM },
    #[legacy] "32-30" => Xrgb2101010 { fields: "x:R:G:B", bits: "2:10:10:10", bpp: 32, depth: 30 },
    #[legacy] "24-24" => Rgb888 { fields: "R:G:B", bits: "8:8:8", bpp: 24, depth: 24 },
    #[legacy] "16-16" => Rgb565 { fields: "R:G:B", bits: "5:6:5", bpp: 16, depth: 16 },
    #[legacy] "16-15" => Xrgb1555 { fields: "x:R:G:B", bits: "1:5:5:5", bpp: 16, depth: 15 },
}

/// Looks up a format by its command line name.
pub fn find(name: &str) -> Option<&'static FbFormat> {
    FORMATS.iter().find(|fmt| fmt.name == name)
}

/// Finds the format matching a packed pixel layout.
///
/// `fields` lists `(channel, offset, length)` triples as reported by e.g. fbdev bitfields.
/// Only non-legacy entries are considered.
pub fn find_by_layout(bpp: u32, fields: &[(Channel, u32, u32)]) -> Option<&'static FbFormat> {
    let wanted = |layout: &Layout| {
        fields
            .iter()
            .filter(|(_, _, length)| *length > 0)
            .all(|&(channel, offset, length)| {
                layout
                    .fields()
                    .iter()
                    .any(|f| f.channel == channel && f.shift == offset && f.bits == length)
            })
    };
    FORMATS
        .iter()
        .filter(|fmt| !fmt.legacy && fmt.bpp == bpp)
        .find(|fmt| fmt.layout().map(|layout| wanted(&layout)).unwrap_or(false))
}

/// Returns the four characters of a fourcc code.
pub fn fourcc_name(code: u32) -> String {
    code.to_le_bytes()
        .iter()
        .map(|&c| if c.is_ascii_graphic() || c == b' ' { c as char } else { '?' })
        .collect()
}

impl FbFormat {
    /// Parses the channel layout of this format.
    pub fn layout(&self) -> Result<Layout, LayoutError> {
        Layout::parse(self.fields, self.bits, self.bpp)
    }

    /// Bytes per pixel.
    pub fn cpp(&self) -> u32 {
        (self.bpp + 7) / 8
    }

    /// The matching pixman format, if pixman can handle this format.
    pub fn pixman(&self) -> Option<pixman::FormatCode> {
        pixman::FormatCode::try_from(self.fourcc).ok()
    }

    /// One line description, `XR24: [31:0] x:R:G:B 8:8:8:8, bpp 32, depth 24`.
    ///
    /// With `libs` set the libraries supporting the format are appended.
    pub fn describe(&self, libs: bool) -> String {
        let mut line = format!(
            "{}: [{}:0] {} {}, bpp {}, depth {}",
            self.name,
            self.bpp - 1,
            self.fields,
            self.bits,
            self.bpp,
            self.depth
        );
        if self.legacy {
            line.push_str(" (legacy ADDFB)");
        }
        if libs {
            let mut list = Vec::new();
            if self.pixman().is_some() {
                list.push("pixman");
            }
            if self.virtio.is_some() {
                list.push("virtio");
            }
            if !list.is_empty() {
                line.push_str(&format!(" [{}]", list.join(", ")));
            }
        }
        line
    }

    /// Describes how a framebuffer is created, as shown on the test pattern.
    pub fn addfb_info(&self) -> String {
        if self.legacy {
            format!("bpp {}, depth {} (legacy ADDFB)", self.bpp, self.depth)
        } else {
            format!(
                "bpp {}, fourcc {} (ADDFB2)",
                self.bpp,
                fourcc_name(self.fourcc as u32)
            )
        }
    }
}

impl fmt::Display for FbFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Kind of a channel in a pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Red
    Red,
    /// Green
    Green,
    /// Blue
    Blue,
    /// Alpha, always written as fully opaque
    Alpha,
    /// Unused bits (`x`)
    Padding,
}

/// A single channel of a [`Layout`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    /// What the bits mean
    pub channel: Channel,
    /// Position of the least significant bit
    pub shift: u32,
    /// Width in bits
    pub bits: u32,
}

/// Parsed channel layout of a packed pixel format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    fields: Vec<Field>,
    bpp: u32,
}

/// Errors while parsing a channel layout
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LayoutError {
    /// A channel name is not one of `R`, `G`, `B`, `A`, `x`
    #[error("unknown channel `{0}`")]
    UnknownChannel(String),
    /// A bit width is not a number
    #[error("invalid channel width `{0}`")]
    InvalidWidth(String),
    /// Channel and width lists have different lengths
    #[error("{fields} channels but {bits} widths")]
    CountMismatch {
        /// number of channels
        fields: usize,
        /// number of widths
        bits: usize,
    },
    /// The widths do not add up to the pixel size
    #[error("channels use {sum} bits, pixel has {bpp}")]
    SizeMismatch {
        /// sum of all widths
        sum: u32,
        /// bits per pixel
        bpp: u32,
    },
}

impl Layout {
    /// Parses `x:R:G:B` / `8:8:8:8` style descriptions, most significant channel first.
    pub fn parse(fields: &str, bits: &str, bpp: u32) -> Result<Layout, LayoutError> {
        let channels = fields
            .split(':')
            .map(|name| match name {
                "R" | "r" => Ok(Channel::Red),
                "G" | "g" => Ok(Channel::Green),
                "B" | "b" => Ok(Channel::Blue),
                "A" | "a" => Ok(Channel::Alpha),
                "X" | "x" => Ok(Channel::Padding),
                other => Err(LayoutError::UnknownChannel(other.to_string())),
            })
            .collect::<Result<Vec<_>, _>>()?;
        let widths = bits
            .split(':')
            .map(|width| {
                width
                    .parse::<u32>()
                    .ok()
                    .filter(|w| (1..=16).contains(w))
                    .ok_or_else(|| LayoutError::InvalidWidth(width.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if channels.len() != widths.len() {
            return Err(LayoutError::CountMismatch {
                fields: channels.len(),
                bits: widths.len(),
            });
        }
        let sum = widths.iter().sum::<u32>();
        if sum != bpp {
            return Err(LayoutError::SizeMismatch { sum, bpp });
        }

        let mut shift = bpp;
        let fields = channels
            .into_iter()
            .zip(widths)
            .map(|(channel, bits)| {
                shift -= bits;
                Field { channel, shift, bits }
            })
            .collect();
        Ok(Layout { fields, bpp })
    }

    /// Channels, most significant first.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Bits per pixel.
    pub fn bpp(&self) -> u32 {
        self.bpp
    }

    /// Packs a color given as 10 bit components into a pixel value.
    pub fn pack(&self, r: u16, g: u16, b: u16) -> u32 {
        self.fields.iter().fold(0u32, |pixel, field| {
            let value = match field.channel {
                Channel::Red => scale(r, field.bits),
                Channel::Green => scale(g, field.bits),
                Channel::Blue => scale(b, field.bits),
                Channel::Alpha | Channel::Padding => (1u32 << field.bits) - 1,
            };
            pixel | (value << field.shift)
        })
    }

    /// Writes a pixel value in little endian byte order.
    ///
    /// `dst` must hold at least `bpp / 8` bytes.
    pub fn store(&self, dst: &mut [u8], pixel: u32) {
        let cpp = (self.bpp / 8) as usize;
        dst[..cpp].copy_from_slice(&pixel.to_le_bytes()[..cpp]);
    }
}

fn scale(component: u16, bits: u32) -> u32 {
    let component = u32::from(component.min(1023));
    if bits >= 10 {
        component << (bits - 10)
    } else {
        component >> (10 - bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique() {
        for (i, a) in FORMATS.iter().enumerate() {
            for b in &FORMATS[i + 1..] {
                assert_ne!(a.name, b.name, "duplicate format name");
            }
        }
    }

    #[test]
    fn layouts_are_valid() {
        for fmt in FORMATS {
            let layout = fmt.layout();
            assert!(layout.is_ok(), "{} has a broken layout: {:?}", fmt, layout);
            assert!(fmt.depth <= fmt.bpp, "{} depth exceeds bpp", fmt);
        }
    }

    #[test]
    fn fourcc_names_match_codes() {
        for fmt in FORMATS.iter().filter(|fmt| !fmt.legacy) {
            assert_eq!(fmt.name, fourcc_name(fmt.fourcc as u32));
        }
    }

    #[test]
    fn depth_counts_color_and_alpha_bits() {
        for fmt in FORMATS {
            let layout = fmt.layout().unwrap();
            let used = layout
                .fields()
                .iter()
                .filter(|f| f.channel != Channel::Padding)
                .map(|f| f.bits)
                .sum::<u32>();
            assert_eq!(used, fmt.depth, "{}", fmt);
        }
    }

    #[test]
    fn lookup() {
        assert_eq!(find("XR24").map(|f| f.fourcc), Some(DrmFourcc::Xrgb8888));
        assert!(find("16-15").unwrap().legacy);
        assert!(find("XR99").is_none());
        assert_eq!(FORMATS[0].name, "XR24");
    }

    #[test]
    fn pack_pixels() {
        let xr24 = find("XR24").unwrap().layout().unwrap();
        assert_eq!(xr24.pack(1023, 0, 0), 0xffff0000);
        assert_eq!(xr24.pack(0, 0, 1023), 0xff0000ff);
        assert_eq!(xr24.pack(512, 512, 512), 0xff808080);

        let bx24 = find("BX24").unwrap().layout().unwrap();
        assert_eq!(bx24.pack(1023, 0, 0), 0x0000ffff);

        let rg16 = find("RG16").unwrap().layout().unwrap();
        assert_eq!(rg16.pack(1023, 0, 0), 0xf800);
        assert_eq!(rg16.pack(0, 1023, 0), 0x07e0);
        assert_eq!(rg16.pack(0, 0, 1023), 0x001f);

        let xr30 = find("XR30").unwrap().layout().unwrap();
        assert_eq!(xr30.pack(1023, 1023, 1023), 0xffffffff);
        assert_eq!(xr30.pack(1, 2, 3), 0xc0000000 | (1 << 20) | (2 << 10) | 3);
    }

    #[test]
    fn store_little_endian() {
        let rg24 = find("RG24").unwrap().layout().unwrap();
        let mut buf = [0u8; 4];
        rg24.store(&mut buf, rg24.pack(1023, 0, 0));
        assert_eq!(buf, [0x00, 0x00, 0xff, 0x00]);
    }

    #[test]
    fn parse_errors() {
        assert_eq!(
            Layout::parse("x:R:G:Q", "8:8:8:8", 32),
            Err(LayoutError::UnknownChannel("Q".into()))
        );
        assert_eq!(
            Layout::parse("R:G:B", "8:8", 16),
            Err(LayoutError::CountMismatch { fields: 3, bits: 2 })
        );
        assert_eq!(
            Layout::parse("R:G:B", "8:8:8", 32),
            Err(LayoutError::SizeMismatch { sum: 24, bpp: 32 })
        );
    }

    #[test]
    fn layout_matching() {
        let fmt = find_by_layout(
            32,
            &[
                (Channel::Red, 16, 8),
                (Channel::Green, 8, 8),
                (Channel::Blue, 0, 8),
                (Channel::Alpha, 0, 0),
            ],
        );
        assert_eq!(fmt.map(|f| f.name), Some("XR24"));

        let fmt = find_by_layout(
            16,
            &[(Channel::Red, 11, 5), (Channel::Green, 5, 6), (Channel::Blue, 0, 5)],
        );
        assert_eq!(fmt.map(|f| f.name), Some("RG16"));
    }

    #[test]
    fn descriptions() {
        let xr24 = find("XR24").unwrap();
        assert_eq!(xr24.describe(false), "XR24: [31:0] x:R:G:B 8:8:8:8, bpp 32, depth 24");
        assert_eq!(xr24.addfb_info(), "bpp 32, fourcc XR24 (ADDFB2)");
        assert_eq!(
            find("16-16").unwrap().addfb_info(),
            "bpp 16, depth 16 (legacy ADDFB)"
        );
    }
}
