//! Device listings printed by `drminfo`.

use std::io::{self, Write};

use drm::{
    buffer::DrmModifier,
    control::{crtc, property, Device as ControlDevice, ResourceHandle},
    ClientCapability, Device as BasicDevice, DriverCapability,
};
use indexmap::IndexMap;
use tracing::{debug, warn};

use super::{dumb, names, node, output::plane_type, DrmCard, DrmOutput};
use crate::{
    format::{fourcc_name, FbFormat, FORMATS},
    session::DirectSession,
};

const CAPS: &[(&str, DriverCapability)] = &[
    ("DUMB_BUFFER", DriverCapability::DumbBuffer),
    ("VBLANK_HIGH_CRTC", DriverCapability::VBlankHighCRTC),
    ("DUMB_PREFERRED_DEPTH", DriverCapability::DumbPreferredDepth),
    ("DUMB_PREFER_SHADOW", DriverCapability::DumbPreferShadow),
    ("PRIME", DriverCapability::Prime),
    ("TIMESTAMP_MONOTONIC", DriverCapability::MonotonicTimestamp),
    ("ASYNC_PAGE_FLIP", DriverCapability::ASyncPageFlip),
    ("CURSOR_WIDTH", DriverCapability::CursorWidth),
    ("CURSOR_HEIGHT", DriverCapability::CursorHeight),
    ("ADDFB2_MODIFIERS", DriverCapability::AddFB2Modifiers),
    ("PAGE_FLIP_TARGET", DriverCapability::PageFlipTarget),
    ("CRTC_IN_VBLANK_EVENT", DriverCapability::CRTCInVBlankEvent),
    ("SYNCOBJ", DriverCapability::SyncObj),
    ("SYNCOBJ_TIMELINE", DriverCapability::TimelineSyncObj),
];

/// Prints the default `drminfo` listing: outputs, encoders, modes and probed formats.
pub fn print_info(card: &DrmCard, out: &mut dyn Write) -> io::Result<()> {
    if let Some(busid) = card.bus_id() {
        writeln!(out, "busid: \"{}\"", busid)?;
    }
    writeln!(out)?;

    let res = card.resource_handles()?;
    for handle in res.connectors() {
        let Ok(conn) = card.get_connector(*handle, false) else {
            continue;
        };
        writeln!(
            out,
            "{}, {}",
            names::conn_name(&conn),
            names::connection_name(conn.state())
        )?;

        for enc in conn.encoders() {
            let Ok(enc) = card.get_encoder(*enc) else {
                continue;
            };
            write!(out, "    encoder: {}", names::encoder_name(enc.kind()))?;
            if conn.current_encoder() == Some(enc.handle()) {
                write!(out, ", active")?;
            }
            if let Some(crtc) = enc.crtc().and_then(|crtc| card.get_crtc(crtc).ok()) {
                write_crtc_geometry(out, &crtc)?;
            }
            writeln!(out)?;
        }

        for (w, h, count) in names::group_modes(conn.modes()) {
            write!(out, "    mode: {}x{}", w, h)?;
            if count > 1 {
                write!(out, " ({}x)", count)?;
            }
            writeln!(out)?;
        }
        writeln!(out)?;
    }

    writeln!(out, "legacy formats")?;
    for fmt in FORMATS.iter().filter(|fmt| fmt.legacy) {
        if dumb::probe_format(card, fmt) {
            writeln!(out, "    bpp {}, depth {}", fmt.bpp, fmt.depth)?;
        }
    }
    writeln!(out)?;

    writeln!(out, "fourcc formats")?;
    for fmt in FORMATS.iter().filter(|fmt| !fmt.legacy) {
        if dumb::probe_format(card, fmt) {
            writeln!(out, "    bpp {}, fourcc {}", fmt.bpp, fmt.name)?;
        }
    }
    writeln!(out)
}

fn write_crtc_geometry(out: &mut dyn Write, crtc: &crtc::Info) -> io::Result<()> {
    let (w, h) = crtc.mode().map(|mode| mode.size()).unwrap_or((0, 0));
    match crtc.position() {
        (0, 0) => write!(out, ", {}x{}", w, h),
        (x, y) => write!(out, ", {}x{}+{}+{}", w, h, x, y),
    }
}

/// Formats usable for framebuffers on `output`.
///
/// A format has to pass the dumb buffer probe and be supported by the primary plane.
pub fn framebuffer_formats(card: &DrmCard, output: Option<&DrmOutput>) -> Vec<&'static FbFormat> {
    FORMATS
        .iter()
        .filter(|fmt| dumb::probe_format(card, fmt))
        .filter(|fmt| output.map_or(true, |output| output.probe_primary(fmt.fourcc)))
        .collect()
}

/// Prints the names of the usable framebuffer formats, one per line.
pub fn print_format_names(card: &DrmCard, output: Option<&DrmOutput>, out: &mut dyn Write) -> io::Result<()> {
    for fmt in framebuffer_formats(card, output) {
        writeln!(out, "{}", fmt.name)?;
    }
    Ok(())
}

/// Prints everything the device tells about itself.
pub fn print_all(card: &DrmCard, output: Option<&DrmOutput>, out: &mut dyn Write) -> io::Result<()> {
    match card.version() {
        Ok(version) => {
            writeln!(out, "driver: {}", version)?;
            writeln!(out, "    date: {}", version.date)?;
            writeln!(out, "    desc: {}", version.desc)?;
        }
        Err(err) => warn!(%err, "no driver version"),
    }
    if let Some(busid) = card.bus_id() {
        writeln!(out, "    busid: \"{}\"", busid)?;
    }
    writeln!(out)?;

    writeln!(out, "capabilities")?;
    for (name, cap) in CAPS {
        match card.get_driver_capability(*cap) {
            Ok(value) => writeln!(out, "    {:<22}: {}", name, value)?,
            Err(_) => writeln!(out, "    {:<22}: unsupported", name)?,
        }
    }
    writeln!(out)?;

    if let Err(err) = card.set_client_capability(ClientCapability::UniversalPlanes, true) {
        debug!(?err, "no universal planes");
    }
    let res = card.resource_handles()?;

    for handle in res.connectors() {
        let Ok(conn) = card.get_connector(*handle, false) else {
            continue;
        };
        writeln!(
            out,
            "connector {}: {}, {}",
            u32::from(*handle),
            names::conn_name(&conn),
            names::connection_name(conn.state())
        )?;
        if let Some((w, h)) = conn.size() {
            writeln!(out, "    size: {}x{} mm", w, h)?;
        }
        for enc in conn.encoders() {
            let Ok(enc) = card.get_encoder(*enc) else {
                continue;
            };
            write!(
                out,
                "    encoder {}: {}",
                u32::from(enc.handle()),
                names::encoder_name(enc.kind())
            )?;
            if conn.current_encoder() == Some(enc.handle()) {
                write!(out, ", active")?;
            }
            if let Some(crtc) = enc.crtc() {
                write!(out, ", crtc {}", u32::from(crtc))?;
            }
            writeln!(out)?;
        }
        for mode in conn.modes() {
            let (w, h) = mode.size();
            writeln!(
                out,
                "    mode: {}x{} @ {} Hz, name {}",
                w,
                h,
                mode.vrefresh(),
                mode.name().to_string_lossy()
            )?;
        }
        print_properties(card, *handle, out)?;
        writeln!(out)?;
    }

    for (index, handle) in res.crtcs().iter().enumerate() {
        let Ok(crtc) = card.get_crtc(*handle) else {
            continue;
        };
        write!(out, "crtc {} (#{})", u32::from(*handle), index)?;
        if crtc.mode().is_some() {
            write_crtc_geometry(out, &crtc)?;
        }
        if let Some(fb) = crtc.framebuffer() {
            write!(out, ", fb {}", u32::from(fb))?;
        }
        writeln!(out)?;
        print_properties(card, *handle, out)?;
        writeln!(out)?;
    }

    match card.plane_handles() {
        Ok(planes) => {
            for handle in planes {
                let Ok(plane) = card.get_plane(handle) else {
                    continue;
                };
                let ty = match plane_type(card, handle) {
                    Some(drm::control::PlaneType::Primary) => "primary",
                    Some(drm::control::PlaneType::Cursor) => "cursor",
                    Some(drm::control::PlaneType::Overlay) => "overlay",
                    None => "???",
                };
                let crtcs = res
                    .filter_crtcs(plane.possible_crtcs())
                    .iter()
                    .map(|crtc| u32::from(*crtc).to_string())
                    .collect::<Vec<_>>();
                writeln!(
                    out,
                    "plane {}: {}, crtcs {}",
                    u32::from(handle),
                    ty,
                    crtcs.join(" ")
                )?;
                let formats = plane
                    .formats()
                    .iter()
                    .map(|code| fourcc_name(*code))
                    .collect::<Vec<_>>();
                writeln!(out, "    formats: {}", formats.join(" "))?;
                if let Some(in_formats) = plane_in_formats(card, handle) {
                    for (format, modifiers) in in_formats {
                        let modifiers = modifiers
                            .iter()
                            .map(|modifier| format!("{:?}", DrmModifier::from(*modifier)))
                            .collect::<Vec<_>>();
                        writeln!(out, "    {}: {}", fourcc_name(format), modifiers.join(", "))?;
                    }
                }
                print_properties(card, handle, out)?;
                writeln!(out)?;
            }
        }
        Err(err) => debug!(?err, "no planes"),
    }

    writeln!(out, "framebuffer formats")?;
    for fmt in framebuffer_formats(card, output) {
        writeln!(out, "    {}", fmt.describe(true))?;
    }
    writeln!(out)
}

fn print_properties<H: ResourceHandle>(card: &DrmCard, handle: H, out: &mut dyn Write) -> io::Result<()> {
    let Ok(props) = card.get_properties(handle) else {
        return Ok(());
    };
    let (ids, vals) = props.as_props_and_values();
    for (&id, &raw) in ids.iter().zip(vals.iter()) {
        let Ok(info) = card.get_property(id) else {
            continue;
        };
        let name = info.name().to_string_lossy();
        let value = match info.value_type().convert_value(raw) {
            property::Value::Enum(Some(value)) => value.name().to_string_lossy().into_owned(),
            property::Value::Blob(0) => "no blob".to_string(),
            property::Value::Blob(id) => format!("blob {}", id),
            property::Value::Boolean(value) => value.to_string(),
            property::Value::UnsignedRange(value) => value.to_string(),
            property::Value::SignedRange(value) => value.to_string(),
            _ => raw.to_string(),
        };
        writeln!(out, "    prop: {}: {}", name, value)?;
    }
    Ok(())
}

fn plane_in_formats<H: ResourceHandle>(card: &DrmCard, handle: H) -> Option<IndexMap<u32, Vec<u64>>> {
    let props = card.get_properties(handle).ok()?;
    let (ids, vals) = props.as_props_and_values();
    let blob = ids.iter().zip(vals.iter()).find_map(|(id, raw)| {
        let info = card.get_property(*id).ok()?;
        (info.name().to_bytes() == b"IN_FORMATS").then_some(*raw)
    })?;
    let data = card.get_property_blob(blob).ok()?;
    match parse_in_formats(&data) {
        Ok(formats) => Some(formats),
        Err(err) => {
            warn!(%err, "bad IN_FORMATS blob");
            None
        }
    }
}

/// Malformed `IN_FORMATS` property blob
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum InFormatsError {
    /// The blob is shorter than its header
    #[error("header of IN_FORMATS blob doesn't fit in the blob")]
    Header,
    /// Unknown blob layout
    #[error("IN_FORMATS has an invalid version: {0}")]
    Version(u32),
    /// Format or modifier arrays run past the blob
    #[error("formats of IN_FORMATS blob don't fit in the blob")]
    Bounds,
}

const FORMAT_BLOB_CURRENT: u32 = 1;
const HEADER_SIZE: usize = 24;
const MODIFIER_SIZE: usize = 24;

fn read_u32(data: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[offset..offset + 4]);
    u32::from_ne_bytes(bytes)
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    u64::from_ne_bytes(bytes)
}

/// Parses a `drm_format_modifier_blob` into the modifiers supported per format.
///
/// Formats keep the order of the blob; formats without any modifier entry map to an
/// empty list.
pub fn parse_in_formats(data: &[u8]) -> Result<IndexMap<u32, Vec<u64>>, InFormatsError> {
    if data.len() < HEADER_SIZE {
        return Err(InFormatsError::Header);
    }
    let version = read_u32(data, 0);
    if version != FORMAT_BLOB_CURRENT {
        return Err(InFormatsError::Version(version));
    }
    let count_formats = read_u32(data, 8) as usize;
    let formats_offset = read_u32(data, 12) as usize;
    let count_modifiers = read_u32(data, 16) as usize;
    let modifiers_offset = read_u32(data, 20) as usize;

    let formats_end = count_formats
        .checked_mul(4)
        .and_then(|len| len.checked_add(formats_offset))
        .ok_or(InFormatsError::Bounds)?;
    let modifiers_end = count_modifiers
        .checked_mul(MODIFIER_SIZE)
        .and_then(|len| len.checked_add(modifiers_offset))
        .ok_or(InFormatsError::Bounds)?;
    if formats_end > data.len() || modifiers_end > data.len() {
        return Err(InFormatsError::Bounds);
    }

    let codes = (0..count_formats)
        .map(|i| read_u32(data, formats_offset + i * 4))
        .collect::<Vec<_>>();
    let mut formats = codes
        .iter()
        .map(|code| (*code, Vec::new()))
        .collect::<IndexMap<_, _>>();

    for i in 0..count_modifiers {
        let base = modifiers_offset + i * MODIFIER_SIZE;
        let mut mask = read_u64(data, base);
        let offset = read_u32(data, base + 8) as usize;
        let modifier = read_u64(data, base + 16);
        while mask != 0 {
            let bit = mask.trailing_zeros() as usize;
            mask &= mask - 1;
            if let Some(code) = codes.get(offset + bit) {
                if let Some(list) = formats.get_mut(code) {
                    list.push(modifier);
                }
            }
        }
    }
    Ok(formats)
}

/// Lists the cards in the system with their driver.
pub fn list_cards(out: &mut dyn Write) -> io::Result<()> {
    for node in node::primary_nodes()? {
        let card = match DrmCard::open(node.index(), &mut DirectSession) {
            Ok(card) => card,
            Err(err) => {
                writeln!(out, "{}: {}", node, err)?;
                continue;
            }
        };
        match card.version() {
            Ok(version) => write!(out, "{}: {}", node, version)?,
            Err(_) => write!(out, "{}: ???", node)?,
        }
        if let Some(busid) = card.bus_id() {
            write!(out, ", {}", busid)?;
        }
        if let Some(render) = node.dev_path_with_type(node::NodeType::Render) {
            write!(out, ", {}", render.display())?;
        }
        writeln!(out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const XR24: u32 = 0x3432_5258;
    const AR24: u32 = 0x3432_5241;
    const LINEAR: u64 = 0;
    const X_TILED: u64 = 0x0100_0000_0000_0001;

    fn blob(formats: &[u32], modifiers: &[(u64, u32, u64)]) -> Vec<u8> {
        let formats_offset = HEADER_SIZE;
        let modifiers_offset = formats_offset + formats.len() * 4;
        let mut data = Vec::new();
        for value in [
            FORMAT_BLOB_CURRENT,
            0,
            formats.len() as u32,
            formats_offset as u32,
            modifiers.len() as u32,
            modifiers_offset as u32,
        ] {
            data.extend_from_slice(&value.to_ne_bytes());
        }
        for format in formats {
            data.extend_from_slice(&format.to_ne_bytes());
        }
        for (mask, offset, modifier) in modifiers {
            data.extend_from_slice(&mask.to_ne_bytes());
            data.extend_from_slice(&offset.to_ne_bytes());
            data.extend_from_slice(&0u32.to_ne_bytes());
            data.extend_from_slice(&modifier.to_ne_bytes());
        }
        data
    }

    #[test]
    fn in_formats_modifiers_per_format() {
        let data = blob(&[XR24, AR24], &[(0b11, 0, LINEAR), (0b01, 0, X_TILED)]);
        let formats = parse_in_formats(&data).unwrap();
        assert_eq!(formats.len(), 2);
        assert_eq!(formats[&XR24], vec![LINEAR, X_TILED]);
        assert_eq!(formats[&AR24], vec![LINEAR]);
        assert_eq!(formats.keys().copied().collect::<Vec<_>>(), vec![XR24, AR24]);
    }

    #[test]
    fn in_formats_offset_shifts_mask() {
        let data = blob(&[XR24, AR24], &[(0b1, 1, X_TILED)]);
        let formats = parse_in_formats(&data).unwrap();
        assert!(formats[&XR24].is_empty());
        assert_eq!(formats[&AR24], vec![X_TILED]);
    }

    #[test]
    fn in_formats_errors() {
        assert_eq!(parse_in_formats(&[0; 8]), Err(InFormatsError::Header));

        let mut data = blob(&[XR24], &[]);
        data[..4].copy_from_slice(&2u32.to_ne_bytes());
        assert_eq!(parse_in_formats(&data), Err(InFormatsError::Version(2)));

        let mut data = blob(&[XR24], &[(1, 0, LINEAR)]);
        data.truncate(data.len() - 4);
        assert_eq!(parse_in_formats(&data), Err(InFormatsError::Bounds));
    }
}
