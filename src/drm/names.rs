//! Printable names for kernel mode-setting enums

use drm::control::{connector, encoder, Mode};

const UNKNOWN: &str = "???";

const CONNECTOR_TYPES: &[&str] = &[
    "Unknown",
    "VGA",
    "DVII",
    "DVID",
    "DVIA",
    "Composite",
    "SVIDEO",
    "LVDS",
    "Component",
    "9PinDIN",
    "DisplayPort",
    "HDMIA",
    "HDMIB",
    "TV",
    "eDP",
    "VIRTUAL",
    "DSI",
    "DPI",
    "WRITEBACK",
    "SPI",
    "USB",
];

const ENCODER_TYPES: &[&str] = &["NONE", "DAC", "TMDS", "LVDS", "TVDAC", "VIRTUAL", "DSI", "DPMST", "DPI"];

fn lookup(names: &[&'static str], nr: u32) -> Option<&'static str> {
    names.get(nr as usize).copied()
}

/// Name of a connector type number, `???` if unknown.
pub fn connector_type_name(nr: u32) -> &'static str {
    lookup(CONNECTOR_TYPES, nr).unwrap_or(UNKNOWN)
}

/// Name of an encoder type number, `???` if unknown.
pub fn encoder_type_name(nr: u32) -> &'static str {
    lookup(ENCODER_TYPES, nr).unwrap_or(UNKNOWN)
}

/// Name of a connection state.
pub fn connection_name(state: connector::State) -> &'static str {
    match state {
        connector::State::Connected => "connected",
        connector::State::Disconnected => "disconnected",
        connector::State::Unknown => "unknown",
    }
}

/// Name of a connector interface.
pub fn interface_name(interface: connector::Interface) -> &'static str {
    connector_type_name(u32::from(interface))
}

/// Name of an encoder kind.
pub fn encoder_name(kind: encoder::Kind) -> &'static str {
    encoder_type_name(u32::from(kind))
}

/// Output name as used on the command line, e.g. `HDMIA-1`.
pub fn conn_name(info: &connector::Info) -> String {
    output_name(u32::from(info.interface()), info.interface_id())
}

fn output_name(ty: u32, id: u32) -> String {
    let ty = lookup(CONNECTOR_TYPES, ty).unwrap_or("unknown");
    format!("{}-{}", ty, id)
}

/// Collapses runs of modes with the same resolution.
///
/// Returns `(width, height, count)` per run, in the order the kernel lists them.
pub fn group_modes(modes: &[Mode]) -> Vec<(u16, u16, usize)> {
    group_sizes(modes.iter().map(Mode::size))
}

fn group_sizes(sizes: impl IntoIterator<Item = (u16, u16)>) -> Vec<(u16, u16, usize)> {
    let mut groups: Vec<(u16, u16, usize)> = Vec::new();
    for (w, h) in sizes {
        match groups.last_mut() {
            Some((gw, gh, count)) if *gw == w && *gh == h => *count += 1,
            _ => groups.push((w, h, 1)),
        }
    }
    groups
}

/// Parses a `WxH` mode size.
pub fn parse_mode_size(name: &str) -> Option<(u16, u16)> {
    let (w, h) = name.split_once('x')?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

/// Checks whether `mode` matches a user supplied mode name.
///
/// Accepts the kernel mode name (`1920x1080`, `1920x1080i`) as well as plain `WxH`.
pub fn mode_matches(mode: &Mode, name: &str) -> bool {
    if mode.name().to_bytes() == name.as_bytes() {
        return true;
    }
    parse_mode_size(name) == Some(mode.size())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connector_names() {
        assert_eq!(connector_type_name(0), "Unknown");
        assert_eq!(connector_type_name(11), "HDMIA");
        assert_eq!(connector_type_name(14), "eDP");
        assert_eq!(connector_type_name(20), "USB");
        assert_eq!(connector_type_name(21), "???");
    }

    #[test]
    fn encoder_names() {
        assert_eq!(encoder_type_name(0), "NONE");
        assert_eq!(encoder_type_name(2), "TMDS");
        assert_eq!(encoder_type_name(8), "DPI");
        assert_eq!(encoder_type_name(9), "???");
    }

    #[test]
    fn output_names() {
        assert_eq!(output_name(11, 1), "HDMIA-1");
        assert_eq!(output_name(15, 2), "VIRTUAL-2");
        assert_eq!(output_name(99, 3), "unknown-3");
    }

    #[test]
    fn connection_names() {
        assert_eq!(connection_name(connector::State::Connected), "connected");
        assert_eq!(connection_name(connector::State::Disconnected), "disconnected");
        assert_eq!(connection_name(connector::State::Unknown), "unknown");
    }

    #[test]
    fn mode_groups() {
        let sizes = [
            (1920, 1080),
            (1920, 1080),
            (1920, 1080),
            (1280, 720),
            (1024, 768),
            (1024, 768),
            (1920, 1080),
        ];
        assert_eq!(
            group_sizes(sizes),
            vec![(1920, 1080, 3), (1280, 720, 1), (1024, 768, 2), (1920, 1080, 1)]
        );
        assert!(group_sizes([]).is_empty());
    }

    #[test]
    fn mode_sizes() {
        assert_eq!(parse_mode_size("1024x768"), Some((1024, 768)));
        assert_eq!(parse_mode_size("800x600i"), None);
        assert_eq!(parse_mode_size("foo"), None);
        assert_eq!(parse_mode_size("x"), None);
    }
}
