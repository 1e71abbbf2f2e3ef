use drm::{
    control::{connector, crtc, framebuffer, plane, Device as ControlDevice, Mode, PlaneType},
    Device as BasicDevice,
    ClientCapability,
};
use tracing::{debug, info, trace, warn};

use super::{names, AccessError, DrmCard, Error};

/// A connector driven by a crtc in a fixed mode
///
/// Creating the output saves the state of the crtc; dropping it restores that state.
#[derive(Debug)]
pub struct DrmOutput {
    card: DrmCard,
    connector: connector::Info,
    name: String,
    mode: Mode,
    crtc: crtc::Handle,
    saved: Option<crtc::Info>,
}

impl DrmOutput {
    /// Picks connector, mode, encoder and crtc.
    ///
    /// - `output` selects a connector by name (`HDMIA-1`), default is the first connected
    ///   connector which has modes.
    /// - `mode` selects a mode by kernel name or `WxH`, default is the preferred mode
    ///   (or the first one if none is marked preferred).
    ///
    /// The currently active encoder is used if there is one, with its crtc. Otherwise the
    /// first encoder and the first crtc it can drive which is not in use.
    pub fn new(card: &DrmCard, output: Option<&str>, mode: Option<&str>) -> Result<DrmOutput, Error> {
        let res = card
            .resource_handles()
            .map_err(|source| card.access_error("Error loading drm resources", source))?;

        let connectors = res
            .connectors()
            .iter()
            .filter_map(|handle| match card.get_connector(*handle, false) {
                Ok(info) => Some(info),
                Err(err) => {
                    warn!(?handle, ?err, "failed to get connector");
                    None
                }
            })
            .collect::<Vec<_>>();

        let connector = match output {
            Some(output) => connectors
                .into_iter()
                .find(|conn| names::conn_name(conn) == output)
                .ok_or_else(|| Error::OutputNotFound(output.to_string()))?,
            None => connectors
                .into_iter()
                .find(|conn| conn.state() == connector::State::Connected && !conn.modes().is_empty())
                .ok_or(Error::NoOutput)?,
        };
        let name = names::conn_name(&connector);
        if connector.modes().is_empty() {
            return Err(Error::NoModes(name));
        }

        let mode = match mode {
            Some(wanted) => *connector
                .modes()
                .iter()
                .find(|m| names::mode_matches(m, wanted))
                .ok_or_else(|| Error::ModeNotFound {
                    mode: wanted.to_string(),
                    output: name.clone(),
                })?,
            None => connector
                .modes()
                .iter()
                .find(|m| m.mode_type().contains(drm::control::ModeTypeFlags::PREFERRED))
                .copied()
                .unwrap_or(connector.modes()[0]),
        };

        let encoder = connector
            .current_encoder()
            .or_else(|| connector.encoders().first().copied())
            .ok_or_else(|| Error::NoEncoder(name.clone()))?;
        let encoder = card
            .get_encoder(encoder)
            .map_err(|source| card.access_error("Error loading encoder info", source))?;

        let crtc = match encoder.crtc() {
            Some(crtc) => crtc,
            None => {
                let busy = res
                    .crtcs()
                    .iter()
                    .filter(|crtc| {
                        card.get_crtc(**crtc)
                            .map(|info| info.mode().is_some())
                            .unwrap_or(false)
                    })
                    .copied()
                    .collect::<Vec<_>>();
                let possible = res.filter_crtcs(encoder.possible_crtcs());
                possible
                    .iter()
                    .find(|crtc| !busy.contains(crtc))
                    .or_else(|| possible.first())
                    .copied()
                    .ok_or_else(|| Error::NoCrtc(name.clone()))?
            }
        };

        let saved = match card.get_crtc(crtc) {
            Ok(info) => Some(info),
            Err(err) => {
                warn!(?crtc, ?err, "failed to save crtc state");
                None
            }
        };

        let (w, h) = mode.size();
        info!(output = %name, w, h, ?crtc, "using output");
        Ok(DrmOutput {
            card: card.clone(),
            connector,
            name,
            mode,
            crtc,
            saved,
        })
    }

    /// The device
    pub fn card(&self) -> &DrmCard {
        &self.card
    }

    /// Connector info
    pub fn connector(&self) -> &connector::Info {
        &self.connector
    }

    /// Output name, e.g. `HDMIA-1`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The selected mode
    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    /// Mode size in pixels
    pub fn size(&self) -> (u32, u32) {
        let (w, h) = self.mode.size();
        (w as u32, h as u32)
    }

    /// The crtc driving the connector
    pub fn crtc(&self) -> crtc::Handle {
        self.crtc
    }

    /// Scans out `fb` on the output.
    pub fn show_fb(&self, fb: framebuffer::Handle) -> Result<(), AccessError> {
        trace!(?fb, crtc = ?self.crtc, "set crtc");
        self.card
            .set_crtc(
                self.crtc,
                Some(fb),
                (0, 0),
                &[self.connector.handle()],
                Some(self.mode),
            )
            .map_err(|source| self.card.access_error("drmModeSetCrtc() failed", source))
    }

    /// Flushes changes of a framebuffer to the screen.
    ///
    /// Drivers without dirty tracking refuse the call, which is fine.
    pub fn dirty_fb(&self, fb: framebuffer::Handle) -> Result<(), AccessError> {
        match self.card.dirty_framebuffer(fb, &[]) {
            Ok(()) => Ok(()),
            Err(err) if err.raw_os_error() == Some(libc::ENOSYS) => Ok(()),
            Err(err) => Err(self.card.access_error("drmModeDirtyFB() failed", err)),
        }
    }

    /// Finds the primary plane of the crtc.
    ///
    /// Returns `None` when the driver does not expose universal planes.
    pub fn primary_plane(&self) -> Option<plane::Info> {
        if let Err(err) = self.card.set_client_capability(ClientCapability::UniversalPlanes, true) {
            debug!(?err, "no universal planes");
            return None;
        }
        let res = self.card.resource_handles().ok()?;
        let planes = self.card.plane_handles().ok()?;
        planes
            .iter()
            .filter_map(|plane| self.card.get_plane(*plane).ok())
            .filter(|info| res.filter_crtcs(info.possible_crtcs()).contains(&self.crtc))
            .find(|info| plane_type(&self.card, info.handle()) == Some(PlaneType::Primary))
    }

    /// Checks whether the primary plane can scan out `fourcc`.
    ///
    /// Without plane information every format is assumed to work.
    pub fn probe_primary(&self, fourcc: drm_fourcc::DrmFourcc) -> bool {
        match self.primary_plane() {
            Some(plane) => plane.formats().contains(&(fourcc as u32)),
            None => true,
        }
    }
}

impl Drop for DrmOutput {
    fn drop(&mut self) {
        let Some(saved) = self.saved.take() else {
            return;
        };
        debug!(crtc = ?self.crtc, "restoring crtc");
        if let Err(err) = self.card.set_crtc(
            self.crtc,
            saved.framebuffer(),
            saved.position(),
            &[self.connector.handle()],
            saved.mode(),
        ) {
            warn!(?err, "failed to restore crtc");
        }
    }
}

/// Reads the `type` property of a plane.
pub(crate) fn plane_type(card: &DrmCard, plane: plane::Handle) -> Option<PlaneType> {
    let props = card.get_properties(plane).ok()?;
    let (ids, vals) = props.as_props_and_values();
    for (&id, &val) in ids.iter().zip(vals.iter()) {
        if let Ok(info) = card.get_property(id) {
            if info.name().to_str().map(|x| x == "type").unwrap_or(false) {
                return match val {
                    x if x == PlaneType::Primary as u64 => Some(PlaneType::Primary),
                    x if x == PlaneType::Cursor as u64 => Some(PlaneType::Cursor),
                    x if x == PlaneType::Overlay as u64 => Some(PlaneType::Overlay),
                    _ => None,
                };
            }
        }
    }
    None
}
