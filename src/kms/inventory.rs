//! Display pipeline discovery and selection.
//!
//! Discovery takes a point-in-time snapshot of the subsystem's object lists;
//! selection then runs as pure functions over that snapshot. Policies follow
//! enumeration order throughout: first connected connector with modes, first
//! CRTC, first plane of the wanted kind that can reach the CRTC.

use std::ops::{Bound, RangeBounds};

use drm::control::{connector, crtc, plane, Device as ControlDevice, Mode, PlaneType};
use tracing::trace;

/// Collapse an inclusive bound range into the `(min, max)` tuple the snapshot
/// stores. The drm `ResourceHandles` limits are exposed only through
/// `RangeBounds` accessors, so the endpoints are read back out here.
fn range_bounds_to_tuple(range: impl RangeBounds<u32>) -> (u32, u32) {
    let min = match range.start_bound() {
        Bound::Included(&v) => v,
        Bound::Excluded(&v) => v.saturating_add(1),
        Bound::Unbounded => 0,
    };
    let max = match range.end_bound() {
        Bound::Included(&v) => v,
        Bound::Excluded(&v) => v.saturating_sub(1),
        Bound::Unbounded => u32::MAX,
    };
    (min, max)
}

use super::device::Card;
use super::props::{KmsObject, PropertyTable};
use super::{KmsError, KmsResult};

/// Point-in-time snapshot of the display subsystem's object lists.
#[derive(Debug)]
pub struct DisplayResources {
    pub connectors: Vec<ConnectorInfo>,
    pub crtcs: Vec<CrtcInfo>,
    pub encoder_count: usize,
    /// (min, max) framebuffer width the subsystem accepts.
    pub width_limits: (u32, u32),
    /// (min, max) framebuffer height the subsystem accepts.
    pub height_limits: (u32, u32),
}

#[derive(Debug)]
pub struct ConnectorInfo {
    pub handle: connector::Handle,
    /// `HDMI-A-1`-style name derived from the interface type.
    pub name: String,
    pub connected: bool,
    pub modes: Vec<Mode>,
}

#[derive(Debug)]
pub struct CrtcInfo {
    pub handle: crtc::Handle,
    /// Position in the CRTC list. Plane compatibility is expressed as a
    /// bitmask over these indices.
    pub index: usize,
    pub current_mode: Option<Mode>,
}

/// A plane together with the data selection runs on.
#[derive(Debug, Clone)]
pub struct PlaneInfo {
    pub handle: plane::Handle,
    /// Bitmask over CRTC indices this plane can be driven by.
    pub possible_crtcs: u32,
    pub kind: PlaneType,
    /// CRTC the plane is currently bound to, if any.
    pub crtc: Option<crtc::Handle>,
}

/// Planes picked for one CRTC.
#[derive(Debug)]
pub struct SelectedPlanes<'a> {
    pub primary: &'a PlaneInfo,
    pub overlay: Option<&'a PlaneInfo>,
}

impl DisplayResources {
    pub fn discover(card: &Card) -> KmsResult<Self> {
        let handles = card
            .resource_handles()
            .map_err(KmsError::ResourceUnavailable)?;

        let mut connectors = Vec::with_capacity(handles.connectors().len());
        for &handle in handles.connectors() {
            let info = card
                .get_connector(handle, false)
                .map_err(KmsError::ResourceUnavailable)?;
            connectors.push(ConnectorInfo {
                handle,
                name: format!("{}-{}", info.interface().as_str(), info.interface_id()),
                connected: info.state() == connector::State::Connected,
                modes: info.modes().to_vec(),
            });
        }

        let mut crtcs = Vec::with_capacity(handles.crtcs().len());
        for (index, &handle) in handles.crtcs().iter().enumerate() {
            let info = card
                .get_crtc(handle)
                .map_err(KmsError::ResourceUnavailable)?;
            crtcs.push(CrtcInfo {
                handle,
                index,
                current_mode: info.mode(),
            });
        }

        Ok(Self {
            connectors,
            crtcs,
            encoder_count: handles.encoders().len(),
            width_limits: range_bounds_to_tuple(handles.supported_fb_width()),
            height_limits: range_bounds_to_tuple(handles.supported_fb_height()),
        })
    }
}

/// Enumerate all planes with their CRTC-compatibility bitmask and kind.
///
/// The kernel reports compatibility as a mask over CRTC indices; it is
/// reconstructed here from the filtered handle list so that selection stays a
/// pure function of the snapshot.
pub fn discover_planes(card: &Card, resources: &DisplayResources) -> KmsResult<Vec<PlaneInfo>> {
    let handles = card
        .resource_handles()
        .map_err(KmsError::ResourceUnavailable)?;
    let planes = card.plane_handles().map_err(KmsError::ResourceUnavailable)?;

    let mut out = Vec::with_capacity(planes.len());
    for handle in planes {
        let info = card
            .get_plane(handle)
            .map_err(KmsError::ResourceUnavailable)?;

        let mut possible_crtcs = 0u32;
        for compatible in handles.filter_crtcs(info.possible_crtcs()) {
            if let Some(crtc) = resources.crtcs.iter().find(|c| c.handle == compatible) {
                if crtc.index < 32 {
                    possible_crtcs |= 1 << crtc.index;
                }
            }
        }

        let kind = plane_kind(card, handle)?;
        trace!("plane {handle:?}: kind {kind:?}, possible CRTCs {possible_crtcs:#b}");

        out.push(PlaneInfo {
            handle,
            possible_crtcs,
            kind,
            crtc: info.crtc(),
        });
    }

    Ok(out)
}

/// Classify a plane via its `type` property.
///
/// Plane type never changes after creation, so callers may keep the result
/// for the plane's lifetime.
pub fn plane_kind(card: &Card, plane: plane::Handle) -> KmsResult<PlaneType> {
    let table = PropertyTable::query(card, KmsObject::Plane(plane))?;
    let raw = table.value("type")?;
    Ok(match raw {
        x if x == PlaneType::Primary as u64 => PlaneType::Primary,
        x if x == PlaneType::Cursor as u64 => PlaneType::Cursor,
        _ => PlaneType::Overlay,
    })
}

/// First connected connector with a non-empty mode list.
pub fn select_connector(resources: &DisplayResources) -> KmsResult<&ConnectorInfo> {
    resources
        .connectors
        .iter()
        .find(|conn| conn.connected && !conn.modes.is_empty())
        .ok_or(KmsError::NoConnectorFound)
}

/// First CRTC in the resource list. The encoder path from the selected
/// connector is not consulted.
pub fn select_crtc(resources: &DisplayResources) -> KmsResult<&CrtcInfo> {
    resources.crtcs.first().ok_or(KmsError::NoCrtcFound)
}

/// Whether `plane` can be driven by the CRTC at `crtc_index`.
pub fn plane_reaches_crtc(plane: &PlaneInfo, crtc_index: usize) -> bool {
    crtc_index < 32 && plane.possible_crtcs & (1 << crtc_index) != 0
}

/// Pick the scanout planes for the CRTC at `crtc_index`.
///
/// Compatibility is decided by the CRTC-index bitmask alone; the kind filter
/// runs only on planes that pass it. First match wins for both kinds, and the
/// overlay is only resolved when asked for.
pub fn select_planes<'a>(
    planes: &'a [PlaneInfo],
    crtc_index: usize,
    want_overlay: bool,
) -> KmsResult<SelectedPlanes<'a>> {
    let mut primary = None;
    let mut overlay = None;

    for plane in planes {
        if !plane_reaches_crtc(plane, crtc_index) {
            continue;
        }
        match plane.kind {
            PlaneType::Primary if primary.is_none() => primary = Some(plane),
            PlaneType::Overlay if overlay.is_none() => overlay = Some(plane),
            _ => (),
        }
    }

    let primary = primary.ok_or(KmsError::NoPlaneFound(PlaneType::Primary))?;
    let overlay = if want_overlay {
        Some(overlay.ok_or(KmsError::NoPlaneFound(PlaneType::Overlay))?)
    } else {
        None
    };

    Ok(SelectedPlanes { primary, overlay })
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;

    use proptest::prelude::*;

    use super::*;

    fn plane_handle(raw: u32) -> plane::Handle {
        plane::Handle::from(NonZeroU32::new(raw).unwrap())
    }

    fn plane(raw: u32, possible_crtcs: u32, kind: PlaneType) -> PlaneInfo {
        PlaneInfo {
            handle: plane_handle(raw),
            possible_crtcs,
            kind,
            crtc: None,
        }
    }

    #[test]
    fn bitmask_gates_selection_before_kind() {
        // The only primary plane cannot reach CRTC 1; the overlay can. Type
        // must not rescue the incompatible primary.
        let planes = [
            plane(10, 0b01, PlaneType::Primary),
            plane(11, 0b10, PlaneType::Overlay),
        ];
        assert!(matches!(
            select_planes(&planes, 1, false),
            Err(KmsError::NoPlaneFound(PlaneType::Primary))
        ));

        let selected = select_planes(&planes, 0, false).unwrap();
        assert_eq!(selected.primary.handle, plane_handle(10));
        assert!(selected.overlay.is_none());
    }

    #[test]
    fn first_match_wins_per_kind() {
        let planes = [
            plane(10, 0b1, PlaneType::Cursor),
            plane(11, 0b1, PlaneType::Primary),
            plane(12, 0b1, PlaneType::Primary),
            plane(13, 0b1, PlaneType::Overlay),
            plane(14, 0b1, PlaneType::Overlay),
        ];
        let selected = select_planes(&planes, 0, true).unwrap();
        assert_eq!(selected.primary.handle, plane_handle(11));
        assert_eq!(selected.overlay.unwrap().handle, plane_handle(13));
    }

    #[test]
    fn overlay_only_resolved_when_requested() {
        let planes = [plane(10, 0b1, PlaneType::Primary)];
        assert!(select_planes(&planes, 0, false).unwrap().overlay.is_none());
        assert!(matches!(
            select_planes(&planes, 0, true),
            Err(KmsError::NoPlaneFound(PlaneType::Overlay))
        ));
    }

    #[test]
    fn no_connected_connector() {
        let resources = DisplayResources {
            connectors: vec![ConnectorInfo {
                handle: connector::Handle::from(NonZeroU32::new(40).unwrap()),
                name: "HDMI-A-1".to_owned(),
                connected: false,
                modes: Vec::new(),
            }],
            crtcs: Vec::new(),
            encoder_count: 0,
            width_limits: (0, 0),
            height_limits: (0, 0),
        };
        assert!(matches!(
            select_connector(&resources),
            Err(KmsError::NoConnectorFound)
        ));
    }

    #[test]
    fn connected_without_modes_is_unusable() {
        let resources = DisplayResources {
            connectors: vec![ConnectorInfo {
                handle: connector::Handle::from(NonZeroU32::new(40).unwrap()),
                name: "eDP-1".to_owned(),
                connected: true,
                modes: Vec::new(),
            }],
            crtcs: Vec::new(),
            encoder_count: 0,
            width_limits: (0, 0),
            height_limits: (0, 0),
        };
        assert!(matches!(
            select_connector(&resources),
            Err(KmsError::NoConnectorFound)
        ));
    }

    proptest! {
        #[test]
        fn eligibility_matches_bitmask(mask in any::<u32>(), index in 0usize..32) {
            let plane = plane(7, mask, PlaneType::Primary);
            prop_assert_eq!(plane_reaches_crtc(&plane, index), mask & (1 << index) != 0);
        }
    }
}
