//! Atomic transaction assembly.
//!
//! A transaction is an ordered set of (object, property, value) triples that
//! the kernel applies all at once or not at all. Builders are single-use:
//! build, commit, discard. The mode blob referenced by `MODE_ID` outlives the
//! transactions that use it and is destroyed explicitly when its owner drops
//! it; the kernel does not garbage-collect property blobs.

use std::io;
use std::num::NonZeroU64;

use drm::control::atomic::AtomicModeReq;
use drm::control::{
    connector, crtc, framebuffer, plane, property, AtomicCommitFlags, Device as ControlDevice,
    Mode,
};
use tracing::warn;

use super::device::Card;
use super::props::{KmsObject, PropertyTable};
use super::{KmsError, KmsResult};

/// Convert whole pixels to the 16.16 fixed point used by the plane source
/// rectangle properties.
pub fn to_fixed_point(px: u16) -> u64 {
    u64::from(px) << 16
}

/// One pending property write.
#[derive(Debug, Clone, Copy)]
pub struct Entry {
    pub object: KmsObject,
    pub prop: property::Handle,
    pub value: property::Value<'static>,
}

/// Accumulates property writes and submits them as one atomic commit.
#[derive(Debug, Default)]
pub struct TransactionBuilder {
    entries: Vec<Entry>,
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn push(
        &mut self,
        object: KmsObject,
        prop: property::Handle,
        value: property::Value<'static>,
    ) {
        self.entries.push(Entry {
            object,
            prop,
            value,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Raw view of the pending writes, in insertion order.
    pub fn raw_entries(&self) -> Vec<(KmsObject, property::Handle, property::RawValue)> {
        self.entries
            .iter()
            .map(|entry| (entry.object, entry.prop, entry.value.into()))
            .collect()
    }

    fn into_request(self) -> AtomicModeReq {
        let mut req = AtomicModeReq::new();
        for entry in self.entries {
            match entry.object {
                KmsObject::Connector(handle) => req.add_property(handle, entry.prop, entry.value),
                KmsObject::Crtc(handle) => req.add_property(handle, entry.prop, entry.value),
                KmsObject::Plane(handle) => req.add_property(handle, entry.prop, entry.value),
            }
        }
        req
    }

    /// Submit as a single kernel request, allowing a mode set and returning
    /// as soon as the transaction is scheduled.
    ///
    /// On rejection nothing was applied; the previous frame's content must be
    /// assumed still displayed.
    pub fn commit(self, card: &Card) -> KmsResult<()> {
        card.atomic_commit(
            AtomicCommitFlags::ALLOW_MODESET | AtomicCommitFlags::NONBLOCK,
            self.into_request(),
        )
        .map_err(KmsError::CommitRejected)
    }
}

/// A kernel-side blob holding one display mode, destroyed on drop.
#[derive(Debug)]
pub struct ModeBlob {
    card: Option<Card>,
    id: NonZeroU64,
}

impl ModeBlob {
    pub fn create(card: &Card, mode: &Mode) -> KmsResult<Self> {
        let value = card
            .create_property_blob(mode)
            .map_err(KmsError::ResourceUnavailable)?;
        let raw: property::RawValue = value.into();
        let id = NonZeroU64::new(raw).ok_or_else(|| {
            KmsError::ResourceUnavailable(io::Error::other("kernel returned blob id 0"))
        })?;
        Ok(Self {
            card: Some(card.clone()),
            id,
        })
    }

    pub fn value(&self) -> property::Value<'static> {
        property::Value::Blob(self.id.get())
    }

    #[cfg(test)]
    pub(crate) fn synthetic(id: u64) -> Self {
        Self {
            card: None,
            id: NonZeroU64::new(id).unwrap(),
        }
    }
}

impl Drop for ModeBlob {
    fn drop(&mut self) {
        if let Some(card) = self.card.take() {
            if let Err(err) = card.destroy_property_blob(self.id.get()) {
                warn!("error destroying mode blob: {err:?}");
            }
        }
    }
}

/// Geometry for one plane in a transaction.
#[derive(Debug, Clone, Copy)]
pub struct PlaneAssignment {
    pub plane: plane::Handle,
    pub fb: framebuffer::Handle,
    /// Source rectangle size in whole pixels; converted to 16.16 on insert.
    pub src_size: (u16, u16),
    /// Destination rectangle on the CRTC: x, y, width, height.
    pub dst: (i32, i32, u16, u16),
}

/// Append the ten per-plane properties binding `assignment` to `crtc`.
pub fn append_plane(
    req: &mut TransactionBuilder,
    props: &PropertyTable,
    assignment: &PlaneAssignment,
    crtc: crtc::Handle,
) -> KmsResult<()> {
    let plane = KmsObject::Plane(assignment.plane);
    let (src_w, src_h) = assignment.src_size;
    let (dst_x, dst_y, dst_w, dst_h) = assignment.dst;

    req.push(
        plane,
        props.id("FB_ID")?,
        property::Value::Framebuffer(Some(assignment.fb)),
    );
    req.push(plane, props.id("CRTC_ID")?, property::Value::CRTC(Some(crtc)));
    req.push(plane, props.id("SRC_X")?, property::Value::UnsignedRange(0));
    req.push(plane, props.id("SRC_Y")?, property::Value::UnsignedRange(0));
    req.push(
        plane,
        props.id("SRC_W")?,
        property::Value::UnsignedRange(to_fixed_point(src_w)),
    );
    req.push(
        plane,
        props.id("SRC_H")?,
        property::Value::UnsignedRange(to_fixed_point(src_h)),
    );
    req.push(
        plane,
        props.id("CRTC_X")?,
        property::Value::SignedRange(i64::from(dst_x)),
    );
    req.push(
        plane,
        props.id("CRTC_Y")?,
        property::Value::SignedRange(i64::from(dst_y)),
    );
    req.push(
        plane,
        props.id("CRTC_W")?,
        property::Value::UnsignedRange(u64::from(dst_w)),
    );
    req.push(
        plane,
        props.id("CRTC_H")?,
        property::Value::UnsignedRange(u64::from(dst_h)),
    );

    Ok(())
}

/// Append the connector binding and mode activation: connector `CRTC_ID`,
/// CRTC `MODE_ID` and `ACTIVE`.
pub fn append_mode_set(
    req: &mut TransactionBuilder,
    conn_props: &PropertyTable,
    crtc_props: &PropertyTable,
    connector: connector::Handle,
    crtc: crtc::Handle,
    blob: &ModeBlob,
) -> KmsResult<()> {
    req.push(
        KmsObject::Connector(connector),
        conn_props.id("CRTC_ID")?,
        property::Value::CRTC(Some(crtc)),
    );
    req.push(KmsObject::Crtc(crtc), crtc_props.id("MODE_ID")?, blob.value());
    req.push(
        KmsObject::Crtc(crtc),
        crtc_props.id("ACTIVE")?,
        property::Value::Boolean(true),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;

    use super::*;

    fn handle<T: From<NonZeroU32>>(raw: u32) -> T {
        T::from(NonZeroU32::new(raw).unwrap())
    }

    fn plane_table(id: u32) -> PropertyTable {
        let base = id * 100;
        PropertyTable::synthetic(
            KmsObject::Plane(handle(id)),
            &[
                ("FB_ID", base + 1, 0),
                ("CRTC_ID", base + 2, 0),
                ("SRC_X", base + 3, 0),
                ("SRC_Y", base + 4, 0),
                ("SRC_W", base + 5, 0),
                ("SRC_H", base + 6, 0),
                ("CRTC_X", base + 7, 0),
                ("CRTC_Y", base + 8, 0),
                ("CRTC_W", base + 9, 0),
                ("CRTC_H", base + 10, 0),
            ],
        )
    }

    fn conn_table() -> PropertyTable {
        PropertyTable::synthetic(KmsObject::Connector(handle(70)), &[("CRTC_ID", 701, 0)])
    }

    fn crtc_table() -> PropertyTable {
        PropertyTable::synthetic(
            KmsObject::Crtc(handle(80)),
            &[("MODE_ID", 801, 0), ("ACTIVE", 802, 0)],
        )
    }

    fn full_screen(plane_id: u32, fb_id: u32) -> PlaneAssignment {
        PlaneAssignment {
            plane: handle(plane_id),
            fb: handle(fb_id),
            src_size: (1920, 1080),
            dst: (0, 0, 1920, 1080),
        }
    }

    fn build(planes: &[(u32, PlaneAssignment)]) -> TransactionBuilder {
        let mut req = TransactionBuilder::new();
        for (id, assignment) in planes {
            append_plane(&mut req, &plane_table(*id), assignment, handle(80)).unwrap();
        }
        let blob = ModeBlob::synthetic(33);
        append_mode_set(
            &mut req,
            &conn_table(),
            &crtc_table(),
            handle(70),
            handle(80),
            &blob,
        )
        .unwrap();
        req
    }

    #[test]
    fn fixed_point_shift() {
        assert_eq!(to_fixed_point(1920), 1920 << 16);
        assert_eq!(to_fixed_point(1080), 1080 << 16);
        assert_eq!(to_fixed_point(0), 0);
    }

    #[test]
    fn source_is_fixed_point_destination_is_not() {
        let req = build(&[(31, full_screen(31, 90))]);
        let raw = req.raw_entries();

        let value_of = |prop: u32| {
            raw.iter()
                .find(|(_, prop_handle, _)| *prop_handle == handle::<property::Handle>(prop))
                .map(|(_, _, value)| *value)
                .unwrap()
        };

        assert_eq!(value_of(3105), 1920 << 16); // SRC_W
        assert_eq!(value_of(3106), 1080 << 16); // SRC_H
        assert_eq!(value_of(3109), 1920); // CRTC_W
        assert_eq!(value_of(3110), 1080); // CRTC_H
    }

    #[test]
    fn entry_count_single_plane() {
        let req = build(&[(31, full_screen(31, 90))]);
        assert_eq!(req.len(), 10 + 3);
    }

    #[test]
    fn entry_count_dual_plane() {
        let overlay = PlaneAssignment {
            plane: handle(32),
            fb: handle(91),
            src_size: (480, 270),
            dst: (300, 400, 480, 270),
        };
        let req = build(&[(31, full_screen(31, 90)), (32, overlay)]);
        assert_eq!(req.len(), 10 * 2 + 3);
    }

    #[test]
    fn rebuild_is_identical() {
        // The same pipeline state must produce the same transaction content
        // on every build; nothing drifts between submissions.
        let planes = [(31, full_screen(31, 90))];
        let first = build(&planes).raw_entries();
        let second = build(&planes).raw_entries();
        assert_eq!(first, second);
    }

    #[test]
    fn missing_property_aborts_the_build() {
        let mut req = TransactionBuilder::new();
        let incomplete =
            PropertyTable::synthetic(KmsObject::Plane(handle(31)), &[("FB_ID", 3101, 0)]);
        let err = append_plane(&mut req, &incomplete, &full_screen(31, 90), handle(80));
        assert!(matches!(err, Err(KmsError::PropertyNotFound { .. })));
    }
}
