//! Pipeline assembly and the per-frame commit loop.
//!
//! The compositor builds its resources once - pipeline selection, scanout
//! buffers, property-backed bindings - then repeatedly fills the back buffer
//! with content from a [`PixelSource`] and submits one atomic transaction
//! covering every participating plane. Everything runs on the calling thread;
//! every kernel call blocks (the NONBLOCK commit flag only means the call
//! returns once the transaction is scheduled).
//!
//! The primary plane is double-buffered: the frame loop writes into the
//! buffer the kernel is not scanning out and flips which one the transaction
//! references. The overlay's content is static, written once at setup.

use std::time::Instant;

use drm::control::{connector, crtc, plane, Mode};
use tracing::{debug, info, warn};

use super::device::Card;
use super::framebuffer::{AllocatorKind, ScanoutBuffer};
use super::inventory::{self, DisplayResources};
use super::props::{KmsObject, PropertyTable};
use super::transaction::{
    append_mode_set, append_plane, ModeBlob, PlaneAssignment, TransactionBuilder,
};
use super::{KmsError, KmsResult};
use crate::render::PixelSource;

/// Where and how large the overlay is composited. A fixed layout policy, not
/// derived from content.
#[derive(Debug, Clone, Copy)]
pub struct OverlayLayout {
    /// Top-left corner of the overlay's destination rectangle.
    pub offset: (i32, i32),
    /// The overlay spans `1 / divisor` of the display resolution.
    pub divisor: u16,
}

impl Default for OverlayLayout {
    fn default() -> Self {
        Self {
            offset: (300, 400),
            divisor: 4,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CompositorOptions {
    pub backend: AllocatorKind,
    /// Composite an overlay plane with this layout, in the same transaction
    /// as the primary.
    pub overlay: Option<OverlayLayout>,
    /// Static overlay fill, packed X-R-G-B.
    pub overlay_color: u32,
}

struct OverlaySurface {
    plane: plane::Handle,
    buffer: ScanoutBuffer,
    layout: OverlayLayout,
}

/// Owns the selected pipeline and every kernel object needed to drive it.
///
/// All kernel-handle state is released when the compositor is dropped, in
/// reverse acquisition order; partially built state never leaks past a failed
/// constructor.
pub struct Compositor {
    card: Card,
    connector: connector::Handle,
    crtc: crtc::Handle,
    mode: Mode,
    primary_plane: plane::Handle,
    /// Double buffer for the primary plane; `back` indexes the buffer the
    /// next frame renders into.
    primary: [ScanoutBuffer; 2],
    back: usize,
    overlay: Option<OverlaySurface>,
    mode_blob: Option<ModeBlob>,
}

impl Compositor {
    /// Discover the pipeline, select its objects and allocate the scanout
    /// buffers. Fails fatally on any missing piece; whatever was already
    /// acquired is released on the way out.
    pub fn new(card: Card, opts: &CompositorOptions) -> KmsResult<Self> {
        let resources = DisplayResources::discover(&card)?;
        let connector = inventory::select_connector(&resources)?;
        let crtc = inventory::select_crtc(&resources)?;
        let planes = inventory::discover_planes(&card, &resources)?;
        let selected = inventory::select_planes(&planes, crtc.index, opts.overlay.is_some())?;

        // First mode in enumeration order.
        let mode = connector.modes[0];
        let (width, height) = mode.size();
        info!(
            "using connector {} at {width}x{height}@{}, CRTC {:?}, primary plane {:?}",
            connector.name,
            mode.vrefresh(),
            crtc.handle,
            selected.primary.handle,
        );

        let primary = [
            ScanoutBuffer::allocate(&card, opts.backend, width.into(), height.into())?,
            ScanoutBuffer::allocate(&card, opts.backend, width.into(), height.into())?,
        ];

        let overlay = match (opts.overlay, selected.overlay) {
            (Some(layout), Some(plane)) => {
                let divisor = layout.divisor.max(1);
                let (ow, oh) = (width / divisor, height / divisor);
                let mut buffer =
                    ScanoutBuffer::allocate(&card, opts.backend, ow.into(), oh.into())?;
                let pixels = vec![opts.overlay_color; ow as usize * oh as usize];
                buffer.write_pixels(&pixels)?;
                debug!("overlay plane {:?} at {ow}x{oh}", plane.handle);
                Some(OverlaySurface {
                    plane: plane.handle,
                    buffer,
                    layout: OverlayLayout { divisor, ..layout },
                })
            }
            _ => None,
        };

        Ok(Self {
            card,
            connector: connector.handle,
            crtc: crtc.handle,
            mode,
            primary_plane: selected.primary.handle,
            primary,
            back: 0,
            overlay,
            mode_blob: None,
        })
    }

    /// Render `frames` frames, committing one atomic transaction per frame.
    ///
    /// A rejected first commit is fatal - the mode was never set. Later
    /// rejections are reported with their frame index and the loop moves on;
    /// the previous frame stays on screen and the back buffer is not flipped.
    pub fn run(&mut self, source: &mut dyn PixelSource, frames: u64) -> KmsResult<()> {
        let (width, height) = self.mode.size();
        let start = Instant::now();

        for frame in 0..frames {
            let frame_start = Instant::now();

            let pixels = source.render_frame(width.into(), height.into());
            self.primary[self.back].write_pixels(pixels)?;

            match self.commit_frame() {
                Ok(()) => {}
                Err(err @ KmsError::CommitRejected(_)) if frame == 0 => return Err(err),
                Err(KmsError::CommitRejected(err)) => {
                    warn!("frame {frame}: commit rejected: {err:?}");
                    continue;
                }
                Err(err) => return Err(err),
            }

            self.back = 1 - self.back;
            debug!(
                "frame {frame}: {:.3} ms",
                frame_start.elapsed().as_secs_f64() * 1000.0
            );
        }

        if frames > 1 {
            let total = start.elapsed().as_secs_f64().max(f64::EPSILON);
            info!(
                "rendered {frames} frames in {total:.2} s ({:.1} fps)",
                frames as f64 / total
            );
        }

        Ok(())
    }

    /// Build and submit the transaction for the current frame.
    pub fn commit_frame(&mut self) -> KmsResult<()> {
        self.ensure_mode_blob()?;
        let req = self.build_frame_request()?;
        req.commit(&self.card)
    }

    fn ensure_mode_blob(&mut self) -> KmsResult<()> {
        if self.mode_blob.is_none() {
            self.mode_blob = Some(ModeBlob::create(&self.card, &self.mode)?);
        }
        Ok(())
    }

    /// Assemble the full transaction: ten properties per participating plane,
    /// the connector binding and the mode activation.
    ///
    /// Property ids are resolved against freshly queried tables on every
    /// build; nothing is cached across objects.
    fn build_frame_request(&self) -> KmsResult<TransactionBuilder> {
        let blob = self.mode_blob.as_ref().ok_or_else(|| {
            KmsError::ResourceUnavailable(std::io::Error::other("mode blob missing"))
        })?;

        let (width, height) = self.mode.size();
        let mut req = TransactionBuilder::new();

        let primary_props = PropertyTable::query(&self.card, KmsObject::Plane(self.primary_plane))?;
        append_plane(
            &mut req,
            &primary_props,
            &PlaneAssignment {
                plane: self.primary_plane,
                fb: self.primary[self.back].framebuffer(),
                src_size: (width, height),
                dst: (0, 0, width, height),
            },
            self.crtc,
        )?;

        if let Some(overlay) = &self.overlay {
            let props = PropertyTable::query(&self.card, KmsObject::Plane(overlay.plane))?;
            let divisor = overlay.layout.divisor;
            let (ow, oh) = (width / divisor, height / divisor);
            append_plane(
                &mut req,
                &props,
                &PlaneAssignment {
                    plane: overlay.plane,
                    fb: overlay.buffer.framebuffer(),
                    src_size: (ow, oh),
                    dst: (overlay.layout.offset.0, overlay.layout.offset.1, ow, oh),
                },
                self.crtc,
            )?;
        }

        let conn_props = PropertyTable::query(&self.card, KmsObject::Connector(self.connector))?;
        let crtc_props = PropertyTable::query(&self.card, KmsObject::Crtc(self.crtc))?;
        append_mode_set(
            &mut req,
            &conn_props,
            &crtc_props,
            self.connector,
            self.crtc,
            blob,
        )?;

        Ok(req)
    }
}
