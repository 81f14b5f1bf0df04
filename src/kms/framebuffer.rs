//! Scanout buffer allocation.
//!
//! Two interchangeable backends produce the same thing: a block of pixels the
//! kernel can scan out, registered as a DRM framebuffer and writable from the
//! CPU. The dumb backend asks the kernel for a linear buffer and maps it per
//! write; the GBM backend goes through the driver's buffer manager, which may
//! pick a different pitch than a naive `width * 4`.
//!
//! All pixel writes go row by row through the driver-reported stride. A
//! buffer and its framebuffer id stay alive from the first commit that
//! references them until the owner drops them; the kernel keeps an implicit
//! read reference while the buffer is the active scanout source.

use drm::buffer::{Buffer, DrmFourcc};
use drm::control::dumbbuffer::DumbBuffer;
use drm::control::{framebuffer, Device as ControlDevice};
use gbm::{BufferObject, BufferObjectFlags};
use tracing::{debug, warn};

use super::device::Card;
use super::{KmsError, KmsResult};

/// The only pixel format this compositor speaks: 32-bit packed X-R-G-B.
pub const FORMAT: DrmFourcc = DrmFourcc::Xrgb8888;

pub const BYTES_PER_PIXEL: u32 = 4;

/// Which allocator backs new framebuffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatorKind {
    Dumb,
    Gbm,
}

/// A registered scanout buffer, releasing its kernel objects on drop.
pub enum ScanoutBuffer {
    Dumb(DumbFramebuffer),
    Gbm(GbmFramebuffer),
}

impl ScanoutBuffer {
    pub fn allocate(card: &Card, kind: AllocatorKind, width: u32, height: u32) -> KmsResult<Self> {
        let buffer = match kind {
            AllocatorKind::Dumb => Self::Dumb(DumbFramebuffer::allocate(card, width, height)?),
            AllocatorKind::Gbm => Self::Gbm(GbmFramebuffer::allocate(card, width, height)?),
        };
        debug!(
            "allocated {kind:?} framebuffer {:?}: {width}x{height}, stride {}",
            buffer.framebuffer(),
            buffer.stride(),
        );
        Ok(buffer)
    }

    pub fn framebuffer(&self) -> framebuffer::Handle {
        match self {
            Self::Dumb(fb) => fb.fb,
            Self::Gbm(fb) => fb.fb,
        }
    }

    /// Bytes per row. May exceed `width * 4` due to driver alignment.
    pub fn stride(&self) -> u32 {
        match self {
            Self::Dumb(fb) => fb.stride,
            Self::Gbm(fb) => fb.stride,
        }
    }

    /// Copy one frame of packed pixels into the buffer.
    ///
    /// `pixels` holds exactly `width * height` values. The write completes
    /// before this returns; callers sequence it strictly before the commit
    /// that scans the buffer out.
    pub fn write_pixels(&mut self, pixels: &[u32]) -> KmsResult<()> {
        match self {
            Self::Dumb(fb) => fb.write_pixels(pixels),
            Self::Gbm(fb) => fb.write_pixels(pixels),
        }
    }
}

// =============================================================================
// Dumb-buffer backend
// =============================================================================

/// A kernel-allocated linear buffer, CPU-mapped for writes.
pub struct DumbFramebuffer {
    card: Card,
    buffer: Option<DumbBuffer>,
    fb: framebuffer::Handle,
    stride: u32,
    size: (u32, u32),
}

impl DumbFramebuffer {
    fn allocate(card: &Card, width: u32, height: u32) -> KmsResult<Self> {
        let buffer = card
            .create_dumb_buffer((width, height), FORMAT, 32)
            .map_err(KmsError::AllocationFailure)?;
        let stride = buffer.pitch();

        let fb = match card.add_framebuffer(&buffer, 24, 32) {
            Ok(fb) => fb,
            Err(err) => {
                if let Err(err) = card.destroy_dumb_buffer(buffer) {
                    warn!("error destroying dumb buffer: {err:?}");
                }
                return Err(KmsError::AllocationFailure(err));
            }
        };

        Ok(Self {
            card: card.clone(),
            buffer: Some(buffer),
            fb,
            stride,
            size: (width, height),
        })
    }

    fn write_pixels(&mut self, pixels: &[u32]) -> KmsResult<()> {
        let (width, height) = self.size;
        let stride = self.stride;
        let Some(buffer) = self.buffer.as_mut() else {
            return Ok(());
        };
        let mut map = self
            .card
            .map_dumb_buffer(buffer)
            .map_err(KmsError::AllocationFailure)?;
        copy_rows(map.as_mut(), pixels, width, height, stride);
        Ok(())
    }
}

impl Drop for DumbFramebuffer {
    fn drop(&mut self) {
        // Unregister the framebuffer id before destroying the buffer that
        // backs it.
        if let Err(err) = self.card.destroy_framebuffer(self.fb) {
            warn!("error removing framebuffer {:?}: {err:?}", self.fb);
        }
        if let Some(buffer) = self.buffer.take() {
            if let Err(err) = self.card.destroy_dumb_buffer(buffer) {
                warn!("error destroying dumb buffer: {err:?}");
            }
        }
    }
}

// =============================================================================
// GBM backend
// =============================================================================

/// A driver-allocated buffer object, registered for scanout and CPU-mapped
/// per write.
///
/// The buffer object and its GBM device are retained for the framebuffer's
/// lifetime: the object's handle is only meaningful while the device exists,
/// and keeping it allows per-frame rewrites through the same path as the
/// dumb backend.
pub struct GbmFramebuffer {
    card: Card,
    device: gbm::Device<Card>,
    bo: BufferObject<()>,
    fb: framebuffer::Handle,
    stride: u32,
    size: (u32, u32),
}

impl GbmFramebuffer {
    fn allocate(card: &Card, width: u32, height: u32) -> KmsResult<Self> {
        let device = gbm::Device::new(card.clone()).map_err(KmsError::AllocationFailure)?;
        let bo = device
            .create_buffer_object::<()>(
                width,
                height,
                FORMAT,
                BufferObjectFlags::SCANOUT
                    | BufferObjectFlags::RENDERING
                    | BufferObjectFlags::WRITE,
            )
            .map_err(KmsError::AllocationFailure)?;
        let stride = bo.stride();

        let fb = card
            .add_framebuffer(&bo, 24, 32)
            .map_err(KmsError::AllocationFailure)?;

        Ok(Self {
            card: card.clone(),
            device,
            bo,
            fb,
            stride,
            size: (width, height),
        })
    }

    fn write_pixels(&mut self, pixels: &[u32]) -> KmsResult<()> {
        let (width, height) = self.size;
        self.bo
            .map_mut(0, 0, width, height, |map| {
                let stride = map.stride();
                copy_rows(map.buffer_mut(), pixels, width, height, stride);
            })
            .map_err(KmsError::AllocationFailure)?;
        Ok(())
    }
}

impl Drop for GbmFramebuffer {
    fn drop(&mut self) {
        if let Err(err) = self.card.destroy_framebuffer(self.fb) {
            warn!("error removing framebuffer {:?}: {err:?}", self.fb);
        }
        // The buffer object and device follow; the kernel keeps the scanout
        // memory alive for as long as it still references it.
    }
}

// =============================================================================
// Row-wise fill
// =============================================================================

/// Copy packed rows into a destination with a driver-chosen stride.
///
/// `dst` is the mapped buffer with `stride` bytes per row; `pixels` holds
/// `width * height` packed values. Rows are written individually; the tail of
/// each row past `width * 4` bytes is left untouched.
pub(crate) fn copy_rows(dst: &mut [u8], pixels: &[u32], width: u32, height: u32, stride: u32) {
    let width = width as usize;
    let stride = stride as usize;
    let row_bytes = width * BYTES_PER_PIXEL as usize;

    for (row, src_row) in pixels.chunks_exact(width).take(height as usize).enumerate() {
        let offset = row * stride;
        let dst_row = &mut dst[offset..offset + row_bytes];
        for (dst_px, &px) in dst_row.chunks_exact_mut(4).zip(src_row) {
            dst_px.copy_from_slice(&px.to_le_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solid_fill_first_pixel() {
        // Opaque blue in X-R-G-B, as the default primary fill.
        let color = 0xFF0000FFu32;
        let (width, height) = (4u32, 2u32);
        let stride = 5 * BYTES_PER_PIXEL; // driver padded one pixel per row
        let mut dst = vec![0u8; (stride * height) as usize];
        let pixels = vec![color; (width * height) as usize];

        copy_rows(&mut dst, &pixels, width, height, stride);

        assert_eq!(&dst[..4], &color.to_le_bytes());
        assert_eq!(&dst[..4], &[0xFF, 0x00, 0x00, 0xFF]);
    }

    #[test]
    fn rows_follow_the_stride() {
        let (width, height) = (2u32, 3u32);
        let stride = 12u32;
        let mut dst = vec![0u8; (stride * height) as usize];
        let pixels: Vec<u32> = (1..=6).collect();

        copy_rows(&mut dst, &pixels, width, height, stride);

        // Second row starts at the stride, not at width * 4.
        assert_eq!(&dst[12..16], &3u32.to_le_bytes());
        // Row padding stays untouched.
        assert_eq!(&dst[8..12], &[0; 4]);
    }

    #[test]
    fn full_frame_fits_in_stride_times_height() {
        // A 1920x1080 frame: packed stride is 7680 bytes, and a mapping of
        // stride * height bytes holds every row copy_rows writes.
        let (width, height) = (1920u32, 1080u32);
        let stride = width * BYTES_PER_PIXEL;
        assert_eq!(stride, 7680);

        let mut dst = vec![0u8; (stride * height) as usize];
        let pixels = vec![0xFF00FF00u32; (width as usize) * (height as usize)];
        copy_rows(&mut dst, &pixels, width, height, stride);

        let last = dst.len() - 4;
        assert_eq!(&dst[last..], &0xFF00FF00u32.to_le_bytes());
    }
}
