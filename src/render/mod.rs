//! Pixel content generation.
//!
//! Sources are decoupled from scanout: they produce packed X-R-G-B pixels and
//! never touch kernel objects. The compositor copies the result into the
//! mapped framebuffer before each commit.

pub mod cube;

pub use cube::CubeRenderer;

/// Produces one frame of packed XRGB8888 pixels.
///
/// Called once per frame at whatever rate the commit loop achieves. Must
/// return exactly `width * height` values, fully opaque (the X byte is not
/// blended but is kept at 0xFF).
pub trait PixelSource {
    fn render_frame(&mut self, width: u32, height: u32) -> &[u32];
}

/// Fills the whole frame with one color.
#[derive(Debug)]
pub struct SolidColor {
    color: u32,
    buf: Vec<u32>,
}

impl SolidColor {
    pub fn new(color: u32) -> Self {
        Self {
            color: color | 0xFF00_0000,
            buf: Vec::new(),
        }
    }
}

impl PixelSource for SolidColor {
    fn render_frame(&mut self, width: u32, height: u32) -> &[u32] {
        let len = width as usize * height as usize;
        if self.buf.len() != len {
            self.buf = vec![self.color; len];
        }
        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solid_frame_is_uniform_and_sized() {
        let mut source = SolidColor::new(0xFF0000FF);
        let frame = source.render_frame(64, 48);
        assert_eq!(frame.len(), 64 * 48);
        assert!(frame.iter().all(|&px| px == 0xFF0000FF));
    }

    #[test]
    fn x_byte_forced_opaque() {
        let mut source = SolidColor::new(0x0000FF00);
        let frame = source.render_frame(2, 2);
        assert_eq!(frame[0], 0xFF00FF00);
    }
}
