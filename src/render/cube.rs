//! Software-rendered rotating cube.
//!
//! A small CPU rasterizer: the cube spins at a fixed angular velocity, faces
//! carry a procedural checker texture and a single directional light, and
//! every pixel is depth-tested.
//! Output is packed XRGB8888, ready for [`super::PixelSource`] consumers.

use std::time::Instant;

use glam::{Mat4, Vec2, Vec3};

use super::PixelSource;

const BACKGROUND: u32 = 0xFF10_1018;
/// Radians per second.
const ROTATION_SPEED: f32 = 1.2;
/// Checker squares per face edge.
const CHECKER: f32 = 8.0;
const FOV_Y: f32 = std::f32::consts::FRAC_PI_4;

/// Cube face colors, one per face.
const FACE_COLORS: [Vec3; 6] = [
    Vec3::new(0.86, 0.24, 0.22),
    Vec3::new(0.22, 0.70, 0.32),
    Vec3::new(0.24, 0.42, 0.86),
    Vec3::new(0.88, 0.74, 0.22),
    Vec3::new(0.70, 0.30, 0.76),
    Vec3::new(0.24, 0.72, 0.72),
];

/// Unit-cube faces: four corners (counter-clockwise seen from outside) and
/// the outward normal.
const FACES: [([Vec3; 4], Vec3); 6] = [
    (
        [
            Vec3::new(-1.0, -1.0, 1.0),
            Vec3::new(1.0, -1.0, 1.0),
            Vec3::new(1.0, 1.0, 1.0),
            Vec3::new(-1.0, 1.0, 1.0),
        ],
        Vec3::Z,
    ),
    (
        [
            Vec3::new(1.0, -1.0, -1.0),
            Vec3::new(-1.0, -1.0, -1.0),
            Vec3::new(-1.0, 1.0, -1.0),
            Vec3::new(1.0, 1.0, -1.0),
        ],
        Vec3::NEG_Z,
    ),
    (
        [
            Vec3::new(1.0, -1.0, 1.0),
            Vec3::new(1.0, -1.0, -1.0),
            Vec3::new(1.0, 1.0, -1.0),
            Vec3::new(1.0, 1.0, 1.0),
        ],
        Vec3::X,
    ),
    (
        [
            Vec3::new(-1.0, -1.0, -1.0),
            Vec3::new(-1.0, -1.0, 1.0),
            Vec3::new(-1.0, 1.0, 1.0),
            Vec3::new(-1.0, 1.0, -1.0),
        ],
        Vec3::NEG_X,
    ),
    (
        [
            Vec3::new(-1.0, 1.0, 1.0),
            Vec3::new(1.0, 1.0, 1.0),
            Vec3::new(1.0, 1.0, -1.0),
            Vec3::new(-1.0, 1.0, -1.0),
        ],
        Vec3::Y,
    ),
    (
        [
            Vec3::new(-1.0, -1.0, -1.0),
            Vec3::new(1.0, -1.0, -1.0),
            Vec3::new(1.0, -1.0, 1.0),
            Vec3::new(-1.0, -1.0, 1.0),
        ],
        Vec3::NEG_Y,
    ),
];

#[derive(Clone, Copy)]
struct ScreenVertex {
    pos: Vec3,
    uv: Vec2,
}

pub struct CubeRenderer {
    started: Instant,
    frame: Vec<u32>,
    depth: Vec<f32>,
}

impl CubeRenderer {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            frame: Vec::new(),
            depth: Vec::new(),
        }
    }

    /// Render at an explicit rotation angle, in radians.
    pub fn render_at(&mut self, angle: f32, width: u32, height: u32) -> &[u32] {
        let (width, height) = (width as usize, height as usize);
        let len = width * height;
        self.frame.clear();
        self.frame.resize(len, BACKGROUND);
        self.depth.clear();
        self.depth.resize(len, f32::INFINITY);

        let aspect = width as f32 / height as f32;
        let model = Mat4::from_rotation_y(angle) * Mat4::from_rotation_x(angle * 0.7);
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 4.5), Vec3::ZERO, Vec3::Y);
        let proj = Mat4::perspective_rh(FOV_Y, aspect, 0.1, 100.0);
        let mvp = proj * view * model;

        let light = Vec3::new(0.4, 0.6, 1.0).normalize();

        for (face, &(corners, normal)) in FACES.iter().enumerate() {
            let world_normal = model.transform_vector3(normal);
            let lambert = world_normal.dot(light).max(0.0);
            let shade = 0.35 + 0.65 * lambert;

            let uvs = [
                Vec2::new(0.0, 0.0),
                Vec2::new(1.0, 0.0),
                Vec2::new(1.0, 1.0),
                Vec2::new(0.0, 1.0),
            ];
            let mut projected = [ScreenVertex {
                pos: Vec3::ZERO,
                uv: Vec2::ZERO,
            }; 4];
            for (out, (&corner, &uv)) in projected.iter_mut().zip(corners.iter().zip(&uvs)) {
                let clip = mvp * corner.extend(1.0);
                let ndc = clip.truncate() / clip.w;
                out.pos = Vec3::new(
                    (ndc.x + 1.0) * 0.5 * width as f32,
                    (1.0 - ndc.y) * 0.5 * height as f32,
                    ndc.z,
                );
                out.uv = uv;
            }

            let base = FACE_COLORS[face] * shade;
            self.fill_triangle(width, height, [projected[0], projected[1], projected[2]], base);
            self.fill_triangle(width, height, [projected[0], projected[2], projected[3]], base);
        }

        &self.frame
    }

    fn fill_triangle(&mut self, width: usize, height: usize, mut v: [ScreenVertex; 3], base: Vec3) {
        let edge = |a: Vec3, b: Vec3, px: f32, py: f32| -> f32 {
            (b.x - a.x) * (py - a.y) - (b.y - a.y) * (px - a.x)
        };

        let mut area = edge(v[0].pos, v[1].pos, v[2].pos.x, v[2].pos.y);
        if area.abs() < f32::EPSILON {
            return;
        }
        // Normalize winding so inside tests are all-nonnegative.
        if area < 0.0 {
            v.swap(1, 2);
            area = -area;
        }

        let min_x = v.iter().map(|sv| sv.pos.x).fold(f32::INFINITY, f32::min);
        let max_x = v.iter().map(|sv| sv.pos.x).fold(f32::NEG_INFINITY, f32::max);
        let min_y = v.iter().map(|sv| sv.pos.y).fold(f32::INFINITY, f32::min);
        let max_y = v.iter().map(|sv| sv.pos.y).fold(f32::NEG_INFINITY, f32::max);

        let x0 = (min_x.floor().max(0.0)) as usize;
        let x1 = (max_x.ceil().min(width as f32 - 1.0)).max(0.0) as usize;
        let y0 = (min_y.floor().max(0.0)) as usize;
        let y1 = (max_y.ceil().min(height as f32 - 1.0)).max(0.0) as usize;
        if x0 > x1 || y0 > y1 {
            return;
        }

        for y in y0..=y1 {
            for x in x0..=x1 {
                let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);
                let w0 = edge(v[1].pos, v[2].pos, px, py);
                let w1 = edge(v[2].pos, v[0].pos, px, py);
                let w2 = edge(v[0].pos, v[1].pos, px, py);
                if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                    continue;
                }

                let (b0, b1, b2) = (w0 / area, w1 / area, w2 / area);
                let z = b0 * v[0].pos.z + b1 * v[1].pos.z + b2 * v[2].pos.z;
                let idx = y * width + x;
                if z >= self.depth[idx] {
                    continue;
                }
                self.depth[idx] = z;

                let uv = v[0].uv * b0 + v[1].uv * b1 + v[2].uv * b2;
                let checker =
                    ((uv.x * CHECKER).floor() + (uv.y * CHECKER).floor()) as i32 & 1;
                let tint = if checker == 0 { 1.0 } else { 0.55 };
                self.frame[idx] = pack(base * tint);
            }
        }
    }
}

impl PixelSource for CubeRenderer {
    fn render_frame(&mut self, width: u32, height: u32) -> &[u32] {
        let angle = self.started.elapsed().as_secs_f32() * ROTATION_SPEED;
        self.render_at(angle, width, height)
    }
}

fn pack(rgb: Vec3) -> u32 {
    let channel = |c: f32| (c.clamp(0.0, 1.0) * 255.0 + 0.5) as u32;
    0xFF00_0000 | channel(rgb.x) << 16 | channel(rgb.y) << 8 | channel(rgb.z)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_is_sized_and_opaque() {
        let mut cube = CubeRenderer::new();
        let frame = cube.render_at(0.4, 160, 120);
        assert_eq!(frame.len(), 160 * 120);
        assert!(frame.iter().all(|&px| px & 0xFF00_0000 == 0xFF00_0000));
    }

    #[test]
    fn cube_covers_the_center_not_the_corners() {
        let mut cube = CubeRenderer::new();
        let frame = cube.render_at(0.4, 160, 120);
        let center = frame[60 * 160 + 80];
        assert_ne!(center, BACKGROUND);
        assert_eq!(frame[0], BACKGROUND);
        assert_eq!(frame[160 * 120 - 1], BACKGROUND);
    }

    #[test]
    fn same_angle_renders_identically() {
        let mut a = CubeRenderer::new();
        let mut b = CubeRenderer::new();
        let first = a.render_at(1.1, 96, 96).to_vec();
        let second = b.render_at(1.1, 96, 96).to_vec();
        assert_eq!(first, second);
    }
}
