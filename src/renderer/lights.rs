use glam::{Mat4, Vec3};
use std::f32::consts::FRAC_PI_2;

use crate::renderer::device::{CUBE_FACE_COUNT, MAX_SHADOW_LIGHTS};
use crate::renderer::uniforms::{LightsUniform, PointLightRaw};

const FACE_DIRECTIONS: [Vec3; CUBE_FACE_COUNT as usize] = [
    Vec3::X,
    Vec3::NEG_X,
    Vec3::Y,
    Vec3::NEG_Y,
    Vec3::Z,
    Vec3::NEG_Z,
];
const FACE_UPS: [Vec3; CUBE_FACE_COUNT as usize] =
    [Vec3::Y, Vec3::Y, Vec3::Z, Vec3::NEG_Z, Vec3::Y, Vec3::Y];

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointLight {
    pub position: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub range: f32,
}

impl PointLight {
    pub fn new(position: Vec3, color: Vec3, intensity: f32, range: f32) -> Self {
        Self {
            position,
            color,
            intensity,
            range,
        }
    }

    /// Far plane of the shadow cube; never closer than just past `near`.
    pub fn shadow_far(&self, near: f32) -> f32 {
        self.range.max(near + 0.1)
    }

    fn to_raw(self) -> PointLightRaw {
        PointLightRaw {
            position_range: self.position.extend(self.range).to_array(),
            color_intensity: self.color.extend(self.intensity).to_array(),
        }
    }
}

/// View-projection for each cube face in +X, -X, +Y, -Y, +Z, -Z order.
pub fn cube_face_view_projections(
    position: Vec3,
    near: f32,
    far: f32,
) -> [Mat4; CUBE_FACE_COUNT as usize] {
    let projection = Mat4::perspective_rh(FRAC_PI_2, 1.0, near, far);

    let mut matrices = [Mat4::IDENTITY; CUBE_FACE_COUNT as usize];
    for ((matrix, dir), up) in matrices.iter_mut().zip(FACE_DIRECTIONS).zip(FACE_UPS) {
        let view = Mat4::look_at_rh(position, position + dir, up);
        *matrix = projection * view;
    }
    matrices
}

/// Packs the shadow-casting subset of `lights` for the lights block.
pub(crate) fn lights_uniform(lights: &[PointLight], max_lights: usize) -> LightsUniform {
    let mut uniform = LightsUniform {
        lights: [PointLightRaw {
            position_range: [0.0; 4],
            color_intensity: [0.0; 4],
        }; MAX_SHADOW_LIGHTS as usize],
        counts: [0; 4],
    };

    let count = lights.len().min(max_lights).min(MAX_SHADOW_LIGHTS as usize);
    for (raw, light) in uniform.lights.iter_mut().zip(lights.iter().take(count)) {
        *raw = light.to_raw();
    }
    uniform.counts[0] = count as u32;
    uniform
}
