// renderer/uniforms.rs
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use crate::renderer::device::MAX_SHADOW_LIGHTS;
use crate::renderer::material::{MATERIAL_PARAM_COUNT, MATERIAL_TEXTURE_SLOTS};

/// Texture index written for an empty material slot.
pub const NO_TEXTURE: u32 = u32::MAX;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct CameraUniform {
    pub view_proj: [[f32; 4]; 4],
    pub inverse_view_proj: [[f32; 4]; 4],
    pub camera_pos: [f32; 3],
    pub _padding: f32,
}

impl CameraUniform {
    pub fn new() -> Self {
        Self::from_matrices(Mat4::IDENTITY, Mat4::IDENTITY, Vec3::ZERO)
    }

    pub fn from_matrix(view_proj: Mat4, camera_pos: Vec3) -> Self {
        let inverse = view_proj.inverse();
        Self::from_matrices(view_proj, inverse, camera_pos)
    }

    pub fn from_matrices(view_proj: Mat4, inverse_view_proj: Mat4, camera_pos: Vec3) -> Self {
        Self {
            view_proj: view_proj.to_cols_array_2d(),
            inverse_view_proj: inverse_view_proj.to_cols_array_2d(),
            camera_pos: camera_pos.to_array(),
            _padding: 0.0,
        }
    }
}

impl Default for CameraUniform {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-slot payload of a batch, indexed by instance slot in the shader.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct InstanceUniform {
    /// Index into the batch texture table, or [`NO_TEXTURE`].
    pub textures: [u32; MATERIAL_TEXTURE_SLOTS],
    pub params: [f32; MATERIAL_PARAM_COUNT],
    pub model: [[f32; 4]; 4],
    /// Transpose of the inverse model matrix, for normals.
    pub normal: [[f32; 4]; 4],
}

impl InstanceUniform {
    pub fn new(
        textures: [u32; MATERIAL_TEXTURE_SLOTS],
        params: [f32; MATERIAL_PARAM_COUNT],
        model: Mat4,
    ) -> Self {
        Self {
            textures,
            params,
            model: model.to_cols_array_2d(),
            normal: normal_matrix(model).to_cols_array_2d(),
        }
    }

    pub fn model_matrix(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.model)
    }

    pub fn normal_matrix(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.normal)
    }
}

fn normal_matrix(model: Mat4) -> Mat4 {
    // Degenerate transforms (zero scale) have no inverse.
    if model.determinant().abs() <= f32::EPSILON {
        return Mat4::IDENTITY;
    }
    model.inverse().transpose()
}

/// View of one cube face during the shadow depth pass.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct ShadowUniform {
    pub view_proj: [[f32; 4]; 4],
    /// xyz = light position, w = far plane
    pub light_position_far: [f32; 4],
}

impl ShadowUniform {
    pub fn new(view_proj: Mat4, light_position: Vec3, far: f32) -> Self {
        Self {
            view_proj: view_proj.to_cols_array_2d(),
            light_position_far: light_position.extend(far).to_array(),
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct PointLightRaw {
    pub position_range: [f32; 4],
    pub color_intensity: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct LightsUniform {
    pub lights: [PointLightRaw; MAX_SHADOW_LIGHTS as usize],
    /// x = active light count
    pub counts: [u32; 4],
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn camera_uniform_is_144_bytes() {
        // 2 * mat4x4<f32> = 128 bytes, vec3<f32> = 12 bytes, padding = 4 bytes = 144 bytes
        assert_eq!(std::mem::size_of::<CameraUniform>(), 144);
    }

    #[test]
    fn uniform_structs_are_std140_sized() {
        assert_eq!(std::mem::size_of::<InstanceUniform>(), 176);
        assert_eq!(std::mem::size_of::<InstanceUniform>() % 16, 0);
        assert_eq!(std::mem::size_of::<ShadowUniform>(), 80);
        assert_eq!(std::mem::size_of::<LightsUniform>() % 16, 0);
    }

    #[test]
    fn normal_matrix_undoes_non_uniform_scale() {
        let model = Mat4::from_scale(Vec3::new(2.0, 1.0, 0.5));
        let instance = InstanceUniform::new([NO_TEXTURE; 8], [0.0; 4], model);

        let expected = Mat4::from_scale(Vec3::new(0.5, 1.0, 2.0));
        assert!(instance.normal_matrix().abs_diff_eq(expected, 1e-6));
        assert!(instance.model_matrix().abs_diff_eq(model, 1e-6));
    }

    #[test]
    fn degenerate_model_falls_back_to_identity_normals() {
        let model = Mat4::from_cols(Vec4::ZERO, Vec4::Y, Vec4::Z, Vec4::W);
        let instance = InstanceUniform::new([NO_TEXTURE; 8], [0.0; 4], model);
        assert_eq!(instance.normal_matrix(), Mat4::IDENTITY);
    }
}
