use crate::renderer::device::TextureHandle;

pub const MATERIAL_TEXTURE_SLOTS: usize = 8;
pub const MATERIAL_PARAM_COUNT: usize = 4;

/// Per-draw material: up to eight opaque texture handles and four scalar
/// parameters. The meaning of each slot belongs to the shader.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Material {
    pub textures: [Option<TextureHandle>; MATERIAL_TEXTURE_SLOTS],
    pub params: [f32; MATERIAL_PARAM_COUNT],
}

impl Material {
    pub fn new() -> Self {
        Self::default()
    }

    /// Material sampling a single texture from slot 0.
    pub fn textured(texture: TextureHandle) -> Self {
        Self::new().with_texture(0, texture)
    }

    pub fn with_texture(mut self, slot: usize, texture: TextureHandle) -> Self {
        if let Some(entry) = self.textures.get_mut(slot) {
            *entry = Some(texture);
        } else {
            log::warn!(
                "Material texture slot {} out of range (max: {})",
                slot,
                MATERIAL_TEXTURE_SLOTS - 1
            );
        }
        self
    }

    pub fn with_params(mut self, params: [f32; MATERIAL_PARAM_COUNT]) -> Self {
        self.params = params;
        self
    }

    pub fn texture_handles(&self) -> impl Iterator<Item = TextureHandle> + '_ {
        self.textures.iter().flatten().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_slot_is_ignored() {
        let material = Material::new().with_texture(MATERIAL_TEXTURE_SLOTS, TextureHandle::new(3));
        assert_eq!(material.texture_handles().count(), 0);
    }

    #[test]
    fn textured_material_uses_slot_zero() {
        let material = Material::textured(TextureHandle::new(9)).with_params([0.5, 1.0, 0.0, 0.0]);
        assert_eq!(material.textures[0], Some(TextureHandle::new(9)));
        assert_eq!(material.params[1], 1.0);
    }
}
