//! The seam between the batching core and a native drawing API.
//!
//! Everything the core produces for the GPU goes through [`Device`]. The
//! trait is deliberately command-shaped: the core never holds native
//! resources, only the typed handles defined here.

use crate::renderer::handle::Handle;

pub enum Buffer {}
pub enum Texture {}
pub enum Shader {}
pub enum ShadowMap {}

pub type BufferId = Handle<Buffer>;
pub type TextureHandle = Handle<Texture>;
pub type ShaderHandle = Handle<Shader>;
pub type ShadowMapId = Handle<ShadowMap>;

/// Upper bound on point lights that get a cube shadow map.
pub const MAX_SHADOW_LIGHTS: u32 = 4;
pub const CUBE_FACE_COUNT: u32 = 6;
/// std140 requires at least 16 byte alignment between uniform blocks.
pub const MIN_UNIFORM_ALIGNMENT: u64 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
    Uniform,
}

impl BufferKind {
    pub const COUNT: usize = 3;

    pub(crate) const fn slot(self) -> usize {
        match self {
            Self::Vertex => 0,
            Self::Index => 1,
            Self::Uniform => 2,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Vertex => "VertexBuffer",
            Self::Index => "IndexBuffer",
            Self::Uniform => "UniformBuffer",
        }
    }
}

/// Capability queries answered by the device once at start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    pub max_texture_units: u32,
    pub max_shadow_lights: u32,
    pub max_uniform_block_size: u64,
    pub uniform_offset_alignment: u64,
}

impl DeviceLimits {
    /// Splits the texture-unit budget between shadow maps and material
    /// textures. A quarter of the units (at most [`MAX_SHADOW_LIGHTS`]) go
    /// to shadow cube maps.
    pub fn from_texture_units(
        max_texture_units: u32,
        max_uniform_block_size: u64,
        uniform_offset_alignment: u64,
    ) -> Self {
        Self {
            max_texture_units,
            max_shadow_lights: (max_texture_units / 4).min(MAX_SHADOW_LIGHTS),
            max_uniform_block_size,
            uniform_offset_alignment,
        }
    }

    pub fn max_material_textures(&self) -> u32 {
        self.max_texture_units
            .saturating_sub(self.max_shadow_lights)
    }

    pub fn uniform_alignment(&self) -> u64 {
        self.uniform_offset_alignment.max(MIN_UNIFORM_ALIGNMENT)
    }
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self::from_texture_units(16, 16 * 1024, 256)
    }
}

/// One sub-draw of a multi-draw: the index range of a batch slot plus the
/// vertex base added to every index at draw time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrawRange {
    pub index_count: u32,
    /// Byte offset into the bound index buffer.
    pub index_offset: u64,
    pub base_vertex: i32,
}

impl DrawRange {
    pub const fn first_index(&self) -> u32 {
        (self.index_offset / std::mem::size_of::<u32>() as u64) as u32
    }
}

pub trait Device {
    fn limits(&self) -> DeviceLimits;

    /// Whether a presentable surface is attached yet.
    fn has_surface(&self) -> bool;

    fn is_shader_valid(&self, shader: ShaderHandle) -> bool;

    /// Returns `None` when the allocation fails.
    fn create_buffer(&mut self, kind: BufferKind, size: u64) -> Option<BufferId>;

    fn destroy_buffer(&mut self, buffer: BufferId);

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]);

    /// Copies the first `size` bytes of `src` to the start of `dst`.
    fn copy_buffer(&mut self, src: BufferId, dst: BufferId, size: u64);

    fn bind_buffer(&mut self, kind: BufferKind, buffer: BufferId);

    fn bind_uniform_range(&mut self, binding: u32, buffer: BufferId, offset: u64, size: u64);

    /// Creates a depth cube map with `size`x`size` faces.
    fn create_shadow_map(&mut self, size: u32) -> Option<ShadowMapId>;

    fn destroy_shadow_map(&mut self, shadow_map: ShadowMapId);

    fn bind_shader(&mut self, shader: ShaderHandle);

    /// Binds material textures; slot `i` of the slice is texture unit `i`.
    fn bind_textures(&mut self, textures: &[TextureHandle]);

    fn bind_shadow_maps(&mut self, shadow_maps: &[ShadowMapId]);

    /// Binds one face of a shadow cube map as the depth target and clears it.
    fn begin_shadow_pass(&mut self, shadow_map: ShadowMapId, face: u32);

    /// Binds the surface as the color target and clears it.
    fn begin_color_pass(&mut self, clear_color: [f32; 4]);

    /// Issues every range with the currently bound shader and buffers. The
    /// position of a range in the slice is its instance slot.
    fn multi_draw_indexed(&mut self, draws: &[DrawRange]);

    fn present(&mut self);
}

impl<T: Device + ?Sized> Device for &mut T {
    fn limits(&self) -> DeviceLimits {
        (**self).limits()
    }

    fn has_surface(&self) -> bool {
        (**self).has_surface()
    }

    fn is_shader_valid(&self, shader: ShaderHandle) -> bool {
        (**self).is_shader_valid(shader)
    }

    fn create_buffer(&mut self, kind: BufferKind, size: u64) -> Option<BufferId> {
        (**self).create_buffer(kind, size)
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        (**self).destroy_buffer(buffer)
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) {
        (**self).write_buffer(buffer, offset, data)
    }

    fn copy_buffer(&mut self, src: BufferId, dst: BufferId, size: u64) {
        (**self).copy_buffer(src, dst, size)
    }

    fn bind_buffer(&mut self, kind: BufferKind, buffer: BufferId) {
        (**self).bind_buffer(kind, buffer)
    }

    fn bind_uniform_range(&mut self, binding: u32, buffer: BufferId, offset: u64, size: u64) {
        (**self).bind_uniform_range(binding, buffer, offset, size)
    }

    fn create_shadow_map(&mut self, size: u32) -> Option<ShadowMapId> {
        (**self).create_shadow_map(size)
    }

    fn destroy_shadow_map(&mut self, shadow_map: ShadowMapId) {
        (**self).destroy_shadow_map(shadow_map)
    }

    fn bind_shader(&mut self, shader: ShaderHandle) {
        (**self).bind_shader(shader)
    }

    fn bind_textures(&mut self, textures: &[TextureHandle]) {
        (**self).bind_textures(textures)
    }

    fn bind_shadow_maps(&mut self, shadow_maps: &[ShadowMapId]) {
        (**self).bind_shadow_maps(shadow_maps)
    }

    fn begin_shadow_pass(&mut self, shadow_map: ShadowMapId, face: u32) {
        (**self).begin_shadow_pass(shadow_map, face)
    }

    fn begin_color_pass(&mut self, clear_color: [f32; 4]) {
        (**self).begin_color_pass(clear_color)
    }

    fn multi_draw_indexed(&mut self, draws: &[DrawRange]) {
        (**self).multi_draw_indexed(draws)
    }

    fn present(&mut self) {
        (**self).present()
    }
}
