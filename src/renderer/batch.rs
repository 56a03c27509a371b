// renderer/batch.rs
use bytemuck::Zeroable;
use glam::Mat4;

use crate::renderer::device::{DrawRange, TextureHandle};
use crate::renderer::material::{Material, MATERIAL_TEXTURE_SLOTS};
use crate::renderer::mesh::Mesh;
use crate::renderer::uniforms::{InstanceUniform, NO_TEXTURE};
use crate::renderer::vertex::Vertex;
use crate::settings::BatchSettings;

/// Instance slots per batch; one multi-draw covers at most this many meshes.
pub const MAX_MESHES: usize = 64;

/// Up to [`MAX_MESHES`] submissions sharing one shader, packed into one
/// vertex stream, one index stream and one instance uniform array.
///
/// Indices are stored exactly as submitted. Slot `i` is drawn with a base
/// vertex equal to the number of vertices in slots `0..i`.
pub struct RenderBatch {
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
    vertex_counts: [u32; MAX_MESHES],
    index_counts: [u32; MAX_MESHES],
    instances: Vec<InstanceUniform>,
    textures: Vec<TextureHandle>,
    num_meshes: usize,
    max_textures: usize,
    budget: BatchSettings,
}

impl RenderBatch {
    pub fn new(max_textures: usize, budget: BatchSettings) -> Self {
        Self {
            vertices: Vec::new(),
            indices: Vec::new(),
            vertex_counts: [0; MAX_MESHES],
            index_counts: [0; MAX_MESHES],
            instances: vec![InstanceUniform::zeroed(); MAX_MESHES],
            textures: Vec::with_capacity(max_textures),
            num_meshes: 0,
            max_textures,
            budget,
        }
    }

    pub fn num_meshes(&self) -> usize {
        self.num_meshes
    }

    pub fn is_empty(&self) -> bool {
        self.num_meshes == 0
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Instance payload of the active slots.
    pub fn instances(&self) -> &[InstanceUniform] {
        &self.instances[..self.num_meshes]
    }

    /// Texture table; a texture's position is the index its instances use.
    pub fn textures(&self) -> &[TextureHandle] {
        &self.textures
    }

    pub fn vertex_counts(&self) -> &[u32] {
        &self.vertex_counts[..self.num_meshes]
    }

    pub fn index_counts(&self) -> &[u32] {
        &self.index_counts[..self.num_meshes]
    }

    /// Whether `mesh` fits by slot count and geometry budget. An empty batch
    /// takes any single mesh so oversized geometry still gets drawn.
    pub fn can_contain(&self, mesh: &Mesh) -> bool {
        if self.num_meshes >= MAX_MESHES {
            return false;
        }
        if self.num_meshes == 0 {
            return true;
        }
        self.vertices.len() + mesh.vertices.len() <= self.budget.max_vertices as usize
            && self.indices.len() + mesh.indices.len() <= self.budget.max_indices as usize
    }

    fn texture_slot(&self, texture: TextureHandle) -> Option<usize> {
        self.textures.iter().position(|&t| t == texture)
    }

    /// Resolves the material's textures against the table and writes the
    /// instance payload into the next free slot.
    ///
    /// Fails without touching the batch when the slots are exhausted or the
    /// table cannot take every new texture the material needs.
    pub fn try_add_uniform_data(&mut self, material: &Material, transform: Mat4) -> bool {
        if self.num_meshes >= MAX_MESHES {
            return false;
        }

        let mut pending = [None; MATERIAL_TEXTURE_SLOTS];
        let mut pending_count = 0;
        for texture in material.texture_handles() {
            if self.texture_slot(texture).is_some() || pending[..pending_count].contains(&Some(texture)) {
                continue;
            }
            pending[pending_count] = Some(texture);
            pending_count += 1;
        }

        if self.textures.len() + pending_count > self.max_textures {
            return false;
        }
        self.textures
            .extend(pending[..pending_count].iter().flatten().copied());

        let mut indices = [NO_TEXTURE; MATERIAL_TEXTURE_SLOTS];
        for (index, texture) in indices.iter_mut().zip(material.textures.iter()) {
            if let Some(texture) = texture {
                *index = self
                    .texture_slot(*texture)
                    .map_or(NO_TEXTURE, |slot| slot as u32);
            }
        }

        self.instances[self.num_meshes] = InstanceUniform::new(indices, material.params, transform);
        true
    }

    /// Appends the mesh geometry as the slot whose uniform data was just
    /// written, and closes that slot.
    pub fn append_geometry(&mut self, mesh: &Mesh) {
        debug_assert!(self.num_meshes < MAX_MESHES, "batch overflow");
        let slot = self.num_meshes;
        self.vertex_counts[slot] = mesh.vertex_count();
        self.index_counts[slot] = mesh.index_count();
        self.vertices.extend_from_slice(&mesh.vertices);
        self.indices.extend_from_slice(&mesh.indices);
        self.num_meshes += 1;
    }

    /// Adds a whole submission, or nothing.
    pub fn try_add(&mut self, mesh: &Mesh, material: &Material, transform: Mat4) -> bool {
        if !self.can_contain(mesh) || !self.try_add_uniform_data(material, transform) {
            return false;
        }
        self.append_geometry(mesh);
        true
    }

    /// Empties the batch but keeps its storage for the next frame.
    pub fn clear(&mut self) {
        self.vertices.clear();
        self.indices.clear();
        self.textures.clear();
        self.num_meshes = 0;
    }

    /// Fills `out` with one draw range per active slot, as running sums of
    /// the preceding slots' index and vertex counts.
    pub fn generate_offsets(&self, out: &mut Vec<DrawRange>) {
        out.clear();
        let mut index_offset = 0u64;
        let mut base_vertex = 0i32;
        for slot in 0..self.num_meshes {
            out.push(DrawRange {
                index_count: self.index_counts[slot],
                index_offset,
                base_vertex,
            });
            index_offset += u64::from(self.index_counts[slot]) * std::mem::size_of::<u32>() as u64;
            base_vertex += self.vertex_counts[slot] as i32;
        }
    }
}
