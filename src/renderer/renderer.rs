// renderer/renderer.rs
use glam::{Mat4, Vec3};
use log::{debug, error, info, warn};

use crate::renderer::batch::{RenderBatch, MAX_MESHES};
use crate::renderer::device::{
    BufferKind, Device, DrawRange, ShaderHandle, ShadowMapId, CUBE_FACE_COUNT, MAX_SHADOW_LIGHTS,
};
use crate::renderer::error::EngineError;
use crate::renderer::internal::{
    BatchId, BufferAllocator, RenderContext, ShaderBucketMapper, UniformBlockRegistry,
};
use crate::renderer::lights::{cube_face_view_projections, lights_uniform, PointLight};
use crate::renderer::material::Material;
use crate::renderer::mesh::Mesh;
use crate::renderer::uniforms::{CameraUniform, InstanceUniform, LightsUniform, ShadowUniform};
use crate::settings::EngineSettings;

pub const INSTANCE_BLOCK_BINDING: u32 = 0;
pub const SHADOW_BLOCK_BINDING: u32 = 1;
pub const LIGHTS_BLOCK_BINDING: u32 = 2;
pub const CAMERA_BLOCK_BINDING: u32 = 3;

pub const INSTANCE_BLOCK_SIZE: u64 =
    (std::mem::size_of::<InstanceUniform>() * MAX_MESHES) as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameState {
    #[default]
    Idle,
    Accumulating,
    DepthPass,
    ColorPass,
    Present,
}

/// What the last `draw()` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    pub submissions: usize,
    pub buckets: usize,
    pub batches: usize,
    /// Multi-draws issued in the color pass.
    pub draw_calls: usize,
    /// Multi-draws issued across every shadow cube face.
    pub shadow_draw_calls: usize,
    pub presented: bool,
}

impl FrameStats {
    pub fn total_draw_calls(&self) -> usize {
        self.draw_calls + self.shadow_draw_calls
    }
}

/// Vertex and index streams shared by every batch, plus the draw ranges of
/// whichever batch was uploaded last.
struct BatchUploader {
    vertices: BufferAllocator,
    indices: BufferAllocator,
    offsets: Vec<DrawRange>,
    resident: Option<BatchId>,
}

impl BatchUploader {
    fn new() -> Self {
        Self {
            vertices: BufferAllocator::new(BufferKind::Vertex),
            indices: BufferAllocator::new(BufferKind::Index),
            offsets: Vec::with_capacity(MAX_MESHES),
            resident: None,
        }
    }

    /// Uploads `batch` unless it is already resident, then issues its
    /// multi-draw.
    fn submit<D: Device>(
        &mut self,
        ctx: &mut RenderContext<D>,
        uniforms: &mut UniformBlockRegistry,
        id: BatchId,
        batch: &RenderBatch,
    ) -> Result<(), EngineError> {
        if self.resident != Some(id) {
            self.resident = None;
            self.vertices
                .replace(ctx, bytemuck::cast_slice(batch.vertices()))?;
            self.indices
                .replace(ctx, bytemuck::cast_slice(batch.indices()))?;
            if !uniforms.send_data(
                ctx,
                INSTANCE_BLOCK_BINDING,
                bytemuck::cast_slice(batch.instances()),
            ) {
                return Err(EngineError::UniformUpload(INSTANCE_BLOCK_BINDING));
            }
            batch.generate_offsets(&mut self.offsets);
            self.resident = Some(id);
        }

        self.vertices.bind(ctx)?;
        self.indices.bind(ctx)?;
        ctx.device_mut().multi_draw_indexed(&self.offsets);
        Ok(())
    }

    fn terminate<D: Device>(&mut self, ctx: &mut RenderContext<D>) {
        self.vertices.terminate(ctx);
        self.indices.terminate(ctx);
        self.offsets.clear();
        self.resident = None;
    }
}

/// Per-frame batching front end and multi-pass draw driver.
///
/// Submissions made with [`render`](Self::render) only live until the next
/// [`draw`](Self::draw); callers resubmit every object every frame. Camera
/// and lights are persistent.
pub struct DrawEngine<D: Device> {
    ctx: RenderContext<D>,
    settings: EngineSettings,
    uploader: BatchUploader,
    uniforms: UniformBlockRegistry,
    shadow_shader: ShaderHandle,
    shadow_maps: Vec<ShadowMapId>,
    mapper: ShaderBucketMapper,
    batches: Vec<RenderBatch>,
    active_batches: usize,
    submissions: usize,
    camera: CameraUniform,
    lights: Vec<PointLight>,
    state: FrameState,
    stats: FrameStats,
    terminated: bool,
}

impl<D: Device> DrawEngine<D> {
    /// Creates every persistent device resource. Anything allocated before a
    /// failure is released again.
    pub fn new(
        device: D,
        settings: EngineSettings,
        shadow_shader: ShaderHandle,
    ) -> Result<Self, EngineError> {
        let mut engine = Self {
            ctx: RenderContext::new(device),
            settings: settings.validate(),
            uploader: BatchUploader::new(),
            uniforms: UniformBlockRegistry::new(),
            shadow_shader,
            shadow_maps: Vec::new(),
            mapper: ShaderBucketMapper::new(),
            batches: Vec::new(),
            active_batches: 0,
            submissions: 0,
            camera: CameraUniform::new(),
            lights: Vec::new(),
            state: FrameState::Idle,
            stats: FrameStats::default(),
            terminated: false,
        };

        if let Err(err) = engine.initialize() {
            error!("Draw engine initialization failed: {}", err);
            return Err(err);
        }
        Ok(engine)
    }

    fn initialize(&mut self) -> Result<(), EngineError> {
        if !self.ctx.device().is_shader_valid(self.shadow_shader) {
            return Err(EngineError::InvalidShadowShader(self.shadow_shader));
        }

        self.uploader
            .vertices
            .initialize(&mut self.ctx, self.settings.vertex_buffer_capacity)?;
        self.uploader
            .indices
            .initialize(&mut self.ctx, self.settings.index_buffer_capacity)?;

        self.uniforms.generate(&mut self.ctx)?;
        let blocks = [
            (INSTANCE_BLOCK_BINDING, INSTANCE_BLOCK_SIZE),
            (SHADOW_BLOCK_BINDING, std::mem::size_of::<ShadowUniform>() as u64),
            (LIGHTS_BLOCK_BINDING, std::mem::size_of::<LightsUniform>() as u64),
            (CAMERA_BLOCK_BINDING, std::mem::size_of::<CameraUniform>() as u64),
        ];
        for (binding, size) in blocks {
            self.uniforms.add_block(&mut self.ctx, binding, size)?;
        }

        let shadow_lights = self.ctx.limits().max_shadow_lights.min(MAX_SHADOW_LIGHTS);
        for light in 0..shadow_lights {
            let shadow_map = self
                .ctx
                .create_shadow_map(self.settings.shadow_map_size)
                .ok_or(EngineError::ShadowMap { light })?;
            self.shadow_maps.push(shadow_map);
        }

        info!(
            "Draw engine ready: {} shadow maps of {}px, {} material textures per batch",
            self.shadow_maps.len(),
            self.settings.shadow_map_size,
            self.max_batch_textures()
        );
        Ok(())
    }

    fn max_batch_textures(&self) -> usize {
        self.ctx.limits().max_material_textures() as usize
    }

    /// Queues one object for this frame.
    ///
    /// An empty mesh or an unknown shader is logged and still queued.
    pub fn render(&mut self, mesh: &Mesh, material: &Material, transform: Mat4, shader: ShaderHandle) {
        if mesh.is_empty() {
            warn!("Rendering an empty mesh with shader {:?}", shader);
        }
        if !self.ctx.device().is_shader_valid(shader) {
            warn!("Rendering with invalid shader {:?}", shader);
        }

        let bucket = self.mapper.find_bucket(shader);
        if let Some(last) = bucket
            .and_then(|index| self.mapper.get(index))
            .and_then(|b| b.last_batch())
        {
            if self.batches[last].try_add(mesh, material, transform) {
                self.accept();
                return;
            }
            debug!(
                "Batch {} of shader {:?} is full, spilling into a new batch",
                last, shader
            );
        }

        let id = self.acquire_batch();
        if !self.batches[id].try_add(mesh, material, transform) {
            // The batch was empty and untouched, so it goes straight back.
            self.active_batches -= 1;
            error!(
                "Submission with shader {:?} does not fit an empty batch ({} textures allowed); dropped",
                shader,
                self.max_batch_textures()
            );
            return;
        }
        // Buckets only exist for shaders with at least one accepted submission.
        let bucket = bucket.unwrap_or_else(|| self.mapper.new_bucket(shader));
        if let Some(bucket) = self.mapper.get_mut(bucket) {
            bucket.push(id);
        }
        self.accept();
    }

    fn accept(&mut self) {
        self.submissions += 1;
        self.state = FrameState::Accumulating;
    }

    fn acquire_batch(&mut self) -> BatchId {
        if self.active_batches == self.batches.len() {
            let batch = RenderBatch::new(self.max_batch_textures(), self.settings.batch);
            self.batches.push(batch);
        }
        let id = self.active_batches;
        self.active_batches += 1;
        id
    }

    /// Runs the shadow pass and the color pass over everything queued since
    /// the last call, presents, and clears the queue.
    pub fn draw(&mut self) -> FrameStats {
        let mut stats = FrameStats {
            submissions: self.submissions,
            buckets: self.mapper.len(),
            batches: self.active_batches,
            ..FrameStats::default()
        };

        if self.terminated {
            warn!("draw() called on a terminated engine");
        } else if !self.ctx.device().has_surface() {
            warn!(
                "No surface available yet; dropping {} submissions",
                self.submissions
            );
        } else if self.submissions == 0 {
            self.state = FrameState::ColorPass;
            self.ctx
                .device_mut()
                .begin_color_pass(self.settings.clear_color);
            self.present(&mut stats);
        } else {
            self.state = FrameState::DepthPass;
            stats.shadow_draw_calls = self.depth_pass();
            self.state = FrameState::ColorPass;
            stats.draw_calls = self.color_pass();
            self.present(&mut stats);
        }

        self.reset_frame();
        debug!("Frame: {:?}", stats);
        self.stats = stats;
        stats
    }

    fn present(&mut self, stats: &mut FrameStats) {
        self.state = FrameState::Present;
        self.ctx.device_mut().present();
        stats.presented = true;
    }

    fn depth_pass(&mut self) -> usize {
        let Self {
            ctx,
            settings,
            uploader,
            uniforms,
            shadow_shader,
            shadow_maps,
            batches,
            active_batches,
            lights,
            ..
        } = self;

        let mut draws = 0;
        for (light, &shadow_map) in lights.iter().zip(shadow_maps.iter()) {
            let far = light.shadow_far(settings.shadow_near);
            let faces = cube_face_view_projections(light.position, settings.shadow_near, far);
            for (face, view_proj) in (0..CUBE_FACE_COUNT).zip(faces) {
                let shadow = ShadowUniform::new(view_proj, light.position, far);
                uniforms.send_data(ctx, SHADOW_BLOCK_BINDING, bytemuck::bytes_of(&shadow));

                ctx.device_mut().begin_shadow_pass(shadow_map, face);
                ctx.device_mut().bind_shader(*shadow_shader);
                for (id, batch) in batches[..*active_batches].iter().enumerate() {
                    match uploader.submit(ctx, uniforms, id, batch) {
                        Ok(()) => draws += 1,
                        Err(err) => {
                            error!("Skipping batch {} in shadow pass: {}", id, err);
                        }
                    }
                }
            }
        }
        draws
    }

    fn color_pass(&mut self) -> usize {
        let Self {
            ctx,
            settings,
            uploader,
            uniforms,
            shadow_maps,
            mapper,
            batches,
            camera,
            lights,
            ..
        } = self;

        let lights = lights_uniform(lights, shadow_maps.len());
        uniforms.send_data(ctx, CAMERA_BLOCK_BINDING, bytemuck::bytes_of(camera));
        uniforms.send_data(ctx, LIGHTS_BLOCK_BINDING, bytemuck::bytes_of(&lights));

        ctx.device_mut().begin_color_pass(settings.clear_color);
        ctx.device_mut().bind_shadow_maps(shadow_maps);

        let mut draws = 0;
        for bucket in mapper.iter() {
            ctx.device_mut().bind_shader(bucket.shader());
            for &id in bucket.batches() {
                let batch = &batches[id];
                ctx.device_mut().bind_textures(batch.textures());
                match uploader.submit(ctx, uniforms, id, batch) {
                    Ok(()) => draws += 1,
                    Err(err) => error!("Skipping batch {} in color pass: {}", id, err),
                }
            }
        }
        draws
    }

    fn reset_frame(&mut self) {
        for batch in &mut self.batches[..self.active_batches] {
            batch.clear();
        }
        self.active_batches = 0;
        self.submissions = 0;
        self.mapper.clear();
        self.uploader.resident = None;
        self.state = FrameState::Idle;
    }

    pub fn set_camera(&mut self, view_proj: Mat4, position: Vec3) {
        self.camera = CameraUniform::from_matrix(view_proj, position);
    }

    /// Replaces the light list. Only the first lights up to the shadow map
    /// count are shaded and cast shadows.
    pub fn set_point_lights(&mut self, lights: &[PointLight]) {
        if lights.len() > self.shadow_maps.len() {
            warn!(
                "{} point lights given, only the first {} are used",
                lights.len(),
                self.shadow_maps.len()
            );
        }
        self.lights.clear();
        self.lights.extend_from_slice(lights);
    }

    pub fn point_lights(&self) -> &[PointLight] {
        &self.lights
    }

    pub fn shadow_maps(&self) -> &[ShadowMapId] {
        &self.shadow_maps
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn buckets(&self) -> &ShaderBucketMapper {
        &self.mapper
    }

    /// A batch queued this frame.
    pub fn batch(&self, id: BatchId) -> Option<&RenderBatch> {
        self.batches[..self.active_batches].get(id)
    }

    pub fn batch_count(&self) -> usize {
        self.active_batches
    }

    pub fn uniform_blocks(&self) -> &UniformBlockRegistry {
        &self.uniforms
    }

    pub fn context(&self) -> &RenderContext<D> {
        &self.ctx
    }

    pub fn device(&self) -> &D {
        self.ctx.device()
    }

    pub fn device_mut(&mut self) -> &mut D {
        self.ctx.device_mut()
    }

    /// Releases every device resource and reports leaks. Safe to call more
    /// than once; also runs on drop.
    pub fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.reset_frame();

        self.uploader.terminate(&mut self.ctx);
        self.uniforms.terminate(&mut self.ctx);
        for shadow_map in self.shadow_maps.drain(..) {
            self.ctx.destroy_shadow_map(shadow_map);
        }

        let leaks = self.ctx.tracker().report_leaks();
        if leaks == 0 {
            info!("Draw engine terminated");
        }
    }
}

impl<D: Device> Drop for DrawEngine<D> {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::device::{DeviceLimits, TextureHandle};
    use crate::renderer::error::UniformError;
    use crate::renderer::headless::{DeviceCall, HeadlessDevice};
    use crate::renderer::primitives::cube_mesh;

    fn engine() -> (DrawEngine<HeadlessDevice>, ShaderHandle) {
        let mut device = HeadlessDevice::new();
        let shadow = device.register_shader();
        let shader = device.register_shader();
        let engine = DrawEngine::new(device, EngineSettings::default(), shadow).unwrap();
        (engine, shader)
    }

    #[test]
    fn invalid_shadow_shader_is_fatal() {
        let mut device = HeadlessDevice::new();
        let err = DrawEngine::new(&mut device, EngineSettings::default(), ShaderHandle::new(77)).err();

        assert_eq!(err, Some(EngineError::InvalidShadowShader(ShaderHandle::new(77))));
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn failed_initialization_releases_what_was_created() {
        let limits = DeviceLimits::from_texture_units(16, 4 * 1024, 256);
        let mut device = HeadlessDevice::with_limits(limits);
        let shadow = device.register_shader();

        let err = DrawEngine::new(&mut device, EngineSettings::default(), shadow).err();

        assert!(matches!(
            err,
            Some(EngineError::Uniform(UniformError::OutOfSpace {
                binding: INSTANCE_BLOCK_BINDING,
                ..
            }))
        ));
        assert_eq!(device.live_buffers(), 0);
        assert_eq!(device.live_shadow_maps(), 0);
    }

    #[test]
    fn one_shadow_map_per_shadow_light() {
        let (engine, _) = engine();
        assert_eq!(engine.shadow_maps().len(), 4);
        assert_eq!(engine.device().live_shadow_maps(), 4);

        let limits = DeviceLimits::from_texture_units(8, 16 * 1024, 256);
        let mut device = HeadlessDevice::with_limits(limits);
        let shadow = device.register_shader();
        let engine = DrawEngine::new(device, EngineSettings::default(), shadow).unwrap();
        assert_eq!(engine.shadow_maps().len(), 2);
    }

    #[test]
    fn uniform_blocks_are_laid_out_at_startup() {
        let (engine, _) = engine();
        let registry = engine.uniform_blocks();
        let bindings: Vec<u32> = registry.blocks().iter().map(|b| b.binding).collect();
        assert_eq!(
            bindings,
            vec![
                INSTANCE_BLOCK_BINDING,
                SHADOW_BLOCK_BINDING,
                LIGHTS_BLOCK_BINDING,
                CAMERA_BLOCK_BINDING
            ]
        );
        assert_eq!(registry.block(INSTANCE_BLOCK_BINDING).unwrap().size, INSTANCE_BLOCK_SIZE);
    }

    #[test]
    fn state_follows_the_frame() {
        let (mut engine, shader) = engine();
        assert_eq!(engine.state(), FrameState::Idle);

        engine.render(&cube_mesh(), &Material::new(), Mat4::IDENTITY, shader);
        assert_eq!(engine.state(), FrameState::Accumulating);

        engine.draw();
        assert_eq!(engine.state(), FrameState::Idle);
    }

    #[test]
    fn single_batch_is_uploaded_once_per_frame() {
        let (mut engine, shader) = engine();
        engine.set_point_lights(&[PointLight::new(Vec3::Y, Vec3::ONE, 1.0, 10.0)]);
        engine.render(&cube_mesh(), &Material::new(), Mat4::IDENTITY, shader);
        engine.device_mut().clear_calls();

        let stats = engine.draw();

        assert_eq!(stats.shadow_draw_calls, 6);
        assert_eq!(stats.draw_calls, 1);
        let vertex_buffer = engine.uploader.vertices.id().unwrap();
        let vertex_writes = engine.device().count_calls(|call| {
            matches!(call, DeviceCall::WriteBuffer { buffer, .. } if *buffer == vertex_buffer)
        });
        assert_eq!(vertex_writes, 1);
    }

    #[test]
    fn unknown_shader_is_still_drawn() {
        let (mut engine, _) = engine();
        let unknown = ShaderHandle::new(500);
        engine.render(&cube_mesh(), &Material::new(), Mat4::IDENTITY, unknown);

        let stats = engine.draw();
        assert_eq!(stats.draw_calls, 1);
        assert!(engine
            .device()
            .calls()
            .contains(&DeviceCall::BindShader(unknown)));
    }

    #[test]
    fn material_wider_than_the_texture_table_is_dropped() {
        let limits = DeviceLimits::from_texture_units(4, 16 * 1024, 256);
        let mut device = HeadlessDevice::with_limits(limits);
        let shadow = device.register_shader();
        let shader = device.register_shader();
        let mut engine = DrawEngine::new(device, EngineSettings::default(), shadow).unwrap();

        let mut material = Material::new();
        for slot in 0..4 {
            material = material.with_texture(slot, TextureHandle::new(slot as u32 + 1));
        }
        engine.render(&cube_mesh(), &material, Mat4::IDENTITY, shader);

        assert_eq!(engine.batch_count(), 0);
        assert!(engine.buckets().is_empty());
        assert_eq!(engine.buckets().find_bucket(shader), None);

        let stats = engine.draw();
        assert_eq!(stats.submissions, 0);
        assert_eq!(stats.buckets, 0);
        assert_eq!(stats.batches, 0);
    }

    #[test]
    fn terminate_is_idempotent() {
        let (mut engine, _) = engine();
        engine.terminate();
        engine.terminate();

        assert_eq!(engine.device().live_buffers(), 0);
        assert_eq!(engine.device().live_shadow_maps(), 0);
        assert_eq!(engine.context().tracker().live_count(), 0);
        assert!(!engine.draw().presented);
    }
}
