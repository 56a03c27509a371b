//! [`Device`] backed by wgpu.
//!
//! Device calls made during a frame are recorded and replayed into a single
//! command encoder on [`Device::present`]. Buffer writes go through a staging
//! buffer and become encoder copies, so every write lands exactly between the
//! draws it was issued between.

use std::collections::HashMap;
use std::num::NonZeroU64;

use log::{error, info, warn};

use crate::renderer::depth::Depth;
use crate::renderer::device::{
    BufferId, BufferKind, Device, DeviceLimits, DrawRange, ShaderHandle, ShadowMapId,
    TextureHandle, CUBE_FACE_COUNT,
};
use crate::renderer::error::DeviceError;
use crate::renderer::internal::buffers::grown_capacity;
use crate::settings::EngineSettings;

/// Uniform binding points exposed in bind group 0.
pub const UNIFORM_BINDINGS: u32 = 4;
pub const SHADOW_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

const MAX_CACHED_GROUPS: usize = 256;

/// Host side copy of the frame's buffer writes, packed at copy alignment.
#[derive(Debug, Default)]
struct FrameStaging {
    bytes: Vec<u8>,
}

impl FrameStaging {
    /// Appends `data` and returns its offset and padded size.
    fn push(&mut self, data: &[u8]) -> (u64, u64) {
        let offset = self.bytes.len() as u64;
        let size = wgpu::util::align_to(data.len() as u64, wgpu::COPY_BUFFER_ALIGNMENT);
        self.bytes.extend_from_slice(data);
        self.bytes.resize((offset + size) as usize, 0);
        (offset, size)
    }

    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn clear(&mut self) {
        self.bytes.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Target {
    Shadow { shadow_map: ShadowMapId, face: u32 },
    Color { clear_color: [f32; 4] },
}

#[derive(Debug, Clone, Copy)]
enum CopySource {
    Staging(u64),
    Buffer(BufferId),
}

#[derive(Debug)]
enum Command {
    Copy {
        src: CopySource,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    },
    BindBuffer(BufferKind, BufferId),
    BindShader(ShaderHandle),
    BindTextures(Vec<TextureHandle>),
    BindShadowMaps(Vec<ShadowMapId>),
    BeginPass(Target),
    Draw(Vec<DrawRange>),
}

/// What the replayed pass has bound so far.
#[derive(Debug, Default)]
struct PassState {
    target: Option<Target>,
    clear_pending: bool,
    dirty: bool,
    shader: Option<ShaderHandle>,
    vertices: Option<BufferId>,
    indices: Option<BufferId>,
    textures: Option<Vec<TextureHandle>>,
    shadow_maps: Option<Vec<ShadowMapId>>,
}

struct GpuBuffer {
    buffer: wgpu::Buffer,
    retired: bool,
}

struct ShadowCube {
    face_views: Vec<wgpu::TextureView>,
    cube_view: wgpu::TextureView,
    retired: bool,
}

#[derive(Debug, Clone, Copy)]
struct UniformRange {
    buffer: BufferId,
    offset: u64,
    size: u64,
}

struct SurfaceState {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
}

pub struct WgpuDevice {
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface: Option<SurfaceState>,
    depth: Option<Depth>,
    limits: DeviceLimits,
    max_buffer_size: u64,
    next_id: u32,

    uniform_layout: wgpu::BindGroupLayout,
    material_layout: wgpu::BindGroupLayout,
    shadow_layout: wgpu::BindGroupLayout,
    material_sampler: wgpu::Sampler,
    shadow_sampler: wgpu::Sampler,
    fallback_texture: wgpu::TextureView,
    fallback_cube: wgpu::TextureView,

    buffers: HashMap<u32, GpuBuffer>,
    shadow_maps: HashMap<u32, ShadowCube>,
    pipelines: HashMap<ShaderHandle, wgpu::RenderPipeline>,
    textures: HashMap<TextureHandle, wgpu::TextureView>,
    uniform_ranges: [Option<UniformRange>; UNIFORM_BINDINGS as usize],
    uniform_group: Option<wgpu::BindGroup>,
    material_groups: HashMap<Vec<TextureHandle>, wgpu::BindGroup>,
    shadow_groups: HashMap<Vec<ShadowMapId>, wgpu::BindGroup>,

    staging: FrameStaging,
    staging_buffer: Option<wgpu::Buffer>,
    commands: Vec<Command>,
}

impl WgpuDevice {
    /// Picks an adapter, opens the device and, when given, configures the
    /// surface.
    pub async fn request(
        instance: &wgpu::Instance,
        surface: Option<wgpu::Surface<'static>>,
        settings: &EngineSettings,
    ) -> Result<Self, DeviceError> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: surface.as_ref(),
                force_fallback_adapter: false,
            })
            .await?;

        info!("Using adapter: {:?}", adapter.get_info());

        let mut required_limits = wgpu::Limits::default();
        required_limits.max_bind_groups = required_limits.max_bind_groups.max(3);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Device"),
                required_features: wgpu::Features::empty(),
                required_limits,
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await?;

        let mut this = Self::from_parts(adapter, device, queue);
        if let Some(surface) = surface {
            this.attach_surface(surface, settings)?;
        }
        Ok(this)
    }

    #[cfg(not(target_arch = "wasm32"))]
    pub fn request_blocking(
        instance: &wgpu::Instance,
        surface: Option<wgpu::Surface<'static>>,
        settings: &EngineSettings,
    ) -> Result<Self, DeviceError> {
        pollster::block_on(Self::request(instance, surface, settings))
    }

    pub fn from_parts(adapter: wgpu::Adapter, device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let device_limits = device.limits();
        let limits = DeviceLimits::from_texture_units(
            device_limits.max_sampled_textures_per_shader_stage,
            u64::from(device_limits.max_uniform_buffer_binding_size),
            u64::from(device_limits.min_uniform_buffer_offset_alignment),
        );

        let uniform_layout = create_uniform_layout(&device);
        let material_layout = create_material_layout(&device, limits.max_material_textures());
        let shadow_layout = create_shadow_layout(&device, limits.max_shadow_lights);

        let material_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("MaterialSampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let shadow_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("ShadowSampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            compare: Some(wgpu::CompareFunction::LessEqual),
            ..Default::default()
        });

        let fallback_texture = create_white_texture(&device, &queue);
        let fallback_cube = create_cube_views(&device, "FallbackShadowCube", 1).1;

        Self {
            adapter,
            max_buffer_size: device_limits.max_buffer_size,
            device,
            queue,
            surface: None,
            depth: None,
            limits,
            next_id: 1,
            uniform_layout,
            material_layout,
            shadow_layout,
            material_sampler,
            shadow_sampler,
            fallback_texture,
            fallback_cube,
            buffers: HashMap::new(),
            shadow_maps: HashMap::new(),
            pipelines: HashMap::new(),
            textures: HashMap::new(),
            uniform_ranges: [None; UNIFORM_BINDINGS as usize],
            uniform_group: None,
            material_groups: HashMap::new(),
            shadow_groups: HashMap::new(),
            staging: FrameStaging::default(),
            staging_buffer: None,
            commands: Vec::new(),
        }
    }

    pub fn attach_surface(
        &mut self,
        surface: wgpu::Surface<'static>,
        settings: &EngineSettings,
    ) -> Result<(), DeviceError> {
        let caps = surface.get_capabilities(&self.adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or(DeviceError::UnsupportedSurface)?;

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: settings.resolution.width.max(1),
            height: settings.resolution.height.max(1),
            present_mode: settings.present_mode(&caps.present_modes),
            alpha_mode: caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&self.device, &config);
        info!(
            "Surface configured: {}x{} {:?}",
            config.width, config.height, config.format
        );

        self.depth = Some(Depth::new(&self.device, config.width, config.height));
        self.surface = Some(SurfaceState { surface, config });
        Ok(())
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let Some(state) = self.surface.as_mut() else {
            return;
        };
        state.config.width = width;
        state.config.height = height;
        state.surface.configure(&self.device, &state.config);
        self.depth = Some(Depth::new(&self.device, width, height));
    }

    /// Registers a pipeline built against [`Self::color_pipeline_layout`] or
    /// [`Self::shadow_pipeline_layout`].
    pub fn register_pipeline(&mut self, pipeline: wgpu::RenderPipeline) -> ShaderHandle {
        let shader = ShaderHandle::new(self.allocate_id());
        self.pipelines.insert(shader, pipeline);
        shader
    }

    pub fn register_texture(&mut self, view: wgpu::TextureView) -> TextureHandle {
        let texture = TextureHandle::new(self.allocate_id());
        self.textures.insert(texture, view);
        texture
    }

    pub fn gpu(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn surface_format(&self) -> Option<wgpu::TextureFormat> {
        self.surface.as_ref().map(|state| state.config.format)
    }

    pub fn uniform_layout(&self) -> &wgpu::BindGroupLayout {
        &self.uniform_layout
    }

    pub fn material_layout(&self) -> &wgpu::BindGroupLayout {
        &self.material_layout
    }

    pub fn shadow_layout(&self) -> &wgpu::BindGroupLayout {
        &self.shadow_layout
    }

    /// Groups: 0 uniforms, 1 material textures, 2 shadow cubes.
    pub fn color_pipeline_layout(&self) -> wgpu::PipelineLayout {
        self.device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("ColorPipelineLayout"),
                bind_group_layouts: &[
                    &self.uniform_layout,
                    &self.material_layout,
                    &self.shadow_layout,
                ],
                push_constant_ranges: &[],
            })
    }

    pub fn shadow_pipeline_layout(&self) -> wgpu::PipelineLayout {
        self.device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("ShadowPipelineLayout"),
                bind_group_layouts: &[&self.uniform_layout],
                push_constant_ranges: &[],
            })
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.values().filter(|b| !b.retired).count()
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn buffer(&self, id: BufferId) -> Option<&wgpu::Buffer> {
        self.buffers.get(&id.index()).map(|b| &b.buffer)
    }

    fn discard_frame(&mut self) {
        self.commands.clear();
        self.staging.clear();
        self.collect_retired();
    }

    fn collect_retired(&mut self) {
        self.buffers.retain(|_, b| !b.retired);
        let before = self.shadow_maps.len();
        self.shadow_maps.retain(|_, s| !s.retired);
        if self.shadow_maps.len() != before {
            self.shadow_groups.clear();
        }
    }

    /// Moves the frame's staged bytes into the staging buffer.
    fn upload_staging(&mut self) {
        let len = self.staging.len();
        if len == 0 {
            return;
        }

        let capacity = self.staging_buffer.as_ref().map_or(0, |b| b.size());
        if capacity < len {
            let size = grown_capacity(capacity, len);
            self.staging_buffer = Some(self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("FrameStaging"),
                size,
                usage: wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
        }

        if let Some(buffer) = self.staging_buffer.as_ref() {
            self.queue.write_buffer(buffer, 0, &self.staging.bytes);
        }
        self.staging.clear();
    }

    fn uniform_group(&mut self) -> Option<wgpu::BindGroup> {
        if self.uniform_group.is_none() {
            let group = self.create_uniform_group()?;
            self.uniform_group = Some(group);
        }
        self.uniform_group.clone()
    }

    /// Every binding needs a resource, so unbound ones alias the first bound
    /// range.
    fn create_uniform_group(&self) -> Option<wgpu::BindGroup> {
        let fallback = self.uniform_ranges.iter().flatten().next().copied()?;
        let mut entries = Vec::with_capacity(UNIFORM_BINDINGS as usize);
        for (binding, range) in (0u32..).zip(&self.uniform_ranges) {
            let range = range.unwrap_or(fallback);
            entries.push(wgpu::BindGroupEntry {
                binding,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: self.buffer(range.buffer)?,
                    offset: range.offset,
                    size: NonZeroU64::new(range.size),
                }),
            });
        }
        Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("UniformBlocks"),
            layout: &self.uniform_layout,
            entries: &entries,
        }))
    }

    fn material_group(&mut self, textures: &[TextureHandle]) -> wgpu::BindGroup {
        if let Some(group) = self.material_groups.get(textures) {
            return group.clone();
        }
        if self.material_groups.len() >= MAX_CACHED_GROUPS {
            self.material_groups.clear();
        }

        let slots = self.limits.max_material_textures() as usize;
        let mut entries = Vec::with_capacity(slots + 1);
        for slot in 0..slots {
            let view = textures
                .get(slot)
                .and_then(|texture| self.textures.get(texture))
                .unwrap_or(&self.fallback_texture);
            entries.push(wgpu::BindGroupEntry {
                binding: slot as u32,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }
        entries.push(wgpu::BindGroupEntry {
            binding: slots as u32,
            resource: wgpu::BindingResource::Sampler(&self.material_sampler),
        });

        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("MaterialTextures"),
            layout: &self.material_layout,
            entries: &entries,
        });
        self.material_groups.insert(textures.to_vec(), group.clone());
        group
    }

    fn shadow_group(&mut self, shadow_maps: &[ShadowMapId]) -> wgpu::BindGroup {
        if let Some(group) = self.shadow_groups.get(shadow_maps) {
            return group.clone();
        }

        let lights = self.limits.max_shadow_lights as usize;
        let mut entries = Vec::with_capacity(lights + 1);
        for light in 0..lights {
            let view = shadow_maps
                .get(light)
                .and_then(|map| self.shadow_maps.get(&map.index()))
                .map_or(&self.fallback_cube, |cube| &cube.cube_view);
            entries.push(wgpu::BindGroupEntry {
                binding: light as u32,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }
        entries.push(wgpu::BindGroupEntry {
            binding: lights as u32,
            resource: wgpu::BindingResource::Sampler(&self.shadow_sampler),
        });

        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("ShadowCubes"),
            layout: &self.shadow_layout,
            entries: &entries,
        });
        self.shadow_groups.insert(shadow_maps.to_vec(), group.clone());
        group
    }

    fn open_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        color_view: &wgpu::TextureView,
        state: &mut PassState,
    ) -> Option<wgpu::RenderPass<'static>> {
        let target = state.target?;
        let clear = std::mem::take(&mut state.clear_pending);
        state.dirty = true;

        let depth_load = if clear {
            wgpu::LoadOp::Clear(1.0)
        } else {
            wgpu::LoadOp::Load
        };

        let pass = match target {
            Target::Shadow { shadow_map, face } => {
                let Some(view) = self
                    .shadow_maps
                    .get(&shadow_map.index())
                    .and_then(|cube| cube.face_views.get(face as usize))
                else {
                    warn!("Shadow pass on unknown shadow map {:?}", shadow_map);
                    return None;
                };
                encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("ShadowPass"),
                    color_attachments: &[],
                    depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations {
                            load: depth_load,
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    }),
                    timestamp_writes: None,
                    occlusion_query_set: None,
                })
            }
            Target::Color { clear_color } => {
                let [r, g, b, a] = clear_color.map(f64::from);
                let load = if clear {
                    wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a })
                } else {
                    wgpu::LoadOp::Load
                };
                let depth_view = self.depth.as_ref()?;
                encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("ColorPass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: color_view,
                        depth_slice: None,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load,
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                        view: &depth_view.view,
                        depth_ops: Some(wgpu::Operations {
                            load: depth_load,
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    }),
                    timestamp_writes: None,
                    occlusion_query_set: None,
                })
            }
        };
        Some(pass.forget_lifetime())
    }

    /// Opens and closes a pass so a clear with nothing drawn still happens.
    fn flush_clear(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        color_view: &wgpu::TextureView,
        state: &mut PassState,
    ) {
        if state.clear_pending {
            drop(self.open_pass(encoder, color_view, state));
        }
    }

    fn apply_state(&mut self, pass: &mut wgpu::RenderPass<'static>, state: &PassState) -> bool {
        let Some(pipeline) = state.shader.and_then(|s| self.pipelines.get(&s)) else {
            warn!("Draw skipped: no pipeline for {:?}", state.shader);
            return false;
        };
        pass.set_pipeline(pipeline);

        let (Some(vertices), Some(indices)) = (
            state.vertices.and_then(|id| self.buffer(id)),
            state.indices.and_then(|id| self.buffer(id)),
        ) else {
            warn!("Draw skipped: vertex or index buffer not bound");
            return false;
        };
        pass.set_vertex_buffer(0, vertices.slice(..));
        pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);

        let Some(uniforms) = self.uniform_group() else {
            warn!("Draw skipped: no uniform blocks bound");
            return false;
        };
        pass.set_bind_group(0, &uniforms, &[]);

        if matches!(state.target, Some(Target::Color { .. })) {
            let textures = state.textures.as_deref().unwrap_or(&[]);
            let material = self.material_group(textures);
            pass.set_bind_group(1, &material, &[]);

            let shadow_maps = state.shadow_maps.as_deref().unwrap_or(&[]);
            let shadows = self.shadow_group(shadow_maps);
            pass.set_bind_group(2, &shadows, &[]);
        }
        true
    }

    fn replay(&mut self, encoder: &mut wgpu::CommandEncoder, color_view: &wgpu::TextureView) {
        let commands = std::mem::take(&mut self.commands);
        let mut state = PassState::default();
        let mut pass: Option<wgpu::RenderPass<'static>> = None;

        for command in commands {
            match command {
                Command::Copy {
                    src,
                    dst,
                    dst_offset,
                    size,
                } => {
                    // Copies cannot be recorded while a pass is open.
                    pass = None;
                    let (source, src_offset) = match src {
                        CopySource::Staging(offset) => (self.staging_buffer.as_ref(), offset),
                        CopySource::Buffer(id) => (self.buffer(id), 0),
                    };
                    match (source, self.buffer(dst)) {
                        (Some(source), Some(target)) => {
                            encoder.copy_buffer_to_buffer(source, src_offset, target, dst_offset, size);
                        }
                        _ => error!("Dropping copy into {:?}: buffer missing", dst),
                    }
                }
                Command::BeginPass(target) => {
                    pass = None;
                    self.flush_clear(encoder, color_view, &mut state);
                    state.target = Some(target);
                    state.clear_pending = true;
                }
                Command::BindBuffer(kind, id) => {
                    match kind {
                        BufferKind::Vertex => state.vertices = Some(id),
                        BufferKind::Index => state.indices = Some(id),
                        BufferKind::Uniform => {}
                    }
                    state.dirty = true;
                }
                Command::BindShader(shader) => {
                    state.shader = Some(shader);
                    state.dirty = true;
                }
                Command::BindTextures(textures) => {
                    state.textures = Some(textures);
                    state.dirty = true;
                }
                Command::BindShadowMaps(shadow_maps) => {
                    state.shadow_maps = Some(shadow_maps);
                    state.dirty = true;
                }
                Command::Draw(draws) => {
                    if pass.is_none() {
                        pass = self.open_pass(encoder, color_view, &mut state);
                    }
                    let Some(active) = pass.as_mut() else {
                        continue;
                    };
                    if state.dirty {
                        if !self.apply_state(active, &state) {
                            continue;
                        }
                        state.dirty = false;
                    }
                    for (slot, draw) in (0u32..).zip(&draws) {
                        let first = draw.first_index();
                        active.draw_indexed(
                            first..first + draw.index_count,
                            draw.base_vertex,
                            slot..slot + 1,
                        );
                    }
                }
            }
        }

        drop(pass);
        self.flush_clear(encoder, color_view, &mut state);
    }
}

impl Device for WgpuDevice {
    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn has_surface(&self) -> bool {
        self.surface.is_some()
    }

    fn is_shader_valid(&self, shader: ShaderHandle) -> bool {
        self.pipelines.contains_key(&shader)
    }

    fn create_buffer(&mut self, kind: BufferKind, size: u64) -> Option<BufferId> {
        let size = wgpu::util::align_to(size, wgpu::COPY_BUFFER_ALIGNMENT);
        if size == 0 || size > self.max_buffer_size {
            error!(
                "{} of {} bytes exceeds the device limit of {} bytes",
                kind.label(),
                size,
                self.max_buffer_size
            );
            return None;
        }

        let usage = match kind {
            BufferKind::Vertex => wgpu::BufferUsages::VERTEX,
            BufferKind::Index => wgpu::BufferUsages::INDEX,
            BufferKind::Uniform => wgpu::BufferUsages::UNIFORM,
        } | wgpu::BufferUsages::COPY_DST
            | wgpu::BufferUsages::COPY_SRC;

        #[cfg(not(target_arch = "wasm32"))]
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(kind.label()),
            size,
            usage,
            mapped_at_creation: false,
        });

        #[cfg(not(target_arch = "wasm32"))]
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            error!("Failed to allocate {} of {} bytes: {}", kind.label(), size, err);
            return None;
        }

        let id = BufferId::new(self.allocate_id());
        self.buffers.insert(
            id.index(),
            GpuBuffer {
                buffer,
                retired: false,
            },
        );
        Some(id)
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        match self.buffers.get_mut(&buffer.index()) {
            Some(entry) => entry.retired = true,
            None => error!("Destroying unknown buffer {:?}", buffer),
        }
        let mut invalidated = false;
        for range in &mut self.uniform_ranges {
            if range.is_some_and(|r| r.buffer == buffer) {
                *range = None;
                invalidated = true;
            }
        }
        if invalidated {
            self.uniform_group = None;
        }
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) {
        debug_assert!(
            offset % wgpu::COPY_BUFFER_ALIGNMENT == 0,
            "unaligned write at {offset}"
        );
        if data.is_empty() {
            return;
        }
        let (src_offset, size) = self.staging.push(data);
        self.commands.push(Command::Copy {
            src: CopySource::Staging(src_offset),
            dst: buffer,
            dst_offset: offset,
            size,
        });
    }

    fn copy_buffer(&mut self, src: BufferId, dst: BufferId, size: u64) {
        let size = wgpu::util::align_to(size, wgpu::COPY_BUFFER_ALIGNMENT);
        self.commands.push(Command::Copy {
            src: CopySource::Buffer(src),
            dst,
            dst_offset: 0,
            size,
        });
    }

    fn bind_buffer(&mut self, kind: BufferKind, buffer: BufferId) {
        self.commands.push(Command::BindBuffer(kind, buffer));
    }

    fn bind_uniform_range(&mut self, binding: u32, buffer: BufferId, offset: u64, size: u64) {
        let Some(slot) = self.uniform_ranges.get_mut(binding as usize) else {
            warn!(
                "Uniform binding {} is outside the {} exposed bindings",
                binding, UNIFORM_BINDINGS
            );
            return;
        };
        *slot = Some(UniformRange {
            buffer,
            offset,
            size,
        });
        self.uniform_group = None;
    }

    fn create_shadow_map(&mut self, size: u32) -> Option<ShadowMapId> {
        let max = self.device.limits().max_texture_dimension_2d;
        if size == 0 || size > max {
            error!("Shadow map size {} outside 1..={}", size, max);
            return None;
        }

        let id = ShadowMapId::new(self.allocate_id());
        let (face_views, cube_view) =
            create_cube_views(&self.device, &format!("ShadowCube{}", id.index()), size);
        self.shadow_maps.insert(
            id.index(),
            ShadowCube {
                face_views,
                cube_view,
                retired: false,
            },
        );
        Some(id)
    }

    fn destroy_shadow_map(&mut self, shadow_map: ShadowMapId) {
        match self.shadow_maps.get_mut(&shadow_map.index()) {
            Some(cube) => cube.retired = true,
            None => error!("Destroying unknown shadow map {:?}", shadow_map),
        }
    }

    fn bind_shader(&mut self, shader: ShaderHandle) {
        self.commands.push(Command::BindShader(shader));
    }

    fn bind_textures(&mut self, textures: &[TextureHandle]) {
        self.commands.push(Command::BindTextures(textures.to_vec()));
    }

    fn bind_shadow_maps(&mut self, shadow_maps: &[ShadowMapId]) {
        self.commands
            .push(Command::BindShadowMaps(shadow_maps.to_vec()));
    }

    fn begin_shadow_pass(&mut self, shadow_map: ShadowMapId, face: u32) {
        debug_assert!(face < CUBE_FACE_COUNT, "cube face {face} out of range");
        self.commands
            .push(Command::BeginPass(Target::Shadow { shadow_map, face }));
    }

    fn begin_color_pass(&mut self, clear_color: [f32; 4]) {
        self.commands
            .push(Command::BeginPass(Target::Color { clear_color }));
    }

    fn multi_draw_indexed(&mut self, draws: &[DrawRange]) {
        if !draws.is_empty() {
            self.commands.push(Command::Draw(draws.to_vec()));
        }
    }

    fn present(&mut self) {
        let frame = {
            let Some(state) = self.surface.as_ref() else {
                warn!("Present without a surface; frame dropped");
                self.discard_frame();
                return;
            };
            match state.surface.get_current_texture() {
                Ok(frame) => frame,
                Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                    warn!("Surface lost or outdated; reconfiguring");
                    state.surface.configure(&self.device, &state.config);
                    self.discard_frame();
                    return;
                }
                Err(err) => {
                    warn!("Failed to acquire surface texture: {}", err);
                    self.discard_frame();
                    return;
                }
            }
        };

        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        self.upload_staging();

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Encoder"),
            });
        self.replay(&mut encoder, &view);
        self.queue.submit(Some(encoder.finish()));
        frame.present();

        self.collect_retired();
    }
}

fn create_uniform_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    let entries: Vec<_> = (0..UNIFORM_BINDINGS)
        .map(|binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        })
        .collect();
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("UniformBlocksLayout"),
        entries: &entries,
    })
}

fn create_material_layout(device: &wgpu::Device, textures: u32) -> wgpu::BindGroupLayout {
    let mut entries: Vec<_> = (0..textures)
        .map(|binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        })
        .collect();
    entries.push(wgpu::BindGroupLayoutEntry {
        binding: textures,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    });
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("MaterialTexturesLayout"),
        entries: &entries,
    })
}

fn create_shadow_layout(device: &wgpu::Device, lights: u32) -> wgpu::BindGroupLayout {
    let mut entries: Vec<_> = (0..lights)
        .map(|binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Depth,
                view_dimension: wgpu::TextureViewDimension::Cube,
                multisampled: false,
            },
            count: None,
        })
        .collect();
    entries.push(wgpu::BindGroupLayoutEntry {
        binding: lights,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison),
        count: None,
    });
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("ShadowCubesLayout"),
        entries: &entries,
    })
}

/// A six layer depth texture with one view per face and a cube view over
/// all of them.
fn create_cube_views(
    device: &wgpu::Device,
    label: &str,
    size: u32,
) -> (Vec<wgpu::TextureView>, wgpu::TextureView) {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: size,
            height: size,
            depth_or_array_layers: CUBE_FACE_COUNT,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: SHADOW_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    });

    let face_views = (0..CUBE_FACE_COUNT)
        .map(|face| {
            texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some(&format!("{label}Face{face}")),
                format: Some(SHADOW_FORMAT),
                dimension: Some(wgpu::TextureViewDimension::D2),
                aspect: wgpu::TextureAspect::All,
                base_mip_level: 0,
                mip_level_count: None,
                base_array_layer: face,
                array_layer_count: Some(1),
                ..Default::default()
            })
        })
        .collect();

    let cube_view = texture.create_view(&wgpu::TextureViewDescriptor {
        label: Some(&format!("{label}CubeView")),
        format: Some(SHADOW_FORMAT),
        dimension: Some(wgpu::TextureViewDimension::Cube),
        aspect: wgpu::TextureAspect::All,
        base_mip_level: 0,
        mip_level_count: None,
        base_array_layer: 0,
        array_layer_count: Some(CUBE_FACE_COUNT),
        ..Default::default()
    });

    (face_views, cube_view)
}

fn create_white_texture(device: &wgpu::Device, queue: &wgpu::Queue) -> wgpu::TextureView {
    let size = wgpu::Extent3d {
        width: 1,
        height: 1,
        depth_or_array_layers: 1,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("FallbackWhite"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        &[255, 255, 255, 255],
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(4),
            rows_per_image: Some(1),
        },
        size,
    );
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_pads_every_write_to_copy_alignment() {
        let mut staging = FrameStaging::default();
        assert_eq!(staging.push(&[1, 2, 3]), (0, 4));
        assert_eq!(staging.push(&[4; 8]), (4, 8));
        assert_eq!(staging.len(), 12);
        assert_eq!(&staging.bytes[..4], &[1, 2, 3, 0]);

        staging.clear();
        assert_eq!(staging.push(&[9; 16]), (0, 16));
    }

    #[test]
    #[ignore] // Requires a GPU adapter
    fn headless_device_allocates_and_retires_buffers() {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let mut device =
            WgpuDevice::request_blocking(&instance, None, &EngineSettings::default())
                .expect("Failed to create device");

        assert!(!device.has_surface());
        assert!(device.limits().max_material_textures() > 0);

        let buffer = device.create_buffer(BufferKind::Vertex, 30).unwrap();
        device.write_buffer(buffer, 0, &[0u8; 30]);
        assert_eq!(device.live_buffers(), 1);

        device.destroy_buffer(buffer);
        assert_eq!(device.live_buffers(), 0);

        // Without a surface the recorded frame is dropped.
        device.present();
        assert!(device.commands.is_empty());
        assert!(device.buffers.is_empty());
    }
}
