//! A [`Device`] without a GPU.
//!
//! Buffers live in host memory and every call is recorded, so tests (and the
//! headless demo) can assert exactly what the core asked of the device.

use std::collections::{HashMap, HashSet};

use crate::renderer::device::{
    BufferId, BufferKind, Device, DeviceLimits, DrawRange, ShaderHandle, ShadowMapId,
    TextureHandle, CUBE_FACE_COUNT,
};

/// Records a device call for verification in tests.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    CreateBuffer {
        buffer: BufferId,
        kind: BufferKind,
        size: u64,
    },
    DestroyBuffer {
        buffer: BufferId,
    },
    WriteBuffer {
        buffer: BufferId,
        offset: u64,
        size: u64,
    },
    CopyBuffer {
        src: BufferId,
        dst: BufferId,
        size: u64,
    },
    BindBuffer {
        kind: BufferKind,
        buffer: BufferId,
    },
    BindUniformRange {
        binding: u32,
        buffer: BufferId,
        offset: u64,
        size: u64,
    },
    CreateShadowMap {
        shadow_map: ShadowMapId,
        size: u32,
    },
    DestroyShadowMap {
        shadow_map: ShadowMapId,
    },
    BindShader(ShaderHandle),
    BindTextures(Vec<TextureHandle>),
    BindShadowMaps(Vec<ShadowMapId>),
    BeginShadowPass {
        shadow_map: ShadowMapId,
        face: u32,
    },
    BeginColorPass {
        clear_color: [f32; 4],
    },
    MultiDraw(Vec<DrawRange>),
    Present,
}

#[derive(Debug)]
struct HeadlessBuffer {
    kind: BufferKind,
    data: Vec<u8>,
}

#[derive(Debug)]
pub struct HeadlessDevice {
    limits: DeviceLimits,
    surface: bool,
    fail_allocations: bool,
    next_id: u32,
    buffers: HashMap<u32, HeadlessBuffer>,
    shadow_maps: HashSet<u32>,
    shaders: HashSet<ShaderHandle>,
    calls: Vec<DeviceCall>,
    presented_frames: u64,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::with_limits(DeviceLimits::default())
    }

    pub fn with_limits(limits: DeviceLimits) -> Self {
        Self {
            limits,
            surface: true,
            fail_allocations: false,
            next_id: 1,
            buffers: HashMap::new(),
            shadow_maps: HashSet::new(),
            shaders: HashSet::new(),
            calls: Vec::new(),
            presented_frames: 0,
        }
    }

    /// Stands in for an externally compiled shader program.
    pub fn register_shader(&mut self) -> ShaderHandle {
        let shader = ShaderHandle::new(self.allocate_id());
        self.shaders.insert(shader);
        shader
    }

    pub fn set_surface(&mut self, available: bool) {
        self.surface = available;
    }

    /// Makes every following buffer and shadow map allocation fail.
    pub fn set_fail_allocations(&mut self, fail: bool) {
        self.fail_allocations = fail;
    }

    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn count_calls(&self, predicate: impl Fn(&DeviceCall) -> bool) -> usize {
        self.calls.iter().filter(|call| predicate(call)).count()
    }

    /// Every multi-draw issued so far, in order.
    pub fn multi_draws(&self) -> Vec<&[DrawRange]> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                DeviceCall::MultiDraw(draws) => Some(draws.as_slice()),
                _ => None,
            })
            .collect()
    }

    /// Full allocation of `buffer`, including bytes past the written size.
    pub fn buffer_contents(&self, buffer: BufferId) -> Option<&[u8]> {
        self.buffers
            .get(&buffer.index())
            .map(|buffer| buffer.data.as_slice())
    }

    pub fn buffer_kind(&self, buffer: BufferId) -> Option<BufferKind> {
        self.buffers.get(&buffer.index()).map(|buffer| buffer.kind)
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_shadow_maps(&self) -> usize {
        self.shadow_maps.len()
    }

    pub fn presented_frames(&self) -> u64 {
        self.presented_frames
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for HeadlessDevice {
    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn has_surface(&self) -> bool {
        self.surface
    }

    fn is_shader_valid(&self, shader: ShaderHandle) -> bool {
        self.shaders.contains(&shader)
    }

    fn create_buffer(&mut self, kind: BufferKind, size: u64) -> Option<BufferId> {
        if self.fail_allocations || size == 0 {
            return None;
        }
        let buffer = BufferId::new(self.allocate_id());
        self.buffers.insert(
            buffer.index(),
            HeadlessBuffer {
                kind,
                data: vec![0; size as usize],
            },
        );
        self.calls
            .push(DeviceCall::CreateBuffer { buffer, kind, size });
        Some(buffer)
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if self.buffers.remove(&buffer.index()).is_none() {
            log::error!("Destroying unknown buffer {:?}", buffer);
        }
        self.calls.push(DeviceCall::DestroyBuffer { buffer });
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) {
        let Some(target) = self.buffers.get_mut(&buffer.index()) else {
            log::error!("Write to unknown buffer {:?}", buffer);
            return;
        };
        let start = offset as usize;
        let end = start + data.len();
        if end > target.data.len() {
            log::error!(
                "Write of {} bytes at {} overruns buffer {:?} ({} bytes)",
                data.len(),
                offset,
                buffer,
                target.data.len()
            );
            return;
        }
        target.data[start..end].copy_from_slice(data);
        self.calls.push(DeviceCall::WriteBuffer {
            buffer,
            offset,
            size: data.len() as u64,
        });
    }

    fn copy_buffer(&mut self, src: BufferId, dst: BufferId, size: u64) {
        let Some(source) = self.buffers.get(&src.index()) else {
            log::error!("Copy from unknown buffer {:?}", src);
            return;
        };
        let len = (size as usize).min(source.data.len());
        let bytes = source.data[..len].to_vec();

        let Some(target) = self.buffers.get_mut(&dst.index()) else {
            log::error!("Copy to unknown buffer {:?}", dst);
            return;
        };
        let len = len.min(target.data.len());
        target.data[..len].copy_from_slice(&bytes[..len]);
        self.calls.push(DeviceCall::CopyBuffer { src, dst, size });
    }

    fn bind_buffer(&mut self, kind: BufferKind, buffer: BufferId) {
        self.calls.push(DeviceCall::BindBuffer { kind, buffer });
    }

    fn bind_uniform_range(&mut self, binding: u32, buffer: BufferId, offset: u64, size: u64) {
        self.calls.push(DeviceCall::BindUniformRange {
            binding,
            buffer,
            offset,
            size,
        });
    }

    fn create_shadow_map(&mut self, size: u32) -> Option<ShadowMapId> {
        if self.fail_allocations || size == 0 {
            return None;
        }
        let shadow_map = ShadowMapId::new(self.allocate_id());
        self.shadow_maps.insert(shadow_map.index());
        self.calls
            .push(DeviceCall::CreateShadowMap { shadow_map, size });
        Some(shadow_map)
    }

    fn destroy_shadow_map(&mut self, shadow_map: ShadowMapId) {
        self.shadow_maps.remove(&shadow_map.index());
        self.calls.push(DeviceCall::DestroyShadowMap { shadow_map });
    }

    fn bind_shader(&mut self, shader: ShaderHandle) {
        self.calls.push(DeviceCall::BindShader(shader));
    }

    fn bind_textures(&mut self, textures: &[TextureHandle]) {
        self.calls.push(DeviceCall::BindTextures(textures.to_vec()));
    }

    fn bind_shadow_maps(&mut self, shadow_maps: &[ShadowMapId]) {
        self.calls
            .push(DeviceCall::BindShadowMaps(shadow_maps.to_vec()));
    }

    fn begin_shadow_pass(&mut self, shadow_map: ShadowMapId, face: u32) {
        debug_assert!(face < CUBE_FACE_COUNT, "cube face {face} out of range");
        self.calls
            .push(DeviceCall::BeginShadowPass { shadow_map, face });
    }

    fn begin_color_pass(&mut self, clear_color: [f32; 4]) {
        self.calls.push(DeviceCall::BeginColorPass { clear_color });
    }

    fn multi_draw_indexed(&mut self, draws: &[DrawRange]) {
        self.calls.push(DeviceCall::MultiDraw(draws.to_vec()));
    }

    fn present(&mut self) {
        self.presented_frames += 1;
        self.calls.push(DeviceCall::Present);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_moves_leading_bytes() {
        let mut device = HeadlessDevice::new();
        let a = device.create_buffer(BufferKind::Vertex, 4).unwrap();
        let b = device.create_buffer(BufferKind::Vertex, 8).unwrap();
        device.write_buffer(a, 0, &[1, 2, 3, 4]);
        device.copy_buffer(a, b, 4);

        assert_eq!(device.buffer_contents(b), Some(&[1, 2, 3, 4, 0, 0, 0, 0][..]));
    }

    #[test]
    fn overrunning_write_is_dropped() {
        let mut device = HeadlessDevice::new();
        let a = device.create_buffer(BufferKind::Index, 4).unwrap();
        device.write_buffer(a, 2, &[1, 2, 3]);

        assert_eq!(device.buffer_contents(a), Some(&[0, 0, 0, 0][..]));
        assert_eq!(
            device.count_calls(|call| matches!(call, DeviceCall::WriteBuffer { .. })),
            0
        );
    }

    #[test]
    fn only_registered_shaders_are_valid() {
        let mut device = HeadlessDevice::new();
        let shader = device.register_shader();
        assert!(device.is_shader_valid(shader));
        assert!(!device.is_shader_valid(ShaderHandle::new(999)));
    }

    #[test]
    fn failing_allocations_return_none() {
        let mut device = HeadlessDevice::new();
        device.set_fail_allocations(true);
        assert!(device.create_buffer(BufferKind::Uniform, 16).is_none());
        assert!(device.create_shadow_map(256).is_none());
        assert_eq!(device.live_buffers(), 0);
    }
}
