use crate::renderer::device::{BufferId, BufferKind, Device, DeviceLimits, ShadowMapId};
use crate::renderer::internal::tracker::{ResourceKind, ResourceTracker};

/// Owns the device together with the state every component shares: the
/// per-kind bound-buffer cache and the leak tracker.
pub struct RenderContext<D: Device> {
    device: D,
    limits: DeviceLimits,
    bound: [Option<BufferId>; BufferKind::COUNT],
    tracker: ResourceTracker,
}

impl<D: Device> RenderContext<D> {
    pub fn new(device: D) -> Self {
        let limits = device.limits();
        log::info!(
            "Device limits: {} texture units ({} material, {} shadow), {} byte uniform blocks aligned to {}",
            limits.max_texture_units,
            limits.max_material_textures(),
            limits.max_shadow_lights,
            limits.max_uniform_block_size,
            limits.uniform_alignment()
        );

        Self {
            device,
            limits,
            bound: [None; BufferKind::COUNT],
            tracker: ResourceTracker::new(),
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn limits(&self) -> DeviceLimits {
        self.limits
    }

    pub fn tracker(&self) -> &ResourceTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut ResourceTracker {
        &mut self.tracker
    }

    pub fn create_buffer(&mut self, kind: BufferKind, size: u64) -> Option<BufferId> {
        let id = self.device.create_buffer(kind, size)?;
        self.tracker.track(ResourceKind::Buffer, id.index());
        Some(id)
    }

    pub fn destroy_buffer(&mut self, kind: BufferKind, id: BufferId) {
        if self.bound[kind.slot()] == Some(id) {
            self.bound[kind.slot()] = None;
        }
        self.device.destroy_buffer(id);
        self.tracker.release(ResourceKind::Buffer, id.index());
    }

    /// Binds `id` unless it is already the bound buffer of its kind.
    /// Returns whether a device bind was issued.
    pub fn bind_buffer(&mut self, kind: BufferKind, id: BufferId) -> bool {
        if self.bound[kind.slot()] == Some(id) {
            return false;
        }
        self.device.bind_buffer(kind, id);
        self.bound[kind.slot()] = Some(id);
        true
    }

    pub fn bound_buffer(&self, kind: BufferKind) -> Option<BufferId> {
        self.bound[kind.slot()]
    }

    pub fn create_shadow_map(&mut self, size: u32) -> Option<ShadowMapId> {
        let id = self.device.create_shadow_map(size)?;
        self.tracker.track(ResourceKind::Texture, id.index());
        Some(id)
    }

    pub fn destroy_shadow_map(&mut self, id: ShadowMapId) {
        self.device.destroy_shadow_map(id);
        self.tracker.release(ResourceKind::Texture, id.index());
    }
}
