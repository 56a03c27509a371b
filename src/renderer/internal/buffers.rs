use crate::renderer::device::{BufferId, BufferKind, Device};
use crate::renderer::error::BufferError;
use crate::renderer::internal::RenderContext;

/// Capacity after an overflow: at least 1.5x the old capacity, and never
/// less than what is required.
pub(crate) fn grown_capacity(capacity: u64, required: u64) -> u64 {
    (capacity + capacity.div_ceil(2)).max(required)
}

/// A single growable device buffer.
///
/// Capacity only ever grows. Content lives on the device; `size` tracks how
/// many leading bytes of the allocation are meaningful.
pub struct BufferAllocator {
    kind: BufferKind,
    buffer: Option<BufferId>,
    capacity: u64,
    size: u64,
}

impl BufferAllocator {
    pub fn new(kind: BufferKind) -> Self {
        Self {
            kind,
            buffer: None,
            capacity: 0,
            size: 0,
        }
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn id(&self) -> Option<BufferId> {
        self.buffer
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_initialized(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn initialize<D: Device>(
        &mut self,
        ctx: &mut RenderContext<D>,
        initial_capacity: u64,
    ) -> Result<(), BufferError> {
        debug_assert!(
            self.buffer.is_none(),
            "{:?} buffer initialized twice",
            self.kind
        );
        if initial_capacity == 0 {
            return Err(BufferError::ZeroCapacity(self.kind));
        }

        let id = ctx
            .create_buffer(self.kind, initial_capacity)
            .ok_or(BufferError::Allocation {
                kind: self.kind,
                size: initial_capacity,
            })?;

        self.buffer = Some(id);
        self.capacity = initial_capacity;
        self.size = 0;
        Ok(())
    }

    /// Appends `data` after the current content, growing the allocation
    /// when it does not fit.
    pub fn append<D: Device>(
        &mut self,
        ctx: &mut RenderContext<D>,
        data: &[u8],
    ) -> Result<(), BufferError> {
        let id = self.require_initialized()?;
        if data.is_empty() {
            return Ok(());
        }

        let required = self.size + data.len() as u64;
        if required <= self.capacity {
            ctx.device_mut().write_buffer(id, self.size, data);
            self.size = required;
            return Ok(());
        }

        let new_capacity = grown_capacity(self.capacity, required);
        let new_id = self.reallocate(ctx, id, new_capacity, true)?;
        ctx.device_mut().write_buffer(new_id, self.size, data);
        self.size = required;
        Ok(())
    }

    /// Overwrites the whole content with `data`. Old content is discarded,
    /// so growth skips the copy.
    pub fn replace<D: Device>(
        &mut self,
        ctx: &mut RenderContext<D>,
        data: &[u8],
    ) -> Result<(), BufferError> {
        let mut id = self.require_initialized()?;

        let len = data.len() as u64;
        if len > self.capacity {
            let new_capacity = grown_capacity(self.capacity, len);
            id = self.reallocate(ctx, id, new_capacity, false)?;
        }

        if !data.is_empty() {
            ctx.device_mut().write_buffer(id, 0, data);
        }
        self.size = len;
        Ok(())
    }

    /// Partial update inside the current capacity. Never grows.
    pub fn write_at<D: Device>(
        &mut self,
        ctx: &mut RenderContext<D>,
        offset: u64,
        data: &[u8],
    ) -> Result<(), BufferError> {
        let id = self.require_initialized()?;

        let len = data.len() as u64;
        if offset + len > self.capacity {
            return Err(BufferError::OutOfBounds {
                kind: self.kind,
                offset,
                len,
                capacity: self.capacity,
            });
        }

        if !data.is_empty() {
            ctx.device_mut().write_buffer(id, offset, data);
        }
        self.size = self.size.max(offset + len);
        Ok(())
    }

    /// Binds through the context cache. Returns whether a device bind was
    /// actually issued.
    pub fn bind<D: Device>(&self, ctx: &mut RenderContext<D>) -> Result<bool, BufferError> {
        let id = self.require_initialized()?;
        Ok(ctx.bind_buffer(self.kind, id))
    }

    /// Releases the device buffer. Safe to call more than once.
    pub fn terminate<D: Device>(&mut self, ctx: &mut RenderContext<D>) {
        if let Some(id) = self.buffer.take() {
            ctx.destroy_buffer(self.kind, id);
        }
        self.capacity = 0;
        self.size = 0;
    }

    fn require_initialized(&self) -> Result<BufferId, BufferError> {
        debug_assert!(
            self.buffer.is_some(),
            "{:?} buffer used before initialization",
            self.kind
        );
        self.buffer.ok_or(BufferError::Uninitialized(self.kind))
    }

    /// Swaps in a larger allocation. On failure the old buffer is untouched.
    fn reallocate<D: Device>(
        &mut self,
        ctx: &mut RenderContext<D>,
        old: BufferId,
        new_capacity: u64,
        keep_content: bool,
    ) -> Result<BufferId, BufferError> {
        log::info!(
            "Growing {}: {} -> {} bytes",
            self.kind.label(),
            self.capacity,
            new_capacity
        );

        let new = ctx
            .create_buffer(self.kind, new_capacity)
            .ok_or(BufferError::Allocation {
                kind: self.kind,
                size: new_capacity,
            })?;

        if keep_content && self.size > 0 {
            ctx.device_mut().copy_buffer(old, new, self.size);
        }

        let was_bound = ctx.bound_buffer(self.kind) == Some(old);
        ctx.destroy_buffer(self.kind, old);
        if was_bound {
            ctx.bind_buffer(self.kind, new);
        }

        self.buffer = Some(new);
        self.capacity = new_capacity;
        Ok(new)
    }
}

impl Drop for BufferAllocator {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        if let Some(id) = self.buffer {
            log::error!(
                "{} {:?} dropped without terminate(); device buffer leaked",
                self.kind.label(),
                id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::headless::{DeviceCall, HeadlessDevice};

    fn context() -> RenderContext<HeadlessDevice> {
        RenderContext::new(HeadlessDevice::new())
    }

    fn contents(ctx: &RenderContext<HeadlessDevice>, buffer: &BufferAllocator) -> Vec<u8> {
        let id = buffer.id().unwrap();
        ctx.device().buffer_contents(id).unwrap()[..buffer.size() as usize].to_vec()
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let mut ctx = context();
        let mut buffer = BufferAllocator::new(BufferKind::Vertex);

        assert_eq!(
            buffer.initialize(&mut ctx, 0),
            Err(BufferError::ZeroCapacity(BufferKind::Vertex))
        );
        assert!(!buffer.is_initialized());
    }

    #[test]
    fn failed_allocation_leaves_allocator_uninitialized() {
        let mut ctx = context();
        ctx.device_mut().set_fail_allocations(true);
        let mut buffer = BufferAllocator::new(BufferKind::Index);

        assert!(matches!(
            buffer.initialize(&mut ctx, 128),
            Err(BufferError::Allocation { .. })
        ));
        assert!(!buffer.is_initialized());
        assert_eq!(buffer.capacity(), 0);
    }

    #[test]
    fn appends_concatenate_in_place() {
        let mut ctx = context();
        let mut buffer = BufferAllocator::new(BufferKind::Vertex);
        buffer.initialize(&mut ctx, 16).unwrap();

        buffer.append(&mut ctx, &[1, 2, 3, 4]).unwrap();
        buffer.append(&mut ctx, &[5, 6, 7, 8]).unwrap();

        assert_eq!(buffer.capacity(), 16);
        assert_eq!(contents(&ctx, &buffer), vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(ctx.device().live_buffers(), 1);
        buffer.terminate(&mut ctx);
    }

    #[test]
    fn overflowing_append_grows_and_keeps_content() {
        let mut ctx = context();
        let mut buffer = BufferAllocator::new(BufferKind::Vertex);
        buffer.initialize(&mut ctx, 8).unwrap();

        let a: Vec<u8> = (0..6).collect();
        let b: Vec<u8> = (100..104).collect();
        buffer.append(&mut ctx, &a).unwrap();
        buffer.append(&mut ctx, &b).unwrap();

        assert!(buffer.capacity() >= 12);
        assert_eq!(buffer.capacity(), 12);
        let mut expected = a.clone();
        expected.extend_from_slice(&b);
        assert_eq!(contents(&ctx, &buffer), expected);
        assert_eq!(ctx.device().live_buffers(), 1, "old allocation released");
        buffer.terminate(&mut ctx);
    }

    #[test]
    fn growth_is_at_least_one_and_a_half() {
        let mut ctx = context();
        let mut buffer = BufferAllocator::new(BufferKind::Index);
        buffer.initialize(&mut ctx, 100).unwrap();

        let mut previous = buffer.capacity();
        for _ in 0..20 {
            buffer.append(&mut ctx, &[7u8; 37]).unwrap();
            if buffer.capacity() != previous {
                assert!(buffer.capacity() * 2 >= previous * 3);
                previous = buffer.capacity();
            }
        }
        assert_eq!(buffer.size(), 20 * 37);
        assert!(contents(&ctx, &buffer).iter().all(|&b| b == 7));
        buffer.terminate(&mut ctx);
    }

    #[test]
    fn large_append_grows_to_exactly_what_is_needed() {
        assert_eq!(grown_capacity(10, 11), 15);
        assert_eq!(grown_capacity(10, 100), 100);
        assert_eq!(grown_capacity(1, 2), 2);
        assert_eq!(grown_capacity(3, 4), 5);
        assert_eq!(grown_capacity(225, 226), 338);
    }

    #[test]
    fn odd_capacity_rounds_growth_up() {
        let mut ctx = context();
        let mut buffer = BufferAllocator::new(BufferKind::Vertex);
        buffer.initialize(&mut ctx, 3).unwrap();
        buffer.append(&mut ctx, &[1, 2, 3]).unwrap();
        buffer.append(&mut ctx, &[4]).unwrap();

        assert_eq!(buffer.capacity(), 5);
        assert_eq!(contents(&ctx, &buffer), vec![1, 2, 3, 4]);
        buffer.terminate(&mut ctx);
    }

    #[test]
    fn replace_overwrites_and_grows_without_copy() {
        let mut ctx = context();
        let mut buffer = BufferAllocator::new(BufferKind::Index);
        buffer.initialize(&mut ctx, 4).unwrap();
        buffer.append(&mut ctx, &[9, 9, 9, 9]).unwrap();

        buffer.replace(&mut ctx, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();

        assert_eq!(buffer.capacity(), 8);
        assert_eq!(contents(&ctx, &buffer), vec![1, 2, 3, 4, 5, 6, 7, 8]);
        let copies = ctx
            .device()
            .count_calls(|call| matches!(call, DeviceCall::CopyBuffer { .. }));
        assert_eq!(copies, 0);

        buffer.replace(&mut ctx, &[4, 3]).unwrap();
        assert_eq!(buffer.capacity(), 8, "capacity never shrinks");
        assert_eq!(contents(&ctx, &buffer), vec![4, 3]);
        buffer.terminate(&mut ctx);
    }

    #[test]
    fn growth_rebinds_a_bound_buffer() {
        let mut ctx = context();
        let mut buffer = BufferAllocator::new(BufferKind::Vertex);
        buffer.initialize(&mut ctx, 4).unwrap();
        assert!(buffer.bind(&mut ctx).unwrap());
        assert!(!buffer.bind(&mut ctx).unwrap());

        buffer.append(&mut ctx, &[0u8; 32]).unwrap();

        assert_eq!(ctx.bound_buffer(BufferKind::Vertex), buffer.id());
        assert!(!buffer.bind(&mut ctx).unwrap());
        buffer.terminate(&mut ctx);
    }

    #[test]
    fn failed_growth_keeps_old_content() {
        let mut ctx = context();
        let mut buffer = BufferAllocator::new(BufferKind::Vertex);
        buffer.initialize(&mut ctx, 4).unwrap();
        buffer.append(&mut ctx, &[1, 2, 3, 4]).unwrap();

        ctx.device_mut().set_fail_allocations(true);
        assert!(buffer.append(&mut ctx, &[5]).is_err());

        assert_eq!(buffer.capacity(), 4);
        assert_eq!(contents(&ctx, &buffer), vec![1, 2, 3, 4]);
        buffer.terminate(&mut ctx);
    }

    #[test]
    fn write_at_never_grows() {
        let mut ctx = context();
        let mut buffer = BufferAllocator::new(BufferKind::Uniform);
        buffer.initialize(&mut ctx, 32).unwrap();

        buffer.write_at(&mut ctx, 16, &[1; 16]).unwrap();
        assert!(matches!(
            buffer.write_at(&mut ctx, 20, &[1; 16]),
            Err(BufferError::OutOfBounds { .. })
        ));
        assert_eq!(buffer.size(), 32);
        buffer.terminate(&mut ctx);
    }

    #[test]
    fn terminate_is_idempotent() {
        let mut ctx = context();
        let mut buffer = BufferAllocator::new(BufferKind::Uniform);
        buffer.initialize(&mut ctx, 64).unwrap();

        buffer.terminate(&mut ctx);
        buffer.terminate(&mut ctx);

        assert!(!buffer.is_initialized());
        assert_eq!(ctx.device().live_buffers(), 0);
        assert_eq!(ctx.tracker().live_count(), 0);
    }
}
