use crate::renderer::device::{BufferKind, Device};
use crate::renderer::error::UniformError;
use crate::renderer::internal::{BufferAllocator, RenderContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformBlock {
    pub binding: u32,
    pub offset: u64,
    pub size: u64,
}

impl UniformBlock {
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

pub(crate) fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

/// Binding-point addressed regions packed into one uniform buffer.
pub struct UniformBlockRegistry {
    buffer: BufferAllocator,
    alignment: u64,
    blocks: Vec<UniformBlock>,
}

impl UniformBlockRegistry {
    pub fn new() -> Self {
        Self {
            buffer: BufferAllocator::new(BufferKind::Uniform),
            alignment: 0,
            blocks: Vec::new(),
        }
    }

    /// Allocates the backing buffer at the device's maximum block size.
    pub fn generate<D: Device>(&mut self, ctx: &mut RenderContext<D>) -> Result<(), UniformError> {
        let limits = ctx.limits();
        self.buffer.initialize(ctx, limits.max_uniform_block_size)?;
        self.alignment = limits.uniform_alignment();
        log::info!(
            "Uniform block registry: {} bytes, block alignment {}",
            limits.max_uniform_block_size,
            self.alignment
        );
        Ok(())
    }

    pub fn is_generated(&self) -> bool {
        self.buffer.is_initialized()
    }

    pub fn capacity(&self) -> u64 {
        self.buffer.capacity()
    }

    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    pub fn blocks(&self) -> &[UniformBlock] {
        &self.blocks
    }

    pub fn block(&self, binding: u32) -> Option<&UniformBlock> {
        self.blocks.iter().find(|block| block.binding == binding)
    }

    /// Places a block right after the previous one (aligned) and binds the
    /// sub-range to `binding`. Returns the block offset.
    pub fn add_block<D: Device>(
        &mut self,
        ctx: &mut RenderContext<D>,
        binding: u32,
        size: u64,
    ) -> Result<u64, UniformError> {
        let Some(buffer) = self.buffer.id() else {
            return Err(UniformError::NotGenerated);
        };
        if size == 0 {
            return Err(UniformError::ZeroSize(binding));
        }
        if self.block(binding).is_some() {
            return Err(UniformError::DuplicateBinding(binding));
        }

        let offset = self
            .blocks
            .last()
            .map_or(0, |prev| align_up(prev.end(), self.alignment));
        if offset + size > self.buffer.capacity() {
            return Err(UniformError::OutOfSpace {
                binding,
                offset,
                size,
                capacity: self.buffer.capacity(),
            });
        }

        ctx.device_mut()
            .bind_uniform_range(binding, buffer, offset, size);
        self.blocks.push(UniformBlock {
            binding,
            offset,
            size,
        });
        log::debug!(
            "Uniform block {} at offset {} ({} bytes)",
            binding,
            offset,
            size
        );
        Ok(offset)
    }

    /// Updates the block at `binding`. Unknown bindings are a logged no-op
    /// and return `false`.
    pub fn send_data<D: Device>(
        &mut self,
        ctx: &mut RenderContext<D>,
        binding: u32,
        data: &[u8],
    ) -> bool {
        let Some(block) = self.block(binding).copied() else {
            log::warn!("No uniform block registered at binding {}", binding);
            return false;
        };

        let mut data = data;
        if data.len() as u64 > block.size {
            log::warn!(
                "Uniform data for binding {} truncated: {} > {} bytes",
                binding,
                data.len(),
                block.size
            );
            data = &data[..block.size as usize];
        }

        match self.buffer.write_at(ctx, block.offset, data) {
            Ok(()) => true,
            Err(err) => {
                log::error!("Uniform upload to binding {} failed: {}", binding, err);
                false
            }
        }
    }

    pub fn terminate<D: Device>(&mut self, ctx: &mut RenderContext<D>) {
        self.buffer.terminate(ctx);
        self.blocks.clear();
    }
}

impl Default for UniformBlockRegistry {
    fn default() -> Self {
        Self::new()
    }
}
