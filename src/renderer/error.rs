use thiserror::Error;

use crate::renderer::device::{BufferKind, ShaderHandle};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error("{0:?} buffer needs a non-zero initial capacity")]
    ZeroCapacity(BufferKind),
    #[error("failed to allocate {size} bytes for {kind:?} buffer")]
    Allocation { kind: BufferKind, size: u64 },
    #[error("{0:?} buffer used before initialization")]
    Uninitialized(BufferKind),
    #[error("write of {len} bytes at offset {offset} exceeds {kind:?} buffer capacity {capacity}")]
    OutOfBounds {
        kind: BufferKind,
        offset: u64,
        len: u64,
        capacity: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UniformError {
    #[error("uniform block registry used before generate()")]
    NotGenerated,
    #[error("uniform block at binding {0} has zero size")]
    ZeroSize(u32),
    #[error("binding point {0} already has a uniform block")]
    DuplicateBinding(u32),
    #[error("uniform block at binding {binding} ({size} bytes at offset {offset}) exceeds uniform buffer of {capacity} bytes")]
    OutOfSpace {
        binding: u32,
        offset: u64,
        size: u64,
        capacity: u64,
    },
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("shadow shader {0:?} is not a valid compiled shader")]
    InvalidShadowShader(ShaderHandle),
    #[error("failed to create shadow map for light {light}")]
    ShadowMap { light: u32 },
    #[error("failed to upload uniform block {0}")]
    UniformUpload(u32),
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    Uniform(#[from] UniformError),
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no compatible adapter: {0}")]
    Adapter(#[from] wgpu::RequestAdapterError),
    #[error("failed to create device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
    #[error("surface reports no supported formats")]
    UnsupportedSurface,
}
