pub mod batch;
pub mod depth;
pub mod device;
pub mod error;
pub mod handle;
pub mod headless;
pub mod internal;
pub mod lights;
pub mod material;
pub mod mesh;
pub mod primitives;
pub mod renderer;
pub mod uniforms;
pub mod vertex;
pub mod wgpu_device;

pub use batch::{RenderBatch, MAX_MESHES};
pub use depth::Depth;
pub use device::{
    BufferId, BufferKind, Device, DeviceLimits, DrawRange, ShaderHandle, ShadowMapId,
    TextureHandle,
};
pub use error::{BufferError, DeviceError, EngineError, UniformError};
pub use handle::Handle;
pub use headless::{DeviceCall, HeadlessDevice};
pub use internal::{BatchId, Bucket, BufferAllocator, ShaderBucketMapper, UniformBlockRegistry};
pub use lights::PointLight;
pub use material::Material;
pub use mesh::Mesh;
pub use primitives::{cube_mesh, sphere_mesh};
pub use renderer::{DrawEngine, FrameState, FrameStats};
pub use uniforms::{CameraUniform, InstanceUniform};
pub use vertex::Vertex;
pub use wgpu_device::WgpuDevice;
