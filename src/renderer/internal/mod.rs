pub mod buckets;
pub mod buffers;
pub mod context;
pub mod tracker;
pub mod uniform_blocks;

pub use buckets::{BatchId, Bucket, ShaderBucketMapper};
pub use buffers::BufferAllocator;
pub use context::RenderContext;
pub use tracker::{ResourceKind, ResourceTracker};
pub use uniform_blocks::{UniformBlock, UniformBlockRegistry};
