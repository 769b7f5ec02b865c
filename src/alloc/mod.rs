//! Committed allocation: chunk backend, snapshots, realloc analysis, and
//! the graph allocator orchestrating them across repeated executions.

pub mod chunk;
pub mod config;
pub mod orchestrator;
pub mod realloc;
pub mod snapshot;

pub use chunk::{ChunkAllocator, ChunkGrant, ChunkId, HostChunkAllocator};
pub use config::{BufferConfig, DEFAULT_ALIGNMENT, UNBOUNDED_CHUNK_SIZE};
pub use orchestrator::{Epochs, GraphAllocator};
pub use realloc::ReallocAnalyzer;
pub use snapshot::{AllocSnapshot, NodeAlloc, TensorAlloc};
