//! MemForge - Graph Memory Planner
//!
//! Memory planning and allocation for computation-graph tensors: a
//! reference-counted graph walk with view-aware in-place reuse, best-fit
//! free-list layouts, chunked physical backing, and an incremental
//! replanning check for repeated executions.

pub mod alloc;
pub mod error;
pub mod graph;
pub mod logging;
pub mod planner;

pub use alloc::{
    AllocSnapshot, BufferConfig, ChunkAllocator, ChunkGrant, ChunkId, Epochs, GraphAllocator,
    HostChunkAllocator, NodeAlloc, ReallocAnalyzer, TensorAlloc,
};
pub use error::{ErrorCategory, ForgeResult, MemForgeError};
pub use graph::{GraphView, TensorDesc, TensorId, MAX_SOURCES};
pub use logging::{init_logging_default, init_with_config, LogFormat, LogLevel, LoggingConfig};
pub use planner::{
    BestFit, BlockSelect, BufferLayout, FreeBlock, PlanOutcome, PlanStats, Planner, MAX_BUFFERS,
    MAX_CHUNKS, MAX_FREE_BLOCKS, MAX_TENSORS,
};
