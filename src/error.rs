//! Unified error handling for MemForge
//!
//! This module provides a centralized error type for the graph memory
//! planner. Every operation returns a status from a small closed taxonomy:
//! - Invalid-argument errors (malformed graphs, bad buffer configuration,
//!   capacity overruns) abort before any caller-visible mutation
//! - Backend errors (chunk allocator failures, internal invariant
//!   violations such as arithmetic overflow) trigger best-effort rollback
//!   of the current call only

use std::fmt;

// Re-export thiserror for convenience
pub use thiserror;

/// Unified error type for MemForge
///
/// This enum consolidates planner, orchestrator and chunk-backend errors
/// into a single type used throughout the crate. It supports
/// categorization via the `category()` method.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MemForgeError {
    // ========== Invalid-Argument Errors ==========
    /// Buffer count outside the supported range
    #[error("invalid buffer count: {count} (supported range 1..={max})")]
    InvalidBufferCount { count: usize, max: usize },

    /// Buffer id references a buffer that does not exist
    #[error("invalid buffer id: {buffer_id} (buffer count {buffer_count})")]
    InvalidBufferId {
        buffer_id: usize,
        buffer_count: usize,
    },

    /// Alignment is not a power of two
    #[error("invalid alignment: {0} (must be a power of two)")]
    InvalidAlignment(usize),

    /// Max chunk size is smaller than or not a multiple of the alignment
    #[error("invalid max chunk size: {max_chunk_size} for alignment {alignment}")]
    InvalidMaxChunkSize {
        max_chunk_size: usize,
        alignment: usize,
    },

    /// Buffer assignment array does not match the graph shape
    #[error("buffer assignment mismatch: {expected} tensors, {actual} assignments")]
    AssignmentMismatch { expected: usize, actual: usize },

    /// The same tensor id was registered twice in one graph
    #[error("duplicate tensor id: {0}")]
    DuplicateTensorId(usize),

    /// A node references a source tensor that is not in the graph
    #[error("missing source tensor: {0}")]
    MissingSource(usize),

    /// A view tensor has no resolvable view source
    #[error("missing view source for tensor: {0}")]
    MissingViewSource(usize),

    /// Graph exceeds the tensor-record capacity
    #[error("tensor capacity exceeded: {count} tensors, capacity {max}")]
    TensorCapacityExceeded { count: usize, max: usize },

    /// A node carries more sources than the descriptor supports
    #[error("source capacity exceeded: {count} sources, capacity {max}")]
    SourceCapacityExceeded { count: usize, max: usize },

    /// Free-block list of a buffer layout is full
    #[error("free block capacity exceeded on buffer {buffer_id}")]
    FreeBlockCapacityExceeded { buffer_id: usize },

    /// Splitting a buffer requirement needs more chunks than supported
    #[error(
        "chunk capacity exceeded on buffer {buffer_id}: {required} bytes need more than {max} chunks"
    )]
    ChunkCapacityExceeded {
        buffer_id: usize,
        required: usize,
        max: usize,
    },

    /// Operation issued before `initialize`
    #[error("allocator not initialized")]
    NotInitialized,

    /// `alloc_graph` would have to grow more than one buffer
    #[error("automatic growth unsupported for {buffers} buffers (use reserve_n)")]
    MultiBufferGrowth { buffers: usize },

    // ========== Backend Errors ==========
    /// Chunk allocator operation failed
    #[error("chunk backend error: {0}")]
    ChunkBackend(String),

    /// Offset or size computation overflowed
    #[error("arithmetic overflow: {0}")]
    ArithmeticOverflow(&'static str),

    /// Internal free/alloc bookkeeping mismatch (indicates a bug)
    #[error("allocation mismatch: {0}")]
    AllocationMismatch(String),
}

impl MemForgeError {
    /// Categorize the error for handling decisions
    ///
    /// Invalid-argument errors are actionable by the caller (fix the graph
    /// or the buffer configuration and re-issue the call). Backend errors
    /// indicate a chunk-allocator failure or an internal invariant
    /// violation.
    pub fn category(&self) -> ErrorCategory {
        match self {
            MemForgeError::InvalidBufferCount { .. }
            | MemForgeError::InvalidBufferId { .. }
            | MemForgeError::InvalidAlignment(_)
            | MemForgeError::InvalidMaxChunkSize { .. }
            | MemForgeError::AssignmentMismatch { .. }
            | MemForgeError::DuplicateTensorId(_)
            | MemForgeError::MissingSource(_)
            | MemForgeError::MissingViewSource(_)
            | MemForgeError::TensorCapacityExceeded { .. }
            | MemForgeError::SourceCapacityExceeded { .. }
            | MemForgeError::FreeBlockCapacityExceeded { .. }
            | MemForgeError::ChunkCapacityExceeded { .. }
            | MemForgeError::NotInitialized
            | MemForgeError::MultiBufferGrowth { .. } => ErrorCategory::InvalidArgument,

            MemForgeError::ChunkBackend(_)
            | MemForgeError::ArithmeticOverflow(_)
            | MemForgeError::AllocationMismatch(_) => ErrorCategory::Backend,
        }
    }

    /// Check if this is an invalid-argument error (actionable by callers)
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self.category(), ErrorCategory::InvalidArgument)
    }

    /// Check if this is a backend error (chunk allocator or internal bug)
    pub fn is_backend(&self) -> bool {
        matches!(self.category(), ErrorCategory::Backend)
    }
}

/// Error category for handling decisions
///
/// - InvalidArgument: the call was malformed; fix the input and retry
/// - Backend: the chunk allocator failed or an internal invariant broke
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed graph, configuration, or capacity overrun
    InvalidArgument,
    /// Chunk allocator failure or internal invariant violation
    Backend,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::InvalidArgument => write!(f, "InvalidArgument"),
            ErrorCategory::Backend => write!(f, "Backend"),
        }
    }
}

/// Helper type alias for Results using MemForgeError
pub type ForgeResult<T> = std::result::Result<T, MemForgeError>;

/// Create a backend error from any chunk-allocator failure message
pub fn chunk_backend_err(msg: impl Into<String>) -> MemForgeError {
    MemForgeError::ChunkBackend(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(
            MemForgeError::InvalidAlignment(3).category(),
            ErrorCategory::InvalidArgument
        );
        assert_eq!(
            MemForgeError::DuplicateTensorId(7).category(),
            ErrorCategory::InvalidArgument
        );
        assert_eq!(
            MemForgeError::NotInitialized.category(),
            ErrorCategory::InvalidArgument
        );
        assert_eq!(
            MemForgeError::ChunkBackend("oom".to_string()).category(),
            ErrorCategory::Backend
        );
        assert_eq!(
            MemForgeError::ArithmeticOverflow("offset").category(),
            ErrorCategory::Backend
        );
    }

    #[test]
    fn test_category_helpers() {
        assert!(MemForgeError::MissingSource(1).is_invalid_argument());
        assert!(!MemForgeError::MissingSource(1).is_backend());
        assert!(MemForgeError::AllocationMismatch("double free".to_string()).is_backend());
    }

    #[test]
    fn test_error_display() {
        let err = MemForgeError::InvalidBufferCount { count: 0, max: 16 };
        assert_eq!(
            err.to_string(),
            "invalid buffer count: 0 (supported range 1..=16)"
        );

        let err = MemForgeError::MultiBufferGrowth { buffers: 3 };
        assert!(err.to_string().contains("reserve_n"));
    }

    #[test]
    fn test_error_category_display() {
        assert_eq!(ErrorCategory::InvalidArgument.to_string(), "InvalidArgument");
        assert_eq!(ErrorCategory::Backend.to_string(), "Backend");
    }

    #[test]
    fn test_chunk_backend_helper() {
        let err = chunk_backend_err("allocation refused");
        assert!(matches!(err, MemForgeError::ChunkBackend(_)));
        assert!(err.is_backend());
    }
}
