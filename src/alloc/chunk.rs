//! Chunk allocator seam and the default host-memory implementation.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::error::{chunk_backend_err, ForgeResult};

/// Identifier of one physical chunk handed out by a [`ChunkAllocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkId(pub u64);

/// One granted chunk: which chunk and where inside it the range starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkGrant {
    pub chunk_id: ChunkId,
    pub offset: usize,
    pub size: usize,
}

/// Backend that provides physical chunks for committed buffers.
///
/// Implementations map each `allocate` to exactly one chunk; the caller
/// splits oversized requirements before asking. All failures surface as
/// backend-class errors and the caller rolls back its own partial state.
pub trait ChunkAllocator {
    /// Drop every outstanding chunk and clear backend state.
    fn reset(&mut self) -> ForgeResult<()>;

    /// Announce the alignment and chunk-size limit of upcoming requests.
    fn configure(&mut self, alignment: usize, max_chunk_size: usize) -> ForgeResult<()>;

    /// Grant one chunk of at least `size` bytes at `alignment`.
    fn allocate(
        &mut self,
        size: usize,
        alignment: usize,
        max_chunk_size: usize,
    ) -> ForgeResult<ChunkGrant>;

    /// Return a previously granted range.
    fn release(
        &mut self,
        chunk_id: ChunkId,
        offset: usize,
        size: usize,
        alignment: usize,
    ) -> ForgeResult<()>;
}

/// Default in-process chunk allocator backing grants with host memory.
///
/// Each grant gets its own zero-filled region keyed by chunk id, so
/// double releases and unknown ids are detectable.
#[derive(Debug, Default)]
pub struct HostChunkAllocator {
    chunks: HashMap<ChunkId, Vec<u8>>,
    next_id: u64,
}

impl HostChunkAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn total_bytes(&self) -> usize {
        self.chunks.values().map(|region| region.len()).sum()
    }
}

impl ChunkAllocator for HostChunkAllocator {
    fn reset(&mut self) -> ForgeResult<()> {
        let dropped = self.chunks.len();
        self.chunks.clear();
        if dropped > 0 {
            debug!(dropped, "host chunk allocator reset");
        }
        Ok(())
    }

    fn configure(&mut self, alignment: usize, max_chunk_size: usize) -> ForgeResult<()> {
        if !alignment.is_power_of_two() {
            return Err(chunk_backend_err(format!(
                "unsupported alignment {alignment}"
            )));
        }
        trace!(alignment, max_chunk_size, "host chunk allocator configured");
        Ok(())
    }

    fn allocate(
        &mut self,
        size: usize,
        alignment: usize,
        max_chunk_size: usize,
    ) -> ForgeResult<ChunkGrant> {
        if size == 0 {
            return Err(chunk_backend_err("zero-size chunk request"));
        }
        if size > max_chunk_size {
            return Err(chunk_backend_err(format!(
                "chunk request {size} exceeds limit {max_chunk_size}"
            )));
        }
        let chunk_id = ChunkId(self.next_id);
        self.next_id += 1;
        self.chunks.insert(chunk_id, vec![0u8; size]);
        trace!(chunk = chunk_id.0, size, alignment, "host chunk granted");
        Ok(ChunkGrant {
            chunk_id,
            offset: 0,
            size,
        })
    }

    fn release(
        &mut self,
        chunk_id: ChunkId,
        _offset: usize,
        size: usize,
        _alignment: usize,
    ) -> ForgeResult<()> {
        match self.chunks.remove(&chunk_id) {
            Some(region) if region.len() == size => {
                trace!(chunk = chunk_id.0, size, "host chunk released");
                Ok(())
            }
            Some(region) => Err(chunk_backend_err(format!(
                "release size mismatch on chunk {}: granted {}, released {}",
                chunk_id.0,
                region.len(),
                size
            ))),
            None => Err(chunk_backend_err(format!(
                "release of unknown chunk {}",
                chunk_id.0
            ))),
        }
    }
}
