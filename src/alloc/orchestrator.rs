//! Lifecycle orchestration over committed buffers and physical chunks.

use tracing::{debug, info};

use crate::alloc::chunk::{ChunkAllocator, ChunkId, HostChunkAllocator};
use crate::alloc::config::{BufferConfig, DEFAULT_ALIGNMENT};
use crate::alloc::realloc::ReallocAnalyzer;
use crate::alloc::snapshot::AllocSnapshot;
use crate::error::{ForgeResult, MemForgeError};
use crate::graph::GraphView;
use crate::planner::planner::split_chunks;
use crate::planner::{Planner, MAX_BUFFERS};

/// Monotonic per-operation counters, observability only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Epochs {
    pub init: u64,
    pub reserve: u64,
    pub alloc: u64,
    pub release: u64,
}

/// One chunk backing part of a committed buffer.
#[derive(Debug, Clone, Copy)]
struct ChunkBinding {
    chunk_id: ChunkId,
    offset: usize,
    size: usize,
}

/// Committed state of one logical buffer.
#[derive(Debug)]
struct BufferState {
    config: BufferConfig,
    /// Grow-only committed byte size
    committed_size: usize,
    bindings: Vec<ChunkBinding>,
}

impl BufferState {
    fn new(config: BufferConfig) -> Self {
        Self {
            config,
            committed_size: 0,
            bindings: Vec::new(),
        }
    }

    fn bound_bytes(&self) -> usize {
        self.bindings.iter().map(|binding| binding.size).sum()
    }
}

/// Sequences initialize, reserve, allocate and release across repeated
/// graph executions.
///
/// Owns the committed buffer state, the captured plan snapshot, and the
/// chunk backend. Every public operation records its failure (readable via
/// [`GraphAllocator::last_error`]) and bumps its epoch counter on success.
pub struct GraphAllocator {
    backend: Box<dyn ChunkAllocator>,
    planner: Planner,
    buffers: Vec<BufferState>,
    snapshot: Option<AllocSnapshot>,
    node_buffer_ids: Vec<usize>,
    leaf_buffer_ids: Vec<usize>,
    epochs: Epochs,
    last_error: Option<MemForgeError>,
}

impl Default for GraphAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphAllocator {
    /// Allocator backed by the in-process [`HostChunkAllocator`].
    pub fn new() -> Self {
        Self::with_backend(Box::new(HostChunkAllocator::new()))
    }

    pub fn with_backend(backend: Box<dyn ChunkAllocator>) -> Self {
        Self {
            backend,
            planner: Planner::new(),
            buffers: Vec::new(),
            snapshot: None,
            node_buffer_ids: Vec::new(),
            leaf_buffer_ids: Vec::new(),
            epochs: Epochs::default(),
            last_error: None,
        }
    }

    /// Wipe committed state and configure `buffer_count` buffers.
    ///
    /// Missing alignment or max-size entries fall back to the defaults;
    /// invalid values are sanitized the way [`BufferConfig::sanitized`]
    /// does.
    pub fn initialize(
        &mut self,
        buffer_count: usize,
        alignments: Option<&[usize]>,
        max_sizes: Option<&[usize]>,
    ) -> ForgeResult<()> {
        let result = self.initialize_inner(buffer_count, alignments, max_sizes);
        self.record(result)
    }

    /// Dry run: per-buffer size requirements, no chunk traffic.
    pub fn reserve_n_size(
        &mut self,
        graph: &GraphView,
        node_buffer_ids: &[usize],
        leaf_buffer_ids: &[usize],
    ) -> ForgeResult<Vec<usize>> {
        let result = self.reserve_n_size_inner(graph, node_buffer_ids, leaf_buffer_ids);
        self.record(result)
    }

    /// Plan and commit buffers for `graph` under an explicit assignment.
    pub fn reserve_n(
        &mut self,
        graph: &GraphView,
        node_buffer_ids: &[usize],
        leaf_buffer_ids: &[usize],
    ) -> ForgeResult<()> {
        let result = self.reserve_n_inner(graph, node_buffer_ids, leaf_buffer_ids);
        self.record(result)
    }

    /// Single-buffer convenience: every tensor goes to buffer 0.
    pub fn reserve(&mut self, graph: &GraphView) -> ForgeResult<()> {
        let node_buffer_ids = vec![0; graph.node_count()];
        let leaf_buffer_ids = vec![0; graph.leaf_count()];
        let result = self.reserve_n_inner(graph, &node_buffer_ids, &leaf_buffer_ids);
        self.record(result)
    }

    /// Steady-state allocation: reuse the committed plan when it still
    /// fits, otherwise re-plan and grow at most one buffer.
    pub fn alloc_graph(&mut self, graph: &GraphView) -> ForgeResult<()> {
        let result = self.alloc_graph_inner(graph);
        self.record(result)
    }

    /// Drop every binding and return to the just-initialized state.
    pub fn release(&mut self) -> ForgeResult<()> {
        let result = self.release_inner();
        self.record(result)
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Committed byte size of one buffer.
    pub fn buffer_size(&self, buffer_id: usize) -> ForgeResult<usize> {
        Ok(self.check_buffer(buffer_id)?.committed_size)
    }

    pub fn first_chunk_id(&self, buffer_id: usize) -> ForgeResult<Option<ChunkId>> {
        Ok(self
            .check_buffer(buffer_id)?
            .bindings
            .first()
            .map(|binding| binding.chunk_id))
    }

    pub fn first_chunk_offset(&self, buffer_id: usize) -> ForgeResult<Option<usize>> {
        Ok(self
            .check_buffer(buffer_id)?
            .bindings
            .first()
            .map(|binding| binding.offset))
    }

    /// Sum of committed sizes across all buffers.
    pub fn total_allocated(&self) -> usize {
        self.buffers.iter().map(|buffer| buffer.committed_size).sum()
    }

    pub fn epochs(&self) -> Epochs {
        self.epochs
    }

    /// Error recorded by the most recent failed operation, if any.
    pub fn last_error(&self) -> Option<&MemForgeError> {
        self.last_error.as_ref()
    }

    fn record<T>(&mut self, result: ForgeResult<T>) -> ForgeResult<T> {
        match &result {
            Ok(_) => self.last_error = None,
            Err(err) => self.last_error = Some(err.clone()),
        }
        result
    }

    fn ensure_initialized(&self) -> ForgeResult<()> {
        if self.buffers.is_empty() {
            return Err(MemForgeError::NotInitialized);
        }
        Ok(())
    }

    fn check_buffer(&self, buffer_id: usize) -> ForgeResult<&BufferState> {
        self.buffers
            .get(buffer_id)
            .ok_or(MemForgeError::InvalidBufferId {
                buffer_id,
                buffer_count: self.buffers.len(),
            })
    }

    fn configs(&self) -> Vec<BufferConfig> {
        self.buffers.iter().map(|buffer| buffer.config).collect()
    }

    fn initialize_inner(
        &mut self,
        buffer_count: usize,
        alignments: Option<&[usize]>,
        max_sizes: Option<&[usize]>,
    ) -> ForgeResult<()> {
        if buffer_count == 0 || buffer_count > MAX_BUFFERS {
            return Err(MemForgeError::InvalidBufferCount {
                count: buffer_count,
                max: MAX_BUFFERS,
            });
        }
        self.backend.reset()?;
        let mut buffers = Vec::with_capacity(buffer_count);
        for i in 0..buffer_count {
            let alignment = alignments
                .and_then(|a| a.get(i).copied())
                .unwrap_or(DEFAULT_ALIGNMENT);
            let max_size = max_sizes.and_then(|m| m.get(i).copied()).unwrap_or(0);
            let config = BufferConfig::sanitized(alignment, max_size);
            self.backend
                .configure(config.alignment, config.max_chunk_size)?;
            buffers.push(BufferState::new(config));
        }
        self.buffers = buffers;
        self.snapshot = None;
        self.node_buffer_ids.clear();
        self.leaf_buffer_ids.clear();
        self.epochs = Epochs {
            init: 1,
            ..Epochs::default()
        };
        info!(buffer_count, "graph allocator initialized");
        Ok(())
    }

    fn reserve_n_size_inner(
        &mut self,
        graph: &GraphView,
        node_buffer_ids: &[usize],
        leaf_buffer_ids: &[usize],
    ) -> ForgeResult<Vec<usize>> {
        self.ensure_initialized()?;
        let configs = self.configs();
        let outcome = self
            .planner
            .plan(graph, node_buffer_ids, leaf_buffer_ids, &configs, true)?;
        self.snapshot = Some(AllocSnapshot::capture(
            graph,
            node_buffer_ids,
            leaf_buffer_ids,
            &configs,
        )?);
        self.node_buffer_ids = node_buffer_ids.to_vec();
        self.leaf_buffer_ids = leaf_buffer_ids.to_vec();
        self.epochs.reserve += 1;
        debug!(sizes = ?outcome.buffer_sizes, "size-only reserve");
        Ok(outcome.buffer_sizes)
    }

    fn reserve_n_inner(
        &mut self,
        graph: &GraphView,
        node_buffer_ids: &[usize],
        leaf_buffer_ids: &[usize],
    ) -> ForgeResult<()> {
        self.ensure_initialized()?;
        let configs = self.configs();
        let outcome = self
            .planner
            .plan(graph, node_buffer_ids, leaf_buffer_ids, &configs, false)?;
        let splits = outcome.chunk_splits.ok_or_else(|| {
            MemForgeError::AllocationMismatch("full plan produced no chunk splits".to_string())
        })?;
        self.snapshot = Some(AllocSnapshot::capture(
            graph,
            node_buffer_ids,
            leaf_buffer_ids,
            &configs,
        )?);
        self.node_buffer_ids = node_buffer_ids.to_vec();
        self.leaf_buffer_ids = leaf_buffer_ids.to_vec();
        for buffer_id in 0..self.buffers.len() {
            self.reconcile_buffer(buffer_id, outcome.buffer_sizes[buffer_id], &splits[buffer_id])?;
        }
        self.epochs.reserve += 1;
        info!(
            total = self.total_allocated(),
            stats = %outcome.stats,
            "graph reserved"
        );
        Ok(())
    }

    fn alloc_graph_inner(&mut self, graph: &GraphView) -> ForgeResult<()> {
        self.ensure_initialized()?;
        let buffer_count = self.buffers.len();
        let (node_buffer_ids, leaf_buffer_ids) = if self.node_buffer_ids.len()
            == graph.node_count()
            && self.leaf_buffer_ids.len() == graph.leaf_count()
        {
            (self.node_buffer_ids.clone(), self.leaf_buffer_ids.clone())
        } else if buffer_count == 1 {
            (vec![0; graph.node_count()], vec![0; graph.leaf_count()])
        } else {
            return Err(MemForgeError::MultiBufferGrowth {
                buffers: buffer_count,
            });
        };

        let reusable = match &self.snapshot {
            Some(snapshot) => !ReallocAnalyzer::needs_realloc(graph, snapshot),
            None => false,
        };
        if !reusable {
            let configs = self.configs();
            let outcome =
                self.planner
                    .plan(graph, &node_buffer_ids, &leaf_buffer_ids, &configs, true)?;
            self.snapshot = Some(AllocSnapshot::capture(
                graph,
                &node_buffer_ids,
                &leaf_buffer_ids,
                &configs,
            )?);
            self.node_buffer_ids = node_buffer_ids;
            self.leaf_buffer_ids = leaf_buffer_ids;

            let growing: Vec<usize> = (0..buffer_count)
                .filter(|&i| outcome.buffer_sizes[i] > self.buffers[i].committed_size)
                .collect();
            match growing.as_slice() {
                [] => {}
                [buffer_id] => {
                    let buffer_id = *buffer_id;
                    let required = outcome.buffer_sizes[buffer_id];
                    let splits =
                        split_chunks(buffer_id, required, &self.buffers[buffer_id].config)?;
                    self.reconcile_buffer(buffer_id, required, &splits)?;
                    debug!(buffer_id, required, "buffer grown for new graph");
                }
                growing => {
                    return Err(MemForgeError::MultiBufferGrowth {
                        buffers: growing.len(),
                    });
                }
            }
        }
        self.epochs.alloc += 1;
        Ok(())
    }

    fn release_inner(&mut self) -> ForgeResult<()> {
        self.ensure_initialized()?;
        for buffer_id in 0..self.buffers.len() {
            let alignment = self.buffers[buffer_id].config.alignment;
            let bindings = std::mem::take(&mut self.buffers[buffer_id].bindings);
            for binding in bindings {
                self.backend
                    .release(binding.chunk_id, binding.offset, binding.size, alignment)?;
            }
            self.buffers[buffer_id].committed_size = 0;
        }
        self.backend.reset()?;
        self.snapshot = None;
        self.node_buffer_ids.clear();
        self.leaf_buffer_ids.clear();
        self.epochs = Epochs {
            release: self.epochs.release + 1,
            ..Epochs::default()
        };
        info!("graph allocator released");
        Ok(())
    }

    /// Bring one buffer's committed chunks in line with `required` bytes.
    ///
    /// Committed sizes only grow. Existing bindings are kept verbatim when
    /// they already cover the requirement; otherwise they are released and
    /// reallocated per the split, rolling back chunks granted earlier in
    /// the same call on mid-sequence failure.
    fn reconcile_buffer(
        &mut self,
        buffer_id: usize,
        required: usize,
        splits: &[usize],
    ) -> ForgeResult<()> {
        if required <= self.buffers[buffer_id].committed_size {
            return Ok(());
        }
        if self.buffers[buffer_id].bound_bytes() >= required {
            self.buffers[buffer_id].committed_size = required;
            debug!(buffer_id, required, "bindings reused");
            return Ok(());
        }

        let config = self.buffers[buffer_id].config;
        let old = std::mem::take(&mut self.buffers[buffer_id].bindings);
        self.buffers[buffer_id].committed_size = 0;
        for binding in old {
            self.backend
                .release(binding.chunk_id, binding.offset, binding.size, config.alignment)?;
        }

        let mut fresh = Vec::with_capacity(splits.len());
        for &size in splits {
            match self
                .backend
                .allocate(size, config.alignment, config.max_chunk_size)
            {
                Ok(grant) => fresh.push(ChunkBinding {
                    chunk_id: grant.chunk_id,
                    offset: grant.offset,
                    size: grant.size,
                }),
                Err(err) => {
                    // Best-effort rollback of this call's grants.
                    for binding in fresh.iter().rev() {
                        let _ = self.backend.release(
                            binding.chunk_id,
                            binding.offset,
                            binding.size,
                            config.alignment,
                        );
                    }
                    return Err(err);
                }
            }
        }
        self.buffers[buffer_id].bindings = fresh;
        self.buffers[buffer_id].committed_size = required;
        debug!(
            buffer_id,
            required,
            chunks = splits.len(),
            "buffer committed"
        );
        Ok(())
    }
}
