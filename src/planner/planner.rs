//! Planning pass: reference-counted graph walk with in-place reuse.

use std::fmt;

use tracing::{debug, trace};

use crate::alloc::config::BufferConfig;
use crate::error::{ForgeResult, MemForgeError};
use crate::graph::{GraphView, TensorDesc, TensorId};
use crate::planner::layout::{align_up, BufferLayout};
use crate::planner::records::{TensorRecord, TensorTable, MAX_TENSORS};
use crate::planner::strategy::{BestFit, BlockSelect};

/// Maximum number of logical buffers per plan.
pub const MAX_BUFFERS: usize = 16;

/// Maximum number of chunks a buffer requirement may split into.
pub const MAX_CHUNKS: usize = 16;

/// Counters gathered over one planning pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanStats {
    /// Tensors that received storage (fresh or in place)
    pub tensors_planned: usize,
    /// Nodes that took over a dying source's storage
    pub inplace_reuses: usize,
    /// Reserved ranges returned to a free list
    pub freed_blocks: usize,
    /// Sum of all buffer watermarks
    pub peak_bytes: usize,
}

impl fmt::Display for PlanStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "planned {} tensors ({} in-place, {} blocks freed), peak {} bytes",
            self.tensors_planned, self.inplace_reuses, self.freed_blocks, self.peak_bytes
        )
    }
}

/// Result of one planning pass.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    /// Required byte size per buffer, watermark-derived
    pub buffer_sizes: Vec<usize>,
    /// Per-buffer chunk sizes; `None` for size-only passes
    pub chunk_splits: Option<Vec<Vec<usize>>>,
    pub stats: PlanStats,
}

/// Graph memory planner.
///
/// Stateless between calls; all working state lives in the pass. The
/// free-block selection strategy is injected at construction and defaults
/// to [`BestFit`].
pub struct Planner {
    strategy: Box<dyn BlockSelect>,
}

impl Default for Planner {
    fn default() -> Self {
        Self::new()
    }
}

impl Planner {
    pub fn new() -> Self {
        Self {
            strategy: Box::new(BestFit),
        }
    }

    pub fn with_strategy(strategy: Box<dyn BlockSelect>) -> Self {
        Self { strategy }
    }

    /// Run a full planning pass over `graph`.
    ///
    /// `node_buffer_ids` / `leaf_buffer_ids` assign each tensor to one of
    /// `configs.len()` buffers. With `size_only` the chunk-split phase is
    /// skipped and only sizes are reported. Validation failures abort
    /// before any working state is built.
    pub fn plan(
        &self,
        graph: &GraphView,
        node_buffer_ids: &[usize],
        leaf_buffer_ids: &[usize],
        configs: &[BufferConfig],
        size_only: bool,
    ) -> ForgeResult<PlanOutcome> {
        let buffer_count = configs.len();
        if buffer_count == 0 || buffer_count > MAX_BUFFERS {
            return Err(MemForgeError::InvalidBufferCount {
                count: buffer_count,
                max: MAX_BUFFERS,
            });
        }
        for config in configs {
            config.validate()?;
        }
        if node_buffer_ids.len() != graph.node_count()
            || leaf_buffer_ids.len() != graph.leaf_count()
        {
            return Err(MemForgeError::AssignmentMismatch {
                expected: graph.tensor_count(),
                actual: node_buffer_ids.len() + leaf_buffer_ids.len(),
            });
        }
        for &buffer_id in node_buffer_ids.iter().chain(leaf_buffer_ids.iter()) {
            if buffer_id >= buffer_count {
                return Err(MemForgeError::InvalidBufferId {
                    buffer_id,
                    buffer_count,
                });
            }
        }
        if graph.tensor_count() > MAX_TENSORS {
            return Err(MemForgeError::TensorCapacityExceeded {
                count: graph.tensor_count(),
                max: MAX_TENSORS,
            });
        }
        graph.validate()?;

        let mut pass = PlanPass::new(graph, configs, self.strategy.as_ref());
        pass.register_tensors(node_buffer_ids, leaf_buffer_ids)?;
        pass.seed_leafs()?;
        pass.count_references()?;
        pass.allocate_inputs()?;
        pass.plan_nodes()?;
        pass.release_expired();
        let buffer_sizes = pass.finalize();

        let chunk_splits = if size_only {
            None
        } else {
            let mut splits = Vec::with_capacity(buffer_count);
            for (buffer_id, (&required, config)) in
                buffer_sizes.iter().zip(configs.iter()).enumerate()
            {
                splits.push(split_chunks(buffer_id, required, config)?);
            }
            Some(splits)
        };

        let stats = pass.stats;
        debug!(%stats, size_only, "planning pass complete");
        Ok(PlanOutcome {
            buffer_sizes,
            chunk_splits,
            stats,
        })
    }
}

/// Split a buffer requirement into chunk sizes under the config's limit.
pub(crate) fn split_chunks(
    buffer_id: usize,
    required: usize,
    config: &BufferConfig,
) -> ForgeResult<Vec<usize>> {
    if required == 0 {
        return Ok(Vec::new());
    }
    if config.is_unbounded() || config.max_chunk_size >= required {
        return Ok(vec![required]);
    }
    let mut chunks = Vec::with_capacity(MAX_CHUNKS);
    let mut remaining = required;
    while remaining > 0 {
        if chunks.len() == MAX_CHUNKS {
            return Err(MemForgeError::ChunkCapacityExceeded {
                buffer_id,
                required,
                max: MAX_CHUNKS,
            });
        }
        let chunk = remaining.min(config.max_chunk_size);
        chunks.push(chunk);
        remaining -= chunk;
    }
    Ok(chunks)
}

/// Working state for one planning pass.
struct PlanPass<'a> {
    graph: &'a GraphView,
    strategy: &'a dyn BlockSelect,
    table: TensorTable,
    layouts: Vec<BufferLayout>,
    stats: PlanStats,
}

impl<'a> PlanPass<'a> {
    fn new(graph: &'a GraphView, configs: &[BufferConfig], strategy: &'a dyn BlockSelect) -> Self {
        let layouts = configs
            .iter()
            .enumerate()
            .map(|(buffer_id, config)| BufferLayout::new(buffer_id, config.alignment))
            .collect();
        Self {
            graph,
            strategy,
            table: TensorTable::new(),
            layouts,
            stats: PlanStats::default(),
        }
    }

    /// Phase 1: one record per tensor, leafs first.
    fn register_tensors(
        &mut self,
        node_buffer_ids: &[usize],
        leaf_buffer_ids: &[usize],
    ) -> ForgeResult<()> {
        for (desc, &buffer_id) in self.graph.leafs().iter().zip(leaf_buffer_ids.iter()) {
            self.table.register(TensorRecord::from_desc(desc, buffer_id))?;
        }
        for (desc, &buffer_id) in self.graph.nodes().iter().zip(node_buffer_ids.iter()) {
            self.table.register(TensorRecord::from_desc(desc, buffer_id))?;
        }
        Ok(())
    }

    /// Phase 2: every allocatable leaf gets storage up front.
    fn seed_leafs(&mut self) -> ForgeResult<()> {
        for desc in self.graph.leafs() {
            let pending = self
                .table
                .get(desc.id)
                .map(|r| r.allocatable && !r.allocated)
                .unwrap_or(false);
            if pending {
                self.allocate_tensor(desc.id)?;
            }
        }
        Ok(())
    }

    /// Phase 3: child counts from node sources, view counts from view nodes.
    fn count_references(&mut self) -> ForgeResult<()> {
        for desc in self.graph.nodes() {
            for src in desc.source_ids() {
                self.table
                    .get_mut(src)
                    .ok_or(MemForgeError::MissingSource(src.0))?
                    .children += 1;
            }
            if let Some(backing) = desc.view_source {
                self.table
                    .get_mut(backing)
                    .ok_or(MemForgeError::MissingViewSource(backing.0))?
                    .views += 1;
            }
        }
        Ok(())
    }

    /// Phase 4: anything flagged as an input gets storage now.
    fn allocate_inputs(&mut self) -> ForgeResult<()> {
        let pending: Vec<TensorId> = self
            .table
            .iter()
            .filter(|r| r.is_input && r.allocatable && !r.allocated)
            .map(|r| r.id)
            .collect();
        for id in pending {
            self.allocate_tensor(id)?;
        }
        Ok(())
    }

    /// Phase 5: walk nodes in execution order.
    fn plan_nodes(&mut self) -> ForgeResult<()> {
        for desc in self.graph.nodes() {
            for src in desc.source_ids() {
                let pending = {
                    let rec = self
                        .table
                        .get(src)
                        .ok_or(MemForgeError::MissingSource(src.0))?;
                    rec.allocatable && !rec.allocated
                };
                if pending {
                    self.allocate_tensor(src)?;
                }
            }

            let (allocatable, is_input, allocated, can_inplace) = {
                let rec = self
                    .table
                    .get(desc.id)
                    .ok_or(MemForgeError::MissingSource(desc.id.0))?;
                (rec.allocatable, rec.is_input, rec.allocated, rec.can_inplace)
            };
            if allocatable && !is_input && !allocated {
                let reused = if can_inplace {
                    self.try_inplace(desc)?
                } else {
                    false
                };
                if !reused {
                    self.allocate_tensor(desc.id)?;
                }
            }

            for src in desc.source_ids() {
                self.release_source(src)?;
            }
        }
        Ok(())
    }

    /// Phase 6: deferred-release hook; the default path frees eagerly as
    /// each source's last reader retires.
    fn release_expired(&mut self) {}

    /// Phase 7: watermark totals per buffer.
    fn finalize(&mut self) -> Vec<usize> {
        let sizes: Vec<usize> = self
            .layouts
            .iter()
            .map(|layout| layout.required_bytes())
            .collect();
        self.stats.peak_bytes = sizes.iter().sum();
        sizes
    }

    fn allocate_tensor(&mut self, id: TensorId) -> ForgeResult<()> {
        let (buffer_id, size) = {
            let rec = self
                .table
                .get(id)
                .ok_or(MemForgeError::MissingSource(id.0))?;
            (rec.buffer_id, rec.size)
        };
        let alignment = self.layouts[buffer_id].alignment();
        let aligned = align_up(size, alignment)?;
        let offset = self.layouts[buffer_id].allocate(aligned, self.strategy)?;
        let rec = self
            .table
            .get_mut(id)
            .ok_or(MemForgeError::MissingSource(id.0))?;
        rec.offset = Some(offset);
        rec.reserved = aligned;
        rec.allocated = true;
        self.stats.tensors_planned += 1;
        trace!(tensor = id.0, buffer_id, offset, aligned, "allocated tensor");
        Ok(())
    }

    /// Try to place `desc` over a dying source's storage.
    ///
    /// The candidate is the source itself (exactly one child, no views) or,
    /// for a view source, the view's backing tensor (exactly one view, no
    /// children). Inputs and outputs are never overwritten. First fitting
    /// candidate wins; surplus reserved bytes return to the free list and
    /// the candidate hands its range over without a free.
    fn try_inplace(&mut self, desc: &TensorDesc) -> ForgeResult<bool> {
        let (node_buffer, node_size) = {
            let rec = self
                .table
                .get(desc.id)
                .ok_or(MemForgeError::MissingSource(desc.id.0))?;
            (rec.buffer_id, rec.size)
        };
        let alignment = self.layouts[node_buffer].alignment();
        let aligned = align_up(node_size, alignment)?;

        for src in desc.source_ids() {
            let src_rec = self
                .table
                .get(src)
                .ok_or(MemForgeError::MissingSource(src.0))?;
            let candidate_id = match src_rec.view_source {
                None if src_rec.children == 1 && src_rec.views == 0 => src,
                Some(backing) => {
                    let backing_rec = self
                        .table
                        .get(backing)
                        .ok_or(MemForgeError::MissingViewSource(backing.0))?;
                    if backing_rec.views == 1 && backing_rec.children == 0 {
                        backing
                    } else {
                        continue;
                    }
                }
                None => continue,
            };
            let candidate = self
                .table
                .get(candidate_id)
                .ok_or(MemForgeError::MissingSource(candidate_id.0))?;
            if !candidate.allocated
                || candidate.is_input
                || candidate.is_output
                || candidate.buffer_id != node_buffer
                || candidate.reserved < aligned
            {
                continue;
            }
            let offset = candidate.offset.ok_or_else(|| {
                MemForgeError::AllocationMismatch(format!(
                    "allocated tensor {} has no offset",
                    candidate_id.0
                ))
            })?;
            let surplus = candidate.reserved - aligned;

            if let Some(cand) = self.table.get_mut(candidate_id) {
                cand.allocated = false;
            }
            if surplus > 0 {
                self.layouts[node_buffer].free(offset + aligned, surplus)?;
            }
            let rec = self
                .table
                .get_mut(desc.id)
                .ok_or(MemForgeError::MissingSource(desc.id.0))?;
            rec.offset = Some(offset);
            rec.reserved = aligned;
            rec.allocated = true;
            self.stats.tensors_planned += 1;
            self.stats.inplace_reuses += 1;
            debug!(
                node = desc.id.0,
                candidate = candidate_id.0,
                offset,
                surplus,
                "in-place reuse"
            );
            return Ok(true);
        }
        Ok(false)
    }

    /// Retire one read of `src`; free storage once nothing references it.
    fn release_source(&mut self, src: TensorId) -> ForgeResult<()> {
        let (expired, pinned, view_source, allocated) = {
            let rec = self
                .table
                .get_mut(src)
                .ok_or(MemForgeError::MissingSource(src.0))?;
            if rec.children == 0 {
                return Err(MemForgeError::AllocationMismatch(format!(
                    "child count underflow on tensor {}",
                    src.0
                )));
            }
            rec.children -= 1;
            (
                rec.is_expired(),
                rec.is_input || rec.is_output,
                rec.view_source,
                rec.allocated,
            )
        };
        if !expired || pinned {
            return Ok(());
        }
        match view_source {
            Some(backing) => {
                let (backing_expired, backing_pinned, backing_allocated) = {
                    let rec = self
                        .table
                        .get_mut(backing)
                        .ok_or(MemForgeError::MissingViewSource(backing.0))?;
                    if rec.views == 0 {
                        return Err(MemForgeError::AllocationMismatch(format!(
                            "view count underflow on tensor {}",
                            backing.0
                        )));
                    }
                    rec.views -= 1;
                    (
                        rec.is_expired(),
                        rec.is_input || rec.is_output,
                        rec.allocated,
                    )
                };
                if backing_expired && !backing_pinned && backing_allocated {
                    self.free_tensor(backing)?;
                }
            }
            None => {
                if allocated {
                    self.free_tensor(src)?;
                }
            }
        }
        Ok(())
    }

    fn free_tensor(&mut self, id: TensorId) -> ForgeResult<()> {
        let (buffer_id, offset, reserved) = {
            let rec = self
                .table
                .get_mut(id)
                .ok_or(MemForgeError::MissingSource(id.0))?;
            let offset = rec.offset.ok_or_else(|| {
                MemForgeError::AllocationMismatch(format!(
                    "free of unplanned tensor {}",
                    id.0
                ))
            })?;
            rec.allocated = false;
            (rec.buffer_id, offset, rec.reserved)
        };
        self.layouts[buffer_id].free(offset, reserved)?;
        self.stats.freed_blocks += 1;
        trace!(tensor = id.0, buffer_id, offset, reserved, "freed tensor");
        Ok(())
    }
}
