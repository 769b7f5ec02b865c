//! Immutable allocation snapshots captured after each planning pass.

use crate::alloc::config::BufferConfig;
use crate::error::ForgeResult;
use crate::graph::{GraphView, TensorDesc, MAX_SOURCES};
use crate::planner::align_up;

/// What one tensor was granted in the captured plan.
///
/// Views and external tensors record `buffer_id: None, size_max: 0`; they
/// never participate in realloc decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TensorAlloc {
    pub buffer_id: Option<usize>,
    /// Aligned byte capacity reserved for the tensor
    pub size_max: usize,
}

/// Destination plus per-slot source allocations for one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeAlloc {
    pub dst: TensorAlloc,
    pub src: [TensorAlloc; MAX_SOURCES],
}

/// Value snapshot of a whole planning pass, keyed by graph position.
#[derive(Debug, Clone, Default)]
pub struct AllocSnapshot {
    pub nodes: Vec<NodeAlloc>,
    pub leafs: Vec<TensorAlloc>,
}

impl AllocSnapshot {
    /// Capture the allocation state of `graph` under the given assignment.
    ///
    /// `size_max` is the size the buffer's alignment rounds each tensor up
    /// to; it is what a later graph's tensor must fit inside for the plan
    /// to be reusable.
    pub fn capture(
        graph: &GraphView,
        node_buffer_ids: &[usize],
        leaf_buffer_ids: &[usize],
        configs: &[BufferConfig],
    ) -> ForgeResult<Self> {
        let tensor_alloc = |desc: &TensorDesc, buffer_id: usize| -> ForgeResult<TensorAlloc> {
            if desc.is_view() || desc.has_external_data {
                return Ok(TensorAlloc::default());
            }
            Ok(TensorAlloc {
                buffer_id: Some(buffer_id),
                size_max: align_up(desc.size, configs[buffer_id].alignment)?,
            })
        };

        let buffer_of = |id| -> usize {
            // Assignment arrays are parallel to the graph sequences; a
            // source resolves to its own position's buffer.
            graph
                .leafs()
                .iter()
                .position(|d| d.id == id)
                .map(|idx| leaf_buffer_ids[idx])
                .or_else(|| {
                    graph
                        .nodes()
                        .iter()
                        .position(|d| d.id == id)
                        .map(|idx| node_buffer_ids[idx])
                })
                .unwrap_or(0)
        };

        let mut leafs = Vec::with_capacity(graph.leaf_count());
        for (desc, &buffer_id) in graph.leafs().iter().zip(leaf_buffer_ids.iter()) {
            leafs.push(tensor_alloc(desc, buffer_id)?);
        }

        let mut nodes = Vec::with_capacity(graph.node_count());
        for (desc, &buffer_id) in graph.nodes().iter().zip(node_buffer_ids.iter()) {
            let mut node = NodeAlloc {
                dst: tensor_alloc(desc, buffer_id)?,
                src: [TensorAlloc::default(); MAX_SOURCES],
            };
            for (slot, src_id) in desc.sources.iter().enumerate() {
                if let Some(src_id) = src_id {
                    if let Some(src_desc) = graph.find(*src_id) {
                        node.src[slot] = tensor_alloc(src_desc, buffer_of(*src_id))?;
                    }
                }
            }
            nodes.push(node);
        }

        Ok(Self { nodes, leafs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_rounds_sizes_up() {
        let mut graph = GraphView::new();
        let a = graph.add_leaf(TensorDesc::new(20).input());
        graph.add_node(TensorDesc::new(10).output().with_sources(&[a]).unwrap());

        let configs = vec![BufferConfig::sanitized(16, 0)];
        let snapshot = AllocSnapshot::capture(&graph, &[0], &[0], &configs).unwrap();
        assert_eq!(snapshot.leafs[0].size_max, 32);
        assert_eq!(snapshot.nodes[0].dst.size_max, 16);
        assert_eq!(snapshot.nodes[0].src[0].size_max, 32);
        assert_eq!(snapshot.nodes[0].src[1], TensorAlloc::default());
    }

    #[test]
    fn test_views_and_externals_are_blank() {
        let mut graph = GraphView::new();
        let a = graph.add_leaf(TensorDesc::new(16).external());
        let b = graph.add_node(TensorDesc::new(32).with_sources(&[a]).unwrap());
        graph.add_node(TensorDesc::new(8).view_of(b).with_sources(&[b]).unwrap());

        let configs = vec![BufferConfig::sanitized(16, 0)];
        let snapshot = AllocSnapshot::capture(&graph, &[0, 0], &[0], &configs).unwrap();
        assert_eq!(snapshot.leafs[0], TensorAlloc::default());
        assert_eq!(snapshot.nodes[1].dst, TensorAlloc::default());
        assert_eq!(snapshot.nodes[0].src[0], TensorAlloc::default());
    }

    #[test]
    fn test_source_resolution_crosses_buffers() {
        let mut graph = GraphView::new();
        let a = graph.add_leaf(TensorDesc::new(16).input());
        graph.add_node(TensorDesc::new(16).output().with_sources(&[a]).unwrap());

        let configs = vec![BufferConfig::default(), BufferConfig::default()];
        // Leaf on buffer 1, node on buffer 0.
        let snapshot = AllocSnapshot::capture(&graph, &[0], &[1], &configs).unwrap();
        assert_eq!(snapshot.nodes[0].dst.buffer_id, Some(0));
        assert_eq!(snapshot.nodes[0].src[0].buffer_id, Some(1));
    }
}
