//! Decision procedure for reusing a committed plan across graph shapes.

use tracing::debug;

use crate::alloc::snapshot::{AllocSnapshot, TensorAlloc};
use crate::graph::{GraphView, TensorDesc};
use crate::planner::align_up;

/// Compares a new graph against the last captured snapshot.
///
/// The check is shape-only: it never touches buffers or chunks, so a
/// negative answer lets the caller skip re-planning entirely.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReallocAnalyzer;

impl ReallocAnalyzer {
    /// Fixed alignment used for the "still big enough" comparison,
    /// independent of per-buffer alignment.
    pub const CHECK_ALIGNMENT: usize = 16;

    /// True when the committed plan cannot serve `graph` as-is.
    pub fn needs_realloc(graph: &GraphView, snapshot: &AllocSnapshot) -> bool {
        if graph.node_count() != snapshot.nodes.len()
            || graph.leaf_count() != snapshot.leafs.len()
        {
            debug!(
                nodes = graph.node_count(),
                snapshot_nodes = snapshot.nodes.len(),
                leafs = graph.leaf_count(),
                snapshot_leafs = snapshot.leafs.len(),
                "graph shape changed"
            );
            return true;
        }

        for (desc, alloc) in graph.leafs().iter().zip(snapshot.leafs.iter()) {
            if !Self::tensor_fits(desc, alloc) {
                debug!(tensor = desc.id.0, "leaf outgrew its allocation");
                return true;
            }
        }

        for (desc, node_alloc) in graph.nodes().iter().zip(snapshot.nodes.iter()) {
            if !Self::tensor_fits(desc, &node_alloc.dst) {
                debug!(tensor = desc.id.0, "node outgrew its allocation");
                return true;
            }
            for (slot, src_id) in desc.sources.iter().enumerate() {
                let Some(src_id) = src_id else { continue };
                match graph.find(*src_id) {
                    Some(src_desc) => {
                        if !Self::tensor_fits(src_desc, &node_alloc.src[slot]) {
                            debug!(tensor = src_id.0, "source outgrew its allocation");
                            return true;
                        }
                    }
                    None => {
                        debug!(tensor = src_id.0, "source missing from graph");
                        return true;
                    }
                }
            }
        }
        false
    }

    fn tensor_fits(desc: &TensorDesc, alloc: &TensorAlloc) -> bool {
        if desc.is_view() || desc.has_external_data {
            return true;
        }
        if alloc.buffer_id.is_none() {
            return false;
        }
        match align_up(desc.size, Self::CHECK_ALIGNMENT) {
            Ok(needed) => alloc.size_max >= needed,
            Err(_) => false,
        }
    }
}
