//! Ordered graph container handed to the planner.

use crate::error::{ForgeResult, MemForgeError};
use crate::graph::tensor::{TensorDesc, TensorId};

/// An execution-ordered view of a compute graph.
///
/// Leafs are tensors with no producer (weights, inputs); nodes are computed
/// tensors in execution order. Ids are assigned on insertion and are unique
/// across both sequences.
#[derive(Debug, Clone, Default)]
pub struct GraphView {
    nodes: Vec<TensorDesc>,
    leafs: Vec<TensorDesc>,
    next_id: usize,
}

impl GraphView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a leaf tensor and return its assigned id.
    pub fn add_leaf(&mut self, mut desc: TensorDesc) -> TensorId {
        let id = TensorId(self.next_id);
        self.next_id += 1;
        desc.id = id;
        self.leafs.push(desc);
        id
    }

    /// Append a node tensor in execution order and return its assigned id.
    pub fn add_node(&mut self, mut desc: TensorDesc) -> TensorId {
        let id = TensorId(self.next_id);
        self.next_id += 1;
        desc.id = id;
        self.nodes.push(desc);
        id
    }

    pub fn nodes(&self) -> &[TensorDesc] {
        &self.nodes
    }

    pub fn leafs(&self) -> &[TensorDesc] {
        &self.leafs
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn leaf_count(&self) -> usize {
        self.leafs.len()
    }

    /// Total number of tensors across leafs and nodes.
    pub fn tensor_count(&self) -> usize {
        self.nodes.len() + self.leafs.len()
    }

    /// Look up a tensor by id, searching leafs then nodes.
    pub fn find(&self, id: TensorId) -> Option<&TensorDesc> {
        self.leafs
            .iter()
            .chain(self.nodes.iter())
            .find(|desc| desc.id == id)
    }

    /// Verify that every source and view reference resolves within the graph.
    pub fn validate(&self) -> ForgeResult<()> {
        for desc in self.leafs.iter().chain(self.nodes.iter()) {
            for src in desc.source_ids() {
                if self.find(src).is_none() {
                    return Err(MemForgeError::MissingSource(src.0));
                }
            }
            if let Some(view_src) = desc.view_source {
                if self.find(view_src).is_none() {
                    return Err(MemForgeError::MissingViewSource(view_src.0));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_unique_across_leafs_and_nodes() {
        let mut graph = GraphView::new();
        let a = graph.add_leaf(TensorDesc::new(32));
        let b = graph.add_node(TensorDesc::new(16));
        let c = graph.add_node(TensorDesc::new(16));
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_eq!(graph.tensor_count(), 3);
        assert_eq!(graph.leaf_count(), 1);
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn test_find_resolves_both_sequences() {
        let mut graph = GraphView::new();
        let leaf = graph.add_leaf(TensorDesc::new(8));
        let node = graph.add_node(TensorDesc::new(8));
        assert_eq!(graph.find(leaf).unwrap().id, leaf);
        assert_eq!(graph.find(node).unwrap().id, node);
        assert!(graph.find(TensorId(99)).is_none());
    }

    #[test]
    fn test_validate_catches_missing_source() {
        let mut graph = GraphView::new();
        let desc = TensorDesc::new(8)
            .with_sources(&[TensorId(42)])
            .unwrap();
        graph.add_node(desc);
        assert!(matches!(
            graph.validate(),
            Err(MemForgeError::MissingSource(42))
        ));
    }

    #[test]
    fn test_validate_catches_missing_view_source() {
        let mut graph = GraphView::new();
        graph.add_node(TensorDesc::new(8).view_of(TensorId(7)));
        assert!(matches!(
            graph.validate(),
            Err(MemForgeError::MissingViewSource(7))
        ));
    }

    #[test]
    fn test_validate_accepts_resolved_references() {
        let mut graph = GraphView::new();
        let a = graph.add_leaf(TensorDesc::new(32));
        let b = graph.add_node(TensorDesc::new(16).with_sources(&[a]).unwrap());
        graph.add_node(TensorDesc::new(16).view_of(b));
        assert!(graph.validate().is_ok());
    }
}
