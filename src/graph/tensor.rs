//! Tensor descriptors for the memory planner.

use crate::error::{ForgeResult, MemForgeError};

/// Maximum number of source tensors a node may reference.
pub const MAX_SOURCES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorId(pub usize);

/// Immutable per-call description of one tensor in a graph.
///
/// The planner only needs byte sizes and lifetime flags; shapes, dtypes
/// and strides are resolved by the execution layer before planning.
#[derive(Debug, Clone)]
pub struct TensorDesc {
    pub id: TensorId,
    /// Required byte size of the tensor's storage
    pub size: usize,
    /// Source tensor ids, resolved by id (empty slots are `None`)
    pub sources: [Option<TensorId>; MAX_SOURCES],
    /// Tensor this one aliases instead of owning storage
    pub view_source: Option<TensorId>,
    /// Pinned as a graph input: gets stable storage, never reused in place
    pub is_input: bool,
    /// Graph output: its storage is never freed or taken over
    pub is_output: bool,
    /// The producing op may write its result over a dying source
    pub can_inplace: bool,
    /// Storage lives outside the planner (weights, mmapped data)
    pub has_external_data: bool,
}

impl TensorDesc {
    pub fn new(size: usize) -> Self {
        Self {
            id: TensorId(0),
            size,
            sources: [None; MAX_SOURCES],
            view_source: None,
            is_input: false,
            is_output: false,
            can_inplace: false,
            has_external_data: false,
        }
    }

    /// Attach source tensors, at most [`MAX_SOURCES`] of them.
    pub fn with_sources(mut self, sources: &[TensorId]) -> ForgeResult<Self> {
        if sources.len() > MAX_SOURCES {
            return Err(MemForgeError::SourceCapacityExceeded {
                count: sources.len(),
                max: MAX_SOURCES,
            });
        }
        for (slot, id) in self.sources.iter_mut().zip(sources.iter()) {
            *slot = Some(*id);
        }
        Ok(self)
    }

    /// Mark this tensor as a view aliasing `source`'s storage.
    pub fn view_of(mut self, source: TensorId) -> Self {
        self.view_source = Some(source);
        self
    }

    pub fn input(mut self) -> Self {
        self.is_input = true;
        self
    }

    pub fn output(mut self) -> Self {
        self.is_output = true;
        self
    }

    pub fn inplace(mut self) -> Self {
        self.can_inplace = true;
        self
    }

    pub fn external(mut self) -> Self {
        self.has_external_data = true;
        self
    }

    /// A view never owns storage; it aliases its view source.
    pub fn is_view(&self) -> bool {
        self.view_source.is_some()
    }

    /// Iterate over the present source ids in slot order.
    pub fn source_ids(&self) -> impl Iterator<Item = TensorId> + '_ {
        self.sources.iter().flatten().copied()
    }
}
