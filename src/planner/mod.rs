//! Graph memory planner.
//!
//! The planner walks a [`GraphView`](crate::graph::GraphView) in execution
//! order, reference-counts tensor lifetimes, reuses storage of dying
//! tensors (in place where the op allows it), and produces per-buffer size
//! requirements plus chunk splits for the physical backend.

pub mod layout;
pub mod planner;
pub mod records;
pub mod strategy;

pub use layout::{align_up, BufferLayout, FreeBlock, MAX_FREE_BLOCKS};
pub use planner::{PlanOutcome, PlanStats, Planner, MAX_BUFFERS, MAX_CHUNKS};
pub use records::{TensorRecord, TensorTable, MAX_TENSORS};
pub use strategy::{BestFit, BlockSelect};
