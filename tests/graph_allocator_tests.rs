//! Lifecycle tests for the graph allocator: initialize, reserve,
//! alloc_graph, release, and chunk reconciliation.

use anyhow::Result;
use memforge::{
    ChunkAllocator, ChunkGrant, ForgeResult, GraphAllocator, GraphView, HostChunkAllocator,
    MemForgeError, TensorDesc,
};
use std::cell::RefCell;
use std::rc::Rc;

fn chain(leaf_size: usize, node_size: usize) -> GraphView {
    let mut graph = GraphView::new();
    let a = graph.add_leaf(TensorDesc::new(leaf_size).input());
    graph.add_node(
        TensorDesc::new(node_size)
            .output()
            .with_sources(&[a])
            .unwrap(),
    );
    graph
}

/// Host-backed allocator that counts calls, for asserting chunk traffic.
struct CountingBackend {
    inner: HostChunkAllocator,
    allocations: Rc<RefCell<usize>>,
    releases: Rc<RefCell<usize>>,
}

impl ChunkAllocator for CountingBackend {
    fn reset(&mut self) -> ForgeResult<()> {
        self.inner.reset()
    }

    fn configure(&mut self, alignment: usize, max_chunk_size: usize) -> ForgeResult<()> {
        self.inner.configure(alignment, max_chunk_size)
    }

    fn allocate(
        &mut self,
        size: usize,
        alignment: usize,
        max_chunk_size: usize,
    ) -> ForgeResult<ChunkGrant> {
        *self.allocations.borrow_mut() += 1;
        self.inner.allocate(size, alignment, max_chunk_size)
    }

    fn release(
        &mut self,
        chunk_id: memforge::ChunkId,
        offset: usize,
        size: usize,
        alignment: usize,
    ) -> ForgeResult<()> {
        *self.releases.borrow_mut() += 1;
        self.inner.release(chunk_id, offset, size, alignment)
    }
}

fn counting_allocator() -> (GraphAllocator, Rc<RefCell<usize>>, Rc<RefCell<usize>>) {
    let allocations = Rc::new(RefCell::new(0));
    let releases = Rc::new(RefCell::new(0));
    let backend = CountingBackend {
        inner: HostChunkAllocator::new(),
        allocations: allocations.clone(),
        releases: releases.clone(),
    };
    (
        GraphAllocator::with_backend(Box::new(backend)),
        allocations,
        releases,
    )
}

#[test]
fn operations_require_initialize() {
    let mut alloc = GraphAllocator::new();
    let graph = chain(32, 32);
    assert!(matches!(
        alloc.reserve(&graph),
        Err(MemForgeError::NotInitialized)
    ));
    assert!(matches!(
        alloc.alloc_graph(&graph),
        Err(MemForgeError::NotInitialized)
    ));
    assert!(matches!(
        alloc.release(),
        Err(MemForgeError::NotInitialized)
    ));
}

#[test]
fn reserve_round_trip() -> Result<()> {
    let mut alloc = GraphAllocator::new();
    alloc.initialize(1, Some(&[16]), None)?;
    assert_eq!(alloc.epochs().init, 1);

    alloc.reserve(&chain(64, 32))?;
    assert_eq!(alloc.buffer_size(0)?, 96, "64 + 32 under 16-byte alignment");
    assert_eq!(alloc.total_allocated(), 96);
    assert!(alloc.first_chunk_id(0)?.is_some());
    assert_eq!(alloc.first_chunk_offset(0)?, Some(0));
    assert_eq!(alloc.epochs().reserve, 1);
    assert!(alloc.last_error().is_none());
    Ok(())
}

#[test]
fn reserve_n_size_never_touches_chunks() -> Result<()> {
    let (mut alloc, allocations, releases) = counting_allocator();
    alloc.initialize(1, None, None)?;

    let sizes = alloc.reserve_n_size(&chain(64, 32), &[0], &[0])?;
    assert_eq!(sizes, vec![96]);
    assert_eq!(*allocations.borrow(), 0, "dry run must not allocate chunks");
    assert_eq!(*releases.borrow(), 0, "dry run must not release chunks");
    assert_eq!(alloc.total_allocated(), 0);
    assert_eq!(alloc.epochs().reserve, 1);
    Ok(())
}

#[test]
fn committed_sizes_only_grow() -> Result<()> {
    let mut alloc = GraphAllocator::new();
    alloc.initialize(1, None, None)?;
    alloc.reserve(&chain(128, 64))?;
    let committed = alloc.buffer_size(0)?;

    alloc.reserve(&chain(16, 16))?;
    assert_eq!(
        alloc.buffer_size(0)?,
        committed,
        "smaller graph must not shrink the committed size"
    );
    Ok(())
}

#[test]
fn alloc_graph_skips_chunk_traffic_when_plan_fits() -> Result<()> {
    let (mut alloc, allocations, _) = counting_allocator();
    alloc.initialize(1, None, None)?;
    alloc.reserve(&chain(64, 32))?;
    let after_reserve = *allocations.borrow();

    // Same shape, smaller tensors: the committed plan still fits.
    alloc.alloc_graph(&chain(48, 16))?;
    alloc.alloc_graph(&chain(64, 32))?;
    assert_eq!(
        *allocations.borrow(),
        after_reserve,
        "steady state must not re-allocate chunks"
    );
    assert_eq!(alloc.epochs().alloc, 2);
    Ok(())
}

#[test]
fn alloc_graph_grows_exactly_one_buffer() -> Result<()> {
    let mut alloc = GraphAllocator::new();
    alloc.initialize(1, None, None)?;
    alloc.reserve(&chain(64, 32))?;
    let committed = alloc.buffer_size(0)?;

    alloc.alloc_graph(&chain(64, 512))?;
    assert!(alloc.buffer_size(0)? > committed, "buffer should have grown");
    Ok(())
}

#[test]
fn alloc_graph_rejects_multi_buffer_growth() -> Result<()> {
    let mut alloc = GraphAllocator::new();
    alloc.initialize(2, None, None)?;
    let graph = chain(64, 32);
    alloc.reserve_n(&graph, &[0], &[1])?;

    let bigger = chain(1024, 1024);
    let err = alloc.alloc_graph(&bigger).unwrap_err();
    assert!(matches!(err, MemForgeError::MultiBufferGrowth { buffers: 2 }));
    assert!(err.is_invalid_argument());
    assert!(alloc.last_error().is_some(), "failure must be recorded");
    Ok(())
}

#[test]
fn chunked_commit_respects_max_chunk_size() -> Result<()> {
    let (mut alloc, allocations, _) = counting_allocator();
    // Alignment 8, chunks capped at 16 bytes.
    alloc.initialize(1, Some(&[8]), Some(&[16]))?;
    alloc.reserve(&chain(24, 16))?;
    assert_eq!(alloc.buffer_size(0)?, 40);
    assert_eq!(*allocations.borrow(), 3, "40 bytes split into 16+16+8 chunks");
    Ok(())
}

#[test]
fn release_returns_to_initialized_state() -> Result<()> {
    let mut alloc = GraphAllocator::new();
    alloc.initialize(2, None, None)?;
    let graph = chain(64, 32);
    alloc.reserve_n(&graph, &[0], &[1])?;
    assert!(alloc.total_allocated() > 0);

    alloc.release()?;
    assert_eq!(alloc.total_allocated(), 0);
    assert_eq!(alloc.first_chunk_id(0)?, None);
    assert_eq!(alloc.buffer_count(), 2);
    assert_eq!(alloc.epochs().release, 1);
    assert_eq!(alloc.epochs().reserve, 0, "release clears the other epochs");

    // The allocator stays usable without another initialize.
    alloc.reserve_n(&graph, &[0], &[1])?;
    assert!(alloc.total_allocated() > 0);
    Ok(())
}

#[test]
fn accessors_validate_buffer_ids() -> Result<()> {
    let mut alloc = GraphAllocator::new();
    alloc.initialize(1, None, None)?;
    assert!(matches!(
        alloc.buffer_size(5),
        Err(MemForgeError::InvalidBufferId {
            buffer_id: 5,
            buffer_count: 1
        })
    ));
    Ok(())
}

#[test]
fn initialize_rejects_bad_buffer_counts() {
    let mut alloc = GraphAllocator::new();
    assert!(matches!(
        alloc.initialize(0, None, None),
        Err(MemForgeError::InvalidBufferCount { count: 0, .. })
    ));
    assert!(matches!(
        alloc.initialize(64, None, None),
        Err(MemForgeError::InvalidBufferCount { count: 64, .. })
    ));
}
