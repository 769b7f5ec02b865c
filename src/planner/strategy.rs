//! Free-block selection strategies.

use crate::planner::layout::FreeBlock;

/// Picks which free block satisfies an allocation request.
///
/// The selector receives the layout's free blocks in ascending offset
/// order and returns the index of the chosen block, or `None` when no
/// block fits and the layout should fall back to watermark growth.
pub trait BlockSelect: Send + Sync {
    fn select(&self, blocks: &[FreeBlock], size: usize) -> Option<usize>;
}

/// Best-fit selection: the fitting block with the least leftover space.
///
/// Ties resolve to the lowest offset because blocks are scanned in order.
#[derive(Debug, Clone, Copy, Default)]
pub struct BestFit;

impl BlockSelect for BestFit {
    fn select(&self, blocks: &[FreeBlock], size: usize) -> Option<usize> {
        blocks
            .iter()
            .enumerate()
            .filter(|(_, block)| block.size >= size)
            .min_by_key(|(_, block)| block.size - size)
            .map(|(idx, _)| idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(offset: usize, size: usize) -> FreeBlock {
        FreeBlock { offset, size }
    }

    #[test]
    fn test_best_fit_picks_tightest_block() {
        let blocks = [block(0, 64), block(128, 16), block(256, 32)];
        assert_eq!(BestFit.select(&blocks, 16), Some(1));
        assert_eq!(BestFit.select(&blocks, 20), Some(2));
        assert_eq!(BestFit.select(&blocks, 64), Some(0));
    }

    #[test]
    fn test_best_fit_none_when_nothing_fits() {
        let blocks = [block(0, 8), block(16, 8)];
        assert_eq!(BestFit.select(&blocks, 9), None);
        assert_eq!(BestFit.select(&[], 1), None);
    }

    #[test]
    fn test_best_fit_tie_prefers_lowest_offset() {
        let blocks = [block(0, 32), block(64, 32)];
        assert_eq!(BestFit.select(&blocks, 32), Some(0));
    }
}
