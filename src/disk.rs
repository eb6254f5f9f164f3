use std::collections::VecDeque;

use crate::{errors::StorageError, page::Page};

/// Position of a block on the simulated disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockAddr(pub usize);

/// The simulated disk: `disk_size` bytes split into fixed-size blocks.
///
/// Every block is owned here for the whole process lifetime. A free queue
/// and an in-use map track which blocks are handed out; releasing a block
/// returns it to the back of the queue without reclaiming its memory.
pub struct DiskArena {
    block_size: usize,
    blocks: Vec<Page>,
    in_use: Vec<bool>,
    empty_blocks: VecDeque<BlockAddr>,
}

impl DiskArena {
    pub fn new(disk_size: usize, block_size: usize) -> Self {
        let num_blocks = disk_size / block_size;
        let blocks = (0..num_blocks).map(|_| Page::new(block_size)).collect();
        let empty_blocks = (0..num_blocks).map(BlockAddr).collect();
        DiskArena {
            block_size,
            blocks,
            in_use: vec![false; num_blocks],
            empty_blocks,
        }
    }

    /// Hands out the first free block, zeroed.
    pub fn allocate(&mut self) -> Result<BlockAddr, StorageError> {
        let addr = self
            .empty_blocks
            .pop_front()
            .ok_or(StorageError::OutOfCapacity {
                num_blocks: self.blocks.len(),
            })?;
        self.in_use[addr.0] = true;
        self.blocks[addr.0].reset();
        Ok(addr)
    }

    /// Marks a block unused again. The bytes stay where they are.
    pub fn release(&mut self, addr: BlockAddr) {
        if self.in_use[addr.0] {
            self.in_use[addr.0] = false;
            self.empty_blocks.push_back(addr);
        }
    }

    pub fn page(&self, addr: BlockAddr) -> &Page {
        &self.blocks[addr.0]
    }

    pub fn page_mut(&mut self, addr: BlockAddr) -> &mut Page {
        &mut self.blocks[addr.0]
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn num_free(&self) -> usize {
        self.empty_blocks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_release() -> Result<(), anyhow::Error> {
        let mut arena = DiskArena::new(1000, 100);
        assert_eq!(arena.num_blocks(), 10);
        assert_eq!(arena.num_free(), 10);

        let first = arena.allocate()?;
        let second = arena.allocate()?;
        assert_ne!(first, second);
        assert_eq!(arena.num_free(), 8);

        arena.page_mut(first).set_u32(0, 7);
        arena.release(first);
        assert_eq!(arena.num_free(), 9);

        // Released bytes stay put until the slot is handed out again.
        assert_eq!(arena.page(first).get_u32(0), 7);
        Ok(())
    }

    #[test]
    fn test_allocation_is_zeroed() -> Result<(), anyhow::Error> {
        let mut arena = DiskArena::new(200, 100);
        let addr = arena.allocate()?;
        arena.page_mut(addr).set_u32(4, 99);
        arena.release(addr);

        let other = arena.allocate()?;
        arena.release(other);
        let again = arena.allocate()?;
        assert_eq!(again, addr);
        assert_eq!(arena.page(again).get_u32(4), 0);
        Ok(())
    }

    #[test]
    fn test_out_of_capacity() -> Result<(), anyhow::Error> {
        let mut arena = DiskArena::new(300, 100);
        for _ in 0..3 {
            arena.allocate()?;
        }
        assert!(matches!(
            arena.allocate(),
            Err(StorageError::OutOfCapacity { num_blocks: 3 })
        ));
        Ok(())
    }

    #[test]
    fn test_release_is_idempotent() -> Result<(), anyhow::Error> {
        let mut arena = DiskArena::new(300, 100);
        let addr = arena.allocate()?;
        arena.release(addr);
        arena.release(addr);
        assert_eq!(arena.num_free(), 3);
        Ok(())
    }
}
