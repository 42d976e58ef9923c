//! Fixed-size write-back cache of 512-byte blocks.
//!
//! The slots form a singly-linked LRU list threaded by slot index: the head
//! is the most recently used slot, the tail the next eviction candidate.
//! This module only manages the list and the slot storage; reading from and
//! writing to the card is the device layer's business.

use crate::error::{Error, Result};
use crate::sd::BLOCK_LEN;

/// Block number stamped into a slot that holds no data.
pub(crate) const INVALID_BLOCK: u32 = 0xFFFF_FFFF;

/// Slot-index sentinel terminating the LRU chain.
const NONE: u8 = u8::MAX;

#[derive(Clone, Copy)]
pub(crate) struct Slot {
    pub block: u32,
    pub dirty: bool,
    next: u8,
    pub data: [u8; BLOCK_LEN],
}

const EMPTY_SLOT: Slot = Slot {
    block: INVALID_BLOCK,
    dirty: false,
    next: NONE,
    data: [0; BLOCK_LEN],
};

pub(crate) struct BlockCache<const N: usize> {
    slots: [Slot; N],
    head: u8,
}

impl<const N: usize> BlockCache<N> {
    const SIZE_OK: () = assert!(N >= 1 && N < NONE as usize);

    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::SIZE_OK;
        let mut cache = BlockCache {
            slots: [EMPTY_SLOT; N],
            head: NONE,
        };
        cache.reset();
        cache
    }

    /// Invalidate every slot and rebuild the chain in index order.
    pub fn reset(&mut self) {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            slot.block = INVALID_BLOCK;
            slot.dirty = false;
            slot.next = if i == N - 1 { NONE } else { i as u8 + 1 };
        }
        self.head = 0;
    }

    pub fn slot(&self, index: u8) -> &Slot {
        &self.slots[index as usize]
    }

    pub fn slot_mut(&mut self, index: u8) -> &mut Slot {
        &mut self.slots[index as usize]
    }

    /// Find the slot holding `block`, if any.
    pub fn lookup(&self, block: u32) -> Option<u8> {
        let mut current = self.head;
        while current != NONE {
            if self.slots[current as usize].block == block {
                return Some(current);
            }
            current = self.slots[current as usize].next;
        }
        None
    }

    /// Unlink `index` and relink it at the head of the chain.
    pub fn move_to_head(&mut self, index: u8) -> Result<()> {
        if self.head == index {
            return Ok(());
        }

        // find the slot pointing at the target
        let mut current = self.head;
        while self.slots[current as usize].next != index {
            current = self.slots[current as usize].next;
            if current == NONE {
                return Err(Error::CacheFailure);
            }
        }

        self.slots[current as usize].next = self.slots[index as usize].next;
        self.slots[index as usize].next = self.head;
        self.head = index;
        Ok(())
    }

    /// Detach and return the tail slot. On a one-slot chain this empties the
    /// head to the sentinel; the caller is expected to re-add the slot.
    pub fn remove_least_used(&mut self) -> u8 {
        let first = self.head;
        if self.slots[first as usize].next == NONE {
            self.head = NONE;
            return first;
        }

        let mut current = first;
        let mut next = self.slots[current as usize].next;
        while self.slots[next as usize].next != NONE {
            current = next;
            next = self.slots[current as usize].next;
        }

        self.slots[current as usize].next = NONE;
        next
    }

    /// Link a detached slot in as the new head.
    pub fn add_as_head(&mut self, index: u8) {
        self.slots[index as usize].next = self.head;
        self.head = index;
    }

    /// Number of slots currently holding a block.
    pub fn resident(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.block != INVALID_BLOCK)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_order<const N: usize>(cache: &BlockCache<N>) -> Vec<u8> {
        let mut order = Vec::new();
        let mut current = cache.head;
        while current != NONE {
            order.push(current);
            current = cache.slots[current as usize].next;
        }
        order
    }

    #[test]
    fn reset_builds_full_chain() {
        let cache: BlockCache<4> = BlockCache::new();
        assert_eq!(chain_order(&cache), vec![0, 1, 2, 3]);
        assert_eq!(cache.resident(), 0);
    }

    #[test]
    fn lookup_finds_stamped_block() {
        let mut cache: BlockCache<2> = BlockCache::new();
        cache.slot_mut(1).block = 42;
        assert_eq!(cache.lookup(42), Some(1));
        assert_eq!(cache.lookup(7), None);
    }

    #[test]
    fn move_to_head_from_middle_and_tail() {
        let mut cache: BlockCache<3> = BlockCache::new();
        cache.move_to_head(1).unwrap();
        assert_eq!(chain_order(&cache), vec![1, 0, 2]);
        cache.move_to_head(2).unwrap();
        assert_eq!(chain_order(&cache), vec![2, 1, 0]);
        // already at head: no-op
        cache.move_to_head(2).unwrap();
        assert_eq!(chain_order(&cache), vec![2, 1, 0]);
    }

    #[test]
    fn remove_least_used_takes_tail() {
        let mut cache: BlockCache<3> = BlockCache::new();
        assert_eq!(cache.remove_least_used(), 2);
        assert_eq!(chain_order(&cache), vec![0, 1]);
        cache.add_as_head(2);
        assert_eq!(chain_order(&cache), vec![2, 0, 1]);
    }

    #[test]
    fn remove_from_single_slot_chain_empties_head() {
        let mut cache: BlockCache<1> = BlockCache::new();
        assert_eq!(cache.remove_least_used(), 0);
        assert_eq!(chain_order(&cache), Vec::<u8>::new());
        cache.add_as_head(0);
        assert_eq!(chain_order(&cache), vec![0]);
    }
}
