//! B+ tree node layout over one block-sized page.
//!
//! The page starts with a 12 byte header:
//! - `num_keys` (4 bytes)
//! - `parent` (4 bytes): arena slot of the parent node, -1 at the root
//! - `is_leaf` (1 byte, 3 bytes padding)
//!
//! After the header comes the pointer array of `MAX_KEYS + 1` entries of
//! 8 bytes each, then the key array of `MAX_KEYS` 4-byte keys.
//!
//! In a leaf, `pointer[i]` for `i < num_keys` is either a record handle
//! or (with record id -1) the head of an overflow chain, and
//! `pointer[MAX_KEYS]` is the right sibling. Overflow nodes share the
//! leaf layout and use `pointer[MAX_KEYS]` as the chain link. In a
//! non-leaf node `pointer[i]` is the arena slot of a child.

use crate::{disk::BlockAddr, page::Page, store::RecordHandle};

const NUM_KEYS_OFFSET: usize = 0;
const PARENT_OFFSET: usize = 4;
const IS_LEAF_OFFSET: usize = 8;
const HEADER_SIZE: usize = 12;

pub const POINTER_SIZE: usize = 8;
pub const KEY_SIZE: usize = 4;

/// The `n` of the tree: how many keys one node holds.
pub fn max_keys(block_size: usize) -> usize {
    (block_size - HEADER_SIZE - POINTER_SIZE) / (POINTER_SIZE + KEY_SIZE)
}

/// Arena slot of a node. Slot ids are never dangling while the node is
/// reachable from the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

/// Raw 8-byte pointer entry: a block or slot address plus a record id.
/// Record id -1 tags the address as an overflow-chain head (or, for child
/// and sibling entries, simply "not a record").
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct PointerEntry {
    pub addr: i32,
    pub record_id: i32,
}

pub(crate) const NULL_POINTER: PointerEntry = PointerEntry {
    addr: -1,
    record_id: -1,
};

impl PointerEntry {
    pub fn record(handle: RecordHandle) -> Self {
        PointerEntry {
            addr: handle.block.0 as i32,
            record_id: handle.record_id as i32,
        }
    }

    pub fn node(id: NodeId) -> Self {
        PointerEntry {
            addr: id.0 as i32,
            record_id: -1,
        }
    }
}

/// What a leaf (or overflow) slot points at, with the sentinel decoded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum LeafPointer {
    Record(RecordHandle),
    Chain(NodeId),
}

pub(crate) struct NodeRef<'a> {
    page: &'a Page,
    max_keys: usize,
}

impl<'a> NodeRef<'a> {
    pub fn new(page: &'a Page, max_keys: usize) -> Self {
        NodeRef { page, max_keys }
    }

    pub fn num_keys(&self) -> usize {
        self.page.get_u32(NUM_KEYS_OFFSET) as usize
    }

    pub fn is_leaf(&self) -> bool {
        self.page.get_u8(IS_LEAF_OFFSET) != 0
    }

    pub fn parent(&self) -> Option<NodeId> {
        let raw = self.page.get_i32(PARENT_OFFSET);
        (raw >= 0).then(|| NodeId(raw as usize))
    }

    pub fn key(&self, i: usize) -> u32 {
        self.page.get_u32(key_offset(self.max_keys, i))
    }

    pub fn pointer(&self, i: usize) -> PointerEntry {
        let offset = pointer_offset(i);
        PointerEntry {
            addr: self.page.get_i32(offset),
            record_id: self.page.get_i32(offset + 4),
        }
    }

    pub fn leaf_pointer(&self, i: usize) -> LeafPointer {
        let entry = self.pointer(i);
        if entry.record_id == -1 {
            LeafPointer::Chain(NodeId(entry.addr as usize))
        } else {
            LeafPointer::Record(RecordHandle {
                block: BlockAddr(entry.addr as usize),
                record_id: entry.record_id as u32,
            })
        }
    }

    pub fn child(&self, i: usize) -> NodeId {
        NodeId(self.pointer(i).addr as usize)
    }

    /// Right sibling of a leaf, or the next node of an overflow chain.
    pub fn next(&self) -> Option<NodeId> {
        let raw = self.pointer(self.max_keys).addr;
        (raw >= 0).then(|| NodeId(raw as usize))
    }
}

pub(crate) struct NodeMut<'a> {
    page: &'a mut Page,
    max_keys: usize,
}

impl<'a> NodeMut<'a> {
    pub fn new(page: &'a mut Page, max_keys: usize) -> Self {
        NodeMut { page, max_keys }
    }

    pub fn as_ref(&self) -> NodeRef<'_> {
        NodeRef::new(self.page, self.max_keys)
    }

    pub fn num_keys(&self) -> usize {
        self.as_ref().num_keys()
    }

    pub fn key(&self, i: usize) -> u32 {
        self.as_ref().key(i)
    }

    pub fn pointer(&self, i: usize) -> PointerEntry {
        self.as_ref().pointer(i)
    }

    pub fn init(&mut self, is_leaf: bool) {
        self.page.reset();
        self.page.set_u8(IS_LEAF_OFFSET, is_leaf as u8);
        self.set_parent(None);
        self.set_pointer(self.max_keys, NULL_POINTER);
    }

    pub fn set_num_keys(&mut self, num_keys: usize) {
        self.page.set_u32(NUM_KEYS_OFFSET, num_keys as u32);
    }

    pub fn set_parent(&mut self, parent: Option<NodeId>) {
        let raw = parent.map(|id| id.0 as i32).unwrap_or(-1);
        self.page.set_i32(PARENT_OFFSET, raw);
    }

    pub fn set_key(&mut self, i: usize, key: u32) {
        self.page.set_u32(key_offset(self.max_keys, i), key);
    }

    pub fn set_pointer(&mut self, i: usize, entry: PointerEntry) {
        let offset = pointer_offset(i);
        self.page.set_i32(offset, entry.addr);
        self.page.set_i32(offset + 4, entry.record_id);
    }

    pub fn set_next(&mut self, next: Option<NodeId>) {
        let entry = next.map(PointerEntry::node).unwrap_or(NULL_POINTER);
        self.set_pointer(self.max_keys, entry);
    }
}

fn pointer_offset(i: usize) -> usize {
    HEADER_SIZE + i * POINTER_SIZE
}

fn key_offset(max_keys: usize, i: usize) -> usize {
    HEADER_SIZE + (max_keys + 1) * POINTER_SIZE + i * KEY_SIZE
}
