use std::io::{self, Write};

use log::{debug, warn};

use crate::store::RecordHandle;

use super::{
    arena::NodeArena,
    node::{LeafPointer, NodeId, PointerEntry},
};

/// B+ tree over the indexed attribute, mapping each key to one record
/// handle or to an overflow chain of handles when the key repeats.
///
/// Leaves hold unique keys only. The last pointer slot of a leaf links to
/// its right sibling, so a range scan descends once and then walks
/// sideways. All nodes live in a slot arena and refer to each other by
/// slot id, including the parent back-links used for ancestor repair.
pub struct BPlusTree {
    arena: NodeArena,
    root: NodeId,
    height: usize,
    max_keys: usize,
    num_nodes: usize,
    num_overflow_nodes: usize,
    num_index_accessed: usize,
    num_overflow_accessed: usize,
    num_nodes_deleted: usize,
    num_overflow_deleted: usize,
}

impl BPlusTree {
    pub fn new(block_size: usize) -> Self {
        let mut tree = BPlusTree {
            arena: NodeArena::new(block_size),
            root: NodeId(0),
            height: 0,
            max_keys: 0,
            num_nodes: 0,
            num_overflow_nodes: 0,
            num_index_accessed: 0,
            num_overflow_accessed: 0,
            num_nodes_deleted: 0,
            num_overflow_deleted: 0,
        };
        tree.max_keys = tree.arena.max_keys();
        tree.root = tree.alloc_node(true, false);
        tree
    }

    fn alloc_node(&mut self, is_leaf: bool, is_overflow: bool) -> NodeId {
        if is_overflow {
            self.num_overflow_nodes += 1;
        } else {
            self.num_nodes += 1;
        }
        self.arena.alloc(is_leaf)
    }

    fn free_node(&mut self, id: NodeId, is_overflow: bool) {
        if is_overflow {
            self.num_overflow_nodes -= 1;
            self.num_overflow_deleted += 1;
        } else {
            self.num_nodes -= 1;
            self.num_nodes_deleted += 1;
        }
        self.arena.release(id);
    }

    fn min_keys(&self, is_leaf: bool) -> usize {
        if is_leaf {
            (self.max_keys + 1) / 2
        } else {
            self.max_keys / 2
        }
    }

    /// Descends from the root to the leaf whose key range covers `key`,
    /// counting every node visited.
    fn find_leaf(&mut self, key: u32) -> NodeId {
        let mut current = self.root;
        loop {
            self.num_index_accessed += 1;
            let node = self.arena.node(current);
            if node.is_leaf() {
                return current;
            }
            let num_keys = node.num_keys();
            let mut next = node.child(num_keys);
            for i in 0..num_keys {
                if key < node.key(i) {
                    next = node.child(i);
                    break;
                }
            }
            current = next;
        }
    }

    /// Every handle whose key lies in `[lo, hi]`, in ascending key order.
    /// Resets the per-operation access counters first.
    pub fn find(&mut self, lo: u32, hi: u32) -> Vec<RecordHandle> {
        self.num_index_accessed = 0;
        self.num_overflow_accessed = 0;

        let mut results = Vec::new();
        let mut current = self.find_leaf(lo);
        loop {
            let node = self.arena.node(current);
            let num_keys = node.num_keys();
            for i in 0..num_keys {
                let key = node.key(i);
                if key > hi {
                    return results;
                }
                if key < lo {
                    continue;
                }
                match node.leaf_pointer(i) {
                    LeafPointer::Record(handle) => results.push(handle),
                    LeafPointer::Chain(head) => {
                        let mut chain = Some(head);
                        while let Some(id) = chain {
                            self.num_overflow_accessed += 1;
                            let overflow = self.arena.node(id);
                            for j in 0..overflow.num_keys() {
                                match overflow.leaf_pointer(j) {
                                    LeafPointer::Record(handle) => results.push(handle),
                                    LeafPointer::Chain(_) => {
                                        unreachable!("overflow nodes hold record handles only")
                                    }
                                }
                            }
                            chain = overflow.next();
                        }
                    }
                }
            }
            match node.next() {
                Some(next) => current = next,
                None => return results,
            }
        }
    }

    pub fn insert(&mut self, key: u32, handle: RecordHandle) {
        let leaf = self.find_leaf(key);

        let duplicate = {
            let node = self.arena.node(leaf);
            (0..node.num_keys())
                .find(|&i| node.key(i) == key)
                .map(|i| (i, node.leaf_pointer(i)))
        };
        if let Some((position, pointer)) = duplicate {
            match pointer {
                LeafPointer::Chain(head) => self.append_to_chain(head, key, handle),
                LeafPointer::Record(existing) => {
                    // First duplicate: both the old and the new handle move
                    // into a fresh overflow node behind the leaf slot.
                    let chain = self.alloc_node(true, true);
                    {
                        let mut node = self.arena.node_mut(chain);
                        node.set_key(0, key);
                        node.set_pointer(0, PointerEntry::record(existing));
                        node.set_key(1, key);
                        node.set_pointer(1, PointerEntry::record(handle));
                        node.set_num_keys(2);
                    }
                    self.arena
                        .node_mut(leaf)
                        .set_pointer(position, PointerEntry::node(chain));
                }
            }
            return;
        }

        let num_keys = self.arena.node(leaf).num_keys();
        if num_keys == self.max_keys {
            self.split_leaf(leaf, key, PointerEntry::record(handle));
            return;
        }

        let mut node = self.arena.node_mut(leaf);
        let mut position = num_keys;
        for i in 0..num_keys {
            if key < node.key(i) {
                position = i;
                break;
            }
        }
        for j in (position..num_keys).rev() {
            let k = node.key(j);
            let p = node.pointer(j);
            node.set_key(j + 1, k);
            node.set_pointer(j + 1, p);
        }
        node.set_key(position, key);
        node.set_pointer(position, PointerEntry::record(handle));
        node.set_num_keys(num_keys + 1);
    }

    fn append_to_chain(&mut self, head: NodeId, key: u32, handle: RecordHandle) {
        let mut tail = head;
        while let Some(next) = self.arena.node(tail).next() {
            tail = next;
        }
        if self.arena.node(tail).num_keys() == self.max_keys {
            let fresh = self.alloc_node(true, true);
            self.arena.node_mut(tail).set_next(Some(fresh));
            tail = fresh;
        }
        let mut node = self.arena.node_mut(tail);
        let position = node.num_keys();
        node.set_key(position, key);
        node.set_pointer(position, PointerEntry::record(handle));
        node.set_num_keys(position + 1);
    }

    fn split_leaf(&mut self, leaf: NodeId, key: u32, entry: PointerEntry) {
        let (mut staged, old_next, parent) = {
            let node = self.arena.node(leaf);
            let staged: Vec<(u32, PointerEntry)> = (0..self.max_keys)
                .map(|i| (node.key(i), node.pointer(i)))
                .collect();
            (staged, node.next(), node.parent())
        };
        let position = staged
            .iter()
            .position(|&(k, _)| key < k)
            .unwrap_or(staged.len());
        staged.insert(position, (key, entry));

        // ceil((n + 1) / 2) entries stay left, the rest move right.
        let num_left = (self.max_keys + 2) / 2;
        let right = self.alloc_node(true, false);

        {
            let mut node = self.arena.node_mut(leaf);
            for (i, &(k, p)) in staged[..num_left].iter().enumerate() {
                node.set_key(i, k);
                node.set_pointer(i, p);
            }
            node.set_num_keys(num_left);
            node.set_next(Some(right));
        }
        {
            let mut node = self.arena.node_mut(right);
            for (i, &(k, p)) in staged[num_left..].iter().enumerate() {
                node.set_key(i, k);
                node.set_pointer(i, p);
            }
            node.set_num_keys(staged.len() - num_left);
            node.set_next(old_next);
        }

        let key_up = staged[num_left].0;
        debug!("leaf split, promoting key {}", key_up);
        self.promote(parent, right, key_up);
    }

    /// Registers `right` (the new node of a split) under `parent` with
    /// `key_up` as the separator, growing a new root when needed.
    fn promote(&mut self, parent: Option<NodeId>, right: NodeId, key_up: u32) {
        let parent = match parent {
            None => {
                let old_root = self.root;
                let new_root = self.alloc_node(false, false);
                {
                    let mut node = self.arena.node_mut(new_root);
                    node.set_key(0, key_up);
                    node.set_pointer(0, PointerEntry::node(old_root));
                    node.set_pointer(1, PointerEntry::node(right));
                    node.set_num_keys(1);
                }
                self.arena.node_mut(old_root).set_parent(Some(new_root));
                self.arena.node_mut(right).set_parent(Some(new_root));
                self.root = new_root;
                self.height += 1;
                return;
            }
            Some(parent) => parent,
        };

        let num_keys = self.arena.node(parent).num_keys();
        if num_keys == self.max_keys {
            self.split_internal(parent, key_up, right);
            return;
        }

        {
            let mut node = self.arena.node_mut(parent);
            let mut position = num_keys;
            for i in 0..num_keys {
                if key_up < node.key(i) {
                    position = i;
                    break;
                }
            }
            for j in (position..num_keys).rev() {
                let k = node.key(j);
                node.set_key(j + 1, k);
                let p = node.pointer(j + 1);
                node.set_pointer(j + 2, p);
            }
            node.set_key(position, key_up);
            node.set_pointer(position + 1, PointerEntry::node(right));
            node.set_num_keys(num_keys + 1);
        }
        self.arena.node_mut(right).set_parent(Some(parent));
    }

    fn split_internal(&mut self, left: NodeId, new_key: u32, new_child: NodeId) {
        let (mut keys, mut pointers, parent) = {
            let node = self.arena.node(left);
            let keys: Vec<u32> = (0..self.max_keys).map(|i| node.key(i)).collect();
            let pointers: Vec<PointerEntry> =
                (0..=self.max_keys).map(|i| node.pointer(i)).collect();
            (keys, pointers, node.parent())
        };
        let position = keys.iter().position(|&k| new_key < k).unwrap_or(keys.len());
        keys.insert(position, new_key);
        pointers.insert(position + 1, PointerEntry::node(new_child));

        // The key at ceil(n / 2) moves up as the new separator; it is
        // extracted, not copied.
        let num_left = (self.max_keys + 1) / 2;
        let separator = keys[num_left];
        let right = self.alloc_node(false, false);

        {
            let mut node = self.arena.node_mut(left);
            for (i, &k) in keys[..num_left].iter().enumerate() {
                node.set_key(i, k);
            }
            for (i, &p) in pointers[..=num_left].iter().enumerate() {
                node.set_pointer(i, p);
            }
            node.set_num_keys(num_left);
        }
        {
            let mut node = self.arena.node_mut(right);
            for (i, &k) in keys[num_left + 1..].iter().enumerate() {
                node.set_key(i, k);
            }
            for (i, &p) in pointers[num_left + 1..].iter().enumerate() {
                node.set_pointer(i, p);
            }
            node.set_num_keys(keys.len() - num_left - 1);
        }
        for &p in &pointers[..=num_left] {
            self.arena
                .node_mut(NodeId(p.addr as usize))
                .set_parent(Some(left));
        }
        for &p in &pointers[num_left + 1..] {
            self.arena
                .node_mut(NodeId(p.addr as usize))
                .set_parent(Some(right));
        }

        debug!("internal split, promoting separator {}", separator);
        self.promote(parent, right, separator);
    }

    /// Removes `key` and every handle behind it from the index. Returns
    /// false (with a warning) when the key is not present.
    pub fn delete_key(&mut self, key: u32) -> bool {
        let leaf = self.find_leaf(key);
        self.delete_from(key, leaf)
    }

    fn delete_from(&mut self, key: u32, node_id: NodeId) -> bool {
        let (num_keys, is_leaf, position) = {
            let node = self.arena.node(node_id);
            let num_keys = node.num_keys();
            let position = (0..num_keys).find(|&i| node.key(i) == key);
            (num_keys, node.is_leaf(), position)
        };
        let position = match position {
            Some(position) => position,
            None => {
                warn!("key {} is not in the index", key);
                return false;
            }
        };

        // Tear down the overflow chain first when the entry has one.
        if is_leaf {
            if let LeafPointer::Chain(head) = self.arena.node(node_id).leaf_pointer(position) {
                let mut chain = Some(head);
                while let Some(id) = chain {
                    chain = self.arena.node(id).next();
                    self.free_node(id, true);
                }
            }
        }

        {
            let mut node = self.arena.node_mut(node_id);
            if is_leaf {
                for j in position + 1..num_keys {
                    let k = node.key(j);
                    let p = node.pointer(j);
                    node.set_key(j - 1, k);
                    node.set_pointer(j - 1, p);
                }
            } else {
                // Key j pairs with pointer j + 1 here.
                for j in position + 1..num_keys {
                    let k = node.key(j);
                    node.set_key(j - 1, k);
                    let p = node.pointer(j + 1);
                    node.set_pointer(j, p);
                }
            }
            node.set_num_keys(num_keys - 1);
        }
        let num_keys = num_keys - 1;

        // The removed key may survive as a separator in an ancestor when
        // it was this node's minimum.
        if position == 0 && num_keys > 0 {
            self.repair_ancestors(key, node_id);
        }

        if node_id == self.root {
            if !is_leaf && num_keys == 0 {
                self.collapse_root();
            }
            return true;
        }

        if num_keys < self.min_keys(is_leaf) {
            self.rebalance(node_id, is_leaf);
        }
        true
    }

    /// Rewrites `key` to this node's new minimum in the first ancestor
    /// that still carries it as a separator.
    fn repair_ancestors(&mut self, key: u32, node_id: NodeId) {
        let node = self.arena.node(node_id);
        let replacement = node.key(0);
        let mut current = node.parent();
        while let Some(ancestor) = current {
            let node = self.arena.node(ancestor);
            let found = (0..node.num_keys()).find(|&i| node.key(i) == key);
            let parent = node.parent();
            if let Some(i) = found {
                self.arena.node_mut(ancestor).set_key(i, replacement);
                return;
            }
            current = parent;
        }
    }

    fn rebalance(&mut self, node_id: NodeId, is_leaf: bool) {
        let parent = match self.arena.node(node_id).parent() {
            Some(parent) => parent,
            None => return,
        };
        let parent_keys = self.arena.node(parent).num_keys();
        let position = {
            let node = self.arena.node(parent);
            (0..=parent_keys)
                .find(|&i| node.child(i) == node_id)
                .expect("underflowed node not registered in its parent")
        };
        let min_keys = self.min_keys(is_leaf);

        // A left sibling that can spare a key wins over everything else.
        if position > 0 {
            let sibling = self.arena.node(parent).child(position - 1);
            if self.arena.node(sibling).num_keys() - 1 >= min_keys {
                self.borrow_from_left(node_id, sibling, parent, position, is_leaf);
                return;
            }
        }
        if position < parent_keys {
            let sibling = self.arena.node(parent).child(position + 1);
            if self.arena.node(sibling).num_keys() - 1 >= min_keys {
                self.borrow_from_right(node_id, sibling, parent, position, is_leaf);
                return;
            }
        }
        if position > 0 {
            let sibling = self.arena.node(parent).child(position - 1);
            self.merge(sibling, node_id, parent, position - 1);
        } else {
            let sibling = self.arena.node(parent).child(position + 1);
            self.merge(node_id, sibling, parent, position);
        }
    }

    fn borrow_from_left(
        &mut self,
        node_id: NodeId,
        sibling: NodeId,
        parent: NodeId,
        position: usize,
        is_leaf: bool,
    ) {
        let sibling_keys = self.arena.node(sibling).num_keys();
        let num_keys = self.arena.node(node_id).num_keys();

        if is_leaf {
            let borrowed_key = self.arena.node(sibling).key(sibling_keys - 1);
            let borrowed_ptr = self.arena.node(sibling).pointer(sibling_keys - 1);
            {
                let mut node = self.arena.node_mut(node_id);
                for j in (0..num_keys).rev() {
                    let k = node.key(j);
                    let p = node.pointer(j);
                    node.set_key(j + 1, k);
                    node.set_pointer(j + 1, p);
                }
                node.set_key(0, borrowed_key);
                node.set_pointer(0, borrowed_ptr);
                node.set_num_keys(num_keys + 1);
            }
            self.arena.node_mut(sibling).set_num_keys(sibling_keys - 1);
            self.arena.node_mut(parent).set_key(position - 1, borrowed_key);
        } else {
            // Rotate through the parent: the separator comes down in
            // front of our keys, the sibling's boundary key goes up.
            let separator = self.arena.node(parent).key(position - 1);
            let boundary_key = self.arena.node(sibling).key(sibling_keys - 1);
            let moved_child = self.arena.node(sibling).pointer(sibling_keys);
            {
                let mut node = self.arena.node_mut(node_id);
                for j in (0..num_keys).rev() {
                    let k = node.key(j);
                    node.set_key(j + 1, k);
                }
                for j in (0..=num_keys).rev() {
                    let p = node.pointer(j);
                    node.set_pointer(j + 1, p);
                }
                node.set_key(0, separator);
                node.set_pointer(0, moved_child);
                node.set_num_keys(num_keys + 1);
            }
            self.arena.node_mut(sibling).set_num_keys(sibling_keys - 1);
            self.arena.node_mut(parent).set_key(position - 1, boundary_key);
            self.arena
                .node_mut(NodeId(moved_child.addr as usize))
                .set_parent(Some(node_id));
        }
    }

    fn borrow_from_right(
        &mut self,
        node_id: NodeId,
        sibling: NodeId,
        parent: NodeId,
        position: usize,
        is_leaf: bool,
    ) {
        let sibling_keys = self.arena.node(sibling).num_keys();
        let num_keys = self.arena.node(node_id).num_keys();

        if is_leaf {
            let borrowed_key = self.arena.node(sibling).key(0);
            let borrowed_ptr = self.arena.node(sibling).pointer(0);
            {
                let mut node = self.arena.node_mut(node_id);
                node.set_key(num_keys, borrowed_key);
                node.set_pointer(num_keys, borrowed_ptr);
                node.set_num_keys(num_keys + 1);
            }
            {
                let mut node = self.arena.node_mut(sibling);
                for j in 1..sibling_keys {
                    let k = node.key(j);
                    let p = node.pointer(j);
                    node.set_key(j - 1, k);
                    node.set_pointer(j - 1, p);
                }
                node.set_num_keys(sibling_keys - 1);
            }
            let new_first = self.arena.node(sibling).key(0);
            self.arena.node_mut(parent).set_key(position, new_first);
        } else {
            let separator = self.arena.node(parent).key(position);
            let boundary_key = self.arena.node(sibling).key(0);
            let moved_child = self.arena.node(sibling).pointer(0);
            {
                let mut node = self.arena.node_mut(node_id);
                node.set_key(num_keys, separator);
                node.set_pointer(num_keys + 1, moved_child);
                node.set_num_keys(num_keys + 1);
            }
            {
                let mut node = self.arena.node_mut(sibling);
                for j in 1..sibling_keys {
                    let k = node.key(j);
                    node.set_key(j - 1, k);
                }
                for j in 1..=sibling_keys {
                    let p = node.pointer(j);
                    node.set_pointer(j - 1, p);
                }
                node.set_num_keys(sibling_keys - 1);
            }
            self.arena.node_mut(parent).set_key(position, boundary_key);
            self.arena
                .node_mut(NodeId(moved_child.addr as usize))
                .set_parent(Some(node_id));
        }
    }

    /// Folds `right` into `left` and recursively deletes the separator
    /// between them from the parent. For leaves the separator equals the
    /// right node's smallest key.
    fn merge(&mut self, left: NodeId, right: NodeId, parent: NodeId, separator_index: usize) {
        let separator = self.arena.node(parent).key(separator_index);
        let is_leaf = self.arena.node(left).is_leaf();
        let left_keys = self.arena.node(left).num_keys();

        let (right_keys, right_pointers, right_next) = {
            let node = self.arena.node(right);
            let num_keys = node.num_keys();
            let keys: Vec<u32> = (0..num_keys).map(|i| node.key(i)).collect();
            let num_pointers = if is_leaf { num_keys } else { num_keys + 1 };
            let pointers: Vec<PointerEntry> =
                (0..num_pointers).map(|i| node.pointer(i)).collect();
            (keys, pointers, node.next())
        };

        if is_leaf {
            let mut node = self.arena.node_mut(left);
            for (i, (&k, &p)) in right_keys.iter().zip(right_pointers.iter()).enumerate() {
                node.set_key(left_keys + i, k);
                node.set_pointer(left_keys + i, p);
            }
            node.set_num_keys(left_keys + right_keys.len());
            node.set_next(right_next);
        } else {
            {
                let mut node = self.arena.node_mut(left);
                node.set_key(left_keys, separator);
                for (i, &k) in right_keys.iter().enumerate() {
                    node.set_key(left_keys + 1 + i, k);
                }
                for (i, &p) in right_pointers.iter().enumerate() {
                    node.set_pointer(left_keys + 1 + i, p);
                }
                node.set_num_keys(left_keys + 1 + right_keys.len());
            }
            for &p in &right_pointers {
                self.arena
                    .node_mut(NodeId(p.addr as usize))
                    .set_parent(Some(left));
            }
        }

        self.free_node(right, false);
        debug!("merged nodes, removing separator {} from parent", separator);
        self.delete_from(separator, parent);
    }

    fn collapse_root(&mut self) {
        let old_root = self.root;
        let new_root = self.arena.node(old_root).child(0);
        self.free_node(old_root, false);
        self.arena.node_mut(new_root).set_parent(None);
        self.root = new_root;
        self.height -= 1;
        debug!("root collapsed, height is now {}", self.height);
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn max_keys(&self) -> usize {
        self.max_keys
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn num_overflow_nodes(&self) -> usize {
        self.num_overflow_nodes
    }

    pub fn num_index_accessed(&self) -> usize {
        self.num_index_accessed
    }

    pub fn num_overflow_accessed(&self) -> usize {
        self.num_overflow_accessed
    }

    pub fn num_nodes_deleted(&self) -> usize {
        self.num_nodes_deleted
    }

    pub fn num_overflow_deleted(&self) -> usize {
        self.num_overflow_deleted
    }

    pub fn root_keys(&self) -> Vec<u32> {
        let node = self.arena.node(self.root);
        (0..node.num_keys()).map(|i| node.key(i)).collect()
    }

    /// Writes the keys of every node level by level, root first.
    pub fn dump(&self, writer: &mut impl Write) -> io::Result<()> {
        let mut level = vec![self.root];
        while !level.is_empty() {
            let mut next_level = Vec::new();
            let mut line = String::new();
            for &id in &level {
                let node = self.arena.node(id);
                let keys: Vec<String> = (0..node.num_keys())
                    .map(|i| node.key(i).to_string())
                    .collect();
                line.push_str(&format!("[{}] ", keys.join(" ")));
                if !node.is_leaf() {
                    for i in 0..=node.num_keys() {
                        next_level.push(node.child(i));
                    }
                }
            }
            writeln!(writer, "{}", line.trim_end())?;
            level = next_level;
        }
        Ok(())
    }
}

#[cfg(test)]
impl BPlusTree {
    /// Asserts the structural invariants: bounded key counts, parent
    /// back-links, uniform leaf depth, sibling-chain completeness and
    /// globally ascending leaf keys.
    pub(crate) fn check_invariants(&self) {
        let mut leaves = Vec::new();
        self.check_node(self.root, 0, &mut leaves);

        let mut walked = Vec::new();
        let mut current = Some(self.leftmost_leaf());
        while let Some(id) = current {
            walked.push(id);
            current = self.arena.node(id).next();
        }
        assert_eq!(walked, leaves, "sibling chain disagrees with tree walk");

        let mut previous: Option<u32> = None;
        for &leaf in &leaves {
            let node = self.arena.node(leaf);
            for i in 0..node.num_keys() {
                let key = node.key(i);
                if let Some(previous) = previous {
                    assert!(previous < key, "leaf keys not ascending: {} then {}", previous, key);
                }
                previous = Some(key);
            }
        }

        assert_eq!(self.num_nodes, self.arena.num_live() - self.count_overflow_nodes());
    }

    fn check_node(&self, id: NodeId, depth: usize, leaves: &mut Vec<NodeId>) {
        let node = self.arena.node(id);
        let num_keys = node.num_keys();
        assert!(num_keys <= self.max_keys);
        if id != self.root {
            assert!(
                num_keys >= self.min_keys(node.is_leaf()),
                "node below minimum occupancy: {} keys",
                num_keys
            );
        }
        for i in 1..num_keys {
            assert!(node.key(i - 1) < node.key(i), "in-node keys not ascending");
        }
        if node.is_leaf() {
            assert_eq!(depth, self.height, "leaf depth disagrees with height");
            leaves.push(id);
        } else {
            for i in 0..=num_keys {
                let child = node.child(i);
                assert_eq!(
                    self.arena.node(child).parent(),
                    Some(id),
                    "child parent link broken"
                );
                self.check_node(child, depth + 1, leaves);
            }
        }
    }

    fn leftmost_leaf(&self) -> NodeId {
        let mut current = self.root;
        while !self.arena.node(current).is_leaf() {
            current = self.arena.node(current).child(0);
        }
        current
    }

    /// Every handle reachable from the leaves, overflow chains included.
    pub(crate) fn collect_handles(&self) -> Vec<RecordHandle> {
        let mut handles = Vec::new();
        let mut current = Some(self.leftmost_leaf());
        while let Some(id) = current {
            let node = self.arena.node(id);
            for i in 0..node.num_keys() {
                match node.leaf_pointer(i) {
                    LeafPointer::Record(handle) => handles.push(handle),
                    LeafPointer::Chain(head) => {
                        let mut chain = Some(head);
                        while let Some(chain_id) = chain {
                            let overflow = self.arena.node(chain_id);
                            for j in 0..overflow.num_keys() {
                                if let LeafPointer::Record(handle) = overflow.leaf_pointer(j) {
                                    handles.push(handle);
                                }
                            }
                            chain = overflow.next();
                        }
                    }
                }
            }
            current = node.next();
        }
        handles
    }

    fn count_overflow_nodes(&self) -> usize {
        let mut count = 0;
        let mut current = Some(self.leftmost_leaf());
        while let Some(id) = current {
            let node = self.arena.node(id);
            for i in 0..node.num_keys() {
                if let LeafPointer::Chain(head) = node.leaf_pointer(i) {
                    let mut chain = Some(head);
                    while let Some(chain_id) = chain {
                        count += 1;
                        chain = self.arena.node(chain_id).next();
                    }
                }
            }
            current = node.next();
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::BlockAddr;

    fn handle(n: usize) -> RecordHandle {
        RecordHandle {
            block: BlockAddr(n / 100),
            record_id: (n % 100) as u32 + 1,
        }
    }

    #[test]
    fn test_find_on_empty_tree() {
        let mut tree = BPlusTree::new(200);
        assert!(tree.find(0, u32::MAX).is_empty());
        assert_eq!(tree.num_nodes(), 1);
        assert_eq!(tree.height(), 0);
    }

    #[test]
    fn test_single_leaf_range() {
        let mut tree = BPlusTree::new(200);
        for (i, key) in [5, 15, 25, 35, 45, 55, 65, 75].into_iter().enumerate() {
            tree.insert(key, handle(i));
        }

        let results = tree.find(0, 100);
        assert_eq!(results, (0..8).map(handle).collect::<Vec<_>>());
        assert_eq!(tree.find(25, 45).len(), 3);
        assert_eq!(tree.find(26, 34).len(), 0);
        assert_eq!(tree.find(55, 55), vec![handle(5)]);
        tree.check_invariants();
    }

    #[test]
    fn test_duplicates_promote_into_chain() {
        let mut tree = BPlusTree::new(200);
        for i in 0..4 {
            tree.insert(10, handle(i));
        }

        assert_eq!(tree.root_keys(), vec![10]);
        assert_eq!(tree.num_nodes(), 1);
        assert_eq!(tree.num_overflow_nodes(), 1);

        let results = tree.find(10, 10);
        assert_eq!(results.len(), 4);
        assert_eq!(results, (0..4).map(handle).collect::<Vec<_>>());
        assert_eq!(tree.num_overflow_accessed(), 1);
        tree.check_invariants();
    }

    #[test]
    fn test_long_chain_spans_overflow_nodes() {
        let mut tree = BPlusTree::new(200);
        for i in 0..20 {
            tree.insert(10, handle(i));
        }

        // All 20 handles live in the chain; 15 fit per overflow node.
        assert_eq!(tree.num_overflow_nodes(), 2);
        assert_eq!(tree.find(10, 10).len(), 20);
        assert_eq!(tree.num_overflow_accessed(), 2);

        assert!(tree.delete_key(10));
        assert_eq!(tree.num_overflow_nodes(), 0);
        assert_eq!(tree.num_overflow_deleted(), 2);
        assert!(tree.find(10, 10).is_empty());
        tree.check_invariants();
    }

    #[test]
    fn test_leaf_split_creates_root() {
        let mut tree = BPlusTree::new(200);
        assert_eq!(tree.max_keys(), 15);
        for i in 1..=16 {
            tree.insert(i * 10, handle(i as usize));
        }

        // ceil(16 / 2) = 8 keys stay left; the 9th smallest moves right
        // and is promoted.
        assert_eq!(tree.height(), 1);
        assert_eq!(tree.num_nodes(), 3);
        assert_eq!(tree.root_keys(), vec![90]);
        assert_eq!(tree.find(0, 1000).len(), 16);
        tree.check_invariants();
    }

    #[test]
    fn test_range_walks_sibling_chain() {
        let mut tree = BPlusTree::new(120);
        assert_eq!(tree.max_keys(), 8);
        for i in 1..=40 {
            tree.insert(i, handle(i as usize));
        }
        tree.check_invariants();

        let results = tree.find(10, 30);
        assert_eq!(results.len(), 21);
        assert_eq!(results[0], handle(10));
        assert_eq!(results[20], handle(30));
    }

    #[test]
    fn test_delete_repairs_ancestor_separator() {
        let mut tree = BPlusTree::new(120);
        for i in 1..=11 {
            tree.insert(i * 10, handle(i as usize));
        }
        assert_eq!(tree.root_keys(), vec![60]);

        // 80 is not a minimum; no repair, no rebalance.
        assert!(tree.delete_key(80));
        assert_eq!(tree.root_keys(), vec![60]);
        tree.check_invariants();

        // 60 is the right leaf's minimum and the root separator.
        assert!(tree.delete_key(60));
        assert_eq!(tree.root_keys(), vec![70]);
        assert_eq!(tree.find(0, 1000).len(), 9);
        tree.check_invariants();
    }

    #[test]
    fn test_delete_borrows_from_left_sibling() {
        let mut tree = BPlusTree::new(120);
        for i in 1..=9 {
            tree.insert(i * 10, handle(i as usize));
        }
        // Left leaf holds 5 keys, right leaf 4 (the minimum).
        assert_eq!(tree.root_keys(), vec![60]);

        assert!(tree.delete_key(70));
        // The right leaf underflowed and took 50 from the left sibling.
        assert_eq!(tree.root_keys(), vec![50]);
        assert_eq!(tree.find(0, 1000).len(), 8);
        tree.check_invariants();
    }

    #[test]
    fn test_delete_merges_and_collapses_root() {
        let mut tree = BPlusTree::new(120);
        for i in 1..=9 {
            tree.insert(i * 10, handle(i as usize));
        }
        assert_eq!(tree.height(), 1);

        // Two deletes leave 4 + 3 keys with nothing to borrow: the
        // leaves merge and the root collapses away.
        assert!(tree.delete_key(10));
        assert!(tree.delete_key(20));
        assert_eq!(tree.height(), 0);
        assert_eq!(tree.num_nodes(), 1);
        assert_eq!(tree.num_nodes_deleted(), 2);
        assert_eq!(tree.find(0, 1000).len(), 7);
        tree.check_invariants();
    }

    #[test]
    fn test_delete_missing_key_is_noop() {
        let mut tree = BPlusTree::new(200);
        tree.insert(10, handle(1));
        assert!(!tree.delete_key(11));
        assert_eq!(tree.find(0, 100).len(), 1);
        tree.check_invariants();
    }

    #[test]
    fn test_delete_everything_descending() {
        let mut tree = BPlusTree::new(120);
        for i in 1..=50 {
            tree.insert(i * 3, handle(i as usize));
        }
        assert!(tree.height() >= 2);
        tree.check_invariants();

        for i in (1..=50).rev() {
            assert!(tree.delete_key(i * 3));
            tree.check_invariants();
        }

        // A single empty root leaf remains and every other node has been
        // freed.
        assert_eq!(tree.height(), 0);
        assert_eq!(tree.num_nodes(), 1);
        assert_eq!(tree.num_overflow_nodes(), 0);
        assert!(tree.find(0, u32::MAX).is_empty());
    }

    #[test]
    fn test_delete_everything_ascending() {
        let mut tree = BPlusTree::new(120);
        for i in 1..=50 {
            tree.insert(i * 3, handle(i as usize));
        }

        for i in 1..=50 {
            assert!(tree.delete_key(i * 3));
            tree.check_invariants();
        }
        assert_eq!(tree.num_nodes(), 1);
        assert_eq!(tree.height(), 0);
    }

    #[test]
    fn test_insertion_order_does_not_change_results() {
        use rand::seq::SliceRandom;

        let keys: Vec<u32> = (1..=60).map(|i| i * 7 % 61).collect();
        let mut reference = BPlusTree::new(120);
        for (i, &key) in keys.iter().enumerate() {
            reference.insert(key, handle(i));
        }
        let expected = reference.find(0, u32::MAX);

        let mut rng = rand::thread_rng();
        for _ in 0..5 {
            let mut shuffled: Vec<(usize, u32)> = keys.iter().copied().enumerate().collect();
            shuffled.shuffle(&mut rng);
            let mut tree = BPlusTree::new(120);
            for &(i, key) in &shuffled {
                tree.insert(key, handle(i));
            }
            tree.check_invariants();
            assert_eq!(tree.find(0, u32::MAX), expected);
        }
    }

    #[test]
    fn test_dump_prints_every_level() {
        let mut tree = BPlusTree::new(120);
        for i in 1..=20 {
            tree.insert(i, handle(i as usize));
        }
        let mut output = Vec::new();
        tree.dump(&mut output).unwrap();
        let text = String::from_utf8(output).unwrap();
        assert_eq!(text.lines().count(), tree.height() + 1);
        assert!(text.contains('['));
    }
}
