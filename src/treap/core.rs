use crate::treap::node::{Node, NodeId, SENTINEL};
use std::cmp::Ordering;

/// Policy governing how repeated insertions of an equal key are represented.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DuplicatePolicy {
    /// Each distinct key occupies exactly one node; re-insertion is a no-op.
    Ignore,
    /// Each distinct key occupies exactly one node carrying a multiplicity.
    Count,
    /// Each insertion creates a separate node; equal keys keep insertion
    /// order (new equal keys are placed after existing ones).
    Store,
}

/// The indexed BST core: an arena of nodes forming a plain, unbalanced
/// binary search tree augmented with subtree sizes.
///
/// Slot 0 is the sentinel; its left and right links mirror the current
/// root. All key-based operations take the comparator as an argument so the
/// core stays free of balancing, policy state, and aggregation callbacks.
#[derive(Clone)]
pub(crate) struct Core<T> {
    nodes: Vec<Node<T>>,
    free: Vec<NodeId>,
}

impl<T> Core<T> {
    pub(crate) fn new() -> Self {
        Core {
            nodes: vec![Node::sentinel()],
            free: Vec::new(),
        }
    }

    fn node(&self, id: NodeId) -> &Node<T> {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node<T> {
        &mut self.nodes[id.0]
    }

    pub(crate) fn root(&self) -> NodeId {
        self.node(SENTINEL).left
    }

    pub(crate) fn left(&self, id: NodeId) -> NodeId {
        self.node(id).left
    }

    pub(crate) fn right(&self, id: NodeId) -> NodeId {
        self.node(id).right
    }

    pub(crate) fn parent(&self, id: NodeId) -> NodeId {
        self.node(id).parent
    }

    pub(crate) fn size(&self, id: NodeId) -> usize {
        self.node(id).size
    }

    pub(crate) fn count(&self, id: NodeId) -> usize {
        self.node(id).count
    }

    pub(crate) fn priority(&self, id: NodeId) -> u32 {
        self.node(id).priority
    }

    pub(crate) fn set_priority(&mut self, id: NodeId, priority: u32) {
        self.node_mut(id).priority = priority;
    }

    pub(crate) fn value(&self, id: NodeId) -> &T {
        self.node(id).value.as_ref().expect("Error: missing node value.")
    }

    pub(crate) fn take_value(&mut self, id: NodeId) -> T {
        self.node_mut(id).value.take().expect("Error: missing node value.")
    }

    pub(crate) fn put_value(&mut self, id: NodeId, value: T) {
        self.node_mut(id).value = Some(value);
    }

    pub(crate) fn len(&self) -> usize {
        self.size(self.root())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.root() == SENTINEL
    }

    pub(crate) fn clear(&mut self) {
        self.nodes.truncate(1);
        self.nodes[SENTINEL.0] = Node::sentinel();
        self.free.clear();
    }

    fn alloc(&mut self, value: T, count: usize) -> NodeId {
        let node = Node::new(value, count);
        match self.free.pop() {
            Some(id) => {
                self.nodes[id.0] = node;
                id
            }
            None => {
                self.nodes.push(node);
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    fn release(&mut self, id: NodeId) {
        self.nodes[id.0].value = None;
        self.free.push(id);
    }

    fn set_root(&mut self, id: NodeId) {
        self.nodes[SENTINEL.0].left = id;
        self.nodes[SENTINEL.0].right = id;
        if id != SENTINEL {
            self.nodes[id.0].parent = SENTINEL;
        }
    }

    fn replace_child(&mut self, parent: NodeId, old: NodeId, new: NodeId) {
        if parent == SENTINEL {
            self.set_root(new);
        } else {
            if self.node(parent).left == old {
                self.node_mut(parent).left = new;
            } else {
                self.node_mut(parent).right = new;
            }
            if new != SENTINEL {
                self.node_mut(new).parent = parent;
            }
        }
    }

    fn update_size(&mut self, id: NodeId) {
        let Node { left, right, count, .. } = *self.node(id);
        self.node_mut(id).size = count + self.size(left) + self.size(right);
    }

    /// Applies a size delta to `id` and every node on its ownership chain.
    fn add_size_upward(&mut self, mut id: NodeId, delta: isize) {
        while id != SENTINEL {
            let size = self.node(id).size as isize + delta;
            self.node_mut(id).size = size as usize;
            id = self.node(id).parent;
        }
    }

    fn decrement(&mut self, id: NodeId, by: usize) {
        self.node_mut(id).count -= by;
        self.add_size_upward(id, -(by as isize));
    }

    /// Returns the first matching node in traversal order, or the sentinel
    /// if the key is absent. Descent continues left after a match so that
    /// duplicate runs are entered at their leftmost node.
    pub(crate) fn find<C>(&self, probe: &T, cmp: &C) -> NodeId
    where
        C: Fn(&T, &T) -> Ordering,
    {
        let mut cur = self.root();
        let mut hit = SENTINEL;
        while cur != SENTINEL {
            match cmp(self.value(cur), probe) {
                Ordering::Less => cur = self.right(cur),
                Ordering::Greater => cur = self.left(cur),
                Ordering::Equal => {
                    hit = cur;
                    cur = self.left(cur);
                }
            }
        }
        hit
    }

    /// Returns the first node not less than the probe, or the sentinel.
    pub(crate) fn lower_bound<C>(&self, probe: &T, cmp: &C) -> NodeId
    where
        C: Fn(&T, &T) -> Ordering,
    {
        let mut cur = self.root();
        let mut res = SENTINEL;
        while cur != SENTINEL {
            if cmp(self.value(cur), probe) == Ordering::Less {
                cur = self.right(cur);
            } else {
                res = cur;
                cur = self.left(cur);
            }
        }
        res
    }

    /// Returns the first node greater than the probe, or the sentinel.
    pub(crate) fn upper_bound<C>(&self, probe: &T, cmp: &C) -> NodeId
    where
        C: Fn(&T, &T) -> Ordering,
    {
        let mut cur = self.root();
        let mut res = SENTINEL;
        while cur != SENTINEL {
            if cmp(self.value(cur), probe) == Ordering::Greater {
                res = cur;
                cur = self.left(cur);
            } else {
                cur = self.right(cur);
            }
        }
        res
    }

    /// Number of entries strictly less than the probe, summed from
    /// `size(node) - size(node.right)` at every right turn.
    pub(crate) fn count_less<C>(&self, probe: &T, cmp: &C) -> usize
    where
        C: Fn(&T, &T) -> Ordering,
    {
        let mut cur = self.root();
        let mut acc = 0;
        while cur != SENTINEL {
            if cmp(self.value(cur), probe) == Ordering::Less {
                acc += self.size(cur) - self.size(self.right(cur));
                cur = self.right(cur);
            } else {
                cur = self.left(cur);
            }
        }
        acc
    }

    pub(crate) fn count_less_or_equal<C>(&self, probe: &T, cmp: &C) -> usize
    where
        C: Fn(&T, &T) -> Ordering,
    {
        let mut cur = self.root();
        let mut acc = 0;
        while cur != SENTINEL {
            if cmp(self.value(cur), probe) == Ordering::Greater {
                cur = self.left(cur);
            } else {
                acc += self.size(cur) - self.size(self.right(cur));
                cur = self.right(cur);
            }
        }
        acc
    }

    /// Select by rank: the node holding the zero-based `k`-th entry, where
    /// entries are multiplicity-weighted. Out-of-range ranks yield the
    /// sentinel.
    pub(crate) fn select(&self, mut k: usize) -> NodeId {
        let mut cur = self.root();
        while cur != SENTINEL {
            let left_size = self.size(self.left(cur));
            let count = self.count(cur);
            if k < left_size {
                cur = self.left(cur);
            } else if k < left_size + count {
                return cur;
            } else {
                k -= left_size + count;
                cur = self.right(cur);
            }
        }
        SENTINEL
    }

    /// The zero-based rank of the node's first entry; the sentinel ranks
    /// one past the last entry.
    pub(crate) fn rank(&self, id: NodeId) -> usize {
        if id == SENTINEL {
            return self.len();
        }
        let mut acc = self.size(self.left(id));
        let mut cur = id;
        while cur != SENTINEL {
            let p = self.parent(cur);
            if p != SENTINEL && self.right(p) == cur {
                acc += self.size(p) - self.size(self.right(p));
            }
            cur = p;
        }
        acc
    }

    /// Plain key-search insert. Returns the affected node and whether a new
    /// node was created, so the balancing layer can repair the heap
    /// invariant.
    pub(crate) fn insert<C>(
        &mut self,
        value: T,
        count: usize,
        policy: DuplicatePolicy,
        cmp: &C,
    ) -> (NodeId, bool)
    where
        C: Fn(&T, &T) -> Ordering,
    {
        if self.is_empty() {
            let id = self.alloc(value, count);
            self.set_root(id);
            return (id, true);
        }
        let mut cur = self.root();
        let (parent, go_left) = loop {
            match cmp(&value, self.value(cur)) {
                Ordering::Less => {
                    if self.left(cur) == SENTINEL {
                        break (cur, true);
                    }
                    cur = self.left(cur);
                }
                Ordering::Greater => {
                    if self.right(cur) == SENTINEL {
                        break (cur, false);
                    }
                    cur = self.right(cur);
                }
                Ordering::Equal => match policy {
                    DuplicatePolicy::Ignore => return (cur, false),
                    DuplicatePolicy::Count => {
                        self.node_mut(cur).count += count;
                        self.add_size_upward(cur, count as isize);
                        return (cur, false);
                    }
                    DuplicatePolicy::Store => {
                        if self.right(cur) == SENTINEL {
                            break (cur, false);
                        }
                        cur = self.right(cur);
                    }
                },
            }
        };
        let id = self.alloc(value, count);
        self.node_mut(id).parent = parent;
        if go_left {
            self.node_mut(parent).left = id;
        } else {
            self.node_mut(parent).right = id;
        }
        self.add_size_upward(parent, count as isize);
        (id, true)
    }

    /// Structural insert immediately before `at` in traversal order,
    /// without a key search. The caller is responsible for not violating
    /// sort order. `at == SENTINEL` inserts after the last element.
    pub(crate) fn insert_before(&mut self, at: NodeId, value: T, count: usize) -> NodeId {
        let (parent, go_left) = if at == SENTINEL {
            let last = self.last();
            (last, false)
        } else if self.left(at) == SENTINEL {
            (at, true)
        } else {
            (self.prev(at), false)
        };
        let id = self.alloc(value, count);
        if parent == SENTINEL {
            self.set_root(id);
        } else {
            self.node_mut(id).parent = parent;
            if go_left {
                self.node_mut(parent).left = id;
            } else {
                self.node_mut(parent).right = id;
            }
            self.add_size_upward(parent, count as isize);
        }
        id
    }

    /// Physically removes a node with at most one child by relinking its
    /// child (or the sentinel) to its parent. Returns the parent.
    fn splice(&mut self, id: NodeId) -> NodeId {
        let Node { left, right, parent, count, .. } = *self.node(id);
        debug_assert!(left == SENTINEL || right == SENTINEL);
        let child = if left != SENTINEL { left } else { right };
        self.replace_child(parent, id, child);
        self.add_size_upward(parent, -(count as isize));
        self.release(id);
        parent
    }

    /// Plain (unbalanced) erase of up to `count` multiplicity at `id`.
    ///
    /// A node with two children exchanges values with its in-order
    /// successor and the successor node is the one physically removed, so
    /// cursors referencing either value by identity are invalidated.
    /// Returns the node now holding the neighboring entry.
    pub(crate) fn remove_at(&mut self, id: NodeId, count: usize) -> NodeId {
        let own = self.count(id);
        if count < own {
            self.decrement(id, count);
            return id;
        }
        if self.left(id) != SENTINEL && self.right(id) != SENTINEL {
            let succ = self.next(id);
            self.add_size_upward(id, -(own as isize));
            self.node_mut(id).count = 0;
            let value = self.node_mut(succ).value.take();
            let succ_count = self.count(succ);
            self.node_mut(id).value = value;
            self.splice(succ);
            self.node_mut(id).count = succ_count;
            self.add_size_upward(id, succ_count as isize);
            id
        } else {
            let succ = self.next(id);
            self.splice(id);
            succ
        }
    }

    /// Single left rotation at `id`; the right child must exist. The
    /// rotated-up node inherits the rotated-down node's old size.
    pub(crate) fn rotate_left(&mut self, id: NodeId) -> NodeId {
        let up = self.right(id);
        debug_assert!(up != SENTINEL);
        let inner = self.left(up);
        let parent = self.parent(id);
        self.replace_child(parent, id, up);
        self.node_mut(up).left = id;
        self.node_mut(id).parent = up;
        self.node_mut(id).right = inner;
        if inner != SENTINEL {
            self.node_mut(inner).parent = id;
        }
        self.update_size(id);
        self.update_size(up);
        up
    }

    /// Single right rotation at `id`; the left child must exist.
    pub(crate) fn rotate_right(&mut self, id: NodeId) -> NodeId {
        let up = self.left(id);
        debug_assert!(up != SENTINEL);
        let inner = self.right(up);
        let parent = self.parent(id);
        self.replace_child(parent, id, up);
        self.node_mut(up).right = id;
        self.node_mut(id).parent = up;
        self.node_mut(id).left = inner;
        if inner != SENTINEL {
            self.node_mut(inner).parent = id;
        }
        self.update_size(id);
        self.update_size(up);
        up
    }

    pub(crate) fn first(&self) -> NodeId {
        let mut cur = self.root();
        while cur != SENTINEL && self.left(cur) != SENTINEL {
            cur = self.left(cur);
        }
        cur
    }

    pub(crate) fn last(&self) -> NodeId {
        let mut cur = self.root();
        while cur != SENTINEL && self.right(cur) != SENTINEL {
            cur = self.right(cur);
        }
        cur
    }

    /// In-order successor by pointer chasing; stepping past the last
    /// element yields the sentinel and stepping past the sentinel yields
    /// the first element.
    pub(crate) fn next(&self, id: NodeId) -> NodeId {
        if id == SENTINEL {
            return self.first();
        }
        if self.right(id) != SENTINEL {
            let mut cur = self.right(id);
            while self.left(cur) != SENTINEL {
                cur = self.left(cur);
            }
            cur
        } else {
            let mut cur = id;
            let mut p = self.parent(cur);
            while p != SENTINEL && self.right(p) == cur {
                cur = p;
                p = self.parent(cur);
            }
            p
        }
    }

    /// In-order predecessor, symmetric to [`next`](Core::next).
    pub(crate) fn prev(&self, id: NodeId) -> NodeId {
        if id == SENTINEL {
            return self.last();
        }
        if self.left(id) != SENTINEL {
            let mut cur = self.left(id);
            while self.right(cur) != SENTINEL {
                cur = self.right(cur);
            }
            cur
        } else {
            let mut cur = id;
            let mut p = self.parent(cur);
            while p != SENTINEL && self.left(p) == cur {
                cur = p;
                p = self.parent(cur);
            }
            p
        }
    }
}
