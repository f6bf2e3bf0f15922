use crate::augment::{Augment, NoAugment};
use crate::treap::core::{Core, DuplicatePolicy};
use crate::treap::node::{NodeId, SENTINEL};
use rand::Rng;
use rand::SeedableRng;
use rand::XorShiftRng;
use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;

/// An opaque handle referencing a specific element of a [`LazyTreap`], or
/// the position one past the last element.
///
/// Cursors are stable across non-removing operations and invalidated by
/// removal of the node they reference. The core's two-child removal
/// exchanges values with the in-order successor, so a cursor obtained for
/// either value references the other one's slot afterwards; cursors are
/// positional handles, not value identities.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Cursor(pub(crate) NodeId);

/// An order-statistic treap with lazy range propagation.
///
/// A treap is a tree that satisfies both the binary search tree property
/// and a heap property: the priority of a node is no larger than the
/// priority of any node in its subtrees. By drawing priorities at random,
/// the expected height of the tree is proportional to the logarithm of the
/// number of keys. Subtree sizes are maintained at every node, which makes
/// rank and select queries `O(log N)`, and the [`Augment`] callbacks keep a
/// generic upward aggregate and downward lazy state consistent across all
/// structural change.
///
/// # Examples
///
/// ```
/// use lazy_treap::{DuplicatePolicy, LazyTreap};
///
/// let mut tree: LazyTreap<u32> = LazyTreap::new(DuplicatePolicy::Ignore);
/// tree.insert(3);
/// tree.insert(1);
/// tree.insert(2);
/// tree.insert(2);
///
/// assert_eq!(tree.len(), 3);
/// assert_eq!(tree.count_less(&3), 2);
///
/// let second = tree.select(1);
/// assert_eq!(tree.value(second), Some(&2));
///
/// tree.remove(&2);
/// assert_eq!(tree.len(), 2);
/// ```
pub struct LazyTreap<T, A = NoAugment, C = fn(&T, &T) -> Ordering> {
    core: Core<T>,
    rng: XorShiftRng,
    policy: DuplicatePolicy,
    cmp: C,
    marker: PhantomData<A>,
}

impl<T, A> LazyTreap<T, A>
where
    T: Ord,
    A: Augment<T>,
{
    /// Constructs a new, empty `LazyTreap` ordered by `T`'s natural order.
    ///
    /// # Examples
    ///
    /// ```
    /// use lazy_treap::{DuplicatePolicy, LazyTreap};
    ///
    /// let tree: LazyTreap<u32> = LazyTreap::new(DuplicatePolicy::Count);
    /// assert!(tree.is_empty());
    /// ```
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self::with_comparator(policy, T::cmp as fn(&T, &T) -> Ordering)
    }

    /// Constructs a new, empty `LazyTreap` drawing priorities from an
    /// explicitly seeded generator, for reproducible shapes.
    ///
    /// # Examples
    ///
    /// ```
    /// use lazy_treap::{DuplicatePolicy, LazyTreap};
    ///
    /// let tree: LazyTreap<u32> = LazyTreap::with_seed(DuplicatePolicy::Ignore, [1, 2, 3, 4]);
    /// assert!(tree.is_empty());
    /// ```
    pub fn with_seed(policy: DuplicatePolicy, seed: [u32; 4]) -> Self {
        Self::with_comparator_and_seed(policy, T::cmp as fn(&T, &T) -> Ordering, seed)
    }

    /// Constructs a `LazyTreap` holding the given initial values.
    ///
    /// # Examples
    ///
    /// ```
    /// use lazy_treap::{DuplicatePolicy, LazyTreap};
    ///
    /// let mut tree: LazyTreap<u32> = LazyTreap::from_values(DuplicatePolicy::Ignore, vec![3, 1, 2]);
    /// assert_eq!(tree.len(), 3);
    /// assert_eq!(tree.iter().collect::<Vec<&u32>>(), vec![&1, &2, &3]);
    /// ```
    pub fn from_values<I>(policy: DuplicatePolicy, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
    {
        let mut tree = Self::new(policy);
        for value in values {
            tree.insert(value);
        }
        tree
    }
}

impl<T, A, C> LazyTreap<T, A, C>
where
    A: Augment<T>,
    C: Fn(&T, &T) -> Ordering,
{
    /// Constructs a new, empty `LazyTreap` ordered by an explicit
    /// comparator over the key part of `T`.
    ///
    /// # Examples
    ///
    /// ```
    /// use lazy_treap::{DuplicatePolicy, LazyTreap, NoAugment};
    ///
    /// let mut tree = LazyTreap::<(u32, &str), NoAugment, _>::with_comparator(
    ///     DuplicatePolicy::Store,
    ///     |a: &(u32, &str), b: &(u32, &str)| a.0.cmp(&b.0),
    /// );
    /// tree.insert((2, "two"));
    /// tree.insert((1, "one"));
    /// assert_eq!(tree.value(tree.first()), Some(&(1, "one")));
    /// ```
    pub fn with_comparator(policy: DuplicatePolicy, cmp: C) -> Self {
        LazyTreap {
            core: Core::new(),
            rng: XorShiftRng::new_unseeded(),
            policy,
            cmp,
            marker: PhantomData,
        }
    }

    /// Like [`with_comparator`](LazyTreap::with_comparator), but drawing
    /// priorities from an explicitly seeded generator.
    pub fn with_comparator_and_seed(policy: DuplicatePolicy, cmp: C, seed: [u32; 4]) -> Self {
        LazyTreap {
            core: Core::new(),
            rng: SeedableRng::from_seed(seed),
            policy,
            cmp,
            marker: PhantomData,
        }
    }

    /// Returns the number of entries in the tree, counting multiplicities.
    ///
    /// # Examples
    ///
    /// ```
    /// use lazy_treap::{DuplicatePolicy, LazyTreap};
    ///
    /// let mut tree: LazyTreap<&str> = LazyTreap::new(DuplicatePolicy::Count);
    /// tree.insert_with_count("a", 5);
    /// tree.insert("b");
    /// assert_eq!(tree.len(), 6);
    /// ```
    pub fn len(&self) -> usize {
        self.core.len()
    }

    /// Returns `true` if the tree holds no entries.
    pub fn is_empty(&self) -> bool {
        self.core.is_empty()
    }

    /// Returns the duplicate-handling policy fixed at construction.
    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Clears the tree, removing all entries.
    pub fn clear(&mut self) {
        self.core.clear();
    }

    // Distributes pending state from `id` into its children. Values are
    // taken out of their slots for the duration of the callback so the
    // three references never alias.
    fn push(&mut self, id: NodeId) {
        let left = self.core.left(id);
        let right = self.core.right(id);
        let mut value = self.core.take_value(id);
        let mut left_value = if left != SENTINEL {
            Some(self.core.take_value(left))
        } else {
            None
        };
        let mut right_value = if right != SENTINEL {
            Some(self.core.take_value(right))
        } else {
            None
        };
        A::push(&mut value, left_value.as_mut(), right_value.as_mut());
        self.core.put_value(id, value);
        if let Some(left_value) = left_value {
            self.core.put_value(left, left_value);
        }
        if let Some(right_value) = right_value {
            self.core.put_value(right, right_value);
        }
    }

    // Recomputes the aggregate of `id` from its children.
    fn pull(&mut self, id: NodeId) {
        let identity = A::identity();
        let mut value = self.core.take_value(id);
        {
            let left = self.core.left(id);
            let right = self.core.right(id);
            let left_ref = if left != SENTINEL { self.core.value(left) } else { &identity };
            let right_ref = if right != SENTINEL { self.core.value(right) } else { &identity };
            A::pull(&mut value, left_ref, right_ref);
        }
        self.core.put_value(id, value);
    }

    fn pull_to_root(&mut self, mut id: NodeId) {
        while id != SENTINEL {
            self.pull(id);
            id = self.core.parent(id);
        }
    }

    fn propagate_to_id(&mut self, id: NodeId) {
        let mut path = Vec::new();
        let mut cur = id;
        while cur != SENTINEL {
            path.push(cur);
            cur = self.core.parent(cur);
        }
        for &node in path.iter().rev() {
            self.push(node);
        }
    }

    // Pushes pending state down every node an insertion descent for this
    // probe will visit.
    fn push_search_path(&mut self, probe: &T) {
        let mut cur = self.core.root();
        while cur != SENTINEL {
            self.push(cur);
            cur = if (self.cmp)(self.core.value(cur), probe) == Ordering::Greater {
                self.core.left(cur)
            } else {
                self.core.right(cur)
            };
        }
    }

    // Rotates `id` up while its priority is smaller than its parent's.
    fn bubble_up(&mut self, id: NodeId) {
        loop {
            let parent = self.core.parent(id);
            if parent == SENTINEL || self.core.priority(parent) <= self.core.priority(id) {
                break;
            }
            if self.core.left(parent) == id {
                self.core.rotate_right(parent);
            } else {
                self.core.rotate_left(parent);
            }
            self.pull(parent);
        }
    }

    /// Inserts a value into the tree and returns a cursor to the affected
    /// node. Under `Ignore` an equal key leaves the tree unchanged; under
    /// `Count` it increments the existing node's multiplicity; under
    /// `Store` the new value is placed after all existing equal keys.
    ///
    /// # Examples
    ///
    /// ```
    /// use lazy_treap::{DuplicatePolicy, LazyTreap};
    ///
    /// let mut tree: LazyTreap<u32> = LazyTreap::new(DuplicatePolicy::Ignore);
    /// let cursor = tree.insert(1);
    /// assert_eq!(tree.value(cursor), Some(&1));
    /// assert_eq!(tree.insert(1), cursor);
    /// assert_eq!(tree.len(), 1);
    /// ```
    pub fn insert(&mut self, value: T) -> Cursor {
        self.insert_with_count(value, 1)
    }

    /// Inserts a value carrying an explicit multiplicity.
    ///
    /// # Panics
    ///
    /// Panics if `count` is zero.
    ///
    /// # Examples
    ///
    /// ```
    /// use lazy_treap::{DuplicatePolicy, LazyTreap};
    ///
    /// let mut tree: LazyTreap<&str> = LazyTreap::new(DuplicatePolicy::Count);
    /// tree.insert_with_count("a", 5);
    /// tree.insert_with_count("a", 3);
    /// assert_eq!(tree.count(&"a"), 8);
    /// ```
    pub fn insert_with_count(&mut self, value: T, count: usize) -> Cursor {
        assert!(count > 0, "Error: count must be positive.");
        self.push_search_path(&value);
        let policy = self.policy;
        let (id, created) = self.core.insert(value, count, policy, &self.cmp);
        if created {
            let priority = self.rng.next_u32();
            self.core.set_priority(id, priority);
            self.bubble_up(id);
        }
        self.pull_to_root(id);
        Cursor(id)
    }

    /// Structurally inserts a value immediately before `at` in traversal
    /// order, without a key search. The caller is responsible for not
    /// violating sort order; inserting before [`end`](LazyTreap::end)
    /// appends after the last element.
    pub fn insert_before(&mut self, at: Cursor, value: T) -> Cursor {
        self.insert_before_with_count(at, value, 1)
    }

    /// Like [`insert_before`](LazyTreap::insert_before) with an explicit
    /// multiplicity.
    pub fn insert_before_with_count(&mut self, at: Cursor, value: T, count: usize) -> Cursor {
        assert!(count > 0, "Error: count must be positive.");
        let attach = if at.0 == SENTINEL {
            self.core.last()
        } else if self.core.left(at.0) == SENTINEL {
            at.0
        } else {
            self.core.prev(at.0)
        };
        self.propagate_to_id(attach);
        let id = self.core.insert_before(at.0, value, count);
        let priority = self.rng.next_u32();
        self.core.set_priority(id, priority);
        self.bubble_up(id);
        self.pull_to_root(id);
        Cursor(id)
    }

    /// Removes one multiplicity of the given key. A no-op returning the end
    /// cursor when the key is absent.
    ///
    /// # Examples
    ///
    /// ```
    /// use lazy_treap::{DuplicatePolicy, LazyTreap};
    ///
    /// let mut tree: LazyTreap<u32> = LazyTreap::from_values(DuplicatePolicy::Ignore, vec![1, 2, 3]);
    /// let neighbor = tree.remove(&2);
    /// assert_eq!(tree.value(neighbor), Some(&3));
    /// assert_eq!(tree.remove(&7), tree.end());
    /// assert_eq!(tree.len(), 2);
    /// ```
    pub fn remove(&mut self, probe: &T) -> Cursor {
        self.remove_with_count(probe, 1)
    }

    /// Removes up to `count` multiplicity of the given key. If multiplicity
    /// remains the node is kept and its cursor returned; otherwise the node
    /// is removed and the cursor of its in-order successor returned.
    /// Removing more than is present removes everything.
    ///
    /// # Examples
    ///
    /// ```
    /// use lazy_treap::{DuplicatePolicy, LazyTreap};
    ///
    /// let mut tree: LazyTreap<&str> = LazyTreap::new(DuplicatePolicy::Count);
    /// tree.insert_with_count("a", 8);
    /// tree.remove_with_count(&"a", 4);
    /// assert_eq!(tree.count(&"a"), 4);
    /// tree.remove_with_count(&"a", 9);
    /// assert_eq!(tree.count(&"a"), 0);
    /// ```
    pub fn remove_with_count(&mut self, probe: &T, count: usize) -> Cursor {
        let id = self.find_id(probe);
        if id == SENTINEL {
            return Cursor(SENTINEL);
        }
        self.remove_id(id, count)
    }

    /// Removes through a cursor instead of a key search.
    ///
    /// # Panics
    ///
    /// Panics if `cursor` is the end cursor.
    pub fn remove_at(&mut self, cursor: Cursor, count: usize) -> Cursor {
        assert!(cursor.0 != SENTINEL, "Error: cannot remove the end position.");
        self.propagate_to_id(cursor.0);
        self.remove_id(cursor.0, count)
    }

    fn remove_id(&mut self, id: NodeId, count: usize) -> Cursor {
        if count < self.core.count(id) {
            let cur = self.core.remove_at(id, count);
            self.pull_to_root(cur);
            return Cursor(cur);
        }
        // Rotate the smaller-priority child up through the node until the
        // node has at most one child, then splice it out. The promoted
        // child's pending state is pushed first because the rotation splits
        // its subtree.
        loop {
            let left = self.core.left(id);
            let right = self.core.right(id);
            if left == SENTINEL || right == SENTINEL {
                break;
            }
            let child = if self.core.priority(left) < self.core.priority(right) {
                left
            } else {
                right
            };
            self.push(child);
            if child == left {
                self.core.rotate_right(id);
            } else {
                self.core.rotate_left(id);
            }
        }
        let parent = self.core.parent(id);
        let succ = self.core.remove_at(id, count);
        self.pull_to_root(parent);
        Cursor(succ)
    }

    fn find_id(&mut self, probe: &T) -> NodeId {
        let mut cur = self.core.root();
        let mut hit = SENTINEL;
        while cur != SENTINEL {
            self.push(cur);
            match (self.cmp)(self.core.value(cur), probe) {
                Ordering::Less => cur = self.core.right(cur),
                Ordering::Greater => cur = self.core.left(cur),
                Ordering::Equal => {
                    hit = cur;
                    cur = self.core.left(cur);
                }
            }
        }
        hit
    }

    /// Searches for a key, pushing pending state down the search path.
    /// Returns the first matching node in traversal order, or the end
    /// cursor when absent.
    pub fn find(&mut self, probe: &T) -> Cursor {
        Cursor(self.find_id(probe))
    }

    /// Returns a cursor to the first entry not less than the probe, or the
    /// end cursor.
    pub fn lower_bound(&mut self, probe: &T) -> Cursor {
        let mut cur = self.core.root();
        let mut res = SENTINEL;
        while cur != SENTINEL {
            self.push(cur);
            if (self.cmp)(self.core.value(cur), probe) == Ordering::Less {
                cur = self.core.right(cur);
            } else {
                res = cur;
                cur = self.core.left(cur);
            }
        }
        Cursor(res)
    }

    /// Returns a cursor to the first entry greater than the probe, or the
    /// end cursor.
    pub fn upper_bound(&mut self, probe: &T) -> Cursor {
        let mut cur = self.core.root();
        let mut res = SENTINEL;
        while cur != SENTINEL {
            self.push(cur);
            if (self.cmp)(self.core.value(cur), probe) == Ordering::Greater {
                res = cur;
                cur = self.core.left(cur);
            } else {
                cur = self.core.right(cur);
            }
        }
        Cursor(res)
    }

    /// Checks if a key exists in the tree.
    pub fn contains(&mut self, probe: &T) -> bool {
        self.find_id(probe) != SENTINEL
    }

    /// Returns the multiplicity stored for a key, zero when absent.
    pub fn count(&mut self, probe: &T) -> usize {
        let id = self.find_id(probe);
        if id == SENTINEL {
            0
        } else {
            self.core.count(id)
        }
    }

    /// Number of entries strictly less than the probe.
    ///
    /// # Examples
    ///
    /// ```
    /// use lazy_treap::{DuplicatePolicy, LazyTreap};
    ///
    /// let mut tree: LazyTreap<u32> = LazyTreap::from_values(DuplicatePolicy::Ignore, vec![1, 3, 5]);
    /// assert_eq!(tree.count_less(&4), 2);
    /// assert_eq!(tree.count_less_or_equal(&5), 3);
    /// ```
    pub fn count_less(&mut self, probe: &T) -> usize {
        let mut cur = self.core.root();
        let mut acc = 0;
        while cur != SENTINEL {
            self.push(cur);
            if (self.cmp)(self.core.value(cur), probe) == Ordering::Less {
                acc += self.core.size(cur) - self.core.size(self.core.right(cur));
                cur = self.core.right(cur);
            } else {
                cur = self.core.left(cur);
            }
        }
        acc
    }

    /// Number of entries less than or equal to the probe.
    pub fn count_less_or_equal(&mut self, probe: &T) -> usize {
        let mut cur = self.core.root();
        let mut acc = 0;
        while cur != SENTINEL {
            self.push(cur);
            if (self.cmp)(self.core.value(cur), probe) == Ordering::Greater {
                cur = self.core.left(cur);
            } else {
                acc += self.core.size(cur) - self.core.size(self.core.right(cur));
                cur = self.core.right(cur);
            }
        }
        acc
    }

    /// Select by rank: a cursor to the node holding the zero-based `k`-th
    /// entry, pushing pending state down the descent. Out-of-range ranks
    /// yield the end cursor.
    ///
    /// # Examples
    ///
    /// ```
    /// use lazy_treap::{DuplicatePolicy, LazyTreap};
    ///
    /// let mut tree: LazyTreap<u32> = LazyTreap::from_values(DuplicatePolicy::Ignore, vec![30, 10, 20]);
    /// let first = tree.select(0);
    /// assert_eq!(tree.value(first), Some(&10));
    /// let last = tree.select(2);
    /// assert_eq!(tree.value(last), Some(&30));
    /// assert_eq!(tree.select(3), tree.end());
    /// ```
    pub fn select(&mut self, mut k: usize) -> Cursor {
        let mut cur = self.core.root();
        while cur != SENTINEL {
            self.push(cur);
            let left_size = self.core.size(self.core.left(cur));
            let count = self.core.count(cur);
            if k < left_size {
                cur = self.core.left(cur);
            } else if k < left_size + count {
                return Cursor(cur);
            } else {
                k -= left_size + count;
                cur = self.core.right(cur);
            }
        }
        Cursor(SENTINEL)
    }

    /// The zero-based rank of the cursor's first entry; the end cursor
    /// ranks one past the last entry.
    pub fn rank(&self, cursor: Cursor) -> usize {
        self.core.rank(cursor.0)
    }

    /// Offsets a cursor by a signed distance in traversal order using rank
    /// arithmetic.
    ///
    /// # Panics
    ///
    /// Panics if the resulting position is before the first entry or past
    /// the end position.
    pub fn advance(&self, cursor: Cursor, delta: isize) -> Cursor {
        let pos = self.core.rank(cursor.0) as isize + delta;
        assert!(
            pos >= 0 && pos <= self.core.len() as isize,
            "Error: position out of bounds."
        );
        if pos == self.core.len() as isize {
            Cursor(SENTINEL)
        } else {
            Cursor(self.core.select(pos as usize))
        }
    }

    /// A cursor to the first entry, or the end cursor when empty.
    pub fn first(&self) -> Cursor {
        Cursor(self.core.first())
    }

    /// A cursor to the last entry, or the end cursor when empty.
    pub fn last(&self) -> Cursor {
        Cursor(self.core.last())
    }

    /// The cursor one past the last entry.
    pub fn end(&self) -> Cursor {
        Cursor(SENTINEL)
    }

    /// Steps a cursor forward in traversal order. Stepping past the last
    /// entry yields the end cursor, and stepping the end cursor yields the
    /// first entry, closing the order into a cycle.
    pub fn next(&self, cursor: Cursor) -> Cursor {
        Cursor(self.core.next(cursor.0))
    }

    /// Steps a cursor backward, symmetric to [`next`](LazyTreap::next).
    pub fn prev(&self, cursor: Cursor) -> Cursor {
        Cursor(self.core.prev(cursor.0))
    }

    /// The parent of the cursor's node, or the end cursor at the root.
    pub fn parent(&self, cursor: Cursor) -> Cursor {
        Cursor(self.core.parent(cursor.0))
    }

    /// The left child of the cursor's node, or the end cursor.
    pub fn left(&self, cursor: Cursor) -> Cursor {
        Cursor(self.core.left(cursor.0))
    }

    /// The right child of the cursor's node, or the end cursor.
    pub fn right(&self, cursor: Cursor) -> Cursor {
        Cursor(self.core.right(cursor.0))
    }

    /// An immutable reference to the value at a cursor, `None` at the end
    /// cursor. The reference observes the value as stored: when lazy
    /// updates are in flight, call [`propagate_to`](LazyTreap::propagate_to)
    /// first to see them applied.
    pub fn value(&self, cursor: Cursor) -> Option<&T> {
        if cursor.0 == SENTINEL {
            None
        } else {
            Some(self.core.value(cursor.0))
        }
    }

    /// Pushes pending state down from the root to the cursor's node, so the
    /// value there reflects every outstanding range update.
    pub fn propagate_to(&mut self, cursor: Cursor) {
        self.propagate_to_id(cursor.0);
    }

    /// Mutates the value at a cursor. Pending state is propagated down
    /// first and aggregates re-established afterwards; `None` at the end
    /// cursor. The mutation must not change how the value orders.
    ///
    /// # Examples
    ///
    /// ```
    /// use lazy_treap::{DuplicatePolicy, LazyTreap, NoAugment};
    ///
    /// let mut tree = LazyTreap::<(u32, u32), NoAugment, _>::with_comparator(
    ///     DuplicatePolicy::Ignore,
    ///     |a: &(u32, u32), b: &(u32, u32)| a.0.cmp(&b.0),
    /// );
    /// let cursor = tree.insert((1, 10));
    /// tree.with_value_mut(cursor, |value| value.1 += 1);
    /// assert_eq!(tree.value(cursor), Some(&(1, 11)));
    /// ```
    pub fn with_value_mut<F, R>(&mut self, cursor: Cursor, f: F) -> Option<R>
    where
        F: FnOnce(&mut T) -> R,
    {
        if cursor.0 == SENTINEL {
            return None;
        }
        self.propagate_to_id(cursor.0);
        let mut value = self.core.take_value(cursor.0);
        let res = f(&mut value);
        self.core.put_value(cursor.0, value);
        self.pull_to_root(cursor.0);
        Some(res)
    }

    fn depth(&self, mut id: NodeId) -> usize {
        let mut depth = 0;
        while id != SENTINEL {
            id = self.core.parent(id);
            depth += 1;
        }
        depth
    }

    fn lca(&self, u: NodeId, v: NodeId) -> NodeId {
        let du = self.depth(u);
        let dv = self.depth(v);
        let (mut u, mut v) = (u, v);
        for _ in dv..du {
            u = self.core.parent(u);
        }
        for _ in du..dv {
            v = self.core.parent(v);
        }
        while u != v {
            u = self.core.parent(u);
            v = self.core.parent(v);
        }
        u
    }

    // Combine (acc, node, node.right) into a detached aggregate.
    fn fold_after(&self, id: NodeId, acc: &T, identity: &T) -> T
    where
        T: Clone,
    {
        let mut value = self.core.value(id).clone();
        let right = self.core.right(id);
        let right_ref = if right != SENTINEL { self.core.value(right) } else { identity };
        A::pull(&mut value, acc, right_ref);
        value
    }

    // Combine (node.left, node, acc) into a detached aggregate.
    fn fold_before(&self, id: NodeId, acc: &T, identity: &T) -> T
    where
        T: Clone,
    {
        let mut value = self.core.value(id).clone();
        let left = self.core.left(id);
        let left_ref = if left != SENTINEL { self.core.value(left) } else { identity };
        A::pull(&mut value, left_ref, acc);
        value
    }

    /// Aggregates over the positions `[begin, end)` by walking both range
    /// boundaries up to their lowest common ancestor, combining skipped
    /// per-node contributions in traversal order. Returns the identity
    /// element when `begin == end`.
    ///
    /// # Panics
    ///
    /// Panics if `begin` comes after `end` in traversal order.
    ///
    /// # Examples
    ///
    /// ```
    /// use lazy_treap::{Augment, DuplicatePolicy, LazyTreap};
    ///
    /// #[derive(Clone, Default)]
    /// struct Item {
    ///     key: i64,
    ///     sum: i64,
    /// }
    ///
    /// struct SubtreeSum;
    ///
    /// impl Augment<Item> for SubtreeSum {
    ///     fn identity() -> Item {
    ///         Item::default()
    ///     }
    ///
    ///     fn pull(node: &mut Item, left: &Item, right: &Item) {
    ///         node.sum = left.sum + node.key + right.sum;
    ///     }
    ///
    ///     fn push(_: &mut Item, _: Option<&mut Item>, _: Option<&mut Item>) {}
    /// }
    ///
    /// let mut tree = LazyTreap::<Item, SubtreeSum, _>::with_comparator(
    ///     DuplicatePolicy::Ignore,
    ///     |a: &Item, b: &Item| a.key.cmp(&b.key),
    /// );
    /// for key in vec![5, 3, 8] {
    ///     tree.insert(Item { key, sum: 0 });
    /// }
    /// let (begin, end) = (tree.first(), tree.end());
    /// assert_eq!(tree.query(begin, end).sum, 16);
    /// ```
    pub fn query(&mut self, begin: Cursor, end: Cursor) -> T
    where
        T: Clone,
    {
        if begin.0 == end.0 {
            return A::identity();
        }
        assert!(
            self.core.rank(begin.0) <= self.core.rank(end.0),
            "Error: range start is after range end."
        );
        let last = self.core.prev(end.0);
        self.propagate_to_id(begin.0);
        self.propagate_to_id(last);
        let ancestor = self.lca(begin.0, last);
        let identity = A::identity();

        let mut left_part = A::identity();
        if begin.0 != ancestor {
            left_part = self.fold_after(begin.0, &identity, &identity);
            let mut x = begin.0;
            loop {
                let p = self.core.parent(x);
                if p == ancestor {
                    break;
                }
                if self.core.left(p) == x {
                    left_part = self.fold_after(p, &left_part, &identity);
                }
                x = p;
            }
        }
        let mut right_part = A::identity();
        if last != ancestor {
            right_part = self.fold_before(last, &identity, &identity);
            let mut x = last;
            loop {
                let p = self.core.parent(x);
                if p == ancestor {
                    break;
                }
                if self.core.right(p) == x {
                    right_part = self.fold_before(p, &right_part, &identity);
                }
                x = p;
            }
        }
        let mut res = self.core.value(ancestor).clone();
        A::pull(&mut res, &left_part, &right_part);
        res
    }

    // Apply `f` to the subtree rooted at `id`, keeping the right child's
    // share of the resulting pending state and discarding the left's.
    fn apply_keep_right<F>(&mut self, id: NodeId, f: &F)
    where
        F: Fn(&mut T),
    {
        let mut value = self.core.take_value(id);
        f(&mut value);
        let right = self.core.right(id);
        let mut right_value = if right != SENTINEL {
            Some(self.core.take_value(right))
        } else {
            None
        };
        A::push(&mut value, None, right_value.as_mut());
        self.core.put_value(id, value);
        if let Some(right_value) = right_value {
            self.core.put_value(right, right_value);
        }
    }

    fn apply_keep_left<F>(&mut self, id: NodeId, f: &F)
    where
        F: Fn(&mut T),
    {
        let mut value = self.core.take_value(id);
        f(&mut value);
        let left = self.core.left(id);
        let mut left_value = if left != SENTINEL {
            Some(self.core.take_value(left))
        } else {
            None
        };
        A::push(&mut value, left_value.as_mut(), None);
        self.core.put_value(id, value);
        if let Some(left_value) = left_value {
            self.core.put_value(left, left_value);
        }
    }

    fn apply_node_only<F>(&mut self, id: NodeId, f: &F)
    where
        F: Fn(&mut T),
    {
        let mut value = self.core.take_value(id);
        f(&mut value);
        A::push(&mut value, None, None);
        self.core.put_value(id, value);
    }

    /// Applies `f` over the positions `[begin, end)` using the same
    /// boundary decomposition as [`query`](LazyTreap::query). `f` receives
    /// each covering subtree root and must act as a whole-subtree update:
    /// adjust the node's own element, its aggregate, and its pending state
    /// together, the same way a `push` re-applies pending state to a child.
    /// Aggregates along both boundary paths are re-established before
    /// returning.
    ///
    /// # Panics
    ///
    /// Panics if `begin` comes after `end` in traversal order.
    pub fn update<F>(&mut self, begin: Cursor, end: Cursor, f: F)
    where
        F: Fn(&mut T),
    {
        if begin.0 == end.0 {
            return;
        }
        assert!(
            self.core.rank(begin.0) <= self.core.rank(end.0),
            "Error: range start is after range end."
        );
        let last = self.core.prev(end.0);
        self.propagate_to_id(begin.0);
        self.propagate_to_id(last);
        let ancestor = self.lca(begin.0, last);

        if begin.0 != ancestor {
            self.apply_keep_right(begin.0, &f);
            let mut x = begin.0;
            loop {
                let p = self.core.parent(x);
                if p == ancestor {
                    break;
                }
                if self.core.left(p) == x {
                    self.apply_keep_right(p, &f);
                }
                x = p;
            }
        }
        if last != ancestor {
            self.apply_keep_left(last, &f);
            let mut x = last;
            loop {
                let p = self.core.parent(x);
                if p == ancestor {
                    break;
                }
                if self.core.right(p) == x {
                    self.apply_keep_left(p, &f);
                }
                x = p;
            }
        }
        self.apply_node_only(ancestor, &f);

        if begin.0 != ancestor {
            let mut x = begin.0;
            while x != ancestor {
                self.pull(x);
                x = self.core.parent(x);
            }
        }
        if last != ancestor {
            let mut x = last;
            while x != ancestor {
                self.pull(x);
                x = self.core.parent(x);
            }
        }
        self.pull_to_root(ancestor);
    }

    fn propagate_all(&mut self) {
        let root = self.core.root();
        if root == SENTINEL {
            return;
        }
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            self.push(id);
            let left = self.core.left(id);
            if left != SENTINEL {
                stack.push(left);
            }
            let right = self.core.right(id);
            if right != SENTINEL {
                stack.push(right);
            }
        }
    }

    /// Returns an iterator over the tree in traversal order, one item per
    /// node. All pending state is pushed down first so every yielded value
    /// is fully up to date.
    ///
    /// # Examples
    ///
    /// ```
    /// use lazy_treap::{DuplicatePolicy, LazyTreap};
    ///
    /// let mut tree: LazyTreap<u32> = LazyTreap::from_values(DuplicatePolicy::Ignore, vec![2, 1, 3]);
    /// assert_eq!(tree.iter().collect::<Vec<&u32>>(), vec![&1, &2, &3]);
    /// ```
    pub fn iter(&mut self) -> Iter<'_, T> {
        self.propagate_all();
        Iter {
            core: &self.core,
            cur: self.core.first(),
        }
    }

    /// Checks that the structural invariants hold: the sentinel self-loop
    /// and root mirroring, parent back-references, the size equation at
    /// every node, the min-heap property on priorities, and a
    /// non-decreasing traversal order. Panics if any is violated. The order
    /// check reads stored values, so run it when pending updates preserve
    /// relative order or after full propagation.
    pub fn assert_invariants(&self) {
        let root = self.core.root();
        assert_eq!(self.core.parent(SENTINEL), SENTINEL);
        assert_eq!(self.core.left(SENTINEL), self.core.right(SENTINEL));
        if root == SENTINEL {
            assert_eq!(self.core.len(), 0);
            return;
        }
        assert_eq!(self.core.parent(root), SENTINEL);
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let left = self.core.left(id);
            let right = self.core.right(id);
            assert!(self.core.count(id) >= 1);
            assert_eq!(
                self.core.size(id),
                self.core.count(id) + self.core.size(left) + self.core.size(right)
            );
            if left != SENTINEL {
                assert_eq!(self.core.parent(left), id);
                assert!(self.core.priority(left) >= self.core.priority(id));
                stack.push(left);
            }
            if right != SENTINEL {
                assert_eq!(self.core.parent(right), id);
                assert!(self.core.priority(right) >= self.core.priority(id));
                stack.push(right);
            }
        }
        let mut cur = self.core.first();
        let mut next = self.core.next(cur);
        while next != SENTINEL {
            assert_ne!(
                (self.cmp)(self.core.value(cur), self.core.value(next)),
                Ordering::Greater
            );
            cur = next;
            next = self.core.next(cur);
        }
    }
}

impl<T, A, C> Clone for LazyTreap<T, A, C>
where
    T: Clone,
    C: Clone,
{
    fn clone(&self) -> Self {
        LazyTreap {
            core: self.core.clone(),
            rng: self.rng.clone(),
            policy: self.policy,
            cmp: self.cmp.clone(),
            marker: PhantomData,
        }
    }
}

impl<T, A, C> fmt::Debug for LazyTreap<T, A, C>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(Iter {
                core: &self.core,
                cur: self.core.first(),
            })
            .finish()
    }
}

/// An iterator for `LazyTreap<T, A, C>`.
///
/// This iterator traverses the nodes in-order and yields immutable
/// references.
pub struct Iter<'a, T> {
    core: &'a Core<T>,
    cur: NodeId,
}

impl<'a, T> Iterator for Iter<'a, T>
where
    T: 'a,
{
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cur == SENTINEL {
            return None;
        }
        let value = self.core.value(self.cur);
        self.cur = self.core.next(self.cur);
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::{Cursor, LazyTreap};
    use crate::augment::Augment;
    use crate::treap::core::DuplicatePolicy;
    use std::cmp::Ordering;

    #[derive(Clone, Default)]
    struct Ranged {
        key: i64,
        val: i64,
        sum: i64,
        add: i64,
        n: i64,
    }

    fn ranged(key: i64, val: i64) -> Ranged {
        Ranged {
            key,
            val,
            sum: 0,
            add: 0,
            n: 0,
        }
    }

    struct AddSum;

    impl Augment<Ranged> for AddSum {
        fn identity() -> Ranged {
            Ranged::default()
        }

        fn pull(node: &mut Ranged, left: &Ranged, right: &Ranged) {
            node.n = left.n + 1 + right.n;
            node.sum = left.sum + node.val + right.sum;
        }

        fn push(node: &mut Ranged, left: Option<&mut Ranged>, right: Option<&mut Ranged>) {
            if node.add == 0 {
                return;
            }
            for child in vec![left, right] {
                if let Some(child) = child {
                    child.val += node.add;
                    child.sum += node.add * child.n;
                    child.add += node.add;
                }
            }
            node.add = 0;
        }
    }

    fn add(amount: i64) -> impl Fn(&mut Ranged) {
        move |node: &mut Ranged| {
            node.val += amount;
            node.sum += amount * node.n;
            node.add += amount;
        }
    }

    fn key_cmp(a: &Ranged, b: &Ranged) -> Ordering {
        a.key.cmp(&b.key)
    }

    fn ranged_tree(keys: &[i64]) -> LazyTreap<Ranged, AddSum, fn(&Ranged, &Ranged) -> Ordering> {
        let mut tree = LazyTreap::with_comparator_and_seed(
            DuplicatePolicy::Ignore,
            key_cmp as fn(&Ranged, &Ranged) -> Ordering,
            [7, 11, 13, 17],
        );
        for &key in keys {
            tree.insert(ranged(key, key));
        }
        tree
    }

    #[test]
    fn test_len_empty() {
        let tree: LazyTreap<u32> = LazyTreap::new(DuplicatePolicy::Ignore);
        assert_eq!(tree.len(), 0);
        assert!(tree.is_empty());
        assert_eq!(tree.first(), tree.end());
    }

    #[test]
    fn test_insert_policies() {
        let mut ignore: LazyTreap<u32> = LazyTreap::new(DuplicatePolicy::Ignore);
        ignore.insert(1);
        ignore.insert(1);
        assert_eq!(ignore.len(), 1);

        let mut count: LazyTreap<u32> = LazyTreap::new(DuplicatePolicy::Count);
        count.insert(1);
        count.insert(1);
        assert_eq!(count.len(), 2);
        assert_eq!(count.count(&1), 2);

        let mut store: LazyTreap<u32> = LazyTreap::new(DuplicatePolicy::Store);
        store.insert(1);
        store.insert(1);
        assert_eq!(store.len(), 2);
        assert_eq!(store.count(&1), 1);
    }

    #[test]
    fn test_store_keeps_insertion_order() {
        let mut tree = LazyTreap::<(u32, u32), crate::augment::NoAugment, _>::with_comparator(
            DuplicatePolicy::Store,
            |a: &(u32, u32), b: &(u32, u32)| a.0.cmp(&b.0),
        );
        tree.insert((1, 0));
        tree.insert((2, 1));
        tree.insert((2, 2));
        tree.insert((2, 3));
        tree.insert((3, 0));
        let run = tree.find(&(2, 0));
        assert_eq!(tree.value(run), Some(&(2, 1)));
        assert_eq!(tree.value(tree.next(run)), Some(&(2, 2)));
        assert_eq!(tree.value(tree.advance(run, 2)), Some(&(2, 3)));
        tree.assert_invariants();
    }

    #[test]
    fn test_remove_returns_neighbor() {
        let mut tree: LazyTreap<u32> =
            LazyTreap::from_values(DuplicatePolicy::Ignore, vec![5, 3, 8, 1]);
        let neighbor = tree.remove(&3);
        assert_eq!(tree.value(neighbor), Some(&5));
        assert_eq!(tree.remove(&4), tree.end());
        let last = tree.remove(&8);
        assert_eq!(last, tree.end());
        tree.assert_invariants();
    }

    #[test]
    fn test_remove_at_decrements() {
        let mut tree: LazyTreap<u32> = LazyTreap::new(DuplicatePolicy::Count);
        let cursor = tree.insert_with_count(4, 5);
        assert_eq!(tree.remove_at(cursor, 2), cursor);
        assert_eq!(tree.count(&4), 3);
        assert_eq!(tree.remove_at(cursor, 9), tree.end());
        assert!(tree.is_empty());
    }

    #[test]
    fn test_insert_before() {
        let mut tree = LazyTreap::<(u32, u32), crate::augment::NoAugment, _>::with_comparator(
            DuplicatePolicy::Store,
            |a: &(u32, u32), b: &(u32, u32)| a.0.cmp(&b.0),
        );
        tree.insert((1, 0));
        let at = tree.insert((2, 1));
        tree.insert_before(at, (2, 0));
        tree.insert_before(tree.end(), (9, 0));
        let values = tree.iter().cloned().collect::<Vec<(u32, u32)>>();
        assert_eq!(values, vec![(1, 0), (2, 0), (2, 1), (9, 0)]);
        tree.assert_invariants();
    }

    #[test]
    fn test_cyclic_stepping() {
        let tree: LazyTreap<u32> =
            LazyTreap::from_values(DuplicatePolicy::Ignore, vec![2, 1, 3]);
        assert_eq!(tree.next(tree.last()), tree.end());
        assert_eq!(tree.next(tree.end()), tree.first());
        assert_eq!(tree.prev(tree.first()), tree.end());
        assert_eq!(tree.prev(tree.end()), tree.last());
    }

    #[test]
    fn test_rank_select_duality() {
        let mut tree: LazyTreap<u32> =
            LazyTreap::from_values(DuplicatePolicy::Ignore, vec![5, 3, 8, 1, 4, 7, 9]);
        for k in 0..tree.len() {
            let cursor = tree.select(k);
            assert_eq!(tree.rank(cursor), k);
        }
        assert_eq!(tree.rank(tree.end()), 7);
    }

    #[test]
    fn test_structural_introspection() {
        let tree: LazyTreap<u32> =
            LazyTreap::from_values(DuplicatePolicy::Ignore, vec![2, 1, 3]);
        // walking up from any node reaches the root, whose parent is end
        let mut cur = tree.first();
        while tree.parent(cur) != tree.end() {
            cur = tree.parent(cur);
        }
        assert_eq!(tree.parent(cur), tree.end());
        assert!(tree.left(cur) != cur && tree.right(cur) != cur);
    }

    #[test]
    fn test_query_sum() {
        let mut tree = ranged_tree(&[5, 3, 8, 1, 4, 7, 9]);
        let (begin, end) = (tree.first(), tree.end());
        assert_eq!(tree.query(begin, end).sum, 37);
        assert_eq!(tree.query(begin, begin).sum, 0);
        let (b, e) = (tree.select(1), tree.select(5));
        assert_eq!(tree.query(b, e).sum, 3 + 4 + 5 + 7);
        tree.assert_invariants();
    }

    #[test]
    fn test_update_then_query() {
        let mut tree = ranged_tree(&[]);
        for key in 0..5 {
            tree.insert(ranged(key, 0));
        }
        let (begin, end) = (tree.select(1), tree.select(4));
        tree.update(begin, end, add(5));
        let (b, e) = (tree.first(), tree.end());
        assert_eq!(tree.query(b, e).sum, 15);
        let (b, e) = (tree.select(1), tree.select(4));
        assert_eq!(tree.query(b, e).sum, 15);
        let (b, e) = (tree.select(0), tree.select(1));
        assert_eq!(tree.query(b, e).sum, 0);
        tree.assert_invariants();
    }

    #[test]
    #[should_panic(expected = "Error: range start is after range end.")]
    fn test_reversed_range_panics() {
        let mut tree = ranged_tree(&[1, 2, 3]);
        let (begin, end) = (tree.select(2), tree.select(0));
        tree.query(begin, end);
    }

    #[test]
    fn test_propagate_to_exposes_pending() {
        let mut tree = ranged_tree(&[0, 1, 2]);
        let (begin, end) = (tree.first(), tree.end());
        tree.update(begin, end, add(7));
        let cursor = tree.select(1);
        tree.propagate_to(cursor);
        assert_eq!(tree.value(cursor).unwrap().val, 1 + 7);
    }

    #[test]
    fn test_iter_applies_pending() {
        let mut tree = ranged_tree(&[0, 1, 2]);
        let (begin, end) = (tree.first(), tree.end());
        tree.update(begin, end, add(2));
        let vals = tree.iter().map(|node| node.val).collect::<Vec<i64>>();
        assert_eq!(vals, vec![2, 3, 4]);
    }

    #[test]
    fn test_round_trip() {
        let mut tree: LazyTreap<u32> =
            LazyTreap::from_values(DuplicatePolicy::Ignore, vec![5, 3, 8]);
        let before = tree.iter().cloned().collect::<Vec<u32>>();
        tree.insert(6);
        tree.remove(&6);
        let after = tree.iter().cloned().collect::<Vec<u32>>();
        assert_eq!(before, after);
        tree.assert_invariants();
    }

    #[test]
    fn test_clone() {
        let tree: LazyTreap<u32> =
            LazyTreap::from_values(DuplicatePolicy::Ignore, vec![2, 1, 3]);
        let mut copy = tree.clone();
        copy.insert(4);
        assert_eq!(tree.len(), 3);
        assert_eq!(copy.len(), 4);
    }

    #[test]
    fn test_debug() {
        let tree: LazyTreap<u32> = LazyTreap::from_values(DuplicatePolicy::Ignore, vec![2, 1]);
        assert_eq!(format!("{:?}", tree), "[1, 2]");
    }

    #[test]
    fn test_clear() {
        let mut tree: LazyTreap<u32> =
            LazyTreap::from_values(DuplicatePolicy::Ignore, vec![2, 1, 3]);
        tree.clear();
        assert!(tree.is_empty());
        tree.insert(9);
        assert_eq!(tree.len(), 1);
        tree.assert_invariants();
    }

    #[test]
    fn test_seeded_shapes_are_deterministic() {
        let mut a: LazyTreap<u32> = LazyTreap::with_seed(DuplicatePolicy::Ignore, [1, 2, 3, 4]);
        let mut b: LazyTreap<u32> = LazyTreap::with_seed(DuplicatePolicy::Ignore, [1, 2, 3, 4]);
        for key in 0..64 {
            let ca: Cursor = a.insert(key);
            let cb: Cursor = b.insert(key);
            assert_eq!(a.rank(ca), b.rank(cb));
        }
        a.assert_invariants();
        b.assert_invariants();
    }
}
