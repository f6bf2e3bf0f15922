/// Index of a node slot inside the tree's arena.
///
/// Slot 0 is reserved for the sentinel, so a `NodeId` is stable for as long
/// as the node it names is not erased.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct NodeId(pub(crate) usize);

/// The reserved sentinel slot. The sentinel's parent is itself, and its
/// left and right links always name the current root, so the tree needs no
/// separate root pointer. In traversal order it sits both before the first
/// and after the last element, closing the in-order walk into a cycle.
pub(crate) const SENTINEL: NodeId = NodeId(0);

/// A struct representing an internal node of the tree.
///
/// `count` is the node's own multiplicity and `size` the number of
/// (value, multiplicity) entries in the subtree rooted here. Only the
/// sentinel slot has an empty value and a size of zero.
#[derive(Clone)]
pub(crate) struct Node<T> {
    pub(crate) value: Option<T>,
    pub(crate) priority: u32,
    pub(crate) count: usize,
    pub(crate) size: usize,
    pub(crate) left: NodeId,
    pub(crate) right: NodeId,
    pub(crate) parent: NodeId,
}

impl<T> Node<T> {
    pub(crate) fn new(value: T, count: usize) -> Self {
        Node {
            value: Some(value),
            priority: 0,
            count,
            size: count,
            left: SENTINEL,
            right: SENTINEL,
            parent: SENTINEL,
        }
    }

    pub(crate) fn sentinel() -> Self {
        Node {
            value: None,
            priority: 0,
            count: 0,
            size: 0,
            left: SENTINEL,
            right: SENTINEL,
            parent: SENTINEL,
        }
    }
}
