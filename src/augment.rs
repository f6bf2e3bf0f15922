/// Two-directional per-node bookkeeping for a lazy treap.
///
/// An implementation describes how a value aggregates information about its
/// subtree ([`pull`](Augment::pull)) and how pending range updates stored in
/// a value are distributed to its children ([`push`](Augment::push)). The
/// tree invokes `pull` after every structural change and `push` before any
/// operation that reads or restructures below a node, so between public
/// operations every value's aggregate component is correct for its subtree
/// and pending state only defers element-level application.
///
/// The combine realized by `pull` must be associative, but need not be
/// commutative: the tree always combines in the order left subtree, node,
/// right subtree.
///
/// # Examples
///
/// A value that maintains a subtree sum of its keys:
///
/// ```
/// use lazy_treap::Augment;
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
///     fn push(_node: &mut Item, _left: Option<&mut Item>, _right: Option<&mut Item>) {}
/// }
/// ```
pub trait Augment<T> {
    /// Returns the value an aggregate query over an empty range yields. It
    /// is also what `pull` receives in place of an absent child.
    fn identity() -> T;

    /// Recomputes the aggregate component of `node` from its own payload
    /// and its children's aggregates.
    fn pull(node: &mut T, left: &T, right: &T);

    /// Distributes any pending state held in `node` into its children and
    /// clears it on `node` itself. A `None` child is a discard target: that
    /// side's share of the pending state is dropped. Must be a no-op apart
    /// from the clear when `node` holds no pending state.
    fn push(node: &mut T, left: Option<&mut T>, right: Option<&mut T>);
}

/// Bookkeeping that maintains nothing, for plain ordered-collection use.
pub struct NoAugment;

impl<T> Augment<T> for NoAugment
where
    T: Default,
{
    fn identity() -> T {
        T::default()
    }

    fn pull(_node: &mut T, _left: &T, _right: &T) {}

    fn push(_node: &mut T, _left: Option<&mut T>, _right: Option<&mut T>) {}
}
