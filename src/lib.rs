//! An order-statistic treap with generic two-directional range bookkeeping.
//!
//! [`LazyTreap`] is a randomized self-balancing binary search tree augmented
//! with subtree sizes, so rank and select queries run in `O(log N)`, plus a
//! pair of user-supplied callbacks ([`Augment`]) that maintain an upward
//! aggregate and distribute downward lazy updates. Range aggregates and
//! range updates over `[begin, end)` decompose into two boundary-to-ancestor
//! walks that meet at their lowest common ancestor and therefore also run in
//! `O(log N)`.
//!
//! Repeated insertions of an equal key follow one of three policies fixed at
//! construction: [`DuplicatePolicy::Ignore`], [`DuplicatePolicy::Count`],
//! and [`DuplicatePolicy::Store`].

mod augment;
mod treap;

pub use self::augment::{Augment, NoAugment};
pub use self::treap::{Cursor, DuplicatePolicy, Iter, LazyTreap};
