//! The order-statistic lazy treap and its indexed BST core.

mod core;
mod node;
mod tree;

pub use self::core::DuplicatePolicy;
pub use self::tree::{Cursor, Iter, LazyTreap};
