//! Per-path mutation tracking.

pub mod mounttable;
pub mod tree;

pub use mounttable::snapshot_mounts;
pub use tree::{PathState, PathStateTree, TreeWalker};
