//! Tuplet subdivision trees
//!
//! `OpusTree<T>` is the recursive beat structure every channel line is built
//! from: a beat is a tree whose leaves hold at most one event, and whose
//! internal nodes split their span evenly among their children.

pub mod tree;

pub use tree::{NodeId, OpusTree, QuantizationMap, Subtree, TreeError};
