//! Arena-backed n-ary tree of tuplet subdivisions
//!
//! Every node lives in a single `Vec` owned by the tree; children are owned
//! index lists and parents are plain back-indices. A node is either an empty
//! leaf, a leaf holding one event, or an internal node with at least one child.

use std::collections::{BTreeMap, BTreeSet};

use num_integer::{gcd, lcm};
use num_rational::Ratio;
use thiserror::Error;

/// A snapped index may move at most `1 / QUANTIZATION_TOLERANCE` of the node width
const QUANTIZATION_TOLERANCE: usize = 32;

/// Errors raised by structural tree edits
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    /// A path did not resolve to a node
    #[error("no node at position {0:?}")]
    InvalidPosition(Vec<usize>),

    /// Children were requested on a node holding an event
    #[error("an event node cannot hold children")]
    EventNodeResize,

    /// An insertion index was past the end of the child list
    #[error("index {index} out of bounds for node of size {size}")]
    OutOfBounds { index: usize, size: usize },

    #[error("the root node cannot be detached")]
    DetachRoot,
}

pub type Result<T> = std::result::Result<T, TreeError>;

/// Handle to a node inside one `OpusTree`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
struct Node<T> {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    event: Option<T>,
}

impl<T> Node<T> {
    fn new(parent: Option<NodeId>) -> Self {
        Self {
            parent,
            children: Vec::new(),
            event: None,
        }
    }
}

/// Result of snapping a flat node onto a divisor grid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantizationMap {
    /// Number of slots in the chosen grid
    pub size: usize,
    /// Grid slot -> original flat indices. The key `size` is the overflow bucket.
    pub groups: BTreeMap<usize, Vec<usize>>,
}

impl QuantizationMap {
    /// Indices that rounded past the last slot and belong to the next beat
    pub fn overflow(&self) -> Option<&[usize]> {
        self.groups.get(&self.size).map(Vec::as_slice)
    }
}

#[derive(Debug, Clone)]
pub struct OpusTree<T> {
    nodes: Vec<Node<T>>,
    free: Vec<usize>,
    root: NodeId,
}

impl<T> Default for OpusTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> OpusTree<T> {
    /// A tree consisting of a single empty leaf
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(None)],
            free: Vec::new(),
            root: NodeId(0),
        }
    }

    /// A tree consisting of a single event leaf
    pub fn leaf(event: T) -> Self {
        let mut tree = Self::new();
        tree.nodes[0].event = Some(event);
        tree
    }

    /// An internal node owning `children` in order. No children gives an empty leaf.
    pub fn from_children(children: Vec<OpusTree<T>>) -> Self {
        let mut tree = Self::new();
        let root = tree.root;
        for child in children {
            let mut source = child;
            let source_root = source.root;
            let moved = tree.adopt_from(&mut source, source_root, Some(root));
            tree.node_mut(root).children.push(moved);
        }
        tree
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of live nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    fn node(&self, id: NodeId) -> &Node<T> {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node<T> {
        &mut self.nodes[id.0]
    }

    fn alloc(&mut self, parent: Option<NodeId>) -> NodeId {
        match self.free.pop() {
            Some(index) => {
                self.nodes[index] = Node::new(parent);
                NodeId(index)
            }
            None => {
                self.nodes.push(Node::new(parent));
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    /// Return a node and all its descendants to the free list
    fn release(&mut self, id: NodeId) {
        let children = std::mem::take(&mut self.node_mut(id).children);
        for child in children {
            self.release(child);
        }
        let node = self.node_mut(id);
        node.event = None;
        node.parent = None;
        self.free.push(id.0);
    }

    fn release_children(&mut self, id: NodeId) {
        let children = std::mem::take(&mut self.node_mut(id).children);
        for child in children {
            self.release(child);
        }
    }

    pub fn is_leaf(&self, id: NodeId) -> bool {
        self.node(id).children.is_empty()
    }

    pub fn is_event(&self, id: NodeId) -> bool {
        self.node(id).event.is_some()
    }

    pub fn size(&self, id: NodeId) -> usize {
        self.node(id).children.len()
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn event(&self, id: NodeId) -> Option<&T> {
        self.node(id).event.as_ref()
    }

    pub fn event_mut(&mut self, id: NodeId) -> Option<&mut T> {
        self.node_mut(id).event.as_mut()
    }

    pub fn get(&self, id: NodeId, index: usize) -> Result<NodeId> {
        let children = &self.node(id).children;
        children.get(index).copied().ok_or(TreeError::OutOfBounds {
            index,
            size: children.len(),
        })
    }

    /// Position of `id` within its parent's children
    pub fn index_of(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.children(parent).iter().position(|child| *child == id)
    }

    /// Resolve a path of child indices starting at the root
    pub fn node_at(&self, path: &[usize]) -> Result<NodeId> {
        let mut id = self.root;
        for (depth, index) in path.iter().enumerate() {
            id = match self.children(id).get(*index) {
                Some(child) => *child,
                None => return Err(TreeError::InvalidPosition(path[..=depth].to_vec())),
            };
        }
        Ok(id)
    }

    /// Path of child indices from the root to `id`
    pub fn path_of(&self, id: NodeId) -> Vec<usize> {
        let mut path = Vec::new();
        let mut current = id;
        while let Some(index) = self.index_of(current) {
            path.push(index);
            current = self.node(current).parent.unwrap_or(self.root);
        }
        path.reverse();
        path
    }

    /// Resize the child list. Without `preserve` every child is replaced by an empty leaf.
    pub fn set_size(&mut self, id: NodeId, size: usize, preserve: bool) -> Result<()> {
        if self.is_event(id) {
            return Err(TreeError::EventNodeResize);
        }
        if !preserve {
            self.release_children(id);
        }

        let current = self.size(id);
        if size < current {
            let tail = self.node_mut(id).children.split_off(size);
            for child in tail {
                self.release(child);
            }
        } else {
            for _ in current..size {
                let child = self.alloc(Some(id));
                self.node_mut(id).children.push(child);
            }
        }
        Ok(())
    }

    /// Place an event on `id`, dropping any children it had
    pub fn set_event(&mut self, id: NodeId, event: T) {
        self.release_children(id);
        self.node_mut(id).event = Some(event);
    }

    pub fn unset_event(&mut self, id: NodeId) -> Option<T> {
        self.node_mut(id).event.take()
    }

    /// Reset `id` to a sizeless leaf without an event
    pub fn empty(&mut self, id: NodeId) {
        self.release_children(id);
        self.node_mut(id).event = None;
    }

    /// Graft `subtree` as the child at `index` of `id`
    pub fn insert(&mut self, id: NodeId, index: usize, subtree: OpusTree<T>) -> Result<NodeId> {
        if self.is_event(id) {
            return Err(TreeError::EventNodeResize);
        }
        let size = self.size(id);
        if index > size {
            return Err(TreeError::OutOfBounds { index, size });
        }

        let mut source = subtree;
        let source_root = source.root;
        let child = self.adopt_from(&mut source, source_root, Some(id));
        self.node_mut(id).children.insert(index, child);
        Ok(child)
    }

    /// Remove `id` from its parent and return it as a standalone tree
    pub fn detach(&mut self, id: NodeId) -> Result<OpusTree<T>> {
        let parent = self.parent(id).ok_or(TreeError::DetachRoot)?;
        self.node_mut(parent).children.retain(|child| *child != id);

        let mut detached = OpusTree::new();
        let root = detached.root;
        detached.node_mut(root).event = self.node_mut(id).event.take();
        let children = std::mem::take(&mut self.node_mut(id).children);
        for child in children {
            let moved = detached.adopt_from(self, child, Some(root));
            detached.node_mut(root).children.push(moved);
        }
        self.node_mut(id).parent = None;
        self.free.push(id.0);
        Ok(detached)
    }

    /// Overwrite the content of `id` with `subtree`, keeping its place in the parent
    pub fn replace(&mut self, id: NodeId, subtree: OpusTree<T>) {
        self.empty(id);
        let mut source = subtree;
        let source_root = source.root;
        self.node_mut(id).event = source.node_mut(source_root).event.take();
        let children = std::mem::take(&mut source.node_mut(source_root).children);
        for child in children {
            let moved = self.adopt_from(&mut source, child, Some(id));
            self.node_mut(id).children.push(moved);
        }
    }

    /// Move the subtree at `source_id` out of `source` into this arena
    fn adopt_from(&mut self, source: &mut OpusTree<T>, source_id: NodeId, parent: Option<NodeId>) -> NodeId {
        let id = self.alloc(parent);
        let event = source.node_mut(source_id).event.take();
        let children = std::mem::take(&mut source.node_mut(source_id).children);
        source.node_mut(source_id).parent = None;
        source.free.push(source_id.0);

        self.node_mut(id).event = event;
        for child in children {
            let moved = self.adopt_from(source, child, Some(id));
            self.node_mut(id).children.push(moved);
        }
        id
    }

    /// Deep copy of the subtree at `id`, mapping every event through `f`
    pub fn copy_with<U, F>(&self, id: NodeId, f: &F) -> OpusTree<U>
    where
        F: Fn(&T) -> U,
    {
        let mut copy = OpusTree::new();
        let root = copy.root;
        self.copy_into(id, &mut copy, root, f);
        copy
    }

    fn copy_into<U, F>(&self, source: NodeId, target: &mut OpusTree<U>, target_id: NodeId, f: &F)
    where
        F: Fn(&T) -> U,
    {
        if let Some(event) = self.event(source) {
            target.node_mut(target_id).event = Some(f(event));
        }
        for child in self.children(source) {
            let copied = target.alloc(Some(target_id));
            target.node_mut(target_id).children.push(copied);
            self.copy_into(*child, target, copied, f);
        }
    }

    /// Read-only view of one node
    pub fn view(&self, id: NodeId) -> Subtree<'_, T> {
        Subtree { tree: self, id }
    }

    /// Pre-order walk over every node below and including `id`
    pub fn traverse<F>(&self, id: NodeId, visitor: &mut F)
    where
        F: FnMut(NodeId, Option<&T>),
    {
        visitor(id, self.event(id));
        for child in self.children(id) {
            self.traverse(*child, visitor);
        }
    }

    /// Every event below `id` with its path of `(index, size)` pairs, in tree order
    pub fn get_events_mapped(&self, id: NodeId) -> Vec<(Vec<(usize, usize)>, &T)> {
        let mut output = Vec::new();
        let mut path = Vec::new();
        self.collect_events(id, &mut path, &mut output);
        output
    }

    fn collect_events<'a>(
        &'a self,
        id: NodeId,
        path: &mut Vec<(usize, usize)>,
        output: &mut Vec<(Vec<(usize, usize)>, &'a T)>,
    ) {
        if let Some(event) = self.event(id) {
            output.push((path.clone(), event));
            return;
        }
        let size = self.size(id);
        for (index, child) in self.children(id).iter().enumerate() {
            path.push((index, size));
            self.collect_events(*child, path, output);
            path.pop();
        }
    }

    /// Every leaf below `id` as (offset, width) fractions of `id`'s span
    fn leaf_spans(&self, id: NodeId) -> Vec<(Ratio<usize>, Ratio<usize>, NodeId)> {
        let mut spans = Vec::new();
        let mut stack = vec![(id, Ratio::from_integer(0), Ratio::from_integer(1))];
        while let Some((current, offset, width)) = stack.pop() {
            let size = self.size(current);
            if size == 0 {
                spans.push((offset, width, current));
                continue;
            }
            let child_width = width / size;
            for (index, child) in self.children(current).iter().enumerate().rev() {
                stack.push((*child, offset + child_width * index, child_width));
            }
        }
        spans
    }

    /// True when every child of `id` is a leaf
    pub fn is_flat(&self, id: NodeId) -> bool {
        self.children(id).iter().all(|child| self.is_leaf(*child))
    }

    /// Collapse every single-child node into its child, recursively
    pub fn clear_singles(&mut self, id: NodeId) {
        let children = self.children(id).to_vec();
        for child in children {
            self.clear_singles(child);
        }
        if self.size(id) != 1 {
            return;
        }

        let only = self.children(id)[0];
        let event = self.node_mut(only).event.take();
        let grandchildren = std::mem::take(&mut self.node_mut(only).children);
        for grandchild in &grandchildren {
            self.node_mut(*grandchild).parent = Some(id);
        }
        self.node_mut(only).parent = None;
        self.free.push(only.0);

        let node = self.node_mut(id);
        node.children = grandchildren;
        node.event = event;
    }

    /// Snap the event-bearing children of a flat node onto the coarsest grid built from
    /// `divisors` that keeps every event within tolerance. Grids are products of any
    /// subset of `divisors`, tried smallest first; when none is within tolerance the
    /// grid with the least total error wins, the smaller grid breaking ties.
    pub fn get_quantization_map(&self, id: NodeId, divisors: &[usize]) -> QuantizationMap {
        let size = self.size(id);
        let indices: Vec<usize> = self
            .children(id)
            .iter()
            .enumerate()
            .filter(|(_, child)| self.is_event(**child))
            .map(|(index, _)| index)
            .collect();

        if size == 0 || indices.is_empty() {
            return QuantizationMap {
                size: 1,
                groups: BTreeMap::new(),
            };
        }

        let mut candidates = BTreeSet::new();
        for mask in 0..(1usize << divisors.len()) {
            let product: usize = divisors
                .iter()
                .enumerate()
                .filter(|(bit, _)| mask & (1 << bit) != 0)
                .map(|(_, divisor)| *divisor)
                .product();
            if product <= size {
                candidates.insert(product);
            }
        }

        let snap = |index: usize, grid: usize| -> (usize, usize) {
            let slot = (index * grid * 2 + size) / (size * 2);
            let error = (index * grid).abs_diff(slot * size);
            (slot, error)
        };

        let mut chosen = None;
        let mut best: Option<(Ratio<usize>, usize)> = None;
        for grid in &candidates {
            let errors: Vec<usize> = indices.iter().map(|index| snap(*index, *grid).1).collect();
            if errors.iter().all(|error| error * QUANTIZATION_TOLERANCE <= size * grid) {
                chosen = Some(*grid);
                break;
            }
            let total = Ratio::new(errors.iter().sum::<usize>(), *grid);
            if best.map_or(true, |(lowest, _)| total < lowest) {
                best = Some((total, *grid));
            }
        }
        let grid = chosen.or(best.map(|(_, grid)| grid)).unwrap_or(1);

        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for index in indices {
            let (slot, _) = snap(index, grid);
            groups.entry(slot).or_default().push(index);
        }
        QuantizationMap { size: grid, groups }
    }

    fn structurally_equal(&self, id: NodeId, other: &OpusTree<T>, other_id: NodeId) -> bool
    where
        T: PartialEq,
    {
        if self.event(id) != other.event(other_id) || self.size(id) != other.size(other_id) {
            return false;
        }
        self.children(id)
            .iter()
            .zip(other.children(other_id))
            .all(|(a, b)| self.structurally_equal(*a, other, *b))
    }
}

impl<T: Clone> OpusTree<T> {
    /// Deep copy of the subtree at `id`
    pub fn subtree(&self, id: NodeId) -> OpusTree<T> {
        self.copy_with(id, &T::clone)
    }

    /// Flat copy of `id`: one child per slot of the least common grid of all leaves
    pub fn flatten(&self, id: NodeId) -> OpusTree<T> {
        if self.is_leaf(id) {
            return self.subtree(id);
        }

        let spans = self.leaf_spans(id);
        let size = spans
            .iter()
            .fold(1, |acc, (_, width, _)| lcm(acc, *width.denom()));

        let mut flat = OpusTree::new();
        let root = flat.root;
        // Sizing a fresh empty root cannot fail
        let _ = flat.set_size(root, size, false);
        for (offset, _, leaf) in spans {
            if let Some(event) = self.event(leaf) {
                let index = (offset * size).to_integer();
                let slot = flat.children(root)[index];
                flat.set_event(slot, event.clone());
            }
        }
        flat
    }

    /// Rebuild `id` with the least nesting that keeps every event at its relative position
    pub fn reduce(&mut self, id: NodeId) {
        let flat = self.flatten(id);
        let root = flat.root;
        let size = flat.size(root).max(1);
        let events: Vec<(usize, T)> = if flat.is_leaf(root) {
            flat.event(root).map(|event| (0, event.clone())).into_iter().collect()
        } else {
            flat.children(root)
                .iter()
                .enumerate()
                .filter_map(|(index, child)| flat.event(*child).map(|event| (index, event.clone())))
                .collect()
        };
        self.replace(id, Self::build_reduced(&events, size));
    }

    fn build_reduced(events: &[(usize, T)], size: usize) -> OpusTree<T> {
        if events.is_empty() {
            return OpusTree::new();
        }

        let divisor = events.iter().fold(size, |acc, (index, _)| gcd(acc, *index));
        let size = size / divisor;
        if size == 1 {
            return OpusTree::leaf(events[0].1.clone());
        }
        let events: Vec<(usize, T)> = events
            .iter()
            .map(|(index, event)| (index / divisor, event.clone()))
            .collect();

        let primes = prime_factors(size);
        if primes.len() == 1 {
            let mut tree = OpusTree::new();
            let root = tree.root;
            let _ = tree.set_size(root, size, false);
            for (index, event) in events {
                let slot = tree.children(root)[index];
                tree.set_event(slot, event);
            }
            return tree;
        }

        let mut best: Option<OpusTree<T>> = None;
        for prime in primes.into_iter().collect::<BTreeSet<_>>() {
            let width = size / prime;
            let mut tree = OpusTree::new();
            let root = tree.root;
            for group in 0..prime {
                let members: Vec<(usize, T)> = events
                    .iter()
                    .filter(|(index, _)| index / width == group)
                    .map(|(index, event)| (index % width, event.clone()))
                    .collect();
                let child = Self::build_reduced(&members, width);
                let _ = tree.insert(root, group, child);
            }
            if best.as_ref().map_or(true, |current| tree.node_count() < current.node_count()) {
                best = Some(tree);
            }
        }
        best.unwrap_or_default()
    }
}

impl<T: PartialEq> PartialEq for OpusTree<T> {
    fn eq(&self, other: &Self) -> bool {
        self.structurally_equal(self.root, other, other.root)
    }
}

/// Prime factors of `n` with multiplicity, ascending
fn prime_factors(mut n: usize) -> Vec<usize> {
    let mut factors = Vec::new();
    let mut candidate = 2;
    while candidate * candidate <= n {
        while n % candidate == 0 {
            factors.push(candidate);
            n /= candidate;
        }
        candidate += 1;
    }
    if n > 1 {
        factors.push(n);
    }
    factors
}

/// Borrowed handle on one node of an `OpusTree`
#[derive(Debug)]
pub struct Subtree<'a, T> {
    tree: &'a OpusTree<T>,
    id: NodeId,
}

impl<'a, T> Clone for Subtree<'a, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, T> Copy for Subtree<'a, T> {}

impl<'a, T> Subtree<'a, T> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn tree(&self) -> &'a OpusTree<T> {
        self.tree
    }

    pub fn size(&self) -> usize {
        self.tree.size(self.id)
    }

    pub fn is_leaf(&self) -> bool {
        self.tree.is_leaf(self.id)
    }

    pub fn is_event(&self) -> bool {
        self.tree.is_event(self.id)
    }

    pub fn event(&self) -> Option<&'a T> {
        self.tree.event(self.id)
    }

    pub fn get(&self, index: usize) -> Option<Subtree<'a, T>> {
        self.tree.get(self.id, index).ok().map(|id| self.tree.view(id))
    }

    pub fn children(&self) -> impl Iterator<Item = Subtree<'a, T>> + 'a {
        let tree = self.tree;
        tree.children(self.id).iter().map(move |id| tree.view(*id))
    }
}

impl<'a, T: Clone> Subtree<'a, T> {
    /// Owned deep copy of this node
    pub fn to_tree(&self) -> OpusTree<T> {
        self.tree.subtree(self.id)
    }
}
