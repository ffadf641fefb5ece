use core::iter;
use std::collections::HashMap;

use anyhow::{ensure, Result};
use hash_hasher::HashedMap;
use log::debug;
use types::phase0::{
    consts::GENESIS_EPOCH,
    primitives::{Epoch, Slot, H256},
};

use crate::{
    error::Error,
    misc::{Difference, Index, NodeRef, PruneSink, Score, Weight},
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ProtoNode {
    node_ref: NodeRef,
    transition_parent: Option<Index>,
    forkchoice_parent: Option<Index>,
    parent_root: H256,
    justified_epoch: Epoch,
    finalized_epoch: Epoch,
    weight: Weight,
    best_child: Option<Index>,
    best_descendant: Option<Index>,
}

impl ProtoNode {
    const fn new(
        node_ref: NodeRef,
        transition_parent: Option<Index>,
        forkchoice_parent: Option<Index>,
        parent_root: H256,
        justified_epoch: Epoch,
        finalized_epoch: Epoch,
    ) -> Self {
        Self {
            node_ref,
            transition_parent,
            forkchoice_parent,
            parent_root,
            justified_epoch,
            finalized_epoch,
            weight: 0,
            best_child: None,
            best_descendant: None,
        }
    }

    #[must_use]
    pub const fn node_ref(&self) -> NodeRef {
        self.node_ref
    }

    #[must_use]
    pub const fn root(&self) -> H256 {
        self.node_ref.root
    }

    #[must_use]
    pub const fn slot(&self) -> Slot {
        self.node_ref.slot
    }

    /// The node whose post-state this node's state is derived from.
    #[must_use]
    pub const fn transition_parent(&self) -> Option<Index> {
        self.transition_parent
    }

    /// The node whose weight this node's weight propagates to.
    ///
    /// For empty slot nodes this is the same as [`Self::transition_parent`].
    /// Block nodes skip their pre-state node so that a block and the empty slot it replaces
    /// compete as siblings.
    #[must_use]
    pub const fn forkchoice_parent(&self) -> Option<Index> {
        self.forkchoice_parent
    }

    #[must_use]
    pub const fn parent_root(&self) -> H256 {
        self.parent_root
    }

    #[must_use]
    pub const fn justified_epoch(&self) -> Epoch {
        self.justified_epoch
    }

    #[must_use]
    pub const fn finalized_epoch(&self) -> Epoch {
        self.finalized_epoch
    }

    #[must_use]
    pub const fn weight(&self) -> Weight {
        self.weight
    }

    #[must_use]
    pub const fn best_child(&self) -> Option<Index> {
        self.best_child
    }

    #[must_use]
    pub const fn best_descendant(&self) -> Option<Index> {
        self.best_descendant
    }

    #[must_use]
    pub fn has_block(&self) -> bool {
        self.parent_root != self.node_ref.root
    }
}

// Nodes sharing a root always occupy consecutive slots, so the first and last indices are enough to
// locate any of them.
#[derive(Clone, Copy, Debug)]
struct RootSpan {
    first: Index,
    last: Index,
}

/// Arena of fork choice nodes in insertion order.
///
/// Parents always precede their children, which lets weights and best descendants be computed in a
/// single backward pass.
#[derive(Clone, Default, Debug)]
pub struct ProtoArray {
    justified_epoch: Epoch,
    finalized_epoch: Epoch,
    nodes: Vec<ProtoNode>,
    indices: HashMap<NodeRef, Index>,
    spans: HashedMap<H256, RootSpan>,
    connections_dirty: bool,
}

impl ProtoArray {
    #[must_use]
    pub fn new(
        anchor: NodeRef,
        anchor_parent_root: H256,
        justified_epoch: Epoch,
        finalized_epoch: Epoch,
    ) -> Self {
        let mut proto_array = Self {
            justified_epoch,
            finalized_epoch,
            ..Self::default()
        };

        proto_array.push(ProtoNode::new(
            anchor,
            None,
            None,
            anchor_parent_root,
            justified_epoch,
            finalized_epoch,
        ));

        proto_array
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn contains(&self, node_ref: NodeRef) -> bool {
        self.indices.contains_key(&node_ref)
    }

    #[must_use]
    pub fn contains_root(&self, root: H256) -> bool {
        self.spans.contains_key(&root)
    }

    #[must_use]
    pub fn node(&self, index: Index) -> Option<&ProtoNode> {
        self.nodes.get(index)
    }

    #[must_use]
    pub fn nodes(&self) -> &[ProtoNode] {
        &self.nodes
    }

    #[must_use]
    pub fn index_of(&self, node_ref: NodeRef) -> Option<Index> {
        self.indices.get(&node_ref).copied()
    }

    #[must_use]
    pub const fn indices(&self) -> &HashMap<NodeRef, Index> {
        &self.indices
    }

    #[must_use]
    pub const fn justified_epoch(&self) -> Epoch {
        self.justified_epoch
    }

    #[must_use]
    pub const fn finalized_epoch(&self) -> Epoch {
        self.finalized_epoch
    }

    /// Slot of the earliest retained node with `root`.
    ///
    /// This is the slot of the block unless the block node has been pruned.
    #[must_use]
    pub fn earliest_slot(&self, root: H256) -> Option<Slot> {
        let span = self.spans.get(&root)?;
        Some(self.nodes[span.first].slot())
    }

    /// Finds the node with `node_ref.root` at the highest slot not after `node_ref.slot`.
    #[must_use]
    pub fn resolve(&self, node_ref: NodeRef) -> Option<(NodeRef, Index)> {
        if let Some(index) = self.index_of(node_ref) {
            return Some((node_ref, index));
        }

        let span = self.spans.get(&node_ref.root)?;
        let first = self.nodes[span.first].slot();
        let last = self.nodes[span.last].slot();

        if node_ref.slot < first {
            return None;
        }

        let resolved = NodeRef::new(node_ref.root, node_ref.slot.min(last));
        let index = self.index_of(resolved)?;

        Some((resolved, index))
    }

    /// Iterates over `index` and its ancestors through transition parents.
    pub fn transition_ancestors(&self, index: Index) -> impl Iterator<Item = &ProtoNode> {
        iter::successors(self.nodes.get(index), |node| {
            node.transition_parent
                .and_then(|parent| self.nodes.get(parent))
        })
    }

    /// Extends the chain ending in the latest node of `parent_root` with empty slot nodes up to
    /// and including `slot`.
    ///
    /// Returns `false` if `parent_root` is unknown or `slot` precedes the nodes of `parent_root`.
    pub fn process_slot(
        &mut self,
        parent_root: H256,
        slot: Slot,
        justified_epoch: Epoch,
        finalized_epoch: Epoch,
    ) -> bool {
        if self.contains(NodeRef::new(parent_root, slot)) {
            return true;
        }

        let Some(span) = self.spans.get(&parent_root) else {
            return false;
        };

        let mut previous = span.last;
        let latest_slot = self.nodes[previous].slot();

        if slot < latest_slot {
            return false;
        }

        for slot in latest_slot + 1..=slot {
            previous = self.push(ProtoNode::new(
                NodeRef::new(parent_root, slot),
                Some(previous),
                Some(previous),
                parent_root,
                justified_epoch,
                finalized_epoch,
            ));
        }

        self.connections_dirty = true;

        true
    }

    /// Inserts the node of a block along with any empty slot nodes needed to reach it.
    ///
    /// Returns `true` if the block is already present.
    /// Returns `false` if the parent is unknown or not older than the block.
    pub fn process_block(
        &mut self,
        parent_root: H256,
        block_root: H256,
        block_slot: Slot,
        justified_epoch: Epoch,
        finalized_epoch: Epoch,
    ) -> bool {
        if self.contains_root(block_root) {
            return true;
        }

        match self.earliest_slot(parent_root) {
            Some(parent_slot) if parent_slot < block_slot => {}
            _ => return false,
        }

        if !self.process_slot(parent_root, block_slot, justified_epoch, finalized_epoch) {
            return false;
        }

        let pre_state = self.indices[&NodeRef::new(parent_root, block_slot)];
        let forkchoice_parent = self.nodes[pre_state].forkchoice_parent;

        self.push(ProtoNode::new(
            NodeRef::new(block_root, block_slot),
            Some(pre_state),
            forkchoice_parent,
            parent_root,
            justified_epoch,
            finalized_epoch,
        ));

        self.connections_dirty = true;

        true
    }

    /// Adds `deltas` to node weights, propagating each delta to every forkchoice ancestor,
    /// and recomputes best children using the new viability epochs.
    ///
    /// Nothing is changed if a weight overflows.
    pub fn apply_score_changes(
        &mut self,
        mut deltas: Vec<Difference>,
        justified_epoch: Epoch,
        finalized_epoch: Epoch,
    ) -> Result<()> {
        ensure!(
            deltas.len() == self.nodes.len(),
            Error::LengthMismatch {
                deltas: deltas.len(),
                nodes: self.nodes.len(),
            },
        );

        let mut weights = self.nodes.iter().map(ProtoNode::weight).collect::<Vec<_>>();

        for index in (0..self.nodes.len()).rev() {
            let delta = deltas[index];

            if delta == 0 {
                continue;
            }

            let node = &self.nodes[index];

            weights[index] = weights[index]
                .checked_add(delta)
                .ok_or(Error::DeltaOverflow {
                    node: node.node_ref,
                })?;

            if let Some(parent) = node.forkchoice_parent {
                deltas[parent] = deltas[parent]
                    .checked_add(delta)
                    .ok_or(Error::DeltaOverflow {
                        node: self.nodes[parent].node_ref,
                    })?;
            }
        }

        for (node, weight) in self.nodes.iter_mut().zip(weights) {
            node.weight = weight;
        }

        self.justified_epoch = justified_epoch;
        self.finalized_epoch = finalized_epoch;

        self.update_connections();

        Ok(())
    }

    /// Returns the best descendant of `anchor`, or `anchor` itself if it has none.
    pub fn find_head(&mut self, anchor: NodeRef) -> Result<NodeRef> {
        if self.connections_dirty {
            self.update_connections();
        }

        let anchor_index = self
            .index_of(anchor)
            .ok_or(Error::UnknownAnchor { anchor })?;

        let head_index = self.nodes[anchor_index]
            .best_descendant
            .unwrap_or(anchor_index);

        let head = &self.nodes[head_index];

        ensure!(
            self.is_viable(head),
            Error::NoViableHead {
                anchor,
                head: head.node_ref,
                justified_epoch: self.justified_epoch,
                finalized_epoch: self.finalized_epoch,
            },
        );

        Ok(head.node_ref)
    }

    /// Checks whether `root` is `anchor_root` or one of its descendants.
    ///
    /// The first element of the returned pair is `true` if either root is unknown.
    #[must_use]
    pub fn in_subtree(&self, anchor_root: H256, root: H256) -> (bool, bool) {
        if anchor_root == root {
            return (false, true);
        }

        let (Some(anchor_span), Some(span)) = (self.spans.get(&anchor_root), self.spans.get(&root))
        else {
            return (true, false);
        };

        let anchor_index = anchor_span.first;
        let mut index = span.first;

        if index < anchor_index || self.nodes[index].slot() <= self.nodes[anchor_index].slot() {
            return (false, false);
        }

        let best_descendant = self.nodes[anchor_span.last].best_descendant;

        if best_descendant.is_some_and(|descendant| self.nodes[descendant].root() == root) {
            return (false, true);
        }

        loop {
            let node = &self.nodes[index];

            if node.root() == anchor_root {
                return (false, true);
            }

            match node.forkchoice_parent {
                Some(parent) if parent >= anchor_index => index = parent,
                _ => return (false, false),
            }
        }
    }

    /// Removes every node inserted before `anchor`, reporting each one to `sink`.
    ///
    /// Nodes on the transition lineage of the head reachable from `anchor` are reported as
    /// canonical.
    pub fn on_prune(&mut self, anchor: NodeRef, sink: &mut impl PruneSink) -> Result<()> {
        if self.connections_dirty {
            self.update_connections();
        }

        let anchor_index = self
            .index_of(anchor)
            .ok_or(Error::UnknownAnchor { anchor })?;

        if anchor_index == 0 {
            return Ok(());
        }

        let head_index = self.nodes[anchor_index]
            .best_descendant
            .unwrap_or(anchor_index);

        let mut canonical = vec![false; anchor_index];

        let mut lineage = Some(head_index);

        while let Some(index) = lineage {
            if let Some(flag) = canonical.get_mut(index) {
                *flag = true;
            }

            lineage = self.nodes[index].transition_parent;
        }

        let mut pruned = anchor_index;
        let mut outcome = Ok(());

        for (index, node) in self.nodes[..anchor_index].iter().enumerate() {
            if let Err(error) = sink.on_pruned_node(node, canonical[index]) {
                pruned = index;
                outcome = Err(error);
                break;
            }
        }

        self.remove_prefix(pruned);

        debug!("pruned {pruned} fork choice nodes preceding {anchor}");

        outcome
    }

    fn push(&mut self, node: ProtoNode) -> Index {
        let index = self.nodes.len();

        self.indices.insert(node.node_ref, index);

        self.spans
            .entry(node.root())
            .and_modify(|span| span.last = index)
            .or_insert(RootSpan {
                first: index,
                last: index,
            });

        self.nodes.push(node);

        index
    }

    fn remove_prefix(&mut self, count: usize) {
        if count == 0 {
            return;
        }

        let shift = |index: Option<Index>| index.and_then(|index| index.checked_sub(count));

        self.nodes.drain(..count);

        for node in &mut self.nodes {
            node.transition_parent = shift(node.transition_parent);
            node.forkchoice_parent = shift(node.forkchoice_parent);
            node.best_child = shift(node.best_child);
            node.best_descendant = shift(node.best_descendant);
        }

        let nodes = core::mem::take(&mut self.nodes);

        self.indices.clear();
        self.spans.clear();

        for node in nodes {
            self.push(node);
        }

        self.connections_dirty = true;
    }

    // Best children are recomputed from scratch on every pass.
    // A child that no longer leads to a viable head is dropped even if no weights changed.
    fn update_connections(&mut self) {
        for node in &mut self.nodes {
            node.best_child = None;
            node.best_descendant = None;
        }

        for index in (0..self.nodes.len()).rev() {
            if let Some(parent) = self.nodes[index].forkchoice_parent {
                self.maybe_update_best_child_and_descendant(parent, index);
            }
        }

        self.connections_dirty = false;
    }

    fn maybe_update_best_child_and_descendant(&mut self, parent: Index, child: Index) {
        if !self.leads_to_viable_head(child) {
            return;
        }

        let replace = match self.nodes[parent].best_child {
            Some(best_child) => self.score(child) > self.score(best_child),
            None => true,
        };

        if replace {
            let best_descendant = self.nodes[child].best_descendant.unwrap_or(child);
            let parent = &mut self.nodes[parent];
            parent.best_child = Some(child);
            parent.best_descendant = Some(best_descendant);
        }
    }

    fn score(&self, index: Index) -> Score {
        let node = &self.nodes[index];
        let head = &self.nodes[node.best_descendant.unwrap_or(index)];
        (node.weight, head.has_block(), head.slot(), head.root())
    }

    fn leads_to_viable_head(&self, index: Index) -> bool {
        let node = &self.nodes[index];

        node.best_descendant
            .is_some_and(|descendant| self.is_viable(&self.nodes[descendant]))
            || self.is_viable(node)
    }

    fn is_viable(&self, node: &ProtoNode) -> bool {
        let justified_matches = self.justified_epoch == GENESIS_EPOCH
            || node.justified_epoch == self.justified_epoch;

        let finalized_matches = self.finalized_epoch == GENESIS_EPOCH
            || node.finalized_epoch == self.finalized_epoch;

        justified_matches && finalized_matches
    }
}
