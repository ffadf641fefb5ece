use anyhow::Result;
use derive_more::Display;
use static_assertions::assert_eq_size;
use types::phase0::primitives::{Slot, H256};

use crate::proto_array::ProtoNode;

/// Position of a node in [`ProtoArray`](crate::ProtoArray).
///
/// Indices are only stable between prunes.
pub type Index = usize;

pub type Weight = i64;

pub type Difference = i64;

/// Ordering used to pick the best child of a node.
///
/// The components are the weight of the child followed by properties of the head it leads to:
/// whether that head is a block, its slot and its root.
pub type Score = (Weight, bool, Slot, H256);

/// A block root paired with a slot.
///
/// The node of a block is `(block_root, block_slot)`.
/// Slots that follow the block without a block of their own are represented by
/// `(block_root, slot)`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug, Display)]
#[display("{root:?}@{slot}")]
pub struct NodeRef {
    pub root: H256,
    pub slot: Slot,
}

assert_eq_size!(NodeRef, [u64; 5]);

impl NodeRef {
    #[must_use]
    pub const fn new(root: H256, slot: Slot) -> Self {
        Self { root, slot }
    }
}

/// Receives nodes removed from [`ProtoArray`](crate::ProtoArray) when it is pruned.
///
/// Nodes are reported oldest first. If the sink fails, only the nodes reported before the failing
/// one are removed.
pub trait PruneSink {
    fn on_pruned_node(&mut self, node: &ProtoNode, canonical: bool) -> Result<()>;
}
