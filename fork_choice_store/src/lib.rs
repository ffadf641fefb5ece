//! Fork choice over blocks and empty slots.
//!
//! Every slot a chain has passed through is a node in a [`ProtoArray`], identified by a
//! [`NodeRef`]. A block at slot `s` is the node `(block_root, s)`. A slot `s` that passed without a
//! block on top of block `b` is the node `(b, s)`. Blocks and the empty slots they compete with are
//! siblings, so a vote for an empty slot counts against the blocks proposed in that slot.
//!
//! Nodes are stored in insertion order and parents always precede their children. Weights and best
//! descendants are computed by walking the array backwards, as in [`proto_array`].
//!
//! [`VoteStore`] keeps the latest vote of each validator. Votes are converted into weight changes
//! only when a head is requested or the justified checkpoint changes.
//!
//! [`proto_array`]: https://github.com/sigp/lighthouse/tree/stable/consensus/proto_array

pub use crate::{
    error::Error,
    fork_choice::ForkChoice,
    misc::{Difference, Index, NodeRef, PruneSink, Score, Weight},
    proto_array::{ProtoArray, ProtoNode},
    vote_store::{VoteMoves, VoteStore, VoteTracker},
};

mod error;
mod fork_choice;
mod misc;
mod proto_array;
mod vote_store;
