use thiserror::Error;
use types::phase0::{containers::Checkpoint, primitives::Epoch};

use crate::misc::NodeRef;

#[derive(Debug, Error)]
pub enum Error {
    #[error("anchor is not in fork choice: {anchor}")]
    UnknownAnchor { anchor: NodeRef },
    #[error(
        "no viable head \
         (anchor: {anchor}, head: {head}, justified_epoch: {justified_epoch}, \
         finalized_epoch: {finalized_epoch})"
    )]
    NoViableHead {
        anchor: NodeRef,
        head: NodeRef,
        justified_epoch: Epoch,
        finalized_epoch: Epoch,
    },
    #[error("number of deltas does not match number of nodes (deltas: {deltas}, nodes: {nodes})")]
    LengthMismatch { deltas: usize, nodes: usize },
    #[error("weight overflowed while applying score changes at {node}")]
    DeltaOverflow { node: NodeRef },
    #[error("checkpoint regressed (old: {old}, new: {new})")]
    RegressingCheckpoint { old: Checkpoint, new: Checkpoint },
    #[error(
        "checkpoint is not a descendant of the finalized checkpoint \
         (checkpoint: {checkpoint}, finalized: {finalized})"
    )]
    CheckpointNotInFinalizedSubtree {
        checkpoint: Checkpoint,
        finalized: Checkpoint,
    },
    #[error("node is not in the pinned subtree (pin: {pin}, node: {node})")]
    NotInPinnedSubtree { pin: NodeRef, node: NodeRef },
    #[error("pin target is not in fork choice: {pin}")]
    PinUnreachable { pin: NodeRef },
}
