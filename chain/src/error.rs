use thiserror::Error;
use types::phase0::primitives::{CommitteeIndex, Slot, H256};

use crate::step::Step;

#[derive(Debug, Error)]
pub enum Error {
    #[error("parent block is not in the unfinalized chain: {parent_root:?}")]
    ParentUnknown { parent_root: H256 },
    #[error("block is not newer than its parent (block_slot: {block_slot}, parent_slot: {parent_slot})")]
    BlockNotNewerThanParent { block_slot: Slot, parent_slot: Slot },
    #[error("block requires too many empty slots to be processed (from: {from}, to: {to}, maximum: {maximum})")]
    TooManyEmptySlots { from: Slot, to: Slot, maximum: u64 },
    #[error("operation was interrupted")]
    Interrupted,
    #[error("block was added but its checkpoints were not adopted: {block_root:?}")]
    CheckpointsNotAdopted { block_root: H256 },
    #[error("finalized entry does not continue the chain (expected: {expected}, actual: {actual})")]
    NonContiguousStep { expected: Step, actual: Step },
    #[error("finalized entry is older than the end of the chain (end: {end}, actual: {actual})")]
    StepOutOfOrder { end: Step, actual: Step },
    #[error(
        "finalized entry does not link to the last finalized block \
         (expected: {expected:?}, actual: {actual:?}, step: {step})"
    )]
    FinalizedParentMismatch {
        expected: H256,
        actual: H256,
        step: Step,
    },
    #[error("state not found: {state_root:?}")]
    StateNotFound { state_root: H256 },
    #[error("block is unknown: {block_root:?}")]
    BlockUnknown { block_root: H256 },
    #[error("committee is unknown (slot: {slot}, index: {index})")]
    CommitteeUnknown { slot: Slot, index: CommitteeIndex },
    #[error("no canonical entry at step {step}")]
    StepNotFound { step: Step },
}
