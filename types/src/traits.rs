use crate::phase0::{
    containers::Checkpoint,
    primitives::{Gwei, Slot, H256},
};

/// [`hash_tree_root`](https://github.com/ethereum/consensus-specs/blob/v1.3.0/ssz/simple-serialize.md#merkleization)
///
/// Merkleization is implemented by the SSZ layer. Fork choice and storage only consume the roots.
pub trait SszHash {
    fn hash_tree_root(&self) -> H256;
}

pub trait BeaconState: SszHash + Clone + Send + Sync + 'static {
    fn slot(&self) -> Slot;

    fn current_justified_checkpoint(&self) -> Checkpoint;

    fn finalized_checkpoint(&self) -> Checkpoint;

    /// Effective balances indexed by validator index.
    ///
    /// Validators that are inactive or slashed in the current epoch must be given a balance of 0.
    fn active_balances(&self) -> Vec<Gwei>;
}

pub trait BeaconBlock: SszHash + Send + Sync + 'static {
    fn slot(&self) -> Slot;

    fn parent_root(&self) -> H256;
}
