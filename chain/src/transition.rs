use anyhow::Result;
use types::{
    phase0::{
        containers::Attestation,
        primitives::{CommitteeIndex, Slot, ValidatorIndex},
    },
    traits::{BeaconBlock, BeaconState},
};

/// Data derived from a state that is expensive to compute and shared by all states in an epoch.
pub trait EpochContext: Clone + Send + Sync + 'static {
    fn beacon_committee(&self, slot: Slot, index: CommitteeIndex) -> Option<&[ValidatorIndex]>;
}

/// The state transition function.
///
/// Implementations must not depend on anything other than their arguments.
pub trait Transition: Send + Sync + 'static {
    type State: BeaconState;
    type Block: BeaconBlock;
    type EpochContext: EpochContext;

    fn epoch_context(&self, state: &Self::State) -> Result<Self::EpochContext>;

    /// Advances `state` through empty slots up to and including `slot`.
    ///
    /// `epoch_context` must be updated if an epoch boundary is crossed.
    fn process_slots(
        &self,
        state: &mut Self::State,
        epoch_context: &mut Self::EpochContext,
        slot: Slot,
    ) -> Result<()>;

    /// Applies `block` to a state that has already been advanced to the slot of the block.
    fn process_block(
        &self,
        state: &mut Self::State,
        epoch_context: &mut Self::EpochContext,
        block: &Self::Block,
        verify: bool,
    ) -> Result<()>;

    /// Returns the sorted and deduplicated indices of validators that participated in
    /// `attestation`.
    fn attesting_indices(
        &self,
        attestation: &Attestation,
        committee: &[ValidatorIndex],
    ) -> Result<Vec<ValidatorIndex>>;
}
