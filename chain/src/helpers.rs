use std::sync::Arc;

use anyhow::{bail, ensure, Result};
use bitvec::vec::BitVec;
use serde::{Deserialize, Serialize};
use types::{
    phase0::{
        containers::{Attestation, AttestationData, Checkpoint},
        primitives::{CommitteeIndex, Epoch, Gwei, Slot, ValidatorIndex, H256},
    },
    traits::{BeaconBlock, BeaconState, SszHash},
};

use crate::{
    entry::HotEntry,
    state_store::StateStore,
    transition::{EpochContext, Transition},
};

pub const VALIDATOR_COUNT: usize = 4;
pub const BALANCE: Gwei = 32;

#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct MockState {
    pub slot: Slot,
    pub latest_block_root: H256,
    pub current_justified_checkpoint: Checkpoint,
    pub finalized_checkpoint: Checkpoint,
    pub balances: Vec<Gwei>,
}

impl SszHash for MockState {
    fn hash_tree_root(&self) -> H256 {
        let mut bytes = self.latest_block_root.to_fixed_bytes();

        xor(&mut bytes[..8], self.slot);
        xor(&mut bytes[8..16], self.current_justified_checkpoint.epoch);
        xor(&mut bytes[16..24], self.finalized_checkpoint.epoch);
        bytes[31] ^= 0x5a;

        H256(bytes)
    }
}

impl BeaconState for MockState {
    fn slot(&self) -> Slot {
        self.slot
    }

    fn current_justified_checkpoint(&self) -> Checkpoint {
        self.current_justified_checkpoint
    }

    fn finalized_checkpoint(&self) -> Checkpoint {
        self.finalized_checkpoint
    }

    fn active_balances(&self) -> Vec<Gwei> {
        self.balances.clone()
    }
}

/// A block that carries the checkpoints its state transition would produce.
#[derive(Clone, PartialEq, Eq, Default, Debug)]
pub struct MockBlock {
    pub slot: Slot,
    pub parent_root: H256,
    pub graffiti: u8,
    pub justified_checkpoint: Option<Checkpoint>,
    pub finalized_checkpoint: Option<Checkpoint>,
    pub invalid: bool,
}

impl MockBlock {
    pub fn child(parent_root: H256, slot: Slot) -> Self {
        Self {
            slot,
            parent_root,
            ..Self::default()
        }
    }

    pub fn with_graffiti(self, graffiti: u8) -> Self {
        Self { graffiti, ..self }
    }

    pub fn justifying(self, epoch: Epoch, root: H256) -> Self {
        Self {
            justified_checkpoint: Some(Checkpoint { epoch, root }),
            ..self
        }
    }

    pub fn finalizing(self, epoch: Epoch, root: H256) -> Self {
        Self {
            finalized_checkpoint: Some(Checkpoint { epoch, root }),
            ..self
        }
    }

    pub fn root(&self) -> H256 {
        self.hash_tree_root()
    }
}

impl SszHash for MockBlock {
    fn hash_tree_root(&self) -> H256 {
        let mut bytes = [0; 32];

        bytes[..8].copy_from_slice(&self.slot.to_le_bytes());

        for (byte, (low, high)) in bytes[8..24]
            .iter_mut()
            .zip(self.parent_root[..16].iter().zip(&self.parent_root[16..]))
        {
            *byte = low ^ high;
        }

        bytes[24] = self.graffiti;
        bytes[31] = 0xb1;

        H256(bytes)
    }
}

impl BeaconBlock for MockBlock {
    fn slot(&self) -> Slot {
        self.slot
    }

    fn parent_root(&self) -> H256 {
        self.parent_root
    }
}

#[derive(Clone, Debug)]
pub struct MockEpochContext {
    committee: Arc<[ValidatorIndex]>,
}

impl EpochContext for MockEpochContext {
    fn beacon_committee(&self, _slot: Slot, index: CommitteeIndex) -> Option<&[ValidatorIndex]> {
        (index == 0).then_some(&*self.committee)
    }
}

/// Every validator is in committee 0 of every slot.
#[derive(Clone, Copy, Debug)]
pub struct MockTransition;

impl Transition for MockTransition {
    type State = MockState;
    type Block = MockBlock;
    type EpochContext = MockEpochContext;

    fn epoch_context(&self, state: &MockState) -> Result<MockEpochContext> {
        let validator_count = state.balances.len().try_into()?;

        Ok(MockEpochContext {
            committee: (0..validator_count).collect(),
        })
    }

    fn process_slots(
        &self,
        state: &mut MockState,
        _epoch_context: &mut MockEpochContext,
        slot: Slot,
    ) -> Result<()> {
        ensure!(state.slot < slot, "slot {slot} is not after state slot {}", state.slot);
        state.slot = slot;
        Ok(())
    }

    fn process_block(
        &self,
        state: &mut MockState,
        _epoch_context: &mut MockEpochContext,
        block: &MockBlock,
        verify: bool,
    ) -> Result<()> {
        if block.invalid {
            bail!("block is invalid");
        }

        if verify {
            ensure!(block.slot == state.slot, "block slot does not match state slot");
            ensure!(
                block.parent_root == state.latest_block_root,
                "block does not build on state",
            );
        }

        state.latest_block_root = block.root();

        if let Some(checkpoint) = block.justified_checkpoint {
            state.current_justified_checkpoint = checkpoint;
        }

        if let Some(checkpoint) = block.finalized_checkpoint {
            state.finalized_checkpoint = checkpoint;
        }

        Ok(())
    }

    fn attesting_indices(
        &self,
        attestation: &Attestation,
        committee: &[ValidatorIndex],
    ) -> Result<Vec<ValidatorIndex>> {
        ensure!(
            attestation.aggregation_bits.len() == committee.len(),
            "aggregation bits do not match committee",
        );

        let mut indices = attestation
            .aggregation_bits
            .iter_ones()
            .map(|position| committee[position])
            .collect::<Vec<_>>();

        indices.sort_unstable();
        indices.dedup();

        Ok(indices)
    }
}

pub struct FailingStore;

impl StateStore<MockState> for FailingStore {
    fn store(&self, _state_root: H256, _state: Arc<MockState>) -> Result<()> {
        bail!("storage is unavailable")
    }

    fn get(&self, _state_root: H256) -> Result<Option<Arc<MockState>>> {
        bail!("storage is unavailable")
    }

    fn remove(&self, _state_root: H256) -> Result<()> {
        bail!("storage is unavailable")
    }
}

pub fn genesis_block() -> MockBlock {
    MockBlock::default()
}

pub fn genesis_state() -> MockState {
    MockState {
        slot: 0,
        latest_block_root: genesis_block().root(),
        current_justified_checkpoint: Checkpoint::default(),
        finalized_checkpoint: Checkpoint::default(),
        balances: vec![BALANCE; VALIDATOR_COUNT],
    }
}

/// Builds an entry without running the state transition.
pub fn hot_entry(
    slot: Slot,
    block_root: H256,
    parent_root: Option<H256>,
) -> HotEntry<MockTransition> {
    let state = MockState {
        slot,
        latest_block_root: block_root,
        ..genesis_state()
    };

    HotEntry {
        slot,
        block_root,
        parent_root,
        state_root: state.hash_tree_root(),
        epoch_context: MockTransition
            .epoch_context(&state)
            .expect("mock epoch context never fails"),
        state: Arc::new(state),
    }
}

pub fn attestation(block_root: H256, slot: Slot, validators: &[usize]) -> Attestation {
    let mut aggregation_bits = BitVec::repeat(false, VALIDATOR_COUNT);

    for validator in validators {
        aggregation_bits.set(*validator, true);
    }

    Attestation {
        aggregation_bits,
        data: AttestationData {
            slot,
            index: 0,
            beacon_block_root: block_root,
            ..AttestationData::default()
        },
    }
}

fn xor(bytes: &mut [u8], value: u64) {
    for (byte, other) in bytes.iter_mut().zip(value.to_le_bytes()) {
        *byte ^= other;
    }
}
