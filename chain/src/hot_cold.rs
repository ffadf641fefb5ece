use core::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Result;
use fork_choice_store::NodeRef;
use parking_lot::RwLock;
use types::{
    phase0::{
        containers::{Attestation, Checkpoint},
        primitives::{Slot, H256},
    },
    preset::Preset,
};

use crate::{
    cold::ColdChain,
    config::ChainConfig,
    entry::{ChainEntry, HotEntry},
    error::Error,
    hot::HotChain,
    state_store::StateStore,
    step::Step,
    transition::Transition,
};

/// The whole chain: unfinalized entries in memory and finalized ones in a [`StateStore`].
///
/// Lookups try the unfinalized part first. Entries move to the finalized part when finality
/// advances, so every entry can be found in one of them.
pub struct HotColdChain<P: Preset, T: Transition> {
    // Held for reading by lookups and for writing by mutations.
    // Taken before the locks of `hot` and `cold`.
    lock: RwLock<()>,
    hot: HotChain<P, T>,
    cold: Arc<ColdChain<T>>,
}

impl<P: Preset, T: Transition> HotColdChain<P, T> {
    pub fn new(
        config: ChainConfig,
        transition: Arc<T>,
        store: Arc<dyn StateStore<T::State>>,
        anchor_state: T::State,
        anchor_block_root: H256,
        anchor_parent_root: H256,
    ) -> Result<Self> {
        let cold = Arc::new(ColdChain::new(Arc::clone(&transition), store));
        let sink = Arc::clone(&cold);

        let hot = HotChain::new(
            config,
            transition,
            anchor_block_root,
            anchor_parent_root,
            anchor_state,
            sink,
        )?;

        Ok(Self {
            lock: RwLock::new(()),
            hot,
            cold,
        })
    }

    #[must_use]
    pub const fn hot(&self) -> &HotChain<P, T> {
        &self.hot
    }

    #[must_use]
    pub fn cold(&self) -> &ColdChain<T> {
        &self.cold
    }

    pub fn add_block(&self, block: &T::Block, is_exiting: &AtomicBool) -> Result<Arc<HotEntry<T>>> {
        let _guard = self.lock.write();
        self.hot.add_block(block, is_exiting)
    }

    pub fn add_attestation(&self, attestation: &Attestation) -> Result<usize> {
        let _guard = self.lock.write();
        self.hot.add_attestation(attestation)
    }

    pub fn set_pin(&self, pin: NodeRef) -> Result<()> {
        let _guard = self.lock.write();
        self.hot.set_pin(pin)
    }

    pub fn clear_pin(&self) {
        let _guard = self.lock.write();
        self.hot.clear_pin();
    }

    pub fn head(&self) -> Result<Arc<HotEntry<T>>> {
        let _guard = self.lock.read();
        self.hot.head()
    }

    pub fn justified(&self) -> Result<Arc<HotEntry<T>>> {
        let _guard = self.lock.read();
        self.hot.justified()
    }

    pub fn finalized(&self) -> Result<Arc<HotEntry<T>>> {
        let _guard = self.lock.read();
        self.hot.finalized()
    }

    #[must_use]
    pub fn justified_checkpoint(&self) -> Checkpoint {
        let _guard = self.lock.read();
        self.hot.justified_checkpoint()
    }

    #[must_use]
    pub fn finalized_checkpoint(&self) -> Checkpoint {
        let _guard = self.lock.read();
        self.hot.finalized_checkpoint()
    }

    /// See [`ForkChoice::in_subtree`](fork_choice_store::ForkChoice::in_subtree).
    ///
    /// Finalized blocks are not part of fork choice and are reported as unknown.
    #[must_use]
    pub fn in_subtree(&self, anchor_root: H256, root: H256) -> (bool, bool) {
        let _guard = self.lock.read();
        self.hot.in_subtree(anchor_root, root)
    }

    /// The earliest entry the chain knows about.
    #[must_use]
    pub fn genesis(&self) -> Option<ChainEntry<T>> {
        let _guard = self.lock.read();

        match self.cold.start() {
            Some(step) => self.cold.by_canon_step(step).map(ChainEntry::Cold),
            None => self.hot.earliest().map(ChainEntry::Hot),
        }
    }

    #[must_use]
    pub fn by_block(&self, block_root: H256) -> Option<ChainEntry<T>> {
        let _guard = self.lock.read();

        self.hot
            .by_block(block_root)
            .map(ChainEntry::Hot)
            .or_else(|| self.cold.by_block(block_root).map(ChainEntry::Cold))
    }

    #[must_use]
    pub fn by_state_root(&self, state_root: H256) -> Option<ChainEntry<T>> {
        let _guard = self.lock.read();

        self.hot
            .by_state_root(state_root)
            .map(ChainEntry::Hot)
            .or_else(|| self.cold.by_state_root(state_root).map(ChainEntry::Cold))
    }

    #[must_use]
    pub fn by_block_slot(&self, block_root: H256, slot: Slot) -> Option<ChainEntry<T>> {
        let _guard = self.lock.read();

        self.hot
            .by_block_slot(block_root, slot)
            .map(ChainEntry::Hot)
            .or_else(|| {
                self.cold
                    .by_block_slot(block_root, slot)
                    .map(ChainEntry::Cold)
            })
    }

    #[must_use]
    pub fn closest(&self, block_root: H256, slot: Slot) -> Option<ChainEntry<T>> {
        let _guard = self.lock.read();

        self.hot
            .closest(block_root, slot)
            .map(ChainEntry::Hot)
            .or_else(|| self.cold.closest(block_root, slot).map(ChainEntry::Cold))
    }

    pub fn by_slot(&self, slot: Slot) -> Result<Option<ChainEntry<T>>> {
        let _guard = self.lock.read();

        if let Some(entry) = self.hot.by_slot(slot)? {
            return Ok(Some(ChainEntry::Hot(entry)));
        }

        Ok(self.cold.by_slot(slot).map(ChainEntry::Cold))
    }

    /// Returns the canonical entry at `step`.
    ///
    /// The block step of a slot without a block has the roots and the state of the empty slot.
    pub fn by_canon_step(&self, step: Step) -> Result<Option<ChainEntry<T>>> {
        let _guard = self.lock.read();
        let hot = self.hot_canonical_chain()?;
        Ok(self.canon_entry_at(&hot, step))
    }

    /// Iterates over the canonical chain from the earliest step to the head.
    ///
    /// The unfinalized part of the chain is captured when the iterator is created. Finalized
    /// entries are looked up as the iterator advances.
    pub fn iter(&self) -> Result<ChainIter<'_, P, T>> {
        let _guard = self.lock.read();

        let end = self.hot.head()?.step();
        let hot = self.hot_canonical_chain()?;

        let start = match self.cold.start() {
            Some(step) => step,
            None => hot.first().map_or(end, |entry| entry.step()),
        };

        Ok(ChainIter {
            chain: self,
            hot,
            next: start,
            start,
            end,
        })
    }

    // Oldest first.
    fn hot_canonical_chain(&self) -> Result<Vec<Arc<HotEntry<T>>>> {
        let mut chain = self.hot.canonical_chain()?;
        chain.reverse();
        Ok(chain)
    }

    fn canon_entry_at(&self, hot: &[Arc<HotEntry<T>>], step: Step) -> Option<ChainEntry<T>> {
        let position = hot.partition_point(|entry| entry.step() <= step);

        if let Some(entry) = position.checked_sub(1).and_then(|index| hot.get(index)) {
            // A gap is only known once the chain has moved past it.
            let is_gap = step.has_block() && entry.slot == step.slot() && position < hot.len();

            if entry.step() == step || is_gap {
                return Some(ChainEntry::hot_at(step, Arc::clone(entry)));
            }
        }

        self.cold
            .by_canon_step(step)
            .or_else(|| self.cold.trailing_gap(step))
            .map(ChainEntry::Cold)
    }
}

/// Canonical entries between two steps, both inclusive.
pub struct ChainIter<'chain, P: Preset, T: Transition> {
    chain: &'chain HotColdChain<P, T>,
    // Canonical unfinalized entries, oldest first.
    hot: Vec<Arc<HotEntry<T>>>,
    next: Step,
    start: Step,
    end: Step,
}

impl<P: Preset, T: Transition> ChainIter<'_, P, T> {
    #[must_use]
    pub const fn start(&self) -> Step {
        self.start
    }

    #[must_use]
    pub const fn end(&self) -> Step {
        self.end
    }
}

impl<P: Preset, T: Transition> Iterator for ChainIter<'_, P, T> {
    type Item = Result<ChainEntry<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next > self.end {
            return None;
        }

        let step = self.next;
        self.next = step + 1;

        let _guard = self.chain.lock.read();

        let entry = self
            .chain
            .canon_entry_at(&self.hot, step)
            .ok_or_else(|| Error::StepNotFound { step }.into());

        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools as _;
    use types::preset::Minimal;

    use crate::{
        helpers::{self, MockBlock, MockState, MockTransition},
        state_store::InMemoryStateStore,
    };

    use super::*;

    type Chain = HotColdChain<Minimal, MockTransition>;

    fn hot_cold_chain() -> Result<(Chain, H256)> {
        let genesis_root = helpers::genesis_block().root();

        let chain = HotColdChain::new(
            ChainConfig::minimal(),
            Arc::new(MockTransition),
            Arc::new(InMemoryStateStore::<MockState>::default()),
            helpers::genesis_state(),
            genesis_root,
            H256::zero(),
        )?;

        Ok((chain, genesis_root))
    }

    fn add(chain: &Chain, block: &MockBlock) -> Result<H256> {
        chain.add_block(block, &AtomicBool::new(false))?;
        Ok(block.root())
    }

    // G@0 ─ B1@1 ─ B8@8 ─ B16@16 ─ B24@24
    //
    // B24 finalizes epoch 1.
    fn finalized_chain() -> Result<(Chain, [H256; 5])> {
        let (chain, genesis_root) = hot_cold_chain()?;

        let b1 = add(&chain, &MockBlock::child(genesis_root, 1))?;
        let b8 = add(&chain, &MockBlock::child(b1, 8))?;
        let b16 = add(&chain, &MockBlock::child(b8, 16).justifying(1, b8))?;
        let b24 = add(
            &chain,
            &MockBlock::child(b16, 24)
                .justifying(2, b16)
                .finalizing(1, b8),
        )?;

        Ok((chain, [genesis_root, b1, b8, b16, b24]))
    }

    #[test]
    fn new_chain_is_entirely_hot() -> Result<()> {
        let (chain, genesis_root) = hot_cold_chain()?;

        assert!(chain.cold().is_empty());

        let genesis = chain.genesis().expect("anchor is present");

        assert!(!genesis.is_finalized());
        assert_eq!(genesis.block_root(), genesis_root);
        assert_eq!(chain.head()?.block_root, genesis_root);
        assert_eq!(chain.iter()?.count(), 1);

        Ok(())
    }

    #[test]
    fn finality_moves_entries_to_cold_chain() -> Result<()> {
        let (chain, [genesis_root, b1, b8, b16, b24]) = finalized_chain()?;

        assert_eq!(chain.cold().start(), Some(Step::new(0, true)));
        assert_eq!(chain.cold().end(), Some(Step::new(8, true)));
        assert_eq!(chain.finalized()?.block_root, b8);
        assert_eq!(chain.justified()?.block_root, b16);
        assert_eq!(chain.head()?.block_root, b24);
        assert_eq!(
            chain.finalized_checkpoint(),
            Checkpoint { epoch: 1, root: b8 },
        );

        let genesis = chain.genesis().expect("genesis was finalized");
        assert!(genesis.is_finalized());
        assert_eq!(genesis.block_root(), genesis_root);
        assert_eq!(genesis.state()?.slot, 0);

        let finalized_block = chain.by_block(b1).expect("block was finalized");
        assert!(finalized_block.is_finalized());
        assert_eq!(finalized_block.step(), Step::new(1, true));

        let state_root = finalized_block.state_root();
        assert_eq!(
            chain.by_state_root(state_root).map(|entry| entry.step()),
            Some(Step::new(1, true)),
        );

        let unfinalized_block = chain.by_block(b16).expect("block is unfinalized");
        assert!(!unfinalized_block.is_finalized());

        assert_eq!(
            chain.by_block_slot(b1, 5).map(|entry| entry.step()),
            Some(Step::new(5, false)),
        );
        assert_eq!(
            chain.closest(b1, 20).map(|entry| entry.slot()),
            Some(8),
        );
        assert_eq!(
            chain.by_slot(8)?.map(|entry| entry.block_root()),
            Some(b8),
        );
        assert_eq!(
            chain.by_slot(3)?.map(|entry| entry.block_root()),
            Some(b1),
        );

        Ok(())
    }

    #[test]
    fn iterates_over_every_step_up_to_head() -> Result<()> {
        let (chain, [_, b1, b8, _, b24]) = finalized_chain()?;

        let iter = chain.iter()?;

        assert_eq!(iter.start(), Step::new(0, true));
        assert_eq!(iter.end(), Step::new(24, true));

        let entries = iter.collect::<Result<Vec<_>>>()?;

        assert_eq!(entries.len(), 49);
        assert!(entries
            .iter()
            .tuple_windows()
            .all(|(previous, next)| previous.step() + 1 == next.step()));

        assert_eq!(entries[2].block_root(), b1);
        assert!(entries[15].is_finalized());
        assert_eq!(entries[15].block_root(), b1);
        assert!(!entries[16].is_finalized());
        assert_eq!(entries[16].block_root(), b8);
        assert_eq!(entries[48].block_root(), b24);

        Ok(())
    }

    // G@0 ─ B1@1 ─ B9@9 ─ B16@16 ─ B24@24
    //
    // Slot 8 is empty, so the checkpoint of epoch 1 is the empty slot B1@8.
    // The finalized chain ends with the empty slot B1@7.
    #[test]
    fn iterates_over_gap_before_unfinalized_chain() -> Result<()> {
        let (chain, genesis_root) = hot_cold_chain()?;

        let b1 = add(&chain, &MockBlock::child(genesis_root, 1))?;
        let b9 = add(&chain, &MockBlock::child(b1, 9))?;
        let b16 = add(&chain, &MockBlock::child(b9, 16).justifying(1, b1))?;

        add(
            &chain,
            &MockBlock::child(b16, 24)
                .justifying(2, b16)
                .finalizing(1, b1),
        )?;

        assert_eq!(chain.cold().end(), Some(Step::new(7, true)));
        assert_eq!(
            chain.hot().earliest().map(|entry| entry.node_ref()),
            Some(NodeRef::new(b1, 8)),
        );

        let gap = chain
            .by_canon_step(Step::new(7, true))?
            .expect("slot 7 is canonical");

        assert!(gap.is_finalized());
        assert_eq!(gap.step(), Step::new(7, true));
        assert_eq!(gap.block_root(), b1);

        let entries = chain.iter()?.collect::<Result<Vec<_>>>()?;

        assert_eq!(entries.len(), 49);
        assert!(entries
            .iter()
            .tuple_windows()
            .all(|(previous, next)| previous.step() + 1 == next.step()));

        assert_eq!(entries[16].step(), Step::new(8, true));
        assert_eq!(entries[16].block_root(), b1);
        assert!(!entries[16].is_finalized());
        assert_eq!(entries[18].block_root(), b9);

        Ok(())
    }

    #[test]
    fn storage_failure_fails_finalizing_block() -> Result<()> {
        let genesis_root = helpers::genesis_block().root();

        let chain = Chain::new(
            ChainConfig::minimal(),
            Arc::new(MockTransition),
            Arc::new(helpers::FailingStore),
            helpers::genesis_state(),
            genesis_root,
            H256::zero(),
        )?;

        let b1 = add(&chain, &MockBlock::child(genesis_root, 1))?;
        let b8 = add(&chain, &MockBlock::child(b1, 8))?;
        let b16 = add(&chain, &MockBlock::child(b8, 16).justifying(1, b8))?;

        let b24 = MockBlock::child(b16, 24)
            .justifying(2, b16)
            .finalizing(1, b8);

        let error = chain
            .add_block(&b24, &AtomicBool::new(false))
            .expect_err("states cannot be stored");

        assert!(matches!(
            error.downcast_ref(),
            Some(Error::CheckpointsNotAdopted { .. }),
        ));
        assert_eq!(chain.finalized_checkpoint().epoch, 0);
        assert!(chain.cold().is_empty());
        assert_eq!(chain.head()?.block_root, b24.root());
        assert_eq!(
            chain.genesis().map(|entry| entry.is_finalized()),
            Some(false),
        );

        Ok(())
    }

    #[test]
    fn lookups_miss_unknown_roots() -> Result<()> {
        let (chain, _) = finalized_chain()?;
        let unknown = H256::repeat_byte(7);

        assert!(chain.by_block(unknown).is_none());
        assert!(chain.by_state_root(unknown).is_none());
        assert!(chain.closest(unknown, 8).is_none());
        assert!(chain.by_canon_step(Step::new(25, false))?.is_none());

        Ok(())
    }
}
