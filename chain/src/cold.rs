use std::sync::Arc;

use anyhow::{ensure, Result};
use hash_hasher::HashedMap;
use log::debug;
use parking_lot::RwLock;
use types::phase0::primitives::{Slot, H256};

use crate::{
    entry::{ColdEntry, HotEntry},
    error::Error,
    hot::EntrySink,
    state_store::StateStore,
    step::Step,
    transition::Transition,
};

/// Append-only record of the finalized chain.
///
/// Roots are kept for every step from [`Self::start`] onward. Steps of slots without blocks repeat
/// the roots of the preceding step. States are kept in a [`StateStore`].
pub struct ColdChain<T: Transition> {
    transition: Arc<T>,
    store: Arc<dyn StateStore<T::State>>,
    inner: RwLock<ColdRoots>,
}

#[derive(Default, Debug)]
struct ColdRoots {
    start: Step,
    block_roots: Vec<H256>,
    state_roots: Vec<H256>,
    // Both maps point to the first step a root appears at.
    block_steps: HashedMap<H256, Step>,
    state_steps: HashedMap<H256, Step>,
}

impl ColdRoots {
    fn end(&self) -> Option<Step> {
        if self.block_roots.is_empty() {
            return None;
        }

        Some(self.start + self.len_u64())
    }

    fn len_u64(&self) -> u64 {
        self.block_roots
            .len()
            .try_into()
            .expect("number of finalized steps fits in u64")
    }

    fn position(&self, step: Step) -> Option<usize> {
        if step < self.start {
            return None;
        }

        let position = usize::try_from(step - self.start).ok()?;

        (position < self.block_roots.len()).then_some(position)
    }

    fn last_roots(&self) -> Option<(H256, H256)> {
        Some((*self.block_roots.last()?, *self.state_roots.last()?))
    }

    fn is_block_step(&self, step: Step) -> bool {
        self.position(step).is_some_and(|position| {
            self.block_steps.get(&self.block_roots[position]) == Some(&step) && step.has_block()
        })
    }

    fn push(&mut self, block_root: H256, state_root: H256) {
        let step = self.start + self.len_u64();

        self.block_steps.entry(block_root).or_insert(step);
        self.state_steps.entry(state_root).or_insert(step);
        self.block_roots.push(block_root);
        self.state_roots.push(state_root);
    }
}

impl<T: Transition> ColdChain<T> {
    #[must_use]
    pub fn new(transition: Arc<T>, store: Arc<dyn StateStore<T::State>>) -> Self {
        Self {
            transition,
            store,
            inner: RwLock::default(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().block_roots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().block_roots.is_empty()
    }

    #[must_use]
    pub fn start(&self) -> Option<Step> {
        let inner = self.inner.read();
        inner.end().map(|_| inner.start)
    }

    /// The step after the last finalized one.
    #[must_use]
    pub fn end(&self) -> Option<Step> {
        self.inner.read().end()
    }

    #[must_use]
    pub fn anchor_slot(&self) -> Option<Slot> {
        self.start().map(Step::slot)
    }

    /// Appends an entry that directly follows the end of the chain.
    ///
    /// If the chain ends right after an empty slot, the entry may also be the state of the next
    /// slot. The missing block step is then filled with the roots of the empty slot.
    ///
    /// The state is stored before any roots are recorded.
    pub fn on_finalized_entry(&self, entry: &HotEntry<T>) -> Result<()> {
        let step = entry.step();
        let mut inner = self.inner.write();

        let fills_gap = match inner.end() {
            Some(end) => {
                ensure!(step >= end, Error::StepOutOfOrder { end, actual: step });

                let fills_gap = end.has_block() && step == end + 1;

                ensure!(
                    step == end || fills_gap,
                    Error::NonContiguousStep {
                        expected: end,
                        actual: step,
                    },
                );

                let (expected, _) = inner
                    .last_roots()
                    .expect("chain is not empty because it has an end");

                let actual = entry.parent_root.unwrap_or(entry.block_root);

                ensure!(
                    actual == expected,
                    Error::FinalizedParentMismatch {
                        expected,
                        actual,
                        step,
                    },
                );

                fills_gap
            }
            None => false,
        };

        self.store.store(entry.state_root, Arc::clone(&entry.state))?;

        if inner.block_roots.is_empty() {
            inner.start = step;
        }

        if fills_gap {
            let (block_root, state_root) = inner
                .last_roots()
                .expect("chain is not empty because a gap was found");

            inner.push(block_root, state_root);
        }

        inner.push(entry.block_root, entry.state_root);

        debug!(
            "finalized entry appended (step: {step}, block_root: {:?}, state_root: {:?})",
            entry.block_root, entry.state_root,
        );

        Ok(())
    }

    #[must_use]
    pub fn by_canon_step(&self, step: Step) -> Option<ColdEntry<T>> {
        let inner = self.inner.read();
        self.entry_at(&inner, step)
    }

    /// Returns the block step right after the end of the chain if the chain ends with an empty
    /// slot. The entry repeats the roots of the empty slot.
    ///
    /// Only valid if the block of that slot is not canonical.
    #[must_use]
    pub(crate) fn trailing_gap(&self, step: Step) -> Option<ColdEntry<T>> {
        let inner = self.inner.read();

        if !step.has_block() || inner.end() != Some(step) {
            return None;
        }

        let mut entry = self.entry_at(&inner, Step::new(step.slot(), false))?;
        entry.step = step;
        Some(entry)
    }

    #[must_use]
    pub fn by_state_root(&self, state_root: H256) -> Option<ColdEntry<T>> {
        let inner = self.inner.read();
        let step = *inner.state_steps.get(&state_root)?;
        self.entry_at(&inner, step)
    }

    /// Returns the entry of the block itself, not of the slots after it.
    #[must_use]
    pub fn by_block(&self, block_root: H256) -> Option<ColdEntry<T>> {
        let inner = self.inner.read();
        let step = *inner.block_steps.get(&block_root)?;

        if !inner.is_block_step(step) {
            return None;
        }

        self.entry_at(&inner, step)
    }

    /// Returns the entry of `block_root` at exactly `slot`.
    #[must_use]
    pub fn by_block_slot(&self, block_root: H256, slot: Slot) -> Option<ColdEntry<T>> {
        let inner = self.inner.read();

        let step = [Step::new(slot, true), Step::new(slot, false)]
            .into_iter()
            .find(|step| {
                let matches_root = inner
                    .position(*step)
                    .is_some_and(|position| inner.block_roots[position] == block_root);

                matches_root && (!step.has_block() || inner.is_block_step(*step))
            })?;

        self.entry_at(&inner, step)
    }

    /// Returns the latest entry of `block_root` at or before `slot`.
    #[must_use]
    pub fn closest(&self, block_root: H256, slot: Slot) -> Option<ColdEntry<T>> {
        let inner = self.inner.read();
        let first = *inner.block_steps.get(&block_root)?;
        let first_position = inner.position(first)?;

        let run = inner.block_roots[first_position..].partition_point(|root| *root == block_root);
        let last = first + (run as u64 - 1);

        let step = Step::new(slot, true).min(last);

        if step < first {
            return None;
        }

        self.entry_at(&inner, step)
    }

    /// Returns the block entry of `slot` if there is one, otherwise the empty slot entry.
    #[must_use]
    pub fn by_slot(&self, slot: Slot) -> Option<ColdEntry<T>> {
        let inner = self.inner.read();
        let block_step = Step::new(slot, true);

        if inner.is_block_step(block_step) {
            return self.entry_at(&inner, block_step);
        }

        self.entry_at(&inner, Step::new(slot, false))
    }

    fn entry_at(&self, inner: &ColdRoots, step: Step) -> Option<ColdEntry<T>> {
        let position = inner.position(step)?;

        Some(ColdEntry {
            step,
            block_root: inner.block_roots[position],
            state_root: inner.state_roots[position],
            transition: Arc::clone(&self.transition),
            store: Arc::clone(&self.store),
        })
    }
}

impl<T: Transition> EntrySink<T> for ColdChain<T> {
    fn on_pruned_entry(&self, entry: &HotEntry<T>, canonical: bool) -> Result<()> {
        if canonical {
            return self.on_finalized_entry(entry);
        }

        debug!(
            "discarding orphaned entry (slot: {}, block_root: {:?})",
            entry.slot, entry.block_root,
        );

        Ok(())
    }
}
