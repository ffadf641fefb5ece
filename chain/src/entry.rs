use std::sync::Arc;

use anyhow::Result;
use derivative::Derivative;
use fork_choice_store::NodeRef;
use types::phase0::primitives::{Slot, H256};

use crate::{error::Error, state_store::StateStore, step::Step, transition::Transition};

/// A state in the unfinalized part of the chain.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct HotEntry<T: Transition> {
    pub slot: Slot,
    /// Root of the latest block applied to [`Self::state`].
    pub block_root: H256,
    /// `None` if no block was applied in [`Self::slot`].
    pub parent_root: Option<H256>,
    pub state_root: H256,
    #[derivative(Debug = "ignore")]
    pub epoch_context: T::EpochContext,
    #[derivative(Debug = "ignore")]
    pub state: Arc<T::State>,
}

impl<T: Transition> HotEntry<T> {
    #[must_use]
    pub const fn has_block(&self) -> bool {
        self.parent_root.is_some()
    }

    #[must_use]
    pub const fn step(&self) -> Step {
        Step::new(self.slot, self.has_block())
    }

    #[must_use]
    pub const fn node_ref(&self) -> NodeRef {
        NodeRef::new(self.block_root, self.slot)
    }
}

/// A state in the finalized part of the chain.
///
/// The state itself is loaded from a [`StateStore`] on demand.
#[derive(Derivative)]
#[derivative(Clone(bound = ""), Debug(bound = ""))]
pub struct ColdEntry<T: Transition> {
    pub(crate) step: Step,
    pub(crate) block_root: H256,
    pub(crate) state_root: H256,
    #[derivative(Debug = "ignore")]
    pub(crate) transition: Arc<T>,
    #[derivative(Debug = "ignore")]
    pub(crate) store: Arc<dyn StateStore<T::State>>,
}

impl<T: Transition> ColdEntry<T> {
    #[must_use]
    pub const fn step(&self) -> Step {
        self.step
    }

    #[must_use]
    pub const fn block_root(&self) -> H256 {
        self.block_root
    }

    #[must_use]
    pub const fn state_root(&self) -> H256 {
        self.state_root
    }

    pub fn state(&self) -> Result<Arc<T::State>> {
        self.store
            .get(self.state_root)?
            .ok_or_else(|| {
                Error::StateNotFound {
                    state_root: self.state_root,
                }
                .into()
            })
    }

    pub fn epoch_context(&self) -> Result<T::EpochContext> {
        self.transition.epoch_context(&*self.state()?)
    }
}

#[derive(Derivative)]
#[derivative(Clone(bound = ""), Debug(bound = ""))]
pub enum ChainEntry<T: Transition> {
    Hot(Arc<HotEntry<T>>),
    /// The block step of an unfinalized slot without a block.
    /// It has the roots and the state of the empty slot entry.
    HotGap(Step, Arc<HotEntry<T>>),
    Cold(ColdEntry<T>),
}

impl<T: Transition> ChainEntry<T> {
    /// Wraps the canonical entry found for `step`, which may be the empty slot before it.
    pub(crate) fn hot_at(step: Step, entry: Arc<HotEntry<T>>) -> Self {
        if entry.step() == step {
            Self::Hot(entry)
        } else {
            Self::HotGap(step, entry)
        }
    }

    #[must_use]
    pub fn step(&self) -> Step {
        match self {
            Self::Hot(entry) => entry.step(),
            Self::HotGap(step, _) => *step,
            Self::Cold(entry) => entry.step(),
        }
    }

    #[must_use]
    pub fn slot(&self) -> Slot {
        self.step().slot()
    }

    #[must_use]
    pub fn block_root(&self) -> H256 {
        match self {
            Self::Hot(entry) | Self::HotGap(_, entry) => entry.block_root,
            Self::Cold(entry) => entry.block_root(),
        }
    }

    #[must_use]
    pub fn state_root(&self) -> H256 {
        match self {
            Self::Hot(entry) | Self::HotGap(_, entry) => entry.state_root,
            Self::Cold(entry) => entry.state_root(),
        }
    }

    #[must_use]
    pub const fn is_finalized(&self) -> bool {
        matches!(self, Self::Cold(_))
    }

    pub fn state(&self) -> Result<Arc<T::State>> {
        match self {
            Self::Hot(entry) | Self::HotGap(_, entry) => Ok(Arc::clone(&entry.state)),
            Self::Cold(entry) => entry.state(),
        }
    }

    pub fn epoch_context(&self) -> Result<T::EpochContext> {
        match self {
            Self::Hot(entry) | Self::HotGap(_, entry) => Ok(entry.epoch_context.clone()),
            Self::Cold(entry) => entry.epoch_context(),
        }
    }
}
