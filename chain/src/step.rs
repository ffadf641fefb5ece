use core::ops::{Add, Sub};

use derive_more::Display;
use serde::{Deserialize, Serialize};
use types::phase0::primitives::Slot;

/// Position in the sequence of states a chain passes through.
///
/// Every slot has two steps. The even one is the state after processing the slot.
/// The odd one is the state after applying the block of that slot, if there is one.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Debug,
    Display,
    Deserialize,
    Serialize,
)]
#[serde(transparent)]
pub struct Step(u64);

impl Step {
    #[must_use]
    pub const fn new(slot: Slot, has_block: bool) -> Self {
        Self(slot * 2 + has_block as u64)
    }

    #[must_use]
    pub const fn slot(self) -> Slot {
        self.0 / 2
    }

    #[must_use]
    pub const fn has_block(self) -> bool {
        self.0 % 2 == 1
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl Add<u64> for Step {
    type Output = Self;

    fn add(self, offset: u64) -> Self {
        Self(self.0 + offset)
    }
}

impl Sub for Step {
    type Output = u64;

    fn sub(self, other: Self) -> u64 {
        self.0 - other.0
    }
}
