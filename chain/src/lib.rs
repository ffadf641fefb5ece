//! Storage of every state a beacon chain has passed through.
//!
//! States are identified by [`Step`]s, two per slot: the state after the slot was processed and the
//! state after the block of that slot was applied, if there is one.
//!
//! [`HotChain`] keeps unfinalized states in memory along with the fork choice that decides between
//! them. When finality advances, canonical states are moved to [`ColdChain`], which only keeps
//! their roots in memory and hands the states themselves to a [`StateStore`]. [`HotColdChain`]
//! combines the two.

pub use crate::{
    cold::ColdChain,
    config::ChainConfig,
    entry::{ChainEntry, ColdEntry, HotEntry},
    error::Error,
    hot::{EntrySink, HotChain},
    hot_cold::{ChainIter, HotColdChain},
    state_store::{CompressedStateStore, InMemoryStateStore, StateStore},
    step::Step,
    transition::{EpochContext, Transition},
};

mod cold;
mod config;
mod entry;
mod error;
mod hot;
mod hot_cold;
mod state_store;
mod step;
mod transition;

#[cfg(test)]
mod helpers;
