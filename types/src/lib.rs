//! Consensus types shared by the fork choice store and the chain.
//!
//! Only the parts of the beacon chain data model that fork choice and storage look at are defined
//! here. Full `BeaconState` and `SignedBeaconBlock` containers belong to the state transition and
//! are accessed through the traits in [`traits`].

pub mod preset;
pub mod traits;

pub mod phase0 {
    pub mod consts;
    pub mod containers;
    pub mod primitives;
}
