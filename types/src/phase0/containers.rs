use bitvec::vec::BitVec;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use static_assertions::assert_eq_size;

use crate::phase0::primitives::{CommitteeIndex, Epoch, Slot, H256};

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
#[display("{epoch}:{root:?}")]
#[serde(deny_unknown_fields)]
pub struct Checkpoint {
    pub epoch: Epoch,
    pub root: H256,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AttestationData {
    pub slot: Slot,
    pub index: CommitteeIndex,
    pub beacon_block_root: H256,
    pub source: Checkpoint,
    pub target: Checkpoint,
}

/// An attestation as seen by fork choice.
///
/// The signature is absent because fork choice only ever deals with attestations that have
/// already been verified.
#[derive(Clone, PartialEq, Eq, Hash, Default, Debug)]
pub struct Attestation {
    pub aggregation_bits: BitVec,
    pub data: AttestationData,
}

assert_eq_size!(Checkpoint, [u64; 5]);
