use core::marker::PhantomData;

use anyhow::Result;
use helper_functions::misc;
use types::{
    phase0::primitives::{Epoch, Gwei, Slot, ValidatorIndex, H256},
    preset::Preset,
};

use crate::{
    error::Error,
    misc::{Difference, NodeRef},
    proto_array::ProtoArray,
};

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct VoteTracker {
    /// The node the vote's weight was last applied to.
    pub current: NodeRef,
    pub next: NodeRef,
    pub current_target_epoch: Epoch,
    pub next_target_epoch: Epoch,
}

/// Latest head votes of every validator.
///
/// Votes are collected in `next` and moved to `current` when deltas are committed.
#[derive(Clone, Debug)]
pub struct VoteStore<P: Preset> {
    votes: Vec<VoteTracker>,
    changed: bool,
    phantom: PhantomData<P>,
}

impl<P: Preset> Default for VoteStore<P> {
    fn default() -> Self {
        Self {
            votes: vec![],
            changed: false,
            phantom: PhantomData,
        }
    }
}

impl<P: Preset> VoteStore<P> {
    #[must_use]
    pub fn vote(&self, validator_index: ValidatorIndex) -> Option<&VoteTracker> {
        self.votes.get(usize::try_from(validator_index).ok()?)
    }

    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.changed
    }

    /// Records a vote for `(block_root, head_slot)` if it targets a later epoch than the latest
    /// vote of the validator.
    ///
    /// The first vote of a validator is accepted regardless of its epoch.
    /// Returns `false` if `validator_index` cannot be represented in memory.
    pub fn process_attestation(
        &mut self,
        validator_index: ValidatorIndex,
        block_root: H256,
        head_slot: Slot,
    ) -> bool {
        let Ok(index) = usize::try_from(validator_index) else {
            return false;
        };

        if index >= self.votes.len() {
            self.votes.resize(index + 1, VoteTracker::default());
        }

        let vote = &mut self.votes[index];
        let target_epoch = misc::compute_epoch_at_slot::<P>(head_slot);

        if target_epoch > vote.next_target_epoch || *vote == VoteTracker::default() {
            vote.next = NodeRef::new(block_root, head_slot);
            vote.next_target_epoch = target_epoch;
            self.changed = true;
        }

        true
    }

    /// Computes weight changes for every node in `proto_array`.
    ///
    /// A vote for a slot that `proto_array` has no node for yet is applied to the latest earlier
    /// node with the same root. Such votes keep the store marked as changed so that their weight
    /// moves once the exact node appears. Votes for unknown roots are ignored.
    ///
    /// Votes are not moved until the returned [`VoteMoves`] are passed to [`Self::commit`].
    pub fn compute_deltas(
        &self,
        proto_array: &ProtoArray,
        old_balances: &[Gwei],
        new_balances: &[Gwei],
    ) -> Result<(Vec<Difference>, VoteMoves)> {
        let mut deltas: Vec<Difference> = vec![0; proto_array.len()];
        let mut moves = VoteMoves::default();

        for (validator_index, vote) in self.votes.iter().enumerate() {
            if *vote == VoteTracker::default() {
                continue;
            }

            let old_balance = old_balances
                .get(validator_index)
                .copied()
                .unwrap_or_default();

            let new_balance = new_balances
                .get(validator_index)
                .copied()
                .unwrap_or_default();

            let target = proto_array.resolve(vote.next);
            let next = target.map_or(vote.next, |(node_ref, _)| node_ref);

            moves.pending |= next != vote.next;

            if vote.current == next && old_balance == new_balance {
                continue;
            }

            if let Some(index) = proto_array.index_of(vote.current) {
                deltas[index] = deltas[index]
                    .checked_sub_unsigned(old_balance)
                    .ok_or(Error::DeltaOverflow { node: vote.current })?;
            }

            if let Some((node_ref, index)) = target {
                deltas[index] = deltas[index]
                    .checked_add_unsigned(new_balance)
                    .ok_or(Error::DeltaOverflow { node: node_ref })?;
            }

            moves.moves.push((validator_index, next));
        }

        Ok((deltas, moves))
    }

    /// Moves votes into `current` once the deltas they were computed with have been applied.
    pub fn commit(&mut self, moves: VoteMoves) {
        for (validator_index, next) in moves.moves {
            if let Some(vote) = self.votes.get_mut(validator_index) {
                vote.current = next;
                vote.current_target_epoch = vote.next_target_epoch;
            }
        }

        self.changed = moves.pending;
    }
}

/// Votes to be moved by [`VoteStore::commit`].
#[derive(Default, Debug)]
pub struct VoteMoves {
    moves: Vec<(usize, NodeRef)>,
    // Some votes are applied to an earlier node than the one they are for.
    pending: bool,
}

#[cfg(test)]
mod tests {
    use types::preset::Minimal;

    use super::*;

    fn root(byte: u8) -> H256 {
        H256::repeat_byte(byte)
    }

    // G@0 ─ G@1 ─ G@2
    //    └─ A@1
    fn proto_array() -> ProtoArray {
        let mut proto_array = ProtoArray::new(NodeRef::new(root(0), 0), H256::zero(), 0, 0);
        assert!(proto_array.process_block(root(0), root(1), 1, 0, 0));
        assert!(proto_array.process_slot(root(0), 2, 0, 0));
        proto_array
    }

    fn apply(
        vote_store: &mut VoteStore<Minimal>,
        proto_array: &ProtoArray,
        old_balances: &[Gwei],
        new_balances: &[Gwei],
    ) -> Vec<Difference> {
        let (deltas, moves) = vote_store
            .compute_deltas(proto_array, old_balances, new_balances)
            .expect("balances fit in i64");

        vote_store.commit(moves);

        deltas
    }

    fn delta_at(proto_array: &ProtoArray, deltas: &[Difference], node_ref: NodeRef) -> Difference {
        deltas[proto_array.index_of(node_ref).expect("node is present")]
    }

    #[test]
    fn first_vote_is_accepted_in_genesis_epoch() {
        let mut vote_store = VoteStore::<Minimal>::default();

        assert!(vote_store.process_attestation(3, root(1), 1));
        assert!(vote_store.has_changes());

        let vote = vote_store.vote(3).expect("vote was recorded");
        assert_eq!(vote.next, NodeRef::new(root(1), 1));
        assert_eq!(vote.next_target_epoch, 0);
        assert_eq!(vote_store.vote(0), Some(&VoteTracker::default()));
    }

    #[test]
    fn votes_for_older_or_equal_epochs_are_ignored() {
        let mut vote_store = VoteStore::<Minimal>::default();

        assert!(vote_store.process_attestation(0, root(1), 9));
        assert!(vote_store.process_attestation(0, root(2), 8));
        assert!(vote_store.process_attestation(0, root(3), 3));

        let vote = vote_store.vote(0).expect("vote was recorded");
        assert_eq!(vote.next, NodeRef::new(root(1), 9));
        assert_eq!(vote.next_target_epoch, 1);

        assert!(vote_store.process_attestation(0, root(4), 16));
        assert_eq!(
            vote_store.vote(0).map(|vote| vote.next),
            Some(NodeRef::new(root(4), 16)),
        );
    }

    #[test]
    fn compute_deltas_moves_weight_between_nodes() {
        let proto_array = proto_array();
        let mut vote_store = VoteStore::<Minimal>::default();
        let balances = [10, 20];

        vote_store.process_attestation(0, root(1), 1);
        vote_store.process_attestation(1, root(0), 2);

        let deltas = apply(&mut vote_store, &proto_array, &[], &balances);

        assert_eq!(delta_at(&proto_array, &deltas, NodeRef::new(root(1), 1)), 10);
        assert_eq!(delta_at(&proto_array, &deltas, NodeRef::new(root(0), 2)), 20);
        assert_eq!(deltas.iter().sum::<Difference>(), 30);
        assert!(!vote_store.has_changes());

        vote_store.process_attestation(0, root(0), 8);

        let deltas = apply(&mut vote_store, &proto_array, &balances, &balances);

        assert_eq!(delta_at(&proto_array, &deltas, NodeRef::new(root(1), 1)), -10);
        assert_eq!(delta_at(&proto_array, &deltas, NodeRef::new(root(0), 2)), 10);
        assert_eq!(deltas.iter().sum::<Difference>(), 0);
    }

    #[test]
    fn compute_deltas_applies_balance_changes() {
        let proto_array = proto_array();
        let mut vote_store = VoteStore::<Minimal>::default();

        vote_store.process_attestation(0, root(1), 1);
        apply(&mut vote_store, &proto_array, &[], &[32]);

        let deltas = apply(&mut vote_store, &proto_array, &[32], &[31]);

        assert_eq!(delta_at(&proto_array, &deltas, NodeRef::new(root(1), 1)), -1);
        assert_eq!(deltas.iter().sum::<Difference>(), -1);
    }

    #[test]
    fn compute_deltas_ignores_unknown_roots() {
        let proto_array = proto_array();
        let mut vote_store = VoteStore::<Minimal>::default();

        vote_store.process_attestation(0, root(9), 1);

        let deltas = apply(&mut vote_store, &proto_array, &[], &[10]);

        assert_eq!(deltas, vec![0; proto_array.len()]);
        assert!(!vote_store.has_changes());
    }

    #[test]
    fn votes_only_move_when_committed() -> Result<()> {
        let proto_array = proto_array();
        let mut vote_store = VoteStore::<Minimal>::default();

        vote_store.process_attestation(0, root(1), 1);

        let (first, _) = vote_store.compute_deltas(&proto_array, &[], &[10])?;
        let (second, moves) = vote_store.compute_deltas(&proto_array, &[], &[10])?;

        assert_eq!(first, second);
        assert!(vote_store.has_changes());
        assert_eq!(
            vote_store.vote(0).map(|vote| vote.current),
            Some(NodeRef::default()),
        );

        vote_store.commit(moves);

        assert!(!vote_store.has_changes());
        assert_eq!(
            vote_store.vote(0).map(|vote| vote.current),
            Some(NodeRef::new(root(1), 1)),
        );

        Ok(())
    }

    #[test]
    fn compute_deltas_rejects_oversized_balances() {
        let proto_array = proto_array();
        let mut vote_store = VoteStore::<Minimal>::default();

        vote_store.process_attestation(0, root(1), 1);

        let error = vote_store
            .compute_deltas(&proto_array, &[], &[Gwei::MAX])
            .expect_err("balance does not fit in i64");

        assert!(matches!(
            error.downcast_ref(),
            Some(Error::DeltaOverflow { .. }),
        ));
        assert!(vote_store.has_changes());
    }

    #[test]
    fn vote_for_missing_slot_moves_when_slot_appears() {
        let mut proto_array = proto_array();
        let mut vote_store = VoteStore::<Minimal>::default();

        vote_store.process_attestation(0, root(1), 3);

        let deltas = apply(&mut vote_store, &proto_array, &[], &[10]);

        assert_eq!(delta_at(&proto_array, &deltas, NodeRef::new(root(1), 1)), 10);
        assert!(vote_store.has_changes());

        let deltas = apply(&mut vote_store, &proto_array, &[10], &[10]);

        assert_eq!(deltas, vec![0; proto_array.len()]);
        assert!(vote_store.has_changes());

        assert!(proto_array.process_slot(root(1), 3, 0, 0));

        let deltas = apply(&mut vote_store, &proto_array, &[10], &[10]);

        assert_eq!(delta_at(&proto_array, &deltas, NodeRef::new(root(1), 1)), -10);
        assert_eq!(delta_at(&proto_array, &deltas, NodeRef::new(root(1), 3)), 10);
        assert!(!vote_store.has_changes());
    }
}
