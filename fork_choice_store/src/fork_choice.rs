use std::sync::Arc;

use anyhow::{ensure, Result};
use helper_functions::misc;
use log::{debug, info};
use types::{
    phase0::{
        containers::Checkpoint,
        primitives::{Gwei, Slot, ValidatorIndex, H256},
    },
    preset::Preset,
};

use crate::{
    error::Error,
    misc::{NodeRef, PruneSink},
    proto_array::ProtoArray,
    vote_store::VoteStore,
};

/// LMD GHOST over a [`ProtoArray`] anchored at the justified checkpoint.
///
/// Heads are computed lazily. Votes are only turned into weight changes when [`Self::head`] or
/// [`Self::update_justified`] is called.
#[derive(Clone, Debug)]
pub struct ForkChoice<P: Preset> {
    proto_array: ProtoArray,
    vote_store: VoteStore<P>,
    balances: Arc<[Gwei]>,
    justified_checkpoint: Checkpoint,
    finalized_checkpoint: Checkpoint,
    // Finalized checkpoint whose pruning failed. Nodes preceding it may already be gone.
    pending_finalized: Option<Checkpoint>,
    pin: Option<NodeRef>,
}

impl<P: Preset> ForkChoice<P> {
    #[must_use]
    pub fn new(
        anchor: NodeRef,
        anchor_parent_root: H256,
        justified_checkpoint: Checkpoint,
        finalized_checkpoint: Checkpoint,
        balances: Arc<[Gwei]>,
    ) -> Self {
        Self {
            proto_array: ProtoArray::new(
                anchor,
                anchor_parent_root,
                justified_checkpoint.epoch,
                finalized_checkpoint.epoch,
            ),
            vote_store: VoteStore::default(),
            balances,
            justified_checkpoint,
            finalized_checkpoint,
            pending_finalized: None,
            pin: None,
        }
    }

    #[must_use]
    pub const fn proto_array(&self) -> &ProtoArray {
        &self.proto_array
    }

    #[must_use]
    pub const fn vote_store(&self) -> &VoteStore<P> {
        &self.vote_store
    }

    #[must_use]
    pub fn balances(&self) -> Arc<[Gwei]> {
        Arc::clone(&self.balances)
    }

    #[must_use]
    pub const fn justified_checkpoint(&self) -> Checkpoint {
        self.justified_checkpoint
    }

    #[must_use]
    pub const fn finalized_checkpoint(&self) -> Checkpoint {
        self.finalized_checkpoint
    }

    #[must_use]
    pub const fn pin(&self) -> Option<NodeRef> {
        self.pin
    }

    /// Restricts head selection to descendants of `pin`.
    pub fn set_pin(&mut self, pin: NodeRef) -> Result<()> {
        ensure!(self.proto_array.contains(pin), Error::PinUnreachable { pin });
        self.pin = Some(pin);
        Ok(())
    }

    pub fn clear_pin(&mut self) {
        self.pin = None;
    }

    #[must_use]
    pub fn contains_block(&self, block_root: H256) -> bool {
        self.proto_array.contains_root(block_root)
    }

    #[must_use]
    pub fn in_subtree(&self, anchor_root: H256, root: H256) -> (bool, bool) {
        self.proto_array.in_subtree(anchor_root, root)
    }

    /// The node a checkpoint refers to: its root at the start of its epoch, or the latest earlier
    /// node with the same root.
    pub fn checkpoint_node(&self, checkpoint: Checkpoint) -> Result<NodeRef> {
        let anchor = NodeRef::new(
            checkpoint.root,
            misc::compute_start_slot_at_epoch::<P>(checkpoint.epoch),
        );

        let (node_ref, _) = self
            .proto_array
            .resolve(anchor)
            .ok_or(Error::UnknownAnchor { anchor })?;

        Ok(node_ref)
    }

    /// Inserts empty slot nodes stamped with the checkpoints of the state at `slot`.
    pub fn process_slot(
        &mut self,
        parent_root: H256,
        slot: Slot,
        justified_checkpoint: Checkpoint,
        finalized_checkpoint: Checkpoint,
    ) -> bool {
        self.proto_array.process_slot(
            parent_root,
            slot,
            justified_checkpoint.epoch,
            finalized_checkpoint.epoch,
        )
    }

    /// Inserts a block stamped with the checkpoints of its post-state.
    pub fn process_block(
        &mut self,
        parent_root: H256,
        block_root: H256,
        block_slot: Slot,
        justified_checkpoint: Checkpoint,
        finalized_checkpoint: Checkpoint,
    ) -> bool {
        self.proto_array.process_block(
            parent_root,
            block_root,
            block_slot,
            justified_checkpoint.epoch,
            finalized_checkpoint.epoch,
        )
    }

    /// Records a head vote for `(block_root, head_slot)`.
    ///
    /// Returns `false` if the block is unknown or newer than `head_slot`.
    pub fn process_attestation(
        &mut self,
        validator_index: ValidatorIndex,
        block_root: H256,
        head_slot: Slot,
    ) -> bool {
        match self.proto_array.earliest_slot(block_root) {
            Some(block_slot) if block_slot <= head_slot => {
                self.vote_store
                    .process_attestation(validator_index, block_root, head_slot)
            }
            _ => {
                debug!(
                    "ignoring vote of validator {validator_index} \
                     for {block_root:?} at slot {head_slot}",
                );
                false
            }
        }
    }

    pub fn head(&mut self) -> Result<NodeRef> {
        if self.vote_store.has_changes() {
            let (deltas, moves) =
                self.vote_store
                    .compute_deltas(&self.proto_array, &self.balances, &self.balances)?;

            self.proto_array.apply_score_changes(
                deltas,
                self.justified_checkpoint.epoch,
                self.finalized_checkpoint.epoch,
            )?;

            self.vote_store.commit(moves);
        }

        let anchor = match self.pin {
            Some(pin) => pin,
            None => self.checkpoint_node(self.justified_checkpoint)?,
        };

        self.proto_array.find_head(anchor)
    }

    /// Adopts newer checkpoints observed in the post-state of `trigger`.
    ///
    /// Does nothing unless one of the epochs advanced. `justified_balances` is only called when the
    /// update goes ahead. Advancing finality prunes everything before the new finalized checkpoint,
    /// reporting pruned nodes to `sink`, and clears the pin. If `sink` fails, the justified
    /// checkpoint is still updated but the finalized one is not.
    pub fn update_justified(
        &mut self,
        trigger: NodeRef,
        justified_checkpoint: Checkpoint,
        finalized_checkpoint: Checkpoint,
        justified_balances: impl FnOnce(Checkpoint) -> Result<Arc<[Gwei]>>,
        sink: &mut impl PruneSink,
    ) -> Result<()> {
        let old_justified = self.justified_checkpoint;
        let old_finalized = self.finalized_checkpoint;

        if justified_checkpoint.epoch <= old_justified.epoch
            && finalized_checkpoint.epoch <= old_finalized.epoch
        {
            return Ok(());
        }

        if let Some(pin) = self.pin {
            let (unknown, in_subtree) = self.proto_array.in_subtree(pin.root, trigger.root);

            ensure!(
                !unknown && in_subtree,
                Error::NotInPinnedSubtree { pin, node: trigger },
            );
        }

        let finalized_root = self
            .pending_finalized
            .map_or(old_finalized.root, |checkpoint| checkpoint.root);

        for (old, new) in [
            (old_justified, justified_checkpoint),
            (old_finalized, finalized_checkpoint),
        ] {
            ensure!(
                new.epoch >= old.epoch,
                Error::RegressingCheckpoint { old, new },
            );

            if new.epoch == old.epoch {
                continue;
            }

            let (unknown, in_subtree) = self.proto_array.in_subtree(finalized_root, new.root);

            ensure!(
                !unknown && in_subtree,
                Error::CheckpointNotInFinalizedSubtree {
                    checkpoint: new,
                    finalized: old_finalized,
                },
            );
        }

        // Checkpoints that did not advance keep their current roots.
        let justified_checkpoint = if justified_checkpoint.epoch > old_justified.epoch {
            justified_checkpoint
        } else {
            old_justified
        };

        let finalized_checkpoint = if finalized_checkpoint.epoch > old_finalized.epoch {
            finalized_checkpoint
        } else {
            old_finalized
        };

        let prune_anchor = if finalized_checkpoint == old_finalized {
            None
        } else {
            Some(self.checkpoint_node(finalized_checkpoint)?)
        };

        let balances = justified_balances(justified_checkpoint)?;
        let (deltas, moves) =
            self.vote_store
                .compute_deltas(&self.proto_array, &self.balances, &balances)?;

        self.proto_array.apply_score_changes(
            deltas,
            justified_checkpoint.epoch,
            finalized_checkpoint.epoch,
        )?;

        self.vote_store.commit(moves);
        self.balances = balances;
        self.justified_checkpoint = justified_checkpoint;

        if justified_checkpoint != old_justified {
            info!("justified checkpoint updated to {justified_checkpoint} by {trigger}");
        }

        if let Some(anchor) = prune_anchor {
            // The finalized checkpoint only advances once pruning succeeds.
            // A later update with the same checkpoint retries it.
            if let Err(error) = self.proto_array.on_prune(anchor, sink) {
                self.pending_finalized = Some(finalized_checkpoint);
                return Err(error);
            }

            self.pending_finalized = None;
            self.finalized_checkpoint = finalized_checkpoint;
            self.pin = None;

            info!("finalized checkpoint updated to {finalized_checkpoint} by {trigger}");
        }

        Ok(())
    }
}
