use core::sync::atomic::{AtomicBool, Ordering};
use std::{collections::HashMap, sync::Arc};

use anyhow::{ensure, Context as _, Result};
use fork_choice_store::{ForkChoice, NodeRef, ProtoNode, PruneSink};
use hash_hasher::HashedMap;
use helper_functions::misc;
use itertools::Itertools as _;
use log::{debug, info, warn};
use parking_lot::RwLock;
use types::{
    phase0::{
        containers::{Attestation, Checkpoint},
        primitives::{Gwei, Slot, H256},
    },
    preset::Preset,
    traits::{BeaconBlock as _, BeaconState as _, SszHash as _},
};

use crate::{
    config::ChainConfig,
    entry::HotEntry,
    error::Error,
    step::Step,
    transition::{EpochContext as _, Transition},
};

/// Receives entries removed from [`HotChain`] when finality advances.
pub trait EntrySink<T: Transition>: Send + Sync {
    fn on_pruned_entry(&self, entry: &HotEntry<T>, canonical: bool) -> Result<()>;
}

/// The unfinalized part of the chain.
///
/// Every state the chain has passed through since the last finalized checkpoint is kept in memory
/// along with a fork choice node for it.
pub struct HotChain<P: Preset, T: Transition> {
    config: ChainConfig,
    transition: Arc<T>,
    inner: RwLock<HotInner<P, T>>,
}

struct HotInner<P: Preset, T: Transition> {
    fork_choice: ForkChoice<P>,
    entries: HotEntries<T>,
}

struct HotEntries<T: Transition> {
    by_node: HashMap<NodeRef, Arc<HotEntry<T>>>,
    by_state_root: HashedMap<H256, NodeRef>,
    // Entries older than this have been handed to the sink.
    anchor_slot: Slot,
    sink: Arc<dyn EntrySink<T>>,
}

impl<T: Transition> HotEntries<T> {
    fn get(&self, node_ref: NodeRef) -> Option<Arc<HotEntry<T>>> {
        self.by_node.get(&node_ref).cloned()
    }

    fn insert(&mut self, entry: Arc<HotEntry<T>>) {
        self.by_state_root.insert(entry.state_root, entry.node_ref());
        self.by_node.insert(entry.node_ref(), entry);
    }

    fn remove(&mut self, node_ref: NodeRef) {
        if let Some(entry) = self.by_node.remove(&node_ref) {
            if self.by_state_root.get(&entry.state_root) == Some(&node_ref) {
                self.by_state_root.remove(&entry.state_root);
            }
        }
    }

    // Entries older than the latest finalized slot cannot become canonical.
    // Some of them are not reported by fork choice because they were inserted after the anchor.
    fn sweep(&mut self) -> Result<()> {
        let anchor_slot = self.anchor_slot;

        let stale = self
            .by_node
            .values()
            .filter(|entry| entry.slot < anchor_slot)
            .sorted_by_key(|entry| entry.step())
            .cloned()
            .collect_vec();

        for entry in stale {
            self.sink.on_pruned_entry(&entry, false)?;
            self.remove(entry.node_ref());
        }

        Ok(())
    }
}

impl<T: Transition> PruneSink for HotEntries<T> {
    fn on_pruned_node(&mut self, node: &ProtoNode, canonical: bool) -> Result<()> {
        // Entries of nodes inserted after an earlier anchor may already have been swept.
        let Some(entry) = self.get(node.node_ref()) else {
            return Ok(());
        };

        self.sink.on_pruned_entry(&entry, canonical)?;
        self.remove(entry.node_ref());

        if canonical {
            self.anchor_slot = self.anchor_slot.max(entry.slot);
        }

        Ok(())
    }
}

impl<P: Preset, T: Transition> HotInner<P, T> {
    fn by_block(&self, block_root: H256) -> Option<Arc<HotEntry<T>>> {
        let slot = self.fork_choice.proto_array().earliest_slot(block_root)?;
        let entry = self.entries.get(NodeRef::new(block_root, slot))?;
        entry.has_block().then_some(entry)
    }

    fn closest(&self, block_root: H256, slot: Slot) -> Option<Arc<HotEntry<T>>> {
        let (node_ref, _) = self
            .fork_choice
            .proto_array()
            .resolve(NodeRef::new(block_root, slot))?;

        self.entries.get(node_ref)
    }

    fn checkpoint_entry(&self, checkpoint: Checkpoint) -> Result<Arc<HotEntry<T>>> {
        let node_ref = self.fork_choice.checkpoint_node(checkpoint)?;

        self.entries.get(node_ref).ok_or_else(|| {
            Error::BlockUnknown {
                block_root: checkpoint.root,
            }
            .into()
        })
    }

    fn canonical_chain(&mut self) -> Result<Vec<Arc<HotEntry<T>>>> {
        let head = self.fork_choice.head()?;
        let proto_array = self.fork_choice.proto_array();

        let head_index = proto_array
            .index_of(head)
            .expect("head returned by fork choice is in the proto array");

        Ok(proto_array
            .transition_ancestors(head_index)
            .filter_map(|node| self.entries.get(node.node_ref()))
            .collect())
    }

    fn commit(&mut self, replayed: Vec<Arc<HotEntry<T>>>, block_entry: Arc<HotEntry<T>>) {
        let parent_root = block_entry
            .parent_root
            .expect("block entries have a parent root");

        for entry in replayed {
            let inserted = self.fork_choice.process_slot(
                parent_root,
                entry.slot,
                entry.state.current_justified_checkpoint(),
                entry.state.finalized_checkpoint(),
            );

            assert!(inserted, "slots are only replayed on top of known nodes");

            self.entries.insert(entry);
        }

        let inserted = self.fork_choice.process_block(
            parent_root,
            block_entry.block_root,
            block_entry.slot,
            block_entry.state.current_justified_checkpoint(),
            block_entry.state.finalized_checkpoint(),
        );

        assert!(inserted, "parent of a new block is in fork choice");

        self.entries.insert(block_entry);
    }
}

impl<P: Preset, T: Transition> HotChain<P, T> {
    /// Starts an unfinalized chain at `anchor_state`, the post-state of block `anchor_block_root`.
    pub fn new(
        config: ChainConfig,
        transition: Arc<T>,
        anchor_block_root: H256,
        anchor_parent_root: H256,
        anchor_state: T::State,
        sink: Arc<dyn EntrySink<T>>,
    ) -> Result<Self> {
        let slot = anchor_state.slot();

        let anchor = Arc::new(HotEntry::<T> {
            slot,
            block_root: anchor_block_root,
            parent_root: Some(anchor_parent_root),
            state_root: anchor_state.hash_tree_root(),
            epoch_context: transition.epoch_context(&anchor_state)?,
            state: Arc::new(anchor_state),
        });

        let checkpoint = Checkpoint {
            epoch: anchor_checkpoint_epoch::<P>(slot),
            root: anchor_block_root,
        };

        let fork_choice = ForkChoice::new(
            anchor.node_ref(),
            anchor_parent_root,
            checkpoint,
            checkpoint,
            Arc::<[Gwei]>::from(anchor.state.active_balances()),
        );

        let mut entries = HotEntries {
            by_node: HashMap::new(),
            by_state_root: HashedMap::default(),
            anchor_slot: slot,
            sink,
        };

        entries.insert(anchor);

        Ok(Self {
            config,
            transition,
            inner: RwLock::new(HotInner {
                fork_choice,
                entries,
            }),
        })
    }

    #[must_use]
    pub const fn config(&self) -> ChainConfig {
        self.config
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().entries.by_node.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.by_node.is_empty()
    }

    /// Applies `block` to the state of its parent and inserts the resulting entries.
    ///
    /// Empty slots between the parent and the block are replayed first. Nothing is inserted
    /// unless the block is applied successfully. Returns the entry of the block.
    ///
    /// Fails with [`Error::CheckpointsNotAdopted`] if the block was inserted but fork choice could
    /// not adopt its checkpoints, including when finalized entries could not be handed to the
    /// sink. The finalized checkpoint does not advance in that case and is retried by later blocks
    /// with the same checkpoint.
    pub fn add_block(&self, block: &T::Block, is_exiting: &AtomicBool) -> Result<Arc<HotEntry<T>>> {
        let block_root = block.hash_tree_root();
        let block_slot = block.slot();
        let parent_root = block.parent_root();

        let mut inner = self.inner.write();

        if inner.fork_choice.contains_block(block_root) {
            return inner
                .by_block(block_root)
                .ok_or_else(|| Error::BlockUnknown { block_root }.into());
        }

        let parent_slot = inner
            .fork_choice
            .proto_array()
            .earliest_slot(parent_root)
            .ok_or(Error::ParentUnknown { parent_root })?;

        ensure!(
            parent_slot < block_slot,
            Error::BlockNotNewerThanParent {
                block_slot,
                parent_slot,
            },
        );

        let pre_state = inner
            .closest(parent_root, block_slot)
            .ok_or(Error::ParentUnknown { parent_root })?;

        let maximum = self.config.max_empty_slots;

        ensure!(
            block_slot - pre_state.slot <= maximum,
            Error::TooManyEmptySlots {
                from: pre_state.slot,
                to: block_slot,
                maximum,
            },
        );

        let mut replayed = vec![];
        let mut previous = pre_state;

        for slot in previous.slot + 1..=block_slot {
            ensure!(!is_exiting.load(Ordering::Relaxed), Error::Interrupted);

            let mut state = T::State::clone(&previous.state);
            let mut epoch_context = previous.epoch_context.clone();

            self.transition
                .process_slots(&mut state, &mut epoch_context, slot)?;

            let entry = Arc::new(HotEntry {
                slot,
                block_root: parent_root,
                parent_root: None,
                state_root: state.hash_tree_root(),
                epoch_context,
                state: Arc::new(state),
            });

            replayed.push(Arc::clone(&entry));
            previous = entry;
        }

        ensure!(!is_exiting.load(Ordering::Relaxed), Error::Interrupted);

        let mut state = T::State::clone(&previous.state);
        let mut epoch_context = previous.epoch_context.clone();

        if let Err(error) = self.transition.process_block(
            &mut state,
            &mut epoch_context,
            block,
            self.config.verify_blocks,
        ) {
            warn!("block rejected by state transition (block_root: {block_root:?}, slot: {block_slot}): {error:?}");
            return Err(error);
        }

        let justified_checkpoint = state.current_justified_checkpoint();
        let finalized_checkpoint = state.finalized_checkpoint();

        let block_entry = Arc::new(HotEntry {
            slot: block_slot,
            block_root,
            parent_root: Some(parent_root),
            state_root: state.hash_tree_root(),
            epoch_context,
            state: Arc::new(state),
        });

        let empty_slots = replayed.len();

        inner.commit(replayed, Arc::clone(&block_entry));

        debug!(
            "block added (block_root: {block_root:?}, slot: {block_slot}, \
             empty slots replayed: {empty_slots})",
        );

        // Fork choice keeps its current justified checkpoint if the new one is not newer.
        let justified_entries = [justified_checkpoint, inner.fork_choice.justified_checkpoint()]
            .map(|checkpoint| (checkpoint, inner.checkpoint_entry(checkpoint).ok()));

        let justified_balances = move |checkpoint: Checkpoint| -> Result<Arc<[Gwei]>> {
            let entry = justified_entries
                .into_iter()
                .find_map(|(candidate, entry)| {
                    (candidate == checkpoint).then_some(entry).flatten()
                })
                .ok_or(Error::BlockUnknown {
                    block_root: checkpoint.root,
                })?;

            Ok(Arc::<[Gwei]>::from(entry.state.active_balances()))
        };

        let HotInner {
            fork_choice,
            entries,
        } = &mut *inner;

        let entries_before = entries.by_node.len();
        let anchor_slot_before = entries.anchor_slot;

        // The block stays in the chain even if its checkpoints cannot be adopted.
        fork_choice
            .update_justified(
                block_entry.node_ref(),
                justified_checkpoint,
                finalized_checkpoint,
                justified_balances,
                entries,
            )
            .context(Error::CheckpointsNotAdopted { block_root })?;

        if entries.anchor_slot != anchor_slot_before {
            entries.sweep()?;
        }

        let migrated = entries_before - entries.by_node.len();

        if migrated > 0 {
            info!(
                "{migrated} entries left the unfinalized chain (finalized checkpoint: {})",
                fork_choice.finalized_checkpoint(),
            );
        }

        Ok(block_entry)
    }

    /// Records the head votes in `attestation`.
    ///
    /// Returns the number of votes that were accepted.
    pub fn add_attestation(&self, attestation: &Attestation) -> Result<usize> {
        let data = attestation.data;
        let mut inner = self.inner.write();

        let entry = inner
            .closest(data.beacon_block_root, data.slot)
            .ok_or(Error::BlockUnknown {
                block_root: data.beacon_block_root,
            })?;

        let committee = entry
            .epoch_context
            .beacon_committee(data.slot, data.index)
            .ok_or(Error::CommitteeUnknown {
                slot: data.slot,
                index: data.index,
            })?;

        let attesting_indices = self.transition.attesting_indices(attestation, committee)?;

        let accepted = attesting_indices
            .into_iter()
            .filter(|validator_index| {
                inner.fork_choice.process_attestation(
                    *validator_index,
                    data.beacon_block_root,
                    data.slot,
                )
            })
            .count();

        Ok(accepted)
    }

    pub fn head(&self) -> Result<Arc<HotEntry<T>>> {
        let mut inner = self.inner.write();
        let head = inner.fork_choice.head()?;

        inner.entries.get(head).ok_or_else(|| {
            Error::BlockUnknown {
                block_root: head.root,
            }
            .into()
        })
    }

    /// Entries from the head back to the oldest unfinalized entry.
    pub fn canonical_chain(&self) -> Result<Vec<Arc<HotEntry<T>>>> {
        self.inner.write().canonical_chain()
    }

    /// Returns the canonical entry of `slot`, preferring the block if there is one.
    pub fn by_slot(&self, slot: Slot) -> Result<Option<Arc<HotEntry<T>>>> {
        let chain = self.canonical_chain()?;
        Ok(chain.into_iter().find(|entry| entry.slot == slot))
    }

    /// Returns the canonical entry at `step`.
    ///
    /// The block step of a slot without a block resolves to the empty slot entry.
    pub fn by_canon_step(&self, step: Step) -> Result<Option<Arc<HotEntry<T>>>> {
        let chain = self.canonical_chain()?;

        Ok(chain
            .into_iter()
            .filter(|entry| entry.slot == step.slot())
            .find(|entry| step.has_block() || !entry.has_block()))
    }

    #[must_use]
    pub fn by_block(&self, block_root: H256) -> Option<Arc<HotEntry<T>>> {
        self.inner.read().by_block(block_root)
    }

    #[must_use]
    pub fn by_state_root(&self, state_root: H256) -> Option<Arc<HotEntry<T>>> {
        let inner = self.inner.read();
        let node_ref = *inner.entries.by_state_root.get(&state_root)?;
        inner.entries.get(node_ref)
    }

    #[must_use]
    pub fn by_block_slot(&self, block_root: H256, slot: Slot) -> Option<Arc<HotEntry<T>>> {
        self.inner
            .read()
            .entries
            .get(NodeRef::new(block_root, slot))
    }

    /// Returns the latest entry of `block_root` at or before `slot`.
    #[must_use]
    pub fn closest(&self, block_root: H256, slot: Slot) -> Option<Arc<HotEntry<T>>> {
        self.inner.read().closest(block_root, slot)
    }

    /// Returns the oldest entry that has not been finalized yet.
    #[must_use]
    pub fn earliest(&self) -> Option<Arc<HotEntry<T>>> {
        let inner = self.inner.read();
        let node = inner.fork_choice.proto_array().node(0)?;
        inner.entries.get(node.node_ref())
    }

    pub fn justified(&self) -> Result<Arc<HotEntry<T>>> {
        let inner = self.inner.read();
        inner.checkpoint_entry(inner.fork_choice.justified_checkpoint())
    }

    pub fn finalized(&self) -> Result<Arc<HotEntry<T>>> {
        let inner = self.inner.read();
        inner.checkpoint_entry(inner.fork_choice.finalized_checkpoint())
    }

    #[must_use]
    pub fn justified_checkpoint(&self) -> Checkpoint {
        self.inner.read().fork_choice.justified_checkpoint()
    }

    #[must_use]
    pub fn finalized_checkpoint(&self) -> Checkpoint {
        self.inner.read().fork_choice.finalized_checkpoint()
    }

    #[must_use]
    pub fn in_subtree(&self, anchor_root: H256, root: H256) -> (bool, bool) {
        self.inner.read().fork_choice.in_subtree(anchor_root, root)
    }

    pub fn set_pin(&self, pin: NodeRef) -> Result<()> {
        self.inner.write().fork_choice.set_pin(pin)
    }

    pub fn clear_pin(&self) {
        self.inner.write().fork_choice.clear_pin();
    }

    #[must_use]
    pub fn pin(&self) -> Option<NodeRef> {
        self.inner.read().fork_choice.pin()
    }
}

// The checkpoint of an anchor in the middle of an epoch is the start of the next epoch.
fn anchor_checkpoint_epoch<P: Preset>(slot: Slot) -> u64 {
    let epoch = misc::compute_epoch_at_slot::<P>(slot);

    if misc::is_epoch_start::<P>(slot) {
        epoch
    } else {
        epoch + 1
    }
}
