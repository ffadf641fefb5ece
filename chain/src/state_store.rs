use core::marker::PhantomData;
use std::sync::Arc;

use anyhow::Result;
use derivative::Derivative;
use hash_hasher::HashedMap;
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use snap::raw::{Decoder, Encoder};
use types::phase0::primitives::H256;

/// Storage for finalized states, keyed by state root.
pub trait StateStore<S>: Send + Sync {
    fn store(&self, state_root: H256, state: Arc<S>) -> Result<()>;

    fn get(&self, state_root: H256) -> Result<Option<Arc<S>>>;

    fn remove(&self, state_root: H256) -> Result<()>;
}

#[derive(Derivative)]
#[derivative(Default(bound = ""))]
pub struct InMemoryStateStore<S> {
    states: RwLock<HashedMap<H256, Arc<S>>>,
}

impl<S: Send + Sync> StateStore<S> for InMemoryStateStore<S> {
    fn store(&self, state_root: H256, state: Arc<S>) -> Result<()> {
        self.states.write().insert(state_root, state);
        Ok(())
    }

    fn get(&self, state_root: H256) -> Result<Option<Arc<S>>> {
        Ok(self.states.read().get(&state_root).cloned())
    }

    fn remove(&self, state_root: H256) -> Result<()> {
        self.states.write().remove(&state_root);
        Ok(())
    }
}

/// Keeps states serialized and compressed with Snappy.
///
/// Every call to [`StateStore::get`] decompresses and deserializes the state anew.
#[derive(Derivative)]
#[derivative(Default(bound = ""))]
pub struct CompressedStateStore<S> {
    states: RwLock<HashedMap<H256, Vec<u8>>>,
    phantom: PhantomData<S>,
}

impl<S> CompressedStateStore<S> {
    #[must_use]
    pub fn compressed_size(&self) -> usize {
        self.states.read().values().map(Vec::len).sum()
    }
}

impl<S: Serialize + DeserializeOwned + Send + Sync> StateStore<S> for CompressedStateStore<S> {
    fn store(&self, state_root: H256, state: Arc<S>) -> Result<()> {
        let bytes = bincode::serialize(&*state)?;
        let compressed = compress(&bytes)?;
        self.states.write().insert(state_root, compressed);
        Ok(())
    }

    fn get(&self, state_root: H256) -> Result<Option<Arc<S>>> {
        let Some(compressed) = self.states.read().get(&state_root).cloned() else {
            return Ok(None);
        };

        let bytes = decompress(&compressed)?;
        let state = bincode::deserialize(&bytes)?;

        Ok(Some(Arc::new(state)))
    }

    fn remove(&self, state_root: H256) -> Result<()> {
        self.states.write().remove(&state_root);
        Ok(())
    }
}

fn compress(data: &[u8]) -> Result<Vec<u8>> {
    Encoder::new().compress_vec(data).map_err(Into::into)
}

fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    Decoder::new().decompress_vec(data).map_err(Into::into)
}
