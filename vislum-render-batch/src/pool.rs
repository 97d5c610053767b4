use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use crossbeam::channel::{Receiver, Sender};
use vislum_render_rhi::QueueType;

use crate::{
    batch::{BatchShared, CommandBatch},
    error::BatchError,
    state::BatchState,
};

/// A reference to a batch in a [`BatchPool`].
///
/// The generation changes every time the slot is recycled, so an id of a
/// recycled batch never resolves to its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId {
    index: u32,
    generation: u32,
}

impl BatchId {
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

struct BatchSlot {
    batch: CommandBatch,
    generation: AtomicU32,
    ref_count: AtomicU32,
}

/// A fixed set of batch slots recycled through a free list.
pub struct BatchPool {
    slots: Box<[BatchSlot]>,
    free_tx: Sender<u32>,
    free_rx: Receiver<u32>,
}

impl BatchPool {
    pub(crate) fn new(shared: Arc<BatchShared>) -> Self {
        let count = shared.config.max_batches;
        let (free_tx, free_rx) = crossbeam::channel::bounded(count as usize);

        let slots = (0..count)
            .map(|index| {
                // The channel has room for every slot.
                let _ = free_tx.try_send(index);
                BatchSlot {
                    batch: CommandBatch::new(index, shared.clone()),
                    generation: AtomicU32::new(0),
                    ref_count: AtomicU32::new(0),
                }
            })
            .collect();

        Self {
            slots,
            free_tx,
            free_rx,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of free slots.
    #[inline]
    pub fn available(&self) -> usize {
        self.free_rx.len()
    }

    /// Takes a free slot and constructs its batch. The caller holds the only
    /// reference.
    pub fn allocate(&self, queue: QueueType, depends_on: &[BatchId]) -> Result<BatchId, BatchError> {
        let Ok(index) = self.free_rx.try_recv() else {
            log::warn!("all {} batches are in use", self.slots.len());
            return Err(BatchError::PoolExhausted);
        };

        let slot = &self.slots[index as usize];
        if let Err(e) = slot.batch.construct(queue, depends_on) {
            let _ = self.free_tx.try_send(index);
            return Err(e);
        }

        slot.ref_count.store(1, Ordering::Release);
        Ok(BatchId::new(index, slot.generation.load(Ordering::Acquire)))
    }

    fn slot(&self, id: BatchId) -> Option<&BatchSlot> {
        let slot = self.slots.get(id.index as usize)?;
        let alive = slot.generation.load(Ordering::Acquire) == id.generation
            && slot.ref_count.load(Ordering::Acquire) > 0;
        alive.then_some(slot)
    }

    /// Resolves `id`, or `None` if the batch was recycled.
    pub fn get(&self, id: BatchId) -> Option<&CommandBatch> {
        self.slot(id).map(|slot| &slot.batch)
    }

    /// Resolves `id` by slot index alone.
    pub(crate) fn by_index(&self, index: u32) -> &CommandBatch {
        &self.slots[index as usize].batch
    }

    #[inline]
    pub fn is_alive(&self, id: BatchId) -> bool {
        self.slot(id).is_some()
    }

    /// State of the batch. A recycled batch reports `Complete`.
    pub fn state(&self, id: BatchId) -> BatchState {
        self.get(id)
            .map_or(BatchState::Complete, CommandBatch::state)
    }

    /// Adds a reference to a live batch. Returns `false` if it was recycled.
    pub fn retain(&self, id: BatchId) -> bool {
        let Some(slot) = self.slot(id) else {
            return false;
        };
        slot.ref_count.fetch_add(1, Ordering::AcqRel);
        true
    }

    /// Drops a reference. The last one recycles the batch: completed batches
    /// are torn down, unsubmitted ones are abandoned.
    ///
    /// # Panics
    /// If `id` is stale, or the last reference to an in-flight batch is
    /// dropped.
    pub fn release(&self, id: BatchId) {
        let slot = self.slot(id).unwrap_or_else(|| panic!("released stale batch {id:?}"));
        if slot.ref_count.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }

        match slot.batch.state() {
            BatchState::Complete => slot.batch.teardown(),
            _ => slot.batch.abandon(),
        }

        slot.generation.fetch_add(1, Ordering::AcqRel);
        let _ = self.free_tx.try_send(id.index);
    }

    /// Asserts that every batch was returned.
    pub fn shutdown(&self) {
        let in_use = self.slots.len() - self.available();
        assert!(in_use == 0, "batch pool shut down with {in_use} batches in use");
    }
}
