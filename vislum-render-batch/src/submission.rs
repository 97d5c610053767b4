use ash::vk;
use smallvec::SmallVec;
use vislum_render_rhi::{QueueType, RenderDevice, RhiError};

use crate::{
    debug::{BatchDebugger, DebugCallback},
    pool::{BatchId, BatchPool},
    stats::BatchStats,
};

/// Identifies a [`Submission`] slot of the submitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubmissionId(pub(crate) u32);

impl SubmissionId {
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

/// A set of batches handed to one queue, owned until its fence signals.
#[derive(Debug, Default)]
pub struct Submission {
    queue: Option<QueueType>,
    fence: Option<vk::Fence>,
    batches: SmallVec<[BatchId; 4]>,
    semaphores: SmallVec<[vk::Semaphore; 2]>,
}

impl Submission {
    /// Takes ownership of `batches` and `semaphores`, returning the fence to
    /// submit with. The fence is created on first use and reset afterwards.
    ///
    /// # Panics
    /// If the previous use was not released.
    pub fn construct(
        &mut self,
        device: &dyn RenderDevice,
        queue: QueueType,
        batches: &[BatchId],
        semaphores: &[vk::Semaphore],
    ) -> Result<vk::Fence, RhiError> {
        assert!(
            self.batches.is_empty() && self.semaphores.is_empty(),
            "submission is still in use"
        );

        let fence = match self.fence {
            Some(fence) => {
                device.reset_fence(fence)?;
                fence
            }
            None => *self.fence.insert(device.create_fence()?),
        };

        self.queue = Some(queue);
        self.batches.extend_from_slice(batches);
        self.semaphores.extend_from_slice(semaphores);
        Ok(fence)
    }

    #[inline]
    pub fn queue(&self) -> Option<QueueType> {
        self.queue
    }

    #[inline]
    pub fn fence(&self) -> Option<vk::Fence> {
        self.fence
    }

    pub fn batches(&self) -> &[BatchId] {
        &self.batches
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty() && self.semaphores.is_empty()
    }

    /// The fence to wait on before releasing, if the submission owns any
    /// batch.
    pub fn pending_fence(&self) -> Option<vk::Fence> {
        self.fence.filter(|_| !self.batches.is_empty())
    }

    /// Destroys the owned semaphores, completes every owned batch and drops
    /// the references held on them.
    ///
    /// Every batch is completed even if one of them fails; the first error
    /// is returned.
    pub fn release(
        &mut self,
        device: &dyn RenderDevice,
        pool: &BatchPool,
        stats: &mut BatchStats,
        debugger: &dyn BatchDebugger,
        callback: &mut DebugCallback<'_>,
    ) -> Result<(), RhiError> {
        for semaphore in self.semaphores.drain(..) {
            device.destroy_semaphore(semaphore);
        }

        let mut result = Ok(());
        for id in self.batches.drain(..) {
            let Some(batch) = pool.get(id) else {
                log::error!("submitted batch {id:?} was recycled before completion");
                continue;
            };

            let completed = batch.on_complete(stats, debugger, callback);
            if result.is_ok() {
                result = completed;
            }
            pool.release(id);
        }

        self.queue = None;
        result
    }

    /// Forgets the owned batches without completing them. Used when the
    /// queue rejected the submission.
    pub(crate) fn cancel(&mut self, device: &dyn RenderDevice) {
        for semaphore in self.semaphores.drain(..) {
            device.destroy_semaphore(semaphore);
        }
        self.batches.clear();
        self.queue = None;
    }

    /// Destroys the fence.
    ///
    /// # Panics
    /// If the submission was not released.
    pub fn teardown(&mut self, device: &dyn RenderDevice) {
        assert!(self.is_empty(), "submission must be released before teardown");
        if let Some(fence) = self.fence.take() {
            device.destroy_fence(fence);
        }
    }
}
