use std::sync::{Mutex, PoisonError};

use ash::vk;
use smallvec::SmallVec;

use crate::{
    DebugWrapper, VkHandle,
    error::RhiError,
    types::{QueueInfo, SubmitInfo},
};

/// A device queue. Submissions are externally synchronized through a lock.
pub struct Queue {
    queue: DebugWrapper<vk::Queue>,
    info: QueueInfo,
    submit_lock: Mutex<()>,
}

impl Queue {
    pub fn new(device: &ash::Device, info: QueueInfo, queue_index: u32) -> Self {
        let queue = unsafe { device.get_device_queue(info.family_index, queue_index) };

        Self {
            queue: DebugWrapper(queue),
            info,
            submit_lock: Mutex::new(()),
        }
    }

    #[inline]
    pub fn info(&self) -> QueueInfo {
        self.info
    }

    /// Submits the batches in order, signaling `fence` once all completed.
    pub fn submit(
        &self,
        device: &ash::Device,
        submits: &[SubmitInfo],
        fence: vk::Fence,
    ) -> Result<(), RhiError> {
        // Keep the per-submit arrays alive while the vk structs borrow them.
        let wait_semaphores: SmallVec<[Vec<vk::Semaphore>; 4]> = submits
            .iter()
            .map(|submit| submit.wait_semaphores.iter().map(|(s, _)| *s).collect())
            .collect();
        let wait_stages: SmallVec<[Vec<vk::PipelineStageFlags>; 4]> = submits
            .iter()
            .map(|submit| {
                submit
                    .wait_semaphores
                    .iter()
                    .map(|(_, stage)| stage.to_vk())
                    .collect()
            })
            .collect();

        let vk_submits: SmallVec<[vk::SubmitInfo; 4]> = submits
            .iter()
            .enumerate()
            .map(|(i, submit)| {
                vk::SubmitInfo::default()
                    .command_buffers(&submit.command_buffers)
                    .wait_semaphores(&wait_semaphores[i])
                    .wait_dst_stage_mask(&wait_stages[i])
                    .signal_semaphores(&submit.signal_semaphores)
            })
            .collect();

        let _guard = self
            .submit_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        unsafe { device.queue_submit(self.queue.0, &vk_submits, fence)? };
        Ok(())
    }

    /// Waits until the queue is idle.
    pub fn wait_idle(&self, device: &ash::Device) -> Result<(), RhiError> {
        let _guard = self
            .submit_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        unsafe { device.queue_wait_idle(self.queue.0)? };
        Ok(())
    }
}

impl VkHandle for Queue {
    type Handle = vk::Queue;

    fn vk_handle(&self) -> Self::Handle {
        self.queue.0
    }
}
