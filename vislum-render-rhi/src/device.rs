use ash::vk;

use crate::{
    error::RhiError,
    object::RawObject,
    types::{
        DeviceLimits, MappedRange, PipelineStage, QueueInfo, QueueType, StagingDirection,
        StagingMemory, SubmitInfo,
    },
};

/// The device/queue boundary the batching layer drives.
///
/// Implemented by [`crate::vulkan::VulkanDevice`] for real hardware. Every
/// call may come from any thread.
pub trait RenderDevice: Send + Sync {
    /// Returns the device limits.
    fn limits(&self) -> &DeviceLimits;

    /// Resolves a queue type to the queue that serves it.
    fn queue(&self, queue: QueueType) -> Option<QueueInfo>;

    /// Allocates a primary command buffer for `queue`, returning it together
    /// with the pool that owns it.
    ///
    /// The pool is exclusive to the command buffer until it is released, so
    /// command buffers may be recorded on different threads without locking.
    fn allocate_command_buffer(
        &self,
        queue: QueueType,
    ) -> Result<(vk::CommandBuffer, vk::CommandPool), RhiError>;

    /// Returns a command buffer to its owning pool for reuse. The GPU must be
    /// done with it.
    fn release_command_buffer(&self, pool: vk::CommandPool, command_buffer: vk::CommandBuffer);

    /// Begins a one-time-submit recording.
    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<(), RhiError>;

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<(), RhiError>;

    fn create_semaphore(&self) -> Result<vk::Semaphore, RhiError>;

    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    /// Creates a fence in the unsignaled state.
    fn create_fence(&self) -> Result<vk::Fence, RhiError>;

    fn reset_fence(&self, fence: vk::Fence) -> Result<(), RhiError>;

    fn destroy_fence(&self, fence: vk::Fence);

    /// Waits for `fence`. Returns `false` if the wait timed out.
    ///
    /// A timeout of zero polls the fence status.
    fn wait_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<bool, RhiError>;

    /// Submits `submits` to `queue` in order, signaling `fence` when all of
    /// them have completed.
    fn submit(
        &self,
        queue: QueueType,
        submits: &[SubmitInfo],
        fence: vk::Fence,
    ) -> Result<(), RhiError>;

    /// Creates a persistently mapped, host visible buffer.
    fn create_staging_buffer(
        &self,
        size: u64,
        direction: StagingDirection,
    ) -> Result<StagingMemory, RhiError>;

    fn destroy_staging_buffer(&self, memory: StagingMemory);

    /// Makes host writes visible to the device.
    fn flush_mapped_ranges(&self, ranges: &[MappedRange]) -> Result<(), RhiError>;

    /// Makes device writes visible to the host.
    fn invalidate_mapped_ranges(&self, ranges: &[MappedRange]) -> Result<(), RhiError>;

    /// Destroys a raw driver object immediately.
    fn destroy_object(&self, object: RawObject);

    /// Records a fill of `buffer[offset..offset + size]` with `data`.
    fn fill_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: u64,
        size: u64,
        data: u32,
    );

    fn create_timestamp_pool(&self, count: u32) -> Result<vk::QueryPool, RhiError>;

    fn destroy_timestamp_pool(&self, pool: vk::QueryPool);

    fn reset_timestamps(
        &self,
        command_buffer: vk::CommandBuffer,
        pool: vk::QueryPool,
        first: u32,
        count: u32,
    );

    fn write_timestamp(
        &self,
        command_buffer: vk::CommandBuffer,
        stage: PipelineStage,
        pool: vk::QueryPool,
        query: u32,
    );

    /// Reads `out.len()` timestamps starting at `first`.
    ///
    /// Returns `false` if the results are not available yet.
    fn read_timestamps(
        &self,
        pool: vk::QueryPool,
        first: u32,
        out: &mut [u64],
    ) -> Result<bool, RhiError>;
}
