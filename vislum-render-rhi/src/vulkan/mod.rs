mod command;
mod memory;
mod queue;

pub use command::CommandPools;
pub use memory::StagingAllocator;
pub use queue::Queue;

use ash::{khr, vk};

use crate::{
    device::RenderDevice,
    error::RhiError,
    object::{DestroyContext, RawObject, destroy_raw_object},
    types::{
        DeviceLimits, MappedRange, PipelineStage, QueueFlags, QueueInfo, QueueType,
        StagingDirection, StagingMemory, SubmitInfo,
    },
};

/// A queue the device should expose for a [`QueueType`].
#[derive(Debug, Clone, Copy)]
pub struct QueueDescription {
    pub queue: QueueType,
    pub family_index: u32,
    pub queue_index: u32,
}

pub struct VulkanDeviceCreateInfo<'a> {
    pub instance: &'a ash::Instance,
    pub physical_device: vk::PhysicalDevice,
    /// The logical device. Must outlive the [`VulkanDevice`].
    pub device: ash::Device,
    pub queues: &'a [QueueDescription],
    /// Whether `VK_KHR_acceleration_structure` was enabled on the device.
    pub acceleration_structure: bool,
}

struct QueueSlot {
    queue: Queue,
    pools: CommandPools,
}

/// A [`RenderDevice`] backed by a Vulkan logical device.
pub struct VulkanDevice {
    device: ash::Device,
    acceleration_structure: Option<khr::acceleration_structure::Device>,
    limits: DeviceLimits,
    queues: [Option<QueueSlot>; 3],
    staging: StagingAllocator,
}

impl VulkanDevice {
    /// Wraps an existing logical device.
    pub fn new(create_info: VulkanDeviceCreateInfo<'_>) -> Result<Self, RhiError> {
        let instance = create_info.instance;
        let device = create_info.device;

        let properties =
            unsafe { instance.get_physical_device_properties(create_info.physical_device) };
        let families = unsafe {
            instance.get_physical_device_queue_family_properties(create_info.physical_device)
        };

        let mut queues: [Option<QueueSlot>; 3] = [None, None, None];
        for description in create_info.queues {
            let Some(family) = families.get(description.family_index as usize) else {
                return Err(RhiError::NoQueue(description.queue));
            };

            let info = QueueInfo {
                family_index: description.family_index,
                flags: QueueFlags::from_vk(family.queue_flags),
            };

            log::debug!(
                "{:?} queue on family {} ({:?})",
                description.queue,
                info.family_index,
                info.flags
            );

            queues[description.queue.index()] = Some(QueueSlot {
                queue: Queue::new(&device, info, description.queue_index),
                pools: CommandPools::new(description.family_index),
            });
        }

        let acceleration_structure = create_info
            .acceleration_structure
            .then(|| khr::acceleration_structure::Device::new(instance, &device));

        let staging = StagingAllocator::new(
            instance,
            create_info.physical_device,
            &device,
            properties.limits.non_coherent_atom_size,
        )?;

        Ok(Self {
            device,
            acceleration_structure,
            limits: DeviceLimits::from_vk(&properties.limits),
            queues,
            staging,
        })
    }

    #[inline]
    pub fn ash_device(&self) -> &ash::Device {
        &self.device
    }

    fn slot(&self, queue: QueueType) -> Result<&QueueSlot, RhiError> {
        self.queues[queue.index()]
            .as_ref()
            .ok_or(RhiError::NoQueue(queue))
    }

    fn pools_leasing(&self, pool: vk::CommandPool) -> Option<&CommandPools> {
        self.queues
            .iter()
            .flatten()
            .map(|slot| &slot.pools)
            .find(|pools| pools.is_leased(pool))
    }
}

impl RenderDevice for VulkanDevice {
    fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    fn queue(&self, queue: QueueType) -> Option<QueueInfo> {
        self.queues[queue.index()]
            .as_ref()
            .map(|slot| slot.queue.info())
    }

    fn allocate_command_buffer(
        &self,
        queue: QueueType,
    ) -> Result<(vk::CommandBuffer, vk::CommandPool), RhiError> {
        self.slot(queue)?.pools.allocate(&self.device)
    }

    fn release_command_buffer(&self, pool: vk::CommandPool, command_buffer: vk::CommandBuffer) {
        match self.pools_leasing(pool) {
            Some(pools) => pools.recycle(&self.device, pool, command_buffer),
            None => log::error!("command buffer {command_buffer:?} released to unknown pool {pool:?}"),
        }
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<(), RhiError> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe { self.device.begin_command_buffer(command_buffer, &begin_info)? };
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<(), RhiError> {
        unsafe { self.device.end_command_buffer(command_buffer)? };
        Ok(())
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore, RhiError> {
        let create_info = vk::SemaphoreCreateInfo::default();
        Ok(unsafe { self.device.create_semaphore(&create_info, None)? })
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn create_fence(&self) -> Result<vk::Fence, RhiError> {
        let create_info = vk::FenceCreateInfo::default();
        Ok(unsafe { self.device.create_fence(&create_info, None)? })
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<(), RhiError> {
        unsafe { self.device.reset_fences(&[fence])? };
        Ok(())
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn wait_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<bool, RhiError> {
        if timeout_ns == 0 {
            return Ok(unsafe { self.device.get_fence_status(fence)? });
        }

        match unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn submit(
        &self,
        queue: QueueType,
        submits: &[SubmitInfo],
        fence: vk::Fence,
    ) -> Result<(), RhiError> {
        self.slot(queue)?.queue.submit(&self.device, submits, fence)
    }

    fn create_staging_buffer(
        &self,
        size: u64,
        direction: StagingDirection,
    ) -> Result<StagingMemory, RhiError> {
        self.staging.create(&self.device, size, direction)
    }

    fn destroy_staging_buffer(&self, memory: StagingMemory) {
        self.staging.destroy(&self.device, memory);
    }

    fn flush_mapped_ranges(&self, ranges: &[MappedRange]) -> Result<(), RhiError> {
        let vk_ranges: Vec<_> = ranges.iter().map(MappedRange::to_vk).collect();
        unsafe { self.device.flush_mapped_memory_ranges(&vk_ranges)? };
        Ok(())
    }

    fn invalidate_mapped_ranges(&self, ranges: &[MappedRange]) -> Result<(), RhiError> {
        let vk_ranges: Vec<_> = ranges.iter().map(MappedRange::to_vk).collect();
        unsafe { self.device.invalidate_mapped_memory_ranges(&vk_ranges)? };
        Ok(())
    }

    fn destroy_object(&self, object: RawObject) {
        let ctx = DestroyContext {
            device: &self.device,
            acceleration_structure: self.acceleration_structure.as_ref(),
        };

        unsafe { destroy_raw_object(&ctx, object) };
    }

    fn fill_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: u64,
        size: u64,
        data: u32,
    ) {
        unsafe {
            self.device
                .cmd_fill_buffer(command_buffer, buffer, offset, size, data)
        };
    }

    fn create_timestamp_pool(&self, count: u32) -> Result<vk::QueryPool, RhiError> {
        let create_info = vk::QueryPoolCreateInfo::default()
            .query_type(vk::QueryType::TIMESTAMP)
            .query_count(count);

        Ok(unsafe { self.device.create_query_pool(&create_info, None)? })
    }

    fn destroy_timestamp_pool(&self, pool: vk::QueryPool) {
        unsafe { self.device.destroy_query_pool(pool, None) };
    }

    fn reset_timestamps(
        &self,
        command_buffer: vk::CommandBuffer,
        pool: vk::QueryPool,
        first: u32,
        count: u32,
    ) {
        unsafe {
            self.device
                .cmd_reset_query_pool(command_buffer, pool, first, count)
        };
    }

    fn write_timestamp(
        &self,
        command_buffer: vk::CommandBuffer,
        stage: PipelineStage,
        pool: vk::QueryPool,
        query: u32,
    ) {
        unsafe {
            self.device
                .cmd_write_timestamp(command_buffer, stage.to_vk(), pool, query)
        };
    }

    fn read_timestamps(
        &self,
        pool: vk::QueryPool,
        first: u32,
        out: &mut [u64],
    ) -> Result<bool, RhiError> {
        let result = unsafe {
            self.device
                .get_query_pool_results(pool, first, out, vk::QueryResultFlags::TYPE_64)
        };

        match result {
            Ok(()) => Ok(true),
            Err(vk::Result::NOT_READY) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        for slot in self.queues.iter().flatten() {
            if let Err(e) = slot.queue.wait_idle(&self.device) {
                log::error!("failed to wait for queue idle: {e}");
            }
            unsafe { slot.pools.destroy(&self.device) };
        }
    }
}
