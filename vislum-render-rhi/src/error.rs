use ash::vk;

use crate::types::QueueType;

#[derive(Debug, thiserror::Error)]
pub enum RhiError {
    #[error("vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    #[error("allocation error: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),

    #[error("no queue available for {0:?}")]
    NoQueue(QueueType),

    #[error("staging memory is not host visible")]
    NotHostVisible,
}
