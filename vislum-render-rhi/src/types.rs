use std::ptr::NonNull;

use ash::vk;

use crate::vk_enum_flags;

vk_enum_flags! {
    pub struct QueueFlags: vk::QueueFlags {
        GRAPHICS => GRAPHICS,
        COMPUTE => COMPUTE,
        TRANSFER => TRANSFER,
    }
}

vk_enum_flags! {
    pub struct PipelineStage: vk::PipelineStageFlags {
        TOP_OF_PIPE => TOP_OF_PIPE,
        DRAW_INDIRECT => DRAW_INDIRECT,
        VERTEX_SHADER => VERTEX_SHADER,
        FRAGMENT_SHADER => FRAGMENT_SHADER,
        COLOR_ATTACHMENT_OUTPUT => COLOR_ATTACHMENT_OUTPUT,
        COMPUTE_SHADER => COMPUTE_SHADER,
        TRANSFER => TRANSFER,
        BOTTOM_OF_PIPE => BOTTOM_OF_PIPE,
        HOST => HOST,
        ALL_GRAPHICS => ALL_GRAPHICS,
        ALL_COMMANDS => ALL_COMMANDS,
    }
}

/// The class of device queue a batch targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueueType {
    Graphics,
    AsyncCompute,
    AsyncTransfer,
}

impl QueueType {
    pub const ALL: [QueueType; 3] = [
        QueueType::Graphics,
        QueueType::AsyncCompute,
        QueueType::AsyncTransfer,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// A queue resolved by the device for a [`QueueType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueInfo {
    pub family_index: u32,
    pub flags: QueueFlags,
}

impl QueueInfo {
    /// Graphics and compute families can take submissions without waiting
    /// for a transfer-only ownership handoff.
    #[inline]
    pub const fn supports_immediate_submit(&self) -> bool {
        self.flags.intersects(QueueFlags::GRAPHICS) || self.flags.intersects(QueueFlags::COMPUTE)
    }
}

/// Device limits the batching layer depends on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceLimits {
    pub non_coherent_atom_size: u64,
    pub min_memory_map_alignment: u64,
    pub optimal_buffer_copy_offset_alignment: u64,
    pub optimal_buffer_copy_row_pitch_alignment: u64,
    /// Nanoseconds per timestamp tick.
    pub timestamp_period: f32,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            non_coherent_atom_size: 64,
            min_memory_map_alignment: 64,
            optimal_buffer_copy_offset_alignment: 4,
            optimal_buffer_copy_row_pitch_alignment: 1,
            timestamp_period: 1.0,
        }
    }
}

impl DeviceLimits {
    pub fn from_vk(limits: &vk::PhysicalDeviceLimits) -> Self {
        Self {
            non_coherent_atom_size: limits.non_coherent_atom_size,
            min_memory_map_alignment: limits.min_memory_map_alignment as u64,
            optimal_buffer_copy_offset_alignment: limits.optimal_buffer_copy_offset_alignment,
            optimal_buffer_copy_row_pitch_alignment: limits
                .optimal_buffer_copy_row_pitch_alignment,
            timestamp_period: limits.timestamp_period,
        }
    }
}

/// An owned queue submit descriptor.
///
/// Lists are kept in the exact order they were pushed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmitInfo {
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub signal_semaphores: Vec<vk::Semaphore>,
    pub wait_semaphores: Vec<(vk::Semaphore, PipelineStage)>,
}

/// A range of mapped device memory to flush or invalidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedRange {
    pub memory: vk::DeviceMemory,
    pub offset: u64,
    pub size: u64,
}

impl MappedRange {
    pub fn to_vk(&self) -> vk::MappedMemoryRange<'static> {
        vk::MappedMemoryRange::default()
            .memory(self.memory)
            .offset(self.offset)
            .size(self.size)
    }
}

/// Direction of a staging transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StagingDirection {
    /// Host writes, device reads.
    Upload,
    /// Device writes, host reads.
    Readback,
}

/// A host-visible buffer created for staging transfers.
///
/// For non-coherent memory, `memory_offset` is a multiple of
/// [`DeviceLimits::non_coherent_atom_size`] and no other allocation shares
/// the atoms the buffer covers.
#[derive(Debug)]
pub struct StagingMemory {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    /// Offset of the buffer inside `memory`.
    pub memory_offset: u64,
    pub capacity: u64,
    pub mapped: NonNull<u8>,
    pub coherent: bool,
}

// SAFETY: the mapping stays valid until the buffer is handed back to
// `RenderDevice::destroy_staging_buffer`, and concurrent writers only ever
// touch disjoint ranges handed out by the staging arena.
unsafe impl Send for StagingMemory {}
unsafe impl Sync for StagingMemory {}
