use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use ash::vk;
use gpu_allocator::{
    MemoryLocation,
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc},
};

use crate::{
    align_up,
    error::RhiError,
    types::{StagingDirection, StagingMemory},
};

/// Allocates the host-visible buffers backing staging memory.
///
/// Every buffer starts and ends on a `nonCoherentAtomSize` boundary, so
/// flushing whole atoms never reaches into a neighbouring allocation.
pub struct StagingAllocator {
    allocator: Mutex<Allocator>,
    allocations: Mutex<HashMap<vk::Buffer, Allocation>>,
    atom_size: u64,
}

impl StagingAllocator {
    pub fn new(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: &ash::Device,
        non_coherent_atom_size: u64,
    ) -> Result<Self, RhiError> {
        let create_desc = AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        };

        let allocator = Allocator::new(&create_desc)?;

        Ok(Self {
            allocator: Mutex::new(allocator),
            allocations: Mutex::new(HashMap::new()),
            atom_size: non_coherent_atom_size.max(1),
        })
    }

    /// Creates a buffer and binds freshly allocated, mapped memory to it.
    pub fn create(
        &self,
        device: &ash::Device,
        size: u64,
        direction: StagingDirection,
    ) -> Result<StagingMemory, RhiError> {
        let (usage, location, name) = match direction {
            StagingDirection::Upload => (
                vk::BufferUsageFlags::TRANSFER_SRC,
                MemoryLocation::CpuToGpu,
                "staging upload",
            ),
            // Shader trace output is written straight into readback memory.
            StagingDirection::Readback => (
                vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::STORAGE_BUFFER,
                MemoryLocation::GpuToCpu,
                "staging readback",
            ),
        };

        let size = align_up(size, self.atom_size);
        let create_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&create_info, None)? };
        let mut requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        requirements.alignment = requirements.alignment.max(self.atom_size);
        requirements.size = align_up(requirements.size, self.atom_size);

        let allocation = self
            .allocator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            });

        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e.into());
            }
        };

        let Some(mapped) = allocation.mapped_ptr() else {
            unsafe { device.destroy_buffer(buffer, None) };
            self.free_allocation(allocation);
            return Err(RhiError::NotHostVisible);
        };

        let memory = unsafe { allocation.memory() };
        let memory_offset = allocation.offset();
        let coherent = allocation
            .memory_properties()
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT);

        if let Err(e) = unsafe { device.bind_buffer_memory(buffer, memory, memory_offset) } {
            unsafe { device.destroy_buffer(buffer, None) };
            self.free_allocation(allocation);
            return Err(e.into());
        }

        self.allocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(buffer, allocation);

        Ok(StagingMemory {
            buffer,
            memory,
            memory_offset,
            capacity: size,
            mapped: mapped.cast(),
            coherent,
        })
    }

    /// Destroys a staging buffer and frees its memory.
    pub fn destroy(&self, device: &ash::Device, memory: StagingMemory) {
        unsafe { device.destroy_buffer(memory.buffer, None) };

        let allocation = self
            .allocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&memory.buffer);

        match allocation {
            Some(allocation) => self.free_allocation(allocation),
            None => log::error!("staging buffer {:?} has no allocation", memory.buffer),
        }
    }

    fn free_allocation(&self, allocation: Allocation) {
        let result = self
            .allocator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .free(allocation);

        if let Err(e) = result {
            log::error!("failed to free staging allocation: {e}");
        }
    }
}
