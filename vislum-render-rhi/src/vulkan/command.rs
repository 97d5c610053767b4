use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use ash::vk;

use crate::error::RhiError;

/// Which pools of a [`CommandPools`] are idle and which are leased out.
///
/// A leased pool belongs to whoever holds its command buffer, so recording
/// into it and resetting it never race with another thread.
#[derive(Debug, Default)]
struct Leases {
    idle: Vec<(vk::CommandPool, vk::CommandBuffer)>,
    leased: HashMap<vk::CommandPool, vk::CommandBuffer>,
}

impl Leases {
    fn lease_idle(&mut self) -> Option<(vk::CommandPool, vk::CommandBuffer)> {
        let (pool, command_buffer) = self.idle.pop()?;
        self.leased.insert(pool, command_buffer);
        Some((pool, command_buffer))
    }

    fn lease_new(&mut self, pool: vk::CommandPool, command_buffer: vk::CommandBuffer) {
        let previous = self.leased.insert(pool, command_buffer);
        assert!(previous.is_none(), "command pool leased twice");
    }

    /// Ends the lease of `pool`. Returns false if `pool` is not leased with
    /// `command_buffer`.
    fn end_lease(&mut self, pool: vk::CommandPool, command_buffer: vk::CommandBuffer) -> bool {
        match self.leased.get(&pool) {
            Some(&leased) if leased == command_buffer => {
                self.leased.remove(&pool);
                true
            }
            _ => false,
        }
    }

    fn make_idle(&mut self, pool: vk::CommandPool, command_buffer: vk::CommandBuffer) {
        self.idle.push((pool, command_buffer));
    }

    fn drain(&mut self) -> impl Iterator<Item = vk::CommandPool> + '_ {
        self.idle
            .drain(..)
            .map(|(pool, _)| pool)
            .chain(self.leased.drain().map(|(pool, _)| pool))
    }
}

/// Command pools of one queue family, each owning a single primary command
/// buffer.
///
/// Every allocation leases a whole pool. Releasing resets the pool and keeps
/// it for the next lease.
pub struct CommandPools {
    queue_family_index: u32,
    leases: Mutex<Leases>,
}

impl CommandPools {
    pub fn new(queue_family_index: u32) -> Self {
        Self {
            queue_family_index,
            leases: Mutex::new(Leases::default()),
        }
    }

    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    fn leases(&self) -> std::sync::MutexGuard<'_, Leases> {
        self.leases.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether `pool` is currently leased out by this family.
    pub fn is_leased(&self, pool: vk::CommandPool) -> bool {
        self.leases().leased.contains_key(&pool)
    }

    /// Leases an idle pool, or creates a new one.
    pub fn allocate(
        &self,
        device: &ash::Device,
    ) -> Result<(vk::CommandBuffer, vk::CommandPool), RhiError> {
        if let Some((pool, command_buffer)) = self.leases().lease_idle() {
            return Ok((command_buffer, pool));
        }

        let create_info =
            vk::CommandPoolCreateInfo::default().queue_family_index(self.queue_family_index);
        let pool = unsafe { device.create_command_pool(&create_info, None)? };

        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let command_buffer = match unsafe { device.allocate_command_buffers(&allocate_info) } {
            Ok(command_buffers) => command_buffers[0],
            Err(e) => {
                unsafe { device.destroy_command_pool(pool, None) };
                return Err(e.into());
            }
        };

        log::trace!(
            "created command pool {pool:?} on family {}",
            self.queue_family_index
        );

        self.leases().lease_new(pool, command_buffer);
        Ok((command_buffer, pool))
    }

    /// Resets a leased pool and makes it available again.
    ///
    /// The GPU must be done with the command buffer.
    pub fn recycle(
        &self,
        device: &ash::Device,
        pool: vk::CommandPool,
        command_buffer: vk::CommandBuffer,
    ) {
        if !self.leases().end_lease(pool, command_buffer) {
            log::error!("command buffer {command_buffer:?} is not leased from pool {pool:?}");
            return;
        }

        // No longer leased and not yet idle, so nobody else can reach it.
        let result = unsafe { device.reset_command_pool(pool, vk::CommandPoolResetFlags::empty()) };

        match result {
            Ok(()) => self.leases().make_idle(pool, command_buffer),
            Err(e) => {
                log::error!("failed to reset command pool {pool:?}: {e}");
                unsafe { device.destroy_command_pool(pool, None) };
            }
        }
    }

    /// Destroys every pool, leased or not.
    ///
    /// # Safety
    /// No command buffer from these pools may still be pending on the GPU.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        let mut leases = self.leases();
        for pool in leases.drain() {
            unsafe { device.destroy_command_pool(pool, None) };
        }
    }
}
