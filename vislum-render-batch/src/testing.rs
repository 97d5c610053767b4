//! In-memory stand-ins for the device and the resource manager.

use std::{
    collections::{HashMap, HashSet},
    ptr::NonNull,
    sync::{
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use ash::vk::{self, Handle};
use vislum_render_rhi::{
    DeviceLimits, MappedRange, PipelineStage, QueueFlags, QueueInfo, QueueType, RawObject,
    RenderDevice, RhiError, StagingDirection, StagingMemory, SubmitInfo,
};

use crate::{
    batch::BatchShared,
    config::BatchConfig,
    resource::{BufferId, BufferInfo, ImageId, ImageInfo, RawResourceId, ResourceManager},
    staging::StagingPools,
};

/// Host memory backing a mock staging buffer.
struct HostMemory {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the allocation is owned by the mock and only freed on drop.
unsafe impl Send for HostMemory {}

impl HostMemory {
    fn new(len: usize) -> Self {
        let boxed = vec![0u8; len.max(1)].into_boxed_slice();
        let len = boxed.len();
        let ptr = NonNull::new(Box::into_raw(boxed) as *mut u8).unwrap_or(NonNull::dangling());
        Self { ptr, len }
    }

    fn write(&self, offset: u64, data: &[u8]) {
        let offset = offset as usize;
        assert!(offset + data.len() <= self.len, "write past the end of a staging buffer");
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.as_ptr().add(offset), data.len())
        }
    }

    fn read(&self, offset: u64, size: u64) -> Vec<u8> {
        let offset = offset as usize;
        let size = size as usize;
        assert!(offset + size <= self.len, "read past the end of a staging buffer");
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr().add(offset), size).to_vec() }
    }
}

impl Drop for HostMemory {
    fn drop(&mut self) {
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                self.ptr.as_ptr(),
                self.len,
            )))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Fill {
    pub buffer: vk::Buffer,
    pub offset: u64,
    pub size: u64,
    pub data: u32,
}

struct DeviceState {
    queues: HashMap<QueueType, QueueInfo>,
    coherent: bool,
    auto_signal: bool,
    blocking_waits: bool,
    blocked_waits: usize,
    fail_waits: bool,
    fail_submit: bool,
    fail_invalidate: bool,
    staging: HashMap<vk::Buffer, HostMemory>,
    staging_created: usize,
    fills: Vec<Fill>,
    ticks: u64,
    timestamps: HashMap<(vk::QueryPool, u32), u64>,
    timestamp_writes: Vec<(vk::QueryPool, u32)>,
    released_command_buffers: Vec<vk::CommandBuffer>,
    leased_pools: HashMap<vk::CommandPool, vk::CommandBuffer>,
    pools_leased: Vec<vk::CommandPool>,
    destroyed_objects: Vec<RawObject>,
    destroyed_semaphores: Vec<vk::Semaphore>,
    flushed: Vec<Vec<MappedRange>>,
    invalidated: Vec<Vec<MappedRange>>,
    submits: Vec<(QueueType, Vec<SubmitInfo>)>,
    fences: HashMap<vk::Fence, bool>,
    fences_created: usize,
    fence_resets: usize,
}

/// A [`RenderDevice`] that executes nothing and remembers everything.
///
/// Staging buffers are backed by host memory so tests can play the part of
/// the device by writing into readback buffers.
pub(crate) struct MockDevice {
    limits: DeviceLimits,
    next_handle: AtomicU64,
    state: Mutex<DeviceState>,
    signaled: Condvar,
}

impl MockDevice {
    pub fn new() -> Arc<Self> {
        Self::with_limits(DeviceLimits::default())
    }

    pub fn with_limits(limits: DeviceLimits) -> Arc<Self> {
        let _ = env_logger::builder().is_test(true).try_init();

        let queues = [
            (
                QueueType::Graphics,
                QueueFlags::GRAPHICS | QueueFlags::COMPUTE | QueueFlags::TRANSFER,
            ),
            (QueueType::AsyncCompute, QueueFlags::COMPUTE | QueueFlags::TRANSFER),
            (QueueType::AsyncTransfer, QueueFlags::TRANSFER),
        ]
        .into_iter()
        .enumerate()
        .map(|(family_index, (queue, flags))| {
            let info = QueueInfo {
                family_index: family_index as u32,
                flags,
            };
            (queue, info)
        })
        .collect();

        Arc::new(Self {
            limits,
            next_handle: AtomicU64::new(0x1000),
            state: Mutex::new(DeviceState {
                queues,
                coherent: true,
                auto_signal: true,
                blocking_waits: false,
                blocked_waits: 0,
                fail_waits: false,
                fail_submit: false,
                fail_invalidate: false,
                staging: HashMap::new(),
                staging_created: 0,
                fills: Vec::new(),
                ticks: 100,
                timestamps: HashMap::new(),
                timestamp_writes: Vec::new(),
                released_command_buffers: Vec::new(),
                leased_pools: HashMap::new(),
                pools_leased: Vec::new(),
                destroyed_objects: Vec::new(),
                destroyed_semaphores: Vec::new(),
                flushed: Vec::new(),
                invalidated: Vec::new(),
                submits: Vec::new(),
                fences: HashMap::new(),
                fences_created: 0,
                fence_resets: 0,
            }),
            signaled: Condvar::new(),
        })
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle<H: Handle>(&self) -> H {
        H::from_raw(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    /// Whether staging buffers created from now on are host coherent.
    pub fn set_coherent(&self, coherent: bool) {
        self.state().coherent = coherent;
    }

    /// Whether submissions complete as soon as they are handed over.
    pub fn set_auto_signal(&self, auto_signal: bool) {
        self.state().auto_signal = auto_signal;
    }

    pub fn signal_all(&self) {
        for signaled in self.state().fences.values_mut() {
            *signaled = true;
        }
        self.signaled.notify_all();
    }

    /// Whether waits with an infinite timeout block until the fence is
    /// signaled, like a real device.
    pub fn set_blocking_waits(&self, blocking: bool) {
        self.state().blocking_waits = blocking;
    }

    /// Number of threads currently blocked in `wait_fence`.
    pub fn blocked_waits(&self) -> usize {
        self.state().blocked_waits
    }

    /// Whether waiting on an unsignaled fence reports a lost device.
    pub fn fail_waits(&self, fail: bool) {
        self.state().fail_waits = fail;
    }

    pub fn fail_submit(&self, fail: bool) {
        self.state().fail_submit = fail;
    }

    pub fn fail_invalidate(&self, fail: bool) {
        self.state().fail_invalidate = fail;
    }

    pub fn remove_queue(&self, queue: QueueType) {
        self.state().queues.remove(&queue);
    }

    pub fn staging_buffers_created(&self) -> usize {
        self.state().staging_created
    }

    pub fn live_staging_buffers(&self) -> usize {
        self.state().staging.len()
    }

    /// Writes into a staging buffer the way a device copy would.
    pub fn write_staging(&self, buffer: vk::Buffer, offset: u64, data: &[u8]) {
        let state = self.state();
        let memory = state.staging.get(&buffer).expect("unknown staging buffer");
        memory.write(offset, data);
    }

    pub fn read_staging(&self, buffer: vk::Buffer, offset: u64, size: u64) -> Vec<u8> {
        let state = self.state();
        let memory = state.staging.get(&buffer).expect("unknown staging buffer");
        memory.read(offset, size)
    }

    pub fn copy_staging(
        &self,
        src: vk::Buffer,
        src_offset: u64,
        dst: vk::Buffer,
        dst_offset: u64,
        size: u64,
    ) {
        let data = self.read_staging(src, src_offset, size);
        self.write_staging(dst, dst_offset, &data);
    }

    pub fn fills(&self) -> Vec<Fill> {
        self.state().fills.clone()
    }

    pub fn timestamp_writes(&self) -> Vec<(vk::QueryPool, u32)> {
        self.state().timestamp_writes.clone()
    }

    pub fn released_command_buffers(&self) -> Vec<vk::CommandBuffer> {
        self.state().released_command_buffers.clone()
    }

    /// Every pool handed out, in allocation order.
    pub fn pools_leased(&self) -> Vec<vk::CommandPool> {
        self.state().pools_leased.clone()
    }

    pub fn live_command_buffers(&self) -> usize {
        self.state().leased_pools.len()
    }

    pub fn destroyed_objects(&self) -> Vec<RawObject> {
        self.state().destroyed_objects.clone()
    }

    pub fn destroyed_semaphores(&self) -> Vec<vk::Semaphore> {
        self.state().destroyed_semaphores.clone()
    }

    pub fn flushed_ranges(&self) -> Vec<Vec<MappedRange>> {
        self.state().flushed.clone()
    }

    pub fn invalidated_ranges(&self) -> Vec<Vec<MappedRange>> {
        self.state().invalidated.clone()
    }

    pub fn submits(&self) -> Vec<(QueueType, Vec<SubmitInfo>)> {
        self.state().submits.clone()
    }

    pub fn fences_created(&self) -> usize {
        self.state().fences_created
    }

    pub fn fence_resets(&self) -> usize {
        self.state().fence_resets
    }

    pub fn live_fences(&self) -> usize {
        self.state().fences.len()
    }
}

impl RenderDevice for MockDevice {
    fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    fn queue(&self, queue: QueueType) -> Option<QueueInfo> {
        self.state().queues.get(&queue).copied()
    }

    fn allocate_command_buffer(
        &self,
        queue: QueueType,
    ) -> Result<(vk::CommandBuffer, vk::CommandPool), RhiError> {
        if self.queue(queue).is_none() {
            return Err(RhiError::NoQueue(queue));
        }

        // One pool per live command buffer, like the Vulkan device.
        let pool: vk::CommandPool = self.handle();
        let command_buffer: vk::CommandBuffer = self.handle();
        let mut state = self.state();
        state.leased_pools.insert(pool, command_buffer);
        state.pools_leased.push(pool);
        Ok((command_buffer, pool))
    }

    fn release_command_buffer(&self, pool: vk::CommandPool, command_buffer: vk::CommandBuffer) {
        let mut state = self.state();
        // Batches built by hand in tests never leased their pool.
        if let Some(leased) = state.leased_pools.remove(&pool) {
            assert_eq!(leased, command_buffer, "command buffer released to the wrong pool");
        }
        state.released_command_buffers.push(command_buffer);
    }

    fn begin_command_buffer(&self, _command_buffer: vk::CommandBuffer) -> Result<(), RhiError> {
        Ok(())
    }

    fn end_command_buffer(&self, _command_buffer: vk::CommandBuffer) -> Result<(), RhiError> {
        Ok(())
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore, RhiError> {
        Ok(self.handle())
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state().destroyed_semaphores.push(semaphore);
    }

    fn create_fence(&self) -> Result<vk::Fence, RhiError> {
        let fence = self.handle();
        let mut state = self.state();
        state.fences.insert(fence, false);
        state.fences_created += 1;
        Ok(fence)
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<(), RhiError> {
        let mut state = self.state();
        state.fences.insert(fence, false);
        state.fence_resets += 1;
        Ok(())
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.state().fences.remove(&fence);
    }

    fn wait_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<bool, RhiError> {
        let mut state = self.state();
        let signaled = |state: &DeviceState| state.fences.get(&fence).copied().unwrap_or(false);

        if !signaled(&*state) && state.fail_waits {
            return Err(RhiError::Vulkan(vk::Result::ERROR_DEVICE_LOST));
        }

        if timeout_ns == u64::MAX && state.blocking_waits {
            // Bounded so a broken test fails instead of hanging.
            state.blocked_waits += 1;
            state = self
                .signaled
                .wait_timeout_while(state, Duration::from_secs(10), |state| !signaled(&*state))
                .unwrap_or_else(PoisonError::into_inner)
                .0;
            state.blocked_waits -= 1;
        }

        Ok(signaled(&*state))
    }

    fn submit(
        &self,
        queue: QueueType,
        submits: &[SubmitInfo],
        fence: vk::Fence,
    ) -> Result<(), RhiError> {
        let mut state = self.state();
        if state.fail_submit {
            return Err(RhiError::Vulkan(vk::Result::ERROR_DEVICE_LOST));
        }

        state.submits.push((queue, submits.to_vec()));
        let signaled = state.auto_signal;
        state.fences.insert(fence, signaled);
        drop(state);
        self.signaled.notify_all();
        Ok(())
    }

    fn create_staging_buffer(
        &self,
        size: u64,
        _direction: StagingDirection,
    ) -> Result<StagingMemory, RhiError> {
        let host = HostMemory::new(size as usize);
        let memory = StagingMemory {
            buffer: self.handle(),
            memory: self.handle(),
            memory_offset: 0,
            capacity: size,
            mapped: host.ptr,
            coherent: self.state().coherent,
        };

        let mut state = self.state();
        state.staging.insert(memory.buffer, host);
        state.staging_created += 1;
        Ok(memory)
    }

    fn destroy_staging_buffer(&self, memory: StagingMemory) {
        let removed = self.state().staging.remove(&memory.buffer);
        assert!(removed.is_some(), "staging buffer destroyed twice");
    }

    fn flush_mapped_ranges(&self, ranges: &[MappedRange]) -> Result<(), RhiError> {
        self.state().flushed.push(ranges.to_vec());
        Ok(())
    }

    fn invalidate_mapped_ranges(&self, ranges: &[MappedRange]) -> Result<(), RhiError> {
        let mut state = self.state();
        if state.fail_invalidate {
            return Err(RhiError::Vulkan(vk::Result::ERROR_MEMORY_MAP_FAILED));
        }
        state.invalidated.push(ranges.to_vec());
        Ok(())
    }

    fn destroy_object(&self, object: RawObject) {
        self.state().destroyed_objects.push(object);
    }

    fn fill_buffer(
        &self,
        _command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: u64,
        size: u64,
        data: u32,
    ) {
        let mut state = self.state();
        if let Some(memory) = state.staging.get(&buffer) {
            let pattern: Vec<u8> = data.to_le_bytes().into_iter().cycle().take(size as usize).collect();
            memory.write(offset, &pattern);
        }
        state.fills.push(Fill {
            buffer,
            offset,
            size,
            data,
        });
    }

    fn create_timestamp_pool(&self, _count: u32) -> Result<vk::QueryPool, RhiError> {
        Ok(self.handle())
    }

    fn destroy_timestamp_pool(&self, _pool: vk::QueryPool) {}

    fn reset_timestamps(
        &self,
        _command_buffer: vk::CommandBuffer,
        pool: vk::QueryPool,
        first: u32,
        count: u32,
    ) {
        let mut state = self.state();
        for query in first..first + count {
            state.timestamps.remove(&(pool, query));
        }
    }

    fn write_timestamp(
        &self,
        _command_buffer: vk::CommandBuffer,
        _stage: PipelineStage,
        pool: vk::QueryPool,
        query: u32,
    ) {
        let mut state = self.state();
        state.ticks += 10;
        let tick = state.ticks;
        state.timestamps.insert((pool, query), tick);
        state.timestamp_writes.push((pool, query));
    }

    fn read_timestamps(
        &self,
        pool: vk::QueryPool,
        first: u32,
        out: &mut [u64],
    ) -> Result<bool, RhiError> {
        let state = self.state();
        for (query, value) in (first..).zip(out.iter_mut()) {
            match state.timestamps.get(&(pool, query)) {
                Some(&tick) => *value = tick,
                None => return Ok(false),
            }
        }
        Ok(true)
    }
}

#[derive(Default)]
struct ResourceState {
    buffers: HashMap<BufferId, BufferInfo>,
    images: HashMap<ImageId, ImageInfo>,
    known: HashSet<RawResourceId>,
    acquired: HashMap<RawResourceId, u32>,
    released: HashMap<RawResourceId, u32>,
}

/// A resource manager over a fixed set of registered resources.
#[derive(Default)]
pub(crate) struct MockResources {
    state: Mutex<ResourceState>,
}

impl MockResources {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, ResourceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_buffer(&self, id: BufferId, info: BufferInfo) {
        let mut state = self.state();
        state.buffers.insert(id, info);
        state.known.insert(id.erase());
    }

    pub fn add_image(&self, id: ImageId, info: ImageInfo) {
        let mut state = self.state();
        state.images.insert(id, info);
        state.known.insert(id.erase());
    }

    /// Total references dropped for `id`.
    pub fn released(&self, id: RawResourceId) -> u32 {
        self.state().released.get(&id).copied().unwrap_or(0)
    }

    /// References currently held on `id`.
    pub fn references(&self, id: RawResourceId) -> u32 {
        let state = self.state();
        let acquired = state.acquired.get(&id).copied().unwrap_or(0);
        let released = state.released.get(&id).copied().unwrap_or(0);
        acquired.saturating_sub(released)
    }
}

impl ResourceManager for MockResources {
    fn acquire(&self, id: RawResourceId) -> bool {
        let mut state = self.state();
        if !state.known.contains(&id) {
            return false;
        }
        *state.acquired.entry(id).or_default() += 1;
        true
    }

    fn release(&self, id: RawResourceId, count: u32) {
        *self.state().released.entry(id).or_default() += count;
    }

    fn buffer_info(&self, id: BufferId) -> Option<BufferInfo> {
        self.state().buffers.get(&id).copied()
    }

    fn image_info(&self, id: ImageId) -> Option<ImageInfo> {
        self.state().images.get(&id).copied()
    }
}

/// Builds the state shared by every batch on top of fresh mocks.
pub(crate) fn shared(config: BatchConfig) -> (Arc<MockDevice>, Arc<MockResources>, Arc<BatchShared>) {
    let device = MockDevice::new();
    let resources = MockResources::new();
    let shared = BatchShared::new(device.clone(), resources.clone(), config);
    (device, resources, Arc::new(shared))
}
