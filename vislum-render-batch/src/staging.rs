use std::{
    ptr::NonNull,
    sync::{Arc, Mutex, PoisonError},
};

use ash::vk;
use smallvec::SmallVec;
use vislum_render_rhi::{
    MappedRange, RenderDevice, StagingDirection, StagingMemory, align_down, align_up,
};

use crate::{config::StagingConfig, error::StagingError};

/// A host visible buffer owned by a batch, bump allocated from offset zero.
#[derive(Debug)]
pub struct StagingBuffer {
    memory: StagingMemory,
    /// Current linear offset. Never exceeds the capacity.
    size: u64,
    /// End of the range already made visible to the device.
    flushed: u64,
}

impl StagingBuffer {
    fn new(memory: StagingMemory) -> Self {
        Self {
            memory,
            size: 0,
            flushed: 0,
        }
    }

    #[inline]
    pub fn vk_buffer(&self) -> vk::Buffer {
        self.memory.buffer
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.memory.capacity
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn is_coherent(&self) -> bool {
        self.memory.coherent
    }

    /// Bytes still available after aligning the current offset.
    fn available(&self, offset_align: u64, block_align: u64) -> u64 {
        let offset = align_up(self.size, offset_align);
        align_down(self.capacity().saturating_sub(offset), block_align)
    }

    /// The mapped contents of `offset..offset + size`.
    ///
    /// # Safety
    /// The device must not be writing to the range.
    unsafe fn bytes(&self, offset: u64, size: u64) -> &[u8] {
        debug_assert!(offset + size <= self.size);
        unsafe {
            std::slice::from_raw_parts(
                self.memory.mapped.as_ptr().add(offset as usize),
                size as usize,
            )
        }
    }
}

/// A reservation inside one of the arena's staging buffers.
///
/// Stays valid until the batch that handed it out completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingRange {
    pub buffer: vk::Buffer,
    pub buffer_index: usize,
    pub offset: u64,
    pub size: u64,
    pub mapped: NonNull<u8>,
}

// SAFETY: see `StagingMemory`. Ranges handed out by an arena never overlap.
unsafe impl Send for StagingRange {}
unsafe impl Sync for StagingRange {}

impl StagingRange {
    /// Returns the mapped bytes of this range.
    ///
    /// # Safety
    /// The owning batch must still be recording, and no other live slice of
    /// this range may exist.
    pub unsafe fn as_mut_slice<'a>(&self) -> &'a mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.mapped.as_ptr(), self.size as usize) }
    }

    /// Where a part of a pending load lives.
    pub fn part(&self) -> StagingPart {
        StagingPart {
            buffer_index: self.buffer_index,
            offset: self.offset,
            size: self.size,
        }
    }
}

/// A range of a readback buffer filled by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingPart {
    pub buffer_index: usize,
    pub offset: u64,
    pub size: u64,
}

/// Parameters of a single staging reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingRequest {
    pub required: u64,
    /// Granted sizes are multiples of this. Image rows use the row pitch.
    pub block_align: u64,
    pub offset_align: u64,
    /// Smallest partial reservation the caller accepts.
    pub min_acceptable: u64,
}

impl StagingRequest {
    pub fn new(required: u64, config: &StagingConfig) -> Self {
        Self {
            required,
            block_align: 1,
            offset_align: 1,
            min_acceptable: config.min_acceptable(required),
        }
    }

    pub fn with_block_align(mut self, block_align: u64) -> Self {
        self.block_align = block_align.max(1);
        self.min_acceptable = align_up(self.min_acceptable, self.block_align);
        self
    }

    pub fn with_offset_align(mut self, offset_align: u64) -> Self {
        self.offset_align = offset_align.max(1);
        self
    }
}

/// Arena state captured to undo a group of reservations.
#[derive(Debug, Clone)]
pub(crate) struct ArenaCheckpoint {
    sizes: SmallVec<[u64; 8]>,
}

/// A fixed capacity set of staging buffers used by one batch in one direction.
#[derive(Debug)]
pub struct StagingArena {
    direction: StagingDirection,
    buffers: SmallVec<[StagingBuffer; 8]>,
    max_buffers: usize,
}

impl StagingArena {
    pub fn new(direction: StagingDirection, max_buffers: usize) -> Self {
        Self {
            direction,
            buffers: SmallVec::new(),
            max_buffers,
        }
    }

    #[inline]
    pub fn direction(&self) -> StagingDirection {
        self.direction
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.buffers.len() >= self.max_buffers
    }

    pub fn buffers(&self) -> &[StagingBuffer] {
        &self.buffers
    }

    /// Bytes reserved across all buffers.
    pub fn used_bytes(&self) -> u64 {
        self.buffers.iter().map(StagingBuffer::size).sum()
    }

    /// Finds room for `request`, adding a buffer from `pool` if needed.
    ///
    /// Existing buffers are tried first fit. If none fits, the largest free
    /// span is handed out as a partial reservation as long as it reaches
    /// `min_acceptable`. Only then is a new buffer added. On failure nothing
    /// is reserved.
    pub(crate) fn find_or_add_staging_buffer(
        &mut self,
        pool: &StagingPool,
        config: &StagingConfig,
        request: &StagingRequest,
    ) -> Result<StagingRange, StagingError> {
        debug_assert_eq!(pool.direction(), self.direction);

        let mut first_fit = None;
        let mut largest: Option<(usize, u64)> = None;
        for (index, buffer) in self.buffers.iter().enumerate() {
            let available = buffer.available(request.offset_align, request.block_align);
            if available >= request.required {
                first_fit = Some(index);
                break;
            }

            if available > largest.map_or(0, |(_, size)| size) {
                largest = Some((index, available));
            }
        }

        if let Some(index) = first_fit {
            return Ok(self.reserve(index, request.required, request));
        }

        if let Some((index, available)) = largest {
            if available >= request.min_acceptable {
                log::debug!(
                    "partial {:?} staging reservation: {} of {} bytes",
                    self.direction,
                    available,
                    request.required
                );
                return Ok(self.reserve(index, available, request));
            }
        }

        if self.is_full() {
            log::warn!(
                "{:?} staging arena is full ({} buffers), cannot reserve {} bytes",
                self.direction,
                self.buffers.len(),
                request.required
            );
            return Err(StagingError::Exhausted {
                requested: request.required,
                min_acceptable: request.min_acceptable,
            });
        }

        let capacity = config
            .buffer_capacity(self.buffers.len())
            .max(align_up(request.min_acceptable, request.block_align));
        let memory = pool.acquire(capacity)?;

        let index = self.buffers.len();
        self.buffers.push(StagingBuffer::new(memory));

        let available = self.buffers[index].available(request.offset_align, request.block_align);
        let granted = available.min(request.required);
        if granted < request.min_acceptable {
            // Pool handed out a buffer that cannot serve the request.
            let buffer = self.buffers.pop();
            if let Some(buffer) = buffer {
                pool.recycle(buffer.memory);
            }
            return Err(StagingError::Exhausted {
                requested: request.required,
                min_acceptable: request.min_acceptable,
            });
        }

        Ok(self.reserve(index, granted, request))
    }

    fn reserve(&mut self, index: usize, size: u64, request: &StagingRequest) -> StagingRange {
        let buffer = &mut self.buffers[index];
        let offset = align_up(buffer.size, request.offset_align);
        let consumed = align_up(size, request.block_align);
        buffer.size = (offset + consumed).min(buffer.capacity());

        debug_assert!(offset + size <= buffer.capacity());

        StagingRange {
            buffer: buffer.vk_buffer(),
            buffer_index: index,
            offset,
            size,
            // SAFETY: offset is within the mapped capacity.
            mapped: unsafe { buffer.memory.mapped.add(offset as usize) },
        }
    }

    pub(crate) fn checkpoint(&self) -> ArenaCheckpoint {
        ArenaCheckpoint {
            sizes: self.buffers.iter().map(StagingBuffer::size).collect(),
        }
    }

    /// Undoes every reservation made since `checkpoint`. Buffers added in
    /// the meantime go back to `pool`.
    pub(crate) fn rollback(&mut self, pool: &StagingPool, checkpoint: ArenaCheckpoint) {
        while self.buffers.len() > checkpoint.sizes.len() {
            if let Some(buffer) = self.buffers.pop() {
                pool.recycle(buffer.memory);
            }
        }

        for (buffer, size) in self.buffers.iter_mut().zip(checkpoint.sizes) {
            buffer.size = size;
        }
    }

    /// Copies `data` into a reserved range.
    pub(crate) fn write(&mut self, range: &StagingRange, data: &[u8]) {
        assert!(
            data.len() as u64 <= range.size,
            "staging write of {} bytes into a {} byte range",
            data.len(),
            range.size
        );
        let buffer = &self.buffers[range.buffer_index];
        assert!(range.offset + range.size <= buffer.size, "staging range was rolled back");

        // SAFETY: the range lies inside the reserved part of the mapping and
        // the arena is borrowed mutably, so no slice of it is live.
        unsafe { range.as_mut_slice()[..data.len()].copy_from_slice(data) };
    }

    /// The mapped contents of a pending load.
    ///
    /// Only meaningful once the device finished writing the range.
    pub(crate) fn part_bytes(&self, part: &StagingPart) -> &[u8] {
        let buffer = &self.buffers[part.buffer_index];
        // SAFETY: called after the owning batch's fence was signaled.
        unsafe { buffer.bytes(part.offset, part.size) }
    }

    /// Ranges of non-coherent memory written since the last flush. Marks
    /// them as flushed.
    pub(crate) fn take_flush_ranges(&mut self, atom_size: u64) -> Vec<MappedRange> {
        let mut ranges = Vec::new();
        for buffer in self.buffers.iter_mut() {
            if buffer.flushed >= buffer.size {
                continue;
            }

            if !buffer.is_coherent() {
                ranges.push(mapped_range(buffer, buffer.flushed, buffer.size, atom_size));
            }
            buffer.flushed = buffer.size;
        }
        ranges
    }

    /// Ranges of non-coherent memory the device may have written.
    pub(crate) fn invalidate_ranges(&self, atom_size: u64) -> Vec<MappedRange> {
        self.buffers
            .iter()
            .filter(|buffer| !buffer.is_coherent() && buffer.size > 0)
            .map(|buffer| mapped_range(buffer, 0, buffer.size, atom_size))
            .collect()
    }

    /// Hands every buffer back to `pool` and empties the arena.
    pub(crate) fn release(&mut self, pool: &StagingPool) {
        for buffer in self.buffers.drain(..) {
            pool.recycle(buffer.memory);
        }
    }
}

/// The atoms of `buffer` covering `start..end`.
///
/// A range whose last atom runs past the buffer extends to the end of the
/// memory object instead.
fn mapped_range(buffer: &StagingBuffer, start: u64, end: u64, atom_size: u64) -> MappedRange {
    let base = buffer.memory.memory_offset;
    let start = align_down(base + start, atom_size);
    let end = align_up(base + end, atom_size);

    let size = if end > base + buffer.capacity() {
        vk::WHOLE_SIZE
    } else {
        end - start
    };

    MappedRange {
        memory: buffer.memory.memory,
        offset: start,
        size,
    }
}

/// Device-wide store of staging buffers for one direction.
///
/// Batches take buffers when their arena grows and give them back once
/// they complete.
pub struct StagingPool {
    device: Arc<dyn RenderDevice>,
    direction: StagingDirection,
    max_buffers: usize,
    state: Mutex<StagingPoolState>,
}

#[derive(Default)]
struct StagingPoolState {
    free: Vec<StagingMemory>,
    /// Buffers created and not yet destroyed, free ones included.
    live: usize,
}

impl StagingPool {
    pub fn new(device: Arc<dyn RenderDevice>, direction: StagingDirection, max_buffers: usize) -> Self {
        Self {
            device,
            direction,
            max_buffers,
            state: Mutex::new(StagingPoolState::default()),
        }
    }

    #[inline]
    pub fn direction(&self) -> StagingDirection {
        self.direction
    }

    /// Number of buffers currently held by the pool.
    pub fn free_count(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).free.len()
    }

    pub fn live_count(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).live
    }

    /// Returns a buffer of at least `capacity` bytes.
    ///
    /// The capacity is rounded up to whole non-coherent atoms.
    pub fn acquire(&self, capacity: u64) -> Result<StagingMemory, StagingError> {
        let capacity = align_up(capacity, self.device.limits().non_coherent_atom_size);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(position) = state.free.iter().position(|m| m.capacity >= capacity) {
            return Ok(state.free.swap_remove(position));
        }

        if state.live >= self.max_buffers {
            // Make room by replacing the smallest free buffer.
            let smallest = state
                .free
                .iter()
                .enumerate()
                .min_by_key(|(_, memory)| memory.capacity)
                .map(|(index, _)| index);

            let Some(smallest) = smallest else {
                log::warn!(
                    "{:?} staging pool exhausted ({} buffers in use)",
                    self.direction,
                    state.live
                );
                return Err(StagingError::Exhausted {
                    requested: capacity,
                    min_acceptable: capacity,
                });
            };

            let memory = state.free.swap_remove(smallest);
            self.device.destroy_staging_buffer(memory);
            state.live -= 1;
        }

        let memory = self.device.create_staging_buffer(capacity, self.direction)?;
        state.live += 1;

        log::debug!(
            "created {:?} staging buffer of {} bytes ({} live)",
            self.direction,
            memory.capacity,
            state.live
        );

        Ok(memory)
    }

    pub fn recycle(&self, memory: StagingMemory) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.free.push(memory);
    }

    /// Destroys every free buffer.
    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.free.len() != state.live {
            log::error!(
                "{:?} staging pool shut down with {} buffers still in use",
                self.direction,
                state.live - state.free.len()
            );
        }

        for memory in state.free.drain(..) {
            self.device.destroy_staging_buffer(memory);
        }
        state.live = 0;
    }
}

/// The upload and readback staging pools.
pub struct StagingPools {
    pub upload: StagingPool,
    pub readback: StagingPool,
}

impl StagingPools {
    pub fn new(device: &Arc<dyn RenderDevice>, config: &StagingConfig) -> Self {
        Self {
            upload: StagingPool::new(device.clone(), StagingDirection::Upload, config.max_buffers),
            readback: StagingPool::new(
                device.clone(),
                StagingDirection::Readback,
                config.max_buffers,
            ),
        }
    }

    pub fn get(&self, direction: StagingDirection) -> &StagingPool {
        match direction {
            StagingDirection::Upload => &self.upload,
            StagingDirection::Readback => &self.readback,
        }
    }

    pub fn shutdown(&self) {
        self.upload.shutdown();
        self.readback.shutdown();
    }
}

/// Read-back buffer contents, possibly split over several staging buffers.
#[derive(Debug, Clone)]
pub struct BufferMemView<'a> {
    parts: SmallVec<[&'a [u8]; 2]>,
}

impl<'a> BufferMemView<'a> {
    pub fn new(parts: impl IntoIterator<Item = &'a [u8]>) -> Self {
        Self {
            parts: parts.into_iter().collect(),
        }
    }

    pub fn parts(&self) -> &[&'a [u8]] {
        &self.parts
    }

    pub fn len(&self) -> usize {
        self.parts.iter().map(|part| part.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies as many bytes as fit into `out`, returning the count.
    pub fn copy_to(&self, out: &mut [u8]) -> usize {
        let mut written = 0;
        for part in &self.parts {
            let count = part.len().min(out.len() - written);
            out[written..written + count].copy_from_slice(&part[..count]);
            written += count;
            if written == out.len() {
                break;
            }
        }
        written
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        for part in &self.parts {
            out.extend_from_slice(part);
        }
        out
    }
}

/// Read-back image contents, row by row.
///
/// Rows are tightly packed to `row_pitch` and never split between parts.
#[derive(Debug, Clone)]
pub struct ImageMemView<'a> {
    parts: SmallVec<[&'a [u8]; 2]>,
    extent: [u32; 3],
    bytes_per_texel: u32,
    row_pitch: u64,
}

impl<'a> ImageMemView<'a> {
    pub fn new(
        parts: impl IntoIterator<Item = &'a [u8]>,
        extent: [u32; 3],
        bytes_per_texel: u32,
        row_pitch: u64,
    ) -> Self {
        Self {
            parts: parts.into_iter().collect(),
            extent,
            bytes_per_texel,
            row_pitch,
        }
    }

    #[inline]
    pub fn extent(&self) -> [u32; 3] {
        self.extent
    }

    #[inline]
    pub fn bytes_per_texel(&self) -> u32 {
        self.bytes_per_texel
    }

    #[inline]
    pub fn row_pitch(&self) -> u64 {
        self.row_pitch
    }

    #[inline]
    pub fn slice_pitch(&self) -> u64 {
        self.row_pitch * self.extent[1] as u64
    }

    /// Texel bytes of row `y` in slice `z`, without the row padding.
    pub fn row(&self, y: u32, z: u32) -> Option<&'a [u8]> {
        if y >= self.extent[1] || z >= self.extent[2] {
            return None;
        }

        let row_size = self.extent[0] as usize * self.bytes_per_texel as usize;
        let pitch = self.row_pitch as usize;
        let mut row = z as usize * self.extent[1] as usize + y as usize;

        for part in &self.parts {
            let rows = part.len() / pitch;
            if row < rows {
                let start = row * pitch;
                return Some(&part[start..start + row_size]);
            }
            row -= rows;
        }

        None
    }

    /// Gathers all rows without padding.
    pub fn to_vec(&self) -> Vec<u8> {
        let row_size = self.extent[0] as usize * self.bytes_per_texel as usize;
        let mut out = Vec::with_capacity(row_size * (self.extent[1] * self.extent[2]) as usize);
        for z in 0..self.extent[2] {
            for y in 0..self.extent[1] {
                if let Some(row) = self.row(y, z) {
                    out.extend_from_slice(row);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;
    use vislum_render_rhi::DeviceLimits;

    use super::*;
    use crate::testing::MockDevice;

    fn config(block_size: u64, max_buffers_per_batch: usize) -> StagingConfig {
        StagingConfig {
            block_size,
            max_buffers_per_batch,
            ..Default::default()
        }
    }

    fn pool(device: &Arc<MockDevice>, max_buffers: usize) -> StagingPool {
        StagingPool::new(device.clone(), StagingDirection::Upload, max_buffers)
    }

    #[test]
    fn test_first_fit_reuses_buffer() {
        let device = MockDevice::new();
        let pool = pool(&device, 8);
        let config = config(1024, 4);
        let mut arena = StagingArena::new(StagingDirection::Upload, 4);

        let a = arena
            .find_or_add_staging_buffer(&pool, &config, &StagingRequest::new(100, &config))
            .unwrap();
        let b = arena
            .find_or_add_staging_buffer(
                &pool,
                &config,
                &StagingRequest::new(100, &config).with_offset_align(64),
            )
            .unwrap();

        assert_eq!(arena.len(), 1);
        assert_eq!((a.offset, a.size), (0, 100));
        assert_eq!((b.offset, b.size), (128, 100));
        assert_eq!(arena.buffers()[0].size(), 228);
    }

    #[test]
    fn test_reservations_never_overlap() {
        let device = MockDevice::new();
        let pool = pool(&device, 8);
        let config = config(256, 8);
        let mut arena = StagingArena::new(StagingDirection::Upload, 8);

        let mut granted: Vec<StagingRange> = Vec::new();
        for size in [13u64, 200, 64, 7, 90, 300, 1, 255] {
            let request = StagingRequest::new(size, &config).with_offset_align(4);
            let Ok(range) = arena.find_or_add_staging_buffer(&pool, &config, &request) else {
                break;
            };

            for other in granted.iter().filter(|o| o.buffer == range.buffer) {
                let disjoint = range.offset + range.size <= other.offset
                    || other.offset + other.size <= range.offset;
                assert!(disjoint, "{range:?} overlaps {other:?}");
            }
            assert!(range.offset + range.size <= arena.buffers()[range.buffer_index].capacity());
            granted.push(range);
        }

        assert!(granted.len() >= 6);
    }

    #[test]
    fn test_partial_reservation_from_largest_span() {
        let device = MockDevice::new();
        let pool = pool(&device, 8);
        let config = config(1024, 1);
        let mut arena = StagingArena::new(StagingDirection::Upload, 1);

        arena
            .find_or_add_staging_buffer(&pool, &config, &StagingRequest::new(512, &config))
            .unwrap();

        let range = arena
            .find_or_add_staging_buffer(&pool, &config, &StagingRequest::new(2000, &config))
            .unwrap();

        assert_eq!(range.offset, 512);
        assert_eq!(range.size, 512);
        assert_eq!(arena.buffers()[0].size(), 1024);
    }

    #[test]
    fn test_partial_reservation_respects_block_align() {
        let device = MockDevice::with_limits(DeviceLimits {
            non_coherent_atom_size: 8,
            ..Default::default()
        });
        let pool = pool(&device, 8);
        let config = config(1000, 1);
        let mut arena = StagingArena::new(StagingDirection::Upload, 1);

        let range = arena
            .find_or_add_staging_buffer(
                &pool,
                &config,
                &StagingRequest::new(2048, &config).with_block_align(64),
            )
            .unwrap();

        assert_eq!(range.size, 960);
    }

    #[test]
    fn test_new_buffers_grow_geometrically() {
        let device = MockDevice::new();
        let pool = pool(&device, 8);
        let config = config(1024, 4);
        let mut arena = StagingArena::new(StagingDirection::Upload, 4);

        for _ in 0..3 {
            let request = StagingRequest::new(1024, &config).with_block_align(1024);
            arena.find_or_add_staging_buffer(&pool, &config, &request).unwrap();
        }

        let capacities: Vec<u64> = arena.buffers().iter().map(StagingBuffer::capacity).collect();
        assert_eq!(capacities, [1024, 1024, 2048]);
    }

    #[test]
    fn test_exhausted_when_arena_full_and_span_too_small() {
        let device = MockDevice::new();
        let pool = pool(&device, 8);
        let config = config(1024, 1);
        let mut arena = StagingArena::new(StagingDirection::Upload, 1);

        arena
            .find_or_add_staging_buffer(&pool, &config, &StagingRequest::new(1000, &config))
            .unwrap();

        let result =
            arena.find_or_add_staging_buffer(&pool, &config, &StagingRequest::new(1000, &config));

        assert!(matches!(
            result,
            Err(StagingError::Exhausted {
                requested: 1000,
                min_acceptable: 250
            })
        ));
        assert_eq!(arena.len(), 1);
        assert_eq!(arena.buffers()[0].size(), 1000);
        assert_eq!(device.staging_buffers_created(), 1);
    }

    #[test]
    fn test_rollback_restores_offsets_and_returns_buffers() {
        let device = MockDevice::new();
        let pool = pool(&device, 8);
        let config = config(256, 4);
        let mut arena = StagingArena::new(StagingDirection::Upload, 4);

        arena
            .find_or_add_staging_buffer(&pool, &config, &StagingRequest::new(100, &config))
            .unwrap();
        let checkpoint = arena.checkpoint();

        arena
            .find_or_add_staging_buffer(&pool, &config, &StagingRequest::new(150, &config))
            .unwrap();
        arena
            .find_or_add_staging_buffer(&pool, &config, &StagingRequest::new(300, &config))
            .unwrap();
        assert_eq!(arena.len(), 2);

        arena.rollback(&pool, checkpoint);

        assert_eq!(arena.len(), 1);
        assert_eq!(arena.buffers()[0].size(), 100);
        assert_eq!(pool.free_count(), 1);
    }

    #[test]
    fn test_flush_ranges_cover_new_writes_only() {
        let device = MockDevice::new();
        device.set_coherent(false);
        let pool = pool(&device, 8);
        let config = config(1024, 4);
        let mut arena = StagingArena::new(StagingDirection::Upload, 4);

        arena
            .find_or_add_staging_buffer(&pool, &config, &StagingRequest::new(100, &config))
            .unwrap();
        let first = arena.take_flush_ranges(64);
        assert_eq!(first.len(), 1);
        assert_eq!((first[0].offset, first[0].size), (0, 128));

        assert!(arena.take_flush_ranges(64).is_empty());

        arena
            .find_or_add_staging_buffer(&pool, &config, &StagingRequest::new(100, &config))
            .unwrap();
        let second = arena.take_flush_ranges(64);
        assert_eq!((second[0].offset, second[0].size), (64, 192));
    }

    #[test]
    fn test_flush_ranges_stay_atom_aligned_for_odd_block_sizes() {
        let device = MockDevice::new();
        device.set_coherent(false);
        let pool = pool(&device, 8);
        let config = config(1000, 4);
        let mut arena = StagingArena::new(StagingDirection::Upload, 4);

        arena
            .find_or_add_staging_buffer(&pool, &config, &StagingRequest::new(1000, &config))
            .unwrap();
        assert_eq!(arena.buffers()[0].capacity(), 1024);

        let ranges = arena.take_flush_ranges(64);
        assert_eq!((ranges[0].offset, ranges[0].size), (0, 1024));
        assert_eq!(arena.invalidate_ranges(64)[0].size, 1024);
    }

    #[test]
    fn test_mapped_range_covers_whole_atoms() {
        let memory = StagingMemory {
            buffer: vk::Buffer::from_raw(1),
            memory: vk::DeviceMemory::from_raw(2),
            memory_offset: 128,
            capacity: 1000,
            mapped: NonNull::dangling(),
            coherent: false,
        };
        let buffer = StagingBuffer::new(memory);

        let inner = mapped_range(&buffer, 10, 100, 64);
        assert_eq!((inner.offset, inner.size), (128, 128));

        // The last atom would pass the end of the buffer.
        let tail = mapped_range(&buffer, 900, 1000, 64);
        assert_eq!((tail.offset, tail.size), (1024, vk::WHOLE_SIZE));
    }

    #[test]
    fn test_coherent_memory_needs_no_flush() {
        let device = MockDevice::new();
        let pool = pool(&device, 8);
        let config = config(1024, 4);
        let mut arena = StagingArena::new(StagingDirection::Upload, 4);

        arena
            .find_or_add_staging_buffer(&pool, &config, &StagingRequest::new(100, &config))
            .unwrap();

        assert!(arena.take_flush_ranges(64).is_empty());
        assert!(arena.invalidate_ranges(64).is_empty());
    }

    #[test]
    fn test_pool_reuses_and_caps_buffers() {
        let device = MockDevice::new();
        let pool = pool(&device, 2);

        let a = pool.acquire(512).unwrap();
        let b = pool.acquire(512).unwrap();
        assert!(matches!(pool.acquire(512), Err(StagingError::Exhausted { .. })));

        pool.recycle(a);
        let c = pool.acquire(256).unwrap();
        assert_eq!(c.capacity, 512);
        assert_eq!(device.staging_buffers_created(), 2);

        // A bigger request replaces a free buffer.
        pool.recycle(c);
        let d = pool.acquire(4096).unwrap();
        assert_eq!(d.capacity, 4096);
        assert_eq!(pool.live_count(), 2);

        pool.recycle(b);
        pool.recycle(d);
        pool.shutdown();
        assert_eq!(device.live_staging_buffers(), 0);
    }

    #[test]
    fn test_image_view_rows() {
        let row_pitch = 8u64;
        let first: Vec<u8> = (0..16).collect();
        let second: Vec<u8> = (16..24).collect();
        let view = ImageMemView::new([&first[..], &second[..]], [3, 3, 1], 2, row_pitch);

        assert_eq!(view.row(0, 0), Some(&[0u8, 1, 2, 3, 4, 5][..]));
        assert_eq!(view.row(2, 0), Some(&[16u8, 17, 18, 19, 20, 21][..]));
        assert_eq!(view.row(3, 0), None);
        assert_eq!(view.to_vec().len(), 18);
        assert_eq!(view.slice_pitch(), 24);
    }

    #[test]
    fn test_buffer_view_copy() {
        let view = BufferMemView::new([&[1u8, 2][..], &[3u8, 4, 5][..]]);
        assert_eq!(view.len(), 5);
        assert_eq!(view.to_vec(), [1, 2, 3, 4, 5]);

        let mut out = [0u8; 3];
        assert_eq!(view.copy_to(&mut out), 3);
        assert_eq!(out, [1, 2, 3]);
    }
}
