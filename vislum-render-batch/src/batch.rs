use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ash::vk;
use smallvec::SmallVec;
use vislum_render_rhi::{
    MappedRange, PipelineStage, QueueType, RawObject, RenderDevice, RhiError, StagingDirection,
    SubmitInfo,
};

use crate::{
    config::BatchConfig,
    debug::{BatchDebugger, DebugCallback, DebugFlags},
    error::{BatchError, StagingError},
    pool::BatchId,
    resource::{ReleaseMap, ResourceManager},
    staging::{
        BufferMemView, ImageMemView, StagingArena, StagingPart, StagingPools, StagingRange,
        StagingRequest,
    },
    state::BatchState,
    stats::BatchStats,
    submission::SubmissionId,
};

pub type BufferLoadFn = Box<dyn FnOnce(&BufferMemView<'_>) + Send + Sync>;
pub type ImageLoadFn = Box<dyn FnOnce(&ImageMemView<'_>) + Send + Sync>;

/// Device, collaborators and pools shared by every batch.
pub(crate) struct BatchShared {
    pub device: Arc<dyn RenderDevice>,
    pub resources: Arc<dyn ResourceManager>,
    pub staging: StagingPools,
    pub config: BatchConfig,
}

impl BatchShared {
    pub fn new(
        device: Arc<dyn RenderDevice>,
        resources: Arc<dyn ResourceManager>,
        config: BatchConfig,
    ) -> Self {
        Self {
            staging: StagingPools::new(&device, &config.staging),
            device,
            resources,
            config,
        }
    }
}

/// Debug description given when recording begins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchDesc {
    pub name: String,
    pub debug: DebugFlags,
}

impl BatchDesc {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            debug: DebugFlags::empty(),
        }
    }

    pub fn with_debug(mut self, debug: DebugFlags) -> Self {
        self.debug = debug;
        self
    }
}

/// A swapchain image to present once the batch has been submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentRequest {
    pub swapchain: vk::SwapchainKHR,
    pub image_index: u32,
}

/// How image rows are laid out in readback memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageReadLayout {
    pub extent: [u32; 3],
    pub bytes_per_texel: u32,
    pub row_pitch: u64,
}

enum LoadCallback {
    Buffer {
        parts: SmallVec<[StagingPart; 2]>,
        callback: BufferLoadFn,
    },
    Image {
        parts: SmallVec<[StagingPart; 2]>,
        layout: ImageReadLayout,
        callback: ImageLoadFn,
    },
}

struct BatchData {
    state: BatchState,
    queue: QueueType,
    submit_immediately: bool,
    dependencies: SmallVec<[BatchId; 4]>,

    commands: SmallVec<[(vk::CommandBuffer, vk::CommandPool); 8]>,
    signal_semaphores: SmallVec<[vk::Semaphore; 4]>,
    wait_semaphores: SmallVec<[(vk::Semaphore, PipelineStage); 4]>,

    upload: StagingArena,
    readback: StagingArena,
    load_callbacks: Vec<LoadCallback>,

    resources_to_release: ReleaseMap,
    ready_to_delete: Vec<RawObject>,

    presents: Vec<PresentRequest>,
    submission: Option<SubmissionId>,

    debug_name: String,
    debug_flags: DebugFlags,
}

impl BatchData {
    fn new(config: &BatchConfig) -> Self {
        let arena_capacity = config.staging.max_buffers_per_batch;

        Self {
            state: BatchState::Uninitialized,
            queue: QueueType::Graphics,
            submit_immediately: false,
            dependencies: SmallVec::new(),
            commands: SmallVec::new(),
            signal_semaphores: SmallVec::new(),
            wait_semaphores: SmallVec::new(),
            upload: StagingArena::new(StagingDirection::Upload, arena_capacity),
            readback: StagingArena::new(StagingDirection::Readback, arena_capacity),
            load_callbacks: Vec::new(),
            resources_to_release: ReleaseMap::new(),
            ready_to_delete: Vec::new(),
            presents: Vec::new(),
            submission: None,
            debug_name: String::new(),
            debug_flags: DebugFlags::empty(),
        }
    }

    fn is_empty(&self) -> bool {
        self.commands.is_empty()
            && self.signal_semaphores.is_empty()
            && self.wait_semaphores.is_empty()
            && self.upload.is_empty()
            && self.readback.is_empty()
            && self.load_callbacks.is_empty()
            && self.resources_to_release.is_empty()
            && self.ready_to_delete.is_empty()
            && self.presents.is_empty()
            && self.submission.is_none()
    }

    fn assert_state(&self, expected: BatchState, operation: &str) {
        assert!(
            self.state == expected,
            "{operation} requires a {expected:?} batch, found {:?}",
            self.state
        );
    }

    fn assert_state_in(&self, from: BatchState, to: BatchState, operation: &str) {
        assert!(
            (from..=to).contains(&self.state),
            "{operation} is not allowed on a {:?} batch",
            self.state
        );
    }
}

/// Staging access handed out by [`CommandBatch::stage`].
///
/// Everything reserved through it is rolled back if the closure fails.
pub struct BatchStaging<'a> {
    shared: &'a BatchShared,
    upload: &'a mut StagingArena,
    readback: &'a mut StagingArena,
    load_callbacks: &'a mut Vec<LoadCallback>,
    callbacks_len: usize,
}

impl BatchStaging<'_> {
    fn offset_align(&self) -> u64 {
        self.shared
            .device
            .limits()
            .optimal_buffer_copy_offset_alignment
    }

    /// Reserves a single, possibly partial, range of upload memory.
    pub fn reserve_upload(&mut self, request: &StagingRequest) -> Result<StagingRange, StagingError> {
        let request = request.with_offset_align(request.offset_align.max(self.offset_align()));
        self.upload.find_or_add_staging_buffer(
            &self.shared.staging.upload,
            &self.shared.config.staging,
            &request,
        )
    }

    /// Reserves a single, possibly partial, range of readback memory.
    pub fn reserve_readback(
        &mut self,
        request: &StagingRequest,
    ) -> Result<StagingRange, StagingError> {
        let request = request.with_offset_align(request.offset_align.max(self.offset_align()));
        self.readback.find_or_add_staging_buffer(
            &self.shared.staging.readback,
            &self.shared.config.staging,
            &request,
        )
    }

    /// Copies `data` into upload memory, split over as many ranges as needed.
    pub fn write_all(
        &mut self,
        data: &[u8],
        block_align: u64,
    ) -> Result<SmallVec<[StagingRange; 2]>, StagingError> {
        let mut ranges = SmallVec::new();
        let mut written = 0usize;

        while written < data.len() {
            let remaining = (data.len() - written) as u64;
            let request = StagingRequest::new(remaining, &self.shared.config.staging)
                .with_block_align(block_align);
            let range = self.reserve_upload(&request)?;

            let end = written + range.size as usize;
            self.upload.write(&range, &data[written..end]);
            written = end;
            ranges.push(range);
        }

        Ok(ranges)
    }

    /// Reserves `size` bytes of readback memory, split as needed.
    pub fn read_all(
        &mut self,
        size: u64,
        block_align: u64,
    ) -> Result<SmallVec<[StagingRange; 2]>, StagingError> {
        let mut ranges = SmallVec::new();
        let mut reserved = 0;

        while reserved < size {
            let request = StagingRequest::new(size - reserved, &self.shared.config.staging)
                .with_block_align(block_align);
            let range = self.reserve_readback(&request)?;
            reserved += range.size;
            ranges.push(range);
        }

        Ok(ranges)
    }

    pub fn on_buffer_loaded(&mut self, ranges: &[StagingRange], callback: BufferLoadFn) {
        self.load_callbacks.push(LoadCallback::Buffer {
            parts: ranges.iter().map(StagingRange::part).collect(),
            callback,
        });
    }

    pub fn on_image_loaded(
        &mut self,
        ranges: &[StagingRange],
        layout: ImageReadLayout,
        callback: ImageLoadFn,
    ) {
        self.load_callbacks.push(LoadCallback::Image {
            parts: ranges.iter().map(StagingRange::part).collect(),
            layout,
            callback,
        });
    }
}

/// The unit of submission.
///
/// Every mutator takes the batch's lock exclusively, so producers on
/// several threads may record into the same batch.
pub struct CommandBatch {
    index: u32,
    shared: Arc<BatchShared>,
    data: RwLock<BatchData>,
}

impl CommandBatch {
    pub(crate) fn new(index: u32, shared: Arc<BatchShared>) -> Self {
        let data = RwLock::new(BatchData::new(&shared.config));
        Self {
            index,
            shared,
            data,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BatchData> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BatchData> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Index of the batch in its pool. Stable for the pool's lifetime.
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn state(&self) -> BatchState {
        self.read().state
    }

    pub fn queue(&self) -> QueueType {
        self.read().queue
    }

    /// Whether the batch's queue family takes graphics or compute work.
    pub fn submit_immediately(&self) -> bool {
        self.read().submit_immediately
    }

    pub fn dependencies(&self) -> SmallVec<[BatchId; 4]> {
        self.read().dependencies.clone()
    }

    pub fn submission(&self) -> Option<SubmissionId> {
        self.read().submission
    }

    pub fn debug_name(&self) -> String {
        self.read().debug_name.clone()
    }

    pub fn command_buffers(&self) -> SmallVec<[vk::CommandBuffer; 8]> {
        self.read().commands.iter().map(|(cmd, _)| *cmd).collect()
    }

    /// Whether the batch holds no payload, staging or deferred work.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn has_presents(&self) -> bool {
        !self.read().presents.is_empty()
    }

    pub fn upload_bytes(&self) -> u64 {
        self.read().upload.used_bytes()
    }

    pub fn readback_bytes(&self) -> u64 {
        self.read().readback.used_bytes()
    }

    /// Prepares an uninitialized batch for recording on `queue`.
    ///
    /// # Panics
    /// If the batch is not `Uninitialized` or still holds any payload.
    pub fn construct(&self, queue: QueueType, depends_on: &[BatchId]) -> Result<(), BatchError> {
        let mut data = self.write();
        data.assert_state(BatchState::Uninitialized, "construct");
        assert!(data.is_empty(), "batch payload must be empty");

        let Some(info) = self.shared.device.queue(queue) else {
            return Err(BatchError::NoQueue(queue));
        };

        let max_dependencies = self.shared.config.max_dependencies;
        if depends_on.len() > max_dependencies {
            return Err(BatchError::DependencyCapacity(max_dependencies));
        }

        data.queue = queue;
        data.submit_immediately = info.supports_immediate_submit();
        data.dependencies.clear();
        data.dependencies.extend_from_slice(depends_on);
        data.state.advance(BatchState::Initial);

        log::debug!(
            "batch {} constructed for {:?} with {} dependencies",
            self.index,
            queue,
            depends_on.len()
        );
        Ok(())
    }

    pub fn on_begin(&self, desc: &BatchDesc, debugger: &dyn BatchDebugger) {
        let mut data = self.write();
        data.state.advance(BatchState::Recording);
        data.debug_name.clone_from(&desc.name);
        data.debug_flags = desc.debug;

        debugger.on_begin(self.index, desc.debug);
    }

    /// Runs before a native command buffer of this batch is recorded.
    pub fn on_before_recording(&self, debugger: &dyn BatchDebugger, command_buffer: vk::CommandBuffer) {
        self.read()
            .assert_state(BatchState::Recording, "on_before_recording");
        debugger.on_before_recording(self.index, command_buffer);
    }

    /// Runs after a native command buffer of this batch is recorded.
    pub fn on_after_recording(&self, debugger: &dyn BatchDebugger, command_buffer: vk::CommandBuffer) {
        self.read()
            .assert_state(BatchState::Recording, "on_after_recording");
        debugger.on_after_recording(self.index, command_buffer);
    }

    fn push_command(&self, command_buffer: vk::CommandBuffer, pool: vk::CommandPool, front: bool) {
        let mut data = self.write();
        data.assert_state(BatchState::Recording, "push_command");
        assert!(
            !data.commands.iter().any(|(cmd, _)| *cmd == command_buffer),
            "command buffer already added"
        );

        if front {
            data.commands.insert(0, (command_buffer, pool));
        } else {
            data.commands.push((command_buffer, pool));
        }
    }

    pub fn push_command_to_front(&self, command_buffer: vk::CommandBuffer, pool: vk::CommandPool) {
        self.push_command(command_buffer, pool, true);
    }

    pub fn push_command_to_back(&self, command_buffer: vk::CommandBuffer, pool: vk::CommandPool) {
        self.push_command(command_buffer, pool, false);
    }

    pub fn signal_semaphore(&self, semaphore: vk::Semaphore) {
        let mut data = self.write();
        data.assert_state_in(BatchState::Recording, BatchState::Ready, "signal_semaphore");
        assert!(
            !data.signal_semaphores.contains(&semaphore),
            "semaphore already added"
        );
        data.signal_semaphores.push(semaphore);
    }

    pub fn wait_semaphore(&self, semaphore: vk::Semaphore, stage: PipelineStage) {
        let mut data = self.write();
        data.assert_state_in(BatchState::Recording, BatchState::Ready, "wait_semaphore");
        assert!(
            !data.wait_semaphores.iter().any(|(s, _)| *s == semaphore),
            "semaphore already added"
        );
        data.wait_semaphores.push((semaphore, stage));
    }

    /// Adds a batch that must be ready before this one. Duplicates are
    /// ignored.
    pub fn depends_on(&self, batch: BatchId) -> Result<(), BatchError> {
        let mut data = self.write();
        data.assert_state_in(BatchState::Initial, BatchState::Baked, "depends_on");

        if data.dependencies.contains(&batch) {
            return Ok(());
        }

        let max_dependencies = self.shared.config.max_dependencies;
        if data.dependencies.len() >= max_dependencies {
            log::warn!("batch {} cannot take more than {max_dependencies} dependencies", self.index);
            return Err(BatchError::DependencyCapacity(max_dependencies));
        }

        data.dependencies.push(batch);
        Ok(())
    }

    /// Destroys `object` once the batch has completed.
    pub fn destroy_postponed(&self, object: RawObject) {
        let mut data = self.write();
        data.assert_state_in(BatchState::Recording, BatchState::Submitted, "destroy_postponed");
        assert!(
            !data.ready_to_delete.contains(&object),
            "object already queued for destruction"
        );
        data.ready_to_delete.push(object);
    }

    /// Queues a present of `image_index` handed over at submission.
    pub fn present(&self, swapchain: vk::SwapchainKHR, image_index: u32) {
        let mut data = self.write();
        data.assert_state_in(BatchState::Recording, BatchState::Ready, "present");
        data.presents.push(PresentRequest {
            swapchain,
            image_index,
        });
    }

    /// Runs `f` with exclusive access to the batch's staging memory.
    ///
    /// If `f` fails, every reservation and load callback it made is undone.
    pub fn stage<R, E>(&self, f: impl FnOnce(&mut BatchStaging<'_>) -> Result<R, E>) -> Result<R, E> {
        let mut guard = self.write();
        guard.assert_state(BatchState::Recording, "staging");

        let data = &mut *guard;
        let upload_checkpoint = data.upload.checkpoint();
        let readback_checkpoint = data.readback.checkpoint();

        let mut staging = BatchStaging {
            shared: &self.shared,
            callbacks_len: data.load_callbacks.len(),
            upload: &mut data.upload,
            readback: &mut data.readback,
            load_callbacks: &mut data.load_callbacks,
        };

        let result = f(&mut staging);
        if result.is_err() {
            let callbacks_len = staging.callbacks_len;
            staging.load_callbacks.truncate(callbacks_len);
            staging
                .upload
                .rollback(&self.shared.staging.upload, upload_checkpoint);
            staging
                .readback
                .rollback(&self.shared.staging.readback, readback_checkpoint);
        }

        result
    }

    /// Reserves upload memory and returns its mapped range. The range may be
    /// smaller than requested.
    pub fn stage_write(&self, request: &StagingRequest) -> Result<StagingRange, StagingError> {
        self.stage(|staging| staging.reserve_upload(request))
    }

    /// Copies `data` into upload memory.
    pub fn stage_write_all(&self, data: &[u8]) -> Result<SmallVec<[StagingRange; 2]>, StagingError> {
        self.stage(|staging| staging.write_all(data, 1))
    }

    /// Reserves readback memory for the device to copy into. The range may
    /// be smaller than requested.
    pub fn add_pending_load(&self, request: &StagingRequest) -> Result<StagingRange, StagingError> {
        self.stage(|staging| staging.reserve_readback(request))
    }

    /// Reserves `size` bytes of readback memory over as many ranges as needed.
    pub fn add_pending_load_all(
        &self,
        size: u64,
        block_align: u64,
    ) -> Result<SmallVec<[StagingRange; 2]>, StagingError> {
        self.stage(|staging| staging.read_all(size, block_align))
    }

    /// Calls `callback` with the contents of `ranges` once the batch completes.
    pub fn add_buffer_load_callback(
        &self,
        ranges: &[StagingRange],
        callback: impl FnOnce(&BufferMemView<'_>) + Send + Sync + 'static,
    ) {
        let _: Result<(), StagingError> = self.stage(|staging| {
            staging.on_buffer_loaded(ranges, Box::new(callback));
            Ok(())
        });
    }

    /// Calls `callback` with the image rows stored in `ranges` once the
    /// batch completes.
    pub fn add_image_load_callback(
        &self,
        ranges: &[StagingRange],
        layout: ImageReadLayout,
        callback: impl FnOnce(&ImageMemView<'_>) + Send + Sync + 'static,
    ) {
        let _: Result<(), StagingError> = self.stage(|staging| {
            staging.on_image_loaded(ranges, layout, Box::new(callback));
            Ok(())
        });
    }

    /// Finishes recording, taking over the references the recorder holds.
    ///
    /// # Panics
    /// If the batch was already baked with resources.
    pub fn on_baked(&self, resources: ReleaseMap) {
        let mut data = self.write();
        data.state.advance(BatchState::Baked);
        assert!(
            data.resources_to_release.is_empty(),
            "batch resources were already baked"
        );
        data.resources_to_release = resources;
    }

    pub fn on_ready_to_submit(&self) {
        self.write().state.advance(BatchState::Ready);
    }

    /// Appends the batch's command buffers and semaphores to `info`, and
    /// flushes upload memory written since the last flush.
    pub fn on_before_submit(&self, info: &mut SubmitInfo) -> Result<(), RhiError> {
        let ranges = {
            let mut data = self.write();
            data.assert_state(BatchState::Ready, "on_before_submit");

            info.command_buffers
                .extend(data.commands.iter().map(|(cmd, _)| *cmd));
            info.signal_semaphores
                .extend_from_slice(&data.signal_semaphores);
            info.wait_semaphores.extend_from_slice(&data.wait_semaphores);

            let atom_size = self.shared.device.limits().non_coherent_atom_size;
            data.upload.take_flush_ranges(atom_size)
        };

        for_each_chunk(&ranges, self.max_ranges_per_call(), |chunk| {
            self.shared.device.flush_mapped_ranges(chunk)
        })
    }

    /// Marks the batch as submitted under `submission` and hands pending
    /// presents to the caller.
    pub fn on_after_submit(&self, presents: &mut Vec<PresentRequest>, submission: SubmissionId) {
        let mut data = self.write();
        assert!(
            data.submission.is_none(),
            "batch already attached to a submission"
        );
        data.state.advance(BatchState::Submitted);

        presents.append(&mut data.presents);
        data.dependencies.clear();
        data.submission = Some(submission);
    }

    /// Runs the completion work of a submitted batch.
    ///
    /// Command buffers go back to their pools, debug output is forwarded to
    /// `callback`, readback callbacks fire, staging memory is recycled,
    /// deferred resources are released and postponed objects destroyed.
    /// The batch is always left empty. Device failures are returned after
    /// all cleanup ran.
    pub fn on_complete(
        &self,
        stats: &mut BatchStats,
        debugger: &dyn BatchDebugger,
        callback: &mut DebugCallback<'_>,
    ) -> Result<(), RhiError> {
        let empty = BatchData::new(&self.shared.config);
        let mut payload = {
            let mut data = self.write();
            data.state.advance(BatchState::Complete);

            let mut payload = std::mem::replace(&mut *data, empty);
            data.state = payload.state;
            data.queue = payload.queue;
            data.submit_immediately = payload.submit_immediately;
            data.debug_name = std::mem::take(&mut payload.debug_name);
            data.debug_flags = payload.debug_flags;
            payload
        };

        let device = &self.shared.device;
        stats.batches_completed += 1;

        for (command_buffer, pool) in payload.commands.drain(..) {
            device.release_command_buffer(pool, command_buffer);
            stats.command_buffers += 1;
        }

        if !payload.debug_flags.is_empty() {
            let name = self.debug_name();
            debugger.on_complete(self.index, &name, callback);
        }

        let result = self.complete_loads(&mut payload, stats);

        stats.uploaded_bytes += payload.upload.used_bytes();
        payload.upload.release(&self.shared.staging.upload);
        payload.readback.release(&self.shared.staging.readback);

        for (id, count) in payload.resources_to_release.drain() {
            self.shared.resources.release(id, count);
            stats.released_resources += count as u64;
        }

        if !payload.ready_to_delete.is_empty() {
            log::trace!(
                "batch {} destroying {} postponed objects",
                self.index,
                payload.ready_to_delete.len()
            );
        }
        for object in payload.ready_to_delete.drain(..) {
            device.destroy_object(object);
            stats.destroyed_objects += 1;
        }

        result
    }

    fn complete_loads(&self, payload: &mut BatchData, stats: &mut BatchStats) -> Result<(), RhiError> {
        stats.readback_bytes += payload.readback.used_bytes();
        let callbacks = std::mem::take(&mut payload.load_callbacks);
        if callbacks.is_empty() {
            return Ok(());
        }

        let atom_size = self.shared.device.limits().non_coherent_atom_size;
        let ranges = payload.readback.invalidate_ranges(atom_size);
        if let Err(e) = for_each_chunk(&ranges, self.max_ranges_per_call(), |chunk| {
            self.shared.device.invalidate_mapped_ranges(chunk)
        }) {
            log::error!(
                "batch {} dropped {} load callbacks: {e}",
                self.index,
                callbacks.len()
            );
            return Err(e);
        }

        let readback = &payload.readback;
        for load in callbacks {
            match load {
                LoadCallback::Buffer { parts, callback } => {
                    let view = BufferMemView::new(parts.iter().map(|p| readback.part_bytes(p)));
                    callback(&view);
                }
                LoadCallback::Image {
                    parts,
                    layout,
                    callback,
                } => {
                    let view = ImageMemView::new(
                        parts.iter().map(|p| readback.part_bytes(p)),
                        layout.extent,
                        layout.bytes_per_texel,
                        layout.row_pitch,
                    );
                    callback(&view);
                }
            }
            stats.load_callbacks += 1;
        }

        Ok(())
    }

    /// Returns a completed batch to the uninitialized state.
    pub(crate) fn teardown(&self) {
        let mut data = self.write();
        data.assert_state(BatchState::Complete, "teardown");
        assert!(data.is_empty(), "completed batch still holds payload");

        data.state = BatchState::Uninitialized;
        data.dependencies.clear();
        data.debug_name.clear();
        data.debug_flags = DebugFlags::empty();

        log::debug!("batch {} recycled", self.index);
    }

    /// Drops a batch that was never submitted, releasing everything it holds
    /// without running load callbacks.
    ///
    /// # Panics
    /// If the batch was submitted and has not completed.
    pub(crate) fn abandon(&self) {
        let payload = {
            let mut data = self.write();
            assert!(
                data.state != BatchState::Submitted,
                "cannot abandon a submitted batch"
            );
            std::mem::replace(&mut *data, BatchData::new(&self.shared.config))
        };

        let BatchData {
            state,
            commands,
            mut upload,
            mut readback,
            resources_to_release,
            ready_to_delete,
            ..
        } = payload;

        log::debug!("batch {} abandoned in state {:?}", self.index, state);

        for (command_buffer, pool) in commands {
            self.shared.device.release_command_buffer(pool, command_buffer);
        }
        upload.release(&self.shared.staging.upload);
        readback.release(&self.shared.staging.readback);

        for (id, count) in resources_to_release {
            self.shared.resources.release(id, count);
        }
        for object in ready_to_delete {
            self.shared.device.destroy_object(object);
        }
    }

    fn max_ranges_per_call(&self) -> usize {
        self.shared.config.staging.max_ranges_per_call
    }
}

fn for_each_chunk(
    ranges: &[MappedRange],
    max_per_call: usize,
    mut f: impl FnMut(&[MappedRange]) -> Result<(), RhiError>,
) -> Result<(), RhiError> {
    for chunk in ranges.chunks(max_per_call.max(1)) {
        f(chunk)?;
    }
    Ok(())
}
