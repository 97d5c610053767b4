mod task;

pub use task::*;

use std::{borrow::Cow, collections::HashMap};

use ash::vk;
use slotmap::SlotMap;
use smallvec::SmallVec;
use vislum_render_rhi::{PipelineStage, RawObject, align_up};

use crate::{
    batch::{CommandBatch, ImageReadLayout},
    context::BatchContext,
    error::{RecordError, StagingError},
    pool::BatchId,
    resource::{BufferId, ImageId, ReleaseMap, Resource, ResourceId},
    staging::{BufferMemView, ImageMemView, StagingRange},
};

pub struct UpdateBufferDesc<'a> {
    pub buffer: BufferId,
    pub offset: u64,
    pub data: &'a [u8],
}

pub struct ReadBufferDesc {
    pub buffer: BufferId,
    pub offset: u64,
    pub size: u64,
}

/// Tightly packed texel rows covering the whole image.
pub struct UpdateImageDesc<'a> {
    pub image: ImageId,
    pub data: &'a [u8],
}

pub struct ReadImageDesc {
    pub image: ImageId,
}

pub struct CopyBufferDesc<'a> {
    pub src: BufferId,
    pub dst: BufferId,
    pub regions: &'a [BufferCopyRegion],
}

pub struct DispatchDesc<'a> {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub group_count: [u32; 3],
    pub push_constants: &'a [u8],
    pub buffers: &'a [BufferId],
}

pub struct DrawDesc<'a> {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
    pub push_constants: &'a [u8],
    pub buffers: &'a [BufferId],
}

/// Records tasks into one batch.
///
/// Resources are resolved to batch-local handles on first use and referenced
/// until the batch completes. Every task constructor either enqueues its task
/// with all the staging memory it needs, or fails without side effects on
/// the batch.
///
/// Dropping a recorder without calling [`CommandRecorder::execute`] abandons
/// the batch.
pub struct CommandRecorder<'a> {
    context: &'a BatchContext,
    batch: BatchId,
    buffers: SlotMap<LocalBuffer, LocalBufferEntry>,
    images: SlotMap<LocalImage, LocalImageEntry>,
    buffer_lookup: HashMap<BufferId, LocalBuffer>,
    image_lookup: HashMap<ImageId, LocalImage>,
    release: ReleaseMap,
    graph: TaskGraph,
    executed: bool,
}

impl<'a> CommandRecorder<'a> {
    pub(crate) fn new(context: &'a BatchContext, batch: BatchId) -> Self {
        Self {
            context,
            batch,
            buffers: SlotMap::with_key(),
            images: SlotMap::with_key(),
            buffer_lookup: HashMap::new(),
            image_lookup: HashMap::new(),
            release: ReleaseMap::new(),
            graph: TaskGraph::default(),
            executed: false,
        }
    }

    #[inline]
    pub fn batch_id(&self) -> BatchId {
        self.batch
    }

    /// The batch being recorded. The recorder holds a reference on it.
    pub fn batch(&self) -> &'a CommandBatch {
        self.context.pool().by_index(self.batch.index())
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    fn add_reference<T: Resource>(&mut self, id: ResourceId<T>) -> bool {
        let raw = id.erase();
        if !self.context.resources().acquire(raw) {
            return false;
        }
        *self.release.entry(raw).or_default() += 1;
        true
    }

    /// Resolves a buffer to a handle local to this batch.
    pub fn buffer(&mut self, id: BufferId) -> Result<LocalBuffer, RecordError> {
        if let Some(&local) = self.buffer_lookup.get(&id) {
            return Ok(local);
        }

        let info = self
            .context
            .resources()
            .buffer_info(id)
            .ok_or(RecordError::UnknownResource)?;
        if !self.add_reference(id) {
            return Err(RecordError::UnknownResource);
        }

        let local = self.buffers.insert(LocalBufferEntry { id, info });
        self.buffer_lookup.insert(id, local);
        Ok(local)
    }

    /// Resolves an image to a handle local to this batch.
    pub fn image(&mut self, id: ImageId) -> Result<LocalImage, RecordError> {
        if let Some(&local) = self.image_lookup.get(&id) {
            return Ok(local);
        }

        let info = self
            .context
            .resources()
            .image_info(id)
            .ok_or(RecordError::UnknownResource)?;
        if !self.add_reference(id) {
            return Err(RecordError::UnknownResource);
        }

        let local = self.images.insert(LocalImageEntry { id, info });
        self.image_lookup.insert(id, local);
        Ok(local)
    }

    fn check_dependencies(&self, dependencies: &[TaskHandle]) -> Result<(), RecordError> {
        if self.graph.validate_dependencies(dependencies) {
            Ok(())
        } else {
            Err(RecordError::InvalidDependency)
        }
    }

    fn check_buffer_range(&self, buffer: LocalBuffer, offset: u64, size: u64) -> Result<(), RecordError> {
        let capacity = self.buffers[buffer].info.size;
        match offset.checked_add(size) {
            Some(end) if end <= capacity => Ok(()),
            end => Err(RecordError::OutOfRange {
                offset,
                end: end.unwrap_or(u64::MAX),
                size: capacity,
            }),
        }
    }

    /// Staging row pitch of `image`.
    fn row_pitch(&self, image: LocalImage) -> (u64, u64) {
        let info = &self.images[image].info;
        let row_size = info.extent[0] as u64 * info.bytes_per_texel as u64;
        let limits = self.context.device().limits();
        (row_size, align_up(row_size, limits.optimal_buffer_copy_row_pitch_alignment))
    }

    /// Uploads `desc.data` into a buffer.
    pub fn update_buffer(
        &mut self,
        desc: &UpdateBufferDesc<'_>,
        dependencies: &[TaskHandle],
    ) -> Result<TaskHandle, RecordError> {
        self.check_dependencies(dependencies)?;
        let dst = self.buffer(desc.buffer)?;
        self.check_buffer_range(dst, desc.offset, desc.data.len() as u64)?;

        let parts = self.batch().stage(|staging| staging.write_all(desc.data, 1))?;
        let task = Task::UploadBuffer {
            dst,
            offset: desc.offset,
            parts,
        };
        Ok(self.graph.push(task, dependencies))
    }

    /// Reads a buffer range back, calling `callback` once the batch completes.
    pub fn read_buffer(
        &mut self,
        desc: &ReadBufferDesc,
        callback: impl FnOnce(&BufferMemView<'_>) + Send + Sync + 'static,
        dependencies: &[TaskHandle],
    ) -> Result<TaskHandle, RecordError> {
        self.check_dependencies(dependencies)?;
        let src = self.buffer(desc.buffer)?;
        self.check_buffer_range(src, desc.offset, desc.size)?;

        let parts = self.batch().stage(|staging| {
            let parts = staging.read_all(desc.size, 1)?;
            staging.on_buffer_loaded(&parts, Box::new(callback));
            Ok::<_, StagingError>(parts)
        })?;

        let task = Task::ReadbackBuffer {
            src,
            offset: desc.offset,
            parts,
        };
        Ok(self.graph.push(task, dependencies))
    }

    /// Uploads the full contents of an image.
    pub fn update_image(
        &mut self,
        desc: &UpdateImageDesc<'_>,
        dependencies: &[TaskHandle],
    ) -> Result<TaskHandle, RecordError> {
        self.check_dependencies(dependencies)?;
        let dst = self.image(desc.image)?;
        let info = self.images[dst].info;
        let (row_size, row_pitch) = self.row_pitch(dst);
        let rows = info.extent[1] as u64 * info.extent[2] as u64;

        let expected = row_size * rows;
        if desc.data.len() as u64 != expected {
            return Err(RecordError::OutOfRange {
                offset: 0,
                end: desc.data.len() as u64,
                size: expected,
            });
        }

        let data = if row_pitch == row_size || row_size == 0 {
            Cow::Borrowed(desc.data)
        } else {
            let mut padded = vec![0u8; (row_pitch * rows) as usize];
            for (src, dst) in desc
                .data
                .chunks_exact(row_size as usize)
                .zip(padded.chunks_exact_mut(row_pitch as usize))
            {
                dst[..src.len()].copy_from_slice(src);
            }
            Cow::Owned(padded)
        };

        let ranges = self
            .batch()
            .stage(|staging| staging.write_all(&data, row_pitch))?;

        let task = Task::UploadImage {
            dst,
            row_pitch,
            parts: image_parts(&ranges, row_pitch),
        };
        Ok(self.graph.push(task, dependencies))
    }

    /// Reads a whole image back, calling `callback` once the batch completes.
    pub fn read_image(
        &mut self,
        desc: &ReadImageDesc,
        callback: impl FnOnce(&ImageMemView<'_>) + Send + Sync + 'static,
        dependencies: &[TaskHandle],
    ) -> Result<TaskHandle, RecordError> {
        self.check_dependencies(dependencies)?;
        let src = self.image(desc.image)?;
        let info = self.images[src].info;
        let (_, row_pitch) = self.row_pitch(src);
        let rows = info.extent[1] as u64 * info.extent[2] as u64;

        let layout = ImageReadLayout {
            extent: info.extent,
            bytes_per_texel: info.bytes_per_texel,
            row_pitch,
        };
        let ranges = self.batch().stage(|staging| {
            let ranges = staging.read_all(row_pitch * rows, row_pitch)?;
            staging.on_image_loaded(&ranges, layout, Box::new(callback));
            Ok::<_, StagingError>(ranges)
        })?;

        let task = Task::ReadbackImage {
            src,
            row_pitch,
            parts: image_parts(&ranges, row_pitch),
        };
        Ok(self.graph.push(task, dependencies))
    }

    pub fn copy_buffer(
        &mut self,
        desc: &CopyBufferDesc<'_>,
        dependencies: &[TaskHandle],
    ) -> Result<TaskHandle, RecordError> {
        self.check_dependencies(dependencies)?;
        let src = self.buffer(desc.src)?;
        let dst = self.buffer(desc.dst)?;
        for region in desc.regions {
            self.check_buffer_range(src, region.src_offset, region.size)?;
            self.check_buffer_range(dst, region.dst_offset, region.size)?;
        }

        let task = Task::CopyBuffer {
            src,
            dst,
            regions: SmallVec::from_slice(desc.regions),
        };
        Ok(self.graph.push(task, dependencies))
    }

    fn local_buffers(&mut self, ids: &[BufferId]) -> Result<SmallVec<[LocalBuffer; 4]>, RecordError> {
        ids.iter().map(|&id| self.buffer(id)).collect()
    }

    pub fn dispatch(
        &mut self,
        desc: &DispatchDesc<'_>,
        dependencies: &[TaskHandle],
    ) -> Result<TaskHandle, RecordError> {
        self.check_dependencies(dependencies)?;
        let buffers = self.local_buffers(desc.buffers)?;
        let push_constants = self.graph.alloc_scratch(desc.push_constants)?;

        let task = Task::Dispatch {
            pipeline: desc.pipeline,
            layout: desc.layout,
            group_count: desc.group_count,
            push_constants,
            buffers,
        };
        Ok(self.graph.push(task, dependencies))
    }

    pub fn draw(
        &mut self,
        desc: &DrawDesc<'_>,
        dependencies: &[TaskHandle],
    ) -> Result<TaskHandle, RecordError> {
        self.check_dependencies(dependencies)?;
        let buffers = self.local_buffers(desc.buffers)?;
        let push_constants = self.graph.alloc_scratch(desc.push_constants)?;

        let task = Task::Draw {
            pipeline: desc.pipeline,
            layout: desc.layout,
            vertex_count: desc.vertex_count,
            instance_count: desc.instance_count,
            first_vertex: desc.first_vertex,
            first_instance: desc.first_instance,
            push_constants,
            buffers,
        };
        Ok(self.graph.push(task, dependencies))
    }

    pub fn signal_semaphore(&self, semaphore: vk::Semaphore) {
        self.batch().signal_semaphore(semaphore);
    }

    pub fn wait_semaphore(&self, semaphore: vk::Semaphore, stage: PipelineStage) {
        self.batch().wait_semaphore(semaphore, stage);
    }

    pub fn destroy_postponed(&self, object: RawObject) {
        self.batch().destroy_postponed(object);
    }

    pub fn depends_on(&self, batch: BatchId) -> Result<(), RecordError> {
        Ok(self.batch().depends_on(batch)?)
    }

    pub fn present(&self, swapchain: vk::SwapchainKHR, image_index: u32) {
        self.batch().present(swapchain, image_index);
    }

    /// Translates every task into one command buffer and bakes the batch.
    ///
    /// Returns the baked batch; the caller now owns the recorder's reference.
    pub fn execute(mut self, processor: &mut dyn TaskProcessor) -> Result<BatchId, RecordError> {
        let batch = self.batch();

        if !self.graph.is_empty() {
            let device = self.context.device();
            let (command_buffer, pool) = device.allocate_command_buffer(batch.queue())?;

            if let Err(e) = self.record(batch, processor, command_buffer) {
                device.release_command_buffer(pool, command_buffer);
                return Err(e);
            }
            batch.push_command_to_back(command_buffer, pool);
        }

        log::debug!(
            "batch {} baked with {} tasks and {} resources",
            batch.index(),
            self.graph.len(),
            self.release.len()
        );

        batch.on_baked(std::mem::take(&mut self.release));
        self.executed = true;
        Ok(self.batch)
    }

    fn record(
        &self,
        batch: &CommandBatch,
        processor: &mut dyn TaskProcessor,
        command_buffer: vk::CommandBuffer,
    ) -> Result<(), RecordError> {
        let device = self.context.device();
        let debugger = self.context.debugger();

        device.begin_command_buffer(command_buffer)?;
        batch.on_before_recording(debugger, command_buffer);

        let ctx = TaskContext {
            batch_index: batch.index(),
            buffers: &self.buffers,
            images: &self.images,
            scratch: self.graph.scratch(),
        };
        for node in self.graph.nodes() {
            processor.process(&ctx, node, command_buffer)?;
        }

        batch.on_after_recording(debugger, command_buffer);
        device.end_command_buffer(command_buffer)?;
        Ok(())
    }
}

impl Drop for CommandRecorder<'_> {
    fn drop(&mut self) {
        if self.executed {
            return;
        }

        for (id, count) in self.release.drain() {
            self.context.resources().release(id, count);
        }
        self.context.pool().release(self.batch);
    }
}

fn image_parts(ranges: &[StagingRange], row_pitch: u64) -> SmallVec<[ImageStagingPart; 2]> {
    let mut first_row = 0;
    ranges
        .iter()
        .map(|range| {
            let rows = range.size.checked_div(row_pitch).unwrap_or(0) as u32;
            let part = ImageStagingPart {
                range: *range,
                first_row,
                rows,
            };
            first_row += rows;
            part
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use ash::vk::Handle;
    use vislum_render_rhi::{DeviceLimits, ObjectKind, QueueType, RhiError};

    use super::*;
    use crate::{
        batch::BatchDesc,
        config::{BatchConfig, StagingConfig},
        debug::NoDebugger,
        resource::{BufferInfo, ImageInfo},
        state::BatchState,
        testing::{MockDevice, MockResources},
    };

    struct Fixture {
        device: Arc<MockDevice>,
        resources: Arc<MockResources>,
        context: BatchContext,
    }

    fn fixture(config: BatchConfig) -> Fixture {
        fixture_on(MockDevice::new(), config)
    }

    fn fixture_on(device: Arc<MockDevice>, config: BatchConfig) -> Fixture {
        let resources = MockResources::new();
        let context =
            BatchContext::init(device.clone(), resources.clone(), config, Arc::new(NoDebugger))
                .unwrap();
        Fixture {
            device,
            resources,
            context,
        }
    }

    #[derive(Default)]
    struct Recording {
        tasks: Vec<TaskNode>,
        fail_at: Option<usize>,
    }

    impl TaskProcessor for Recording {
        fn process(
            &mut self,
            ctx: &TaskContext<'_>,
            node: &TaskNode,
            _command_buffer: vk::CommandBuffer,
        ) -> Result<(), RhiError> {
            if self.fail_at == Some(self.tasks.len()) {
                return Err(RhiError::Vulkan(vk::Result::ERROR_DEVICE_LOST));
            }

            if let Task::Dispatch { push_constants, .. } = &node.task {
                assert_eq!(ctx.scratch(*push_constants).len(), 4);
            }
            self.tasks.push(node.clone());
            Ok(())
        }
    }

    fn buffer(f: &Fixture, raw: u64, size: u64) -> BufferId {
        let id = BufferId::from_raw(raw);
        f.resources.add_buffer(
            id,
            BufferInfo {
                handle: vk::Buffer::from_raw(1000 + raw),
                size,
            },
        );
        id
    }

    #[test]
    fn test_local_handles_are_resolved_once() {
        let f = fixture(BatchConfig::default());
        let id = buffer(&f, 1, 256);

        let mut recorder = f
            .context
            .begin_recording(QueueType::Graphics, &[], &BatchDesc::default())
            .unwrap();
        let a = recorder.buffer(id).unwrap();
        let b = recorder.buffer(id).unwrap();
        assert_eq!(a, b);
        assert_eq!(f.resources.references(id.erase()), 1);

        assert!(matches!(
            recorder.buffer(BufferId::from_raw(99)),
            Err(RecordError::UnknownResource)
        ));
    }

    #[test]
    fn test_execute_translates_tasks_in_order_and_bakes() {
        let f = fixture(BatchConfig::default());
        let src = buffer(&f, 1, 256);
        let dst = buffer(&f, 2, 256);

        let mut recorder = f
            .context
            .begin_recording(QueueType::Graphics, &[], &BatchDesc::new("frame"))
            .unwrap();
        let upload = recorder
            .update_buffer(
                &UpdateBufferDesc {
                    buffer: src,
                    offset: 16,
                    data: &[5; 64],
                },
                &[],
            )
            .unwrap();
        let copy = recorder
            .copy_buffer(
                &CopyBufferDesc {
                    src,
                    dst,
                    regions: &[BufferCopyRegion {
                        src_offset: 16,
                        dst_offset: 0,
                        size: 64,
                    }],
                },
                &[upload],
            )
            .unwrap();
        recorder
            .dispatch(
                &DispatchDesc {
                    pipeline: vk::Pipeline::null(),
                    layout: vk::PipelineLayout::null(),
                    group_count: [8, 1, 1],
                    push_constants: &[1, 2, 3, 4],
                    buffers: &[dst],
                },
                &[copy],
            )
            .unwrap();

        let mut processor = Recording::default();
        let id = recorder.execute(&mut processor).unwrap();

        assert_eq!(processor.tasks.len(), 3);
        assert!(matches!(processor.tasks[0].task, Task::UploadBuffer { offset: 16, .. }));
        assert!(matches!(processor.tasks[1].task, Task::CopyBuffer { .. }));
        assert_eq!(processor.tasks[2].dependencies.as_slice(), [copy]);

        let batch = f.context.pool().get(id).unwrap();
        assert_eq!(batch.state(), BatchState::Baked);
        assert_eq!(batch.command_buffers().len(), 1);
        assert_eq!(batch.upload_bytes(), 64);
        assert_eq!(f.resources.references(src.erase()), 1);
        assert_eq!(f.resources.references(dst.erase()), 1);

        f.context.mark_ready(id).unwrap();
        f.context.submit(QueueType::Graphics, &[id]).unwrap();
        f.context.poll(true, &mut |_, _| {}).unwrap();

        // References taken by the batch are dropped on completion.
        assert_eq!(f.resources.references(src.erase()), 0);
        assert_eq!(f.resources.references(dst.erase()), 0);
        f.context.shutdown(&mut |_, _| {}).unwrap();
    }

    #[test]
    fn test_out_of_range_is_rejected() {
        let f = fixture(BatchConfig::default());
        let id = buffer(&f, 1, 32);
        let mut recorder = f
            .context
            .begin_recording(QueueType::Graphics, &[], &BatchDesc::default())
            .unwrap();

        let result = recorder.update_buffer(
            &UpdateBufferDesc {
                buffer: id,
                offset: 16,
                data: &[0; 32],
            },
            &[],
        );
        assert!(matches!(
            result,
            Err(RecordError::OutOfRange {
                offset: 16,
                end: 48,
                size: 32
            })
        ));
        assert!(recorder.graph().is_empty());
        assert_eq!(recorder.batch().upload_bytes(), 0);
    }

    #[test]
    fn test_forward_dependency_is_rejected() {
        let f = fixture(BatchConfig::default());
        let mut recorder = f
            .context
            .begin_recording(QueueType::Graphics, &[], &BatchDesc::default())
            .unwrap();

        let result = recorder.draw(
            &DrawDesc {
                pipeline: vk::Pipeline::null(),
                layout: vk::PipelineLayout::null(),
                vertex_count: 3,
                instance_count: 1,
                first_vertex: 0,
                first_instance: 0,
                push_constants: &[],
                buffers: &[],
            },
            &[TaskHandle(0)],
        );
        assert!(matches!(result, Err(RecordError::InvalidDependency)));
    }

    #[test]
    fn test_staging_failure_enqueues_nothing() {
        let config = BatchConfig {
            staging: StagingConfig {
                block_size: 128,
                max_buffers_per_batch: 1,
                ..Default::default()
            },
            ..Default::default()
        };
        let f = fixture(config);
        let id = buffer(&f, 1, 4096);
        let mut recorder = f
            .context
            .begin_recording(QueueType::Graphics, &[], &BatchDesc::default())
            .unwrap();

        recorder
            .update_buffer(
                &UpdateBufferDesc {
                    buffer: id,
                    offset: 0,
                    data: &[1; 100],
                },
                &[],
            )
            .unwrap();

        let result = recorder.read_buffer(
            &ReadBufferDesc {
                buffer: id,
                offset: 0,
                size: 4096,
            },
            |_| panic!("never loaded"),
            &[],
        );
        assert!(matches!(
            result,
            Err(RecordError::Staging(StagingError::Exhausted { .. }))
        ));

        let result = recorder.update_buffer(
            &UpdateBufferDesc {
                buffer: id,
                offset: 0,
                data: &[2; 1000],
            },
            &[],
        );
        assert!(matches!(result, Err(RecordError::Staging(_))));
        assert_eq!(recorder.graph().len(), 1);
        assert_eq!(recorder.batch().upload_bytes(), 100);
        assert_eq!(recorder.batch().readback_bytes(), 0);
    }

    #[test]
    fn test_image_round_trip_with_padded_rows() {
        let device = MockDevice::with_limits(DeviceLimits {
            optimal_buffer_copy_row_pitch_alignment: 8,
            ..Default::default()
        });
        let f = fixture_on(device, BatchConfig::default());
        let image = ImageId::from_raw(5);
        f.resources.add_image(
            image,
            ImageInfo {
                handle: vk::Image::from_raw(55),
                extent: [3, 2, 1],
                bytes_per_texel: 2,
            },
        );

        let texels: Vec<u8> = (1..=12).collect();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();

        let mut recorder = f
            .context
            .begin_recording(QueueType::Graphics, &[], &BatchDesc::default())
            .unwrap();
        recorder
            .update_image(
                &UpdateImageDesc {
                    image,
                    data: &texels,
                },
                &[],
            )
            .unwrap();
        recorder
            .read_image(
                &ReadImageDesc { image },
                move |view| *sink.lock().unwrap() = view.to_vec(),
                &[],
            )
            .unwrap();

        let mut processor = Recording::default();
        let id = recorder.execute(&mut processor).unwrap();

        // Stand in for the device: copy the staged rows into readback memory.
        let (Task::UploadImage { parts: up, row_pitch, .. }, Task::ReadbackImage { parts: down, .. }) =
            (&processor.tasks[0].task, &processor.tasks[1].task)
        else {
            panic!("unexpected tasks");
        };
        assert_eq!(*row_pitch, 8);
        assert_eq!(up[0].rows, 2);
        f.device.copy_staging(
            up[0].range.buffer,
            up[0].range.offset,
            down[0].range.buffer,
            down[0].range.offset,
            16,
        );

        f.context.mark_ready(id).unwrap();
        f.context.submit(QueueType::Graphics, &[id]).unwrap();
        f.context.poll(true, &mut |_, _| {}).unwrap();

        assert_eq!(*received.lock().unwrap(), texels);
    }

    #[test]
    fn test_processor_failure_abandons_batch() {
        let f = fixture(BatchConfig::default());
        let id = buffer(&f, 1, 64);

        let mut recorder = f
            .context
            .begin_recording(QueueType::Graphics, &[], &BatchDesc::default())
            .unwrap();
        recorder
            .update_buffer(
                &UpdateBufferDesc {
                    buffer: id,
                    offset: 0,
                    data: &[1; 8],
                },
                &[],
            )
            .unwrap();
        let batch = recorder.batch_id();

        let mut processor = Recording {
            fail_at: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            recorder.execute(&mut processor),
            Err(RecordError::Device(_))
        ));

        assert!(!f.context.pool().is_alive(batch));
        assert_eq!(f.resources.references(id.erase()), 0);
        assert_eq!(f.device.released_command_buffers().len(), 1);
        assert_eq!(f.context.pool().available(), f.context.pool().capacity());
    }

    #[test]
    fn test_passthroughs_reach_the_batch() {
        let f = fixture(BatchConfig::default());
        let recorder = f
            .context
            .begin_recording(QueueType::Graphics, &[], &BatchDesc::default())
            .unwrap();

        recorder.signal_semaphore(vk::Semaphore::from_raw(1));
        recorder.wait_semaphore(vk::Semaphore::from_raw(2), PipelineStage::ALL_COMMANDS);
        recorder.destroy_postponed(RawObject::new(ObjectKind::Sampler, 3));
        recorder.depends_on(BatchId::new(7, 0)).unwrap();

        let id = recorder.execute(&mut Recording::default()).unwrap();
        let batch = f.context.pool().get(id).unwrap();
        assert!(batch.command_buffers().is_empty());
        assert_eq!(batch.dependencies().as_slice(), [BatchId::new(7, 0)]);
        f.context.pool().release(id);

        assert_eq!(f.device.destroyed_objects(), [RawObject::new(ObjectKind::Sampler, 3)]);
    }
}
