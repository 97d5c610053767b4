use ash::vk;
use slotmap::SlotMap;
use smallvec::SmallVec;
use vislum_render_rhi::RhiError;

use crate::{
    error::RecordError,
    resource::{BufferId, BufferInfo, ImageId, ImageInfo},
    staging::StagingRange,
};

slotmap::new_key_type! {
    /// A buffer resolved for the lifetime of one batch.
    pub struct LocalBuffer;

    /// An image resolved for the lifetime of one batch.
    pub struct LocalImage;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalBufferEntry {
    pub id: BufferId,
    pub info: BufferInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalImageEntry {
    pub id: ImageId,
    pub info: ImageInfo,
}

/// A node in the recorder's task graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(pub(crate) u32);

impl TaskHandle {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A byte range of the recorder's scratch arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScratchRange {
    pub offset: u32,
    pub len: u32,
}

impl ScratchRange {
    /// Fails if the range does not end below 4 GiB.
    fn new(offset: usize, len: usize) -> Result<Self, RecordError> {
        let end = offset.checked_add(len).and_then(|end| u32::try_from(end).ok());
        let (Some(_), Ok(start), Ok(size)) = (end, u32::try_from(offset), u32::try_from(len)) else {
            return Err(RecordError::ScratchOverflow { offset, len });
        };

        Ok(Self {
            offset: start,
            len: size,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferCopyRegion {
    pub src_offset: u64,
    pub dst_offset: u64,
    pub size: u64,
}

/// Rows of an image stored in one staging range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageStagingPart {
    pub range: StagingRange,
    /// First row, counting rows of all slices in order.
    pub first_row: u32,
    pub rows: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    CopyBuffer {
        src: LocalBuffer,
        dst: LocalBuffer,
        regions: SmallVec<[BufferCopyRegion; 2]>,
    },
    /// Copies staged bytes into `dst`. Parts are consecutive.
    UploadBuffer {
        dst: LocalBuffer,
        offset: u64,
        parts: SmallVec<[StagingRange; 2]>,
    },
    /// Copies `src` into readback memory. Parts are consecutive.
    ReadbackBuffer {
        src: LocalBuffer,
        offset: u64,
        parts: SmallVec<[StagingRange; 2]>,
    },
    UploadImage {
        dst: LocalImage,
        row_pitch: u64,
        parts: SmallVec<[ImageStagingPart; 2]>,
    },
    ReadbackImage {
        src: LocalImage,
        row_pitch: u64,
        parts: SmallVec<[ImageStagingPart; 2]>,
    },
    Dispatch {
        pipeline: vk::Pipeline,
        layout: vk::PipelineLayout,
        group_count: [u32; 3],
        push_constants: ScratchRange,
        buffers: SmallVec<[LocalBuffer; 4]>,
    },
    Draw {
        pipeline: vk::Pipeline,
        layout: vk::PipelineLayout,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
        push_constants: ScratchRange,
        buffers: SmallVec<[LocalBuffer; 4]>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskNode {
    pub task: Task,
    /// Tasks that must be translated first. Always earlier in the graph.
    pub dependencies: SmallVec<[TaskHandle; 4]>,
}

/// Tasks of one recording, in an order compatible with their dependencies.
#[derive(Debug, Default)]
pub struct TaskGraph {
    nodes: Vec<TaskNode>,
    scratch: Vec<u8>,
}

impl TaskGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[TaskNode] {
        &self.nodes
    }

    pub fn scratch(&self) -> &[u8] {
        &self.scratch
    }

    pub(crate) fn validate_dependencies(&self, dependencies: &[TaskHandle]) -> bool {
        dependencies.iter().all(|dep| dep.index() < self.nodes.len())
    }

    pub(crate) fn push(&mut self, task: Task, dependencies: &[TaskHandle]) -> TaskHandle {
        debug_assert!(self.validate_dependencies(dependencies));
        let handle = TaskHandle(self.nodes.len() as u32);
        self.nodes.push(TaskNode {
            task,
            dependencies: SmallVec::from_slice(dependencies),
        });
        handle
    }

    /// Copies `data` into the scratch arena.
    pub(crate) fn alloc_scratch(&mut self, data: &[u8]) -> Result<ScratchRange, RecordError> {
        let range = ScratchRange::new(self.scratch.len(), data.len())?;
        self.scratch.extend_from_slice(data);
        Ok(range)
    }
}

/// What a [`TaskProcessor`] sees of the recording.
pub struct TaskContext<'a> {
    pub batch_index: u32,
    pub(crate) buffers: &'a SlotMap<LocalBuffer, LocalBufferEntry>,
    pub(crate) images: &'a SlotMap<LocalImage, LocalImageEntry>,
    pub(crate) scratch: &'a [u8],
}

impl TaskContext<'_> {
    pub fn buffer(&self, buffer: LocalBuffer) -> Option<&LocalBufferEntry> {
        self.buffers.get(buffer)
    }

    pub fn image(&self, image: LocalImage) -> Option<&LocalImageEntry> {
        self.images.get(image)
    }

    pub fn scratch(&self, range: ScratchRange) -> &[u8] {
        let start = range.offset as usize;
        &self.scratch[start..start + range.len as usize]
    }
}

/// Translates recorded tasks into native commands.
pub trait TaskProcessor {
    fn process(
        &mut self,
        ctx: &TaskContext<'_>,
        node: &TaskNode,
        command_buffer: vk::CommandBuffer,
    ) -> Result<(), RhiError>;
}
