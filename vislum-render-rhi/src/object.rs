use ash::vk::{self, Handle};

use crate::vk_enum;

vk_enum! {
    /// The closed set of driver objects whose destruction can be postponed
    /// until the GPU work referencing them has completed.
    pub enum ObjectKind: vk::ObjectType {
        Semaphore => SEMAPHORE,
        Fence => FENCE,
        DeviceMemory => DEVICE_MEMORY,
        Image => IMAGE,
        ImageView => IMAGE_VIEW,
        Buffer => BUFFER,
        BufferView => BUFFER_VIEW,
        PipelineLayout => PIPELINE_LAYOUT,
        RenderPass => RENDER_PASS,
        Pipeline => PIPELINE,
        DescriptorSetLayout => DESCRIPTOR_SET_LAYOUT,
        Sampler => SAMPLER,
        DescriptorPool => DESCRIPTOR_POOL,
        Framebuffer => FRAMEBUFFER,
        SamplerYcbcrConversion => SAMPLER_YCBCR_CONVERSION,
        DescriptorUpdateTemplate => DESCRIPTOR_UPDATE_TEMPLATE,
        AccelerationStructure => ACCELERATION_STRUCTURE_KHR,
    }
}

impl ObjectKind {
    pub const COUNT: usize = Self::ALL.len();

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// A raw driver object queued for postponed destruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawObject {
    pub kind: ObjectKind,
    pub raw: u64,
}

impl RawObject {
    #[inline]
    pub const fn new(kind: ObjectKind, raw: u64) -> Self {
        Self { kind, raw }
    }

    /// Wraps a typed handle.
    ///
    /// Returns `None` for handle types that cannot be destroyed through
    /// [`DESTROY_TABLE`] (command buffers, queues, ...).
    pub fn from_handle<H: Handle>(handle: H) -> Option<Self> {
        let kind = ObjectKind::from_vk(H::TYPE)?;
        Some(Self {
            kind,
            raw: handle.as_raw(),
        })
    }
}

/// Device entry points used to destroy raw objects.
pub struct DestroyContext<'a> {
    pub device: &'a ash::Device,
    pub acceleration_structure: Option<&'a ash::khr::acceleration_structure::Device>,
}

pub type DestroyFn = unsafe fn(&DestroyContext<'_>, u64);

macro_rules! destroy_fns {
    ($($name:ident => $destroy:ident($ty:ty),)*) => {
        $(
            unsafe fn $name(ctx: &DestroyContext<'_>, raw: u64) {
                unsafe { ctx.device.$destroy(<$ty>::from_raw(raw), None) }
            }
        )*
    };
}

destroy_fns! {
    destroy_semaphore => destroy_semaphore(vk::Semaphore),
    destroy_fence => destroy_fence(vk::Fence),
    free_memory => free_memory(vk::DeviceMemory),
    destroy_image => destroy_image(vk::Image),
    destroy_image_view => destroy_image_view(vk::ImageView),
    destroy_buffer => destroy_buffer(vk::Buffer),
    destroy_buffer_view => destroy_buffer_view(vk::BufferView),
    destroy_pipeline_layout => destroy_pipeline_layout(vk::PipelineLayout),
    destroy_render_pass => destroy_render_pass(vk::RenderPass),
    destroy_pipeline => destroy_pipeline(vk::Pipeline),
    destroy_descriptor_set_layout => destroy_descriptor_set_layout(vk::DescriptorSetLayout),
    destroy_sampler => destroy_sampler(vk::Sampler),
    destroy_descriptor_pool => destroy_descriptor_pool(vk::DescriptorPool),
    destroy_framebuffer => destroy_framebuffer(vk::Framebuffer),
    destroy_ycbcr_conversion => destroy_sampler_ycbcr_conversion(vk::SamplerYcbcrConversion),
    destroy_update_template => destroy_descriptor_update_template(vk::DescriptorUpdateTemplate),
}

unsafe fn destroy_acceleration_structure(ctx: &DestroyContext<'_>, raw: u64) {
    match ctx.acceleration_structure {
        Some(loader) => unsafe {
            loader.destroy_acceleration_structure(vk::AccelerationStructureKHR::from_raw(raw), None)
        },
        None => log::error!(
            "acceleration structure 0x{raw:X} queued for destruction without VK_KHR_acceleration_structure"
        ),
    }
}

/// Destroy functions indexed by [`ObjectKind::index`].
pub const DESTROY_TABLE: [DestroyFn; ObjectKind::COUNT] = [
    destroy_semaphore,
    destroy_fence,
    free_memory,
    destroy_image,
    destroy_image_view,
    destroy_buffer,
    destroy_buffer_view,
    destroy_pipeline_layout,
    destroy_render_pass,
    destroy_pipeline,
    destroy_descriptor_set_layout,
    destroy_sampler,
    destroy_descriptor_pool,
    destroy_framebuffer,
    destroy_ycbcr_conversion,
    destroy_update_template,
    destroy_acceleration_structure,
];

/// Destroys `object` through the dispatch table.
///
/// # Safety
/// The object must have been created from `ctx.device` and must no longer be
/// in use by the GPU.
pub unsafe fn destroy_raw_object(ctx: &DestroyContext<'_>, object: RawObject) {
    unsafe { DESTROY_TABLE[object.kind.index()](ctx, object.raw) }
}
