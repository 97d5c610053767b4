use std::ops::Deref;

pub mod device;
pub mod error;
pub mod object;
pub mod types;
pub mod vulkan;

mod macros;

pub use device::*;
pub use error::*;
pub use object::*;
pub use types::*;

/// A trait for objects that wrap Vulkan handles.
pub trait VkHandle {
    type Handle: ash::vk::Handle;

    /// Returns the Vulkan handle of the object.
    fn vk_handle(&self) -> Self::Handle;
}

pub struct DebugWrapper<T: ash::vk::Handle>(pub T);

impl<T> Deref for DebugWrapper<T>
where
    T: ash::vk::Handle,
{
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> std::fmt::Debug for DebugWrapper<T>
where
    T: ash::vk::Handle + Copy,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:X}", self.0.as_raw())
    }
}

/// Rounds `value` up to the next multiple of `align`.
///
/// An alignment of zero or one leaves the value untouched.
#[inline]
pub const fn align_up(value: u64, align: u64) -> u64 {
    if align <= 1 {
        value
    } else {
        value.div_ceil(align) * align
    }
}

/// Rounds `value` down to the previous multiple of `align`.
#[inline]
pub const fn align_down(value: u64, align: u64) -> u64 {
    if align <= 1 {
        value
    } else {
        (value / align) * align
    }
}
