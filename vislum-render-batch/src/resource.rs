use std::{collections::HashMap, marker::PhantomData};

use ash::vk;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Buffer,
    Image,
}

/// A type of resource owned by the [`ResourceManager`].
pub trait Resource: 'static {
    const KIND: ResourceKind;
}

pub enum BufferResource {}
pub enum ImageResource {}

impl Resource for BufferResource {
    const KIND: ResourceKind = ResourceKind::Buffer;
}

impl Resource for ImageResource {
    const KIND: ResourceKind = ResourceKind::Image;
}

/// An opaque, typed reference to a resource owned by the resource manager.
pub struct ResourceId<T> {
    raw: u64,
    phantom: PhantomData<fn() -> T>,
}

pub type BufferId = ResourceId<BufferResource>;
pub type ImageId = ResourceId<ImageResource>;

impl<T> ResourceId<T> {
    pub const fn from_raw(raw: u64) -> Self {
        Self {
            raw,
            phantom: PhantomData,
        }
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.raw
    }
}

impl<T: Resource> ResourceId<T> {
    #[inline]
    pub fn erase(self) -> RawResourceId {
        RawResourceId {
            kind: T::KIND,
            raw: self.raw,
        }
    }
}

impl<T> Copy for ResourceId<T> {}

impl<T> Clone for ResourceId<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for ResourceId<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for ResourceId<T> {}

impl<T> std::hash::Hash for ResourceId<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state)
    }
}

impl<T> std::fmt::Debug for ResourceId<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ResourceId<{}>({})", std::any::type_name::<T>(), self.raw)
    }
}

/// A resource id with its kind erased.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawResourceId {
    pub kind: ResourceKind,
    pub raw: u64,
}

/// Number of references to drop per resource once a batch completes.
pub type ReleaseMap = HashMap<RawResourceId, u32>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub handle: vk::Buffer,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub handle: vk::Image,
    pub extent: [u32; 3],
    pub bytes_per_texel: u32,
}

/// Owner of buffers, images and layouts, addressed by id.
pub trait ResourceManager: Send + Sync {
    /// Adds a reference to a resource. Returns `false` if it does not exist.
    fn acquire(&self, id: RawResourceId) -> bool;

    /// Drops `count` references to a resource.
    fn release(&self, id: RawResourceId, count: u32);

    fn buffer_info(&self, id: BufferId) -> Option<BufferInfo>;

    fn image_info(&self, id: ImageId) -> Option<ImageInfo>;
}
