use vislum_render_rhi::{QueueType, RhiError};

use crate::pool::BatchId;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must not be zero")]
    Zero(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("staging memory exhausted: requested {requested} bytes, at least {min_acceptable} required")]
    Exhausted { requested: u64, min_acceptable: u64 },

    #[error("device error: {0}")]
    Device(#[from] RhiError),
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("no free batch slot")]
    PoolExhausted,

    #[error("dependency list is full ({0} entries)")]
    DependencyCapacity(usize),

    #[error("no queue available for {0:?}")]
    NoQueue(QueueType),
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("resource cannot be resolved to a local handle")]
    UnknownResource,

    #[error("range {offset}..{end} is out of bounds (size {size})")]
    OutOfRange { offset: u64, end: u64, size: u64 },

    #[error("task dependency does not refer to an earlier task")]
    InvalidDependency,

    #[error("push constant scratch of {len} bytes at offset {offset} does not fit in 32 bits")]
    ScratchOverflow { offset: usize, len: usize },

    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error("device error: {0}")]
    Device(#[from] RhiError),
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("batch {0:?} is no longer alive")]
    Stale(BatchId),

    #[error("batch {0:?} is not ready for submission")]
    NotReady(BatchId),

    #[error("batch {batch:?} depends on {dependency:?}, which is not ready")]
    DependencyNotReady { batch: BatchId, dependency: BatchId },

    #[error("batch {batch:?} targets {expected:?}, not {queue:?}")]
    WrongQueue {
        batch: BatchId,
        queue: QueueType,
        expected: QueueType,
    },

    #[error("too many submissions in flight")]
    TooManyInFlight,

    #[error("device error: {0}")]
    Device(#[from] RhiError),
}
