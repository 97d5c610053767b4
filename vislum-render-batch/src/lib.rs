//! Command batches: recording, staging memory, submission and completion
//! of GPU work on top of [`vislum_render_rhi`].

pub mod batch;
pub mod config;
pub mod context;
pub mod debug;
pub mod error;
pub mod pool;
pub mod recorder;
pub mod resource;
pub mod staging;
pub mod state;
pub mod stats;
pub mod submission;
pub mod submitter;

#[cfg(test)]
mod testing;

pub use batch::{BatchDesc, BufferLoadFn, CommandBatch, ImageLoadFn, ImageReadLayout, PresentRequest};
pub use config::*;
pub use context::*;
pub use debug::*;
pub use error::*;
pub use pool::*;
pub use recorder::{CommandRecorder, TaskHandle, TaskProcessor};
pub use resource::*;
pub use state::*;
pub use stats::*;
pub use submission::*;
pub use submitter::*;

static_assertions::assert_impl_all!(CommandBatch: Send, Sync);
static_assertions::assert_impl_all!(BatchPool: Send, Sync);
static_assertions::assert_impl_all!(BatchContext: Send, Sync);
static_assertions::assert_impl_all!(staging::StagingRange: Send, Sync);
