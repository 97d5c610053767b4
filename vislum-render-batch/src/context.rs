use std::sync::Arc;

use vislum_render_rhi::{QueueType, RenderDevice};

use crate::{
    batch::{BatchDesc, BatchShared},
    config::BatchConfig,
    debug::{BatchDebugger, DebugCallback},
    error::{ConfigError, RecordError, SubmitError},
    pool::{BatchId, BatchPool},
    recorder::CommandRecorder,
    resource::ResourceManager,
    staging::StagingPools,
    stats::BatchStats,
    submitter::{Submitted, Submitter},
};

/// Owns the batch pool, staging pools and submitter of one device.
///
/// ```ignore
/// let mut recorder = context.begin_recording(QueueType::Graphics, &[], &BatchDesc::new("upload"))?;
/// recorder.update_buffer(&UpdateBufferDesc { buffer, offset: 0, data }, &[])?;
/// let batch = recorder.execute(&mut processor)?;
///
/// context.mark_ready(batch)?;
/// context.submit(QueueType::Graphics, &[batch])?;
/// context.poll(false, &mut |_, _| {})?;
/// ```
pub struct BatchContext {
    shared: Arc<BatchShared>,
    pool: Arc<BatchPool>,
    submitter: Submitter,
    debugger: Arc<dyn BatchDebugger>,
}

impl BatchContext {
    pub fn init(
        device: Arc<dyn RenderDevice>,
        resources: Arc<dyn ResourceManager>,
        config: BatchConfig,
        debugger: Arc<dyn BatchDebugger>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let max_submissions = config.max_submissions;
        let shared = Arc::new(BatchShared::new(device.clone(), resources, config));
        let pool = Arc::new(BatchPool::new(shared.clone()));
        let submitter = Submitter::new(device, pool.clone(), debugger.clone(), max_submissions);

        log::info!(
            "batch context ready: {} batches, {} submissions in flight",
            pool.capacity(),
            max_submissions
        );

        Ok(Self {
            shared,
            pool,
            submitter,
            debugger,
        })
    }

    #[inline]
    pub fn device(&self) -> &Arc<dyn RenderDevice> {
        &self.shared.device
    }

    #[inline]
    pub fn resources(&self) -> &Arc<dyn ResourceManager> {
        &self.shared.resources
    }

    #[inline]
    pub fn config(&self) -> &BatchConfig {
        &self.shared.config
    }

    #[inline]
    pub fn pool(&self) -> &BatchPool {
        &self.pool
    }

    #[inline]
    pub fn staging(&self) -> &StagingPools {
        &self.shared.staging
    }

    #[inline]
    pub fn submitter(&self) -> &Submitter {
        &self.submitter
    }

    #[inline]
    pub fn debugger(&self) -> &dyn BatchDebugger {
        &*self.debugger
    }

    /// Allocates a batch on `queue` and starts recording into it.
    pub fn begin_recording(
        &self,
        queue: QueueType,
        depends_on: &[BatchId],
        desc: &BatchDesc,
    ) -> Result<CommandRecorder<'_>, RecordError> {
        let id = self.pool.allocate(queue, depends_on)?;
        self.pool.by_index(id.index()).on_begin(desc, self.debugger());

        log::trace!("recording batch {id:?} ({}) on {queue:?}", desc.name);
        Ok(CommandRecorder::new(self, id))
    }

    pub fn mark_ready(&self, id: BatchId) -> Result<(), SubmitError> {
        self.submitter.mark_ready(id)
    }

    pub fn submit(&self, queue: QueueType, batches: &[BatchId]) -> Result<Submitted, SubmitError> {
        self.submitter.submit(queue, batches)
    }

    /// Completes finished submissions. See [`Submitter::poll`].
    pub fn poll(&self, wait: bool, callback: &mut DebugCallback<'_>) -> Result<usize, SubmitError> {
        self.submitter.poll(wait, callback)
    }

    pub fn stats(&self) -> BatchStats {
        self.submitter.stats()
    }

    /// Drains the device and releases every pooled object.
    ///
    /// # Panics
    /// If a batch that was never submitted is still held.
    pub fn shutdown(&self, callback: &mut DebugCallback<'_>) -> Result<(), SubmitError> {
        let result = self.submitter.shutdown(callback);
        self.pool.shutdown();
        self.shared.staging.shutdown();
        self.debugger.shutdown();

        let stats = self.submitter.stats();
        log::info!(
            "batch context shut down after {} batches ({} bytes uploaded, {} bytes read back)",
            stats.batches_completed,
            stats.uploaded_bytes,
            stats.readback_bytes
        );
        result
    }
}
