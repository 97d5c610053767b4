use std::sync::{Arc, Mutex, PoisonError};

use ash::vk;
use vislum_render_rhi::{
    MappedRange, PipelineStage, RenderDevice, RhiError, StagingDirection, StagingMemory,
};

bitflags::bitflags! {
    /// Instrumentation requested for a single batch.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DebugFlags: u32 {
        /// Capture shader trace output.
        const SHADER_TRACE = 1 << 0;
        /// Measure GPU time between the first and last command buffer.
        const TIMESTAMPS = 1 << 1;
    }
}

/// Descriptor set index reserved for debug bindings.
pub const DEBUG_DESCRIPTOR_SET: u32 = 7;

/// Output produced by a debugger for a completed batch.
#[derive(Debug, Clone, PartialEq)]
pub enum DebugOutput<'a> {
    ShaderTrace(&'a [String]),
    Timestamps { begin: u64, end: u64, duration_ns: f64 },
}

/// Receives debug output, keyed by the batch's debug name.
pub type DebugCallback<'a> = dyn FnMut(&str, DebugOutput<'_>) + 'a;

#[derive(Debug, thiserror::Error)]
pub enum DebugError {
    #[error("malformed shader trace: {0}")]
    Malformed(String),

    #[error("device error: {0}")]
    Device(#[from] RhiError),
}

/// Instrumentation hooked into the batch lifecycle.
///
/// Batches are identified by their pool index. Every hook is a no-op by
/// default, and implementations must not fail the batch: errors are logged
/// and the output is skipped.
pub trait BatchDebugger: Send + Sync {
    fn on_begin(&self, _batch: u32, _flags: DebugFlags) {}

    fn on_before_recording(&self, _batch: u32, _command_buffer: vk::CommandBuffer) {}

    fn on_after_recording(&self, _batch: u32, _command_buffer: vk::CommandBuffer) {}

    fn on_complete(&self, _batch: u32, _name: &str, _callback: &mut DebugCallback<'_>) {}

    /// Releases device objects owned by the debugger.
    fn shutdown(&self) {}
}

/// The debugger used when instrumentation is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDebugger;

impl BatchDebugger for NoDebugger {}

impl<A: BatchDebugger, B: BatchDebugger> BatchDebugger for (A, B) {
    fn on_begin(&self, batch: u32, flags: DebugFlags) {
        self.0.on_begin(batch, flags);
        self.1.on_begin(batch, flags);
    }

    fn on_before_recording(&self, batch: u32, command_buffer: vk::CommandBuffer) {
        self.0.on_before_recording(batch, command_buffer);
        self.1.on_before_recording(batch, command_buffer);
    }

    fn on_after_recording(&self, batch: u32, command_buffer: vk::CommandBuffer) {
        self.0.on_after_recording(batch, command_buffer);
        self.1.on_after_recording(batch, command_buffer);
    }

    fn on_complete(&self, batch: u32, name: &str, callback: &mut DebugCallback<'_>) {
        self.0.on_complete(batch, name, callback);
        self.1.on_complete(batch, name, callback);
    }

    fn shutdown(&self) {
        self.0.shutdown();
        self.1.shutdown();
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct TimestampSlot {
    enabled: bool,
    written: bool,
}

/// Records two timestamps per batch: before its first command buffer and
/// after its last one.
pub struct TimestampDebugger {
    device: Arc<dyn RenderDevice>,
    pool: vk::QueryPool,
    slots: Mutex<Vec<TimestampSlot>>,
}

impl TimestampDebugger {
    pub fn new(device: Arc<dyn RenderDevice>, max_batches: u32) -> Result<Self, RhiError> {
        let pool = device.create_timestamp_pool(max_batches * 2)?;

        Ok(Self {
            device,
            pool,
            slots: Mutex::new(vec![TimestampSlot::default(); max_batches as usize]),
        })
    }

    #[inline]
    pub fn query_pool(&self) -> vk::QueryPool {
        self.pool
    }

    fn with_slot<R>(&self, batch: u32, f: impl FnOnce(&mut TimestampSlot) -> R) -> Option<R> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.get_mut(batch as usize).map(f)
    }
}

impl BatchDebugger for TimestampDebugger {
    fn on_begin(&self, batch: u32, flags: DebugFlags) {
        self.with_slot(batch, |slot| {
            *slot = TimestampSlot {
                enabled: flags.contains(DebugFlags::TIMESTAMPS),
                written: false,
            }
        });
    }

    fn on_before_recording(&self, batch: u32, command_buffer: vk::CommandBuffer) {
        let first = self
            .with_slot(batch, |slot| {
                let first = slot.enabled && !slot.written;
                slot.written |= slot.enabled;
                first
            })
            .unwrap_or(false);

        if first {
            let query = batch * 2;
            self.device
                .reset_timestamps(command_buffer, self.pool, query, 2);
            self.device
                .write_timestamp(command_buffer, PipelineStage::TOP_OF_PIPE, self.pool, query);
        }
    }

    fn on_after_recording(&self, batch: u32, command_buffer: vk::CommandBuffer) {
        if self.with_slot(batch, |slot| slot.written).unwrap_or(false) {
            self.device.write_timestamp(
                command_buffer,
                PipelineStage::BOTTOM_OF_PIPE,
                self.pool,
                batch * 2 + 1,
            );
        }
    }

    fn on_complete(&self, batch: u32, name: &str, callback: &mut DebugCallback<'_>) {
        let written = self
            .with_slot(batch, std::mem::take)
            .is_some_and(|slot| slot.written);
        if !written {
            return;
        }

        let mut timestamps = [0u64; 2];
        match self.device.read_timestamps(self.pool, batch * 2, &mut timestamps) {
            Ok(true) => {
                let [begin, end] = timestamps;
                let period = self.device.limits().timestamp_period as f64;
                callback(
                    name,
                    DebugOutput::Timestamps {
                        begin,
                        end,
                        duration_ns: end.saturating_sub(begin) as f64 * period,
                    },
                );
            }
            Ok(false) => log::warn!("timestamps of batch {batch} ({name}) are not available"),
            Err(e) => log::warn!("failed to read timestamps of batch {batch} ({name}): {e}"),
        }
    }

    fn shutdown(&self) {
        self.device.destroy_timestamp_pool(self.pool);
    }
}

/// Turns the raw contents of a trace buffer into text lines.
pub trait ShaderTraceParser: Send + Sync {
    fn parse(&self, data: &[u8]) -> Result<Vec<String>, DebugError>;
}

/// Parses trace buffers laid out as a little endian `u32` byte count
/// followed by newline separated UTF-8 text.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextTraceParser;

impl ShaderTraceParser for TextTraceParser {
    fn parse(&self, data: &[u8]) -> Result<Vec<String>, DebugError> {
        let Some((header, body)) = data.split_first_chunk::<4>() else {
            return Err(DebugError::Malformed("missing header".into()));
        };

        let len = u32::from_le_bytes(*header) as usize;
        // Shaders keep counting after the buffer is full.
        let text = &body[..len.min(body.len())];
        let text = std::str::from_utf8(text).map_err(|e| DebugError::Malformed(e.to_string()))?;

        Ok(text
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect())
    }
}

#[derive(Debug, Default)]
struct TraceSlot {
    buffer: Option<StagingMemory>,
    enabled: bool,
    cleared: bool,
}

/// Gives every traced batch a storage buffer shaders append text to.
///
/// The buffer is bound at [`DEBUG_DESCRIPTOR_SET`] by the task processor,
/// cleared before the batch's first command buffer and parsed once the
/// batch completes.
pub struct ShaderTraceDebugger {
    device: Arc<dyn RenderDevice>,
    parser: Box<dyn ShaderTraceParser>,
    buffer_size: u64,
    slots: Mutex<Vec<TraceSlot>>,
}

impl ShaderTraceDebugger {
    pub fn new(
        device: Arc<dyn RenderDevice>,
        parser: Box<dyn ShaderTraceParser>,
        max_batches: u32,
        buffer_size: u64,
    ) -> Self {
        let slots = (0..max_batches).map(|_| TraceSlot::default()).collect();

        Self {
            device,
            parser,
            buffer_size,
            slots: Mutex::new(slots),
        }
    }

    /// The trace buffer of `batch` and its size, if tracing is enabled.
    pub fn trace_buffer(&self, batch: u32) -> Option<(vk::Buffer, u64)> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.get(batch as usize)?;
        if !slot.enabled {
            return None;
        }
        slot.buffer.as_ref().map(|memory| (memory.buffer, memory.capacity))
    }

    fn read(&self, memory: &StagingMemory) -> Result<Vec<String>, DebugError> {
        if !memory.coherent {
            self.device.invalidate_mapped_ranges(&[MappedRange {
                memory: memory.memory,
                offset: memory.memory_offset,
                size: memory.capacity,
            }])?;
        }

        // SAFETY: the batch completed, so the device is done writing.
        let data = unsafe {
            std::slice::from_raw_parts(memory.mapped.as_ptr(), memory.capacity as usize)
        };
        self.parser.parse(data)
    }
}

impl BatchDebugger for ShaderTraceDebugger {
    fn on_begin(&self, batch: u32, flags: DebugFlags) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(slot) = slots.get_mut(batch as usize) else {
            return;
        };

        slot.enabled = flags.contains(DebugFlags::SHADER_TRACE);
        slot.cleared = false;
        if !slot.enabled || slot.buffer.is_some() {
            return;
        }

        match self
            .device
            .create_staging_buffer(self.buffer_size, StagingDirection::Readback)
        {
            Ok(memory) => slot.buffer = Some(memory),
            Err(e) => {
                log::warn!("failed to create shader trace buffer for batch {batch}: {e}");
                slot.enabled = false;
            }
        }
    }

    fn on_before_recording(&self, batch: u32, command_buffer: vk::CommandBuffer) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(slot) = slots.get_mut(batch as usize) else {
            return;
        };

        if let (true, false, Some(memory)) = (slot.enabled, slot.cleared, &slot.buffer) {
            self.device
                .fill_buffer(command_buffer, memory.buffer, 0, memory.capacity, 0);
            slot.cleared = true;
        }
    }

    fn on_complete(&self, batch: u32, name: &str, callback: &mut DebugCallback<'_>) {
        let lines = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(slot) = slots.get_mut(batch as usize) else {
                return;
            };

            let traced = std::mem::take(&mut slot.enabled) && std::mem::take(&mut slot.cleared);
            match (&slot.buffer, traced) {
                (Some(memory), true) => self.read(memory),
                _ => return,
            }
        };

        match lines {
            Ok(lines) if lines.is_empty() => {}
            Ok(lines) => callback(name, DebugOutput::ShaderTrace(&lines)),
            Err(e) => log::warn!("skipping shader trace of batch {batch} ({name}): {e}"),
        }
    }

    fn shutdown(&self) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        for slot in slots.iter_mut() {
            if let Some(memory) = slot.buffer.take() {
                self.device.destroy_staging_buffer(memory);
            }
        }
    }
}
