use serde::Deserialize;

use crate::error::ConfigError;

/// Tunables of the batching layer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Number of batch slots preallocated by the pool.
    pub max_batches: u32,
    /// Maximum number of batches a single batch may depend on.
    pub max_dependencies: usize,
    /// Maximum number of submissions in flight at once.
    pub max_submissions: usize,
    pub staging: StagingConfig,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batches: 64,
            max_dependencies: 8,
            max_submissions: 16,
            staging: StagingConfig::default(),
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batches == 0 {
            return Err(ConfigError::Zero("max_batches"));
        }
        if self.max_dependencies == 0 {
            return Err(ConfigError::Zero("max_dependencies"));
        }
        if self.max_submissions == 0 {
            return Err(ConfigError::Zero("max_submissions"));
        }
        self.staging.validate()
    }
}

/// Staging memory tunables, applied to each transfer direction separately.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
    /// Capacity of the first staging buffer of a batch.
    pub block_size: u64,
    /// Fixed capacity of a batch's staging arena.
    pub max_buffers_per_batch: usize,
    /// Maximum number of staging buffers alive across all batches.
    pub max_buffers: usize,
    /// Partial allocations smaller than `required / partial_min_divisor`
    /// are refused.
    pub partial_min_divisor: u64,
    /// A new buffer gets `block_size * (1 + count * numerator / denominator)`
    /// bytes, `count` being the number of buffers already in the arena. The
    /// growth factor is rounded down, so the defaults double the block every
    /// two buffers.
    pub growth_numerator: u64,
    pub growth_denominator: u64,
    /// Maximum number of mapped ranges per flush or invalidate call.
    pub max_ranges_per_call: usize,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            block_size: 256 << 10,
            max_buffers_per_batch: 8,
            max_buffers: 32,
            partial_min_divisor: 4,
            growth_numerator: 1,
            growth_denominator: 2,
            max_ranges_per_call: 16,
        }
    }
}

impl StagingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.block_size == 0, "staging.block_size"),
            (self.max_buffers_per_batch == 0, "staging.max_buffers_per_batch"),
            (self.max_buffers == 0, "staging.max_buffers"),
            (self.partial_min_divisor == 0, "staging.partial_min_divisor"),
            (self.growth_denominator == 0, "staging.growth_denominator"),
            (self.max_ranges_per_call == 0, "staging.max_ranges_per_call"),
        ];

        match checks.into_iter().find(|(zero, _)| *zero) {
            Some((_, field)) => Err(ConfigError::Zero(field)),
            None => Ok(()),
        }
    }

    /// Capacity of the next buffer added to an arena already holding `count`.
    pub fn buffer_capacity(&self, count: usize) -> u64 {
        let steps = count as u64 * self.growth_numerator / self.growth_denominator;
        self.block_size.saturating_mul(1 + steps)
    }

    /// Smallest partial allocation accepted for a request of `required` bytes.
    pub fn min_acceptable(&self, required: u64) -> u64 {
        (required / self.partial_min_divisor).max(1)
    }
}
