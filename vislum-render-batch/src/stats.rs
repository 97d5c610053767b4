/// Counters accumulated while completing batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub batches_completed: u64,
    pub command_buffers: u64,
    pub uploaded_bytes: u64,
    pub readback_bytes: u64,
    pub load_callbacks: u64,
    /// Sum of the reference counts dropped on the resource manager.
    pub released_resources: u64,
    pub destroyed_objects: u64,
}

impl BatchStats {
    pub fn merge(&mut self, other: &BatchStats) {
        self.batches_completed += other.batches_completed;
        self.command_buffers += other.command_buffers;
        self.uploaded_bytes += other.uploaded_bytes;
        self.readback_bytes += other.readback_bytes;
        self.load_callbacks += other.load_callbacks;
        self.released_resources += other.released_resources;
        self.destroyed_objects += other.destroyed_objects;
    }
}
