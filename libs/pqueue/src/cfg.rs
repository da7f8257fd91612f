#[derive(Debug, Clone, Copy, Default)]
pub struct QueueCfg {
    /// Initial capacity of the queue. It will grow as needed as entries are added.
    /// # Note
    /// The queue is unbounded; this only avoids reallocations while it fills up.
    pub capacity: usize,
}
