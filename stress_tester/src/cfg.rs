#[derive(Debug, Clone, clap::Parser)]
pub struct Cfg {
    /// The kind of load to put on the queue.
    #[arg(value_enum, default_value_t = Workload::PushPop)]
    pub workload: Workload,
    /// Number of producers that will push entries to the queue.
    #[arg(short, long, default_value_t = 4)]
    pub producer_num: usize,
    /// Number of entries each producer will push during the test.
    #[arg(short, long, default_value_t = 100_000)]
    pub entry_num: usize,
    /// Number of consumers that will drain entries from the queue.
    #[arg(short, long, default_value_t = 1)]
    pub consumer_num: usize,
    /// Number of threads re-prioritizing or deleting whole groups (`mixed` workload only).
    #[arg(short, long, default_value_t = 1)]
    pub mutator_num: usize,
    /// Number of distinct group keys entries are spread over.
    #[arg(short, long, default_value_t = 64)]
    pub group_num: usize,
    /// Delay between the start of each drain interval.
    #[arg(long, default_value_t = 5)]
    pub drain_interval_ms: u64,
    /// Number of entries that will be drained per batch.
    #[arg(short = 'b', long, default_value_t = 100)]
    pub drain_batch_size: usize,
    /// Lowest priority a producer assigns (inclusive).
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub min_priority: i64,
    /// Highest priority a producer assigns (inclusive).
    #[arg(long, default_value_t = 1_000, allow_negative_numbers = true)]
    pub max_priority: i64,
    /// Hard cap on the test's execution time.
    #[arg(long, default_value_t = 10)]
    pub run_duration_seconds: u64,
}

#[derive(Debug, Clone, Copy, strum::Display, clap::ValueEnum)]
#[strum(serialize_all = "kebab-case")]
pub enum Workload {
    /// Producers push, consumers drain.
    PushPop,
    /// Like `push-pop`, plus mutators that update and delete by group key.
    Mixed,
}
