mod cfg;
mod entry;
mod error;
mod heap;
mod queue;

// region:    --- Exports
pub use cfg::QueueCfg;
pub use entry::Entry;
pub use error::{QueueError, Result};
pub use queue::PriorityQueue;
// endregion: --- Exports
