use std::cmp::Ordering;

/// The unit stored in a [`crate::PriorityQueue`].
///
/// `primary_key` identifies a single entry (duplicates are allowed, lookups resolve to the first
/// match), `group_key` batch-targets every entry that shares it. The payload is never inspected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry<P> {
    pub primary_key: String,
    pub group_key: String,
    pub payload: P,
    pub priority: i64,
}

impl<P> Entry<P> {
    pub fn new(primary_key: &str, group_key: &str, payload: P, priority: i64) -> Self {
        Self {
            primary_key: primary_key.to_string(),
            group_key: group_key.to_string(),
            payload,
            priority,
        }
    }

    /// Priority comparison used by the heap: [`Ordering::Greater`] means `self` is more urgent.
    pub(crate) fn urgency(&self, other: &Self) -> Ordering {
        self.priority.cmp(&other.priority)
    }
}

impl Entry<()> {
    pub fn without_payload(primary_key: &str, group_key: &str, priority: i64) -> Self {
        Self::new(primary_key, group_key, (), priority)
    }
}
