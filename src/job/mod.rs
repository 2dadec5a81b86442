//! In-process job runners.
//!
//! A small host that drives the connectors the way a compute framework
//! would: one tokio task per partition or split, bounded concurrency,
//! bounded per-task retry, and cooperative cancellation.

mod read;
mod write;

pub use read::ReadJob;
pub use write::{JobReport, WriteJob};

/// Tasks running at once unless configured otherwise.
pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 4;

/// Split `records` into `partitions` contiguous chunks of near-equal size.
pub fn partition<T>(records: Vec<T>, partitions: usize) -> Vec<Vec<T>> {
    let partitions = partitions.max(1);
    let base = records.len() / partitions;
    let extra = records.len() % partitions;

    let mut iter = records.into_iter();
    (0..partitions)
        .map(|i| {
            let size = base + usize::from(i < extra);
            iter.by_ref().take(size).collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_sizes() {
        let parts = partition((0..10).collect(), 3);
        assert_eq!(parts, vec![vec![0, 1, 2, 3], vec![4, 5, 6], vec![7, 8, 9]]);

        let parts = partition(vec![1, 2], 4);
        assert_eq!(parts.len(), 4);
        assert_eq!(parts.iter().map(Vec::len).sum::<usize>(), 2);

        assert_eq!(partition::<u8>(Vec::new(), 0), vec![Vec::<u8>::new()]);
    }
}
