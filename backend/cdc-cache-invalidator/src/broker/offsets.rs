use std::collections::BTreeMap;
use tracing::warn;

use super::ConsumedRecord;

/// Highest marked offset of one partition and whether it reached the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionCursor {
    pub offset: i64,
    pub committed: bool,
}

impl PartitionCursor {
    /// Position reported to the group coordinator: the next offset to read.
    pub fn commit_position(&self) -> i64 {
        self.offset + 1
    }
}

/// Marked-offset bookkeeping per (topic, partition).
///
/// Marks only move forward. A commit covers exactly what was marked, so
/// records that were never marked are redelivered after a restart.
#[derive(Debug, Default)]
pub struct OffsetTracker {
    cursors: BTreeMap<(String, i32), PartitionCursor>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `record` as fully handled. Returns false for a stale or repeated mark.
    pub fn mark(&mut self, record: &ConsumedRecord) -> bool {
        let key = (record.topic.clone(), record.partition);
        match self.cursors.get_mut(&key) {
            Some(cursor) if record.offset <= cursor.offset => {
                warn!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    cursor = cursor.offset,
                    "Ignoring mark at or below the partition cursor"
                );
                false
            }
            Some(cursor) => {
                cursor.offset = record.offset;
                cursor.committed = false;
                true
            }
            None => {
                self.cursors.insert(
                    key,
                    PartitionCursor {
                        offset: record.offset,
                        committed: false,
                    },
                );
                true
            }
        }
    }

    /// Cursors marked since the last successful commit.
    pub fn pending(&self) -> Vec<(String, i32, i64)> {
        self.cursors
            .iter()
            .filter(|(_, cursor)| !cursor.committed)
            .map(|((topic, partition), cursor)| (topic.clone(), *partition, cursor.offset))
            .collect()
    }

    /// Flag the given cursors as committed. Cursors that moved on since the
    /// snapshot was taken stay pending.
    pub fn committed(&mut self, snapshot: &[(String, i32, i64)]) {
        for (topic, partition, offset) in snapshot {
            if let Some(cursor) = self.cursors.get_mut(&(topic.clone(), *partition)) {
                if cursor.offset == *offset {
                    cursor.committed = true;
                }
            }
        }
    }

    pub fn cursor(&self, topic: &str, partition: i32) -> Option<PartitionCursor> {
        self.cursors.get(&(topic.to_string(), partition)).copied()
    }

    /// Forget a partition this member no longer owns, returning its last cursor.
    pub fn revoke(&mut self, topic: &str, partition: i32) -> Option<PartitionCursor> {
        self.cursors.remove(&(topic.to_string(), partition))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(partition: i32, offset: i64) -> ConsumedRecord {
        ConsumedRecord {
            topic: "cdc.public.sinners".to_string(),
            partition,
            offset,
            key: None,
            payload: None,
            timestamp_ms: None,
        }
    }

    #[test]
    fn test_marks_move_forward_only() {
        let mut tracker = OffsetTracker::new();

        assert!(tracker.mark(&record(0, 10)));
        assert!(tracker.mark(&record(0, 11)));
        assert!(!tracker.mark(&record(0, 11)));
        assert!(!tracker.mark(&record(0, 3)));

        let cursor = tracker.cursor("cdc.public.sinners", 0).unwrap();
        assert_eq!(cursor.offset, 11);
        assert_eq!(cursor.commit_position(), 12);
    }

    #[test]
    fn test_partitions_are_independent() {
        let mut tracker = OffsetTracker::new();
        tracker.mark(&record(0, 5));
        tracker.mark(&record(1, 2));

        let pending = tracker.pending();
        assert_eq!(
            pending,
            vec![
                ("cdc.public.sinners".to_string(), 0, 5),
                ("cdc.public.sinners".to_string(), 1, 2),
            ]
        );
    }

    #[test]
    fn test_commit_clears_pending() {
        let mut tracker = OffsetTracker::new();
        tracker.mark(&record(0, 5));
        let snapshot = tracker.pending();

        tracker.committed(&snapshot);
        assert!(tracker.pending().is_empty());

        tracker.mark(&record(0, 6));
        assert_eq!(tracker.pending().len(), 1);
    }

    #[test]
    fn test_cursor_advanced_during_commit_stays_pending() {
        let mut tracker = OffsetTracker::new();
        tracker.mark(&record(0, 5));
        let snapshot = tracker.pending();

        tracker.mark(&record(0, 6));
        tracker.committed(&snapshot);

        assert_eq!(tracker.pending(), vec![("cdc.public.sinners".to_string(), 0, 6)]);
    }

    #[test]
    fn test_revoke_forgets_partition() {
        let mut tracker = OffsetTracker::new();
        tracker.mark(&record(3, 40));
        let last = tracker.revoke("cdc.public.sinners", 3).unwrap();

        assert_eq!(last.offset, 40);
        assert!(!last.committed);
        assert!(tracker.cursor("cdc.public.sinners", 3).is_none());
        assert!(tracker.mark(&record(3, 1)));
    }
}
