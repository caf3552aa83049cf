//! Throttling for training-progress writes.

use crate::agents::types::TrainingStats;

/// Decides which training snapshots are worth persisting.
///
/// The first snapshot and the final epoch are always written; in between,
/// a write happens once at least `every_epochs` epochs have passed since the
/// last one.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    every_epochs: u32,
    last_written: Option<u32>,
}

impl ProgressThrottle {
    pub fn new(every_epochs: u32) -> Self {
        Self {
            every_epochs: every_epochs.max(1),
            last_written: None,
        }
    }

    /// Returns whether `stats` should be written, recording it if so.
    pub fn should_write(&mut self, stats: &TrainingStats) -> bool {
        let write = match self.last_written {
            None => true,
            Some(last) if stats.current_epoch <= last => false,
            Some(_) if stats.is_finished() => true,
            Some(last) => stats.current_epoch - last >= self.every_epochs,
        };
        if write {
            self.last_written = Some(stats.current_epoch);
        }
        write
    }

    pub fn last_written(&self) -> Option<u32> {
        self.last_written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::types::EpochMetrics;

    fn written_epochs(total: u32, every: u32) -> Vec<u32> {
        let mut throttle = ProgressThrottle::new(every);
        let mut stats = TrainingStats::new(total);
        let mut written = Vec::new();
        for epoch in 1..=total {
            stats.record(EpochMetrics {
                epoch,
                loss: 0.1,
                accuracy: 0.9,
            });
            if throttle.should_write(&stats) {
                written.push(epoch);
            }
        }
        written
    }

    #[test]
    fn test_every_fifth_epoch_plus_first_and_last() {
        assert_eq!(written_epochs(12, 5), vec![1, 6, 11, 12]);
    }

    #[test]
    fn test_every_epoch() {
        assert_eq!(written_epochs(4, 1), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_zero_interval_behaves_like_one() {
        assert_eq!(written_epochs(3, 0), vec![1, 2, 3]);
    }

    #[test]
    fn test_repeated_snapshot_not_rewritten() {
        let mut throttle = ProgressThrottle::new(1);
        let mut stats = TrainingStats::new(10);
        stats.record(EpochMetrics {
            epoch: 1,
            loss: 0.1,
            accuracy: 0.9,
        });
        assert!(throttle.should_write(&stats));
        assert!(!throttle.should_write(&stats));
        assert_eq!(throttle.last_written(), Some(1));
    }
}
