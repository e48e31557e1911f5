//! One-shot batch migration of historical events into a target sink.

use auel_core::normalize_event;
use auel_sink::{Outcome, SinkWriter};
use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::source::HistoricalEvent;

/// Running counts of terminal per-event states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MigrationTally {
    pub inserted: usize,
    pub skipped: usize,
    pub errored: usize,
}

/// Final report of one migration run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationSummary {
    pub run_id: Uuid,
    pub started_at: NaiveDateTime,
    pub finished_at: NaiveDateTime,
    pub total: usize,
    #[serde(flatten)]
    pub tally: MigrationTally,
}

/// Observes durability checkpoints during a migration run.
pub trait ProgressHook {
    /// Called after every batch boundary and once at the end of the
    /// sequence, with the number of events processed so far.
    fn checkpoint(&mut self, processed: usize, tally: &MigrationTally);
}

#[derive(Default)]
pub struct NoopProgress;

impl ProgressHook for NoopProgress {
    fn checkpoint(&mut self, _processed: usize, _tally: &MigrationTally) {}
}

pub struct Migrator {
    batch_size: usize,
}

impl Migrator {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    /// Migrate the ordered event sequence into `target`.
    ///
    /// Each event is normalized with its occurrence time as the clock, so a
    /// payload without a timestamp lands at the moment it originally fired.
    /// An individual failure is tallied and never stops the run; reruns are
    /// safe because duplicates resolve to `Skipped`.
    pub async fn migrate(
        &self,
        events: &[HistoricalEvent],
        target: &dyn SinkWriter,
        hook: &mut dyn ProgressHook,
    ) -> MigrationSummary {
        let run_id = Uuid::new_v4();
        let started_at = Local::now().naive_local();
        info!(%run_id, total = events.len(), target = target.sink_id(), "starting migration");

        let mut tally = MigrationTally::default();
        for (index, event) in events.iter().enumerate() {
            let record =
                normalize_event(&event.raw, event.occurred_at).with_source_id(event.source_id);
            match target.write(&record).await {
                Outcome::Success => tally.inserted += 1,
                Outcome::Skipped => tally.skipped += 1,
                Outcome::Failure(reason) => {
                    tally.errored += 1;
                    warn!(source_id = event.source_id, ?reason, "failed to migrate event");
                }
            }

            let processed = index + 1;
            if processed % self.batch_size == 0 || processed == events.len() {
                info!(
                    processed,
                    inserted = tally.inserted,
                    skipped = tally.skipped,
                    errored = tally.errored,
                    "migration checkpoint"
                );
                hook.checkpoint(processed, &tally);
            }
        }

        MigrationSummary {
            run_id,
            started_at,
            finished_at: Local::now().naive_local(),
            total: events.len(),
            tally,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use auel_core::CanonicalRecord;
    use auel_sink::{FailureReason, SinkError};
    use chrono::NaiveDate;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Succeeds for every record except the configured source ids.
    struct FlakySink {
        fail_ids: HashSet<i64>,
        seen: Mutex<Vec<Option<i64>>>,
    }

    impl FlakySink {
        fn new(fail_ids: impl IntoIterator<Item = i64>) -> Self {
            Self {
                fail_ids: fail_ids.into_iter().collect(),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SinkWriter for FlakySink {
        fn sink_id(&self) -> &str {
            "target"
        }

        async fn ensure_schema(&self) -> Result<(), SinkError> {
            Ok(())
        }

        async fn ping(&self) -> Result<(), SinkError> {
            Ok(())
        }

        async fn write(&self, record: &CanonicalRecord) -> Outcome {
            self.seen.lock().unwrap().push(record.source_id);
            match record.source_id {
                Some(id) if self.fail_ids.contains(&id) => {
                    Outcome::Failure(FailureReason::Unknown("boom".into()))
                }
                _ => Outcome::Success,
            }
        }
    }

    struct RecordingProgress {
        checkpoints: Vec<usize>,
    }

    impl ProgressHook for RecordingProgress {
        fn checkpoint(&mut self, processed: usize, _tally: &MigrationTally) {
            self.checkpoints.push(processed);
        }
    }

    fn mk_events(count: usize) -> Vec<HistoricalEvent> {
        let base = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        (0..count)
            .map(|i| HistoricalEvent {
                source_id: i as i64 + 1,
                occurred_at: base + chrono::Duration::seconds(i as i64),
                raw: auel_core::RawEvent::new(),
            })
            .collect()
    }

    #[tokio::test]
    async fn checkpoints_fire_at_batch_boundaries_and_the_end() {
        let sink = FlakySink::new([]);
        let mut progress = RecordingProgress {
            checkpoints: Vec::new(),
        };
        let summary = Migrator::new(100)
            .migrate(&mk_events(150), &sink, &mut progress)
            .await;

        assert_eq!(summary.total, 150);
        assert_eq!(summary.tally.inserted, 150);
        assert_eq!(summary.tally.skipped, 0);
        assert_eq!(summary.tally.errored, 0);
        assert_eq!(progress.checkpoints, vec![100, 150]);
    }

    #[tokio::test]
    async fn exact_batch_multiple_checkpoints_once_at_the_end() {
        let sink = FlakySink::new([]);
        let mut progress = RecordingProgress {
            checkpoints: Vec::new(),
        };
        Migrator::new(50)
            .migrate(&mk_events(100), &sink, &mut progress)
            .await;
        assert_eq!(progress.checkpoints, vec![50, 100]);
    }

    #[tokio::test]
    async fn individual_failures_do_not_stop_the_run() {
        let sink = FlakySink::new([2, 5]);
        let summary = Migrator::new(10)
            .migrate(&mk_events(6), &sink, &mut NoopProgress)
            .await;

        assert_eq!(summary.tally.inserted, 4);
        assert_eq!(summary.tally.errored, 2);
        assert_eq!(summary.tally.skipped, 0);
        // Every event was attempted, in source order.
        let seen = sink.seen.lock().unwrap();
        assert_eq!(*seen, (1..=6i64).map(Some).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn records_carry_their_source_id_and_occurrence_time() {
        let sink = FlakySink::new([]);
        let events = mk_events(1);
        Migrator::new(10)
            .migrate(&events, &sink, &mut NoopProgress)
            .await;
        assert_eq!(*sink.seen.lock().unwrap(), vec![Some(1)]);
    }

    #[tokio::test]
    async fn empty_source_yields_empty_summary() {
        let sink = FlakySink::new([]);
        let mut progress = RecordingProgress {
            checkpoints: Vec::new(),
        };
        let summary = Migrator::new(100)
            .migrate(&[], &sink, &mut progress)
            .await;
        assert_eq!(summary.total, 0);
        assert_eq!(summary.tally, MigrationTally::default());
        assert!(progress.checkpoints.is_empty());
    }
}
