//! Live fan-out of one incoming event to every configured sink.

use std::collections::BTreeMap;

use auel_core::{normalize_event, RawEvent};
use auel_sink::{Outcome, SinkWriter};
use chrono::{Local, NaiveDateTime};
use tracing::{info, warn};

/// Receives one raw event, normalizes it once, and writes the same record
/// to every configured sink independently.
pub struct Dispatcher {
    sinks: Vec<Box<dyn SinkWriter>>,
}

impl Dispatcher {
    /// Sinks execute in the order given here.
    pub fn new(sinks: Vec<Box<dyn SinkWriter>>) -> Self {
        Self { sinks }
    }

    /// Dispatch with the current local instant as the normalization clock.
    pub async fn dispatch(&self, raw: &RawEvent) -> BTreeMap<String, Outcome> {
        self.dispatch_at(raw, Local::now().naive_local()).await
    }

    /// Clock-injected variant of [`dispatch`](Self::dispatch).
    ///
    /// Never returns an error: the map always holds one entry per
    /// configured sink, and one sink's failure never prevents or alters
    /// another's write.
    pub async fn dispatch_at(
        &self,
        raw: &RawEvent,
        now: NaiveDateTime,
    ) -> BTreeMap<String, Outcome> {
        let record = normalize_event(raw, now);
        let mut outcomes = BTreeMap::new();
        for sink in &self.sinks {
            let outcome = sink.write(&record).await;
            match &outcome {
                Outcome::Failure(reason) => warn!(
                    sink = sink.sink_id(),
                    ?reason,
                    event_name = %record.event_name,
                    "sink write failed"
                ),
                _ => info!(
                    sink = sink.sink_id(),
                    app_name = %record.app_name,
                    event_name = %record.event_name,
                    "event stored"
                ),
            }
            outcomes.insert(sink.sink_id().to_string(), outcome);
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use auel_core::CanonicalRecord;
    use auel_sink::{FailureReason, SinkError};
    use chrono::NaiveDate;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    struct StaticSink {
        id: &'static str,
        outcome: Outcome,
        seen: Arc<Mutex<Vec<CanonicalRecord>>>,
    }

    impl StaticSink {
        fn new(id: &'static str, outcome: Outcome) -> (Self, Arc<Mutex<Vec<CanonicalRecord>>>) {
            let seen = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    id,
                    outcome,
                    seen: Arc::clone(&seen),
                },
                seen,
            )
        }
    }

    #[async_trait]
    impl SinkWriter for StaticSink {
        fn sink_id(&self) -> &str {
            self.id
        }

        async fn ensure_schema(&self) -> Result<(), SinkError> {
            Ok(())
        }

        async fn ping(&self) -> Result<(), SinkError> {
            Ok(())
        }

        async fn write(&self, record: &CanonicalRecord) -> Outcome {
            self.seen.lock().unwrap().push(record.clone());
            self.outcome.clone()
        }
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(10, 15, 30)
            .unwrap()
    }

    fn raw() -> RawEvent {
        match json!({"app_name": "Calendar", "event_name": "opened"}) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn one_failing_sink_does_not_affect_the_other() {
        let (failing, _) = StaticSink::new(
            "local",
            Outcome::Failure(FailureReason::Connectivity("refused".into())),
        );
        let (healthy, healthy_seen) = StaticSink::new("cloud", Outcome::Success);
        let dispatcher = Dispatcher::new(vec![Box::new(failing), Box::new(healthy)]);

        let outcomes = dispatcher.dispatch_at(&raw(), now()).await;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes["local"].is_failure());
        assert_eq!(outcomes["cloud"], Outcome::Success);
        assert_eq!(healthy_seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn every_sink_receives_the_same_record() {
        let (a, a_seen) = StaticSink::new("local", Outcome::Success);
        let (b, b_seen) = StaticSink::new("cloud", Outcome::Success);
        let dispatcher = Dispatcher::new(vec![Box::new(a), Box::new(b)]);

        dispatcher.dispatch_at(&raw(), now()).await;

        let a_records = a_seen.lock().unwrap();
        let b_records = b_seen.lock().unwrap();
        assert_eq!(*a_records, *b_records);
        assert_eq!(a_records[0].event_name, "opened");
        assert_eq!(a_records[0].source_id, None);
    }

    #[tokio::test]
    async fn outcome_map_is_complete_even_when_every_sink_fails() {
        let (a, _) = StaticSink::new(
            "local",
            Outcome::Failure(FailureReason::Unknown("boom".into())),
        );
        let (b, _) = StaticSink::new(
            "cloud",
            Outcome::Failure(FailureReason::Connectivity("refused".into())),
        );
        let dispatcher = Dispatcher::new(vec![Box::new(a), Box::new(b)]);

        let outcomes = dispatcher.dispatch_at(&raw(), now()).await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.values().all(Outcome::is_failure));
    }
}
