use crate::services::clock::Clock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use utoipa::ToSchema;

/// Event name every progress notification is published under.
pub const UPLOAD_PROGRESS_EVENT: &str = "file-upload";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub filename: String,
    pub processed_already: u64,
}

/// Narrow publish capability. Implementations must not block.
pub trait ProgressPublisher: Send + Sync {
    fn publish(&self, channel_id: &str, event_name: &str, payload: &ProgressEvent);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressNotice {
    pub channel_id: String,
    pub event_name: String,
    pub payload: ProgressEvent,
}

/// In-process hub; transports subscribe and forward notices to their clients.
pub struct BroadcastPublisher {
    tx: broadcast::Sender<ProgressNotice>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressNotice> {
        self.tx.subscribe()
    }
}

impl ProgressPublisher for BroadcastPublisher {
    fn publish(&self, channel_id: &str, event_name: &str, payload: &ProgressEvent) {
        let notice = ProgressNotice {
            channel_id: channel_id.to_string(),
            event_name: event_name.to_string(),
            payload: payload.clone(),
        };
        if self.tx.send(notice).is_err() {
            tracing::trace!("No subscribers for progress channel {}", channel_id);
        }
    }
}

/// True once at least `interval_ms` has passed since `last_ms`. Equality qualifies.
pub fn can_execute(now_ms: u64, last_ms: u64, interval_ms: u64) -> bool {
    now_ms.saturating_sub(last_ms) >= interval_ms
}

/// Counts bytes for one file and rate-limits the notifications about them.
///
/// The throttler never sees the bytes themselves, only their lengths, so the
/// stage it sits in stays byte-transparent.
pub struct ProgressThrottler {
    channel_id: String,
    filename: String,
    interval_ms: u64,
    running_total: u64,
    last_emit_ms: u64,
    last_published: Option<u64>,
    clock: Arc<dyn Clock>,
    publisher: Arc<dyn ProgressPublisher>,
}

impl ProgressThrottler {
    pub fn new(
        channel_id: impl Into<String>,
        filename: impl Into<String>,
        interval_ms: u64,
        clock: Arc<dyn Clock>,
        publisher: Arc<dyn ProgressPublisher>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            filename: filename.into(),
            interval_ms,
            running_total: 0,
            last_emit_ms: 0,
            last_published: None,
            clock,
            publisher,
        }
    }

    /// Accounts for one chunk and publishes if the throttle window has elapsed.
    pub fn record(&mut self, chunk_len: usize) -> u64 {
        self.running_total += chunk_len as u64;

        let now = self.clock.now_ms();
        if can_execute(now, self.last_emit_ms, self.interval_ms) {
            self.last_emit_ms = now;
            self.emit();
        }

        self.running_total
    }

    /// Publishes the final total unless it is already the last value sent.
    pub fn flush(&mut self) {
        if self.last_published != Some(self.running_total) {
            self.last_emit_ms = self.clock.now_ms();
            self.emit();
        }
    }

    pub fn last_emit_ms(&self) -> u64 {
        self.last_emit_ms
    }

    fn emit(&mut self) {
        let event = ProgressEvent {
            filename: self.filename.clone(),
            processed_already: self.running_total,
        };
        tracing::debug!(
            channel = %self.channel_id,
            filename = %event.filename,
            processed = event.processed_already,
            "Publishing upload progress"
        );
        self.publisher
            .publish(&self.channel_id, UPLOAD_PROGRESS_EVENT, &event);
        self.last_published = Some(self.running_total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::ManualClock;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPublisher {
        sent: Mutex<Vec<(String, String, ProgressEvent)>>,
    }

    impl ProgressPublisher for RecordingPublisher {
        fn publish(&self, channel_id: &str, event_name: &str, payload: &ProgressEvent) {
            self.sent.lock().unwrap().push((
                channel_id.to_string(),
                event_name.to_string(),
                payload.clone(),
            ));
        }
    }

    fn throttler(
        interval_ms: u64,
        clock: Arc<ManualClock>,
        publisher: Arc<RecordingPublisher>,
    ) -> ProgressThrottler {
        ProgressThrottler::new("01", "filename.avi", interval_ms, clock, publisher)
    }

    #[test]
    fn test_can_execute_is_boundary_inclusive() {
        assert!(can_execute(3_000, 0, 1_000));
        assert!(can_execute(1_000, 0, 1_000));
        assert!(!can_execute(999, 0, 1_000));
    }

    #[test]
    fn test_can_execute_false_when_last_is_in_the_future() {
        assert!(!can_execute(2_000, 3_000, 1_000));
    }

    #[test]
    fn test_emits_once_per_window() {
        let clock = Arc::new(ManualClock::new(0));
        let publisher = Arc::new(RecordingPublisher::default());
        let mut throttler = throttler(2_000, clock.clone(), publisher.clone());

        clock.set(2_000);
        throttler.record("hello".len());
        clock.set(3_000);
        throttler.record("hello".len());
        clock.set(4_000);
        throttler.record("world".len());

        let sent = publisher.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, "01");
        assert_eq!(sent[0].1, UPLOAD_PROGRESS_EVENT);
        assert_eq!(
            sent[0].2,
            ProgressEvent {
                filename: "filename.avi".to_string(),
                processed_already: 5,
            }
        );
        assert_eq!(sent[1].2.processed_already, 15);
        assert_eq!(throttler.last_emit_ms(), 4_000);
    }

    #[test]
    fn test_zero_interval_emits_every_chunk() {
        let clock = Arc::new(ManualClock::new(0));
        let publisher = Arc::new(RecordingPublisher::default());
        let mut throttler = throttler(0, clock, publisher.clone());

        for chunk in ["chunk", "of", "data"] {
            throttler.record(chunk.len());
        }

        let totals: Vec<u64> = publisher
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, e)| e.processed_already)
            .collect();
        assert_eq!(totals, vec![5, 7, 11]);
    }

    #[test]
    fn test_flush_reports_final_total_once() {
        let clock = Arc::new(ManualClock::new(0));
        let publisher = Arc::new(RecordingPublisher::default());
        let mut throttler = throttler(10_000, clock.clone(), publisher.clone());

        clock.set(10_000);
        throttler.record(4);
        clock.set(10_001);
        throttler.record(6);
        throttler.flush();
        throttler.flush();

        let totals: Vec<u64> = publisher
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, e)| e.processed_already)
            .collect();
        assert_eq!(totals, vec![4, 10]);
    }

    #[test]
    fn test_flush_skips_when_last_chunk_was_published() {
        let clock = Arc::new(ManualClock::new(0));
        let publisher = Arc::new(RecordingPublisher::default());
        let mut throttler = throttler(0, clock, publisher.clone());

        throttler.record(3);
        throttler.flush();

        assert_eq!(publisher.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_progress_event_uses_camel_case() {
        let event = ProgressEvent {
            filename: "a.txt".to_string(),
            processed_already: 42,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["processedAlready"], 42);
        assert_eq!(json["filename"], "a.txt");
    }

    #[tokio::test]
    async fn test_broadcast_publisher_delivers_to_subscribers() {
        let hub = BroadcastPublisher::new(16);
        let mut rx = hub.subscribe();
        let event = ProgressEvent {
            filename: "a.txt".to_string(),
            processed_already: 1,
        };

        hub.publish("room-1", UPLOAD_PROGRESS_EVENT, &event);

        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.channel_id, "room-1");
        assert_eq!(notice.event_name, UPLOAD_PROGRESS_EVENT);
        assert_eq!(notice.payload, event);
    }
}
