use crate::models::{EventEnvelope, WorkbenchEvent};
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Default)]
struct BusState {
    seq: u64,
    subscribers: Vec<mpsc::UnboundedSender<EventEnvelope>>,
}

/// Fans workbench events out to every live subscriber. Subscribers whose
/// receiver was dropped are pruned on the next publish.
#[derive(Clone, Default)]
pub struct EventBus {
    state: Arc<Mutex<BusState>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<EventEnvelope> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.lock().subscribers.push(sender);
        receiver
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    pub fn publish(&self, event: WorkbenchEvent) -> EventEnvelope {
        let mut state = self.lock();
        state.seq += 1;
        let envelope = EventEnvelope {
            event_id: Uuid::new_v4().to_string(),
            seq: state.seq,
            timestamp: Utc::now(),
            event,
        };
        state
            .subscribers
            .retain(|subscriber| subscriber.send(envelope.clone()).is_ok());
        envelope
    }
}

#[cfg(test)]
mod tests {
    use super::EventBus;
    use crate::models::WorkbenchEvent;

    #[test]
    fn sequence_numbers_increase() {
        let bus = EventBus::new();
        let first = bus.publish(WorkbenchEvent::SessionCleared);
        let second = bus.publish(WorkbenchEvent::Disconnected);
        assert_eq!(first.seq + 1, second.seq);
        assert_ne!(first.event_id, second.event_id);
    }

    #[tokio::test]
    async fn every_subscriber_receives_events() {
        let bus = EventBus::new();
        let mut left = bus.subscribe();
        let mut right = bus.subscribe();
        bus.publish(WorkbenchEvent::Notification {
            title: "Export".to_string(),
            message: "no data".to_string(),
        });

        let received = left.recv().await.expect("left");
        assert!(matches!(received.event, WorkbenchEvent::Notification { .. }));
        assert_eq!(right.recv().await.expect("right").seq, received.seq);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);
        bus.publish(WorkbenchEvent::SessionCleared);
        assert_eq!(bus.subscriber_count(), 1);
        drop(kept);
    }
}
