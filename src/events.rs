//! Fan-out of pipeline events to subscribers.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;

use serde::Serialize;

use crate::alerts::AlertEvent;
use crate::detect::DetectionResult;

/// Result batch for one processed frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrameReport {
    /// Admission order, starting at 1 for each session.
    pub sequence: u64,
    pub results: Vec<DetectionResult>,
    /// Results came from the synthetic fallback, not a model.
    pub synthetic: bool,
    pub latency_ms: u64,
    /// Polling interval after adaptation.
    pub interval_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum PipelineEvent {
    Frame(FrameReport),
    Alert(AlertEvent),
}

/// Broadcasts events over `mpsc` channels; dead subscribers are dropped on send.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<PipelineEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<PipelineEvent> {
        let (tx, rx) = channel();
        self.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: PipelineEvent) {
        let mut subscribers = self.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Sender<PipelineEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertSeverity;

    #[test]
    fn every_subscriber_receives_events() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();
        bus.publish(PipelineEvent::Alert(AlertEvent::new(1, "hi", AlertSeverity::Info)));
        assert!(matches!(a.try_recv(), Ok(PipelineEvent::Alert(_))));
        assert!(matches!(b.try_recv(), Ok(PipelineEvent::Alert(_))));
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let keep = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);
        bus.publish(PipelineEvent::Alert(AlertEvent::memory_warning(0)));
        assert_eq!(bus.subscriber_count(), 1);
        assert!(keep.try_recv().is_ok());
    }
}
