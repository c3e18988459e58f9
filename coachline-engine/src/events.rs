use coachline_core::EventSink;
use coachline_shared::ReservationEvent;
use std::sync::Arc;
use tokio::sync::broadcast;

/// In-process fan-out of reservation events over a tokio broadcast channel.
///
/// Publishing never waits: with no subscribers the event is dropped, and a
/// subscriber that falls behind by more than the capacity sees `Lagged`.
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<ReservationEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReservationEvent> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, event: ReservationEvent) {
        // Err only means nobody is listening right now.
        let _ = self.tx.send(event);
    }
}

/// Hands every event to each inner sink in turn.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn publish(&self, event: ReservationEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.publish(event.clone());
            }
            last.publish(event);
        }
    }
}
