use coachline_shared::ReservationEvent;

/// Where the engine sends its events.
///
/// `publish` must not block: implementations hand the event off (channel,
/// spawned task) and return. Delivery is best effort.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: ReservationEvent);
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: ReservationEvent) {}
}
