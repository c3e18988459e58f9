use std::sync::Arc;
use coachline_engine::{BroadcastSink, ReservationEngine};

use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ReservationEngine>,
    /// Same sink the engine publishes to; SSE clients subscribe here.
    pub events: BroadcastSink,
    pub metrics: Arc<Metrics>,
}
