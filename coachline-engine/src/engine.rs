use chrono::{DateTime, Utc};
use coachline_catalog::{
    pricing, GroupTransition, HoldToken, NewTrip, Seat, SeatChange, SeatState, SeatStatus, Transition, Trip,
};
use coachline_core::{
    BookingReceipt, BookingRecord, BookingRepository, Clock, EventSink, NullSink, RepoResult, ReservationError,
    ReservationResult, SystemClock, TripRepository,
};
use coachline_shared::models::events::{
    HoldExpiredEvent, OperationFailedEvent, SeatHeldEvent, SeatReleasedEvent, SeatsSoldEvent,
};
use coachline_shared::ReservationEvent;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::{HoldReceipt, PurchaseRequest, ReleaseOutcome, ReservationPolicy, SweepReport, TripQuery};

/// Everything one trip's critical section protects.
struct TripSlot {
    trip: Trip,
    /// Receipts of purchases made with an idempotency key.
    receipts: HashMap<String, KeyedReceipt>,
}

struct KeyedReceipt {
    fingerprint: PurchaseFingerprint,
    receipt: BookingReceipt,
}

/// What a retry has to repeat for an idempotency key to replay.
#[derive(Debug, PartialEq, Eq)]
struct PurchaseFingerprint {
    seat_ids: Vec<Uuid>,
    name: String,
    email: String,
}

impl PurchaseFingerprint {
    fn of(request: &PurchaseRequest) -> Self {
        let mut seat_ids = request.seat_ids.clone();
        seat_ids.sort_unstable();
        Self {
            seat_ids,
            name: request.passenger.name.trim().to_string(),
            email: request.passenger.email.expose().trim().to_ascii_lowercase(),
        }
    }
}

type SharedSlot = Arc<Mutex<TripSlot>>;

/// Serialization point for every seat mutation.
///
/// Each trip has its own mutex; hold, release, purchase and the expiry sweep
/// all take it before touching seats, so operations on one trip are applied
/// one at a time while different trips proceed in parallel. Events are handed
/// to the sink before the trip's lock is released, so subscribers see one
/// trip's events in commit order. Repositories are only called after the lock
/// has been released.
pub struct ReservationEngine {
    trips: RwLock<HashMap<Uuid, SharedSlot>>,
    policy: ReservationPolicy,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    trip_repo: Option<Arc<dyn TripRepository>>,
    booking_repo: Option<Arc<dyn BookingRepository>>,
}

pub struct ReservationEngineBuilder {
    policy: ReservationPolicy,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    trip_repo: Option<Arc<dyn TripRepository>>,
    booking_repo: Option<Arc<dyn BookingRepository>>,
}

impl Default for ReservationEngineBuilder {
    fn default() -> Self {
        Self {
            policy: ReservationPolicy::default(),
            clock: Arc::new(SystemClock),
            sink: Arc::new(NullSink),
            trip_repo: None,
            booking_repo: None,
        }
    }
}

impl ReservationEngineBuilder {
    pub fn policy(mut self, policy: ReservationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn trip_repository(mut self, repo: Arc<dyn TripRepository>) -> Self {
        self.trip_repo = Some(repo);
        self
    }

    pub fn booking_repository(mut self, repo: Arc<dyn BookingRepository>) -> Self {
        self.booking_repo = Some(repo);
        self
    }

    pub fn build(self) -> ReservationEngine {
        ReservationEngine {
            trips: RwLock::new(HashMap::new()),
            policy: self.policy,
            clock: self.clock,
            sink: self.sink,
            trip_repo: self.trip_repo,
            booking_repo: self.booking_repo,
        }
    }
}

impl Default for ReservationEngine {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ReservationEngine {
    pub fn builder() -> ReservationEngineBuilder {
        ReservationEngineBuilder::default()
    }

    pub fn policy(&self) -> &ReservationPolicy {
        &self.policy
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Lay out a new trip with every seat available and start accepting
    /// reservations for it.
    pub async fn create_trip(&self, new_trip: NewTrip) -> ReservationResult<Trip> {
        let trip = Trip::new(new_trip, self.clock.now()).map_err(|e| ReservationError::from_inventory(Uuid::nil(), e))?;
        self.register(trip.clone()).await;

        info!(
            trip_id = %trip.id,
            from = %trip.from,
            to = %trip.to,
            seats = trip.total_seats(),
            "Trip created"
        );

        if let Some(repo) = &self.trip_repo {
            if let Err(e) = repo.create_trip(&trip).await {
                error!(trip_id = %trip.id, "Failed to persist trip: {}", e);
            }
        }

        Ok(trip)
    }

    /// Make an existing trip known to the engine. A trip already registered
    /// under the same id is replaced.
    pub async fn register(&self, trip: Trip) {
        let slot = TripSlot {
            trip,
            receipts: HashMap::new(),
        };
        let id = slot.trip.id;
        self.trips.write().await.insert(id, Arc::new(Mutex::new(slot)));
    }

    /// Load every stored trip and re-apply its recorded bookings.
    pub async fn bootstrap(&self) -> RepoResult<usize> {
        let Some(repo) = &self.trip_repo else {
            return Ok(0);
        };

        let trips = repo.list_trips().await?;
        let count = trips.len();

        for mut trip in trips {
            if let Some(bookings) = &self.booking_repo {
                for record in bookings.list_bookings(trip.id).await? {
                    restore_booking(&mut trip, record);
                }
            }
            self.register(trip).await;
        }

        info!(trips = count, "Reservation engine bootstrapped");
        Ok(count)
    }

    pub async fn trip(&self, trip_id: Uuid) -> ReservationResult<Trip> {
        let slot = self.slot(trip_id).await?;
        let guard = slot.lock().await;
        Ok(guard.trip.clone())
    }

    pub async fn seat(&self, trip_id: Uuid, seat_id: Uuid) -> ReservationResult<Seat> {
        let slot = self.slot(trip_id).await?;
        let guard = slot.lock().await;
        guard
            .trip
            .seats
            .find(&seat_id)
            .cloned()
            .ok_or(ReservationError::SeatNotFound { trip_id, seat_id })
    }

    pub async fn available_seats(&self, trip_id: Uuid) -> ReservationResult<usize> {
        let slot = self.slot(trip_id).await?;
        let guard = slot.lock().await;
        Ok(guard.trip.available_seats())
    }

    /// Trips matching `query`, earliest departure first.
    pub async fn list_trips(&self, query: &TripQuery) -> Vec<Trip> {
        let mut trips = Vec::new();
        for slot in self.slots().await {
            let guard = slot.lock().await;
            if query.matches(&guard.trip) {
                trips.push(guard.trip.clone());
            }
        }
        trips.sort_by_key(|t| (t.departure(), t.created_at));
        trips
    }

    /// Price of a seat selection at current seat prices.
    pub async fn quote(&self, trip_id: Uuid, seat_ids: &[Uuid]) -> ReservationResult<i64> {
        let slot = self.slot(trip_id).await?;
        let guard = slot.lock().await;
        pricing::quote_cents(&guard.trip.seats, seat_ids).map_err(|e| ReservationError::from_inventory(trip_id, e))
    }

    /// Bookings stored for a trip. Empty when no booking repository is wired.
    pub async fn bookings(&self, trip_id: Uuid) -> RepoResult<Vec<BookingRecord>> {
        match &self.booking_repo {
            Some(repo) => repo.list_bookings(trip_id).await,
            None => Ok(Vec::new()),
        }
    }

    /// Claim an available seat until `now + hold_duration`.
    ///
    /// The returned token identifies the requester; pass it to release or
    /// purchase to prove ownership. A caller-supplied token is kept as is.
    pub async fn hold(&self, trip_id: Uuid, seat_id: Uuid, token: Option<HoldToken>) -> ReservationResult<HoldReceipt> {
        match self.slot(trip_id).await {
            Ok(slot) => {
                let mut guard = slot.lock().await;
                let now = self.clock.now();
                let mut events = expire_elapsed(&mut guard.trip, now);
                let outcome = self.hold_locked(&mut guard.trip, seat_id, token.unwrap_or_default(), now, &mut events);
                self.finish("hold", trip_id, events, outcome)
            }
            Err(e) => self.finish("hold", trip_id, Vec::new(), Err(e)),
        }
    }

    fn hold_locked(
        &self,
        trip: &mut Trip,
        seat_id: Uuid,
        token: HoldToken,
        now: DateTime<Utc>,
        events: &mut Vec<ReservationEvent>,
    ) -> ReservationResult<HoldReceipt> {
        let trip_id = trip.id;
        self.check_window(trip, now)?;

        let expires_at = now + self.policy.hold_duration;
        let next = SeatState::Held { expires_at, token };
        let transition = trip
            .seats
            .apply_transition(&seat_id, SeatStatus::Available, next)
            .map_err(|e| ReservationError::from_inventory(trip_id, e))?;
        let seat_number = seat_number_of(trip, &seat_id);

        match transition {
            Transition::Applied { .. } => {
                let available_seats = trip.available_seats();
                info!(%trip_id, seat_number, %expires_at, available_seats, "Seat held");
                events.push(ReservationEvent::SeatHeld(SeatHeldEvent {
                    trip_id,
                    seat_id,
                    seat_number,
                    hold_expiry: expires_at,
                    held_at: now,
                    available_seats,
                }));
                Ok(HoldReceipt {
                    trip_id,
                    seat_id,
                    seat_number,
                    hold_expiry: expires_at,
                    hold_token: token,
                })
            }
            Transition::Conflict { actual: SeatStatus::Sold } => Err(ReservationError::SeatUnavailable { seat_number }),
            Transition::Conflict { .. } => Err(ReservationError::SeatConflict { seat_number }),
        }
    }

    /// Give a held seat back. Releasing a seat that is already available is
    /// a no-op; releasing a sold seat is always an error.
    pub async fn release(
        &self,
        trip_id: Uuid,
        seat_id: Uuid,
        token: Option<HoldToken>,
    ) -> ReservationResult<ReleaseOutcome> {
        match self.slot(trip_id).await {
            Ok(slot) => {
                let mut guard = slot.lock().await;
                let now = self.clock.now();
                let mut events = expire_elapsed(&mut guard.trip, now);
                let outcome = release_locked(&mut guard.trip, seat_id, token, now, &mut events);
                self.finish("release", trip_id, events, outcome)
            }
            Err(e) => self.finish("release", trip_id, Vec::new(), Err(e)),
        }
    }

    /// Sell every requested seat to one passenger, or none of them.
    pub async fn purchase(&self, request: PurchaseRequest) -> ReservationResult<BookingReceipt> {
        let trip_id = request.trip_id;
        if let Err(e) = self.validate_purchase(&request) {
            return self.finish("purchase", trip_id, Vec::new(), Err(e));
        }

        let outcome = match self.slot(trip_id).await {
            Ok(slot) => {
                let mut guard = slot.lock().await;
                let now = self.clock.now();
                let mut events = expire_elapsed(&mut guard.trip, now);
                let outcome = self.purchase_locked(&mut guard, request, now, &mut events);
                self.finish("purchase", trip_id, events, outcome)
            }
            Err(e) => self.finish("purchase", trip_id, Vec::new(), Err(e)),
        };

        // Lock released; storage may be slow.
        let receipt = match outcome? {
            PurchaseOutcome::Replayed(receipt) => return Ok(receipt),
            PurchaseOutcome::Committed(record) => {
                let receipt = record.receipt();
                self.persist_booking(&record).await;
                receipt
            }
        };
        Ok(receipt)
    }

    fn validate_purchase(&self, request: &PurchaseRequest) -> ReservationResult<()> {
        if request.seat_ids.is_empty() {
            return Err(ReservationError::EmptyOrInvalidSeatSet);
        }
        let unique: HashSet<&Uuid> = request.seat_ids.iter().collect();
        if unique.len() != request.seat_ids.len() {
            return Err(ReservationError::EmptyOrInvalidSeatSet);
        }
        if request.seat_ids.len() > self.policy.max_seats_per_booking {
            return Err(ReservationError::TooManySeats {
                requested: request.seat_ids.len(),
                limit: self.policy.max_seats_per_booking,
            });
        }
        request.passenger.validate()
    }

    fn purchase_locked(
        &self,
        slot: &mut TripSlot,
        request: PurchaseRequest,
        now: DateTime<Utc>,
        events: &mut Vec<ReservationEvent>,
    ) -> ReservationResult<PurchaseOutcome> {
        let trip_id = slot.trip.id;

        let fingerprint = PurchaseFingerprint::of(&request);
        if let Some(key) = &request.idempotency_key {
            if let Some(stored) = slot.receipts.get(key) {
                if stored.fingerprint != fingerprint {
                    return Err(ReservationError::IdempotencyKeyReused { key: key.clone() });
                }
                debug!(%trip_id, booking_id = %stored.receipt.booking_id, "Replaying idempotent purchase");
                return Ok(PurchaseOutcome::Replayed(stored.receipt.clone()));
            }
        }

        let trip = &mut slot.trip;
        self.check_window(trip, now)?;

        let booking_id = Uuid::new_v4();
        let passenger = request.passenger.into_passenger(booking_id, now);
        let mut changes = Vec::with_capacity(request.seat_ids.len());
        let mut seat_numbers = Vec::with_capacity(request.seat_ids.len());

        for seat_id in &request.seat_ids {
            let seat = trip
                .seats
                .find(seat_id)
                .ok_or(ReservationError::SeatNotFound { trip_id, seat_id: *seat_id })?;
            match seat.state() {
                SeatState::Sold { .. } => {
                    return Err(ReservationError::SeatConflict { seat_number: seat.number });
                }
                SeatState::Held { token, .. } if request.hold_token.is_some_and(|t| t != *token) => {
                    return Err(ReservationError::HoldNotOwned { seat_number: seat.number });
                }
                _ => {}
            }
            seat_numbers.push(seat.number);
            changes.push(SeatChange {
                seat_id: *seat_id,
                expected: seat.status(),
                next: SeatState::Sold {
                    passenger: passenger.clone(),
                },
            });
        }

        let total_cents = pricing::quote_cents(&trip.seats, &request.seat_ids)
            .map_err(|e| ReservationError::from_inventory(trip_id, e))?;

        match trip
            .seats
            .apply_group(changes)
            .map_err(|e| ReservationError::from_inventory(trip_id, e))?
        {
            GroupTransition::Applied { .. } => {}
            GroupTransition::Conflict { seat_id, .. } => {
                return Err(ReservationError::SeatConflict {
                    seat_number: seat_number_of(trip, &seat_id),
                });
            }
        }

        let available_seats = trip.available_seats();
        info!(%trip_id, %booking_id, seats = ?seat_numbers, total_cents, available_seats, "Seats sold");
        events.push(ReservationEvent::SeatsSold(SeatsSoldEvent {
            trip_id,
            booking_id,
            seat_numbers: seat_numbers.clone(),
            total_cents,
            sold_at: now,
            available_seats,
        }));

        let record = BookingRecord {
            booking_id,
            trip_id,
            seat_ids: request.seat_ids,
            seat_numbers,
            passenger,
            total_cents,
        };
        if let Some(key) = request.idempotency_key {
            slot.receipts.insert(
                key,
                KeyedReceipt {
                    fingerprint,
                    receipt: record.receipt(),
                },
            );
        }
        Ok(PurchaseOutcome::Committed(record))
    }

    async fn persist_booking(&self, record: &BookingRecord) {
        let Some(repo) = &self.booking_repo else {
            return;
        };
        if let Err(e) = repo.record_booking(record).await {
            // The sale stands; storage catches up out of band.
            error!(
                trip_id = %record.trip_id,
                booking_id = %record.booking_id,
                "Failed to record booking: {}",
                e
            );
        }
    }

    /// Revert every elapsed hold on every trip. Returns what was done.
    pub async fn sweep_expired(&self) -> SweepReport {
        let mut report = SweepReport::default();
        for slot in self.slots().await {
            let mut guard = slot.lock().await;
            let events = expire_elapsed(&mut guard.trip, self.clock.now());
            report.trips_scanned += 1;
            report.holds_expired += events.len();
            for event in events {
                self.sink.publish(event);
            }
            drop(guard);
        }
        if report.holds_expired > 0 {
            debug!(trips = report.trips_scanned, expired = report.holds_expired, "Expiry sweep");
        }
        report
    }

    fn check_window(&self, trip: &Trip, now: DateTime<Utc>) -> ReservationResult<()> {
        if self.policy.enforce_booking_window && !trip.is_bookable_at(now) {
            return Err(ReservationError::BookingWindowClosed {
                cutoff: trip.booking_cutoff(),
            });
        }
        Ok(())
    }

    async fn slot(&self, trip_id: Uuid) -> ReservationResult<SharedSlot> {
        self.trips
            .read()
            .await
            .get(&trip_id)
            .cloned()
            .ok_or(ReservationError::TripNotFound(trip_id))
    }

    async fn slots(&self) -> Vec<SharedSlot> {
        self.trips.read().await.values().cloned().collect()
    }

    /// Publish what happened, then report a failure if any. Called with the
    /// trip's lock held when there is one.
    fn finish<T>(
        &self,
        operation: &'static str,
        trip_id: Uuid,
        events: Vec<ReservationEvent>,
        outcome: ReservationResult<T>,
    ) -> ReservationResult<T> {
        for event in events {
            self.sink.publish(event);
        }
        if let Err(err) = &outcome {
            warn!(%trip_id, operation, code = err.kind(), "{}", err);
            self.sink.publish(ReservationEvent::OperationFailed(OperationFailedEvent {
                trip_id,
                seat_numbers: err.seat_number().into_iter().collect(),
                operation: operation.to_string(),
                reason: err.kind().to_string(),
                message: err.to_string(),
                failed_at: self.clock.now(),
            }));
        }
        outcome
    }
}

enum PurchaseOutcome {
    Committed(BookingRecord),
    Replayed(BookingReceipt),
}

fn release_locked(
    trip: &mut Trip,
    seat_id: Uuid,
    token: Option<HoldToken>,
    now: DateTime<Utc>,
    events: &mut Vec<ReservationEvent>,
) -> ReservationResult<ReleaseOutcome> {
    let trip_id = trip.id;
    let seat = trip
        .seats
        .find(&seat_id)
        .ok_or(ReservationError::SeatNotFound { trip_id, seat_id })?;
    let seat_number = seat.number;

    match seat.state() {
        SeatState::Available => {
            debug!(%trip_id, seat_number, "Release of an available seat ignored");
            return Ok(ReleaseOutcome::AlreadyAvailable);
        }
        SeatState::Sold { .. } => return Err(ReservationError::SeatAlreadySold { seat_number }),
        SeatState::Held { token: held_by, .. } => {
            if token.is_some_and(|t| t != *held_by) {
                return Err(ReservationError::HoldNotOwned { seat_number });
            }
        }
    }

    match trip
        .seats
        .apply_transition(&seat_id, SeatStatus::Held, SeatState::Available)
        .map_err(|e| ReservationError::from_inventory(trip_id, e))?
    {
        Transition::Applied { .. } => {
            let available_seats = trip.available_seats();
            info!(%trip_id, seat_number, available_seats, "Seat released");
            events.push(ReservationEvent::SeatReleased(SeatReleasedEvent {
                trip_id,
                seat_id,
                seat_number,
                released_at: now,
                available_seats,
            }));
            Ok(ReleaseOutcome::Released)
        }
        Transition::Conflict { .. } => Ok(ReleaseOutcome::AlreadyAvailable),
    }
}

/// Revert holds on `trip` whose expiry is at or before `now`.
///
/// A seat that is no longer held by the time its turn comes simply lost the
/// race to another operation and is skipped.
fn expire_elapsed(trip: &mut Trip, now: DateTime<Utc>) -> Vec<ReservationEvent> {
    let mut events = Vec::new();
    for seat_id in trip.seats.elapsed_holds(now) {
        let previous = match trip.seats.apply_transition(&seat_id, SeatStatus::Held, SeatState::Available) {
            Ok(Transition::Applied { previous }) => previous,
            _ => continue,
        };
        let SeatState::Held { expires_at, .. } = previous else {
            continue;
        };
        let seat_number = seat_number_of(trip, &seat_id);
        let available_seats = trip.available_seats();
        info!(trip_id = %trip.id, seat_number, %expires_at, "Hold expired");
        events.push(ReservationEvent::HoldExpired(HoldExpiredEvent {
            trip_id: trip.id,
            seat_id,
            seat_number,
            hold_expiry: expires_at,
            expired_at: now,
            available_seats,
        }));
    }
    events
}

/// Mark the seats of a stored booking sold again after a restart.
fn restore_booking(trip: &mut Trip, record: BookingRecord) {
    let changes = record
        .seat_ids
        .iter()
        .map(|seat_id| SeatChange {
            seat_id: *seat_id,
            expected: SeatStatus::Available,
            next: SeatState::Sold {
                passenger: record.passenger.clone(),
            },
        })
        .collect();

    match trip.seats.apply_group(changes) {
        Ok(GroupTransition::Applied { .. }) => {}
        Ok(GroupTransition::Conflict { seat_id, actual }) => {
            warn!(trip_id = %trip.id, booking_id = %record.booking_id, %seat_id, %actual, "Stored booking overlaps another");
        }
        Err(e) => {
            warn!(trip_id = %trip.id, booking_id = %record.booking_id, "Stored booking does not fit trip: {}", e);
        }
    }
}

fn seat_number_of(trip: &Trip, seat_id: &Uuid) -> u32 {
    trip.seats.find(seat_id).map(|s| s.number).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::BroadcastSink;
    use async_trait::async_trait;
    use chrono::{Duration, NaiveDate, NaiveTime};
    use coachline_catalog::BusType;
    use coachline_core::{ManualClock, PassengerDetails};
    use coachline_shared::Masked;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::broadcast::Receiver;

    fn start() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2030-05-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn four_seats() -> NewTrip {
        NewTrip {
            from: "Lisbon".into(),
            to: "Porto".into(),
            date: NaiveDate::from_ymd_opt(2030, 6, 1).unwrap(),
            time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            bus_type: BusType::Standard,
            base_price_cents: 2000,
            total_seats: Some(4),
            booking_window_hours: 2,
        }
    }

    fn passenger() -> PassengerDetails {
        PassengerDetails {
            name: "Ada Lovelace".into(),
            email: Masked::new("ada@example.com".into()),
            phone: Masked::new("555-0100".into()),
        }
    }

    fn purchase(trip_id: Uuid, seat_ids: Vec<Uuid>) -> PurchaseRequest {
        PurchaseRequest {
            trip_id,
            seat_ids,
            passenger: passenger(),
            hold_token: None,
            idempotency_key: None,
        }
    }

    struct Harness {
        engine: Arc<ReservationEngine>,
        clock: Arc<ManualClock>,
        events: Receiver<ReservationEvent>,
    }

    fn harness() -> Harness {
        harness_with(ReservationEngine::builder())
    }

    fn harness_with(builder: ReservationEngineBuilder) -> Harness {
        let clock = Arc::new(ManualClock::new(start()));
        let sink = BroadcastSink::new(256);
        let events = sink.subscribe();
        let engine = builder.clock(clock.clone()).sink(Arc::new(sink)).build();
        Harness {
            engine: Arc::new(engine),
            clock,
            events,
        }
    }

    fn seat_id(trip: &Trip, number: u32) -> Uuid {
        trip.seats.find_by_number(number).unwrap().id
    }

    fn drain(rx: &mut Receiver<ReservationEvent>) -> Vec<ReservationEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_hold_purchase_then_release_is_refused() {
        let mut h = harness();
        let trip = h.engine.create_trip(four_seats()).await.unwrap();
        let seat1 = seat_id(&trip, 1);

        let hold = h.engine.hold(trip.id, seat1, None).await.unwrap();
        assert_eq!(hold.seat_number, 1);
        assert_eq!(hold.hold_expiry, start() + Duration::minutes(10));
        assert_eq!(h.engine.available_seats(trip.id).await.unwrap(), 3);

        let receipt = h.engine.purchase(purchase(trip.id, vec![seat1])).await.unwrap();
        assert_eq!(receipt.seat_numbers, vec![1]);
        assert_eq!(receipt.total_cents, 2000);
        assert_eq!(h.engine.available_seats(trip.id).await.unwrap(), 3);

        let seat = h.engine.seat(trip.id, seat1).await.unwrap();
        assert_eq!(seat.status(), SeatStatus::Sold);
        assert_eq!(seat.hold_expiry(), None);
        assert_eq!(seat.passenger().unwrap().booking_id, receipt.booking_id);

        let err = h.engine.release(trip.id, seat1, None).await.unwrap_err();
        assert_eq!(err, ReservationError::SeatAlreadySold { seat_number: 1 });

        let kinds: Vec<&str> = drain(&mut h.events).iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["seat_held", "seats_sold", "operation_failed"]);
    }

    #[tokio::test]
    async fn test_hold_expires_once_through_sweep() {
        let mut h = harness();
        let trip = h.engine.create_trip(four_seats()).await.unwrap();
        let seat2 = seat_id(&trip, 2);

        h.engine.hold(trip.id, seat2, None).await.unwrap();
        assert_eq!(h.engine.available_seats(trip.id).await.unwrap(), 3);

        h.clock.advance(Duration::minutes(9));
        assert_eq!(h.engine.sweep_expired().await.holds_expired, 0);

        h.clock.advance(Duration::minutes(1));
        let report = h.engine.sweep_expired().await;
        assert_eq!(report, SweepReport { trips_scanned: 1, holds_expired: 1 });
        assert_eq!(h.engine.available_seats(trip.id).await.unwrap(), 4);
        assert_eq!(h.engine.sweep_expired().await.holds_expired, 0);

        let expired: Vec<_> = drain(&mut h.events)
            .into_iter()
            .filter(|e| matches!(e, ReservationEvent::HoldExpired(_)))
            .collect();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].available_seats(), Some(4));
    }

    #[tokio::test]
    async fn test_elapsed_hold_is_reclaimed_by_next_operation() {
        let mut h = harness();
        let trip = h.engine.create_trip(four_seats()).await.unwrap();
        let seat = seat_id(&trip, 3);

        h.engine.hold(trip.id, seat, None).await.unwrap();
        h.clock.advance(Duration::minutes(11));

        // No sweep ran, the second hold still succeeds.
        h.engine.hold(trip.id, seat, None).await.unwrap();
        assert_eq!(h.engine.sweep_expired().await.holds_expired, 0);

        let kinds: Vec<&str> = drain(&mut h.events).iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["seat_held", "hold_expired", "seat_held"]);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let h = harness();
        let trip = h.engine.create_trip(four_seats()).await.unwrap();
        let seat = seat_id(&trip, 1);

        h.engine.hold(trip.id, seat, None).await.unwrap();
        assert_eq!(h.engine.release(trip.id, seat, None).await.unwrap(), ReleaseOutcome::Released);
        assert_eq!(
            h.engine.release(trip.id, seat, None).await.unwrap(),
            ReleaseOutcome::AlreadyAvailable
        );
        assert_eq!(h.engine.available_seats(trip.id).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_hold_errors_are_specific() {
        let h = harness();
        let trip = h.engine.create_trip(four_seats()).await.unwrap();
        let (seat1, seat2) = (seat_id(&trip, 1), seat_id(&trip, 2));

        h.engine.hold(trip.id, seat1, None).await.unwrap();
        assert_eq!(
            h.engine.hold(trip.id, seat1, None).await.unwrap_err(),
            ReservationError::SeatConflict { seat_number: 1 }
        );

        h.engine.purchase(purchase(trip.id, vec![seat2])).await.unwrap();
        assert_eq!(
            h.engine.hold(trip.id, seat2, None).await.unwrap_err(),
            ReservationError::SeatUnavailable { seat_number: 2 }
        );

        let missing = Uuid::new_v4();
        assert_eq!(
            h.engine.hold(trip.id, missing, None).await.unwrap_err(),
            ReservationError::SeatNotFound { trip_id: trip.id, seat_id: missing }
        );

        let unknown = Uuid::new_v4();
        assert_eq!(
            h.engine.hold(unknown, seat1, None).await.unwrap_err(),
            ReservationError::TripNotFound(unknown)
        );
    }

    #[tokio::test]
    async fn test_group_purchase_is_all_or_nothing() {
        let h = harness();
        let trip = h.engine.create_trip(four_seats()).await.unwrap();
        let (a, b) = (seat_id(&trip, 1), seat_id(&trip, 2));

        h.engine.hold(trip.id, a, None).await.unwrap();
        h.engine.purchase(purchase(trip.id, vec![b])).await.unwrap();

        let err = h.engine.purchase(purchase(trip.id, vec![a, b])).await.unwrap_err();
        assert_eq!(err, ReservationError::SeatConflict { seat_number: 2 });

        let seat_a = h.engine.seat(trip.id, a).await.unwrap();
        assert_eq!(seat_a.status(), SeatStatus::Held);
        assert!(seat_a.passenger().is_none());
    }

    #[tokio::test]
    async fn test_purchase_from_available_and_held_together() {
        let h = harness();
        let trip = h.engine.create_trip(four_seats()).await.unwrap();
        let ids: Vec<Uuid> = (1..=3).map(|n| seat_id(&trip, n)).collect();

        h.engine.hold(trip.id, ids[0], None).await.unwrap();
        let receipt = h.engine.purchase(purchase(trip.id, ids.clone())).await.unwrap();
        assert_eq!(receipt.seat_numbers, vec![1, 2, 3]);
        assert_eq!(receipt.total_cents, 6000);

        let snapshot = h.engine.trip(trip.id).await.unwrap();
        let summary = snapshot.summary();
        assert_eq!(summary.sold_seats, 3);
        assert_eq!(summary.available_seats, 1);
        assert_eq!(summary.revenue_cents, 6000);
        for id in &ids {
            let seat = snapshot.seats.find(id).unwrap();
            assert_eq!(seat.passenger().unwrap().booking_id, receipt.booking_id);
        }
    }

    #[tokio::test]
    async fn test_purchase_request_validation() {
        let h = harness();
        let trip = h.engine.create_trip(NewTrip { total_seats: Some(10), ..four_seats() }).await.unwrap();
        let a = seat_id(&trip, 1);

        assert_eq!(
            h.engine.purchase(purchase(trip.id, vec![])).await.unwrap_err(),
            ReservationError::EmptyOrInvalidSeatSet
        );
        assert_eq!(
            h.engine.purchase(purchase(trip.id, vec![a, a])).await.unwrap_err(),
            ReservationError::EmptyOrInvalidSeatSet
        );

        let five: Vec<Uuid> = (1..=5).map(|n| seat_id(&trip, n)).collect();
        assert_eq!(
            h.engine.purchase(purchase(trip.id, five)).await.unwrap_err(),
            ReservationError::TooManySeats { requested: 5, limit: 4 }
        );

        let mut nameless = purchase(trip.id, vec![a]);
        nameless.passenger.name = "  ".into();
        assert!(matches!(
            h.engine.purchase(nameless).await,
            Err(ReservationError::InvalidPassenger(_))
        ));

        assert_eq!(h.engine.available_seats(trip.id).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_booking_window_closes_before_departure() {
        let h = harness();
        let trip = h.engine.create_trip(four_seats()).await.unwrap();
        let seat = seat_id(&trip, 1);

        h.clock.set(trip.booking_cutoff());
        let err = h.engine.hold(trip.id, seat, None).await.unwrap_err();
        assert_eq!(err, ReservationError::BookingWindowClosed { cutoff: trip.booking_cutoff() });
        assert!(matches!(
            h.engine.purchase(purchase(trip.id, vec![seat])).await,
            Err(ReservationError::BookingWindowClosed { .. })
        ));

        let relaxed = harness_with(ReservationEngine::builder().policy(ReservationPolicy {
            enforce_booking_window: false,
            ..ReservationPolicy::default()
        }));
        let trip = relaxed.engine.create_trip(four_seats()).await.unwrap();
        relaxed.clock.set(trip.departure());
        assert!(relaxed.engine.hold(trip.id, seat_id(&trip, 1), None).await.is_ok());
    }

    #[tokio::test]
    async fn test_hold_token_guards_release_and_purchase() {
        let h = harness();
        let trip = h.engine.create_trip(four_seats()).await.unwrap();
        let seat = seat_id(&trip, 1);

        let mine = HoldToken::new();
        let hold = h.engine.hold(trip.id, seat, Some(mine)).await.unwrap();
        assert_eq!(hold.hold_token, mine);

        let other = HoldToken::new();
        assert_eq!(
            h.engine.release(trip.id, seat, Some(other)).await.unwrap_err(),
            ReservationError::HoldNotOwned { seat_number: 1 }
        );

        let mut stolen = purchase(trip.id, vec![seat]);
        stolen.hold_token = Some(other);
        assert_eq!(
            h.engine.purchase(stolen).await.unwrap_err(),
            ReservationError::HoldNotOwned { seat_number: 1 }
        );

        let mut owned = purchase(trip.id, vec![seat]);
        owned.hold_token = Some(mine);
        assert!(h.engine.purchase(owned).await.is_ok());
    }

    #[tokio::test]
    async fn test_idempotency_key_replays_receipt() {
        let mut h = harness();
        let trip = h.engine.create_trip(four_seats()).await.unwrap();
        let seat = seat_id(&trip, 4);

        let mut request = purchase(trip.id, vec![seat]);
        request.idempotency_key = Some("intent-42".into());

        let first = h.engine.purchase(request.clone()).await.unwrap();
        let second = h.engine.purchase(request).await.unwrap();
        assert_eq!(first, second);

        let sold = drain(&mut h.events)
            .into_iter()
            .filter(|e| matches!(e, ReservationEvent::SeatsSold(_)))
            .count();
        assert_eq!(sold, 1);
    }

    #[tokio::test]
    async fn test_idempotency_key_reused_for_other_purchase_is_refused() {
        let mut h = harness();
        let trip = h.engine.create_trip(four_seats()).await.unwrap();
        let (seat1, seat2) = (seat_id(&trip, 1), seat_id(&trip, 2));

        let mut first = purchase(trip.id, vec![seat1, seat2]);
        first.idempotency_key = Some("cart-9".into());
        let receipt = h.engine.purchase(first.clone()).await.unwrap();

        let mut reordered = first.clone();
        reordered.seat_ids = vec![seat2, seat1];
        assert_eq!(h.engine.purchase(reordered).await.unwrap(), receipt);

        let mut other_seat = purchase(trip.id, vec![seat_id(&trip, 3)]);
        other_seat.idempotency_key = Some("cart-9".into());
        let err = h.engine.purchase(other_seat).await.unwrap_err();
        assert_eq!(err, ReservationError::IdempotencyKeyReused { key: "cart-9".into() });

        let mut other_passenger = first;
        other_passenger.passenger.name = "Grace Hopper".into();
        assert!(h.engine.purchase(other_passenger).await.is_err());

        assert_eq!(h.engine.available_seats(trip.id).await.unwrap(), 2);
        let sold = drain(&mut h.events)
            .into_iter()
            .filter(|e| matches!(e, ReservationEvent::SeatsSold(_)))
            .count();
        assert_eq!(sold, 1);
    }

    #[tokio::test]
    async fn test_failures_are_published() {
        let mut h = harness();
        let trip = h.engine.create_trip(four_seats()).await.unwrap();
        let seat = seat_id(&trip, 1);
        h.engine.hold(trip.id, seat, None).await.unwrap();
        drain(&mut h.events);

        h.engine.hold(trip.id, seat, None).await.unwrap_err();
        match drain(&mut h.events).as_slice() {
            [ReservationEvent::OperationFailed(e)] => {
                assert_eq!(e.operation, "hold");
                assert_eq!(e.reason, "SEAT_CONFLICT");
                assert_eq!(e.seat_numbers, vec![1]);
                assert_eq!(e.message, "Seat 1 was just taken by another passenger");
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[derive(Default)]
    struct RecordingBookings {
        fail: bool,
        records: StdMutex<Vec<BookingRecord>>,
    }

    #[async_trait]
    impl BookingRepository for RecordingBookings {
        async fn record_booking(&self, booking: &BookingRecord) -> RepoResult<()> {
            if self.fail {
                return Err("database unavailable".into());
            }
            self.records.lock().unwrap().push(booking.clone());
            Ok(())
        }

        async fn list_bookings(&self, trip_id: Uuid) -> RepoResult<Vec<BookingRecord>> {
            let records = self.records.lock().unwrap();
            Ok(records.iter().filter(|r| r.trip_id == trip_id).cloned().collect())
        }
    }

    #[derive(Default)]
    struct RecordingTrips {
        trips: StdMutex<Vec<Trip>>,
    }

    #[async_trait]
    impl TripRepository for RecordingTrips {
        async fn create_trip(&self, trip: &Trip) -> RepoResult<()> {
            self.trips.lock().unwrap().push(trip.clone());
            Ok(())
        }

        async fn list_trips(&self) -> RepoResult<Vec<Trip>> {
            Ok(self.trips.lock().unwrap().clone())
        }
    }

    #[tokio::test]
    async fn test_booking_is_recorded_after_commit() {
        let repo = Arc::new(RecordingBookings::default());
        let h = harness_with(ReservationEngine::builder().booking_repository(repo.clone()));
        let trip = h.engine.create_trip(four_seats()).await.unwrap();

        let receipt = h.engine.purchase(purchase(trip.id, vec![seat_id(&trip, 1)])).await.unwrap();

        let stored = h.engine.bookings(trip.id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].booking_id, receipt.booking_id);
        assert_eq!(stored[0].passenger.name, "Ada Lovelace");
    }

    #[tokio::test]
    async fn test_repository_failure_keeps_sale() {
        let repo = Arc::new(RecordingBookings {
            fail: true,
            ..Default::default()
        });
        let h = harness_with(ReservationEngine::builder().booking_repository(repo));
        let trip = h.engine.create_trip(four_seats()).await.unwrap();
        let seat = seat_id(&trip, 1);

        assert!(h.engine.purchase(purchase(trip.id, vec![seat])).await.is_ok());
        assert_eq!(h.engine.seat(trip.id, seat).await.unwrap().status(), SeatStatus::Sold);
    }

    #[tokio::test]
    async fn test_bootstrap_restores_trips_and_sales() {
        let trips = Arc::new(RecordingTrips::default());
        let bookings = Arc::new(RecordingBookings::default());

        let first = harness_with(
            ReservationEngine::builder()
                .trip_repository(trips.clone())
                .booking_repository(bookings.clone()),
        );
        let trip = first.engine.create_trip(four_seats()).await.unwrap();
        first
            .engine
            .purchase(purchase(trip.id, vec![seat_id(&trip, 2)]))
            .await
            .unwrap();

        let restarted = harness_with(ReservationEngine::builder().trip_repository(trips).booking_repository(bookings));
        assert_eq!(restarted.engine.bootstrap().await.unwrap(), 1);

        let restored = restarted.engine.trip(trip.id).await.unwrap();
        assert_eq!(restored.available_seats(), 3);
        assert_eq!(
            restored.seats.find_by_number(2).unwrap().status(),
            SeatStatus::Sold
        );
    }

    #[tokio::test]
    async fn test_list_trips_filters_and_orders() {
        let h = harness();
        let later = h.engine.create_trip(four_seats()).await.unwrap();
        let earlier = h
            .engine
            .create_trip(NewTrip {
                date: NaiveDate::from_ymd_opt(2030, 5, 20).unwrap(),
                ..four_seats()
            })
            .await
            .unwrap();
        h.engine
            .create_trip(NewTrip { to: "Faro".into(), ..four_seats() })
            .await
            .unwrap();

        let query = TripQuery {
            to: Some("porto".into()),
            ..Default::default()
        };
        let ids: Vec<Uuid> = h.engine.list_trips(&query).await.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![earlier.id, later.id]);
        assert_eq!(h.engine.list_trips(&TripQuery::default()).await.len(), 3);
    }

    #[tokio::test]
    async fn test_quote_prices_selection() {
        let h = harness();
        let trip = h.engine.create_trip(four_seats()).await.unwrap();
        let ids = vec![seat_id(&trip, 1), seat_id(&trip, 2)];
        assert_eq!(h.engine.quote(trip.id, &ids).await.unwrap(), 4000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_purchases_sell_a_seat_once() {
        for _ in 0..20 {
            let h = harness();
            let trip = h.engine.create_trip(four_seats()).await.unwrap();
            let seat = seat_id(&trip, 1);

            let tasks: Vec<_> = (0..2)
                .map(|_| {
                    let engine = h.engine.clone();
                    let request = purchase(trip.id, vec![seat]);
                    tokio::spawn(async move { engine.purchase(request).await })
                })
                .collect();

            let mut wins = 0;
            for task in tasks {
                match task.await.unwrap() {
                    Ok(_) => wins += 1,
                    Err(e) => assert_eq!(e, ReservationError::SeatConflict { seat_number: 1 }),
                }
            }
            assert_eq!(wins, 1);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_overlapping_groups_never_partially_sell() {
        for _ in 0..20 {
            let h = harness();
            let trip = h.engine.create_trip(four_seats()).await.unwrap();
            let (a, b, c) = (seat_id(&trip, 1), seat_id(&trip, 2), seat_id(&trip, 3));

            let left = {
                let engine = h.engine.clone();
                let request = purchase(trip.id, vec![a, b]);
                tokio::spawn(async move { engine.purchase(request).await })
            };
            let right = {
                let engine = h.engine.clone();
                let request = purchase(trip.id, vec![b, c]);
                tokio::spawn(async move { engine.purchase(request).await })
            };

            let left = left.await.unwrap();
            let right = right.await.unwrap();
            assert!(left.is_ok() != right.is_ok());

            let snapshot = h.engine.trip(trip.id).await.unwrap();
            let status = |id: Uuid| snapshot.seats.find(&id).unwrap().status();
            if left.is_ok() {
                assert_eq!(status(c), SeatStatus::Available);
            } else {
                assert_eq!(status(a), SeatStatus::Available);
            }
            assert_eq!(snapshot.summary().sold_seats, 2);
        }
    }

    struct RecordingSink(StdMutex<Vec<ReservationEvent>>);

    impl EventSink for RecordingSink {
        fn publish(&self, event: ReservationEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_events_are_published_in_commit_order() {
        let sink = Arc::new(RecordingSink(StdMutex::new(Vec::new())));
        let engine = Arc::new(ReservationEngine::builder().sink(sink.clone()).build());
        let trip = engine
            .create_trip(NewTrip {
                total_seats: Some(40),
                ..four_seats()
            })
            .await
            .unwrap();

        let tasks: Vec<_> = trip
            .seats
            .iter()
            .map(|seat| {
                let engine = engine.clone();
                let (trip_id, seat_id) = (trip.id, seat.id);
                tokio::spawn(async move { engine.hold(trip_id, seat_id, None).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let remaining: Vec<usize> = sink
            .0
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                ReservationEvent::SeatHeld(held) => Some(held.available_seats),
                _ => None,
            })
            .collect();
        let expected: Vec<usize> = (0..40).rev().collect();
        assert_eq!(remaining, expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_holds_have_one_winner() {
        let h = harness();
        let trip = h.engine.create_trip(four_seats()).await.unwrap();
        let seat = seat_id(&trip, 4);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let engine = h.engine.clone();
                tokio::spawn(async move { engine.hold(trip.id, seat, None).await })
            })
            .collect();

        let mut wins = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(h.engine.available_seats(trip.id).await.unwrap(), 3);
    }
}
