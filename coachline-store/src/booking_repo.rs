use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use coachline_catalog::{PassengerInfo, SeatInventory, Trip};
use coachline_core::{BookingRecord, BookingRepository, RepoResult, TripRepository};
use coachline_shared::Masked;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

pub struct PgTripRepository {
    pool: PgPool,
}

impl PgTripRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct TripRow {
    id: Uuid,
    origin: String,
    destination: String,
    travel_date: NaiveDate,
    departure_time: NaiveTime,
    bus_type: String,
    base_price_cents: i64,
    booking_window_hours: i32,
    seats: Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<TripRow> for Trip {
    type Error = Box<dyn std::error::Error + Send + Sync>;

    fn try_from(row: TripRow) -> Result<Self, Self::Error> {
        let seats: SeatInventory = serde_json::from_value(row.seats)?;
        Ok(Trip {
            id: row.id,
            from: row.origin,
            to: row.destination,
            date: row.travel_date,
            time: row.departure_time,
            bus_type: row.bus_type.parse()?,
            base_price_cents: row.base_price_cents,
            booking_window_hours: u32::try_from(row.booking_window_hours)?,
            seats,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl TripRepository for PgTripRepository {
    async fn create_trip(&self, trip: &Trip) -> RepoResult<()> {
        let seats = serde_json::to_value(&trip.seats)?;

        sqlx::query(
            r#"
            INSERT INTO trips (id, origin, destination, travel_date, departure_time, bus_type,
                               base_price_cents, booking_window_hours, seats, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(trip.id)
        .bind(&trip.from)
        .bind(&trip.to)
        .bind(trip.date)
        .bind(trip.time)
        .bind(trip.bus_type.to_string())
        .bind(trip.base_price_cents)
        .bind(i32::try_from(trip.booking_window_hours)?)
        .bind(seats)
        .bind(trip.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_trips(&self) -> RepoResult<Vec<Trip>> {
        let rows: Vec<TripRow> = sqlx::query_as(
            "SELECT id, origin, destination, travel_date, departure_time, bus_type, base_price_cents, booking_window_hours, seats, created_at FROM trips ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Trip::try_from).collect()
    }
}

pub struct PgBookingRepository {
    pool: PgPool,
}

impl PgBookingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    trip_id: Uuid,
    seat_ids: Vec<Uuid>,
    seat_numbers: Vec<i32>,
    passenger_name: String,
    passenger_email: String,
    passenger_phone: String,
    total_cents: i64,
    booked_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for BookingRecord {
    type Error = Box<dyn std::error::Error + Send + Sync>;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let seat_numbers = row
            .seat_numbers
            .into_iter()
            .map(u32::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(BookingRecord {
            booking_id: row.id,
            trip_id: row.trip_id,
            seat_ids: row.seat_ids,
            seat_numbers,
            passenger: PassengerInfo {
                booking_id: row.id,
                name: row.passenger_name,
                email: Masked::new(row.passenger_email),
                phone: Masked::new(row.passenger_phone),
                booked_at: row.booked_at,
            },
            total_cents: row.total_cents,
        })
    }
}

#[async_trait]
impl BookingRepository for PgBookingRepository {
    async fn record_booking(&self, booking: &BookingRecord) -> RepoResult<()> {
        let seat_numbers = booking
            .seat_numbers
            .iter()
            .map(|n| i32::try_from(*n))
            .collect::<Result<Vec<_>, _>>()?;

        sqlx::query(
            r#"
            INSERT INTO bookings (id, trip_id, seat_ids, seat_numbers, passenger_name,
                                  passenger_email, passenger_phone, total_cents, booked_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(booking.booking_id)
        .bind(booking.trip_id)
        .bind(&booking.seat_ids)
        .bind(seat_numbers)
        .bind(&booking.passenger.name)
        .bind(booking.passenger.email.expose())
        .bind(booking.passenger.phone.expose())
        .bind(booking.total_cents)
        .bind(booking.passenger.booked_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_bookings(&self, trip_id: Uuid) -> RepoResult<Vec<BookingRecord>> {
        let rows: Vec<BookingRow> = sqlx::query_as(
            "SELECT id, trip_id, seat_ids, seat_numbers, passenger_name, passenger_email, passenger_phone, total_cents, booked_at FROM bookings WHERE trip_id = $1 ORDER BY booked_at",
        )
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(BookingRecord::try_from).collect()
    }
}
