use anyhow::Context;
use coachline_api::metrics::spawn_listener;
use coachline_api::{app, AppState, Metrics};
use coachline_core::{BookingRepository, EventSink, TripRepository};
use coachline_engine::{BroadcastSink, ExpiryScheduler, FanoutSink, ReservationEngine, ReservationPolicy};
use coachline_store::app_config::Config;
use coachline_store::{DbClient, InMemoryBookingRepository, InMemoryTripRepository, PgBookingRepository, PgTripRepository};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coachline_api=debug,coachline_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Coachline API on port {}", config.server.port);

    let (trips, bookings): (Arc<dyn TripRepository>, Arc<dyn BookingRepository>) = match &config.database {
        Some(db_config) => {
            let db = DbClient::new(db_config).await.context("Failed to connect to Postgres")?;
            db.migrate().await.context("Failed to run migrations")?;
            (
                Arc::new(PgTripRepository::new(db.pool.clone())),
                Arc::new(PgBookingRepository::new(db.pool.clone())),
            )
        }
        None => {
            tracing::info!("No database configured, keeping trips in memory");
            (
                Arc::new(InMemoryTripRepository::new()),
                Arc::new(InMemoryBookingRepository::new()),
            )
        }
    };

    // Broadcast channel feeding SSE clients and metrics
    let events = BroadcastSink::new(config.reservation.event_buffer);
    let sink = FanoutSink::new().with(Arc::new(events.clone()));
    let sink = with_kafka(sink, &config)?;

    let policy = ReservationPolicy {
        hold_duration: config.reservation.hold_duration()?,
        max_seats_per_booking: config.reservation.max_seats_per_booking,
        enforce_booking_window: config.reservation.enforce_booking_window,
    };
    let engine = Arc::new(
        ReservationEngine::builder()
            .policy(policy)
            .sink(Arc::new(sink) as Arc<dyn EventSink>)
            .trip_repository(trips)
            .booking_repository(bookings)
            .build(),
    );
    engine
        .bootstrap()
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to load stored trips")?;

    let metrics = Arc::new(Metrics::new().context("Failed to register metrics")?);
    for trip in engine.list_trips(&Default::default()).await {
        metrics.set_available(trip.id, trip.available_seats());
    }
    let metrics_task = spawn_listener(metrics.clone(), events.subscribe());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = ExpiryScheduler::new(engine.clone(), config.reservation.sweep_interval()).spawn(shutdown_rx);

    let app_state = AppState {
        engine,
        events,
        metrics,
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.context("Failed to bind")?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    let _ = shutdown_tx.send(true);
    let _ = scheduler.await;
    metrics_task.abort();
    tracing::info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

#[cfg(feature = "kafka")]
fn with_kafka(sink: FanoutSink, config: &Config) -> anyhow::Result<FanoutSink> {
    match &config.kafka {
        Some(kafka) => {
            let producer = coachline_store::KafkaEventSink::new(kafka).context("Failed to create Kafka producer")?;
            tracing::info!("Publishing reservation events to Kafka topic {}", kafka.topic);
            Ok(sink.with(Arc::new(producer)))
        }
        None => Ok(sink),
    }
}

#[cfg(not(feature = "kafka"))]
fn with_kafka(sink: FanoutSink, config: &Config) -> anyhow::Result<FanoutSink> {
    if config.kafka.is_some() {
        tracing::warn!("Kafka is configured but this build has no kafka feature; events stay in-process");
    }
    Ok(sink)
}
