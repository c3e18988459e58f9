use chrono::TimeDelta;
use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub reservation: ReservationConfig,
    /// Trips and bookings stay in memory unless this is set.
    pub database: Option<DatabaseConfig>,
    pub kafka: Option<KafkaConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReservationConfig {
    pub hold_seconds: u64,
    pub sweep_interval_ms: u64,
    pub max_seats_per_booking: usize,
    pub enforce_booking_window: bool,
    pub event_buffer: usize,
}

/// Holds longer than a day are a misconfiguration.
pub const MAX_HOLD_SECONDS: u64 = 24 * 60 * 60;

impl ReservationConfig {
    pub fn hold_duration(&self) -> Result<TimeDelta, ConfigError> {
        if self.hold_seconds == 0 || self.hold_seconds > MAX_HOLD_SECONDS {
            return Err(ConfigError::Message(format!(
                "reservation.hold_seconds must be between 1 and {}, got {}",
                MAX_HOLD_SECONDS, self.hold_seconds
            )));
        }
        i64::try_from(self.hold_seconds)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .ok_or_else(|| ConfigError::Message(format!("reservation.hold_seconds {} is out of range", self.hold_seconds)))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    #[serde(default = "default_topic")]
    pub topic: String,
}

fn default_topic() -> String {
    "seat-events".to_string()
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config: Self = Self::layered(&run_mode)?
            // COACHLINE__RESERVATION__HOLD_SECONDS=120 sets reservation.hold_seconds
            .add_source(config::Environment::with_prefix("COACHLINE").separator("__"))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the values serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.reservation.hold_duration()?;
        Ok(())
    }

    /// Built-in defaults with the optional config files on top.
    pub fn layered(run_mode: &str) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        let builder = Self::defaults()?
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Not checked in
            .add_source(config::File::with_name("config/local").required(false));
        Ok(builder)
    }

    pub fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        config::Config::builder()
            .set_default("server.port", 8080)?
            .set_default("reservation.hold_seconds", 600)?
            .set_default("reservation.sweep_interval_ms", 1000)?
            .set_default("reservation.max_seats_per_booking", 4)?
            .set_default("reservation.enforce_booking_window", true)?
            .set_default("reservation.event_buffer", 1024)
    }
}
