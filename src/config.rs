//! Broker configuration
//!
//! Every setting has a default and can be overridden through a `ROOMCAST_*`
//! environment variable.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{BrokerError, BrokerResult};

/// Runtime settings for the broker and its HTTP endpoint
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Address the HTTP server binds to
    pub bind_addr: String,
    /// Route of the upgrade endpoint
    pub ws_path: String,
    /// A connection with no inbound frame for this long is closed
    pub read_timeout: Duration,
    /// Upper bound for a single frame write
    pub write_timeout: Duration,
    /// Capacity of each client's outbound queue
    pub outbound_capacity: usize,
    /// Inbound events buffered per event name while nobody listens for it
    pub pending_capacity: usize,
    /// Distinct event names that may be buffering at once per client
    pub pending_events: usize,
    /// Largest inbound message accepted by the upgrade endpoint
    pub max_message_size: usize,
    /// Remove rooms that become empty after a leave
    pub reap_empty_rooms: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3030".to_string(),
            ws_path: "/ws".to_string(),
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            outbound_capacity: 1000,
            pending_capacity: 100,
            pending_events: 64,
            max_message_size: 64 * 1024,
            reap_empty_rooms: false,
        }
    }
}

impl BrokerConfig {
    /// Load configuration from the environment, falling back to defaults
    pub fn from_env() -> BrokerResult<Self> {
        let defaults = Self::default();

        let config = Self {
            bind_addr: env::var("ROOMCAST_BIND_ADDR").unwrap_or(defaults.bind_addr),
            ws_path: env::var("ROOMCAST_WS_PATH").unwrap_or(defaults.ws_path),
            read_timeout: env_parse::<u64>("ROOMCAST_READ_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.read_timeout),
            write_timeout: env_parse::<u64>("ROOMCAST_WRITE_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.write_timeout),
            outbound_capacity: env_parse("ROOMCAST_OUTBOUND_CAPACITY")?
                .unwrap_or(defaults.outbound_capacity),
            pending_capacity: env_parse("ROOMCAST_PENDING_CAPACITY")?
                .unwrap_or(defaults.pending_capacity),
            pending_events: env_parse("ROOMCAST_PENDING_EVENTS")?
                .unwrap_or(defaults.pending_events),
            max_message_size: env_parse("ROOMCAST_MAX_MESSAGE_SIZE")?
                .unwrap_or(defaults.max_message_size),
            reap_empty_rooms: env_parse("ROOMCAST_REAP_EMPTY_ROOMS")?
                .unwrap_or(defaults.reap_empty_rooms),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pumps cannot work with
    pub fn validate(&self) -> BrokerResult<()> {
        if self.read_timeout.is_zero() {
            return Err(BrokerError::Config("read timeout must be non-zero".into()));
        }
        if self.write_timeout.is_zero() {
            return Err(BrokerError::Config("write timeout must be non-zero".into()));
        }
        if self.outbound_capacity == 0 {
            return Err(BrokerError::Config("outbound capacity must be non-zero".into()));
        }
        if self.pending_capacity == 0 || self.pending_events == 0 {
            return Err(BrokerError::Config("pending buffer limits must be non-zero".into()));
        }
        if !self.ws_path.starts_with('/') {
            return Err(BrokerError::Config(format!(
                "websocket path must start with '/': {}",
                self.ws_path
            )));
        }
        Ok(())
    }

    /// Heartbeat period: 9/10 of the read timeout, so at least one probe
    /// goes out before the peer's deadline expires
    pub fn ping_interval(&self) -> Duration {
        self.read_timeout * 9 / 10
    }
}

fn env_parse<T: FromStr>(key: &str) -> BrokerResult<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| BrokerError::Config(format!("{}={:?}: {}", key, raw, e))),
        Err(_) => Ok(None),
    }
}
