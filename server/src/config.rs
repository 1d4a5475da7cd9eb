//! Static server configuration
//!
//! Defaults mirror the production deployment: 60Hz broadcasts, at most 20
//! players, one minute of silence before a client is dropped and a hard
//! thirty minute ceiling on any single connection.

use crate::error::ConfigError;
use std::net::SocketAddr;
use std::time::Duration;

/// Limits enforced by the session registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Version clients must present and that every snapshot carries
    pub version: String,
    /// Maximum number of concurrently connected clients
    pub max_clients: usize,
    /// Slots in each client's outbound queue
    pub outbound_capacity: usize,
    /// Clients without a valid state update for this long are evicted
    pub inactivity_timeout: Duration,
    /// Clients connected for this long are evicted regardless of activity
    pub max_session_age: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            max_clients: 20,
            outbound_capacity: 256,
            inactivity_timeout: Duration::from_secs(60),
            max_session_age: Duration::from_secs(30 * 60),
        }
    }
}

/// Transport timings for a single WebSocket connection
#[derive(Debug, Clone, Copy)]
pub struct ConnectionConfig {
    /// Time allowed to read the next pong from the peer
    pub pong_wait: Duration,
    /// Interval between pings; must be shorter than `pong_wait`
    pub ping_period: Duration,
    /// Time allowed to write one frame to the peer
    pub write_wait: Duration,
    /// Largest inbound frame accepted, in bytes
    pub max_message_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        let pong_wait = Duration::from_secs(60);
        Self {
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            write_wait: Duration::from_secs(10),
            max_message_size: 8192,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Broadcast ticks per second
    pub tick_rate: u32,
    /// Capacity of the hub's request queue
    pub hub_capacity: usize,
    pub registry: RegistryConfig,
    pub connection: ConnectionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            tick_rate: 60,
            hub_capacity: 1024,
            registry: RegistryConfig::default(),
            connection: ConnectionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Interval between two broadcast ticks
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_rate.max(1)))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 {
            return Err(ConfigError::ZeroTickRate);
        }
        if self.hub_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("hub capacity"));
        }
        if self.registry.max_clients == 0 {
            return Err(ConfigError::ZeroCapacity("max clients"));
        }
        if self.registry.outbound_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("outbound capacity"));
        }
        if self.connection.max_message_size == 0 {
            return Err(ConfigError::ZeroCapacity("max message size"));
        }
        if self.registry.version.trim().is_empty() {
            return Err(ConfigError::EmptyVersion);
        }
        if self.connection.ping_period >= self.connection.pong_wait {
            return Err(ConfigError::PingPeriodTooLong {
                ping_period: self.connection.ping_period,
                pong_wait: self.connection.pong_wait,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.registry.max_clients, 20);
        assert_eq!(config.registry.outbound_capacity, 256);
        assert_eq!(config.connection.ping_period, Duration::from_secs(54));
        assert_eq!(config.registry.max_session_age, Duration::from_secs(1800));
    }

    #[test]
    fn test_tick_duration() {
        let mut config = ServerConfig::default();
        assert_approx_eq!(config.tick_duration().as_secs_f64(), 1.0 / 60.0);

        config.tick_rate = 20;
        assert_eq!(config.tick_duration(), Duration::from_millis(50));
    }

    #[test]
    fn test_validate_rejects_zero_tick_rate() {
        let config = ServerConfig {
            tick_rate: 0,
            ..ServerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroTickRate)));
    }

    #[test]
    fn test_validate_rejects_slow_pings() {
        let mut config = ServerConfig::default();
        config.connection.ping_period = config.connection.pong_wait;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PingPeriodTooLong { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_empty_limits() {
        let mut config = ServerConfig::default();
        config.registry.outbound_capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroCapacity("outbound capacity"))
        ));

        let mut config = ServerConfig::default();
        config.registry.version = "  ".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::EmptyVersion)));
    }
}
