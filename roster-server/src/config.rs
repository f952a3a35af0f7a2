//! Server Configuration
//!
//! Environment-driven configuration with development-mode timing
//! overrides for fast local iteration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Presence server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// WebSocket listen address.
    pub listen_addr: SocketAddr,
    /// HTTP (client mount, health, metrics) listen address.
    pub http_addr: SocketAddr,
    /// Route prefix serving the bundled client assets.
    pub client_route: String,
    /// Route accepting presence socket upgrades.
    pub server_route: String,
    /// Directory holding the client assets.
    pub client_dir: PathBuf,
    /// Pong must arrive within this after a ping.
    pub ping_timeout: Duration,
    /// Keep-alive ping cadence.
    pub ping_interval: Duration,
    /// Grace period before a closed connection is torn down.
    pub reconnect_timeout: Duration,
    /// Cadence of the periodic session/contact count report.
    pub report_interval: Duration,
    /// Raise log verbosity.
    pub debug: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
            client_route: "/.roster-presence/client".to_string(),
            server_route: "/.roster-presence/server".to_string(),
            client_dir: PathBuf::from("client"),
            ping_timeout: Duration::from_secs(3),
            ping_interval: Duration::from_secs(15),
            reconnect_timeout: Duration::from_secs(35),
            report_interval: Duration::from_secs(15 * 60),
            debug: false,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables, falling back to
    /// defaults. `ROSTER_DEV=1` shortens every timing for local work;
    /// the millisecond-valued timing variables override it.
    pub fn from_env() -> Self {
        let mut config = ServerConfig::default();

        if let Ok(addr) = std::env::var("ROSTER_LISTEN_ADDR") {
            if let Ok(addr) = addr.parse() {
                config.listen_addr = addr;
            }
        }
        if let Ok(addr) = std::env::var("ROSTER_HTTP_ADDR") {
            if let Ok(addr) = addr.parse() {
                config.http_addr = addr;
            }
        }
        if let Ok(route) = std::env::var("ROSTER_CLIENT_ROUTE") {
            config.client_route = route;
        }
        if let Ok(route) = std::env::var("ROSTER_SERVER_ROUTE") {
            config.server_route = route;
        }
        if let Ok(dir) = std::env::var("ROSTER_CLIENT_DIR") {
            config.client_dir = PathBuf::from(dir);
        }
        config.debug = env_flag("ROSTER_DEBUG");
        if env_flag("ROSTER_DEV") {
            config.apply_dev_timings();
        }
        if let Some(timeout) = env_millis("ROSTER_PING_TIMEOUT") {
            config.ping_timeout = timeout;
        }
        if let Some(interval) = env_millis("ROSTER_PING_INTERVAL") {
            config.ping_interval = interval;
        }
        if let Some(timeout) = env_millis("ROSTER_RECONNECT_TIMEOUT") {
            config.reconnect_timeout = timeout;
        }
        config
    }

    /// Shortened timings so away/teardown/report behavior is observable
    /// within seconds.
    pub fn apply_dev_timings(&mut self) {
        self.ping_timeout = Duration::from_secs(2);
        self.ping_interval = Duration::from_secs(8);
        self.reconnect_timeout = Duration::from_secs(11);
        self.report_interval = Duration::from_millis(2500);
    }
}

fn env_flag(name: &str) -> bool {
    matches!(
        std::env::var(name).as_deref(),
        Ok("1") | Ok("true") | Ok("yes")
    )
}

fn env_millis(name: &str) -> Option<Duration> {
    let value = std::env::var(name).ok()?;
    value.parse().ok().map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timings() {
        let config = ServerConfig::default();
        assert_eq!(config.ping_timeout, Duration::from_secs(3));
        assert_eq!(config.ping_interval, Duration::from_secs(15));
        assert_eq!(config.reconnect_timeout, Duration::from_secs(35));
        assert_eq!(config.report_interval, Duration::from_secs(900));
    }

    #[test]
    fn test_env_timing_overrides() {
        std::env::set_var("ROSTER_PING_TIMEOUT", "5000");
        std::env::set_var("ROSTER_PING_INTERVAL", "20000");
        std::env::set_var("ROSTER_RECONNECT_TIMEOUT", "60000");
        let config = ServerConfig::from_env();
        std::env::remove_var("ROSTER_PING_TIMEOUT");
        std::env::remove_var("ROSTER_PING_INTERVAL");
        std::env::remove_var("ROSTER_RECONNECT_TIMEOUT");
        assert_eq!(config.ping_timeout, Duration::from_secs(5));
        assert_eq!(config.ping_interval, Duration::from_secs(20));
        assert_eq!(config.reconnect_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_malformed_env_timing_is_ignored() {
        std::env::set_var("ROSTER_TEST_BAD_MILLIS", "fast");
        assert!(env_millis("ROSTER_TEST_BAD_MILLIS").is_none());
        std::env::remove_var("ROSTER_TEST_BAD_MILLIS");
    }

    #[test]
    fn test_dev_timings() {
        let mut config = ServerConfig::default();
        config.apply_dev_timings();
        assert_eq!(config.ping_timeout, Duration::from_secs(2));
        assert_eq!(config.ping_interval, Duration::from_secs(8));
        assert_eq!(config.reconnect_timeout, Duration::from_secs(11));
        assert_eq!(config.report_interval, Duration::from_millis(2500));
    }
}
