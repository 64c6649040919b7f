//! Server configuration module.
//!
//! Parses configuration from environment variables for the wspub server.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `WSPUB_PUBLISHER_PORT` | No | 8080 | Port of the publisher/admin listener |
//! | `WSPUB_SUBSCRIBER_PORT` | No | 8081 | Port of the subscriber listener |
//! | `WSPUB_BIND_ADDRESS` | No | 0.0.0.0 | Interface both listeners bind to |
//! | `WSPUB_QUEUE_CAPACITY` | No | 8 | Frames buffered per subscriber |

use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::ParseIntError;

use thiserror::Error;

use crate::queue::DEFAULT_QUEUE_CAPACITY;

/// Default port of the publisher/admin listener.
pub const DEFAULT_PUBLISHER_PORT: u16 = 8080;

/// Default port of the subscriber listener.
pub const DEFAULT_SUBSCRIBER_PORT: u16 = 8081;

/// Errors that can occur when parsing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable has invalid format.
    #[error("invalid format for {var}: {message}")]
    InvalidFormat { var: String, message: String },

    /// Port number is invalid.
    #[error("invalid port number for {var}: {source}")]
    InvalidPort {
        var: String,
        #[source]
        source: ParseIntError,
    },

    /// Configuration validation failed.
    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

/// Server configuration parsed from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Interface both listeners bind to.
    pub bind_address: IpAddr,

    /// Port for publishers and stream/token administration.
    pub publisher_port: u16,

    /// Port for subscribers.
    pub subscriber_port: u16,

    /// Outbound queue capacity per subscriber.
    pub queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            publisher_port: DEFAULT_PUBLISHER_PORT,
            subscriber_port: DEFAULT_SUBSCRIBER_PORT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl Config {
    /// Parse configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - A port is not a valid u16
    /// - The bind address or queue capacity cannot be parsed
    /// - Both listeners would share a port, or the queue capacity is 0
    ///
    /// # Example
    ///
    /// ```no_run
    /// use wspub_server::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Publishers connect on port {}", config.publisher_port);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            bind_address: parse_bind_address()?,
            publisher_port: parse_port("WSPUB_PUBLISHER_PORT", DEFAULT_PUBLISHER_PORT)?,
            subscriber_port: parse_port("WSPUB_SUBSCRIBER_PORT", DEFAULT_SUBSCRIBER_PORT)?,
            queue_capacity: parse_queue_capacity()?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "WSPUB_QUEUE_CAPACITY must be at least 1".to_string(),
            ));
        }

        // Port 0 lets the OS pick, so two zeros do not collide.
        if self.publisher_port != 0 && self.publisher_port == self.subscriber_port {
            return Err(ConfigError::ValidationError(format!(
                "publisher and subscriber listeners cannot share port {}",
                self.publisher_port
            )));
        }

        Ok(())
    }

    /// Address of the publisher/admin listener.
    pub fn publisher_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.publisher_port)
    }

    /// Address of the subscriber listener.
    pub fn subscriber_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.subscriber_port)
    }
}

/// Read an optional environment variable, rejecting non-unicode values.
fn read_env(var: &str) -> Result<Option<String>, ConfigError> {
    match env::var(var) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => Ok(Some(value.trim().to_string())),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidFormat {
            var: var.to_string(),
            message: "contains invalid unicode".to_string(),
        }),
    }
}

/// Parse a port variable, falling back to `default` if unset.
fn parse_port(var: &str, default: u16) -> Result<u16, ConfigError> {
    match read_env(var)? {
        Some(value) => value.parse().map_err(|source| ConfigError::InvalidPort {
            var: var.to_string(),
            source,
        }),
        None => Ok(default),
    }
}

/// Parse the WSPUB_BIND_ADDRESS environment variable.
fn parse_bind_address() -> Result<IpAddr, ConfigError> {
    match read_env("WSPUB_BIND_ADDRESS")? {
        Some(value) => value.parse().map_err(|err| ConfigError::InvalidFormat {
            var: "WSPUB_BIND_ADDRESS".to_string(),
            message: format!("'{value}' is not an IP address: {err}"),
        }),
        None => Ok(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
    }
}

/// Parse the WSPUB_QUEUE_CAPACITY environment variable.
fn parse_queue_capacity() -> Result<usize, ConfigError> {
    match read_env("WSPUB_QUEUE_CAPACITY")? {
        Some(value) => value.parse().map_err(|err| ConfigError::InvalidFormat {
            var: "WSPUB_QUEUE_CAPACITY".to_string(),
            message: format!("'{value}' is not a positive integer: {err}"),
        }),
        None => Ok(DEFAULT_QUEUE_CAPACITY),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const VARS: [&str; 4] = [
        "WSPUB_PUBLISHER_PORT",
        "WSPUB_SUBSCRIBER_PORT",
        "WSPUB_BIND_ADDRESS",
        "WSPUB_QUEUE_CAPACITY",
    ];

    /// Helper to temporarily set environment variables for testing.
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        /// Starts from a clean slate: every wspub variable removed.
        fn clean() -> Self {
            let mut guard = Self { vars: Vec::new() };
            for var in VARS {
                guard.remove(var);
            }
            guard
        }

        fn set(&mut self, key: &str, value: &str) {
            let old_value = env::var(key).ok();
            self.vars.push((key.to_string(), old_value));
            env::set_var(key, value);
        }

        fn remove(&mut self, key: &str) {
            let old_value = env::var(key).ok();
            self.vars.push((key.to_string(), old_value));
            env::remove_var(key);
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.iter().rev() {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    #[serial]
    fn test_config_defaults() {
        let _guard = EnvGuard::clean();

        let config = Config::from_env().expect("should parse config");
        assert_eq!(config, Config::default());
        assert_eq!(config.publisher_port, 8080);
        assert_eq!(config.subscriber_port, 8081);
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.bind_address, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }

    #[test]
    #[serial]
    fn test_config_all_values_set() {
        let mut guard = EnvGuard::clean();
        guard.set("WSPUB_PUBLISHER_PORT", "9090");
        guard.set("WSPUB_SUBSCRIBER_PORT", "9091");
        guard.set("WSPUB_BIND_ADDRESS", "127.0.0.1");
        guard.set("WSPUB_QUEUE_CAPACITY", "32");

        let config = Config::from_env().expect("should parse config");
        assert_eq!(config.publisher_port, 9090);
        assert_eq!(config.subscriber_port, 9091);
        assert_eq!(config.queue_capacity, 32);
        assert_eq!(config.publisher_addr().to_string(), "127.0.0.1:9090");
        assert_eq!(config.subscriber_addr().to_string(), "127.0.0.1:9091");
    }

    #[test]
    #[serial]
    fn test_config_invalid_port() {
        let mut guard = EnvGuard::clean();
        guard.set("WSPUB_SUBSCRIBER_PORT", "not-a-number");

        let result = Config::from_env();
        match result {
            Err(ConfigError::InvalidPort { var, .. }) => {
                assert_eq!(var, "WSPUB_SUBSCRIBER_PORT");
            }
            other => panic!("expected InvalidPort, got {other:?}"),
        }
    }

    #[test]
    #[serial]
    fn test_config_port_out_of_range() {
        let mut guard = EnvGuard::clean();
        guard.set("WSPUB_PUBLISHER_PORT", "70000");

        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::InvalidPort { .. })
        ));
    }

    #[test]
    #[serial]
    fn test_config_same_port_rejected() {
        let mut guard = EnvGuard::clean();
        guard.set("WSPUB_PUBLISHER_PORT", "9000");
        guard.set("WSPUB_SUBSCRIBER_PORT", "9000");

        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    #[serial]
    fn test_config_zero_ports_allowed() {
        let mut guard = EnvGuard::clean();
        guard.set("WSPUB_PUBLISHER_PORT", "0");
        guard.set("WSPUB_SUBSCRIBER_PORT", "0");

        assert!(Config::from_env().is_ok());
    }

    #[test]
    #[serial]
    fn test_config_zero_queue_capacity_rejected() {
        let mut guard = EnvGuard::clean();
        guard.set("WSPUB_QUEUE_CAPACITY", "0");

        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("WSPUB_QUEUE_CAPACITY"));
    }

    #[test]
    #[serial]
    fn test_config_invalid_queue_capacity() {
        let mut guard = EnvGuard::clean();
        guard.set("WSPUB_QUEUE_CAPACITY", "-3");

        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::InvalidFormat { .. })
        ));
    }

    #[test]
    #[serial]
    fn test_config_invalid_bind_address() {
        let mut guard = EnvGuard::clean();
        guard.set("WSPUB_BIND_ADDRESS", "localhost:80");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFormat { ref var, .. } if var == "WSPUB_BIND_ADDRESS"));
    }

    #[test]
    #[serial]
    fn test_config_blank_values_use_defaults() {
        let mut guard = EnvGuard::clean();
        guard.set("WSPUB_PUBLISHER_PORT", "  ");

        let config = Config::from_env().expect("should parse config");
        assert_eq!(config.publisher_port, DEFAULT_PUBLISHER_PORT);
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::ValidationError("bad".to_string());
        assert_eq!(err.to_string(), "configuration validation failed: bad");

        let err = ConfigError::InvalidFormat {
            var: "X".to_string(),
            message: "nope".to_string(),
        };
        assert_eq!(err.to_string(), "invalid format for X: nope");
    }
}
