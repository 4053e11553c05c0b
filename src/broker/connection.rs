use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{DEFAULT_HOST, DEFAULT_PORT};

/// Current broker connection parameters.
///
/// Host and port are always resolved to non-empty values; the struct is replaced
/// wholesale on connect and reset to the configured defaults on disconnect, so a
/// command line is never built from a partially set connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConnection {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub pass: Option<String>,
}

impl Default for BrokerConnection {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            user: None,
            pass: None,
        }
    }
}

impl fmt::Display for BrokerConnection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.user {
            Some(user) => write!(f, "{}@{}:{}", user, self.host, self.port),
            None => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

/// Caller-supplied connect arguments; unset fields fall back to the defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub pass: Option<String>,
}

impl BrokerConnection {
    /// Default connection seeded from the configuration file.
    pub fn from_defaults(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            user: None,
            pass: None,
        }
    }

    /// Builds the connection a `connect` call switches to.
    ///
    /// Empty host strings count as unset so a bare `connect` always lands on the
    /// defaults.
    pub fn connect(defaults: &BrokerConnection, opts: ConnectOptions) -> Self {
        let connection = Self {
            host: opts
                .host
                .filter(|h| !h.is_empty())
                .unwrap_or_else(|| defaults.host.clone()),
            port: opts.port.unwrap_or(defaults.port),
            user: opts.user.filter(|u| !u.is_empty()),
            pass: opts.pass.filter(|p| !p.is_empty()),
        };
        info!("Broker connection set to {}", connection);
        connection
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_connection_is_localhost_1883() {
        let connection = BrokerConnection::default();
        assert_eq!(connection.host, "127.0.0.1");
        assert_eq!(connection.port, 1883);
        assert_eq!(connection.user, None);
        assert_eq!(connection.pass, None);
    }

    #[test]
    fn connect_without_arguments_yields_defaults() {
        let defaults = BrokerConnection::from_defaults("broker.local", 1884);
        let connection = BrokerConnection::connect(&defaults, ConnectOptions::default());
        assert_eq!(connection, defaults);
    }

    #[test]
    fn connect_replaces_state_wholesale() {
        let defaults = BrokerConnection::default();
        let first = BrokerConnection::connect(
            &defaults,
            ConnectOptions {
                host: Some("one.example".to_string()),
                port: None,
                user: Some("alice".to_string()),
                pass: Some("secret".to_string()),
            },
        );
        assert_eq!(first.user.as_deref(), Some("alice"));

        // A second connect without credentials must not inherit the old ones.
        let second = BrokerConnection::connect(
            &defaults,
            ConnectOptions {
                host: Some("two.example".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(second.host, "two.example");
        assert_eq!(second.port, 1883);
        assert_eq!(second.user, None);
        assert_eq!(second.pass, None);
    }

    #[test]
    fn empty_host_counts_as_unset() {
        let defaults = BrokerConnection::default();
        let connection = BrokerConnection::connect(
            &defaults,
            ConnectOptions {
                host: Some(String::new()),
                port: Some(8883),
                ..Default::default()
            },
        );
        assert_eq!(connection.host, "127.0.0.1");
        assert_eq!(connection.port, 8883);
    }
}
