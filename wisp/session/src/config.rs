//! String-keyed session configuration
//!
//! A [`Config`] is a flat map of string keys to string values. Well-known
//! keys are listed in [`keys`]; every one of them has a built-in default,
//! so an empty config describes a usable client session (minus the
//! `connect` endpoint, which has no sensible default). Unknown keys are
//! stored verbatim and ignored by the session.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use wisp_link::WhatAmI;

/// Well-known configuration keys.
pub mod keys {
    /// Session mode: `router`, `peer` or `client`.
    pub const MODE: &str = "mode";
    /// Endpoint to connect to, e.g. `tcp/127.0.0.1:7447`.
    pub const CONNECT: &str = "connect";
    /// How long a scout listens for hellos, e.g. `3s` or `3000`.
    pub const SCOUTING_TIMEOUT: &str = "scouting/timeout";
    /// Multicast group scouts probe, e.g. `udp/224.0.0.224:7446`.
    pub const SCOUTING_ADDRESS: &str = "scouting/address";
    /// Silence after which the peer is presumed dead.
    pub const LEASE_TIMEOUT: &str = "lease/timeout";
    /// Interval between keep-alives on an otherwise idle link.
    pub const LEASE_KEEPALIVE: &str = "lease/keepalive";
    /// Deadline for the open handshake.
    pub const OPEN_TIMEOUT: &str = "open/timeout";
    /// Maximum number of live subscribers.
    pub const LIMIT_SUBSCRIBERS: &str = "limits/subscribers";
    /// Maximum number of live queryables.
    pub const LIMIT_QUERYABLES: &str = "limits/queryables";
    /// Maximum number of live publishers.
    pub const LIMIT_PUBLISHERS: &str = "limits/publishers";
    /// Maximum number of queries in flight.
    pub const LIMIT_QUERIES: &str = "limits/queries";
}

/// Errors raised while inserting or resolving configuration entries.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The mode value is not `router`, `peer` or `client`.
    #[error("unknown mode `{0}`")]
    UnknownMode(String),

    /// A duration value is neither a humantime string nor bare milliseconds.
    #[error("invalid duration `{0}`")]
    BadDuration(String),

    /// A limit value is not a non-negative integer.
    #[error("invalid number `{0}`")]
    BadNumber(String),

    /// An endpoint value is missing its protocol prefix or address.
    #[error("invalid endpoint `{0}`")]
    BadEndpoint(String),

    /// `connect` is required for the requested operation but absent.
    #[error("no connect endpoint configured")]
    MissingEndpoint,
}

fn default_for(key: &str) -> Option<&'static str> {
    match key {
        keys::MODE => Some("client"),
        keys::SCOUTING_TIMEOUT => Some("3s"),
        keys::SCOUTING_ADDRESS => Some("udp/224.0.0.224:7446"),
        keys::LEASE_TIMEOUT => Some("10s"),
        keys::LEASE_KEEPALIVE => Some("2500"),
        keys::OPEN_TIMEOUT => Some("10s"),
        keys::LIMIT_SUBSCRIBERS | keys::LIMIT_QUERYABLES | keys::LIMIT_PUBLISHERS => Some("64"),
        keys::LIMIT_QUERIES => Some("16"),
        _ => None,
    }
}

/// Parses `10s`-style humantime values, falling back to bare milliseconds.
fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    if let Ok(parsed) = humantime::parse_duration(value) {
        return Ok(parsed);
    }
    value
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| ConfigError::BadDuration(value.to_string()))
}

fn parse_limit(value: &str) -> Result<usize, ConfigError> {
    value
        .parse::<usize>()
        .map_err(|_| ConfigError::BadNumber(value.to_string()))
}

/// Splits `proto/address` into its two parts.
fn split_endpoint(value: &str) -> Result<(&str, &str), ConfigError> {
    match value.split_once('/') {
        Some((proto, addr)) if !proto.is_empty() && !addr.is_empty() => Ok((proto, addr)),
        _ => Err(ConfigError::BadEndpoint(value.to_string())),
    }
}

/// Session configuration as an ordered string map.
#[derive(Debug, Clone, Default)]
pub struct Config {
    entries: BTreeMap<String, String>,
}

impl Config {
    /// Creates an empty config; every well-known key reads as its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a key-value pair, validating values of well-known keys.
    ///
    /// Unknown keys are stored without validation.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), ConfigError> {
        let key = key.into();
        let value = value.into();
        validate(&key, &value)?;
        self.entries.insert(key, value);
        Ok(())
    }

    /// Looks up a key, falling back to the built-in default if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .map(String::as_str)
            .or_else(|| default_for(key))
    }

    /// Typed view of the session-related entries.
    pub(crate) fn resolve(&self) -> Result<SessionConfig, ConfigError> {
        let mode = self.mode()?;
        let connect = match self.entries.get(keys::CONNECT) {
            Some(value) => {
                let (_, addr) = split_endpoint(value)?;
                Some(addr.to_string())
            }
            None => None,
        };
        Ok(SessionConfig {
            mode,
            connect,
            open_timeout: self.duration(keys::OPEN_TIMEOUT)?,
            lease_timeout: self.duration(keys::LEASE_TIMEOUT)?,
            keepalive: self.duration(keys::LEASE_KEEPALIVE)?,
            limits: Limits {
                subscribers: self.limit(keys::LIMIT_SUBSCRIBERS)?,
                queryables: self.limit(keys::LIMIT_QUERYABLES)?,
                publishers: self.limit(keys::LIMIT_PUBLISHERS)?,
                queries: self.limit(keys::LIMIT_QUERIES)?,
            },
        })
    }

    /// The session mode, defaulting to client.
    pub fn mode(&self) -> Result<WhatAmI, ConfigError> {
        let value = self.get(keys::MODE).unwrap_or("client");
        WhatAmI::from_str(value).map_err(|_| ConfigError::UnknownMode(value.to_string()))
    }

    fn duration(&self, key: &str) -> Result<Duration, ConfigError> {
        match self.get(key) {
            Some(value) => parse_duration(value),
            None => Err(ConfigError::BadDuration(String::new())),
        }
    }

    fn limit(&self, key: &str) -> Result<usize, ConfigError> {
        match self.get(key) {
            Some(value) => parse_limit(value),
            None => Err(ConfigError::BadNumber(String::new())),
        }
    }
}

fn validate(key: &str, value: &str) -> Result<(), ConfigError> {
    match key {
        keys::MODE => {
            WhatAmI::from_str(value).map_err(|_| ConfigError::UnknownMode(value.to_string()))?;
        }
        keys::CONNECT => {
            let (proto, _) = split_endpoint(value)?;
            if proto != "tcp" {
                return Err(ConfigError::BadEndpoint(value.to_string()));
            }
        }
        keys::SCOUTING_ADDRESS => {
            let (proto, addr) = split_endpoint(value)?;
            if proto != "udp" || addr.parse::<SocketAddr>().is_err() {
                return Err(ConfigError::BadEndpoint(value.to_string()));
            }
        }
        keys::SCOUTING_TIMEOUT | keys::LEASE_TIMEOUT | keys::LEASE_KEEPALIVE
        | keys::OPEN_TIMEOUT => {
            parse_duration(value)?;
        }
        keys::LIMIT_SUBSCRIBERS | keys::LIMIT_QUERYABLES | keys::LIMIT_PUBLISHERS
        | keys::LIMIT_QUERIES => {
            parse_limit(value)?;
        }
        _ => {}
    }
    Ok(())
}

/// Resolved session settings.
#[derive(Debug, Clone)]
pub(crate) struct SessionConfig {
    pub mode: WhatAmI,
    /// Connect address with the `tcp/` prefix stripped.
    pub connect: Option<String>,
    pub open_timeout: Duration,
    pub lease_timeout: Duration,
    pub keepalive: Duration,
    pub limits: Limits,
}

/// Declaration table limits.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Limits {
    pub subscribers: usize,
    pub queryables: usize,
    pub publishers: usize,
    pub queries: usize,
}

/// Resolved scouting settings.
#[derive(Debug, Clone, Copy)]
pub struct ScoutConfig {
    /// How long to listen for hellos.
    pub timeout: Duration,
    /// Multicast group to probe.
    pub address: SocketAddr,
}

impl ScoutConfig {
    /// Reads `scouting/timeout` and `scouting/address` from a config.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let timeout = match config.get(keys::SCOUTING_TIMEOUT) {
            Some(value) => parse_duration(value)?,
            None => Duration::from_secs(3),
        };
        let raw = config
            .get(keys::SCOUTING_ADDRESS)
            .ok_or(ConfigError::MissingEndpoint)?;
        let (_, addr) = split_endpoint(raw)?;
        let address = addr
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::BadEndpoint(raw.to_string()))?;
        Ok(Self { timeout, address })
    }
}
