//! Store address resolution.
//!
//! Explicit table properties win; otherwise the host falls back to ambient
//! settings and the port to ambient settings, then to [`DEFAULT_PORT`].

use snafu::prelude::*;
use std::fmt;
use std::str::FromStr;

use super::settings::{Settings, keys};
use crate::error::{ConfigError, InvalidPortSnafu, InvalidSettingSnafu, NoAddressSnafu};

/// Port used when no source names one.
pub const DEFAULT_PORT: u16 = 9200;

/// A validated store address. IPv6 hosts are held without brackets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Create an endpoint; the host must be non-blank and the port positive.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, ConfigError> {
        let raw = host.into();
        let host = raw.trim();
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        ensure!(!host.trim().is_empty(), NoAddressSnafu);
        ensure!(
            port > 0,
            InvalidPortSnafu {
                value: port.to_string()
            }
        );
        Ok(Self {
            host: host.trim().to_string(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Base URL for the HTTP client.
    pub fn url(&self) -> String {
        format!("http://{self}")
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            InvalidSettingSnafu {
                key: keys::ADDRESS,
                value: s.to_string(),
            }
            .build()
        };
        let (host, port) = split_host_port(s).ok_or_else(invalid)?;
        let port = port.ok_or_else(invalid)?;
        Endpoint::new(host, port)
    }
}

/// Resolve the store endpoint for a job.
///
/// `explicit_port` of `None` or `Some(0)` means "not given". A port embedded
/// in the chosen host (`es1:9300`) beats ambient and default ports but not an
/// explicit one.
pub fn resolve(
    explicit_host: Option<&str>,
    explicit_port: Option<u16>,
    ambient: &Settings,
) -> Result<Endpoint, ConfigError> {
    let raw_host = explicit_host
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .or_else(|| ambient.get_trimmed(keys::HOST))
        .context(NoAddressSnafu)?;

    let (host, embedded_port) = split_host_port(raw_host).context(InvalidPortSnafu {
        value: raw_host.to_string(),
    })?;

    let port = match explicit_port.filter(|p| *p > 0).or(embedded_port) {
        Some(port) => port,
        None => match ambient.get_trimmed(keys::PORT) {
            Some(raw) => parse_port(raw)?,
            None => DEFAULT_PORT,
        },
    };

    Endpoint::new(host, port)
}

/// Parse a positive port number.
pub(crate) fn parse_port(raw: &str) -> Result<u16, ConfigError> {
    match raw.trim().parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => InvalidPortSnafu {
            value: raw.to_string(),
        }
        .fail(),
    }
}

/// Split `host[:port]` or `[v6][:port]`, dropping the brackets. Returns `None`
/// when a port suffix is present but invalid.
fn split_host_port(raw: &str) -> Option<(&str, Option<u16>)> {
    if let Some(rest) = raw.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        if tail.is_empty() {
            return Some((host, None));
        }
        let port = tail.strip_prefix(':')?;
        return parse_port(port).ok().map(|p| (host, Some(p)));
    }
    match raw.rsplit_once(':') {
        // Bare IPv6 literals carry several colons; leave them alone.
        Some((host, _)) if host.contains(':') => Some((raw, None)),
        Some((host, port)) => parse_port(port).ok().map(|p| (host, Some(p))),
        None => Some((raw, None)),
    }
}
