use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Network address (plus optional credential) of one cache instance.
///
/// Fields are private so an endpoint cannot change once built; pools and
/// factories hold on to them for their whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Endpoint {
    host: String,
    port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    password: Option<String>,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            password: None,
        }
    }

    /// Same endpoint, authenticated with `password`. An empty password means none.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        let password = password.into();
        self.password = if password.is_empty() {
            None
        } else {
            Some(password)
        };
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }

    /// `host:port`, used for logging and hashing. Never contains the password.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Connection URL understood by the redis client (credentials are sent
    /// separately with AUTH).
    pub fn url(&self) -> String {
        format!("redis://{}:{}/", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    /// Parses `host:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| EndpointError::MissingPort(s.to_string()))?;
        if host.is_empty() {
            return Err(EndpointError::MissingHost(s.to_string()));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| EndpointError::InvalidPort(s.to_string()))?;
        if port == 0 {
            return Err(EndpointError::InvalidPort(s.to_string()));
        }
        Ok(Self::new(host, port))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("Endpoint '{0}' has no port (expected host:port)")]
    MissingPort(String),
    #[error("Endpoint '{0}' has no host")]
    MissingHost(String),
    #[error("Endpoint '{0}' has an invalid port")]
    InvalidPort(String),
}
