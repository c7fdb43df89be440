use crate::core::endpoint::Endpoint;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub pool: ConnectionPoolConfig,
    #[serde(default)]
    pub client: ClientConfig,
    pub template: TemplateConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionPoolConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default)]
    pub min_idle: Option<u32>,
    /// How long `acquire` waits for a handle before giving up
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_lifetime_secs: Option<u64>,
    #[serde(default)]
    pub test_on_borrow: bool,
    #[serde(default)]
    pub test_on_return: bool,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            min_idle: None,
            connection_timeout_ms: default_connection_timeout_ms(),
            idle_timeout_secs: default_idle_timeout_secs(),
            max_lifetime_secs: None,
            test_on_borrow: false,
            test_on_return: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

// Default values for pool and client configuration
fn default_max_connections() -> u32 {
    8
}
fn default_connection_timeout_ms() -> u64 {
    2000
}
fn default_idle_timeout_secs() -> Option<u64> {
    Some(300)
} // 5 minutes
fn default_connect_timeout_ms() -> u64 {
    2000
}

/// Which template to build, with its endpoints
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TemplateConfig {
    Simple {
        master: EndpointConfig,
    },
    RoundRobin {
        master: EndpointConfig,
        replicas: Vec<EndpointConfig>,
        /// Overrides the replica count as the read retry budget
        #[serde(default)]
        redundancy_factor: Option<usize>,
    },
    Sharded {
        shards: Vec<EndpointConfig>,
    },
    MixedSharded {
        master: EndpointConfig,
        shards: Vec<EndpointConfig>,
    },
}

impl TemplateConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            TemplateConfig::Simple { .. } => "simple",
            TemplateConfig::RoundRobin { .. } => "round_robin",
            TemplateConfig::Sharded { .. } => "sharded",
            TemplateConfig::MixedSharded { .. } => "mixed_sharded",
        }
    }
}

/// An endpoint written either as `"host:port"` or as a map
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum EndpointConfig {
    Address(String),
    Detailed {
        host: String,
        port: u16,
        #[serde(default)]
        password: Option<String>,
    },
}

impl EndpointConfig {
    pub fn to_endpoint(&self) -> Result<Endpoint, ConfigError> {
        let endpoint = match self {
            EndpointConfig::Address(address) => address
                .parse::<Endpoint>()
                .map_err(|e| ConfigError::ValidationError(e.to_string()))?,
            EndpointConfig::Detailed {
                host,
                port,
                password,
            } => {
                if host.is_empty() {
                    return Err(ConfigError::ValidationError(format!(
                        "Endpoint on port {} has an empty host",
                        port
                    )));
                }
                if *port == 0 {
                    return Err(ConfigError::ValidationError(format!(
                        "Endpoint '{}' has port 0",
                        host
                    )));
                }
                let endpoint = Endpoint::new(host.clone(), *port);
                match password {
                    Some(password) => endpoint.with_password(password.clone()),
                    None => endpoint,
                }
            }
        };
        Ok(endpoint)
    }
}

/// Convert a list of endpoint entries, rejecting an empty list
pub fn endpoints(entries: &[EndpointConfig], what: &str) -> Result<Vec<Endpoint>, ConfigError> {
    if entries.is_empty() {
        return Err(ConfigError::ValidationError(format!(
            "At least one {} endpoint is required",
            what
        )));
    }
    entries.iter().map(EndpointConfig::to_endpoint).collect()
}

impl Config {
    /// Load configuration from a YAML file
    pub async fn from_yaml_file(path: &str) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound(path.to_string())
            } else {
                ConfigError::IoError(e.to_string())
            }
        })?;

        Self::from_yaml_str(&content)
    }

    /// Parse configuration from a YAML string (useful for testing)
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration for common errors
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "pool.max_connections must be greater than 0".to_string(),
            ));
        }

        match &self.template {
            TemplateConfig::Simple { master } => {
                master.to_endpoint()?;
            }
            TemplateConfig::RoundRobin {
                master,
                replicas,
                redundancy_factor: _,
            } => {
                master.to_endpoint()?;
                endpoints(replicas, "replica")?;
            }
            TemplateConfig::Sharded { shards } => {
                endpoints(shards, "shard")?;
            }
            TemplateConfig::MixedSharded { master, shards } => {
                master.to_endpoint()?;
                endpoints(shards, "shard")?;
            }
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("File not found: {0}")]
    FileNotFound(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
}
