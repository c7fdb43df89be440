use crate::core::endpoint::Endpoint;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{FromRedisValue, RedisError};
use std::time::Duration;

/// Command surface of one live cache connection.
///
/// A connection is bound to one endpoint (or, for sharded connections, to a
/// fixed set of endpoints) and is used by exactly one operation at a time.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Identifier used in logs, usually the endpoint address
    fn name(&self) -> &str;

    async fn get(&mut self, key: &str) -> Result<Option<String>, ClientError>;

    async fn set(&mut self, key: &str, value: &str) -> Result<String, ClientError>;

    async fn setex(&mut self, key: &str, seconds: u64, value: &str)
        -> Result<String, ClientError>;

    async fn del(&mut self, keys: &[String]) -> Result<i64, ClientError>;

    async fn exists(&mut self, key: &str) -> Result<bool, ClientError>;

    async fn expire(&mut self, key: &str, seconds: u64) -> Result<i64, ClientError>;

    /// Whether the transport session is currently open
    fn is_connected(&self) -> bool;

    /// (Re)open the transport session, authenticating when the endpoint
    /// carries a password
    async fn connect(&mut self) -> Result<(), ClientError>;

    /// Drop the transport session. Never fails.
    async fn disconnect(&mut self);

    /// Polite QUIT before closing
    async fn quit(&mut self) -> Result<(), ClientError>;

    async fn auth(&mut self, password: &str) -> Result<(), ClientError>;

    async fn ping(&mut self) -> Result<String, ClientError>;
}

/// Builds unconnected [`Connection`]s for endpoints.
///
/// Factories call [`Connection::connect`] themselves, so a connector only
/// has to know how to describe the target and its credentials.
pub trait Connector: Send + Sync + 'static {
    type Conn: Connection;

    fn client_for(&self, endpoint: &Endpoint) -> Result<Self::Conn, ClientError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Not connected to {0}")]
    NotConnected(String),
    #[error("Command error: {0}")]
    Response(String),
}

impl ClientError {
    /// Transport-level failures: the handle that produced them must not be reused.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, ClientError::Connection(_) | ClientError::NotConnected(_))
    }
}

fn classify(endpoint: &str, e: RedisError) -> ClientError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
    {
        ClientError::Connection(format!("{}: {}", endpoint, e))
    } else {
        ClientError::Response(format!("{}: {}", endpoint, e))
    }
}

/// Redis-backed connection over a multiplexed tokio session
pub struct RedisConnection {
    name: String,
    client: redis::Client,
    session: Option<MultiplexedConnection>,
    password: Option<String>,
    connect_timeout: Duration,
}

impl RedisConnection {
    pub fn new(endpoint: &Endpoint, connect_timeout: Duration) -> Result<Self, ClientError> {
        let client = redis::Client::open(endpoint.url())
            .map_err(|e| ClientError::Connection(format!("{}: {}", endpoint, e)))?;
        Ok(Self {
            name: endpoint.address(),
            client,
            session: None,
            password: endpoint.password().map(str::to_string),
            connect_timeout,
        })
    }

    async fn run<T>(&mut self, cmd: redis::Cmd) -> Result<T, ClientError>
    where
        T: FromRedisValue + Send,
    {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| ClientError::NotConnected(self.name.clone()))?;
        let result: redis::RedisResult<T> = cmd.query_async(session).await;
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                let err = classify(&self.name, e);
                if err.is_connection_error() {
                    // The multiplexed session is unusable once the transport broke
                    self.session = None;
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl Connection for RedisConnection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&mut self, key: &str) -> Result<Option<String>, ClientError> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.run(cmd).await
    }

    async fn set(&mut self, key: &str, value: &str) -> Result<String, ClientError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        self.run(cmd).await
    }

    async fn setex(
        &mut self,
        key: &str,
        seconds: u64,
        value: &str,
    ) -> Result<String, ClientError> {
        let mut cmd = redis::cmd("SETEX");
        cmd.arg(key).arg(seconds).arg(value);
        self.run(cmd).await
    }

    async fn del(&mut self, keys: &[String]) -> Result<i64, ClientError> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(keys);
        self.run(cmd).await
    }

    async fn exists(&mut self, key: &str) -> Result<bool, ClientError> {
        let mut cmd = redis::cmd("EXISTS");
        cmd.arg(key);
        self.run(cmd).await
    }

    async fn expire(&mut self, key: &str, seconds: u64) -> Result<i64, ClientError> {
        let mut cmd = redis::cmd("EXPIRE");
        cmd.arg(key).arg(seconds);
        self.run(cmd).await
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    async fn connect(&mut self) -> Result<(), ClientError> {
        let attempt = tokio::time::timeout(
            self.connect_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await;

        match attempt {
            Ok(Ok(session)) => {
                self.session = Some(session);
            }
            Ok(Err(e)) => {
                return Err(ClientError::Connection(format!("{}: {}", self.name, e)))
            }
            Err(_) => {
                return Err(ClientError::Connection(format!(
                    "Connection to {} timed out after {:?}",
                    self.name, self.connect_timeout
                )))
            }
        }

        // A fresh session starts unauthenticated, including after a repair
        if let Some(password) = self.password.clone() {
            if let Err(e) = self.auth(&password).await {
                self.session = None;
                return Err(ClientError::Connection(format!(
                    "Authentication to {} failed: {}",
                    self.name, e
                )));
            }
        }
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.session = None;
    }

    async fn quit(&mut self) -> Result<(), ClientError> {
        self.run::<()>(redis::cmd("QUIT")).await
    }

    async fn auth(&mut self, password: &str) -> Result<(), ClientError> {
        let mut cmd = redis::cmd("AUTH");
        cmd.arg(password);
        self.run::<()>(cmd).await
    }

    async fn ping(&mut self) -> Result<String, ClientError> {
        self.run(redis::cmd("PING")).await
    }
}

/// Connector producing [`RedisConnection`]s
#[derive(Debug, Clone)]
pub struct RedisConnector {
    connect_timeout: Duration,
}

impl RedisConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for RedisConnector {
    fn default() -> Self {
        Self::new(Duration::from_millis(2000))
    }
}

impl Connector for RedisConnector {
    type Conn = RedisConnection;

    fn client_for(&self, endpoint: &Endpoint) -> Result<RedisConnection, ClientError> {
        RedisConnection::new(endpoint, self.connect_timeout)
    }
}
