use crate::core::client::{ClientError, Connection, Connector};
use crate::core::endpoint::Endpoint;
use crate::core::pool::PoolError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Creates, checks and tears down the connections a pool hands out
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    type Conn: Connection;

    /// Open a new connected (and authenticated) connection
    async fn create(&self) -> Result<Self::Conn, ClientError>;

    /// Best-effort shutdown: QUIT, then drop the transport. Never fails.
    async fn destroy(&self, conn: &mut Self::Conn) {
        if let Err(e) = conn.quit().await {
            tracing::debug!("QUIT on {} failed during destroy: {}", conn.name(), e);
        }
        conn.disconnect().await;
    }

    /// Liveness check: true only when the endpoint answers PONG
    async fn validate(&self, conn: &mut Self::Conn) -> bool {
        matches!(conn.ping().await, Ok(reply) if reply == "PONG")
    }

    /// Factory name, used to label pools and log lines
    fn name(&self) -> &str;
}

/// Connect to `endpoint`; the connection authenticates itself when the
/// endpoint carries a password
pub async fn open_endpoint<K: Connector>(
    connector: &K,
    endpoint: &Endpoint,
) -> Result<K::Conn, ClientError> {
    let mut conn = connector.client_for(endpoint)?;
    conn.connect().await?;
    tracing::debug!("Opened connection to {}", endpoint);
    Ok(conn)
}

/// Factory for a single master endpoint
pub struct SingleEndpointFactory<K> {
    name: String,
    endpoint: Endpoint,
    connector: K,
}

impl<K: Connector> SingleEndpointFactory<K> {
    pub fn new(endpoint: Endpoint, connector: K) -> Self {
        Self {
            name: format!("master {}", endpoint),
            endpoint,
            connector,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

#[async_trait]
impl<K: Connector> ConnectionFactory for SingleEndpointFactory<K> {
    type Conn = K::Conn;

    async fn create(&self) -> Result<K::Conn, ClientError> {
        open_endpoint(&self.connector, &self.endpoint).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Factory that cycles through an ordered replica set, one endpoint per creation.
///
/// The cursor always holds an index in `0..replicas.len()` and moves with a
/// single atomic update, so concurrent creations each observe a distinct step
/// and the cycle wraps without gaps.
pub struct RoundRobinFactory<K> {
    name: String,
    replicas: Vec<Endpoint>,
    cursor: AtomicUsize,
    connector: K,
}

impl<K: Connector> RoundRobinFactory<K> {
    pub fn new(replicas: Vec<Endpoint>, connector: K) -> Result<Self, PoolError> {
        if replicas.is_empty() {
            return Err(PoolError::NoEndpoints("round robin".to_string()));
        }
        let name = format!(
            "round_robin [{}]",
            replicas
                .iter()
                .map(Endpoint::address)
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(Self {
            name,
            replicas,
            cursor: AtomicUsize::new(0),
            connector,
        })
    }

    pub fn replicas(&self) -> &[Endpoint] {
        &self.replicas
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    /// Advance the cursor and return the endpoint it pointed at
    pub fn next_endpoint(&self) -> &Endpoint {
        let len = self.replicas.len();
        let index = match self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |i| Some((i + 1) % len))
        {
            Ok(previous) | Err(previous) => previous,
        };
        &self.replicas[index]
    }
}

#[async_trait]
impl<K: Connector> ConnectionFactory for RoundRobinFactory<K> {
    type Conn = K::Conn;

    async fn create(&self) -> Result<K::Conn, ClientError> {
        let endpoint = self.next_endpoint();
        tracing::debug!("Round robin factory creating connection to {}", endpoint);
        open_endpoint(&self.connector, endpoint).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
