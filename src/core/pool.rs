use crate::config::ConnectionPoolConfig;
use crate::core::client::{ClientError, Connection, Connector};
use crate::core::connection_pool::{
    ConnectFailures, ConnectionPoolBuilder, FactoryManager, FactoryPool,
};
use crate::core::endpoint::Endpoint;
use crate::core::factory::{ConnectionFactory, RoundRobinFactory, SingleEndpointFactory};
use crate::core::metrics::{MetricsSnapshot, PoolMetrics};
use async_trait::async_trait;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Bounded set of connections with exclusive checkout.
///
/// Every handle obtained from [`Pool::acquire`] must go back through exactly
/// one of [`Pool::release`] (healthy) or [`Pool::invalidate`] (broken).
#[async_trait]
pub trait Pool: Send + Sync + 'static {
    type Conn: Connection;
    type Handle: DerefMut<Target = Self::Conn> + Send;

    /// Pool name/identifier
    fn name(&self) -> &str;

    /// Check out a handle, creating one when none is idle, waiting at most the
    /// configured timeout when the pool is at capacity
    async fn acquire(&self) -> Result<Self::Handle, PoolError>;

    /// Return a healthy handle to the idle set
    async fn release(&self, handle: Self::Handle) -> Result<(), PoolError>;

    /// Destroy a broken handle; it never returns to the idle set
    async fn invalidate(&self, handle: Self::Handle) -> Result<(), PoolError>;

    /// Close the pool. Safe to call more than once.
    async fn destroy(&self) -> Result<(), PoolError>;
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Connection error: {0}")]
    Connection(#[from] ClientError),
    #[error("Pool '{pool}' exhausted: no connection available after {waited:?}")]
    Exhausted { pool: String, waited: Duration },
    #[error("Pool '{0}' has been destroyed")]
    Closed(String),
    #[error("Pool '{pool}' initialization failed: {reason}")]
    InitializationFailed { pool: String, reason: String },
    #[error("No endpoints configured for {0} pool")]
    NoEndpoints(String),
}

/// Handle checked out of a [`ManagedPool`]
pub struct PooledHandle<F: ConnectionFactory> {
    inner: bb8::PooledConnection<'static, FactoryManager<F>>,
}

impl<F: ConnectionFactory> std::fmt::Debug for PooledHandle<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledHandle").finish_non_exhaustive()
    }
}

impl<F: ConnectionFactory> Deref for PooledHandle<F> {
    type Target = F::Conn;

    fn deref(&self) -> &F::Conn {
        &self.inner.conn
    }
}

impl<F: ConnectionFactory> DerefMut for PooledHandle<F> {
    fn deref_mut(&mut self) -> &mut F::Conn {
        &mut self.inner.conn
    }
}

/// Connection counts reported by the underlying pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolState {
    pub connections: u32,
    pub idle_connections: u32,
}

/// bb8-backed pool whose connections come from a [`ConnectionFactory`]
pub struct ManagedPool<F: ConnectionFactory> {
    name: String,
    factory: Arc<F>,
    inner: RwLock<Option<FactoryPool<F>>>,
    wait_timeout: Duration,
    test_on_return: bool,
    metrics: Arc<PoolMetrics>,
    failures: Arc<ConnectFailures>,
}

impl<F: ConnectionFactory> ManagedPool<F> {
    /// Create a pool without opening connections
    pub fn new(factory: F, config: &ConnectionPoolConfig) -> Self {
        Self::with_capacity(factory, config, 0)
    }

    fn with_capacity(factory: F, config: &ConnectionPoolConfig, min_capacity: u32) -> Self {
        let name = factory.name().to_string();
        let factory = Arc::new(factory);
        let metrics = Arc::new(PoolMetrics::new(name.clone()));
        let failures = Arc::new(ConnectFailures::new());
        let manager = FactoryManager::new(
            Arc::clone(&factory),
            Arc::clone(&metrics),
            Arc::clone(&failures),
        );
        let pool = ConnectionPoolBuilder::build_pool(manager, config, min_capacity);

        tracing::info!(
            "Pool '{}' created (max: {}, wait timeout: {}ms)",
            name,
            config.max_connections.max(min_capacity).max(1),
            config.connection_timeout_ms
        );

        Self {
            name,
            factory,
            inner: RwLock::new(Some(pool)),
            wait_timeout: Duration::from_millis(config.connection_timeout_ms),
            test_on_return: config.test_on_return,
            metrics,
            failures,
        }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Current connection counts, `None` once destroyed
    pub async fn state(&self) -> Option<PoolState> {
        self.inner.read().await.as_ref().map(|pool| {
            let state = pool.state();
            PoolState {
                connections: state.connections,
                idle_connections: state.idle_connections,
            }
        })
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.read().await.is_none()
    }

    /// Create `count` connections one after another and park them in the idle
    /// set in creation order.
    pub async fn prewarm(&self, count: usize) -> Result<(), PoolError> {
        let mut warmed = Vec::with_capacity(count);
        for _ in 0..count {
            match self.acquire().await {
                Ok(handle) => warmed.push(handle),
                Err(e) => {
                    return Err(PoolError::InitializationFailed {
                        pool: self.name.clone(),
                        reason: e.to_string(),
                    })
                }
            }
        }
        for handle in warmed {
            self.release(handle).await?;
        }
        // Pre-warm traffic is not caller traffic
        self.metrics.reset();
        tracing::info!("Pool '{}' pre-warmed with {} connections", self.name, count);
        Ok(())
    }
}

impl<K: Connector> ManagedPool<SingleEndpointFactory<K>> {
    /// Pool over a single master endpoint
    pub fn master(endpoint: Endpoint, connector: K, config: &ConnectionPoolConfig) -> Self {
        Self::new(SingleEndpointFactory::new(endpoint, connector), config)
    }
}

impl<K: Connector> ManagedPool<RoundRobinFactory<K>> {
    /// Pool cycling through `replicas`, pre-warmed with one connection per replica.
    ///
    /// Fails with [`PoolError::InitializationFailed`] when any replica cannot be
    /// opened during pre-warm. `min_idle` is not applied: background
    /// replenishment would advance the replica cursor out of cycle order.
    pub async fn round_robin(
        replicas: Vec<Endpoint>,
        connector: K,
        config: &ConnectionPoolConfig,
    ) -> Result<Self, PoolError> {
        let factory = RoundRobinFactory::new(replicas, connector)?;
        let count = factory.replica_count();
        if let Some(min_idle) = config.min_idle {
            tracing::warn!(
                "Pool '{}': min_idle {} ignored, round robin pools hold one connection per replica after pre-warm",
                factory.name(),
                min_idle
            );
        }
        let config = ConnectionPoolConfig {
            min_idle: None,
            ..config.clone()
        };
        let pool = Self::with_capacity(factory, &config, count as u32);
        if let Err(e) = pool.prewarm(count).await {
            let _ = pool.destroy().await;
            return Err(e);
        }
        Ok(pool)
    }

    pub fn replica_count(&self) -> usize {
        self.factory.replica_count()
    }
}

#[async_trait]
impl<F: ConnectionFactory> Pool for ManagedPool<F> {
    type Conn = F::Conn;
    type Handle = PooledHandle<F>;

    fn name(&self) -> &str {
        &self.name
    }

    async fn acquire(&self) -> Result<PooledHandle<F>, PoolError> {
        let pool = self
            .inner
            .read()
            .await
            .clone()
            .ok_or_else(|| PoolError::Closed(self.name.clone()))?;

        // Registered before waiting so a failure during the wait is not missed
        let _waiting = self.failures.enter();
        let connect_failed = self.failures.notified();
        let start = Instant::now();
        tokio::select! {
            // A connection bb8 handed over as well goes back to the next waiter
            biased;
            _ = connect_failed => {
                self.metrics.record_acquire_failure();
                Err(PoolError::Connection(self.failures.last_error()))
            }
            result = pool.get_owned() => match result {
                Ok(inner) => {
                    self.metrics.record_acquire(start.elapsed());
                    Ok(PooledHandle { inner })
                }
                Err(bb8::RunError::User(e)) => {
                    self.metrics.record_acquire_failure();
                    Err(PoolError::Connection(e))
                }
                Err(bb8::RunError::TimedOut) => {
                    self.metrics.record_exhausted();
                    Err(PoolError::Exhausted {
                        pool: self.name.clone(),
                        waited: self.wait_timeout,
                    })
                }
            },
        }
    }

    async fn release(&self, mut handle: PooledHandle<F>) -> Result<(), PoolError> {
        if self.test_on_return && !self.factory.validate(&mut *handle).await {
            tracing::debug!(
                "Pool '{}': handle to {} failed validation on return",
                self.name,
                handle.name()
            );
            return self.invalidate(handle).await;
        }
        self.metrics.record_release();
        // Dropping the bb8 guard puts the connection back in the idle queue
        drop(handle);
        Ok(())
    }

    async fn invalidate(&self, mut handle: PooledHandle<F>) -> Result<(), PoolError> {
        self.factory.destroy(&mut *handle).await;
        handle.inner.broken = true;
        self.metrics.record_invalidate();
        tracing::debug!("Pool '{}': invalidated handle to {}", self.name, handle.name());
        drop(handle);
        Ok(())
    }

    async fn destroy(&self) -> Result<(), PoolError> {
        if self.inner.write().await.take().is_some() {
            tracing::info!("Pool '{}' destroyed", self.name);
        }
        Ok(())
    }
}
