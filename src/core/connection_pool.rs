use crate::config::ConnectionPoolConfig;
use crate::core::client::ClientError;
use crate::core::factory::ConnectionFactory;
use crate::core::metrics::PoolMetrics;
use async_trait::async_trait;
use bb8::Pool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

/// A pooled connection plus the flag `invalidate` sets before handing it back
pub struct Slot<C> {
    pub(crate) conn: C,
    pub(crate) broken: bool,
}

impl<C> Slot<C> {
    fn new(conn: C) -> Self {
        Self {
            conn,
            broken: false,
        }
    }
}

/// Fails one caller waiting on the pool for each connection attempt that fails.
///
/// bb8 sends connect errors to its error sink only, so a waiter would sit out
/// the whole timeout on an endpoint that refuses connections. Each failed
/// creation stands for one waiter's approval, so it wakes exactly one waiter.
#[derive(Debug, Default)]
pub struct ConnectFailures {
    notify: Notify,
    waiting: AtomicUsize,
    last: Mutex<Option<String>>,
}

/// Marks the holder as waiting on the pool until dropped
pub struct Waiting<'a> {
    waiting: &'a AtomicUsize,
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ConnectFailures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter; failures recorded while nobody waits wake no one
    pub fn enter(&self) -> Waiting<'_> {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        Waiting {
            waiting: &self.waiting,
        }
    }

    /// Future completing when a failure is handed to this waiter
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    pub fn record(&self, error: &ClientError) {
        if let Ok(mut last) = self.last.lock() {
            *last = Some(error.to_string());
        }
        if self.waiting.load(Ordering::SeqCst) > 0 {
            self.notify.notify_one();
        }
    }

    /// The most recent failure, as a connection error
    pub fn last_error(&self) -> ClientError {
        let message = self
            .last
            .lock()
            .ok()
            .and_then(|last| last.clone())
            .unwrap_or_else(|| "connection attempt failed".to_string());
        ClientError::Connection(message)
    }
}

/// bb8 connection manager driven by a [`ConnectionFactory`]
pub struct FactoryManager<F> {
    factory: Arc<F>,
    metrics: Arc<PoolMetrics>,
    failures: Arc<ConnectFailures>,
}

impl<F: ConnectionFactory> FactoryManager<F> {
    pub fn new(
        factory: Arc<F>,
        metrics: Arc<PoolMetrics>,
        failures: Arc<ConnectFailures>,
    ) -> Self {
        Self {
            factory,
            metrics,
            failures,
        }
    }

    pub fn factory(&self) -> &Arc<F> {
        &self.factory
    }
}

#[async_trait]
impl<F: ConnectionFactory> bb8::ManageConnection for FactoryManager<F> {
    type Connection = Slot<F::Conn>;
    type Error = ClientError;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        self.metrics.record_connection_attempt();
        match self.factory.create().await {
            Ok(conn) => {
                self.metrics.record_connection_success();
                Ok(Slot::new(conn))
            }
            Err(e) => {
                self.metrics.record_connection_failure();
                tracing::debug!("{}: connection creation failed: {}", self.factory.name(), e);
                self.failures.record(&e);
                Err(e)
            }
        }
    }

    async fn is_valid(&self, slot: &mut Self::Connection) -> Result<(), Self::Error> {
        if self.factory.validate(&mut slot.conn).await {
            Ok(())
        } else {
            Err(ClientError::Connection(format!(
                "{}: liveness check failed",
                self.factory.name()
            )))
        }
    }

    fn has_broken(&self, slot: &mut Self::Connection) -> bool {
        slot.broken
    }
}

/// Type alias for the underlying bb8 pool
pub type FactoryPool<F> = Pool<FactoryManager<F>>;

/// Builder for bb8 pools from configuration
pub struct ConnectionPoolBuilder;

impl ConnectionPoolBuilder {
    /// Build a pool without opening any connection up front.
    ///
    /// `min_capacity` raises `max_connections` when a caller needs to hold that
    /// many handles at once (round-robin pre-warm). Idle handles are reused
    /// oldest first, so a pool filled in creation order hands them out in
    /// that order.
    pub fn build_pool<F: ConnectionFactory>(
        manager: FactoryManager<F>,
        config: &ConnectionPoolConfig,
        min_capacity: u32,
    ) -> FactoryPool<F> {
        let max_size = config.max_connections.max(min_capacity).max(1);
        let min_idle = config.min_idle.map(|n| n.min(max_size));

        Pool::builder()
            .max_size(max_size)
            .min_idle(min_idle)
            .test_on_check_out(config.test_on_borrow)
            .retry_connection(false)
            .connection_timeout(Duration::from_millis(config.connection_timeout_ms.max(1)))
            .idle_timeout(config.idle_timeout_secs.map(Duration::from_secs))
            .max_lifetime(config.max_lifetime_secs.map(Duration::from_secs))
            .queue_strategy(bb8::QueueStrategy::Fifo)
            .build_unchecked(manager)
    }
}
