//! Caller-facing cache façade.
//!
//! A [`Template`] owns a read pool and a write pool (possibly the same pool)
//! and runs every command through [`Engine::with_connection`], which hands the
//! borrowed handle back with exactly one of `release` or `invalidate`. How a
//! read picks its pool, and whether it retries, is decided by the template's
//! [`ReadPolicy`].

use crate::core::client::{ClientError, Connection};
use crate::core::pool::{Pool, PoolError};
use crate::core::strategy::ReadPolicy;
use async_trait::async_trait;
use std::sync::Arc;

/// A unit of work run against one borrowed connection
#[async_trait]
pub trait Action<C: Connection>: Send + Sync {
    type Output: Send + 'static;

    async fn run(&self, conn: &mut C) -> Result<Self::Output, ClientError>;
}

/// GET
#[derive(Debug, Clone)]
pub struct Get {
    pub key: String,
}

impl Get {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

#[async_trait]
impl<C: Connection> Action<C> for Get {
    type Output = Option<String>;

    async fn run(&self, conn: &mut C) -> Result<Option<String>, ClientError> {
        conn.get(&self.key).await
    }
}

/// SET
#[derive(Debug, Clone)]
pub struct Set {
    pub key: String,
    pub value: String,
}

impl Set {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[async_trait]
impl<C: Connection> Action<C> for Set {
    type Output = String;

    async fn run(&self, conn: &mut C) -> Result<String, ClientError> {
        conn.set(&self.key, &self.value).await
    }
}

/// SETEX
#[derive(Debug, Clone)]
pub struct Setex {
    pub key: String,
    pub seconds: u64,
    pub value: String,
}

impl Setex {
    pub fn new(key: impl Into<String>, seconds: u64, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            seconds,
            value: value.into(),
        }
    }
}

#[async_trait]
impl<C: Connection> Action<C> for Setex {
    type Output = String;

    async fn run(&self, conn: &mut C) -> Result<String, ClientError> {
        conn.setex(&self.key, self.seconds, &self.value).await
    }
}

/// DEL
#[derive(Debug, Clone)]
pub struct Del {
    pub keys: Vec<String>,
}

impl Del {
    pub fn new(keys: Vec<String>) -> Self {
        Self { keys }
    }
}

#[async_trait]
impl<C: Connection> Action<C> for Del {
    type Output = i64;

    async fn run(&self, conn: &mut C) -> Result<i64, ClientError> {
        conn.del(&self.keys).await
    }
}

/// EXISTS
#[derive(Debug, Clone)]
pub struct Exists {
    pub key: String,
}

impl Exists {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

#[async_trait]
impl<C: Connection> Action<C> for Exists {
    type Output = bool;

    async fn run(&self, conn: &mut C) -> Result<bool, ClientError> {
        conn.exists(&self.key).await
    }
}

/// EXPIRE
#[derive(Debug, Clone)]
pub struct Expire {
    pub key: String,
    pub seconds: u64,
}

impl Expire {
    pub fn new(key: impl Into<String>, seconds: u64) -> Self {
        Self {
            key: key.into(),
            seconds,
        }
    }
}

#[async_trait]
impl<C: Connection> Action<C> for Expire {
    type Output = i64;

    async fn run(&self, conn: &mut C) -> Result<i64, ClientError> {
        conn.expire(&self.key, self.seconds).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    /// Transport failure; the handle involved was invalidated
    #[error("Connection error: {0}")]
    Connection(ClientError),
    /// The server rejected the command; the handle was released
    #[error("Command failed: {0}")]
    Command(ClientError),
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),
    #[error("Read unavailable after {attempts} attempts: {source}")]
    ReadUnavailable {
        attempts: usize,
        source: Box<TemplateError>,
    },
    #[error("No {0} pool configured")]
    NoPool(&'static str),
}

impl TemplateError {
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            TemplateError::Connection(_) | TemplateError::Pool(PoolError::Connection(_))
        )
    }

    /// Whether a failed read attempt may be repeated on another endpoint.
    ///
    /// Exhausted or destroyed pools and missing pools end the read at once.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TemplateError::Command(_)) || self.is_connection_error()
    }
}

/// Which keys a multi-key `del` reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelScope {
    AllKeys,
    /// Only the first key is deleted; the rest are dropped with a warning
    FirstKeyOnly,
}

#[derive(Debug, Clone, Copy)]
pub struct TemplateOptions {
    /// Reconnect read handles that report not-connected before use
    pub repair_reads: bool,
    /// Reconnect write handles that report not-connected before use
    pub repair_writes: bool,
    pub del_scope: DelScope,
}

impl Default for TemplateOptions {
    fn default() -> Self {
        Self {
            repair_reads: true,
            repair_writes: true,
            del_scope: DelScope::AllKeys,
        }
    }
}

/// Pools plus the borrow/run/return discipline shared by every template
pub struct Engine<R, W> {
    read_pool: Option<Arc<R>>,
    write_pool: Option<Arc<W>>,
    options: TemplateOptions,
}

impl<R: Pool, W: Pool> Engine<R, W> {
    pub fn new(
        read_pool: Option<Arc<R>>,
        write_pool: Option<Arc<W>>,
        options: TemplateOptions,
    ) -> Self {
        Self {
            read_pool,
            write_pool,
            options,
        }
    }

    pub fn read_pool(&self) -> Option<&Arc<R>> {
        self.read_pool.as_ref()
    }

    pub fn write_pool(&self) -> Option<&Arc<W>> {
        self.write_pool.as_ref()
    }

    pub fn options(&self) -> &TemplateOptions {
        &self.options
    }

    /// One attempt on the read pool
    pub async fn with_read_pool<A>(&self, action: &A) -> Result<A::Output, TemplateError>
    where
        A: Action<R::Conn>,
    {
        let pool = self.read_pool.as_deref().ok_or(TemplateError::NoPool("read"))?;
        Self::with_connection(pool, self.options.repair_reads, action).await
    }

    /// One attempt on the write pool
    pub async fn with_write_pool<A>(&self, action: &A) -> Result<A::Output, TemplateError>
    where
        A: Action<W::Conn>,
    {
        let pool = self
            .write_pool
            .as_deref()
            .ok_or(TemplateError::NoPool("write"))?;
        Self::with_connection(pool, self.options.repair_writes, action).await
    }

    /// Borrow a handle from `pool`, run `action` on it and hand it back.
    ///
    /// Connection-level failures invalidate the handle; any other outcome
    /// releases it. Either way the handle is returned exactly once, and
    /// failures doing so are logged, never reported.
    pub async fn with_connection<P, A>(
        pool: &P,
        repair: bool,
        action: &A,
    ) -> Result<A::Output, TemplateError>
    where
        P: Pool,
        A: Action<P::Conn>,
    {
        let mut handle = pool.acquire().await?;

        if repair && !handle.is_connected() {
            tracing::debug!("Reconnecting stale handle to {}", handle.name());
            if let Err(e) = handle.connect().await {
                Self::invalidate_quietly(pool, handle).await;
                return Err(TemplateError::Connection(e));
            }
        }

        match action.run(&mut *handle).await {
            Ok(output) => {
                Self::release_quietly(pool, handle).await;
                Ok(output)
            }
            Err(e) if e.is_connection_error() => {
                Self::invalidate_quietly(pool, handle).await;
                Err(TemplateError::Connection(e))
            }
            Err(e) => {
                Self::release_quietly(pool, handle).await;
                Err(TemplateError::Command(e))
            }
        }
    }

    async fn release_quietly<P: Pool>(pool: &P, handle: P::Handle) {
        if let Err(e) = pool.release(handle).await {
            tracing::debug!("Pool '{}': release failed: {}", pool.name(), e);
        }
    }

    async fn invalidate_quietly<P: Pool>(pool: &P, handle: P::Handle) {
        if let Err(e) = pool.invalidate(handle).await {
            tracing::debug!("Pool '{}': invalidate failed: {}", pool.name(), e);
        }
    }

    /// Close both pools. Missing pools are skipped and errors are swallowed.
    pub async fn destroy(&self) {
        if let Some(pool) = &self.read_pool {
            if let Err(e) = pool.destroy().await {
                tracing::debug!("Pool '{}': destroy failed: {}", pool.name(), e);
            }
        }
        if let Some(pool) = &self.write_pool {
            if let Err(e) = pool.destroy().await {
                tracing::debug!("Pool '{}': destroy failed: {}", pool.name(), e);
            }
        }
    }
}

/// Cache façade: reads go through the policy `P`, writes straight to the
/// write pool and are never retried.
pub struct Template<R, W, P> {
    engine: Engine<R, W>,
    policy: P,
}

impl<R: Pool, W: Pool, P: ReadPolicy<R, W>> Template<R, W, P> {
    pub fn new(
        read_pool: Option<Arc<R>>,
        write_pool: Option<Arc<W>>,
        policy: P,
        options: TemplateOptions,
    ) -> Self {
        Self {
            engine: Engine::new(read_pool, write_pool, options),
            policy,
        }
    }

    pub fn engine(&self) -> &Engine<R, W> {
        &self.engine
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut P {
        &mut self.policy
    }

    /// Run a custom read with the template's read policy
    pub async fn read<A>(&self, action: &A) -> Result<A::Output, TemplateError>
    where
        A: Action<R::Conn>,
    {
        self.policy.read(&self.engine, action).await
    }

    /// Run a custom write on the write pool
    pub async fn write<A>(&self, action: &A) -> Result<A::Output, TemplateError>
    where
        A: Action<W::Conn>,
    {
        self.engine.with_write_pool(action).await
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, TemplateError> {
        self.read(&Get::new(key)).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool, TemplateError> {
        self.read(&Exists::new(key)).await
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<String, TemplateError> {
        self.write(&Set::new(key, value)).await
    }

    pub async fn setex(
        &self,
        key: &str,
        seconds: u64,
        value: &str,
    ) -> Result<String, TemplateError> {
        self.write(&Setex::new(key, seconds, value)).await
    }

    pub async fn expire(&self, key: &str, seconds: u64) -> Result<i64, TemplateError> {
        self.write(&Expire::new(key, seconds)).await
    }

    /// Delete `keys`, returning how many existed. An empty list is a no-op.
    pub async fn del(&self, keys: &[String]) -> Result<i64, TemplateError> {
        let Some(first) = keys.first() else {
            return Ok(0);
        };

        let keys = match self.engine.options().del_scope {
            DelScope::AllKeys => keys.to_vec(),
            DelScope::FirstKeyOnly => {
                if keys.len() > 1 {
                    tracing::warn!(
                        "del: only '{}' is deleted, {} other keys are ignored",
                        first,
                        keys.len() - 1
                    );
                }
                vec![first.clone()]
            }
        };
        self.write(&Del::new(keys)).await
    }

    pub async fn destroy(&self) {
        self.engine.destroy().await;
    }
}

/// Object-safe view of any template, for callers that pick the variant at
/// runtime.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, TemplateError>;

    async fn set(&self, key: &str, value: &str) -> Result<String, TemplateError>;

    async fn setex(&self, key: &str, seconds: u64, value: &str)
        -> Result<String, TemplateError>;

    async fn del(&self, keys: &[String]) -> Result<i64, TemplateError>;

    async fn exists(&self, key: &str) -> Result<bool, TemplateError>;

    async fn expire(&self, key: &str, seconds: u64) -> Result<i64, TemplateError>;

    async fn destroy(&self);

    /// Name of the read policy in use
    fn policy_name(&self) -> &str;
}

#[async_trait]
impl<R: Pool, W: Pool, P: ReadPolicy<R, W>> Cache for Template<R, W, P> {
    async fn get(&self, key: &str) -> Result<Option<String>, TemplateError> {
        Template::get(self, key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<String, TemplateError> {
        Template::set(self, key, value).await
    }

    async fn setex(
        &self,
        key: &str,
        seconds: u64,
        value: &str,
    ) -> Result<String, TemplateError> {
        Template::setex(self, key, seconds, value).await
    }

    async fn del(&self, keys: &[String]) -> Result<i64, TemplateError> {
        Template::del(self, keys).await
    }

    async fn exists(&self, key: &str) -> Result<bool, TemplateError> {
        Template::exists(self, key).await
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<i64, TemplateError> {
        Template::expire(self, key, seconds).await
    }

    async fn destroy(&self) {
        Template::destroy(self).await
    }

    fn policy_name(&self) -> &str {
        self.policy.name()
    }
}
