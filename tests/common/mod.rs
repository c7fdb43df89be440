//! Test doubles shared by the integration tests
//!
//! - `MockPool`: a `Pool` whose handles follow a scripted sequence of outcomes
//!   and which counts every acquire, release and invalidate
//! - `FakeCluster` / `FakeConnector`: an in-memory "cluster" of endpoints that
//!   can be taken down and brought back, for tests that go through `ManagedPool`
//! - `WhoServes`: a read action reporting which connection answered

#![allow(dead_code)]

use async_trait::async_trait;
use rejis::{Action, ClientError, Connection, Connector, Endpoint, Pool, PoolError};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// Scripted pool
// ============================================================================

/// How a handle handed out by `MockPool` behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every command succeeds
    Ok,
    /// Every command fails with a transport error
    ConnectionError,
    /// Every command fails with a server-side error
    CommandError,
    /// Reports not-connected; reconnecting works
    Stale,
    /// Reports not-connected; reconnecting fails
    Dead,
    /// `acquire` itself fails with a connection error
    Unreachable,
}

pub type CommandLog = Arc<Mutex<Vec<String>>>;

pub struct FakeConnection {
    name: String,
    outcome: Outcome,
    connected: bool,
    log: CommandLog,
}

impl FakeConnection {
    fn new(name: String, outcome: Outcome, log: CommandLog) -> Self {
        let connected = !matches!(outcome, Outcome::Stale | Outcome::Dead);
        Self {
            name,
            outcome,
            connected,
            log,
        }
    }

    fn command<T>(&mut self, command: String, reply: T) -> Result<T, ClientError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("{} {}", self.name, command));
        if !self.connected {
            return Err(ClientError::NotConnected(self.name.clone()));
        }
        match self.outcome {
            Outcome::ConnectionError => Err(ClientError::Connection(format!(
                "{}: connection reset",
                self.name
            ))),
            Outcome::CommandError => Err(ClientError::Response(format!(
                "{}: ERR rejected",
                self.name
            ))),
            _ => Ok(reply),
        }
    }
}

#[async_trait]
impl Connection for FakeConnection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&mut self, key: &str) -> Result<Option<String>, ClientError> {
        let reply = Some(format!("{}@{}", key, self.name));
        self.command(format!("GET {}", key), reply)
    }

    async fn set(&mut self, key: &str, value: &str) -> Result<String, ClientError> {
        self.command(format!("SET {} {}", key, value), "OK".to_string())
    }

    async fn setex(&mut self, key: &str, seconds: u64, value: &str) -> Result<String, ClientError> {
        self.command(
            format!("SETEX {} {} {}", key, seconds, value),
            "OK".to_string(),
        )
    }

    async fn del(&mut self, keys: &[String]) -> Result<i64, ClientError> {
        self.command(format!("DEL {}", keys.join(" ")), keys.len() as i64)
    }

    async fn exists(&mut self, key: &str) -> Result<bool, ClientError> {
        self.command(format!("EXISTS {}", key), true)
    }

    async fn expire(&mut self, key: &str, seconds: u64) -> Result<i64, ClientError> {
        self.command(format!("EXPIRE {} {}", key, seconds), 1)
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> Result<(), ClientError> {
        if self.outcome == Outcome::Dead {
            return Err(ClientError::Connection(format!("{} refused", self.name)));
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }

    async fn quit(&mut self) -> Result<(), ClientError> {
        Ok(())
    }

    async fn auth(&mut self, _password: &str) -> Result<(), ClientError> {
        Ok(())
    }

    async fn ping(&mut self) -> Result<String, ClientError> {
        self.command("PING".to_string(), "PONG".to_string())
    }
}

/// Pool handing out `FakeConnection`s that follow a script, then a fallback
pub struct MockPool {
    name: String,
    script: Mutex<VecDeque<Outcome>>,
    fallback: Outcome,
    log: CommandLog,
    closed: AtomicBool,
    broken_returns: bool,
    attempts: AtomicUsize,
    acquired: AtomicUsize,
    released: AtomicUsize,
    invalidated: AtomicUsize,
    destroyed: AtomicUsize,
}

impl MockPool {
    /// Every handle succeeds
    pub fn healthy(name: &str) -> Self {
        Self::scripted(name, vec![], Outcome::Ok)
    }

    /// Every handle behaves as `outcome`
    pub fn failing(name: &str, outcome: Outcome) -> Self {
        Self::scripted(name, vec![], outcome)
    }

    /// Handles follow `script` in order, then `fallback`
    pub fn scripted(name: &str, script: Vec<Outcome>, fallback: Outcome) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(script.into()),
            fallback,
            log: Arc::new(Mutex::new(Vec::new())),
            closed: AtomicBool::new(false),
            broken_returns: false,
            attempts: AtomicUsize::new(0),
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            invalidated: AtomicUsize::new(0),
            destroyed: AtomicUsize::new(0),
        }
    }

    /// Share a command log with other pools
    pub fn with_log(mut self, log: CommandLog) -> Self {
        self.log = log;
        self
    }

    /// `release` and `invalidate` still count the handle but report an error
    pub fn with_broken_returns(mut self) -> Self {
        self.broken_returns = true;
        self
    }

    fn returned(&self) -> Result<(), PoolError> {
        if self.broken_returns {
            return Err(PoolError::Connection(ClientError::Connection(format!(
                "{}: handle return failed",
                self.name
            ))));
        }
        Ok(())
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn invalidated(&self) -> usize {
        self.invalidated.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Handles still checked out
    pub fn outstanding(&self) -> usize {
        self.acquired() - self.released() - self.invalidated()
    }

    pub fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl Pool for MockPool {
    type Conn = FakeConnection;
    type Handle = Box<FakeConnection>;

    fn name(&self) -> &str {
        &self.name
    }

    async fn acquire(&self) -> Result<Box<FakeConnection>, PoolError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PoolError::Closed(self.name.clone()));
        }
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);

        if outcome == Outcome::Unreachable {
            return Err(PoolError::Connection(ClientError::Connection(format!(
                "{}: connection refused",
                self.name
            ))));
        }

        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeConnection::new(
            format!("{}#{}", self.name, attempt),
            outcome,
            Arc::clone(&self.log),
        )))
    }

    async fn release(&self, _handle: Box<FakeConnection>) -> Result<(), PoolError> {
        self.released.fetch_add(1, Ordering::SeqCst);
        self.returned()
    }

    async fn invalidate(&self, _handle: Box<FakeConnection>) -> Result<(), PoolError> {
        self.invalidated.fetch_add(1, Ordering::SeqCst);
        self.returned()
    }

    async fn destroy(&self) -> Result<(), PoolError> {
        self.closed.store(true, Ordering::SeqCst);
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// In-memory cluster
// ============================================================================

/// Endpoints sharing one key space, as a primary and its replicas would
#[derive(Default)]
pub struct FakeCluster {
    store: Mutex<HashMap<String, String>>,
    down: Mutex<HashSet<u16>>,
    opened: Mutex<Vec<u16>>,
    served: Mutex<HashMap<u16, usize>>,
    password: Mutex<Option<String>>,
}

impl FakeCluster {
    pub fn take_down(&self, port: u16) {
        self.down.lock().unwrap().insert(port);
    }

    pub fn bring_up(&self, port: u16) {
        self.down.lock().unwrap().remove(&port);
    }

    pub fn require_password(&self, password: &str) {
        *self.password.lock().unwrap() = Some(password.to_string());
    }

    fn is_down(&self, port: u16) -> bool {
        self.down.lock().unwrap().contains(&port)
    }

    /// Ports connected to, in order
    pub fn opened(&self) -> Vec<u16> {
        self.opened.lock().unwrap().clone()
    }

    /// Number of reads answered by `port`
    pub fn served(&self, port: u16) -> usize {
        self.served.lock().unwrap().get(&port).copied().unwrap_or(0)
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.store.lock().unwrap().get(key).cloned()
    }
}

#[derive(Clone, Default)]
pub struct FakeConnector {
    pub cluster: Arc<FakeCluster>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Connector for FakeConnector {
    type Conn = ClusterConnection;

    fn client_for(&self, endpoint: &Endpoint) -> Result<ClusterConnection, ClientError> {
        Ok(ClusterConnection {
            name: endpoint.address(),
            port: endpoint.port(),
            password: endpoint.password().map(str::to_string),
            connected: false,
            authenticated: false,
            cluster: Arc::clone(&self.cluster),
        })
    }
}

pub struct ClusterConnection {
    name: String,
    port: u16,
    password: Option<String>,
    connected: bool,
    authenticated: bool,
    cluster: Arc<FakeCluster>,
}

impl ClusterConnection {
    pub fn port(&self) -> u16 {
        self.port
    }

    fn check_transport(&mut self) -> Result<(), ClientError> {
        if !self.connected {
            return Err(ClientError::NotConnected(self.name.clone()));
        }
        if self.cluster.is_down(self.port) {
            self.connected = false;
            self.authenticated = false;
            return Err(ClientError::Connection(format!(
                "{}: connection reset",
                self.name
            )));
        }
        Ok(())
    }

    fn check(&mut self) -> Result<(), ClientError> {
        self.check_transport()?;
        if self.cluster.password.lock().unwrap().is_some() && !self.authenticated {
            return Err(ClientError::Response(
                "NOAUTH Authentication required".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for ClusterConnection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&mut self, key: &str) -> Result<Option<String>, ClientError> {
        self.check()?;
        *self.cluster.served.lock().unwrap().entry(self.port).or_default() += 1;
        Ok(self.cluster.value(key))
    }

    async fn set(&mut self, key: &str, value: &str) -> Result<String, ClientError> {
        self.check()?;
        self.cluster
            .store
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok("OK".to_string())
    }

    async fn setex(&mut self, key: &str, _seconds: u64, value: &str) -> Result<String, ClientError> {
        self.set(key, value).await
    }

    async fn del(&mut self, keys: &[String]) -> Result<i64, ClientError> {
        self.check()?;
        let mut store = self.cluster.store.lock().unwrap();
        Ok(keys.iter().filter(|k| store.remove(*k).is_some()).count() as i64)
    }

    async fn exists(&mut self, key: &str) -> Result<bool, ClientError> {
        self.check()?;
        Ok(self.cluster.value(key).is_some())
    }

    async fn expire(&mut self, key: &str, _seconds: u64) -> Result<i64, ClientError> {
        self.check()?;
        Ok(if self.cluster.value(key).is_some() { 1 } else { 0 })
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> Result<(), ClientError> {
        if self.cluster.is_down(self.port) {
            return Err(ClientError::Connection(format!(
                "{}: connection refused",
                self.name
            )));
        }
        self.connected = true;
        self.authenticated = false;
        self.cluster.opened.lock().unwrap().push(self.port);

        if let Some(password) = self.password.clone() {
            if let Err(e) = self.auth(&password).await {
                self.connected = false;
                return Err(ClientError::Connection(format!(
                    "Authentication to {} failed: {}",
                    self.name, e
                )));
            }
        }
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.connected = false;
        self.authenticated = false;
    }

    async fn quit(&mut self) -> Result<(), ClientError> {
        self.check_transport()
    }

    async fn auth(&mut self, password: &str) -> Result<(), ClientError> {
        self.check_transport()?;
        let required = self.cluster.password.lock().unwrap().clone();
        if required.is_some_and(|expected| expected != password) {
            return Err(ClientError::Response("WRONGPASS invalid password".to_string()));
        }
        self.authenticated = true;
        Ok(())
    }

    async fn ping(&mut self) -> Result<String, ClientError> {
        self.check()?;
        Ok("PONG".to_string())
    }
}

// ============================================================================
// Actions
// ============================================================================

/// GET that also reports which connection answered
pub struct WhoServes {
    pub key: String,
}

impl WhoServes {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

#[async_trait]
impl<C: Connection> Action<C> for WhoServes {
    type Output = (Option<String>, String);

    async fn run(&self, conn: &mut C) -> Result<(Option<String>, String), ClientError> {
        let value = conn.get(&self.key).await?;
        Ok((value, conn.name().to_string()))
    }
}

pub fn endpoint(port: u16) -> Endpoint {
    Endpoint::new("127.0.0.1", port)
}
