//! Key-partitioned connections.
//!
//! A [`ShardedConnection`] holds one connection per shard and routes every
//! single-key command to the shard that owns the key on a consistent-hash
//! ring. Keys containing a `{tag}` are placed by the tag alone, so related keys
//! can be kept together.

use crate::core::client::{ClientError, Connection, Connector};
use crate::core::endpoint::Endpoint;
use crate::core::factory::{open_endpoint, ConnectionFactory};
use crate::core::pool::PoolError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

const VIRTUAL_NODES_PER_SHARD: usize = 160;

/// Consistent-hash ring mapping keys to shard indexes
#[derive(Debug, Clone)]
pub struct HashRing {
    points: Vec<(u64, usize)>,
    shard_count: usize,
}

impl HashRing {
    pub fn new(shards: &[Endpoint]) -> Self {
        let mut points = Vec::with_capacity(shards.len() * VIRTUAL_NODES_PER_SHARD);
        for (index, shard) in shards.iter().enumerate() {
            for node in 0..VIRTUAL_NODES_PER_SHARD {
                let label = format!("{}-{}", shard.address(), node);
                points.push((hash_key(label.as_bytes()), index));
            }
        }
        points.sort_by_key(|(hash, _)| *hash);
        Self {
            points,
            shard_count: shards.len(),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    /// Index of the shard owning `key`; `None` for an empty ring
    pub fn shard_for(&self, key: &str) -> Option<usize> {
        if self.points.is_empty() {
            return None;
        }
        let hash = hash_key(hash_tag(key).as_bytes());
        let position = self.points.partition_point(|(point, _)| *point < hash);
        let (_, shard) = self.points[position % self.points.len()];
        Some(shard)
    }
}

fn hash_key(data: &[u8]) -> u64 {
    let digest = md5::compute(data);
    let bytes = digest.0;
    u64::from_be_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

/// The part of `key` used for placement: the first non-empty `{tag}`, or the
/// whole key.
pub fn hash_tag(key: &str) -> &str {
    if let Some(open) = key.find('{') {
        if let Some(len) = key[open + 1..].find('}') {
            if len > 0 {
                return &key[open + 1..open + 1 + len];
            }
        }
    }
    key
}

/// One connection per shard, routed by key
pub struct ShardedConnection<C> {
    name: String,
    shards: Vec<C>,
    ring: Arc<HashRing>,
}

impl<C: Connection> ShardedConnection<C> {
    pub fn new(shards: Vec<C>, ring: Arc<HashRing>) -> Result<Self, ClientError> {
        if shards.is_empty() || shards.len() != ring.shard_count() {
            return Err(ClientError::Connection(format!(
                "Sharded connection needs {} shards, got {}",
                ring.shard_count(),
                shards.len()
            )));
        }
        let name = format!(
            "sharded [{}]",
            shards.iter().map(|c| c.name()).collect::<Vec<_>>().join(", ")
        );
        Ok(Self { name, shards, ring })
    }

    pub fn shards(&self) -> &[C] {
        &self.shards
    }

    fn shard_mut(&mut self, key: &str) -> Result<&mut C, ClientError> {
        let index = self
            .ring
            .shard_for(key)
            .ok_or_else(|| ClientError::NotConnected(self.name.clone()))?;
        Ok(&mut self.shards[index])
    }
}

#[async_trait]
impl<C: Connection> Connection for ShardedConnection<C> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&mut self, key: &str) -> Result<Option<String>, ClientError> {
        self.shard_mut(key)?.get(key).await
    }

    async fn set(&mut self, key: &str, value: &str) -> Result<String, ClientError> {
        self.shard_mut(key)?.set(key, value).await
    }

    async fn setex(
        &mut self,
        key: &str,
        seconds: u64,
        value: &str,
    ) -> Result<String, ClientError> {
        self.shard_mut(key)?.setex(key, seconds, value).await
    }

    /// Deletes every key on its own shard and sums the counts
    async fn del(&mut self, keys: &[String]) -> Result<i64, ClientError> {
        let mut by_shard: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for key in keys {
            if let Some(index) = self.ring.shard_for(key) {
                by_shard.entry(index).or_default().push(key.clone());
            }
        }

        let mut deleted = 0;
        for (index, shard_keys) in by_shard {
            deleted += self.shards[index].del(&shard_keys).await?;
        }
        Ok(deleted)
    }

    async fn exists(&mut self, key: &str) -> Result<bool, ClientError> {
        self.shard_mut(key)?.exists(key).await
    }

    async fn expire(&mut self, key: &str, seconds: u64) -> Result<i64, ClientError> {
        self.shard_mut(key)?.expire(key, seconds).await
    }

    fn is_connected(&self) -> bool {
        self.shards.iter().all(|shard| shard.is_connected())
    }

    async fn connect(&mut self) -> Result<(), ClientError> {
        for shard in self.shards.iter_mut() {
            if !shard.is_connected() {
                shard.connect().await?;
            }
        }
        Ok(())
    }

    async fn disconnect(&mut self) {
        for shard in self.shards.iter_mut() {
            shard.disconnect().await;
        }
    }

    /// QUITs every shard, reporting the first failure
    async fn quit(&mut self) -> Result<(), ClientError> {
        let mut first_error = None;
        for shard in self.shards.iter_mut() {
            if let Err(e) = shard.quit().await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn auth(&mut self, password: &str) -> Result<(), ClientError> {
        for shard in self.shards.iter_mut() {
            shard.auth(password).await?;
        }
        Ok(())
    }

    /// PONG only when every shard answers PONG
    async fn ping(&mut self) -> Result<String, ClientError> {
        for shard in self.shards.iter_mut() {
            let reply = shard.ping().await?;
            if reply != "PONG" {
                return Ok(reply);
            }
        }
        Ok("PONG".to_string())
    }
}

/// Factory opening one connection to every shard per handle
pub struct ShardedFactory<K> {
    name: String,
    shards: Vec<Endpoint>,
    ring: Arc<HashRing>,
    connector: K,
}

impl<K: Connector> ShardedFactory<K> {
    pub fn new(shards: Vec<Endpoint>, connector: K) -> Result<Self, PoolError> {
        if shards.is_empty() {
            return Err(PoolError::NoEndpoints("sharded".to_string()));
        }
        let ring = Arc::new(HashRing::new(&shards));
        let name = format!(
            "sharded [{}]",
            shards
                .iter()
                .map(Endpoint::address)
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(Self {
            name,
            shards,
            ring,
            connector,
        })
    }

    pub fn ring(&self) -> &HashRing {
        &self.ring
    }

    pub fn shards(&self) -> &[Endpoint] {
        &self.shards
    }
}

#[async_trait]
impl<K: Connector> ConnectionFactory for ShardedFactory<K> {
    type Conn = ShardedConnection<K::Conn>;

    async fn create(&self) -> Result<Self::Conn, ClientError> {
        let opened = futures::future::try_join_all(
            self.shards
                .iter()
                .map(|endpoint| open_endpoint(&self.connector, endpoint)),
        )
        .await?;
        ShardedConnection::new(opened, Arc::clone(&self.ring))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
