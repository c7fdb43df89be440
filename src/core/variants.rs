//! Ready-made templates: simple, round robin, sharded and mixed sharded.

use crate::config::{endpoints, Config, ConfigError, ConnectionPoolConfig, TemplateConfig};
use crate::core::client::{Connector, RedisConnector};
use crate::core::endpoint::Endpoint;
use crate::core::factory::{RoundRobinFactory, SingleEndpointFactory};
use crate::core::pool::{ManagedPool, PoolError};
use crate::core::sharded::ShardedFactory;
use crate::core::strategy::{Direct, RoundRobin};
use crate::core::template::{Cache, DelScope, Template, TemplateOptions};
use std::sync::Arc;
use std::time::Duration;

pub type MasterPool<K> = ManagedPool<SingleEndpointFactory<K>>;
pub type RoundRobinPool<K> = ManagedPool<RoundRobinFactory<K>>;
pub type ShardedPool<K> = ManagedPool<ShardedFactory<K>>;

pub type SimpleTemplate<K> = Template<MasterPool<K>, MasterPool<K>, Direct>;
pub type RoundRobinTemplate<K> = Template<RoundRobinPool<K>, MasterPool<K>, RoundRobin>;
pub type ShardedTemplate<K> = Template<ShardedPool<K>, ShardedPool<K>, Direct>;
pub type MixedShardedTemplate<K> = Template<ShardedPool<K>, MasterPool<K>, Direct>;

/// One master serving reads and writes
pub fn simple<K: Connector>(
    master: Endpoint,
    connector: K,
    config: &ConnectionPoolConfig,
) -> SimpleTemplate<K> {
    let pool = Arc::new(ManagedPool::master(master, connector, config));
    Template::new(
        Some(Arc::clone(&pool)),
        Some(pool),
        Direct::new(),
        TemplateOptions::default(),
    )
}

/// Reads cycle through `replicas` and fail over to `master`; writes go to
/// `master`. The redundancy factor starts at the replica count.
pub async fn round_robin<K: Connector + Clone>(
    master: Endpoint,
    replicas: Vec<Endpoint>,
    connector: K,
    config: &ConnectionPoolConfig,
) -> Result<RoundRobinTemplate<K>, PoolError> {
    let read_pool = ManagedPool::round_robin(replicas, connector.clone(), config).await?;
    let redundancy_factor = read_pool.replica_count();
    let write_pool = ManagedPool::master(master, connector, config);

    Ok(Template::new(
        Some(Arc::new(read_pool)),
        Some(Arc::new(write_pool)),
        RoundRobin::new(redundancy_factor),
        TemplateOptions::default(),
    ))
}

/// Keys partitioned over `shards`. Multi-key `del` only reaches the first key.
pub fn sharded<K: Connector>(
    shards: Vec<Endpoint>,
    connector: K,
    config: &ConnectionPoolConfig,
) -> Result<ShardedTemplate<K>, PoolError> {
    let pool = Arc::new(ManagedPool::new(
        ShardedFactory::new(shards, connector)?,
        config,
    ));
    Ok(Template::new(
        Some(Arc::clone(&pool)),
        Some(pool),
        Direct::new(),
        TemplateOptions {
            repair_reads: false,
            repair_writes: false,
            del_scope: DelScope::FirstKeyOnly,
        },
    ))
}

/// Writes to `master`, reads from key-partitioned `shards`
pub fn mixed_sharded<K: Connector + Clone>(
    master: Endpoint,
    shards: Vec<Endpoint>,
    connector: K,
    config: &ConnectionPoolConfig,
) -> Result<MixedShardedTemplate<K>, PoolError> {
    let read_pool = ManagedPool::new(ShardedFactory::new(shards, connector.clone())?, config);
    let write_pool = ManagedPool::master(master, connector, config);
    Ok(Template::new(
        Some(Arc::new(read_pool)),
        Some(Arc::new(write_pool)),
        Direct::new(),
        TemplateOptions {
            repair_reads: false,
            repair_writes: true,
            del_scope: DelScope::AllKeys,
        },
    ))
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Build the template described by `config` over redis connections
pub async fn build_template(config: &Config) -> Result<Box<dyn Cache>, BuildError> {
    let connector = RedisConnector::new(Duration::from_millis(config.client.connect_timeout_ms));
    build_template_with(config, connector).await
}

/// Build the template described by `config` with a caller-supplied connector
pub async fn build_template_with<K: Connector + Clone>(
    config: &Config,
    connector: K,
) -> Result<Box<dyn Cache>, BuildError> {
    tracing::info!("Building {} template", config.template.kind());

    let cache: Box<dyn Cache> = match &config.template {
        TemplateConfig::Simple { master } => {
            Box::new(simple(master.to_endpoint()?, connector, &config.pool))
        }
        TemplateConfig::RoundRobin {
            master,
            replicas,
            redundancy_factor,
        } => {
            let mut template = round_robin(
                master.to_endpoint()?,
                endpoints(replicas, "replica")?,
                connector,
                &config.pool,
            )
            .await?;
            if let Some(n) = redundancy_factor {
                template.policy_mut().set_redundancy_factor(*n);
            }
            Box::new(template)
        }
        TemplateConfig::Sharded { shards } => Box::new(sharded(
            endpoints(shards, "shard")?,
            connector,
            &config.pool,
        )?),
        TemplateConfig::MixedSharded { master, shards } => Box::new(mixed_sharded(
            master.to_endpoint()?,
            endpoints(shards, "shard")?,
            connector,
            &config.pool,
        )?),
    };

    Ok(cache)
}
