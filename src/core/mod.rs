pub mod client;
pub mod connection_pool;
pub mod endpoint;
pub mod factory;
pub mod metrics;
pub mod pool;
pub mod sharded;
pub mod strategy;
pub mod template;
pub mod variants;

// Re-export core traits
pub use client::{ClientError, Connection, Connector, RedisConnection, RedisConnector};
pub use connection_pool::{ConnectionPoolBuilder, FactoryManager};
pub use endpoint::{Endpoint, EndpointError};
pub use factory::{ConnectionFactory, RoundRobinFactory, SingleEndpointFactory};
pub use metrics::{MetricsSnapshot, PoolMetrics};
pub use pool::{ManagedPool, Pool, PoolError, PoolState, PooledHandle};
pub use sharded::{HashRing, ShardedConnection, ShardedFactory};
pub use strategy::{Direct, ReadPolicy, RoundRobin};
pub use template::{
    Action, Cache, DelScope, Engine, Template, TemplateError, TemplateOptions,
};
pub use variants::{
    build_template, build_template_with, BuildError, MasterPool, MixedShardedTemplate,
    RoundRobinPool, RoundRobinTemplate, ShardedPool, ShardedTemplate, SimpleTemplate,
};
