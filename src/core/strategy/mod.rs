use crate::core::pool::Pool;
use crate::core::template::{Action, Engine, TemplateError};
use async_trait::async_trait;

pub mod direct;
pub mod round_robin;

pub use direct::Direct;
pub use round_robin::RoundRobin;

/// Decides which pool serves a read, and what happens when an attempt fails
#[async_trait]
pub trait ReadPolicy<R: Pool, W: Pool>: Send + Sync + 'static {
    /// Run `action` as a read, using `engine` for every attempt
    async fn read<A>(&self, engine: &Engine<R, W>, action: &A) -> Result<A::Output, TemplateError>
    where
        A: Action<R::Conn>;

    /// Policy name
    fn name(&self) -> &str;
}
