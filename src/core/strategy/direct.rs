use super::ReadPolicy;
use crate::core::pool::Pool;
use crate::core::template::{Action, Engine, TemplateError};
use async_trait::async_trait;

/// Single attempt on the read pool; failures go straight to the caller
pub struct Direct {
    pub name: String,
}

impl Direct {
    pub fn new() -> Self {
        Self {
            name: "direct".to_string(),
        }
    }
}

impl Default for Direct {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R: Pool, W: Pool> ReadPolicy<R, W> for Direct {
    async fn read<A>(&self, engine: &Engine<R, W>, action: &A) -> Result<A::Output, TemplateError>
    where
        A: Action<R::Conn>,
    {
        engine.with_read_pool(action).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
