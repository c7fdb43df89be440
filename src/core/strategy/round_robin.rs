use super::ReadPolicy;
use crate::core::pool::Pool;
use crate::core::template::{Action, Engine, TemplateError};
use async_trait::async_trait;

/// Read failover across replicas, then the primary.
///
/// Each read starts with a budget equal to the redundancy factor. While the
/// budget is positive an attempt goes to the read pool, whose factory cycles
/// through the replicas; once it reaches zero the write pool (primary) gets
/// one last attempt. A failed attempt costs one unit of budget, so a read
/// makes at most `redundancy_factor + 1` attempts.
pub struct RoundRobin {
    pub name: String,
    redundancy_factor: usize,
}

impl RoundRobin {
    pub fn new(redundancy_factor: usize) -> Self {
        Self {
            name: "round_robin".to_string(),
            redundancy_factor,
        }
    }

    pub fn redundancy_factor(&self) -> usize {
        self.redundancy_factor
    }

    /// Override the replica attempt budget (normally the replica count)
    pub fn set_redundancy_factor(&mut self, redundancy_factor: usize) {
        self.redundancy_factor = redundancy_factor;
    }
}

#[async_trait]
impl<R, W> ReadPolicy<R, W> for RoundRobin
where
    R: Pool,
    W: Pool<Conn = R::Conn>,
{
    async fn read<A>(&self, engine: &Engine<R, W>, action: &A) -> Result<A::Output, TemplateError>
    where
        A: Action<R::Conn>,
    {
        let mut budget = self.redundancy_factor;
        let mut attempts = 0;

        loop {
            attempts += 1;
            let result = if budget > 0 {
                engine.with_read_pool(action).await
            } else {
                engine.with_write_pool(action).await
            };

            match result {
                Ok(output) => return Ok(output),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if budget == 0 => {
                    tracing::error!(
                        "Round robin read failed on the primary after {} attempts: {}",
                        attempts,
                        e
                    );
                    return Err(TemplateError::ReadUnavailable {
                        attempts,
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    budget -= 1;
                    tracing::warn!(
                        "Round robin read attempt {} failed ({} replica attempts left): {}",
                        attempts,
                        budget,
                        e
                    );
                }
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redundancy_factor_override() {
        let mut policy = RoundRobin::new(2);
        assert_eq!(policy.redundancy_factor(), 2);
        policy.set_redundancy_factor(5);
        assert_eq!(policy.redundancy_factor(), 5);
        assert_eq!(policy.name, "round_robin");
    }
}
