use super::AdapterResult;
use crate::domain::types::Power;
use async_trait::async_trait;

/// A meter that reports instantaneous power flow. Positive values mean
/// import/consumption, negative values mean export/production, matching
/// the sign convention the site allocator balances against.
#[async_trait]
pub trait PowerSource: Send + Sync {
    async fn read_power(&self) -> AdapterResult<Power>;
}
