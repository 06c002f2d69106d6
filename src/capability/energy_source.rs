use super::AdapterResult;
use crate::domain::types::Energy;
use async_trait::async_trait;

/// A meter that reports a cumulative energy counter, when the device
/// exposes one. The accumulator prefers a counter delta over integrating
/// instantaneous power whenever this is available, since counters don't
/// drift with tick jitter.
#[async_trait]
pub trait EnergySource: Send + Sync {
    async fn read_cumulative_energy(&self) -> AdapterResult<Energy>;
}
