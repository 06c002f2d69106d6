use super::AdapterResult;
use crate::rate::RateWindow;
use async_trait::async_trait;

/// Feeds the current import-price rate window. Refreshed asynchronously;
/// consumers read a cheap snapshot at tick start.
#[async_trait]
pub trait TariffProvider: Send + Sync {
    async fn current_rates(&self) -> AdapterResult<RateWindow>;
}
