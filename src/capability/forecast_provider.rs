use super::AdapterResult;
use crate::rate::RateWindow;
use async_trait::async_trait;

/// Feeds a PV production forecast as a rate-window-shaped series (value
/// is forecast watts, not price). Consumption forecasting is explicitly
/// out of scope; only production is predicted, consumption is observed.
#[async_trait]
pub trait ForecastProvider: Send + Sync {
    async fn production_forecast(&self) -> AdapterResult<RateWindow>;
}
