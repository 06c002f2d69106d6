use super::AdapterResult;
use crate::domain::types::Percentage;
use async_trait::async_trait;

/// State-of-charge reader for a vehicle or stationary battery.
#[async_trait]
pub trait SocReader: Send + Sync {
    async fn read_soc(&self) -> AdapterResult<Percentage>;
}
