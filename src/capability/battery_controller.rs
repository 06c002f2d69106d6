use super::AdapterResult;
use crate::domain::types::Percentage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BatteryMode {
    Normal,
    Hold,
    ForcedCharge,
}

/// A stationary battery the site allocator can put into a mode. Per
/// §4.1 this capability is `setMode`-only; the device's own inverter
/// logic decides the power setpoint for the mode it's in. The site
/// reads the battery's actual power back through `PowerSource`, the
/// same capability a meter exposes, not through this trait.
#[async_trait]
pub trait BatteryController: Send + Sync {
    async fn read_soc(&self) -> AdapterResult<Percentage>;
    async fn set_mode(&self, mode: BatteryMode) -> AdapterResult<()>;
}
