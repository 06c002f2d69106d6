use super::AdapterResult;
use async_trait::async_trait;

/// Commands a 1-phase/3-phase switch. The loadpoint state machine owns
/// the hysteresis/dwell timing; this trait only performs the switch.
#[async_trait]
pub trait PhaseSwitcher: Send + Sync {
    async fn switch_phases(&self, phases: u8) -> AdapterResult<()>;
}
