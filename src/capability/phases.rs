use super::AdapterResult;
use async_trait::async_trait;

/// Reports how many phases a loadpoint's charger is currently wired/
/// configured to use. Distinct from `PhaseSwitcher`, which can command a
/// change; a device can report phases without supporting switching.
#[async_trait]
pub trait Phases: Send + Sync {
    async fn read_active_phases(&self) -> AdapterResult<u8>;
}
