use super::AdapterResult;
use crate::domain::types::Current;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ChargerStatus {
    Disconnected,
    Connected,
    Charging,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ChargerCommand {
    Enable { current: Current },
    Disable,
}

/// Controls EV charge current and reports connector status.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Charger: Send + Sync {
    async fn read_status(&self) -> AdapterResult<ChargerStatus>;
    async fn apply(&self, command: ChargerCommand) -> AdapterResult<()>;
}
