//! JSON wire shape for the §6.2 command surface. Each variant is a
//! direct passthrough into `site::SiteCommand`; this layer only speaks
//! serde, never devices.

use super::ApiState;
use crate::loadpoint::ChargeMode;
use crate::planner::Plan;
use crate::site::{BatteryModeCommand, SiteCommand};
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum CommandRequest {
    SetMode { loadpoint: String, mode: ChargeMode },
    SetMinCurrent { loadpoint: String, amperes: f64 },
    SetMaxCurrent { loadpoint: String, amperes: f64 },
    SetPhases { loadpoint: String, phases: u8 },
    SetPlan { loadpoint: String, plan: Plan },
    ClearPlan { loadpoint: String },
    SetBatteryMode { battery: String, mode: BatteryModeCommand },
    SetPriority { loadpoint: String, priority: u32 },
}

impl From<CommandRequest> for SiteCommand {
    fn from(request: CommandRequest) -> Self {
        match request {
            CommandRequest::SetMode { loadpoint, mode } => SiteCommand::SetMode { loadpoint, mode },
            CommandRequest::SetMinCurrent { loadpoint, amperes } => {
                SiteCommand::SetMinCurrent { loadpoint, amperes }
            }
            CommandRequest::SetMaxCurrent { loadpoint, amperes } => {
                SiteCommand::SetMaxCurrent { loadpoint, amperes }
            }
            CommandRequest::SetPhases { loadpoint, phases } => SiteCommand::SetPhases { loadpoint, phases },
            CommandRequest::SetPlan { loadpoint, plan } => SiteCommand::SetPlan { loadpoint, plan },
            CommandRequest::ClearPlan { loadpoint } => SiteCommand::ClearPlan { loadpoint },
            CommandRequest::SetBatteryMode { battery, mode } => SiteCommand::SetBatteryMode { battery, mode },
            CommandRequest::SetPriority { loadpoint, priority } => SiteCommand::SetPriority { loadpoint, priority },
        }
    }
}

/// Queues the command; it is applied at the start of the next tick, not
/// synchronously with this request, per the command-queue rule in §5.
pub async fn submit(State(state): State<ApiState>, Json(request): Json<CommandRequest>) -> impl IntoResponse {
    state.site.lock().await.apply_command(request.into()).await;
    StatusCode::ACCEPTED
}
