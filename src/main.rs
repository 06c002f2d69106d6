use anyhow::Result;
use chrono::Utc;
use open_energy_controller::api::{self, ApiState};
use open_energy_controller::capability::{
    SimulatedBattery, SimulatedCharger, SimulatedForecastProvider, SimulatedMeter, SimulatedTariffProvider,
};
use open_energy_controller::config::AppConfig;
use open_energy_controller::domain::types::Percentage;
use open_energy_controller::loadpoint::{Loadpoint, LoadpointConfig};
use open_energy_controller::settings::JsonFileSettingsStore;
use open_energy_controller::site::{LoadpointRuntime, Site};
use open_energy_controller::telemetry::{init_tracing, shutdown_signal};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cfg = AppConfig::load()?;
    let addr = cfg.server.socket_addr()?;

    let settings = Arc::new(JsonFileSettingsStore::load(cfg.settings_path.clone()).await);

    let loadpoints: Vec<LoadpointRuntime> = cfg
        .loadpoints
        .iter()
        .map(|lp_cfg| {
            let config: LoadpointConfig = lp_cfg.into();
            let loadpoint = Loadpoint::new(lp_cfg.id.clone(), config);
            LoadpointRuntime::new(
                loadpoint,
                Arc::new(SimulatedCharger::new(false)),
                Arc::new(SimulatedMeter::new(0.0)),
            )
        })
        .collect();

    let batteries = cfg
        .batteries
        .iter()
        .map(|id| {
            let battery = Arc::new(SimulatedBattery::new(Percentage::new(50.0), 10.0));
            let controller: Arc<dyn open_energy_controller::capability::BatteryController> = battery.clone();
            let power_source: Arc<dyn open_energy_controller::capability::PowerSource> = battery;
            (id.clone(), controller, power_source)
        })
        .collect();

    let pv_meters = cfg
        .pv_meters
        .iter()
        .map(|id| {
            let meter: Arc<dyn open_energy_controller::capability::PowerSource> =
                Arc::new(SimulatedMeter::new(0.0));
            (id.clone(), meter)
        })
        .collect();

    let mut site = Site::new(
        loadpoints,
        batteries,
        Arc::new(SimulatedMeter::new(0.0)),
        pv_meters,
        Arc::new(SimulatedTariffProvider::default()),
        Arc::new(SimulatedForecastProvider::default()),
        settings,
    )
    .with_planner_strategy(cfg.planner_strategy.into())
    .with_battery_thresholds(cfg.battery_thresholds.into());

    if cfg.home_meter {
        site = site.with_home_meter(Arc::new(SimulatedMeter::new(0.0)));
    }

    site.restore().await;

    let site = Arc::new(Mutex::new(site));
    spawn_tick_loop(site.clone(), Duration::from_millis(cfg.tick.interval_ms));

    let app_state = ApiState { site, auth_token: cfg.auth_token.clone().map(Arc::from) };
    let app = api::router(app_state);

    info!(%addr, "starting Open Energy Controller");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    warn!("shutdown complete");
    Ok(())
}

/// Drives the site's control tick on a fixed-cadence timer, independent
/// of the HTTP host's own task.
fn spawn_tick_loop(site: Arc<Mutex<Site>>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let now = Utc::now();
            let monotonic = tokio::time::Instant::now().into_std();
            site.lock().await.tick(now, monotonic).await;
        }
    });
}
