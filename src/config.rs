//! Site configuration: loadpoints, batteries, meters, tariff/forecast
//! providers, controller tick cadence and the persistence path. Layered
//! TOML + `OEC__`-prefixed env overrides via `figment`, validated with
//! `validator`, scoped down to what the site controller core actually
//! needs (device wiring specifics are an external-collaborator non-goal).

use crate::domain::types::{Current, Voltage};
use crate::loadpoint::{ChargeMode, LoadpointConfig};
use crate::planner::PlanStrategy;
use anyhow::{Context, Result};
use chrono::Duration as ChronoDuration;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,

    pub auth_token: Option<String>,

    #[validate(nested)]
    pub tick: TickConfig,

    #[serde(default = "default_settings_path")]
    pub settings_path: PathBuf,

    #[serde(default)]
    pub planner_strategy: PlanStrategyConfig,

    #[validate(nested)]
    pub battery_thresholds: BatteryThresholdsConfig,

    #[validate(nested)]
    pub loadpoints: Vec<LoadpointSettings>,

    /// Ids for simulated home batteries; the `sim` profile backs each
    /// with a `SimulatedBattery`.
    #[serde(default)]
    pub batteries: Vec<String>,

    /// Ids for simulated PV meters.
    #[serde(default)]
    pub pv_meters: Vec<String>,

    #[serde(default)]
    pub home_meter: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1, max = 65535))]
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<std::net::SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid server address {}:{}", self.host, self.port))
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Validate)]
pub struct TickConfig {
    /// Control tick cadence, bounded 100ms-10s, default 1s.
    #[validate(range(min = 100, max = 10_000))]
    pub interval_ms: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self { interval_ms: 1000 }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlanStrategyConfig {
    #[default]
    Late,
    Early,
}

impl From<PlanStrategyConfig> for PlanStrategy {
    fn from(value: PlanStrategyConfig) -> Self {
        match value {
            PlanStrategyConfig::Late => PlanStrategy::Late,
            PlanStrategyConfig::Early => PlanStrategy::Early,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Validate)]
pub struct BatteryThresholdsConfig {
    #[validate(range(min = 0.0, max = 100.0))]
    pub charge_soc_limit_percent: f64,
    pub force_charge_price: f64,
    pub release_price: f64,
    #[validate(range(min = 0))]
    pub mode_change_dwell_secs: i64,
}

impl Default for BatteryThresholdsConfig {
    fn default() -> Self {
        Self {
            charge_soc_limit_percent: 50.0,
            force_charge_price: 0.10,
            release_price: 0.20,
            mode_change_dwell_secs: 600,
        }
    }
}

impl From<BatteryThresholdsConfig> for crate::allocator::BatteryThresholds {
    fn from(cfg: BatteryThresholdsConfig) -> Self {
        crate::allocator::BatteryThresholds {
            charge_soc_limit: crate::domain::types::Percentage::new(cfg.charge_soc_limit_percent),
            force_charge_price: cfg.force_charge_price,
            release_price: cfg.release_price,
            mode_change_dwell: ChronoDuration::seconds(cfg.mode_change_dwell_secs),
        }
    }
}

/// Configured tunables for one loadpoint; converted into a
/// `loadpoint::LoadpointConfig` at site-build time.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct LoadpointSettings {
    #[validate(length(min = 1))]
    pub id: String,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default)]
    pub mode: ChargeModeConfig,
    /// 0 = auto, otherwise a fixed phase count.
    #[serde(default)]
    pub phases: u8,
    #[validate(range(min = 0.0))]
    pub min_current_a: f64,
    #[validate(range(min = 0.0))]
    pub max_current_a: f64,
    #[serde(default)]
    pub priority: u32,
    #[serde(default = "default_voltage")]
    pub voltage_v: f64,
    #[serde(default = "default_resolution")]
    pub current_resolution_a: f64,
    #[serde(default = "default_switch_delay_secs")]
    pub phase_switch_up_delay_secs: i64,
    #[serde(default = "default_switch_delay_secs")]
    pub phase_switch_down_delay_secs: i64,
    #[serde(default = "default_switch_dwell_secs")]
    pub phase_switch_dwell_secs: i64,
    #[serde(default = "default_pv_delay_secs")]
    pub pv_enable_delay_secs: i64,
    #[serde(default = "default_pv_delay_secs")]
    pub pv_disable_delay_secs: i64,
    #[serde(default = "default_hysteresis_delta")]
    pub pv_hysteresis_delta_a: f64,
}

fn default_title() -> String {
    "loadpoint".into()
}
fn default_voltage() -> f64 {
    230.0
}
fn default_resolution() -> f64 {
    1.0
}
fn default_switch_delay_secs() -> i64 {
    300
}
fn default_switch_dwell_secs() -> i64 {
    15
}
fn default_pv_delay_secs() -> i64 {
    60
}
fn default_hysteresis_delta() -> f64 {
    1.0
}
fn default_settings_path() -> PathBuf {
    PathBuf::from("settings.json")
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChargeModeConfig {
    Off,
    #[default]
    Now,
    MinPv,
    Pv,
}

impl From<ChargeModeConfig> for ChargeMode {
    fn from(value: ChargeModeConfig) -> Self {
        match value {
            ChargeModeConfig::Off => ChargeMode::Off,
            ChargeModeConfig::Now => ChargeMode::Now,
            ChargeModeConfig::MinPv => ChargeMode::MinPv,
            ChargeModeConfig::Pv => ChargeMode::Pv,
        }
    }
}

impl From<&LoadpointSettings> for LoadpointConfig {
    fn from(cfg: &LoadpointSettings) -> Self {
        LoadpointConfig {
            title: cfg.title.clone(),
            mode: cfg.mode.into(),
            phases_config: cfg.phases,
            min_current: Current::amperes(cfg.min_current_a),
            max_current: Current::amperes(cfg.max_current_a),
            priority: cfg.priority,
            voltage: Voltage::volts(cfg.voltage_v),
            current_resolution: cfg.current_resolution_a,
            phase_switch_up_delay: ChronoDuration::seconds(cfg.phase_switch_up_delay_secs),
            phase_switch_down_delay: ChronoDuration::seconds(cfg.phase_switch_down_delay_secs),
            phase_switch_dwell: ChronoDuration::seconds(cfg.phase_switch_dwell_secs),
            pv_enable_delay: ChronoDuration::seconds(cfg.pv_enable_delay_secs),
            pv_disable_delay: ChronoDuration::seconds(cfg.pv_disable_delay_secs),
            pv_hysteresis_delta: cfg.pv_hysteresis_delta_a,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig { host: "127.0.0.1".into(), port: 8080 },
            auth_token: None,
            tick: TickConfig::default(),
            settings_path: default_settings_path(),
            planner_strategy: PlanStrategyConfig::default(),
            battery_thresholds: BatteryThresholdsConfig::default(),
            loadpoints: vec![LoadpointSettings {
                id: "lp1".into(),
                title: default_title(),
                mode: ChargeModeConfig::default(),
                phases: 0,
                min_current_a: 6.0,
                max_current_a: 16.0,
                priority: 0,
                voltage_v: default_voltage(),
                current_resolution_a: default_resolution(),
                phase_switch_up_delay_secs: default_switch_delay_secs(),
                phase_switch_down_delay_secs: default_switch_delay_secs(),
                phase_switch_dwell_secs: default_switch_dwell_secs(),
                pv_enable_delay_secs: default_pv_delay_secs(),
                pv_disable_delay_secs: default_pv_delay_secs(),
                pv_hysteresis_delta_a: default_hysteresis_delta(),
            }],
            batteries: Vec::new(),
            pv_meters: vec!["pv1".into()],
            home_meter: false,
        }
    }
}

impl AppConfig {
    /// Layers `config/default.toml`, an optional `OEC_CONFIG` path
    /// override, then `OEC__`-prefixed env vars, on top of built-in
    /// defaults.
    pub fn load() -> Result<Self> {
        let mut figment = Figment::from(figment::providers::Serialized::defaults(AppConfig::default()));

        let default_path = PathBuf::from("config/default.toml");
        if default_path.exists() {
            figment = figment.merge(Toml::file(&default_path));
        }
        if let Ok(path) = std::env::var("OEC_CONFIG") {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("OEC__").split("__"));

        let config: AppConfig = figment.extract().context("failed to load configuration")?;
        config.validate().context("configuration failed validation")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn loadpoint_settings_convert_to_loadpoint_config() {
        let settings = &AppConfig::default().loadpoints[0];
        let lp: LoadpointConfig = settings.into();
        assert_eq!(lp.min_current, Current::amperes(6.0));
        assert_eq!(lp.max_current, Current::amperes(16.0));
    }
}
