use super::battery_controller::{BatteryController, BatteryMode};
use super::charger::{Charger, ChargerCommand, ChargerStatus};
use super::forecast_provider::ForecastProvider;
use super::phases::Phases;
use super::power_source::PowerSource;
use super::soc_reader::SocReader;
use super::tariff_provider::TariffProvider;
use super::{AdapterError, AdapterResult};
use crate::domain::types::{Current, Percentage, Power};
use crate::rate::{RateInterval, RateWindow};
use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use tokio::sync::RwLock;

/// Deterministic simulated power meter, used by the default
/// `HardwareMode::Simulated` site and in tests. Value is set externally
/// (by a test harness or a simple time-of-day curve) rather than read
/// from hardware.
#[derive(Debug)]
pub struct SimulatedMeter {
    power_w: RwLock<f64>,
}

impl SimulatedMeter {
    pub fn new(initial_w: f64) -> Self {
        Self { power_w: RwLock::new(initial_w) }
    }

    pub async fn set(&self, watts: f64) {
        *self.power_w.write().await = watts;
    }
}

#[async_trait]
impl PowerSource for SimulatedMeter {
    async fn read_power(&self) -> AdapterResult<Power> {
        Ok(Power(*self.power_w.read().await))
    }
}

/// Simulated EV charger. Current set by `Enable` is echoed back on
/// `read_status` as `Charging`; `Disable` reports `Connected`.
#[derive(Debug)]
pub struct SimulatedCharger {
    connected: RwLock<bool>,
    enabled_current: RwLock<Option<Current>>,
}

impl SimulatedCharger {
    pub fn new(connected: bool) -> Self {
        Self { connected: RwLock::new(connected), enabled_current: RwLock::new(None) }
    }

    pub async fn set_connected(&self, connected: bool) {
        *self.connected.write().await = connected;
        if !connected {
            *self.enabled_current.write().await = None;
        }
    }
}

#[async_trait]
impl Charger for SimulatedCharger {
    async fn read_status(&self) -> AdapterResult<ChargerStatus> {
        if !*self.connected.read().await {
            return Ok(ChargerStatus::Disconnected);
        }
        Ok(if self.enabled_current.read().await.is_some() {
            ChargerStatus::Charging
        } else {
            ChargerStatus::Connected
        })
    }

    async fn apply(&self, command: ChargerCommand) -> AdapterResult<()> {
        if !*self.connected.read().await {
            return Err(AdapterError::Transient("charger not connected".into()));
        }
        match command {
            ChargerCommand::Enable { current } => {
                *self.enabled_current.write().await = Some(current);
            }
            ChargerCommand::Disable => {
                *self.enabled_current.write().await = None;
            }
        }
        Ok(())
    }
}

/// Simulated per-phase current reader. Value is set externally (by a
/// test harness, or by whatever drives the simulated charger) rather
/// than derived automatically from commanded current, since a real
/// device can report an actual phase count that lags or disagrees with
/// what was last commanded — that disagreement is exactly what the
/// loadpoint state machine's phase-switch confirmation step watches for.
#[derive(Debug)]
pub struct SimulatedPhases {
    currents_a: RwLock<[f64; 3]>,
}

impl SimulatedPhases {
    pub fn new(currents_a: [f64; 3]) -> Self {
        Self { currents_a: RwLock::new(currents_a) }
    }

    pub async fn set(&self, currents_a: [f64; 3]) {
        *self.currents_a.write().await = currents_a;
    }
}

#[async_trait]
impl Phases for SimulatedPhases {
    async fn read_active_phases(&self) -> AdapterResult<u8> {
        let currents = *self.currents_a.read().await;
        Ok(currents.iter().filter(|a| **a > 0.5).count() as u8)
    }
}

/// Simulated home battery: tracks SoC as a simple linear integrator
/// driven by whatever `power` was last applied (positive = charge).
/// `set_mode` records the commanded mode only; `read_power` (the
/// `PowerSource` facet) reports the power the test harness or
/// simulation driver last applied via `advance`/`set_power`, mirroring
/// how a real inverter is commanded through `BatteryController` but
/// metered back through an independent `PowerSource` reading.
#[derive(Debug)]
pub struct SimulatedBattery {
    soc: RwLock<Percentage>,
    capacity_kwh: f64,
    mode: RwLock<BatteryMode>,
    power_w: RwLock<f64>,
}

impl SimulatedBattery {
    pub fn new(initial_soc: Percentage, capacity_kwh: f64) -> Self {
        Self { soc: RwLock::new(initial_soc), capacity_kwh, mode: RwLock::new(BatteryMode::Normal), power_w: RwLock::new(0.0) }
    }

    /// Advances SoC by `power` held for `hours`, clamped to [0, 100],
    /// and records `power` as the value `read_power` reports until the
    /// next call. Used by a test harness or a simulation driver; not
    /// part of the `BatteryController` capability itself.
    pub async fn advance(&self, power: Power, hours: f64) {
        let delta_pct = power.as_kilowatts() * hours / self.capacity_kwh.max(1e-9) * 100.0;
        let mut soc = self.soc.write().await;
        *soc = Percentage::new(soc.as_percent() + delta_pct);
        *self.power_w.write().await = power.as_watts();
    }

    /// Sets the power `read_power` reports without moving SoC, for
    /// tests that only need to exercise the balance computation.
    pub async fn set_power(&self, power: Power) {
        *self.power_w.write().await = power.as_watts();
    }
}

#[async_trait]
impl SocReader for SimulatedBattery {
    async fn read_soc(&self) -> AdapterResult<Percentage> {
        Ok(*self.soc.read().await)
    }
}

#[async_trait]
impl BatteryController for SimulatedBattery {
    async fn read_soc(&self) -> AdapterResult<Percentage> {
        Ok(*self.soc.read().await)
    }

    async fn set_mode(&self, mode: BatteryMode) -> AdapterResult<()> {
        *self.mode.write().await = mode;
        Ok(())
    }
}

#[async_trait]
impl PowerSource for SimulatedBattery {
    async fn read_power(&self) -> AdapterResult<Power> {
        Ok(Power(*self.power_w.read().await))
    }
}

/// Simulated vehicle state-of-charge reader, settable by a test harness.
#[derive(Debug)]
pub struct SimulatedSocReader {
    soc: RwLock<Percentage>,
}

impl SimulatedSocReader {
    pub fn new(initial_soc: Percentage) -> Self {
        Self { soc: RwLock::new(initial_soc) }
    }

    pub async fn set(&self, soc: Percentage) {
        *self.soc.write().await = soc;
    }
}

#[async_trait]
impl SocReader for SimulatedSocReader {
    async fn read_soc(&self) -> AdapterResult<Percentage> {
        Ok(*self.soc.read().await)
    }
}

/// Builds a flat-price or sine-curve rate window covering
/// `[now, now + horizon)` at a fixed interval length, for tariff and
/// forecast simulation without a real provider. A sine day-shape covers
/// simulated PV production; `value_at` generalises to any value curve.
fn synthetic_window(
    now: DateTime<Utc>,
    horizon: chrono::Duration,
    interval: chrono::Duration,
    value_at: impl Fn(DateTime<Utc>) -> f64,
) -> RateWindow {
    let mut intervals = Vec::new();
    let mut start = now;
    let end = now + horizon;
    while start < end {
        let iv_end = (start + interval).min(end);
        intervals.push(RateInterval { start, end: iv_end, value: value_at(start) });
        start = iv_end;
    }
    RateWindow::from_sorted(intervals).unwrap_or_else(|_| RateWindow::empty())
}

/// Deterministic simulated tariff: a flat base price with a day/night
/// step, entirely clock-driven so repeated calls with the same `now`
/// are reproducible.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedTariffProvider {
    pub day_price: f64,
    pub night_price: f64,
    pub horizon: chrono::Duration,
    pub interval: chrono::Duration,
}

impl Default for SimulatedTariffProvider {
    fn default() -> Self {
        Self {
            day_price: 0.20,
            night_price: 0.08,
            horizon: chrono::Duration::hours(24),
            interval: chrono::Duration::hours(1),
        }
    }
}

#[async_trait]
impl TariffProvider for SimulatedTariffProvider {
    async fn current_rates(&self) -> AdapterResult<RateWindow> {
        let now = Utc::now();
        let day_price = self.day_price;
        let night_price = self.night_price;
        Ok(synthetic_window(now, self.horizon, self.interval, move |t| {
            if (7..22).contains(&t.hour()) { day_price } else { night_price }
        }))
    }
}

/// Deterministic simulated PV production forecast: a sine curve between
/// `sunrise` and `sunset` hours, peaking at `peak_w`.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedForecastProvider {
    pub peak_w: f64,
    pub sunrise_hour: u32,
    pub sunset_hour: u32,
    pub horizon: chrono::Duration,
    pub interval: chrono::Duration,
}

impl Default for SimulatedForecastProvider {
    fn default() -> Self {
        Self {
            peak_w: 5000.0,
            sunrise_hour: 7,
            sunset_hour: 19,
            horizon: chrono::Duration::hours(24),
            interval: chrono::Duration::hours(1),
        }
    }
}

#[async_trait]
impl ForecastProvider for SimulatedForecastProvider {
    async fn production_forecast(&self) -> AdapterResult<RateWindow> {
        let now = Utc::now();
        let (peak, sunrise, sunset) = (self.peak_w, self.sunrise_hour, self.sunset_hour);
        Ok(synthetic_window(now, self.horizon, self.interval, move |t| {
            let hour = t.hour();
            if hour < sunrise || hour > sunset {
                return 0.0;
            }
            let day_len = (sunset - sunrise).max(1) as f64;
            let x = (hour - sunrise) as f64 / day_len;
            (std::f64::consts::PI * x).sin().max(0.0) * peak
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simulated_meter_reports_set_value() {
        let m = SimulatedMeter::new(0.0);
        m.set(1500.0).await;
        assert_eq!(m.read_power().await.unwrap(), Power(1500.0));
    }

    #[tokio::test]
    async fn simulated_charger_tracks_enable_disable() {
        let c = SimulatedCharger::new(true);
        assert_eq!(c.read_status().await.unwrap(), ChargerStatus::Connected);
        c.apply(ChargerCommand::Enable { current: Current(16.0) }).await.unwrap();
        assert_eq!(c.read_status().await.unwrap(), ChargerStatus::Charging);
        c.apply(ChargerCommand::Disable).await.unwrap();
        assert_eq!(c.read_status().await.unwrap(), ChargerStatus::Connected);
    }

    #[tokio::test]
    async fn disconnected_charger_rejects_commands() {
        let c = SimulatedCharger::new(false);
        let err = c.apply(ChargerCommand::Enable { current: Current(16.0) }).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn simulated_battery_soc_advances_with_charge_power() {
        let b = SimulatedBattery::new(Percentage::new(50.0), 10.0);
        b.advance(Power::kilowatts(2.0), 1.0).await;
        assert!((SocReader::read_soc(&b).await.unwrap().as_percent() - 70.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn simulated_battery_reports_last_applied_power() {
        let b = SimulatedBattery::new(Percentage::new(50.0), 10.0);
        assert_eq!(PowerSource::read_power(&b).await.unwrap(), Power(0.0));
        b.advance(Power::kilowatts(-1.5), 0.5).await;
        assert_eq!(PowerSource::read_power(&b).await.unwrap(), Power(-1500.0));
    }

    #[tokio::test]
    async fn simulated_tariff_provider_covers_requested_horizon() {
        let provider = SimulatedTariffProvider::default();
        let window = provider.current_rates().await.unwrap();
        assert!(!window.is_empty());
    }

    #[tokio::test]
    async fn simulated_forecast_provider_is_zero_at_night() {
        let provider = SimulatedForecastProvider { sunrise_hour: 7, sunset_hour: 19, ..Default::default() };
        let window = provider.production_forecast().await.unwrap();
        let midnight_value = window.as_slice().iter().find(|iv| iv.start.hour() < 6).map(|iv| iv.value);
        if let Some(v) = midnight_value {
            assert_eq!(v, 0.0);
        }
    }
}
