//! Site aggregate: owns every loadpoint, battery and meter adapter and
//! runs the per-tick snapshot → accumulate → allocate → loadpoint-update
//! pipeline, invoking the planner wherever a loadpoint plan is active.

use crate::accumulator::{self, EnergyAccumulator};
use crate::allocator::{self, BatteryModeDecider, BatteryThresholds, LoadpointAllocationInput, SiteSnapshot};
use crate::capability::{
    AdapterError, AdapterResult, BatteryController, BatteryMode, Charger, ChargerStatus, EnergySource,
    ForecastProvider, PhaseSwitcher, Phases, PowerSource, SocReader, TariffProvider,
};
use crate::domain::types::{Current, Energy, Percentage, Power, Voltage};
use crate::events::{EventBus, LogLevel};
use crate::loadpoint::{ChargeMode, Loadpoint};
use crate::planner::{self, Plan, PlanGoal, PlanStrategy};
use crate::rate::RateWindow;
use crate::settings::SettingsStore;
use crate::vehicle::{Vehicle, VehicleRegistry};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

const READ_TIMEOUT: StdDuration = StdDuration::from_secs(2);
const COMMAND_TIMEOUT: StdDuration = StdDuration::from_secs(5);
/// How far ahead the battery-mode decision looks for an upcoming price
/// peak.
const PEAK_LOOKAHEAD: ChronoDuration = ChronoDuration::hours(3);
const PEAK_MARGIN: f64 = 0.05;

#[derive(Debug, Error)]
pub enum SiteError {
    #[error("unknown loadpoint id: {0}")]
    UnknownLoadpoint(String),
    #[error("unknown battery id: {0}")]
    UnknownBattery(String),
}

/// The command surface §6.2 describes, language-neutral at the core and
/// mapped onto HTTP/MQTT/whatever by the embedding host. Commands are
/// queued by `Site::apply_command` and drained at the start of the next
/// tick, per §5's "mutations are serialised through a command queue"
/// rule — nothing mutates site state outside a tick boundary.
#[derive(Debug, Clone)]
pub enum SiteCommand {
    SetMode { loadpoint: String, mode: ChargeMode },
    SetMinCurrent { loadpoint: String, amperes: f64 },
    SetMaxCurrent { loadpoint: String, amperes: f64 },
    SetPhases { loadpoint: String, phases: u8 },
    SetPlan { loadpoint: String, plan: Plan },
    ClearPlan { loadpoint: String },
    SetBatteryMode { battery: String, mode: BatteryModeCommand },
    SetPriority { loadpoint: String, priority: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BatteryModeCommand {
    Normal,
    Hold,
    ForcedCharge,
    Auto,
}

/// Tracks consecutive adapter failures so a `Transient` failure can be
/// promoted to `Stale` after three in a row, per §5/§7.
#[derive(Debug, Default, Clone, Copy)]
struct AdapterHealth {
    consecutive_failures: u32,
}

impl AdapterHealth {
    fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Returns whether this failure promotes the adapter to stale.
    fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;
        self.consecutive_failures >= 3
    }
}

async fn with_timeout<T>(duration: StdDuration, fut: impl std::future::Future<Output = AdapterResult<T>>) -> AdapterResult<T> {
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(AdapterError::Transient("adapter call timed out".into())),
    }
}

/// One configured charge point plus the adapters wired to it.
pub struct LoadpointRuntime {
    pub loadpoint: Loadpoint,
    pub charger: Arc<dyn Charger>,
    pub phase_switcher: Option<Arc<dyn PhaseSwitcher>>,
    pub meter: Arc<dyn PowerSource>,
    pub energy_source: Option<Arc<dyn EnergySource>>,
    /// Reads the connected vehicle's SoC, when the loadpoint has one.
    pub soc_reader: Option<Arc<dyn SocReader>>,
    /// Reads the device's real per-phase current, when wired. Used to
    /// confirm a commanded phase switch actually took effect rather than
    /// assuming it did the instant the dwell elapses.
    pub phases: Option<Arc<dyn Phases>>,
}

impl LoadpointRuntime {
    pub fn new(
        loadpoint: Loadpoint,
        charger: Arc<dyn Charger>,
        meter: Arc<dyn PowerSource>,
    ) -> Self {
        Self {
            loadpoint,
            charger,
            phase_switcher: None,
            meter,
            energy_source: None,
            soc_reader: None,
            phases: None,
        }
    }

    pub fn with_phase_switcher(mut self, switcher: Arc<dyn PhaseSwitcher>) -> Self {
        self.phase_switcher = Some(switcher);
        self
    }

    pub fn with_phases(mut self, phases: Arc<dyn Phases>) -> Self {
        self.phases = Some(phases);
        self
    }

    pub fn with_energy_source(mut self, source: Arc<dyn EnergySource>) -> Self {
        self.energy_source = Some(source);
        self
    }

    pub fn with_soc_reader(mut self, reader: Arc<dyn SocReader>) -> Self {
        self.soc_reader = Some(reader);
        self
    }
}

struct BatteryRuntime {
    id: String,
    controller: Arc<dyn BatteryController>,
    /// The battery's metered power (charge positive), read the same way
    /// a grid/PV meter is — `BatteryController` itself is `setMode`-only.
    power_source: Arc<dyn PowerSource>,
    decider: BatteryModeDecider,
    /// Operator pin from `setBatteryMode`; `None` returns control to the
    /// decider (`auto`).
    manual_mode: Option<BatteryMode>,
}

/// The site aggregate: every loadpoint, battery and meter the core
/// owns, plus the cross-cutting facades (vehicles, settings, events).
pub struct Site {
    loadpoints: Vec<LoadpointRuntime>,
    batteries: Vec<BatteryRuntime>,
    grid_meter: Arc<dyn PowerSource>,
    pv_meters: Vec<(String, Arc<dyn PowerSource>)>,
    home_meter: Option<Arc<dyn PowerSource>>,
    tariff_provider: Arc<dyn TariffProvider>,
    forecast_provider: Arc<dyn ForecastProvider>,
    vehicles: VehicleRegistry,
    pub events: EventBus,
    settings: Arc<dyn SettingsStore>,
    pv_accumulators: HashMap<String, EnergyAccumulator>,
    forecast_accumulator: EnergyAccumulator,
    current_rates: RateWindow,
    current_forecast: RateWindow,
    health: HashMap<String, AdapterHealth>,
    last_good_power: HashMap<String, f64>,
    last_good_soc: HashMap<String, f64>,
    last_good_charger_status: HashMap<String, ChargerStatus>,
    battery_thresholds: BatteryThresholds,
    snapshot_tolerance_w: f64,
    /// §6.4 `residualPower`: the configured grid-draw budget (W) beyond
    /// PV surplus that §4.6 step 4's `availablePower` partitions across
    /// loadpoints — what lets a `now`-mode or emergency loadpoint reach
    /// its full `maxCurrent` by importing from the grid rather than
    /// being capped at the PV surplus. Unbounded by default (circuit
    /// limits are already enforced per loadpoint via its own
    /// `maxCurrent`); restored from settings when configured.
    grid_draw_allowance: Power,
    /// Site-global early/late fill strategy for partially-used planner
    /// intervals.
    planner_strategy: PlanStrategy,
    round_robin: usize,
    tick_count: u64,
    command_queue: Mutex<VecDeque<SiteCommand>>,
}

impl Site {
    pub fn new(
        loadpoints: Vec<LoadpointRuntime>,
        batteries: Vec<(String, Arc<dyn BatteryController>, Arc<dyn PowerSource>)>,
        grid_meter: Arc<dyn PowerSource>,
        pv_meters: Vec<(String, Arc<dyn PowerSource>)>,
        tariff_provider: Arc<dyn TariffProvider>,
        forecast_provider: Arc<dyn ForecastProvider>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        let pv_accumulators = pv_meters.iter().map(|(id, _)| (id.clone(), EnergyAccumulator::new())).collect();
        let batteries = batteries
            .into_iter()
            .map(|(id, controller, power_source)| BatteryRuntime {
                id,
                controller,
                power_source,
                decider: BatteryModeDecider::new(BatteryThresholds::default()),
                manual_mode: None,
            })
            .collect();
        Self {
            loadpoints,
            batteries,
            grid_meter,
            pv_meters,
            home_meter: None,
            tariff_provider,
            forecast_provider,
            vehicles: VehicleRegistry::new(),
            events: EventBus::default(),
            settings,
            pv_accumulators,
            forecast_accumulator: EnergyAccumulator::new(),
            current_rates: RateWindow::empty(),
            current_forecast: RateWindow::empty(),
            health: HashMap::new(),
            last_good_power: HashMap::new(),
            last_good_soc: HashMap::new(),
            last_good_charger_status: HashMap::new(),
            battery_thresholds: BatteryThresholds::default(),
            snapshot_tolerance_w: 150.0,
            grid_draw_allowance: Power::watts(f64::INFINITY),
            planner_strategy: PlanStrategy::default(),
            round_robin: 0,
            tick_count: 0,
            command_queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_home_meter(mut self, meter: Arc<dyn PowerSource>) -> Self {
        self.home_meter = Some(meter);
        self
    }

    pub fn with_vehicles(mut self, vehicles: VehicleRegistry) -> Self {
        self.vehicles = vehicles;
        self
    }

    pub fn with_planner_strategy(mut self, strategy: PlanStrategy) -> Self {
        self.planner_strategy = strategy;
        self
    }

    pub fn with_battery_thresholds(mut self, thresholds: BatteryThresholds) -> Self {
        self.battery_thresholds = thresholds;
        for battery in &mut self.batteries {
            battery.decider = BatteryModeDecider::new(thresholds);
        }
        self
    }

    pub fn with_grid_draw_allowance(mut self, allowance: Power) -> Self {
        self.grid_draw_allowance = allowance;
        self
    }

    pub fn vehicles_mut(&mut self) -> &mut VehicleRegistry {
        &mut self.vehicles
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Restores the persisted PV-yield and solar-forecast accumulators.
    /// Per §9's map-before-restore fix: `self.pv_accumulators` already
    /// contains a slot for every configured PV meter (built in `new`)
    /// before this runs, so restoration can never silently drop a meter
    /// that hadn't been registered yet.
    pub async fn restore(&mut self) {
        let mut slots: Vec<(&str, &mut EnergyAccumulator)> =
            self.pv_accumulators.iter_mut().map(|(id, acc)| (id.as_str(), acc)).collect();
        accumulator::restore_all(&mut slots, self.settings.as_ref(), "solarAccYield").await;

        // The forecast total has no per-id split, so it is restored
        // directly rather than through `restore_all`'s `<prefix>.<id>` keying.
        match self.settings.get_f64("solarAccForecast").await {
            Ok(Some(kwh)) => self.forecast_accumulator.restore_from(kwh),
            Ok(None) => warn!(key = "solarAccForecast", "no persisted accumulator value, starting from zero"),
            Err(err) => warn!(key = "solarAccForecast", error = %err, "failed to restore accumulator, zero-initialising"),
        }

        match self.settings.get_f64("residualPower").await {
            Ok(Some(watts)) => self.grid_draw_allowance = Power::watts(watts),
            Ok(None) => {}
            Err(err) => warn!(key = "residualPower", error = %err, "failed to restore grid draw allowance, leaving unbounded"),
        }
    }

    /// Queues a command from the embedding host; applied at the next
    /// tick's command-drain barrier, never immediately.
    pub async fn apply_command(&self, command: SiteCommand) {
        self.command_queue.lock().await.push_back(command);
    }

    async fn drain_commands(&mut self, now: DateTime<Utc>) {
        let mut queue = self.command_queue.lock().await;
        let pending: Vec<SiteCommand> = queue.drain(..).collect();
        drop(queue);

        for command in pending {
            if let Err(err) = self.apply_one(now, command) {
                warn!(error = %err, "rejected queued site command");
            }
        }
    }

    fn apply_one(&mut self, now: DateTime<Utc>, command: SiteCommand) -> Result<(), SiteError> {
        match command {
            SiteCommand::SetMode { loadpoint, mode } => {
                self.loadpoint_mut(&loadpoint)?.loadpoint.config.mode = mode;
            }
            SiteCommand::SetMinCurrent { loadpoint, amperes } => {
                let lp = &mut self.loadpoint_mut(&loadpoint)?.loadpoint;
                let max = lp.config.max_current.as_amperes();
                lp.config.min_current = Current::amperes(amperes.clamp(0.0, max));
            }
            SiteCommand::SetMaxCurrent { loadpoint, amperes } => {
                let lp = &mut self.loadpoint_mut(&loadpoint)?.loadpoint;
                let min = lp.config.min_current.as_amperes();
                lp.config.max_current = Current::amperes(amperes.max(min));
            }
            SiteCommand::SetPhases { loadpoint, phases } => {
                self.loadpoint_mut(&loadpoint)?.loadpoint.set_phases_config(now, phases);
            }
            SiteCommand::SetPlan { loadpoint, plan } => {
                let vehicle_id = self.loadpoint_mut(&loadpoint)?.loadpoint.vehicle.clone();
                if let Some(vehicle_id) = vehicle_id {
                    if let Some(vehicle) = self.vehicles.get_mut(&vehicle_id) {
                        vehicle.plan = Some(plan);
                    }
                } else {
                    warn!(loadpoint = %loadpoint, "setPlan ignored: no vehicle bound");
                }
            }
            SiteCommand::ClearPlan { loadpoint } => {
                let vehicle_id = self.loadpoint_mut(&loadpoint)?.loadpoint.vehicle.clone();
                if let Some(vehicle_id) = vehicle_id {
                    if let Some(vehicle) = self.vehicles.get_mut(&vehicle_id) {
                        vehicle.plan = None;
                    }
                }
            }
            SiteCommand::SetBatteryMode { battery, mode } => {
                let battery = self.battery_mut(&battery)?;
                battery.manual_mode = match mode {
                    BatteryModeCommand::Normal => Some(BatteryMode::Normal),
                    BatteryModeCommand::Hold => Some(BatteryMode::Hold),
                    BatteryModeCommand::ForcedCharge => Some(BatteryMode::ForcedCharge),
                    BatteryModeCommand::Auto => None,
                };
            }
            SiteCommand::SetPriority { loadpoint, priority } => {
                let lp = &mut self.loadpoint_mut(&loadpoint)?.loadpoint;
                lp.config.priority = priority;
                lp.effective_priority = priority;
            }
        }
        Ok(())
    }

    fn loadpoint_mut(&mut self, id: &str) -> Result<&mut LoadpointRuntime, SiteError> {
        self.loadpoints
            .iter_mut()
            .find(|lp| lp.loadpoint.id == id)
            .ok_or_else(|| SiteError::UnknownLoadpoint(id.to_string()))
    }

    fn battery_mut(&mut self, id: &str) -> Result<&mut BatteryRuntime, SiteError> {
        self.batteries.iter_mut().find(|b| b.id == id).ok_or_else(|| SiteError::UnknownBattery(id.to_string()))
    }

    fn resolve_power(&mut self, key: &str, result: AdapterResult<Power>) -> Power {
        let entry = self.health.entry(key.to_string()).or_default();
        match result {
            Ok(power) => {
                entry.record_success();
                self.last_good_power.insert(key.to_string(), power.as_watts());
                power
            }
            Err(err) => {
                let stale = err.is_fatal() || entry.record_failure();
                if stale {
                    warn!(source = key, error = %err, "adapter stale, using last-known power");
                } else {
                    warn!(source = key, error = %err, "transient adapter read failure");
                }
                Power::watts(self.last_good_power.get(key).copied().unwrap_or(0.0))
            }
        }
    }

    /// §7 charger-status degradation: a fatal error is authoritative
    /// (the loadpoint enters `Error` regardless of history); a
    /// transient/stale failure instead reuses the last-known status, the
    /// same way `resolve_power`/`resolve_soc` reuse their last-known
    /// values, rather than assuming `Connected`.
    fn resolve_charger_status(&mut self, key: &str, result: AdapterResult<ChargerStatus>) -> ChargerStatus {
        let entry = self.health.entry(key.to_string()).or_default();
        match result {
            Ok(status) => {
                entry.record_success();
                self.last_good_charger_status.insert(key.to_string(), status);
                status
            }
            Err(err) => {
                if err.is_fatal() {
                    warn!(source = key, error = %err, "fatal charger adapter error");
                    return ChargerStatus::Error;
                }
                let stale = entry.record_failure();
                if stale {
                    warn!(source = key, error = %err, "charger adapter stale, keeping last-known status");
                } else {
                    warn!(source = key, error = %err, "transient charger status read failure");
                }
                self.last_good_charger_status.get(key).copied().unwrap_or(ChargerStatus::Connected)
            }
        }
    }

    fn resolve_soc(&mut self, key: &str, result: AdapterResult<Percentage>) -> Option<Percentage> {
        let entry = self.health.entry(key.to_string()).or_default();
        match result {
            Ok(soc) => {
                entry.record_success();
                self.last_good_soc.insert(key.to_string(), soc.as_percent());
                Some(soc)
            }
            Err(err) => {
                let stale = err.is_fatal() || entry.record_failure();
                warn!(source = key, error = %err, stale, "soc reader degraded");
                self.last_good_soc.get(key).map(|v| Percentage::new(*v))
            }
        }
    }

    /// Runs one control tick: drains queued commands, reads every
    /// adapter, runs C3→C6→C4 serially on the decision phase, commits
    /// device commands, publishes telemetry and flushes settings.
    pub async fn tick(&mut self, now: DateTime<Utc>, monotonic: Instant) {
        self.drain_commands(now).await;

        // --- C1: fan out reads, barrier before the decision phase ---
        let grid_result = with_timeout(READ_TIMEOUT, self.grid_meter.read_power()).await;
        let grid_power = self.resolve_power("grid", grid_result);

        let home_power = match &self.home_meter {
            Some(meter) => {
                let result = with_timeout(READ_TIMEOUT, meter.read_power()).await;
                Some(self.resolve_power("home", result))
            }
            None => None,
        };

        let pv_reads = join_all(self.pv_meters.iter().map(|(id, meter)| {
            let meter = meter.clone();
            let id = id.clone();
            async move { (id, with_timeout(READ_TIMEOUT, meter.read_power()).await) }
        }))
        .await;
        let mut pv_power_total = 0.0;
        for (id, result) in pv_reads {
            let power = self.resolve_power(&format!("pv.{id}"), result);
            if let Some(acc) = self.pv_accumulators.get_mut(&id) {
                acc.sample(monotonic, power, None);
            }
            pv_power_total += power.as_watts();
        }

        if let Ok(rates) = with_timeout(READ_TIMEOUT, self.tariff_provider.current_rates()).await {
            self.current_rates = rates;
        }
        if let Ok(forecast) = with_timeout(READ_TIMEOUT, self.forecast_provider.production_forecast()).await {
            self.current_forecast = forecast;
        }
        if let Some(forecast_now) = self.current_forecast.at(now) {
            self.forecast_accumulator.sample(monotonic, Power::watts(forecast_now), None);
        }

        let battery_reads = join_all(self.batteries.iter().map(|b| {
            let controller = b.controller.clone();
            let power_source = b.power_source.clone();
            let id = b.id.clone();
            async move {
                let soc = with_timeout(READ_TIMEOUT, BatteryController::read_soc(controller.as_ref())).await;
                let power = with_timeout(READ_TIMEOUT, power_source.read_power()).await;
                (id, soc, power)
            }
        }))
        .await;
        let mut battery_socs: HashMap<String, Percentage> = HashMap::new();
        let mut battery_powers: HashMap<String, Power> = HashMap::new();
        let mut battery_power_total = 0.0;
        for (id, soc_result, power_result) in battery_reads {
            if let Some(soc) = self.resolve_soc(&format!("battery.{id}.soc"), soc_result) {
                battery_socs.insert(id.clone(), soc);
            }
            let power = self.resolve_power(&format!("battery.{id}.power"), power_result);
            battery_power_total += power.as_watts();
            battery_powers.insert(id, power);
        }

        struct LoadpointReading {
            status: AdapterResult<ChargerStatus>,
            power: AdapterResult<Power>,
            energy: Option<AdapterResult<Energy>>,
            vehicle_soc: Option<AdapterResult<Percentage>>,
            active_phases: Option<AdapterResult<u8>>,
        }

        let lp_reads: Vec<LoadpointReading> = join_all(self.loadpoints.iter().map(|lp| {
            let charger = lp.charger.clone();
            let meter = lp.meter.clone();
            let energy_source = lp.energy_source.clone();
            let soc_reader = lp.soc_reader.clone();
            let phases = lp.phases.clone();
            async move {
                let status = with_timeout(READ_TIMEOUT, charger.read_status()).await;
                let power = with_timeout(READ_TIMEOUT, meter.read_power()).await;
                let energy = match energy_source {
                    Some(source) => Some(with_timeout(READ_TIMEOUT, source.read_cumulative_energy()).await),
                    None => None,
                };
                let vehicle_soc = match soc_reader {
                    Some(reader) => Some(with_timeout(READ_TIMEOUT, SocReader::read_soc(reader.as_ref())).await),
                    None => None,
                };
                let active_phases = match phases {
                    Some(reader) => Some(with_timeout(READ_TIMEOUT, reader.read_active_phases()).await),
                    None => None,
                };
                LoadpointReading { status, power, energy, vehicle_soc, active_phases }
            }
        }))
        .await;

        let mut loadpoint_charge_power = 0.0;
        let mut resolved: Vec<(ChargerStatus, Power, Option<Energy>, Option<Percentage>, Option<u8>)> =
            Vec::with_capacity(self.loadpoints.len());
        for (i, reading) in lp_reads.into_iter().enumerate() {
            let id = self.loadpoints[i].loadpoint.id.clone();
            let status = self.resolve_charger_status(&format!("charger.{id}"), reading.status);
            let power = self.resolve_power(&format!("loadpoint.{id}"), reading.power);
            loadpoint_charge_power += power.as_watts();
            let energy = reading.energy.and_then(|r| r.ok());
            let vehicle_soc = match reading.vehicle_soc {
                Some(r) => self.resolve_soc(&format!("vehicle.{id}"), r),
                None => None,
            };
            let observed_active_phases = match reading.active_phases {
                Some(Ok(n)) => Some(n),
                Some(Err(err)) => {
                    warn!(loadpoint = %id, error = %err, "phase reading unavailable");
                    None
                }
                None => None,
            };
            resolved.push((status, power, energy, vehicle_soc, observed_active_phases));
        }

        // --- vehicle identity matching + plan evaluation (C5 feeding C4/C6) ---
        for (i, (_, _, _, vehicle_soc, _)) in resolved.iter().enumerate() {
            let id = self.loadpoints[i].loadpoint.id.clone();
            let Some(soc) = vehicle_soc else { continue };
            if self.loadpoints[i].loadpoint.vehicle.is_none() {
                let bound: Vec<String> = self.vehicles_bound_elsewhere(&id);
                let candidates: Vec<Vehicle> =
                    self.vehicles.all().filter(|v| !bound.contains(&v.id)).cloned().collect();
                if let Some((vehicle_id, reason)) = self.vehicles.match_vehicle(&id, *soc, candidates.iter()) {
                    info!(loadpoint = %id, vehicle = %vehicle_id, reason = ?reason, "vehicle bound");
                    self.vehicles.bind(id.clone(), vehicle_id.clone());
                    self.loadpoints[i].loadpoint.vehicle = Some(vehicle_id);
                }
            }
            if let Some(vehicle_id) = self.loadpoints[i].loadpoint.vehicle.clone() {
                if let Some(vehicle) = self.vehicles.get_mut(&vehicle_id) {
                    vehicle.observe_soc(*soc);
                }
            }
        }

        let mut plan_active = vec![false; self.loadpoints.len()];
        let mut plan_next: Vec<Option<(DateTime<Utc>, DateTime<Utc>)>> = vec![None; self.loadpoints.len()];
        let mut emergency = vec![false; self.loadpoints.len()];
        for (i, lp) in self.loadpoints.iter().enumerate() {
            let Some(vehicle_id) = lp.loadpoint.vehicle.clone() else { continue };
            let Some(vehicle) = self.vehicles.get(&vehicle_id) else { continue };
            if let Some(soc) = vehicle.last_known_soc {
                emergency[i] = soc.as_percent() < vehicle.min_soc.as_percent();
            }
            let Some(plan) = vehicle.plan.clone() else { continue };
            let max_power_w =
                lp.loadpoint.config.max_current.as_amperes() * lp.loadpoint.active_phases() as f64 * lp.loadpoint.config.voltage.as_volts();
            let required = match plan.goal {
                PlanGoal::Energy(energy) => energy,
                PlanGoal::Soc(goal_soc) => {
                    let current_soc = vehicle.last_known_soc.unwrap_or(Percentage::new(0.0));
                    planner::required_energy_for_soc_goal(current_soc, goal_soc, vehicle.capacity, 0.05)
                }
            };
            let schedule = planner::plan_with_strategy(
                now,
                plan.deadline,
                required,
                Power::watts(max_power_w),
                &self.current_rates,
                self.planner_strategy,
            );
            plan_active[i] = schedule.active_now;
            plan_next[i] = schedule.next_active_window;
        }

        // --- C6: balance, battery mode decision, allocation ---
        let snapshot = SiteSnapshot {
            grid_power,
            pv_power: Power::watts(pv_power_total.max(0.0)),
            battery_power: Power::watts(battery_power_total),
            loadpoint_charge_power: Power::watts(loadpoint_charge_power),
            measured_home_power: home_power,
        };
        if !allocator::is_snapshot_consistent(snapshot, self.snapshot_tolerance_w) {
            warn!("meter snapshot inconsistent beyond tolerance, degrading to conservative allocation");
        }
        let balance = allocator::balance(snapshot);

        let current_price = self.current_rates.at(now);
        let peak_window_upcoming = current_price
            .map(|price| self.current_rates.slice(now, now + PEAK_LOOKAHEAD).as_slice().iter().any(|iv| iv.value >= price + PEAK_MARGIN))
            .unwrap_or(false);
        let plan_draining_battery = plan_active.iter().any(|a| *a);

        for battery in self.batteries.iter_mut() {
            let soc = battery_socs.get(&battery.id).copied().unwrap_or(Percentage::new(0.0));
            let mode = match battery.manual_mode {
                Some(mode) => mode,
                None => battery.decider.decide(now, soc, current_price, peak_window_upcoming, plan_draining_battery),
            };
            if let Err(err) =
                with_timeout(COMMAND_TIMEOUT, BatteryController::set_mode(battery.controller.as_ref(), mode)).await
            {
                warn!(battery = %battery.id, error = %err, "battery mode command failed");
            }
            let power = battery_powers.get(&battery.id).copied().unwrap_or(Power::watts(0.0));
            self.events.publish(format!("site.battery.{}.mode", battery.id), format!("{mode:?}")).await;
            self.events.publish(format!("site.battery.{}.soc", battery.id), soc.as_percent()).await;
            self.events.publish(format!("site.battery.{}.power", battery.id), power.as_watts()).await;
        }
        // §6.3's minimal vocabulary names the bare `site.battery.soc`/
        // `site.battery.mode` keys, not an id-scoped family; publish
        // them too for the common single-battery site. Multi-battery
        // sites keep the id-scoped keys above as the addressable form.
        if let [battery] = self.batteries.as_slice() {
            let soc = battery_socs.get(&battery.id).copied().unwrap_or(Percentage::new(0.0));
            let mode = battery.manual_mode.unwrap_or_else(|| battery.decider.current_mode());
            self.events.publish("site.battery.soc", soc.as_percent()).await;
            self.events.publish("site.battery.mode", format!("{mode:?}")).await;
        }

        let allocation_inputs: Vec<LoadpointAllocationInput> = self
            .loadpoints
            .iter()
            .enumerate()
            .map(|(i, lp)| {
                let voltage = lp.loadpoint.config.voltage.as_volts();
                let phases = lp.loadpoint.active_phases() as f64;
                LoadpointAllocationInput {
                    id: lp.loadpoint.id.clone(),
                    max_power: Power::watts(lp.loadpoint.config.max_current.as_amperes() * phases * voltage),
                    effective_priority: lp.loadpoint.effective_priority,
                    plan_active: plan_active[i],
                    emergency: emergency[i],
                    min_power: Power::watts(lp.loadpoint.config.min_current.as_amperes() * phases * voltage),
                    // §4.4: `now` requests `maxCurrent` and is clamped only
                    // by circuit limits, not by PV surplus.
                    grid_backed: lp.loadpoint.config.mode == ChargeMode::Now,
                }
            })
            .collect();
        let allocation = allocator::allocate(balance.surplus, self.grid_draw_allowance, &allocation_inputs, self.round_robin);

        // --- C4: per-loadpoint tick, commit device commands ---
        for (i, lp_runtime) in self.loadpoints.iter_mut().enumerate() {
            let (status, power, energy, _, observed_active_phases) = resolved[i];
            let allocated = allocation.get(&lp_runtime.loadpoint.id).copied().unwrap_or(Power::watts(0.0));
            let command = lp_runtime.loadpoint.tick(
                now,
                monotonic,
                status,
                allocated,
                power,
                energy,
                plan_active[i],
                observed_active_phases,
            );

            if let Err(err) = with_timeout(COMMAND_TIMEOUT, lp_runtime.charger.apply(command.charger)).await {
                warn!(loadpoint = %lp_runtime.loadpoint.id, error = %err, "charger command failed");
            }
            if let Some(target) = command.switch_phases_to {
                if let Some(switcher) = &lp_runtime.phase_switcher {
                    if let Err(err) = with_timeout(COMMAND_TIMEOUT, switcher.switch_phases(target)).await {
                        warn!(loadpoint = %lp_runtime.loadpoint.id, error = %err, "phase switch command failed");
                    }
                }
            }

            let id = &lp_runtime.loadpoint.id;
            self.events.publish(format!("loadpoint.{id}.mode"), format!("{:?}", lp_runtime.loadpoint.config.mode)).await;
            self.events.publish(format!("loadpoint.{id}.connected"), lp_runtime.loadpoint.connected()).await;
            self.events.publish(format!("loadpoint.{id}.charging"), lp_runtime.loadpoint.charging()).await;
            self.events.publish(format!("loadpoint.{id}.phases.active"), lp_runtime.loadpoint.active_phases()).await;
            self.events
                .publish(format!("loadpoint.{id}.current.offered"), lp_runtime.loadpoint.last_offered_current.as_amperes())
                .await;
            self.events
                .publish(format!("loadpoint.{id}.session.energy"), lp_runtime.loadpoint.session_energy().as_kilowatt_hours())
                .await;
            self.events.publish(format!("loadpoint.{id}.plan.active"), plan_active[i]).await;
            let next_value = match plan_next[i] {
                Some((start, end)) => {
                    serde_json::json!({ "start": start.to_rfc3339(), "end": end.to_rfc3339() })
                }
                None => serde_json::Value::Null,
            };
            self.events.publish(format!("loadpoint.{id}.plan.next"), next_value).await;
        }

        self.events.publish("site.grid.power", grid_power.as_watts()).await;
        self.events.publish("site.pv.power", balance.pv_power.as_watts()).await;
        self.events.publish("site.battery.power", balance.battery_power.as_watts()).await;
        self.events.publish("site.home.power", balance.home_power.as_watts()).await;
        self.events.publish("site.accumulated.solarForecast", self.forecast_accumulator.accumulated().as_kilowatt_hours()).await;

        // --- persistence (not on the decision path, flushed at tick end) ---
        let pv_slots: Vec<(&str, &EnergyAccumulator)> =
            self.pv_accumulators.iter().map(|(id, acc)| (id.as_str(), acc)).collect();
        accumulator::persist_all(&pv_slots, self.settings.as_ref(), "solarAccYield").await;
        let _ = self.settings.set_f64("solarAccForecast", self.forecast_accumulator.accumulated().as_kilowatt_hours()).await;
        for lp in &self.loadpoints {
            let key = format!("session.{}.energy", lp.loadpoint.id);
            let _ = self.settings.set_f64(&key, lp.loadpoint.session_energy().as_kilowatt_hours()).await;
        }
        let _ = self.settings.flush().await;

        self.round_robin = (self.round_robin + 1) % self.loadpoints.len().max(1);
        self.tick_count += 1;
        info!(tick = self.tick_count, grid_w = grid_power.as_watts(), surplus_w = balance.surplus.as_watts(), "tick complete");
    }

    fn vehicles_bound_elsewhere(&self, loadpoint_id: &str) -> Vec<String> {
        self.loadpoints
            .iter()
            .filter(|lp| lp.loadpoint.id != loadpoint_id)
            .filter_map(|lp| lp.loadpoint.vehicle.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::simulated::{SimulatedBattery, SimulatedCharger, SimulatedForecastProvider, SimulatedMeter, SimulatedSocReader, SimulatedTariffProvider};
    use crate::loadpoint::LoadpointConfig;
    use crate::settings::InMemorySettingsStore;
    use crate::vehicle::Vehicle;

    fn site_with_one_loadpoint() -> Site {
        let mut cfg = LoadpointConfig::default();
        cfg.mode = ChargeMode::Now;
        cfg.phases_config = 3;
        let loadpoint = Loadpoint::new("lp1", cfg);
        let charger: Arc<dyn Charger> = Arc::new(SimulatedCharger::new(true));
        let meter: Arc<dyn PowerSource> = Arc::new(SimulatedMeter::new(0.0));
        let runtime = LoadpointRuntime::new(loadpoint, charger, meter);

        let grid: Arc<dyn PowerSource> = Arc::new(SimulatedMeter::new(-3000.0));
        let tariff: Arc<dyn TariffProvider> = Arc::new(SimulatedTariffProvider::default());
        let forecast: Arc<dyn ForecastProvider> = Arc::new(SimulatedForecastProvider::default());
        let settings: Arc<dyn SettingsStore> = Arc::new(InMemorySettingsStore::new());

        Site::new(vec![runtime], vec![], grid, vec![], tariff, forecast, settings)
    }

    #[tokio::test]
    async fn tick_runs_end_to_end_without_panicking() {
        let mut site = site_with_one_loadpoint();
        let now = Utc::now();
        let mono = Instant::now();
        site.tick(now, mono).await;
        assert_eq!(site.tick_count(), 1);
    }

    #[tokio::test]
    async fn queued_commands_apply_at_next_tick_not_immediately() {
        let mut site = site_with_one_loadpoint();
        site.apply_command(SiteCommand::SetMode { loadpoint: "lp1".into(), mode: ChargeMode::Off }).await;
        assert_eq!(site.loadpoints[0].loadpoint.config.mode, ChargeMode::Now, "not applied yet");
        let now = Utc::now();
        site.tick(now, Instant::now()).await;
        assert_eq!(site.loadpoints[0].loadpoint.config.mode, ChargeMode::Off);
    }

    /// Scenario E: solar accumulators restore before use, in either order
    /// the settings happen to be written, since slots are created first.
    #[tokio::test]
    async fn restart_restoration_recovers_persisted_yield_and_forecast() {
        let settings: Arc<dyn SettingsStore> = Arc::new(InMemorySettingsStore::new());
        settings.set_f64("solarAccYield.pv1", 271.752).await.unwrap();
        settings.set_f64("solarAccForecast", 365.718).await.unwrap();

        let grid: Arc<dyn PowerSource> = Arc::new(SimulatedMeter::new(0.0));
        let pv: Arc<dyn PowerSource> = Arc::new(SimulatedMeter::new(0.0));
        let tariff: Arc<dyn TariffProvider> = Arc::new(SimulatedTariffProvider::default());
        let forecast: Arc<dyn ForecastProvider> = Arc::new(SimulatedForecastProvider::default());

        let mut site = Site::new(vec![], vec![], grid, vec![("pv1".into(), pv)], tariff, forecast, settings);
        site.restore().await;

        assert!((site.pv_accumulators["pv1"].accumulated().as_kilowatt_hours() - 271.752).abs() < 1e-9);
        assert!((site.forecast_accumulator.accumulated().as_kilowatt_hours() - 365.718).abs() < 1e-9);
    }

    /// §7 "fatal adapter" policy: a charger reporting a fatal error drives
    /// the loadpoint into `Error` status for this tick rather than being
    /// treated as merely `Connected`, even though no retry has happened
    /// yet — the adapter's own classification is authoritative.
    #[tokio::test]
    async fn fatal_charger_error_surfaces_as_error_status() {
        let mut cfg = LoadpointConfig::default();
        cfg.mode = ChargeMode::Now;
        let loadpoint = Loadpoint::new("lp1", cfg);

        let mut mock_charger = crate::capability::MockCharger::new();
        mock_charger
            .expect_read_status()
            .returning(|| Err(AdapterError::Fatal("bus disconnected".into())));
        mock_charger.expect_apply().returning(|_| Ok(()));
        let charger: Arc<dyn Charger> = Arc::new(mock_charger);
        let meter: Arc<dyn PowerSource> = Arc::new(SimulatedMeter::new(0.0));
        let runtime = LoadpointRuntime::new(loadpoint, charger, meter);

        let grid: Arc<dyn PowerSource> = Arc::new(SimulatedMeter::new(-3000.0));
        let tariff: Arc<dyn TariffProvider> = Arc::new(SimulatedTariffProvider::default());
        let forecast: Arc<dyn ForecastProvider> = Arc::new(SimulatedForecastProvider::default());
        let settings: Arc<dyn SettingsStore> = Arc::new(InMemorySettingsStore::new());
        let mut site = Site::new(vec![runtime], vec![], grid, vec![], tariff, forecast, settings);

        site.tick(Utc::now(), Instant::now()).await;
        assert_eq!(site.loadpoints[0].loadpoint.state(), crate::loadpoint::LoadpointState::Error);
    }

    #[tokio::test]
    async fn charger_status_falls_back_to_last_known_on_transient_error() {
        let mut site = site_with_one_loadpoint();
        let key = "charger.test";
        let status = site.resolve_charger_status(key, Ok(ChargerStatus::Charging));
        assert_eq!(status, ChargerStatus::Charging);

        let status = site.resolve_charger_status(key, Err(AdapterError::Transient("timeout".into())));
        assert_eq!(status, ChargerStatus::Charging, "transient failure must reuse last-known status, not assume Connected");
    }

    #[tokio::test]
    async fn charger_status_defaults_to_connected_with_no_history() {
        let mut site = site_with_one_loadpoint();
        let status = site.resolve_charger_status("charger.never-seen", Err(AdapterError::Transient("timeout".into())));
        assert_eq!(status, ChargerStatus::Connected);
    }

    #[tokio::test]
    async fn charger_status_fatal_error_is_error_regardless_of_history() {
        let mut site = site_with_one_loadpoint();
        let key = "charger.test";
        site.resolve_charger_status(key, Ok(ChargerStatus::Charging));
        let status = site.resolve_charger_status(key, Err(AdapterError::Fatal("bus disconnected".into())));
        assert_eq!(status, ChargerStatus::Error);
    }

    #[tokio::test]
    async fn battery_manual_override_bypasses_decider() {
        let grid: Arc<dyn PowerSource> = Arc::new(SimulatedMeter::new(0.0));
        let tariff: Arc<dyn TariffProvider> = Arc::new(SimulatedTariffProvider::default());
        let forecast: Arc<dyn ForecastProvider> = Arc::new(SimulatedForecastProvider::default());
        let settings: Arc<dyn SettingsStore> = Arc::new(InMemorySettingsStore::new());
        let battery_sim = Arc::new(SimulatedBattery::new(Percentage::new(80.0), 10.0));
        let battery: Arc<dyn BatteryController> = battery_sim.clone();
        let battery_power: Arc<dyn PowerSource> = battery_sim;

        let mut site = Site::new(vec![], vec![("b1".into(), battery, battery_power)], grid, vec![], tariff, forecast, settings);
        site.apply_command(SiteCommand::SetBatteryMode { battery: "b1".into(), mode: BatteryModeCommand::ForcedCharge }).await;
        site.tick(Utc::now(), Instant::now()).await;
        assert_eq!(site.batteries[0].manual_mode, Some(BatteryMode::ForcedCharge));
    }
}
