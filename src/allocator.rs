//! Site allocator: per-tick balance computation, battery mode decision,
//! and priority-ordered power apportionment across loadpoints. The
//! battery-mode dwell guard reuses `dwell::DwellTimer`.

use crate::capability::BatteryMode;
use crate::domain::types::{Percentage, Power};
use crate::dwell::DwellTimer;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;

/// Raw per-tick meter snapshot the balance step consumes.
#[derive(Debug, Clone, Copy)]
pub struct SiteSnapshot {
    /// Signed, import positive.
    pub grid_power: Power,
    /// Always >= 0.
    pub pv_power: Power,
    /// Signed, charge positive.
    pub battery_power: Power,
    pub loadpoint_charge_power: Power,
    /// Reading from an independent auxiliary/home meter, when the site
    /// has one. Used only for the consistency check below; the
    /// `home_power` on `SiteBalance` is always the derived value.
    pub measured_home_power: Option<Power>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SiteBalance {
    pub grid_power: Power,
    pub pv_power: Power,
    pub battery_power: Power,
    /// Derived: what the grid meter would show if every loadpoint were off.
    pub home_power: Power,
    /// PV surplus available to apportion, clamped at zero.
    pub surplus: Power,
}

/// `surplus_W = -gridPower + Σ loadpointChargePower`, clamped at zero.
/// `home_power` is `grid + pv - battery - loadpoints`-equivalent,
/// derived for the `site.home.power` telemetry key.
pub fn balance(snapshot: SiteSnapshot) -> SiteBalance {
    let raw_surplus = Power::watts(-snapshot.grid_power.as_watts() + snapshot.loadpoint_charge_power.as_watts());
    let surplus = Power::watts(raw_surplus.as_watts().max(0.0));
    let home_power = Power::watts(
        snapshot.grid_power.as_watts() + snapshot.pv_power.as_watts()
            - snapshot.battery_power.as_watts()
            - snapshot.loadpoint_charge_power.as_watts(),
    );
    SiteBalance {
        grid_power: snapshot.grid_power,
        pv_power: snapshot.pv_power,
        battery_power: snapshot.battery_power,
        home_power,
        surplus,
    }
}

/// Residual between the measured home meter (when the site has one) and
/// the derived `gridPower ≈ homePower − pvPower − batteryPower −
/// Σ loadpointPower` identity. Beyond `tolerance_w` the snapshot is
/// inconsistent and allocation should degrade to conservative (ignore
/// surplus); sites without an independent home meter have nothing to
/// check against and are always consistent.
pub fn snapshot_residual(snapshot: SiteSnapshot) -> Option<f64> {
    let measured_home = snapshot.measured_home_power?;
    let derived_home = snapshot.grid_power.as_watts() + snapshot.pv_power.as_watts()
        - snapshot.battery_power.as_watts()
        - snapshot.loadpoint_charge_power.as_watts();
    Some(measured_home.as_watts() - derived_home)
}

pub fn is_snapshot_consistent(snapshot: SiteSnapshot, tolerance_w: f64) -> bool {
    snapshot_residual(snapshot).map(|r| r.abs() <= tolerance_w).unwrap_or(true)
}

#[derive(Debug, Clone, Copy)]
pub struct BatteryThresholds {
    /// SoC forced-charge aims to reach before releasing on that condition.
    pub charge_soc_limit: Percentage,
    /// Enter forced charge when current price is below this.
    pub force_charge_price: f64,
    /// Release forced charge when current price rises back above this.
    pub release_price: f64,
    pub mode_change_dwell: ChronoDuration,
}

impl Default for BatteryThresholds {
    fn default() -> Self {
        Self {
            charge_soc_limit: Percentage::new(50.0),
            force_charge_price: 0.10,
            release_price: 0.20,
            mode_change_dwell: ChronoDuration::minutes(10),
        }
    }
}

/// Decides the home battery's operating mode each tick. `forcedCharge`
/// releases on *either* SoC reaching `charge_soc_limit` *or* price rising
/// back above `release_price`, with the same dwell applied symmetrically
/// on exit.
#[derive(Debug, Clone)]
pub struct BatteryModeDecider {
    thresholds: BatteryThresholds,
    dwell: DwellTimer,
    current_mode: BatteryMode,
}

impl BatteryModeDecider {
    pub fn new(thresholds: BatteryThresholds) -> Self {
        Self { thresholds, dwell: DwellTimer::new(), current_mode: BatteryMode::Normal }
    }

    pub fn current_mode(&self) -> BatteryMode {
        self.current_mode
    }

    /// `peak_window_upcoming` is a heuristic flag derived from the rate
    /// window by the caller; `plan_draining_battery` is true when an
    /// active loadpoint plan
    /// would otherwise discharge the battery to feed the charger.
    pub fn decide(
        &mut self,
        now: DateTime<Utc>,
        soc: Percentage,
        current_price: Option<f64>,
        peak_window_upcoming: bool,
        plan_draining_battery: bool,
    ) -> BatteryMode {
        if !self.dwell.dwell_elapsed(now, self.thresholds.mode_change_dwell) {
            return self.current_mode;
        }

        let desired = self.evaluate(soc, current_price, peak_window_upcoming, plan_draining_battery);
        if desired != self.current_mode {
            self.current_mode = desired;
            self.dwell.record_change(now);
        }
        self.current_mode
    }

    fn evaluate(
        &self,
        soc: Percentage,
        current_price: Option<f64>,
        peak_window_upcoming: bool,
        plan_draining_battery: bool,
    ) -> BatteryMode {
        if self.current_mode == BatteryMode::ForcedCharge {
            let soc_reached = soc.as_percent() >= self.thresholds.charge_soc_limit.as_percent();
            let price_released = current_price.map(|p| p >= self.thresholds.release_price).unwrap_or(false);
            if !(soc_reached || price_released) {
                return BatteryMode::ForcedCharge;
            }
        }

        if soc.as_percent() < self.thresholds.charge_soc_limit.as_percent() {
            if let Some(price) = current_price {
                if price < self.thresholds.force_charge_price {
                    return BatteryMode::ForcedCharge;
                }
            }
            if peak_window_upcoming {
                return BatteryMode::ForcedCharge;
            }
        }

        if peak_window_upcoming || plan_draining_battery {
            return BatteryMode::Hold;
        }

        BatteryMode::Normal
    }
}

/// Per-loadpoint input to the priority apportionment step.
#[derive(Debug, Clone)]
pub struct LoadpointAllocationInput {
    pub id: String,
    /// Power the loadpoint could draw if fully unconstrained this tick
    /// (maxCurrent * active phases * voltage); the waterfall never
    /// gives more than this to a single loadpoint.
    pub max_power: Power,
    pub effective_priority: u32,
    /// Plan-active loadpoints rank above non-plan ones.
    pub plan_active: bool,
    /// Vehicle SoC below its minSoC: forces an emergency allocation of
    /// at least `min_power`, drawn from the grid if the surplus can't
    /// cover it.
    pub emergency: bool,
    pub min_power: Power,
    /// §4.4 `now` mode: requests `maxCurrent` and is clamped only by
    /// circuit limits, so it may draw on the grid allowance (not just
    /// PV surplus) to reach `max_power`, the same way `emergency` draws
    /// on the grid to reach `min_power`.
    pub grid_backed: bool,
}

/// Apportions `surplus + grid_allowance` across loadpoints in descending
/// `effectivePriority`, then ascending `minCurrent`, emergency loadpoints
/// first. Ties are broken by round-robin across ticks via
/// `round_robin_offset` (typically the tick counter), so no loadpoint is
/// permanently starved by an arbitrary stable-sort order.
///
/// PV/minPV loadpoints only ever draw from `surplus`: they are not
/// `grid_backed`, so they never dip into `grid_allowance`. `now`-mode
/// and emergency loadpoints draw from `surplus` first and spill into
/// `grid_allowance` for the rest, so a `now`-mode loadpoint reaches its
/// `max_power` even with zero PV surplus, bounded only by the
/// §6.4 `residualPower`-configured grid-draw budget (§4.6 step 4).
pub fn allocate(
    surplus: Power,
    grid_allowance: Power,
    loadpoints: &[LoadpointAllocationInput],
    round_robin_offset: usize,
) -> HashMap<String, Power> {
    let n = loadpoints.len();
    let mut ordered: Vec<&LoadpointAllocationInput> = (0..n).map(|i| &loadpoints[(i + round_robin_offset) % n.max(1)]).collect();
    if n == 0 {
        return HashMap::new();
    }
    ordered.sort_by(|a, b| {
        b.emergency
            .cmp(&a.emergency)
            .then(b.plan_active.cmp(&a.plan_active))
            .then(b.effective_priority.cmp(&a.effective_priority))
            .then(a.min_power.as_watts().partial_cmp(&b.min_power.as_watts()).unwrap_or(std::cmp::Ordering::Equal))
    });

    let mut remaining_surplus = surplus.as_watts().max(0.0);
    let mut remaining_grid = grid_allowance.as_watts().max(0.0);
    let mut out = HashMap::with_capacity(n);

    // Draws `want` from surplus first, then from the grid allowance for
    // whatever surplus can't cover; returns the total granted.
    let mut draw_grid_backed = |want: f64| -> f64 {
        let from_surplus = want.min(remaining_surplus);
        remaining_surplus -= from_surplus;
        let from_grid = (want - from_surplus).min(remaining_grid);
        remaining_grid -= from_grid;
        from_surplus + from_grid
    };

    for lp in &ordered {
        if lp.emergency {
            let grant = draw_grid_backed(lp.min_power.as_watts().max(0.0));
            out.insert(lp.id.clone(), Power::watts(grant));
            continue;
        }
        if lp.grid_backed {
            let grant = draw_grid_backed(lp.max_power.as_watts().max(0.0));
            out.insert(lp.id.clone(), Power::watts(grant));
            continue;
        }
        let grant = remaining_surplus.max(0.0).min(lp.max_power.as_watts());
        remaining_surplus -= grant;
        out.insert(lp.id.clone(), Power::watts(grant));
    }

    out
}
