//! Energy accumulator: turns instantaneous power samples into kWh
//! totals per meter, with clock-monotonic timestamps and persistence
//! across restarts.

use crate::domain::types::{Energy, Power};
use crate::settings::SettingsStore;
use std::time::{Duration, Instant};
use tracing::warn;

/// Elapsed time beyond which a tick's contribution is discarded rather
/// than integrated, to keep a missed tick from being mistaken for a
/// long, real power interval.
const MAX_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Per-meter integrator. Tracks accumulated kWh since construction (or
/// since restoration from persisted settings) plus the last cumulative
/// counter reading, when the device provides one, so a counter delta can
/// be preferred over integrating instantaneous power.
#[derive(Debug, Clone)]
pub struct EnergyAccumulator {
    accumulated_kwh: f64,
    last_sample_at: Option<Instant>,
    last_counter_kwh: Option<f64>,
}

impl Default for EnergyAccumulator {
    fn default() -> Self {
        Self { accumulated_kwh: 0.0, last_sample_at: None, last_counter_kwh: None }
    }
}

impl EnergyAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accumulated(&self) -> Energy {
        Energy::kilowatt_hours(self.accumulated_kwh)
    }

    /// Advance the accumulator by one tick. `power` is the instantaneous
    /// reading; `counter` is the device's cumulative energy counter, if
    /// it exposes one — its delta is preferred whenever present, and a
    /// negative delta (meter reset) is ignored rather than subtracted.
    pub fn sample(&mut self, at: Instant, power: Power, counter: Option<Energy>) {
        let elapsed = self.last_sample_at.map(|prev| at.saturating_duration_since(prev));
        self.last_sample_at = Some(at);

        if let Some(counter) = counter {
            let counter_kwh = counter.as_kilowatt_hours();
            if let Some(last) = self.last_counter_kwh {
                let delta = counter_kwh - last;
                if delta >= 0.0 {
                    self.accumulated_kwh += delta;
                }
                // negative delta: meter reset, skip this tick's contribution
            }
            self.last_counter_kwh = Some(counter_kwh);
            return;
        }

        let Some(elapsed) = elapsed else { return };
        if elapsed > MAX_INTERVAL {
            return;
        }
        let hours = elapsed.as_secs_f64() / 3600.0;
        self.accumulated_kwh += power.as_watts() * hours / 1000.0;
    }

    pub fn reset(&mut self) {
        self.accumulated_kwh = 0.0;
        self.last_counter_kwh = None;
    }

    /// Restore from a persisted value. Must only be called on an
    /// accumulator slot that already exists in the owning map — see
    /// `restore_all` for the map-before-restore ordering this enforces.
    fn restore(&mut self, kwh: f64) {
        self.accumulated_kwh = kwh;
    }

    /// Restore a standalone accumulator that has no per-id split to key
    /// into `restore_all`'s map (e.g. the site-wide solar forecast total).
    pub fn restore_from(&mut self, kwh: f64) {
        self.accumulated_kwh = kwh;
    }
}

/// Restores a set of already-constructed accumulator slots from the
/// settings store. Callers must build every slot this will touch (e.g.
/// one per configured PV meter) *before* calling this: restoring into a
/// slot that doesn't exist yet silently drops that meter's accumulated
/// value instead of restoring it.
pub async fn restore_all(
    slots: &mut [(&str, &mut EnergyAccumulator)],
    settings: &dyn SettingsStore,
    key_prefix: &str,
) {
    for (meter_id, acc) in slots.iter_mut() {
        let key = format!("{key_prefix}.{meter_id}");
        match settings.get_f64(&key).await {
            Ok(Some(kwh)) => acc.restore(kwh),
            Ok(None) => {
                warn!(key = %key, "no persisted accumulator value, starting from zero");
            }
            Err(err) => {
                warn!(key = %key, error = %err, "failed to restore accumulator, zero-initialising");
            }
        }
    }
}

pub async fn persist_all(
    slots: &[(&str, &EnergyAccumulator)],
    settings: &dyn SettingsStore,
    key_prefix: &str,
) {
    for (meter_id, acc) in slots {
        let key = format!("{key_prefix}.{meter_id}");
        let _ = settings.set_f64(&key, acc.accumulated_kwh).await;
    }
}
