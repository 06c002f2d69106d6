//! Narrow capability traits device adapters implement.
//!
//! Each trait models one facet of a device's surface (power source,
//! energy meter, phase count, SoC reading, charge control, phase
//! switching, battery mode control, tariff/forecast feed) rather than a
//! single deep `Device` interface. A concrete adapter implements only the
//! facets the real device exposes.

mod battery_controller;
mod charger;
mod energy_source;
mod forecast_provider;
mod mock;
mod phase_switcher;
mod phases;
mod power_source;
mod simulated;
mod soc_reader;
mod tariff_provider;

pub use battery_controller::{BatteryController, BatteryMode};
pub use charger::{Charger, ChargerCommand, ChargerStatus};
#[cfg(test)]
pub use charger::MockCharger;
pub use energy_source::EnergySource;
pub use forecast_provider::ForecastProvider;
pub use mock::{MockAdapter, MockScript};
pub use phase_switcher::PhaseSwitcher;
pub use phases::Phases;
pub use power_source::PowerSource;
pub use simulated::{
    SimulatedBattery, SimulatedCharger, SimulatedForecastProvider, SimulatedMeter, SimulatedPhases,
    SimulatedSocReader, SimulatedTariffProvider,
};
pub use soc_reader::SocReader;
pub use tariff_provider::TariffProvider;

use thiserror::Error;

/// How an adapter failed: a `Transient`/`Stale`/`Fatal` taxonomy.
///
/// `Transient` is a single failed call (timeout, transport hiccup) the
/// caller should retry next tick. Three consecutive `Transient` failures
/// on the same adapter are promoted to `Stale` by the caller, meaning the
/// last known value should no longer be trusted as current. `Fatal`
/// means the device itself reports a state (fault, emergency stop) that
/// must not be treated as recoverable by retrying.
#[derive(Debug, Error, Clone)]
pub enum AdapterError {
    #[error("transient adapter error: {0}")]
    Transient(String),
    #[error("adapter reading stale, last updated too long ago")]
    Stale,
    #[error("fatal adapter error: {0}")]
    Fatal(String),
}

impl AdapterError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, AdapterError::Fatal(_))
    }
}

pub type AdapterResult<T> = Result<T, AdapterError>;
