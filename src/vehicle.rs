//! Vehicle identity and the site-wide vehicle↔loadpoint binding registry.
//! A vehicle binds a `SocReader` identity to
//! per-vehicle settings and, optionally, a charge plan; it is associated
//! with at most one loadpoint at a time, reassigned atomically at a tick
//! boundary by the registry below.

use crate::domain::types::{Energy, Percentage};
use crate::planner::Plan;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type VehicleId = String;
pub type LoadpointId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: VehicleId,
    pub title: String,
    pub capacity: Energy,
    pub min_soc: Percentage,
    pub limit_soc: Percentage,
    pub plan: Option<Plan>,
    /// Most recent SoC reported for this vehicle, used by the
    /// identity-matching heuristic when multiple vehicles share a
    /// loadpoint. `None` until a reading has ever been associated.
    pub last_known_soc: Option<Percentage>,
}

impl Vehicle {
    pub fn new(id: impl Into<VehicleId>, title: impl Into<String>, capacity: Energy) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            capacity,
            min_soc: Percentage::new(0.0),
            limit_soc: Percentage::new(100.0),
            plan: None,
            last_known_soc: None,
        }
    }

    pub fn observe_soc(&mut self, soc: Percentage) {
        self.last_known_soc = Some(soc);
    }
}

/// How a vehicle came to be bound to a loadpoint, surfaced for telemetry
/// and debugging the heuristic's decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchReason {
    ExplicitSelection,
    ClosestSocMatch,
    Default,
}

/// Owns every `Vehicle` and the current loadpoint bindings. Reassignment
/// replaces the old binding outright — `bind` always wins over whatever
/// was previously bound for that loadpoint, and the call site (the site
/// tick) is the only place bindings change, keeping reassignment atomic
/// at the tick boundary.
#[derive(Debug, Default)]
pub struct VehicleRegistry {
    vehicles: HashMap<VehicleId, Vehicle>,
    bindings: HashMap<LoadpointId, VehicleId>,
    explicit_selection: HashMap<LoadpointId, VehicleId>,
}

impl VehicleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, vehicle: Vehicle) {
        self.vehicles.insert(vehicle.id.clone(), vehicle);
    }

    pub fn get(&self, id: &str) -> Option<&Vehicle> {
        self.vehicles.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Vehicle> {
        self.vehicles.get_mut(id)
    }

    pub fn bound_vehicle(&self, loadpoint: &str) -> Option<&Vehicle> {
        self.bindings.get(loadpoint).and_then(|id| self.vehicles.get(id))
    }

    /// Operator override: this vehicle is bound to this loadpoint until
    /// explicitly cleared or reassigned, regardless of SoC heuristics.
    pub fn select_explicit(&mut self, loadpoint: impl Into<LoadpointId>, vehicle: impl Into<VehicleId>) {
        let loadpoint = loadpoint.into();
        let vehicle = vehicle.into();
        self.bindings.insert(loadpoint.clone(), vehicle.clone());
        self.explicit_selection.insert(loadpoint, vehicle);
    }

    pub fn clear_explicit(&mut self, loadpoint: &str) {
        self.explicit_selection.remove(loadpoint);
    }

    /// Resolves which vehicle identity a newly-reported SoC at a
    /// loadpoint belongs to: an explicit operator selection always
    /// wins; otherwise the vehicle whose last-known SoC is numerically
    /// closest to `reported_soc` wins, ties broken by ascending vehicle
    /// id for determinism. If no candidate has ever reported a SoC
    /// (first plug-in after startup), falls back to the lowest vehicle
    /// id — a deterministic pick, not an informed guess.
    /// `candidates` is every vehicle not currently bound elsewhere.
    pub fn match_vehicle<'a>(
        &self,
        loadpoint: &str,
        reported_soc: Percentage,
        candidates: impl IntoIterator<Item = &'a Vehicle>,
    ) -> Option<(VehicleId, MatchReason)> {
        if let Some(explicit) = self.explicit_selection.get(loadpoint) {
            return Some((explicit.clone(), MatchReason::ExplicitSelection));
        }

        let candidates: Vec<&Vehicle> = candidates.into_iter().collect();

        let mut best: Option<(&Vehicle, f64)> = None;
        for v in &candidates {
            let Some(known) = v.last_known_soc else { continue };
            let distance = (known.as_percent() - reported_soc.as_percent()).abs();
            best = match best {
                None => Some((v, distance)),
                Some((cur, cur_dist)) => {
                    if distance < cur_dist || (distance == cur_dist && v.id < cur.id) {
                        Some((v, distance))
                    } else {
                        Some((cur, cur_dist))
                    }
                }
            };
        }

        if let Some((v, _)) = best {
            return Some((v.id.clone(), MatchReason::ClosestSocMatch));
        }

        candidates.into_iter().min_by(|a, b| a.id.cmp(&b.id)).map(|v| (v.id.clone(), MatchReason::Default))
    }

    pub fn bind(&mut self, loadpoint: impl Into<LoadpointId>, vehicle: impl Into<VehicleId>) {
        self.bindings.insert(loadpoint.into(), vehicle.into());
    }

    pub fn unbind(&mut self, loadpoint: &str) {
        self.bindings.remove(loadpoint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vehicle(id: &str, soc: f64) -> Vehicle {
        let mut v = Vehicle::new(id, id, Energy::kilowatt_hours(50.0));
        v.observe_soc(Percentage::new(soc));
        v
    }

    #[test]
    fn explicit_selection_wins_over_heuristic() {
        let mut reg = VehicleRegistry::new();
        reg.add(vehicle("a", 50.0));
        reg.add(vehicle("b", 20.0));
        reg.select_explicit("lp1", "b");

        let candidates = [reg.get("a").unwrap().clone(), reg.get("b").unwrap().clone()];
        let (id, reason) = reg.match_vehicle("lp1", 51.0, candidates.iter()).unwrap();
        assert_eq!(id, "b");
        assert_eq!(reason, MatchReason::ExplicitSelection);
    }

    #[test]
    fn closest_soc_wins_without_explicit_selection() {
        let mut reg = VehicleRegistry::new();
        reg.add(vehicle("a", 50.0));
        reg.add(vehicle("b", 20.0));

        let candidates = [reg.get("a").unwrap().clone(), reg.get("b").unwrap().clone()];
        let (id, reason) = reg.match_vehicle("lp1", 51.0, candidates.iter()).unwrap();
        assert_eq!(id, "a");
        assert_eq!(reason, MatchReason::ClosestSocMatch);
    }

    #[test]
    fn ties_broken_by_ascending_vehicle_id() {
        let mut reg = VehicleRegistry::new();
        reg.add(vehicle("z", 40.0));
        reg.add(vehicle("a", 60.0));

        let candidates = [reg.get("z").unwrap().clone(), reg.get("a").unwrap().clone()];
        let (id, _) = reg.match_vehicle("lp1", 50.0, candidates.iter()).unwrap();
        assert_eq!(id, "a");
    }

    #[test]
    fn default_tier_picks_lowest_id_when_no_candidate_has_known_soc() {
        let mut reg = VehicleRegistry::new();
        reg.add(Vehicle::new("z", "z", Energy::kilowatt_hours(50.0)));
        reg.add(Vehicle::new("a", "a", Energy::kilowatt_hours(50.0)));

        let candidates = [reg.get("z").unwrap().clone(), reg.get("a").unwrap().clone()];
        let (id, reason) = reg.match_vehicle("lp1", 51.0, candidates.iter()).unwrap();
        assert_eq!(id, "a");
        assert_eq!(reason, MatchReason::Default);
    }

    #[test]
    fn bind_replaces_existing_binding_atomically() {
        let mut reg = VehicleRegistry::new();
        reg.add(vehicle("a", 50.0));
        reg.add(vehicle("b", 20.0));
        reg.bind("lp1", "a");
        assert_eq!(reg.bound_vehicle("lp1").unwrap().id, "a");
        reg.bind("lp1", "b");
        assert_eq!(reg.bound_vehicle("lp1").unwrap().id, "b");
    }
}
