//! Health & event bus: an in-process publish/subscribe surface for the
//! UI and external automation. Emits a dotted key/value update whenever
//! an observable property changes, plus log-shaped events.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BusEvent {
    Telemetry(TelemetryEvent),
    Log(LogEvent),
}

/// Publish/subscribe bus plus a last-value cache, so a newly-subscribed
/// consumer (e.g. a freshly opened UI websocket) can request the current
/// value of every key instead of waiting for the next change.
pub struct EventBus {
    sender: broadcast::Sender<BusEvent>,
    last_values: Arc<RwLock<HashMap<String, Value>>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _rx) = broadcast::channel(capacity);
        Self { sender, last_values: Arc::new(RwLock::new(HashMap::new())) }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }

    /// Publishes a key/value update. Event publications are ordered
    /// per-key so consumers see a monotone value sequence per key: the
    /// last-value cache is updated before the broadcast send so a
    /// concurrent `snapshot()` call never observes a value older than
    /// what was just sent.
    ///
    /// Cumulative keys (session energy, accumulated totals, per §8
    /// invariant 10) must never regress: a meter reset or a stale read
    /// racing a fresher one would otherwise show up as a visible dip.
    /// For those keys a new value lower than the cached one is silently
    /// dropped rather than published.
    pub async fn publish(&self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        if is_monotone_key(&key) {
            let guard = self.last_values.read().await;
            if let Some(previous) = guard.get(&key) {
                if let (Some(prev), Some(next)) = (previous.as_f64(), value.as_f64()) {
                    if next < prev {
                        return;
                    }
                }
            }
        }
        self.last_values.write().await.insert(key.clone(), value.clone());
        let _ = self.sender.send(BusEvent::Telemetry(TelemetryEvent { key, value }));
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let _ = self.sender.send(BusEvent::Log(LogEvent { level, message: message.into() }));
    }

    /// Current value of every published key, for a consumer that just
    /// subscribed and needs to catch up.
    pub async fn snapshot(&self) -> HashMap<String, Value> {
        self.last_values.read().await.clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Keys tagged monotone-cumulative: session energy totals and the site's
/// running accumulators. These only ever go up (or reset via a fresh
/// session, which starts a new key generation rather than regressing
/// this one) — anything else is a point-in-time reading allowed to swing
/// either way.
fn is_monotone_key(key: &str) -> bool {
    key.ends_with(".session.energy") || key.contains(".accumulated.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_is_observed_by_subscriber() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.publish("site.grid.power", -3000.0).await;
        match rx.recv().await.unwrap() {
            BusEvent::Telemetry(ev) => {
                assert_eq!(ev.key, "site.grid.power");
                assert_eq!(ev.value, Value::from(-3000.0));
            }
            _ => panic!("expected telemetry event"),
        }
    }

    #[tokio::test]
    async fn snapshot_reflects_latest_value_per_key() {
        let bus = EventBus::new(16);
        bus.publish("loadpoint.1.mode", "minPV").await;
        bus.publish("loadpoint.1.mode", "PV").await;
        let snap = bus.snapshot().await;
        assert_eq!(snap.get("loadpoint.1.mode"), Some(&Value::from("PV")));
    }

    #[tokio::test]
    async fn non_monotone_keys_are_free_to_decrease() {
        let bus = EventBus::new(16);
        bus.publish("site.grid.power", 3000.0).await;
        bus.publish("site.grid.power", -500.0).await;
        let snap = bus.snapshot().await;
        assert_eq!(snap.get("site.grid.power"), Some(&Value::from(-500.0)));
    }

    #[tokio::test]
    async fn session_energy_never_regresses() {
        let bus = EventBus::new(16);
        bus.publish("loadpoint.1.session.energy", 2.5).await;
        bus.publish("loadpoint.1.session.energy", 1.0).await;
        let snap = bus.snapshot().await;
        assert_eq!(
            snap.get("loadpoint.1.session.energy"),
            Some(&Value::from(2.5)),
            "a lower reading must not overwrite the cached cumulative total"
        );
    }

    #[tokio::test]
    async fn accumulated_key_rejects_regression_but_not_broadcast_subscribers() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.publish("site.accumulated.solarYield", 10.0).await;
        bus.publish("site.accumulated.solarYield", 4.0).await;
        bus.publish("site.accumulated.solarYield", 12.0).await;

        let mut seen = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let BusEvent::Telemetry(t) = ev {
                seen.push(t.value);
            }
        }
        assert_eq!(seen, vec![Value::from(10.0), Value::from(12.0)], "the regressing publish must not broadcast either");
    }
}
