use super::charger::{Charger, ChargerCommand, ChargerStatus};
use super::{AdapterError, AdapterResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// A pre-programmed sequence of responses a mock adapter plays back in
/// order, one per call. Used to drive scenario tests deterministically.
#[derive(Debug, Clone, Default)]
pub struct MockScript<T> {
    responses: Vec<AdapterResult<T>>,
}

impl<T: Clone> MockScript<T> {
    pub fn new(responses: Vec<AdapterResult<T>>) -> Self {
        Self { responses }
    }
}

/// Scripted mock charger adapter for scenario tests: each call to
/// `read_status` consumes the next scripted response, repeating the
/// last one once the script is exhausted.
pub struct MockAdapter {
    script: Mutex<MockScript<ChargerStatus>>,
    cursor: AtomicUsize,
}

impl MockAdapter {
    pub fn new(script: MockScript<ChargerStatus>) -> Self {
        Self { script: Mutex::new(script), cursor: AtomicUsize::new(0) }
    }
}

#[async_trait::async_trait]
impl Charger for MockAdapter {
    async fn read_status(&self) -> AdapterResult<ChargerStatus> {
        let script = self.script.lock().await;
        if script.responses.is_empty() {
            return Err(AdapterError::Transient("no scripted response".into()));
        }
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst).min(script.responses.len() - 1);
        script.responses[idx].clone()
    }

    async fn apply(&self, _command: ChargerCommand) -> AdapterResult<()> {
        Ok(())
    }
}
