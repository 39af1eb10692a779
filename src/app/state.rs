use super::ComponentState;
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::debug;

pub(super) const MONITOR: &str = "monitor";
pub(super) const FINALIZER: &str = "finalizer";
pub(super) const PUBLISHER: &str = "publisher";

/// Lifecycle state of every daemon component
#[derive(Default)]
pub struct ComponentRegistry {
    states: Mutex<BTreeMap<String, ComponentState>>,
}

impl ComponentRegistry {
    pub async fn set(&self, component: &str, state: ComponentState) {
        let mut states = self.states.lock().await;
        debug!("Component '{}' -> {:?}", component, state);
        states.insert(component.to_string(), state);
    }

    pub async fn get(&self, component: &str) -> Option<ComponentState> {
        self.states.lock().await.get(component).cloned()
    }

    /// Sorted copy of all states
    pub async fn snapshot(&self) -> BTreeMap<String, ComponentState> {
        self.states.lock().await.clone()
    }

    /// One-line summary for logs, e.g. `finalizer=Running monitor=Stopped`
    pub async fn summary(&self) -> String {
        self.states
            .lock()
            .await
            .iter()
            .map(|(name, state)| format!("{}={:?}", name, state))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
