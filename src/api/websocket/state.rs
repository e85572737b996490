//! WebSocket application state

use std::sync::Arc;

use crate::broker::{Client, Registry};

/// Callback run for every new connection, after the client is registered and
/// before the server starts waiting for it to close
pub type SetupFn = Arc<dyn Fn(&Registry, &Arc<Client>) + Send + Sync>;

/// Shared application state for WebSocket connections
pub struct AppState {
    /// The broker registry
    pub registry: Registry,

    /// Wires listeners and rooms for each new client
    pub setup: SetupFn,
}

impl AppState {
    /// Create a new AppState around a registry and a setup callback
    pub fn new<F>(registry: Registry, setup: F) -> Self
    where
        F: Fn(&Registry, &Arc<Client>) + Send + Sync + 'static,
    {
        Self {
            registry,
            setup: Arc::new(setup),
        }
    }

    /// State whose connections get no extra wiring
    pub fn bare(registry: Registry) -> Self {
        Self::new(registry, |_, _| {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Transport;
    use crate::config::BrokerConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_setup_runs_per_connection() {
        let registry = Registry::new(BrokerConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let state = AppState::new(registry.clone(), move |_, client| {
            counter.fetch_add(1, Ordering::SeqCst);
            client.set("seen", true);
        });

        let (transport, _peer) = Transport::memory();
        let setup = state.setup.clone();
        let client = registry.spawn(transport, move |r, c| setup(r, c));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.get("seen"), Some(serde_json::Value::Bool(true)));
    }
}
