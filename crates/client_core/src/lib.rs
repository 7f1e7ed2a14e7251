use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::info;

pub mod api;
pub mod commit_window;
pub mod config;
pub mod reducer;
pub mod state;
pub mod store;
pub mod tracker;
pub mod transport;

pub use api::{DeployApi, HttpDeployApi};
pub use config::{load_settings, ClientSettings};
pub use state::{DeployPhase, DeployTracking, ReducerStats, State};
pub use store::{Action, Store};
pub use tracker::{
    DeployRequest, DeployTracker, RollbackRequest, TrackerError, TrackingOutcome,
};
pub use transport::EventStream;

/// Wires one store to the event stream and the deploy tracker.
pub struct DashboardClient {
    settings: ClientSettings,
    store: Arc<Store>,
    tracker: Arc<DeployTracker>,
}

impl DashboardClient {
    pub fn new(settings: ClientSettings) -> Self {
        let api = Arc::new(HttpDeployApi::new(
            settings.server_url.clone(),
            settings.api_token.clone(),
        ));
        Self::with_api(settings, api)
    }

    pub fn with_api(settings: ClientSettings, api: Arc<dyn DeployApi>) -> Self {
        let store = Arc::new(Store::new(State::with_commit_event_ttl(
            settings.commit_event_ttl(),
        )));
        let tracker = Arc::new(DeployTracker::new(
            api,
            Arc::clone(&store),
            settings.tracker_settings(),
        ));
        Self {
            settings,
            store,
            tracker,
        }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn tracker(&self) -> &Arc<DeployTracker> {
        &self.tracker
    }

    /// Starts the reconnecting event stream; abort the handle to stop it.
    pub fn start_events(&self) -> Result<JoinHandle<()>> {
        let stream = EventStream::new(
            Arc::clone(&self.store),
            &self.settings.server_url,
            self.settings.reconnect_delay(),
        )?;
        info!(url = %stream.ws_url(), "starting event stream");
        Ok(stream.spawn())
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
