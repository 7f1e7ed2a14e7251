use std::sync::Arc;

use chrono::{DateTime, Utc};
use shared::{
    domain::{ArtifactId, Commit, RolloutKey, RolloutRecord, TrackingId},
    protocol::{DeployResult, DeployStatus, StreamEvent},
};
use tokio::sync::watch;

use crate::{
    reducer,
    state::{DeployPhase, State},
};

/// Everything the store can fold: stream events plus actions raised locally.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Stream(StreamEvent),
    /// Starts a new tracked workflow and bumps the deploy generation.
    DeployRequested(DeployIntent),
    DeployProgressed(DeployProgress),
    /// Full replacement of one rollout history. A load carrying a deploy
    /// generation is dropped once a newer workflow has started.
    RolloutHistoryLoaded {
        key: RolloutKey,
        records: Vec<RolloutRecord>,
        generation: Option<u64>,
    },
    /// Commit list snapshot for one `owner/repo`, fetched by whoever renders the
    /// repository view. `commitStatusUpdated` only patches commits loaded here.
    CommitsLoaded {
        repo: String,
        commits: Vec<Commit>,
    },
}

impl From<StreamEvent> for Action {
    fn from(event: StreamEvent) -> Self {
        Self::Stream(event)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeployIntent {
    pub env: String,
    pub app: String,
    pub sha: Option<String>,
    pub artifact_id: Option<ArtifactId>,
    pub rollback: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeployProgress {
    pub generation: u64,
    pub phase: DeployPhase,
    pub tracking_id: Option<TrackingId>,
    pub status: Option<DeployStatus>,
    pub status_desc: Option<String>,
    /// `None` keeps the results already recorded.
    pub results: Option<Vec<DeployResult>>,
}

impl DeployProgress {
    pub fn phase(generation: u64, phase: DeployPhase) -> Self {
        Self {
            generation,
            phase,
            tracking_id: None,
            status: None,
            status_desc: None,
            results: None,
        }
    }
}

/// Holds the current snapshot. Every dispatch runs to completion under the
/// channel lock, so concurrent callers are serialised.
pub struct Store {
    state: watch::Sender<Arc<State>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new(State::default())
    }
}

impl Store {
    pub fn new(initial: State) -> Self {
        let (state, _) = watch::channel(Arc::new(initial));
        Self { state }
    }

    pub fn dispatch(&self, action: impl Into<Action>) -> Arc<State> {
        self.dispatch_at(action, Utc::now())
    }

    /// Dispatch with an explicit clock reading, used as the eviction reference.
    pub fn dispatch_at(&self, action: impl Into<Action>, now: DateTime<Utc>) -> Arc<State> {
        let action = action.into();
        let mut next = self.state();
        self.state.send_modify(|current| {
            let reduced = Arc::new(reducer::reduce(current, &action, now));
            *current = Arc::clone(&reduced);
            next = reduced;
        });
        next
    }

    pub fn state(&self) -> Arc<State> {
        Arc::clone(&self.state.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<State>> {
        self.state.subscribe()
    }
}
