use std::collections::{BTreeMap, HashMap};

use chrono::TimeDelta;
use shared::{
    domain::{
        AgentSnapshot, Alert, ArtifactId, Commit, GitopsCommit, RolloutKey, RolloutRecord,
        ServiceKey, Stack, TrackingId,
    },
    protocol::{DeployResult, DeployStatus},
};

use crate::commit_window::CommitEventWindow;

/// Canonical in-memory model folded from the event stream and tracker actions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct State {
    pub agents: Vec<AgentSnapshot>,
    pub rollout_history: BTreeMap<RolloutKey, Vec<RolloutRecord>>,
    /// Newest first; existing entries keep their position when patched.
    pub gitops_commits: Vec<GitopsCommit>,
    pub commit_events: CommitEventWindow,
    /// Source commits per `owner/repo`.
    pub commits: HashMap<String, Vec<Commit>>,
    pub image_build_logs: HashMap<String, ImageBuildLog>,
    pub alerts: HashMap<String, Vec<Alert>>,
    pub deploy: Option<DeployTracking>,
    pub deploy_generation: u64,
    pub stats: ReducerStats,
}

impl State {
    pub fn with_commit_event_ttl(ttl: TimeDelta) -> Self {
        Self {
            commit_events: CommitEventWindow::with_ttl(ttl),
            ..Self::default()
        }
    }

    pub fn agent(&self, name: &str) -> Option<&AgentSnapshot> {
        self.agents.iter().find(|agent| agent.name == name)
    }

    pub fn stack(&self, agent: &str, svc: &ServiceKey) -> Option<&Stack> {
        self.agent(agent)?
            .stacks
            .iter()
            .find(|stack| stack.service.key() == *svc)
    }

    pub fn rollouts(&self, key: &RolloutKey) -> &[RolloutRecord] {
        self.rollout_history
            .get(key)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn gitops_commit(&self, sha: &str) -> Option<&GitopsCommit> {
        self.gitops_commits.iter().find(|commit| commit.sha == sha)
    }

    pub fn alerts_for(&self, deployment_name: &str) -> &[Alert] {
        self.alerts
            .get(deployment_name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn is_current_deploy(&self, generation: u64) -> bool {
        self.deploy
            .as_ref()
            .is_some_and(|deploy| deploy.generation == generation)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageBuildLog {
    pub status: String,
    pub lines: Vec<String>,
}

/// Counters for events the reducers accepted but could not apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReducerStats {
    /// Events that referenced an agent, stack, deployment or record not (yet) known.
    pub missing_entity: u64,
    pub unknown_events: u64,
    /// Tracker progress dropped because a newer workflow had started.
    pub stale_deploy_updates: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployPhase {
    Submitted,
    ImageBuilding,
    Releasing,
    AwaitingGitopsWrite,
    Succeeded,
    Failed,
}

impl DeployPhase {
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// The deploy or rollback workflow the operator is currently following.
#[derive(Debug, Clone, PartialEq)]
pub struct DeployTracking {
    pub generation: u64,
    pub tracking_id: Option<TrackingId>,
    pub env: String,
    pub app: String,
    pub sha: Option<String>,
    pub artifact_id: Option<ArtifactId>,
    pub rollback: bool,
    pub phase: DeployPhase,
    pub status: Option<DeployStatus>,
    pub status_desc: Option<String>,
    pub results: Vec<DeployResult>,
}
