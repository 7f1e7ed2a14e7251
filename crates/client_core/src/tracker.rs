//! Drives one deploy or rollback from submission until gitops settles.
//!
//! Each workflow is stamped with the generation the store assigned when it was
//! requested. Once a newer workflow starts, every poll and refresh of the old
//! one turns into a no-op and the chain ends with [`TrackingOutcome::Superseded`].
//!
//! Polling has no retry and no upper bound: a backend that keeps answering
//! `new` is polled until the workflow is superseded or the task is dropped.

use std::{sync::Arc, time::Duration};

use shared::{
    domain::{ArtifactId, RolloutKey, TrackingId},
    protocol::{DeployResult, DeployStatus, DeployStatusReport},
};
use thiserror::Error;
use tokio::{task::JoinHandle, time::sleep};
use tracing::{debug, info, warn};

use crate::{
    api::DeployApi,
    state::DeployPhase,
    store::{Action, DeployIntent, DeployProgress, Store},
};

pub const IMAGE_BUILD_POLL_INTERVAL: Duration = Duration::from_millis(2000);
pub const RELEASE_POLL_INTERVAL: Duration = Duration::from_millis(1000);
pub const ROLLOUT_REFRESH_STAGGER: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerSettings {
    pub image_build_poll: Duration,
    pub release_poll: Duration,
    pub rollout_refresh_stagger: Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            image_build_poll: IMAGE_BUILD_POLL_INTERVAL,
            release_poll: RELEASE_POLL_INTERVAL,
            rollout_refresh_stagger: ROLLOUT_REFRESH_STAGGER,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployRequest {
    pub owner: String,
    pub repo: String,
    pub env: String,
    pub app: String,
    pub artifact_id: ArtifactId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackRequest {
    pub owner: String,
    pub repo: String,
    pub env: String,
    pub app: String,
    pub sha: String,
}

/// Where rollout history refreshes land once a release settles.
#[derive(Debug, Clone)]
struct RefreshTarget {
    owner: String,
    repo: String,
    env: String,
    app: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackingOutcome {
    Succeeded {
        tracking_id: TrackingId,
        results: Vec<DeployResult>,
    },
    /// A newer workflow took over; nothing from this one was written after that.
    Superseded { generation: u64 },
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("{command} failed: {source}")]
    Command {
        command: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("{tracking_id} failed: {status_desc}")]
    Terminal {
        tracking_id: TrackingId,
        status_desc: String,
    },
    #[error("image build {tracking_id} succeeded without a triggered deploy request")]
    MissingTriggeredRequest { tracking_id: TrackingId },
}

enum Step<T> {
    Continue(T),
    Superseded,
}

pub struct DeployTracker {
    api: Arc<dyn DeployApi>,
    store: Arc<Store>,
    settings: TrackerSettings,
}

impl DeployTracker {
    pub fn new(api: Arc<dyn DeployApi>, store: Arc<Store>, settings: TrackerSettings) -> Self {
        Self {
            api,
            store,
            settings,
        }
    }

    pub fn spawn_deploy(
        self: &Arc<Self>,
        request: DeployRequest,
    ) -> JoinHandle<Result<TrackingOutcome, TrackerError>> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move { tracker.deploy(request).await })
    }

    pub fn spawn_rollback(
        self: &Arc<Self>,
        request: RollbackRequest,
    ) -> JoinHandle<Result<TrackingOutcome, TrackerError>> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move { tracker.rollback(request).await })
    }

    pub async fn deploy(&self, request: DeployRequest) -> Result<TrackingOutcome, TrackerError> {
        let generation = self.begin(DeployIntent {
            env: request.env.clone(),
            app: request.app.clone(),
            sha: None,
            artifact_id: Some(request.artifact_id.clone()),
            rollback: false,
        });
        info!(
            generation,
            artifact_id = %request.artifact_id,
            env = %request.env,
            app = %request.app,
            "deploy requested"
        );

        let accepted = self
            .api
            .deploy(&request.artifact_id, &request.env, &request.app)
            .await
            .map_err(|source| TrackerError::Command {
                command: "deploy",
                source,
            })?;

        let release_id = if accepted.starts_with_image_build() {
            match self.await_image_build(generation, accepted.id).await? {
                Step::Continue(release_id) => release_id,
                Step::Superseded => return Ok(TrackingOutcome::Superseded { generation }),
            }
        } else {
            accepted.id
        };

        let target = RefreshTarget {
            owner: request.owner,
            repo: request.repo,
            env: request.env,
            app: request.app,
        };
        self.await_release(generation, release_id, &target).await
    }

    pub async fn rollback(
        &self,
        request: RollbackRequest,
    ) -> Result<TrackingOutcome, TrackerError> {
        let generation = self.begin(DeployIntent {
            env: request.env.clone(),
            app: request.app.clone(),
            sha: Some(request.sha.clone()),
            artifact_id: None,
            rollback: true,
        });
        info!(
            generation,
            sha = %request.sha,
            env = %request.env,
            app = %request.app,
            "rollback requested"
        );

        let accepted = self
            .api
            .rollback(&request.env, &request.app, &request.sha)
            .await
            .map_err(|source| TrackerError::Command {
                command: "rollback",
                source,
            })?;

        let target = RefreshTarget {
            owner: request.owner,
            repo: request.repo,
            env: request.env,
            app: request.app,
        };
        self.await_release(generation, accepted.id, &target).await
    }

    fn begin(&self, intent: DeployIntent) -> u64 {
        self.store
            .dispatch(Action::DeployRequested(intent))
            .deploy_generation
    }

    fn is_current(&self, generation: u64) -> bool {
        self.store.state().is_current_deploy(generation)
    }

    fn progress(&self, progress: DeployProgress) {
        self.store.dispatch(Action::DeployProgressed(progress));
    }

    fn report_progress(
        &self,
        generation: u64,
        phase: DeployPhase,
        tracking_id: &TrackingId,
        report: &DeployStatusReport,
    ) {
        self.progress(DeployProgress {
            tracking_id: Some(tracking_id.clone()),
            status: Some(report.status),
            status_desc: report.status_desc.clone(),
            results: Some(report.results.clone()),
            ..DeployProgress::phase(generation, phase)
        });
    }

    fn fail(
        &self,
        generation: u64,
        tracking_id: &TrackingId,
        report: &DeployStatusReport,
    ) -> TrackerError {
        let status_desc = report
            .status_desc
            .clone()
            .unwrap_or_else(|| "deploy failed".to_string());
        warn!(
            generation,
            tracking_id = %tracking_id,
            status_desc = %status_desc,
            "deploy workflow failed"
        );
        self.report_progress(generation, DeployPhase::Failed, tracking_id, report);
        TrackerError::Terminal {
            tracking_id: tracking_id.clone(),
            status_desc,
        }
    }

    /// Sleeps one interval, then polls `tracking_id` unless the workflow was superseded.
    async fn poll(
        &self,
        generation: u64,
        tracking_id: &TrackingId,
        interval: Duration,
    ) -> Result<Step<DeployStatusReport>, TrackerError> {
        sleep(interval).await;
        if !self.is_current(generation) {
            debug!(generation, tracking_id = %tracking_id, "poll skipped, workflow superseded");
            return Ok(Step::Superseded);
        }
        let report = self
            .api
            .deploy_status(tracking_id)
            .await
            .map_err(|source| TrackerError::Command {
                command: "deploy status",
                source,
            })?;
        if !self.is_current(generation) {
            return Ok(Step::Superseded);
        }
        Ok(Step::Continue(report))
    }

    async fn await_image_build(
        &self,
        generation: u64,
        build_id: TrackingId,
    ) -> Result<Step<TrackingId>, TrackerError> {
        if !self.is_current(generation) {
            return Ok(Step::Superseded);
        }
        self.progress(DeployProgress {
            tracking_id: Some(build_id.clone()),
            ..DeployProgress::phase(generation, DeployPhase::ImageBuilding)
        });

        loop {
            let report = match self
                .poll(generation, &build_id, self.settings.image_build_poll)
                .await?
            {
                Step::Continue(report) => report,
                Step::Superseded => return Ok(Step::Superseded),
            };

            match report.status {
                DeployStatus::Success => {
                    let Some(release_id) = report
                        .results
                        .first()
                        .and_then(|result| result.triggered_deploy_request_id.clone())
                    else {
                        self.fail(generation, &build_id, &report);
                        return Err(TrackerError::MissingTriggeredRequest {
                            tracking_id: build_id,
                        });
                    };
                    info!(generation, build_id = %build_id, release_id = %release_id, "image built");
                    return Ok(Step::Continue(release_id));
                }
                DeployStatus::Error => return Err(self.fail(generation, &build_id, &report)),
                DeployStatus::New | DeployStatus::Processed | DeployStatus::Unknown => {
                    self.report_progress(generation, DeployPhase::ImageBuilding, &build_id, &report);
                }
            }
        }
    }

    async fn await_release(
        &self,
        generation: u64,
        release_id: TrackingId,
        target: &RefreshTarget,
    ) -> Result<TrackingOutcome, TrackerError> {
        if !self.is_current(generation) {
            return Ok(TrackingOutcome::Superseded { generation });
        }
        self.progress(DeployProgress {
            tracking_id: Some(release_id.clone()),
            ..DeployProgress::phase(generation, DeployPhase::Releasing)
        });

        loop {
            let report = match self
                .poll(generation, &release_id, self.settings.release_poll)
                .await?
            {
                Step::Continue(report) => report,
                Step::Superseded => return Ok(TrackingOutcome::Superseded { generation }),
            };

            match report.status {
                DeployStatus::Processed | DeployStatus::Success => {
                    // "processed" only means the release was accepted; the gitops
                    // write is confirmed once no result reports "N/A".
                    if report.results.iter().any(DeployResult::awaits_gitops_write) {
                        debug!(generation, release_id = %release_id, "waiting for gitops write");
                        self.report_progress(generation, DeployPhase::Releasing, &release_id, &report);
                        continue;
                    }
                    self.report_progress(
                        generation,
                        DeployPhase::AwaitingGitopsWrite,
                        &release_id,
                        &report,
                    );
                    self.report_progress(generation, DeployPhase::Succeeded, &release_id, &report);
                    info!(generation, release_id = %release_id, "release settled");

                    if !self
                        .refresh_rollout_history(generation, target, &report.results)
                        .await
                    {
                        return Ok(TrackingOutcome::Superseded { generation });
                    }
                    return Ok(TrackingOutcome::Succeeded {
                        tracking_id: release_id,
                        results: report.results,
                    });
                }
                DeployStatus::Error => return Err(self.fail(generation, &release_id, &report)),
                DeployStatus::New | DeployStatus::Unknown => {
                    self.report_progress(generation, DeployPhase::Releasing, &release_id, &report);
                }
            }
        }
    }

    /// Returns false once the workflow has been superseded; nothing is written after that.
    async fn refresh_rollout_history(
        &self,
        generation: u64,
        target: &RefreshTarget,
        results: &[DeployResult],
    ) -> bool {
        for result in results {
            sleep(self.settings.rollout_refresh_stagger).await;
            if !self.is_current(generation) {
                debug!(generation, "rollout history refresh skipped, workflow superseded");
                return false;
            }

            let env = result.env.as_deref().unwrap_or(&target.env);
            let app = result.app.as_deref().unwrap_or(&target.app);
            let fetched = self
                .api
                .rollout_history_per_app(&target.owner, &target.repo, env, app)
                .await;
            if !self.is_current(generation) {
                debug!(generation, env, app, "dropping rollout history, workflow superseded");
                return false;
            }
            match fetched {
                Ok(records) => {
                    let key = RolloutKey::new(format!("{}/{}", target.owner, target.repo), env, app);
                    debug!(key = %key, records = records.len(), "rollout history refreshed");
                    self.store.dispatch(Action::RolloutHistoryLoaded {
                        key,
                        records,
                        generation: Some(generation),
                    });
                }
                Err(err) => {
                    warn!(env, app, error = %err, "failed to refresh rollout history");
                }
            }
        }
        true
    }
}

#[cfg(test)]
#[path = "tests/tracker_tests.rs"]
mod tests;
