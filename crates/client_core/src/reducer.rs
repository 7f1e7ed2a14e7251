//! Pure transitions from `(State, Action)` to the next `State`.
//!
//! Events referring to entities the client has not seen yet are dropped and
//! counted in [`ReducerStats`](crate::state::ReducerStats); stack discovery and
//! pod/deployment events race on the wire.

use chrono::{DateTime, Utc};
use shared::{
    domain::{
        AgentSnapshot, Alert, GitopsCommit, GitopsCommitPatch, Ingress, RolloutKey,
        RolloutRecord, ServiceKey, Stack,
    },
    protocol::{
        AgentPresence, CommitStatusUpdate, DeploymentChange, DeploymentPatchChange,
        DeploymentRemoval, FluxEventsUpdate, FluxStateUpdate, ImageBuildLogLine, IngressChange,
        PodChange, StreamEvent,
    },
};
use tracing::{debug, trace};

use crate::{
    state::{DeployPhase, DeployTracking, State},
    store::{Action, DeployIntent, DeployProgress},
};

pub fn reduce(state: &State, action: &Action, now: DateTime<Utc>) -> State {
    let mut next = state.clone();
    apply(&mut next, action, now);
    next
}

fn apply(state: &mut State, action: &Action, now: DateTime<Utc>) {
    match action {
        Action::Stream(event) => apply_event(state, event, now),
        Action::DeployRequested(intent) => start_deploy(state, intent),
        Action::DeployProgressed(progress) => progress_deploy(state, progress),
        Action::RolloutHistoryLoaded {
            key,
            records,
            generation,
        } => rollout_history_loaded(state, key, records, *generation),
        Action::CommitsLoaded { repo, commits } => {
            state.commits.insert(repo.clone(), commits.clone());
        }
    }
}

fn apply_event(state: &mut State, event: &StreamEvent, now: DateTime<Utc>) {
    match event {
        StreamEvent::AgentConnected(presence) => agent_connected(state, presence),
        StreamEvent::AgentDisconnected(presence) => {
            state.agents.retain(|agent| agent.name != presence.name);
        }
        StreamEvent::EnvsUpdated(sync) => envs_updated(state, &sync.envs),
        StreamEvent::PodCreated(change) | StreamEvent::PodUpdated(change) => {
            upsert_pod(state, change)
        }
        StreamEvent::PodDeleted(change) => delete_pod(state, change),
        StreamEvent::DeploymentCreated(change) => deployment_created(state, change),
        StreamEvent::DeploymentUpdated(change) => deployment_updated(state, change),
        StreamEvent::DeploymentDeleted(removal) => deployment_deleted(state, removal),
        StreamEvent::IngressCreated(change) | StreamEvent::IngressUpdated(change) => {
            upsert_ingress(state, change)
        }
        StreamEvent::IngressDeleted(change) => delete_ingress(state, change),
        StreamEvent::AlertPending(alert) | StreamEvent::AlertFired(alert) => {
            state
                .alerts
                .entry(alert.deployment_name.clone())
                .or_default()
                .push(alert.clone());
        }
        StreamEvent::AlertResolved(alert) => alert_resolved(state, alert),
        StreamEvent::GitopsCommit(commit) => gitops_commit(state, commit),
        StreamEvent::CommitStatusUpdated(update) => commit_status_updated(state, update),
        StreamEvent::ImageBuildLogEvent(line) => image_build_log(state, line),
        StreamEvent::CommitEvent(event) => {
            let evicted = state.commit_events.insert(event.clone(), now);
            if evicted > 0 {
                debug!(evicted, sha = %event.sha, "commit event window swept stale buckets");
            }
        }
        StreamEvent::FluxStateUpdated(update) => flux_state_updated(state, update),
        StreamEvent::FluxEventsUpdated(update) => flux_events_updated(state, update),
        StreamEvent::Unknown => {
            state.stats.unknown_events += 1;
            debug!("ignoring unrecognised stream event");
        }
    }
}

fn agent_connected(state: &mut State, presence: &AgentPresence) {
    let fresh = AgentSnapshot::new(presence.name.clone());
    let position = state
        .agents
        .iter()
        .position(|agent| agent.name == presence.name);
    match position {
        Some(index) => state.agents[index] = fresh,
        None => state.agents.push(fresh),
    }
}

/// Wholesale replace, except `pullRequests` survives when the new payload omits it.
fn envs_updated(state: &mut State, envs: &[AgentSnapshot]) {
    let previous = std::mem::take(&mut state.agents);
    state.agents = envs
        .iter()
        .cloned()
        .map(|mut env| {
            if env.pull_requests.is_none() {
                env.pull_requests = previous
                    .iter()
                    .find(|old| old.name == env.name)
                    .and_then(|old| old.pull_requests.clone());
            }
            env
        })
        .collect();
}

fn missing(state: &mut State, what: &str, agent: &str, svc: Option<&ServiceKey>) {
    state.stats.missing_entity += 1;
    debug!(
        what,
        agent,
        svc = svc.map(ServiceKey::as_str).unwrap_or_default(),
        missing_entity = state.stats.missing_entity,
        "event references unknown entity, dropped"
    );
}

/// Runs `f` on the stack addressed by `(agent, svc)`; `f` returns false when the
/// stack lacks the sub-object the event needs.
fn with_stack(
    state: &mut State,
    agent: &str,
    svc: &ServiceKey,
    what: &str,
    f: impl FnOnce(&mut Stack) -> bool,
) {
    let applied = state
        .agents
        .iter_mut()
        .find(|snapshot| snapshot.name == agent)
        .and_then(|snapshot| snapshot.stack_mut(svc))
        .map(f)
        .unwrap_or(false);
    if !applied {
        missing(state, what, agent, Some(svc));
    }
}

fn upsert_pod(state: &mut State, change: &PodChange) {
    with_stack(state, &change.agent, &change.svc, "pod", |stack| {
        let Some(deployment) = stack.deployment.as_mut() else {
            return false;
        };
        let position = deployment
            .pods
            .iter()
            .position(|pod| pod.name == change.pod.name);
        match position {
            Some(index) => deployment.pods[index] = change.pod.clone(),
            None => deployment.pods.push(change.pod.clone()),
        }
        true
    });
}

fn delete_pod(state: &mut State, change: &PodChange) {
    with_stack(state, &change.agent, &change.svc, "pod", |stack| {
        let Some(deployment) = stack.deployment.as_mut() else {
            return false;
        };
        deployment.pods.retain(|pod| pod.name != change.pod.name);
        true
    });
}

fn deployment_created(state: &mut State, change: &DeploymentChange) {
    with_stack(state, &change.agent, &change.svc, "deployment", |stack| {
        stack.deployment = Some(change.deployment.clone());
        true
    });
}

fn deployment_updated(state: &mut State, change: &DeploymentPatchChange) {
    with_stack(state, &change.agent, &change.svc, "deployment", |stack| {
        let Some(deployment) = stack.deployment.as_mut() else {
            return false;
        };
        deployment.apply(&change.deployment);
        true
    });
}

fn deployment_deleted(state: &mut State, removal: &DeploymentRemoval) {
    with_stack(state, &removal.agent, &removal.svc, "deployment", |stack| {
        stack.deployment = None;
        true
    });
}

fn same_ingress(a: &Ingress, b: &Ingress) -> bool {
    a.namespace == b.namespace && a.name == b.name
}

fn upsert_ingress(state: &mut State, change: &IngressChange) {
    with_stack(state, &change.agent, &change.svc, "ingress", |stack| {
        let ingresses = stack.ingresses.get_or_insert_with(Vec::new);
        let position = ingresses
            .iter()
            .position(|ingress| same_ingress(ingress, &change.ingress));
        match position {
            Some(index) => ingresses[index] = change.ingress.clone(),
            None => ingresses.push(change.ingress.clone()),
        }
        true
    });
}

fn delete_ingress(state: &mut State, change: &IngressChange) {
    with_stack(state, &change.agent, &change.svc, "ingress", |stack| {
        if let Some(ingresses) = stack.ingresses.as_mut() {
            ingresses.retain(|ingress| !same_ingress(ingress, &change.ingress));
        }
        true
    });
}

fn alert_resolved(state: &mut State, resolved: &Alert) {
    let mut patched = 0usize;
    if let Some(alerts) = state.alerts.get_mut(&resolved.deployment_name) {
        for alert in alerts
            .iter_mut()
            .filter(|alert| alert.object_name == resolved.object_name)
        {
            alert.status = resolved.status.clone();
            alert.resolved_at = resolved.resolved_at;
            patched += 1;
        }
    }
    if patched == 0 {
        missing(state, "alert", &resolved.deployment_name, None);
    }
}

/// Patch in place or prepend, then fan the new status out to every rollout
/// record pointing at the same gitops commit. The fan-out walks all rollout
/// history on each event.
fn gitops_commit(state: &mut State, patch: &GitopsCommitPatch) {
    let position = state
        .gitops_commits
        .iter()
        .position(|existing| existing.sha == patch.sha);
    match position {
        Some(index) => state.gitops_commits[index].apply(patch),
        None => state.gitops_commits.insert(0, GitopsCommit::from(patch)),
    }

    let mut patched = 0usize;
    for record in state
        .rollout_history
        .values_mut()
        .flatten()
        .filter(|record| record.gitops_ref == patch.sha)
    {
        record.apply_gitops(patch);
        patched += 1;
    }
    trace!(sha = %patch.sha, patched, "gitops commit fanned out to rollout history");
}

fn commit_status_updated(state: &mut State, update: &CommitStatusUpdate) {
    let repo = format!("{}/{}", update.owner, update.repo);
    let commit = state
        .commits
        .get_mut(&repo)
        .and_then(|commits| commits.iter_mut().find(|commit| commit.sha == update.sha));
    match commit {
        Some(commit) => commit.status = Some(update.commit_status.clone()),
        None => missing(state, "commit", &repo, None),
    }
}

fn image_build_log(state: &mut State, line: &ImageBuildLogLine) {
    let log = state
        .image_build_logs
        .entry(line.build_id.clone())
        .or_default();
    log.status = line.status.clone();
    if !line.log_line.is_empty() {
        log.lines.push(line.log_line.clone());
    }
}

fn flux_state_updated(state: &mut State, update: &FluxStateUpdate) {
    let agent = state
        .agents
        .iter_mut()
        .find(|agent| agent.name == update.env_name);
    match agent {
        Some(agent) => agent.flux_state = Some(update.flux_state.clone()),
        None => missing(state, "env", &update.env_name, None),
    }
}

fn flux_events_updated(state: &mut State, update: &FluxEventsUpdate) {
    let agent = state
        .agents
        .iter_mut()
        .find(|agent| agent.name == update.env_name);
    match agent {
        Some(agent) => agent.flux_events = Some(update.flux_events.clone()),
        None => missing(state, "env", &update.env_name, None),
    }
}

fn start_deploy(state: &mut State, intent: &DeployIntent) {
    state.deploy_generation += 1;
    state.deploy = Some(DeployTracking {
        generation: state.deploy_generation,
        tracking_id: None,
        env: intent.env.clone(),
        app: intent.app.clone(),
        sha: intent.sha.clone(),
        artifact_id: intent.artifact_id.clone(),
        rollback: intent.rollback,
        phase: DeployPhase::Submitted,
        status: None,
        status_desc: None,
        results: Vec::new(),
    });
}

fn rollout_history_loaded(
    state: &mut State,
    key: &RolloutKey,
    records: &[RolloutRecord],
    generation: Option<u64>,
) {
    if let Some(generation) = generation.filter(|g| !state.is_current_deploy(*g)) {
        state.stats.stale_deploy_updates += 1;
        debug!(
            generation,
            current = state.deploy_generation,
            key = %key,
            "dropping rollout history from superseded deploy workflow"
        );
        return;
    }
    state.rollout_history.insert(key.clone(), records.to_vec());
}

fn progress_deploy(state: &mut State, progress: &DeployProgress) {
    let Some(deploy) = state
        .deploy
        .as_mut()
        .filter(|deploy| deploy.generation == progress.generation)
    else {
        state.stats.stale_deploy_updates += 1;
        debug!(
            generation = progress.generation,
            current = state.deploy_generation,
            "dropping progress from superseded deploy workflow"
        );
        return;
    };

    deploy.phase = progress.phase;
    if let Some(tracking_id) = &progress.tracking_id {
        deploy.tracking_id = Some(tracking_id.clone());
    }
    if progress.status.is_some() {
        deploy.status = progress.status;
    }
    if progress.status_desc.is_some() {
        deploy.status_desc = progress.status_desc.clone();
    }
    if let Some(results) = &progress.results {
        deploy.results = results.clone();
    }
}

#[cfg(test)]
#[path = "tests/reducer_tests.rs"]
mod tests;
