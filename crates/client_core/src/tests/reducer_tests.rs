use super::*;
use chrono::TimeZone;
use shared::{
    domain::{
        CommitEvent, Deployment, DeploymentPatch, Pod, PullRequest, RolloutKey, RolloutRecord,
        Service, TrackingId,
    },
    protocol::{decode_line, DeployStatus, EnvsSync},
};

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0)
        .single()
        .expect("timestamp")
}

fn fold(state: State, events: impl IntoIterator<Item = StreamEvent>) -> State {
    events.into_iter().fold(state, |state, event| {
        reduce(&state, &Action::Stream(event), at(0))
    })
}

fn wire(line: &str) -> StreamEvent {
    decode_line(line).expect("decode").event
}

fn connected(name: &str) -> StreamEvent {
    StreamEvent::AgentConnected(AgentPresence {
        name: name.to_string(),
    })
}

fn disconnected(name: &str) -> StreamEvent {
    StreamEvent::AgentDisconnected(AgentPresence {
        name: name.to_string(),
    })
}

fn stack(namespace: &str, name: &str) -> Stack {
    Stack {
        service: Service {
            namespace: namespace.to_string(),
            name: name.to_string(),
        },
        ..Stack::default()
    }
}

fn env_with_stack(name: &str) -> AgentSnapshot {
    AgentSnapshot {
        name: name.to_string(),
        stacks: vec![stack("default", "web")],
        ..AgentSnapshot::default()
    }
}

fn pod(name: &str, status: &str) -> Pod {
    Pod {
        namespace: "default".to_string(),
        name: name.to_string(),
        status: status.to_string(),
        status_description: None,
    }
}

fn web_svc() -> ServiceKey {
    ServiceKey::new("default", "web")
}

fn deployment_created(agent: &str) -> StreamEvent {
    StreamEvent::DeploymentCreated(DeploymentChange {
        agent: agent.to_string(),
        svc: web_svc(),
        deployment: Deployment {
            namespace: "default".to_string(),
            name: "web".to_string(),
            sha: "aaa".to_string(),
            branch: "main".to_string(),
            ..Deployment::default()
        },
    })
}

fn pod_event(agent: &str, pod: Pod) -> PodChange {
    PodChange {
        agent: agent.to_string(),
        svc: web_svc(),
        pod,
    }
}

fn gitops(sha: &str, status: &str) -> StreamEvent {
    StreamEvent::GitopsCommit(GitopsCommitPatch {
        sha: sha.to_string(),
        status: Some(status.to_string()),
        status_desc: Some(format!("{status} desc")),
        created: Some(42),
        env: Some("prod".to_string()),
    })
}

fn rollout(gitops_ref: &str) -> RolloutRecord {
    RolloutRecord {
        gitops_ref: gitops_ref.to_string(),
        gitops_commit_status: "Pending".to_string(),
        ..RolloutRecord::default()
    }
}

fn names(state: &State) -> Vec<&str> {
    state.agents.iter().map(|agent| agent.name.as_str()).collect()
}

#[test]
fn agent_set_holds_one_entry_per_name_reflecting_latest_event() {
    let state = fold(
        State::default(),
        [
            connected("prod"),
            connected("staging"),
            connected("prod"),
            disconnected("staging"),
            disconnected("unknown"),
            connected("dev"),
            disconnected("prod"),
            connected("prod"),
        ],
    );

    assert_eq!(names(&state), vec!["dev", "prod"]);
}

#[test]
fn reconnecting_agent_overwrites_previous_snapshot() {
    let state = fold(
        State::default(),
        [StreamEvent::EnvsUpdated(EnvsSync {
            envs: vec![env_with_stack("prod")],
        })],
    );
    assert_eq!(state.agent("prod").expect("prod").stacks.len(), 1);

    let state = fold(state, [connected("prod")]);

    assert_eq!(state.agents.len(), 1);
    assert!(state.agent("prod").expect("prod").stacks.is_empty());
}

#[test]
fn envs_updated_replaces_agents_but_carries_pull_requests_over() {
    let mut prod = env_with_stack("prod");
    prod.pull_requests = Some(vec![PullRequest {
        number: 7,
        title: "bump".to_string(),
        ..PullRequest::default()
    }]);
    let state = fold(
        State::default(),
        [StreamEvent::EnvsUpdated(EnvsSync {
            envs: vec![prod, env_with_stack("staging")],
        })],
    );

    let mut staging = env_with_stack("staging");
    staging.pull_requests = Some(Vec::new());
    let refreshed = AgentSnapshot {
        name: "prod".to_string(),
        stacks: vec![stack("default", "api")],
        ..AgentSnapshot::default()
    };
    let state = fold(
        state,
        [StreamEvent::EnvsUpdated(EnvsSync {
            envs: vec![refreshed, staging],
        })],
    );

    let prod = state.agent("prod").expect("prod");
    assert_eq!(prod.stacks[0].service.name, "api");
    assert_eq!(prod.pull_requests.as_ref().expect("carried")[0].number, 7);
    assert_eq!(
        state.agent("staging").expect("staging").pull_requests,
        Some(Vec::new())
    );
}

#[test]
fn envs_updated_drops_agents_missing_from_payload() {
    let state = fold(State::default(), [connected("prod"), connected("dev")]);

    let state = fold(
        state,
        [wire(r#"{"event":"envsUpdated","envs":[{"name":"dev"}]}"#)],
    );

    assert_eq!(names(&state), vec!["dev"]);
}

#[test]
fn deployment_and_pod_lifecycle_patches_stack() {
    let state = fold(
        State::default(),
        [
            StreamEvent::EnvsUpdated(EnvsSync {
                envs: vec![env_with_stack("prod")],
            }),
            deployment_created("prod"),
            StreamEvent::PodCreated(pod_event("prod", pod("web-1", "Pending"))),
            StreamEvent::PodCreated(pod_event("prod", pod("web-2", "Running"))),
            StreamEvent::PodUpdated(pod_event("prod", pod("web-1", "Running"))),
            StreamEvent::PodDeleted(pod_event("prod", pod("web-2", ""))),
            StreamEvent::DeploymentUpdated(DeploymentPatchChange {
                agent: "prod".to_string(),
                svc: web_svc(),
                deployment: DeploymentPatch {
                    sha: Some("bbb".to_string()),
                    ..DeploymentPatch::default()
                },
            }),
        ],
    );

    let deployment = state
        .stack("prod", &web_svc())
        .and_then(|stack| stack.deployment.as_ref())
        .expect("deployment");
    assert_eq!(deployment.sha, "bbb");
    assert_eq!(deployment.branch, "main", "unpatched fields survive");
    assert_eq!(deployment.pods, vec![pod("web-1", "Running")]);
    assert_eq!(state.stats.missing_entity, 0);

    let state = fold(
        state,
        [StreamEvent::DeploymentDeleted(DeploymentRemoval {
            agent: "prod".to_string(),
            svc: web_svc(),
        })],
    );
    assert!(state
        .stack("prod", &web_svc())
        .expect("stack")
        .deployment
        .is_none());
}

#[test]
fn pod_event_for_unknown_stack_is_a_counted_no_op() {
    let before = fold(State::default(), [connected("prod")]);

    let after = fold(
        before.clone(),
        [StreamEvent::PodCreated(pod_event("prod", pod("web-1", "Running")))],
    );

    assert_eq!(after.agents, before.agents);
    assert_eq!(after.stats.missing_entity, 1);
}

#[test]
fn deployment_update_before_creation_is_a_counted_no_op() {
    let state = fold(
        State::default(),
        [
            StreamEvent::EnvsUpdated(EnvsSync {
                envs: vec![env_with_stack("prod")],
            }),
            StreamEvent::DeploymentUpdated(DeploymentPatchChange {
                agent: "prod".to_string(),
                svc: web_svc(),
                deployment: DeploymentPatch::default(),
            }),
            StreamEvent::PodUpdated(pod_event("prod", pod("web-1", "Running"))),
        ],
    );

    assert!(state.stack("prod", &web_svc()).expect("stack").deployment.is_none());
    assert_eq!(state.stats.missing_entity, 2);
}

#[test]
fn ingress_events_upsert_and_remove_by_name() {
    let ingress = |url: &str| IngressChange {
        agent: "prod".to_string(),
        svc: web_svc(),
        ingress: Ingress {
            namespace: "default".to_string(),
            name: "web".to_string(),
            url: url.to_string(),
        },
    };
    let state = fold(
        State::default(),
        [
            StreamEvent::EnvsUpdated(EnvsSync {
                envs: vec![env_with_stack("prod")],
            }),
            StreamEvent::IngressCreated(ingress("a.example.com")),
            StreamEvent::IngressUpdated(ingress("b.example.com")),
        ],
    );
    let ingresses = state
        .stack("prod", &web_svc())
        .and_then(|stack| stack.ingresses.clone())
        .expect("ingresses");
    assert_eq!(ingresses.len(), 1);
    assert_eq!(ingresses[0].url, "b.example.com");

    let state = fold(state, [StreamEvent::IngressDeleted(ingress(""))]);
    assert_eq!(
        state.stack("prod", &web_svc()).expect("stack").ingresses,
        Some(Vec::new())
    );
}

#[test]
fn gitops_commit_is_idempotent() {
    let once = fold(State::default(), [gitops("H", "Succeeded")]);
    let twice = fold(once.clone(), [gitops("H", "Succeeded")]);

    assert_eq!(twice.gitops_commits, once.gitops_commits);
    assert_eq!(twice.gitops_commits.len(), 1);
}

#[test]
fn known_gitops_commit_is_patched_in_place_and_unknown_is_prepended() {
    let state = fold(
        State::default(),
        [gitops("a", "Pending"), gitops("b", "Pending"), gitops("c", "Pending")],
    );
    let order = |state: &State| -> Vec<String> {
        state.gitops_commits.iter().map(|c| c.sha.clone()).collect()
    };
    assert_eq!(order(&state), vec!["c", "b", "a"]);

    let state = fold(state, [gitops("b", "ReconciliationSucceeded")]);
    assert_eq!(order(&state), vec!["c", "b", "a"]);
    assert_eq!(state.gitops_commits[1].status, "ReconciliationSucceeded");

    let state = fold(state, [gitops("d", "Pending")]);
    assert_eq!(order(&state)[0], "d");
}

#[test]
fn gitops_commit_fans_out_to_every_matching_rollout_record() {
    let mut state = State::default();
    state.rollout_history.insert(
        RolloutKey::new("acme/web", "prod", "web"),
        vec![rollout("H"), rollout("G")],
    );
    state.rollout_history.insert(
        RolloutKey::new("acme/api", "staging", "api"),
        vec![rollout("X"), rollout("H")],
    );

    let state = fold(state, [gitops("H", "Succeeded")]);

    let all: Vec<_> = state.rollout_history.values().flatten().collect();
    for record in &all {
        if record.gitops_ref == "H" {
            assert_eq!(record.gitops_commit_status, "Succeeded");
            assert_eq!(record.gitops_commit_status_desc, "Succeeded desc");
            assert_eq!(record.gitops_commit_created, 42);
        } else {
            assert_eq!(record.gitops_commit_status, "Pending");
        }
    }
    assert_eq!(
        all.iter().filter(|r| r.gitops_ref == "H").count(),
        2,
        "both lists patched"
    );
}

#[test]
fn alerts_append_and_resolve_by_object_name() {
    let state = fold(
        State::default(),
        [
            wire(r#"{"event":"alertPending","objectName":"web-1","deploymentName":"default/web","type":"crashLoop","status":"Pending","pendingAt":1}"#),
            wire(r#"{"event":"alertFired","objectName":"web-1","deploymentName":"default/web","type":"crashLoop","status":"Firing","firedAt":2}"#),
            wire(r#"{"event":"alertPending","objectName":"web-2","deploymentName":"default/web","status":"Pending"}"#),
            wire(r#"{"event":"alertResolved","objectName":"web-1","deploymentName":"default/web","status":"Resolved","resolvedAt":9}"#),
        ],
    );

    let alerts = state.alerts_for("default/web");
    assert_eq!(alerts.len(), 3);
    assert!(alerts
        .iter()
        .filter(|a| a.object_name == "web-1")
        .all(|a| a.status == "Resolved" && a.resolved_at == 9));
    assert_eq!(alerts[2].status, "Pending");
}

#[test]
fn resolving_unknown_alert_is_counted() {
    let state = fold(
        State::default(),
        [wire(r#"{"event":"alertResolved","objectName":"x","deploymentName":"default/web"}"#)],
    );
    assert!(state.alerts_for("default/web").is_empty());
    assert_eq!(state.stats.missing_entity, 1);
}

#[test]
fn commit_event_window_evicts_using_dispatch_time() {
    let event = |id: &str, sha: &str| {
        Action::Stream(StreamEvent::CommitEvent(CommitEvent {
            id: id.to_string(),
            sha: sha.to_string(),
            ..CommitEvent::default()
        }))
    };
    let state = reduce(&State::default(), &event("1", "a"), at(0));
    assert!(state.commit_events.contains("a"));

    let state = reduce(&state, &event("2", "b"), at(3700));

    assert!(!state.commit_events.contains("a"));
    assert!(state.commit_events.contains("b"));
}

#[test]
fn commit_status_update_patches_loaded_commit_only() {
    let state = reduce(
        &State::default(),
        &Action::CommitsLoaded {
            repo: "acme/web".to_string(),
            commits: vec![shared::domain::Commit {
                sha: "abc".to_string(),
                ..Default::default()
            }],
        },
        at(0),
    );

    let state = fold(
        state,
        [
            wire(r#"{"event":"commitStatusUpdated","owner":"acme","repo":"web","sha":"abc","commitStatus":{"state":"success"}}"#),
            wire(r#"{"event":"commitStatusUpdated","owner":"acme","repo":"web","sha":"zzz","commitStatus":{}}"#),
        ],
    );

    let commit = &state.commits["acme/web"][0];
    assert_eq!(
        commit.status,
        Some(serde_json::json!({ "state": "success" }))
    );
    assert_eq!(state.commits["acme/web"].len(), 1);
    assert_eq!(state.stats.missing_entity, 1);
}

#[test]
fn image_build_log_lines_accumulate_per_build() {
    let state = fold(
        State::default(),
        [
            wire(r#"{"event":"imageBuildLogEvent","buildId":"b1","status":"running","logLine":"step 1"}"#),
            wire(r#"{"event":"imageBuildLogEvent","buildId":"b1","status":"running","logLine":"step 2"}"#),
            wire(r#"{"event":"imageBuildLogEvent","buildId":"b1","status":"success","logLine":""}"#),
        ],
    );

    let log = &state.image_build_logs["b1"];
    assert_eq!(log.status, "success");
    assert_eq!(log.lines, vec!["step 1", "step 2"]);
}

#[test]
fn flux_updates_patch_named_env() {
    let state = fold(
        State::default(),
        [
            connected("prod"),
            wire(r#"{"event":"fluxStateUpdated","envName":"prod","fluxState":{"kustomizations":[]}}"#),
            wire(r#"{"event":"fluxEventsUpdated","envName":"prod","fluxEvents":[{"reason":"ok"}]}"#),
            wire(r#"{"event":"fluxStateUpdated","envName":"gone","fluxState":{}}"#),
        ],
    );

    let prod = state.agent("prod").expect("prod");
    assert_eq!(
        prod.flux_state,
        Some(serde_json::json!({ "kustomizations": [] }))
    );
    assert!(prod.flux_events.is_some());
    assert_eq!(state.stats.missing_entity, 1);
}

#[test]
fn unknown_event_leaves_state_unchanged_except_counter() {
    let before = fold(State::default(), [connected("prod"), gitops("a", "Pending")]);

    let after = fold(before.clone(), [wire(r#"{"event":"somethingNew","x":1}"#)]);

    assert_eq!(after.agents, before.agents);
    assert_eq!(after.gitops_commits, before.gitops_commits);
    assert_eq!(after.stats.unknown_events, 1);
}

#[test]
fn reduce_is_pure() {
    let state = fold(State::default(), [connected("prod")]);
    let action = Action::Stream(gitops("H", "Succeeded"));

    let first = reduce(&state, &action, at(5));
    let second = reduce(&state, &action, at(5));

    assert_eq!(first, second);
    assert!(state.gitops_commits.is_empty(), "input is not mutated");
}

#[test]
fn deploy_progress_from_superseded_generation_is_dropped() {
    let intent = DeployIntent {
        env: "prod".to_string(),
        app: "web".to_string(),
        sha: None,
        artifact_id: None,
        rollback: false,
    };
    let state = reduce(
        &State::default(),
        &Action::DeployRequested(intent.clone()),
        at(0),
    );
    assert_eq!(state.deploy.as_ref().expect("deploy").generation, 1);
    let state = reduce(&state, &Action::DeployRequested(intent), at(0));

    let stale = DeployProgress {
        tracking_id: Some(TrackingId::from("old")),
        status: Some(DeployStatus::Error),
        ..DeployProgress::phase(1, DeployPhase::Failed)
    };
    let state = reduce(&state, &Action::DeployProgressed(stale), at(0));

    let deploy = state.deploy.as_ref().expect("deploy");
    assert_eq!(deploy.generation, 2);
    assert_eq!(deploy.phase, DeployPhase::Submitted);
    assert_eq!(deploy.tracking_id, None);
    assert_eq!(state.stats.stale_deploy_updates, 1);
}

#[test]
fn deploy_progress_keeps_results_when_not_supplied() {
    let intent = DeployIntent {
        env: "prod".to_string(),
        app: "web".to_string(),
        sha: Some("abc".to_string()),
        artifact_id: None,
        rollback: true,
    };
    let state = reduce(&State::default(), &Action::DeployRequested(intent), at(0));
    let with_results = DeployProgress {
        results: Some(vec![shared::protocol::DeployResult {
            app: Some("web".to_string()),
            env: Some("prod".to_string()),
            status: None,
            status_desc: None,
            hash: Some("abc".to_string()),
            gitops_commit_status: None,
            triggered_deploy_request_id: None,
        }]),
        ..DeployProgress::phase(1, DeployPhase::Releasing)
    };
    let state = reduce(&state, &Action::DeployProgressed(with_results), at(0));
    let state = reduce(
        &state,
        &Action::DeployProgressed(DeployProgress::phase(1, DeployPhase::Succeeded)),
        at(0),
    );

    let deploy = state.deploy.as_ref().expect("deploy");
    assert_eq!(deploy.phase, DeployPhase::Succeeded);
    assert!(deploy.rollback);
    assert_eq!(deploy.results.len(), 1);
}

#[test]
fn rollout_history_load_replaces_list() {
    let key = RolloutKey::new("acme/web", "prod", "web");
    let mut state = State::default();
    state
        .rollout_history
        .insert(key.clone(), vec![rollout("a"), rollout("b")]);

    let state = reduce(
        &state,
        &Action::RolloutHistoryLoaded {
            key: key.clone(),
            records: vec![rollout("c")],
            generation: None,
        },
        at(0),
    );

    assert_eq!(state.rollouts(&key).len(), 1);
    assert_eq!(state.rollouts(&key)[0].gitops_ref, "c");
}

#[test]
fn partial_gitops_commit_keeps_fields_it_does_not_carry() {
    let key = RolloutKey::new("acme/web", "prod", "web");
    let mut state = State::default();
    state.rollout_history.insert(key.clone(), vec![rollout("a")]);
    let state = fold(
        state,
        [wire(
            r#"{"event":"gitopsCommit","sha":"a","status":"Pending","statusDesc":"waiting","created":5,"env":"prod"}"#,
        )],
    );

    let state = fold(
        state,
        [wire(r#"{"event":"gitopsCommit","sha":"a","status":"Succeeded"}"#)],
    );

    assert_eq!(
        state.gitops_commit("a"),
        Some(&GitopsCommit {
            sha: "a".to_string(),
            status: "Succeeded".to_string(),
            status_desc: "waiting".to_string(),
            created: 5,
            env: "prod".to_string(),
        })
    );
    let record = &state.rollouts(&key)[0];
    assert_eq!(record.gitops_commit_status, "Succeeded");
    assert_eq!(record.gitops_commit_status_desc, "waiting");
    assert_eq!(record.gitops_commit_created, 5);
}

#[test]
fn rollout_history_from_superseded_workflow_is_dropped() {
    let key = RolloutKey::new("acme/web", "prod", "web");
    let intent = DeployIntent {
        env: "prod".to_string(),
        app: "web".to_string(),
        sha: None,
        artifact_id: None,
        rollback: false,
    };
    let state = reduce(&State::default(), &Action::DeployRequested(intent.clone()), at(0));
    let state = reduce(&state, &Action::DeployRequested(intent), at(0));
    let state = reduce(
        &state,
        &Action::RolloutHistoryLoaded {
            key: key.clone(),
            records: vec![rollout("fresh")],
            generation: Some(2),
        },
        at(0),
    );

    let state = reduce(
        &state,
        &Action::RolloutHistoryLoaded {
            key: key.clone(),
            records: vec![rollout("stale")],
            generation: Some(1),
        },
        at(0),
    );

    assert_eq!(state.rollouts(&key)[0].gitops_ref, "fresh");
    assert_eq!(state.stats.stale_deploy_updates, 1);
}
