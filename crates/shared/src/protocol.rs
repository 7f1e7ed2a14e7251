use serde::{Deserialize, Serialize};

use crate::{
    domain::{
        AgentSnapshot, Alert, ArtifactId, CommitEvent, Deployment, DeploymentPatch,
        GitopsCommitPatch, Ingress, Pod, ServiceKey, TrackingId,
    },
    error::DecodeError,
};

/// Gitops status reported for a release whose manifest write has not been observed yet.
pub const GITOPS_STATUS_NOT_AVAILABLE: &str = "N/A";

/// Response `type` marking a deploy that starts with an image build.
pub const DEPLOY_TYPE_IMAGE_BUILD: &str = "imageBuild";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPresence {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvsSync {
    #[serde(default)]
    pub envs: Vec<AgentSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodChange {
    pub agent: String,
    pub svc: ServiceKey,
    pub pod: Pod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentChange {
    pub agent: String,
    pub svc: ServiceKey,
    pub deployment: Deployment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentPatchChange {
    pub agent: String,
    pub svc: ServiceKey,
    pub deployment: DeploymentPatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRemoval {
    pub agent: String,
    pub svc: ServiceKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngressChange {
    pub agent: String,
    pub svc: ServiceKey,
    pub ingress: Ingress,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitStatusUpdate {
    pub owner: String,
    pub repo: String,
    pub sha: String,
    #[serde(default)]
    pub commit_status: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageBuildLogLine {
    pub build_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub log_line: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FluxStateUpdate {
    pub env_name: String,
    #[serde(default)]
    pub flux_state: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FluxEventsUpdate {
    pub env_name: String,
    #[serde(default)]
    pub flux_events: serde_json::Value,
}

/// Envelope pushed over the event stream, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum StreamEvent {
    AgentConnected(AgentPresence),
    AgentDisconnected(AgentPresence),
    EnvsUpdated(EnvsSync),
    PodCreated(PodChange),
    PodUpdated(PodChange),
    PodDeleted(PodChange),
    DeploymentCreated(DeploymentChange),
    DeploymentUpdated(DeploymentPatchChange),
    DeploymentDeleted(DeploymentRemoval),
    IngressCreated(IngressChange),
    IngressUpdated(IngressChange),
    IngressDeleted(IngressChange),
    AlertPending(Alert),
    AlertFired(Alert),
    AlertResolved(Alert),
    GitopsCommit(GitopsCommitPatch),
    CommitStatusUpdated(CommitStatusUpdate),
    ImageBuildLogEvent(ImageBuildLogLine),
    CommitEvent(CommitEvent),
    FluxStateUpdated(FluxStateUpdate),
    FluxEventsUpdated(FluxEventsUpdate),
    #[serde(other)]
    Unknown,
}

/// A decoded stream line together with the discriminator it arrived with.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub name: String,
    pub event: StreamEvent,
}

pub fn decode_line(line: &str) -> Result<Envelope, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(line).map_err(DecodeError::Json)?;
    let name = value
        .get("event")
        .and_then(serde_json::Value::as_str)
        .ok_or(DecodeError::MissingDiscriminator)?
        .to_string();
    let event = serde_json::from_value(value).map_err(|source| DecodeError::Payload {
        name: name.clone(),
        source,
    })?;
    Ok(Envelope { name, event })
}

/// Splits one transport message into its non-empty lines, preserving order.
pub fn split_message(text: &str) -> impl Iterator<Item = &str> {
    text.lines().map(str::trim).filter(|line| !line.is_empty())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployCommand {
    pub env: String,
    pub app: String,
    pub artifact_id: ArtifactId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployAccepted {
    pub id: TrackingId,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl DeployAccepted {
    pub fn starts_with_image_build(&self) -> bool {
        self.kind.as_deref() == Some(DEPLOY_TYPE_IMAGE_BUILD)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackAccepted {
    pub id: TrackingId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployStatus {
    New,
    Success,
    Processed,
    Error,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_desc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gitops_commit_status: Option<String>,
    #[serde(
        default,
        rename = "triggeredDeployRequestID",
        skip_serializing_if = "Option::is_none"
    )]
    pub triggered_deploy_request_id: Option<TrackingId>,
}

impl DeployResult {
    pub fn awaits_gitops_write(&self) -> bool {
        self.gitops_commit_status.as_deref() == Some(GITOPS_STATUS_NOT_AVAILABLE)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployStatusReport {
    pub status: DeployStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_desc: Option<String>,
    #[serde(default)]
    pub results: Vec<DeployResult>,
}
