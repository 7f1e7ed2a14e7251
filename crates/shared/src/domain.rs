use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

id_newtype!(TrackingId);
id_newtype!(ArtifactId);
id_newtype!(ServiceKey);

impl ServiceKey {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self(format!("{namespace}/{name}"))
    }
}

/// Identity of one rollout history list. `repo` is `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RolloutKey {
    pub repo: String,
    pub env: String,
    pub app: String,
}

impl RolloutKey {
    pub fn new(repo: impl Into<String>, env: impl Into<String>, app: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            env: env.into(),
            app: app.into(),
        }
    }
}

impl fmt::Display for RolloutKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.repo, self.env, self.app)
    }
}

/// Live view of one connected cluster agent, one per environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSnapshot {
    pub name: String,
    #[serde(default)]
    pub stacks: Vec<Stack>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_requests: Option<Vec<PullRequest>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flux_state: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flux_events: Option<serde_json::Value>,
}

impl AgentSnapshot {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn stack_mut(&mut self, key: &ServiceKey) -> Option<&mut Stack> {
        self.stacks.iter_mut().find(|stack| stack.service.key() == *key)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    #[serde(default)]
    pub sha: String,
    #[serde(default)]
    pub number: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub link: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stack {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
    pub service: Service,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<Deployment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingresses: Option<Vec<Ingress>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub namespace: String,
    pub name: String,
}

impl Service {
    pub fn key(&self) -> ServiceKey {
        ServiceKey::new(&self.namespace, &self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub pods: Vec<Pod>,
    #[serde(default)]
    pub sha: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
}

/// Partial deployment carried by `deploymentUpdated`; only present fields overwrite.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pods: Option<Vec<Pod>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
}

impl Deployment {
    pub fn apply(&mut self, patch: &DeploymentPatch) {
        if let Some(pods) = &patch.pods {
            self.pods = pods.clone();
        }
        if let Some(sha) = &patch.sha {
            self.sha = sha.clone();
        }
        if let Some(branch) = &patch.branch {
            self.branch = branch.clone();
        }
        if let Some(message) = &patch.commit_message {
            self.commit_message = Some(message.clone());
        }
        if let Some(author) = &patch.author_name {
            self.author_name = Some(author.clone());
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ingress {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub url: String,
}

/// One release of an app into an environment, as listed by the rollout history endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutRecord {
    #[serde(default)]
    pub app: String,
    #[serde(default)]
    pub env: String,
    #[serde(default)]
    pub gitops_ref: String,
    #[serde(default)]
    pub gitops_commit_status: String,
    #[serde(default)]
    pub gitops_commit_status_desc: String,
    #[serde(default)]
    pub gitops_commit_created: i64,
    #[serde(default)]
    pub rolled_back: bool,
    #[serde(default)]
    pub triggered_by: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitopsCommit {
    pub sha: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub status_desc: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub env: String,
}

/// `gitopsCommit` payload; fields absent on the wire leave the stored commit untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitopsCommitPatch {
    pub sha: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_desc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
}

impl GitopsCommit {
    pub fn apply(&mut self, patch: &GitopsCommitPatch) {
        if let Some(status) = &patch.status {
            self.status = status.clone();
        }
        if let Some(desc) = &patch.status_desc {
            self.status_desc = desc.clone();
        }
        if let Some(created) = patch.created {
            self.created = created;
        }
        if let Some(env) = &patch.env {
            self.env = env.clone();
        }
    }
}

impl From<&GitopsCommitPatch> for GitopsCommit {
    fn from(patch: &GitopsCommitPatch) -> Self {
        let mut commit = Self {
            sha: patch.sha.clone(),
            ..Self::default()
        };
        commit.apply(patch);
        commit
    }
}

impl RolloutRecord {
    /// Copies the gitops reconciliation fields the patch carries.
    pub fn apply_gitops(&mut self, patch: &GitopsCommitPatch) {
        if let Some(status) = &patch.status {
            self.gitops_commit_status = status.clone();
        }
        if let Some(desc) = &patch.status_desc {
            self.gitops_commit_status_desc = desc.clone();
        }
        if let Some(created) = patch.created {
            self.gitops_commit_created = created;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub object_name: String,
    pub deployment_name: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub pending_at: i64,
    #[serde(default)]
    pub fired_at: i64,
    #[serde(default)]
    pub resolved_at: i64,
}

/// A source repository commit as listed on the repository view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub sha: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<serde_json::Value>,
}

/// Build, release or rollback event correlated to a source commit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitEvent {
    pub id: String,
    pub sha: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub status_desc: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<serde_json::Value>,
}
