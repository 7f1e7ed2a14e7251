use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{ArtifactId, RolloutRecord, TrackingId},
    error::CommandRejected,
    protocol::{DeployAccepted, DeployCommand, DeployStatusReport, RollbackAccepted},
};
use tracing::debug;

/// Remote commands and status queries the deploy tracker drives.
#[async_trait]
pub trait DeployApi: Send + Sync {
    async fn deploy(&self, artifact_id: &ArtifactId, env: &str, app: &str)
        -> Result<DeployAccepted>;
    async fn rollback(&self, env: &str, app: &str, sha: &str) -> Result<RollbackAccepted>;
    async fn deploy_status(&self, tracking_id: &TrackingId) -> Result<DeployStatusReport>;
    async fn rollout_history_per_app(
        &self,
        owner: &str,
        repo: &str,
        env: &str,
        app: &str,
    ) -> Result<Vec<RolloutRecord>>;
}

pub struct HttpDeployApi {
    http: Client,
    server_url: String,
    api_token: Option<String>,
}

impl HttpDeployApi {
    pub fn new(server_url: impl Into<String>, api_token: Option<String>) -> Self {
        Self {
            http: Client::new(),
            server_url: server_url.into().trim_end_matches('/').to_string(),
            api_token,
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn read_json<T: DeserializeOwned>(response: Response, what: &str) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CommandRejected::new(status.as_u16(), message.trim()).into());
        }
        response
            .json()
            .await
            .with_context(|| format!("invalid {what} response body"))
    }
}

#[async_trait]
impl DeployApi for HttpDeployApi {
    async fn deploy(
        &self,
        artifact_id: &ArtifactId,
        env: &str,
        app: &str,
    ) -> Result<DeployAccepted> {
        debug!(artifact_id = %artifact_id, env, app, "submitting deploy");
        let request = self
            .http
            .post(format!("{}/api/releases", self.server_url))
            .json(&DeployCommand {
                env: env.to_string(),
                app: app.to_string(),
                artifact_id: artifact_id.clone(),
            });
        let response = self
            .authorized(request)
            .send()
            .await
            .context("failed to send deploy request")?;
        Self::read_json(response, "deploy").await
    }

    async fn rollback(&self, env: &str, app: &str, sha: &str) -> Result<RollbackAccepted> {
        debug!(env, app, sha, "submitting rollback");
        let request = self
            .http
            .post(format!("{}/api/rollback", self.server_url))
            .query(&[("env", env), ("app", app), ("sha", sha)]);
        let response = self
            .authorized(request)
            .send()
            .await
            .context("failed to send rollback request")?;
        Self::read_json(response, "rollback").await
    }

    async fn deploy_status(&self, tracking_id: &TrackingId) -> Result<DeployStatusReport> {
        let request = self
            .http
            .get(format!("{}/api/eventReleaseTrack", self.server_url))
            .query(&[("id", tracking_id.as_str())]);
        let response = self
            .authorized(request)
            .send()
            .await
            .with_context(|| format!("failed to poll deploy status for {tracking_id}"))?;
        Self::read_json(response, "deploy status").await
    }

    async fn rollout_history_per_app(
        &self,
        owner: &str,
        repo: &str,
        env: &str,
        app: &str,
    ) -> Result<Vec<RolloutRecord>> {
        let request = self.http.get(format!(
            "{}/api/repo/{owner}/{repo}/env/{env}/app/{app}/rolloutHistory",
            self.server_url
        ));
        let response = self
            .authorized(request)
            .send()
            .await
            .with_context(|| format!("failed to fetch rollout history for {owner}/{repo} {env}/{app}"))?;
        Self::read_json(response, "rollout history").await
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
