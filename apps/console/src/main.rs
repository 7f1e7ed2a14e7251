use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    load_settings, DashboardClient, DeployPhase, DeployRequest, RollbackRequest, State,
    TrackingOutcome,
};
use shared::domain::ArtifactId;
use tokio::{sync::watch, task::JoinHandle, time::interval};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    /// Overrides `server_url` from client.toml and the environment.
    #[arg(long)]
    server_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow the event stream and log a state summary periodically.
    Watch {
        #[arg(long, default_value_t = 10)]
        summary_secs: u64,
    },
    /// Deploy an artifact and follow it until the gitops write is observed.
    Deploy {
        owner: String,
        repo: String,
        env: String,
        app: String,
        artifact_id: String,
    },
    /// Roll an app back to a previous sha and follow the release.
    Rollback {
        owner: String,
        repo: String,
        env: String,
        app: String,
        sha: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }
    info!(server_url = %settings.server_url, "loaded settings");
    let client = DashboardClient::new(settings);

    match args.command {
        Command::Watch { summary_secs } => watch_events(&client, summary_secs).await,
        Command::Deploy {
            owner,
            repo,
            env,
            app,
            artifact_id,
        } => {
            let progress = log_deploy_progress(client.store().subscribe());
            let outcome = client
                .tracker()
                .deploy(DeployRequest {
                    owner,
                    repo,
                    env,
                    app,
                    artifact_id: ArtifactId::from(artifact_id),
                })
                .await;
            progress.abort();
            report(outcome.context("deploy failed")?);
            Ok(())
        }
        Command::Rollback {
            owner,
            repo,
            env,
            app,
            sha,
        } => {
            let progress = log_deploy_progress(client.store().subscribe());
            let outcome = client
                .tracker()
                .rollback(RollbackRequest {
                    owner,
                    repo,
                    env,
                    app,
                    sha,
                })
                .await;
            progress.abort();
            report(outcome.context("rollback failed")?);
            Ok(())
        }
    }
}

async fn watch_events(client: &DashboardClient, summary_secs: u64) -> Result<()> {
    let events = client.start_events()?;
    let mut ticker = interval(Duration::from_secs(summary_secs.max(1)));

    loop {
        tokio::select! {
            _ = ticker.tick() => log_summary(&client.store().state()),
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for ctrl-c")?;
                info!("shutting down");
                break;
            }
        }
    }

    events.abort();
    Ok(())
}

fn log_summary(state: &State) {
    let stacks: usize = state.agents.iter().map(|agent| agent.stacks.len()).sum();
    let pods: usize = state
        .agents
        .iter()
        .flat_map(|agent| agent.stacks.iter())
        .filter_map(|stack| stack.deployment.as_ref())
        .map(|deployment| deployment.pods.len())
        .sum();
    let open_alerts = state
        .alerts
        .values()
        .flatten()
        .filter(|alert| alert.resolved_at == 0)
        .count();
    info!(
        agents = state.agents.len(),
        stacks,
        pods,
        open_alerts,
        gitops_commits = state.gitops_commits.len(),
        tracked_commits = state.commit_events.len(),
        missing_entity = state.stats.missing_entity,
        unknown_events = state.stats.unknown_events,
        "state summary"
    );
}

fn log_deploy_progress(mut updates: watch::Receiver<std::sync::Arc<State>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last: Option<DeployPhase> = None;
        while updates.changed().await.is_ok() {
            let phase = updates
                .borrow_and_update()
                .deploy
                .as_ref()
                .map(|deploy| deploy.phase);
            if phase != last {
                last = phase;
                if let Some(phase) = phase {
                    info!(?phase, "deploy progress");
                    if phase.is_settled() {
                        break;
                    }
                }
            }
        }
    })
}

fn report(outcome: TrackingOutcome) {
    match outcome {
        TrackingOutcome::Succeeded {
            tracking_id,
            results,
        } => {
            for result in &results {
                info!(
                    env = result.env.as_deref().unwrap_or_default(),
                    app = result.app.as_deref().unwrap_or_default(),
                    gitops_commit_status = result.gitops_commit_status.as_deref().unwrap_or_default(),
                    "release written"
                );
            }
            println!("{tracking_id} succeeded ({} results)", results.len());
        }
        TrackingOutcome::Superseded { generation } => {
            warn!(generation, "workflow superseded by a newer one");
        }
    }
}
