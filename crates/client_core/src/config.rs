use std::{collections::HashMap, fs, path::Path, time::Duration};

use chrono::TimeDelta;
use tracing::warn;

use crate::{
    commit_window::DEFAULT_COMMIT_EVENT_TTL_SECS,
    tracker::{
        TrackerSettings, IMAGE_BUILD_POLL_INTERVAL, RELEASE_POLL_INTERVAL,
        ROLLOUT_REFRESH_STAGGER,
    },
    transport::DEFAULT_RECONNECT_DELAY,
};

pub const SETTINGS_FILE: &str = "client.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub server_url: String,
    pub api_token: Option<String>,
    pub reconnect_delay_ms: u64,
    pub image_build_poll_ms: u64,
    pub release_poll_ms: u64,
    pub rollout_refresh_stagger_ms: u64,
    pub commit_event_ttl_secs: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:9000".into(),
            api_token: None,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY.as_millis() as u64,
            image_build_poll_ms: IMAGE_BUILD_POLL_INTERVAL.as_millis() as u64,
            release_poll_ms: RELEASE_POLL_INTERVAL.as_millis() as u64,
            rollout_refresh_stagger_ms: ROLLOUT_REFRESH_STAGGER.as_millis() as u64,
            commit_event_ttl_secs: DEFAULT_COMMIT_EVENT_TTL_SECS.unsigned_abs(),
        }
    }
}

impl ClientSettings {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            image_build_poll: Duration::from_millis(self.image_build_poll_ms),
            release_poll: Duration::from_millis(self.release_poll_ms),
            rollout_refresh_stagger: Duration::from_millis(self.rollout_refresh_stagger_ms),
        }
    }

    pub fn commit_event_ttl(&self) -> TimeDelta {
        i64::try_from(self.commit_event_ttl_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or_else(|| TimeDelta::seconds(DEFAULT_COMMIT_EVENT_TTL_SECS))
    }
}

/// Defaults, then `client.toml` in the working directory, then the environment.
pub fn load_settings() -> ClientSettings {
    load_settings_from(Path::new(SETTINGS_FILE), |key| std::env::var(key).ok())
}

pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<HashMap<String, toml::Value>>(&raw) {
            Ok(file_cfg) => {
                let get = |key: &str| file_cfg.get(key).map(scalar);
                apply(&mut settings, get);
            }
            Err(err) => warn!(path = %path.display(), error = %err, "ignoring unreadable settings file"),
        }
    }

    if let Some(v) = env("SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = env("API_TOKEN") {
        settings.api_token = Some(v);
    }
    apply(&mut settings, |key| env(&format!("APP__{}", key.to_uppercase())));

    settings
}

fn scalar(value: &toml::Value) -> String {
    match value {
        toml::Value::String(v) => v.clone(),
        other => other.to_string(),
    }
}

fn apply(settings: &mut ClientSettings, get: impl Fn(&str) -> Option<String>) {
    if let Some(v) = get("server_url") {
        settings.server_url = v;
    }
    if let Some(v) = get("api_token") {
        settings.api_token = Some(v);
    }
    parse_into(&get, "reconnect_delay_ms", &mut settings.reconnect_delay_ms);
    parse_into(&get, "image_build_poll_ms", &mut settings.image_build_poll_ms);
    parse_into(&get, "release_poll_ms", &mut settings.release_poll_ms);
    parse_into(
        &get,
        "rollout_refresh_stagger_ms",
        &mut settings.rollout_refresh_stagger_ms,
    );
    parse_into(&get, "commit_event_ttl_secs", &mut settings.commit_event_ttl_secs);
}

/// Unparseable values leave the current setting in place.
fn parse_into<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    if let Some(v) = get(key) {
        match v.trim().parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(key, value = %v, "ignoring invalid numeric setting"),
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
