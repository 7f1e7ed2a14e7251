use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use futures::StreamExt;
use shared::protocol::{decode_line, split_message, StreamEvent};
use tokio::{task::JoinHandle, time::sleep};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::store::Store;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(1000);

/// Long-lived websocket feed into the store. Connection failures are logged and
/// retried after a fixed delay, forever.
pub struct EventStream {
    store: Arc<Store>,
    ws_url: Url,
    reconnect_delay: Duration,
}

impl EventStream {
    pub fn new(store: Arc<Store>, server_url: &str, reconnect_delay: Duration) -> Result<Self> {
        Ok(Self {
            store,
            ws_url: websocket_url(server_url)?,
            reconnect_delay,
        })
    }

    pub fn ws_url(&self) -> &Url {
        &self.ws_url
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        loop {
            match self.session().await {
                Ok(events) => {
                    warn!(url = %self.ws_url, events, "event stream closed, reconnecting");
                }
                Err(err) => {
                    warn!(url = %self.ws_url, error = %err, "event stream failed, reconnecting");
                }
            }
            sleep(self.reconnect_delay).await;
        }
    }

    /// One connection, read until it closes. Returns the number of events dispatched.
    async fn session(&self) -> Result<usize> {
        let (mut ws, _) = connect_async(self.ws_url.as_str())
            .await
            .with_context(|| format!("failed to connect websocket: {}", self.ws_url))?;
        info!(url = %self.ws_url, "event stream connected");

        let mut dispatched = 0;
        while let Some(message) = ws.next().await {
            match message.context("websocket receive failed")? {
                Message::Text(text) => dispatched += ingest_message(&self.store, &text),
                Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                    Ok(text) => dispatched += ingest_message(&self.store, text),
                    Err(err) => warn!(error = %err, "dropping non-utf8 binary frame"),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
        Ok(dispatched)
    }
}

/// Decodes every line of one transport message and dispatches them in order.
/// Undecodable lines are skipped.
pub fn ingest_message(store: &Store, text: &str) -> usize {
    let mut dispatched = 0;
    for line in split_message(text) {
        let envelope = match decode_line(line) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "skipping undecodable stream line");
                continue;
            }
        };
        if envelope.event == StreamEvent::Unknown {
            debug!(event = %envelope.name, "unhandled stream event");
        }
        store.dispatch(envelope.event);
        dispatched += 1;
    }
    dispatched
}

/// Maps the http(s) server address onto its websocket endpoint.
pub fn websocket_url(server_url: &str) -> Result<Url> {
    let mut url =
        Url::parse(server_url).with_context(|| format!("invalid server_url: {server_url}"))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => bail!("server_url must start with http:// or https://, got {other}://"),
    };
    url.set_scheme(scheme)
        .map_err(|()| anyhow!("cannot switch {server_url} to {scheme}"))?;
    let path = format!("{}/ws/", url.path().trim_end_matches('/'));
    url.set_path(&path);
    Ok(url)
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
