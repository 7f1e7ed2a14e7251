use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("stream line is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),
    #[error("stream line has no string `event` discriminator")]
    MissingDiscriminator,
    #[error("invalid payload for `{name}` event: {source}")]
    Payload {
        name: String,
        source: serde_json::Error,
    },
}

/// A remote command the backend answered with a non-success status.
#[derive(Debug, Clone, Error)]
#[error("{status}: {message}")]
pub struct CommandRejected {
    pub status: u16,
    pub message: String,
}

impl CommandRejected {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}
