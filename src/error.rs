use reqwest::StatusCode;

/// Failures surfaced by [`crate::client::AssistantClient::send_message`].
///
/// Cancellation and mid-stream `error` events are not errors; they are
/// reported through [`crate::client::TurnOutcome`] and the error slot.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// Non-success status before any stream bytes. `message` is the
    /// `error` field of the response body, when it had one.
    #[error("{}", status_message(.status, .message))]
    Status {
        status: StatusCode,
        message: Option<String>,
    },

    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("stream interrupted: {0}")]
    Stream(#[source] reqwest::Error),
}

fn status_message(status: &StatusCode, message: &Option<String>) -> String {
    match message {
        Some(message) => message.clone(),
        None => format!("assistant request failed with status {status}"),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid assistant url \"{url}\": {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to build http client: {0}")]
    Http(#[from] reqwest::Error),
}
