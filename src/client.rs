use crate::config::ClientConfig;
use crate::conversation::{reduce, Action, ChatState, Message, TurnStatus};
use crate::decoder::{Frame, FrameDecoder};
use crate::error::{ChatError, ConfigError};
use crate::ids::{IdGenerator, UuidIds};
use crate::protocol::{ChatRequest, ErrorBody, StreamEvent};
use crate::store::{ClientStore, MemoryStore, CSRF_KEY, SESSION_KEY};
use futures::StreamExt;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderValue, ACCEPT};
use reqwest::{Client as HttpClient, Url};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;

pub const SESSION_HEADER: &str = "X-Session-Id";
pub const CSRF_HEADER: &str = "X-CSRFToken";

/// How a `send_message` call ended when it did not return an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    /// The stream finished, but the service reported an `error` event.
    Errored,
    Cancelled,
    /// Another turn was already streaming; nothing was sent.
    Busy,
    EmptyInput,
}

pub struct AssistantClientBuilder {
    config: ClientConfig,
    store: Option<Arc<dyn ClientStore>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

impl AssistantClientBuilder {
    pub fn store(mut self, store: impl ClientStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn ids(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Some(Arc::new(ids));
        self
    }

    pub fn build(self) -> Result<AssistantClient, ConfigError> {
        let chat_url = self.config.chat_url()?;
        let cookies = Arc::new(Jar::default());
        let http = HttpClient::builder()
            .cookie_provider(Arc::clone(&cookies))
            .build()?;
        let ids = self.ids.unwrap_or_else(|| Arc::new(UuidIds));
        let thread_id = ids.next_id();

        tracing::debug!(url = %chat_url, thread_id = %thread_id, "assistant client ready");

        Ok(AssistantClient {
            config: self.config,
            chat_url,
            http,
            cookies,
            store: self.store.unwrap_or_else(|| Arc::new(MemoryStore::new())),
            ids,
            thread_id,
            state: watch::Sender::new(ChatState::default()),
            cancel: Mutex::new(CancellationToken::new()),
        })
    }
}

/// Streaming client for the booking assistant.
///
/// One turn may stream at a time. Share it as `Arc<AssistantClient>` to
/// cancel or observe from other tasks while `send_message` is running.
pub struct AssistantClient {
    config: ClientConfig,
    chat_url: Url,
    http: HttpClient,
    cookies: Arc<Jar>,
    store: Arc<dyn ClientStore>,
    ids: Arc<dyn IdGenerator>,
    thread_id: String,
    state: watch::Sender<ChatState>,
    cancel: Mutex<CancellationToken>,
}

impl AssistantClient {
    pub fn builder(config: ClientConfig) -> AssistantClientBuilder {
        AssistantClientBuilder {
            config,
            store: None,
            ids: None,
        }
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn chat_url(&self) -> &Url {
        &self.chat_url
    }

    /// Cookie jar shared with the HTTP client. A session cookie present here
    /// suppresses the `X-Session-Id` header.
    pub fn cookie_jar(&self) -> &Arc<Jar> {
        &self.cookies
    }

    pub fn state(&self) -> ChatState {
        self.state.borrow().clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state.borrow().messages().to_vec()
    }

    pub fn is_streaming(&self) -> bool {
        self.state.borrow().is_streaming()
    }

    pub fn error(&self) -> Option<String> {
        self.state.borrow().error().map(str::to_string)
    }

    pub fn watch(&self) -> watch::Receiver<ChatState> {
        self.state.subscribe()
    }

    pub fn subscribe(&self) -> WatchStream<ChatState> {
        WatchStream::new(self.state.subscribe())
    }

    /// Stops the in-flight turn, keeping whatever content has arrived.
    pub fn cancel(&self) {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    /// Starts a new conversation. The thread id is kept.
    pub fn clear_messages(&self) {
        self.cancel();
        self.apply(Action::Clear);
    }

    /// Sends one user message and streams the reply into the conversation.
    ///
    /// Returns once the turn reaches a terminal state. A second call while a
    /// turn is streaming returns `TurnOutcome::Busy` without side effects.
    pub async fn send_message(&self, text: &str) -> Result<TurnOutcome, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(TurnOutcome::EmptyInput);
        }

        let token = CancellationToken::new();
        let user = Message::user(self.ids.next_id(), text);
        let assistant = Message::assistant(self.ids.next_id());
        let mut history = Vec::new();

        let started = self.state.send_if_modified(|state| {
            if state.is_streaming() {
                return false;
            }
            history = state.history();
            *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = token.clone();
            reduce(state, Action::Begin { user, assistant });
            true
        });
        if !started {
            tracing::debug!(thread_id = %self.thread_id, "turn already streaming; send ignored");
            return Ok(TurnOutcome::Busy);
        }

        let request = ChatRequest {
            message: text.to_string(),
            thread_id: self.thread_id.clone(),
            history,
        };
        tracing::info!(
            thread_id = %self.thread_id,
            history = request.history.len(),
            "sending message"
        );

        let guard = TurnGuard::new(self);
        let result = self.run_turn(&request, &token).await;
        guard.disarm();

        let status = match &result {
            Ok(status) => *status,
            Err(err) => {
                tracing::warn!(thread_id = %self.thread_id, error = %err, "assistant turn failed");
                self.apply(Action::Fail {
                    error: err.to_string(),
                    display: self.display_text(err),
                });
                TurnStatus::Errored
            }
        };

        let mut finished = status;
        self.state.send_modify(|state| {
            reduce(state, Action::Finish(status));
            finished = state.status();
        });

        result?;
        let outcome = match finished {
            TurnStatus::Cancelled => {
                tracing::info!(thread_id = %self.thread_id, "turn cancelled");
                TurnOutcome::Cancelled
            }
            TurnStatus::Errored => TurnOutcome::Errored,
            _ => TurnOutcome::Completed,
        };
        Ok(outcome)
    }

    async fn run_turn(
        &self,
        request: &ChatRequest,
        token: &CancellationToken,
    ) -> Result<TurnStatus, ChatError> {
        let mut builder = self
            .http
            .post(self.chat_url.clone())
            .header(ACCEPT, "text/event-stream")
            .json(request);
        for (name, value) in self.identity_headers() {
            builder = builder.header(name, value);
        }

        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(TurnStatus::Cancelled),
            response = builder.send() => response.map_err(ChatError::Request)?,
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(TurnStatus::Cancelled),
                body = response.text() => body.unwrap_or_default(),
            };
            let message = serde_json::from_str::<ErrorBody>(&body)
                .ok()
                .and_then(|body| body.error)
                .filter(|message| !message.trim().is_empty());
            return Err(ChatError::Status { status, message });
        }

        let mut stream = response.bytes_stream();
        let mut decoder = FrameDecoder::new();

        let status = loop {
            let chunk = tokio::select! {
                biased;
                _ = token.cancelled() => break TurnStatus::Cancelled,
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else {
                break TurnStatus::Completed;
            };
            let chunk = chunk.map_err(ChatError::Stream)?;
            if self.dispatch(decoder.push(&chunk)) {
                break TurnStatus::Completed;
            }
        };

        decoder.finish();
        if decoder.dropped() > 0 {
            tracing::warn!(
                thread_id = %self.thread_id,
                dropped = decoder.dropped(),
                "dropped malformed frames"
            );
        }
        Ok(status)
    }

    /// Applies decoded frames in order. Returns true once `done` arrives.
    fn dispatch(&self, frames: Vec<Frame>) -> bool {
        for frame in frames {
            let event = match StreamEvent::from_frame(&frame.event, frame.data) {
                Ok(event) => event,
                Err(err) => {
                    tracing::debug!(event = %frame.event, error = %err, "dropping frame with unexpected payload");
                    continue;
                }
            };

            match &event {
                StreamEvent::Error { message } => {
                    tracing::warn!(thread_id = %self.thread_id, message = ?message, "assistant reported an error");
                }
                StreamEvent::Unknown { event } => {
                    tracing::debug!(event = %event, "ignoring unknown event type");
                }
                _ => {}
            }

            let done = event == StreamEvent::Done;
            self.apply(Action::Event(event));
            if done {
                return true;
            }
        }
        false
    }

    fn apply(&self, action: Action) {
        self.state.send_modify(|state| reduce(state, action));
    }

    fn display_text(&self, err: &ChatError) -> String {
        match err {
            ChatError::Status {
                message: Some(message),
                ..
            } => message.clone(),
            _ => self.config.fallback_message(),
        }
    }

    fn identity_headers(&self) -> Vec<(&'static str, HeaderValue)> {
        let mut headers = Vec::new();

        if !self.has_ambient_session() {
            if let Some(value) = self.store_header(SESSION_KEY) {
                headers.push((SESSION_HEADER, value));
            }
        }
        if let Some(value) = self.store_header(CSRF_KEY) {
            headers.push((CSRF_HEADER, value));
        }

        headers
    }

    fn store_header(&self, key: &str) -> Option<HeaderValue> {
        let value = self.store.get(key)?;
        match HeaderValue::from_str(&value) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::debug!(key, error = %err, "skipping store value that is not a valid header");
                None
            }
        }
    }

    fn has_ambient_session(&self) -> bool {
        let Some(cookies) = self.cookies.cookies(&self.chat_url) else {
            return false;
        };
        let Ok(cookies) = cookies.to_str() else {
            return false;
        };
        let prefix = format!("{}=", self.config.session_cookie);
        cookies
            .split(';')
            .any(|cookie| cookie.trim_start().starts_with(&prefix))
    }
}

/// Ends the turn as cancelled if the `send_message` future is dropped
/// before it finishes.
struct TurnGuard<'a> {
    client: &'a AssistantClient,
    armed: bool,
}

impl<'a> TurnGuard<'a> {
    fn new(client: &'a AssistantClient) -> Self {
        Self {
            client,
            armed: true,
        }
    }

    /// The turn finished normally; `send_message` applies its own `Finish`.
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::debug!(thread_id = %self.client.thread_id, "turn dropped before completion");
        self.client.apply(Action::Finish(TurnStatus::Cancelled));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SequentialIds;

    fn client(store: MemoryStore) -> AssistantClient {
        AssistantClient::builder(ClientConfig::new("http://127.0.0.1:9"))
            .store(store)
            .ids(SequentialIds::new("t"))
            .build()
            .unwrap()
    }

    #[test]
    fn thread_id_comes_from_id_generator() {
        let client = client(MemoryStore::new());
        assert_eq!(client.thread_id(), "t-1");
        assert!(client.messages().is_empty());
        assert!(!client.is_streaming());
        assert_eq!(client.error(), None);
    }

    #[test]
    fn identity_headers_from_store() {
        let client = client(
            MemoryStore::new()
                .with(SESSION_KEY, "sess-1")
                .with(CSRF_KEY, "csrf-1"),
        );
        let headers = client.identity_headers();
        assert_eq!(
            headers,
            vec![
                (SESSION_HEADER, HeaderValue::from_static("sess-1")),
                (CSRF_HEADER, HeaderValue::from_static("csrf-1")),
            ]
        );
    }

    #[test]
    fn ambient_session_cookie_suppresses_session_header() {
        let client = client(
            MemoryStore::new()
                .with(SESSION_KEY, "sess-1")
                .with(CSRF_KEY, "csrf-1"),
        );
        let url = client.chat_url().clone();
        client.cookie_jar().add_cookie_str("sessionid=cookie-1; Path=/", &url);

        let headers = client.identity_headers();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].0, CSRF_HEADER);
    }

    #[test]
    fn missing_or_invalid_store_values_are_skipped() {
        let client = client(MemoryStore::new().with(CSRF_KEY, "bad\nvalue"));
        assert!(client.identity_headers().is_empty());
    }

    #[tokio::test]
    async fn blank_input_is_ignored() {
        let client = client(MemoryStore::new());
        assert_eq!(
            client.send_message("   ").await.unwrap(),
            TurnOutcome::EmptyInput
        );
        assert!(client.messages().is_empty());
    }

    #[test]
    fn disarmed_guard_leaves_state_alone() {
        let client = client(MemoryStore::new());
        client.apply(Action::Begin {
            user: Message::user("u", "hi"),
            assistant: Message::assistant("a"),
        });

        TurnGuard::new(&client).disarm();
        assert!(client.is_streaming());

        drop(TurnGuard::new(&client));
        assert!(!client.is_streaming());
        assert_eq!(client.state().status(), TurnStatus::Cancelled);
    }

    #[test]
    fn display_text_prefers_server_message() {
        let client = client(MemoryStore::new());
        let err = ChatError::Status {
            status: reqwest::StatusCode::BAD_GATEWAY,
            message: Some("overloaded".to_string()),
        };
        assert_eq!(client.display_text(&err), "overloaded");

        let err = ChatError::Status {
            status: reqwest::StatusCode::BAD_GATEWAY,
            message: None,
        };
        assert!(client.display_text(&err).contains(crate::config::DEFAULT_SUPPORT_PHONE));
    }
}
