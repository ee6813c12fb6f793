use crate::error::ConfigError;
use reqwest::Url;
use std::path::PathBuf;

pub const DEFAULT_ENDPOINT: &str = "/api/assistant/chat/";
pub const DEFAULT_SESSION_COOKIE: &str = "sessionid";
pub const DEFAULT_SUPPORT_PHONE: &str = "0800 123 4567";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub endpoint: String,
    /// Cookie that, when present in the jar, makes `X-Session-Id` redundant.
    pub session_cookie: String,
    /// Shown to the user when the assistant cannot be reached.
    pub support_phone: String,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: normalize_base_url(&base_url.into()),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            session_cookie: DEFAULT_SESSION_COOKIE.to_string(),
            support_phone: DEFAULT_SUPPORT_PHONE.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_support_phone(mut self, phone: impl Into<String>) -> Self {
        self.support_phone = phone.into();
        self
    }

    pub fn with_session_cookie(mut self, name: impl Into<String>) -> Self {
        self.session_cookie = name.into();
        self
    }

    pub fn chat_url(&self) -> Result<Url, ConfigError> {
        let endpoint = if self.endpoint.starts_with('/') {
            self.endpoint.clone()
        } else {
            format!("/{}", self.endpoint)
        };
        let raw = format!("{}{}", normalize_base_url(&self.base_url), endpoint);
        Url::parse(&raw).map_err(|err| ConfigError::InvalidUrl {
            url: raw,
            reason: err.to_string(),
        })
    }

    pub fn fallback_message(&self) -> String {
        format!(
            "Sorry, I'm having trouble connecting right now. Please try again in a moment, or call us on {}.",
            self.support_phone
        )
    }
}

fn normalize_base_url(value: &str) -> String {
    value.trim_end_matches('/').to_string()
}

/// Per-user directory for the client store and log file.
pub fn app_dir() -> PathBuf {
    if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
        return PathBuf::from(home).join(".courier-assist");
    }

    PathBuf::from(".courier-assist")
}
