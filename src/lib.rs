//! Streaming client for the courier booking assistant.
//!
//! [`AssistantClient`] posts one message per turn and reads the reply as an
//! `event:`/`data:` stream. [`decoder::FrameDecoder`] turns bytes into frames,
//! and [`conversation::reduce`] folds the resulting events into an observable
//! [`ChatState`].

pub mod client;
pub mod config;
pub mod conversation;
pub mod decoder;
pub mod error;
pub mod ids;
pub mod protocol;
pub mod store;

pub use client::{AssistantClient, AssistantClientBuilder, TurnOutcome};
pub use config::ClientConfig;
pub use conversation::{ChatState, Message, TurnStatus};
pub use error::{ChatError, ConfigError};
pub use protocol::{Role, StreamEvent};
pub use store::{ClientStore, FileStore, MemoryStore};
