//! Model provider layer: message types, streaming client, retry.

pub mod client;
pub mod retry;
pub mod types;

pub use client::{ApiEvent, ChatClient, ChatOptions, HttpChatClient, ProviderError};
