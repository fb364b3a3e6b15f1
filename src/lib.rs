//! Core of a multi-model chat client: fans one user message out to several
//! independently configured OpenAI-compatible backends concurrently, streams
//! each reply into per-session state, and re-renders settled replies as rich
//! markup when they carry Markdown structure.
//!
//! The library is front-end agnostic: construct a [`SessionManager`], consume
//! its event stream, and feed a [`RenderReconciler`] for display state. The
//! `quorum` binary is the reference CLI front end.

pub mod config;
pub mod models;
pub mod render;
pub mod repositories;
pub mod services;

pub use config::{ModelConfig, PromptTemplate, ProxySettings};
pub use models::{ChatMessage, ManagerOptions, Role, SessionEvent, SessionManager};
pub use render::{BlockContent, RenderReconciler, TranscriptBlock};
pub use repositories::{HistoryRepository, JsonHistoryRepository};
pub use services::{LlmError, LlmService};
