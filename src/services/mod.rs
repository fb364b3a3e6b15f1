pub mod llm_service;
pub mod sse;

pub use llm_service::{ChatRequest, LlmError, LlmService, ResponseStream, StreamChunk};
