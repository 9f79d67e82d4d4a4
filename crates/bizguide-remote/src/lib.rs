//! HTTP implementations of the guide's external collaborators: the answer
//! pipeline served over `/stream` and `/invoke`, and an OpenAI-compatible
//! chat model used for follow-up questions.

pub mod error;
pub mod openai;
pub mod pipeline;
pub mod sse;

pub use error::RemoteError;
pub use openai::OpenAiChatModel;
pub use pipeline::HttpPipeline;
pub use sse::{SseFrame, SseStreamParser};
