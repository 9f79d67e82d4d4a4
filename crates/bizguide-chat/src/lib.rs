//! Streaming response orchestration for the business guide.
//!
//! Turns a pipeline's stage stream into a live, reference-styled answer,
//! recovers from failed streams with a single blocking call, keeps all
//! cross-rerun state in an explicit session store, and proposes follow-up
//! questions for the latest exchange.

pub mod callback;
pub mod context;
pub mod error;
pub mod fallback;
pub mod followup;
pub mod markup;
pub mod memory;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod rerun;
pub mod session;

pub use callback::{CallbackAdapter, ContextPropagating, StreamHandler};
pub use context::{ContextBound, RunContext};
pub use error::{ChatError, FailureKind, ModelError, PipelineError, RenderError};
pub use fallback::{FallbackController, FallbackOutcome};
pub use followup::{ChatModel, FollowupGenerator, FollowupPrompt, ModelFactory, ModelSelection};
pub use orchestrator::{AnswerSource, StreamingOrchestrator, TurnOutcome};
pub use output::{DebugLog, OutputRegion, TurnSurface};
pub use pipeline::{GenerationCallbacks, GenerationPipeline, StageStream, StreamOptions};
pub use rerun::{RunInput, RunReport, ScriptRun, SurfaceFactory};
pub use session::{Session, SessionStore};
