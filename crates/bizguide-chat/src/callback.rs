//! Callback adapter that renders pipeline tokens into the caller's region,
//! whatever execution context the pipeline fires its hooks from.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::context::RunContext;
use crate::markup::assistant_markdown;
use crate::output::OutputRegion;
use crate::pipeline::GenerationCallbacks;

#[derive(Debug, Default)]
struct HandlerState {
    is_streaming: bool,
    text: String,
    error_text: Option<String>,
}

/// Accumulates streamed tokens and re-renders them into one region.
///
/// Tokens arriving while not streaming are dropped. A failed render stops
/// streaming and is swallowed, so it never reaches the pipeline.
pub struct StreamHandler {
    region: Arc<dyn OutputRegion>,
    state: Mutex<HandlerState>,
}

impl StreamHandler {
    pub fn new(region: Arc<dyn OutputRegion>) -> Self {
        Self {
            region,
            state: Mutex::new(HandlerState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, HandlerState> {
        // State is plain data; a panic elsewhere cannot leave it inconsistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_streaming(&self) -> bool {
        self.state().is_streaming
    }

    /// Text accumulated from tokens so far.
    pub fn text(&self) -> String {
        self.state().text.clone()
    }

    pub fn error_text(&self) -> Option<String> {
        self.state().error_text.clone()
    }

    pub fn record_error(&self, message: &str) {
        self.state().error_text = Some(message.to_string());
    }
}

impl GenerationCallbacks for StreamHandler {
    fn on_generation_start(&self) {
        self.state().is_streaming = true;
    }

    fn on_token(&self, token: &str) {
        let mut state = self.state();
        if !state.is_streaming {
            return;
        }
        state.text.push_str(token);
        if let Err(e) = self.region.markdown(&assistant_markdown(&state.text)) {
            tracing::debug!(error = %e, "Token render failed, streaming stopped");
            state.is_streaming = false;
        }
    }

    fn on_generation_end(&self) {
        self.state().is_streaming = false;
    }
}

/// Wraps a callback so every hook runs re-associated with the context that
/// constructed it.
pub struct ContextPropagating<C> {
    context: Option<RunContext>,
    inner: C,
}

impl<C: GenerationCallbacks> ContextPropagating<C> {
    /// Capture the current run context. Without one, hooks run unbound.
    pub fn new(inner: C) -> Self {
        Self {
            context: RunContext::current(),
            inner,
        }
    }

    pub fn with_context(context: RunContext, inner: C) -> Self {
        Self {
            context: Some(context),
            inner,
        }
    }

    pub fn context(&self) -> Option<&RunContext> {
        self.context.as_ref()
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    fn dispatch(&self, hook: impl FnOnce(&C)) {
        match &self.context {
            Some(context) if !context.is_current() => context.enter(|| hook(&self.inner)),
            _ => hook(&self.inner),
        }
    }
}

impl<C: GenerationCallbacks> GenerationCallbacks for ContextPropagating<C> {
    fn on_generation_start(&self) {
        self.dispatch(|inner| inner.on_generation_start());
    }

    fn on_token(&self, token: &str) {
        self.dispatch(|inner| inner.on_token(token));
    }

    fn on_generation_end(&self) {
        self.dispatch(|inner| inner.on_generation_end());
    }
}

/// The adapter handed to the pipeline for one turn.
pub type CallbackAdapter = ContextPropagating<StreamHandler>;

impl ContextPropagating<StreamHandler> {
    pub fn for_region(region: Arc<dyn OutputRegion>) -> Self {
        Self::new(StreamHandler::new(region))
    }

    pub fn handler(&self) -> &StreamHandler {
        &self.inner
    }
}
