//! Execution context of one script run.
//!
//! The host re-executes the control script on every interaction. Each
//! execution owns its output regions, and a render issued from any other
//! execution context (a worker thread, a spawned task) must not reach them.
//! [`RunContext`] is the identity of one execution; [`ContextBound`] enforces
//! the ownership rule on a region.

use std::future::Future;

use uuid::Uuid;

use crate::error::RenderError;
use crate::output::OutputRegion;

tokio::task_local! {
    static CURRENT_RUN: RunContext;
}

/// Identity of one execution of the control script.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunContext {
    id: Uuid,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Context attached to the current execution, if any.
    pub fn current() -> Option<RunContext> {
        CURRENT_RUN.try_with(|ctx| ctx.clone()).ok()
    }

    pub fn is_current(&self) -> bool {
        CURRENT_RUN
            .try_with(|ctx| ctx.id == self.id)
            .unwrap_or(false)
    }

    /// Run `fut` with this context attached.
    ///
    /// Tasks spawned from inside `fut` do not inherit the context.
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        CURRENT_RUN.scope(self, fut).await
    }

    /// Run `f` synchronously with this context attached, on any thread.
    pub fn enter<R>(&self, f: impl FnOnce() -> R) -> R {
        CURRENT_RUN.sync_scope(self.clone(), f)
    }
}

/// Output region that only accepts renders from its owning context.
///
/// Renders from elsewhere fail with [`RenderError::ForeignContext`] and leave
/// the region untouched.
pub struct ContextBound<R> {
    owner: RunContext,
    inner: R,
}

impl<R: OutputRegion> ContextBound<R> {
    pub fn new(owner: RunContext, inner: R) -> Self {
        Self { owner, inner }
    }

    /// Bind `inner` to the context of the caller, if one is attached.
    pub fn to_current(inner: R) -> Option<Self> {
        RunContext::current().map(|owner| Self::new(owner, inner))
    }

    pub fn owner(&self) -> &RunContext {
        &self.owner
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    fn check(&self) -> Result<(), RenderError> {
        if self.owner.is_current() {
            Ok(())
        } else {
            tracing::debug!(owner = %self.owner.id, "Render rejected outside owning context");
            Err(RenderError::ForeignContext)
        }
    }
}

impl<R: OutputRegion> OutputRegion for ContextBound<R> {
    fn markdown(&self, content: &str) -> Result<(), RenderError> {
        self.check()?;
        self.inner.markdown(content)
    }

    fn error(&self, message: &str) -> Result<(), RenderError> {
        self.check()?;
        self.inner.error(message)
    }

    fn append(&self, content: &str) -> Result<(), RenderError> {
        self.check()?;
        self.inner.append(content)
    }

    fn text(&self, label: &str, content: &str) -> Result<(), RenderError> {
        self.check()?;
        self.inner.text(label, content)
    }
}
