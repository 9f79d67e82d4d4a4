//! One full re-execution of the control script.
//!
//! The host calls [`ScriptRun::execute`] on every interaction. Nothing on the
//! call stack survives between runs; everything a run needs comes from the
//! session.

use std::sync::Arc;

use bizguide_core::config::{ChatSettings, ModelsConfig};
use bizguide_core::types::Role;

use crate::context::RunContext;
use crate::error::ChatError;
use crate::followup::{FollowupGenerator, FollowupPrompt};
use crate::markup::{assistant_markdown, generation_time_caption, user_markdown};
use crate::orchestrator::{StreamingOrchestrator, TurnOutcome};
use crate::output::TurnSurface;
use crate::session::Session;

/// Creates the output regions of a new turn.
///
/// Called from inside the run, so implementations may bind the regions to
/// [`RunContext::current`].
pub trait SurfaceFactory: Send + Sync {
    fn open_turn(&self) -> TurnSurface;
}

/// What the user did since the previous run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunInput {
    /// Text submitted through the chat input, if any.
    pub typed: Option<String>,
}

impl RunInput {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn typed(question: impl Into<String>) -> Self {
        Self {
            typed: Some(question.into()),
        }
    }
}

/// Everything one run rendered or decided.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// No guide context is selected yet; nothing else ran.
    pub needs_context: bool,
    /// Replayed history, one rendered line per message, plus the last
    /// generation time when the timer is shown.
    pub transcript: Vec<String>,
    pub validation_error: Option<String>,
    pub turns: Vec<TurnOutcome>,
    pub followups: Vec<FollowupPrompt>,
}

pub struct ScriptRun {
    orchestrator: Arc<StreamingOrchestrator>,
    followups: Arc<FollowupGenerator>,
    settings: ChatSettings,
    models: ModelsConfig,
}

impl ScriptRun {
    pub fn new(
        orchestrator: Arc<StreamingOrchestrator>,
        followups: Arc<FollowupGenerator>,
        settings: ChatSettings,
        models: ModelsConfig,
    ) -> Self {
        Self {
            orchestrator,
            followups,
            settings,
            models,
        }
    }

    /// Execute one run under a fresh [`RunContext`].
    pub async fn execute(
        &self,
        session: &Session,
        input: RunInput,
        surfaces: &dyn SurfaceFactory,
    ) -> Result<RunReport, ChatError> {
        let context = RunContext::new();
        tracing::debug!(session = %session.id(), run = %context.id(), "Run started");
        context.scope(self.run(session, input, surfaces)).await
    }

    async fn run(
        &self,
        session: &Session,
        input: RunInput,
        surfaces: &dyn SurfaceFactory,
    ) -> Result<RunReport, ChatError> {
        session.init_defaults(&self.settings, &self.models)?;

        let mut report = RunReport::default();
        if session.guide_context()?.is_none() {
            report.needs_context = true;
            return Ok(report);
        }

        report.transcript = self.replay(session)?;

        if let Some(question) = session.take_pending_followup()? {
            self.turn(session, &question, surfaces, &mut report).await?;
        }

        if let Some(question) = input.typed.filter(|q| !q.trim().is_empty()) {
            self.turn(session, &question, surfaces, &mut report).await?;
        }

        report.followups = self.followups.refresh(session).await?;
        Ok(report)
    }

    fn replay(&self, session: &Session) -> Result<Vec<String>, ChatError> {
        let messages = session.messages()?;
        let mut lines: Vec<String> = messages
            .iter()
            .map(|message| match message.role {
                Role::User => user_markdown(&message.content),
                Role::Assistant => assistant_markdown(&message.content),
            })
            .collect();

        if !messages.is_empty() && session.show_timer()? {
            if let Some(seconds) = session.last_generation_secs()? {
                lines.push(generation_time_caption(seconds));
            }
        }
        Ok(lines)
    }

    async fn turn(
        &self,
        session: &Session,
        question: &str,
        surfaces: &dyn SurfaceFactory,
        report: &mut RunReport,
    ) -> Result<(), ChatError> {
        let style = session.answer_style()?;
        let surface = surfaces.open_turn();
        match self
            .orchestrator
            .process_question(session, question, style, &surface)
            .await
        {
            Ok(outcome) => report.turns.push(outcome),
            Err(ChatError::QuestionTooLong(_)) => {
                let message = self.settings.too_long_message.clone();
                if let Err(e) = surface.response.error(&message) {
                    tracing::debug!(error = %e, "Validation message not rendered");
                }
                report.validation_error = Some(message);
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }
}
