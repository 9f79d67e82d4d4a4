//! Streaming orchestrator: drives one question through the pipeline and
//! commits the answer to the session.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;

use bizguide_core::config::ChatSettings;
use bizguide_core::types::{AnswerStyle, GenerationRequest, Message};

use crate::callback::CallbackAdapter;
use crate::error::{ChatError, FailureKind, PipelineError, RenderError};
use crate::fallback::{FallbackController, FallbackOutcome};
use crate::markup::{assistant_markdown, generation_time_caption, user_markdown};
use crate::output::{DebugLog, TurnSurface};
use crate::pipeline::{GenerationPipeline, StreamOptions};
use crate::session::Session;

/// Label of the debug view.
pub const DEBUG_LABEL: &str = "Debug Logs";

/// Where the committed answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerSource {
    /// Accumulated `generate` chunks.
    Streamed,
    /// Tokens delivered through the callback adapter only.
    Tokens,
    /// The blocking fallback call.
    Fallback,
    /// The fixed apology.
    Apology,
    /// Nothing was produced.
    ///
    /// The turn commits `""` over the placeholder. Every other source commits
    /// non-empty text, so this is the only turn whose committed message is
    /// indistinguishable from the placeholder.
    Empty,
}

/// Summary of one processed question.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Committed assistant text.
    pub text: String,
    pub source: AnswerSource,
    /// `generate` chunks received.
    pub chunks: usize,
    pub elapsed: Duration,
    pub fallback_attempted: bool,
    /// The response region went away mid-turn.
    pub stopped: bool,
}

pub struct StreamingOrchestrator {
    pipeline: Arc<dyn GenerationPipeline>,
    fallback: FallbackController,
    settings: ChatSettings,
}

impl StreamingOrchestrator {
    pub fn new(pipeline: Arc<dyn GenerationPipeline>, settings: ChatSettings) -> Self {
        let fallback = FallbackController::new(Arc::clone(&pipeline), settings.apology_message.clone());
        Self {
            pipeline,
            fallback,
            settings,
        }
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    /// Process one question end to end.
    ///
    /// Only validation and session failures are returned as errors. Every
    /// pipeline or rendering failure is handled inside the turn.
    pub async fn process_question(
        &self,
        session: &Session,
        question: &str,
        style: AnswerStyle,
        surface: &TurnSurface,
    ) -> Result<TurnOutcome, ChatError> {
        let max = self.settings.max_question_chars;
        if question.chars().count() > max {
            tracing::info!(session = %session.id(), max, "Question rejected as too long");
            return Err(ChatError::QuestionTooLong(max));
        }

        if let Err(e) = surface.question.markdown(&user_markdown(question)) {
            tracing::debug!(error = %e, "Question echo not rendered");
        }
        session.append_message(Message::user(question))?;
        let slot = session.append_message(Message::placeholder())?;

        let debug_log = DebugLog::new();
        let request = GenerationRequest::new(
            question,
            session.hybrid_search()?,
            session.internet_search()?,
            style,
        );
        let adapter = Arc::new(CallbackAdapter::for_region(Arc::clone(&surface.tokens)));
        let options = StreamOptions::new(debug_log.clone()).with_callback(adapter.clone());

        let started = Instant::now();
        let mut accumulated = String::new();
        let mut chunks = 0usize;
        let mut stopped = false;

        match self.pipeline.stream(&request, options).await {
            Ok(mut stream) => {
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(event) => {
                            if let Some(text) = event.generation() {
                                accumulated.push_str(text);
                                chunks += 1;
                                if let Err(e) =
                                    surface.response.markdown(&assistant_markdown(&accumulated))
                                {
                                    stopped = self.region_gone(&e, &debug_log);
                                }
                            } else {
                                for stage in event.stage_names() {
                                    debug_log.line(format!("stage: {}", stage));
                                }
                            }
                            self.show_debug(surface, &debug_log);
                            if stopped {
                                break;
                            }
                        }
                        Err(e) => {
                            let partial = !accumulated.trim().is_empty();
                            stopped =
                                self.stream_failed(&e, partial, surface, &adapter, &debug_log);
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                stopped = self.stream_failed(&e, false, surface, &adapter, &debug_log);
            }
        }

        let streamed_tokens = adapter.handler().text();
        let mut fallback_attempted = false;
        let (text, source) = if !accumulated.trim().is_empty() {
            (accumulated, AnswerSource::Streamed)
        } else if stopped {
            Self::token_answer(streamed_tokens)
        } else {
            fallback_attempted = true;
            let produced = !streamed_tokens.trim().is_empty();
            match self
                .fallback
                .recover(&request, surface.response.as_ref(), produced, &debug_log)
                .await
            {
                FallbackOutcome::Recovered(text) => (text, AnswerSource::Fallback),
                FallbackOutcome::Apology(text) => (text, AnswerSource::Apology),
                FallbackOutcome::Suppressed => Self::token_answer(streamed_tokens),
            }
        };
        self.show_debug(surface, &debug_log);

        let elapsed = started.elapsed();
        session.set_last_generation_secs(elapsed.as_secs_f64())?;
        if !stopped && session.show_timer()? {
            if let Err(e) = surface
                .response
                .append(&generation_time_caption(elapsed.as_secs_f64()))
            {
                tracing::debug!(error = %e, "Timer caption not rendered");
            }
        }

        session.set_message_content(slot, &text)?;
        session.bump_followup_generation()?;

        tracing::info!(
            session = %session.id(),
            chunks,
            source = ?source,
            fallback = fallback_attempted,
            elapsed_ms = elapsed.as_millis() as u64,
            "Turn completed"
        );

        Ok(TurnOutcome {
            text,
            source,
            chunks,
            elapsed,
            fallback_attempted,
            stopped,
        })
    }

    fn token_answer(tokens: String) -> (String, AnswerSource) {
        if tokens.trim().is_empty() {
            (String::new(), AnswerSource::Empty)
        } else {
            (tokens, AnswerSource::Tokens)
        }
    }

    fn show_debug(&self, surface: &TurnSurface, debug_log: &DebugLog) {
        if debug_log.is_empty() {
            return;
        }
        if let Err(e) = surface.debug.text(DEBUG_LABEL, &debug_log.snapshot()) {
            tracing::trace!(error = %e, "Debug view not rendered");
        }
    }

    /// The response region stopped accepting renders. Returns `true`: the
    /// turn stops silently.
    fn region_gone(&self, error: &RenderError, debug_log: &DebugLog) -> bool {
        tracing::debug!(error = %error, "Output region gone, stopping stream");
        debug_log.line(format!("output closed: {}", error));
        true
    }

    /// Classify a streaming failure. Returns whether the turn must stop
    /// because the response region is gone.
    ///
    /// With `partial` text on screen no retry follows, so the partial answer
    /// stays visible and an interruption notice is added below it.
    fn stream_failed(
        &self,
        error: &PipelineError,
        partial: bool,
        surface: &TurnSurface,
        adapter: &CallbackAdapter,
        debug_log: &DebugLog,
    ) -> bool {
        match error.kind() {
            FailureKind::TransportClosed => {
                tracing::debug!(error = %error, "Stream closed");
                debug_log.line(format!("stream closed: {}", error));
                false
            }
            FailureKind::NonCriticalFormatAnomaly => {
                tracing::debug!(error = %error, "Ignoring transport format anomaly");
                debug_log.line(format!("format anomaly: {}", error));
                false
            }
            FailureKind::MissingGeneration | FailureKind::Unclassified => {
                tracing::warn!(error = %error, "Streaming failed");
                debug_log.line(format!("stream error: {}", error));
                let rendered = if partial {
                    let message = &self.settings.stream_interrupted_message;
                    adapter.handler().record_error(message);
                    surface.response.append(message)
                } else {
                    let message = &self.settings.stream_error_message;
                    adapter.handler().record_error(message);
                    surface.response.error(message)
                };
                match rendered {
                    Ok(()) => false,
                    Err(e) => self.region_gone(&e, debug_log),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryPipeline, RecordingRegion};
    use crate::session::SessionStore;
    use bizguide_core::types::{Role, StageEvent};
    use serde_json::json;

    struct Fixture {
        session: Session,
        response: Arc<RecordingRegion>,
        tokens: Arc<RecordingRegion>,
        debug: Arc<RecordingRegion>,
        surface: TurnSurface,
    }

    fn fixture() -> Fixture {
        let session = Arc::new(SessionStore::new()).session("orchestrator");
        session.set_search_flags(true, false).unwrap();
        let response = Arc::new(RecordingRegion::new());
        let tokens = Arc::new(RecordingRegion::new());
        let debug = Arc::new(RecordingRegion::new());
        let surface = TurnSurface {
            question: Arc::new(RecordingRegion::new()),
            response: response.clone(),
            tokens: tokens.clone(),
            debug: debug.clone(),
        };
        Fixture {
            session,
            response,
            tokens,
            debug,
            surface,
        }
    }

    fn orchestrator(pipeline: &Arc<MemoryPipeline>) -> StreamingOrchestrator {
        StreamingOrchestrator::new(pipeline.clone(), ChatSettings::default())
    }

    const QUESTION: &str = "How do I register a company in Finland?";

    #[tokio::test]
    async fn test_streamed_chunks_are_concatenated() {
        let f = fixture();
        let pipeline = Arc::new(MemoryPipeline::new().with_chunks(&["To", " register..."]));
        let outcome = orchestrator(&pipeline)
            .process_question(&f.session, QUESTION, AnswerStyle::Concise, &f.surface)
            .await
            .unwrap();

        assert_eq!(outcome.text, "To register...");
        assert_eq!(outcome.source, AnswerSource::Streamed);
        assert_eq!(outcome.chunks, 2);
        assert_eq!(pipeline.invoke_calls(), 0);

        let messages = f.session.messages().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], Message::user(QUESTION));
        assert_eq!(messages[1], Message::assistant("To register..."));

        let markdown: Vec<_> = f
            .response
            .ops()
            .into_iter()
            .filter_map(|op| match op {
                crate::memory::RegionOp::Markdown(m) => Some(m),
                _ => None,
            })
            .collect();
        assert_eq!(
            markdown,
            vec!["**Assistant:** To", "**Assistant:** To register..."]
        );
        assert_eq!(f.response.appended().len(), 1);
        assert!(f.response.appended()[0].starts_with("*Generation time: "));
    }

    #[tokio::test]
    async fn test_request_uses_session_flags_and_style() {
        let f = fixture();
        let pipeline = Arc::new(MemoryPipeline::new().with_chunks(&["ok"]));
        orchestrator(&pipeline)
            .process_question(&f.session, QUESTION, AnswerStyle::Moderate, &f.surface)
            .await
            .unwrap();

        let request = &pipeline.requests()[0];
        assert_eq!(request.question(), QUESTION);
        assert!(request.hybrid_search());
        assert!(!request.internet_search());
        assert_eq!(request.answer_style(), AnswerStyle::Moderate);
    }

    #[tokio::test]
    async fn test_too_long_question_is_rejected_before_any_call() {
        let f = fixture();
        let pipeline = Arc::new(MemoryPipeline::new().with_chunks(&["x"]));
        let question = "x".repeat(201);
        let result = orchestrator(&pipeline)
            .process_question(&f.session, &question, AnswerStyle::Concise, &f.surface)
            .await;

        assert!(matches!(result, Err(ChatError::QuestionTooLong(200))));
        assert_eq!(pipeline.stream_calls(), 0);
        assert!(f.session.messages().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_length_limit_counts_characters() {
        let f = fixture();
        let pipeline = Arc::new(MemoryPipeline::new().with_chunks(&["ok"]));
        let question = "ä".repeat(200);
        assert!(orchestrator(&pipeline)
            .process_question(&f.session, &question, AnswerStyle::Concise, &f.surface)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_closed_stream_falls_back_silently() {
        let f = fixture();
        let pipeline = Arc::new(
            MemoryPipeline::new()
                .with_items(vec![Err(PipelineError::StreamClosed("reset".into()))])
                .answering("From the blocking call."),
        );
        let outcome = orchestrator(&pipeline)
            .process_question(&f.session, QUESTION, AnswerStyle::Concise, &f.surface)
            .await
            .unwrap();

        assert_eq!(outcome.source, AnswerSource::Fallback);
        assert_eq!(outcome.text, "From the blocking call.");
        assert_eq!(pipeline.invoke_calls(), 1);
        assert!(f.response.errors().is_empty());
        assert!(f.debug.current().unwrap().contains("stream closed"));
    }

    #[tokio::test]
    async fn test_unclassified_failures_commit_apology() {
        let f = fixture();
        let pipeline = Arc::new(
            MemoryPipeline::new()
                .failing_to_open(PipelineError::Failed("connection refused".into()))
                .with_invoke(Err(PipelineError::Failed("500".into()))),
        );
        let settings = ChatSettings::default();
        let outcome = orchestrator(&pipeline)
            .process_question(&f.session, QUESTION, AnswerStyle::Concise, &f.surface)
            .await
            .unwrap();

        assert_eq!(outcome.source, AnswerSource::Apology);
        assert_eq!(outcome.text, settings.apology_message);
        assert_eq!(
            f.response.errors(),
            vec![settings.stream_error_message.clone(), settings.apology_message.clone()]
        );
        assert!(f.response.errors().iter().all(|e| !e.contains("connection refused")));
        assert_eq!(f.session.messages().unwrap()[1].content, settings.apology_message);
    }

    #[tokio::test]
    async fn test_failure_after_partial_answer_keeps_it_without_retry() {
        let f = fixture();
        let pipeline = Arc::new(
            MemoryPipeline::new()
                .with_items(vec![
                    Ok(StageEvent::generation_chunk("Partial answer")),
                    Err(PipelineError::Failed("boom".into())),
                ])
                .answering("unused"),
        );
        let settings = ChatSettings::default();
        let outcome = orchestrator(&pipeline)
            .process_question(&f.session, QUESTION, AnswerStyle::Concise, &f.surface)
            .await
            .unwrap();

        assert_eq!(outcome.text, "Partial answer");
        assert_eq!(outcome.source, AnswerSource::Streamed);
        assert!(!outcome.fallback_attempted);
        assert_eq!(pipeline.invoke_calls(), 0);
        assert!(f.response.errors().is_empty());
        assert_eq!(f.response.current().as_deref(), Some("**Assistant:** Partial answer"));
        assert_eq!(f.response.appended()[0], settings.stream_interrupted_message);
        assert!(f
            .response
            .appended()
            .iter()
            .all(|notice| !notice.contains("Retrying")));
    }

    #[tokio::test]
    async fn test_format_anomaly_is_not_rendered() {
        let f = fixture();
        let pipeline = Arc::new(
            MemoryPipeline::new()
                .with_items(vec![Err(PipelineError::FormatAnomaly("frame".into()))])
                .answering("Recovered."),
        );
        let outcome = orchestrator(&pipeline)
            .process_question(&f.session, QUESTION, AnswerStyle::Concise, &f.surface)
            .await
            .unwrap();
        assert!(f.response.errors().is_empty());
        assert_eq!(outcome.text, "Recovered.");
    }

    #[tokio::test]
    async fn test_other_stages_go_to_debug_view() {
        let f = fixture();
        let pipeline = Arc::new(
            MemoryPipeline::new()
                .with_items(vec![
                    Ok(StageEvent::single("retrieve", json!({"documents": []}))),
                    Ok(StageEvent::generation_chunk("Done")),
                ])
                .with_debug_lines(&["router: vectorstore"]),
        );
        orchestrator(&pipeline)
            .process_question(&f.session, QUESTION, AnswerStyle::Concise, &f.surface)
            .await
            .unwrap();

        let ops = f.debug.ops();
        assert!(matches!(&ops[0], crate::memory::RegionOp::Text { label, .. } if label == DEBUG_LABEL));
        let log = f.debug.current().unwrap();
        assert!(log.contains("router: vectorstore"));
        assert!(log.contains("stage: retrieve"));
    }

    #[tokio::test]
    async fn test_closed_region_stops_without_fallback() {
        let f = fixture();
        f.response.close();
        let pipeline = Arc::new(
            MemoryPipeline::new()
                .with_chunks(&["Partial", " answer"])
                .answering("unused"),
        );
        let outcome = orchestrator(&pipeline)
            .process_question(&f.session, QUESTION, AnswerStyle::Concise, &f.surface)
            .await
            .unwrap();

        assert!(outcome.stopped);
        assert_eq!(outcome.chunks, 1);
        assert_eq!(outcome.text, "Partial");
        assert!(!outcome.fallback_attempted);
        assert_eq!(pipeline.invoke_calls(), 0);
        assert_eq!(f.session.messages().unwrap()[1].content, "Partial");
    }

    #[tokio::test]
    async fn test_tokens_render_through_adapter() {
        let f = fixture();
        let pipeline = Arc::new(
            MemoryPipeline::new()
                .with_tokens(&["To", " register"])
                .with_chunks(&["To register"]),
        );
        orchestrator(&pipeline)
            .process_question(&f.session, QUESTION, AnswerStyle::Concise, &f.surface)
            .await
            .unwrap();
        assert_eq!(f.tokens.current().as_deref(), Some("**Assistant:** To register"));
    }

    #[tokio::test]
    async fn test_token_text_kept_when_fallback_is_suppressed() {
        let f = fixture();
        let pipeline = Arc::new(
            MemoryPipeline::new()
                .with_tokens(&["Only", " tokens"])
                .with_invoke(Err(PipelineError::Failed("down".into()))),
        );
        let outcome = orchestrator(&pipeline)
            .process_question(&f.session, QUESTION, AnswerStyle::Concise, &f.surface)
            .await
            .unwrap();
        assert!(outcome.fallback_attempted);
        assert_eq!(outcome.source, AnswerSource::Tokens);
        assert_eq!(outcome.text, "Only tokens");
    }

    #[tokio::test]
    async fn test_timer_hidden_when_disabled() {
        let f = fixture();
        f.session.set_show_timer(false).unwrap();
        let pipeline = Arc::new(MemoryPipeline::new().with_chunks(&["ok"]));
        orchestrator(&pipeline)
            .process_question(&f.session, QUESTION, AnswerStyle::Concise, &f.surface)
            .await
            .unwrap();
        assert!(f.response.appended().is_empty());
        assert!(f.session.last_generation_secs().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_followup_generation_bumped_per_turn() {
        let f = fixture();
        let pipeline = Arc::new(MemoryPipeline::new().with_chunks(&["ok"]));
        let orchestrator = orchestrator(&pipeline);
        for _ in 0..2 {
            orchestrator
                .process_question(&f.session, QUESTION, AnswerStyle::Concise, &f.surface)
                .await
                .unwrap();
        }
        assert_eq!(f.session.followup_generation().unwrap(), 2);
        let roles: Vec<_> = f.session.messages().unwrap().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);
    }
}
