//! End-to-end turns across reruns, driven through `ScriptRun` with in-memory
//! collaborators.

use std::sync::Arc;

use bizguide_chat::memory::{MemoryModel, MemoryModels, MemoryPipeline, RecordingRegion};
use bizguide_chat::{
    AnswerSource, ChatModel, ContextBound, FollowupGenerator, PipelineError, RunContext,
    RunInput, ScriptRun, Session, SessionStore, StreamingOrchestrator, SurfaceFactory,
    TurnSurface,
};
use bizguide_core::config::{ChatSettings, ModelsConfig};
use bizguide_core::{GuideContext, Role};

const QUESTION: &str = "How do I register a company in Finland?";

/// Regions shared across turns, each bound to the run that opened it.
#[derive(Default)]
struct Surfaces {
    response: Arc<RecordingRegion>,
    tokens: Arc<RecordingRegion>,
}

impl SurfaceFactory for Surfaces {
    fn open_turn(&self) -> TurnSurface {
        let owner = RunContext::current().unwrap_or_default();
        TurnSurface {
            question: Arc::new(RecordingRegion::new()),
            response: Arc::new(ContextBound::new(owner.clone(), self.response.clone())),
            tokens: Arc::new(ContextBound::new(owner, self.tokens.clone())),
            debug: Arc::new(RecordingRegion::new()),
        }
    }
}

struct Harness {
    run: ScriptRun,
    pipeline: Arc<MemoryPipeline>,
    model: Arc<MemoryModel>,
    alternate: Arc<MemoryModel>,
    session: Session,
    surfaces: Surfaces,
}

fn harness(pipeline: MemoryPipeline, country: GuideContext) -> Harness {
    let model = MemoryModel::replying(
        "gpt-4o",
        "1. What does it cost?\n2. How long does it take?\n3. Can I do it online?\n4. Extra?",
    );
    harness_with_models(pipeline, country, model, MemoryModel::replying("gpt-4o-mini", ""))
}

fn harness_with_models(
    pipeline: MemoryPipeline,
    country: GuideContext,
    primary: MemoryModel,
    alternate: MemoryModel,
) -> Harness {
    let settings = ChatSettings::default();
    let models = ModelsConfig {
        generation_model: primary.model_id().to_string(),
        ..ModelsConfig::default()
    };
    let pipeline = Arc::new(pipeline);
    let model = Arc::new(primary);
    let alternate = Arc::new(alternate);

    let orchestrator = Arc::new(StreamingOrchestrator::new(pipeline.clone(), settings.clone()));
    let factory = MemoryModels::new()
        .with(model.clone())
        .with(alternate.clone());
    let followups = Arc::new(FollowupGenerator::new(Arc::new(factory), models.clone()));
    let run = ScriptRun::new(orchestrator, followups, settings, models);

    let session = Arc::new(SessionStore::new()).session("turn-flow");
    session.select_context(country).unwrap();

    Harness {
        run,
        pipeline,
        model,
        alternate,
        session,
        surfaces: Surfaces::default(),
    }
}

impl Harness {
    async fn ask(&self, question: &str) -> bizguide_chat::RunReport {
        self.run
            .execute(&self.session, RunInput::typed(question), &self.surfaces)
            .await
            .unwrap()
    }

    async fn rerun(&self) -> bizguide_chat::RunReport {
        self.run
            .execute(&self.session, RunInput::idle(), &self.surfaces)
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn streamed_answer_is_committed_without_fallback() {
    let h = harness(
        MemoryPipeline::new().with_chunks(&["To", " register..."]),
        GuideContext::Finland,
    );
    let report = h.ask(QUESTION).await;

    let turn = &report.turns[0];
    assert_eq!(turn.source, AnswerSource::Streamed);
    assert_eq!(turn.text, "To register...");
    assert_eq!(h.pipeline.invoke_calls(), 0);

    let messages = h.session.messages().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[1].content, "To register...");
    assert!(h.surfaces.response.appended()[0].starts_with("*Generation time: "));
}

#[tokio::test]
async fn connection_closed_before_any_chunk_uses_fallback() {
    let h = harness(
        MemoryPipeline::new()
            .with_items(vec![Err(PipelineError::StreamClosed("connection reset".into()))])
            .answering("Register with the [Trade Register]."),
        GuideContext::Finland,
    );
    let report = h.ask(QUESTION).await;

    assert_eq!(h.pipeline.invoke_calls(), 1);
    assert_eq!(report.turns[0].source, AnswerSource::Fallback);
    assert!(h.surfaces.response.errors().is_empty());
    assert_eq!(
        h.session.messages().unwrap()[1].content,
        "Register with the [Trade Register]."
    );
}

#[tokio::test]
async fn both_paths_failing_commits_apology() {
    let h = harness(
        MemoryPipeline::new()
            .with_items(vec![Err(PipelineError::Failed("upstream 502".into()))])
            .with_invoke(Err(PipelineError::Failed("upstream 502".into()))),
        GuideContext::Finland,
    );
    let report = h.ask(QUESTION).await;
    let apology = ChatSettings::default().apology_message;

    assert_eq!(report.turns[0].text, apology);
    assert_eq!(h.session.messages().unwrap()[1].content, apology);
    assert!(h
        .surfaces
        .response
        .errors()
        .iter()
        .all(|message| !message.contains("upstream 502")));
    assert!(report.followups.is_empty());
    assert_eq!(h.model.calls(), 0);
}

#[tokio::test]
async fn over_long_question_never_reaches_pipeline() {
    let h = harness(MemoryPipeline::new().with_chunks(&["x"]), GuideContext::Finland);
    let report = h.ask(&"q".repeat(201)).await;

    assert!(report.validation_error.is_some());
    assert_eq!(h.pipeline.stream_calls(), 0);
    assert_eq!(h.pipeline.invoke_calls(), 0);
    assert!(h.session.messages().unwrap().is_empty());
}

#[tokio::test]
async fn question_at_limit_is_accepted() {
    let h = harness(MemoryPipeline::new().with_chunks(&["ok"]), GuideContext::Finland);
    h.ask(&"q".repeat(200)).await;
    assert_eq!(h.pipeline.stream_calls(), 1);
    assert_eq!(h.session.messages().unwrap().len(), 2);
}

#[tokio::test]
async fn followups_are_not_regenerated_across_reruns() {
    let h = harness(MemoryPipeline::new().with_chunks(&["Answer"]), GuideContext::Finland);
    let first = h.ask(QUESTION).await;
    assert_eq!(h.model.calls(), 1);
    assert_eq!(first.followups.len(), 3);
    assert_eq!(first.followups[0].label, "What does it cost?");

    for _ in 0..3 {
        let report = h.rerun().await;
        assert_eq!(report.followups, first.followups);
    }
    assert_eq!(h.model.calls(), 1);
    assert_eq!(h.pipeline.stream_calls(), 1);
}

#[tokio::test]
async fn choosing_a_followup_runs_it_on_next_rerun() {
    let h = harness(MemoryPipeline::new().with_chunks(&["Answer"]), GuideContext::Finland);
    let first = h.ask(QUESTION).await;

    first.followups[1].choose(&h.session).unwrap();
    let second = h.rerun().await;

    assert_eq!(second.turns.len(), 1);
    let messages = h.session.messages().unwrap();
    assert_eq!(messages[2].content, "How long does it take?");
    assert_ne!(first.followups[0].handle, second.followups[0].handle);
}

#[tokio::test]
async fn empty_answer_triggers_no_followup_call() {
    let h = harness(
        MemoryPipeline::new().with_invoke(Err(PipelineError::FormatAnomaly("Bad message format".into()))),
        GuideContext::Finland,
    );
    let report = h.ask(QUESTION).await;

    assert_eq!(report.turns[0].source, AnswerSource::Empty);
    assert_eq!(h.session.messages().unwrap()[1].content, "");
    assert!(report.followups.is_empty());
    assert_eq!(h.model.calls(), 0);
}

#[tokio::test]
async fn tokens_from_worker_thread_reach_bound_region() {
    let h = harness(
        MemoryPipeline::new()
            .with_tokens(&["To", " register"])
            .with_chunks(&["To register"]),
        GuideContext::Finland,
    );
    h.ask(QUESTION).await;
    assert_eq!(
        h.surfaces.tokens.current().as_deref(),
        Some("**Assistant:** To register")
    );
}

#[tokio::test]
async fn estonia_forces_web_search() {
    let h = harness(MemoryPipeline::new().with_chunks(&["ok"]), GuideContext::Estonia);
    h.session.set_search_flags(true, false).unwrap();
    h.session.select_context(GuideContext::Estonia).unwrap();
    h.ask("What is e-Residency in Estonia?").await;

    let request = &h.pipeline.requests()[0];
    assert!(!request.hybrid_search());
    assert!(request.internet_search());
}

#[tokio::test]
async fn reset_and_change_context() {
    let h = harness(MemoryPipeline::new().with_chunks(&["ok"]), GuideContext::Finland);
    h.ask(QUESTION).await;

    h.session.reset_chat().unwrap();
    let report = h.rerun().await;
    assert!(report.transcript.is_empty());
    assert_eq!(h.session.guide_context().unwrap(), Some(GuideContext::Finland));

    h.session.change_context().unwrap();
    let report = h.rerun().await;
    assert!(report.needs_context);
}

#[tokio::test]
async fn incapable_primary_routes_followups_to_alternate() {
    let h = harness_with_models(
        MemoryPipeline::new().with_chunks(&["ok"]),
        GuideContext::Finland,
        MemoryModel::replying("gemma2-9b-it", "unused"),
        MemoryModel::replying("gpt-4o-mini", "Q?"),
    );
    let report = h.ask(QUESTION).await;

    assert_eq!(h.model.calls(), 0);
    assert_eq!(h.alternate.calls(), 1);
    assert_eq!(report.followups[0].label, "Q?");
}

#[tokio::test]
async fn country_change_restores_default_model_routing() {
    let h = harness(MemoryPipeline::new().with_chunks(&["ok"]), GuideContext::Finland);
    h.rerun().await;
    h.session.set_selected_model("gemma2-9b-it").unwrap();

    h.ask(QUESTION).await;
    assert_eq!(h.model.calls(), 0);
    assert_eq!(h.alternate.calls(), 1);

    h.session.change_context().unwrap();
    h.session.select_context(GuideContext::Estonia).unwrap();
    h.ask("How do I register a company in Estonia?").await;

    assert_eq!(h.session.selected_model().unwrap().as_deref(), Some("gpt-4o"));
    assert_eq!(h.model.calls(), 1);
    assert_eq!(h.alternate.calls(), 1);
}
