//! In-memory collaborators: a scripted pipeline, canned chat models and a
//! recording output region. Used by tests and by offline runs.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use bizguide_core::types::{GenerationRequest, StageEvent, StageResult};

use crate::error::{ModelError, PipelineError, RenderError};
use crate::followup::{ChatModel, ModelFactory};
use crate::output::OutputRegion;
use crate::pipeline::{GenerationPipeline, StageStream, StreamOptions};

// =============================================================================
// MemoryPipeline
// =============================================================================

/// Pipeline that replays a fixed script.
///
/// Every `stream` call yields the same items. Tokens, if configured, are fired
/// through the callbacks from a blocking-pool thread before the first item.
pub struct MemoryPipeline {
    items: Vec<Result<StageEvent, PipelineError>>,
    open_error: Option<PipelineError>,
    tokens: Vec<String>,
    debug_lines: Vec<String>,
    invoke_result: Result<StageResult, PipelineError>,
    stream_calls: AtomicUsize,
    invoke_calls: AtomicUsize,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl Default for MemoryPipeline {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            open_error: None,
            tokens: Vec::new(),
            debug_lines: Vec::new(),
            invoke_result: Ok(StageEvent::new()),
            stream_calls: AtomicUsize::new(0),
            invoke_calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl MemoryPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stream one `generate` chunk per entry.
    pub fn with_chunks(mut self, chunks: &[&str]) -> Self {
        self.items = chunks
            .iter()
            .map(|chunk| Ok(StageEvent::generation_chunk(*chunk)))
            .collect();
        self
    }

    pub fn with_items(mut self, items: Vec<Result<StageEvent, PipelineError>>) -> Self {
        self.items = items;
        self
    }

    /// Make `stream` itself fail before yielding anything.
    pub fn failing_to_open(mut self, error: PipelineError) -> Self {
        self.open_error = Some(error);
        self
    }

    pub fn with_tokens(mut self, tokens: &[&str]) -> Self {
        self.tokens = tokens.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_debug_lines(mut self, lines: &[&str]) -> Self {
        self.debug_lines = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    /// Blocking calls answer with `text`.
    pub fn answering(mut self, text: &str) -> Self {
        self.invoke_result = Ok(StageEvent::generation_chunk(text));
        self
    }

    pub fn with_invoke(mut self, result: Result<StageResult, PipelineError>) -> Self {
        self.invoke_result = result;
        self
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn invoke_calls(&self) -> usize {
        self.invoke_calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    fn record(&self, request: &GenerationRequest) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
    }
}

#[async_trait]
impl GenerationPipeline for MemoryPipeline {
    async fn stream(
        &self,
        request: &GenerationRequest,
        options: StreamOptions,
    ) -> Result<StageStream, PipelineError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.record(request);
        for line in &self.debug_lines {
            options.debug_log.line(line);
        }
        if let Some(error) = &self.open_error {
            return Err(error.clone());
        }

        if !self.tokens.is_empty() {
            let tokens = self.tokens.clone();
            tokio::task::spawn_blocking(move || {
                options.generation_started();
                for token in &tokens {
                    options.token(token);
                }
                options.generation_ended();
            })
            .await
            .map_err(|e| PipelineError::Failed(format!("token worker failed: {}", e)))?;
        }

        Ok(stream::iter(self.items.clone()).boxed())
    }

    async fn invoke(&self, request: &GenerationRequest) -> Result<StageResult, PipelineError> {
        self.invoke_calls.fetch_add(1, Ordering::SeqCst);
        self.record(request);
        self.invoke_result.clone()
    }
}

// =============================================================================
// MemoryModel
// =============================================================================

/// Chat model returning a canned completion.
pub struct MemoryModel {
    id: String,
    reply: Result<String, ModelError>,
    prompts: Mutex<Vec<String>>,
}

impl MemoryModel {
    pub fn replying(id: &str, reply: &str) -> Self {
        Self {
            id: id.to_string(),
            reply: Ok(reply.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(id: &str, error: ModelError) -> Self {
        Self {
            id: id.to_string(),
            reply: Err(error),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|prompts| prompts.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChatModel for MemoryModel {
    fn model_id(&self) -> &str {
        &self.id
    }

    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        self.reply.clone()
    }
}

// =============================================================================
// MemoryModels
// =============================================================================

/// Model factory handing out registered [`MemoryModel`]s by identifier.
///
/// Unknown identifiers get a model that fails every call. Each build is
/// recorded with its temperature.
#[derive(Default)]
pub struct MemoryModels {
    models: Vec<Arc<MemoryModel>>,
    built: Mutex<Vec<(String, f32)>>,
}

impl MemoryModels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, model: Arc<MemoryModel>) -> Self {
        self.models.push(model);
        self
    }

    /// Identifiers and temperatures built so far, oldest first.
    pub fn built(&self) -> Vec<(String, f32)> {
        self.built
            .lock()
            .map(|built| built.clone())
            .unwrap_or_default()
    }
}

impl ModelFactory for MemoryModels {
    fn build(&self, model: &str, temperature: f32) -> Arc<dyn ChatModel> {
        if let Ok(mut built) = self.built.lock() {
            built.push((model.to_string(), temperature));
        }
        match self.models.iter().find(|m| m.model_id() == model) {
            Some(registered) => registered.clone(),
            None => Arc::new(MemoryModel::failing(
                model,
                ModelError::Request(format!("unknown model {}", model)),
            )),
        }
    }
}

// =============================================================================
// RecordingRegion
// =============================================================================

/// One render applied to a [`RecordingRegion`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionOp {
    Markdown(String),
    Error(String),
    Append(String),
    Text { label: String, content: String },
}

/// Output region that records every render. Once closed, renders fail with
/// [`RenderError::Closed`].
#[derive(Debug, Default)]
pub struct RecordingRegion {
    ops: Mutex<Vec<RegionOp>>,
    closed: AtomicBool,
}

impl RecordingRegion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn ops(&self) -> Vec<RegionOp> {
        self.ops.lock().map(|ops| ops.clone()).unwrap_or_default()
    }

    /// Content of the latest replacing render.
    pub fn current(&self) -> Option<String> {
        self.ops().into_iter().rev().find_map(|op| match op {
            RegionOp::Markdown(content) | RegionOp::Error(content) => Some(content),
            RegionOp::Text { content, .. } => Some(content),
            RegionOp::Append(_) => None,
        })
    }

    pub fn errors(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                RegionOp::Error(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn appended(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                RegionOp::Append(content) => Some(content),
                _ => None,
            })
            .collect()
    }

    fn push(&self, op: RegionOp) -> Result<(), RenderError> {
        if self.is_closed() {
            return Err(RenderError::Closed);
        }
        if let Ok(mut ops) = self.ops.lock() {
            ops.push(op);
        }
        Ok(())
    }
}

impl OutputRegion for RecordingRegion {
    fn markdown(&self, content: &str) -> Result<(), RenderError> {
        self.push(RegionOp::Markdown(content.to_string()))
    }

    fn error(&self, message: &str) -> Result<(), RenderError> {
        self.push(RegionOp::Error(message.to_string()))
    }

    fn append(&self, content: &str) -> Result<(), RenderError> {
        self.push(RegionOp::Append(content.to_string()))
    }

    fn text(&self, label: &str, content: &str) -> Result<(), RenderError> {
        self.push(RegionOp::Text {
            label: label.to_string(),
            content: content.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::DebugLog;
    use bizguide_core::types::AnswerStyle;

    fn request() -> GenerationRequest {
        GenerationRequest::new("Q", false, true, AnswerStyle::Concise)
    }

    #[tokio::test]
    async fn test_pipeline_replays_script_per_call() {
        let pipeline = MemoryPipeline::new().with_chunks(&["a", "b"]);
        for _ in 0..2 {
            let events: Vec<_> = pipeline
                .stream(&request(), StreamOptions::default())
                .await
                .unwrap()
                .collect()
                .await;
            assert_eq!(events.len(), 2);
        }
        assert_eq!(pipeline.stream_calls(), 2);
        assert_eq!(pipeline.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_pipeline_writes_debug_lines() {
        let pipeline = MemoryPipeline::new().with_debug_lines(&["route: web"]);
        let log = DebugLog::new();
        let _ = pipeline.stream(&request(), StreamOptions::new(log.clone())).await;
        assert_eq!(log.snapshot(), "route: web\n");
    }

    #[tokio::test]
    async fn test_pipeline_open_error_and_invoke() {
        let pipeline = MemoryPipeline::new()
            .failing_to_open(PipelineError::StreamClosed("eof".into()))
            .answering("done");
        assert!(pipeline.stream(&request(), StreamOptions::default()).await.is_err());
        let result = pipeline.invoke(&request()).await.unwrap();
        assert_eq!(result.generation(), Some("done"));
        assert_eq!(pipeline.invoke_calls(), 1);
    }

    #[test]
    fn test_recording_region() {
        let region = RecordingRegion::new();
        region.markdown("a").unwrap();
        region.append("b").unwrap();
        region.error("c").unwrap();
        assert_eq!(region.current().as_deref(), Some("c"));
        assert_eq!(region.appended(), vec!["b"]);
        assert_eq!(region.errors(), vec!["c"]);

        region.close();
        assert_eq!(region.markdown("d"), Err(RenderError::Closed));
        assert_eq!(region.ops().len(), 3);
    }
}
