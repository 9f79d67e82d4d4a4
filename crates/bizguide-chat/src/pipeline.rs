//! Seam to the external answer-generation pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use bizguide_core::types::{GenerationRequest, StageEvent, StageResult};

use crate::error::PipelineError;
use crate::output::DebugLog;

/// Lifecycle hooks the pipeline fires while it generates.
///
/// Hooks may run on any thread or task. All methods default to no-ops.
pub trait GenerationCallbacks: Send + Sync {
    fn on_generation_start(&self) {}

    fn on_token(&self, _token: &str) {}

    fn on_generation_end(&self) {}
}

/// Options accompanying a streaming call.
#[derive(Clone, Default)]
pub struct StreamOptions {
    pub callbacks: Vec<Arc<dyn GenerationCallbacks>>,
    /// Where the pipeline writes its internal diagnostics.
    pub debug_log: DebugLog,
}

impl StreamOptions {
    pub fn new(debug_log: DebugLog) -> Self {
        Self {
            callbacks: Vec::new(),
            debug_log,
        }
    }

    pub fn with_callback(mut self, callback: Arc<dyn GenerationCallbacks>) -> Self {
        self.callbacks.push(callback);
        self
    }

    pub fn generation_started(&self) {
        for callback in &self.callbacks {
            callback.on_generation_start();
        }
    }

    pub fn token(&self, token: &str) {
        for callback in &self.callbacks {
            callback.on_token(token);
        }
    }

    pub fn generation_ended(&self) {
        for callback in &self.callbacks {
            callback.on_generation_end();
        }
    }
}

/// Finite, non-restartable sequence of stage events.
pub type StageStream = BoxStream<'static, Result<StageEvent, PipelineError>>;

/// The answer pipeline: one streaming and one blocking entry point over the
/// same request shape.
#[async_trait]
pub trait GenerationPipeline: Send + Sync {
    async fn stream(
        &self,
        request: &GenerationRequest,
        options: StreamOptions,
    ) -> Result<StageStream, PipelineError>;

    async fn invoke(&self, request: &GenerationRequest) -> Result<StageResult, PipelineError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Trace(Mutex<Vec<String>>);

    impl GenerationCallbacks for Trace {
        fn on_generation_start(&self) {
            self.0.lock().unwrap().push("start".into());
        }

        fn on_token(&self, token: &str) {
            self.0.lock().unwrap().push(format!("token:{}", token));
        }

        fn on_generation_end(&self) {
            self.0.lock().unwrap().push("end".into());
        }
    }

    struct Silent;
    impl GenerationCallbacks for Silent {}

    #[test]
    fn test_options_fan_out_to_every_callback() {
        let first = Arc::new(Trace::default());
        let second = Arc::new(Trace::default());
        let options = StreamOptions::new(DebugLog::new())
            .with_callback(first.clone())
            .with_callback(second.clone())
            .with_callback(Arc::new(Silent));

        options.generation_started();
        options.token("To");
        options.generation_ended();

        for trace in [first, second] {
            assert_eq!(*trace.0.lock().unwrap(), vec!["start", "token:To", "end"]);
        }
    }
}
