//! Answer pipeline served over HTTP.
//!
//! `POST {base}/stream` answers with server-sent events, one `data` frame per
//! stage event. `POST {base}/invoke` answers with `{"output": <stage result>}`.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use bizguide_chat::error::PipelineError;
use bizguide_chat::pipeline::{GenerationPipeline, StageStream, StreamOptions};
use bizguide_core::config::RemoteConfig;
use bizguide_core::types::{GenerationRequest, StageEvent, StageResult};

use crate::error::{classify_message, RemoteError};
use crate::sse::{SseFrame, SseStreamParser};

const STREAM_BUFFER: usize = 64;

#[derive(Serialize)]
struct PipelinePayload<'a> {
    input: &'a GenerationRequest,
    config: Value,
}

impl<'a> PipelinePayload<'a> {
    fn new(input: &'a GenerationRequest) -> Self {
        Self {
            input,
            config: Value::Object(Default::default()),
        }
    }
}

#[derive(Deserialize)]
struct InvokeResponse {
    output: Value,
}

#[derive(Debug, Clone)]
pub struct HttpPipeline {
    http: Client,
    base_url: String,
    invoke_timeout: Duration,
}

impl HttpPipeline {
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let http = Client::builder().build()?;
        Ok(Self::with_client(
            http,
            &config.pipeline_url,
            Duration::from_secs(config.request_timeout_secs),
        ))
    }

    pub fn with_client(http: Client, base_url: &str, invoke_timeout: Duration) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            invoke_timeout,
        }
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

async fn check_status(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        body
    };
    Err(RemoteError::Status {
        status: status.as_u16(),
        message,
    })
}

/// Read SSE frames off `response` and forward stage events until the stream
/// ends, fails, or the receiver goes away.
async fn pump(
    response: Response,
    options: StreamOptions,
    tx: mpsc::Sender<Result<StageEvent, PipelineError>>,
) {
    options.generation_started();
    let mut bytes = response.bytes_stream();
    let mut parser = SseStreamParser::default();
    let mut events = 0usize;

    'pump: loop {
        let (frames, done) = match bytes.next().await {
            Some(Ok(chunk)) => (parser.feed(&chunk), false),
            Some(Err(e)) => {
                let _ = tx.send(Err(RemoteError::from(e).into())).await;
                break;
            }
            None => (parser.finish(), true),
        };

        for frame in frames {
            let item = match frame {
                SseFrame::Data(value) => match StageEvent::from_value(value) {
                    Some(event) => {
                        if let Some(token) = event.generation() {
                            options.token(token);
                        }
                        events += 1;
                        Ok(event)
                    }
                    None => {
                        options.debug_log.line("pipeline: skipped non-object data frame");
                        continue;
                    }
                },
                SseFrame::Error(message) => Err(classify_message(&message)),
                SseFrame::Malformed(detail) => Err(PipelineError::FormatAnomaly(detail)),
                SseFrame::End => break 'pump,
            };
            let failed = item.is_err();
            if tx.send(item).await.is_err() {
                tracing::debug!("Stream receiver dropped");
                break 'pump;
            }
            if failed {
                break 'pump;
            }
        }

        if done {
            break;
        }
    }

    options.debug_log.line(format!("pipeline: stream finished after {} events", events));
    options.generation_ended();
}

#[async_trait]
impl GenerationPipeline for HttpPipeline {
    async fn stream(
        &self,
        request: &GenerationRequest,
        options: StreamOptions,
    ) -> Result<StageStream, PipelineError> {
        let url = self.endpoint("stream");
        tracing::debug!(url = %url, "Opening pipeline stream");
        options.debug_log.line(format!("pipeline: POST {}", url));

        let response = self
            .http
            .post(&url)
            .header(ACCEPT, "text/event-stream")
            .json(&PipelinePayload::new(request))
            .send()
            .await
            .map_err(RemoteError::from)?;
        let response = check_status(response).await?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(pump(response, options, tx));
        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn invoke(&self, request: &GenerationRequest) -> Result<StageResult, PipelineError> {
        let url = self.endpoint("invoke");
        tracing::debug!(url = %url, "Invoking pipeline");

        let response = self
            .http
            .post(&url)
            .timeout(self.invoke_timeout)
            .json(&PipelinePayload::new(request))
            .send()
            .await
            .map_err(RemoteError::from)?;
        let response = check_status(response).await?;
        let body: InvokeResponse = response.json().await.map_err(RemoteError::from)?;

        StageEvent::from_value(body.output).ok_or_else(|| {
            RemoteError::InvalidResponse("invoke output is not an object".to_string()).into()
        })
    }
}
