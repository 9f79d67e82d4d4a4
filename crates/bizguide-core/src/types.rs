//! Shared domain types: conversation messages, generation requests, and the
//! stage-keyed events produced by the answer pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Stage name whose payload carries answer text.
pub const GENERATE_STAGE: &str = "generate";

/// Field inside the `generate` stage holding the incremental answer text.
pub const GENERATION_FIELD: &str = "generation";

// =============================================================================
// Messages
// =============================================================================

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One entry of the conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Empty assistant slot inserted before streaming starts.
    pub fn placeholder() -> Self {
        Self::assistant(String::new())
    }
}

// =============================================================================
// AnswerStyle
// =============================================================================

/// Requested verbosity of the generated answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AnswerStyle {
    Concise,
    Moderate,
    #[default]
    Explanatory,
}

impl AnswerStyle {
    pub const ALL: [AnswerStyle; 3] = [
        AnswerStyle::Concise,
        AnswerStyle::Moderate,
        AnswerStyle::Explanatory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerStyle::Concise => "Concise",
            AnswerStyle::Moderate => "Moderate",
            AnswerStyle::Explanatory => "Explanatory",
        }
    }
}

impl fmt::Display for AnswerStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnswerStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "concise" => Ok(AnswerStyle::Concise),
            "moderate" => Ok(AnswerStyle::Moderate),
            "explanatory" => Ok(AnswerStyle::Explanatory),
            other => Err(format!("unknown answer style: {}", other)),
        }
    }
}

// =============================================================================
// GenerationRequest
// =============================================================================

/// Input record for one pipeline call. One instance per user-visible turn.
///
/// Fields are private so the request cannot change after construction; the
/// serialized shape is what the pipeline receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    question: String,
    hybrid_search: bool,
    internet_search: bool,
    answer_style: AnswerStyle,
}

impl GenerationRequest {
    pub fn new(
        question: impl Into<String>,
        hybrid_search: bool,
        internet_search: bool,
        answer_style: AnswerStyle,
    ) -> Self {
        Self {
            question: question.into(),
            hybrid_search,
            internet_search,
            answer_style,
        }
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn hybrid_search(&self) -> bool {
        self.hybrid_search
    }

    pub fn internet_search(&self) -> bool {
        self.internet_search
    }

    pub fn answer_style(&self) -> AnswerStyle {
        self.answer_style
    }
}

// =============================================================================
// StageEvent
// =============================================================================

/// One named-stage record from the pipeline: a mapping from stage name to
/// that stage's payload.
///
/// Only `generate.generation` is interpreted; every other stage is opaque.
/// The blocking entry point returns the same shape, see [`StageResult`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageEvent(Map<String, Value>);

/// Result of a blocking pipeline call.
pub type StageResult = StageEvent;

impl StageEvent {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build an event holding a single stage.
    pub fn single(stage: impl Into<String>, payload: Value) -> Self {
        let mut map = Map::new();
        map.insert(stage.into(), payload);
        Self(map)
    }

    /// Build a `generate` stage event carrying `text`.
    pub fn generation_chunk(text: impl Into<String>) -> Self {
        let mut payload = Map::new();
        payload.insert(GENERATION_FIELD.to_string(), Value::String(text.into()));
        Self::single(GENERATE_STAGE, Value::Object(payload))
    }

    /// Parse an event from a JSON value. Non-object values yield `None`.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn stage(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Answer text carried by the `generate` stage, if any.
    ///
    /// A `generation` field that is not a string counts as absent.
    pub fn generation(&self) -> Option<&str> {
        self.0
            .get(GENERATE_STAGE)
            .and_then(|stage| stage.get(GENERATION_FIELD))
            .and_then(Value::as_str)
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for StageEvent {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
