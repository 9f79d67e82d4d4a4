//! Follow-up question generation for the latest exchange.

use std::sync::{Arc, LazyLock, Mutex, MutexGuard};

use async_trait::async_trait;
use regex::Regex;

use bizguide_core::config::ModelsConfig;

use crate::error::{ChatError, ModelError};
use crate::session::Session;

/// Follow-ups kept per exchange.
pub const MAX_FOLLOWUPS: usize = 3;

/// Temperature of the generation model when it proposes follow-ups itself.
pub const PRIMARY_TEMPERATURE: f32 = 0.0;

static ENUMERATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\d+[.)]\s*").expect("Invalid enumeration regex"));

/// Answers containing one of these never get follow-ups.
const DEFAULT_SUPPRESS_MARKERS: [&str; 2] = [
    "Sorry, I encountered an error",
    "I apologize, but I'm designed to answer questions",
];

/// A single-shot text completion model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_id(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String, ModelError>;
}

// =============================================================================
// Model routing
// =============================================================================

/// Routing decision for follow-up calls, made once per selected model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSelection {
    pub primary: String,
    /// Whether `primary` reliably supports single-shot completion.
    pub single_shot: bool,
    pub alternate: String,
    pub alternate_temperature: f32,
}

impl ModelSelection {
    pub fn resolve(models: &ModelsConfig, primary: &str) -> Self {
        let single_shot = models.capability(primary).single_shot;
        if !single_shot {
            tracing::info!(
                primary,
                alternate = %models.followup_fallback_model,
                "Follow-ups routed to alternate model"
            );
        }
        Self {
            primary: primary.to_string(),
            single_shot,
            alternate: models.followup_fallback_model.clone(),
            alternate_temperature: models.followup_temperature,
        }
    }

    pub fn uses_alternate(&self) -> bool {
        !self.single_shot
    }

    /// Model that answers follow-up prompts.
    pub fn followup_model(&self) -> &str {
        if self.uses_alternate() {
            &self.alternate
        } else {
            &self.primary
        }
    }
}

// =============================================================================
// Prompt and parsing
// =============================================================================

/// Prompt asking for three follow-up questions about one exchange.
pub fn followup_prompt(last_user: &str, last_assistant: &str) -> String {
    format!(
        "Based on the conversation below:\n\
         User: {}\n\
         Assistant: {}\n\
         Generate three concise follow-up questions that a user might ask next.\n\
         Each question should be on a separate line. The generated questions should be \
         independent and can be answered without knowing the last question. Focus on brevity.\n\
         Follow-up Questions:",
        last_user, last_assistant
    )
}

/// First three non-empty trimmed lines of a completion.
pub fn parse_followups(completion: &str) -> Vec<String> {
    completion
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .take(MAX_FOLLOWUPS)
        .map(str::to_string)
        .collect()
}

/// Remove a leading `1.` / `2)` style enumeration.
pub fn strip_enumeration(question: &str) -> String {
    ENUMERATION.replace(question, "").trim().to_string()
}

/// A selectable follow-up question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowupPrompt {
    /// Question text with any enumeration removed. Selecting the prompt
    /// submits this text.
    pub label: String,
    /// Distinct per turn and position.
    pub handle: String,
}

impl FollowupPrompt {
    pub fn new(index: usize, generation: u64, question: &str) -> Self {
        Self {
            label: strip_enumeration(question),
            handle: format!("followup_{}_{}", index, generation),
        }
    }

    /// Queue this prompt as the next question.
    pub fn choose(&self, session: &Session) -> Result<(), ChatError> {
        session.queue_question(&self.label)
    }
}

// =============================================================================
// FollowupGenerator
// =============================================================================

/// Builds a chat model client for a model identifier.
pub trait ModelFactory: Send + Sync {
    fn build(&self, model: &str, temperature: f32) -> Arc<dyn ChatModel>;
}

/// The resolved selection and the client it routes to.
struct Route {
    selection: ModelSelection,
    model: Arc<dyn ChatModel>,
}

pub struct FollowupGenerator {
    factory: Arc<dyn ModelFactory>,
    models: ModelsConfig,
    route: Mutex<Option<Route>>,
    suppress_markers: Vec<String>,
}

impl FollowupGenerator {
    pub fn new(factory: Arc<dyn ModelFactory>, models: ModelsConfig) -> Self {
        Self {
            factory,
            models,
            route: Mutex::new(None),
            suppress_markers: DEFAULT_SUPPRESS_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }

    /// Also suppress answers containing `marker`. Blank markers are ignored.
    pub fn with_suppress_marker(mut self, marker: impl Into<String>) -> Self {
        let marker = marker.into();
        if !marker.trim().is_empty() {
            self.suppress_markers.push(marker);
        }
        self
    }

    fn lock_route(&self) -> MutexGuard<'_, Option<Route>> {
        self.route.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Route follow-ups for `primary` and return the model answering them.
    ///
    /// Resolution and client construction happen only when `primary` differs
    /// from the current selection.
    pub fn select(&self, primary: &str) -> Arc<dyn ChatModel> {
        let mut route = self.lock_route();
        if let Some(current) = route.as_ref().filter(|r| r.selection.primary == primary) {
            return current.model.clone();
        }

        let selection = ModelSelection::resolve(&self.models, primary);
        let model = if selection.uses_alternate() {
            self.factory
                .build(&selection.alternate, selection.alternate_temperature)
        } else {
            self.factory.build(&selection.primary, PRIMARY_TEMPERATURE)
        };
        tracing::debug!(primary, followups = model.model_id(), "Follow-up model selected");
        *route = Some(Route {
            selection,
            model: model.clone(),
        });
        model
    }

    /// Current routing decision, if a model was selected.
    pub fn selection(&self) -> Option<ModelSelection> {
        self.lock_route().as_ref().map(|r| r.selection.clone())
    }

    fn model(&self) -> Arc<dyn ChatModel> {
        let current = self.lock_route().as_ref().map(|r| r.model.clone());
        current.unwrap_or_else(|| self.select(&self.models.generation_model))
    }

    /// Whether `assistant` is an answer that should never get follow-ups.
    pub fn is_suppressed(&self, assistant: &str) -> bool {
        assistant.trim().is_empty()
            || self
                .suppress_markers
                .iter()
                .any(|marker| assistant.contains(marker.as_str()))
    }

    /// Up to three follow-up questions from the currently selected model.
    /// Failures yield an empty list.
    pub async fn get_followup_questions(
        &self,
        last_user: &str,
        last_assistant: &str,
    ) -> Vec<String> {
        if last_assistant.trim().is_empty() {
            return Vec::new();
        }

        let model = self.model();
        let prompt = followup_prompt(last_user, last_assistant);
        match model.complete(&prompt).await {
            Ok(completion) => {
                let questions = parse_followups(&completion);
                tracing::debug!(model = model.model_id(), count = questions.len(), "Follow-ups generated");
                questions
            }
            Err(e) => {
                tracing::warn!(model = model.model_id(), error = %e, "Follow-up generation failed");
                Vec::new()
            }
        }
    }

    /// Regenerate follow-ups if the last committed answer changed since the
    /// previous inspection, then return the prompts to display.
    ///
    /// Follow-ups come from the model selected in the session. An unchanged
    /// answer never triggers a model call.
    pub async fn refresh(&self, session: &Session) -> Result<Vec<FollowupPrompt>, ChatError> {
        let Some((user, assistant)) = session.last_exchange()? else {
            return Ok(Vec::new());
        };

        if session.last_assistant()?.as_deref() != Some(assistant.as_str()) {
            session.set_last_assistant(Some(&assistant))?;
            let questions = if self.is_suppressed(&assistant) {
                Vec::new()
            } else {
                let selected = session
                    .selected_model()?
                    .unwrap_or_else(|| self.models.generation_model.clone());
                self.select(&selected);
                self.get_followup_questions(&user, &assistant).await
            };
            session.set_followup_questions(&questions)?;
        }

        if self.is_suppressed(&assistant) {
            return Ok(Vec::new());
        }

        let generation = session.followup_generation()?;
        Ok(session
            .followup_questions()?
            .iter()
            .enumerate()
            .map(|(i, question)| FollowupPrompt::new(i, generation, question))
            .collect())
    }
}
