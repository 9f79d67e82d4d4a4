//! Per-client session state that survives full re-executions of the control
//! script.
//!
//! Each session is a flat key-value map of JSON values. Writes replace the
//! whole value under a key; reads return owned copies, so a rendering pass can
//! read while the same turn is still mutating other keys.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use bizguide_core::config::{ChatSettings, ModelsConfig};
use bizguide_core::types::{AnswerStyle, Message, Role};
use bizguide_core::{GuideContext, SearchMode};

use crate::error::ChatError;

/// Well-known session keys.
pub mod keys {
    pub const MESSAGES: &str = "messages";
    pub const PENDING_FOLLOWUP: &str = "pending_followup";
    pub const LAST_ASSISTANT: &str = "last_assistant";
    pub const FOLLOWUP_QUESTIONS: &str = "followup_questions";
    pub const FOLLOWUP_GENERATION: &str = "followup_key";
    pub const LAST_GENERATION_SECS: &str = "generation_time";
    pub const ANSWER_STYLE: &str = "answer_style";
    pub const HYBRID_SEARCH: &str = "hybrid_search";
    pub const INTERNET_SEARCH: &str = "internet_search";
    pub const SHOW_TIMER: &str = "show_timer";
    pub const SELECTED_MODEL: &str = "selected_model";
    pub const CONTEXT: &str = "context";
}

// =============================================================================
// SessionStore
// =============================================================================

/// All sessions known to the host, keyed by client session identifier.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Map<String, Value>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the session `id`. The session is created on first write.
    pub fn session(self: &Arc<Self>, id: impl Into<String>) -> Session {
        Session {
            store: Arc::clone(self),
            id: id.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_state<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Map<String, Value>) -> T,
    ) -> Result<T, ChatError> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|e| ChatError::Session(format!("session lock poisoned: {}", e)))?;
        Ok(f(sessions.entry(id.to_string()).or_default()))
    }
}

// =============================================================================
// Session
// =============================================================================

/// One client's session.
#[derive(Debug, Clone)]
pub struct Session {
    store: Arc<SessionStore>,
    id: String,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Value under `key`. Absent keys and JSON `null` both read as `None`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ChatError> {
        let raw = self.store.with_state(&self.id, |state| state.get(key).cloned())?;
        match raw {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
        }
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T, ChatError> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    /// Replace the whole value under `key`.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), ChatError> {
        let value = serde_json::to_value(value)?;
        self.store.with_state(&self.id, |state| {
            state.insert(key.to_string(), value);
        })
    }

    /// Set `key` only if it is absent. Returns whether a value was written.
    pub fn init_default<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<bool, ChatError> {
        let value = serde_json::to_value(value)?;
        self.store.with_state(&self.id, |state| {
            if state.contains_key(key) {
                false
            } else {
                state.insert(key.to_string(), value);
                true
            }
        })
    }

    pub fn contains(&self, key: &str) -> Result<bool, ChatError> {
        self.store.with_state(&self.id, |state| state.contains_key(key))
    }

    pub fn remove(&self, key: &str) -> Result<(), ChatError> {
        self.store.with_state(&self.id, |state| {
            state.remove(key);
        })
    }

    /// Append to the conversation history, returning the new message's index.
    pub fn append_message(&self, message: Message) -> Result<usize, ChatError> {
        let mut messages = self.messages()?;
        messages.push(message);
        self.set(keys::MESSAGES, &messages)?;
        Ok(messages.len() - 1)
    }

    pub fn clear_all(&self) -> Result<(), ChatError> {
        self.store.with_state(&self.id, |state| state.clear())
    }

    pub fn clear_except(&self, retained: &[&str]) -> Result<(), ChatError> {
        self.store.with_state(&self.id, |state| {
            state.retain(|key, _| retained.contains(&key.as_str()));
        })
    }

    /// Write every default that is not already present.
    ///
    /// Safe to call on every rerun: user-chosen values are never overwritten.
    pub fn init_defaults(
        &self,
        settings: &ChatSettings,
        models: &ModelsConfig,
    ) -> Result<(), ChatError> {
        self.init_default(keys::MESSAGES, &Vec::<Message>::new())?;
        self.init_default(keys::FOLLOWUP_GENERATION, &0u64)?;
        self.init_default(keys::PENDING_FOLLOWUP, &Value::Null)?;
        self.init_default(keys::LAST_ASSISTANT, &Value::Null)?;
        self.init_default(keys::FOLLOWUP_QUESTIONS, &Vec::<String>::new())?;
        self.init_default(keys::SELECTED_MODEL, &models.generation_model)?;
        self.init_default(keys::SHOW_TIMER, &settings.show_timer)?;
        self.init_default(keys::ANSWER_STYLE, &settings.default_answer_style)?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Conversation
    // -------------------------------------------------------------------------

    pub fn messages(&self) -> Result<Vec<Message>, ChatError> {
        self.get_or(keys::MESSAGES, Vec::new())
    }

    /// Overwrite the content of the message at `index`.
    pub fn set_message_content(&self, index: usize, content: &str) -> Result<(), ChatError> {
        let mut messages = self.messages()?;
        let slot = messages.get_mut(index).ok_or_else(|| {
            ChatError::Session(format!("no message at index {} in session {}", index, self.id))
        })?;
        slot.content = content.to_string();
        self.set(keys::MESSAGES, &messages)
    }

    /// Latest user question and answer, if the history ends with an
    /// assistant message.
    pub fn last_exchange(&self) -> Result<Option<(String, String)>, ChatError> {
        let mut messages = self.messages()?;
        let Some(assistant) = messages.pop().filter(|m| m.role == Role::Assistant) else {
            return Ok(None);
        };
        let user = messages
            .into_iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content)
            .unwrap_or_default();
        Ok(Some((user, assistant.content)))
    }

    // -------------------------------------------------------------------------
    // Follow-ups
    // -------------------------------------------------------------------------

    pub fn pending_followup(&self) -> Result<Option<String>, ChatError> {
        self.get(keys::PENDING_FOLLOWUP)
    }

    /// Queue a question to be processed on the next rerun.
    pub fn queue_question(&self, question: &str) -> Result<(), ChatError> {
        self.set(keys::PENDING_FOLLOWUP, question)
    }

    /// Take the pending question, clearing it before it is processed.
    pub fn take_pending_followup(&self) -> Result<Option<String>, ChatError> {
        let pending = self.pending_followup()?;
        if pending.is_some() {
            self.set(keys::PENDING_FOLLOWUP, &Value::Null)?;
        }
        Ok(pending)
    }

    /// Queue sample question `index` of the current context.
    ///
    /// Returns the queued question, or `None` without a context or when the
    /// index is out of range.
    pub fn choose_sample(&self, index: usize) -> Result<Option<String>, ChatError> {
        let Some(context) = self.guide_context()? else {
            return Ok(None);
        };
        let Some(question) = context.sample_questions().get(index).copied() else {
            return Ok(None);
        };
        self.queue_question(question)?;
        Ok(Some(question.to_string()))
    }

    pub fn last_assistant(&self) -> Result<Option<String>, ChatError> {
        self.get(keys::LAST_ASSISTANT)
    }

    pub fn set_last_assistant(&self, text: Option<&str>) -> Result<(), ChatError> {
        self.set(keys::LAST_ASSISTANT, &text)
    }

    pub fn followup_questions(&self) -> Result<Vec<String>, ChatError> {
        self.get_or(keys::FOLLOWUP_QUESTIONS, Vec::new())
    }

    pub fn set_followup_questions(&self, questions: &[String]) -> Result<(), ChatError> {
        self.set(keys::FOLLOWUP_QUESTIONS, questions)
    }

    pub fn followup_generation(&self) -> Result<u64, ChatError> {
        self.get_or(keys::FOLLOWUP_GENERATION, 0)
    }

    pub fn bump_followup_generation(&self) -> Result<u64, ChatError> {
        let next = self.followup_generation()? + 1;
        self.set(keys::FOLLOWUP_GENERATION, &next)?;
        Ok(next)
    }

    // -------------------------------------------------------------------------
    // Preferences
    // -------------------------------------------------------------------------

    pub fn last_generation_secs(&self) -> Result<Option<f64>, ChatError> {
        self.get(keys::LAST_GENERATION_SECS)
    }

    pub fn set_last_generation_secs(&self, seconds: f64) -> Result<(), ChatError> {
        self.set(keys::LAST_GENERATION_SECS, &seconds)
    }

    pub fn answer_style(&self) -> Result<AnswerStyle, ChatError> {
        self.get_or(keys::ANSWER_STYLE, AnswerStyle::default())
    }

    pub fn set_answer_style(&self, style: AnswerStyle) -> Result<(), ChatError> {
        self.set(keys::ANSWER_STYLE, &style)
    }

    pub fn hybrid_search(&self) -> Result<bool, ChatError> {
        self.get_or(keys::HYBRID_SEARCH, false)
    }

    pub fn internet_search(&self) -> Result<bool, ChatError> {
        self.get_or(keys::INTERNET_SEARCH, false)
    }

    pub fn set_search_flags(&self, hybrid: bool, internet: bool) -> Result<(), ChatError> {
        self.set(keys::HYBRID_SEARCH, &hybrid)?;
        self.set(keys::INTERNET_SEARCH, &internet)
    }

    pub fn show_timer(&self) -> Result<bool, ChatError> {
        self.get_or(keys::SHOW_TIMER, true)
    }

    pub fn set_show_timer(&self, show: bool) -> Result<(), ChatError> {
        self.set(keys::SHOW_TIMER, &show)
    }

    pub fn selected_model(&self) -> Result<Option<String>, ChatError> {
        self.get(keys::SELECTED_MODEL)
    }

    pub fn set_selected_model(&self, model: &str) -> Result<(), ChatError> {
        self.set(keys::SELECTED_MODEL, model)
    }

    // -------------------------------------------------------------------------
    // Guide context
    // -------------------------------------------------------------------------

    pub fn guide_context(&self) -> Result<Option<GuideContext>, ChatError> {
        self.get(keys::CONTEXT)
    }

    /// Store the country and apply its search presets.
    pub fn select_context(&self, context: GuideContext) -> Result<(), ChatError> {
        self.set(keys::CONTEXT, &context)?;
        let (hybrid, internet) = context.default_search_mode().flags();
        self.set_search_flags(hybrid, internet)?;
        tracing::info!(session = %self.id, country = %context, hybrid, internet, "Guide context selected");
        Ok(())
    }

    /// Apply a search mode. Ignored when the current context locks its mode.
    ///
    /// Returns whether the mode was applied.
    pub fn set_search_mode(&self, mode: SearchMode) -> Result<bool, ChatError> {
        if let Some(context) = self.guide_context()? {
            if context.search_mode_locked() {
                tracing::debug!(session = %self.id, country = %context, "Search mode is fixed for this context");
                return Ok(false);
            }
        }
        let (hybrid, internet) = mode.flags();
        self.set_search_flags(hybrid, internet)?;
        Ok(true)
    }

    /// Clear the conversation, keeping country and preferences.
    pub fn reset_chat(&self) -> Result<(), ChatError> {
        self.set(keys::MESSAGES, &Vec::<Message>::new())?;
        tracing::info!(session = %self.id, "Chat reset");
        Ok(())
    }

    /// Drop the whole session, returning to country selection.
    pub fn change_context(&self) -> Result<(), ChatError> {
        self.clear_all()?;
        tracing::info!(session = %self.id, "Guide context cleared");
        Ok(())
    }
}
