//! Interactive command parsing.
//!
//! Every line the user enters is either a question or a slash command that
//! stands in for one of the page widgets (buttons, radios, toggles).

use bizguide_core::config::ModelsConfig;
use bizguide_core::{AnswerStyle, GuideContext, SearchMode};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Submit a question.
    Ask(String),
    /// Pick the n-th (1-based) proposed follow-up question.
    Followup(usize),
    /// Pick the n-th (1-based) sample question of the current country.
    Sample(usize),
    /// Clear the conversation, keep the country.
    Reset,
    /// Clear everything and choose a country again.
    ChangeCountry,
    /// Select a country directly.
    Country(GuideContext),
    Timer(bool),
    Style(AnswerStyle),
    Search(SearchMode),
    Model(String),
    History,
    Help,
    Quit,
    /// Nothing to do; just rerun.
    Refresh,
    Invalid(String),
}

pub const HELP: &str = "\
Type a question, or one of:
  /1 /2 /3            ask a proposed follow-up question
  /sample N           ask sample question N
  /style NAME         concise, moderate or explanatory
  /search MODE        docs, web or both
  /timer on|off       show or hide generation time
  /model NAME         select the generation model
  /reset              clear the conversation
  /country [NAME]     change country (clears everything)
  /history            print the conversation
  /quit               exit";

pub fn parse(line: &str) -> Command {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        if line.is_empty() {
            return Command::Refresh;
        }
        return Command::Ask(line.to_string());
    };

    let mut parts = rest.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default().to_lowercase();
    let arg = parts.next().map(str::trim).unwrap_or_default();

    if let Ok(n) = name.parse::<usize>() {
        return match n {
            1..=3 => Command::Followup(n),
            _ => Command::Invalid(format!("no follow-up question {}", n)),
        };
    }

    match name.as_str() {
        "sample" => match arg.parse::<usize>() {
            Ok(n @ 1..=3) => Command::Sample(n),
            _ => Command::Invalid("usage: /sample 1|2|3".to_string()),
        },
        "style" => arg.parse().map(Command::Style).unwrap_or_else(Command::Invalid),
        "search" => arg.parse().map(Command::Search).unwrap_or_else(Command::Invalid),
        "timer" => match arg {
            "on" | "" => Command::Timer(true),
            "off" => Command::Timer(false),
            other => Command::Invalid(format!("usage: /timer on|off (got {})", other)),
        },
        "model" if !arg.is_empty() => Command::Model(arg.to_string()),
        "model" => Command::Invalid("usage: /model NAME".to_string()),
        "reset" => Command::Reset,
        "country" if arg.is_empty() => Command::ChangeCountry,
        "country" => arg.parse().map(Command::Country).unwrap_or_else(Command::Invalid),
        "history" => Command::History,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => Command::Invalid(format!("unknown command /{}", other)),
    }
}

/// Confirmation shown after `/model`, noting models outside the catalog.
pub fn model_notice(models: &ModelsConfig, model: &str) -> String {
    if models.catalog().any(|known| known == model) {
        format!("Model: {}", model)
    } else {
        format!(
            "Model: {} (not in the catalog; known models: {})",
            model,
            models.catalog().collect::<Vec<_>>().join(", ")
        )
    }
}

/// Interpret a line typed while no country is selected.
pub fn parse_country_choice(line: &str) -> Option<GuideContext> {
    let line = line.trim();
    match line.parse::<usize>() {
        Ok(n) => GuideContext::ALL.get(n.checked_sub(1)?).copied(),
        Err(_) => line.parse().ok(),
    }
}
