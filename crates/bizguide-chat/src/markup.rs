//! Reference markup and message formatting.
//!
//! Bracketed citation spans (`[Section 2]`) are wrapped so they render as
//! distinct inline markers. The same transform is applied to streamed,
//! fallback and replayed text.

use regex::Regex;
use std::sync::LazyLock;

static REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(.*?)\]").expect("Invalid reference regex"));

/// Wrap every `[...]` span in a reference marker.
///
/// Text without brackets is returned unchanged.
pub fn style_references(text: &str) -> String {
    REFERENCE
        .replace_all(text, r#"<span class="reference">[${1}]</span>"#)
        .into_owned()
}

/// Markdown for an assistant answer, references styled.
pub fn assistant_markdown(text: &str) -> String {
    format!("**Assistant:** {}", style_references(text))
}

/// Markdown for a user question.
pub fn user_markdown(text: &str) -> String {
    format!("**You:** {}", text)
}

/// Caption appended under an answer when the timer is shown.
pub fn generation_time_caption(seconds: f64) -> String {
    format!("*Generation time: {:.2} seconds*", seconds)
}
