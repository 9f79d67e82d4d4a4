//! Country contexts the guide can be scoped to, and their search presets.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Country the guide answers questions about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GuideContext {
    Finland,
    Estonia,
}

impl GuideContext {
    pub const ALL: [GuideContext; 2] = [GuideContext::Finland, GuideContext::Estonia];

    pub fn name(&self) -> &'static str {
        match self {
            GuideContext::Finland => "Finland",
            GuideContext::Estonia => "Estonia",
        }
    }

    /// ISO 3166-1 alpha-2 code.
    pub fn code(&self) -> &'static str {
        match self {
            GuideContext::Finland => "FI",
            GuideContext::Estonia => "EE",
        }
    }

    pub fn flag(&self) -> &'static str {
        match self {
            GuideContext::Finland => "\u{1F1EB}\u{1F1EE}",
            GuideContext::Estonia => "\u{1F1EA}\u{1F1EA}",
        }
    }

    /// Search mode applied when the context is selected.
    pub fn default_search_mode(&self) -> SearchMode {
        match self {
            GuideContext::Finland => SearchMode::DocumentsAndWeb,
            GuideContext::Estonia => SearchMode::WebSources,
        }
    }

    /// Estonia only has web sources, so its search mode cannot be changed.
    pub fn search_mode_locked(&self) -> bool {
        matches!(self, GuideContext::Estonia)
    }

    pub fn sample_questions(&self) -> [&'static str; 3] {
        match self {
            GuideContext::Finland => [
                "How do I register a company in Finland?",
                "What taxes do entrepreneurs pay in Finland?",
                "What are the requirements for a foreigner to start a business in Finland?",
            ],
            GuideContext::Estonia => [
                "How do I register a company in Estonia?",
                "What is e-Residency in Estonia?",
                "What taxes do entrepreneurs pay in Estonia?",
            ],
        }
    }
}

impl fmt::Display for GuideContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for GuideContext {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        GuideContext::ALL
            .into_iter()
            .find(|c| s.eq_ignore_ascii_case(c.name()) || s.eq_ignore_ascii_case(c.code()))
            .ok_or_else(|| format!("unknown country: {}", s.to_lowercase()))
    }
}

/// Which knowledge sources the pipeline should consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SearchMode {
    /// Curated documents only.
    Documents,
    /// Curated web sources only.
    WebSources,
    /// Documents and web sources combined (hybrid retrieval).
    DocumentsAndWeb,
}

impl SearchMode {
    /// `(hybrid_search, internet_search)` flags sent to the pipeline.
    pub fn flags(&self) -> (bool, bool) {
        match self {
            SearchMode::Documents => (false, false),
            SearchMode::WebSources => (false, true),
            SearchMode::DocumentsAndWeb => (true, false),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SearchMode::Documents => "Reliable documents",
            SearchMode::WebSources => "Reliable web sources",
            SearchMode::DocumentsAndWeb => "Reliable docs & web sources",
        }
    }
}

impl FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "docs" | "documents" => Ok(SearchMode::Documents),
            "web" => Ok(SearchMode::WebSources),
            "both" | "hybrid" => Ok(SearchMode::DocumentsAndWeb),
            other => Err(format!("unknown search mode: {}", other)),
        }
    }
}
