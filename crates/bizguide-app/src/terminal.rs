//! Terminal rendering of turn output regions.
//!
//! A terminal cannot replace text it already printed, so a region remembers
//! what it showed and prints only the new suffix when an update extends it.
//! First renders and updates that rewrite earlier text start a fresh line.

use std::io::{self, Write};
use std::sync::{Arc, LazyLock, Mutex};

use regex::Regex;

use bizguide_chat::error::RenderError;
use bizguide_chat::output::{OutputRegion, TurnSurface};
use bizguide_chat::{ContextBound, RunContext, SurfaceFactory};

static REFERENCE_SPAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<span class="reference">(\[.*?\])</span>"#).expect("Invalid span regex")
});
static BOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*").expect("Invalid bold regex"));
static ITALIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*(.+?)\*").expect("Invalid italic regex"));

const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const BOLD_ON: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

/// Strip markup down to the visible text.
///
/// Reference markers keep their brackets.
pub fn plain_text(markdown: &str) -> String {
    let text = REFERENCE_SPAN.replace_all(markdown, "$1");
    let text = BOLD.replace_all(&text, "$1");
    ITALIC.replace_all(&text, "$1").into_owned()
}

/// Render markup with ANSI styling: references cyan, bold and italic kept.
pub fn to_ansi(markdown: &str) -> String {
    let text = REFERENCE_SPAN.replace_all(markdown, format!("{}$1{}", CYAN, RESET).as_str());
    let text = BOLD.replace_all(&text, format!("{}$1{}", BOLD_ON, RESET).as_str());
    ITALIC
        .replace_all(&text, format!("{}$1{}", DIM, RESET).as_str())
        .into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sink {
    Stdout,
    Stderr,
    Hidden,
}

/// One region of the terminal.
pub struct TerminalRegion {
    sink: Sink,
    shown: Mutex<String>,
}

impl TerminalRegion {
    pub fn stdout() -> Self {
        Self::with_sink(Sink::Stdout)
    }

    pub fn stderr() -> Self {
        Self::with_sink(Sink::Stderr)
    }

    /// A region that accepts every update and prints nothing.
    pub fn hidden() -> Self {
        Self::with_sink(Sink::Hidden)
    }

    fn with_sink(sink: Sink) -> Self {
        Self {
            sink,
            shown: Mutex::new(String::new()),
        }
    }

    /// Visible text printed so far.
    pub fn shown(&self) -> String {
        self.shown
            .lock()
            .map(|shown| shown.clone())
            .unwrap_or_default()
    }

    fn write(&self, text: &str) -> Result<(), RenderError> {
        let result = match self.sink {
            Sink::Stdout => {
                let mut out = io::stdout().lock();
                out.write_all(text.as_bytes()).and_then(|_| out.flush())
            }
            Sink::Stderr => {
                let mut out = io::stderr().lock();
                out.write_all(text.as_bytes()).and_then(|_| out.flush())
            }
            Sink::Hidden => Ok(()),
        };
        result.map_err(|e| {
            tracing::debug!(error = %e, "Terminal write failed");
            RenderError::Closed
        })
    }

    /// Replace the visible text with `visible`, printing as little as possible.
    fn replace(&self, visible: String) -> Result<(), RenderError> {
        let mut shown = self.shown.lock().map_err(|_| RenderError::Closed)?;
        let output = match visible.strip_prefix(shown.as_str()) {
            Some(suffix) if !shown.is_empty() => suffix.to_string(),
            _ => format!("\n{}", visible),
        };
        self.write(&output)?;
        *shown = visible;
        Ok(())
    }
}

impl OutputRegion for TerminalRegion {
    fn markdown(&self, content: &str) -> Result<(), RenderError> {
        self.replace(plain_text(content))
    }

    fn error(&self, message: &str) -> Result<(), RenderError> {
        let mut shown = self.shown.lock().map_err(|_| RenderError::Closed)?;
        self.write(&format!("\n{}{}{}", RED, message, RESET))?;
        *shown = message.to_string();
        Ok(())
    }

    fn append(&self, content: &str) -> Result<(), RenderError> {
        let mut shown = self.shown.lock().map_err(|_| RenderError::Closed)?;
        let addition = format!("\n{}", plain_text(content));
        self.write(&format!("\n{}", to_ansi(content)))?;
        shown.push_str(&addition);
        Ok(())
    }

    fn text(&self, label: &str, content: &str) -> Result<(), RenderError> {
        let mut shown = self.shown.lock().map_err(|_| RenderError::Closed)?;
        if shown.is_empty() && !content.is_empty() {
            self.write(&format!("\n{}[{}]{}\n", DIM, label, RESET))?;
        }
        let output = match content.strip_prefix(shown.as_str()) {
            Some(suffix) => suffix.to_string(),
            None => content.to_string(),
        };
        self.write(&output)?;
        *shown = content.to_string();
        Ok(())
    }
}

/// Opens terminal regions for each turn, bound to the run that opens them.
pub struct TerminalSurfaces {
    debug_view: bool,
}

impl TerminalSurfaces {
    pub fn new(debug_view: bool) -> Self {
        Self { debug_view }
    }
}

fn bound(owner: &RunContext, region: TerminalRegion) -> Arc<dyn OutputRegion> {
    Arc::new(ContextBound::new(owner.clone(), region))
}

impl SurfaceFactory for TerminalSurfaces {
    fn open_turn(&self) -> TurnSurface {
        let owner = RunContext::current().unwrap_or_default();
        let debug = if self.debug_view {
            TerminalRegion::stderr()
        } else {
            TerminalRegion::hidden()
        };
        TurnSurface {
            question: bound(&owner, TerminalRegion::stdout()),
            response: bound(&owner, TerminalRegion::stdout()),
            // The response region already shows the streamed answer.
            tokens: bound(&owner, TerminalRegion::hidden()),
            debug: bound(&owner, debug),
        }
    }
}
