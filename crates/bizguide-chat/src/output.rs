//! Output regions a turn renders into, and the debug log side channel.

use std::io;
use std::sync::{Arc, Mutex};

use crate::error::RenderError;

/// A live, replaceable area of the user-facing surface.
///
/// `markdown`, `error` and `text` replace whatever the region showed before;
/// `append` adds below the current content.
pub trait OutputRegion: Send + Sync {
    fn markdown(&self, content: &str) -> Result<(), RenderError>;

    fn error(&self, message: &str) -> Result<(), RenderError>;

    fn append(&self, content: &str) -> Result<(), RenderError>;

    /// Plain labelled text, used for auxiliary views such as debug logs.
    fn text(&self, label: &str, content: &str) -> Result<(), RenderError>;
}

impl<R: OutputRegion + ?Sized> OutputRegion for Arc<R> {
    fn markdown(&self, content: &str) -> Result<(), RenderError> {
        (**self).markdown(content)
    }

    fn error(&self, message: &str) -> Result<(), RenderError> {
        (**self).error(message)
    }

    fn append(&self, content: &str) -> Result<(), RenderError> {
        (**self).append(content)
    }

    fn text(&self, label: &str, content: &str) -> Result<(), RenderError> {
        (**self).text(label, content)
    }
}

/// Regions owned by one in-flight turn.
#[derive(Clone)]
pub struct TurnSurface {
    /// Echo of the submitted question.
    pub question: Arc<dyn OutputRegion>,
    /// The answer, re-rendered from cumulative text.
    pub response: Arc<dyn OutputRegion>,
    /// Token-level rendering driven by pipeline callbacks.
    pub tokens: Arc<dyn OutputRegion>,
    /// Auxiliary debug view.
    pub debug: Arc<dyn OutputRegion>,
}

/// Side channel collecting pipeline diagnostics for the duration of a call.
///
/// Cloning shares the same buffer. The pipeline writes to it from whatever
/// context it runs in; the orchestrator renders [`DebugLog::snapshot`].
#[derive(Debug, Clone, Default)]
pub struct DebugLog {
    buffer: Arc<Mutex<String>>,
}

impl DebugLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one line.
    pub fn line(&self, line: impl AsRef<str>) {
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.push_str(line.as_ref());
            buffer.push('\n');
        }
    }

    pub fn snapshot(&self) -> String {
        self.buffer
            .lock()
            .map(|buffer| buffer.clone())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer
            .lock()
            .map(|buffer| buffer.is_empty())
            .unwrap_or(true)
    }
}

impl io::Write for DebugLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|e| io::Error::other(format!("debug log lock poisoned: {}", e)))?;
        buffer.push_str(&String::from_utf8_lossy(buf));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_debug_log_lines() {
        let log = DebugLog::new();
        assert!(log.is_empty());
        log.line("retrieve: 4 documents");
        log.line("grade: relevant");
        assert_eq!(log.snapshot(), "retrieve: 4 documents\ngrade: relevant\n");
    }

    #[test]
    fn test_debug_log_clones_share_buffer() {
        let log = DebugLog::new();
        let writer = log.clone();
        writer.line("from pipeline");
        assert!(log.snapshot().contains("from pipeline"));
    }

    #[test]
    fn test_debug_log_io_write() {
        let log = DebugLog::new();
        let mut writer = log.clone();
        write!(writer, "route: vectorstore").unwrap();
        writeln!(writer, " (hybrid)").unwrap();
        assert_eq!(log.snapshot(), "route: vectorstore (hybrid)\n");
    }

    #[test]
    fn test_debug_log_from_threads() {
        let log = DebugLog::new();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let log = log.clone();
                std::thread::spawn(move || log.line(format!("worker {}", i)))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(log.snapshot().lines().count(), 4);
    }
}
