//! Diagnostic context - which thread hit the error.

use std::thread::ThreadId;

/// Diagnostic context containing runtime state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagContext {
    /// Current thread ID.
    pub thread_id: ThreadId,
    /// Thread name (if available).
    pub thread_name: Option<String>,
}

impl DiagContext {
    /// Capture the current context.
    pub fn capture() -> Self {
        let thread = std::thread::current();
        Self {
            thread_id: thread.id(),
            thread_name: thread.name().map(String::from),
        }
    }

    /// Format context for diagnostic output.
    pub fn format(&self) -> String {
        match self.thread_name {
            Some(ref name) => format!("thread=\"{}\"", name),
            None => format!("thread={:?}", self.thread_id),
        }
    }
}

impl std::fmt::Display for DiagContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.format())
    }
}
