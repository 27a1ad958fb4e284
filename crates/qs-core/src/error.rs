use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub script: String,
    pub line: usize,
}

impl SourceRef {
    pub fn new(script: impl Into<String>, line: usize) -> Self {
        Self {
            script: script.into(),
            line,
        }
    }
}

#[derive(Debug, Error, Clone)]
#[error("{code}: {message}")]
pub struct QueueScriptError {
    pub code: String,
    pub message: String,
    pub origin: Option<SourceRef>,
}

impl QueueScriptError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            origin: None,
        }
    }

    pub fn with_origin(
        code: impl Into<String>,
        message: impl Into<String>,
        origin: SourceRef,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            origin: Some(origin),
        }
    }

    pub fn at(mut self, origin: SourceRef) -> Self {
        if self.origin.is_none() {
            self.origin = Some(origin);
        }
        self
    }

    /// Message with the `script:line` prefix users see in diagnostics.
    pub fn display_message(&self) -> String {
        match &self.origin {
            Some(origin) => format!("{} (line {}): {}", origin.script, origin.line, self.message),
            None => self.message.clone(),
        }
    }
}

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn display_message_includes_script_and_line_when_origin_is_known() {
        let plain = QueueScriptError::new("ENGINE_FAULT", "boom");
        assert_eq!(plain.display_message(), "boom");

        let placed = plain.clone().at(SourceRef::new("startup.qs", 12));
        assert_eq!(
            placed.display_message(),
            "startup.qs (line 12): boom"
        );
    }

    #[test]
    fn at_keeps_the_first_origin() {
        let error = QueueScriptError::with_origin("ENGINE_FAULT", "boom", SourceRef::new("a", 1))
            .at(SourceRef::new("b", 2));
        assert_eq!(error.origin, Some(SourceRef::new("a", 1)));
    }
}
