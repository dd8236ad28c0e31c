//! Positioned validation messages in editor (LSP) coordinates.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::document::{Element, SourcePosition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum DiagnosticSeverity {
    Error = 1,
    Warning = 2,
    Information = 3,
    Hint = 4,
}

impl From<DiagnosticSeverity> for u8 {
    fn from(severity: DiagnosticSeverity) -> Self {
        severity as u8
    }
}

impl TryFrom<u8> for DiagnosticSeverity {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, String> {
        match value {
            1 => Ok(DiagnosticSeverity::Error),
            2 => Ok(DiagnosticSeverity::Warning),
            3 => Ok(DiagnosticSeverity::Information),
            4 => Ok(DiagnosticSeverity::Hint),
            other => Err(format!("invalid diagnostic severity: {}", other)),
        }
    }
}

impl fmt::Display for DiagnosticSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DiagnosticSeverity::Error => "error",
            DiagnosticSeverity::Warning => "warning",
            DiagnosticSeverity::Information => "info",
            DiagnosticSeverity::Hint => "hint",
        };
        f.write_str(label)
    }
}

/// Which rule produced a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticSource {
    #[serde(rename = "Image validation")]
    ImageValidation,
    #[serde(rename = "Link validation")]
    LinkValidation,
    /// Schema checks run outside this crate
    #[serde(rename = "Schema validation")]
    Schema,
}

impl DiagnosticSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticSource::ImageValidation => "Image validation",
            DiagnosticSource::LinkValidation => "Link validation",
            DiagnosticSource::Schema => "Schema validation",
        }
    }
}

impl fmt::Display for DiagnosticSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Zero-based line and UTF-16 character offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

impl From<SourcePosition> for Position {
    fn from(position: SourcePosition) -> Self {
        Self {
            line: position.line.saturating_sub(1),
            character: position.column.saturating_sub(1),
        }
    }
}

/// Half-open `[start, end)` range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: DiagnosticSeverity,
    pub range: Range,
    pub message: String,
    pub source: DiagnosticSource,
}

impl Diagnostic {
    pub fn error(range: Range, message: impl Into<String>, source: DiagnosticSource) -> Self {
        Self {
            severity: DiagnosticSeverity::Error,
            range,
            message: message.into(),
            source,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == DiagnosticSeverity::Error
    }
}

/// Span used for element diagnostics: from the element's start to the start of
/// its next sibling. End tags are not tracked separately, so this usually covers
/// the element plus nothing else. Without a next sibling the element's own end
/// is used.
pub fn element_range(element: &Element) -> Range {
    let end = element
        .next_sibling_position()
        .unwrap_or_else(|| element.end_position());
    Range::new(element.position().into(), end.into())
}
