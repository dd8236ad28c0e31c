use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::document::SourcePosition;

/// Main application error type that encompasses all possible failure modes
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("BUG: Element was not in the id-prefix map: {tag}")]
    MissingIdPrefix { tag: String },

    #[error("BUG! We wrote a file that did not change: {}", path.display())]
    UnchangedOutput { path: PathBuf },

    #[error("Invalid document URI: {uri}")]
    InvalidUri { uri: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ValidationError {
    /// Programming-bug signals that must abort the current operation.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ValidationError::MissingIdPrefix { .. } | ValidationError::UnchangedOutput { .. }
        )
    }
}

/// Reasons a document could not be turned into a tree
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed XML at {position}: {details}")]
    Syntax {
        position: SourcePosition,
        details: String,
    },

    #[error("invalid attribute at {position}: {details}")]
    Attribute {
        position: SourcePosition,
        details: String,
    },

    #[error("unexpected end tag </{name}> at {position}")]
    UnexpectedEndTag {
        name: String,
        position: SourcePosition,
    },

    #[error("element <{name}> opened at {position} is never closed")]
    UnclosedElement {
        name: String,
        position: SourcePosition,
    },

    #[error("document has no root element")]
    NoRootElement,

    #[error("document has more than one root element (second at {position})")]
    MultipleRoots { position: SourcePosition },
}

impl From<ConfigError> for ValidationError {
    fn from(err: ConfigError) -> Self {
        ValidationError::Config(err.to_string())
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ValidationError>;

/// Parse result type alias
pub type ParseResult<T> = std::result::Result<T, ParseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let io_error = ValidationError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "File not found",
        ));
        assert!(io_error.to_string().contains("IO error"));

        let missing = ValidationError::MissingIdPrefix {
            tag: "widget".to_string(),
        };
        assert!(missing.to_string().contains("id-prefix map"));
        assert!(missing.to_string().contains("widget"));

        let unchanged = ValidationError::UnchangedOutput {
            path: PathBuf::from("/book/modules/m1/index.cnxml"),
        };
        assert!(unchanged.to_string().contains("did not change"));
        assert!(unchanged.to_string().contains("index.cnxml"));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(
            ValidationError::MissingIdPrefix {
                tag: "x".to_string()
            }
            .is_fatal()
        );
        assert!(
            ValidationError::UnchangedOutput {
                path: PathBuf::from("a.cnxml")
            }
            .is_fatal()
        );
        assert!(!ValidationError::Parse(ParseError::NoRootElement).is_fatal());
        assert!(!ValidationError::Config("bad".to_string()).is_fatal());
    }

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::UnclosedElement {
            name: "para".to_string(),
            position: SourcePosition { line: 3, column: 5 },
        };
        assert_eq!(
            err.to_string(),
            "element <para> opened at 3:5 is never closed"
        );
    }

    #[test]
    fn test_parse_error_conversion() {
        let validation_error: ValidationError = ParseError::NoRootElement.into();

        match validation_error {
            ValidationError::Parse(ParseError::NoRootElement) => (),
            _ => panic!("Expected ValidationError::Parse"),
        }
    }

    #[test]
    fn test_error_source_chain() {
        use std::error::Error;

        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let validation_error = ValidationError::Io(io_error);

        assert!(validation_error.source().is_some());

        let source = validation_error.source().unwrap();
        assert_eq!(source.to_string(), "File not found");
    }
}
