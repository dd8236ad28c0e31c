//! # cnxml-validate Library
//!
//! Editor-side checks for CNXML book content: generating missing element IDs,
//! validating links and images across modules, and a coalescing queue that
//! re-validates documents as they are edited.

pub mod cli;
pub mod config;
pub mod content_model;
pub mod diagnostics;
pub mod document;
pub mod error;
pub mod file_discovery;
pub mod id_repair;
pub mod output;
pub mod queue;
pub mod validator;

pub use cli::{Cli, Command, OutputFormat, VerbosityLevel};
pub use config::{Config, ConfigError, ConfigManager};
pub use content_model::{ContentModel, NS_CNXML};
pub use diagnostics::{Diagnostic, DiagnosticSeverity, DiagnosticSource, Position, Range};
pub use document::{Document, Element, SourcePosition};
pub use error::{ParseError, Result, ValidationError};
pub use file_discovery::{FileDiscovery, ModuleCatalog};
pub use id_repair::{AssignedId, IdRegistry, RepairedFile, ensure_ids, fix_document, id_fixer};
pub use output::{FileDiagnostics, Output};
pub use queue::{EditorConnection, QueueConfig, ValidationQueue, ValidationRequest};
pub use validator::DocumentValidator;
