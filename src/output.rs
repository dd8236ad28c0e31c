//! Simple Output and Reporting
//!
//! Human and JSON rendering of diagnostics, repairs and module listings.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::cli::{OutputFormat, VerbosityLevel};
use crate::diagnostics::{Diagnostic, DiagnosticSeverity};
use crate::file_discovery::ModuleCatalog;
use crate::id_repair::{AssignedId, RepairedFile};

/// Diagnostics published for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDiagnostics {
    pub path: PathBuf,
    pub diagnostics: Vec<Diagnostic>,
}

impl FileDiagnostics {
    pub fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_error()).count()
    }
}

#[derive(Serialize)]
struct ValidationSummary<'a> {
    files: &'a [FileDiagnostics],
    error_count: usize,
}

#[derive(Serialize)]
struct ModuleListing<'a> {
    modules: Vec<&'a Path>,
    duplicates: Vec<DuplicateGroup<'a>>,
}

#[derive(Serialize)]
struct DuplicateGroup<'a> {
    name: &'a str,
    paths: &'a [PathBuf],
}

pub struct Output {
    verbosity: VerbosityLevel,
    format: OutputFormat,
    show_colors: bool,
}

impl Output {
    pub fn new(verbosity: VerbosityLevel, format: OutputFormat) -> Self {
        Self {
            verbosity,
            format,
            show_colors: atty::is(atty::Stream::Stdout),
        }
    }

    pub fn with_colors(mut self, show_colors: bool) -> Self {
        self.show_colors = show_colors;
        self
    }

    fn colorize(&self, text: &str, color: &str) -> String {
        if self.show_colors {
            format!("\x1b[{}m{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    fn severity_label(&self, severity: DiagnosticSeverity) -> String {
        let color = match severity {
            DiagnosticSeverity::Error => "31",
            DiagnosticSeverity::Warning => "33",
            DiagnosticSeverity::Information | DiagnosticSeverity::Hint => "36",
        };
        self.colorize(&severity.to_string(), color)
    }

    pub fn format_validation(&self, results: &[FileDiagnostics]) -> String {
        let error_count = results.iter().map(FileDiagnostics::error_count).sum();

        if self.format == OutputFormat::Json {
            return to_json(&ValidationSummary {
                files: results,
                error_count,
            });
        }

        let mut output = String::new();
        for result in results {
            output.push_str(&self.format_file_diagnostics(result));
        }

        if self.verbosity > VerbosityLevel::Quiet || error_count > 0 {
            let status = if error_count == 0 {
                self.colorize("OK", "32")
            } else {
                self.colorize("FAILED", "31")
            };
            output.push_str(&format!(
                "{}: {} file{} checked, {} error{}\n",
                status,
                results.len(),
                plural(results.len()),
                error_count,
                plural(error_count)
            ));
        }

        output
    }

    /// One `path:line:character` line per diagnostic, 1-based
    pub fn format_file_diagnostics(&self, result: &FileDiagnostics) -> String {
        let mut output = String::new();

        if result.diagnostics.is_empty() {
            if self.verbosity >= VerbosityLevel::Verbose {
                output.push_str(&format!(
                    "{}  {}\n",
                    self.colorize("✓", "32"),
                    result.path.display()
                ));
            }
            return output;
        }

        for diagnostic in &result.diagnostics {
            if self.verbosity == VerbosityLevel::Quiet && !diagnostic.is_error() {
                continue;
            }
            let start = diagnostic.range.start;
            output.push_str(&format!(
                "{}:{}:{}: {}: {}",
                result.path.display(),
                start.line + 1,
                start.character + 1,
                self.severity_label(diagnostic.severity),
                diagnostic.message
            ));
            if self.verbosity >= VerbosityLevel::Verbose {
                output.push_str(&format!(" [{}]", diagnostic.source));
            }
            output.push('\n');
        }

        output
    }

    /// Report for a single repaired file written back to disk
    pub fn format_assigned(&self, path: &Path, assigned: &[AssignedId]) -> String {
        if self.format == OutputFormat::Json {
            return to_json(&RepairedFile {
                path: path.to_path_buf(),
                assigned: assigned.to_vec(),
            });
        }

        let mut output = String::new();
        if self.verbosity > VerbosityLevel::Quiet {
            output.push_str(&format!(
                "{}  {} ({} id{} added)\n",
                self.colorize("✎ FIXED", "32"),
                path.display(),
                assigned.len(),
                plural(assigned.len())
            ));
        }
        if self.verbosity >= VerbosityLevel::Verbose {
            for id in assigned {
                output.push_str(&format!("    {} <{}> {}\n", id.position, id.tag, id.id));
            }
        }
        output
    }

    pub fn format_repairs(&self, repaired: &[RepairedFile]) -> String {
        if self.format == OutputFormat::Json {
            return to_json(&repaired);
        }

        let mut output = String::new();
        for file in repaired {
            output.push_str(&self.format_assigned(&file.path, &file.assigned));
        }
        if self.verbosity > VerbosityLevel::Quiet {
            let total: usize = repaired.iter().map(|file| file.assigned.len()).sum();
            output.push_str(&format!(
                "Added {} id{} in {} module{}\n",
                total,
                plural(total),
                repaired.len(),
                plural(repaired.len())
            ));
        }
        output
    }

    pub fn format_modules(
        &self,
        catalog: &ModuleCatalog,
        duplicates: &[(String, Vec<PathBuf>)],
    ) -> String {
        if self.format == OutputFormat::Json {
            return to_json(&ModuleListing {
                modules: catalog.iter().collect(),
                duplicates: duplicates
                    .iter()
                    .map(|(name, paths)| DuplicateGroup { name, paths })
                    .collect(),
            });
        }

        let mut output = String::new();
        if self.verbosity > VerbosityLevel::Quiet {
            for module in catalog.iter() {
                output.push_str(&format!("{}\n", module.display()));
            }
        }
        for (_, paths) in duplicates {
            let names: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
            output.push_str(&format!(
                "{} {} have the same name. They should be renamed or deleted.\n",
                self.colorize("✗", "31"),
                names.join(", ")
            ));
        }
        if self.verbosity >= VerbosityLevel::Verbose {
            output.push_str(&format!(
                "{} module{}\n",
                catalog.len(),
                plural(catalog.len())
            ));
        }
        output
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    match serde_json::to_string_pretty(value) {
        Ok(json) => json + "\n",
        Err(e) => format!("{{\"error\": {:?}}}\n", e.to_string()),
    }
}
