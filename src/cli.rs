use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum VerbosityLevel {
    /// Only show errors
    Quiet,
    /// Show standard information
    #[default]
    Normal,
    /// Show detailed information
    Verbose,
}

impl VerbosityLevel {
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        if quiet {
            VerbosityLevel::Quiet
        } else if verbose {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
}

/// Link/image validation and ID repair for CNXML book content
#[derive(Parser, Debug, Clone)]
#[command(name = "cnxml-validate")]
#[command(about = "Validate links and images in CNXML modules and repair missing element IDs")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Workspace root containing a `modules/` directory (repeatable)
    #[arg(short = 'w', long = "workspace", global = true, action = clap::ArgAction::Append)]
    pub workspace: Vec<PathBuf>,

    /// Configuration file (TOML or JSON)
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long = "format", value_enum, global = true)]
    pub output_format: Option<OutputFormat>,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short = 'q', long = "quiet", global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log debug events to stderr
    #[arg(long = "debug", global = true)]
    pub debug: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Check links and images in the given modules
    Validate {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Add missing IDs to one module
    FixIds {
        file: PathBuf,

        /// Rewrite the file instead of printing the result
        #[arg(long = "write")]
        write: bool,
    },

    /// Add missing IDs to every module in the workspace
    EnsureIds,

    /// List the modules found in the workspace
    Modules {
        /// Fail when module paths differ only by letter case
        #[arg(long = "check-duplicates")]
        check_duplicates: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn verbosity(&self) -> VerbosityLevel {
        VerbosityLevel::from_flags(self.verbose, self.quiet)
    }
}
