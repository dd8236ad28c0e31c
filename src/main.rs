//! cnxml-validate CLI entry point.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use cnxml_validate::cli::{Cli, Command, VerbosityLevel};
use cnxml_validate::config::{Config, ConfigManager};
use cnxml_validate::content_model::ContentModel;
use cnxml_validate::diagnostics::Diagnostic;
use cnxml_validate::document::Document;
use cnxml_validate::file_discovery::{FileDiscovery, ModuleCatalog};
use cnxml_validate::id_repair::{self, needs_ids};
use cnxml_validate::output::{FileDiagnostics, Output};
use cnxml_validate::queue::{
    EditorConnection, ValidationQueue, ValidationRequest, path_to_uri,
};
use cnxml_validate::validator::DocumentValidator;

const EXIT_FAILED: u8 = 1;
const EXIT_ERROR: u8 = 2;

/// Log level comes from `--debug`, then `RUST_LOG`, then defaults to INFO.
/// Events go to stderr so JSON output on stdout stays clean.
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("cnxml_validate=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cnxml_validate=info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_tracing(cli.debug);

    tracing::debug!("cnxml-validate starting with args: {:?}", cli);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = ConfigManager::load_config(&cli)
        .await
        .context("Failed to load configuration")?;
    let output = Output::new(
        VerbosityLevel::from_flags(config.output.verbose, config.output.quiet),
        config.output.format,
    );
    let roots = ConfigManager::workspace_roots(&config);
    let model = ConfigManager::content_model(&config);
    let discovery = ConfigManager::module_discovery(&config)?;

    match &cli.command {
        Command::Validate { files } => validate(files, &roots, model, &config, &output).await,
        Command::FixIds { file, write } => fix_ids(file, *write, &model, &output).await,
        Command::EnsureIds => {
            let catalog = discover(&roots, &discovery).await?;
            let repaired = id_repair::ensure_ids(&catalog, &model).await?;
            print!("{}", output.format_repairs(&repaired));
            Ok(ExitCode::SUCCESS)
        }
        Command::Modules { check_duplicates } => {
            let catalog = discover(&roots, &discovery).await?;
            let duplicates = if *check_duplicates {
                catalog.duplicate_file_names()
            } else {
                Vec::new()
            };
            print!("{}", output.format_modules(&catalog, &duplicates));
            if duplicates.is_empty() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(EXIT_FAILED))
            }
        }
    }
}

async fn discover(roots: &[PathBuf], discovery: &FileDiscovery) -> Result<ModuleCatalog> {
    ModuleCatalog::discover_with(roots, discovery)
        .await
        .context("Failed to discover modules")
}

/// Stands in for an editor: fixed workspace folders, diagnostics kept by URI
struct CollectingConnection {
    workspace_folders: Vec<String>,
    published: Mutex<HashMap<String, Vec<Diagnostic>>>,
}

impl CollectingConnection {
    fn take(&self, uri: &str) -> Option<Vec<Diagnostic>> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(uri)
    }
}

#[async_trait]
impl EditorConnection for CollectingConnection {
    async fn workspace_folders(&self) -> Vec<String> {
        self.workspace_folders.clone()
    }

    async fn publish_diagnostics(&self, uri: &str, diagnostics: Vec<Diagnostic>) {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uri.to_string(), diagnostics);
    }
}

async fn validate(
    files: &[PathBuf],
    roots: &[PathBuf],
    model: ContentModel,
    config: &Config,
    output: &Output,
) -> Result<ExitCode> {
    let workspace_folders = roots
        .iter()
        .map(|root| path_to_uri(root))
        .collect::<cnxml_validate::Result<Vec<_>>>()?;
    let connection = Arc::new(CollectingConnection {
        workspace_folders,
        published: Mutex::new(HashMap::new()),
    });
    let queue = ValidationQueue::with_config(
        connection.clone(),
        DocumentValidator::new(Arc::new(model)),
        ConfigManager::queue_config(config)?,
    );

    let mut queued = Vec::new();
    let mut unparsable = 0usize;
    for file in files {
        let text = tokio::fs::read_to_string(file)
            .await
            .with_context(|| format!("Failed to read {}", file.display()))?;
        // The queue leaves unparsable documents alone; report them here instead
        if let Err(e) = Document::parse(&text) {
            eprintln!("{}: {}", file.display(), e);
            unparsable += 1;
            continue;
        }
        let uri = path_to_uri(file)?;
        queue.add_request(ValidationRequest::new(uri.clone(), text, 1));
        queued.push((file.clone(), uri));
    }

    queue.wait_idle().await;

    let results: Vec<FileDiagnostics> = queued
        .into_iter()
        .map(|(path, uri)| FileDiagnostics {
            diagnostics: connection.take(&uri).unwrap_or_default(),
            path,
        })
        .collect();
    print!("{}", output.format_validation(&results));

    let error_count: usize = results.iter().map(FileDiagnostics::error_count).sum();
    if error_count > 0 || unparsable > 0 {
        Ok(ExitCode::from(EXIT_FAILED))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

async fn fix_ids(file: &Path, write: bool, model: &ContentModel, output: &Output) -> Result<ExitCode> {
    let input = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let doc = Document::parse(&input)
        .with_context(|| format!("Failed to parse {}", file.display()))?;

    if !needs_ids(&doc, model) {
        tracing::info!(path = %file.display(), "All elements already have ids");
        if !write {
            print!("{}", input);
        }
        return Ok(ExitCode::SUCCESS);
    }

    let repair = id_repair::repair(&input, file, model)?;
    if write {
        tokio::fs::write(file, &repair.output)
            .await
            .with_context(|| format!("Failed to write {}", file.display()))?;
        print!("{}", output.format_assigned(file, &repair.assigned));
    } else {
        print!("{}", repair.output);
    }
    Ok(ExitCode::SUCCESS)
}
