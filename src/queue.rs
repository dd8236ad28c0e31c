//! Validation Work Queue
//!
//! Editors send a request per change. Requests are coalesced per document (older
//! queued versions are dropped) and drained one at a time by a single task. The
//! task is only spawned when none is running; it exits once the queue is empty.
//! A task that panics hands the remaining entries to a fresh one.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, warn};
use url::Url;

use crate::diagnostics::Diagnostic;
use crate::document::Document;
use crate::error::{Result, ValidationError};
use crate::file_discovery::{FileDiscovery, ModuleCatalog};
use crate::validator::DocumentValidator;

/// One edit of one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationRequest {
    pub uri: String,
    pub text: String,
    pub version: i32,
}

impl ValidationRequest {
    pub fn new(uri: impl Into<String>, text: impl Into<String>, version: i32) -> Self {
        Self {
            uri: uri.into(),
            text: text.into(),
            version,
        }
    }
}

/// The editing host, as seen by the queue
#[async_trait]
pub trait EditorConnection: Send + Sync {
    /// Workspace root folders as URIs
    async fn workspace_folders(&self) -> Vec<String>;

    /// Replace every diagnostic previously published for `uri`
    async fn publish_diagnostics(&self, uri: &str, diagnostics: Vec<Diagnostic>);
}

#[derive(Debug, Clone, Default)]
pub struct QueueConfig {
    /// Wait before a drain starts so bursts of edits can coalesce
    pub settle_delay: Duration,
    /// How sibling modules are found under each workspace folder
    pub discovery: FileDiscovery,
}

#[derive(Default)]
struct QueueState {
    entries: VecDeque<ValidationRequest>,
    draining: bool,
}

impl QueueState {
    fn drop_old_versions(&mut self, request: &ValidationRequest) {
        self.entries
            .retain(|entry| entry.uri != request.uri || entry.version >= request.version);
    }
}

struct QueueInner {
    state: Mutex<QueueState>,
    idle: Notify,
    connection: Arc<dyn EditorConnection>,
    validator: DocumentValidator,
    config: QueueConfig,
}

#[derive(Clone)]
pub struct ValidationQueue {
    inner: Arc<QueueInner>,
}

impl ValidationQueue {
    pub fn new(connection: Arc<dyn EditorConnection>, validator: DocumentValidator) -> Self {
        Self::with_config(connection, validator, QueueConfig::default())
    }

    pub fn with_config(
        connection: Arc<dyn EditorConnection>,
        validator: DocumentValidator,
        config: QueueConfig,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                idle: Notify::new(),
                connection,
                validator,
                config,
            }),
        }
    }

    /// Queue a request and make sure a drain is scheduled.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn add_request(&self, request: ValidationRequest) {
        let start_drain = {
            let mut state = self.inner.lock_state();
            state.drop_old_versions(&request);
            debug!(uri = %request.uri, version = request.version, "Queued validation request");
            state.entries.push_back(request);
            !std::mem::replace(&mut state.draining, true)
        };

        if start_drain {
            tokio::spawn(Arc::clone(&self.inner).drain());
        }
    }

    /// `(uri, version)` of every request still waiting, oldest first
    pub fn pending(&self) -> Vec<(String, i32)> {
        self.inner
            .lock_state()
            .entries
            .iter()
            .map(|entry| (entry.uri.clone(), entry.version))
            .collect()
    }

    pub fn is_draining(&self) -> bool {
        self.inner.lock_state().draining
    }

    /// Resolve once the queue is empty and no drain is running
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.is_draining() {
                return;
            }
            notified.await;
        }
    }
}

impl QueueInner {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn drain(self: Arc<Self>) {
        let _guard = DrainGuard {
            inner: Arc::clone(&self),
        };

        if !self.config.settle_delay.is_zero() {
            tokio::time::sleep(self.config.settle_delay).await;
        }

        loop {
            let Some(request) = self.lock_state().entries.pop_front() else {
                return;
            };

            self.process(request).await;
            // let producers run between entries
            tokio::task::yield_now().await;
        }
    }

    /// Called when a drain task ends, normally or by unwinding
    fn finish_drain(self: &Arc<Self>) {
        {
            let mut state = self.lock_state();
            if state.entries.is_empty() {
                state.draining = false;
                drop(state);
                self.idle.notify_waiters();
                return;
            }
        }

        // Entries arrived after the last pop, or the task panicked mid-request
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Restarting drain for remaining requests");
                handle.spawn(Arc::clone(self).drain());
            }
            Err(_) => {
                warn!("No runtime to resume draining, requests stay queued");
                self.lock_state().draining = false;
                self.idle.notify_waiters();
            }
        }
    }

    async fn process(&self, request: ValidationRequest) {
        let Some(document_path) = uri_to_path(&request.uri) else {
            warn!(uri = %request.uri, "Skipping validation of non-file document");
            return;
        };

        let workspace_roots: Vec<PathBuf> = self
            .connection
            .workspace_folders()
            .await
            .iter()
            .filter_map(|uri| uri_to_path(uri))
            .collect();

        // Previous diagnostics stay in place while the text does not parse
        let doc = match Document::parse(&request.text) {
            Ok(doc) => doc,
            Err(e) => {
                debug!(uri = %request.uri, version = request.version, error = %e, "Document does not parse, skipping");
                return;
            }
        };

        let catalog = ModuleCatalog::discover_with(&workspace_roots, &self.config.discovery).await;
        let known_modules = match catalog {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!(error = %e, "Module discovery failed, validating without a catalog");
                ModuleCatalog::default()
            }
        };

        let diagnostics = self
            .validator
            .validate(&document_path, &doc, &known_modules)
            .await;
        debug!(
            uri = %request.uri,
            version = request.version,
            count = diagnostics.len(),
            "Publishing diagnostics"
        );
        self.connection
            .publish_diagnostics(&request.uri, diagnostics)
            .await;
    }
}

/// Keeps `draining` truthful when the drain future stops, including on panic
struct DrainGuard {
    inner: Arc<QueueInner>,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            warn!("Validation drain panicked, dropping the request in progress");
        }
        self.inner.finish_drain();
    }
}

/// Local path for a `file:` URI. Plain paths are accepted as they are; other
/// schemes have no path.
pub fn uri_to_path(uri: &str) -> Option<PathBuf> {
    match Url::parse(uri) {
        Ok(url) if url.scheme() == "file" => url.to_file_path().ok(),
        Ok(_) => None,
        Err(url::ParseError::RelativeUrlWithoutBase) => Some(PathBuf::from(uri)),
        Err(_) => None,
    }
}

/// `file:` URI for a path, made absolute against the current directory
pub fn path_to_uri(path: &Path) -> Result<String> {
    let absolute = std::path::absolute(path)?;
    Url::from_file_path(&absolute)
        .map(String::from)
        .map_err(|_| ValidationError::InvalidUri {
            uri: absolute.display().to_string(),
        })
}
