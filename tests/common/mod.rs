#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cnxml_validate::diagnostics::Diagnostic;
use cnxml_validate::queue::{EditorConnection, path_to_uri};
use tempfile::TempDir;
use tokio::sync::Notify;

/// Wrap a content body in a CNXML document
pub fn page(body: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<document xmlns=\"http://cnx.rice.edu/cnxml\">\n<content>\n{}\n</content>\n</document>\n",
        body
    )
}

/// A book checkout on disk: `<root>/modules/<name>/index.cnxml`
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn uri(&self) -> String {
        path_to_uri(self.root()).unwrap()
    }

    pub fn module_path(&self, name: &str) -> PathBuf {
        self.root().join("modules").join(name).join("index.cnxml")
    }

    pub fn module_uri(&self, name: &str) -> String {
        path_to_uri(&self.module_path(name)).unwrap()
    }

    pub fn add_module(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.module_path(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, contents).unwrap();
        path
    }

    pub fn add_file(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.root().join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, contents).unwrap();
        path
    }

    pub fn read(&self, path: &Path) -> String {
        std::fs::read_to_string(path).unwrap()
    }
}

/// Editor double that records every publish in order.
///
/// A gated connection parks the first `workspace_folders` call until released,
/// which holds the drain inside its first request.
pub struct RecordingConnection {
    folders: Vec<String>,
    published: Mutex<Vec<(String, Vec<Diagnostic>)>>,
    gate: Mutex<Option<Arc<Notify>>>,
    release: Arc<Notify>,
    entered: Notify,
}

impl RecordingConnection {
    pub fn new(folders: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            folders,
            published: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
            release: Arc::new(Notify::new()),
            entered: Notify::new(),
        })
    }

    pub fn gated(folders: Vec<String>) -> Arc<Self> {
        let release = Arc::new(Notify::new());
        Arc::new(Self {
            folders,
            published: Mutex::new(Vec::new()),
            gate: Mutex::new(Some(release.clone())),
            release,
            entered: Notify::new(),
        })
    }

    /// Resolves once the gated call has started
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }

    pub fn published(&self) -> Vec<(String, Vec<Diagnostic>)> {
        self.published.lock().unwrap().clone()
    }

    pub fn messages_for(&self, uri: &str) -> Vec<Vec<String>> {
        self.published()
            .into_iter()
            .filter(|(published_uri, _)| published_uri == uri)
            .map(|(_, diagnostics)| diagnostics.into_iter().map(|d| d.message).collect())
            .collect()
    }
}

#[async_trait]
impl EditorConnection for RecordingConnection {
    async fn workspace_folders(&self) -> Vec<String> {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            self.entered.notify_one();
            gate.notified().await;
        }
        self.folders.clone()
    }

    async fn publish_diagnostics(&self, uri: &str, diagnostics: Vec<Diagnostic>) {
        self.published
            .lock()
            .unwrap()
            .push((uri.to_string(), diagnostics));
    }
}
