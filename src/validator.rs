//! Cross-Document Link/Image Validator
//!
//! Checks two things in a parsed CNXML page:
//! - every `<image src>` points at a file that exists next to the page
//! - every `<link>` resolves to exactly one target, either on the same page
//!   (`target-id`) or in a sibling module (`document`, optionally with `target-id`)
//!
//! Findings are returned as positioned diagnostics; nothing here fails.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tracing::{debug, warn};

use crate::content_model::ContentModel;
use crate::diagnostics::{Diagnostic, DiagnosticSource, element_range};
use crate::document::{Document, Element};
use crate::file_discovery::ModuleCatalog;

/// `base` joined with `relative`, where a leading `/` or drive prefix on
/// `relative` does not escape `base`
fn join_under(base: &Path, relative: &str) -> PathBuf {
    Path::new(relative)
        .components()
        .filter(|component| !matches!(component, Component::RootDir | Component::Prefix(_)))
        .fold(base.to_path_buf(), |path, component| path.join(component))
}

/// How many elements carry a given id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetMatch {
    Missing,
    Unique,
    Ambiguous,
}

#[derive(Debug, Clone)]
pub struct DocumentValidator {
    model: Arc<ContentModel>,
}

impl Default for DocumentValidator {
    fn default() -> Self {
        Self::new(Arc::new(ContentModel::default()))
    }
}

impl DocumentValidator {
    pub fn new(model: Arc<ContentModel>) -> Self {
        Self { model }
    }

    /// Image diagnostics followed by link diagnostics
    pub async fn validate(
        &self,
        document_path: &Path,
        doc: &Document,
        known_modules: &ModuleCatalog,
    ) -> Vec<Diagnostic> {
        let mut diagnostics = self.validate_image_paths(document_path, doc).await;
        diagnostics.extend(self.validate_links(doc, known_modules).await);
        diagnostics
    }

    /// Image sources are resolved relative to the page's directory
    pub async fn validate_image_paths(&self, document_path: &Path, doc: &Document) -> Vec<Diagnostic> {
        let base = document_path.parent().unwrap_or_else(|| Path::new(""));
        let mut diagnostics = Vec::new();

        for image in self.content_elements(doc, "image") {
            let Some(src) = image.attribute("src") else {
                continue;
            };
            let image_path = join_under(base, src);
            if fs::try_exists(&image_path).await.unwrap_or(false) {
                continue;
            }
            debug!(image = %image_path.display(), "Missing image");
            diagnostics.push(Diagnostic::error(
                element_range(image),
                format!("Image file {} doesn't exist!", src),
                DiagnosticSource::ImageValidation,
            ));
        }

        diagnostics
    }

    /// Same-page links first, then links into other modules
    pub async fn validate_links(&self, doc: &Document, known_modules: &ModuleCatalog) -> Vec<Diagnostic> {
        let mut diagnostics = self.validate_same_page_links(doc);
        diagnostics.extend(self.validate_other_page_links(doc, known_modules).await);
        diagnostics
    }

    fn validate_same_page_links(&self, doc: &Document) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        let same_page_links = self
            .content_elements(doc, "link")
            .filter(|link| !link.has_attribute("document"));

        for link in same_page_links {
            let Some(target_id) = link.attribute("target-id") else {
                continue;
            };
            let message = match self.match_target(doc, target_id) {
                TargetMatch::Unique => continue,
                TargetMatch::Missing => format!("Target for link doesn't exist!: {}", target_id),
                TargetMatch::Ambiguous => {
                    format!("Target for link is not unique!: {}", target_id)
                }
            };
            diagnostics.push(link_diagnostic(link, message));
        }

        diagnostics
    }

    async fn validate_other_page_links(
        &self,
        doc: &Document,
        known_modules: &ModuleCatalog,
    ) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        for link in self.content_elements(doc, "link") {
            let Some(target_module) = link.attribute("document") else {
                continue;
            };

            let Some(target_path) = known_modules.find(target_module) else {
                diagnostics.push(link_diagnostic(
                    link,
                    format!("Target document for link doesn't exist!: {}", target_module),
                ));
                continue;
            };

            let target_id = match link.attribute("target-id") {
                Some(id) if !id.is_empty() => id,
                _ => continue,
            };

            let target_doc = match self.load_target(target_path).await {
                Some(target_doc) => target_doc,
                None => {
                    diagnostics.push(link_diagnostic(
                        link,
                        format!("Could not parse target document!: {}", target_module),
                    ));
                    continue;
                }
            };

            let message = match self.match_target(&target_doc, target_id) {
                TargetMatch::Unique => continue,
                TargetMatch::Missing => {
                    format!("Target ID in document doesn't exist!: {}", target_id)
                }
                TargetMatch::Ambiguous => {
                    format!("Target ID in document is not unique!: {}", target_id)
                }
            };
            diagnostics.push(link_diagnostic(link, message));
        }

        diagnostics
    }

    async fn load_target(&self, path: &Path) -> Option<Document> {
        let text = match fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read link target");
                return None;
            }
        };
        match Document::parse(&text) {
            Ok(doc) => Some(doc),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Link target does not parse");
                None
            }
        }
    }

    fn match_target(&self, doc: &Document, target_id: &str) -> TargetMatch {
        let mut matches = doc
            .elements_in(self.model.namespace())
            .filter(|element| element.attribute("id") == Some(target_id));

        match (matches.next(), matches.next()) {
            (None, _) => TargetMatch::Missing,
            (Some(_), None) => TargetMatch::Unique,
            (Some(_), Some(_)) => TargetMatch::Ambiguous,
        }
    }

    fn content_elements<'a>(
        &'a self,
        doc: &'a Document,
        local_name: &'a str,
    ) -> impl Iterator<Item = &'a Element> {
        doc.elements_in(self.model.namespace())
            .filter(move |element| element.local_name() == local_name)
    }
}

fn link_diagnostic(link: &Element, message: String) -> Diagnostic {
    Diagnostic::error(element_range(link), message, DiagnosticSource::LinkValidation)
}
