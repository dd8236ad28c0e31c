//! Identifier Registry & Repair Engine
//!
//! Gives every identifiable content element that lacks an `id` a generated one of
//! the form `<prefix>-<counter>`, never colliding with IDs already in the document.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::content_model::ContentModel;
use crate::document::{Document, SourcePosition};
use crate::error::{Result, ValidationError};
use crate::file_discovery::ModuleCatalog;

pub const ID_PADDING_CHARS: usize = 5;

/// Left-pad `text` with `pad` up to `size` characters; longer text is returned as is.
pub fn pad_left(text: &str, pad: char, size: usize) -> String {
    let len = text.chars().count();
    if len >= size {
        return text.to_string();
    }
    let mut padded: String = std::iter::repeat_n(pad, size - len).collect();
    padded.push_str(text);
    padded
}

pub fn build_id(model: &ContentModel, tag: &str, counter: u64) -> Result<String> {
    let prefix = model.lookup_prefix(tag)?;
    Ok(format!(
        "{}-{}",
        prefix,
        pad_left(&counter.to_string(), '0', ID_PADDING_CHARS)
    ))
}

/// An ID written onto an element during repair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssignedId {
    pub tag: String,
    pub id: String,
    pub position: SourcePosition,
}

/// Taken IDs and per-tag counters for one repair call
pub struct IdRegistry<'m> {
    model: &'m ContentModel,
    taken: HashSet<String>,
    high_water: HashMap<String, u64>,
}

impl<'m> IdRegistry<'m> {
    pub fn from_document(model: &'m ContentModel, doc: &Document) -> Self {
        let taken = doc
            .elements_in(model.namespace())
            .filter_map(|element| element.attribute("id"))
            .map(str::to_string)
            .collect();

        Self {
            model,
            taken,
            high_water: HashMap::new(),
        }
    }

    /// Claim the next free ID for `tag`
    pub fn next_id(&mut self, tag: &str) -> Result<String> {
        let mut counter = self.high_water.get(tag).map_or(1, |last| last + 1);
        let mut candidate = build_id(self.model, tag, counter)?;
        while self.taken.contains(&candidate) {
            counter += 1;
            candidate = build_id(self.model, tag, counter)?;
        }

        self.taken.insert(candidate.clone());
        self.high_water.insert(tag.to_string(), counter);
        Ok(candidate)
    }
}

pub fn needs_ids(doc: &Document, model: &ContentModel) -> bool {
    doc.elements().any(|element| model.needs_id(element))
}

/// Assign IDs in place, in document order
pub fn fix_document(doc: &mut Document, model: &ContentModel) -> Result<Vec<AssignedId>> {
    let mut registry = IdRegistry::from_document(model, doc);
    let mut assigned = Vec::new();

    doc.visit_elements_mut(&mut |element| -> Result<()> {
        if !model.needs_id(element) {
            return Ok(());
        }
        let tag = model.tag_of(element);
        let id = registry.next_id(&tag)?;
        element.set_attribute("id", id.clone());
        assigned.push(AssignedId {
            tag,
            id,
            position: element.position(),
        });
        Ok(())
    })?;

    Ok(assigned)
}

/// Output of a successful repair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repair {
    pub output: String,
    pub assigned: Vec<AssignedId>,
}

/// Parse, fix and serialize one document. Output equal to input is a bug.
pub fn repair(input: &str, path: &Path, model: &ContentModel) -> Result<Repair> {
    let doc = Document::parse(input)?;
    repair_parsed(doc, input, path, model)
}

fn repair_parsed(
    mut doc: Document,
    input: &str,
    path: &Path,
    model: &ContentModel,
) -> Result<Repair> {
    let assigned = fix_document(&mut doc, model)?;
    let output = doc.serialize();
    if output == input {
        return Err(ValidationError::UnchangedOutput {
            path: path.to_path_buf(),
        });
    }
    debug!(path = %path.display(), assigned = assigned.len(), "Repaired element ids");
    Ok(Repair { output, assigned })
}

pub fn id_fixer(input: &str, path: &Path, model: &ContentModel) -> Result<String> {
    repair(input, path, model).map(|repair| repair.output)
}

/// A module rewritten by [`ensure_ids`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairedFile {
    pub path: PathBuf,
    pub assigned: Vec<AssignedId>,
}

/// Repair every module in the catalog that has elements missing IDs.
///
/// All repairs are computed before the first write, so a fatal error in any
/// module leaves every file untouched. Modules that cannot be read or parsed are
/// skipped.
pub async fn ensure_ids(catalog: &ModuleCatalog, model: &ContentModel) -> Result<Vec<RepairedFile>> {
    let mut pending = Vec::new();

    for path in catalog.iter() {
        let input = match fs::read_to_string(path).await {
            Ok(input) => input,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping module that cannot be read");
                continue;
            }
        };
        let doc = match Document::parse(&input) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping module that does not parse");
                continue;
            }
        };
        if !needs_ids(&doc, model) {
            continue;
        }

        pending.push((path, repair_parsed(doc, &input, path, model)?));
    }

    let mut repaired = Vec::with_capacity(pending.len());
    for (path, repair) in pending {
        fs::write(path, &repair.output).await?;
        info!(path = %path.display(), count = repair.assigned.len(), "Added missing ids");
        repaired.push(RepairedFile {
            path: path.to_path_buf(),
            assigned: repair.assigned,
        });
    }

    Ok(repaired)
}
