//! CNXML content model: which elements carry IDs and how generated IDs are prefixed.

use std::collections::{BTreeMap, BTreeSet};

use crate::document::Element;
use crate::error::{Result, ValidationError};

pub const NS_CNXML: &str = "http://cnx.rice.edu/cnxml";

/// Element tag to generated-ID prefix
const DEFAULT_PREFIXES: &[(&str, &str)] = &[
    ("para", "para"),
    ("equation", "eq"),
    ("list", "list"),
    ("section", "sect"),
    ("problem", "prob"),
    ("solution", "sol"),
    ("exercise", "exer"),
    ("example", "exam"),
    ("figure", "fig"),
    ("subfigure", "subfig"),
    ("definition", "def"),
    ("meaning", "mean"),
    ("table", "table"),
    ("quote", "quote"),
    ("note", "note"),
    ("footnote", "foot"),
    ("commentary", "comm"),
    ("rule", "rule"),
    ("statement", "stmt"),
    ("proof", "proof"),
    ("media", "media"),
    ("code", "code"),
    ("preformat", "pre"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentModel {
    namespace: String,
    prefixes: BTreeMap<String, String>,
    identifiable: BTreeSet<String>,
}

impl Default for ContentModel {
    fn default() -> Self {
        let prefixes: BTreeMap<String, String> = DEFAULT_PREFIXES
            .iter()
            .map(|(tag, prefix)| (tag.to_string(), prefix.to_string()))
            .collect();
        let identifiable = prefixes.keys().cloned().collect();

        Self {
            namespace: NS_CNXML.to_string(),
            prefixes,
            identifiable,
        }
    }
}

impl ContentModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the prefix for a tag and mark it identifiable
    pub fn with_prefix(mut self, tag: &str, prefix: &str) -> Self {
        let tag = tag.to_lowercase();
        self.prefixes.insert(tag.clone(), prefix.to_string());
        self.identifiable.insert(tag);
        self
    }

    /// Mark a tag as needing an ID without registering a prefix for it
    pub fn with_identifiable(mut self, tag: &str) -> Self {
        self.identifiable.insert(tag.to_lowercase());
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn lookup_prefix(&self, tag: &str) -> Result<&str> {
        self.prefixes
            .get(tag)
            .map(String::as_str)
            .ok_or_else(|| ValidationError::MissingIdPrefix {
                tag: tag.to_string(),
            })
    }

    pub fn is_identifiable(&self, tag: &str, has_id: bool) -> bool {
        !has_id && self.identifiable.contains(tag)
    }

    /// Whether the element belongs to the content namespace
    pub fn is_content_element(&self, element: &Element) -> bool {
        element.is_in_namespace(&self.namespace)
    }

    /// Lower-cased local name used for prefix lookups
    pub fn tag_of(&self, element: &Element) -> String {
        element.local_name().to_lowercase()
    }

    /// The missing-ID predicate. Tag names match exactly; only the prefix
    /// lookup lower-cases them.
    pub fn needs_id(&self, element: &Element) -> bool {
        self.is_content_element(element)
            && self.is_identifiable(element.local_name(), element.has_attribute("id"))
    }
}
