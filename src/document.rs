//! Positioned XML Document Model
//!
//! A small owned tree built from `quick-xml` pull events. Every node remembers where
//! it started in the source text so diagnostics can be placed without re-parsing,
//! and every untouched node serializes back to exactly the bytes it was read from.

use std::fmt;
use std::str::FromStr;

use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ParseResult};

/// Namespace bound to the reserved `xml` prefix
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// 1-based line/column of a node's first character.
///
/// Columns count UTF-16 code units, which is what editors use for positions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct SourcePosition {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A single `name="value"` pair with its value already unescaped
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Attribute {
    pub name: String,
    pub value: String,
}

/// Character data, comments, CDATA, processing instructions and declarations,
/// carried through verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Verbatim {
    raw: String,
    position: SourcePosition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Node {
    Element(Element),
    Other(Verbatim),
}

impl Node {
    pub fn position(&self) -> SourcePosition {
        match self {
            Node::Element(element) => element.position,
            Node::Other(verbatim) => verbatim.position,
        }
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(element) => Some(element),
            Node::Other(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: String,
    namespace: Option<String>,
    attributes: Vec<Attribute>,
    children: Vec<Node>,
    position: SourcePosition,
    end_position: SourcePosition,
    next_sibling_position: Option<SourcePosition>,
    /// Source text of the start tag; dropped when the tag has to be re-rendered
    start_tag: Option<String>,
    /// Source text of the end tag; `None` for `<empty/>` elements
    end_tag: Option<String>,
}

impl Element {
    fn open(
        tag: &BytesStart<'_>,
        raw: &str,
        position: SourcePosition,
        ancestors: &[Element],
    ) -> ParseResult<Self> {
        let name = String::from_utf8_lossy(tag.name().as_ref()).into_owned();

        let mut attributes = Vec::new();
        for attribute in tag.attributes() {
            let attribute = attribute.map_err(|e| ParseError::Attribute {
                position,
                details: e.to_string(),
            })?;
            let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
            // Undeclared entities (e.g. &nbsp;) are kept as written
            let value = match attribute.unescape_value() {
                Ok(value) => value.into_owned(),
                Err(_) => String::from_utf8_lossy(&attribute.value).into_owned(),
            };
            attributes.push(Attribute { name: key, value });
        }

        let namespace = resolve_namespace(prefix_of(&name), &attributes, ancestors);

        Ok(Self {
            name,
            namespace,
            attributes,
            children: Vec::new(),
            position,
            end_position: position,
            next_sibling_position: None,
            start_tag: Some(raw.to_string()),
            end_tag: None,
        })
    }

    /// Qualified tag name as written (`c:para` or `para`)
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_name(&self) -> &str {
        match self.name.split_once(':') {
            Some((_, local)) => local,
            None => &self.name,
        }
    }

    /// Namespace URI in scope for this element's prefix
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn is_in_namespace(&self, namespace: &str) -> bool {
        self.namespace() == Some(namespace)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attribute| attribute.name == name)
            .map(|attribute| attribute.value.as_str())
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attribute(name).is_some()
    }

    /// Set an attribute value.
    ///
    /// A new attribute is spliced into the original start tag so the rest of the
    /// tag keeps its formatting; changing an existing value re-renders the tag.
    pub fn set_attribute(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();

        if let Some(existing) = self
            .attributes
            .iter_mut()
            .find(|attribute| attribute.name == name)
        {
            existing.value = value;
            self.start_tag = None;
            return;
        }

        if let Some(start_tag) = self.start_tag.as_mut() {
            let close = if start_tag.ends_with("/>") {
                start_tag.len() - 2
            } else {
                start_tag.len() - 1
            };
            let head = start_tag[..close].trim_end().len();
            start_tag.insert_str(head, &format!(" {}=\"{}\"", name, escape(value.as_str())));
        }

        self.attributes.push(Attribute {
            name: name.to_string(),
            value,
        });
    }

    pub fn position(&self) -> SourcePosition {
        self.position
    }

    /// Position just past the end tag (or `/>`)
    pub fn end_position(&self) -> SourcePosition {
        self.end_position
    }

    /// Start of the node that follows this element under the same parent
    pub fn next_sibling_position(&self) -> Option<SourcePosition> {
        self.next_sibling_position
    }

    fn write_to(&self, out: &mut String) {
        match &self.start_tag {
            Some(raw) => out.push_str(raw),
            None => self.render_start_tag(out),
        }
        for child in &self.children {
            write_node(child, out);
        }
        if let Some(end_tag) = &self.end_tag {
            out.push_str(end_tag);
        }
    }

    fn render_start_tag(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for attribute in &self.attributes {
            out.push(' ');
            out.push_str(&attribute.name);
            out.push_str("=\"");
            out.push_str(&escape(attribute.value.as_str()));
            out.push('"');
        }
        out.push_str(if self.end_tag.is_none() { "/>" } else { ">" });
    }
}

/// Pre-order iterator over elements
pub struct Elements<'a> {
    stack: Vec<std::slice::Iter<'a, Node>>,
}

impl<'a> Iterator for Elements<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<&'a Element> {
        while let Some(siblings) = self.stack.last_mut() {
            match siblings.next() {
                Some(Node::Element(element)) => {
                    self.stack.push(element.children.iter());
                    return Some(element);
                }
                Some(Node::Other(_)) => continue,
                None => {
                    self.stack.pop();
                }
            }
        }
        None
    }
}

/// A parsed XML document owned by a single validation or repair call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Document {
    /// Parse XML text into a positioned tree
    pub fn parse(text: &str) -> ParseResult<Self> {
        let lines = LineIndex::new(text);
        let mut reader = Reader::from_str(text);
        let mut open: Vec<Element> = Vec::new();
        let mut top_level: Vec<Node> = Vec::new();

        loop {
            let start = reader.buffer_position() as usize;
            let event = reader.read_event().map_err(|e| ParseError::Syntax {
                position: lines.position(reader.error_position() as usize),
                details: e.to_string(),
            })?;
            let end = reader.buffer_position() as usize;
            let raw = text.get(start..end).unwrap_or_default();
            let position = lines.position(start);

            match event {
                Event::Start(tag) => {
                    let element = Element::open(&tag, raw, position, &open)?;
                    open.push(element);
                }
                Event::Empty(tag) => {
                    let mut element = Element::open(&tag, raw, position, &open)?;
                    element.end_position = lines.position(end);
                    attach(&mut open, &mut top_level, Node::Element(element));
                }
                Event::End(tag) => {
                    let Some(mut element) = open.pop() else {
                        return Err(ParseError::UnexpectedEndTag {
                            name: String::from_utf8_lossy(tag.name().as_ref()).into_owned(),
                            position,
                        });
                    };
                    element.end_tag = Some(raw.to_string());
                    element.end_position = lines.position(end);
                    link_siblings(&mut element.children);
                    attach(&mut open, &mut top_level, Node::Element(element));
                }
                Event::Eof => break,
                _ => attach(
                    &mut open,
                    &mut top_level,
                    Node::Other(Verbatim {
                        raw: raw.to_string(),
                        position,
                    }),
                ),
            }
        }

        if let Some(unclosed) = open.last() {
            return Err(ParseError::UnclosedElement {
                name: unclosed.name.clone(),
                position: unclosed.position,
            });
        }

        link_siblings(&mut top_level);

        let mut roots = top_level.iter().filter_map(Node::as_element);
        if roots.next().is_none() {
            return Err(ParseError::NoRootElement);
        }
        if let Some(second) = roots.next() {
            return Err(ParseError::MultipleRoots {
                position: second.position,
            });
        }

        Ok(Self { nodes: top_level })
    }

    /// Render the tree back to text
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            write_node(node, &mut out);
        }
        out
    }

    /// Every element in document order
    pub fn elements(&self) -> Elements<'_> {
        Elements {
            stack: vec![self.nodes.iter()],
        }
    }

    /// Elements bound to the given namespace URI, in document order
    pub fn elements_in<'a>(&'a self, namespace: &'a str) -> impl Iterator<Item = &'a Element> {
        self.elements()
            .filter(move |element| element.is_in_namespace(namespace))
    }

    /// Visit every element mutably in document order, stopping at the first error
    pub fn visit_elements_mut<E, F>(&mut self, visit: &mut F) -> Result<(), E>
    where
        F: FnMut(&mut Element) -> Result<(), E>,
    {
        visit_nodes_mut(&mut self.nodes, visit)
    }
}

impl FromStr for Document {
    type Err = ParseError;

    fn from_str(text: &str) -> ParseResult<Self> {
        Self::parse(text)
    }
}

fn visit_nodes_mut<E, F>(nodes: &mut [Node], visit: &mut F) -> Result<(), E>
where
    F: FnMut(&mut Element) -> Result<(), E>,
{
    for node in nodes {
        if let Node::Element(element) = node {
            visit(element)?;
            visit_nodes_mut(&mut element.children, visit)?;
        }
    }
    Ok(())
}

fn write_node(node: &Node, out: &mut String) {
    match node {
        Node::Element(element) => element.write_to(out),
        Node::Other(verbatim) => out.push_str(&verbatim.raw),
    }
}

fn attach(open: &mut [Element], top_level: &mut Vec<Node>, node: Node) {
    match open.last_mut() {
        Some(parent) => parent.children.push(node),
        None => top_level.push(node),
    }
}

fn link_siblings(nodes: &mut [Node]) {
    for i in 1..nodes.len() {
        let next = nodes[i].position();
        if let Node::Element(element) = &mut nodes[i - 1] {
            element.next_sibling_position = Some(next);
        }
    }
}

fn prefix_of(name: &str) -> Option<&str> {
    name.split_once(':').map(|(prefix, _)| prefix)
}

fn resolve_namespace(
    prefix: Option<&str>,
    attributes: &[Attribute],
    ancestors: &[Element],
) -> Option<String> {
    let declaration = match prefix {
        Some("xml") => return Some(XML_NAMESPACE.to_string()),
        Some(prefix) => format!("xmlns:{}", prefix),
        None => "xmlns".to_string(),
    };

    std::iter::once(attributes)
        .chain(
            ancestors
                .iter()
                .rev()
                .map(|ancestor| ancestor.attributes.as_slice()),
        )
        .find_map(|scope| scope.iter().find(|attribute| attribute.name == declaration))
        .map(|attribute| attribute.value.clone())
        // xmlns="" undeclares the default namespace
        .filter(|uri| !uri.is_empty())
}

/// Byte offset to line/column conversion
struct LineIndex<'a> {
    text: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(text: &'a str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        Self { text, line_starts }
    }

    fn position(&self, offset: usize) -> SourcePosition {
        let offset = offset.min(self.text.len());
        let line = self.line_starts.partition_point(|&start| start <= offset);
        let line_start = self.line_starts[line - 1];
        let column = self
            .text
            .get(line_start..offset)
            .map(|prefix| prefix.encode_utf16().count())
            .unwrap_or(0);

        SourcePosition {
            line: line as u32,
            column: column as u32 + 1,
        }
    }
}
