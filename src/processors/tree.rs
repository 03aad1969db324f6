//! Content tree: markup split into translatable leaves and structural nodes

use html5ever::tendril::TendrilSink;
use html5ever::{namespace_url, ns, parse_document, parse_fragment, LocalName, QualName};
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use regex::{Captures, Regex};
use std::borrow::Cow;
use std::sync::OnceLock;
use tracing::debug;

use crate::core::errors::{Result, TranslationError};
use crate::processors::markup::{self, MarkupStyle};
use crate::processors::skip_tags::SkipTagRegistry;

/// Index of a node inside its tree's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Leaf,
    NonLeaf,
}

/// Tag name and attributes of a structural element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementMeta {
    pub name: String,
    pub attrs: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeContent {
    /// Translatable text
    Text(String),
    /// Element whose children are part of the tree
    Element(ElementMeta),
    /// Verbatim markup never descended into (skip tags, comments, doctype)
    Opaque(String),
    /// Document or fragment root
    Container,
}

#[derive(Debug, Clone)]
pub struct ContentNode {
    pub content: NodeContent,
    /// Units of `content` under the measuring function given at build time
    pub size: usize,
    /// Non-owning back-reference
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub translated: Option<String>,
    /// Why translation of this leaf did not happen
    pub failure: Option<String>,
}

impl ContentNode {
    fn new(content: NodeContent, size: usize, parent: Option<NodeId>) -> Self {
        Self {
            content,
            size,
            parent,
            children: Vec::new(),
            translated: None,
            failure: None,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self.content {
            NodeContent::Text(_) => NodeKind::Leaf,
            _ => NodeKind::NonLeaf,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.kind() == NodeKind::Leaf
    }

    /// Original leaf text, `None` for non-leaves
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            NodeContent::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Translated text if present, else the original
    pub fn output_text(&self) -> Option<&str> {
        self.translated.as_deref().or_else(|| self.text())
    }
}

/// Arena-backed tree; parents own children through index lists
#[derive(Debug, Clone)]
pub struct ContentTree {
    nodes: Vec<ContentNode>,
    root: NodeId,
    /// XML declaration kept verbatim ahead of the markup
    pub prologue: Option<String>,
    pub style: MarkupStyle,
}

impl ContentTree {
    fn with_root(content: NodeContent, size: usize) -> Self {
        Self {
            nodes: vec![ContentNode::new(content, size, None)],
            root: NodeId(0),
            prologue: None,
            style: MarkupStyle::Html,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&ContentNode> {
        self.nodes.get(id.0)
    }

    pub fn node(&self, id: NodeId) -> Result<&ContentNode> {
        self.get(id).ok_or_else(|| TranslationError::ReconstructionError {
            message: format!("node {} is not part of the tree", id.0),
        })
    }

    fn push(&mut self, parent: NodeId, content: NodeContent, size: usize) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(ContentNode::new(content, size, Some(parent)));
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Leaf ids in document order
    pub fn leaves(&self) -> Vec<NodeId> {
        let mut leaves = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id.0];
            if node.is_leaf() {
                leaves.push(id);
            }
            stack.extend(node.children.iter().rev());
        }
        leaves
    }

    /// Record a translation; ignored for non-leaves
    pub fn set_translation(&mut self, id: NodeId, text: String) -> bool {
        match self.nodes.get_mut(id.0) {
            Some(node) if node.is_leaf() => {
                node.translated = Some(text);
                node.failure = None;
                true
            }
            _ => false,
        }
    }

    pub fn mark_failed(&mut self, id: NodeId, reason: impl Into<String>) -> bool {
        match self.nodes.get_mut(id.0) {
            Some(node) if node.is_leaf() => {
                node.failure = Some(reason.into());
                true
            }
            _ => false,
        }
    }

    /// Leaves carrying a failure
    pub fn failed_leaves(&self) -> Vec<NodeId> {
        self.leaves()
            .into_iter()
            .filter(|id| self.nodes[id.0].failure.is_some())
            .collect()
    }

    /// Element names in document order; used to compare structure
    pub fn element_sequence(&self) -> Vec<(String, Vec<(String, String)>)> {
        let mut sequence = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id.0];
            if let NodeContent::Element(meta) = &node.content {
                sequence.push((meta.name.clone(), meta.attrs.clone()));
            }
            stack.extend(node.children.iter().rev());
        }
        sequence
    }

    #[cfg(test)]
    pub(crate) fn nodes_mut(&mut self) -> &mut Vec<ContentNode> {
        &mut self.nodes
    }
}

/// Parses markup into a [`ContentTree`]
#[derive(Debug, Clone, Default)]
pub struct TreeBuilder {
    skip_tags: SkipTagRegistry,
}

/// Leading doctype or `<html>`, possibly after comments
fn is_full_document(html: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?is)^\s*(?:<!--.*?-->\s*)*<(?:!doctype|html[\s>])").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(html))
}

impl TreeBuilder {
    pub fn new(skip_tags: SkipTagRegistry) -> Self {
        Self { skip_tags }
    }

    pub fn skip_tags(&self) -> &SkipTagRegistry {
        &self.skip_tags
    }

    /// Build from raw bytes; fails only when they are not UTF-8
    pub fn build_bytes(&self, bytes: &[u8], measure: impl Fn(&str) -> usize) -> Result<ContentTree> {
        let html = std::str::from_utf8(bytes).map_err(|e| TranslationError::ParseError {
            message: format!("input is not valid UTF-8: {e}"),
        })?;
        self.build(html, measure)
    }

    /// Build a tree; leaf sizes come from `measure`.
    ///
    /// Parsing is permissive: malformed markup is repaired the way a browser
    /// would repair it.
    pub fn build(&self, html: &str, measure: impl Fn(&str) -> usize) -> Result<ContentTree> {
        let html = html.strip_prefix('\u{feff}').unwrap_or(html);

        if html.trim().is_empty() {
            let mut tree = ContentTree::with_root(NodeContent::Text(html.to_string()), measure(html));
            tree.style = MarkupStyle::Html;
            return Ok(tree);
        }

        let (prologue, body) = split_prologue(html);
        let style = if prologue.is_some() || body.contains("http://www.w3.org/1999/xhtml") {
            MarkupStyle::Xhtml
        } else {
            MarkupStyle::Html
        };

        let source = normalize_source(body, style);
        let body: &str = &source;

        let mut tree = ContentTree::with_root(NodeContent::Container, 0);
        tree.prologue = prologue.map(str::to_string);
        tree.style = style;

        let root = tree.root();
        if is_full_document(body) {
            let dom = parse_document(RcDom::default(), Default::default())
                .from_utf8()
                .read_from(&mut body.as_bytes())
                .map_err(|e| TranslationError::ParseError {
                    message: e.to_string(),
                })?;
            let children = markup::element_children(&dom.document);
            self.convert_children(&mut tree, root, &children, &measure)?;
        } else {
            let dom = parse_fragment(
                RcDom::default(),
                Default::default(),
                QualName::new(None, ns!(html), LocalName::from("body")),
                vec![],
            )
            .from_utf8()
            .read_from(&mut body.as_bytes())
            .map_err(|e| TranslationError::ParseError {
                message: e.to_string(),
            })?;
            // Fragment content hangs off a synthetic <html> element
            let wrapper = dom.document.children.borrow().first().cloned();
            if let Some(wrapper) = wrapper {
                let children = markup::element_children(&wrapper);
                self.convert_children(&mut tree, root, &children, &measure)?;
            }
        }

        debug!(
            "Built content tree: {} nodes, {} leaves",
            tree.len(),
            tree.leaves().len()
        );
        Ok(tree)
    }

    fn convert_children(
        &self,
        tree: &mut ContentTree,
        parent: NodeId,
        children: &[Handle],
        measure: &impl Fn(&str) -> usize,
    ) -> Result<()> {
        let mut text = String::new();

        for child in children {
            if let NodeData::Text { contents } = &child.data {
                text.push_str(&contents.borrow());
                continue;
            }
            flush_text(tree, parent, &mut text, measure);

            match &child.data {
                NodeData::Element { .. } => {
                    let name = markup::element_name(child).unwrap_or_default();
                    if self.skip_tags.is_skipped(&name) || markup::is_raw_text(&name) {
                        let verbatim = markup::serialize_opaque(child, tree.style)?;
                        tree.push(parent, NodeContent::Opaque(verbatim), 0);
                        continue;
                    }

                    let meta = ElementMeta {
                        name,
                        attrs: markup::element_attrs(child),
                    };
                    let id = tree.push(parent, NodeContent::Element(meta), 0);
                    self.convert_children(tree, id, &markup::element_children(child), measure)?;
                }
                _ => {
                    let verbatim = markup::serialize_opaque(child, tree.style)?;
                    tree.push(parent, NodeContent::Opaque(verbatim), 0);
                }
            }
        }

        flush_text(tree, parent, &mut text, measure);
        Ok(())
    }
}

fn flush_text(
    tree: &mut ContentTree,
    parent: NodeId,
    text: &mut String,
    measure: &impl Fn(&str) -> usize,
) {
    if text.is_empty() {
        return;
    }
    let merged = std::mem::take(text);
    let size = measure(&merged);
    tree.push(parent, NodeContent::Text(merged), size);
}

/// Rewrite source constructs the HTML parser would not keep as written.
///
/// In XHTML, `<div/>` closes the element; the HTML parser ignores the slash
/// and would nest everything after it, so non-void elements are expanded to
/// `<div></div>`. The parser also drops one newline right after `<pre>`,
/// `<textarea>` and `<listing>`, so that newline is doubled.
fn normalize_source(body: &str, style: MarkupStyle) -> Cow<'_, str> {
    static SELF_CLOSED: OnceLock<Option<Regex>> = OnceLock::new();
    static LEADING_NEWLINE: OnceLock<Option<Regex>> = OnceLock::new();

    let mut source = Cow::Borrowed(body);

    if style == MarkupStyle::Xhtml {
        let pattern = SELF_CLOSED.get_or_init(|| {
            Regex::new(
                r#"<([A-Za-z][\w:.-]*)((?:\s+[^\s/>"'=]+(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^\s"'>]+))?)*)\s*/>"#,
            )
            .ok()
        });
        if let Some(pattern) = pattern.as_ref().filter(|p| p.is_match(&source)) {
            let expanded = pattern
                .replace_all(&source, |caps: &Captures| {
                    let name = &caps[1];
                    if markup::is_void(&name.to_ascii_lowercase()) {
                        caps[0].to_string()
                    } else {
                        format!("<{}{}></{}>", name, &caps[2], name)
                    }
                })
                .into_owned();
            source = Cow::Owned(expanded);
        }
    }

    let pattern = LEADING_NEWLINE
        .get_or_init(|| Regex::new(r"(?i)<(?:pre|textarea|listing)(?:\s[^>]*)?>\r?\n").ok());
    if let Some(pattern) = pattern.as_ref().filter(|p| p.is_match(&source)) {
        let doubled = pattern
            .replace_all(&source, |caps: &Captures| format!("{}\n", &caps[0]))
            .into_owned();
        source = Cow::Owned(doubled);
    }

    source
}

/// Split a leading `<?xml ...?>` declaration (and the whitespace after it) off the input
fn split_prologue(html: &str) -> (Option<&str>, &str) {
    let trimmed = html.trim_start();
    if !trimmed.starts_with("<?xml") {
        return (None, html);
    }
    let offset = html.len() - trimmed.len();
    match trimmed.find("?>") {
        Some(end) => {
            let mut split = offset + end + 2;
            split += html[split..].len() - html[split..].trim_start().len();
            (Some(&html[..split]), &html[split..])
        }
        None => (None, html),
    }
}
