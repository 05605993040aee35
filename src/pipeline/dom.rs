//! A small arena DOM for XHTML/HTML content documents.
//!
//! Nodes live in a `Vec` and refer to each other by index, so the tree can be
//! rewritten in place (image sources, heading spacers) without reference
//! counting. Parsing goes through html5ever's tree builder, which recovers
//! from everything publisher markup throws at it (bare `&`, unclosed `<p>`,
//! stray close tags, HTML-style void elements) the same way a browser does.

use html5ever::driver::ParseOpts;
use html5ever::tendril::{StrTendril, TendrilSink};
use html5ever::tree_builder::{ElementFlags, NodeOrText, QuirksMode, TreeSink};
use html5ever::{parse_document, Attribute, QualName};
use std::borrow::Cow;
use std::cell::RefCell;
use std::rc::Rc;

/// Index of a node inside a [`Document`].
pub type NodeId = usize;

/// Node payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Document,
    Element {
        name: String,
        attrs: Vec<(String, String)>,
    },
    Text(String),
    /// Comments and processing instructions; never rendered.
    Comment,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// Arena-backed document tree. Node 0 is always the document root.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Default for Document {
    fn default() -> Self {
        Self {
            nodes: vec![Node {
                kind: NodeKind::Document,
                parent: None,
                children: Vec::new(),
            }],
        }
    }
}

impl Document {
    pub const ROOT: NodeId = 0;

    /// Parse an HTML or XHTML document or fragment.
    pub fn parse(markup: &str) -> Self {
        parse_document(ArenaSink::new(), ParseOpts::default())
            .from_utf8()
            .one(markup.as_bytes())
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    /// Lower-case local name, if `id` is an element.
    pub fn element_name(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id].kind {
            NodeKind::Element { name, .. } => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id].kind {
            NodeKind::Text(t) => Some(t.as_str()),
            _ => None,
        }
    }

    pub fn attr(&self, id: NodeId, key: &str) -> Option<&str> {
        match &self.nodes[id].kind {
            NodeKind::Element { attrs, .. } => attrs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }

    pub fn set_attr(&mut self, id: NodeId, key: &str, value: impl Into<String>) {
        if let NodeKind::Element { attrs, .. } = &mut self.nodes[id].kind {
            let value = value.into();
            match attrs.iter_mut().find(|(k, _)| k == key) {
                Some(slot) => slot.1 = value,
                None => attrs.push((key.to_string(), value)),
            }
        }
    }

    /// All nodes below `id` in document order (pre-order), excluding `id`.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.nodes[id].children.iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.nodes[next].children.iter().rev().copied());
        }
        out
    }

    /// Concatenated text of every text node below `id`.
    pub fn text_content(&self, id: NodeId) -> String {
        self.descendants(id)
            .into_iter()
            .filter_map(|n| self.text(n))
            .collect()
    }

    /// Create an attribute-less element and insert it under `parent` at `index`.
    pub fn insert_element(&mut self, parent: NodeId, index: usize, name: &str) -> NodeId {
        let id = self.create(NodeKind::Element {
            name: name.to_string(),
            attrs: Vec::new(),
        });
        let children = &mut self.nodes[parent].children;
        let index = index.min(children.len());
        children.insert(index, id);
        self.nodes[id].parent = Some(parent);
        id
    }

    // ── Tree surgery used by the parser ──────────────────────────────────────

    fn create(&mut self, kind: NodeKind) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            kind,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    fn append(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[child].parent = Some(parent);
        self.nodes[parent].children.push(child);
    }

    fn insert_before(&mut self, sibling: NodeId, child: NodeId) {
        let Some(parent) = self.nodes[sibling].parent else {
            return;
        };
        self.detach(child);
        let siblings = &mut self.nodes[parent].children;
        let index = siblings
            .iter()
            .position(|&c| c == sibling)
            .unwrap_or(siblings.len());
        siblings.insert(index, child);
        self.nodes[child].parent = Some(parent);
    }

    fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id].parent.take() {
            self.nodes[parent].children.retain(|&c| c != id);
        }
    }

    fn append_text(&mut self, parent: NodeId, text: &str) {
        if text.is_empty() {
            return;
        }
        // The tokenizer hands text over in chunks; keep one node per run.
        if let Some(&last) = self.nodes[parent].children.last() {
            if let NodeKind::Text(existing) = &mut self.nodes[last].kind {
                existing.push_str(text);
                return;
            }
        }
        let id = self.create(NodeKind::Text(text.to_string()));
        self.append(parent, id);
    }
}

/// Strip any `prefix:` left on a name outside foreign content.
fn local_part(name: &str) -> String {
    let local = name.rsplit(':').next().unwrap_or(name);
    local.to_ascii_lowercase()
}

// ── html5ever sink ───────────────────────────────────────────────────────────

/// Tree-builder handle: the arena index plus the element name the builder
/// asks for while matching scopes.
#[derive(Clone)]
struct SinkHandle {
    id: NodeId,
    name: Rc<QualName>,
}

/// Builds a [`Document`] from html5ever's tree-construction callbacks.
///
/// `TreeSink` methods take `&self`, hence the `RefCell`.
struct ArenaSink {
    doc: RefCell<Document>,
    unnamed: Rc<QualName>,
}

impl ArenaSink {
    fn new() -> Self {
        Self {
            doc: RefCell::new(Document::default()),
            unnamed: Rc::new(QualName::new(
                None,
                html5ever::ns!(),
                html5ever::local_name!(""),
            )),
        }
    }

    fn handle(&self, id: NodeId) -> SinkHandle {
        SinkHandle {
            id,
            name: Rc::clone(&self.unnamed),
        }
    }
}

impl TreeSink for ArenaSink {
    type Handle = SinkHandle;
    type Output = Document;
    type ElemName<'a>
        = &'a QualName
    where
        Self: 'a;

    fn finish(self) -> Document {
        self.doc.into_inner()
    }

    fn parse_error(&self, _msg: Cow<'static, str>) {}

    fn get_document(&self) -> SinkHandle {
        self.handle(Document::ROOT)
    }

    fn elem_name<'a>(&'a self, target: &'a SinkHandle) -> Self::ElemName<'a> {
        &target.name
    }

    fn create_element(
        &self,
        name: QualName,
        attrs: Vec<Attribute>,
        _flags: ElementFlags,
    ) -> SinkHandle {
        let attrs = attrs
            .into_iter()
            .map(|a| (local_part(&a.name.local), a.value.to_string()))
            .collect();
        let id = self.doc.borrow_mut().create(NodeKind::Element {
            name: local_part(&name.local),
            attrs,
        });
        SinkHandle {
            id,
            name: Rc::new(name),
        }
    }

    fn create_comment(&self, _text: StrTendril) -> SinkHandle {
        let id = self.doc.borrow_mut().create(NodeKind::Comment);
        self.handle(id)
    }

    fn create_pi(&self, _target: StrTendril, _data: StrTendril) -> SinkHandle {
        let id = self.doc.borrow_mut().create(NodeKind::Comment);
        self.handle(id)
    }

    fn append(&self, parent: &SinkHandle, child: NodeOrText<SinkHandle>) {
        let mut doc = self.doc.borrow_mut();
        match child {
            NodeOrText::AppendNode(node) => doc.append(parent.id, node.id),
            NodeOrText::AppendText(text) => doc.append_text(parent.id, &text),
        }
    }

    fn append_based_on_parent_node(
        &self,
        element: &SinkHandle,
        prev_element: &SinkHandle,
        child: NodeOrText<SinkHandle>,
    ) {
        let has_parent = self.doc.borrow().nodes[element.id].parent.is_some();
        if has_parent {
            self.append_before_sibling(element, child);
        } else {
            self.append(prev_element, child);
        }
    }

    fn append_doctype_to_document(
        &self,
        _name: StrTendril,
        _public_id: StrTendril,
        _system_id: StrTendril,
    ) {
    }

    fn get_template_contents(&self, target: &SinkHandle) -> SinkHandle {
        target.clone()
    }

    fn same_node(&self, x: &SinkHandle, y: &SinkHandle) -> bool {
        x.id == y.id
    }

    fn set_quirks_mode(&self, _mode: QuirksMode) {}

    fn append_before_sibling(&self, sibling: &SinkHandle, new_node: NodeOrText<SinkHandle>) {
        let mut doc = self.doc.borrow_mut();
        let child = match new_node {
            NodeOrText::AppendNode(node) => node.id,
            NodeOrText::AppendText(text) => doc.create(NodeKind::Text(text.to_string())),
        };
        doc.insert_before(sibling.id, child);
    }

    fn add_attrs_if_missing(&self, target: &SinkHandle, attrs: Vec<Attribute>) {
        let mut doc = self.doc.borrow_mut();
        if let NodeKind::Element { attrs: existing, .. } = &mut doc.nodes[target.id].kind {
            for attr in attrs {
                let key = local_part(&attr.name.local);
                if !existing.iter().any(|(k, _)| *k == key) {
                    existing.push((key, attr.value.to_string()));
                }
            }
        }
    }

    fn remove_from_parent(&self, target: &SinkHandle) {
        self.doc.borrow_mut().detach(target.id);
    }

    fn reparent_children(&self, node: &SinkHandle, new_parent: &SinkHandle) {
        let mut doc = self.doc.borrow_mut();
        let children = std::mem::take(&mut doc.nodes[node.id].children);
        for child in children {
            doc.nodes[child].parent = Some(new_parent.id);
            doc.nodes[new_parent.id].children.push(child);
        }
    }
}
