//! # Owned XML DOM
//!
//! Arena-backed document tree built from `quick-xml` events. Nodes are
//! addressed by [`NodeId`] indices into the arena, which keeps parent links
//! cheap and makes deep copies a plain `Clone`.
//!
//! Namespace declarations (`xmlns`, `xmlns:p`) are stored as ordinary
//! attributes in document order; resolution walks the ancestor chain. Parsing
//! does not require prefixes to be declared, so fragments recovered from
//! decrypted payloads can be inspected before they are re-wrapped with their
//! namespace context.

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

/// XML parsing and manipulation errors
#[derive(Error, Debug)]
pub enum XmlError {
    /// The input was not well-formed XML
    #[error("XML parse error: {0}")]
    Parse(String),

    /// The input contained no root element
    #[error("document has no root element")]
    NoRoot,
}

/// Index of a node inside a [`Document`] arena
pub type NodeId = usize;

/// A single attribute, prefix kept verbatim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub prefix: Option<String>,
    pub local: String,
    pub value: String,
}

impl Attribute {
    /// `true` for `xmlns` and `xmlns:p` declarations
    pub fn is_namespace_decl(&self) -> bool {
        self.prefix.as_deref() == Some("xmlns")
            || (self.prefix.is_none() && self.local == "xmlns")
    }

    /// The prefix declared by this attribute, if it is a namespace
    /// declaration. `None` prefix means the default namespace.
    pub fn declared_prefix(&self) -> Option<Option<&str>> {
        if self.prefix.as_deref() == Some("xmlns") {
            Some(Some(self.local.as_str()))
        } else if self.prefix.is_none() && self.local == "xmlns" {
            Some(None)
        } else {
            None
        }
    }
}

/// Element payload of a node
#[derive(Debug, Clone)]
pub struct Element {
    pub prefix: Option<String>,
    pub local: String,
    pub attributes: Vec<Attribute>,
}

impl Element {
    /// Tag name as written in the source (`prefix:local` or `local`)
    pub fn qualified_name(&self) -> String {
        match &self.prefix {
            Some(p) => format!("{}:{}", p, self.local),
            None => self.local.clone(),
        }
    }
}

/// Node payload
#[derive(Debug, Clone)]
pub enum NodeKind {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    kind: NodeKind,
}

/// An owned XML document
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Document {
    /// Parse a document from text. The XML declaration, comments, processing
    /// instructions, and DOCTYPE are discarded; element structure, attribute
    /// order, and text (including whitespace) are preserved.
    pub fn parse(text: &str) -> Result<Self, XmlError> {
        let mut reader = Reader::from_str(text);
        let mut nodes: Vec<Node> = Vec::new();
        let mut stack: Vec<NodeId> = Vec::new();
        let mut root: Option<NodeId> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(start)) => {
                    let id = push_element(&mut nodes, &stack, &mut root, &start)?;
                    stack.push(id);
                }
                Ok(Event::Empty(start)) => {
                    push_element(&mut nodes, &stack, &mut root, &start)?;
                }
                Ok(Event::End(_)) => {
                    stack.pop();
                }
                Ok(Event::Text(t)) => {
                    let value = t
                        .unescape()
                        .map_err(|e| XmlError::Parse(e.to_string()))?
                        .into_owned();
                    append_text(&mut nodes, &stack, value);
                }
                Ok(Event::CData(c)) => {
                    let value = String::from_utf8_lossy(&c.into_inner()).into_owned();
                    append_text(&mut nodes, &stack, value);
                }
                Ok(Event::Decl(_))
                | Ok(Event::Comment(_))
                | Ok(Event::PI(_))
                | Ok(Event::DocType(_)) => {}
                Ok(Event::Eof) => break,
                Err(e) => return Err(XmlError::Parse(e.to_string())),
            }
        }

        let root = root.ok_or(XmlError::NoRoot)?;
        Ok(Document { nodes, root })
    }

    /// The root element
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id].kind
    }

    /// Element payload, `None` for text nodes
    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match &self.nodes[id].kind {
            NodeKind::Element(e) => Some(e),
            NodeKind::Text(_) => None,
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    /// Child nodes that are elements
    pub fn child_elements(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes[id]
            .children
            .iter()
            .copied()
            .filter(|&c| matches!(self.nodes[c].kind, NodeKind::Element(_)))
            .collect()
    }

    /// Pre-order traversal of the subtree rooted at `id`, including `id`
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut pending = vec![id];
        while let Some(n) = pending.pop() {
            out.push(n);
            for &c in self.nodes[n].children.iter().rev() {
                pending.push(c);
            }
        }
        out
    }

    /// Resolve a prefix to a namespace URI at the given node. A `None`
    /// prefix resolves the default namespace. The reserved `xml` prefix is
    /// always bound.
    pub fn resolve_prefix(&self, id: NodeId, prefix: Option<&str>) -> Option<String> {
        if prefix == Some("xml") {
            return Some(super::NS_XML.to_string());
        }
        let mut current = Some(id);
        while let Some(n) = current {
            if let NodeKind::Element(el) = &self.nodes[n].kind {
                for attr in &el.attributes {
                    if attr.declared_prefix() == Some(prefix) {
                        if attr.value.is_empty() {
                            return None;
                        }
                        return Some(attr.value.clone());
                    }
                }
            }
            current = self.nodes[n].parent;
        }
        None
    }

    /// Namespace URI of the element itself
    pub fn namespace(&self, id: NodeId) -> Option<String> {
        let el = self.element(id)?;
        self.resolve_prefix(id, el.prefix.as_deref())
    }

    /// All namespace bindings in scope at `id`, nearest declaration wins.
    /// Returned as `(prefix, uri)` pairs; empty-value declarations undeclare
    /// the default namespace and are excluded.
    pub fn in_scope_namespaces(&self, id: NodeId) -> Vec<(Option<String>, String)> {
        let mut seen: Vec<Option<String>> = Vec::new();
        let mut out: Vec<(Option<String>, String)> = Vec::new();
        let mut current = Some(id);
        while let Some(n) = current {
            if let NodeKind::Element(el) = &self.nodes[n].kind {
                for attr in &el.attributes {
                    if let Some(declared) = attr.declared_prefix() {
                        let key = declared.map(|s| s.to_string());
                        if !seen.contains(&key) {
                            seen.push(key.clone());
                            if !attr.value.is_empty() {
                                out.push((key, attr.value.clone()));
                            }
                        }
                    }
                }
            }
            current = self.nodes[n].parent;
        }
        out
    }

    /// `true` when the element has the given namespace URI and local name
    pub fn is_named(&self, id: NodeId, ns: &str, local: &str) -> bool {
        match self.element(id) {
            Some(el) => el.local == local && self.namespace(id).as_deref() == Some(ns),
            None => false,
        }
    }

    /// First descendant element (excluding `from` itself) with the name
    pub fn find_first(&self, from: NodeId, ns: &str, local: &str) -> Option<NodeId> {
        self.find_all(from, ns, local).into_iter().next()
    }

    /// All descendant elements (excluding `from` itself) with the name, in
    /// document order
    pub fn find_all(&self, from: NodeId, ns: &str, local: &str) -> Vec<NodeId> {
        self.descendants(from)
            .into_iter()
            .skip(1)
            .filter(|&n| self.is_named(n, ns, local))
            .collect()
    }

    /// Child elements of `from` with the given name
    pub fn find_children(&self, from: NodeId, ns: &str, local: &str) -> Vec<NodeId> {
        self.child_elements(from)
            .into_iter()
            .filter(|&n| self.is_named(n, ns, local))
            .collect()
    }

    /// Attribute value by local name, namespace declarations excluded
    pub fn attr(&self, id: NodeId, local: &str) -> Option<&str> {
        let el = self.element(id)?;
        el.attributes
            .iter()
            .find(|a| !a.is_namespace_decl() && a.prefix.is_none() && a.local == local)
            .map(|a| a.value.as_str())
    }

    /// Attribute value by namespace URI and local name
    pub fn attr_ns(&self, id: NodeId, ns: &str, local: &str) -> Option<&str> {
        let el = self.element(id)?;
        for attr in &el.attributes {
            if attr.is_namespace_decl() || attr.local != local {
                continue;
            }
            let Some(prefix) = attr.prefix.as_deref() else {
                continue;
            };
            if self.resolve_prefix(id, Some(prefix)).as_deref() == Some(ns) {
                return Some(attr.value.as_str());
            }
        }
        None
    }

    /// Descendant-or-self element whose `ID` attribute equals `value`
    pub fn element_by_id(&self, from: NodeId, value: &str) -> Option<NodeId> {
        self.descendants(from)
            .into_iter()
            .find(|&n| self.attr(n, "ID") == Some(value))
    }

    /// Concatenated text of all descendant text nodes
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        for n in self.descendants(id) {
            if let NodeKind::Text(t) = &self.nodes[n].kind {
                out.push_str(t);
            }
        }
        out
    }

    /// Copy a subtree from another document into this one. The copied root
    /// is detached; wire it up with [`Document::append_child`].
    pub fn import_subtree(&mut self, src: &Document, src_node: NodeId) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            parent: None,
            children: Vec::new(),
            kind: src.nodes[src_node].kind.clone(),
        });
        for &child in &src.nodes[src_node].children {
            let copied = self.import_subtree(src, child);
            self.nodes[copied].parent = Some(id);
            self.nodes[id].children.push(copied);
        }
        id
    }

    /// Append a detached node as the last child of `parent`
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[child].parent = Some(parent);
        self.nodes[parent].children.push(child);
    }

    /// Declare a namespace on an element. Used to restore bindings a
    /// decrypted fragment inherited from context that is gone after the
    /// fragment is grafted into another document.
    pub fn push_namespace_decl(&mut self, id: NodeId, prefix: Option<&str>, uri: &str) {
        if let NodeKind::Element(el) = &mut self.nodes[id].kind {
            let attr = match prefix {
                Some(p) => Attribute {
                    prefix: Some("xmlns".to_string()),
                    local: p.to_string(),
                    value: uri.to_string(),
                },
                None => Attribute {
                    prefix: None,
                    local: "xmlns".to_string(),
                    value: uri.to_string(),
                },
            };
            el.attributes.push(attr);
        }
    }

    /// Detach a node from its parent. The subtree stays in the arena but is
    /// no longer reachable from the root.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id].parent.take() {
            self.nodes[parent].children.retain(|&c| c != id);
        }
    }

    /// Serialize the subtree rooted at `id`
    pub fn subtree_to_string(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_node(id, &mut out);
        out
    }

    /// Serialize the whole document
    pub fn to_xml(&self) -> String {
        self.subtree_to_string(self.root)
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        match &self.nodes[id].kind {
            NodeKind::Text(t) => out.push_str(&escape_text(t)),
            NodeKind::Element(el) => {
                let name = el.qualified_name();
                out.push('<');
                out.push_str(&name);
                for attr in &el.attributes {
                    out.push(' ');
                    match &attr.prefix {
                        Some(p) => {
                            out.push_str(p);
                            out.push(':');
                        }
                        None => {}
                    }
                    out.push_str(&attr.local);
                    out.push_str("=\"");
                    out.push_str(&escape_attr(&attr.value));
                    out.push('"');
                }
                if self.nodes[id].children.is_empty() {
                    out.push_str("/>");
                } else {
                    out.push('>');
                    for &child in &self.nodes[id].children {
                        self.write_node(child, out);
                    }
                    out.push_str("</");
                    out.push_str(&name);
                    out.push('>');
                }
            }
        }
    }
}

fn push_element(
    nodes: &mut Vec<Node>,
    stack: &[NodeId],
    root: &mut Option<NodeId>,
    start: &quick_xml::events::BytesStart<'_>,
) -> Result<NodeId, XmlError> {
    let (prefix, local) = split_qname(start.name().as_ref())?;
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| XmlError::Parse(e.to_string()))?;
        let (aprefix, alocal) = split_qname(attr.key.as_ref())?;
        let value = attr
            .unescape_value()
            .map_err(|e| XmlError::Parse(e.to_string()))?
            .into_owned();
        attributes.push(Attribute {
            prefix: aprefix,
            local: alocal,
            value,
        });
    }

    let id = nodes.len();
    nodes.push(Node {
        parent: stack.last().copied(),
        children: Vec::new(),
        kind: NodeKind::Element(Element {
            prefix,
            local,
            attributes,
        }),
    });
    match stack.last() {
        Some(&parent) => nodes[parent].children.push(id),
        None => {
            if root.is_none() {
                *root = Some(id);
            } else {
                return Err(XmlError::Parse(
                    "multiple root elements".to_string(),
                ));
            }
        }
    }
    Ok(id)
}

fn append_text(nodes: &mut Vec<Node>, stack: &[NodeId], value: String) {
    let Some(&parent) = stack.last() else {
        return;
    };
    // Merge with a preceding text sibling so CDATA/text runs form one node.
    if let Some(&last) = nodes[parent].children.last() {
        if let NodeKind::Text(existing) = &mut nodes[last].kind {
            existing.push_str(&value);
            return;
        }
    }
    let id = nodes.len();
    nodes.push(Node {
        parent: Some(parent),
        children: Vec::new(),
        kind: NodeKind::Text(value),
    });
    nodes[parent].children.push(id);
}

fn split_qname(raw: &[u8]) -> Result<(Option<String>, String), XmlError> {
    let s = std::str::from_utf8(raw)
        .map_err(|e| XmlError::Parse(e.to_string()))?;
    match s.split_once(':') {
        Some((p, l)) => Ok((Some(p.to_string()), l.to_string())),
        None => Ok((None, s.to_string())),
    }
}

pub(crate) fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

pub(crate) fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
