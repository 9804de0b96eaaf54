//! # XML Canonicalization
//!
//! Canonical XML 1.0 (inclusive) and Exclusive XML Canonicalization for
//! XML-DSig digest and signature computation. Both operate on a [`Document`]
//! subtree and support omitting one subtree, which implements the
//! enveloped-signature transform.
//!
//! Comments are always omitted (the DOM never stores them). Output rules:
//! no self-closing tags, namespace declarations sorted by prefix, attributes
//! sorted by (namespace URI, local name), and the character escapes the
//! canonicalization REC prescribes for text and attribute values.

use super::dom::{Document, NodeId, NodeKind};

/// Canonicalization method
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum C14nMode {
    /// Canonical XML 1.0: every in-scope namespace is rendered
    Inclusive,
    /// Exclusive C14N: only visibly utilized namespaces are rendered, plus
    /// any prefix listed in an `InclusiveNamespaces` `PrefixList`
    /// (`#default` names the default namespace)
    Exclusive { inclusive_prefixes: Vec<String> },
}

impl C14nMode {
    pub fn exclusive() -> Self {
        C14nMode::Exclusive {
            inclusive_prefixes: Vec::new(),
        }
    }
}

/// Canonicalize the subtree rooted at `node`. `exclude` omits one descendant
/// subtree from the output (the enveloped `ds:Signature`).
pub fn canonicalize(
    doc: &Document,
    node: NodeId,
    mode: &C14nMode,
    exclude: Option<NodeId>,
) -> String {
    let mut out = String::new();
    let mut rendered: Vec<Vec<(Option<String>, String)>> = Vec::new();
    render(doc, node, mode, exclude, &mut rendered, &mut out);
    out
}

fn rendered_value<'a>(
    rendered: &'a [Vec<(Option<String>, String)>],
    prefix: &Option<String>,
) -> Option<&'a str> {
    for frame in rendered.iter().rev() {
        for (p, uri) in frame {
            if p == prefix {
                return Some(uri.as_str());
            }
        }
    }
    None
}

fn render(
    doc: &Document,
    node: NodeId,
    mode: &C14nMode,
    exclude: Option<NodeId>,
    rendered: &mut Vec<Vec<(Option<String>, String)>>,
    out: &mut String,
) {
    if exclude == Some(node) {
        return;
    }
    match doc.kind(node) {
        NodeKind::Text(t) => out.push_str(&c14n_escape_text(t)),
        NodeKind::Element(el) => {
            let mut ns_decls = namespace_decls(doc, node, mode, rendered);
            ns_decls.sort_by(|a, b| {
                let ka = a.0.clone().unwrap_or_default();
                let kb = b.0.clone().unwrap_or_default();
                ka.cmp(&kb)
            });

            let mut attrs: Vec<(String, String, String, String)> = el
                .attributes
                .iter()
                .filter(|a| !a.is_namespace_decl())
                .map(|a| {
                    let ns = match &a.prefix {
                        Some(p) => doc
                            .resolve_prefix(node, Some(p))
                            .unwrap_or_default(),
                        None => String::new(),
                    };
                    let name = match &a.prefix {
                        Some(p) => format!("{}:{}", p, a.local),
                        None => a.local.clone(),
                    };
                    (ns, a.local.clone(), name, a.value.clone())
                })
                .collect();
            attrs.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

            let name = el.qualified_name();
            out.push('<');
            out.push_str(&name);
            for (prefix, uri) in &ns_decls {
                match prefix {
                    Some(p) => {
                        out.push_str(" xmlns:");
                        out.push_str(p);
                    }
                    None => out.push_str(" xmlns"),
                }
                out.push_str("=\"");
                out.push_str(&c14n_escape_attr(uri));
                out.push('"');
            }
            for (_, _, name, value) in &attrs {
                out.push(' ');
                out.push_str(name);
                out.push_str("=\"");
                out.push_str(&c14n_escape_attr(value));
                out.push('"');
            }
            out.push('>');

            rendered.push(ns_decls);
            for &child in doc.children(node) {
                render(doc, child, mode, exclude, rendered, out);
            }
            rendered.pop();

            out.push_str("</");
            out.push_str(&name);
            out.push('>');
        }
    }
}

/// Namespace declarations to emit on this element, unsorted
fn namespace_decls(
    doc: &Document,
    node: NodeId,
    mode: &C14nMode,
    rendered: &[Vec<(Option<String>, String)>],
) -> Vec<(Option<String>, String)> {
    let mut out: Vec<(Option<String>, String)> = Vec::new();

    match mode {
        C14nMode::Inclusive => {
            for (prefix, uri) in doc.in_scope_namespaces(node) {
                if prefix.as_deref() == Some("xml") && uri == super::NS_XML {
                    continue;
                }
                if rendered_value(rendered, &prefix) != Some(uri.as_str()) {
                    push_decl(&mut out, prefix, uri);
                }
            }
            // A default namespace undeclared here but rendered on an output
            // ancestor must be reset.
            let default_in_scope = doc
                .in_scope_namespaces(node)
                .into_iter()
                .any(|(p, _)| p.is_none());
            if !default_in_scope {
                if let Some(prev) = rendered_value(rendered, &None) {
                    if !prev.is_empty() {
                        push_decl(&mut out, None, String::new());
                    }
                }
            }
        }
        C14nMode::Exclusive { inclusive_prefixes } => {
            let el = match doc.element(node) {
                Some(el) => el,
                None => return out,
            };
            let mut visible: Vec<Option<String>> = vec![el.prefix.clone()];
            for attr in &el.attributes {
                if attr.is_namespace_decl() {
                    continue;
                }
                if let Some(p) = &attr.prefix {
                    if p != "xml" && !visible.contains(&Some(p.clone())) {
                        visible.push(Some(p.clone()));
                    }
                }
            }
            for p in inclusive_prefixes {
                let key = if p == "#default" {
                    None
                } else {
                    Some(p.clone())
                };
                if !visible.contains(&key) {
                    visible.push(key);
                }
            }

            for prefix in visible {
                if prefix.as_deref() == Some("xml") {
                    continue;
                }
                match doc.resolve_prefix(node, prefix.as_deref()) {
                    Some(uri) => {
                        if rendered_value(rendered, &prefix) != Some(uri.as_str()) {
                            push_decl(&mut out, prefix, uri);
                        }
                    }
                    None => {
                        // Unbound default namespace resets an ancestor's
                        // rendered default; unbound prefixes are skipped.
                        if prefix.is_none() {
                            if let Some(prev) = rendered_value(rendered, &None) {
                                if !prev.is_empty() {
                                    push_decl(&mut out, None, String::new());
                                }
                            }
                        }
                    }
                }
            }
        }
    }
    out
}

fn push_decl(out: &mut Vec<(Option<String>, String)>, prefix: Option<String>, uri: String) {
    if !out.iter().any(|(p, _)| *p == prefix) {
        out.push((prefix, uri));
    }
}

fn c14n_escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
    out
}

fn c14n_escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
    out
}
