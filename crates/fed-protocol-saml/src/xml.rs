//! Owned XML tree used by the message model and the crypto subsystems.
//!
//! The model parses externally supplied XML into this tree and then
//! interrogates it with fail-closed accessors: a missing required child or
//! a repeated singleton child is an error at the accessor, not something
//! each caller has to remember to check. Document-scoped queries (ID
//! lookup for signature references) go through [`XmlDoc`], an explicit
//! per-document context that is constructed and dropped with the request.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{SamlError, SamlResult};

/// A node in the tree: a child element or a run of character data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    /// A nested element.
    Element(Element),
    /// Unescaped character data.
    Text(String),
}

/// An owned XML element: qualified name, ordered attributes, child nodes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    nodes: Vec<XmlNode>,
}

impl Element {
    /// Creates an element with the given (possibly prefixed) name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            nodes: Vec::new(),
        }
    }

    /// The qualified name as written, e.g. `saml:Assertion`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The local part of the name, e.g. `Assertion`.
    #[must_use]
    pub fn local_name(&self) -> &str {
        self.name.rsplit(':').next().unwrap_or(&self.name)
    }

    /// Looks up an attribute by its local name. Namespace declarations are
    /// not visible through this accessor.
    #[must_use]
    pub fn attr(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| {
                if k == "xmlns" || k.starts_with("xmlns:") {
                    return false;
                }
                k == local || k.rsplit(':').next() == Some(local)
            })
            .map(|(_, v)| v.as_str())
    }

    /// All attributes in document order, namespace declarations included.
    #[must_use]
    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    /// Sets (or replaces) an attribute.
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.attributes.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.attributes.push((key, value));
        }
    }

    /// Builder form of [`Element::set_attr`].
    #[must_use]
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    /// Appends a child element.
    pub fn push(&mut self, child: Element) {
        self.nodes.push(XmlNode::Element(child));
    }

    /// Builder form of [`Element::push`].
    #[must_use]
    pub fn with_child(mut self, child: Element) -> Self {
        self.push(child);
        self
    }

    /// Appends character data.
    pub fn push_text(&mut self, text: impl Into<String>) {
        self.nodes.push(XmlNode::Text(text.into()));
    }

    /// Builder form of [`Element::push_text`].
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.push_text(text);
        self
    }

    /// All nodes in document order.
    #[must_use]
    pub fn nodes(&self) -> &[XmlNode] {
        &self.nodes
    }

    /// Direct child elements in document order.
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.nodes.iter().filter_map(|n| match n {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) => None,
        })
    }

    /// Direct children with the given local name.
    pub fn children_named<'a>(&'a self, local: &'a str) -> impl Iterator<Item = &'a Element> {
        self.child_elements().filter(move |e| e.local_name() == local)
    }

    /// Returns the single direct child with the given local name, or `None`.
    ///
    /// # Errors
    ///
    /// Fails with [`SamlError::DuplicateElement`] if the child repeats.
    pub fn optional_child<'a>(&'a self, local: &'a str) -> SamlResult<Option<&'a Element>> {
        let mut iter = self.children_named(local);
        let first = iter.next();
        if iter.next().is_some() {
            return Err(SamlError::DuplicateElement(local.to_string()));
        }
        Ok(first)
    }

    /// Returns the single direct child with the given local name.
    ///
    /// # Errors
    ///
    /// Fails with [`SamlError::MissingElement`] if absent and
    /// [`SamlError::DuplicateElement`] if it repeats.
    pub fn required_child<'a>(&'a self, local: &'a str) -> SamlResult<&'a Element> {
        self.optional_child(local)?
            .ok_or_else(|| SamlError::MissingElement(local.to_string()))
    }

    /// Removes and returns the first direct child with the given local name.
    pub fn remove_child(&mut self, local: &str) -> Option<Element> {
        let idx = self.nodes.iter().position(|n| match n {
            XmlNode::Element(e) => e.local_name() == local,
            XmlNode::Text(_) => false,
        })?;
        match self.nodes.remove(idx) {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) => None,
        }
    }

    /// Inserts a child element immediately after the first child with the
    /// given local name; appends at the front if no such child exists.
    pub fn insert_after(&mut self, local: &str, child: Element) {
        let idx = self.nodes.iter().position(|n| match n {
            XmlNode::Element(e) => e.local_name() == local,
            XmlNode::Text(_) => false,
        });
        match idx {
            Some(i) => self.nodes.insert(i + 1, XmlNode::Element(child)),
            None => self.nodes.insert(0, XmlNode::Element(child)),
        }
    }

    /// Concatenated direct character data, surrounding whitespace trimmed.
    #[must_use]
    pub fn text(&self) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            if let XmlNode::Text(t) = node {
                out.push_str(t);
            }
        }
        out.trim().to_string()
    }

    /// Depth-first search for an element carrying `ID="id"` (or `Id=`).
    #[must_use]
    pub fn find_by_id(&self, id: &str) -> Option<&Element> {
        if self.attr("ID") == Some(id) || self.attr("Id") == Some(id) {
            return Some(self);
        }
        self.child_elements().find_map(|c| c.find_by_id(id))
    }

    /// Parses a single-rooted XML document into an element tree.
    pub fn parse(xml: &str) -> SamlResult<Element> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    if root.is_some() && stack.is_empty() {
                        return Err(SamlError::XmlParse("multiple root elements".to_string()));
                    }
                    stack.push(element_from_start(&e)?);
                }
                Event::Empty(e) => {
                    let el = element_from_start(&e)?;
                    match stack.last_mut() {
                        Some(parent) => parent.push(el),
                        None => {
                            if root.is_some() {
                                return Err(SamlError::XmlParse(
                                    "multiple root elements".to_string(),
                                ));
                            }
                            root = Some(el);
                        }
                    }
                }
                Event::End(_) => {
                    let done = stack
                        .pop()
                        .ok_or_else(|| SamlError::XmlParse("unbalanced end tag".to_string()))?;
                    match stack.last_mut() {
                        Some(parent) => parent.push(done),
                        None => root = Some(done),
                    }
                }
                Event::Text(t) => {
                    let text = t
                        .unescape()
                        .map_err(|e| SamlError::XmlParse(e.to_string()))?;
                    if let Some(parent) = stack.last_mut() {
                        parent.push_text(text.into_owned());
                    }
                }
                Event::CData(c) => {
                    let text = String::from_utf8_lossy(c.as_ref()).into_owned();
                    if let Some(parent) = stack.last_mut() {
                        parent.push_text(text);
                    }
                }
                Event::Eof => break,
                // Declarations, comments and PIs carry no protocol meaning.
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(SamlError::XmlParse("unclosed element".to_string()));
        }
        root.ok_or_else(|| SamlError::XmlParse("empty document".to_string()))
    }

    /// Serializes the element with attributes in document order.
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write(&mut out, false);
        out
    }

    /// Serializes the element in the stable form used for digesting:
    /// namespace declarations first, remaining attributes sorted by name,
    /// no self-closing tags.
    #[must_use]
    pub fn canonical_xml(&self) -> String {
        let mut out = String::new();
        self.write(&mut out, true);
        out
    }

    fn write(&self, out: &mut String, canonical: bool) {
        out.push('<');
        out.push_str(&self.name);

        if canonical {
            let mut ns: Vec<&(String, String)> = self
                .attributes
                .iter()
                .filter(|(k, _)| k == "xmlns" || k.starts_with("xmlns:"))
                .collect();
            ns.sort_by(|a, b| a.0.cmp(&b.0));
            let mut rest: Vec<&(String, String)> = self
                .attributes
                .iter()
                .filter(|(k, _)| k != "xmlns" && !k.starts_with("xmlns:"))
                .collect();
            rest.sort_by(|a, b| a.0.cmp(&b.0));
            for (k, v) in ns.into_iter().chain(rest) {
                out.push(' ');
                out.push_str(k);
                out.push_str("=\"");
                out.push_str(&escape_attr(v));
                out.push('"');
            }
        } else {
            for (k, v) in &self.attributes {
                out.push(' ');
                out.push_str(k);
                out.push_str("=\"");
                out.push_str(&escape_attr(v));
                out.push('"');
            }
        }

        if self.nodes.is_empty() && !canonical {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for node in &self.nodes {
            match node {
                XmlNode::Element(e) => e.write(out, canonical),
                XmlNode::Text(t) => out.push_str(&escape_text(t)),
            }
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

fn element_from_start(e: &quick_xml::events::BytesStart<'_>) -> SamlResult<Element> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut el = Element::new(name);
    for attr in e.attributes() {
        let attr = attr.map_err(|e| SamlError::XmlParse(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| SamlError::XmlParse(e.to_string()))?
            .into_owned();
        el.set_attr(key, value);
    }
    Ok(el)
}

fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Explicit per-document query context.
///
/// Owns the parsed root and answers document-scoped queries; it is only
/// valid for the document it was built from, and that precondition is
/// carried by ownership instead of hidden module state.
#[derive(Debug, Clone)]
pub struct XmlDoc {
    root: Element,
}

impl XmlDoc {
    /// Parses a document into a query context.
    pub fn parse(xml: &str) -> SamlResult<Self> {
        Ok(Self {
            root: Element::parse(xml)?,
        })
    }

    /// Wraps an already-built tree.
    #[must_use]
    pub fn from_root(root: Element) -> Self {
        Self { root }
    }

    /// The document root.
    #[must_use]
    pub fn root(&self) -> &Element {
        &self.root
    }

    /// Finds the element carrying the given ID anywhere in the document.
    #[must_use]
    pub fn find_by_id(&self, id: &str) -> Option<&Element> {
        self.root.find_by_id(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_access() {
        let xml = r#"<a x="1"><b>text</b><b>more</b><c/></a>"#;
        let el = Element::parse(xml).unwrap();
        assert_eq!(el.local_name(), "a");
        assert_eq!(el.attr("x"), Some("1"));
        assert_eq!(el.children_named("b").count(), 2);
        assert!(el.optional_child("c").unwrap().is_some());
    }

    #[test]
    fn duplicate_singleton_is_an_error() {
        let el = Element::parse("<a><b/><b/></a>").unwrap();
        assert!(matches!(
            el.optional_child("b"),
            Err(SamlError::DuplicateElement(_))
        ));
    }

    #[test]
    fn missing_required_child_is_an_error() {
        let el = Element::parse("<a/>").unwrap();
        assert!(matches!(
            el.required_child("b"),
            Err(SamlError::MissingElement(_))
        ));
    }

    #[test]
    fn prefixed_names_resolve_by_local_part() {
        let el = Element::parse(
            r#"<saml:Assertion xmlns:saml="urn:x" ID="_1"><saml:Issuer>idp</saml:Issuer></saml:Assertion>"#,
        )
        .unwrap();
        assert_eq!(el.local_name(), "Assertion");
        assert_eq!(el.required_child("Issuer").unwrap().text(), "idp");
        assert_eq!(el.attr("ID"), Some("_1"));
    }

    #[test]
    fn find_by_id_walks_the_tree() {
        let el = Element::parse(r#"<a><b><c ID="_x">deep</c></b></a>"#).unwrap();
        let doc = XmlDoc::from_root(el);
        assert_eq!(doc.find_by_id("_x").unwrap().text(), "deep");
        assert!(doc.find_by_id("_y").is_none());
    }

    #[test]
    fn serialization_roundtrip() {
        let xml = r#"<a x="1"><b>text &amp; more</b><c/></a>"#;
        let el = Element::parse(xml).unwrap();
        let reparsed = Element::parse(&el.to_xml()).unwrap();
        assert_eq!(el, reparsed);
    }

    #[test]
    fn canonical_form_sorts_attributes() {
        let el = Element::parse(r#"<a z="2" b="1" xmlns:n="urn:n"/>"#).unwrap();
        assert_eq!(el.canonical_xml(), r#"<a xmlns:n="urn:n" b="1" z="2"></a>"#);
    }

    #[test]
    fn insert_after_issuer_position() {
        let mut el = Element::parse("<a><Issuer>x</Issuer><Subject/></a>").unwrap();
        el.insert_after("Issuer", Element::new("Signature"));
        let names: Vec<_> = el.child_elements().map(|e| e.local_name().to_string()).collect();
        assert_eq!(names, vec!["Issuer", "Signature", "Subject"]);
    }

    #[test]
    fn multiple_roots_are_rejected() {
        assert!(Element::parse("<a/><b/>").is_err());
    }
}
