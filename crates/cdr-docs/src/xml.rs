//! Minimal owned XML tree.
//!
//! Element and attribute names are kept exactly as written (`cdr:ref`,
//! `xsl:template`); no namespace processing is done. Reading goes through
//! `quick-xml`, writing escapes text and attribute values.

use std::fmt::Write as _;

use quick_xml::escape::{escape, partial_escape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{DocError, DocResult};

/// Namespace URI bound to the `cdr` prefix.
pub const CDR_NS: &str = "cips.nci.nih.gov/cdr";

/// Attribute holding links to other documents.
pub const CDR_REF: &str = "cdr:ref";

/// Child of an [`Element`].
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Nested element.
    Element(Element),
    /// Character data.
    Text(String),
    /// Character data written as a CDATA section.
    CData(String),
    /// Comment.
    Comment(String),
    /// Processing instruction.
    ProcessingInstruction {
        /// Instruction target.
        target: String,
        /// Everything after the target.
        data: String,
    },
}

/// An XML element with its attributes and children.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    /// Qualified name.
    pub name: String,
    /// Attributes in document order.
    pub attributes: Vec<(String, String)>,
    /// Child nodes in document order.
    pub children: Vec<Node>,
}

impl Element {
    /// Creates an empty element.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Adds an attribute, builder style.
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    /// Appends text, builder style.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.push_text(text);
        self
    }

    /// Appends a child element, builder style.
    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    /// Name without any namespace prefix.
    pub fn local_name(&self) -> &str {
        local_name(&self.name)
    }

    /// Value of an attribute.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Sets or replaces an attribute.
    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((name, value)),
        }
    }

    /// Appends text, merging with a preceding text node.
    pub fn push_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if text.is_empty() {
            return;
        }
        if let Some(Node::Text(last)) = self.children.last_mut() {
            last.push_str(&text);
        } else {
            self.children.push(Node::Text(text));
        }
    }

    /// Appends a child element.
    pub fn push_element(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    /// Child elements.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }

    /// Mutable child elements.
    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }

    /// First element reached by a `/`-separated path of child names.
    pub fn find(&self, path: &str) -> Option<&Element> {
        self.find_all(path).into_iter().next()
    }

    /// Every element reached by a `/`-separated path of child names.
    pub fn find_all(&self, path: &str) -> Vec<&Element> {
        let mut current = vec![self];
        for step in path.split('/').filter(|s| !s.is_empty()) {
            current = current
                .into_iter()
                .flat_map(|e| e.elements().filter(move |c| c.name == step))
                .collect();
        }
        current
    }

    /// Concatenated character data of the element and its descendants.
    pub fn text(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }

    /// Serializes the element and its descendants.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        write_element(self, &mut out);
        out
    }
}

/// Text of an optional node, or `None` if the node is absent.
pub fn get_text(node: Option<&Element>) -> Option<String> {
    node.map(Element::text)
}

/// Part of a qualified name after the prefix.
pub fn local_name(name: &str) -> &str {
    match name.rfind(':') {
        Some(i) => &name[i + 1..],
        None => name,
    }
}

fn collect_text(element: &Element, out: &mut String) {
    for child in &element.children {
        match child {
            Node::Text(t) | Node::CData(t) => out.push_str(t),
            Node::Element(e) => collect_text(e, out),
            _ => {}
        }
    }
}

fn write_element(element: &Element, out: &mut String) {
    out.push('<');
    out.push_str(&element.name);
    for (name, value) in &element.attributes {
        let _ = write!(out, " {}=\"{}\"", name, escape(value.as_str()));
    }
    if element.children.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    for child in &element.children {
        write_node(child, out);
    }
    let _ = write!(out, "</{}>", element.name);
}

/// Serializes a single node.
pub fn write_node(node: &Node, out: &mut String) {
    match node {
        Node::Element(e) => write_element(e, out),
        Node::Text(t) => out.push_str(&partial_escape(t.as_str())),
        Node::CData(t) => {
            // "]]>" cannot appear inside a CDATA section; split it across two.
            let _ = write!(out, "<![CDATA[{}]]>", t.replace("]]>", "]]]]><![CDATA[>"));
        }
        Node::Comment(c) => {
            let _ = write!(out, "<!--{}-->", c);
        }
        Node::ProcessingInstruction { target, data } => {
            if data.is_empty() {
                let _ = write!(out, "<?{}?>", target);
            } else {
                let _ = write!(out, "<?{} {}?>", target, data);
            }
        }
    }
}

/// Parses a document, returning its root element.
///
/// The XML declaration, doctype and anything outside the root element are
/// dropped.
pub fn parse(xml: &str) -> DocResult<Element> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => stack.push(start_element(&e)?),
            Event::Empty(e) => {
                let element = start_element(&e)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| DocError::Xml("unexpected end tag".into()))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(t) => {
                if let Some(parent) = stack.last_mut() {
                    let text = t.unescape().map_err(|e| DocError::Xml(e.to_string()))?;
                    parent.push_text(text.into_owned());
                }
            }
            Event::CData(t) => {
                if let Some(parent) = stack.last_mut() {
                    let text = String::from_utf8_lossy(&t).into_owned();
                    parent.children.push(Node::CData(text));
                }
            }
            Event::Comment(t) => {
                if let Some(parent) = stack.last_mut() {
                    let text = String::from_utf8_lossy(&t).into_owned();
                    parent.children.push(Node::Comment(text));
                }
            }
            Event::PI(pi) => {
                if let Some(parent) = stack.last_mut() {
                    let raw = String::from_utf8_lossy(&pi).into_owned();
                    let (target, data) = match raw.split_once(char::is_whitespace) {
                        Some((t, d)) => (t.to_string(), d.trim_start().to_string()),
                        None => (raw.clone(), String::new()),
                    };
                    parent
                        .children
                        .push(Node::ProcessingInstruction { target, data });
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(DocError::Xml(format!("unclosed element <{}>", open.name)));
    }
    root.ok_or_else(|| DocError::Xml("no root element".into()))
}

fn start_element(start: &BytesStart<'_>) -> DocResult<Element> {
    let mut element = Element::new(String::from_utf8_lossy(start.name().as_ref()));
    for attr in start.attributes() {
        let attr = attr?;
        let name = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| DocError::Xml(e.to_string()))?
            .into_owned();
        element.attributes.push((name, value));
    }
    Ok(element)
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> DocResult<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(Node::Element(element));
        return Ok(());
    }
    if root.is_some() {
        return Err(DocError::Xml("multiple root elements".into()));
    }
    *root = Some(element);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_serialize() {
        let xml = r#"<?xml version="1.0"?>
<Term xmlns:cdr="cips.nci.nih.gov/cdr" cdr:id="CDR0000000001"><PreferredName>A &amp; B</PreferredName><Empty/></Term>"#;
        let root = parse(xml).unwrap();
        assert_eq!(root.name, "Term");
        assert_eq!(root.attr("cdr:id"), Some("CDR0000000001"));
        assert_eq!(root.find("PreferredName").unwrap().text(), "A & B");
        assert_eq!(
            root.to_xml(),
            r#"<Term xmlns:cdr="cips.nci.nih.gov/cdr" cdr:id="CDR0000000001"><PreferredName>A &amp; B</PreferredName><Empty/></Term>"#
        );
    }

    #[test]
    fn test_find_all_follows_path() {
        let root = parse(
            "<T><R><P><Id ref='1'/></P></R><R><P><Id ref='2'/></P><P><Id ref='3'/></P></R></T>",
        )
        .unwrap();
        let ids: Vec<&str> = root
            .find_all("R/P/Id")
            .into_iter()
            .filter_map(|e| e.attr("ref"))
            .collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert!(root.find("R/Missing").is_none());
    }

    #[test]
    fn test_text_skips_comments_and_keeps_cdata() {
        let root = parse("<a>one<!-- no --><b>two</b><![CDATA[<three>]]></a>").unwrap();
        assert_eq!(root.text(), "onetwo<three>");
    }

    #[test]
    fn test_attribute_escaping() {
        let e = Element::new("x").with_attr("q", "a\"b<c");
        assert_eq!(e.to_xml(), "<x q=\"a&quot;b&lt;c\"/>");
    }

    #[test]
    fn test_malformed_input() {
        assert!(matches!(parse("<a><b></a>"), Err(DocError::Xml(_))));
        assert!(matches!(parse("   "), Err(DocError::Xml(_))));
        assert!(matches!(parse("<a/><b/>"), Err(DocError::Xml(_))));
    }

    #[test]
    fn test_local_name() {
        assert_eq!(local_name("xsl:template"), "template");
        assert_eq!(Element::new("Term").local_name(), "Term");
    }
}
