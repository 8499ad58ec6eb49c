//! Read-only node trees for XPath navigation.
//!
//! Each [`Tree`] is a flat arena in pre-order, so comparing indices within a
//! tree gives document order. A [`Forest`] owns every tree touched by one
//! transform: the source, documents pulled in through `document()` and the
//! result tree fragments bound to variables.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use cdr_docs::{Element, Node};

use crate::error::{FilterError, FilterResult};
use crate::transform::UriResolver;

/// What a tree entry is.
#[derive(Debug, Clone, PartialEq)]
pub enum Kind {
    /// The document node above the root element.
    Document,
    /// An element with its attributes.
    Element {
        /// Qualified name.
        name: String,
        /// Attributes in document order, namespace declarations included.
        attributes: Vec<(String, String)>,
    },
    /// Character data (CDATA sections are folded in).
    Text(String),
    /// A comment.
    Comment(String),
    /// A processing instruction.
    Pi {
        /// Target.
        target: String,
        /// Data.
        data: String,
    },
}

#[derive(Debug)]
struct Entry {
    kind: Kind,
    parent: Option<usize>,
    children: Vec<usize>,
    /// Index one past the last descendant.
    end: usize,
}

/// One document in arena form.
#[derive(Debug)]
pub struct Tree {
    entries: Vec<Entry>,
}

impl Tree {
    /// Builds a tree whose document node holds `nodes`.
    pub fn from_nodes(nodes: &[Node]) -> Self {
        let mut tree = Tree {
            entries: vec![Entry {
                kind: Kind::Document,
                parent: None,
                children: Vec::new(),
                end: 1,
            }],
        };
        tree.append_all(0, nodes);
        tree.entries[0].end = tree.entries.len();
        tree
    }

    /// Builds a tree around a single root element.
    pub fn from_element(root: &Element) -> Self {
        Self::from_nodes(std::slice::from_ref(&Node::Element(root.clone())))
    }

    fn append_all(&mut self, parent: usize, nodes: &[Node]) {
        for node in nodes {
            self.append(parent, node);
        }
    }

    fn append(&mut self, parent: usize, node: &Node) {
        let kind = match node {
            Node::Text(t) | Node::CData(t) => {
                if t.is_empty() {
                    return;
                }
                // Adjacent character data forms a single text node.
                if let Some(&last) = self.entries[parent].children.last() {
                    if let Kind::Text(prev) = &mut self.entries[last].kind {
                        prev.push_str(t);
                        return;
                    }
                }
                Kind::Text(t.clone())
            }
            Node::Comment(c) => Kind::Comment(c.clone()),
            Node::ProcessingInstruction { target, data } => Kind::Pi {
                target: target.clone(),
                data: data.clone(),
            },
            Node::Element(e) => Kind::Element {
                name: e.name.clone(),
                attributes: e.attributes.clone(),
            },
        };
        let index = self.entries.len();
        self.entries.push(Entry {
            kind,
            parent: Some(parent),
            children: Vec::new(),
            end: index + 1,
        });
        self.entries[parent].children.push(index);
        if let Node::Element(e) = node {
            self.append_all(index, &e.children);
        }
        self.entries[index].end = self.entries.len();
    }

    /// Number of entries, document node included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the tree holds only its document node.
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }
}

/// Whether an attribute is a namespace declaration.
pub fn is_namespace_decl(name: &str) -> bool {
    name == "xmlns" || name.starts_with("xmlns:")
}

/// A node in some tree of a [`Forest`].
///
/// The derived ordering is document order: trees in creation order, then
/// pre-order position, with an element's attributes after the element and
/// before its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeRef {
    /// Tree id within the forest.
    pub tree: usize,
    /// Pre-order index within the tree.
    pub index: usize,
    /// Attribute position, for attribute nodes.
    pub attr: Option<usize>,
}

impl NodeRef {
    fn at(tree: usize, index: usize) -> Self {
        Self {
            tree,
            index,
            attr: None,
        }
    }

    /// Whether this is an attribute node.
    pub fn is_attribute(&self) -> bool {
        self.attr.is_some()
    }
}

/// Node categories used by node tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    /// Document node.
    Document,
    /// Element.
    Element,
    /// Attribute.
    Attribute,
    /// Text.
    Text,
    /// Comment.
    Comment,
    /// Processing instruction.
    Pi,
}

/// All trees visible to one transform.
#[derive(Default)]
pub struct Forest {
    trees: RefCell<Vec<Rc<Tree>>>,
    documents: RefCell<HashMap<String, Option<NodeRef>>>,
}

impl Forest {
    /// Creates an empty forest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tree, returning its document node.
    pub fn add(&self, tree: Tree) -> NodeRef {
        let mut trees = self.trees.borrow_mut();
        trees.push(Rc::new(tree));
        NodeRef::at(trees.len() - 1, 0)
    }

    /// Adds a tree built from loose nodes.
    pub fn add_nodes(&self, nodes: &[Node]) -> NodeRef {
        self.add(Tree::from_nodes(nodes))
    }

    fn tree(&self, id: usize) -> Rc<Tree> {
        Rc::clone(&self.trees.borrow()[id])
    }

    /// Loads a document through the resolver, once per URI.
    ///
    /// `None` means the resolver had nothing for the URI.
    pub fn load_document(
        &self,
        uri: &str,
        resolver: &dyn UriResolver,
    ) -> FilterResult<Option<NodeRef>> {
        if let Some(cached) = self.documents.borrow().get(uri) {
            return Ok(*cached);
        }
        let loaded = match resolver.resolve(uri)? {
            Some(xml) => {
                let root = cdr_docs::xml::parse(&xml).map_err(FilterError::from)?;
                Some(self.add(Tree::from_element(&root)))
            }
            None => None,
        };
        self.documents.borrow_mut().insert(uri.to_string(), loaded);
        Ok(loaded)
    }

    /// Category of a node.
    pub fn node_type(&self, node: NodeRef) -> NodeType {
        if node.is_attribute() {
            return NodeType::Attribute;
        }
        match self.tree(node.tree).entries[node.index].kind {
            Kind::Document => NodeType::Document,
            Kind::Element { .. } => NodeType::Element,
            Kind::Text(_) => NodeType::Text,
            Kind::Comment(_) => NodeType::Comment,
            Kind::Pi { .. } => NodeType::Pi,
        }
    }

    /// Qualified name of an element or attribute, or target of a
    /// processing instruction.
    pub fn name(&self, node: NodeRef) -> Option<String> {
        let tree = self.tree(node.tree);
        match (&tree.entries[node.index].kind, node.attr) {
            (Kind::Element { attributes, .. }, Some(i)) => attributes.get(i).map(|(n, _)| n.clone()),
            (Kind::Element { name, .. }, None) => Some(name.clone()),
            (Kind::Pi { target, .. }, None) => Some(target.clone()),
            _ => None,
        }
    }

    /// XPath string-value of a node.
    pub fn string_value(&self, node: NodeRef) -> String {
        let tree = self.tree(node.tree);
        let entry = &tree.entries[node.index];
        if let (Kind::Element { attributes, .. }, Some(i)) = (&entry.kind, node.attr) {
            return attributes.get(i).map(|(_, v)| v.clone()).unwrap_or_default();
        }
        match &entry.kind {
            Kind::Text(t) | Kind::Comment(t) => t.clone(),
            Kind::Pi { data, .. } => data.clone(),
            Kind::Document | Kind::Element { .. } => {
                let mut out = String::new();
                for e in &tree.entries[node.index + 1..entry.end] {
                    if let Kind::Text(t) = &e.kind {
                        out.push_str(t);
                    }
                }
                out
            }
        }
    }

    /// Parent (or owner element, for attributes).
    pub fn parent(&self, node: NodeRef) -> Option<NodeRef> {
        if node.is_attribute() {
            return Some(NodeRef::at(node.tree, node.index));
        }
        self.tree(node.tree).entries[node.index]
            .parent
            .map(|p| NodeRef::at(node.tree, p))
    }

    /// Children in document order.
    pub fn children(&self, node: NodeRef) -> Vec<NodeRef> {
        if node.is_attribute() {
            return Vec::new();
        }
        self.tree(node.tree).entries[node.index]
            .children
            .iter()
            .map(|&c| NodeRef::at(node.tree, c))
            .collect()
    }

    /// Attributes other than namespace declarations.
    pub fn attributes(&self, node: NodeRef) -> Vec<NodeRef> {
        if node.is_attribute() {
            return Vec::new();
        }
        match &self.tree(node.tree).entries[node.index].kind {
            Kind::Element { attributes, .. } => attributes
                .iter()
                .enumerate()
                .filter(|(_, (name, _))| !is_namespace_decl(name))
                .map(|(i, _)| NodeRef {
                    tree: node.tree,
                    index: node.index,
                    attr: Some(i),
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Namespace declarations carried by an element.
    pub fn namespace_decls(&self, node: NodeRef) -> Vec<(String, String)> {
        match (&self.tree(node.tree).entries[node.index].kind, node.attr) {
            (Kind::Element { attributes, .. }, None) => attributes
                .iter()
                .filter(|(name, _)| is_namespace_decl(name))
                .cloned()
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Descendants in document order.
    pub fn descendants(&self, node: NodeRef) -> Vec<NodeRef> {
        if node.is_attribute() {
            return Vec::new();
        }
        let tree = self.tree(node.tree);
        (node.index + 1..tree.entries[node.index].end)
            .map(|i| NodeRef::at(node.tree, i))
            .collect()
    }

    /// Ancestors, nearest first.
    pub fn ancestors(&self, node: NodeRef) -> Vec<NodeRef> {
        let mut out = Vec::new();
        let mut current = self.parent(node);
        while let Some(n) = current {
            out.push(n);
            current = self.parent(n);
        }
        out
    }

    /// Siblings after the node, nearest first.
    pub fn following_siblings(&self, node: NodeRef) -> Vec<NodeRef> {
        self.siblings(node, true)
    }

    /// Siblings before the node, nearest first.
    pub fn preceding_siblings(&self, node: NodeRef) -> Vec<NodeRef> {
        self.siblings(node, false)
    }

    fn siblings(&self, node: NodeRef, following: bool) -> Vec<NodeRef> {
        if node.is_attribute() {
            return Vec::new();
        }
        let parent = match self.parent(node) {
            Some(p) => p,
            None => return Vec::new(),
        };
        let all = self.children(parent);
        let pos = all.iter().position(|n| *n == node).unwrap_or(0);
        if following {
            all[pos + 1..].to_vec()
        } else {
            all[..pos].iter().rev().copied().collect()
        }
    }

    /// Nodes after this one in document order, descendants excluded.
    pub fn following(&self, node: NodeRef) -> Vec<NodeRef> {
        let tree = self.tree(node.tree);
        let start = if node.is_attribute() {
            node.index + 1
        } else {
            tree.entries[node.index].end
        };
        (start..tree.entries.len())
            .map(|i| NodeRef::at(node.tree, i))
            .collect()
    }

    /// Nodes before this one in document order, ancestors excluded,
    /// nearest first.
    pub fn preceding(&self, node: NodeRef) -> Vec<NodeRef> {
        let ancestors = self.ancestors(node);
        (1..node.index)
            .rev()
            .map(|i| NodeRef::at(node.tree, i))
            .filter(|n| !ancestors.contains(n))
            .collect()
    }

    /// The document node of the node's tree.
    pub fn root(&self, node: NodeRef) -> NodeRef {
        NodeRef::at(node.tree, 0)
    }

    /// Converts a node back into owned XML nodes.
    ///
    /// A document node yields its children; attributes yield nothing (the
    /// caller adds them to the element under construction).
    pub fn to_nodes(&self, node: NodeRef) -> Vec<Node> {
        if node.is_attribute() {
            return Vec::new();
        }
        let tree = self.tree(node.tree);
        match &tree.entries[node.index].kind {
            Kind::Document => tree.entries[node.index]
                .children
                .iter()
                .map(|&c| build_node(&tree, c))
                .collect(),
            _ => vec![build_node(&tree, node.index)],
        }
    }

    /// Name and value of an attribute node.
    pub fn attribute(&self, node: NodeRef) -> Option<(String, String)> {
        let i = node.attr?;
        match &self.tree(node.tree).entries[node.index].kind {
            Kind::Element { attributes, .. } => attributes.get(i).cloned(),
            _ => None,
        }
    }

    /// Number of trees.
    pub fn len(&self) -> usize {
        self.trees.borrow().len()
    }

    /// Whether the forest has no trees.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn build_node(tree: &Tree, index: usize) -> Node {
    let entry = &tree.entries[index];
    match &entry.kind {
        Kind::Text(t) => Node::Text(t.clone()),
        Kind::Comment(c) => Node::Comment(c.clone()),
        Kind::Pi { target, data } => Node::ProcessingInstruction {
            target: target.clone(),
            data: data.clone(),
        },
        Kind::Element { name, attributes } => Node::Element(Element {
            name: name.clone(),
            attributes: attributes.clone(),
            children: entry.children.iter().map(|&c| build_node(tree, c)).collect(),
        }),
        // Only the first entry is a document node and it has no parent.
        Kind::Document => Node::Text(String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forest(xml: &str) -> (Forest, NodeRef) {
        let forest = Forest::new();
        let root = cdr_docs::xml::parse(xml).unwrap();
        let doc = forest.add(Tree::from_element(&root));
        (forest, doc)
    }

    #[test]
    fn test_navigation() {
        let (forest, doc) = forest(r#"<a x="1" xmlns:cdr="cips.nci.nih.gov/cdr"><b>one</b><c><d>two</d></c></a>"#);
        let a = forest.children(doc)[0];
        assert_eq!(forest.name(a).as_deref(), Some("a"));
        assert_eq!(forest.attributes(a).len(), 1);
        assert_eq!(forest.namespace_decls(a).len(), 1);
        assert_eq!(forest.string_value(a), "onetwo");
        let kids = forest.children(a);
        assert_eq!(kids.len(), 2);
        assert_eq!(forest.following_siblings(kids[0]), vec![kids[1]]);
        assert_eq!(forest.preceding_siblings(kids[1]), vec![kids[0]]);
        let d = forest.children(kids[1])[0];
        assert_eq!(forest.ancestors(d), vec![kids[1], a, doc]);
        assert!(forest.preceding(d).contains(&kids[0]));
        assert!(forest.following(kids[0]).contains(&d));
    }

    #[test]
    fn test_document_order() {
        let (forest, doc) = forest(r#"<a x="1"><b/></a>"#);
        let a = forest.children(doc)[0];
        let x = forest.attributes(a)[0];
        let b = forest.children(a)[0];
        assert!(a < x && x < b);
        assert_eq!(forest.node_type(x), NodeType::Attribute);
        assert_eq!(forest.string_value(x), "1");
    }

    #[test]
    fn test_text_merging_and_copy() {
        let nodes = vec![
            Node::Text("a".into()),
            Node::CData("b".into()),
            Node::Element(Element::new("x").with_text("y")),
        ];
        let forest = Forest::new();
        let doc = forest.add_nodes(&nodes);
        assert_eq!(forest.children(doc).len(), 2);
        assert_eq!(forest.string_value(doc), "aby");
        let copied = forest.to_nodes(doc);
        assert_eq!(copied[0], Node::Text("ab".into()));
        assert_eq!(copied[1], Node::Element(Element::new("x").with_text("y")));
    }
}
