//! The built-in XSLT engine.
//!
//! Supported: template rules with match patterns, modes and priorities,
//! named templates, `apply-templates`, `call-template`, `with-param`,
//! `param`, `variable`, `value-of`, `copy`, `copy-of`, `for-each`, `sort`,
//! `if`, `choose`, `text`, `element`, `attribute`, `comment`,
//! `processing-instruction`, `message`, literal result elements with
//! attribute value templates, and `import`/`include` through the resolver.
//! Whitespace-only text in the stylesheet is dropped outside `xsl:text`.

use std::cmp::Ordering;
use std::rc::Rc;

use cdr_docs::{Element, Node};

use crate::error::{FilterError, FilterResult};
use crate::transform::eval::{Ctx, Evaluator, XValue};
use crate::transform::tree::{is_namespace_decl, Forest, NodeRef, NodeType};
use crate::transform::xpath::{parse_expr, Axis, Expr, LocationPath, NodeTest, Step};
use crate::transform::{TransformEngine, TransformOutput, UriResolver};

/// Namespace URI of XSLT instructions.
pub const XSLT_NS: &str = "http://www.w3.org/1999/XSL/Transform";

/// Deepest template nesting before the transform is abandoned.
const MAX_DEPTH: usize = 256;

/// Deepest `import`/`include` nesting.
const MAX_MODULE_DEPTH: usize = 32;

// ============================================================================
// Compiled form
// ============================================================================

#[derive(Debug, Clone)]
enum AvtPart {
    Literal(String),
    Expr(Expr),
}

type Avt = Vec<AvtPart>;

#[derive(Debug, Clone)]
enum BindingValue {
    Select(Expr),
    Body(Vec<Instr>),
    Empty,
}

#[derive(Debug, Clone)]
struct Binding {
    name: String,
    value: BindingValue,
    param: bool,
}

#[derive(Debug, Clone)]
struct Sort {
    select: Expr,
    descending: bool,
    numeric: bool,
}

#[derive(Debug, Clone)]
enum Instr {
    Text(String),
    Literal {
        name: String,
        attributes: Vec<(String, Avt)>,
        body: Vec<Instr>,
    },
    ValueOf(Expr),
    CopyOf(Expr),
    Copy(Vec<Instr>),
    ApplyTemplates {
        select: Option<Expr>,
        mode: Option<String>,
        sorts: Vec<Sort>,
        params: Vec<Binding>,
    },
    CallTemplate {
        name: String,
        params: Vec<Binding>,
    },
    ForEach {
        select: Expr,
        sorts: Vec<Sort>,
        body: Vec<Instr>,
    },
    If {
        test: Expr,
        body: Vec<Instr>,
    },
    Choose {
        whens: Vec<(Expr, Vec<Instr>)>,
        otherwise: Vec<Instr>,
    },
    Element {
        name: Avt,
        body: Vec<Instr>,
    },
    Attribute {
        name: Avt,
        body: Vec<Instr>,
    },
    Comment(Vec<Instr>),
    ProcessingInstruction {
        name: Avt,
        body: Vec<Instr>,
    },
    Variable(Binding),
    Message {
        terminate: bool,
        body: Vec<Instr>,
    },
}

#[derive(Debug)]
struct TemplateBody {
    params: Vec<Binding>,
    instrs: Vec<Instr>,
}

#[derive(Debug)]
struct Template {
    pattern: Option<LocationPath>,
    name: Option<String>,
    mode: Option<String>,
    priority: f64,
    precedence: usize,
    order: usize,
    body: Rc<TemplateBody>,
}

#[derive(Debug, Default)]
struct Stylesheet {
    templates: Vec<Template>,
    globals: Vec<Binding>,
}

// ============================================================================
// Compilation
// ============================================================================

fn xsl_prefix(sheet: &Element) -> String {
    for (name, value) in &sheet.attributes {
        if value == XSLT_NS {
            if let Some(prefix) = name.strip_prefix("xmlns:") {
                return prefix.to_string();
            }
            if name == "xmlns" {
                return String::new();
            }
        }
    }
    sheet
        .name
        .split_once(':')
        .map(|(p, _)| p.to_string())
        .unwrap_or_default()
}

fn xsl_name<'e>(element: &'e Element, prefix: &str) -> Option<&'e str> {
    if prefix.is_empty() {
        return (!element.name.contains(':')).then_some(element.name.as_str());
    }
    element
        .name
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix(':'))
}

fn required<'e>(element: &'e Element, attr: &str) -> FilterResult<&'e str> {
    element.attr(attr).ok_or_else(|| {
        FilterError::Stylesheet(format!("<{}> requires a {} attribute", element.name, attr))
    })
}

fn parse_avt(text: &str) -> FilterResult<Avt> {
    if !text.contains('{') && !text.contains('}') {
        return Ok(vec![AvtPart::Literal(text.to_string())]);
    }
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match c {
            '{' if matches!(chars.peek(), Some((_, '{'))) => {
                chars.next();
                literal.push('{');
            }
            '}' if matches!(chars.peek(), Some((_, '}'))) => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut quote: Option<char> = None;
                let mut end = None;
                for (j, d) in chars.by_ref() {
                    match (quote, d) {
                        (Some(q), d) if d == q => quote = None,
                        (Some(_), _) => {}
                        (None, '\'' | '"') => quote = Some(d),
                        (None, '}') => {
                            end = Some(j);
                            break;
                        }
                        _ => {}
                    }
                }
                let end = end.ok_or_else(|| {
                    FilterError::Stylesheet(format!("unterminated attribute value template {:?}", text))
                })?;
                if !literal.is_empty() {
                    parts.push(AvtPart::Literal(std::mem::take(&mut literal)));
                }
                parts.push(AvtPart::Expr(parse_expr(&text[i + 1..end])?));
            }
            other => literal.push(other),
        }
    }
    if !literal.is_empty() {
        parts.push(AvtPart::Literal(literal));
    }
    Ok(parts)
}

fn is_blank(node: &Node) -> bool {
    matches!(node, Node::Text(t) if t.trim().is_empty())
}

fn split_union(expr: Expr, out: &mut Vec<LocationPath>) -> FilterResult<()> {
    match expr {
        Expr::Union(l, r) => {
            split_union(*l, out)?;
            split_union(*r, out)
        }
        Expr::Path(path) => {
            out.push(path);
            Ok(())
        }
        other => Err(FilterError::Stylesheet(format!(
            "unsupported match pattern {:?}",
            other
        ))),
    }
}

fn default_priority(path: &LocationPath) -> f64 {
    if path.absolute || path.steps.len() != 1 || !path.steps[0].predicates.is_empty() {
        return 0.5;
    }
    match &path.steps[0].test {
        NodeTest::Name(_) | NodeTest::Pi(Some(_)) => 0.0,
        NodeTest::Prefix(_) => -0.25,
        _ => -0.5,
    }
}

struct Compiler<'r> {
    resolver: &'r dyn UriResolver,
    sheet: Stylesheet,
    precedence: usize,
    order: usize,
}

impl<'r> Compiler<'r> {
    fn compile(root: &Element, resolver: &'r dyn UriResolver) -> FilterResult<Stylesheet> {
        let mut compiler = Compiler {
            resolver,
            sheet: Stylesheet::default(),
            precedence: 0,
            order: 0,
        };
        compiler.load(root, 0)?;
        Ok(compiler.sheet)
    }

    /// Compiles one stylesheet module; its imports end up with lower
    /// precedence than the module itself.
    fn load(&mut self, sheet: &Element, depth: usize) -> FilterResult<()> {
        if !matches!(sheet.local_name(), "stylesheet" | "transform") {
            return Err(FilterError::Stylesheet(format!(
                "<{}> is not a stylesheet",
                sheet.name
            )));
        }
        let mut own = Vec::new();
        self.top_level(sheet, depth, &mut own)?;
        self.precedence += 1;
        for template in &mut own {
            template.precedence = self.precedence;
        }
        self.sheet.templates.extend(own);
        Ok(())
    }

    fn module(&self, element: &Element, depth: usize) -> FilterResult<Element> {
        if depth >= MAX_MODULE_DEPTH {
            return Err(FilterError::Stylesheet(
                "stylesheet modules nested too deeply".to_string(),
            ));
        }
        let href = required(element, "href")?;
        let xml = self.resolver.resolve(href)?.ok_or_else(|| {
            FilterError::Stylesheet(format!("cannot load stylesheet module {}", href))
        })?;
        Ok(cdr_docs::xml::parse(&xml)?)
    }

    fn top_level(&mut self, sheet: &Element, depth: usize, own: &mut Vec<Template>) -> FilterResult<()> {
        let prefix = xsl_prefix(sheet);
        for child in sheet.elements() {
            match xsl_name(child, &prefix) {
                Some("import") => {
                    let module = self.module(child, depth)?;
                    self.load(&module, depth + 1)?;
                }
                Some("include") => {
                    let module = self.module(child, depth)?;
                    self.top_level(&module, depth + 1, own)?;
                }
                Some("template") => own.extend(self.template(child, &prefix)?),
                Some(kind @ ("variable" | "param")) => {
                    let binding = self.binding(child, &prefix, kind == "param")?;
                    self.sheet.globals.push(binding);
                }
                Some(
                    "output" | "strip-space" | "preserve-space" | "key" | "decimal-format"
                    | "namespace-alias" | "attribute-set",
                ) => {}
                Some(other) => {
                    return Err(FilterError::Stylesheet(format!(
                        "unsupported top-level element xsl:{}",
                        other
                    )))
                }
                None => {}
            }
        }
        Ok(())
    }

    fn template(&mut self, element: &Element, prefix: &str) -> FilterResult<Vec<Template>> {
        let name = element.attr("name").map(str::to_string);
        let mode = element.attr("mode").map(str::to_string);
        let priority = match element.attr("priority") {
            Some(p) => Some(p.trim().parse::<f64>().map_err(|_| {
                FilterError::Stylesheet(format!("invalid template priority {:?}", p))
            })?),
            None => None,
        };

        let mut params = Vec::new();
        let mut rest = Vec::new();
        for child in &element.children {
            let leading = rest.iter().all(is_blank);
            match child {
                Node::Element(e) if leading && xsl_name(e, prefix) == Some("param") => {
                    params.push(self.binding(e, prefix, true)?)
                }
                other => rest.push(other.clone()),
            }
        }
        let body = Rc::new(TemplateBody {
            params,
            instrs: self.body_nodes(&rest, prefix)?,
        });

        let mut alternatives = Vec::new();
        if let Some(pattern) = element.attr("match") {
            split_union(parse_expr(pattern)?, &mut alternatives)?;
        } else if name.is_none() {
            return Err(FilterError::Stylesheet(
                "template needs a match or a name attribute".to_string(),
            ));
        }

        let mut templates = Vec::new();
        if alternatives.is_empty() {
            self.order += 1;
            templates.push(Template {
                pattern: None,
                name: name.clone(),
                mode: mode.clone(),
                priority: 0.0,
                precedence: 0,
                order: self.order,
                body: Rc::clone(&body),
            });
        }
        for (i, path) in alternatives.into_iter().enumerate() {
            self.order += 1;
            templates.push(Template {
                priority: priority.unwrap_or_else(|| default_priority(&path)),
                pattern: Some(path),
                // Only the first alternative answers to the name.
                name: if i == 0 { name.clone() } else { None },
                mode: mode.clone(),
                precedence: 0,
                order: self.order,
                body: Rc::clone(&body),
            });
        }
        Ok(templates)
    }

    fn binding(&mut self, element: &Element, prefix: &str, param: bool) -> FilterResult<Binding> {
        let name = required(element, "name")?.to_string();
        let value = match element.attr("select") {
            Some(select) => BindingValue::Select(parse_expr(select)?),
            None if element.children.is_empty() => BindingValue::Empty,
            None => BindingValue::Body(self.body(element, prefix)?),
        };
        Ok(Binding { name, value, param })
    }

    fn body(&mut self, element: &Element, prefix: &str) -> FilterResult<Vec<Instr>> {
        self.body_nodes(&element.children, prefix)
    }

    fn body_nodes(&mut self, nodes: &[Node], prefix: &str) -> FilterResult<Vec<Instr>> {
        let mut instrs = Vec::new();
        for node in nodes {
            match node {
                Node::Text(t) | Node::CData(t) => {
                    if !t.trim().is_empty() {
                        instrs.push(Instr::Text(t.clone()));
                    }
                }
                Node::Element(e) => instrs.push(self.instruction(e, prefix)?),
                _ => {}
            }
        }
        Ok(instrs)
    }

    /// Leading `xsl:sort` children, then the remaining body.
    fn sorted_body(&mut self, element: &Element, prefix: &str) -> FilterResult<(Vec<Sort>, Vec<Instr>)> {
        let mut sorts = Vec::new();
        let mut rest = Vec::new();
        for child in &element.children {
            match child {
                Node::Element(e) if xsl_name(e, prefix) == Some("sort") => sorts.push(Sort {
                    select: parse_expr(e.attr("select").unwrap_or("."))?,
                    descending: e.attr("order") == Some("descending"),
                    numeric: e.attr("data-type") == Some("number"),
                }),
                other => rest.push(other.clone()),
            }
        }
        Ok((sorts, self.body_nodes(&rest, prefix)?))
    }

    fn with_params(&mut self, element: &Element, prefix: &str) -> FilterResult<Vec<Binding>> {
        element
            .elements()
            .filter(|e| xsl_name(e, prefix) == Some("with-param"))
            .map(|e| self.binding(e, prefix, true))
            .collect()
    }

    fn instruction(&mut self, element: &Element, prefix: &str) -> FilterResult<Instr> {
        let kind = match xsl_name(element, prefix) {
            Some(kind) => kind,
            None => return self.literal(element, prefix),
        };
        Ok(match kind {
            "apply-templates" => {
                let (sorts, _) = self.sorted_body(element, prefix)?;
                Instr::ApplyTemplates {
                    select: element.attr("select").map(parse_expr).transpose()?,
                    mode: element.attr("mode").map(str::to_string),
                    sorts,
                    params: self.with_params(element, prefix)?,
                }
            }
            "call-template" => Instr::CallTemplate {
                name: required(element, "name")?.to_string(),
                params: self.with_params(element, prefix)?,
            },
            "value-of" => Instr::ValueOf(parse_expr(required(element, "select")?)?),
            "copy-of" => Instr::CopyOf(parse_expr(required(element, "select")?)?),
            "copy" => Instr::Copy(self.body(element, prefix)?),
            "for-each" => {
                let select = parse_expr(required(element, "select")?)?;
                let (sorts, body) = self.sorted_body(element, prefix)?;
                Instr::ForEach { select, sorts, body }
            }
            "if" => Instr::If {
                test: parse_expr(required(element, "test")?)?,
                body: self.body(element, prefix)?,
            },
            "choose" => {
                let mut whens = Vec::new();
                let mut otherwise = Vec::new();
                for child in element.elements() {
                    match xsl_name(child, prefix) {
                        Some("when") => whens.push((
                            parse_expr(required(child, "test")?)?,
                            self.body(child, prefix)?,
                        )),
                        Some("otherwise") => otherwise = self.body(child, prefix)?,
                        _ => {
                            return Err(FilterError::Stylesheet(format!(
                                "unexpected <{}> in xsl:choose",
                                child.name
                            )))
                        }
                    }
                }
                Instr::Choose { whens, otherwise }
            }
            "text" => Instr::Text(element.text()),
            "element" => Instr::Element {
                name: parse_avt(required(element, "name")?)?,
                body: self.body(element, prefix)?,
            },
            "attribute" => Instr::Attribute {
                name: parse_avt(required(element, "name")?)?,
                body: self.body(element, prefix)?,
            },
            "comment" => Instr::Comment(self.body(element, prefix)?),
            "processing-instruction" => Instr::ProcessingInstruction {
                name: parse_avt(required(element, "name")?)?,
                body: self.body(element, prefix)?,
            },
            "variable" | "param" => Instr::Variable(self.binding(element, prefix, false)?),
            "message" => Instr::Message {
                terminate: element.attr("terminate") == Some("yes"),
                body: self.body(element, prefix)?,
            },
            other => {
                return Err(FilterError::Stylesheet(format!(
                    "unsupported instruction xsl:{}",
                    other
                )))
            }
        })
    }

    fn literal(&mut self, element: &Element, prefix: &str) -> FilterResult<Instr> {
        let xsl_decl = if prefix.is_empty() {
            "xmlns".to_string()
        } else {
            format!("xmlns:{}", prefix)
        };
        let xsl_attr = format!("{}:", prefix);
        let mut attributes = Vec::new();
        for (name, value) in &element.attributes {
            if *name == xsl_decl || (!prefix.is_empty() && name.starts_with(&xsl_attr)) {
                continue;
            }
            let value = if is_namespace_decl(name) {
                vec![AvtPart::Literal(value.clone())]
            } else {
                parse_avt(value)?
            };
            attributes.push((name.clone(), value));
        }
        Ok(Instr::Literal {
            name: element.name.clone(),
            attributes,
            body: self.body(element, prefix)?,
        })
    }
}

// ============================================================================
// Result construction
// ============================================================================

#[derive(Default)]
struct Output {
    nodes: Vec<Node>,
    attributes: Vec<(String, String)>,
    element: bool,
}

impl Output {
    fn element() -> Self {
        Self {
            element: true,
            ..Self::default()
        }
    }

    fn text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(Node::Text(last)) = self.nodes.last_mut() {
            last.push_str(text);
        } else {
            self.nodes.push(Node::Text(text.to_string()));
        }
    }

    fn node(&mut self, node: Node) {
        match node {
            Node::Text(t) => self.text(&t),
            other => self.nodes.push(other),
        }
    }

    /// Adds an attribute to the element under construction. Attributes
    /// arriving after child content, or outside an element, are dropped.
    fn attribute(&mut self, name: String, value: String) {
        if !self.element || !self.nodes.is_empty() {
            log::debug!("dropping attribute {} written after content", name);
            return;
        }
        set_attribute(&mut self.attributes, name, value);
    }

    fn string_value(&self) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            match node {
                Node::Text(t) | Node::CData(t) => out.push_str(t),
                Node::Element(e) => out.push_str(&e.text()),
                _ => {}
            }
        }
        out
    }

    fn into_element(self, name: String, mut attributes: Vec<(String, String)>) -> Element {
        for (n, v) in self.attributes {
            set_attribute(&mut attributes, n, v);
        }
        Element {
            name,
            attributes,
            children: self.nodes,
        }
    }
}

fn set_attribute(attributes: &mut Vec<(String, String)>, name: String, value: String) {
    match attributes.iter_mut().find(|(n, _)| *n == name) {
        Some(slot) => slot.1 = value,
        None => attributes.push((name, value)),
    }
}

// ============================================================================
// Execution
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum SortKey {
    Text(String),
    Number(f64),
}

fn compare_keys(a: &SortKey, b: &SortKey) -> Ordering {
    match (a, b) {
        (SortKey::Number(x), SortKey::Number(y)) => match (x.is_nan(), y.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        },
        (SortKey::Text(x), SortKey::Text(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

struct Runtime<'s> {
    sheet: &'s Stylesheet,
    forest: Forest,
    resolver: &'s dyn UriResolver,
    globals: Vec<(String, XValue)>,
    messages: Vec<String>,
    depth: usize,
}

type Vars = Vec<(String, XValue)>;

impl<'s> Runtime<'s> {
    fn evaluator<'a>(&'a self, vars: &'a Vars) -> Evaluator<'a> {
        Evaluator::new(&self.forest, self.resolver, vars)
    }

    fn eval(&self, expr: &Expr, ctx: Ctx, vars: &Vars) -> FilterResult<XValue> {
        self.evaluator(vars).eval(expr, ctx)
    }

    fn eval_string(&self, expr: &Expr, ctx: Ctx, vars: &Vars) -> FilterResult<String> {
        let ev = self.evaluator(vars);
        Ok(ev.string(&ev.eval(expr, ctx)?))
    }

    fn avt(&self, avt: &Avt, ctx: Ctx, vars: &Vars) -> FilterResult<String> {
        let mut out = String::new();
        for part in avt {
            match part {
                AvtPart::Literal(s) => out.push_str(s),
                AvtPart::Expr(e) => out.push_str(&self.eval_string(e, ctx, vars)?),
            }
        }
        Ok(out)
    }

    fn binding_value(&mut self, binding: &'s Binding, ctx: Ctx, vars: &mut Vars) -> FilterResult<XValue> {
        Ok(match &binding.value {
            BindingValue::Select(e) => self.eval(e, ctx, vars)?,
            BindingValue::Empty => XValue::Str(String::new()),
            BindingValue::Body(body) => {
                let mut out = Output::default();
                self.exec(body, ctx, vars, &mut out)?;
                XValue::Nodes(vec![self.forest.add_nodes(&out.nodes)])
            }
        })
    }

    fn bind_params(&mut self, params: &'s [Binding], ctx: Ctx, vars: &mut Vars) -> FilterResult<Vars> {
        let mut values = Vec::with_capacity(params.len());
        for p in params {
            values.push((p.name.clone(), self.binding_value(p, ctx, vars)?));
        }
        Ok(values)
    }

    fn sort(&self, nodes: Vec<NodeRef>, sorts: &[Sort], vars: &Vars) -> FilterResult<Vec<NodeRef>> {
        if sorts.is_empty() {
            return Ok(nodes);
        }
        let ev = self.evaluator(vars);
        let size = nodes.len();
        let mut keyed = Vec::with_capacity(size);
        for (i, node) in nodes.into_iter().enumerate() {
            let inner = Ctx {
                node,
                position: i + 1,
                size,
                current: node,
            };
            let mut keys = Vec::with_capacity(sorts.len());
            for sort in sorts {
                let value = ev.eval(&sort.select, inner)?;
                keys.push(if sort.numeric {
                    SortKey::Number(ev.number(&value))
                } else {
                    SortKey::Text(ev.string(&value))
                });
            }
            keyed.push((keys, node));
        }
        keyed.sort_by(|(a, _), (b, _)| {
            for (i, sort) in sorts.iter().enumerate() {
                let ord = compare_keys(&a[i], &b[i]);
                let ord = if sort.descending { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        Ok(keyed.into_iter().map(|(_, n)| n).collect())
    }

    // =========================================================================
    // Template selection
    // =========================================================================

    fn matches(&self, ev: &Evaluator<'_>, node: NodeRef, steps: &[Step], absolute: bool) -> FilterResult<bool> {
        let (last, rest) = match steps.split_last() {
            Some(split) => split,
            None => return Ok(!absolute || self.forest.node_type(node) == NodeType::Document),
        };
        if last.is_descendant_or_self() {
            let mut current = Some(node);
            while let Some(candidate) = current {
                if self.matches(ev, candidate, rest, absolute)? {
                    return Ok(true);
                }
                current = self.forest.parent(candidate);
            }
            return Ok(false);
        }
        let parent = match self.forest.parent(node) {
            Some(p) => p,
            None => return Ok(false),
        };
        let selected = if last.predicates.is_empty() {
            let on_axis = match last.axis {
                Axis::Attribute => node.is_attribute(),
                Axis::Child => !node.is_attribute(),
                _ => false,
            };
            on_axis && ev.node_test(node, &last.test, last.axis)
        } else {
            ev.step(parent, last, Ctx::single(node))?.contains(&node)
        };
        if !selected {
            return Ok(false);
        }
        self.matches(ev, parent, rest, absolute)
    }

    fn find_template(&self, node: NodeRef, mode: Option<&str>) -> FilterResult<Option<&'s Template>> {
        let sheet = self.sheet;
        let ev = self.evaluator(&self.globals);
        let mut best: Option<&'s Template> = None;
        for template in &sheet.templates {
            let pattern = match &template.pattern {
                Some(p) => p,
                None => continue,
            };
            if template.mode.as_deref() != mode {
                continue;
            }
            if let Some(b) = best {
                let outranked = (b.precedence, b.priority) > (template.precedence, template.priority);
                if outranked {
                    continue;
                }
            }
            if !self.matches(&ev, node, &pattern.steps, pattern.absolute)? {
                continue;
            }
            best = match best {
                Some(b)
                    if (b.precedence, b.priority, b.order)
                        > (template.precedence, template.priority, template.order) =>
                {
                    Some(b)
                }
                _ => Some(template),
            };
        }
        Ok(best)
    }

    fn named_template(&self, name: &str) -> FilterResult<&'s Template> {
        let sheet = self.sheet;
        sheet
            .templates
            .iter()
            .filter(|t| t.name.as_deref() == Some(name))
            .max_by_key(|t| (t.precedence, t.order))
            .ok_or_else(|| FilterError::Transform(format!("no template named {}", name)))
    }

    // =========================================================================
    // Template invocation
    // =========================================================================

    fn invoke(&mut self, template: &'s Template, ctx: Ctx, params: &Vars, out: &mut Output) -> FilterResult<()> {
        if self.depth >= MAX_DEPTH {
            return Err(FilterError::Transform(
                "template recursion too deep".to_string(),
            ));
        }
        self.depth += 1;
        let ctx = Ctx {
            current: ctx.node,
            ..ctx
        };
        let mut vars = self.globals.clone();
        let body: &'s TemplateBody = &template.body;
        let result = (|| {
            for param in &body.params {
                let value = match params.iter().rev().find(|(n, _)| *n == param.name) {
                    Some((_, v)) => v.clone(),
                    None => self.binding_value(param, ctx, &mut vars)?,
                };
                vars.push((param.name.clone(), value));
            }
            self.exec(&body.instrs, ctx, &mut vars, out)
        })();
        self.depth -= 1;
        result
    }

    fn apply(
        &mut self,
        nodes: Vec<NodeRef>,
        mode: Option<&str>,
        params: &Vars,
        out: &mut Output,
    ) -> FilterResult<()> {
        let size = nodes.len();
        for (i, node) in nodes.into_iter().enumerate() {
            let ctx = Ctx {
                node,
                position: i + 1,
                size,
                current: node,
            };
            match self.find_template(node, mode)? {
                Some(template) => self.invoke(template, ctx, params, out)?,
                None => self.builtin(ctx, mode, out)?,
            }
        }
        Ok(())
    }

    fn builtin(&mut self, ctx: Ctx, mode: Option<&str>, out: &mut Output) -> FilterResult<()> {
        match self.forest.node_type(ctx.node) {
            NodeType::Document | NodeType::Element => {
                let children = self.forest.children(ctx.node);
                self.apply(children, mode, &Vec::new(), out)
            }
            NodeType::Text | NodeType::Attribute => {
                out.text(&self.forest.string_value(ctx.node));
                Ok(())
            }
            NodeType::Comment | NodeType::Pi => Ok(()),
        }
    }

    // =========================================================================
    // Instructions
    // =========================================================================

    fn exec(&mut self, instrs: &'s [Instr], ctx: Ctx, vars: &mut Vars, out: &mut Output) -> FilterResult<()> {
        let mark = vars.len();
        let result = self.exec_each(instrs, ctx, vars, out);
        vars.truncate(mark);
        result
    }

    fn exec_each(&mut self, instrs: &'s [Instr], ctx: Ctx, vars: &mut Vars, out: &mut Output) -> FilterResult<()> {
        for instr in instrs {
            match instr {
                Instr::Variable(binding) => {
                    let value = self.binding_value(binding, ctx, vars)?;
                    vars.push((binding.name.clone(), value));
                }
                other => self.exec_one(other, ctx, vars, out)?,
            }
        }
        Ok(())
    }

    fn exec_one(&mut self, instr: &'s Instr, ctx: Ctx, vars: &mut Vars, out: &mut Output) -> FilterResult<()> {
        match instr {
            Instr::Text(t) => out.text(t),
            Instr::ValueOf(e) => {
                let text = self.eval_string(e, ctx, vars)?;
                out.text(&text);
            }
            Instr::CopyOf(e) => match self.eval(e, ctx, vars)? {
                XValue::Nodes(nodes) => {
                    for node in nodes {
                        self.copy_node(node, out);
                    }
                }
                other => {
                    let text = self.evaluator(vars).string(&other);
                    out.text(&text);
                }
            },
            Instr::Copy(body) => self.copy_shallow(body, ctx, vars, out)?,
            Instr::Literal {
                name,
                attributes,
                body,
            } => {
                let mut attrs = Vec::with_capacity(attributes.len());
                for (n, avt) in attributes {
                    attrs.push((n.clone(), self.avt(avt, ctx, vars)?));
                }
                let mut inner = Output::element();
                self.exec(body, ctx, vars, &mut inner)?;
                out.node(Node::Element(inner.into_element(name.clone(), attrs)));
            }
            Instr::Element { name, body } => {
                let name = self.avt(name, ctx, vars)?;
                let mut inner = Output::element();
                self.exec(body, ctx, vars, &mut inner)?;
                out.node(Node::Element(inner.into_element(name, Vec::new())));
            }
            Instr::Attribute { name, body } => {
                let name = self.avt(name, ctx, vars)?;
                let value = self.content_text(body, ctx, vars)?;
                out.attribute(name, value);
            }
            Instr::Comment(body) => {
                let text = self.content_text(body, ctx, vars)?;
                out.node(Node::Comment(text));
            }
            Instr::ProcessingInstruction { name, body } => {
                let target = self.avt(name, ctx, vars)?;
                let data = self.content_text(body, ctx, vars)?;
                out.node(Node::ProcessingInstruction { target, data });
            }
            Instr::If { test, body } => {
                let ev = self.evaluator(vars);
                if ev.boolean(&ev.eval(test, ctx)?) {
                    self.exec(body, ctx, vars, out)?;
                }
            }
            Instr::Choose { whens, otherwise } => {
                let mut chosen: &'s [Instr] = otherwise;
                for (test, body) in whens {
                    let ev = self.evaluator(vars);
                    if ev.boolean(&ev.eval(test, ctx)?) {
                        chosen = body;
                        break;
                    }
                }
                self.exec(chosen, ctx, vars, out)?;
            }
            Instr::ForEach { select, sorts, body } => {
                let nodes = self.evaluator(vars).select(select, ctx)?;
                let nodes = self.sort(nodes, sorts, vars)?;
                let size = nodes.len();
                for (i, node) in nodes.into_iter().enumerate() {
                    let inner = Ctx {
                        node,
                        position: i + 1,
                        size,
                        current: node,
                    };
                    self.exec(body, inner, vars, out)?;
                }
            }
            Instr::ApplyTemplates {
                select,
                mode,
                sorts,
                params,
            } => {
                let nodes = match select {
                    Some(e) => self.evaluator(vars).select(e, ctx)?,
                    None => self.forest.children(ctx.node),
                };
                let nodes = self.sort(nodes, sorts, vars)?;
                let params = self.bind_params(params, ctx, vars)?;
                self.apply(nodes, mode.as_deref(), &params, out)?;
            }
            Instr::CallTemplate { name, params } => {
                let template = self.named_template(name)?;
                let params = self.bind_params(params, ctx, vars)?;
                self.invoke(template, ctx, &params, out)?;
            }
            Instr::Message { terminate, body } => {
                let text = self.content_text(body, ctx, vars)?;
                log::debug!("xsl:message: {}", text);
                self.messages.push(text.clone());
                if *terminate {
                    return Err(FilterError::Terminated(text));
                }
            }
            Instr::Variable(binding) => {
                let value = self.binding_value(binding, ctx, vars)?;
                vars.push((binding.name.clone(), value));
            }
        }
        Ok(())
    }

    fn content_text(&mut self, body: &'s [Instr], ctx: Ctx, vars: &mut Vars) -> FilterResult<String> {
        let mut inner = Output::default();
        self.exec(body, ctx, vars, &mut inner)?;
        Ok(inner.string_value())
    }

    fn copy_node(&self, node: NodeRef, out: &mut Output) {
        if node.is_attribute() {
            if let Some((name, value)) = self.forest.attribute(node) {
                out.attribute(name, value);
            }
            return;
        }
        for copied in self.forest.to_nodes(node) {
            out.node(copied);
        }
    }

    fn copy_shallow(&mut self, body: &'s [Instr], ctx: Ctx, vars: &mut Vars, out: &mut Output) -> FilterResult<()> {
        let node = ctx.node;
        match self.forest.node_type(node) {
            NodeType::Element => {
                let name = self.forest.name(node).unwrap_or_default();
                let decls = self.forest.namespace_decls(node);
                let mut inner = Output::element();
                self.exec(body, ctx, vars, &mut inner)?;
                out.node(Node::Element(inner.into_element(name, decls)));
            }
            NodeType::Document => self.exec(body, ctx, vars, out)?,
            NodeType::Attribute | NodeType::Text | NodeType::Comment | NodeType::Pi => {
                self.copy_node(node, out)
            }
        }
        Ok(())
    }
}

// ============================================================================
// Engine
// ============================================================================

/// The built-in XSLT 1.0 subset engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct XsltLite;

impl XsltLite {
    /// Creates the engine.
    pub fn new() -> Self {
        Self
    }
}

impl TransformEngine for XsltLite {
    fn transform(
        &self,
        stylesheet: &str,
        source: &[Node],
        params: &[(String, String)],
        resolver: &dyn UriResolver,
    ) -> FilterResult<TransformOutput> {
        let root = cdr_docs::xml::parse(stylesheet)?;
        let sheet = Compiler::compile(&root, resolver)?;
        log::debug!(
            "compiled stylesheet with {} templates and {} globals",
            sheet.templates.len(),
            sheet.globals.len()
        );

        let mut runtime = Runtime {
            sheet: &sheet,
            forest: Forest::new(),
            resolver,
            globals: Vec::new(),
            messages: Vec::new(),
            depth: 0,
        };
        let document = runtime.forest.add_nodes(source);
        let ctx = Ctx::single(document);

        let mut globals = Vec::with_capacity(sheet.globals.len());
        for binding in &sheet.globals {
            let supplied = params
                .iter()
                .rev()
                .find(|(n, _)| binding.param && *n == binding.name);
            let value = match supplied {
                Some((_, v)) => XValue::Str(v.clone()),
                None => runtime.binding_value(binding, ctx, &mut globals)?,
            };
            globals.push((binding.name.clone(), value));
        }
        runtime.globals = globals;

        let mut out = Output::default();
        runtime.apply(vec![document], None, &Vec::new(), &mut out)?;
        Ok(TransformOutput {
            nodes: out.nodes,
            messages: runtime.messages,
        })
    }
}
