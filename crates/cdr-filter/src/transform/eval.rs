//! XPath evaluation over a [`Forest`].

use crate::error::{FilterError, FilterResult};
use crate::transform::tree::{Forest, NodeRef, NodeType};
use crate::transform::xpath::{ArithOp, Axis, CmpOp, Expr, LocationPath, NodeTest, Step};
use crate::transform::UriResolver;
use crate::uri::escape_uri_parts;

/// An XPath value.
#[derive(Debug, Clone, PartialEq)]
pub enum XValue {
    /// Node-set, sorted in document order without duplicates.
    Nodes(Vec<NodeRef>),
    /// String.
    Str(String),
    /// Number.
    Num(f64),
    /// Boolean.
    Bool(bool),
}

impl XValue {
    /// An empty node-set.
    pub fn empty() -> Self {
        XValue::Nodes(Vec::new())
    }
}

/// Variable bindings, innermost last.
pub type Bindings = [(String, XValue)];

/// Dynamic context of one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct Ctx {
    /// Context node.
    pub node: NodeRef,
    /// Context position (1-based).
    pub position: usize,
    /// Context size.
    pub size: usize,
    /// Node returned by `current()`.
    pub current: NodeRef,
}

impl Ctx {
    /// Context for a single node.
    pub fn single(node: NodeRef) -> Self {
        Self {
            node,
            position: 1,
            size: 1,
            current: node,
        }
    }

    fn at(self, node: NodeRef, position: usize, size: usize) -> Self {
        Self {
            node,
            position,
            size,
            current: self.current,
        }
    }
}

/// Formats a number the way XPath's `string()` does.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let sign = if n > 0.0 { "" } else { "-" };
        format!("{}Infinity", sign)
    } else if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Parses a string the way XPath's `number()` does.
pub fn string_to_number(s: &str) -> f64 {
    let t = s.trim();
    let body = t.strip_prefix('-').unwrap_or(t);
    let valid = !body.is_empty()
        && body.chars().all(|c| c.is_ascii_digit() || c == '.')
        && body.chars().filter(|&c| c == '.').count() <= 1
        && body != ".";
    if !valid {
        return f64::NAN;
    }
    t.parse::<f64>().unwrap_or(f64::NAN)
}

fn sort_nodes(mut nodes: Vec<NodeRef>) -> Vec<NodeRef> {
    nodes.sort_unstable();
    nodes.dedup();
    nodes
}

/// Evaluates expressions against a forest.
pub struct Evaluator<'a> {
    /// Trees being navigated.
    pub forest: &'a Forest,
    /// Resolver for `document()`.
    pub resolver: &'a dyn UriResolver,
    /// Variables in scope.
    pub vars: &'a Bindings,
}

impl<'a> Evaluator<'a> {
    /// Creates an evaluator.
    pub fn new(forest: &'a Forest, resolver: &'a dyn UriResolver, vars: &'a Bindings) -> Self {
        Self {
            forest,
            resolver,
            vars,
        }
    }

    // =========================================================================
    // Conversions
    // =========================================================================

    /// `string()` of a value.
    pub fn string(&self, v: &XValue) -> String {
        match v {
            XValue::Nodes(n) => n
                .first()
                .map(|&n| self.forest.string_value(n))
                .unwrap_or_default(),
            XValue::Str(s) => s.clone(),
            XValue::Num(n) => number_to_string(*n),
            XValue::Bool(b) => b.to_string(),
        }
    }

    /// `number()` of a value.
    pub fn number(&self, v: &XValue) -> f64 {
        match v {
            XValue::Num(n) => *n,
            XValue::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            other => string_to_number(&self.string(other)),
        }
    }

    /// `boolean()` of a value.
    pub fn boolean(&self, v: &XValue) -> bool {
        match v {
            XValue::Nodes(n) => !n.is_empty(),
            XValue::Str(s) => !s.is_empty(),
            XValue::Num(n) => *n != 0.0 && !n.is_nan(),
            XValue::Bool(b) => *b,
        }
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    /// Evaluates an expression.
    pub fn eval(&self, expr: &Expr, ctx: Ctx) -> FilterResult<XValue> {
        Ok(match expr {
            Expr::Or(l, r) => {
                XValue::Bool(self.eval_bool(l, ctx)? || self.eval_bool(r, ctx)?)
            }
            Expr::And(l, r) => {
                XValue::Bool(self.eval_bool(l, ctx)? && self.eval_bool(r, ctx)?)
            }
            Expr::Compare(op, l, r) => {
                let left = self.eval(l, ctx)?;
                let right = self.eval(r, ctx)?;
                XValue::Bool(self.compare(*op, &left, &right))
            }
            Expr::Arith(op, l, r) => {
                let a = self.number(&self.eval(l, ctx)?);
                let b = self.number(&self.eval(r, ctx)?);
                XValue::Num(match op {
                    ArithOp::Add => a + b,
                    ArithOp::Sub => a - b,
                    ArithOp::Mul => a * b,
                    ArithOp::Div => a / b,
                    ArithOp::Mod => a % b,
                })
            }
            Expr::Neg(e) => XValue::Num(-self.number(&self.eval(e, ctx)?)),
            Expr::Union(l, r) => {
                let mut nodes = self.nodes_of(l, ctx)?;
                nodes.extend(self.nodes_of(r, ctx)?);
                XValue::Nodes(sort_nodes(nodes))
            }
            Expr::Literal(s) => XValue::Str(s.clone()),
            Expr::Number(n) => XValue::Num(*n),
            Expr::Var(name) => self
                .vars
                .iter()
                .rev()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| FilterError::Transform(format!("unknown variable ${}", name)))?,
            Expr::Call(name, args) => self.call(name, args, ctx)?,
            Expr::Path(path) => XValue::Nodes(self.location_path(path, ctx)?),
            Expr::Filter {
                primary,
                predicates,
                steps,
            } => {
                let mut nodes = match self.eval(primary, ctx)? {
                    XValue::Nodes(n) => n,
                    other => {
                        return Err(FilterError::Transform(format!(
                            "expected a node-set, got {:?}",
                            other
                        )))
                    }
                };
                for predicate in predicates {
                    nodes = self.apply_predicate(nodes, predicate, ctx)?;
                }
                XValue::Nodes(self.steps(nodes, steps, ctx)?)
            }
        })
    }

    fn eval_bool(&self, expr: &Expr, ctx: Ctx) -> FilterResult<bool> {
        Ok(self.boolean(&self.eval(expr, ctx)?))
    }

    fn eval_string(&self, expr: &Expr, ctx: Ctx) -> FilterResult<String> {
        Ok(self.string(&self.eval(expr, ctx)?))
    }

    fn eval_number(&self, expr: &Expr, ctx: Ctx) -> FilterResult<f64> {
        Ok(self.number(&self.eval(expr, ctx)?))
    }

    fn nodes_of(&self, expr: &Expr, ctx: Ctx) -> FilterResult<Vec<NodeRef>> {
        match self.eval(expr, ctx)? {
            XValue::Nodes(n) => Ok(n),
            other => Err(FilterError::Transform(format!(
                "expected a node-set, got {:?}",
                other
            ))),
        }
    }

    /// Evaluates an expression that must yield a node-set.
    pub fn select(&self, expr: &Expr, ctx: Ctx) -> FilterResult<Vec<NodeRef>> {
        self.nodes_of(expr, ctx)
    }

    // =========================================================================
    // Comparisons
    // =========================================================================

    fn compare(&self, op: CmpOp, left: &XValue, right: &XValue) -> bool {
        match (left, right) {
            (XValue::Nodes(a), XValue::Nodes(b)) => {
                let rights: Vec<XValue> = b
                    .iter()
                    .map(|&n| XValue::Str(self.forest.string_value(n)))
                    .collect();
                a.iter().any(|&n| {
                    let l = XValue::Str(self.forest.string_value(n));
                    rights.iter().any(|r| self.compare_atoms(op, &l, r))
                })
            }
            (XValue::Nodes(a), XValue::Bool(_)) => {
                self.compare_atoms(op, &XValue::Bool(!a.is_empty()), right)
            }
            (XValue::Bool(_), XValue::Nodes(b)) => {
                self.compare_atoms(op, left, &XValue::Bool(!b.is_empty()))
            }
            (XValue::Nodes(a), _) => a
                .iter()
                .any(|&n| self.compare_atoms(op, &XValue::Str(self.forest.string_value(n)), right)),
            (_, XValue::Nodes(b)) => b
                .iter()
                .any(|&n| self.compare_atoms(op, left, &XValue::Str(self.forest.string_value(n)))),
            _ => self.compare_atoms(op, left, right),
        }
    }

    fn compare_atoms(&self, op: CmpOp, a: &XValue, b: &XValue) -> bool {
        match op {
            CmpOp::Eq | CmpOp::Ne => {
                let equal = if matches!(a, XValue::Bool(_)) || matches!(b, XValue::Bool(_)) {
                    self.boolean(a) == self.boolean(b)
                } else if matches!(a, XValue::Num(_)) || matches!(b, XValue::Num(_)) {
                    self.number(a) == self.number(b)
                } else {
                    self.string(a) == self.string(b)
                };
                (op == CmpOp::Eq) == equal
            }
            CmpOp::Lt => self.number(a) < self.number(b),
            CmpOp::Le => self.number(a) <= self.number(b),
            CmpOp::Gt => self.number(a) > self.number(b),
            CmpOp::Ge => self.number(a) >= self.number(b),
        }
    }

    // =========================================================================
    // Paths
    // =========================================================================

    fn location_path(&self, path: &LocationPath, ctx: Ctx) -> FilterResult<Vec<NodeRef>> {
        let start = if path.absolute {
            self.forest.root(ctx.node)
        } else {
            ctx.node
        };
        self.steps(vec![start], &path.steps, ctx)
    }

    fn steps(&self, mut nodes: Vec<NodeRef>, steps: &[Step], ctx: Ctx) -> FilterResult<Vec<NodeRef>> {
        for step in steps {
            let mut next = Vec::new();
            for &node in &nodes {
                next.extend(self.step(node, step, ctx)?);
            }
            nodes = sort_nodes(next);
        }
        Ok(nodes)
    }

    /// Nodes selected by one step from `node`, in axis order.
    pub fn step(&self, node: NodeRef, step: &Step, ctx: Ctx) -> FilterResult<Vec<NodeRef>> {
        let f = self.forest;
        let candidates = match step.axis {
            Axis::Child => f.children(node),
            Axis::Descendant => f.descendants(node),
            Axis::DescendantOrSelf => {
                let mut v = vec![node];
                v.extend(f.descendants(node));
                v
            }
            Axis::Parent => f.parent(node).into_iter().collect(),
            Axis::Ancestor => f.ancestors(node),
            Axis::AncestorOrSelf => {
                let mut v = vec![node];
                v.extend(f.ancestors(node));
                v
            }
            Axis::FollowingSibling => f.following_siblings(node),
            Axis::PrecedingSibling => f.preceding_siblings(node),
            Axis::Following => f.following(node),
            Axis::Preceding => f.preceding(node),
            Axis::Attribute => f.attributes(node),
            Axis::SelfAxis => vec![node],
        };
        let mut selected: Vec<NodeRef> = candidates
            .into_iter()
            .filter(|&n| self.node_test(n, &step.test, step.axis))
            .collect();
        for predicate in &step.predicates {
            selected = self.apply_predicate(selected, predicate, ctx)?;
        }
        Ok(selected)
    }

    pub(crate) fn node_test(&self, node: NodeRef, test: &NodeTest, axis: Axis) -> bool {
        let kind = self.forest.node_type(node);
        let principal = if axis == Axis::Attribute {
            NodeType::Attribute
        } else {
            NodeType::Element
        };
        match test {
            NodeTest::Node => true,
            NodeTest::Text => kind == NodeType::Text,
            NodeTest::Comment => kind == NodeType::Comment,
            NodeTest::Pi(target) => {
                kind == NodeType::Pi
                    && target
                        .as_ref()
                        .map_or(true, |t| self.forest.name(node).as_deref() == Some(t))
            }
            NodeTest::Any => kind == principal,
            NodeTest::Name(name) => {
                kind == principal && self.forest.name(node).as_deref() == Some(name.as_str())
            }
            NodeTest::Prefix(prefix) => {
                kind == principal
                    && self
                        .forest
                        .name(node)
                        .and_then(|n| n.split_once(':').map(|(p, _)| p == prefix))
                        .unwrap_or(false)
            }
        }
    }

    fn apply_predicate(&self, nodes: Vec<NodeRef>, predicate: &Expr, ctx: Ctx) -> FilterResult<Vec<NodeRef>> {
        let size = nodes.len();
        let mut kept = Vec::with_capacity(size);
        for (i, node) in nodes.into_iter().enumerate() {
            let inner = ctx.at(node, i + 1, size);
            let keep = match self.eval(predicate, inner)? {
                XValue::Num(n) => n == (i + 1) as f64,
                other => self.boolean(&other),
            };
            if keep {
                kept.push(node);
            }
        }
        Ok(kept)
    }

    // =========================================================================
    // Functions
    // =========================================================================

    fn arg_count(name: &str, args: &[Expr], min: usize, max: usize) -> FilterResult<()> {
        if args.len() < min || args.len() > max {
            return Err(FilterError::Transform(format!(
                "wrong number of arguments to {}()",
                name
            )));
        }
        Ok(())
    }

    fn string_arg(&self, args: &[Expr], ctx: Ctx) -> FilterResult<String> {
        match args.first() {
            Some(e) => self.eval_string(e, ctx),
            None => Ok(self.forest.string_value(ctx.node)),
        }
    }

    fn node_arg(&self, args: &[Expr], ctx: Ctx) -> FilterResult<Option<NodeRef>> {
        match args.first() {
            Some(e) => Ok(self.nodes_of(e, ctx)?.first().copied()),
            None => Ok(Some(ctx.node)),
        }
    }

    fn call(&self, name: &str, args: &[Expr], ctx: Ctx) -> FilterResult<XValue> {
        if let Some((_, "escape-uri")) = name.split_once(':') {
            let mut parts = Vec::with_capacity(args.len());
            for arg in args {
                parts.push(self.eval_string(arg, ctx)?);
            }
            return Ok(XValue::Str(escape_uri_parts(&parts)));
        }
        let value = match name {
            "position" => XValue::Num(ctx.position as f64),
            "last" => XValue::Num(ctx.size as f64),
            "count" => {
                Self::arg_count(name, args, 1, 1)?;
                XValue::Num(self.nodes_of(&args[0], ctx)?.len() as f64)
            }
            "current" => XValue::Nodes(vec![ctx.current]),
            "name" => XValue::Str(
                self.node_arg(args, ctx)?
                    .and_then(|n| self.forest.name(n))
                    .unwrap_or_default(),
            ),
            "local-name" => XValue::Str(
                self.node_arg(args, ctx)?
                    .and_then(|n| self.forest.name(n))
                    .map(|n| cdr_docs::xml::local_name(&n).to_string())
                    .unwrap_or_default(),
            ),
            "generate-id" => XValue::Str(self.node_arg(args, ctx)?.map_or_else(String::new, |n| {
                match n.attr {
                    Some(a) => format!("d{}n{}a{}", n.tree, n.index, a),
                    None => format!("d{}n{}", n.tree, n.index),
                }
            })),
            "document" => {
                Self::arg_count(name, args, 1, 2)?;
                let uris = match self.eval(&args[0], ctx)? {
                    XValue::Nodes(n) => n.iter().map(|&n| self.forest.string_value(n)).collect(),
                    other => vec![self.string(&other)],
                };
                let mut nodes = Vec::new();
                for uri in uris {
                    if let Some(doc) = self.forest.load_document(&uri, self.resolver)? {
                        nodes.push(doc);
                    }
                }
                XValue::Nodes(sort_nodes(nodes))
            }
            "string" => XValue::Str(match args.first() {
                Some(e) => self.eval_string(e, ctx)?,
                None => self.forest.string_value(ctx.node),
            }),
            "concat" => {
                let mut out = String::new();
                for arg in args {
                    out.push_str(&self.eval_string(arg, ctx)?);
                }
                XValue::Str(out)
            }
            "contains" => {
                Self::arg_count(name, args, 2, 2)?;
                let hay = self.eval_string(&args[0], ctx)?;
                XValue::Bool(hay.contains(&self.eval_string(&args[1], ctx)?))
            }
            "starts-with" => {
                Self::arg_count(name, args, 2, 2)?;
                let hay = self.eval_string(&args[0], ctx)?;
                XValue::Bool(hay.starts_with(&self.eval_string(&args[1], ctx)?))
            }
            "substring-before" => {
                Self::arg_count(name, args, 2, 2)?;
                let hay = self.eval_string(&args[0], ctx)?;
                let needle = self.eval_string(&args[1], ctx)?;
                XValue::Str(hay.split_once(needle.as_str()).map(|(b, _)| b.to_string()).unwrap_or_default())
            }
            "substring-after" => {
                Self::arg_count(name, args, 2, 2)?;
                let hay = self.eval_string(&args[0], ctx)?;
                let needle = self.eval_string(&args[1], ctx)?;
                XValue::Str(hay.split_once(needle.as_str()).map(|(_, a)| a.to_string()).unwrap_or_default())
            }
            "substring" => {
                Self::arg_count(name, args, 2, 3)?;
                let s = self.eval_string(&args[0], ctx)?;
                let start = self.eval_number(&args[1], ctx)?.round();
                let end = match args.get(2) {
                    Some(len) => start + self.eval_number(len, ctx)?.round(),
                    None => f64::INFINITY,
                };
                XValue::Str(
                    s.chars()
                        .enumerate()
                        .filter(|(i, _)| {
                            let p = (*i + 1) as f64;
                            p >= start && p < end
                        })
                        .map(|(_, c)| c)
                        .collect(),
                )
            }
            "string-length" => XValue::Num(self.string_arg(args, ctx)?.chars().count() as f64),
            "normalize-space" => XValue::Str(
                self.string_arg(args, ctx)?
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            "translate" => {
                Self::arg_count(name, args, 3, 3)?;
                let s = self.eval_string(&args[0], ctx)?;
                let from: Vec<char> = self.eval_string(&args[1], ctx)?.chars().collect();
                let to: Vec<char> = self.eval_string(&args[2], ctx)?.chars().collect();
                XValue::Str(
                    s.chars()
                        .filter_map(|c| match from.iter().position(|&f| f == c) {
                            Some(i) => to.get(i).copied(),
                            None => Some(c),
                        })
                        .collect(),
                )
            }
            "upper-case" => XValue::Str(self.string_arg(args, ctx)?.to_uppercase()),
            "lower-case" => XValue::Str(self.string_arg(args, ctx)?.to_lowercase()),
            "not" => {
                Self::arg_count(name, args, 1, 1)?;
                XValue::Bool(!self.eval_bool(&args[0], ctx)?)
            }
            "true" => XValue::Bool(true),
            "false" => XValue::Bool(false),
            "boolean" => {
                Self::arg_count(name, args, 1, 1)?;
                XValue::Bool(self.eval_bool(&args[0], ctx)?)
            }
            "number" => XValue::Num(match args.first() {
                Some(e) => self.eval_number(e, ctx)?,
                None => string_to_number(&self.forest.string_value(ctx.node)),
            }),
            "sum" => {
                Self::arg_count(name, args, 1, 1)?;
                XValue::Num(
                    self.nodes_of(&args[0], ctx)?
                        .iter()
                        .map(|&n| string_to_number(&self.forest.string_value(n)))
                        .sum(),
                )
            }
            "floor" => XValue::Num(self.one_number(name, args, ctx)?.floor()),
            "ceiling" => XValue::Num(self.one_number(name, args, ctx)?.ceil()),
            "round" => XValue::Num((self.one_number(name, args, ctx)? + 0.5).floor()),
            _ => {
                return Err(FilterError::Transform(format!(
                    "unknown function {}()",
                    name
                )))
            }
        };
        Ok(value)
    }

    fn one_number(&self, name: &str, args: &[Expr], ctx: Ctx) -> FilterResult<f64> {
        Self::arg_count(name, args, 1, 1)?;
        self.eval_number(&args[0], ctx)
    }
}
