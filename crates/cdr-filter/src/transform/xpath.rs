//! XPath 1.0 expression parser using nom.
//!
//! Covers the full expression grammar (location paths on every axis,
//! predicates, filter expressions, unions, arithmetic, comparisons, `and`
//! and `or`). Names are matched as written; prefixes are not resolved
//! against namespace URIs.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit0, digit1, multispace0},
    combinator::{all_consuming, map, not, opt, peek, recognize, value},
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use crate::error::{FilterError, FilterResult};

// ============================================================================
// AST
// ============================================================================

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

/// Arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `div`
    Div,
    /// `mod`
    Mod,
}

/// Navigation axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// `child::`
    Child,
    /// `descendant::`
    Descendant,
    /// `descendant-or-self::`
    DescendantOrSelf,
    /// `parent::`
    Parent,
    /// `ancestor::`
    Ancestor,
    /// `ancestor-or-self::`
    AncestorOrSelf,
    /// `following-sibling::`
    FollowingSibling,
    /// `preceding-sibling::`
    PrecedingSibling,
    /// `following::`
    Following,
    /// `preceding::`
    Preceding,
    /// `attribute::` or `@`
    Attribute,
    /// `self::`
    SelfAxis,
}

impl Axis {
    /// Whether positions on this axis count backwards from the context.
    pub fn is_reverse(self) -> bool {
        matches!(
            self,
            Axis::Parent
                | Axis::Ancestor
                | Axis::AncestorOrSelf
                | Axis::PrecedingSibling
                | Axis::Preceding
        )
    }
}

/// Node tests.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeTest {
    /// A qualified name.
    Name(String),
    /// `prefix:*`
    Prefix(String),
    /// `*`
    Any,
    /// `node()`
    Node,
    /// `text()`
    Text,
    /// `comment()`
    Comment,
    /// `processing-instruction()` with an optional target literal.
    Pi(Option<String>),
}

/// One step of a location path.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Axis.
    pub axis: Axis,
    /// Node test.
    pub test: NodeTest,
    /// Predicates, applied in order.
    pub predicates: Vec<Expr>,
}

impl Step {
    fn new(axis: Axis, test: NodeTest) -> Self {
        Self {
            axis,
            test,
            predicates: Vec::new(),
        }
    }

    /// `descendant-or-self::node()`, the expansion of `//`.
    pub fn descendant_or_self() -> Self {
        Self::new(Axis::DescendantOrSelf, NodeTest::Node)
    }

    /// Whether this is the bare `//` expansion.
    pub fn is_descendant_or_self(&self) -> bool {
        self.axis == Axis::DescendantOrSelf && self.test == NodeTest::Node && self.predicates.is_empty()
    }
}

/// A location path.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationPath {
    /// Starts at the document node.
    pub absolute: bool,
    /// Steps in order.
    pub steps: Vec<Step>,
}

/// An XPath expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `a or b`
    Or(Box<Expr>, Box<Expr>),
    /// `a and b`
    And(Box<Expr>, Box<Expr>),
    /// Comparison.
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    /// Arithmetic.
    Arith(ArithOp, Box<Expr>, Box<Expr>),
    /// Unary minus.
    Neg(Box<Expr>),
    /// `a | b`
    Union(Box<Expr>, Box<Expr>),
    /// String literal.
    Literal(String),
    /// Number literal.
    Number(f64),
    /// `$name`
    Var(String),
    /// Function call.
    Call(String, Vec<Expr>),
    /// Location path.
    Path(LocationPath),
    /// A primary expression with predicates and an optional trailing path.
    Filter {
        /// The primary expression.
        primary: Box<Expr>,
        /// Predicates on the primary's node-set.
        predicates: Vec<Expr>,
        /// Steps following `/` or `//`.
        steps: Vec<Step>,
    },
}

// ============================================================================
// Entry point
// ============================================================================

/// Parses an XPath expression.
pub fn parse_expr(input: &str) -> FilterResult<Expr> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(FilterError::XPath {
            position: 0,
            message: "empty expression".to_string(),
        });
    }
    match all_consuming(delimited(ws, expr, ws))(trimmed) {
        Ok((_, e)) => Ok(e),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(FilterError::XPath {
            position: trimmed.len() - e.input.len(),
            message: format!("unexpected input at: '{}' in {:?}", truncate(e.input, 20), trimmed),
        }),
        Err(nom::Err::Incomplete(_)) => Err(FilterError::XPath {
            position: trimmed.len(),
            message: format!("incomplete expression {:?}", trimmed),
        }),
    }
}

fn truncate(s: &str, max_len: usize) -> &str {
    match s.char_indices().nth(max_len) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

// ============================================================================
// Operators (lowest precedence first)
// ============================================================================

fn expr(input: &str) -> IResult<&str, Expr> {
    or_expr(input)
}

fn binary_chain<'a, O: Copy>(
    input: &'a str,
    operand: fn(&'a str) -> IResult<&'a str, Expr>,
    operator: fn(&'a str) -> IResult<&'a str, O>,
    build: fn(O, Expr, Expr) -> Expr,
) -> IResult<&'a str, Expr> {
    let (mut input, mut left) = operand(input)?;
    loop {
        match preceded(ws, operator)(input) {
            Ok((rest, op)) => {
                let (rest, right) = preceded(ws, operand)(rest)?;
                left = build(op, left, right);
                input = rest;
            }
            Err(_) => return Ok((input, left)),
        }
    }
}

fn or_expr(input: &str) -> IResult<&str, Expr> {
    binary_chain(input, and_expr, |i| value((), keyword("or"))(i), |_, l, r| {
        Expr::Or(Box::new(l), Box::new(r))
    })
}

fn and_expr(input: &str) -> IResult<&str, Expr> {
    binary_chain(input, equality_expr, |i| value((), keyword("and"))(i), |_, l, r| {
        Expr::And(Box::new(l), Box::new(r))
    })
}

fn equality_expr(input: &str) -> IResult<&str, Expr> {
    binary_chain(
        input,
        relational_expr,
        |i| alt((value(CmpOp::Ne, tag("!=")), value(CmpOp::Eq, tag("="))))(i),
        |op, l, r| Expr::Compare(op, Box::new(l), Box::new(r)),
    )
}

fn relational_expr(input: &str) -> IResult<&str, Expr> {
    binary_chain(
        input,
        additive_expr,
        |i| {
            alt((
                value(CmpOp::Le, tag("<=")),
                value(CmpOp::Ge, tag(">=")),
                value(CmpOp::Lt, tag("<")),
                value(CmpOp::Gt, tag(">")),
            ))(i)
        },
        |op, l, r| Expr::Compare(op, Box::new(l), Box::new(r)),
    )
}

fn additive_expr(input: &str) -> IResult<&str, Expr> {
    binary_chain(
        input,
        multiplicative_expr,
        |i| alt((value(ArithOp::Add, tag("+")), value(ArithOp::Sub, tag("-"))))(i),
        |op, l, r| Expr::Arith(op, Box::new(l), Box::new(r)),
    )
}

fn multiplicative_expr(input: &str) -> IResult<&str, Expr> {
    binary_chain(
        input,
        unary_expr,
        |i| {
            alt((
                value(ArithOp::Mul, tag("*")),
                value(ArithOp::Div, keyword("div")),
                value(ArithOp::Mod, keyword("mod")),
            ))(i)
        },
        |op, l, r| Expr::Arith(op, Box::new(l), Box::new(r)),
    )
}

fn unary_expr(input: &str) -> IResult<&str, Expr> {
    alt((
        map(preceded(pair(char('-'), ws), unary_expr), |e| Expr::Neg(Box::new(e))),
        union_expr,
    ))(input)
}

fn union_expr(input: &str) -> IResult<&str, Expr> {
    binary_chain(input, path_expr, |i| value((), char('|'))(i), |_, l, r| {
        Expr::Union(Box::new(l), Box::new(r))
    })
}

/// A word operator; must not run into a following name character.
fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(tag(word), not(peek(take_while1(is_name_char))))
}

// ============================================================================
// Paths
// ============================================================================

fn path_expr(input: &str) -> IResult<&str, Expr> {
    alt((filter_path, map(location_path, Expr::Path)))(input)
}

fn filter_path(input: &str) -> IResult<&str, Expr> {
    let (input, primary) = primary_expr(input)?;
    let (input, predicates) = many0(preceded(ws, predicate))(input)?;
    let (input, steps) = opt(preceded(ws, tail_steps))(input)?;
    if predicates.is_empty() && steps.is_none() {
        return Ok((input, primary));
    }
    Ok((
        input,
        Expr::Filter {
            primary: Box::new(primary),
            predicates,
            steps: steps.unwrap_or_default(),
        },
    ))
}

/// `/step...` or `//step...` following a filter expression.
fn tail_steps(input: &str) -> IResult<&str, Vec<Step>> {
    let (input, lead) = separator(input)?;
    let (input, mut rest) = relative_steps(input)?;
    let mut steps = lead;
    steps.append(&mut rest);
    Ok((input, steps))
}

fn location_path(input: &str) -> IResult<&str, LocationPath> {
    alt((
        map(preceded(tag("//"), relative_steps), |mut steps| {
            steps.insert(0, Step::descendant_or_self());
            LocationPath {
                absolute: true,
                steps,
            }
        }),
        map(preceded(char('/'), opt(preceded(ws, relative_steps))), |steps| LocationPath {
            absolute: true,
            steps: steps.unwrap_or_default(),
        }),
        map(relative_steps, |steps| LocationPath {
            absolute: false,
            steps,
        }),
    ))(input)
}

/// `/` contributes nothing, `//` contributes a descendant-or-self step.
fn separator(input: &str) -> IResult<&str, Vec<Step>> {
    alt((
        value(vec![Step::descendant_or_self()], tag("//")),
        value(Vec::new(), char('/')),
    ))(input)
}

fn relative_steps(input: &str) -> IResult<&str, Vec<Step>> {
    let (mut input, first) = step(input)?;
    let mut steps = vec![first];
    loop {
        let attempt = tuple((ws, separator, ws, step))(input);
        match attempt {
            Ok((rest, (_, mut sep, _, next))) => {
                steps.append(&mut sep);
                steps.push(next);
                input = rest;
            }
            Err(_) => return Ok((input, steps)),
        }
    }
}

fn step(input: &str) -> IResult<&str, Step> {
    alt((
        value(Step::new(Axis::Parent, NodeTest::Node), tag("..")),
        value(Step::new(Axis::SelfAxis, NodeTest::Node), char('.')),
        full_step,
    ))(input)
}

fn full_step(input: &str) -> IResult<&str, Step> {
    let (input, axis) = opt(terminated(axis_spec, ws))(input)?;
    let (input, test) = node_test(input)?;
    let (input, predicates) = many0(preceded(ws, predicate))(input)?;
    Ok((
        input,
        Step {
            axis: axis.unwrap_or(Axis::Child),
            test,
            predicates,
        },
    ))
}

fn axis_spec(input: &str) -> IResult<&str, Axis> {
    alt((
        value(Axis::Attribute, char('@')),
        terminated(axis_name, pair(ws, tag("::"))),
    ))(input)
}

fn axis_name(input: &str) -> IResult<&str, Axis> {
    alt((
        value(Axis::AncestorOrSelf, tag("ancestor-or-self")),
        value(Axis::Ancestor, tag("ancestor")),
        value(Axis::Attribute, tag("attribute")),
        value(Axis::Child, tag("child")),
        value(Axis::DescendantOrSelf, tag("descendant-or-self")),
        value(Axis::Descendant, tag("descendant")),
        value(Axis::FollowingSibling, tag("following-sibling")),
        value(Axis::Following, tag("following")),
        value(Axis::Parent, tag("parent")),
        value(Axis::PrecedingSibling, tag("preceding-sibling")),
        value(Axis::Preceding, tag("preceding")),
        value(Axis::SelfAxis, tag("self")),
    ))(input)
}

fn node_test(input: &str) -> IResult<&str, NodeTest> {
    alt((
        node_type_test,
        value(NodeTest::Any, char('*')),
        map(terminated(ncname, tag(":*")), |p: &str| NodeTest::Prefix(p.to_string())),
        map(qname, |n: &str| NodeTest::Name(n.to_string())),
    ))(input)
}

fn node_type_test(input: &str) -> IResult<&str, NodeTest> {
    alt((
        value(NodeTest::Node, terminated(tag("node"), empty_parens)),
        value(NodeTest::Text, terminated(tag("text"), empty_parens)),
        value(NodeTest::Comment, terminated(tag("comment"), empty_parens)),
        map(
            preceded(
                tag("processing-instruction"),
                delimited(
                    pair(ws, char('(')),
                    opt(delimited(ws, literal, ws)),
                    pair(ws, char(')')),
                ),
            ),
            NodeTest::Pi,
        ),
    ))(input)
}

fn empty_parens(input: &str) -> IResult<&str, char> {
    preceded(tuple((ws, char('('), ws)), char(')'))(input)
}

fn predicate(input: &str) -> IResult<&str, Expr> {
    delimited(pair(char('['), ws), expr, pair(ws, char(']')))(input)
}

// ============================================================================
// Primary expressions
// ============================================================================

fn primary_expr(input: &str) -> IResult<&str, Expr> {
    alt((
        map(preceded(char('$'), qname), |n: &str| Expr::Var(n.to_string())),
        delimited(pair(char('('), ws), expr, pair(ws, char(')'))),
        map(literal, Expr::Literal),
        map(number, Expr::Number),
        function_call,
    ))(input)
}

fn function_call(input: &str) -> IResult<&str, Expr> {
    let (rest, name) = qname(input)?;
    if matches!(name, "node" | "text" | "comment" | "processing-instruction") {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Tag,
        )));
    }
    let (rest, args) = delimited(
        pair(ws, char('(')),
        separated_list0(char(','), delimited(ws, expr, ws)),
        char(')'),
    )(rest)?;
    Ok((rest, Expr::Call(name.to_string(), args)))
}

fn literal(input: &str) -> IResult<&str, String> {
    map(
        alt((
            delimited(char('"'), take_while(|c| c != '"'), char('"')),
            delimited(char('\''), take_while(|c| c != '\''), char('\'')),
        )),
        str::to_string,
    )(input)
}

fn number(input: &str) -> IResult<&str, f64> {
    let (rest, text) = alt((
        recognize(pair(digit1, opt(pair(char('.'), digit0)))),
        recognize(pair(char('.'), digit1)),
    ))(input)?;
    match text.parse::<f64>() {
        Ok(n) => Ok((rest, n)),
        Err(_) => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Float,
        ))),
    }
}

// ============================================================================
// Names and whitespace
// ============================================================================

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn ncname(input: &str) -> IResult<&str, &str> {
    recognize(pair(take_while1(is_name_start), take_while(is_name_char)))(input)
}

fn qname(input: &str) -> IResult<&str, &str> {
    recognize(pair(ncname, opt(pair(char(':'), ncname))))(input)
}

/// Optional whitespace
fn ws(input: &str) -> IResult<&str, &str> {
    multispace0(input)
}
