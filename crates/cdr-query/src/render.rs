//! SQL rendering for [`Query`] objects.
//!
//! Clause order is fixed: SELECT [DISTINCT] [TOP n] columns, INTO, FROM,
//! JOINs in insertion order, WHERE, GROUP BY, HAVING, UNIONs, ORDER BY.
//! Keywords are right-aligned in a column wide enough for the longest
//! keyword the query uses, and nested queries are indented four spaces.

use crate::connection::Dialect;
use crate::query::{is_list_test, Clause, Condition, Join, Operand, Or, OrArm, Query, Table};
use crate::value::Value;

/// Placeholder marker for bound parameters.
pub const PLACEHOLDER: &str = "?";

/// SQL text and the parameters matching its placeholders, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    /// Dialect the SQL was rendered for.
    pub dialect: Dialect,
    /// SQL statement.
    pub sql: String,
    /// Parameters in placeholder order.
    pub params: Vec<Value>,
}

/// Indents every line of `block` by `n` spaces, keeping a trailing newline.
pub fn indent(block: &str, n: usize) -> String {
    let padding = " ".repeat(n);
    let end = if block.ends_with('\n') { "\n" } else { "" };
    let lines: Vec<String> = block
        .lines()
        .map(|line| format!("{}{}", padding, line))
        .collect();
    format!("{}{}", lines.join("\n"), end)
}

pub(crate) fn render(query: &Query, dialect: Dialect) -> Rendered {
    let mut renderer = Renderer::new(query, dialect);
    renderer.query(query);
    Rendered {
        dialect,
        sql: renderer.lines.join("\n"),
        params: renderer.params,
    }
}

struct Renderer {
    dialect: Dialect,
    width: usize,
    lines: Vec<String>,
    params: Vec<Value>,
}

impl Renderer {
    fn new(query: &Query, dialect: Dialect) -> Self {
        let mut width = select_keyword(query, dialect).len();
        for (used, keyword) in [
            (!query.order.is_empty(), "ORDER BY"),
            (query.outer, "LEFT OUTER JOIN"),
            (!query.group.is_empty(), "GROUP BY"),
        ] {
            if used {
                width = width.max(keyword.len());
            }
        }
        Self {
            dialect,
            width,
            lines: Vec::new(),
            params: Vec::new(),
        }
    }

    fn align(&self, keyword: &str, rest: &str) -> String {
        let padded = format!("{}{}", " ".repeat(self.width), keyword);
        let tail = &padded[padded.len() - self.width..];
        format!("{} {}", tail, rest)
    }

    fn query(&mut self, query: &Query) {
        let select = select_keyword(query, self.dialect);
        if let Some(target) = &query.into {
            if self.dialect == Dialect::Sqlite {
                self.lines.push(format!("CREATE TABLE {} AS", target));
            }
        }
        let line = self.align(&select, &query.columns.join(", "));
        self.lines.push(line);

        if let Some(target) = &query.into {
            if self.dialect == Dialect::SqlServer {
                let line = self.align("INTO", target);
                self.lines.push(line);
            }
        }

        self.table("FROM", &query.table);

        for join in &query.joins {
            self.join(join);
        }

        let mut keyword = "WHERE";
        for condition in &query.wheres {
            self.clause(keyword, condition, "", "");
            keyword = "AND";
        }

        if !query.group.is_empty() {
            let line = self.align("GROUP BY", &query.group.join(", "));
            self.lines.push(line);
        }

        let mut keyword = "HAVING";
        for condition in &query.having {
            self.clause(keyword, condition, "", "");
            keyword = "AND";
        }

        for union in &query.unions {
            let line = self.align("UNION", "");
            self.lines.push(line);
            let nested = union.render_for(self.dialect);
            self.lines.push(nested.sql.clone());
            self.params.extend(nested.params.iter().cloned());
        }

        if !query.order.is_empty() {
            let line = self.align("ORDER BY", &query.order.join(", "));
            self.lines.push(line);
        }

        if let (Some(limit), Dialect::Sqlite) = (query.limit, self.dialect) {
            let line = self.align("LIMIT", &limit.to_string());
            self.lines.push(line);
        }
    }

    fn table(&mut self, keyword: &str, table: &Table) {
        match table {
            Table::Named(name) => {
                let line = self.align(keyword, name);
                self.lines.push(line);
            }
            Table::Nested(nested) => {
                let nested = nested.query();
                let alias = nested.alias_name().unwrap_or_default();
                let inner = nested.render_for(self.dialect);
                let line = self.align(keyword, "(");
                self.lines.push(line);
                self.lines.push(indent(&format!("{}) {}", inner.sql, alias), 4));
            }
        }
    }

    fn join(&mut self, join: &Join) {
        let keyword = if join.outer { "LEFT OUTER JOIN" } else { "JOIN" };
        self.table(keyword, &join.table);
        let mut keyword = "ON";
        for condition in &join.conditions {
            self.clause(keyword, condition, "", "");
            keyword = "AND";
        }
    }

    fn clause(&mut self, keyword: &str, clause: &Clause, prefix: &str, suffix: &str) {
        match clause {
            Clause::Any(or) => self.or_set(keyword, or, prefix, suffix),
            Clause::Sql(sql) => {
                let line = self.align(keyword, &format!("{}{}{}", prefix, sql, suffix));
                self.lines.push(line);
            }
            Clause::Test(condition) => self.condition(keyword, condition, prefix, suffix),
        }
    }

    /// Wraps the alternatives in one pair of parentheses: the first clause
    /// rendered carries the opening parenthesis, the last the closing one.
    fn or_set(&mut self, keyword: &str, or: &Or, prefix: &str, suffix: &str) {
        if or.arms.is_empty() {
            let line = self.align(keyword, &format!("{}(1 = 0){}", prefix, suffix));
            self.lines.push(line);
            return;
        }
        let mut keyword = keyword.to_string();
        let mut open = format!("({}", prefix);
        let mut close = String::new();
        let last_arm = or.arms.len() - 1;
        for (i, arm) in or.arms.iter().enumerate() {
            match arm {
                OrArm::All(group) => {
                    for (j, clause) in group.iter().enumerate() {
                        if i == last_arm && j == group.len() - 1 {
                            close = format!("{})", suffix);
                        }
                        self.clause(&keyword, clause, &open, &close);
                        keyword = "AND".to_string();
                        open.clear();
                    }
                }
                OrArm::One(clause) => {
                    if i == last_arm {
                        close = format!("{})", suffix);
                    }
                    self.clause(&keyword, clause, &open, &close);
                }
            }
            keyword = "OR".to_string();
            open.clear();
        }
    }

    fn condition(&mut self, keyword: &str, condition: &Condition, prefix: &str, suffix: &str) {
        let test = format!("{}{} {}", prefix, condition.column, condition.test);
        match &condition.value {
            Operand::Query(nested) => {
                let inner = nested.render_for(self.dialect);
                let alias = nested
                    .alias_name()
                    .map(|a| format!(" {}", a))
                    .unwrap_or_default();
                let line = self.align(keyword, &format!("{} (", test));
                self.lines.push(line);
                self.lines
                    .push(indent(&format!("{}){}{}", inner.sql, alias, suffix), 4));
                self.params.extend(inner.params.iter().cloned());
            }
            Operand::List(values) => {
                let placeholders = vec![PLACEHOLDER; values.len()].join(", ");
                let line = self.align(keyword, &format!("{} ({}){}", test, placeholders, suffix));
                self.lines.push(line);
                self.params.extend(values.iter().cloned());
            }
            Operand::Value(value) => {
                let rest = if is_list_test(&condition.test) {
                    format!("{} ({}){}", test, PLACEHOLDER, suffix)
                } else {
                    format!("{} {}{}", test, PLACEHOLDER, suffix)
                };
                let line = self.align(keyword, &rest);
                self.lines.push(line);
                self.params.push(value.clone());
            }
        }
    }
}

fn select_keyword(query: &Query, dialect: Dialect) -> String {
    let mut select = String::from("SELECT");
    if query.unique {
        select.push_str(" DISTINCT");
    }
    if let (Some(limit), Dialect::SqlServer) = (query.limit, dialect) {
        select.push_str(&format!(" TOP {}", limit));
    }
    select
}
