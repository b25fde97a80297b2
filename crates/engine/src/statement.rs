#![forbid(unsafe_code)]

//! Classification of one SQL statement before it reaches SQLite.
//!
//! The statement is parsed with `sqlparser` to find the tables it touches, whether it
//! mutates, and which column/literal comparisons it makes. SQLite accepts a few
//! spellings `sqlparser` does not; for those the text is scanned token by token and
//! SQLite's own parser gets the final word on syntax.

use crate::error::{EngineError, Rejection};
use sqlparser::ast::{
    BinaryOperator, Expr, ObjectName, Query, SelectItem, SetExpr, Statement, TableFactor,
    UnaryOperator, Value as SqlValue, Visit, Visitor,
};
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use std::collections::BTreeSet;
use std::ops::ControlFlow;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatementKind {
    Query,
    Insert,
    Update,
    Delete,
}

impl StatementKind {
    pub fn is_mutating(self) -> bool {
        !matches!(self, Self::Query)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Query => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

/// Literal side of a comparison.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Number(String),
    Text(String),
    Boolean(bool),
}

/// `column <op> literal`, as written in the statement.
#[derive(Clone, Debug, PartialEq)]
pub struct Comparison {
    pub qualifier: Option<String>,
    pub column: String,
    pub literal: Literal,
    pub fragment: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Analysis {
    pub kind: StatementKind,
    /// Catalog tables referenced, lowercase, in order of first appearance.
    pub tables: Vec<String>,
    /// Table written by INSERT/UPDATE/DELETE.
    pub target: Option<String>,
    pub has_where: bool,
    pub comparisons: Vec<Comparison>,
}

pub fn analyze(sql: &str) -> Result<Analysis, EngineError> {
    match Parser::parse_sql(&SQLiteDialect {}, sql) {
        Ok(statements) => match statements.as_slice() {
            [] => Err(EngineError::Parse("empty statement".to_string())),
            [statement] => from_ast(statement, sql),
            _ => Err(EngineError::rejected(Rejection::MultipleStatements)),
        },
        Err(err) => {
            debug!(error = %err, "sqlparser rejected statement; scanning tokens instead");
            from_tokens(sql)
        }
    }
}

fn from_ast(statement: &Statement, sql: &str) -> Result<Analysis, EngineError> {
    let (kind, has_where) = match statement {
        Statement::Query(query) => {
            query_kind(query, sql)?;
            (StatementKind::Query, false)
        }
        Statement::Insert(_) => (StatementKind::Insert, false),
        Statement::Update { selection, .. } => (StatementKind::Update, selection.is_some()),
        Statement::Delete(delete) => (StatementKind::Delete, delete.selection.is_some()),
        _ => {
            return Err(EngineError::rejected(Rejection::UnsupportedStatement(
                leading_keyword(sql),
            )));
        }
    };

    let mut collector = Collector::default();
    let _ = statement.visit(&mut collector);

    let target = if kind.is_mutating() {
        collector.relations.first().cloned()
    } else {
        None
    };
    let Collector {
        relations,
        ctes,
        derived,
        output_aliases,
        comparisons,
    } = collector;
    let tables = relations
        .into_iter()
        .filter(|name| !ctes.contains(name))
        .fold(Vec::new(), |mut tables, name| {
            if !tables.contains(&name) {
                tables.push(name);
            }
            tables
        });
    // Columns of CTEs and derived tables have no declared type to check against.
    let comparisons = comparisons
        .into_iter()
        .filter(|comparison| match &comparison.qualifier {
            Some(qualifier) => !ctes.contains(qualifier) && !derived.contains(qualifier),
            None => !output_aliases.contains(&comparison.column.to_ascii_lowercase()),
        })
        .collect();

    Ok(Analysis {
        kind,
        tables,
        target,
        has_where,
        comparisons,
    })
}

/// `WITH ... INSERT` and friends parse as queries; only plain queries are read-only.
fn query_kind(query: &Query, sql: &str) -> Result<(), EngineError> {
    match query.body.as_ref() {
        SetExpr::Select(_) | SetExpr::Query(_) | SetExpr::SetOperation { .. } | SetExpr::Values(_) => {
            Ok(())
        }
        _ => Err(EngineError::rejected(Rejection::UnsupportedStatement(
            leading_keyword(sql),
        ))),
    }
}

#[derive(Default)]
struct Collector {
    relations: Vec<String>,
    ctes: BTreeSet<String>,
    /// Aliases of subqueries in FROM.
    derived: BTreeSet<String>,
    /// `expr AS name` labels of every SELECT list, nested ones included.
    output_aliases: BTreeSet<String>,
    comparisons: Vec<Comparison>,
}

impl Visitor for Collector {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<()> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.ctes.insert(cte.alias.name.value.to_ascii_lowercase());
            }
        }
        collect_output_aliases(&query.body, &mut self.output_aliases);
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<()> {
        if let TableFactor::Derived {
            alias: Some(alias), ..
        } = factor
        {
            self.derived.insert(alias.name.value.to_ascii_lowercase());
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<()> {
        if let Some(last) = relation.0.last() {
            let name = last.value.to_ascii_lowercase();
            if !is_builtin_relation(&name) {
                self.relations.push(name);
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<()> {
        if let Expr::BinaryOp { left, op, right } = expr
            && is_comparison(op)
        {
            let found = comparison(left, right).or_else(|| comparison(right, left));
            if let Some((qualifier, column, literal)) = found {
                self.comparisons.push(Comparison {
                    qualifier,
                    column,
                    literal,
                    fragment: expr.to_string(),
                });
            }
        }
        ControlFlow::Continue(())
    }
}

fn collect_output_aliases(body: &SetExpr, aliases: &mut BTreeSet<String>) {
    match body {
        SetExpr::Select(select) => {
            for item in &select.projection {
                if let SelectItem::ExprWithAlias { alias, .. } = item {
                    aliases.insert(alias.value.to_ascii_lowercase());
                }
            }
        }
        SetExpr::Query(query) => collect_output_aliases(&query.body, aliases),
        SetExpr::SetOperation { left, right, .. } => {
            collect_output_aliases(left, aliases);
            collect_output_aliases(right, aliases);
        }
        _ => {}
    }
}

fn is_comparison(op: &BinaryOperator) -> bool {
    matches!(
        op,
        BinaryOperator::Eq
            | BinaryOperator::NotEq
            | BinaryOperator::Lt
            | BinaryOperator::LtEq
            | BinaryOperator::Gt
            | BinaryOperator::GtEq
    )
}

fn comparison(column: &Expr, literal: &Expr) -> Option<(Option<String>, String, Literal)> {
    let (qualifier, name) = column_ref(column)?;
    Some((qualifier, name, literal_value(literal)?))
}

fn column_ref(expr: &Expr) -> Option<(Option<String>, String)> {
    match expr {
        Expr::Identifier(ident) => Some((None, ident.value.clone())),
        Expr::CompoundIdentifier(parts) => match parts.as_slice() {
            [.., table, column] => Some((Some(table.value.to_ascii_lowercase()), column.value.clone())),
            [column] => Some((None, column.value.clone())),
            [] => None,
        },
        Expr::Nested(inner) => column_ref(inner),
        _ => None,
    }
}

fn literal_value(expr: &Expr) -> Option<Literal> {
    match expr {
        Expr::Value(SqlValue::Number(number, _)) => Some(Literal::Number(number.clone())),
        Expr::Value(SqlValue::SingleQuotedString(text)) => Some(Literal::Text(text.clone())),
        Expr::Value(SqlValue::Boolean(flag)) => Some(Literal::Boolean(*flag)),
        Expr::UnaryOp {
            op: UnaryOperator::Minus | UnaryOperator::Plus,
            expr,
        } => match literal_value(expr)? {
            Literal::Number(number) => Some(Literal::Number(number)),
            _ => None,
        },
        Expr::Nested(inner) => literal_value(inner),
        _ => None,
    }
}

/// Table-valued functions and schema tables SQLite provides itself.
fn is_builtin_relation(name: &str) -> bool {
    matches!(
        name,
        "json_each"
            | "json_tree"
            | "generate_series"
            | "sqlite_master"
            | "sqlite_schema"
            | "sqlite_temp_master"
            | "sqlite_temp_schema"
            | "sqlite_sequence"
    ) || name.starts_with("pragma_")
}

const REJECTED_KEYWORDS: &[&str] = &[
    "ALTER", "ANALYZE", "ATTACH", "BEGIN", "COMMIT", "CREATE", "DETACH", "DROP", "END", "PRAGMA",
    "REINDEX", "RELEASE", "ROLLBACK", "SAVEPOINT", "VACUUM",
];

/// Verbs that can follow a `WITH` clause.
const BODY_VERBS: &[&str] = &["SELECT", "VALUES", "INSERT", "REPLACE", "UPDATE", "DELETE"];

/// Ends a FROM list at its own nesting level.
const FROM_LIST_END: &[&str] = &[
    "WHERE", "GROUP", "HAVING", "WINDOW", "ORDER", "LIMIT", "OFFSET", "UNION", "EXCEPT",
    "INTERSECT", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "NATURAL", "ON", "USING",
    "RETURNING", "SELECT", "VALUES", "SET",
];

fn from_tokens(sql: &str) -> Result<Analysis, EngineError> {
    let tokens = tokenize(sql);
    let (first, verb) = statement_verbs(&tokens);

    let kind = match verb.as_str() {
        "INSERT" | "REPLACE" | "UPDATE" | "DELETE" if first == "WITH" => {
            return Err(EngineError::rejected(Rejection::UnsupportedStatement(
                format!("WITH ... {verb}"),
            )));
        }
        "INSERT" | "REPLACE" => StatementKind::Insert,
        "UPDATE" => StatementKind::Update,
        "DELETE" => StatementKind::Delete,
        word if REJECTED_KEYWORDS.contains(&word) => {
            return Err(EngineError::rejected(Rejection::UnsupportedStatement(verb)));
        }
        // Anything else goes to SQLite, which reports the syntax error.
        _ => StatementKind::Query,
    };

    let mut ctes = BTreeSet::new();
    let mut relations = Vec::new();
    let mut has_where = false;
    for (index, token) in tokens.iter().enumerate() {
        let Some(word) = token.word() else {
            continue;
        };
        let upper = word.to_ascii_uppercase();
        match upper.as_str() {
            "WHERE" => has_where = true,
            "FROM" => relations.extend(from_list(&tokens, index + 1)),
            "JOIN" | "INTO" | "UPDATE" => {
                if let Some(name) = relation_after(&tokens, index + 1) {
                    relations.push(name);
                }
            }
            _ => {
                let next = tokens.get(index + 1).and_then(Token::word);
                let after = tokens.get(index + 2);
                if next.is_some_and(|next| next.eq_ignore_ascii_case("AS"))
                    && matches!(after, Some(Token::Punct('(')))
                {
                    ctes.insert(word.to_ascii_lowercase());
                }
            }
        }
    }

    let target = if kind.is_mutating() {
        relations.first().cloned()
    } else {
        None
    };
    let mut tables = Vec::new();
    for name in relations {
        if !ctes.contains(&name) && !is_builtin_relation(&name) && !tables.contains(&name) {
            tables.push(name);
        }
    }
    Ok(Analysis {
        kind,
        tables,
        target,
        has_where,
        comparisons: Vec::new(),
    })
}

/// Leading keyword and body verb. They differ only for `WITH ...` statements, whose verb is
/// the first body keyword after the CTE list.
fn statement_verbs(tokens: &[Token]) -> (String, String) {
    let mut depth = 0usize;
    let mut first = None;
    for token in tokens {
        match token {
            Token::Punct('(') => depth += 1,
            Token::Punct(')') => depth = depth.saturating_sub(1),
            Token::Word(word) if depth == 0 => {
                let upper = word.to_ascii_uppercase();
                match first {
                    None if upper == "WITH" => first = Some(upper),
                    None => return (upper.clone(), upper),
                    Some(_) if BODY_VERBS.contains(&upper.as_str()) => {
                        return ("WITH".to_string(), upper);
                    }
                    Some(_) => {}
                }
            }
            _ => {}
        }
    }
    let first = first.unwrap_or_default();
    (first.clone(), first)
}

/// Tables of a comma-separated FROM list starting at `start`; nested subqueries are
/// skipped here and picked up by their own FROM.
fn from_list(tokens: &[Token], start: usize) -> Vec<String> {
    let mut names = Vec::new();
    let mut depth = 0usize;
    let mut expect_item = true;
    for (index, token) in tokens.iter().enumerate().skip(start) {
        if expect_item && depth == 0 {
            expect_item = false;
            if let Some(name) = relation_after(tokens, index) {
                names.push(name);
            }
        }
        match token {
            Token::Punct('(') => depth += 1,
            Token::Punct(')') if depth == 0 => break,
            Token::Punct(')') => depth -= 1,
            _ if depth > 0 => {}
            Token::Punct(',') => expect_item = true,
            Token::Punct(';') => break,
            Token::Word(word) if FROM_LIST_END.contains(&word.to_ascii_uppercase().as_str()) => break,
            _ => {}
        }
    }
    names
}

/// Name following FROM/JOIN/INTO/UPDATE, skipping `OR <conflict>` and schema qualifiers.
fn relation_after(tokens: &[Token], mut index: usize) -> Option<String> {
    if tokens
        .get(index)
        .and_then(Token::word)
        .is_some_and(|word| word.eq_ignore_ascii_case("OR"))
    {
        index += 2;
    }
    let mut name = tokens.get(index)?.name()?;
    while matches!(tokens.get(index + 1), Some(Token::Punct('.'))) {
        index += 2;
        name = tokens.get(index)?.name()?;
    }
    let lower = name.to_ascii_lowercase();
    (!is_keyword(&lower)).then_some(lower)
}

fn is_keyword(word: &str) -> bool {
    matches!(word, "select" | "values" | "with" | "lateral" | "where")
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    Text,
    Punct(char),
}

impl Token {
    fn word(&self) -> Option<&str> {
        match self {
            Self::Word(word) => Some(word),
            _ => None,
        }
    }

    fn name(&self) -> Option<&str> {
        match self {
            Self::Word(word) | Self::Quoted(word) => Some(word),
            _ => None,
        }
    }
}

fn tokenize(sql: &str) -> Vec<Token> {
    let chars = sql.chars().collect::<Vec<_>>();
    let mut tokens = Vec::new();
    let mut i = 0;
    while let Some(&c) = chars.get(i) {
        match c {
            c if c.is_whitespace() => i += 1,
            '-' if chars.get(i + 1) == Some(&'-') => {
                while chars.get(i).is_some_and(|&c| c != '\n') {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
            }
            '\'' => {
                i = skip_quoted(&chars, i, '\'').0;
                tokens.push(Token::Text);
            }
            '"' | '`' => {
                let (next, text) = skip_quoted(&chars, i, c);
                i = next;
                tokens.push(Token::Quoted(text));
            }
            '[' => {
                let (next, text) = skip_quoted(&chars, i, ']');
                i = next;
                tokens.push(Token::Quoted(text));
            }
            c if c.is_alphanumeric() || c == '_' => {
                let start = i;
                while chars
                    .get(i)
                    .is_some_and(|&c| c.is_alphanumeric() || c == '_' || c == '$')
                {
                    i += 1;
                }
                tokens.push(Token::Word(chars[start..i].iter().collect()));
            }
            other => {
                tokens.push(Token::Punct(other));
                i += 1;
            }
        }
    }
    tokens
}

/// Returns the index after the closing quote and the unescaped contents.
fn skip_quoted(chars: &[char], start: usize, close: char) -> (usize, String) {
    let mut text = String::new();
    let mut i = start + 1;
    while let Some(&c) = chars.get(i) {
        if c == close {
            if close != ']' && chars.get(i + 1) == Some(&close) {
                text.push(c);
                i += 2;
                continue;
            }
            return (i + 1, text);
        }
        text.push(c);
        i += 1;
    }
    (i, text)
}

/// Statement keyword for messages: `DROP`, or `WITH ... UPDATE` for a CTE-prefixed body.
fn leading_keyword(sql: &str) -> String {
    let (first, verb) = statement_verbs(&tokenize(sql));
    if first == verb {
        first
    } else {
        format!("{first} ... {verb}")
    }
}
