//! SQL compiler.
//!
//! Turns a [`Query`] into SQL text plus the ordered argument list for it.
//! Every placeholder is produced by [`Params::bind`], which pushes the value
//! and returns the placeholder for that position, so text and arguments can
//! never drift apart.

use std::str::FromStr;

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{is_not, take_while},
    character::complete::char,
    combinator::{map, recognize, value},
    multi::many0,
    sequence::delimited,
};
use serde::{Deserialize, Serialize};

use crate::changes::Changes;
use crate::error::Error;
use crate::filter::{Filter, FilterKind};
use crate::query::{JoinClause, Query, SortOrder};
use crate::value::Value;

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Bare identifiers and `?` placeholders.
    #[default]
    Generic,
    MySql,
    Postgres,
    Sqlite,
}

impl Dialect {
    /// Guess the dialect from a connection URL scheme.
    pub fn from_url(url: &str) -> Option<Dialect> {
        let scheme = url.split(':').next()?;
        match scheme {
            "postgres" | "postgresql" => Some(Dialect::Postgres),
            "mysql" | "mariadb" => Some(Dialect::MySql),
            "sqlite" => Some(Dialect::Sqlite),
            _ => None,
        }
    }

    /// Placeholder for the 1-based parameter `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", index),
            _ => "?".to_string(),
        }
    }

    fn quote_identifier(&self, name: &str) -> String {
        match self {
            Dialect::Generic => name.to_string(),
            Dialect::MySql => format!("`{}`", name.replace('`', "``")),
            Dialect::Postgres | Dialect::Sqlite => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }

    /// Quote a column or table reference.
    ///
    /// `table.column` is quoted per part and `*` is left alone. Anything that
    /// is not a plain identifier (`COUNT(id)`, `name AS n`) passes through.
    pub fn quote(&self, name: &str) -> String {
        let plain = |part: &str| {
            !part.is_empty() && part.chars().all(|c| c.is_alphanumeric() || c == '_')
        };
        if !name.split('.').all(|part| part == "*" || plain(part)) {
            return name.to_string();
        }

        name.split('.')
            .map(|part| {
                if part == "*" {
                    part.to_string()
                } else {
                    self.quote_identifier(part)
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// LIMIT standing in for "no limit", for dialects that reject a bare OFFSET.
    fn unbounded_limit(&self) -> Option<&'static str> {
        match self {
            Dialect::Sqlite => Some(" LIMIT -1"),
            Dialect::Generic | Dialect::MySql => Some(" LIMIT 18446744073709551615"),
            Dialect::Postgres => None,
        }
    }

    fn empty_insert(&self) -> &'static str {
        match self {
            Dialect::Postgres | Dialect::Sqlite => " DEFAULT VALUES",
            Dialect::Generic | Dialect::MySql => " () VALUES ()",
        }
    }
}

impl FromStr for Dialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "generic" => Ok(Dialect::Generic),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "sqlite" => Ok(Dialect::Sqlite),
            other => Err(Error::Config(format!("unknown dialect '{}'", other))),
        }
    }
}

/// Statement kind to compile.
#[derive(Debug, Clone, Copy)]
pub enum Statement<'a> {
    Select,
    Insert(&'a Changes),
    Update(&'a Changes),
    Delete,
}

impl Statement<'_> {
    /// Reject statements that cannot render valid SQL. An UPDATE needs at
    /// least one change.
    pub fn check(&self) -> Result<(), Error> {
        match self {
            Statement::Update(changes) if changes.is_empty() => Err(Error::validation(
                "update requires at least one change",
                "changes",
            )),
            _ => Ok(()),
        }
    }
}

/// Compiled SQL text and its positional arguments.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Compiled {
    pub sql: String,
    pub args: Vec<Value>,
}

/// Argument accumulator for one statement.
struct Params {
    dialect: Dialect,
    args: Vec<Value>,
}

impl Params {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            args: Vec::new(),
        }
    }

    /// Add a value and return the placeholder for it.
    fn bind(&mut self, value: Value) -> String {
        self.args.push(value);
        self.dialect.placeholder(self.args.len())
    }

    /// Copy raw SQL, binding one of `values` at each `?` outside quotes.
    ///
    /// The number of `?` marks must equal the number of values. On a mismatch
    /// debug builds panic. Release builds bind NULL for each missing value
    /// and drop surplus values, so every placeholder still lines up with its
    /// argument.
    fn raw(&mut self, expr: &str, values: &[Value]) -> String {
        let (rest, pieces) = match raw_pieces(expr) {
            Ok(parsed) => parsed,
            Err(_) => (expr, Vec::new()),
        };

        let marks = pieces.iter().filter(|p| **p == Piece::Placeholder).count();
        if marks != values.len() {
            tracing::warn!(
                "fragment `{}` has {} placeholders but {} values",
                expr,
                marks,
                values.len()
            );
        }
        debug_assert_eq!(
            marks,
            values.len(),
            "fragment placeholder count does not match its values"
        );

        let mut values = values.iter();
        let mut sql = String::with_capacity(expr.len());
        for piece in pieces {
            match piece {
                Piece::Text(text) => sql.push_str(text),
                Piece::Placeholder => {
                    let value = values.next().cloned().unwrap_or(Value::Null);
                    sql.push_str(&self.bind(value));
                }
            }
        }
        sql.push_str(rest);
        sql
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Piece<'a> {
    Text(&'a str),
    Placeholder,
}

/// Split raw SQL into quoted literals, `?` placeholders and other text.
fn raw_pieces(input: &str) -> IResult<&str, Vec<Piece<'_>>> {
    many0(alt((
        map(
            recognize(delimited(char('\''), take_while(|c| c != '\''), char('\''))),
            Piece::Text,
        ),
        value(Piece::Placeholder, char('?')),
        map(is_not("'?"), Piece::Text),
    )))(input)
}

/// Compiles queries for one dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct Builder {
    dialect: Dialect,
}

impl Builder {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Compile `query` as the given statement kind.
    pub fn compile(&self, query: &Query, statement: Statement<'_>) -> Compiled {
        match statement {
            Statement::Select => self.find(query),
            Statement::Insert(changes) => self.insert(&query.collection, changes),
            Statement::Update(changes) => self.update(query, changes),
            Statement::Delete => self.delete(query),
        }
    }

    /// Generate SELECT SQL.
    pub fn find(&self, query: &Query) -> Compiled {
        let mut params = Params::new(self.dialect);
        let mut sql = String::from("SELECT ");

        if query.select.distinct {
            sql.push_str("DISTINCT ");
        }

        if query.select.fields.is_empty() {
            sql.push('*');
        } else {
            let fields: Vec<String> = query.select.fields.iter().map(|f| self.dialect.quote(f)).collect();
            sql.push_str(&fields.join(", "));
        }

        sql.push_str(" FROM ");
        sql.push_str(&self.dialect.quote(&query.collection));

        for join in &query.joins {
            sql.push(' ');
            sql.push_str(&self.join(join, &query.collection, &mut params));
        }

        if let Some(condition) = self.condition(&query.filter, &mut params) {
            sql.push_str(" WHERE ");
            sql.push_str(&condition);
        }

        if !query.group.fields.is_empty() {
            let fields: Vec<String> = query.group.fields.iter().map(|f| self.dialect.quote(f)).collect();
            sql.push_str(" GROUP BY ");
            sql.push_str(&fields.join(", "));

            if let Some(having) = self.condition(&query.group.having, &mut params) {
                sql.push_str(" HAVING ");
                sql.push_str(&having);
            }
        }

        if !query.sorts.is_empty() {
            let sorts: Vec<String> = query
                .sorts
                .iter()
                .map(|s| {
                    let dir = match s.order {
                        SortOrder::Asc => "ASC",
                        SortOrder::Desc => "DESC",
                    };
                    format!("{} {}", self.dialect.quote(&s.field), dir)
                })
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&sorts.join(", "));
        }

        if query.limit > 0 {
            sql.push_str(&format!(" LIMIT {}", query.limit));
        } else if query.offset > 0 {
            if let Some(unbounded) = self.dialect.unbounded_limit() {
                sql.push_str(unbounded);
            }
        }

        if query.offset > 0 {
            sql.push_str(&format!(" OFFSET {}", query.offset));
        }

        if !query.lock.is_empty() {
            sql.push(' ');
            sql.push_str(&query.lock);
        }

        Compiled {
            sql,
            args: params.args,
        }
    }

    /// Generate INSERT SQL. Arguments follow field declaration order.
    pub fn insert(&self, collection: &str, changes: &Changes) -> Compiled {
        let mut params = Params::new(self.dialect);
        let mut sql = String::from("INSERT INTO ");
        sql.push_str(&self.dialect.quote(collection));

        if changes.is_empty() {
            sql.push_str(self.dialect.empty_insert());
        } else {
            let fields: Vec<String> = changes.fields().map(|f| self.dialect.quote(f)).collect();
            let placeholders: Vec<String> = changes.values().map(|v| params.bind(v.clone())).collect();
            sql.push_str(&format!(" ({}) VALUES ({})", fields.join(", "), placeholders.join(", ")));
        }

        Compiled {
            sql,
            args: params.args,
        }
    }

    /// Generate UPDATE SQL. Change values come first, then filter values.
    ///
    /// Empty `changes` render an empty SET; see [`Statement::check`].
    pub fn update(&self, query: &Query, changes: &Changes) -> Compiled {
        let mut params = Params::new(self.dialect);
        let mut sql = String::from("UPDATE ");
        sql.push_str(&self.dialect.quote(&query.collection));

        let sets: Vec<String> = changes
            .iter()
            .map(|(field, v)| format!("{} = {}", self.dialect.quote(field), params.bind(v.clone())))
            .collect();
        sql.push_str(" SET ");
        sql.push_str(&sets.join(", "));

        if let Some(condition) = self.condition(&query.filter, &mut params) {
            sql.push_str(" WHERE ");
            sql.push_str(&condition);
        }

        Compiled {
            sql,
            args: params.args,
        }
    }

    /// Generate DELETE SQL.
    pub fn delete(&self, query: &Query) -> Compiled {
        let mut params = Params::new(self.dialect);
        let mut sql = String::from("DELETE FROM ");
        sql.push_str(&self.dialect.quote(&query.collection));

        if let Some(condition) = self.condition(&query.filter, &mut params) {
            sql.push_str(" WHERE ");
            sql.push_str(&condition);
        }

        Compiled {
            sql,
            args: params.args,
        }
    }

    /// Render one join. Implicit columns resolve against `collection`, so a
    /// query built by chaining compiles the same as one built by `compose`.
    fn join(&self, join: &JoinClause, collection: &str, params: &mut Params) -> String {
        match join.clone().resolve(collection) {
            JoinClause::On {
                mode,
                collection,
                from,
                to,
            } => format!(
                "{} {} ON {} = {}",
                mode,
                self.dialect.quote(&collection),
                self.dialect.quote(&from),
                self.dialect.quote(&to)
            ),
            JoinClause::Fragment { expr, args } => params.raw(&expr, &args),
        }
    }

    /// Render a filter, or `None` when it constrains nothing.
    fn condition(&self, filter: &Filter, params: &mut Params) -> Option<String> {
        let field = || self.dialect.quote(filter.field());

        let sql = match filter.kind() {
            FilterKind::And | FilterKind::Or | FilterKind::Not => {
                let parts: Vec<String> = filter
                    .children()
                    .iter()
                    .filter_map(|child| self.condition(child, params))
                    .collect();
                if parts.is_empty() {
                    return None;
                }

                match filter.kind() {
                    FilterKind::Not => format!("NOT ({})", parts.join(" AND ")),
                    _ if parts.len() == 1 => parts.join(""),
                    FilterKind::Or => format!("({})", parts.join(" OR ")),
                    _ => format!("({})", parts.join(" AND ")),
                }
            }
            FilterKind::Eq => self.binary(&field(), "=", filter, params),
            FilterKind::Ne => self.binary(&field(), "!=", filter, params),
            FilterKind::Lt => self.binary(&field(), "<", filter, params),
            FilterKind::Lte => self.binary(&field(), "<=", filter, params),
            FilterKind::Gt => self.binary(&field(), ">", filter, params),
            FilterKind::Gte => self.binary(&field(), ">=", filter, params),
            FilterKind::Like => self.binary(&field(), "LIKE", filter, params),
            FilterKind::NotLike => self.binary(&field(), "NOT LIKE", filter, params),
            FilterKind::Nil => format!("{} IS NULL", field()),
            FilterKind::NotNil => format!("{} IS NOT NULL", field()),
            FilterKind::In | FilterKind::Nin => {
                // An empty list matches nothing (IN) or everything (NOT IN).
                if filter.values().is_empty() {
                    return Some(if filter.kind() == FilterKind::In { "1=0" } else { "1=1" }.to_string());
                }
                let op = if filter.kind() == FilterKind::In { "IN" } else { "NOT IN" };
                let placeholders: Vec<String> = filter.values().iter().map(|v| params.bind(v.clone())).collect();
                format!("{} {} ({})", field(), op, placeholders.join(", "))
            }
            FilterKind::Fragment => params.raw(filter.field(), filter.values()),
        };

        Some(sql)
    }

    fn binary(&self, field: &str, op: &str, filter: &Filter, params: &mut Params) -> String {
        let value = filter.values().first().cloned().unwrap_or(Value::Null);
        format!("{} {} {}", field, op, params.bind(value))
    }
}
