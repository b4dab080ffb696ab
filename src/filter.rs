//! Boolean filter trees.
//!
//! A [`Filter`] is either a leaf testing one field (`id = ?`, `name IN (?, ?)`)
//! or a combinator (`AND`, `OR`, `NOT`) over child filters. Every operation
//! returns a new tree, so fragments built independently can be combined later.
//!
//! ```
//! use querent::filter::{eq, FilterKind};
//!
//! let f = eq("id", 1).and_ne("name", "foo").and_gt("score", 80);
//! assert_eq!(f.kind(), FilterKind::And);
//! assert_eq!(f.children().len(), 3);
//! ```

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Operator of a filter node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    #[default]
    And,
    Or,
    Not,
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    Nil,
    NotNil,
    In,
    Nin,
    Like,
    NotLike,
    Fragment,
}

impl FilterKind {
    /// True for `And`, `Or` and `Not`.
    pub fn is_combinator(&self) -> bool {
        matches!(self, FilterKind::And | FilterKind::Or | FilterKind::Not)
    }

    /// The operator with the opposite truth value, for operators that have one.
    pub fn negated(&self) -> Option<FilterKind> {
        use FilterKind::*;
        match self {
            Eq => Some(Ne),
            Ne => Some(Eq),
            Lt => Some(Gte),
            Gte => Some(Lt),
            Lte => Some(Gt),
            Gt => Some(Lte),
            Nil => Some(NotNil),
            NotNil => Some(Nil),
            In => Some(Nin),
            Nin => Some(In),
            Like => Some(NotLike),
            NotLike => Some(Like),
            And | Or | Not | Fragment => None,
        }
    }
}

/// A node of the filter tree.
///
/// The default value is the empty `AND`, which means "no constraint".
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Filter {
    kind: FilterKind,
    #[serde(skip_serializing_if = "String::is_empty")]
    field: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    values: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    children: Vec<Filter>,
}

impl Filter {
    fn leaf(kind: FilterKind, field: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            kind,
            field: field.into(),
            values,
            children: Vec::new(),
        }
    }

    /// Build a combinator, dropping empty operands and collapsing a lone child.
    fn combine(kind: FilterKind, filters: impl IntoIterator<Item = Filter>) -> Self {
        let mut children: Vec<Filter> = filters.into_iter().filter(|f| !f.is_none()).collect();
        if children.len() == 1 {
            if let Some(only) = children.pop() {
                return only;
            }
        }

        Self {
            kind,
            field: String::new(),
            values: Vec::new(),
            children,
        }
    }

    /// Extend `self` with `others` under `kind`, appending when `self` is
    /// already a combinator of that kind.
    fn chain(self, kind: FilterKind, others: impl IntoIterator<Item = Filter>) -> Self {
        let mut operands = if self.kind == kind {
            self.children
        } else {
            vec![self]
        };
        operands.extend(others);
        Self::combine(kind, operands)
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    /// Column or raw expression the leaf applies to. Empty for combinators.
    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn children(&self) -> &[Filter] {
        &self.children
    }

    /// True when the node is an empty combinator and constrains nothing.
    pub fn is_none(&self) -> bool {
        self.kind.is_combinator() && self.children.is_empty()
    }

    /// `self AND other`.
    pub fn and(self, other: Filter) -> Filter {
        self.chain(FilterKind::And, [other])
    }

    /// `self AND others...`.
    pub fn and_all(self, others: impl IntoIterator<Item = Filter>) -> Filter {
        self.chain(FilterKind::And, others)
    }

    /// `self OR other`.
    pub fn or(self, other: Filter) -> Filter {
        self.chain(FilterKind::Or, [other])
    }

    /// `self OR others...`.
    pub fn or_all(self, others: impl IntoIterator<Item = Filter>) -> Filter {
        self.chain(FilterKind::Or, others)
    }

    /// Logical negation, see [`not`].
    pub fn not(self) -> Filter {
        not(self)
    }

    pub fn and_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Filter {
        self.and(eq(field, value))
    }

    pub fn and_ne(self, field: impl Into<String>, value: impl Into<Value>) -> Filter {
        self.and(ne(field, value))
    }

    pub fn and_lt(self, field: impl Into<String>, value: impl Into<Value>) -> Filter {
        self.and(lt(field, value))
    }

    pub fn and_lte(self, field: impl Into<String>, value: impl Into<Value>) -> Filter {
        self.and(lte(field, value))
    }

    pub fn and_gt(self, field: impl Into<String>, value: impl Into<Value>) -> Filter {
        self.and(gt(field, value))
    }

    pub fn and_gte(self, field: impl Into<String>, value: impl Into<Value>) -> Filter {
        self.and(gte(field, value))
    }

    pub fn and_nil(self, field: impl Into<String>) -> Filter {
        self.and(is_nil(field))
    }

    pub fn and_not_nil(self, field: impl Into<String>) -> Filter {
        self.and(is_not_nil(field))
    }

    pub fn and_in<V: Into<Value>>(
        self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Filter {
        self.and(is_in(field, values))
    }

    pub fn and_not_in<V: Into<Value>>(
        self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Filter {
        self.and(not_in(field, values))
    }

    pub fn and_like(self, field: impl Into<String>, pattern: impl Into<String>) -> Filter {
        self.and(like(field, pattern))
    }

    pub fn and_not_like(self, field: impl Into<String>, pattern: impl Into<String>) -> Filter {
        self.and(not_like(field, pattern))
    }

    pub fn and_fragment<V: Into<Value>>(
        self,
        expr: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Filter {
        self.and(fragment(expr, values))
    }

    pub fn or_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Filter {
        self.or(eq(field, value))
    }

    pub fn or_ne(self, field: impl Into<String>, value: impl Into<Value>) -> Filter {
        self.or(ne(field, value))
    }

    pub fn or_lt(self, field: impl Into<String>, value: impl Into<Value>) -> Filter {
        self.or(lt(field, value))
    }

    pub fn or_lte(self, field: impl Into<String>, value: impl Into<Value>) -> Filter {
        self.or(lte(field, value))
    }

    pub fn or_gt(self, field: impl Into<String>, value: impl Into<Value>) -> Filter {
        self.or(gt(field, value))
    }

    pub fn or_gte(self, field: impl Into<String>, value: impl Into<Value>) -> Filter {
        self.or(gte(field, value))
    }

    pub fn or_nil(self, field: impl Into<String>) -> Filter {
        self.or(is_nil(field))
    }

    pub fn or_not_nil(self, field: impl Into<String>) -> Filter {
        self.or(is_not_nil(field))
    }

    pub fn or_in<V: Into<Value>>(
        self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Filter {
        self.or(is_in(field, values))
    }

    pub fn or_not_in<V: Into<Value>>(
        self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Filter {
        self.or(not_in(field, values))
    }

    pub fn or_like(self, field: impl Into<String>, pattern: impl Into<String>) -> Filter {
        self.or(like(field, pattern))
    }

    pub fn or_not_like(self, field: impl Into<String>, pattern: impl Into<String>) -> Filter {
        self.or(not_like(field, pattern))
    }

    pub fn or_fragment<V: Into<Value>>(
        self,
        expr: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Filter {
        self.or(fragment(expr, values))
    }
}

/// AND over `filters`. Empty operands are dropped; a single remaining operand
/// is returned as-is and no operands yield the empty `AND`.
pub fn and(filters: impl IntoIterator<Item = Filter>) -> Filter {
    Filter::combine(FilterKind::And, filters)
}

/// OR over `filters`, with the same collapsing rules as [`and`].
pub fn or(filters: impl IntoIterator<Item = Filter>) -> Filter {
    Filter::combine(FilterKind::Or, filters)
}

/// Negate a filter.
///
/// Leaves flip to their opposite operator (`=` to `!=`, `<` to `>=`, `IN` to
/// `NOT IN`, ...). A `NOT` with a single child unwraps to that child. Other
/// combinators and fragments are wrapped in `NOT`. An empty filter stays empty.
pub fn not(filter: Filter) -> Filter {
    if filter.is_none() {
        return filter;
    }

    if let Some(kind) = filter.kind.negated() {
        return Filter { kind, ..filter };
    }

    let mut filter = filter;
    if filter.kind == FilterKind::Not && filter.children.len() == 1 {
        if let Some(inner) = filter.children.pop() {
            return inner;
        }
    }

    Filter {
        kind: FilterKind::Not,
        field: String::new(),
        values: Vec::new(),
        children: vec![filter],
    }
}

/// `field = value`
pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Filter {
    Filter::leaf(FilterKind::Eq, field, vec![value.into()])
}

/// `field != value`
pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Filter {
    Filter::leaf(FilterKind::Ne, field, vec![value.into()])
}

/// `field < value`
pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Filter {
    Filter::leaf(FilterKind::Lt, field, vec![value.into()])
}

/// `field <= value`
pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Filter {
    Filter::leaf(FilterKind::Lte, field, vec![value.into()])
}

/// `field > value`
pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Filter {
    Filter::leaf(FilterKind::Gt, field, vec![value.into()])
}

/// `field >= value`
pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Filter {
    Filter::leaf(FilterKind::Gte, field, vec![value.into()])
}

/// `field IS NULL`
pub fn is_nil(field: impl Into<String>) -> Filter {
    Filter::leaf(FilterKind::Nil, field, Vec::new())
}

/// `field IS NOT NULL`
pub fn is_not_nil(field: impl Into<String>) -> Filter {
    Filter::leaf(FilterKind::NotNil, field, Vec::new())
}

/// `field IN (values...)`
pub fn is_in<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Filter {
    Filter::leaf(FilterKind::In, field, values.into_iter().map(Into::into).collect())
}

/// `field NOT IN (values...)`
pub fn not_in<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Filter {
    Filter::leaf(FilterKind::Nin, field, values.into_iter().map(Into::into).collect())
}

/// `field LIKE pattern`
pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Filter {
    Filter::leaf(FilterKind::Like, field, vec![Value::Text(pattern.into())])
}

/// `field NOT LIKE pattern`
pub fn not_like(field: impl Into<String>, pattern: impl Into<String>) -> Filter {
    Filter::leaf(FilterKind::NotLike, field, vec![Value::Text(pattern.into())])
}

/// Raw SQL predicate. Each `?` in `expr` binds the next of `values`.
pub fn fragment<V: Into<Value>>(expr: impl Into<String>, values: impl IntoIterator<Item = V>) -> Filter {
    Filter::leaf(FilterKind::Fragment, expr, values.into_iter().map(Into::into).collect())
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let list = |values: &[Value]| {
            values
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        let first = || self.values.first().cloned().unwrap_or(Value::Null);

        match self.kind {
            FilterKind::And | FilterKind::Or => {
                if self.children.is_empty() {
                    return write!(f, "()");
                }
                let sep = if self.kind == FilterKind::And { " AND " } else { " OR " };
                let parts: Vec<String> = self.children.iter().map(|c| c.to_string()).collect();
                write!(f, "({})", parts.join(sep))
            }
            FilterKind::Not => {
                let parts: Vec<String> = self.children.iter().map(|c| c.to_string()).collect();
                write!(f, "NOT ({})", parts.join(" AND "))
            }
            FilterKind::Eq => write!(f, "{} = {}", self.field, first()),
            FilterKind::Ne => write!(f, "{} != {}", self.field, first()),
            FilterKind::Lt => write!(f, "{} < {}", self.field, first()),
            FilterKind::Lte => write!(f, "{} <= {}", self.field, first()),
            FilterKind::Gt => write!(f, "{} > {}", self.field, first()),
            FilterKind::Gte => write!(f, "{} >= {}", self.field, first()),
            FilterKind::Nil => write!(f, "{} IS NULL", self.field),
            FilterKind::NotNil => write!(f, "{} IS NOT NULL", self.field),
            FilterKind::In => write!(f, "{} IN ({})", self.field, list(&self.values)),
            FilterKind::Nin => write!(f, "{} NOT IN ({})", self.field, list(&self.values)),
            FilterKind::Like => write!(f, "{} LIKE {}", self.field, first()),
            FilterKind::NotLike => write!(f, "{} NOT LIKE {}", self.field, first()),
            FilterKind::Fragment => {
                if self.values.is_empty() {
                    write!(f, "{}", self.field)
                } else {
                    write!(f, "{} [{}]", self.field, list(&self.values))
                }
            }
        }
    }
}
