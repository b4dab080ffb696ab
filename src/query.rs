//! Query aggregates and fragment composition.
//!
//! A [`Query`] describes one statement's shape: collection, selected fields,
//! joins, filter, grouping, sorting, offset, limit and lock. Queries are built
//! from independent [`Fragment`]s and folded together by [`compose`].
//!
//! ```
//! use querent::filter::eq;
//! use querent::query::{compose, limit, sort_desc, Fragment};
//!
//! let q = compose(
//!     "users",
//!     [
//!         Fragment::from(eq("active", true)),
//!         sort_desc("created_at").into(),
//!         limit(10).into(),
//!     ],
//! );
//! assert_eq!(q.collection, "users");
//! assert_eq!(q.limit, 10);
//! ```

use serde::{Deserialize, Serialize};

use crate::filter::{self, Filter};
use crate::value::Value;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Fields to select.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectClause {
    pub distinct: bool,
    pub fields: Vec<String>,
}

impl SelectClause {
    fn is_set(&self) -> bool {
        self.distinct || !self.fields.is_empty()
    }
}

/// One join against another collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinClause {
    /// `<mode> <collection> ON <from> = <to>`. Empty columns are derived from
    /// the final query collection when the query is composed.
    On {
        mode: String,
        collection: String,
        #[serde(default)]
        from: String,
        #[serde(default)]
        to: String,
    },
    /// Raw join SQL with its own arguments.
    Fragment {
        expr: String,
        #[serde(default)]
        args: Vec<Value>,
    },
}

impl JoinClause {
    /// Fill implicit columns: `<collection>.<target>_id = <target>.id`, with
    /// a trailing `s` dropped from the target for the foreign key.
    pub(crate) fn resolve(self, collection: &str) -> Self {
        match self {
            JoinClause::On {
                mode,
                collection: target,
                from,
                to,
            } if from.is_empty() || to.is_empty() => {
                let singular = target.strip_suffix('s').unwrap_or(&target);
                JoinClause::On {
                    mode,
                    from: format!("{}.{}_id", collection, singular),
                    to: format!("{}.id", target),
                    collection: target,
                }
            }
            other => other,
        }
    }
}

/// GROUP BY fields and their HAVING filter.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupClause {
    pub fields: Vec<String>,
    pub having: Filter,
}

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortClause {
    pub field: String,
    #[serde(default)]
    pub order: SortOrder,
}

impl SortClause {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Desc,
        }
    }
}

/// The full description of one statement before compilation.
///
/// Zero and empty values mean "unset": `limit == 0` renders no `LIMIT`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Query {
    pub collection: String,
    pub select: SelectClause,
    pub joins: Vec<JoinClause>,
    pub filter: Filter,
    pub group: GroupClause,
    pub sorts: Vec<SortClause>,
    pub offset: u64,
    pub limit: u64,
    pub lock: String,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `incoming` into `self`.
    ///
    /// Filters always combine with AND. Joins append. Incoming sorts go ahead
    /// of the existing ones. Every other clause is overwritten when `incoming`
    /// sets it.
    pub fn merge(mut self, incoming: Query) -> Query {
        self.absorb(incoming);
        self
    }

    fn absorb(&mut self, incoming: Query) {
        if !incoming.collection.is_empty() {
            self.collection = incoming.collection;
        }

        if incoming.select.is_set() {
            self.select = incoming.select;
        }

        self.joins.extend(incoming.joins);

        self.filter = std::mem::take(&mut self.filter).and(incoming.filter);

        if !incoming.group.fields.is_empty() {
            self.group.fields = incoming.group.fields;
        }
        self.group.having = std::mem::take(&mut self.group.having).and(incoming.group.having);

        let mut sorts = incoming.sorts;
        sorts.append(&mut self.sorts);
        self.sorts = sorts;

        if incoming.offset != 0 {
            self.offset = incoming.offset;
        }

        if incoming.limit != 0 {
            self.limit = incoming.limit;
        }

        if !incoming.lock.is_empty() {
            self.lock = incoming.lock;
        }
    }

    /// Fill implicit join columns against the current collection.
    fn resolve_joins(&mut self) {
        let joins = std::mem::take(&mut self.joins);
        self.joins = joins
            .into_iter()
            .map(|join| join.resolve(&self.collection))
            .collect();
    }

    pub fn from(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn select<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.select.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn distinct(mut self) -> Self {
        self.select.distinct = true;
        self
    }

    /// Join `collection` on implicit columns.
    pub fn join(self, collection: impl Into<String>) -> Self {
        self.join_on(collection, "", "")
    }

    pub fn join_on(
        self,
        collection: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.join_with("JOIN", collection, from, to)
    }

    /// Join with a custom mode such as `LEFT JOIN`.
    pub fn join_with(
        mut self,
        mode: impl Into<String>,
        collection: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.joins.push(JoinClause::On {
            mode: mode.into(),
            collection: collection.into(),
            from: from.into(),
            to: to.into(),
        });
        self
    }

    pub fn join_fragment<V: Into<Value>>(
        mut self,
        expr: impl Into<String>,
        args: impl IntoIterator<Item = V>,
    ) -> Self {
        self.joins.push(JoinClause::Fragment {
            expr: expr.into(),
            args: args.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// AND `filter` into the WHERE clause.
    pub fn and_where(mut self, filter: Filter) -> Self {
        self.filter = self.filter.and(filter);
        self
    }

    /// OR `filter` into the WHERE clause.
    pub fn or_where(mut self, filter: Filter) -> Self {
        self.filter = self.filter.or(filter);
        self
    }

    pub fn group<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.group.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn and_having(mut self, filter: Filter) -> Self {
        self.group.having = self.group.having.and(filter);
        self
    }

    pub fn or_having(mut self, filter: Filter) -> Self {
        self.group.having = self.group.having.or(filter);
        self
    }

    pub fn sort(self, field: impl Into<String>) -> Self {
        self.sort_asc(field)
    }

    pub fn sort_asc(mut self, field: impl Into<String>) -> Self {
        self.sorts.push(SortClause::asc(field));
        self
    }

    pub fn sort_desc(mut self, field: impl Into<String>) -> Self {
        self.sorts.push(SortClause::desc(field));
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    /// Row lock appended verbatim, e.g. `FOR UPDATE`.
    pub fn lock(mut self, lock: impl Into<String>) -> Self {
        self.lock = lock.into();
        self
    }
}

/// An independently built piece of a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fragment {
    Collection(String),
    Select(SelectClause),
    Join(JoinClause),
    Where(Filter),
    Group(GroupClause),
    Sort(SortClause),
    Offset(u64),
    Limit(u64),
    Lock(String),
    Query(Query),
}

impl Fragment {
    /// Apply this fragment onto an in-progress query.
    pub fn apply(self, query: &mut Query) {
        match self {
            Fragment::Collection(collection) => {
                if !collection.is_empty() {
                    query.collection = collection;
                }
            }
            Fragment::Select(select) => {
                if select.is_set() {
                    query.select = select;
                }
            }
            Fragment::Join(join) => query.joins.push(join),
            Fragment::Where(filter) => {
                query.filter = std::mem::take(&mut query.filter).and(filter);
            }
            Fragment::Group(group) => {
                if !group.fields.is_empty() {
                    query.group.fields = group.fields;
                }
                query.group.having = std::mem::take(&mut query.group.having).and(group.having);
            }
            Fragment::Sort(sort) => query.sorts.push(sort),
            Fragment::Offset(offset) => {
                if offset != 0 {
                    query.offset = offset;
                }
            }
            Fragment::Limit(limit) => {
                if limit != 0 {
                    query.limit = limit;
                }
            }
            Fragment::Lock(lock) => {
                if !lock.is_empty() {
                    query.lock = lock;
                }
            }
            Fragment::Query(incoming) => query.absorb(incoming),
        }
    }
}

impl From<Query> for Fragment {
    fn from(q: Query) -> Self {
        Fragment::Query(q)
    }
}

impl From<Filter> for Fragment {
    fn from(f: Filter) -> Self {
        Fragment::Where(f)
    }
}

impl From<SelectClause> for Fragment {
    fn from(s: SelectClause) -> Self {
        Fragment::Select(s)
    }
}

impl From<JoinClause> for Fragment {
    fn from(j: JoinClause) -> Self {
        Fragment::Join(j)
    }
}

impl From<GroupClause> for Fragment {
    fn from(g: GroupClause) -> Self {
        Fragment::Group(g)
    }
}

impl From<SortClause> for Fragment {
    fn from(s: SortClause) -> Self {
        Fragment::Sort(s)
    }
}

/// Fold `fragments` into one query.
///
/// `collection` is used only when no fragment names one. Joins are resolved
/// last, because their implicit columns depend on the final collection.
pub fn compose<F: Into<Fragment>>(
    collection: impl Into<String>,
    fragments: impl IntoIterator<Item = F>,
) -> Query {
    let mut query = Query::default();
    for fragment in fragments {
        fragment.into().apply(&mut query);
    }

    if query.collection.is_empty() {
        query.collection = collection.into();
    }

    query.resolve_joins();
    query
}

pub fn from(collection: impl Into<String>) -> Query {
    Query::new().from(collection)
}

pub fn select<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> SelectClause {
    SelectClause {
        distinct: false,
        fields: fields.into_iter().map(Into::into).collect(),
    }
}

pub fn select_distinct<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> SelectClause {
    SelectClause {
        distinct: true,
        ..select(fields)
    }
}

pub fn join(collection: impl Into<String>) -> JoinClause {
    join_on(collection, "", "")
}

pub fn join_on(
    collection: impl Into<String>,
    from: impl Into<String>,
    to: impl Into<String>,
) -> JoinClause {
    join_with("JOIN", collection, from, to)
}

pub fn join_with(
    mode: impl Into<String>,
    collection: impl Into<String>,
    from: impl Into<String>,
    to: impl Into<String>,
) -> JoinClause {
    JoinClause::On {
        mode: mode.into(),
        collection: collection.into(),
        from: from.into(),
        to: to.into(),
    }
}

pub fn join_fragment<V: Into<Value>>(
    expr: impl Into<String>,
    args: impl IntoIterator<Item = V>,
) -> JoinClause {
    JoinClause::Fragment {
        expr: expr.into(),
        args: args.into_iter().map(Into::into).collect(),
    }
}

/// A query carrying only a WHERE clause, AND-ing `filters`.
pub fn filter_by(filters: impl IntoIterator<Item = Filter>) -> Query {
    Query {
        filter: filter::and(filters),
        ..Query::default()
    }
}

pub fn group<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> GroupClause {
    GroupClause {
        fields: fields.into_iter().map(Into::into).collect(),
        having: Filter::default(),
    }
}

pub fn sort_asc(field: impl Into<String>) -> SortClause {
    SortClause::asc(field)
}

pub fn sort_desc(field: impl Into<String>) -> SortClause {
    SortClause::desc(field)
}

pub fn offset(offset: u64) -> Fragment {
    Fragment::Offset(offset)
}

pub fn limit(limit: u64) -> Fragment {
    Fragment::Limit(limit)
}

pub fn lock(lock: impl Into<String>) -> Fragment {
    Fragment::Lock(lock.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{and, eq, gt, ne};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_compose_sets_collection_when_missing() {
        let q = compose("users", [Fragment::from(eq("id", 1))]);
        assert_eq!(q.collection, "users");
        assert_eq!(q.filter, eq("id", 1));

        let q = compose("users", [Fragment::Collection("accounts".into())]);
        assert_eq!(q.collection, "accounts");
    }

    #[test]
    fn test_compose_empty() {
        let q = compose("users", Vec::<Fragment>::new());
        assert_eq!(q, Query::new().from("users"));
        assert!(q.filter.is_none());
    }

    #[test]
    fn test_merge_ands_filters() {
        let base = from("users").and_where(eq("b", 2));
        let merged = base.merge(filter_by([eq("a", 1)]));
        assert_eq!(merged.filter, and(vec![eq("b", 2), eq("a", 1)]));
    }

    #[test]
    fn test_merge_appends_to_existing_and() {
        let base = from("users").and_where(eq("a", 1).and(ne("b", 2)));
        let merged = base.merge(filter_by([gt("c", 3)]));
        assert_eq!(merged.filter.children(), &[eq("a", 1), ne("b", 2), gt("c", 3)]);
    }

    #[test]
    fn test_merge_scalar_policy() {
        let base = from("users").limit(10).offset(5).lock("FOR UPDATE");
        let merged = base.clone().merge(Query::new());
        assert_eq!(merged, base);

        let merged = base.merge(Query::new().from("admins").limit(1));
        assert_eq!(merged.collection, "admins");
        assert_eq!(merged.limit, 1);
        assert_eq!(merged.offset, 5);
        assert_eq!(merged.lock, "FOR UPDATE");
    }

    #[test]
    fn test_merge_select_and_group() {
        let base = Query::new().select(["id"]).group(["role"]).and_having(gt("count", 1));
        let merged = base.clone().merge(Query::new());
        assert_eq!(merged.select.fields, vec!["id"]);
        assert_eq!(merged.group.fields, vec!["role"]);

        let incoming = Query::new()
            .select(["id", "name"])
            .group(["team"])
            .and_having(ne("team", "x"));
        let merged = base.merge(incoming);
        assert_eq!(merged.select.fields, vec!["id", "name"]);
        assert_eq!(merged.group.fields, vec!["team"]);
        assert_eq!(merged.group.having, and(vec![gt("count", 1), ne("team", "x")]));
    }

    #[test]
    fn test_merge_distinct_only() {
        let merged = Query::new().select(["id"]).merge(Query::new().distinct());
        assert!(merged.select.distinct);
        assert!(merged.select.fields.is_empty());
    }

    #[test]
    fn test_merge_prepends_incoming_sorts() {
        let base = Query::new().sort_asc("name");
        let merged = base.merge(Query::new().sort_desc("created_at"));
        assert_eq!(
            merged.sorts,
            vec![SortClause::desc("created_at"), SortClause::asc("name")]
        );
    }

    #[test]
    fn test_merge_appends_joins() {
        let base = Query::new().join("addresses");
        let merged = base.merge(Query::new().join_fragment("JOIN teams ON teams.id = ?", [1]));
        assert_eq!(merged.joins.len(), 2);
        assert!(matches!(merged.joins[1], JoinClause::Fragment { .. }));
    }

    #[test]
    fn test_sort_fragments_append() {
        let q = compose("users", [sort_asc("a"), sort_desc("b")]);
        assert_eq!(q.sorts, vec![SortClause::asc("a"), SortClause::desc("b")]);
    }

    #[test]
    fn test_joins_resolve_against_final_collection() {
        let q = compose(
            "users",
            [Fragment::from(join("addresses")), Fragment::Collection("accounts".into())],
        );
        assert_eq!(
            q.joins,
            vec![JoinClause::On {
                mode: "JOIN".into(),
                collection: "addresses".into(),
                from: "accounts.address_id".into(),
                to: "addresses.id".into(),
            }]
        );
    }

    #[test]
    fn test_explicit_join_columns_kept() {
        let q = compose(
            "users",
            [join_with("LEFT JOIN", "teams", "users.team_id", "teams.id")],
        );
        assert_eq!(
            q.joins,
            vec![join_with("LEFT JOIN", "teams", "users.team_id", "teams.id")]
        );
    }

    #[test]
    fn test_fragment_kinds_apply() {
        let q = compose(
            "users",
            [
                Fragment::from(select_distinct(["id", "name"])),
                Fragment::from(eq("active", true)),
                Fragment::from(group(["role"])),
                offset(20),
                limit(10),
                lock("FOR UPDATE"),
                Fragment::from(gt("age", 18)),
            ],
        );

        assert!(q.select.distinct);
        assert_eq!(q.select.fields, vec!["id", "name"]);
        assert_eq!(q.filter, and(vec![eq("active", true), gt("age", 18)]));
        assert_eq!(q.group.fields, vec!["role"]);
        assert_eq!(q.offset, 20);
        assert_eq!(q.limit, 10);
        assert_eq!(q.lock, "FOR UPDATE");
    }

    #[test]
    fn test_or_where() {
        let q = Query::new().and_where(eq("a", 1)).or_where(eq("b", 2));
        assert_eq!(q.filter.kind(), crate::filter::FilterKind::Or);
        assert_eq!(q.filter.children(), &[eq("a", 1), eq("b", 2)]);
    }

    #[test]
    fn test_query_json() {
        let json = r#"{
            "collection": "users",
            "filter": {"kind": "and", "children": [
                {"kind": "eq", "field": "id", "values": [1]},
                {"kind": "like", "field": "name", "values": ["%a%"]}
            ]},
            "sorts": [{"field": "name"}],
            "limit": 5
        }"#;
        let q: Query = serde_json::from_str(json).unwrap();
        assert_eq!(q.filter, eq("id", 1).and(crate::filter::like("name", "%a%")));
        assert_eq!(q.sorts, vec![SortClause::asc("name")]);
        assert_eq!(q.limit, 5);
    }
}
