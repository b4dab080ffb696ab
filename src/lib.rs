//! # querent
//!
//! Composable query fragments compiled to SQL, plus a thin async adapter that
//! executes them.
//!
//! ## Quick Example
//!
//! ```
//! use querent::prelude::*;
//!
//! let query = compose(
//!     "users",
//!     [
//!         Fragment::from(eq("id", 10).and(ne("name", "foo")).and(gt("score", 80))),
//!         limit(5),
//!     ],
//! );
//!
//! let compiled = Builder::new(Dialect::Generic).find(&query);
//! assert_eq!(
//!     compiled.sql,
//!     "SELECT * FROM users WHERE (id = ? AND name != ? AND score > ?) LIMIT 5"
//! );
//! assert_eq!(compiled.args.len(), 3);
//! ```
//!
//! ## Layout
//!
//! | Module      | Role                                         |
//! |-------------|----------------------------------------------|
//! | [`filter`]  | Boolean predicate tree                       |
//! | [`query`]   | Query aggregate, fragments, merge            |
//! | [`changes`] | Ordered field changes for insert and update  |
//! | [`builder`] | SQL text and arguments per dialect           |
//! | [`adapter`] | Execution, transactions, error normalization |

pub mod adapter;
pub mod builder;
pub mod changes;
pub mod config;
pub mod error;
pub mod filter;
pub mod query;
pub mod value;

pub mod prelude {
    pub use crate::adapter::{Adapter, ExecResult, Row, SqlxAdapter, State};
    pub use crate::builder::{Builder, Compiled, Dialect, Statement};
    pub use crate::changes::Changes;
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::filter::{
        Filter, FilterKind, and, eq, fragment, gt, gte, is_in, is_nil, is_not_nil, like, lt, lte,
        ne, not, not_in, not_like, or,
    };
    pub use crate::query::{
        Fragment, JoinClause, Query, SortClause, SortOrder, compose, filter_by, limit, lock,
        offset, sort_asc, sort_desc,
    };
    pub use crate::value::Value;
}

pub use adapter::{Adapter, SqlxAdapter};
pub use builder::{Builder, Dialect};
pub use error::{Error, Result};
pub use query::{Query, compose};
