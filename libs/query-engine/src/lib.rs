//! Component G: the JSON query language, its SQL generator, the chart
//! aggregation handler, and the HTTP transport boundary that fronts them
//! (§4.G).

pub mod chart;
pub mod language;
pub mod sql;
pub mod transport;

pub use language::{ColumnFilters, FilterDocument, Matcher, OrderItem, QueryDocument, Select};
pub use sql::{generate_query, GeneratedQuery, QueryError};
pub use transport::{router, QueryApiState};
