//! EAV datom store with schema, indices, transactions, pull, and
//! datalog-style query (SPEC_FULL.md §4.3).

pub mod cache;
pub mod coerce;
pub mod convert;
pub mod datom;
pub mod error;
mod graph;
pub mod ids;
pub mod index;
pub mod pull;
pub mod query;
pub mod scan;
pub mod schema;
pub mod tx;

pub use cache::RefType;
pub use convert::{value_to_wire, wire_to_value};
pub use datom::{Datom, Value};
pub use error::GraphError;
pub use graph::{GraphOptions, GraphState, StoragePath};
pub use ids::{EntityId, TxId};
pub use query::QueryResult;
pub use scan::Component;
pub use schema::Schema;
pub use tx::{AttrValue, EntityRef, TxItem, TxReport};
