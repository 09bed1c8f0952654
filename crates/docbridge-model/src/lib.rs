//! Model adapter for docbridge
//!
//! Wraps model types declared through [`ModelDefinition`] and bridges them to
//! the query layer: hydration with date coercion, dirty tracking with numeric
//! equivalence, lifecycle hooks, relation factories and the insert, update,
//! save and delete pipelines. The builder is picked from the connection, so
//! the same model works on a document store and on a relational database.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use bson::doc;
//! use docbridge_model::{Model, ModelDefinition};
//! use docbridge_query::{Connection, MemoryConnection};
//!
//! struct User;
//!
//! impl ModelDefinition for User {
//!     const NAME: &'static str = "User";
//! }
//!
//! let conn: Arc<dyn Connection> = Arc::new(MemoryConnection::new());
//! let mut user = Model::<User>::with_attributes(conn.clone(), doc! { "name": "ada" })?;
//! user.save().await?;
//! let adults = Model::<User>::query(conn)?.where_op("age", ">=", 18)?.get().await?;
//! ```

pub mod dates;
pub mod definition;
pub mod dirty;
pub mod events;
pub mod model;
pub mod query;
pub mod relation;

pub use dates::{as_date_time, from_date_time, DEFAULT_DATE_FORMAT};
pub use definition::{FieldKind, FieldType, ModelDefinition};
pub use docbridge_common::{BridgeError, Result};
pub use events::{Hook, Hooks, ModelEvent};
pub use model::Model;
pub use query::ModelQuery;
pub use relation::{EmbedsMany, Relation, RelationKind};
