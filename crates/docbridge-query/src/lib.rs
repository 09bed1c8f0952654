//! Query layer for docbridge
//!
//! This crate turns fluent query specifications into native store operations
//! and executes them over a shared connection.
//!
//! # Features
//! - Fail-fast constraint validation on [`QuerySpec`]
//! - Document-store builder compiling to MongoDB filters
//! - Relational fallback builder rendering parameterized SQL
//! - MongoDB connection with pool configuration from the environment
//! - In-memory connection with a MongoDB filter evaluator

pub mod builder;
pub mod connection;
pub mod document;
pub mod filter;
pub mod memory;
pub mod operator;
pub mod query;
pub mod sql;
pub mod statement;
pub mod validation;

pub use builder::QueryBuilder;
pub use connection::{
    BuilderOptions, Connection, ConnectionConfig, Driver, MongoConnection, PoolConfig,
};
pub use docbridge_common::{BridgeError, Result};
pub use document::DocumentBuilder;
pub use memory::MemoryConnection;
pub use operator::{Boolean, Operator, OrderDirection};
pub use query::{Constraint, QuerySpec};
pub use sql::RelationalBuilder;
pub use statement::{FindCommand, Outcome, RawDocuments, SqlKind, Statement};
pub use validation::{ValidatedCollectionName, ValidatedFieldName};
