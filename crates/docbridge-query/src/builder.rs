//! Builder contract shared by the document and relational dialects.

use std::sync::Arc;

use async_trait::async_trait;
use bson::{Bson, Document as BsonDocument};

use crate::connection::{Connection, Driver};
use crate::query::QuerySpec;
use crate::statement::RawDocuments;
use crate::Result;

/// Translates a [`QuerySpec`] into native statements and executes them.
///
/// Every method performs exactly one call to the connection. Constraint
/// problems are reported before that call is made.
#[async_trait]
pub trait QueryBuilder: Send + Sync {
    /// Dialect this builder emits
    fn dialect(&self) -> Driver;

    fn connection(&self) -> &Arc<dyn Connection>;

    /// Run a read and return the matching raw documents
    async fn get(&self, spec: QuerySpec) -> Result<RawDocuments>;

    async fn count(&self, spec: QuerySpec) -> Result<u64>;

    async fn insert(&self, collection: &str, values: BsonDocument) -> Result<()>;

    /// Insert and return the record's id.
    ///
    /// A caller-supplied `id` wins over the id reported by the store.
    async fn insert_get_id(&self, collection: &str, values: BsonDocument) -> Result<Bson>;

    /// Update matching records, returning the affected count
    async fn update(&self, spec: QuerySpec, values: BsonDocument) -> Result<u64>;

    /// Update matching records, inserting one when nothing matches
    async fn upsert(&self, spec: QuerySpec, values: BsonDocument) -> Result<u64>;

    async fn delete(&self, spec: QuerySpec) -> Result<u64>;

    /// First matching document, if any
    async fn first(&self, spec: QuerySpec) -> Result<Option<BsonDocument>> {
        let mut rows = self.get(spec.limit(1)).await?;
        Ok(rows.next())
    }
}
