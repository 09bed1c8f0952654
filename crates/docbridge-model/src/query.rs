//! Typed query over a model's collection.

use std::marker::PhantomData;
use std::sync::Arc;

use bson::{Bson, Document as BsonDocument};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::dates::{as_date_time, fresh_timestamp, from_date_time};
use crate::definition::{is_date_field, ModelDefinition};
use crate::model::Model;
use crate::Result;
use docbridge_common::BridgeError;
use docbridge_query::{
    Connection, DocumentBuilder, OrderDirection, QueryBuilder, QuerySpec, RelationalBuilder,
};

/// Document builder on document stores, relational builder otherwise.
pub(crate) fn builder_for<D: ModelDefinition>(conn: &Arc<dyn Connection>) -> Box<dyn QueryBuilder> {
    if conn.is_document_store() {
        Box::new(DocumentBuilder::new(Arc::clone(conn)).with_key_name(D::key_name()))
    } else {
        Box::new(RelationalBuilder::new(Arc::clone(conn)).with_key_name(D::key_name()))
    }
}

/// Fluent query returning hydrated models of type `D`.
pub struct ModelQuery<D: ModelDefinition> {
    conn: Arc<dyn Connection>,
    spec: QuerySpec,
    _definition: PhantomData<fn() -> D>,
}

impl<D: ModelDefinition> Clone for ModelQuery<D> {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
            spec: self.spec.clone(),
            _definition: PhantomData,
        }
    }
}

impl<D: ModelDefinition> std::fmt::Debug for ModelQuery<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelQuery")
            .field("model", &D::NAME)
            .field("spec", &self.spec)
            .finish()
    }
}

impl<D: ModelDefinition> ModelQuery<D> {
    pub fn new(conn: Arc<dyn Connection>) -> Result<Self> {
        Ok(Self {
            spec: QuerySpec::new(&D::collection())?,
            conn,
            _definition: PhantomData,
        })
    }

    fn map_spec(self, f: impl FnOnce(QuerySpec) -> Result<QuerySpec>) -> Result<Self> {
        Ok(Self {
            spec: f(self.spec)?,
            conn: self.conn,
            _definition: PhantomData,
        })
    }

    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    pub fn into_spec(self) -> QuerySpec {
        self.spec
    }

    pub fn builder(&self) -> Box<dyn QueryBuilder> {
        builder_for::<D>(&self.conn)
    }

    pub fn where_op(self, field: &str, operator: &str, value: impl Into<Bson>) -> Result<Self> {
        self.map_spec(|s| s.where_op(field, operator, value))
    }

    pub fn or_where(self, field: &str, operator: &str, value: impl Into<Bson>) -> Result<Self> {
        self.map_spec(|s| s.or_where(field, operator, value))
    }

    pub fn where_eq(self, field: &str, value: impl Into<Bson>) -> Result<Self> {
        self.map_spec(|s| s.where_eq(field, value))
    }

    pub fn where_key(self, key: impl Into<Bson>) -> Result<Self> {
        self.where_eq(D::key_name(), key)
    }

    pub fn where_in<I, V>(self, field: &str, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        self.map_spec(|s| s.where_in(field, values))
    }

    pub fn where_not_in<I, V>(self, field: &str, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        self.map_spec(|s| s.where_not_in(field, values))
    }

    pub fn where_null(self, field: &str) -> Result<Self> {
        self.map_spec(|s| s.where_null(field))
    }

    pub fn where_not_null(self, field: &str) -> Result<Self> {
        self.map_spec(|s| s.where_not_null(field))
    }

    pub fn where_between(self, field: &str, low: impl Into<Bson>, high: impl Into<Bson>) -> Result<Self> {
        self.map_spec(|s| s.where_between(field, low, high))
    }

    pub fn where_like(self, field: &str, pattern: &str) -> Result<Self> {
        self.map_spec(|s| s.where_like(field, pattern))
    }

    /// Compare a date field, with the value in the connection's stored date form
    pub fn where_date(self, field: &str, operator: &str, value: DateTime<Utc>) -> Result<Self> {
        let stored = from_date_time(value, D::date_format(), self.conn.supports_native_dates());
        self.where_op(field, operator, stored)
    }

    pub fn select(self, fields: &[&str]) -> Result<Self> {
        self.map_spec(|s| s.select(fields))
    }

    pub fn order_by(self, field: &str, direction: OrderDirection) -> Result<Self> {
        self.map_spec(|s| s.order_by(field, direction))
    }

    /// Newest first by `created_at`
    pub fn latest(self) -> Result<Self> {
        self.map_spec(|s| s.latest(D::CREATED_AT))
    }

    /// Oldest first by `created_at`
    pub fn oldest(self) -> Result<Self> {
        self.map_spec(|s| s.oldest(D::CREATED_AT))
    }

    pub fn skip(self, skip: u64) -> Self {
        Self {
            spec: self.spec.skip(skip),
            ..self
        }
    }

    pub fn limit(self, limit: i64) -> Self {
        Self {
            spec: self.spec.limit(limit),
            ..self
        }
    }

    pub fn for_page(self, page: u64, per_page: i64) -> Self {
        Self {
            spec: self.spec.for_page(page, per_page),
            ..self
        }
    }

    /// Record eager-load directives
    pub fn with(self, relations: &[&str]) -> Self {
        Self {
            spec: self.spec.with(relations),
            ..self
        }
    }

    /// Run the query and hydrate every document
    pub async fn get(self) -> Result<Vec<Model<D>>> {
        let rows = self.builder().get(self.spec).await?;
        rows.map(|raw| Model::new_from_builder(Arc::clone(&self.conn), raw))
            .collect()
    }

    pub async fn first(self) -> Result<Option<Model<D>>> {
        match self.builder().first(self.spec).await? {
            Some(raw) => Model::new_from_builder(self.conn, raw).map(Some),
            None => Ok(None),
        }
    }

    pub async fn find(self, key: impl Into<Bson>) -> Result<Option<Model<D>>> {
        self.where_key(key)?.first().await
    }

    /// Like [`find`](Self::find), with a not-found error on a miss
    pub async fn find_or_fail(self, key: impl Into<Bson>) -> Result<Model<D>> {
        let key = key.into();
        let missing = format!("No query results for model [{}] {}", D::NAME, key);
        self.find(key)
            .await?
            .ok_or(BridgeError::NotFound(missing))
    }

    pub async fn count(self) -> Result<u64> {
        self.builder().count(self.spec).await
    }

    /// Update every matching document. Plain values also refresh `updated_at`.
    ///
    /// Date fields, plain or under `$set`, are written in the connection's
    /// stored date form; an unreadable date fails before the store call.
    pub async fn update(self, values: BsonDocument) -> Result<u64> {
        let plain = !values.keys().any(|k| k.starts_with('$'));
        let native = self.conn.supports_native_dates();
        let mut values = if plain {
            canonical_dates::<D>(values, native)?
        } else {
            let mut values = values;
            if let Ok(set) = values.get_document_mut("$set") {
                *set = canonical_dates::<D>(std::mem::take(set), native)?;
            }
            values
        };

        if D::timestamps() && plain && !values.contains_key(D::UPDATED_AT) {
            values.insert(D::UPDATED_AT, from_date_time(fresh_timestamp(), D::date_format(), native));
        }
        let affected = self.builder().update(self.spec, values).await?;
        debug!(model = D::NAME, affected, "bulk update");
        Ok(affected)
    }

    /// Delete every matching document without firing model hooks
    pub async fn delete(self) -> Result<u64> {
        self.builder().delete(self.spec).await
    }

    /// Build and save a new model. A vetoed save returns the unsaved model.
    pub async fn create(self, attributes: BsonDocument) -> Result<Model<D>> {
        let mut model = Model::with_attributes(self.conn, attributes)?;
        model.save().await?;
        Ok(model)
    }
}

fn canonical_dates<D: ModelDefinition>(values: BsonDocument, native: bool) -> Result<BsonDocument> {
    values
        .into_iter()
        .map(|(field, value)| {
            if !is_date_field::<D>(&field) || matches!(value, Bson::Null) {
                return Ok((field, value));
            }
            let parsed = as_date_time(&value, D::date_format())
                .map_err(|e| BridgeError::Hydration(format!("{}.{}: {}", D::NAME, field, e)))?;
            Ok((field, from_date_time(parsed, D::date_format(), native)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use chrono::TimeZone;
    use docbridge_query::MemoryConnection;

    struct Event;

    impl ModelDefinition for Event {
        const NAME: &'static str = "Event";

        fn dates() -> &'static [&'static str] {
            &["starts_at"]
        }
    }

    fn memory() -> (Arc<MemoryConnection>, Arc<dyn Connection>) {
        let mem = Arc::new(MemoryConnection::new());
        let conn: Arc<dyn Connection> = mem.clone();
        (mem, conn)
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let (_, conn) = memory();
        let created = ModelQuery::<Event>::new(conn.clone())
            .unwrap()
            .create(doc! { "name": "launch" })
            .await
            .unwrap();
        assert!(created.exists());

        let found = ModelQuery::<Event>::new(conn.clone())
            .unwrap()
            .find(1_i64)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.get("name"), Some(&Bson::String("launch".into())));
        assert_eq!(found.get_key(), Some(&Bson::Int64(1)));
    }

    #[tokio::test]
    async fn test_find_or_fail_miss() {
        let (_, conn) = memory();
        let err = ModelQuery::<Event>::new(conn).unwrap().find_or_fail(99).await.unwrap_err();
        assert!(matches!(err, BridgeError::NotFound(_)));
        assert!(err.to_string().contains("[Event] 99"));
    }

    #[tokio::test]
    async fn test_where_date_compares_stored_strings() {
        let (mem, conn) = memory();
        mem.seed(
            "events",
            vec![
                doc! { "_id": 1, "starts_at": "2024-01-01 09:00:00" },
                doc! { "_id": 2, "starts_at": "2024-06-01 09:00:00" },
            ],
        );
        let rows = ModelQuery::<Event>::new(conn)
            .unwrap()
            .where_date("starts_at", ">=", Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
            .unwrap()
            .get()
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_key(), Some(&Bson::Int32(2)));
    }

    #[tokio::test]
    async fn test_get_fails_on_unreadable_date() {
        let (mem, conn) = memory();
        mem.seed("events", vec![doc! { "_id": 1, "starts_at": "someday" }]);
        let err = ModelQuery::<Event>::new(conn).unwrap().get().await.unwrap_err();
        assert!(matches!(err, BridgeError::Hydration(_)));
    }

    #[tokio::test]
    async fn test_bulk_update_stamps_updated_at() {
        let (mem, conn) = memory();
        mem.seed("events", vec![doc! { "_id": 1, "name": "a" }, doc! { "_id": 2, "name": "b" }]);
        let affected = ModelQuery::<Event>::new(conn)
            .unwrap()
            .where_eq("name", "a")
            .unwrap()
            .update(doc! { "name": "c" })
            .await
            .unwrap();
        assert_eq!(affected, 1);
        let stored = &mem.documents("events")[0];
        assert_eq!(stored.get_str("name").unwrap(), "c");
        assert!(stored.get_str("updated_at").is_ok());
    }

    #[tokio::test]
    async fn test_bulk_update_canonicalizes_dates() {
        let (mem, conn) = memory();
        mem.seed("events", vec![doc! { "_id": 1, "starts_at": "2023-05-05 10:00:00" }]);
        let query = ModelQuery::<Event>::new(conn).unwrap();

        query.clone().update(doc! { "starts_at": "2024-01-01" }).await.unwrap();
        assert_eq!(mem.documents("events")[0].get_str("starts_at").unwrap(), "2024-01-01 00:00:00");

        query
            .clone()
            .update(doc! { "$set": { "starts_at": "2024-02-01T08:30:00Z" } })
            .await
            .unwrap();
        assert_eq!(mem.documents("events")[0].get_str("starts_at").unwrap(), "2024-02-01 08:30:00");

        let writes = mem.write_count();
        let err = query.update(doc! { "starts_at": "whenever" }).await.unwrap_err();
        assert!(matches!(err, BridgeError::Hydration(_)));
        assert_eq!(mem.write_count(), writes);
    }

    #[tokio::test]
    async fn test_count_and_delete() {
        let (mem, conn) = memory();
        mem.seed("events", vec![doc! { "_id": 1, "n": 1 }, doc! { "_id": 2, "n": 2 }]);
        let query = ModelQuery::<Event>::new(conn).unwrap();
        assert_eq!(query.clone().count().await.unwrap(), 2);
        assert_eq!(query.clone().where_op("n", ">", 1).unwrap().delete().await.unwrap(), 1);
        assert_eq!(query.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_pagination_and_eager_loads() {
        let (mem, conn) = memory();
        mem.seed(
            "events",
            (1..=5).map(|i| doc! { "_id": i, "created_at": format!("2024-01-0{} 00:00:00", i) }).collect(),
        );
        let query = ModelQuery::<Event>::new(conn)
            .unwrap()
            .latest()
            .unwrap()
            .for_page(2, 2)
            .with(&["attendees"]);
        assert_eq!(query.spec().eager_loads(), &["attendees".to_string()]);

        let keys: Vec<_> = query
            .get()
            .await
            .unwrap()
            .iter()
            .map(|m| m.get_key().cloned())
            .collect();
        assert_eq!(keys, vec![Some(Bson::Int32(3)), Some(Bson::Int32(2))]);
    }
}
