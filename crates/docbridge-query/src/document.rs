//! Document-store query builder
//!
//! `DocumentBuilder` compiles a [`QuerySpec`] into MongoDB filter, sort and
//! projection documents and runs the resulting [`Statement`] on a connection.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use docbridge_query::{DocumentBuilder, MemoryConnection, QueryBuilder, QuerySpec};
//!
//! let builder = DocumentBuilder::new(Arc::new(MemoryConnection::new()));
//! let spec = QuerySpec::new("users")?.where_op("age", ">=", 18)?.latest("created_at")?;
//! let rows = builder.get(spec).await?;
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use bson::{doc, Bson, Document as BsonDocument, Regex};
use tracing::{debug, instrument};

use crate::builder::QueryBuilder;
use crate::connection::{BuilderOptions, Connection, Driver};
use crate::operator::{Boolean, Operator};
use crate::query::{Constraint, QuerySpec};
use crate::statement::{FindCommand, Outcome, RawDocuments, Statement};
use crate::Result;
use docbridge_common::BridgeError;

/// Default model-facing key name
const KEY_FIELD: &str = "id";
/// Store key name
const STORE_KEY_FIELD: &str = "_id";

/// Query builder for document-store connections.
#[derive(Clone)]
pub struct DocumentBuilder {
    conn: Arc<dyn Connection>,
    options: BuilderOptions,
    key_name: String,
}

impl std::fmt::Debug for DocumentBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentBuilder")
            .field("connection", &self.conn.name())
            .field("options", &self.options)
            .field("key_name", &self.key_name)
            .finish()
    }
}

impl DocumentBuilder {
    /// Create a builder using the connection's options
    pub fn new(conn: Arc<dyn Connection>) -> Self {
        let options = conn.options();
        Self {
            conn,
            options,
            key_name: KEY_FIELD.to_string(),
        }
    }

    pub fn with_options(mut self, options: BuilderOptions) -> Self {
        self.options = options;
        self
    }

    /// Model key exposed in place of `_id`
    pub fn with_key_name(mut self, key_name: &str) -> Self {
        self.key_name = key_name.to_string();
        self
    }

    pub fn options(&self) -> BuilderOptions {
        self.options
    }

    pub fn key_name(&self) -> &str {
        &self.key_name
    }

    fn store_field<'a>(&self, field: &'a str) -> &'a str {
        if self.options.key_alias && field == self.key_name {
            STORE_KEY_FIELD
        } else {
            field
        }
    }

    /// Compile the spec's constraints into a filter document.
    ///
    /// Constraints are AND-joined. With OR grouping enabled, each OR
    /// constraint starts a new AND group and the groups are joined with `$or`.
    pub fn compile_filter(&self, spec: &QuerySpec) -> Result<BsonDocument> {
        if spec.has_or_grouping() && !self.options.or_grouping {
            return Err(BridgeError::Constraint(format!(
                "OR grouping on '{}' is not enabled for this builder",
                spec.collection()
            )));
        }

        let mut groups: Vec<Vec<BsonDocument>> = Vec::new();
        for constraint in spec.wheres() {
            let compiled = self.compile_constraint(constraint);
            match groups.last_mut() {
                Some(group) if constraint.boolean == Boolean::And => group.push(compiled),
                _ => groups.push(vec![compiled]),
            }
        }

        let mut groups: Vec<BsonDocument> = groups.into_iter().map(and_group).collect();
        let filter = match groups.len() {
            0 => BsonDocument::new(),
            1 => groups.remove(0),
            _ => doc! { "$or": groups.into_iter().map(Bson::Document).collect::<Vec<_>>() },
        };

        debug!(collection = spec.collection(), filter = %filter, "compiled filter");
        Ok(filter)
    }

    fn compile_constraint(&self, constraint: &Constraint) -> BsonDocument {
        let field = self.store_field(&constraint.field);
        let value = constraint.value.clone();

        let condition = match constraint.operator {
            Operator::Eq => value,
            Operator::Ne => Bson::Document(doc! { "$ne": value }),
            Operator::Gt => Bson::Document(doc! { "$gt": value }),
            Operator::Gte => Bson::Document(doc! { "$gte": value }),
            Operator::Lt => Bson::Document(doc! { "$lt": value }),
            Operator::Lte => Bson::Document(doc! { "$lte": value }),
            Operator::In => Bson::Document(doc! { "$in": value }),
            Operator::NotIn => Bson::Document(doc! { "$nin": value }),
            Operator::Null => Bson::Null,
            Operator::NotNull => Bson::Document(doc! { "$ne": Bson::Null }),
            Operator::Between => match value {
                Bson::Array(mut bounds) if bounds.len() == 2 => {
                    let high = bounds.remove(1);
                    let low = bounds.remove(0);
                    Bson::Document(doc! { "$gte": low, "$lte": high })
                }
                other => other,
            },
            Operator::Exists => Bson::Document(doc! { "$exists": value }),
            Operator::Like => Bson::Document(doc! {
                "$regex": like_to_regex(as_str(&value)),
                "$options": "i",
            }),
            Operator::NotLike => Bson::Document(doc! {
                "$not": Bson::RegularExpression(Regex {
                    pattern: like_to_regex(as_str(&value)),
                    options: "i".to_string(),
                }),
            }),
            Operator::Regex => Bson::Document(doc! { "$regex": value }),
        };

        let mut compiled = BsonDocument::new();
        compiled.insert(field, condition);
        compiled
    }

    /// Sort document for the spec's ordering, if any
    pub fn compile_sort(&self, spec: &QuerySpec) -> Option<BsonDocument> {
        if spec.orders().is_empty() {
            return None;
        }
        let mut sort = BsonDocument::new();
        for (field, direction) in spec.orders() {
            sort.insert(self.store_field(field), direction.to_sort_value());
        }
        Some(sort)
    }

    /// Inclusion projection for the spec's selected fields, if any
    pub fn compile_projection(&self, spec: &QuerySpec) -> Option<BsonDocument> {
        if spec.projections().is_empty() {
            return None;
        }
        let mut projection = BsonDocument::new();
        for field in spec.projections() {
            projection.insert(self.store_field(field), 1);
        }
        Some(projection)
    }

    /// Update document for the given values.
    ///
    /// Plain values are wrapped in `$set`; values that already use update
    /// operators pass through. Mixing the two is a constraint error.
    pub fn compile_update(&self, values: BsonDocument) -> Result<BsonDocument> {
        let operators = values.keys().filter(|k| k.starts_with('$')).count();
        if operators == 0 {
            return Ok(doc! { "$set": self.to_store(values) });
        }
        if operators != values.len() {
            return Err(BridgeError::Constraint(
                "Update values mix operators and plain fields".to_string(),
            ));
        }
        Ok(values)
    }

    fn to_store(&self, values: BsonDocument) -> BsonDocument {
        if !self.options.key_alias {
            return values;
        }
        values
            .into_iter()
            .map(|(k, v)| {
                let k = if k == self.key_name { STORE_KEY_FIELD.to_string() } else { k };
                (k, v)
            })
            .collect()
    }

    fn from_store(&self, document: BsonDocument) -> BsonDocument {
        if !self.options.key_alias {
            return document;
        }
        document
            .into_iter()
            .map(|(k, v)| {
                let k = if k == STORE_KEY_FIELD { self.key_name.clone() } else { k };
                (k, v)
            })
            .collect()
    }

    async fn affected(&self, statement: Statement) -> Result<u64> {
        match self.conn.execute(statement).await? {
            Outcome::Affected(n) => Ok(n),
            other => Err(unexpected("affected count", &other)),
        }
    }
}

fn and_group(mut group: Vec<BsonDocument>) -> BsonDocument {
    if group.len() == 1 {
        group.remove(0)
    } else {
        doc! { "$and": group.into_iter().map(Bson::Document).collect::<Vec<_>>() }
    }
}

fn as_str(value: &Bson) -> &str {
    value.as_str().unwrap_or_default()
}

/// Translate a SQL LIKE pattern into an anchored regex
pub fn like_to_regex(pattern: &str) -> String {
    let mut regex = String::with_capacity(pattern.len() + 2);
    regex.push('^');
    for ch in pattern.chars() {
        match ch {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            other => regex.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    regex.push('$');
    regex
}

pub(crate) fn unexpected(expected: &str, outcome: &Outcome) -> BridgeError {
    BridgeError::Internal(format!("Expected {} from connection, got {:?}", expected, outcome))
}

#[async_trait]
impl QueryBuilder for DocumentBuilder {
    fn dialect(&self) -> Driver {
        Driver::Document
    }

    fn connection(&self) -> &Arc<dyn Connection> {
        &self.conn
    }

    #[instrument(skip(self, spec), fields(collection = spec.collection()))]
    async fn get(&self, spec: QuerySpec) -> Result<RawDocuments> {
        let cmd = FindCommand {
            collection: spec.collection().to_string(),
            filter: self.compile_filter(&spec)?,
            projection: self.compile_projection(&spec),
            sort: self.compile_sort(&spec),
            skip: spec.get_skip(),
            limit: spec.get_limit(),
        };

        match self.conn.execute(Statement::Find(cmd)).await? {
            Outcome::Documents(docs) => {
                debug!(count = docs.len(), "documents fetched");
                Ok(RawDocuments::new(
                    docs.into_iter().map(|d| self.from_store(d)).collect(),
                ))
            }
            other => Err(unexpected("documents", &other)),
        }
    }

    #[instrument(skip(self, spec), fields(collection = spec.collection()))]
    async fn count(&self, spec: QuerySpec) -> Result<u64> {
        let statement = Statement::Count {
            collection: spec.collection().to_string(),
            filter: self.compile_filter(&spec)?,
        };
        match self.conn.execute(statement).await? {
            Outcome::Count(n) => Ok(n),
            other => Err(unexpected("count", &other)),
        }
    }

    async fn insert(&self, collection: &str, values: BsonDocument) -> Result<()> {
        self.insert_get_id(collection, values).await.map(|_| ())
    }

    #[instrument(skip(self, values))]
    async fn insert_get_id(&self, collection: &str, values: BsonDocument) -> Result<Bson> {
        let supplied = values
            .get(&self.key_name)
            .or_else(|| values.get(STORE_KEY_FIELD))
            .cloned();

        let statement = Statement::Insert {
            collection: collection.to_string(),
            document: self.to_store(values),
        };

        match self.conn.execute(statement).await? {
            Outcome::Inserted(generated) => {
                let id = supplied.or(generated).ok_or_else(|| {
                    BridgeError::Store(format!("Insert into '{}' reported no id", collection))
                })?;
                debug!(id = %id, "document inserted");
                Ok(id)
            }
            other => Err(unexpected("inserted id", &other)),
        }
    }

    #[instrument(skip(self, spec, values), fields(collection = spec.collection()))]
    async fn update(&self, spec: QuerySpec, values: BsonDocument) -> Result<u64> {
        let statement = Statement::Update {
            collection: spec.collection().to_string(),
            filter: self.compile_filter(&spec)?,
            update: self.compile_update(values)?,
            upsert: false,
        };
        self.affected(statement).await
    }

    #[instrument(skip(self, spec, values), fields(collection = spec.collection()))]
    async fn upsert(&self, spec: QuerySpec, values: BsonDocument) -> Result<u64> {
        let statement = Statement::Update {
            collection: spec.collection().to_string(),
            filter: self.compile_filter(&spec)?,
            update: self.compile_update(values)?,
            upsert: true,
        };
        self.affected(statement).await
    }

    #[instrument(skip(self, spec), fields(collection = spec.collection()))]
    async fn delete(&self, spec: QuerySpec) -> Result<u64> {
        let statement = Statement::Delete {
            collection: spec.collection().to_string(),
            filter: self.compile_filter(&spec)?,
        };
        self.affected(statement).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryConnection;
    use crate::operator::OrderDirection;

    fn builder() -> (Arc<MemoryConnection>, DocumentBuilder) {
        let conn = Arc::new(MemoryConnection::new());
        let builder = DocumentBuilder::new(conn.clone());
        (conn, builder)
    }

    fn spec() -> QuerySpec {
        QuerySpec::new("users").unwrap()
    }

    #[test]
    fn test_empty_filter() {
        let (_, b) = builder();
        assert_eq!(b.compile_filter(&spec()).unwrap(), doc! {});
    }

    #[test]
    fn test_single_constraint_is_not_wrapped() {
        let (_, b) = builder();
        let filter = b.compile_filter(&spec().where_op("age", ">", 18).unwrap()).unwrap();
        assert_eq!(filter, doc! { "age": { "$gt": 18 } });
    }

    #[test]
    fn test_constraints_are_and_joined() {
        let (_, b) = builder();
        let qs = spec()
            .where_eq("status", "active")
            .unwrap()
            .where_between("age", 18, 65)
            .unwrap()
            .where_not_null("email")
            .unwrap();
        assert_eq!(
            b.compile_filter(&qs).unwrap(),
            doc! { "$and": [
                { "status": "active" },
                { "age": { "$gte": 18, "$lte": 65 } },
                { "email": { "$ne": null } },
            ] }
        );
    }

    #[test]
    fn test_operator_translation() {
        let (_, b) = builder();
        let cases = vec![
            (spec().where_op("a", "!=", 1).unwrap(), doc! { "a": { "$ne": 1 } }),
            (spec().where_op("a", "<>", 1).unwrap(), doc! { "a": { "$ne": 1 } }),
            (spec().where_op("a", "<=", 1).unwrap(), doc! { "a": { "$lte": 1 } }),
            (spec().where_in("a", vec![1, 2]).unwrap(), doc! { "a": { "$in": [1, 2] } }),
            (spec().where_not_in("a", vec![3]).unwrap(), doc! { "a": { "$nin": [3] } }),
            (spec().where_null("a").unwrap(), doc! { "a": null }),
            (spec().where_op("a", "exists", false).unwrap(), doc! { "a": { "$exists": false } }),
            (spec().where_op("a", "regex", "^x").unwrap(), doc! { "a": { "$regex": "^x" } }),
        ];
        for (qs, expected) in cases {
            assert_eq!(b.compile_filter(&qs).unwrap(), expected);
        }
    }

    #[test]
    fn test_like_pattern_translation() {
        assert_eq!(like_to_regex("jo%"), "^jo.*$");
        assert_eq!(like_to_regex("a_c"), "^a.c$");
        assert_eq!(like_to_regex("1.5%"), "^1\\.5.*$");

        let (_, b) = builder();
        let filter = b.compile_filter(&spec().where_like("name", "%son").unwrap()).unwrap();
        assert_eq!(filter, doc! { "name": { "$regex": "^.*son$", "$options": "i" } });
    }

    #[test]
    fn test_or_grouping_disabled_by_default() {
        let (_, b) = builder();
        let qs = spec().where_eq("a", 1).unwrap().or_where("b", "=", 2).unwrap();
        let err = b.compile_filter(&qs).unwrap_err();
        assert!(err.is_constraint_error());
    }

    #[test]
    fn test_or_grouping_splits_groups() {
        let (_, b) = builder();
        let b = b.with_options(BuilderOptions {
            or_grouping: true,
            ..BuilderOptions::default()
        });
        let qs = spec()
            .where_eq("a", 1)
            .unwrap()
            .where_eq("b", 2)
            .unwrap()
            .or_where("c", "=", 3)
            .unwrap();
        assert_eq!(
            b.compile_filter(&qs).unwrap(),
            doc! { "$or": [
                { "$and": [{ "a": 1 }, { "b": 2 }] },
                { "c": 3 },
            ] }
        );
    }

    #[test]
    fn test_key_alias_in_filter_sort_projection() {
        let (_, b) = builder();
        let qs = spec()
            .where_eq("id", 7)
            .unwrap()
            .select(&["id", "name"])
            .unwrap()
            .order_by("id", OrderDirection::Desc)
            .unwrap();
        assert_eq!(b.compile_filter(&qs).unwrap(), doc! { "_id": 7 });
        assert_eq!(b.compile_projection(&qs), Some(doc! { "_id": 1, "name": 1 }));
        assert_eq!(b.compile_sort(&qs), Some(doc! { "_id": -1 }));
    }

    #[test]
    fn test_key_alias_can_be_disabled() {
        let (_, b) = builder();
        let b = b.with_options(BuilderOptions {
            key_alias: false,
            ..BuilderOptions::default()
        });
        let qs = spec().where_eq("id", 7).unwrap();
        assert_eq!(b.compile_filter(&qs).unwrap(), doc! { "id": 7 });
    }

    #[test]
    fn test_compile_update() {
        let (_, b) = builder();
        assert_eq!(
            b.compile_update(doc! { "name": "x" }).unwrap(),
            doc! { "$set": { "name": "x" } }
        );
        assert_eq!(
            b.compile_update(doc! { "$inc": { "n": 1 } }).unwrap(),
            doc! { "$inc": { "n": 1 } }
        );
        assert!(b.compile_update(doc! { "$inc": { "n": 1 }, "name": "x" }).is_err());
    }

    #[tokio::test]
    async fn test_insert_get_id_returns_generated_id() {
        let (conn, b) = builder();
        conn.set_next_id(42);
        let id = b.insert_get_id("users", doc! { "name": "ada" }).await.unwrap();
        assert_eq!(id, Bson::Int64(42));
        assert_eq!(conn.write_count(), 1);
    }

    #[tokio::test]
    async fn test_insert_get_id_prefers_supplied_id() {
        let (conn, b) = builder();
        let id = b.insert_get_id("users", doc! { "id": "ada" }).await.unwrap();
        assert_eq!(id, Bson::String("ada".to_string()));
        assert_eq!(conn.documents("users"), vec![doc! { "_id": "ada" }]);
    }

    #[tokio::test]
    async fn test_custom_key_name_is_aliased() {
        let (conn, b) = builder();
        let b = b.with_key_name("sku");
        let id = b.insert_get_id("items", doc! { "sku": "A1", "qty": 3 }).await.unwrap();
        assert_eq!(id, Bson::String("A1".to_string()));
        assert_eq!(conn.documents("items"), vec![doc! { "_id": "A1", "qty": 3 }]);

        let qs = QuerySpec::new("items").unwrap().where_eq("sku", "A1").unwrap();
        assert_eq!(b.compile_filter(&qs).unwrap(), doc! { "_id": "A1" });
        let rows: Vec<_> = b.get(qs).await.unwrap().collect();
        assert_eq!(rows, vec![doc! { "sku": "A1", "qty": 3 }]);
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_conflict() {
        let (_, b) = builder();
        b.insert("users", doc! { "id": 1 }).await.unwrap();
        let err = b.insert("users", doc! { "id": 1 }).await.unwrap_err();
        assert!(err.is_data_error());
    }

    #[tokio::test]
    async fn test_get_maps_store_key_back() {
        let (conn, b) = builder();
        conn.seed("users", vec![doc! { "_id": 1, "age": 30 }, doc! { "_id": 2, "age": 10 }]);
        let rows: Vec<_> = b
            .get(spec().where_op("age", ">=", 18).unwrap())
            .await
            .unwrap()
            .collect();
        assert_eq!(rows, vec![doc! { "id": 1, "age": 30 }]);
    }

    #[tokio::test]
    async fn test_each_get_requeries() {
        let (conn, b) = builder();
        conn.seed("users", vec![doc! { "_id": 1 }]);
        assert_eq!(b.get(spec()).await.unwrap().count(), 1);
        conn.seed("users", vec![doc! { "_id": 2 }]);
        assert_eq!(b.get(spec()).await.unwrap().count(), 2);
        assert_eq!(conn.read_count(), 2);
    }

    #[tokio::test]
    async fn test_bad_constraint_never_reaches_store() {
        let (conn, b) = builder();
        let qs = spec().where_eq("a", 1).unwrap().or_where("b", "=", 2).unwrap();
        assert!(b.delete(qs).await.is_err());
        assert_eq!(conn.write_count(), 0);
        assert_eq!(conn.read_count(), 0);
    }

    #[tokio::test]
    async fn test_update_count_delete() {
        let (conn, b) = builder();
        conn.seed(
            "users",
            vec![
                doc! { "_id": 1, "name": "ada", "age": 36 },
                doc! { "_id": 2, "name": "alan", "age": 41 },
                doc! { "_id": 3, "name": "grace", "age": 85 },
            ],
        );

        let updated = b
            .update(spec().where_like("name", "a%").unwrap(), doc! { "team": "a" })
            .await
            .unwrap();
        assert_eq!(updated, 2);

        assert_eq!(b.count(spec().where_eq("team", "a").unwrap()).await.unwrap(), 2);

        let deleted = b.delete(spec().where_op("age", ">", 40).unwrap()).await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(b.count(spec()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_not_like_excludes_matches() {
        let (conn, b) = builder();
        conn.seed("users", vec![doc! { "_id": 1, "name": "Ada" }, doc! { "_id": 2, "name": "Grace" }]);
        let rows: Vec<_> = b
            .get(spec().where_op("name", "not like", "a%").unwrap())
            .await
            .unwrap()
            .collect();
        assert_eq!(rows, vec![doc! { "id": 2, "name": "Grace" }]);
    }

    #[tokio::test]
    async fn test_upsert_inserts_when_missing() {
        let (conn, b) = builder();
        let affected = b
            .upsert(spec().where_eq("email", "a@b.c").unwrap(), doc! { "name": "ada" })
            .await
            .unwrap();
        assert_eq!(affected, 1);
        let docs = conn.documents("users");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].get_str("email").unwrap(), "a@b.c");
    }

    #[tokio::test]
    async fn test_first() {
        let (conn, b) = builder();
        conn.seed("users", vec![doc! { "_id": 1, "n": 2 }, doc! { "_id": 2, "n": 1 }]);
        let first = b.first(spec().oldest("n").unwrap()).await.unwrap();
        assert_eq!(first, Some(doc! { "id": 2, "n": 1 }));
        assert!(b.first(spec().where_eq("n", 9).unwrap()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_offline_connection_surfaces_connection_error() {
        let (conn, b) = builder();
        conn.set_offline(true);
        let err = b.get(spec()).await.unwrap_err();
        assert!(err.is_connection_error());
        assert!(!err.is_data_error());
    }
}
