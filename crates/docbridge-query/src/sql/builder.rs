//! Relational fallback builder.
//!
//! Renders a [`QuerySpec`] as PostgreSQL-flavored SQL with `$n` placeholders
//! and hands it to the connection as a [`Statement::Sql`].

use std::sync::Arc;

use async_trait::async_trait;
use bson::{Bson, Document as BsonDocument};
use tracing::{debug, instrument};

use super::helpers::{bind, quote_identifier, validate_identifier};
use crate::builder::QueryBuilder;
use crate::connection::{BuilderOptions, Connection, Driver};
use crate::document::unexpected;
use crate::operator::{Boolean, Operator};
use crate::query::{Constraint, QuerySpec};
use crate::statement::{Outcome, RawDocuments, SqlKind, Statement};
use crate::Result;
use docbridge_common::BridgeError;

/// Query builder for connections that speak SQL.
#[derive(Clone)]
pub struct RelationalBuilder {
    conn: Arc<dyn Connection>,
    options: BuilderOptions,
    key_name: String,
}

impl std::fmt::Debug for RelationalBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationalBuilder")
            .field("connection", &self.conn.name())
            .field("options", &self.options)
            .field("key_name", &self.key_name)
            .finish()
    }
}

impl RelationalBuilder {
    pub fn new(conn: Arc<dyn Connection>) -> Self {
        let options = conn.options();
        Self {
            conn,
            options,
            key_name: "id".to_string(),
        }
    }

    pub fn with_options(mut self, options: BuilderOptions) -> Self {
        self.options = options;
        self
    }

    /// Column returned by `INSERT ... RETURNING`
    pub fn with_key_name(mut self, key_name: impl Into<String>) -> Self {
        self.key_name = key_name.into();
        self
    }

    /// Render the WHERE clause (without the keyword), or `None` for no constraints.
    pub fn build_where(&self, spec: &QuerySpec, params: &mut Vec<Bson>) -> Result<Option<String>> {
        if spec.has_or_grouping() && !self.options.or_grouping {
            return Err(BridgeError::Constraint(format!(
                "OR grouping on '{}' is not enabled for this builder",
                spec.collection()
            )));
        }
        if spec.wheres().is_empty() {
            return Ok(None);
        }

        let mut sql = String::new();
        for (i, constraint) in spec.wheres().iter().enumerate() {
            if i > 0 {
                sql.push_str(match constraint.boolean {
                    Boolean::And => " AND ",
                    Boolean::Or => " OR ",
                });
            }
            sql.push_str(&build_condition(constraint, params)?);
        }
        Ok(Some(sql))
    }

    /// Render a SELECT for the spec
    pub fn build_select(&self, spec: &QuerySpec) -> Result<(String, Vec<Bson>)> {
        validate_identifier(spec.collection())?;
        let mut params = Vec::new();

        let columns = if spec.projections().is_empty() {
            "*".to_string()
        } else {
            let mut quoted = Vec::with_capacity(spec.projections().len());
            for column in spec.projections() {
                validate_identifier(column)?;
                quoted.push(quote_identifier(column));
            }
            quoted.join(", ")
        };

        let mut sql = format!("SELECT {} FROM {}", columns, quote_identifier(spec.collection()));
        if let Some(clause) = self.build_where(spec, &mut params)? {
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
        }

        if !spec.orders().is_empty() {
            let mut parts = Vec::with_capacity(spec.orders().len());
            for (field, direction) in spec.orders() {
                validate_identifier(field)?;
                parts.push(format!("{} {}", quote_identifier(field), direction.to_sql()));
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&parts.join(", "));
        }

        if let Some(limit) = spec.get_limit() {
            let placeholder = bind(&mut params, Bson::Int64(limit));
            sql.push_str(&format!(" LIMIT {}", placeholder));
        }
        if let Some(skip) = spec.get_skip() {
            let placeholder = bind(&mut params, Bson::Int64(skip as i64));
            sql.push_str(&format!(" OFFSET {}", placeholder));
        }

        Ok((sql, params))
    }

    pub fn build_count(&self, spec: &QuerySpec) -> Result<(String, Vec<Bson>)> {
        validate_identifier(spec.collection())?;
        let mut params = Vec::new();
        let mut sql = format!("SELECT COUNT(*) FROM {}", quote_identifier(spec.collection()));
        if let Some(clause) = self.build_where(spec, &mut params)? {
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
        }
        Ok((sql, params))
    }

    pub fn build_insert(&self, table: &str, values: &BsonDocument) -> Result<(String, Vec<Bson>)> {
        validate_identifier(table)?;
        let returning = quote_identifier(&self.key_name);

        if values.is_empty() {
            return Ok((
                format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", quote_identifier(table), returning),
                Vec::new(),
            ));
        }

        let mut params = Vec::with_capacity(values.len());
        let mut columns = Vec::with_capacity(values.len());
        let mut placeholders = Vec::with_capacity(values.len());
        for (column, value) in values {
            validate_identifier(column)?;
            columns.push(quote_identifier(column));
            placeholders.push(bind(&mut params, value.clone()));
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            quote_identifier(table),
            columns.join(", "),
            placeholders.join(", "),
            returning
        );
        Ok((sql, params))
    }

    pub fn build_update(&self, spec: &QuerySpec, values: BsonDocument) -> Result<(String, Vec<Bson>)> {
        validate_identifier(spec.collection())?;
        let values = plain_values(values)?;
        if values.is_empty() {
            return Err(BridgeError::Constraint("Cannot update with no values".to_string()));
        }

        let mut params = Vec::new();
        let mut assignments = Vec::with_capacity(values.len());
        for (column, value) in values {
            validate_identifier(&column)?;
            let placeholder = bind(&mut params, value);
            assignments.push(format!("{} = {}", quote_identifier(&column), placeholder));
        }

        let mut sql = format!(
            "UPDATE {} SET {}",
            quote_identifier(spec.collection()),
            assignments.join(", ")
        );
        if let Some(clause) = self.build_where(spec, &mut params)? {
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
        }
        Ok((sql, params))
    }

    /// Render `INSERT ... ON CONFLICT DO UPDATE`.
    ///
    /// The spec must hold only AND-joined equality constraints; their fields
    /// form the conflict target and their values are part of the inserted row.
    pub fn build_upsert(&self, spec: &QuerySpec, values: BsonDocument) -> Result<(String, Vec<Bson>)> {
        let values = plain_values(values)?;
        let mut row = BsonDocument::new();
        let mut target = Vec::new();
        for constraint in spec.wheres() {
            if constraint.operator != Operator::Eq || constraint.boolean != Boolean::And {
                return Err(BridgeError::Constraint(format!(
                    "Upsert on '{}' needs AND-joined equality constraints",
                    spec.collection()
                )));
            }
            target.push(quote_identifier(&constraint.field));
            row.insert(constraint.field.clone(), constraint.value.clone());
        }
        if target.is_empty() {
            return Err(BridgeError::Constraint(format!(
                "Upsert on '{}' needs at least one equality constraint",
                spec.collection()
            )));
        }

        let updates: Vec<String> = values
            .keys()
            .map(|column| {
                let quoted = quote_identifier(column);
                format!("{} = EXCLUDED.{}", quoted, quoted)
            })
            .collect();
        row.extend(values);

        let (insert, params) = self.build_insert(spec.collection(), &row)?;
        let (head, returning) = insert
            .rsplit_once(" RETURNING ")
            .ok_or_else(|| BridgeError::Internal("INSERT rendered without RETURNING".to_string()))?;

        let action = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", updates.join(", "))
        };
        let sql = format!(
            "{} ON CONFLICT ({}) {} RETURNING {}",
            head,
            target.join(", "),
            action,
            returning
        );
        Ok((sql, params))
    }

    pub fn build_delete(&self, spec: &QuerySpec) -> Result<(String, Vec<Bson>)> {
        validate_identifier(spec.collection())?;
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {}", quote_identifier(spec.collection()));
        if let Some(clause) = self.build_where(spec, &mut params)? {
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
        }
        Ok((sql, params))
    }

    async fn run(&self, kind: SqlKind, (sql, params): (String, Vec<Bson>)) -> Result<Outcome> {
        debug!(sql = %sql, params = params.len(), "compiled sql");
        self.conn.execute(Statement::Sql { kind, sql, params }).await
    }

    async fn affected(&self, kind: SqlKind, rendered: (String, Vec<Bson>)) -> Result<u64> {
        match self.run(kind, rendered).await? {
            Outcome::Affected(n) => Ok(n),
            other => Err(unexpected("affected count", &other)),
        }
    }
}

fn build_condition(constraint: &Constraint, params: &mut Vec<Bson>) -> Result<String> {
    validate_identifier(&constraint.field)?;
    let field = quote_identifier(&constraint.field);
    let value = constraint.value.clone();

    Ok(match constraint.operator {
        Operator::Eq | Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            format!("{} {} {}", field, constraint.operator.to_sql(), bind(params, value))
        }
        Operator::Ne => format!("{} <> {}", field, bind(params, value)),
        Operator::In => format!("{} = ANY({})", field, bind(params, value)),
        Operator::NotIn => format!("{} <> ALL({})", field, bind(params, value)),
        Operator::Null | Operator::NotNull => format!("{} {}", field, constraint.operator.to_sql()),
        Operator::Between => match value {
            Bson::Array(mut bounds) if bounds.len() == 2 => {
                let high = bounds.remove(1);
                let low = bounds.remove(0);
                let low = bind(params, low);
                let high = bind(params, high);
                format!("{} BETWEEN {} AND {}", field, low, high)
            }
            _ => {
                return Err(BridgeError::Constraint(format!(
                    "BETWEEN on '{}' expects two bounds",
                    constraint.field
                )))
            }
        },
        Operator::Exists => match value {
            Bson::Boolean(false) => format!("{} IS NULL", field),
            _ => format!("{} IS NOT NULL", field),
        },
        Operator::Like => format!("{} ILIKE {}", field, bind(params, value)),
        Operator::NotLike => format!("{} NOT ILIKE {}", field, bind(params, value)),
        Operator::Regex => format!("{} ~ {}", field, bind(params, value)),
    })
}

/// Unwrap `$set` and reject other update operators
fn plain_values(values: BsonDocument) -> Result<BsonDocument> {
    if !values.keys().any(|k| k.starts_with('$')) {
        return Ok(values);
    }
    let mut plain = BsonDocument::new();
    for (key, value) in values {
        match (key.as_str(), value) {
            ("$set", Bson::Document(set)) => plain.extend(set),
            (op, _) => {
                return Err(BridgeError::Constraint(format!(
                    "Update operator '{}' is not supported on relational connections",
                    op
                )))
            }
        }
    }
    Ok(plain)
}

#[async_trait]
impl QueryBuilder for RelationalBuilder {
    fn dialect(&self) -> Driver {
        Driver::Relational
    }

    fn connection(&self) -> &Arc<dyn Connection> {
        &self.conn
    }

    #[instrument(skip(self, spec), fields(table = spec.collection()))]
    async fn get(&self, spec: QuerySpec) -> Result<RawDocuments> {
        match self.run(SqlKind::Select, self.build_select(&spec)?).await? {
            Outcome::Documents(rows) => Ok(RawDocuments::new(rows)),
            other => Err(unexpected("rows", &other)),
        }
    }

    #[instrument(skip(self, spec), fields(table = spec.collection()))]
    async fn count(&self, spec: QuerySpec) -> Result<u64> {
        match self.run(SqlKind::Count, self.build_count(&spec)?).await? {
            Outcome::Count(n) => Ok(n),
            other => Err(unexpected("count", &other)),
        }
    }

    async fn insert(&self, collection: &str, values: BsonDocument) -> Result<()> {
        let rendered = self.build_insert(collection, &values)?;
        self.run(SqlKind::Insert, rendered).await.map(|_| ())
    }

    #[instrument(skip(self, values))]
    async fn insert_get_id(&self, collection: &str, values: BsonDocument) -> Result<Bson> {
        let supplied = values.get(&self.key_name).cloned();
        let rendered = self.build_insert(collection, &values)?;
        let returned = match self.run(SqlKind::Insert, rendered).await? {
            Outcome::Inserted(id) => id,
            Outcome::Documents(rows) => rows
                .into_iter()
                .next()
                .and_then(|row| row.get(&self.key_name).cloned()),
            other => return Err(unexpected("inserted id", &other)),
        };
        supplied.or(returned).ok_or_else(|| {
            BridgeError::Store(format!("Insert into '{}' returned no id", collection))
        })
    }

    #[instrument(skip(self, spec, values), fields(table = spec.collection()))]
    async fn update(&self, spec: QuerySpec, values: BsonDocument) -> Result<u64> {
        let rendered = self.build_update(&spec, values)?;
        self.affected(SqlKind::Update, rendered).await
    }

    #[instrument(skip(self, spec, values), fields(table = spec.collection()))]
    async fn upsert(&self, spec: QuerySpec, values: BsonDocument) -> Result<u64> {
        let rendered = self.build_upsert(&spec, values)?;
        match self.run(SqlKind::Insert, rendered).await? {
            Outcome::Affected(n) => Ok(n),
            Outcome::Inserted(_) => Ok(1),
            Outcome::Documents(rows) => Ok(rows.len() as u64),
            other => Err(unexpected("affected count", &other)),
        }
    }

    #[instrument(skip(self, spec), fields(table = spec.collection()))]
    async fn delete(&self, spec: QuerySpec) -> Result<u64> {
        let rendered = self.build_delete(&spec)?;
        self.affected(SqlKind::Delete, rendered).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryConnection;
    use bson::doc;

    fn builder() -> (Arc<MemoryConnection>, RelationalBuilder) {
        let conn = Arc::new(MemoryConnection::relational());
        let builder = RelationalBuilder::new(conn.clone());
        (conn, builder)
    }

    fn spec() -> QuerySpec {
        QuerySpec::new("users").unwrap()
    }

    #[test]
    fn test_build_select() {
        let (_, b) = builder();
        let qs = spec()
            .where_eq("status", "active")
            .unwrap()
            .where_op("age", ">=", 18)
            .unwrap()
            .select(&["id", "name"])
            .unwrap()
            .latest("created_at")
            .unwrap()
            .for_page(2, 10);
        let (sql, params) = b.build_select(&qs).unwrap();
        assert_eq!(
            sql,
            "SELECT \"id\", \"name\" FROM \"users\" WHERE \"status\" = $1 AND \"age\" >= $2 \
             ORDER BY \"created_at\" DESC LIMIT $3 OFFSET $4"
        );
        assert_eq!(
            params,
            vec![Bson::String("active".to_string()), Bson::Int32(18), Bson::Int64(10), Bson::Int64(10)]
        );
    }

    #[test]
    fn test_condition_rendering() {
        let (_, b) = builder();
        let qs = spec()
            .where_in("id", vec![1, 2])
            .unwrap()
            .where_null("deleted_at")
            .unwrap()
            .where_between("age", 1, 9)
            .unwrap()
            .where_like("name", "a%")
            .unwrap();
        let mut params = Vec::new();
        let clause = b.build_where(&qs, &mut params).unwrap().unwrap();
        assert_eq!(
            clause,
            "\"id\" = ANY($1) AND \"deleted_at\" IS NULL AND \"age\" BETWEEN $2 AND $3 AND \"name\" ILIKE $4"
        );
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn test_or_grouping_follows_options() {
        let (_, b) = builder();
        let qs = spec().where_eq("a", 1).unwrap().or_where("b", "=", 2).unwrap();
        assert!(b.build_select(&qs).is_err());

        let b = b.with_options(BuilderOptions {
            or_grouping: true,
            ..BuilderOptions::default()
        });
        let (sql, _) = b.build_select(&qs).unwrap();
        assert_eq!(sql, "SELECT * FROM \"users\" WHERE \"a\" = $1 OR \"b\" = $2");
    }

    #[test]
    fn test_build_insert() {
        let (_, b) = builder();
        let (sql, params) = b.build_insert("users", &doc! { "name": "ada", "age": 36 }).unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"users\" (\"name\", \"age\") VALUES ($1, $2) RETURNING \"id\""
        );
        assert_eq!(params.len(), 2);

        let (sql, _) = b.build_insert("users", &doc! {}).unwrap();
        assert_eq!(sql, "INSERT INTO \"users\" DEFAULT VALUES RETURNING \"id\"");
    }

    #[test]
    fn test_build_update_unwraps_set() {
        let (_, b) = builder();
        let qs = spec().where_eq("id", 3).unwrap();
        let (sql, params) = b.build_update(&qs, doc! { "$set": { "name": "x" } }).unwrap();
        assert_eq!(sql, "UPDATE \"users\" SET \"name\" = $1 WHERE \"id\" = $2");
        assert_eq!(params, vec![Bson::String("x".to_string()), Bson::Int32(3)]);

        assert!(b.build_update(&qs, doc! { "$inc": { "n": 1 } }).is_err());
        assert!(b.build_update(&qs, doc! {}).is_err());
    }

    #[test]
    fn test_build_upsert() {
        let (_, b) = builder();
        let qs = spec().where_eq("email", "a@b.c").unwrap();
        let (sql, params) = b.build_upsert(&qs, doc! { "name": "ada" }).unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"users\" (\"email\", \"name\") VALUES ($1, $2) \
             ON CONFLICT (\"email\") DO UPDATE SET \"name\" = EXCLUDED.\"name\" RETURNING \"id\""
        );
        assert_eq!(params.len(), 2);

        let ranged = spec().where_op("age", ">", 1).unwrap();
        assert!(b.build_upsert(&ranged, doc! { "name": "x" }).is_err());
    }

    #[test]
    fn test_invalid_identifier_rejected() {
        let (_, b) = builder();
        let qs = spec().where_eq("select", 1).unwrap();
        assert!(b.build_delete(&qs).unwrap_err().is_constraint_error());
    }

    #[tokio::test]
    async fn test_statements_reach_connection() {
        let (conn, b) = builder();
        b.delete(spec().where_eq("id", 1).unwrap()).await.unwrap();
        let statements = conn.statements();
        assert_eq!(
            statements,
            vec![Statement::Sql {
                kind: SqlKind::Delete,
                sql: "DELETE FROM \"users\" WHERE \"id\" = $1".to_string(),
                params: vec![Bson::Int32(1)],
            }]
        );
    }

    #[tokio::test]
    async fn test_insert_get_id_with_supplied_key() {
        let (_, b) = builder();
        let id = b.insert_get_id("users", doc! { "id": 9, "name": "x" }).await.unwrap();
        assert_eq!(id, Bson::Int32(9));
    }

    #[tokio::test]
    async fn test_insert_get_id_without_returned_id_is_store_error() {
        let (_, b) = builder();
        let err = b.insert_get_id("users", doc! { "name": "x" }).await.unwrap_err();
        assert!(matches!(err, BridgeError::Store(_)));
    }
}
