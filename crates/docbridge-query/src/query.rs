//! Query specification shared by every builder dialect
//!
//! A [`QuerySpec`] accumulates constraints, projections, ordering, pagination
//! and eager-load directives through chained calls. Constraint methods check
//! the field name, the operator and the value shape immediately, so a bad
//! constraint fails before anything reaches a connection. Builders consume the
//! spec by value when they execute it.

use bson::Bson;

use crate::operator::{Boolean, Operator, OrderDirection};
use crate::validation::{ValidatedCollectionName, ValidatedFieldName};
use crate::Result;
use docbridge_common::BridgeError;

/// A single predicate on a field.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub field: String,
    pub operator: Operator,
    /// `Bson::Null` for unary operators
    pub value: Bson,
    pub boolean: Boolean,
}

/// Accumulating description of a query against one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    collection: String,
    wheres: Vec<Constraint>,
    projections: Vec<String>,
    orders: Vec<(String, OrderDirection)>,
    skip: Option<u64>,
    limit: Option<i64>,
    eager_loads: Vec<String>,
}

impl QuerySpec {
    /// Create a new query specification for a collection
    pub fn new(collection: &str) -> Result<Self> {
        let collection = ValidatedCollectionName::new(collection)?.into_string();
        Ok(Self {
            collection,
            wheres: Vec::new(),
            projections: Vec::new(),
            orders: Vec::new(),
            skip: None,
            limit: None,
            eager_loads: Vec::new(),
        })
    }

    /// Adds a constraint using an operator string such as `">="` or `"not in"`.
    pub fn where_op(self, field: &str, operator: &str, value: impl Into<Bson>) -> Result<Self> {
        let operator = operator.parse::<Operator>()?;
        self.push_constraint(field, operator, value.into(), Boolean::And)
    }

    /// Adds a constraint with an already-parsed operator.
    pub fn where_clause(self, field: &str, operator: Operator, value: impl Into<Bson>) -> Result<Self> {
        self.push_constraint(field, operator, value.into(), Boolean::And)
    }

    /// Adds an OR-joined constraint.
    ///
    /// Whether the target builder accepts OR grouping is decided when the spec
    /// is compiled, see `BuilderOptions::or_grouping`.
    pub fn or_where(self, field: &str, operator: &str, value: impl Into<Bson>) -> Result<Self> {
        let operator = operator.parse::<Operator>()?;
        self.push_constraint(field, operator, value.into(), Boolean::Or)
    }

    pub fn where_eq(self, field: &str, value: impl Into<Bson>) -> Result<Self> {
        self.where_clause(field, Operator::Eq, value)
    }

    pub fn where_in<I, V>(self, field: &str, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        let values: Vec<Bson> = values.into_iter().map(Into::into).collect();
        self.where_clause(field, Operator::In, Bson::Array(values))
    }

    pub fn where_not_in<I, V>(self, field: &str, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        let values: Vec<Bson> = values.into_iter().map(Into::into).collect();
        self.where_clause(field, Operator::NotIn, Bson::Array(values))
    }

    pub fn where_null(self, field: &str) -> Result<Self> {
        self.where_clause(field, Operator::Null, Bson::Null)
    }

    pub fn where_not_null(self, field: &str) -> Result<Self> {
        self.where_clause(field, Operator::NotNull, Bson::Null)
    }

    /// Inclusive range constraint.
    pub fn where_between(self, field: &str, low: impl Into<Bson>, high: impl Into<Bson>) -> Result<Self> {
        self.where_clause(field, Operator::Between, Bson::Array(vec![low.into(), high.into()]))
    }

    pub fn where_like(self, field: &str, pattern: &str) -> Result<Self> {
        self.where_clause(field, Operator::Like, pattern)
    }

    /// Restrict the returned fields
    pub fn select(mut self, fields: &[&str]) -> Result<Self> {
        for field in fields {
            let field = ValidatedFieldName::new(field)?;
            self.projections.push(field.into_string());
        }
        Ok(self)
    }

    pub fn order_by(mut self, field: &str, direction: OrderDirection) -> Result<Self> {
        let field = ValidatedFieldName::new(field)?;
        self.orders.push((field.into_string(), direction));
        Ok(self)
    }

    /// Newest first on the given field
    pub fn latest(self, field: &str) -> Result<Self> {
        self.order_by(field, OrderDirection::Desc)
    }

    /// Oldest first on the given field
    pub fn oldest(self, field: &str) -> Result<Self> {
        self.order_by(field, OrderDirection::Asc)
    }

    /// Set the number of documents to skip
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Set the maximum number of documents to return
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Page-based pagination, pages start at 1
    pub fn for_page(self, page: u64, per_page: i64) -> Self {
        let page = page.max(1);
        let per_page = per_page.max(0);
        self.skip((page - 1).saturating_mul(per_page as u64)).limit(per_page)
    }

    /// Record eager-load directives for the named relations
    pub fn with(mut self, relations: &[&str]) -> Self {
        for relation in relations {
            if !self.eager_loads.iter().any(|r| r == relation) {
                self.eager_loads.push(relation.to_string());
            }
        }
        self
    }

    /// Get the collection name
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn wheres(&self) -> &[Constraint] {
        &self.wheres
    }

    pub fn projections(&self) -> &[String] {
        &self.projections
    }

    pub fn orders(&self) -> &[(String, OrderDirection)] {
        &self.orders
    }

    /// Get the skip value
    pub fn get_skip(&self) -> Option<u64> {
        self.skip
    }

    /// Get the limit value
    pub fn get_limit(&self) -> Option<i64> {
        self.limit
    }

    pub fn eager_loads(&self) -> &[String] {
        &self.eager_loads
    }

    /// Returns true if any constraint after the first is OR-joined
    pub fn has_or_grouping(&self) -> bool {
        self.wheres.iter().skip(1).any(|c| c.boolean == Boolean::Or)
    }

    fn push_constraint(
        mut self,
        field: &str,
        operator: Operator,
        value: Bson,
        boolean: Boolean,
    ) -> Result<Self> {
        let field = ValidatedFieldName::new(field)?.into_string();
        let value = check_value_shape(&field, operator, value)?;

        // The first constraint has nothing to join with
        let boolean = if self.wheres.is_empty() { Boolean::And } else { boolean };

        self.wheres.push(Constraint {
            field,
            operator,
            value,
            boolean,
        });
        Ok(self)
    }
}

fn check_value_shape(field: &str, operator: Operator, value: Bson) -> Result<Bson> {
    let element_type = value.element_type();
    let shape_error = |expected: &str| -> Result<Bson> {
        Err(BridgeError::Constraint(format!(
            "Operator '{}' on '{}' expects {}, got {:?}",
            operator, field, expected, element_type
        )))
    };

    match operator {
        Operator::Null | Operator::NotNull => Ok(Bson::Null),
        Operator::In | Operator::NotIn => match value {
            Bson::Array(_) => Ok(value),
            _ => shape_error("an array"),
        },
        Operator::Between => match &value {
            Bson::Array(bounds) if bounds.len() == 2 => Ok(value),
            _ => shape_error("a two-element array"),
        },
        Operator::Exists => match value {
            Bson::Boolean(_) => Ok(value),
            _ => shape_error("a boolean"),
        },
        Operator::Like | Operator::NotLike => match value {
            Bson::String(_) => Ok(value),
            _ => shape_error("a string"),
        },
        Operator::Regex => match &value {
            Bson::String(pattern) => {
                regex::Regex::new(pattern).map_err(|e| {
                    BridgeError::Constraint(format!("Invalid regex on '{}': {}", field, e))
                })?;
                Ok(value)
            }
            _ => shape_error("a string"),
        },
        _ => Ok(value),
    }
}
