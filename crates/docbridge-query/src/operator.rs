//! Constraint operators and ordering.

use std::fmt;
use std::str::FromStr;

use docbridge_common::BridgeError;

/// Query comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// Equal (=)
    Eq,
    /// Not equal (!=, <>)
    Ne,
    /// Greater than (>)
    Gt,
    /// Greater than or equal (>=)
    Gte,
    /// Less than (<)
    Lt,
    /// Less than or equal (<=)
    Lte,
    /// Membership in a list
    In,
    /// Exclusion from a list
    NotIn,
    /// SQL-style pattern with `%` and `_` wildcards
    Like,
    /// Negated pattern
    NotLike,
    /// Field is null or missing
    Null,
    /// Field is present and not null
    NotNull,
    /// Inclusive range given as a two-element list
    Between,
    /// Field presence test, value is a bool
    Exists,
    /// Regular expression match
    Regex,
}

impl Operator {
    /// Returns the SQL operator string.
    pub fn to_sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::Like => "LIKE",
            Operator::NotLike => "NOT LIKE",
            Operator::Null => "IS NULL",
            Operator::NotNull => "IS NOT NULL",
            Operator::Between => "BETWEEN",
            Operator::Exists => "EXISTS",
            Operator::Regex => "~",
        }
    }

    /// Returns true if the operator takes no comparison value.
    pub fn is_unary(&self) -> bool {
        matches!(self, Operator::Null | Operator::NotNull)
    }
}

impl FromStr for Operator {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let op = match normalized.as_str() {
            "=" | "==" => Operator::Eq,
            "!=" | "<>" => Operator::Ne,
            ">" => Operator::Gt,
            ">=" => Operator::Gte,
            "<" => Operator::Lt,
            "<=" => Operator::Lte,
            "in" => Operator::In,
            "not in" | "nin" => Operator::NotIn,
            "like" => Operator::Like,
            "not like" => Operator::NotLike,
            "null" | "is null" => Operator::Null,
            "not null" | "is not null" => Operator::NotNull,
            "between" => Operator::Between,
            "exists" => Operator::Exists,
            "regex" | "regexp" => Operator::Regex,
            _ => {
                return Err(BridgeError::Constraint(format!(
                    "Unsupported operator '{}'",
                    s
                )))
            }
        };
        Ok(op)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_sql())
    }
}

/// How a constraint joins the ones before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Boolean {
    #[default]
    And,
    Or,
}

/// Sort order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    /// Ascending order
    Asc,
    /// Descending order
    Desc,
}

impl OrderDirection {
    /// Returns the SQL order direction string.
    pub fn to_sql(&self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }

    /// Returns the document-store sort value (1 or -1).
    pub fn to_sort_value(&self) -> i32 {
        match self {
            OrderDirection::Asc => 1,
            OrderDirection::Desc => -1,
        }
    }
}
