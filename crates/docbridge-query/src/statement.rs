//! Native store payloads produced by the builders.

use bson::{Bson, Document as BsonDocument};

/// Native payload handed to [`Connection::execute`](crate::Connection::execute).
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Find(FindCommand),
    Count {
        collection: String,
        filter: BsonDocument,
    },
    Insert {
        collection: String,
        document: BsonDocument,
    },
    /// `update` is a full update document (`{"$set": {...}}`)
    Update {
        collection: String,
        filter: BsonDocument,
        update: BsonDocument,
        upsert: bool,
    },
    Delete {
        collection: String,
        filter: BsonDocument,
    },
    /// Relational dialect: SQL text with `$n` placeholders
    Sql {
        kind: SqlKind,
        sql: String,
        params: Vec<Bson>,
    },
}

impl Statement {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Statement::Find(_) => "find",
            Statement::Count { .. } => "count",
            Statement::Insert { .. } => "insert",
            Statement::Update { .. } => "update",
            Statement::Delete { .. } => "delete",
            Statement::Sql { .. } => "sql",
        }
    }

    /// True for statements that modify the store
    pub fn is_write(&self) -> bool {
        match self {
            Statement::Insert { .. } | Statement::Update { .. } | Statement::Delete { .. } => true,
            Statement::Sql { kind, .. } => !matches!(kind, SqlKind::Select | SqlKind::Count),
            Statement::Find(_) | Statement::Count { .. } => false,
        }
    }
}

/// Find command with the cursor options the builders emit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FindCommand {
    pub collection: String,
    pub filter: BsonDocument,
    pub projection: Option<BsonDocument>,
    pub sort: Option<BsonDocument>,
    pub skip: Option<u64>,
    pub limit: Option<i64>,
}

/// Kind of SQL statement, so a relational connection knows what to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlKind {
    Select,
    Count,
    Insert,
    Update,
    Delete,
}

/// Result of executing a [`Statement`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Documents(Vec<BsonDocument>),
    /// Id assigned by the store, if it reports one
    Inserted(Option<Bson>),
    Affected(u64),
    Count(u64),
}

/// Raw documents returned by a read.
///
/// A finite iterator that is consumed once; running the query again issues a
/// new store call.
#[derive(Debug)]
pub struct RawDocuments {
    inner: std::vec::IntoIter<BsonDocument>,
}

impl RawDocuments {
    pub fn new(documents: Vec<BsonDocument>) -> Self {
        Self {
            inner: documents.into_iter(),
        }
    }
}

impl Iterator for RawDocuments {
    type Item = BsonDocument;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for RawDocuments {}
