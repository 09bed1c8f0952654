//! In-process document store
//!
//! `MemoryConnection` executes the same statements as `MongoConnection`
//! against collections held in memory. It generates sequential integer ids,
//! enforces `_id` uniqueness, counts the calls it receives and can be switched
//! offline to simulate transport failures. A relational flavor records SQL
//! statements and answers them with empty results.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bson::{Bson, Document as BsonDocument};
use parking_lot::Mutex;
use tracing::{debug, instrument};

use crate::connection::{BuilderOptions, Connection, Driver};
use crate::filter::{apply_update, matches, project, sort_documents, values_equal};
use crate::statement::{FindCommand, Outcome, SqlKind, Statement};
use crate::Result;
use docbridge_common::BridgeError;

#[derive(Debug)]
struct MemoryState {
    collections: HashMap<String, Vec<BsonDocument>>,
    next_id: i64,
    log: Vec<Statement>,
}

/// Connection backed by in-process collections.
#[derive(Debug)]
pub struct MemoryConnection {
    name: String,
    driver: Driver,
    options: BuilderOptions,
    native_dates: bool,
    offline: AtomicBool,
    reads: AtomicU64,
    writes: AtomicU64,
    state: Mutex<MemoryState>,
}

impl Default for MemoryConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConnection {
    /// Document-store connection with ids starting at 1
    pub fn new() -> Self {
        Self {
            name: "memory".to_string(),
            driver: Driver::Document,
            options: BuilderOptions::default(),
            native_dates: false,
            offline: AtomicBool::new(false),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            state: Mutex::new(MemoryState {
                collections: HashMap::new(),
                next_id: 1,
                log: Vec::new(),
            }),
        }
    }

    /// Relational-flavored connection that records SQL statements
    pub fn relational() -> Self {
        Self {
            name: "memory-sql".to_string(),
            driver: Driver::Relational,
            ..Self::new()
        }
    }

    pub fn with_options(mut self, options: BuilderOptions) -> Self {
        self.options = options;
        self
    }

    /// Store dates as native timestamps instead of formatted strings
    pub fn with_native_dates(mut self, native: bool) -> Self {
        self.native_dates = native;
        self
    }

    /// Set the next generated id
    pub fn set_next_id(&self, id: i64) {
        self.state.lock().next_id = id;
    }

    /// While offline every call fails with a connection error
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Insert documents directly, bypassing call counters
    pub fn seed(&self, collection: &str, documents: Vec<BsonDocument>) {
        self.state
            .lock()
            .collections
            .entry(collection.to_string())
            .or_default()
            .extend(documents);
    }

    /// Snapshot of a collection's documents in insertion order
    pub fn documents(&self, collection: &str) -> Vec<BsonDocument> {
        self.state
            .lock()
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of read statements received
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of write statements received
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Every statement received, in order
    pub fn statements(&self) -> Vec<Statement> {
        self.state.lock().log.clone()
    }

    fn find(state: &MemoryState, cmd: &FindCommand) -> Result<Vec<BsonDocument>> {
        let mut found = Vec::new();
        if let Some(docs) = state.collections.get(&cmd.collection) {
            for doc in docs {
                if matches(doc, &cmd.filter)? {
                    found.push(doc.clone());
                }
            }
        }

        if let Some(sort) = &cmd.sort {
            sort_documents(&mut found, sort);
        }

        let skip = cmd.skip.unwrap_or(0) as usize;
        let limit = match cmd.limit {
            Some(0) | None => usize::MAX,
            Some(n) => n.unsigned_abs() as usize,
        };

        Ok(found
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|doc| match &cmd.projection {
                Some(projection) => project(&doc, projection),
                None => doc,
            })
            .collect())
    }

    fn insert(state: &mut MemoryState, collection: &str, mut document: BsonDocument) -> Result<Bson> {
        let id = match document.get("_id") {
            Some(id) => id.clone(),
            None => {
                let id = Bson::Int64(state.next_id);
                state.next_id += 1;
                document.insert("_id", id.clone());
                id
            }
        };

        let docs = state.collections.entry(collection.to_string()).or_default();
        if docs
            .iter()
            .any(|d| d.get("_id").map_or(false, |existing| values_equal(existing, &id)))
        {
            return Err(BridgeError::Conflict(format!(
                "duplicate key in '{}': _id {}",
                collection, id
            )));
        }

        docs.push(document);
        Ok(id)
    }

    fn update(
        state: &mut MemoryState,
        collection: &str,
        filter: &BsonDocument,
        update: &BsonDocument,
        upsert: bool,
    ) -> Result<u64> {
        let mut modified = 0;
        let mut matched = 0;
        if let Some(docs) = state.collections.get_mut(collection) {
            // Nothing is written unless every matching document updates cleanly
            let mut staged = Vec::new();
            for (index, doc) in docs.iter().enumerate() {
                if !matches(doc, filter)? {
                    continue;
                }
                matched += 1;
                let mut next = doc.clone();
                apply_update(&mut next, update)?;
                if next != *doc {
                    staged.push((index, next));
                }
            }
            modified = staged.len() as u64;
            for (index, next) in staged {
                docs[index] = next;
            }
        }

        if matched == 0 && upsert {
            let mut seed = BsonDocument::new();
            for (field, value) in filter {
                if field.starts_with('$') {
                    continue;
                }
                let is_operator = matches!(value, Bson::Document(d) if d.keys().any(|k| k.starts_with('$')));
                if !is_operator {
                    seed.insert(field.clone(), value.clone());
                }
            }
            apply_update(&mut seed, update)?;
            Self::insert(state, collection, seed)?;
            modified += 1;
        }

        Ok(modified)
    }

    fn delete(state: &mut MemoryState, collection: &str, filter: &BsonDocument) -> Result<u64> {
        let Some(docs) = state.collections.get_mut(collection) else {
            return Ok(0);
        };
        let mut keep = Vec::with_capacity(docs.len());
        for doc in docs.iter() {
            keep.push(!matches(doc, filter)?);
        }
        let before = docs.len();
        let mut flags = keep.into_iter();
        docs.retain(|_| flags.next().unwrap_or(true));
        Ok((before - docs.len()) as u64)
    }

    fn execute_document(state: &mut MemoryState, statement: Statement) -> Result<Outcome> {
        match statement {
            Statement::Find(cmd) => Ok(Outcome::Documents(Self::find(state, &cmd)?)),
            Statement::Count { collection, filter } => {
                let cmd = FindCommand {
                    collection,
                    filter,
                    ..FindCommand::default()
                };
                Ok(Outcome::Count(Self::find(state, &cmd)?.len() as u64))
            }
            Statement::Insert {
                collection,
                document,
            } => Ok(Outcome::Inserted(Some(Self::insert(state, &collection, document)?))),
            Statement::Update {
                collection,
                filter,
                update,
                upsert,
            } => Ok(Outcome::Affected(Self::update(
                state,
                &collection,
                &filter,
                &update,
                upsert,
            )?)),
            Statement::Delete { collection, filter } => {
                Ok(Outcome::Affected(Self::delete(state, &collection, &filter)?))
            }
            Statement::Sql { .. } => Err(BridgeError::Constraint(
                "Document-store connections cannot execute SQL statements".to_string(),
            )),
        }
    }

    fn execute_relational(statement: &Statement) -> Result<Outcome> {
        match statement {
            Statement::Sql { kind, .. } => Ok(match kind {
                SqlKind::Select => Outcome::Documents(Vec::new()),
                SqlKind::Count => Outcome::Count(0),
                SqlKind::Insert => Outcome::Inserted(None),
                SqlKind::Update | SqlKind::Delete => Outcome::Affected(0),
            }),
            other => Err(BridgeError::Constraint(format!(
                "Relational connections cannot execute '{}' document statements",
                other.kind()
            ))),
        }
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn driver(&self) -> Driver {
        self.driver
    }

    fn supports_native_dates(&self) -> bool {
        self.native_dates
    }

    fn options(&self) -> BuilderOptions {
        self.options
    }

    #[instrument(skip(self, statement), fields(conn = %self.name, kind = statement.kind()))]
    async fn execute(&self, statement: Statement) -> Result<Outcome> {
        if statement.is_write() {
            self.writes.fetch_add(1, Ordering::SeqCst);
        } else {
            self.reads.fetch_add(1, Ordering::SeqCst);
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(BridgeError::Connection(format!(
                "connection '{}' is offline",
                self.name
            )));
        }

        let mut state = self.state.lock();
        state.log.push(statement.clone());

        let outcome = match self.driver {
            Driver::Document => Self::execute_document(&mut state, statement),
            Driver::Relational => Self::execute_relational(&statement),
        };
        debug!(ok = outcome.is_ok(), "memory statement executed");
        outcome
    }
}
