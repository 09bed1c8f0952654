//! Connection collaborator and the MongoDB implementation
//!
//! Builders never talk to a driver directly: they compile a [`Statement`] and
//! hand it to a [`Connection`]. The connection tells the model layer which
//! dialect it speaks, which is how a model picks its builder.

use async_trait::async_trait;
use bson::{doc, Document as BsonDocument};
use futures::TryStreamExt;
use mongodb::{
    options::{ClientOptions, ServerApi, ServerApiVersion},
    Client, Collection, Database,
};
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::statement::{Outcome, Statement};
use crate::Result;
use docbridge_common::BridgeError;

/// Query dialect spoken by a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    /// Document store (MongoDB and compatible)
    Document,
    /// SQL database, served by the relational fallback builder
    Relational,
}

/// Builder behavior switches carried by a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuilderOptions {
    /// Accept OR-joined constraints. When false, a spec using `or_where`
    /// fails with a constraint error at compile time.
    pub or_grouping: bool,
    /// Expose the store's `_id` as `id`
    pub key_alias: bool,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        Self {
            or_grouping: false,
            key_alias: true,
        }
    }
}

/// A store the builders can execute statements against.
///
/// Connections are shared as `Arc<dyn Connection>` and reused across
/// sequential operations. Retry and pooling policy belong to implementations.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    fn driver(&self) -> Driver;

    fn is_document_store(&self) -> bool {
        self.driver() == Driver::Document
    }

    /// Whether dates can be stored as a native timestamp type
    fn supports_native_dates(&self) -> bool {
        false
    }

    fn options(&self) -> BuilderOptions {
        BuilderOptions::default()
    }

    /// Execute one native statement
    async fn execute(&self, statement: Statement) -> Result<Outcome>;
}

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Minimum number of connections in the pool (default: 5)
    pub min_pool_size: Option<u32>,
    /// Maximum number of connections in the pool (default: 20)
    pub max_pool_size: Option<u32>,
    /// Maximum time a connection can remain idle before being closed (default: none)
    pub max_idle_time: Option<Duration>,
    /// Connection timeout (default: 10s)
    pub connect_timeout: Option<Duration>,
    /// Server selection timeout (default: 30s)
    pub server_selection_timeout: Option<Duration>,
    /// Application name for server logs
    pub app_name: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: Some(5),
            max_pool_size: Some(20),
            max_idle_time: None,
            connect_timeout: Some(Duration::from_secs(10)),
            server_selection_timeout: Some(Duration::from_secs(30)),
            app_name: Some("docbridge".to_string()),
        }
    }
}

/// Everything needed to open a [`MongoConnection`].
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub uri: String,
    pub pool: PoolConfig,
    pub options: BuilderOptions,
}

impl ConnectionConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            pool: PoolConfig::default(),
            options: BuilderOptions::default(),
        }
    }

    /// Create configuration from environment variables.
    ///
    /// - `MONGODB_URI` (default `mongodb://localhost:27017/docbridge`)
    /// - `MONGODB_MIN_POOL_SIZE`, `MONGODB_MAX_POOL_SIZE`
    /// - `MONGODB_APP_NAME`
    /// - `DOCBRIDGE_OR_GROUPING` (`true`/`false`, `1`/`0`)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let uri = lookup("MONGODB_URI")
            .unwrap_or_else(|| "mongodb://localhost:27017/docbridge".to_string());

        let mut config = Self::new(uri);

        if let Some(raw) = lookup("MONGODB_MIN_POOL_SIZE") {
            config.pool.min_pool_size = Some(parse_env_number("MONGODB_MIN_POOL_SIZE", &raw)?);
        }
        if let Some(raw) = lookup("MONGODB_MAX_POOL_SIZE") {
            config.pool.max_pool_size = Some(parse_env_number("MONGODB_MAX_POOL_SIZE", &raw)?);
        }
        if let Some(app) = lookup("MONGODB_APP_NAME") {
            config.pool.app_name = Some(app);
        }
        if let Some(raw) = lookup("DOCBRIDGE_OR_GROUPING") {
            config.options.or_grouping = parse_env_flag("DOCBRIDGE_OR_GROUPING", &raw)?;
        }

        Ok(config)
    }
}

fn parse_env_number(key: &str, raw: &str) -> Result<u32> {
    raw.trim().parse::<u32>().map_err(|_| {
        BridgeError::Configuration(format!("{} must be a non-negative integer, got '{}'", key, raw))
    })
}

fn parse_env_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(BridgeError::Configuration(format!(
            "{} must be a boolean, got '{}'",
            key, raw
        ))),
    }
}

/// MongoDB connection manager with pooling support
pub struct MongoConnection {
    client: Client,
    database: Database,
    database_name: String,
    options: BuilderOptions,
}

impl std::fmt::Debug for MongoConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoConnection")
            .field("database", &self.database_name)
            .field("options", &self.options)
            .finish()
    }
}

impl MongoConnection {
    /// Create a new MongoDB connection with default pool settings
    pub async fn new(connection_string: &str) -> Result<Self> {
        Self::connect(ConnectionConfig::new(connection_string)).await
    }

    /// Create a new MongoDB connection from full configuration
    #[instrument(skip(config), fields(
        min_pool_size = ?config.pool.min_pool_size,
        max_pool_size = ?config.pool.max_pool_size
    ))]
    pub async fn connect(config: ConnectionConfig) -> Result<Self> {
        if config.uri.is_empty() {
            return Err(BridgeError::Connection(
                "Connection URI cannot be empty".to_string(),
            ));
        }

        let mut client_options = ClientOptions::parse(&config.uri).await?;
        let pool = config.pool;

        if let Some(min) = pool.min_pool_size {
            client_options.min_pool_size = Some(min);
        }
        if let Some(max) = pool.max_pool_size {
            client_options.max_pool_size = Some(max);
        }
        if let Some(idle) = pool.max_idle_time {
            client_options.max_idle_time = Some(idle);
        }
        if let Some(connect) = pool.connect_timeout {
            client_options.connect_timeout = Some(connect);
        }
        if let Some(server_sel) = pool.server_selection_timeout {
            client_options.server_selection_timeout = Some(server_sel);
        }
        if let Some(app) = pool.app_name {
            client_options.app_name = Some(app);
        }

        // Set stable API version for compatibility
        let server_api = ServerApi::builder().version(ServerApiVersion::V1).build();
        client_options.server_api = Some(server_api);

        let client = Client::with_options(client_options)?;

        let database = client.default_database().ok_or_else(|| {
            BridgeError::Connection(
                "No default database specified in connection string".to_string(),
            )
        })?;

        let database_name = database.name().to_string();
        info!(database = %database_name, "MongoDB client initialized");

        Ok(Self {
            client,
            database,
            database_name,
            options: config.options,
        })
    }

    /// Get a reference to the database
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Get the database name
    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    /// Get a reference to the client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Get a collection by name (returns untyped BsonDocument collection)
    pub fn get_collection(&self, name: &str) -> Collection<BsonDocument> {
        self.database.collection(name)
    }

    /// Check if the connection is healthy by pinging the server
    pub async fn ping(&self) -> Result<bool> {
        match self.database.run_command(doc! { "ping": 1 }).await {
            Ok(_) => Ok(true),
            Err(e) => Err(BridgeError::Connection(format!("Ping failed: {}", e))),
        }
    }

    /// List all collection names in the current database
    pub async fn list_collection_names(&self) -> Result<Vec<String>> {
        let names = self.database.list_collection_names().await?;
        Ok(names)
    }
}

#[async_trait]
impl Connection for MongoConnection {
    fn name(&self) -> &str {
        &self.database_name
    }

    fn driver(&self) -> Driver {
        Driver::Document
    }

    fn supports_native_dates(&self) -> bool {
        true
    }

    fn options(&self) -> BuilderOptions {
        self.options
    }

    #[instrument(skip(self, statement), fields(db = %self.database_name, kind = statement.kind()))]
    async fn execute(&self, statement: Statement) -> Result<Outcome> {
        match statement {
            Statement::Find(cmd) => {
                let collection = self.get_collection(&cmd.collection);
                let mut find = collection.find(cmd.filter);
                if let Some(sort) = cmd.sort {
                    find = find.sort(sort);
                }
                if let Some(projection) = cmd.projection {
                    find = find.projection(projection);
                }
                if let Some(skip) = cmd.skip {
                    find = find.skip(skip);
                }
                if let Some(limit) = cmd.limit {
                    find = find.limit(limit);
                }

                let cursor = find.await?;
                let documents: Vec<BsonDocument> = cursor.try_collect().await?;
                debug!(returned = documents.len(), "find completed");
                Ok(Outcome::Documents(documents))
            }
            Statement::Count { collection, filter } => {
                let count = self.get_collection(&collection).count_documents(filter).await?;
                Ok(Outcome::Count(count))
            }
            Statement::Insert {
                collection,
                document,
            } => {
                let result = self.get_collection(&collection).insert_one(document).await?;
                Ok(Outcome::Inserted(Some(result.inserted_id)))
            }
            Statement::Update {
                collection,
                filter,
                update,
                upsert,
            } => {
                let result = self
                    .get_collection(&collection)
                    .update_many(filter, update)
                    .upsert(upsert)
                    .await?;
                let upserted = u64::from(result.upserted_id.is_some());
                Ok(Outcome::Affected(result.modified_count + upserted))
            }
            Statement::Delete { collection, filter } => {
                let result = self.get_collection(&collection).delete_many(filter).await?;
                Ok(Outcome::Affected(result.deleted_count))
            }
            Statement::Sql { .. } => Err(BridgeError::Constraint(
                "MongoDB connections cannot execute SQL statements".to_string(),
            )),
        }
    }
}
