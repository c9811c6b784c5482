//! High-level client API.

use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::error::ClientError;
use crate::watcher::ChangeStream;
use nexadb_protocol::{MessageType, ProtocolError, Record, SubscribeParams, Value};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Default result limit for queries.
pub const DEFAULT_QUERY_LIMIT: u32 = 100;

/// Default result limit for vector searches.
pub const DEFAULT_VECTOR_LIMIT: u32 = 10;

/// High-level client for NexaDB.
///
/// Cloning is cheap; clones share one connection and take turns on it.
#[derive(Clone)]
pub struct Client {
    conn: Arc<Mutex<Connection>>,
    database: String,
}

/// Filters, limit and projection for [`Client::query`].
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub filters: Record,
    pub limit: u32,
    pub projection: Option<Record>,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            filters: Record::new(),
            limit: DEFAULT_QUERY_LIMIT,
            projection: None,
        }
    }
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: impl Into<String>, condition: impl Into<Value>) -> Self {
        self.filters.insert(field.into(), condition.into());
        self
    }

    pub fn with_filters(mut self, filters: Record) -> Self {
        self.filters = filters;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Asks the server to return only `fields` (plus `_id`).
    pub fn project<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let projection = fields
            .into_iter()
            .map(|field| (field.into(), Value::Int(1)))
            .collect();
        self.projection = Some(projection);
        self
    }
}

/// HNSW parameters for [`Client::build_vector_index`]. Unset values use
/// the server's defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexParams {
    /// Maximum connections per graph layer.
    pub m: Option<u32>,
    /// Candidate list size during construction.
    pub ef_construction: Option<u32>,
}

// ============================================================================
// Request payloads
// ============================================================================

#[derive(Serialize)]
struct DatabaseRequest<'a> {
    database: &'a str,
}

#[derive(Serialize)]
struct CollectionRequest<'a> {
    collection: &'a str,
    database: &'a str,
}

#[derive(Serialize)]
struct CreateRequest<'a, D: ?Sized> {
    collection: &'a str,
    data: &'a D,
    database: &'a str,
}

#[derive(Serialize)]
struct KeyRequest<'a> {
    collection: &'a str,
    key: &'a str,
    database: &'a str,
}

#[derive(Serialize)]
struct UpdateRequest<'a, D: ?Sized> {
    collection: &'a str,
    key: &'a str,
    updates: &'a D,
    database: &'a str,
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    collection: &'a str,
    filters: &'a Record,
    limit: u32,
    database: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    projection: Option<&'a Record>,
}

#[derive(Serialize)]
struct VectorSearchRequest<'a> {
    collection: &'a str,
    vector: &'a [f32],
    limit: u32,
    dimensions: usize,
    database: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    filters: Option<&'a Record>,
}

#[derive(Serialize)]
struct BatchWriteRequest<'a, D> {
    collection: &'a str,
    documents: &'a [D],
    database: &'a str,
}

#[derive(Serialize)]
struct CreateCollectionRequest<'a> {
    collection: &'a str,
    database: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<u32>,
}

#[derive(Serialize)]
struct BuildIndexRequest<'a> {
    collection: &'a str,
    database: &'a str,
    #[serde(rename = "M", skip_serializing_if = "Option::is_none")]
    m: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ef_construction: Option<u32>,
}

impl Client {
    /// Creates a new client with the given configuration.
    pub fn new(config: ConnectionConfig) -> Self {
        let database = config.database.clone();
        Self {
            conn: Arc::new(Mutex::new(Connection::new(config))),
            database,
        }
    }

    /// Returns a client sharing this connection that targets `database`.
    pub fn with_database(&self, database: impl Into<String>) -> Self {
        Self {
            conn: self.conn.clone(),
            database: database.into(),
        }
    }

    /// Database the document and collection helpers target.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Connects to the server.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.conn.lock().await.connect().await
    }

    /// Closes the connection.
    ///
    /// Waits for an active [`Client::watch`] stream to be stopped or dropped.
    pub async fn disconnect(&self) {
        self.conn.lock().await.disconnect().await
    }

    /// Returns whether the client is connected.
    ///
    /// Waits for an active [`Client::watch`] stream to be stopped or dropped.
    pub async fn is_connected(&self) -> bool {
        self.conn.lock().await.is_connected()
    }

    /// Sends a raw request and returns the reply record.
    pub async fn exchange<T>(
        &self,
        message_type: MessageType,
        payload: &T,
    ) -> Result<Record, ClientError>
    where
        T: Serialize + ?Sized,
    {
        self.conn.lock().await.exchange(message_type, payload).await
    }

    // =========================================================================
    // Helper methods
    // =========================================================================

    fn take_list(reply: &mut Record, field: &str) -> Vec<Value> {
        match reply.remove(field) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        }
    }

    fn take_names(reply: &mut Record, field: &str) -> Vec<String> {
        Self::take_list(reply, field)
            .into_iter()
            .filter_map(|item| match item {
                Value::String(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    // =========================================================================
    // System operations
    // =========================================================================

    /// Pings the server.
    pub async fn ping(&self) -> Result<Record, ClientError> {
        self.exchange(MessageType::Ping, &Record::new()).await
    }

    // =========================================================================
    // Document operations
    // =========================================================================

    /// Inserts a document and returns the server's reply.
    pub async fn create<D>(&self, collection: &str, data: &D) -> Result<Record, ClientError>
    where
        D: Serialize + ?Sized,
    {
        let request = CreateRequest {
            collection,
            data,
            database: &self.database,
        };
        self.exchange(MessageType::Create, &request).await
    }

    /// Inserts a document and returns its id.
    pub async fn insert<D>(&self, collection: &str, data: &D) -> Result<String, ClientError>
    where
        D: Serialize + ?Sized,
    {
        let mut reply = self.create(collection, data).await?;
        match reply.remove("document_id") {
            Some(Value::String(id)) => Ok(id),
            _ => Err(ProtocolError::InvalidRecord("reply has no document_id").into()),
        }
    }

    /// Reads a document by id. A missing document is `Ok(None)`.
    pub async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, ClientError> {
        let request = KeyRequest {
            collection,
            key,
            database: &self.database,
        };
        match self.exchange(MessageType::Read, &request).await {
            Ok(mut reply) => Ok(reply.remove("document").filter(|doc| !doc.is_null())),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Applies field updates to a document.
    pub async fn update<D>(
        &self,
        collection: &str,
        key: &str,
        updates: &D,
    ) -> Result<Record, ClientError>
    where
        D: Serialize + ?Sized,
    {
        let request = UpdateRequest {
            collection,
            key,
            updates,
            database: &self.database,
        };
        self.exchange(MessageType::Update, &request).await
    }

    /// Deletes a document.
    pub async fn delete(&self, collection: &str, key: &str) -> Result<Record, ClientError> {
        let request = KeyRequest {
            collection,
            key,
            database: &self.database,
        };
        self.exchange(MessageType::Delete, &request).await
    }

    /// Returns the documents matching `query`.
    pub async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Value>, ClientError> {
        let request = QueryRequest {
            collection,
            filters: &query.filters,
            limit: query.limit,
            database: &self.database,
            projection: query.projection.as_ref(),
        };
        let mut reply = self.exchange(MessageType::Query, &request).await?;
        Ok(Self::take_list(&mut reply, "documents"))
    }

    /// Returns the documents nearest to `vector`, with similarity scores.
    pub async fn vector_search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: u32,
        filters: Option<&Record>,
    ) -> Result<Vec<Value>, ClientError> {
        let request = VectorSearchRequest {
            collection,
            vector,
            limit,
            dimensions: vector.len(),
            database: &self.database,
            filters,
        };
        let mut reply = self.exchange(MessageType::VectorSearch, &request).await?;
        Ok(Self::take_list(&mut reply, "results"))
    }

    /// Inserts many documents in one request.
    pub async fn batch_write<D>(
        &self,
        collection: &str,
        documents: &[D],
    ) -> Result<Record, ClientError>
    where
        D: Serialize,
    {
        let request = BatchWriteRequest {
            collection,
            documents,
            database: &self.database,
        };
        self.exchange(MessageType::BatchWrite, &request).await
    }

    /// Runs a query and returns the result in TOON form.
    pub async fn query_toon(&self, collection: &str, query: &Query) -> Result<Record, ClientError> {
        let request = QueryRequest {
            collection,
            filters: &query.filters,
            limit: query.limit,
            database: &self.database,
            projection: None,
        };
        self.exchange(MessageType::QueryToon, &request).await
    }

    /// Exports a whole collection in TOON form.
    pub async fn export_toon(&self, collection: &str) -> Result<Record, ClientError> {
        let request = CollectionRequest {
            collection,
            database: &self.database,
        };
        self.exchange(MessageType::ExportToon, &request).await
    }

    // =========================================================================
    // Collection operations
    // =========================================================================

    /// Lists the collections of the current database.
    pub async fn list_collections(&self) -> Result<Vec<String>, ClientError> {
        let request = DatabaseRequest {
            database: &self.database,
        };
        let mut reply = self.exchange(MessageType::ListCollections, &request).await?;
        Ok(Self::take_names(&mut reply, "collections"))
    }

    /// Creates a collection, optionally sized for vectors.
    pub async fn create_collection(
        &self,
        name: &str,
        dimensions: Option<u32>,
    ) -> Result<Record, ClientError> {
        let request = CreateCollectionRequest {
            collection: name,
            database: &self.database,
            dimensions,
        };
        self.exchange(MessageType::CreateCollection, &request).await
    }

    /// Drops a collection and its documents.
    pub async fn drop_collection(&self, name: &str) -> Result<Record, ClientError> {
        let request = CollectionRequest {
            collection: name,
            database: &self.database,
        };
        self.exchange(MessageType::DropCollection, &request).await
    }

    /// Builds an HNSW vector index over a collection.
    pub async fn build_vector_index(
        &self,
        collection: &str,
        params: IndexParams,
    ) -> Result<Record, ClientError> {
        let request = BuildIndexRequest {
            collection,
            database: &self.database,
            m: params.m,
            ef_construction: params.ef_construction,
        };
        self.exchange(MessageType::BuildVectorIndex, &request).await
    }

    // =========================================================================
    // Database operations
    // =========================================================================

    /// Lists all databases.
    pub async fn list_databases(&self) -> Result<Vec<String>, ClientError> {
        let mut reply = self.exchange(MessageType::ListDatabases, &Record::new()).await?;
        Ok(Self::take_names(&mut reply, "databases"))
    }

    /// Creates a database. An existing name fails with a duplicate error.
    pub async fn create_database(&self, name: &str) -> Result<Record, ClientError> {
        self.exchange(MessageType::CreateDatabase, &DatabaseRequest { database: name })
            .await
    }

    /// Drops a database and everything in it.
    pub async fn drop_database(&self, name: &str) -> Result<Record, ClientError> {
        self.exchange(MessageType::DropDatabase, &DatabaseRequest { database: name })
            .await
    }

    /// Returns collection and document counts for a database.
    pub async fn get_database_stats(&self, name: &str) -> Result<Record, ClientError> {
        self.exchange(MessageType::GetDatabaseStats, &DatabaseRequest { database: name })
            .await
    }

    // =========================================================================
    // Change streams
    // =========================================================================

    /// Starts a change stream.
    ///
    /// The stream holds the connection lock until it is stopped or dropped.
    /// Every other call on this client or its clones waits for it, including
    /// [`Client::is_connected`] and [`Client::disconnect`]. To end a watch
    /// from elsewhere, signal the task that owns the stream and let it call
    /// [`ChangeStream::stop`].
    pub async fn watch(
        &self,
        params: SubscribeParams,
    ) -> Result<ChangeStream<OwnedMutexGuard<Connection>>, ClientError> {
        let conn = self.conn.clone().lock_owned().await;
        ChangeStream::start(conn, params).await
    }
}
