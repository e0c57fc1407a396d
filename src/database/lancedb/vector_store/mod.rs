
use super::{ChunkMetadata, EmbeddingRecord, MetadataField, Predicate, SearchResult, VectorIndex};
use crate::{RagError, Result, config::Config};
use arrow::array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatchIterator, StringArray,
    UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType, Table,
    query::{ExecutableQuery, QueryBase, Select},
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const TABLE_NAME: &str = "embeddings";

/// Vector database store using LanceDB for similarity search
pub struct VectorStore {
    connection: Connection,
    table_name: String,
    vector_dimension: usize,
}

impl VectorStore {
    /// Open the store under the configured base directory, sized for the embedding model
    #[inline]
    pub async fn new(config: &Config) -> Result<Self> {
        Self::open(
            &config.vector_database_path(),
            config.ollama.embedding_dimension as usize,
        )
        .await
    }

    /// Open or create the store at `db_path`.
    ///
    /// An existing table built for a different vector dimension is a configuration error.
    #[inline]
    pub async fn open(db_path: &Path, vector_dimension: usize) -> Result<Self> {
        if vector_dimension == 0 {
            return Err(RagError::Config(
                "Vector dimension must be greater than zero".to_string(),
            ));
        }

        debug!("Initializing LanceDB at path: {:?}", db_path);

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                RagError::Database(format!("Failed to create vector database directory: {}", e))
            })?;
        }

        let uri = db_path.to_string_lossy().to_string();

        let connection = match lancedb::connect(&uri).execute().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("Failed to connect to LanceDB: {}", e);

                let error_msg = e.to_string().to_lowercase();
                if error_msg.contains("corrupt")
                    || error_msg.contains("invalid")
                    || error_msg.contains("malformed")
                {
                    warn!("Database corruption detected, attempting recovery");
                    Self::attempt_corruption_recovery(db_path)?;

                    lancedb::connect(&uri).execute().await.map_err(|e| {
                        RagError::Database(format!(
                            "Failed to connect to LanceDB after recovery: {}",
                            e
                        ))
                    })?
                } else {
                    return Err(RagError::Database(format!(
                        "Failed to connect to LanceDB: {}",
                        e
                    )));
                }
            }
        };

        let store = Self {
            connection,
            table_name: TABLE_NAME.to_string(),
            vector_dimension,
        };

        store.initialize_table_with_recovery().await?;

        info!(
            "Vector store initialized with {} dimensions",
            store.vector_dimension
        );
        Ok(store)
    }

    #[inline]
    pub fn vector_dimension(&self) -> usize {
        self.vector_dimension
    }

    async fn initialize_table(&self) -> Result<()> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to list tables: {}", e)))?;

        if table_names.contains(&self.table_name) {
            let existing = self.detect_existing_vector_dimension().await?;
            if existing != self.vector_dimension {
                return Err(RagError::Config(format!(
                    "Vector index was built for {}-dimensional embeddings but the embedding model produces {}",
                    existing, self.vector_dimension
                )));
            }
            debug!("Embeddings table already exists with {} dimensions", existing);
            return Ok(());
        }

        self.connection
            .create_empty_table(&self.table_name, self.create_schema())
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to create table: {}", e)))?;

        info!(
            "Embeddings table created with {} dimensions",
            self.vector_dimension
        );
        Ok(())
    }

    async fn detect_existing_vector_dimension(&self) -> Result<usize> {
        let table = self.table().await?;

        let schema = table
            .schema()
            .await
            .map_err(|e| RagError::Database(format!("Failed to get table schema: {}", e)))?;

        schema
            .fields()
            .iter()
            .find(|field| field.name() == "vector")
            .and_then(|field| match field.data_type() {
                DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
                _ => None,
            })
            .ok_or_else(|| {
                RagError::Database(
                    "Could not find vector column or determine dimension".to_string(),
                )
            })
    }

    fn create_schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.vector_dimension as i32,
                ),
                false,
            ),
            Field::new("text", DataType::Utf8, false),
            Field::new("owner_user_id", DataType::Int64, false),
            Field::new("document_id", DataType::Int64, false),
            Field::new("chunk_index", DataType::UInt32, false),
            Field::new("source", DataType::Utf8, false),
            Field::new("created_at", DataType::Utf8, false),
        ]))
    }

    async fn table(&self) -> Result<Table> {
        self.connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to open table: {}", e)))
    }

    fn create_record_batch(&self, records: &[EmbeddingRecord]) -> Result<RecordBatch> {
        let len = records.len();
        let created_at = Utc::now().to_rfc3339();

        let mut ids = Vec::with_capacity(len);
        let mut flat_values = Vec::with_capacity(len * self.vector_dimension);
        let mut texts = Vec::with_capacity(len);
        let mut owners = Vec::with_capacity(len);
        let mut documents = Vec::with_capacity(len);
        let mut chunk_indices = Vec::with_capacity(len);
        let mut sources = Vec::with_capacity(len);

        for record in records {
            ids.push(Uuid::new_v4().to_string());
            flat_values.extend_from_slice(&record.vector);
            texts.push(record.text.as_str());
            owners.push(record.metadata.owner_user_id);
            documents.push(record.metadata.document_id);
            chunk_indices.push(record.metadata.chunk_index);
            sources.push(record.metadata.source.as_str());
        }

        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let vector_array = FixedSizeListArray::try_new(
            field,
            self.vector_dimension as i32,
            Arc::new(Float32Array::from(flat_values)),
            None,
        )
        .map_err(|e| RagError::Database(format!("Failed to create vector array: {}", e)))?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(vector_array),
            Arc::new(StringArray::from(texts)),
            Arc::new(Int64Array::from(owners)),
            Arc::new(Int64Array::from(documents)),
            Arc::new(UInt32Array::from(chunk_indices)),
            Arc::new(StringArray::from(sources)),
            Arc::new(StringArray::from(vec![created_at.as_str(); len])),
        ];

        RecordBatch::try_new(self.create_schema(), arrays)
            .map_err(|e| RagError::Database(format!("Failed to create record batch: {}", e)))
    }

    /// Fail if any `(owner, document, chunk_index)` in `records` is already stored
    async fn ensure_not_indexed(&self, table: &Table, records: &[EmbeddingRecord]) -> Result<()> {
        let mut chunks_by_document: BTreeMap<(i64, i64), BTreeSet<u32>> = BTreeMap::new();
        for record in records {
            chunks_by_document
                .entry((record.metadata.owner_user_id, record.metadata.document_id))
                .or_default()
                .insert(record.metadata.chunk_index);
        }

        for ((owner_user_id, document_id), chunk_indices) in chunks_by_document {
            let predicate = Predicate::and(vec![
                Predicate::eq(MetadataField::OwnerUserId, owner_user_id),
                Predicate::eq(MetadataField::DocumentId, document_id),
                Predicate::or(
                    chunk_indices
                        .into_iter()
                        .map(|index| Predicate::eq(MetadataField::ChunkIndex, i64::from(index)))
                        .collect(),
                ),
            ]);

            let existing = table
                .count_rows(Some(predicate.to_sql()))
                .await
                .map_err(|e| RagError::Database(format!("Failed to count rows: {}", e)))?;

            if existing > 0 {
                return Err(RagError::AlreadyIndexed {
                    owner_user_id,
                    document_id,
                });
            }
        }

        Ok(())
    }

    async fn parse_search_results_stream(
        &self,
        mut results: lancedb::arrow::SendableRecordBatchStream,
    ) -> Result<Vec<SearchResult>> {
        let mut search_results = Vec::new();

        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| RagError::Database(format!("Failed to read result stream: {}", e)))?
        {
            search_results.extend(Self::parse_search_batch(&batch)?);
        }

        debug!("Parsed {} search results from stream", search_results.len());
        Ok(search_results)
    }

    fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<SearchResult>> {
        let texts = column::<StringArray>(batch, "text")?;
        let owners = column::<Int64Array>(batch, "owner_user_id")?;
        let documents = column::<Int64Array>(batch, "document_id")?;
        let chunk_indices = column::<UInt32Array>(batch, "chunk_index")?;
        let sources = column::<StringArray>(batch, "source")?;
        let distances = batch
            .column_by_name("_distance")
            .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

        let results = (0..batch.num_rows())
            .map(|row| {
                let distance = distances
                    .map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

                SearchResult {
                    text: texts.value(row).to_string(),
                    metadata: ChunkMetadata {
                        owner_user_id: owners.value(row),
                        document_id: documents.value(row),
                        chunk_index: chunk_indices.value(row),
                        source: sources.value(row).to_string(),
                    },
                    // cosine distance lies in [0, 2]
                    similarity_score: 1.0 - distance,
                    distance,
                }
            })
            .collect();

        Ok(results)
    }

    /// Every `(owner_user_id, document_id)` pair that has at least one stored chunk
    #[inline]
    pub async fn list_document_scopes(&self) -> Result<BTreeSet<(i64, i64)>> {
        let table = self.table().await?;

        let mut stream = table
            .query()
            .select(Select::columns(&["owner_user_id", "document_id"]))
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to scan table: {}", e)))?;

        let mut scopes = BTreeSet::new();
        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(|e| RagError::Database(format!("Failed to read scan stream: {}", e)))?
        {
            let owners = column::<Int64Array>(&batch, "owner_user_id")?;
            let documents = column::<Int64Array>(&batch, "document_id")?;
            for row in 0..batch.num_rows() {
                scopes.insert((owners.value(row), documents.value(row)));
            }
        }

        Ok(scopes)
    }

    /// Optimize the vector database by compacting and reorganizing data
    #[inline]
    pub async fn optimize(&self) -> Result<()> {
        debug!("Optimizing vector database");

        self.table()
            .await?
            .optimize(lancedb::table::OptimizeAction::All)
            .await
            .map_err(|e| RagError::Database(format!("Failed to optimize table: {}", e)))?;

        info!("Vector database optimization completed");
        Ok(())
    }

    /// Build an ANN index on the vector column. LanceDB needs a few hundred rows to train it.
    #[inline]
    pub async fn create_vector_index(&self) -> Result<()> {
        debug!("Creating vector index for improved search performance");

        self.table()
            .await?
            .create_index(&["vector"], lancedb::index::Index::Auto)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to create vector index: {}", e)))?;

        info!("Vector index created successfully");
        Ok(())
    }

    fn attempt_corruption_recovery(db_path: &Path) -> Result<()> {
        warn!("Attempting database corruption recovery at {:?}", db_path);

        if db_path.exists() {
            let backup_path = db_path.with_extension("corrupted_backup");
            if let Err(e) = std::fs::rename(db_path, &backup_path) {
                error!("Failed to backup corrupted database: {}", e);
            } else {
                info!("Corrupted database backed up to {:?}", backup_path);
            }
        }

        if db_path.exists() {
            std::fs::remove_dir_all(db_path).map_err(|e| {
                RagError::Database(format!("Failed to remove corrupted database: {}", e))
            })?;
        }

        info!("Database corruption recovery completed");
        Ok(())
    }

    /// Initialize the table, rebuilding it when LanceDB reports it unreadable.
    /// Configuration errors such as a dimension mismatch are returned untouched.
    async fn initialize_table_with_recovery(&self) -> Result<()> {
        match self.initialize_table().await {
            Err(RagError::Database(message)) => {
                let error_msg = message.to_lowercase();
                if error_msg.contains("corrupt")
                    || error_msg.contains("invalid")
                    || error_msg.contains("schema")
                {
                    warn!("Table corruption detected during initialization: {}", message);

                    if let Err(drop_err) = self.drop_table_if_exists().await {
                        warn!("Failed to drop corrupted table: {}", drop_err);
                    }

                    self.initialize_table().await.map_err(|e| {
                        RagError::Database(format!(
                            "Failed to recreate table after corruption: {}",
                            e
                        ))
                    })
                } else {
                    Err(RagError::Database(message))
                }
            }
            other => other,
        }
    }

    async fn drop_table_if_exists(&self) -> Result<()> {
        let table_names =
            self.connection.table_names().execute().await.map_err(|e| {
                RagError::Database(format!("Failed to list tables for drop: {}", e))
            })?;

        if table_names.contains(&self.table_name) {
            info!("Dropping existing embeddings table");
            self.connection
                .drop_table(&self.table_name)
                .await
                .map_err(|e| RagError::Database(format!("Failed to drop table: {}", e)))?;
        }

        Ok(())
    }

    /// Check that the embeddings table exists and can be read
    #[inline]
    pub async fn validate_integrity(&self) -> Result<bool> {
        debug!("Validating database integrity");

        let table_names = match self.connection.table_names().execute().await {
            Ok(names) => names,
            Err(e) => {
                error!("Failed to list tables during integrity check: {}", e);
                return Ok(false);
            }
        };

        if !table_names.contains(&self.table_name) {
            warn!("Embeddings table missing during integrity check");
            return Ok(false);
        }

        match self.connection.open_table(&self.table_name).execute().await {
            Ok(table) => match table.count_rows(None).await {
                Ok(count) => {
                    debug!("Database integrity check passed, {} rows found", count);
                    Ok(true)
                }
                Err(e) => {
                    error!("Failed to count rows during integrity check: {}", e);
                    Ok(false)
                }
            },
            Err(e) => {
                error!("Failed to open table during integrity check: {}", e);
                Ok(false)
            }
        }
    }

    /// Drop and recreate the embeddings table. All stored vectors are lost.
    #[inline]
    pub async fn repair_database(&self) -> Result<()> {
        info!("Starting database repair");

        if let Err(e) = self.drop_table_if_exists().await {
            warn!("Failed to drop table during repair: {}", e);
        }

        self.initialize_table().await.map_err(|e| {
            RagError::Database(format!("Failed to recreate table during repair: {}", e))
        })?;

        info!("Database repair completed successfully");
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for VectorStore {
    async fn upsert(&self, records: Vec<EmbeddingRecord>) -> Result<usize> {
        if records.is_empty() {
            debug!("No embeddings to store");
            return Ok(0);
        }

        if let Some(bad) = records
            .iter()
            .find(|r| r.vector.len() != self.vector_dimension)
        {
            return Err(RagError::Database(format!(
                "Embedding for {} has {} dimensions, index expects {}",
                bad.metadata.source,
                bad.vector.len(),
                self.vector_dimension
            )));
        }

        let table = self.table().await?;
        self.ensure_not_indexed(&table, &records).await?;

        let record_batch = self.create_record_batch(&records)?;
        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);

        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to insert embeddings: {}", e)))?;

        debug!("Stored {} embeddings", records.len());
        Ok(records.len())
    }

    async fn search(
        &self,
        query_vector: &[f32],
        filter: &Predicate,
        k: usize,
    ) -> Result<Vec<SearchResult>> {
        if filter.required_owner().is_none() {
            return Err(RagError::Database(
                "Vector search requires an owner_user_id constraint".to_string(),
            ));
        }

        if query_vector.len() != self.vector_dimension {
            return Err(RagError::Database(format!(
                "Query vector has {} dimensions, index expects {}",
                query_vector.len(),
                self.vector_dimension
            )));
        }

        if k == 0 {
            return Ok(Vec::new());
        }

        debug!("Searching for {} nearest chunks where {}", k, filter);

        let results = self
            .table()
            .await?
            .vector_search(query_vector)
            .map_err(|e| RagError::Database(format!("Failed to create vector search: {}", e)))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .only_if(filter.to_sql())
            .limit(k)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to execute search: {}", e)))?;

        let mut matches = self.parse_search_results_stream(results).await?;

        let before = matches.len();
        matches.retain(|result| filter.matches(&result.metadata));
        if matches.len() != before {
            warn!(
                "Dropped {} search results outside the requested scope",
                before - matches.len()
            );
        }

        matches.sort_by(|a, b| {
            b.similarity_score
                .total_cmp(&a.similarity_score)
                .then(a.metadata.document_id.cmp(&b.metadata.document_id))
                .then(a.metadata.chunk_index.cmp(&b.metadata.chunk_index))
        });
        matches.truncate(k);

        Ok(matches)
    }

    async fn delete(&self, filter: &Predicate) -> Result<u64> {
        if filter.required_owner().is_none() {
            return Err(RagError::Database(
                "Deleting embeddings requires an owner_user_id constraint".to_string(),
            ));
        }

        let table = self.table().await?;
        let predicate = filter.to_sql();

        let matching = table
            .count_rows(Some(predicate.clone()))
            .await
            .map_err(|e| RagError::Database(format!("Failed to count rows: {}", e)))?;

        if matching == 0 {
            debug!("No embeddings match {}", predicate);
            return Ok(0);
        }

        table
            .delete(&predicate)
            .await
            .map_err(|e| RagError::Database(format!("Failed to delete embeddings: {}", e)))?;

        info!("Deleted {} embeddings where {}", matching, predicate);
        Ok(matching as u64)
    }

    async fn count(&self, filter: Option<&Predicate>) -> Result<u64> {
        let count = self
            .table()
            .await?
            .count_rows(filter.map(Predicate::to_sql))
            .await
            .map_err(|e| RagError::Database(format!("Failed to count rows: {}", e)))?;

        Ok(count as u64)
    }
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::Database(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| RagError::Database(format!("Invalid {} column type", name)))
}
