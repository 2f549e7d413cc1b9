//! Per-video processing ledger.
//!
//! One document per video id in the `processed_videos` collection. Writes
//! are upsert-merges of the fields a transition touches, so concurrent
//! writers resolve last-writer-wins per field and nothing is ever deleted.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chap_models::{NewVideoMessage, ProcessingRecord, ProcessingStats, ProcessingStatus};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::client::FirestoreClient;
use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::record_ledger_write_failure;
use crate::types::{Document, StructuredQuery, ToFirestoreValue, Value};

/// Ledger collection name.
pub const PROCESSED_VIDEOS_COLLECTION: &str = "processed_videos";

// =============================================================================
// Updates
// =============================================================================

/// Fields written by one status transition.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerUpdate {
    pub status: ProcessingStatus,
    pub at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub match_count: Option<u32>,
}

impl LedgerUpdate {
    pub fn new(status: ProcessingStatus) -> Self {
        Self {
            status,
            at: Utc::now(),
            error_message: None,
            match_count: None,
        }
    }

    /// Timestamp field stamped by this transition.
    pub fn timestamp_field(&self) -> &'static str {
        match self.status {
            ProcessingStatus::Queued => "queuedAt",
            ProcessingStatus::Processing => "processingStartedAt",
            ProcessingStatus::Completed => "completedAt",
            ProcessingStatus::Failed => "failedAt",
        }
    }

    /// A new attempt or a success drops the error of an earlier failure.
    fn clears_error(&self) -> bool {
        matches!(
            self.status,
            ProcessingStatus::Processing | ProcessingStatus::Completed
        )
    }

    /// Firestore fields and the matching update mask.
    pub fn to_fields(&self, video_id: &str) -> (HashMap<String, Value>, Vec<&'static str>) {
        let mut fields = HashMap::new();
        let mut mask = vec!["videoId", "status", "updatedAt", self.timestamp_field()];

        fields.insert("videoId".to_string(), video_id.to_firestore_value());
        fields.insert("status".to_string(), self.status.as_str().to_firestore_value());
        fields.insert("updatedAt".to_string(), self.at.to_firestore_value());
        fields.insert(self.timestamp_field().to_string(), self.at.to_firestore_value());

        if let Some(msg) = &self.error_message {
            fields.insert("errorMessage".to_string(), msg.to_firestore_value());
            mask.push("errorMessage");
        } else if self.clears_error() {
            fields.insert("errorMessage".to_string(), Value::NullValue(()));
            mask.push("errorMessage");
        }
        if let Some(count) = self.match_count {
            fields.insert("matchCount".to_string(), count.to_firestore_value());
            mask.push("matchCount");
        }
        (fields, mask)
    }

    /// Merge into an in-memory record.
    pub fn apply(&self, record: &mut ProcessingRecord) {
        record.status = self.status;
        record.updated_at = Some(self.at);
        match self.status {
            ProcessingStatus::Queued => record.queued_at = Some(self.at),
            ProcessingStatus::Processing => record.processing_started_at = Some(self.at),
            ProcessingStatus::Completed => record.completed_at = Some(self.at),
            ProcessingStatus::Failed => record.failed_at = Some(self.at),
        }
        if let Some(msg) = &self.error_message {
            record.error_message = Some(msg.clone());
        } else if self.clears_error() {
            record.error_message = None;
        }
        if let Some(count) = self.match_count {
            record.match_count = Some(count);
        }
    }
}

// =============================================================================
// Store
// =============================================================================

/// Keyed document store backing the ledger.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get(&self, video_id: &str) -> FirestoreResult<Option<ProcessingRecord>>;

    /// Upsert-merge `update` into the record for `video_id`.
    async fn merge(&self, video_id: &str, update: &LedgerUpdate) -> FirestoreResult<()>;

    /// Create `record` unless a record with its id exists. Returns whether
    /// it was created.
    async fn create_if_absent(&self, record: &ProcessingRecord) -> FirestoreResult<bool>;

    async fn count_by_status(&self, status: ProcessingStatus) -> FirestoreResult<u64>;

    /// Failed records, most recent `failedAt` first.
    async fn recent_failures(&self, limit: usize) -> FirestoreResult<Vec<ProcessingRecord>>;
}

/// Ledger store on the Firestore REST API.
#[derive(Clone)]
pub struct FirestoreLedgerStore {
    client: FirestoreClient,
    collection: String,
}

impl FirestoreLedgerStore {
    pub fn new(client: FirestoreClient) -> Self {
        Self::with_collection(client, PROCESSED_VIDEOS_COLLECTION)
    }

    pub fn with_collection(client: FirestoreClient, collection: impl Into<String>) -> Self {
        Self {
            client,
            collection: collection.into(),
        }
    }
}

#[async_trait]
impl LedgerStore for FirestoreLedgerStore {
    async fn get(&self, video_id: &str) -> FirestoreResult<Option<ProcessingRecord>> {
        let doc = self.client.get_document(&self.collection, video_id).await?;
        doc.map(|d| record_from_document(&d, video_id)).transpose()
    }

    async fn merge(&self, video_id: &str, update: &LedgerUpdate) -> FirestoreResult<()> {
        let (fields, mask) = update.to_fields(video_id);
        self.client
            .patch_document(&self.collection, video_id, fields, Some(&mask))
            .await?;
        Ok(())
    }

    async fn create_if_absent(&self, record: &ProcessingRecord) -> FirestoreResult<bool> {
        match self
            .client
            .create_document(&self.collection, &record.video_id, record_to_fields(record))
            .await
        {
            Ok(_) => Ok(true),
            Err(FirestoreError::AlreadyExists(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn count_by_status(&self, status: ProcessingStatus) -> FirestoreResult<u64> {
        let query = StructuredQuery::collection(&self.collection)
            .where_equal("status", status.as_str().to_firestore_value())
            .names_only();
        Ok(self.client.run_query(query).await?.len() as u64)
    }

    async fn recent_failures(&self, limit: usize) -> FirestoreResult<Vec<ProcessingRecord>> {
        let query = StructuredQuery::collection(&self.collection)
            .where_equal("status", ProcessingStatus::Failed.as_str().to_firestore_value())
            .order_by_desc("failedAt")
            .limit(limit.min(i32::MAX as usize) as i32);

        let docs = self.client.run_query(query).await?;
        let mut records = Vec::with_capacity(docs.len());
        for doc in docs {
            let id = doc.id().unwrap_or_default().to_string();
            match record_from_document(&doc, &id) {
                Ok(record) => records.push(record),
                Err(e) => warn!(video_id = %id, "Skipping unreadable ledger record: {}", e),
            }
        }
        Ok(records)
    }
}

/// In-process ledger store for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    records: RwLock<BTreeMap<String, ProcessingRecord>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> Vec<ProcessingRecord> {
        self.records.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn get(&self, video_id: &str) -> FirestoreResult<Option<ProcessingRecord>> {
        Ok(self.records.read().await.get(video_id).cloned())
    }

    async fn merge(&self, video_id: &str, update: &LedgerUpdate) -> FirestoreResult<()> {
        let mut records = self.records.write().await;
        let record = records
            .entry(video_id.to_string())
            .or_insert_with(|| ProcessingRecord::queued(video_id));
        update.apply(record);
        Ok(())
    }

    async fn create_if_absent(&self, record: &ProcessingRecord) -> FirestoreResult<bool> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.video_id) {
            return Ok(false);
        }
        records.insert(record.video_id.clone(), record.clone());
        Ok(true)
    }

    async fn count_by_status(&self, status: ProcessingStatus) -> FirestoreResult<u64> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.status == status)
            .count() as u64)
    }

    async fn recent_failures(&self, limit: usize) -> FirestoreResult<Vec<ProcessingRecord>> {
        let mut failed: Vec<ProcessingRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.status == ProcessingStatus::Failed)
            .cloned()
            .collect();
        failed.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));
        failed.truncate(limit);
        Ok(failed)
    }
}

// =============================================================================
// Document Mapping
// =============================================================================

fn record_to_fields(record: &ProcessingRecord) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    let mut put = |name: &str, value: Value| {
        fields.insert(name.to_string(), value);
    };

    put("videoId", record.video_id.to_firestore_value());
    put("status", record.status.as_str().to_firestore_value());
    for (name, value) in [
        ("title", &record.title),
        ("channelId", &record.channel_id),
        ("channelTitle", &record.channel_title),
        ("publishedAt", &record.published_at),
        ("errorMessage", &record.error_message),
    ] {
        if let Some(v) = value {
            put(name, v.to_firestore_value());
        }
    }
    for (name, value) in [
        ("queuedAt", record.queued_at),
        ("processingStartedAt", record.processing_started_at),
        ("completedAt", record.completed_at),
        ("failedAt", record.failed_at),
        ("updatedAt", record.updated_at),
    ] {
        if let Some(ts) = value {
            put(name, ts.to_firestore_value());
        }
    }
    if let Some(count) = record.match_count {
        put("matchCount", count.to_firestore_value());
    }
    fields
}

/// Read a ledger document. Only an unknown status is an error; missing
/// fields stay `None`.
pub fn record_from_document(doc: &Document, video_id: &str) -> FirestoreResult<ProcessingRecord> {
    let status = match doc.get::<String>("status") {
        Some(s) => s
            .parse::<ProcessingStatus>()
            .map_err(FirestoreError::SerializationError)?,
        None => ProcessingStatus::Queued,
    };

    Ok(ProcessingRecord {
        video_id: doc.get("videoId").unwrap_or_else(|| video_id.to_string()),
        status,
        title: doc.get("title"),
        channel_id: doc.get("channelId"),
        channel_title: doc.get("channelTitle"),
        published_at: doc.get("publishedAt"),
        queued_at: doc.get("queuedAt"),
        processing_started_at: doc.get("processingStartedAt"),
        completed_at: doc.get("completedAt"),
        failed_at: doc.get("failedAt"),
        updated_at: doc.get("updatedAt"),
        error_message: doc.get("errorMessage"),
        match_count: doc.get("matchCount"),
    })
}

// =============================================================================
// Ledger
// =============================================================================

/// Processing state machine over a [`LedgerStore`].
#[derive(Clone)]
pub struct ProcessingLedger {
    store: Arc<dyn LedgerStore>,
}

impl ProcessingLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Ledger backed by a fresh [`MemoryLedgerStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryLedgerStore::new()))
    }

    pub async fn get(&self, video_id: &str) -> FirestoreResult<Option<ProcessingRecord>> {
        self.store.get(video_id).await
    }

    /// Whether the video finished before. A failed read counts as "not
    /// completed", so the video may be processed twice but never skipped.
    pub async fn is_completed(&self, video_id: &str) -> bool {
        match self.store.get(video_id).await {
            Ok(record) => record.map(|r| r.is_completed()).unwrap_or(false),
            Err(e) => {
                warn!(video_id, "Failed to read ledger status, treating as not completed: {}", e);
                false
            }
        }
    }

    /// Enter `processing`. Callers check [`Self::is_completed`] first.
    pub async fn mark_processing(&self, video_id: &str) -> FirestoreResult<()> {
        self.write(video_id, LedgerUpdate::new(ProcessingStatus::Processing))
            .await
    }

    pub async fn mark_completed(&self, video_id: &str, match_count: u32) -> FirestoreResult<()> {
        let mut update = LedgerUpdate::new(ProcessingStatus::Completed);
        update.match_count = Some(match_count);
        self.write(video_id, update).await
    }

    pub async fn mark_failed(&self, video_id: &str, error_message: &str) -> FirestoreResult<()> {
        let mut update = LedgerUpdate::new(ProcessingStatus::Failed);
        update.error_message = Some(error_message.to_string());
        self.write(video_id, update).await
    }

    /// Record a newly announced video as `queued`, unless the ledger already
    /// knows it. Returns whether the record was created.
    pub async fn register_queued(&self, message: &NewVideoMessage) -> FirestoreResult<bool> {
        let video_id = message
            .validate()
            .map_err(|e| FirestoreError::SerializationError(e.to_string()))?;
        let now = Utc::now();
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());

        let record = ProcessingRecord {
            title: non_empty(&message.title),
            channel_id: non_empty(&message.channel_id),
            channel_title: non_empty(&message.channel_title),
            published_at: non_empty(&message.published_at),
            queued_at: Some(now),
            updated_at: Some(now),
            ..ProcessingRecord::queued(video_id.as_str())
        };

        let created = self.store.create_if_absent(&record).await?;
        if created {
            info!(video_id = %video_id, "Video registered as queued");
        } else {
            info!(video_id = %video_id, "Video already known to the ledger, skipping");
        }
        Ok(created)
    }

    /// Record counts per status.
    pub async fn stats(&self) -> FirestoreResult<ProcessingStats> {
        let mut stats = ProcessingStats::default();
        for status in ProcessingStatus::ALL {
            stats.set(status, self.store.count_by_status(status).await?);
        }
        Ok(stats)
    }

    /// Most recently failed videos first.
    pub async fn failed_items(&self, limit: usize) -> FirestoreResult<Vec<ProcessingRecord>> {
        self.store.recent_failures(limit).await
    }

    async fn write(&self, video_id: &str, update: LedgerUpdate) -> FirestoreResult<()> {
        match self.store.merge(video_id, &update).await {
            Ok(()) => {
                info!(video_id, status = %update.status, "Updated ledger status");
                Ok(())
            }
            Err(e) => {
                warn!(video_id, status = %update.status, "Ledger write failed: {}", e);
                record_ledger_write_failure(update.status.as_str());
                Err(e)
            }
        }
    }
}
