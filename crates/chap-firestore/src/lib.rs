//! Firestore REST client and the per-video processing ledger.
//!
//! This crate provides:
//! - A Firestore REST client (get, merge-patch, create, structured queries)
//! - Service account authentication via gcp_auth, or an emulator
//! - Retry with backoff, request spans and metrics
//! - [`ProcessingLedger`], the queued/processing/completed/failed state machine

pub mod client;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod retry;
pub mod token_cache;
pub mod types;

pub use client::{FirestoreClient, FirestoreConfig};
pub use error::{FirestoreError, FirestoreResult};
pub use ledger::{
    FirestoreLedgerStore, LedgerStore, LedgerUpdate, MemoryLedgerStore, ProcessingLedger,
    PROCESSED_VIDEOS_COLLECTION,
};
pub use retry::RetryConfig;
pub use types::{Document, FromFirestoreValue, StructuredQuery, ToFirestoreValue, Value};
