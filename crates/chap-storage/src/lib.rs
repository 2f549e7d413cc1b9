//! Object storage and the tabular result sink.
//!
//! This crate provides:
//! - A Cloudflare R2 client (S3 API)
//! - The [`ObjectStore`] trait with R2 and local-directory backends
//! - Parquet tables with per-video row replacement
//! - Result sinks publishing video and match records

pub mod client;
pub mod error;
pub mod object_store;
pub mod sink;
pub mod table;

pub use client::{R2Client, R2Config};
pub use error::{StorageError, StorageResult};
pub use object_store::{LocalDirStore, ObjectStore};
pub use sink::{LocalOutputSink, ObjectStoreSink, PublishSummary, ResultSink};
pub use table::{Table, TableSink, TableUpdate, MATCHES_TABLE, VIDEOS_TABLE};
