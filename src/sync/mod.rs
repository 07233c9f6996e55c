//! Settlement Approval Synchronization Module
//!
//! This module holds the polling pipeline that mirrors token approvals and holder balances for a
//! settlement contract into the state store:
//!
//! - `orchestrator`: The sync loop driver. Derives unsynced ranges, processes chunks and commits checkpoints.
//! - `range_query`: Event queries over block ranges, bisecting ranges the provider rejects.
//! - `filters`: Groups approver addresses into bounded filter descriptors per event kind.
//! - `progress_tracker`: Tracks processed chunks within a cycle and reports statistics.
//! - `types`: Error types shared by the pipeline.

/// Filter batching for approval and holder event queries
pub mod filters;
/// Main coordinator for the sync loop
pub mod orchestrator;
/// Tracks synchronization progress and statistics
pub mod progress_tracker;
/// Bisecting block range queries
pub mod range_query;
/// Sync error types
pub mod types;

pub use orchestrator::*;
pub use types::SyncError;
