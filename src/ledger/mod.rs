//! Ledger integration module for the token contract being indexed
//!
//! This module provides the client abstraction and the typed events the sync engine consumes.
//! Raw logs are decoded here, so the rest of the crate never deals with topics or ABI layout.

/// `ethers` backed client and the `LedgerClient` trait
mod client;
/// Typed events, filter descriptors and errors
mod types;

pub use client::{EthLedgerClient, LedgerClient};
pub use types::*;
