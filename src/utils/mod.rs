//! Utility module for the approval sync worker.
//!
//! Address normalization and block range helpers shared by the store and the sync driver.
/// Address parsing and block range chunking
pub mod index;

pub use index::{address_key, block_chunks, parse_address};
