//! Domain Layer - Core price types and coalescing logic.
//!
//! This layer contains the price snapshot types, the coalescing batch and
//! the per-instrument cache. Nothing here performs I/O or spawns tasks.

/// Price snapshots and coalesced batches (the outbound wire form).
pub mod pricing;

/// Watch-list and last-known per-instrument state.
pub mod watchlist;
