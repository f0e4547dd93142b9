//! # DLMM Data Miner
//!
//! Periodically captures a snapshot of every Meteora DLMM pool on Solana,
//! enriches it with trading activity and fee metrics, and persists each capture
//! twice: as a dated JSON file on disk and as rows in a relational store.
//!
//! ## Overview
//!
//! One capture cycle:
//!
//! - **Fetch**: token registry and pool listings, then pair activity for every
//!   listed pool, all through one shared rate limiter
//! - **Enrich**: join activity with listings, project 24h volume and fees,
//!   compute fee/TVL and a volume trend
//! - **Store**: write the snapshot file, then index it into `fetch_times` / `pools`
//!
//! ## Architecture
//!
//! ### Fetch Layer
//! A sliding-window rate limiter with a shared pause/backoff breaker fronts the
//! three read-only source clients.
//!
//! ### Enrichment Layer
//! A pure join from raw source records to [`types::EnrichedPoolSnapshot`].
//!
//! ### Storage Layer
//! Snapshot files are the source of truth. The indexer mirrors them into the
//! store, and the reconciler and defragmenter repair any gap between the two.

// Core Types
/// Source records, snapshots and relational rows
pub mod types;

// Fetch Layer
/// Sliding-window rate limiter with shared backoff
pub mod rate_limited_fetcher;
/// Token registry, pool listing and pair activity clients
pub mod sources;

// Enrichment Layer
/// Join of pair activity with pool listings
pub mod enrichment;
/// Pool ranking by fee/TVL
pub mod opportunities;

// Storage Layer
/// PostgreSQL integration and the repository trait
pub mod database;
/// In-process repository
pub mod memory_repository;
/// Relational indexing of snapshots
pub mod indexer;
/// Dated snapshot files
pub mod snapshot_store;
/// Back-fill of un-indexed snapshot files
pub mod directory_reconciler;
/// Migration of legacy flat snapshot files
pub mod defragmenter;

// Orchestration
/// Capture cycle and scheduler
pub mod data_engine;

// Settings & Utilities
/// Configuration management
pub mod settings;
/// General utilities
pub mod utils;

// Re-exports for convenience
pub use data_engine::{CycleReport, DataEngine};
pub use database::{PgRepository, SnapshotRepository, StoreError};
pub use directory_reconciler::{reconcile, ReconcileSummary};
pub use indexer::DataIndexer;
pub use memory_repository::MemoryRepository;
pub use rate_limited_fetcher::RateLimitedFetcher;
pub use settings::Settings;
pub use snapshot_store::SnapshotStore;
