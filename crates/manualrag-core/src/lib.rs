//! manualrag-core
//!
//! Domain types, configuration, the chunk hierarchy builder and the parent
//! document store shared by the keyword index and the hybrid pipeline.

pub mod chunking;
pub mod config;
pub mod docstore;
pub mod error;
pub mod loader;
pub mod traits;
pub mod types;
