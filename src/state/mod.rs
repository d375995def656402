/// State management module
///
/// This module handles the stores the pipelines run against:
/// - Shared data structures (data.rs)
/// - The catalog and asset store interfaces (store.rs)
/// - The SQLite implementation of both stores (library.rs)

pub mod data;
pub mod library;
pub mod store;
