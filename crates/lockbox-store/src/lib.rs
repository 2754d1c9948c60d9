//! # Lockbox Store
//!
//! Storage abstraction for the Lockbox server. Provides a trait-based
//! interface for identity, file and grant records with SQLite and in-memory
//! implementations.
//!
//! ## Key Types
//!
//! - [`RecordStore`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`WriteResult`] - Outcome of a compare-and-swap file write
//!
//! ## Usage
//!
//! ```rust,no_run
//! use lockbox_store::{RecordStore, SqliteStore};
//! use lockbox_core::{FileName, UserId};
//!
//! async fn example() {
//!     let store = SqliteStore::open("lockbox.db").unwrap();
//!
//!     let owner = UserId::new("alice").unwrap();
//!     let name = FileName::new("notes.txt").unwrap();
//!     let grantees = store.list_grantees(&owner, &name).await.unwrap();
//! }
//! ```

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{check_epoch_step, InsertResult, RecordStore, WriteResult};
