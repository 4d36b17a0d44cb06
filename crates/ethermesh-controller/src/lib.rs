//! Ethermesh Controller Store
//!
//! The authoritative key-value store behind an ethermesh network controller:
//! network and member records with derived per-network summaries. Three
//! storage backends are selected by the base path at open time:
//!
//! - a plain directory of per-entity JSON files (default)
//! - an HTTP harness (`http://...`) that owns persistence externally
//! - an IPC stream (`-`) of newline-delimited JSON on stdin/stdout

pub mod error;
pub mod store;
pub mod summary;

pub use error::{StoreError, StoreResult};
pub use store::Store;
pub use summary::NetworkSummaryInfo;
