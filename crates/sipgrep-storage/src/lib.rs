//! Call-indexing and storage: interns decoded SIP [`sipgrep_core::Message`]s
//! into [`call::Call`]s keyed by Call-ID, links related dialogs, enforces
//! memory bounds, and serves sorted, filtered views to a presentation
//! layer. See [`table::Storage`] for the entry point.

pub mod call;
pub mod config;
pub mod filter;
pub mod group;
pub mod table;

pub use call::{Call, CallState, StoredMessage};
pub use config::StorageConfig;
pub use filter::{compile, Attribute, FilterCache, Predicate};
pub use group::CallGroup;
pub use table::{SortAttr, Storage, StorageStats};
