//! Process-wide services backing the hover assistant: durable storage, the
//! credential store, the usage tracker and page-context extraction.

pub mod context_extractor;
pub mod credential_store;
pub mod page;
pub mod storage;
pub mod usage_tracker;

pub use context_extractor::ContextExtractor;
pub use credential_store::CredentialStore;
pub use storage::{JsonFileStore, KeyValueStore, MemoryStore};
pub use usage_tracker::UsageTracker;
