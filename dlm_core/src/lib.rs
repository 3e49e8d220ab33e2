//! Shared building blocks for the download orchestrator.
//!
//! The state record and its status machine, the worker wire protocol, the
//! durable state store, id generation and byte-rate limiting.

pub mod id;
pub mod protocol;
pub mod rate_limit;
pub mod record;
pub mod store;

pub use id::IdGenerator;
pub use protocol::{LineBuffer, WorkerMessage};
pub use rate_limit::TokenBucket;
pub use record::{CANCELLED, RETENTION, StateRecord, Status, TIMED_OUT, UNEXPECTED_EXIT, now_millis};
pub use store::{StateStore, StoreError};
