//! Application layer for tack.
//!
//! This crate wires the pure domain in `tack-core` to a [`CardStore`] and the
//! external collaborators: card transitions, card queries, saved filters,
//! mention/link extraction and its background queue, plus project configuration.

pub mod card_query;
pub mod card_writer;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod extraction_queue;
pub mod extractor;
pub mod filters;
pub mod store;

// Re-exports for convenience
pub use card_query::{CardQuery, Predicate, QueryPlan};
pub use card_writer::{CardWriter, CommentResult, CreateCardRequest, UpdateResult, WriteResult};
pub use collaborators::{
    AccessControl, Clock, Collaborators, EventSink, FixedClock, IdentityDirectory, StoreDirectory,
    SystemClock, TracingEventSink, TracingNotifier, WatchNotifier,
};
pub use config::{CONFIG_DIR, ExtractionConfig, ProjectConfig, QueryConfig};
pub use error::{ServiceError, ServiceResult};
pub use extraction_queue::{ExtractionJob, ExtractionQueue};
pub use extractor::{ExtractionReport, RelationshipExtractor};
pub use filters::FilterRepository;
pub use store::CardStore;
