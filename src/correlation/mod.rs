//! Response correlation: matching asynchronous bot replies to the track
//! requests that caused them.
//!
//! # Overview
//!
//! Every dispatched track is registered as a [`PendingRequest`]. Inbound
//! [`BotEvent`]s are routed through [`CorrelationEngine::dispatch`], which
//! classifies the event and consumes at most one pending request:
//!
//! - file events match by content similarity, falling back to the oldest
//!   request still inside the response window;
//! - option prompts and "not found" replies match by age only;
//! - plain text never consumes a request.

pub mod engine;
pub mod event;
pub mod similarity;

pub use engine::{
    CorrelationConfig, CorrelationEngine, DEFAULT_RESPONSE_TIMEOUT, DEFAULT_SIMILARITY_THRESHOLD,
    Disposition, FileMatch, PendingRequest,
};
pub use event::{AudioMetadata, BotEvent, EventKind, FileAttachment};
pub use similarity::SimilarityWeights;
