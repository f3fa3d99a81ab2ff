//! Insight engine and detectors
//!
//! Detectors observe the tracker's outputs and persistent counters and
//! emit durable, categorized findings. The engine schedules them
//! cooperatively under a single write transaction per tick.

pub mod core;
pub mod engine;
pub mod fetcher;
pub mod localrbl;
pub mod mailinactivity;
pub mod migrations;
pub mod newsfeed;
pub mod welcome;

pub use core::{Category, ContentTypeRegistry, Creator, Detector, InsightProperties, Rating};
pub use engine::Engine;
pub use fetcher::{FetchOptions, FetchedInsight, Fetcher, OrderBy};

use crate::insights::core::default_decoder;
use std::sync::Arc;

/// Build the process-wide content-type registry. Called exactly once at
/// startup, before any database read; a duplicate durable id panics
/// here rather than corrupting stored insights later.
pub fn default_registry() -> Arc<ContentTypeRegistry> {
    let mut registry = ContentTypeRegistry::new();

    registry.register(
        mailinactivity::CONTENT_TYPE,
        mailinactivity::CONTENT_TYPE_ID,
        default_decoder::<mailinactivity::Content>,
    );
    registry.register(
        welcome::CONTENT_TYPE,
        welcome::CONTENT_TYPE_ID,
        default_decoder::<welcome::Content>,
    );
    registry.register(
        localrbl::CONTENT_TYPE,
        localrbl::CONTENT_TYPE_ID,
        default_decoder::<localrbl::Content>,
    );
    registry.register(
        newsfeed::CONTENT_TYPE,
        newsfeed::CONTENT_TYPE_ID,
        default_decoder::<newsfeed::Content>,
    );

    Arc::new(registry)
}
