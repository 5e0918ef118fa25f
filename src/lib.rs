//! Capability-request orchestration engine.
//!
//! Callers hand batches of target URIs to a [`RequestManager`]. The engine
//! answers what it can from the cache, paces the remaining lookups against a
//! rate-limited [`LookupBackend`] and reports each batch through one
//! [`CapabilityCallback`].

pub mod cache;
pub mod config;
pub mod cooldown;
pub mod core;
pub mod logging;
pub mod request;

pub use crate::core::{CapabilityCallback, EngineError, EngineResult, LookupBackend};
pub use request::{LookupListener, RequestManager, Services};
