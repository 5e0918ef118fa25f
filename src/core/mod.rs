//! Core abstractions of capflow
//!
//! Value types, collaborator traits and the error type shared by the cache,
//! the cooldown list and the request engine.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{EngineError, EngineResult};
pub use traits::*;
pub use types::*;
