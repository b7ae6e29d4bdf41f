//! Verdant Conflict - Conflict detection and resolution
//!
//! Provides:
//! - A conflict predicate comparing a mutation with authoritative server state
//! - Resolution strategies (`LastWriteWins`, `ServerWins`, custom functions)
//! - A resolver that turns a detected conflict into a keep/rewrite/discard decision

pub mod detector;
pub mod error;
pub mod resolver;
pub mod strategy;

pub use detector::ConflictDetector;
pub use error::ConflictError;
pub use resolver::{ConflictResolver, DiscardReason, Resolution};
pub use strategy::ConflictStrategy;
