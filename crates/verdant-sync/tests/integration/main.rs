//! Integration tests for verdant-sync
//!
//! Drives the public `SyncEngine` API against scripted transports, the JSON
//! file store in a temporary directory, a wiremock HTTP endpoint and a live
//! carbon-aware scheduler.

mod common;

mod test_adapters;
mod test_carbon_mode;
mod test_engine;
