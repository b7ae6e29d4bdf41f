//! Verdant Core - Domain types, ports and configuration
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `Mutation`, `SyncState`, `SyncEvent`, `HealthReport`, `QueueStats`
//! - **Port definitions** - Traits for adapters: `IMutationStore`, `ISyncTransport`,
//!   `IServerStateFetcher`, `INetworkObserver`, `ICarbonIntensityProvider`, `IDeviceProbe`
//! - **Configuration** - YAML-backed settings for the engine, scheduler and daemon
//!
//! # Architecture
//!
//! The domain module holds plain data and invariants with no I/O.
//! Ports define the trait interfaces that the sync engine and the scheduler
//! call through; their implementations live in adapter crates or in the
//! embedding application.

pub mod config;
pub mod domain;
pub mod ports;
