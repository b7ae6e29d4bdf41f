//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! core. The sync engine and the scheduler depend on these traits; their
//! implementations live in adapter crates or in the embedding application.
//!
//! ## Ports Overview
//!
//! - [`IMutationStore`] - Durable key-value slot holding the mutation queue
//! - [`ISyncTransport`] - Delivers a mutation to the remote authority
//! - [`IServerStateFetcher`] - Reads authoritative server state for conflict checks
//! - [`INetworkObserver`] - Online/offline transitions
//! - [`ICarbonIntensityProvider`] - Grid carbon intensity readings
//! - [`IDeviceProbe`] - Network quality and battery conditions

pub mod carbon_intensity;
pub mod device;
pub mod mutation_store;
pub mod network;
pub mod sync_transport;

pub use carbon_intensity::{ICarbonIntensityProvider, IntensityReading};
pub use device::{BatteryStatus, DeviceConditions, IDeviceProbe, NetworkQuality};
pub use mutation_store::IMutationStore;
pub use network::{INetworkObserver, NetworkState};
pub use sync_transport::{IServerStateFetcher, ISyncTransport, NoServerState};
