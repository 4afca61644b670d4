//! RoomBeacon provisioning
//!
//! BLE central that finds unprovisioned RoomBeacons, writes WiFi credentials
//! and a room assignment to them, and asks them to save.
//!
//! The core is [`Provisioner`], a synchronous state machine fed with
//! [`Event`]s. [`Session`] runs it on a tokio task; [`BtleCentral`] connects
//! it to a real adapter through btleplug.
//!
//! # Example
//!
//! ```ignore
//! use roombeacon_provision::{BtleCentral, ProvisionRequest, ProvisionerConfig, Session, btle};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let adapter = btle::default_adapter().await?;
//!     let session = Session::spawn(ProvisionerConfig::default(), |sink| {
//!         BtleCentral::new(adapter, sink)
//!     });
//!
//!     session.start_scanning()?;
//!     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!     let beacon = session.peripherals().await?.into_iter().next().ok_or("no beacon found")?;
//!
//!     session.connect(beacon.id)?;
//!     session
//!         .wait_for(|s| s.is_terminal() || *s == roombeacon_provision::ProvisioningState::Ready)
//!         .await?;
//!
//!     let kitchen = roombeacon_proto::find_preset("Kitchen").ok_or("no preset")?;
//!     session.provision(ProvisionRequest::from_preset("MySSID", "MyPassword", kitchen))?;
//!     println!("{}", session.wait_for(|s| s.is_terminal()).await?);
//!     session.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod btle;
pub mod central;
pub mod config;
mod connection;
pub mod diagnostics;
pub mod discovery;
pub mod error;
pub mod machine;
pub mod resolver;
pub mod save;
pub mod session;
pub mod state;
pub mod timer;
pub mod writer;

#[cfg(test)]
mod mock;

pub use btle::{BackendError, BtleCentral};
pub use central::{Central, Event, PeripheralId, RadioState};
pub use config::ProvisionerConfig;
pub use diagnostics::{DiagnosticEntry, DiagnosticLog};
pub use discovery::DiscoveredPeripheral;
pub use error::{ConfigError, ProvisionError};
pub use machine::Provisioner;
pub use resolver::CharacteristicMap;
pub use save::ProvisionedDevice;
pub use session::{EventSink, Session, SessionClosed, TokioScheduler};
pub use state::ProvisioningState;
pub use timer::{Phase, Scheduler, TimerId};
pub use writer::{ProvisionRequest, WriteProgress};
