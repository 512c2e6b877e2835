//! # nat-upnp
//!
//! UPnP Internet Gateway Device client: discover the NAT gateway on the
//! local network and control port forwarding on it.
//!
//! This crate provides:
//! - SSDP discovery of the gateway, reporting which local interface it answered on
//! - A device control channel that resolves the gateway's WAN connection
//!   service and invokes SOAP actions on it
//! - A gateway client with the four port mapping operations: create,
//!   remove, enumerate, and public IP lookup
//!
//! ## Example
//!
//! ```rust,no_run
//! use nat_upnp::{Client, ClientConfig, MappingFilter, NewPortMapping};
//!
//! # async fn example() -> Result<(), nat_upnp::Error> {
//! let client = Client::new(ClientConfig::default())?;
//!
//! client
//!     .create_mapping(&NewPortMapping::new(31234).private(7654).ttl(0))
//!     .await?;
//!
//! for mapping in client.get_mappings(&MappingFilter::all().local()).await? {
//!     println!("{} -> {}", mapping.remote, mapping.internal);
//! }
//!
//! println!("public IP: {}", client.get_public_ip().await?);
//! client.close();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod device;
pub mod error;
pub mod mapping;
pub mod ssdp;

// Re-export commonly used types
pub use client::{Client, ClientConfig, Gateway};
pub use device::{Device, DeviceInfo};
pub use error::{ActionFault, Error, Result};
pub use mapping::{
    AddressSpec, DeletePortMapping, DescriptionFilter, Endpoint, HostPort, MappingFilter,
    NewPortMapping, PortMapping, Protocol,
};
pub use ssdp::{Announcement, Search, Ssdp, SsdpConfig};
