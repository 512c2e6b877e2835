//! Gateway Client
//!
//! The public entry point. A [`Client`] finds the gateway (or takes one the
//! caller vouches for), then drives the four port mapping operations over
//! the gateway's control channel.
//!
//! # Resolution modes
//!
//! - **Discovery** (default): every operation runs an SSDP search and uses
//!   the first gateway that answers within `timeout`.
//! - **Bypass**: with both `url` and `local_address` set, the gateway is
//!   built once at construction and the network is never searched.
//! - **Cache**: discovery still runs every time, but the last gateway that
//!   answered is kept and handed back inside the timeout error when a later
//!   search finds nothing.

use crate::device::{ActionRequest, Device, HTTP_TIMEOUT};
use crate::error::{Error, Result};
use crate::mapping::{DeletePortMapping, MappingFilter, NewPortMapping, PortMapping};
use crate::ssdp::{IGD_DEVICE, Ssdp, SsdpConfig};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

/// Default discovery timeout (1800 ms)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1800);

/// Highest index enumeration asks for; a gateway holds at most one
/// mapping per public port and protocol
const MAX_MAPPING_INDEX: u32 = 2 * u16::MAX as u32;

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long discovery waits for the first gateway
    pub timeout: Duration,
    /// Description URL of a known gateway; requires `local_address`
    pub url: Option<Url>,
    /// Local address the known gateway reaches us on
    pub local_address: Option<IpAddr>,
    /// Keep the last discovered gateway as a fallback
    pub cache: bool,
    /// Discovery engine settings
    pub ssdp: SsdpConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            url: None,
            local_address: None,
            cache: false,
            ssdp: SsdpConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Skip discovery and use this gateway
    #[must_use]
    pub fn with_gateway(mut self, url: Url, local_address: IpAddr) -> Self {
        self.url = Some(url);
        self.local_address = Some(local_address);
        self
    }

    /// Set the discovery timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable or disable caching of the discovered gateway
    #[must_use]
    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    /// Set the discovery engine settings
    #[must_use]
    pub fn with_ssdp(mut self, ssdp: SsdpConfig) -> Self {
        self.ssdp = ssdp;
        self
    }
}

/// A resolved gateway and the local address it reaches us on
#[derive(Debug, Clone)]
pub struct Gateway {
    device: Arc<Device>,
    local_address: IpAddr,
}

impl Gateway {
    /// Pair a control channel with the local address used to reach it
    #[must_use]
    pub fn new(device: Device, local_address: IpAddr) -> Self {
        Self {
            device: Arc::new(device),
            local_address,
        }
    }

    /// Control channel
    #[must_use]
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Description URL, reusable as a bypass `url`
    #[must_use]
    pub fn control_location(&self) -> &Url {
        self.device.description()
    }

    /// Local interface address the gateway answered on
    #[must_use]
    pub fn local_address(&self) -> IpAddr {
        self.local_address
    }
}

/// UPnP IGD port mapping client
pub struct Client {
    config: ClientConfig,
    ssdp: Ssdp,
    http: reqwest::Client,
    bypass: Option<Gateway>,
    cached: Mutex<Option<Gateway>>,
}

impl Client {
    /// Create a client.
    ///
    /// Nothing is sent on the network until the first operation.
    ///
    /// # Errors
    ///
    /// - `Error::Configuration` if `url` is set without `local_address`
    /// - `Error::Http` if the HTTP client cannot be built
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.url.is_some() && config.local_address.is_none() {
            return Err(Error::Configuration(
                "a gateway url requires an explicit local address".to_string(),
            ));
        }

        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        let bypass = match (&config.url, config.local_address) {
            (Some(url), Some(local_address)) => Some(Gateway::new(
                Device::with_client(url.clone(), http.clone()),
                local_address,
            )),
            _ => None,
        };

        Ok(Self {
            ssdp: Ssdp::with_config(config.ssdp.clone()),
            config,
            http,
            bypass,
            cached: Mutex::new(None),
        })
    }

    /// Client configuration
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Find the gateway.
    ///
    /// In bypass mode this returns the configured gateway without any I/O.
    /// Otherwise the first gateway to answer the search wins and the search
    /// is ended immediately.
    ///
    /// # Errors
    ///
    /// - `Error::DiscoveryTimeout` if no gateway answered in time; with
    ///   caching enabled it carries the last gateway that did
    /// - `Error::Closed` after [`close`](Self::close)
    pub async fn resolve_gateway(&self) -> Result<Gateway> {
        if let Some(gateway) = &self.bypass {
            return Ok(gateway.clone());
        }

        // Held across discovery so concurrent callers never tear the cache
        let mut cached = self.cached.lock().await;
        match self.discover().await {
            Ok(gateway) => {
                if self.config.cache {
                    *cached = Some(gateway.clone());
                }
                Ok(gateway)
            }
            Err(Error::DiscoveryTimeout { .. }) => Err(Error::DiscoveryTimeout {
                stale: cached.clone(),
            }),
            Err(e) => Err(e),
        }
    }

    /// Open a port on the gateway.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidMapping` if the public port is missing, and
    /// any resolution or gateway error.
    pub async fn create_mapping(&self, mapping: &NewPortMapping) -> Result<()> {
        let gateway = self.gateway().await?;
        let request = mapping.to_action(gateway.local_address())?;
        gateway.device().invoke(&request).await?;
        Ok(())
    }

    /// Close a port on the gateway.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidMapping` if the public port is missing, and
    /// any resolution or gateway error.
    pub async fn remove_mapping(&self, mapping: &DeletePortMapping) -> Result<()> {
        let gateway = self.gateway().await?;
        let request = mapping.to_action()?;
        gateway.device().invoke(&request).await?;
        Ok(())
    }

    /// List the gateway's port mappings that pass `filter`.
    ///
    /// Entries are requested one index at a time from 0 until the gateway
    /// faults. The table has no other end marker, so a fault at any index
    /// ends the list; at index 0 it means the table is empty. A gateway that
    /// never faults is read up to one entry per public port and protocol.
    ///
    /// # Errors
    ///
    /// Returns resolution and transport errors, and `Error::MalformedResponse`
    /// if an entry cannot be projected.
    pub async fn get_mappings(&self, filter: &MappingFilter) -> Result<Vec<PortMapping>> {
        let gateway = self.gateway().await?;
        let mut mappings = Vec::new();

        for index in 0..=MAX_MAPPING_INDEX {
            let request =
                ActionRequest::new("GetGenericPortMappingEntry").arg("NewPortMappingIndex", index);
            let response = match gateway.device().invoke(&request).await {
                Ok(response) => response,
                Err(Error::GatewayFault(fault)) => {
                    debug!(
                        index,
                        code = ?fault.code,
                        end_of_table = fault.is_array_index_invalid(),
                        "port mapping enumeration ended"
                    );
                    break;
                }
                Err(e) => return Err(e),
            };

            let mapping = PortMapping::from_response(&response, gateway.local_address())?;
            if filter.matches(&mapping) {
                mappings.push(mapping);
            }
        }

        Ok(mappings)
    }

    /// The gateway's public IP address, as the gateway reports it.
    ///
    /// # Errors
    ///
    /// Returns resolution and gateway errors, and `Error::MalformedResponse`
    /// if the reply has no address.
    pub async fn get_public_ip(&self) -> Result<String> {
        let gateway = self.gateway().await?;
        let response = gateway
            .device()
            .invoke(&ActionRequest::new("GetExternalIPAddress"))
            .await?;
        Ok(response.require("NewExternalIPAddress")?.to_string())
    }

    /// Release discovery resources. Safe to call repeatedly, and in bypass mode.
    pub fn close(&self) {
        self.ssdp.close();
    }

    /// Gateway for a mapping operation; a stale cached one is accepted
    async fn gateway(&self) -> Result<Gateway> {
        match self.resolve_gateway().await {
            Err(Error::DiscoveryTimeout {
                stale: Some(gateway),
            }) => {
                debug!(
                    "discovery timed out, using last known gateway {}",
                    gateway.control_location()
                );
                Ok(gateway)
            }
            resolved => resolved,
        }
    }

    async fn discover(&self) -> Result<Gateway> {
        let mut search = self
            .ssdp
            .search_within(IGD_DEVICE, self.config.timeout)
            .await?;
        let first = search.next().await;
        search.end();

        match first {
            Some(announcement) => {
                debug!(
                    "gateway at {} answered on {}",
                    announcement.location, announcement.responding_address
                );
                Ok(Gateway::new(
                    Device::with_client(announcement.location, self.http.clone()),
                    announcement.responding_address,
                ))
            }
            None => Err(Error::DiscoveryTimeout { stale: None }),
        }
    }
}
