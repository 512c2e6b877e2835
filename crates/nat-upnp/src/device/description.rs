//! Device Description Parsing
//!
//! The `LOCATION` of an SSDP reply points at an XML document listing the
//! device tree and the services each device exposes. Port mapping lives on
//! the WAN connection service of the gateway's WAN connection device:
//!
//! ```text
//! root
//! └── device (InternetGatewayDevice)
//!     └── deviceList / device (WANDevice)
//!         └── deviceList / device (WANConnectionDevice)
//!             └── serviceList / service
//!                 ├── serviceType  urn:schemas-upnp-org:service:WANIPConnection:1
//!                 └── controlURL   /ctl/IPConn
//! ```

use crate::error::{Error, Result};
use roxmltree::{Document, Node};
use url::Url;

/// Service type prefix of the IP WAN connection service (any version)
pub const WAN_IP_CONNECTION: &str = "urn:schemas-upnp-org:service:WANIPConnection:";

/// Service type prefix of the PPP WAN connection service (any version)
pub const WAN_PPP_CONNECTION: &str = "urn:schemas-upnp-org:service:WANPPPConnection:";

/// Where to send actions for the port mapping service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPoint {
    /// Absolute control URL
    pub control_url: Url,
    /// Full service type; also the SOAP namespace of its actions
    pub service_type: String,
}

/// Descriptive fields of the root device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Human readable name
    pub friendly_name: Option<String>,
    /// Manufacturer name
    pub manufacturer: Option<String>,
    /// Model name
    pub model_name: Option<String>,
}

/// Parsed device description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescription {
    /// Root device metadata
    pub info: DeviceInfo,
    /// Port mapping control endpoint
    pub control: ControlPoint,
}

impl DeviceDescription {
    /// Parse a description fetched from `location`.
    ///
    /// Relative control URLs are resolved against `<URLBase>` when the
    /// document has one, otherwise against `location`. An IP connection
    /// service is preferred over a PPP one.
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedResponse` if the document is not XML or has
    /// no WAN connection service, and `Error::Url` if its control URL cannot
    /// be resolved.
    pub fn parse(xml: &str, location: &Url) -> Result<Self> {
        let doc = Document::parse(xml)
            .map_err(|e| Error::MalformedResponse(format!("device description: {e}")))?;
        let root = doc.root_element();

        let base = child_text(root, "URLBase")
            .and_then(|base| Url::parse(base).ok())
            .unwrap_or_else(|| location.clone());

        let services: Vec<(&str, &str)> = root
            .descendants()
            .filter(|n| is_element_named(n, "service"))
            .filter_map(|service| {
                Some((
                    child_text(service, "serviceType")?,
                    child_text(service, "controlURL")?,
                ))
            })
            .collect();

        let (service_type, control_path) = services
            .iter()
            .find(|(ty, _)| ty.starts_with(WAN_IP_CONNECTION))
            .or_else(|| {
                services
                    .iter()
                    .find(|(ty, _)| ty.starts_with(WAN_PPP_CONNECTION))
            })
            .ok_or_else(|| {
                Error::MalformedResponse(
                    "device description has no WAN connection service".to_string(),
                )
            })?;

        let info = root
            .children()
            .find(|n| is_element_named(n, "device"))
            .map(|device| DeviceInfo {
                friendly_name: child_text(device, "friendlyName").map(str::to_string),
                manufacturer: child_text(device, "manufacturer").map(str::to_string),
                model_name: child_text(device, "modelName").map(str::to_string),
            })
            .unwrap_or_default();

        Ok(Self {
            info,
            control: ControlPoint {
                control_url: base.join(control_path)?,
                service_type: (*service_type).to_string(),
            },
        })
    }
}

/// Element match on local name; vendors differ on namespace prefixes.
pub(crate) fn is_element_named(node: &Node<'_, '_>, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == name
}

/// Trimmed, non-empty text of the first direct child named `name`
fn child_text<'a>(node: Node<'a, '_>, name: &str) -> Option<&'a str> {
    node.children()
        .find(|n| is_element_named(n, name))
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|text| !text.is_empty())
}
