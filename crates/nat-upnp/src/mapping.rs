//! Port mapping requests, results and filters.
//!
//! Callers describe the public and private side of a mapping in whatever
//! shape is convenient: a bare port, a numeric string, or an explicit
//! `{port, host}` pair. [`AddressSpec::normalize`] turns each of them into
//! an [`Endpoint`] with unset fields left as `None`; defaults are filled in
//! by the operation that builds the action, never here.

use crate::device::{ActionRequest, ActionResponse};
use crate::error::{Error, Result};
use regex::Regex;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

/// Description attached to mappings when the caller gives none
pub const DEFAULT_DESCRIPTION: &str = "node:nat:upnp";

/// Lease requested when the caller gives none, in seconds
pub const DEFAULT_TTL: u32 = 1800;

/// Transport protocol of a mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Protocol {
    /// TCP
    #[default]
    Tcp,
    /// UDP
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "TCP"),
            Self::Udp => write!(f, "UDP"),
        }
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("tcp") {
            Ok(Self::Tcp)
        } else if s.eq_ignore_ascii_case("udp") {
            Ok(Self::Udp)
        } else {
            Err(Error::InvalidMapping(format!("unknown protocol {s:?}")))
        }
    }
}

/// Canonical form of one side of a mapping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoint {
    /// Port, if given
    pub port: Option<u16>,
    /// Host, if given
    pub host: Option<String>,
}

impl Endpoint {
    /// Endpoint with only a port
    #[must_use]
    pub fn port(port: u16) -> Self {
        Self {
            port: Some(port),
            host: None,
        }
    }

    /// Set the host
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }
}

/// Caller-supplied address in any of the accepted shapes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressSpec {
    /// A bare port number
    Port(u16),
    /// A port number written as text
    Text(String),
    /// An explicit port/host pair
    Endpoint(Endpoint),
}

impl AddressSpec {
    /// Canonical `{port, host}` pair.
    ///
    /// Text that is not a port number yields an empty endpoint.
    #[must_use]
    pub fn normalize(&self) -> Endpoint {
        match self {
            Self::Port(port) => Endpoint::port(*port),
            Self::Text(text) => text
                .trim()
                .parse()
                .map(Endpoint::port)
                .unwrap_or_default(),
            Self::Endpoint(endpoint) => endpoint.clone(),
        }
    }
}

impl From<u16> for AddressSpec {
    fn from(port: u16) -> Self {
        Self::Port(port)
    }
}

impl From<&str> for AddressSpec {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for AddressSpec {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Endpoint> for AddressSpec {
    fn from(endpoint: Endpoint) -> Self {
        Self::Endpoint(endpoint)
    }
}

impl From<SocketAddr> for AddressSpec {
    fn from(addr: SocketAddr) -> Self {
        Self::Endpoint(Endpoint::port(addr.port()).with_host(addr.ip().to_string()))
    }
}

/// Request to open a port on the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPortMapping {
    /// Public side; its port is mandatory
    pub public: AddressSpec,
    /// Private side; defaults to the public port on the local address
    pub private: Option<AddressSpec>,
    /// Protocol, TCP when unset
    pub protocol: Option<Protocol>,
    /// Description stored on the gateway
    pub description: Option<String>,
    /// Lease in seconds; 0 asks the gateway for no expiry
    pub ttl: Option<u32>,
}

impl NewPortMapping {
    /// Map the given public address
    #[must_use]
    pub fn new(public: impl Into<AddressSpec>) -> Self {
        Self {
            public: public.into(),
            private: None,
            protocol: None,
            description: None,
            ttl: None,
        }
    }

    /// Forward to this private address
    #[must_use]
    pub fn private(mut self, private: impl Into<AddressSpec>) -> Self {
        self.private = Some(private.into());
        self
    }

    /// Set the protocol
    #[must_use]
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// Set the description
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the lease in seconds
    #[must_use]
    pub fn ttl(mut self, ttl: u32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Build the `AddPortMapping` action, filling defaults.
    ///
    /// `local_address` is the internal host when the private side names none.
    pub(crate) fn to_action(&self, local_address: IpAddr) -> Result<ActionRequest> {
        let public = self.public.normalize();
        let private = self
            .private
            .as_ref()
            .map(AddressSpec::normalize)
            .unwrap_or_default();

        let public_port = public
            .port
            .ok_or_else(|| Error::InvalidMapping("public port is required".to_string()))?;

        Ok(ActionRequest::new("AddPortMapping")
            .arg("NewRemoteHost", public.host.unwrap_or_default())
            .arg("NewExternalPort", public_port)
            .arg("NewProtocol", self.protocol.unwrap_or_default())
            .arg("NewInternalPort", private.port.unwrap_or(public_port))
            .arg(
                "NewInternalClient",
                private.host.unwrap_or_else(|| local_address.to_string()),
            )
            .arg("NewEnabled", 1)
            .arg(
                "NewPortMappingDescription",
                self.description.as_deref().unwrap_or(DEFAULT_DESCRIPTION),
            )
            .arg("NewLeaseDuration", self.ttl.unwrap_or(DEFAULT_TTL)))
    }
}

/// Request to close a port on the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletePortMapping {
    /// Public side; its port is mandatory
    pub public: AddressSpec,
    /// Protocol, TCP when unset
    pub protocol: Option<Protocol>,
}

impl DeletePortMapping {
    /// Remove the mapping on the given public address
    #[must_use]
    pub fn new(public: impl Into<AddressSpec>) -> Self {
        Self {
            public: public.into(),
            protocol: None,
        }
    }

    /// Set the protocol
    #[must_use]
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    pub(crate) fn to_action(&self) -> Result<ActionRequest> {
        let public = self.public.normalize();
        let public_port = public
            .port
            .ok_or_else(|| Error::InvalidMapping("public port is required".to_string()))?;

        Ok(ActionRequest::new("DeletePortMapping")
            .arg("NewRemoteHost", public.host.unwrap_or_default())
            .arg("NewExternalPort", public_port)
            .arg("NewProtocol", self.protocol.unwrap_or_default()))
    }
}

/// Host and port of one side of an existing mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPort {
    /// Host; empty on the remote side means "any"
    pub host: String,
    /// Port
    pub port: u16,
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let host = if self.host.is_empty() { "*" } else { &self.host };
        write!(f, "{host}:{}", self.port)
    }
}

/// A mapping as reported by the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    /// Public side
    pub remote: HostPort,
    /// Private side
    pub internal: HostPort,
    /// Protocol
    pub protocol: Protocol,
    /// Whether the gateway reports the mapping as active
    pub enabled: bool,
    /// Stored description
    pub description: String,
    /// Remaining lease in seconds; 0 for no expiry
    pub lease_seconds: u32,
    /// Whether the mapping forwards to the local address it was enumerated from
    pub is_local: bool,
}

impl PortMapping {
    /// Project a `GetGenericPortMappingEntry` reply.
    pub(crate) fn from_response(response: &ActionResponse, local_address: IpAddr) -> Result<Self> {
        let internal_host = response.require("NewInternalClient")?.to_string();
        let protocol = response
            .require("NewProtocol")?
            .parse()
            .map_err(|e| Error::MalformedResponse(format!("NewProtocol: {e}")))?;

        Ok(Self {
            remote: HostPort {
                host: response.get("NewRemoteHost").unwrap_or_default().to_string(),
                port: response.parse_field("NewExternalPort")?,
            },
            is_local: internal_host
                .parse::<IpAddr>()
                .is_ok_and(|ip| ip == local_address),
            internal: HostPort {
                host: internal_host,
                port: response.parse_field("NewInternalPort")?,
            },
            protocol,
            enabled: response.require("NewEnabled")? == "1",
            description: response
                .get("NewPortMappingDescription")
                .unwrap_or_default()
                .to_string(),
            lease_seconds: response.parse_field("NewLeaseDuration")?,
        })
    }
}

/// How to match mapping descriptions
#[derive(Debug, Clone)]
pub enum DescriptionFilter {
    /// Description contains this text
    Contains(String),
    /// Description matches this pattern anywhere
    Pattern(Regex),
}

impl DescriptionFilter {
    fn matches(&self, description: &str) -> bool {
        match self {
            Self::Contains(text) => description.contains(text.as_str()),
            Self::Pattern(pattern) => pattern.is_match(description),
        }
    }
}

/// Which enumerated mappings to keep
#[derive(Debug, Clone, Default)]
pub struct MappingFilter {
    /// Keep only mappings that forward to the local address
    pub local: bool,
    /// Keep only mappings whose description matches
    pub description: Option<DescriptionFilter>,
}

impl MappingFilter {
    /// Keep everything
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Keep only local mappings
    #[must_use]
    pub fn local(mut self) -> Self {
        self.local = true;
        self
    }

    /// Keep mappings whose description contains `text`
    #[must_use]
    pub fn description_contains(mut self, text: impl Into<String>) -> Self {
        self.description = Some(DescriptionFilter::Contains(text.into()));
        self
    }

    /// Keep mappings whose description matches `pattern`
    #[must_use]
    pub fn description_pattern(mut self, pattern: Regex) -> Self {
        self.description = Some(DescriptionFilter::Pattern(pattern));
        self
    }

    /// Whether `mapping` passes the filter
    #[must_use]
    pub fn matches(&self, mapping: &PortMapping) -> bool {
        if self.local && !mapping.is_local {
            return false;
        }
        self.description
            .as_ref()
            .is_none_or(|filter| filter.matches(&mapping.description))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const LOCAL: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50));

    fn args(request: &ActionRequest) -> Vec<(&str, &str)> {
        request
            .args()
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }

    fn entry(internal: &str, description: &str) -> ActionResponse {
        let body = format!(
            "<s:Envelope xmlns:s=\"http://schemas.xmlsoap.org/soap/envelope/\"><s:Body>\
             <u:GetGenericPortMappingEntryResponse xmlns:u=\"urn:schemas-upnp-org:service:WANIPConnection:1\">\
             <NewRemoteHost></NewRemoteHost><NewExternalPort>8080</NewExternalPort>\
             <NewProtocol>udp</NewProtocol><NewInternalPort>80</NewInternalPort>\
             <NewInternalClient>{internal}</NewInternalClient><NewEnabled>1</NewEnabled>\
             <NewPortMappingDescription>{description}</NewPortMappingDescription>\
             <NewLeaseDuration>0</NewLeaseDuration>\
             </u:GetGenericPortMappingEntryResponse></s:Body></s:Envelope>"
        );
        ActionResponse::parse("GetGenericPortMappingEntry", &body).unwrap()
    }

    #[test]
    fn test_protocol_parse_and_display() {
        assert_eq!("tcp".parse::<Protocol>().unwrap(), Protocol::Tcp);
        assert_eq!("UDP".parse::<Protocol>().unwrap(), Protocol::Udp);
        assert_eq!("Udp".parse::<Protocol>().unwrap(), Protocol::Udp);
        assert!("sctp".parse::<Protocol>().is_err());
        assert_eq!(Protocol::Tcp.to_string(), "TCP");
        assert_eq!(Protocol::default(), Protocol::Tcp);
    }

    #[test]
    fn test_normalize_shapes() {
        assert_eq!(AddressSpec::from(8080).normalize(), Endpoint::port(8080));
        assert_eq!(AddressSpec::from("8080").normalize(), Endpoint::port(8080));
        assert_eq!(AddressSpec::from(" 443 ").normalize(), Endpoint::port(443));
        assert_eq!(AddressSpec::from("http").normalize(), Endpoint::default());

        let addr: SocketAddr = "10.0.0.2:22".parse().unwrap();
        assert_eq!(
            AddressSpec::from(addr).normalize(),
            Endpoint::port(22).with_host("10.0.0.2")
        );

        let host_only = Endpoint {
            port: None,
            host: Some("10.0.0.3".to_string()),
        };
        assert_eq!(AddressSpec::from(host_only.clone()).normalize(), host_only);
    }

    #[test]
    fn test_create_defaults() {
        let request = NewPortMapping::new(31234).to_action(LOCAL).unwrap();
        assert_eq!(request.name(), "AddPortMapping");
        assert_eq!(
            args(&request),
            vec![
                ("NewRemoteHost", ""),
                ("NewExternalPort", "31234"),
                ("NewProtocol", "TCP"),
                ("NewInternalPort", "31234"),
                ("NewInternalClient", "192.168.1.50"),
                ("NewEnabled", "1"),
                ("NewPortMappingDescription", DEFAULT_DESCRIPTION),
                ("NewLeaseDuration", "1800"),
            ]
        );
    }

    #[test]
    fn test_create_explicit_fields() {
        let request = NewPortMapping::new(31234)
            .private(Endpoint::port(7654).with_host("192.168.1.77"))
            .protocol(Protocol::Udp)
            .description("game server")
            .ttl(0)
            .to_action(LOCAL)
            .unwrap();
        let args = args(&request);
        assert_eq!(args[2], ("NewProtocol", "UDP"));
        assert_eq!(args[3], ("NewInternalPort", "7654"));
        assert_eq!(args[4], ("NewInternalClient", "192.168.1.77"));
        assert_eq!(args[6], ("NewPortMappingDescription", "game server"));
        assert_eq!(args[7], ("NewLeaseDuration", "0"));
    }

    #[test]
    fn test_missing_public_port() {
        let err = NewPortMapping::new("not-a-port").to_action(LOCAL).unwrap_err();
        assert!(matches!(err, Error::InvalidMapping(_)));

        let err = DeletePortMapping::new(Endpoint::default())
            .to_action()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidMapping(_)));
    }

    #[test]
    fn test_delete_arguments() {
        let request = DeletePortMapping::new("31234")
            .protocol(Protocol::Udp)
            .to_action()
            .unwrap();
        assert_eq!(request.name(), "DeletePortMapping");
        assert_eq!(
            args(&request),
            vec![
                ("NewRemoteHost", ""),
                ("NewExternalPort", "31234"),
                ("NewProtocol", "UDP"),
            ]
        );
    }

    #[test]
    fn test_projection() {
        let mapping = PortMapping::from_response(&entry("192.168.1.50", "web"), LOCAL).unwrap();
        assert_eq!(mapping.remote.host, "");
        assert_eq!(mapping.remote.port, 8080);
        assert_eq!(mapping.internal.host, "192.168.1.50");
        assert_eq!(mapping.internal.port, 80);
        assert_eq!(mapping.protocol, Protocol::Udp);
        assert!(mapping.enabled);
        assert_eq!(mapping.description, "web");
        assert_eq!(mapping.lease_seconds, 0);
        assert!(mapping.is_local);
        assert_eq!(mapping.remote.to_string(), "*:8080");

        let other = PortMapping::from_response(&entry("192.168.1.99", "web"), LOCAL).unwrap();
        assert!(!other.is_local);
    }

    #[test]
    fn test_projection_rejects_bad_fields() {
        let body = "<r><GetGenericPortMappingEntryResponse>\
                    <NewExternalPort>99999</NewExternalPort>\
                    </GetGenericPortMappingEntryResponse></r>";
        let response = ActionResponse::parse("GetGenericPortMappingEntry", body).unwrap();
        let err = PortMapping::from_response(&response, LOCAL).unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));
    }

    #[test]
    fn test_filter_description() {
        let backup = PortMapping::from_response(&entry("192.168.1.50", "my-backup-rule"), LOCAL)
            .unwrap();
        let other = PortMapping::from_response(&entry("192.168.1.50", "other"), LOCAL).unwrap();

        let contains = MappingFilter::all().description_contains("backup");
        assert!(contains.matches(&backup));
        assert!(!contains.matches(&other));

        let pattern = MappingFilter::all().description_pattern(Regex::new("^my-.*-rule$").unwrap());
        assert!(pattern.matches(&backup));
        assert!(!pattern.matches(&other));
    }

    #[test]
    fn test_filter_local() {
        let mine = PortMapping::from_response(&entry("192.168.1.50", "a"), LOCAL).unwrap();
        let theirs = PortMapping::from_response(&entry("192.168.1.99", "a"), LOCAL).unwrap();

        let filter = MappingFilter::all().local();
        assert!(filter.matches(&mine));
        assert!(!filter.matches(&theirs));
        assert!(MappingFilter::all().matches(&theirs));
    }
}
