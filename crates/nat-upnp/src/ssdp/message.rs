//! SSDP Message Format
//!
//! SSDP rides on HTTP-shaped text datagrams. A search is an `M-SEARCH`
//! request sent to the multicast group; each device that matches answers
//! with a unicast `HTTP/1.1 200 OK` whose headers point at its description.
//!
//! ```text
//! M-SEARCH * HTTP/1.1                 HTTP/1.1 200 OK
//! HOST: 239.255.255.250:1900          CACHE-CONTROL: max-age=120
//! MAN: "ssdp:discover"                LOCATION: http://192.168.1.1:5000/rootDesc.xml
//! MX: 2                               ST: urn:schemas-upnp-org:device:...
//! ST: urn:schemas-upnp-org:device:... USN: uuid:...::urn:schemas-upnp-org:device:...
//! ```
//!
//! Header names are case-insensitive and vendors are inconsistent about
//! capitalization, so lookups here never compare names exactly.

use crate::error::{Error, Result};
use std::net::SocketAddr;

/// `ST` value that asks every device to respond
pub const SSDP_ALL: &str = "ssdp:all";

/// Outbound `M-SEARCH` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    /// Value of the `HOST` header (the multicast group and port)
    pub host: SocketAddr,
    /// Search target (`ST`), usually a device or service type URN
    pub search_target: String,
    /// Response window hint in seconds (`MX`)
    pub mx: u8,
}

impl SearchRequest {
    /// Create a search request for the given target
    #[must_use]
    pub fn new(host: SocketAddr, search_target: impl Into<String>, mx: u8) -> Self {
        Self {
            host,
            search_target: search_target.into(),
            mx,
        }
    }

    /// Encode the request as a datagram payload
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        format!(
            "M-SEARCH * HTTP/1.1\r\n\
             HOST: {}\r\n\
             MAN: \"ssdp:discover\"\r\n\
             MX: {}\r\n\
             ST: {}\r\n\
             \r\n",
            self.host, self.mx, self.search_target
        )
        .into_bytes()
    }

    /// Parse an `M-SEARCH` datagram.
    ///
    /// Only used by responders; the client side never receives requests.
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedResponse` if the datagram is not an
    /// `M-SEARCH` or lacks the `HOST`, `MAN` or `ST` headers.
    pub fn decode(datagram: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(datagram)
            .map_err(|_| Error::MalformedResponse("search request is not UTF-8".to_string()))?;
        let mut lines = text.split("\r\n");

        let start = lines.next().unwrap_or_default();
        if !start.starts_with("M-SEARCH * ") {
            return Err(Error::MalformedResponse(format!(
                "not a search request: {start:?}"
            )));
        }

        let headers = parse_headers(lines);
        let host = header(&headers, "host")
            .and_then(|h| h.parse().ok())
            .ok_or_else(|| Error::MalformedResponse("missing or invalid HOST".to_string()))?;
        if header(&headers, "man") != Some("\"ssdp:discover\"") {
            return Err(Error::MalformedResponse("missing MAN header".to_string()));
        }
        let search_target = header(&headers, "st")
            .ok_or_else(|| Error::MalformedResponse("missing ST header".to_string()))?
            .to_string();
        let mx = header(&headers, "mx")
            .and_then(|mx| mx.parse().ok())
            .unwrap_or(1);

        Ok(Self {
            host,
            search_target,
            mx,
        })
    }
}

/// Inbound reply to an `M-SEARCH`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResponse {
    /// HTTP status code from the status line
    pub status: u16,
    headers: Vec<(String, String)>,
}

impl SearchResponse {
    /// Build a `200 OK` reply; used by responders and tests.
    #[must_use]
    pub fn ok(location: &str, search_target: &str, usn: &str) -> Self {
        Self {
            status: 200,
            headers: vec![
                ("CACHE-CONTROL".to_string(), "max-age=120".to_string()),
                ("EXT".to_string(), String::new()),
                ("LOCATION".to_string(), location.to_string()),
                ("SERVER".to_string(), "nat-upnp/1.0 UPnP/1.1".to_string()),
                ("ST".to_string(), search_target.to_string()),
                ("USN".to_string(), usn.to_string()),
            ],
        }
    }

    /// Parse a reply datagram
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedResponse` if the datagram is not UTF-8 text
    /// or does not start with an HTTP status line.
    pub fn decode(datagram: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(datagram)
            .map_err(|_| Error::MalformedResponse("SSDP reply is not UTF-8".to_string()))?;
        let mut lines = text.split("\r\n");

        let status_line = lines.next().unwrap_or_default();
        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        if !version.starts_with("HTTP/") {
            return Err(Error::MalformedResponse(format!(
                "bad status line: {status_line:?}"
            )));
        }
        let status = parts
            .next()
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| Error::MalformedResponse(format!("bad status line: {status_line:?}")))?;

        Ok(Self {
            status,
            headers: parse_headers(lines),
        })
    }

    /// Encode the reply as a datagram payload
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = format!("HTTP/1.1 {} OK\r\n", self.status);
        for (name, value) in &self.headers {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out.into_bytes()
    }

    /// Look up a header by case-insensitive name
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        header(&self.headers, name)
    }

    /// `LOCATION`: URL of the device description
    #[must_use]
    pub fn location(&self) -> Option<&str> {
        self.header("location")
    }

    /// `ST`: the search target this reply answers
    #[must_use]
    pub fn search_target(&self) -> Option<&str> {
        self.header("st")
    }

    /// `USN`: unique service name
    #[must_use]
    pub fn usn(&self) -> Option<&str> {
        self.header("usn")
    }

    /// Whether this reply answers a search for `target`
    #[must_use]
    pub fn matches(&self, target: &str) -> bool {
        if self.status != 200 {
            return false;
        }
        target == SSDP_ALL || self.search_target() == Some(target)
    }
}

fn parse_headers<'a>(lines: impl Iterator<Item = &'a str>) -> Vec<(String, String)> {
    lines
        .take_while(|line| !line.is_empty())
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect()
}

fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}
