//! SOAP action envelopes and responses.
//!
//! Every action is an HTTP POST of an envelope whose body element is named
//! after the action in the service's namespace:
//!
//! ```text
//! <s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="...">
//!   <s:Body>
//!     <u:GetExternalIPAddress xmlns:u="urn:schemas-upnp-org:service:WANIPConnection:1"/>
//!   </s:Body>
//! </s:Envelope>
//! ```
//!
//! The reply carries a `<ActionName>Response` element with one child per
//! output argument. Some gateways prefix it (`<u:...Response>`), others
//! declare a default namespace instead, so it is located by local name.
//! Failures come back as HTTP 500 with a `<s:Fault>` whose detail holds a
//! `<UPnPError>` with `errorCode` and `errorDescription`.

use super::description::is_element_named;
use crate::error::{ActionFault, Error, Result};
use roxmltree::Document;
use std::collections::BTreeMap;
use std::str::FromStr;

const ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const ENCODING_STYLE: &str = "http://schemas.xmlsoap.org/soap/encoding/";

/// Content type of action requests
pub const CONTENT_TYPE_XML: &str = "text/xml; charset=\"utf-8\"";

/// A named action with ordered input arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRequest {
    name: String,
    args: Vec<(String, String)>,
}

impl ActionRequest {
    /// Start a request for the named action
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// Append an argument; order is preserved on the wire
    #[must_use]
    pub fn arg(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.args.push((name.into(), value.to_string()));
        self
    }

    /// Action name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Arguments in wire order
    #[must_use]
    pub fn args(&self) -> &[(String, String)] {
        &self.args
    }

    /// Render the SOAP envelope for this action in `service_type`'s namespace
    #[must_use]
    pub fn envelope(&self, service_type: &str) -> String {
        let mut body = String::new();
        for (name, value) in &self.args {
            body.push_str(&format!("<{name}>{}</{name}>", escape(value)));
        }

        format!(
            "<?xml version=\"1.0\"?>\
             <s:Envelope xmlns:s=\"{ENVELOPE_NS}\" s:encodingStyle=\"{ENCODING_STYLE}\">\
             <s:Body>\
             <u:{action} xmlns:u=\"{ns}\">{body}</u:{action}>\
             </s:Body>\
             </s:Envelope>",
            action = self.name,
            ns = escape(service_type),
        )
    }

    /// `SOAPAction` header value: `"<service type>#<action>"`, quoted
    #[must_use]
    pub fn soap_action(&self, service_type: &str) -> String {
        format!("\"{service_type}#{}\"", self.name)
    }
}

/// Output arguments of a successful action, as raw strings.
///
/// Converting values (integers, `"0"`/`"1"` booleans) is up to the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionResponse {
    fields: BTreeMap<String, String>,
}

impl ActionResponse {
    /// Parse the body of a successful reply to `action`.
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedResponse` if the body is not XML or has no
    /// `<action>Response` element.
    pub fn parse(action: &str, body: &str) -> Result<Self> {
        let doc = Document::parse(body)
            .map_err(|e| Error::MalformedResponse(format!("{action} reply: {e}")))?;
        let element = format!("{action}Response");

        let response = doc
            .descendants()
            .find(|n| is_element_named(n, &element))
            .ok_or_else(|| Error::MalformedResponse(format!("no <{element}> in reply")))?;

        let fields = response
            .children()
            .filter(|n| n.is_element())
            .map(|n| {
                (
                    n.tag_name().name().to_string(),
                    n.text().unwrap_or_default().trim().to_string(),
                )
            })
            .collect();

        Ok(Self { fields })
    }

    /// Raw value of a field
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Raw value of a field that must be present
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedResponse` if the field is absent.
    pub fn require(&self, name: &str) -> Result<&str> {
        self.get(name)
            .ok_or_else(|| Error::MalformedResponse(format!("missing field {name}")))
    }

    /// Parse a required field
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedResponse` if the field is absent or does not
    /// parse as `T`.
    pub fn parse_field<T: FromStr>(&self, name: &str) -> Result<T> {
        let raw = self.require(name)?;
        raw.parse()
            .map_err(|_| Error::MalformedResponse(format!("field {name} has bad value {raw:?}")))
    }

    /// Number of fields
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the action returned no fields
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate over `(name, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl ActionFault {
    /// Classify a non-success reply.
    ///
    /// Bodies that are not XML still produce a fault, with no code and the
    /// HTTP status as description.
    #[must_use]
    pub fn parse(status: u16, body: String) -> Self {
        let (code, description) = match Document::parse(&body) {
            Ok(doc) => {
                let text = |name: &str| {
                    doc.descendants()
                        .find(|n| is_element_named(n, name))
                        .and_then(|n| n.text())
                        .map(|t| t.trim().to_string())
                };
                let code = text("errorCode").and_then(|c| c.parse().ok());
                let description = text("errorDescription").or_else(|| text("faultstring"));
                (code, description)
            }
            Err(_) => (None, None),
        };

        Self {
            status,
            code,
            description: description.unwrap_or_else(|| format!("HTTP {status}")),
            body,
        }
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
