//! Error types for gateway discovery and control.

use crate::client::Gateway;
use thiserror::Error;

/// UPnP error code a gateway returns when `GetGenericPortMappingEntry`
/// is asked for an index past the end of its table.
pub const ARRAY_INDEX_INVALID: u16 = 713;

/// Result alias used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Gateway client errors
#[derive(Debug, Error)]
pub enum Error {
    /// No gateway answered the discovery query before the deadline.
    ///
    /// When the client caches resolutions, `stale` carries the last gateway
    /// that was successfully resolved. The caller decides whether to trust it.
    #[error("timed out while searching for the gateway")]
    DiscoveryTimeout {
        /// Last-known-good gateway, if caching is enabled and one exists
        stale: Option<Gateway>,
    },

    /// A response was missing an expected element or could not be parsed
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The gateway rejected an action with a protocol-level fault
    #[error("gateway fault: {0}")]
    GatewayFault(#[from] ActionFault),

    /// The client was configured inconsistently
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A mapping request could not be turned into action arguments
    #[error("invalid mapping: {0}")]
    InvalidMapping(String),

    /// A search is already running on this discovery engine
    #[error("a search is already in progress on this engine")]
    SearchInProgress,

    /// The discovery engine has been closed
    #[error("discovery engine is closed")]
    Closed,

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL could not be parsed or joined
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns the fault if this error came from the gateway itself.
    #[must_use]
    pub fn as_fault(&self) -> Option<&ActionFault> {
        match self {
            Self::GatewayFault(fault) => Some(fault),
            _ => None,
        }
    }

    /// Returns the stale gateway carried by a discovery timeout, if any.
    #[must_use]
    pub fn stale_gateway(&self) -> Option<&Gateway> {
        match self {
            Self::DiscoveryTimeout { stale } => stale.as_ref(),
            _ => None,
        }
    }
}

/// A classified SOAP fault returned by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{description} (HTTP {status}, UPnP error {})", display_code(.code))]
pub struct ActionFault {
    /// HTTP status of the faulting response
    pub status: u16,
    /// UPnP `errorCode`, when the body carried one
    pub code: Option<u16>,
    /// UPnP `errorDescription`, else the SOAP `faultstring`
    pub description: String,
    /// Raw response body, kept for diagnostics
    pub body: String,
}

impl ActionFault {
    /// Whether this fault marks the end of the port mapping table.
    ///
    /// Vendors disagree on how they report it: some send error code 713,
    /// others only put `SpecifiedArrayIndexInvalid` in the description.
    #[must_use]
    pub fn is_array_index_invalid(&self) -> bool {
        self.code == Some(ARRAY_INDEX_INVALID) || self.body.contains("ArrayIndexInvalid")
    }
}

fn display_code(code: &Option<u16>) -> String {
    code.map_or_else(|| "n/a".to_string(), |c| c.to_string())
}
