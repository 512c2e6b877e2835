//! Device Control Channel
//!
//! A [`Device`] wraps the description URL of one gateway. The first call
//! that needs the control endpoint fetches and parses the description; the
//! result is kept for the lifetime of the `Device`. Every [`Device::invoke`]
//! is exactly one HTTP request, with no retries.
//!
//! # Example
//!
//! ```rust,no_run
//! use nat_upnp::device::{ActionRequest, Device};
//!
//! # async fn example() -> Result<(), nat_upnp::Error> {
//! let device = Device::new("http://192.168.1.1:5000/rootDesc.xml".parse()?)?;
//! let reply = device.invoke(&ActionRequest::new("GetExternalIPAddress")).await?;
//! println!("{:?}", reply.get("NewExternalIPAddress"));
//! # Ok(())
//! # }
//! ```

pub mod description;
pub mod soap;

pub use description::{ControlPoint, DeviceDescription, DeviceInfo};
pub use soap::{ActionRequest, ActionResponse};

use crate::error::{ActionFault, Result};
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::debug;
use url::Url;

/// Timeout of a single HTTP exchange with the gateway
pub(crate) const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Control channel to one gateway
#[derive(Debug)]
pub struct Device {
    location: Url,
    http: reqwest::Client,
    resolved: OnceCell<DeviceDescription>,
}

impl Device {
    /// Create a channel for the description at `location`.
    ///
    /// No network activity happens until the first action.
    ///
    /// # Errors
    ///
    /// Returns `Error::Http` if the HTTP client cannot be built.
    pub fn new(location: Url) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self::with_client(location, http))
    }

    /// Create a channel that shares an existing HTTP client
    #[must_use]
    pub fn with_client(location: Url, http: reqwest::Client) -> Self {
        Self {
            location,
            http,
            resolved: OnceCell::new(),
        }
    }

    /// The description URL this channel was created from.
    ///
    /// Handing it to a client as its explicit URL skips discovery next time.
    #[must_use]
    pub fn description(&self) -> &Url {
        &self.location
    }

    /// Control endpoint of the port mapping service
    ///
    /// # Errors
    ///
    /// Returns an error if the description cannot be fetched or parsed.
    pub async fn control_point(&self) -> Result<&ControlPoint> {
        Ok(&self.resolve().await?.control)
    }

    /// Metadata of the root device
    ///
    /// # Errors
    ///
    /// Returns an error if the description cannot be fetched or parsed.
    pub async fn info(&self) -> Result<&DeviceInfo> {
        Ok(&self.resolve().await?.info)
    }

    /// Invoke an action on the port mapping service.
    ///
    /// # Errors
    ///
    /// - `Error::GatewayFault` if the gateway answers with a non-success status
    /// - `Error::MalformedResponse` if a success reply cannot be parsed
    /// - `Error::Http` on transport failure
    pub async fn invoke(&self, request: &ActionRequest) -> Result<ActionResponse> {
        let control = self.control_point().await?;
        debug!(
            action = request.name(),
            url = %control.control_url,
            "invoking action"
        );

        let response = self
            .http
            .post(control.control_url.clone())
            .header(CONTENT_TYPE, soap::CONTENT_TYPE_XML)
            .header("SOAPAction", request.soap_action(&control.service_type))
            .body(request.envelope(&control.service_type))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ActionFault::parse(status.as_u16(), body).into());
        }

        ActionResponse::parse(request.name(), &body)
    }

    async fn resolve(&self) -> Result<&DeviceDescription> {
        self.resolved
            .get_or_try_init(|| async {
                debug!("fetching device description from {}", self.location);
                let xml = self
                    .http
                    .get(self.location.clone())
                    .send()
                    .await?
                    .error_for_status()?
                    .text()
                    .await?;
                DeviceDescription::parse(&xml, &self.location)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_timeout() {
        assert_eq!(HTTP_TIMEOUT, Duration::from_secs(10));
    }

    #[test]
    fn test_description_returns_location() {
        let location: Url = "http://192.168.1.1:5000/rootDesc.xml".parse().unwrap();
        let device = Device::new(location.clone()).unwrap();
        assert_eq!(device.description(), &location);
    }

    #[tokio::test]
    async fn test_unreachable_description() {
        // Port 9 (discard) on loopback is not expected to run an HTTP server
        let device = Device::new("http://127.0.0.1:9/rootDesc.xml".parse().unwrap()).unwrap();
        let result = device.invoke(&ActionRequest::new("GetExternalIPAddress")).await;
        assert!(matches!(result, Err(crate::Error::Http(_))));
    }
}
