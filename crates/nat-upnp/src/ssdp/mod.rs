//! SSDP Discovery Engine
//!
//! Locates UPnP devices on the local network without knowing any address
//! up front: an `M-SEARCH` query goes out to the SSDP multicast group and
//! every matching device answers with the URL of its description.
//!
//! # Sockets and responding addresses
//!
//! One unconnected UDP socket is bound per local IPv4 interface. The
//! address a reply arrives on is reported as the announcement's
//! `responding_address`; on multi-homed hosts this is the address the
//! gateway itself can reach us on, so it is never guessed afterwards.
//!
//! # Example
//!
//! ```rust,no_run
//! use nat_upnp::ssdp::{IGD_DEVICE, Ssdp};
//!
//! # async fn example() -> Result<(), nat_upnp::Error> {
//! let ssdp = Ssdp::new();
//! let mut search = ssdp.search(IGD_DEVICE).await?;
//!
//! if let Some(announcement) = search.next().await {
//!     search.end();
//!     println!("gateway at {} (via {})", announcement.location, announcement.responding_address);
//! }
//!
//! ssdp.close();
//! # Ok(())
//! # }
//! ```

pub mod message;

pub use message::{SSDP_ALL, SearchRequest, SearchResponse};

use crate::error::{Error, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use url::Url;

/// Device type URN of an Internet Gateway Device
pub const IGD_DEVICE: &str = "urn:schemas-upnp-org:device:InternetGatewayDevice:1";

/// SSDP multicast group and port (239.255.255.250:1900)
pub const SSDP_MULTICAST: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(239, 255, 255, 250), 1900));

/// Largest reply we expect from a device
const MAX_DATAGRAM: usize = 2048;

/// Announcements buffered between the listeners and the consumer
const CHANNEL_CAPACITY: usize = 16;

/// Discovery engine configuration
#[derive(Debug, Clone)]
pub struct SsdpConfig {
    /// Where `M-SEARCH` queries are sent
    pub target: SocketAddr,
    /// Local interfaces to search from. `None` means every non-loopback
    /// IPv4 interface on the host.
    pub interfaces: Option<Vec<Ipv4Addr>>,
    /// Response window hint (`MX`) in seconds
    pub mx: u8,
    /// Multicast TTL of outgoing queries
    pub ttl: u32,
    /// How long `search` keeps listening; `search_within` overrides it
    pub max_wait: Duration,
}

impl Default for SsdpConfig {
    fn default() -> Self {
        Self {
            target: SSDP_MULTICAST,
            interfaces: None,
            mx: 2,
            ttl: 4,
            max_wait: Duration::from_secs(10),
        }
    }
}

impl SsdpConfig {
    /// Restrict searching to a single local interface
    #[must_use]
    pub fn with_interface(mut self, addr: Ipv4Addr) -> Self {
        self.interfaces.get_or_insert_with(Vec::new).push(addr);
        self
    }

    /// Send queries somewhere other than the multicast group
    #[must_use]
    pub fn with_target(mut self, target: SocketAddr) -> Self {
        self.target = target;
        self
    }
}

/// A device that answered a search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    /// URL of the device description
    pub location: Url,
    /// Local interface address the reply was received on
    pub responding_address: IpAddr,
    /// Search target echoed by the device
    pub search_target: String,
    /// Unique service name, if the device sent one
    pub usn: Option<String>,
}

struct EngineState {
    closed: AtomicBool,
    searching: AtomicBool,
    shutdown: CancellationToken,
}

/// SSDP discovery engine
///
/// Runs at most one search at a time. Sockets live only as long as the
/// search that opened them; `close()` stops any running search and makes
/// the engine refuse new ones.
pub struct Ssdp {
    config: SsdpConfig,
    state: Arc<EngineState>,
}

impl Ssdp {
    /// Create an engine with the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(SsdpConfig::default())
    }

    /// Create an engine with a custom configuration
    #[must_use]
    pub fn with_config(config: SsdpConfig) -> Self {
        Self {
            config,
            state: Arc::new(EngineState {
                closed: AtomicBool::new(false),
                searching: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Engine configuration
    #[must_use]
    pub fn config(&self) -> &SsdpConfig {
        &self.config
    }

    /// Start searching for devices of the given type.
    ///
    /// The returned [`Search`] yields every matching announcement until it
    /// is ended, dropped, or `max_wait` elapses. No de-duplication is done.
    ///
    /// # Errors
    ///
    /// - `Error::Closed` if the engine has been closed
    /// - `Error::SearchInProgress` if another search is still running
    /// - `Error::Io` if the query could not be sent from any interface
    pub async fn search(&self, search_target: &str) -> Result<Search> {
        self.search_within(search_target, self.config.max_wait).await
    }

    /// Like [`search`](Self::search), but listening for `window` instead of
    /// the configured `max_wait`.
    ///
    /// # Errors
    ///
    /// Same as [`search`](Self::search).
    pub async fn search_within(&self, search_target: &str, window: Duration) -> Result<Search> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        if self
            .state
            .searching
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::SearchInProgress);
        }

        let cancel = self.state.shutdown.child_token();
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let search = Search {
            rx,
            cancel: cancel.clone(),
            deadline: Instant::now() + window,
            finished: AtomicBool::new(false),
            state: self.state.clone(),
        };

        let request = SearchRequest::new(self.config.target, search_target, self.config.mx);
        let payload = request.encode();

        let mut sent = 0usize;
        let mut last_error = None;
        for interface in self.interfaces() {
            let socket = match self.send_query(interface, &payload).await {
                Ok(socket) => socket,
                Err(e) => {
                    debug!("skipping interface {interface}: M-SEARCH failed: {e}");
                    last_error = Some(e);
                    continue;
                }
            };
            debug!(
                "M-SEARCH for {} sent to {} from {}",
                search_target, self.config.target, interface
            );
            sent += 1;

            tokio::spawn(listen(
                socket,
                search_target.to_string(),
                tx.clone(),
                cancel.clone(),
            ));
        }

        match last_error {
            Some(e) if sent == 0 => Err(e),
            _ => Ok(search),
        }
    }

    /// Stop any running search and release its sockets.
    ///
    /// Safe to call more than once.
    pub fn close(&self) {
        if !self.state.closed.swap(true, Ordering::AcqRel) {
            debug!("SSDP engine closed");
        }
        self.state.shutdown.cancel();
    }

    /// Whether `close()` has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    /// Whether a search is currently running
    #[must_use]
    pub fn is_searching(&self) -> bool {
        self.state.searching.load(Ordering::Acquire)
    }

    /// Bind a socket on `interface` and send the query from it
    async fn send_query(&self, interface: Ipv4Addr, payload: &[u8]) -> Result<UdpSocket> {
        let socket = bind_socket(interface, self.config.ttl)?;
        socket.send_to(payload, self.config.target).await?;
        Ok(socket)
    }

    fn interfaces(&self) -> Vec<Ipv4Addr> {
        let interfaces = match &self.config.interfaces {
            Some(interfaces) => interfaces.clone(),
            None => local_interfaces(),
        };
        if interfaces.is_empty() {
            vec![Ipv4Addr::UNSPECIFIED]
        } else {
            interfaces
        }
    }
}

impl Default for Ssdp {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Ssdp {
    fn drop(&mut self) {
        self.close();
    }
}

/// A running search
///
/// Ending the search (explicitly, by deadline, or by dropping it) is
/// resolved exactly once: listeners are cancelled and the engine becomes
/// free for the next search.
pub struct Search {
    rx: mpsc::Receiver<Announcement>,
    cancel: CancellationToken,
    deadline: Instant,
    finished: AtomicBool,
    state: Arc<EngineState>,
}

impl Search {
    /// Wait for the next matching announcement.
    ///
    /// Returns `None` once the search has ended or its deadline passed.
    pub async fn next(&mut self) -> Option<Announcement> {
        if self.is_ended() {
            self.finish();
            return None;
        }

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                self.finish();
                None
            }
            announcement = self.rx.recv() => announcement,
            () = tokio::time::sleep_until(self.deadline) => {
                trace!("SSDP search deadline reached");
                self.finish();
                None
            }
        }
    }

    /// Stop listening. Later replies are discarded.
    pub fn end(&self) {
        self.finish();
    }

    /// Whether the search has ended
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.finished.load(Ordering::Acquire) || self.cancel.is_cancelled()
    }

    fn finish(&self) {
        if !self.finished.swap(true, Ordering::AcqRel) {
            self.cancel.cancel();
            self.state.searching.store(false, Ordering::Release);
        }
    }
}

impl Drop for Search {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Receive replies on one socket until cancelled
async fn listen(
    socket: UdpSocket,
    search_target: String,
    tx: mpsc::Sender<Announcement>,
    cancel: CancellationToken,
) {
    let local_ip = match socket.local_addr() {
        Ok(addr) => addr.ip(),
        Err(e) => {
            debug!("SSDP listener has no local address: {e}");
            return;
        }
    };
    let mut buf = [0u8; MAX_DATAGRAM];

    loop {
        let (len, from) = tokio::select! {
            () = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(e) => {
                    debug!("SSDP receive on {local_ip} failed: {e}");
                    break;
                }
            },
        };

        let response = match SearchResponse::decode(&buf[..len]) {
            Ok(response) => response,
            Err(e) => {
                trace!("discarding datagram from {from}: {e}");
                continue;
            }
        };
        if !response.matches(&search_target) {
            trace!(
                "discarding reply from {from} for {:?}",
                response.search_target()
            );
            continue;
        }
        let Some(location) = response.location().and_then(|l| Url::parse(l).ok()) else {
            trace!("discarding reply from {from} without a usable LOCATION");
            continue;
        };

        let responding_address = if local_ip.is_unspecified() {
            route_local_address(from).await.unwrap_or(local_ip)
        } else {
            local_ip
        };

        let announcement = Announcement {
            location,
            responding_address,
            search_target: response
                .search_target()
                .unwrap_or(search_target.as_str())
                .to_string(),
            usn: response.usn().map(str::to_string),
        };
        debug!(
            "SSDP reply from {from}: {} (via {responding_address})",
            announcement.location
        );

        tokio::select! {
            () = cancel.cancelled() => break,
            sent = tx.send(announcement) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }

    trace!("SSDP listener on {local_ip} stopped");
}

/// Bind an unconnected UDP socket for multicast queries on `interface`
fn bind_socket(interface: Ipv4Addr, ttl: u32) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_multicast_ttl_v4(ttl)?;
    if !interface.is_unspecified() {
        if let Err(e) = socket.set_multicast_if_v4(&interface) {
            debug!("cannot select multicast interface {interface}: {e}");
        }
    }
    socket.bind(&SocketAddr::from((interface, 0)).into())?;
    socket.set_nonblocking(true)?;

    let std_socket: std::net::UdpSocket = socket.into();
    Ok(UdpSocket::from_std(std_socket)?)
}

/// Local address the kernel routes towards `remote` from.
///
/// Only needed when listening on the wildcard address, where the receiving
/// interface is not known from the socket itself. Connecting a UDP socket
/// sends nothing.
async fn route_local_address(remote: SocketAddr) -> Option<IpAddr> {
    let probe = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await.ok()?;
    probe.connect(remote).await.ok()?;
    probe.local_addr().ok().map(|addr| addr.ip())
}

/// Non-loopback IPv4 interface addresses of this host
fn local_interfaces() -> Vec<Ipv4Addr> {
    match local_ip_address::list_afinet_netifas() {
        Ok(interfaces) => interfaces
            .into_iter()
            .filter_map(|(_name, ip)| match ip {
                IpAddr::V4(ipv4) if !ipv4.is_loopback() => Some(ipv4),
                _ => None,
            })
            .collect(),
        Err(e) => {
            debug!("failed to list network interfaces: {e}");
            Vec::new()
        }
    }
}
