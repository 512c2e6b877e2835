//! Integration tests for the gateway client.
//!
//! Drives `nat_upnp::Client` end to end against the in-process mock gateway:
//! discovery over loopback SSDP, description resolution, and the four port
//! mapping actions over SOAP.

use nat_upnp::{
    Client, ClientConfig, DeletePortMapping, Endpoint, Error, MappingFilter, NewPortMapping,
    Protocol,
};
use nat_upnp_integration_tests::{MockGateway, MockMapping, SsdpResponder};
use regex::Regex;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Discovery timeout for tests that expect a gateway to answer
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Discovery timeout for tests that expect silence
const SHORT_TIMEOUT: Duration = Duration::from_millis(300);

fn bypass_client(gateway: &MockGateway) -> Client {
    Client::new(gateway.bypass_config()).expect("bypass client")
}

// ============================================================================
// Mapping Lifecycle
// ============================================================================

/// Create, enumerate, remove, enumerate again.
#[tokio::test]
async fn test_mapping_lifecycle() {
    let gateway = MockGateway::start().await;
    let client = bypass_client(&gateway);

    client
        .create_mapping(&NewPortMapping::new(31234).private(7654).ttl(0))
        .await
        .expect("create mapping");

    let mappings = client.get_mappings(&MappingFilter::all()).await.unwrap();
    assert_eq!(mappings.len(), 1);
    let mapping = &mappings[0];
    assert_eq!(mapping.remote.port, 31234);
    assert_eq!(mapping.internal.port, 7654);
    assert!(mapping.enabled);
    assert_eq!(mapping.lease_seconds, 0);
    assert_eq!(mapping.protocol, Protocol::Tcp);
    assert_eq!(mapping.description, "node:nat:upnp");
    assert_eq!(mapping.internal.host, "127.0.0.1");
    assert!(mapping.is_local);

    client
        .remove_mapping(&DeletePortMapping::new(31234))
        .await
        .expect("remove mapping");

    let mappings = client.get_mappings(&MappingFilter::all()).await.unwrap();
    assert!(mappings.iter().all(|m| m.remote.port != 31234));
    assert!(gateway.mappings().is_empty());
}

/// Create defaults reach the gateway as the action arguments.
#[tokio::test]
async fn test_create_mapping_defaults() {
    let gateway = MockGateway::start().await;
    let client = bypass_client(&gateway);

    client
        .create_mapping(&NewPortMapping::new("8080"))
        .await
        .unwrap();

    let table = gateway.mappings();
    assert_eq!(table.len(), 1);
    assert_eq!(table[0].remote_host, "");
    assert_eq!(table[0].external_port, 8080);
    assert_eq!(table[0].internal_port, 8080);
    assert_eq!(table[0].protocol, "TCP");
    assert_eq!(table[0].internal_client, "127.0.0.1");
    assert!(table[0].enabled);
    assert_eq!(table[0].lease, 1800);
}

/// An explicit private host overrides the local address.
#[tokio::test]
async fn test_create_mapping_for_other_host() {
    let gateway = MockGateway::start().await;
    let client = bypass_client(&gateway);

    client
        .create_mapping(
            &NewPortMapping::new(5000)
                .private(Endpoint::port(5001).with_host("192.168.1.77"))
                .protocol(Protocol::Udp)
                .description("media"),
        )
        .await
        .unwrap();

    let mappings = client.get_mappings(&MappingFilter::all()).await.unwrap();
    assert_eq!(mappings.len(), 1);
    assert_eq!(mappings[0].protocol, Protocol::Udp);
    assert_eq!(mappings[0].internal.host, "192.168.1.77");
    assert!(!mappings[0].is_local);
}

/// Removing a mapping that is not there is a gateway fault.
#[tokio::test]
async fn test_remove_missing_mapping_faults() {
    let gateway = MockGateway::start().await;
    let client = bypass_client(&gateway);

    let err = client
        .remove_mapping(&DeletePortMapping::new(4444).protocol(Protocol::Udp))
        .await
        .unwrap_err();

    let fault = err.as_fault().expect("gateway fault");
    assert_eq!(fault.status, 500);
    assert_eq!(fault.code, Some(714));
    assert_eq!(fault.description, "NoSuchEntryInArray");
    assert!(fault.body.contains("UPnPError"));
}

/// A request without a public port never reaches the gateway.
#[tokio::test]
async fn test_invalid_mapping_sends_nothing() {
    let gateway = MockGateway::start().await;
    let client = bypass_client(&gateway);

    let err = client
        .create_mapping(&NewPortMapping::new("any"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidMapping(_)));
    assert!(gateway.actions().is_empty());
}

// ============================================================================
// Enumeration
// ============================================================================

/// An empty table ends enumeration at index 0 without an error.
#[tokio::test]
async fn test_empty_table() {
    let gateway = MockGateway::start().await;
    let client = bypass_client(&gateway);

    let mappings = client.get_mappings(&MappingFilter::all()).await.unwrap();
    assert!(mappings.is_empty());
    assert_eq!(gateway.actions(), vec!["GetGenericPortMappingEntry"]);
}

/// Any fault at index 0 means "no mappings", whatever its code.
#[tokio::test]
async fn test_fault_at_first_index_is_empty_list() {
    let gateway = MockGateway::start().await;
    gateway.insert_mapping(MockMapping::tcp(1000, 1000, "127.0.0.1", "hidden"));
    gateway.fail_enumeration_with(501);

    let client = bypass_client(&gateway);
    let mappings = client.get_mappings(&MappingFilter::all()).await.unwrap();
    assert!(mappings.is_empty());
}

/// A fault other than end-of-table at a later index still ends the list.
#[tokio::test]
async fn test_fault_at_later_index_ends_list() {
    let gateway = MockGateway::start().await;
    for port in [4000, 4001, 4002, 4003] {
        gateway.insert_mapping(MockMapping::tcp(port, port, "127.0.0.1", "partial"));
    }
    gateway.fail_enumeration_at(2, 501);

    let client = bypass_client(&gateway);
    let mappings = client.get_mappings(&MappingFilter::all()).await.unwrap();
    let ports: Vec<u16> = mappings.iter().map(|m| m.remote.port).collect();
    assert_eq!(ports, vec![4000, 4001]);

    // Nothing is requested past the faulting index
    assert_eq!(gateway.actions().len(), 3);
}

/// Entries are requested strictly in order until the end-of-table fault.
#[tokio::test]
async fn test_enumeration_is_sequential() {
    let gateway = MockGateway::start().await;
    for port in [1000, 1001, 1002] {
        gateway.insert_mapping(MockMapping::tcp(port, port, "127.0.0.1", "seq"));
    }

    let client = bypass_client(&gateway);
    let mappings = client.get_mappings(&MappingFilter::all()).await.unwrap();
    let ports: Vec<u16> = mappings.iter().map(|m| m.remote.port).collect();
    assert_eq!(ports, vec![1000, 1001, 1002]);

    // Three entries plus the request that hit the end of the table
    assert_eq!(gateway.actions().len(), 4);
}

/// Two enumerations of an unchanged table are identical.
#[tokio::test]
async fn test_enumeration_is_stable() {
    let gateway = MockGateway::start().await;
    gateway.insert_mapping(MockMapping::tcp(2000, 22, "192.168.1.10", "ssh"));
    gateway.insert_mapping(MockMapping::tcp(2001, 80, "127.0.0.1", "web"));

    let client = bypass_client(&gateway);
    let first = client.get_mappings(&MappingFilter::all()).await.unwrap();
    let second = client.get_mappings(&MappingFilter::all()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
}

/// The local filter keeps only mappings forwarding to the local address.
#[tokio::test]
async fn test_local_filter() {
    let gateway = MockGateway::start().await;
    gateway.insert_mapping(MockMapping::tcp(3000, 3000, "192.168.1.99", "theirs"));
    gateway.insert_mapping(MockMapping::tcp(3001, 3001, "127.0.0.1", "mine"));

    let client = bypass_client(&gateway);
    let mappings = client
        .get_mappings(&MappingFilter::all().local())
        .await
        .unwrap();

    assert_eq!(mappings.len(), 1);
    assert_eq!(mappings[0].description, "mine");
    assert_eq!(mappings[0].internal.host, LOOPBACK.to_string());
}

/// Substring and pattern description filters.
#[tokio::test]
async fn test_description_filter() {
    let gateway = MockGateway::start().await;
    gateway.insert_mapping(MockMapping::tcp(4000, 4000, "127.0.0.1", "my-backup-rule"));
    gateway.insert_mapping(MockMapping::tcp(4001, 4001, "127.0.0.1", "other"));

    let client = bypass_client(&gateway);

    let backup = client
        .get_mappings(&MappingFilter::all().description_contains("backup"))
        .await
        .unwrap();
    assert_eq!(backup.len(), 1);
    assert_eq!(backup[0].description, "my-backup-rule");

    let pattern = Regex::new("^oth").unwrap();
    let other = client
        .get_mappings(&MappingFilter::all().description_pattern(pattern))
        .await
        .unwrap();
    assert_eq!(other.len(), 1);
    assert_eq!(other[0].remote.port, 4001);
}

// ============================================================================
// Public IP and Device Channel
// ============================================================================

/// The public IP is returned exactly as the gateway reports it.
#[tokio::test]
async fn test_public_ip() {
    let gateway = MockGateway::start().await;
    let client = bypass_client(&gateway);

    assert_eq!(client.get_public_ip().await.unwrap(), "203.0.113.5");

    gateway.set_external_ip("198.51.100.7");
    assert_eq!(client.get_public_ip().await.unwrap(), "198.51.100.7");
}

/// The description is fetched once per gateway handle.
#[tokio::test]
async fn test_description_fetched_once() {
    let gateway = MockGateway::start().await;
    let client = bypass_client(&gateway);

    client.get_public_ip().await.unwrap();
    client.get_mappings(&MappingFilter::all()).await.unwrap();
    client.create_mapping(&NewPortMapping::new(6000)).await.unwrap();

    assert_eq!(gateway.description_fetches(), 1);
}

/// Device metadata comes from the description.
#[tokio::test]
async fn test_device_info() {
    let gateway = MockGateway::start().await;
    let client = bypass_client(&gateway);

    let handle = client.resolve_gateway().await.unwrap();
    let info = handle.device().info().await.unwrap();
    assert_eq!(info.friendly_name.as_deref(), Some("Mock Gateway"));
    assert_eq!(info.model_name.as_deref(), Some("mock-1"));

    let control = handle.device().control_point().await.unwrap();
    assert_eq!(control.control_url.path(), "/ctl/IPConn");
    assert_eq!(handle.control_location(), &gateway.location());
}

// ============================================================================
// Resolution Modes
// ============================================================================

/// Bypass without a local address fails before any I/O.
#[tokio::test]
async fn test_bypass_requires_local_address() {
    let gateway = MockGateway::start().await;
    let config = ClientConfig {
        url: Some(gateway.location()),
        ..ClientConfig::default()
    };

    assert!(matches!(Client::new(config), Err(Error::Configuration(_))));
    assert_eq!(gateway.description_fetches(), 0);
}

/// Discovery finds the gateway and reports the interface it answered on.
#[tokio::test]
async fn test_discovery_end_to_end() {
    let gateway = MockGateway::start().await;
    let responder = SsdpResponder::start(gateway.location()).await;
    let client = Client::new(responder.client_config(DISCOVERY_TIMEOUT)).unwrap();

    let handle = client.resolve_gateway().await.expect("gateway discovered");
    assert_eq!(handle.control_location(), &gateway.location());
    assert_eq!(handle.local_address(), LOOPBACK);

    client
        .create_mapping(&NewPortMapping::new(7000))
        .await
        .unwrap();
    assert_eq!(gateway.mappings()[0].internal_client, "127.0.0.1");

    client.close();
    client.close();
}

/// Without caching, a silent network is a plain timeout.
#[tokio::test]
async fn test_discovery_timeout_without_cache() {
    let gateway = MockGateway::start().await;
    let responder = SsdpResponder::start(gateway.location()).await;
    let client = Client::new(responder.client_config(SHORT_TIMEOUT)).unwrap();

    client.resolve_gateway().await.unwrap();
    responder.go_silent();

    let err = client.resolve_gateway().await.unwrap_err();
    assert!(matches!(err, Error::DiscoveryTimeout { stale: None }));

    let err = client.get_public_ip().await.unwrap_err();
    assert!(matches!(err, Error::DiscoveryTimeout { .. }));
}

/// With caching, the last gateway rides along with the timeout.
#[tokio::test]
async fn test_discovery_timeout_with_cache() {
    let gateway = MockGateway::start().await;
    let responder = SsdpResponder::start(gateway.location()).await;
    let client =
        Client::new(responder.client_config(SHORT_TIMEOUT).with_cache(true)).unwrap();

    let first = client.resolve_gateway().await.unwrap();
    responder.go_silent();

    let err = client.resolve_gateway().await.unwrap_err();
    let stale = err.stale_gateway().expect("stale gateway");
    assert_eq!(stale.control_location(), first.control_location());
    assert_eq!(stale.local_address(), LOOPBACK);

    // Mapping operations fall back to the stale gateway
    assert_eq!(client.get_public_ip().await.unwrap(), "203.0.113.5");
}

/// A closed client refuses to discover.
#[tokio::test]
async fn test_closed_client() {
    let gateway = MockGateway::start().await;
    let responder = SsdpResponder::start(gateway.location()).await;
    let client = Client::new(responder.client_config(DISCOVERY_TIMEOUT)).unwrap();

    client.close();
    assert!(matches!(
        client.resolve_gateway().await,
        Err(Error::Closed)
    ));
}
