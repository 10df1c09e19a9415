//! Integration tests for UDP discovery on loopback.
//!
//! The browser sends its queries straight to the advertiser's responder
//! socket on 127.0.0.1 instead of the broadcast address, so the tests do not
//! depend on the host's network configuration.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use sos_net::{
    connect, AdvertiserConfig, BrowserConfig, BrowserStatus, PeerRegistry, ServiceAdvertiser,
    ServiceBrowser, ServiceIdentity, SessionConfig, SessionEvent,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

async fn start_advertiser(identity: ServiceIdentity) -> ServiceAdvertiser {
    let config = AdvertiserConfig {
        identity,
        bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        discovery_port: 0,
        ..AdvertiserConfig::default()
    };
    let mut advertiser = ServiceAdvertiser::new(config, SessionConfig::default(), PeerRegistry::spawn());
    advertiser.start().await;
    advertiser
}

fn browser_for(advertiser: &ServiceAdvertiser) -> ServiceBrowser {
    ServiceBrowser::new(BrowserConfig {
        query_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        discovery_port: advertiser.discovery_addr().unwrap().port(),
        query_interval: Duration::from_millis(100),
        ..BrowserConfig::default()
    })
}

#[tokio::test]
async fn test_browser_finds_advertiser_once() {
    // Arrange
    let mut advertiser = start_advertiser(ServiceIdentity::default()).await;
    let mut browser = browser_for(&advertiser);

    // Act
    let mut endpoints = browser.start_browsing().await;
    let endpoint = timeout(WAIT, endpoints.recv()).await.unwrap().unwrap();

    // Assert
    assert_eq!(endpoint.addr, advertiser.stream_addr().unwrap());
    assert_eq!(endpoint.instance_name, "EmergencyApp");
    assert_eq!(browser.status(), BrowserStatus::Browsing);
    // Repeated announcements of the same address are not reported again.
    assert!(timeout(Duration::from_millis(400), endpoints.recv()).await.is_err());

    browser.stop_browsing().await;
    advertiser.stop().await;
}

#[tokio::test]
async fn test_other_service_type_is_not_reported() {
    let mut advertiser = start_advertiser(ServiceIdentity {
        service_type: "_printer._tcp".to_string(),
        instance_name: "Office".to_string(),
    })
    .await;
    let mut browser = browser_for(&advertiser);

    let mut endpoints = browser.start_browsing().await;

    assert!(timeout(Duration::from_millis(400), endpoints.recv()).await.is_err());
    browser.stop_browsing().await;
    advertiser.stop().await;
}

#[tokio::test]
async fn test_discovered_endpoint_carries_alerts() {
    let mut advertiser = start_advertiser(ServiceIdentity::default()).await;
    let mut browser = browser_for(&advertiser);
    let mut endpoints = browser.start_browsing().await;
    let endpoint = timeout(WAIT, endpoints.recv()).await.unwrap().unwrap();

    let (tx, mut events) = mpsc::channel(16);
    let _session = connect(endpoint.addr, tx, SessionConfig::default());
    advertiser.broadcast(b"{\"detections\":[]}".to_vec()).await;

    let payload = timeout(WAIT, async {
        loop {
            if let Some(SessionEvent::PayloadReceived { payload, .. }) = events.recv().await {
                return payload;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(payload, b"{\"detections\":[]}".to_vec());

    browser.stop_browsing().await;
    advertiser.stop().await;
}
