//! Kernel integration tests. They need CAP_NET_ADMIN and a bridge with MRP
//! support, so they only run with MRP_TEST_ENABLED set.

use mrp::Offload;
use mrp::types::RingKey;
use mrp_netlink::{LinkMonitor, NetlinkOffload};
use std::time::Duration;

fn enabled(name: &str) -> bool {
    if std::env::var("MRP_TEST_ENABLED").is_err() {
        eprintln!("Skipping {} (requires MRP_TEST_ENABLED=1)", name);
        return false;
    }
    true
}

#[test]
fn test_link_monitor_starts_empty() {
    if !enabled("test_link_monitor_starts_empty") {
        return;
    }

    let mut monitor = LinkMonitor::new().expect("link monitor");
    // nothing is queued before any link changes
    let events = monitor.recv_events().expect("recv");
    assert!(events.iter().all(|e| e.ifindex > 0));
}

#[test]
fn test_missing_bridge_is_reported() {
    if !enabled("test_missing_bridge_is_reported") {
        return;
    }

    let mut offload = NetlinkOffload::new().expect("offload");
    let ring = RingKey::new(0x7fff_fff0, 1);
    assert!(offload.create_ring(ring, 0x7fff_fff1, 0x7fff_fff2, 0x8000).is_err());
    assert!(
        offload
            .send_ring_test(ring, Duration::ZERO, 0, Duration::ZERO)
            .is_err()
    );
}
