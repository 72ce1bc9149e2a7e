//! Frame construction and transmission.

use super::{RingInstance, RingIo};
use crate::pdu::{Common, MrpFrame, OptionTlv, RingLink, RingTest, RingTopology, SubTlv, Tlv};
use crate::types::{PortRole, MRP_CONTROL_DMAC, MRP_TEST_DMAC};
use std::time::{Duration, Instant};
use tracing::warn;

/// Interval field value in milliseconds, saturating.
fn interval_ms(interval: Duration) -> u16 {
    interval.as_millis().min(u16::MAX as u128) as u16
}

impl RingInstance {
    fn common_tlv(&mut self) -> Tlv {
        let seq_id = self.seq_id;
        self.seq_id = self.seq_id.wrapping_add(1);
        Tlv::Common(Common {
            seq_id,
            domain: self.domain,
        })
    }

    /// Milliseconds since the instance was created; wraps.
    pub(super) fn timestamp(&self, now: Instant) -> u32 {
        now.saturating_duration_since(self.epoch).as_millis() as u32
    }

    pub(super) fn build_test(
        &mut self,
        port: PortRole,
        now: Instant,
        option: Option<OptionTlv>,
    ) -> MrpFrame {
        let test = Tlv::RingTest(RingTest {
            prio: self.priority,
            sa: self.mac,
            port_role: port as u16,
            state: self.ring_state as u16,
            transitions: self.transitions,
            timestamp: self.timestamp(now),
        });
        let mut tlvs = vec![test, self.common_tlv()];
        tlvs.extend(option.map(Tlv::Option));
        MrpFrame::new(MRP_TEST_DMAC, self.port(port).mac, tlvs)
    }

    pub(super) fn build_topology(&mut self, port: PortRole, interval: Duration) -> MrpFrame {
        let topo = Tlv::RingTopology(RingTopology {
            prio: self.priority,
            sa: self.mac,
            interval: interval_ms(interval),
        });
        let tlvs = vec![topo, self.common_tlv()];
        MrpFrame::new(MRP_CONTROL_DMAC, self.port(port).mac, tlvs)
    }

    pub(super) fn build_link(&mut self, port: PortRole, up: bool, interval: Duration) -> MrpFrame {
        let link = RingLink {
            sa: self.mac,
            port_role: port as u16,
            interval: interval_ms(interval),
            blocked: 1,
        };
        let tlv = if up {
            Tlv::RingLinkUp(link)
        } else {
            Tlv::RingLinkDown(link)
        };
        let tlvs = vec![tlv, self.common_tlv()];
        MrpFrame::new(MRP_CONTROL_DMAC, self.port(port).mac, tlvs)
    }

    fn transmit(&mut self, port: PortRole, frame: &MrpFrame, io: &mut RingIo<'_>) -> bool {
        let ifindex = self.port(port).ifindex;
        match io.sender.send(ifindex, &frame.encode()) {
            Ok(()) => true,
            Err(e) => {
                self.stats.send_failures += 1;
                warn!(ring = %self.key, ifindex, error = %e, "Failed to send MRP frame");
                false
            }
        }
    }

    /// Send a ring test frame out of every active port.
    pub(super) fn send_test_frames(&mut self, now: Instant, io: &mut RingIo<'_>) {
        let option = self
            .is_mra_capable()
            .then(|| OptionTlv::iec(vec![SubTlv::AutoMgr]));
        for port in self.active_ports() {
            let frame = self.build_test(port, now, option.clone());
            if self.transmit(port, &frame, io) {
                self.stats.test_sent += 1;
            }
        }
    }

    /// Send a ring test frame carrying a manager negotiation sub-TLV.
    pub(super) fn send_option_test(&mut self, sub_tlv: SubTlv, now: Instant, io: &mut RingIo<'_>) {
        let option = OptionTlv::iec(vec![sub_tlv]);
        for port in self.active_ports() {
            let frame = self.build_test(port, now, Some(option.clone()));
            if self.transmit(port, &frame, io) {
                self.stats.test_sent += 1;
            }
        }
    }

    /// Announce a topology change; `interval` tells clients when to flush.
    pub(super) fn send_topology(&mut self, interval: Duration, io: &mut RingIo<'_>) {
        for port in self.active_ports() {
            let frame = self.build_topology(port, interval);
            if self.transmit(port, &frame, io) {
                self.stats.topology_sent += 1;
            }
        }
    }

    pub(super) fn send_link(&mut self, up: bool, interval: Duration, io: &mut RingIo<'_>) {
        for port in self.active_ports() {
            let frame = self.build_link(port, up, interval);
            if self.transmit(port, &frame, io) {
                self.stats.link_sent += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu;
    use crate::state_machine::{InstanceParams, PortParams};
    use crate::types::{DomainId, MacAddr, RecoveryProfile, RingKey, RingRole};

    fn instance(role: RingRole) -> RingInstance {
        let params = InstanceParams {
            key: RingKey::new(3, 7),
            mac: MacAddr([0x02, 0, 0, 0, 0, 0x30]),
            primary: PortParams {
                ifindex: 4,
                mac: MacAddr([0x02, 0, 0, 0, 0, 0x04]),
                oper_up: true,
            },
            secondary: PortParams {
                ifindex: 5,
                mac: MacAddr([0x02, 0, 0, 0, 0, 0x05]),
                oper_up: true,
            },
            role,
            priority: 0x9000,
            domain: DomainId::default(),
            timings: RecoveryProfile::Ms200.timings(),
            hw_test_offload: false,
        };
        RingInstance::new(1, params, Instant::now())
    }

    #[test]
    fn test_test_frame_fields() {
        let mut ring = instance(RingRole::Mrm);
        let now = ring.epoch + Duration::from_millis(1234);
        let bytes = ring.build_test(PortRole::Secondary, now, None).encode();
        let frame = pdu::decode(&bytes).unwrap();

        assert_eq!(frame.dst, MRP_TEST_DMAC);
        assert_eq!(frame.src, MacAddr([0x02, 0, 0, 0, 0, 0x05]));
        match frame.first() {
            Some(Tlv::RingTest(test)) => {
                assert_eq!(test.prio, 0x9000);
                assert_eq!(test.sa, MacAddr([0x02, 0, 0, 0, 0, 0x30]));
                assert_eq!(test.port_role, PortRole::Secondary as u16);
                assert_eq!(test.timestamp, 1234);
            }
            other => panic!("unexpected first TLV: {other:?}"),
        }
        assert!(frame.option().is_none());
    }

    #[test]
    fn test_sequence_increments_per_frame() {
        let mut ring = instance(RingRole::Mrc);
        let first = ring.build_link(PortRole::Primary, true, Duration::from_millis(80));
        let second = ring.build_link(PortRole::Secondary, true, Duration::from_millis(60));

        assert_eq!(first.common().unwrap().seq_id + 1, second.common().unwrap().seq_id);
        match second.first() {
            Some(Tlv::RingLinkUp(link)) => {
                assert_eq!(link.interval, 60);
                assert_eq!(link.blocked, 1);
            }
            other => panic!("unexpected first TLV: {other:?}"),
        }
    }

    #[test]
    fn test_interval_saturates() {
        assert_eq!(interval_ms(Duration::from_secs(100)), u16::MAX);
        assert_eq!(interval_ms(Duration::from_micros(1500)), 1);
    }

    #[test]
    fn test_mra_test_frames_carry_auto_manager() {
        let mut ring = instance(RingRole::Mra);
        let option = OptionTlv::iec(vec![SubTlv::AutoMgr]);
        let frame = ring.build_test(PortRole::Primary, Instant::now(), Some(option));
        assert_eq!(frame.option().unwrap().sub_tlvs(), &[SubTlv::AutoMgr]);
    }
}
