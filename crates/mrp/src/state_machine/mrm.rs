//! Manager behavior (MRM, and MRA while managing).

use super::{HW_TEST_PERIOD, ManagerId, MraState, RingInstance, RingIo, Role};
use crate::pdu::{ManagerPair, RingTest, SubTlv};
use crate::timer::{Expiry, TimerKind};
use crate::types::{MrcState, MrmState, PortRole, PortState, RingRole, RingState, TestTier};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

impl RingInstance {
    /// Enter the manager role: both ports blocked, ring open, then replay
    /// the current link state.
    pub(super) fn mrm_init(&mut self, now: Instant, io: &mut RingIo<'_>) {
        self.stop_ring_test(io);
        for kind in [
            TimerKind::RingTopology,
            TimerKind::LinkUp,
            TimerKind::LinkDown,
            TimerKind::RingWatcher,
        ] {
            self.timers.stop(kind);
        }
        self.add_test = false;
        self.no_tc = false;
        self.test_monitor = false;
        self.transitions = 0;

        self.set_ring_role(RingRole::Mrm, io);
        self.set_port_state(PortRole::Primary, PortState::Blocked, io);
        self.set_port_state(PortRole::Secondary, PortState::Blocked, io);
        self.set_ring_state(RingState::Open, io);
        self.enter_mrm(MrmState::AcStat1);

        for port in [PortRole::Primary, PortRole::Secondary] {
            if self.port(port).oper_up {
                self.mrm_link_change(port, true, now, io);
            }
        }
    }

    pub(super) fn mrm_link_change(
        &mut self,
        port: PortRole,
        up: bool,
        now: Instant,
        io: &mut RingIo<'_>,
    ) {
        let Some(state) = self.role.mrm_state() else {
            return;
        };
        let other = port.other();
        let other_up = self.port(other).oper_up;

        match (state, up) {
            (MrmState::AcStat1, true) => {
                self.set_port_state(port, PortState::Forwarding, io);
                self.ring_test_request(now, TestTier::Short, io);
                self.enter_mrm(MrmState::PrmUp);
            }
            (MrmState::PrmUp, true) => {
                // assume the ring is closed until test frames say otherwise
                self.set_port_state(PortRole::Primary, PortState::Forwarding, io);
                self.set_port_state(PortRole::Secondary, PortState::Blocked, io);
                if port == PortRole::Primary {
                    // traffic moves from the secondary to the primary port
                    self.flush_fdb(io);
                    self.topology_request(now, io);
                }
                self.no_tc = true;
                self.ring_test_request(now, TestTier::Default, io);
                self.set_ring_state(RingState::Closed, io);
                self.enter_mrm(MrmState::ChkRc);
            }
            (MrmState::PrmUp, false) => {
                self.set_port_state(port, PortState::Blocked, io);
                if other_up {
                    self.set_port_state(other, PortState::Forwarding, io);
                    self.flush_fdb(io);
                } else {
                    self.mrm_all_down(io);
                }
            }
            (MrmState::ChkRo, false) => {
                self.set_port_state(port, PortState::Blocked, io);
                self.no_tc = false;
                if other_up {
                    self.set_port_state(other, PortState::Forwarding, io);
                    self.flush_fdb(io);
                    self.topology_request(now, io);
                    self.ring_test_request(now, TestTier::Short, io);
                    self.enter_mrm(MrmState::PrmUp);
                } else {
                    self.mrm_all_down(io);
                }
            }
            (MrmState::ChkRc, false) => {
                self.set_port_state(port, PortState::Blocked, io);
                self.transitions = self.transitions.wrapping_add(1);
                self.no_tc = false;
                self.set_ring_state(RingState::Open, io);
                if other_up {
                    self.set_port_state(other, PortState::Forwarding, io);
                    self.flush_fdb(io);
                    if port == PortRole::Primary {
                        self.topology_request(now, io);
                    }
                    self.ring_test_request(now, TestTier::Short, io);
                    self.enter_mrm(MrmState::PrmUp);
                } else {
                    self.mrm_all_down(io);
                }
            }
            (MrmState::AcStat1, false) | (MrmState::ChkRo | MrmState::ChkRc, true) => {}
        }
    }

    /// No ring port left.
    fn mrm_all_down(&mut self, io: &mut RingIo<'_>) {
        self.stop_ring_test(io);
        self.timers.stop(TimerKind::RingTopology);
        self.flush_fdb(io);
        self.set_ring_state(RingState::Open, io);
        self.enter_mrm(MrmState::AcStat1);
    }

    /// (Re)start ring tests at the tier's interval and send the first
    /// round right away.
    pub(super) fn ring_test_request(&mut self, now: Instant, tier: TestTier, io: &mut RingIo<'_>) {
        let interval = match tier {
            TestTier::Short => self.timings.test_short_interval,
            TestTier::Default | TestTier::Extended => self.timings.test_interval,
        };
        let budget = self.timings.test_budget(tier);
        self.test_tier = tier;

        let timer = self.timers.get_mut(TimerKind::RingTest);
        timer.set_repeat_count(budget);
        timer.start(now, interval);

        if self.hw_test_offload {
            self.start_hw_test(now, interval, budget, io);
        }
        if self.hw_test_until.is_none() {
            self.send_test_frames(now, io);
        }
    }

    /// Change the miss budget without touching the test interval.
    fn set_test_tier(&mut self, tier: TestTier) {
        if self.test_tier != tier {
            debug!(ring = %self.key, ?tier, "Ring test budget changed");
            self.test_tier = tier;
            let budget = self.timings.test_budget(tier);
            self.timers
                .get_mut(TimerKind::RingTest)
                .set_repeat_count(budget);
        }
    }

    fn start_hw_test(&mut self, now: Instant, interval: Duration, budget: u32, io: &mut RingIo<'_>) {
        let result = io
            .offload
            .send_ring_test(self.key, interval, budget, HW_TEST_PERIOD);
        if self.check_offload("send_ring_test", result) {
            self.hw_test_until = Some(now + HW_TEST_PERIOD);
        } else {
            self.hw_test_until = None;
        }
    }

    pub(super) fn stop_ring_test(&mut self, io: &mut RingIo<'_>) {
        self.timers.stop(TimerKind::RingTest);
        if self.hw_test_until.take().is_some() {
            let result = io
                .offload
                .send_ring_test(self.key, Duration::ZERO, 0, Duration::ZERO);
            self.check_offload("send_ring_test", result);
        }
    }

    /// Announce a topology change unless suppressed.
    pub(super) fn topology_request(&mut self, now: Instant, io: &mut RingIo<'_>) {
        if self.no_tc {
            debug!(ring = %self.key, "Topology change suppressed");
            return;
        }

        let interval = self.timings.topo_interval;
        let count = self.timings.topo_max;
        let total = interval * count;
        self.send_topology(total, io);

        let timer = self.timers.get_mut(TimerKind::RingTopology);
        timer.set_repeat_count(count.saturating_sub(1));
        timer.start(now, interval);
        self.timers.get_mut(TimerKind::ClearFdb).start(now, total);
    }

    pub(super) fn mrm_ring_test_expired(&mut self, expiry: Expiry, now: Instant, io: &mut RingIo<'_>) {
        if expiry == Expiry::Exhausted {
            if self.add_test && self.role.mrm_state() == Some(MrmState::ChkRo) {
                // the extra short round after a client link up is over
                debug!(ring = %self.key, "Additional ring tests done");
                self.add_test = false;
                self.ring_test_request(now, TestTier::Default, io);
                return;
            }
            self.mrm_ring_open(now, io);
        }

        match self.hw_test_until {
            Some(until) => {
                let interval = self.timers.get(TimerKind::RingTest).period();
                if until <= now + interval * 2 {
                    let budget = self.timings.test_budget(self.test_tier);
                    self.start_hw_test(now, interval, budget, io);
                }
                if self.hw_test_until.is_none() {
                    self.send_test_frames(now, io);
                }
            }
            None => self.send_test_frames(now, io),
        }
    }

    /// Test frames stopped coming back: open the ring.
    fn mrm_ring_open(&mut self, now: Instant, io: &mut RingIo<'_>) {
        if self.role.mrm_state() != Some(MrmState::ChkRc) {
            return;
        }

        info!(ring = %self.key, "Ring open");
        self.primary.loc = true;
        self.secondary.loc = true;
        self.set_port_state(PortRole::Secondary, PortState::Forwarding, io);
        self.flush_fdb(io);
        self.transitions = self.transitions.wrapping_add(1);
        self.stats.ring_open_count += 1;
        // opening is always announced, even if the closure never was
        self.no_tc = false;
        self.add_test = false;
        self.topology_request(now, io);
        self.set_ring_state(RingState::Open, io);
        self.set_test_tier(TestTier::Default);
        self.enter_mrm(MrmState::ChkRo);
    }

    /// Own test frames came back: close the ring.
    fn mrm_ring_closed(&mut self, announce: bool, now: Instant, io: &mut RingIo<'_>) {
        info!(ring = %self.key, "Ring closed");
        self.set_port_state(PortRole::Primary, PortState::Forwarding, io);
        self.set_port_state(PortRole::Secondary, PortState::Blocked, io);
        self.flush_fdb(io);
        self.no_tc = false;
        self.add_test = false;
        if announce {
            self.topology_request(now, io);
        }
        self.ring_test_request(now, TestTier::Default, io);
        self.set_ring_state(RingState::Closed, io);
        self.enter_mrm(MrmState::ChkRc);
    }

    pub(super) fn mrm_test_received(
        &mut self,
        port: PortRole,
        test: &RingTest,
        sub_tlvs: &[SubTlv],
        now: Instant,
        io: &mut RingIo<'_>,
    ) {
        if self.is_mra_capable() && self.mra_nack_received(sub_tlvs, now, io) {
            return;
        }

        if test.sa != self.mac {
            self.mrm_foreign_test(test, now, io);
            return;
        }

        if test.port_role == port as u16 {
            debug!(ring = %self.key, %port, "Own test frame came back on the sending port");
            return;
        }

        self.stats.test_received += 1;
        self.port_mut(port).loc = false;
        let sent = test.timestamp;
        let elapsed = self.timestamp(now).wrapping_sub(sent);
        self.stats.last_round_trip = Some(Duration::from_millis(u64::from(elapsed)));
        self.timers.get_mut(TimerKind::RingTest).feed();

        match self.role.mrm_state() {
            Some(MrmState::PrmUp) => self.mrm_ring_closed(false, now, io),
            Some(MrmState::ChkRo) => self.mrm_ring_closed(true, now, io),
            Some(MrmState::ChkRc) => {
                self.no_tc = false;
                self.set_test_tier(TestTier::Default);
            }
            Some(MrmState::AcStat1) | None => {}
        }
    }

    /// Another manager's test frame.
    fn mrm_foreign_test(&mut self, test: &RingTest, now: Instant, io: &mut RingIo<'_>) {
        self.stats.foreign_test_received += 1;
        let foreign = ManagerId::new(test.prio, test.sa);

        if !self.is_mra_capable() {
            if self.manager != Some(foreign) {
                warn!(ring = %self.key, manager = %foreign, "Another manager is active on the ring");
                self.manager = Some(foreign);
            }
            return;
        }

        let own = self.identity();
        if foreign.is_better_than(&own) {
            self.mra_yield(foreign, now, io);
        } else {
            debug!(ring = %self.key, manager = %foreign, "Rejecting weaker manager");
            let pair = ManagerPair {
                prio: own.prio,
                sa: own.mac,
                other_prio: foreign.prio,
                other_sa: foreign.mac,
            };
            self.send_option_test(SubTlv::TestMgrNack(pair), now, io);
            self.set_test_tier(TestTier::Extended);
        }
    }

    /// A stronger manager told this one to step down. Returns whether the
    /// role was given up.
    fn mra_nack_received(&mut self, sub_tlvs: &[SubTlv], now: Instant, io: &mut RingIo<'_>) -> bool {
        let own = self.mac;
        let nack = sub_tlvs.iter().find_map(|sub| match sub {
            SubTlv::TestMgrNack(pair) if pair.other_sa == own => Some(*pair),
            _ => None,
        });

        match nack {
            Some(pair) => {
                let winner = ManagerId::new(pair.prio, pair.sa);
                info!(ring = %self.key, manager = %winner, "Manager role rejected by another manager");
                self.mra_yield(winner, now, io);
                true
            }
            None => false,
        }
    }

    /// Give up the manager role and watch `winner` as a client.
    pub(super) fn mra_yield(&mut self, winner: ManagerId, now: Instant, io: &mut RingIo<'_>) {
        info!(ring = %self.key, manager = %winner, "Yielding manager role");

        let own = self.identity();
        let pair = ManagerPair {
            prio: own.prio,
            sa: own.mac,
            other_prio: winner.prio,
            other_sa: winner.mac,
        };
        self.send_option_test(SubTlv::TestPropagate(pair), now, io);

        self.stop_ring_test(io);
        self.timers.stop(TimerKind::RingTopology);
        self.manager = Some(winner);
        self.role = Role::Mra(MraState::Client(MrcState::AcStat1));
        self.mrc_init(now, io);

        self.test_monitor = true;
        let watcher = self.timers.get_mut(TimerKind::RingWatcher);
        watcher.set_repeat_count(self.timings.test_ext_max);
        watcher.start(now, self.timings.test_interval);
    }

    /// The watched manager went silent or turned out weaker: manage again.
    pub(super) fn mra_resume_manager(&mut self, now: Instant, io: &mut RingIo<'_>) {
        info!(ring = %self.key, "Resuming manager role");
        self.timers.stop(TimerKind::RingWatcher);
        self.test_monitor = false;
        self.manager = None;
        self.role = Role::Mra(MraState::Manager(MrmState::AcStat1));
        self.mrm_init(now, io);
    }

    /// Link change reported by a client.
    pub(super) fn mrm_link_frame_received(&mut self, up: bool, now: Instant, io: &mut RingIo<'_>) {
        self.stats.link_received += 1;

        match (self.role.mrm_state(), up) {
            (Some(MrmState::ChkRc), false) => self.mrm_ring_open(now, io),
            (Some(MrmState::ChkRo), true) => {
                self.add_test = true;
                self.ring_test_request(now, TestTier::Short, io);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::{MrpFrame, Tlv};
    use crate::state_machine::{InstanceParams, PortParams};
    use crate::testing::{OffloadCall, RecordingOffload, RecordingSender};
    use crate::types::{DomainId, MacAddr, RecoveryProfile, RingKey, MRP_DEFAULT_PRIO};

    const RING: RingKey = RingKey {
        bridge: 1,
        ring_nr: 1,
    };

    struct Harness {
        ring: RingInstance,
        offload: RecordingOffload,
        sender: RecordingSender,
        now: Instant,
    }

    impl Harness {
        fn new(role: RingRole, hw_test_offload: bool) -> Self {
            let now = Instant::now();
            let params = InstanceParams {
                key: RING,
                mac: MacAddr([0x02, 0, 0, 0, 0, 0x50]),
                primary: PortParams {
                    ifindex: 2,
                    mac: MacAddr([0x02, 0, 0, 0, 0, 0x02]),
                    oper_up: false,
                },
                secondary: PortParams {
                    ifindex: 3,
                    mac: MacAddr([0x02, 0, 0, 0, 0, 0x03]),
                    oper_up: false,
                },
                role,
                priority: MRP_DEFAULT_PRIO,
                domain: DomainId::default(),
                timings: RecoveryProfile::Ms500.timings(),
                hw_test_offload,
            };
            let mut harness = Self {
                ring: RingInstance::new(1, params, now),
                offload: RecordingOffload::new(),
                sender: RecordingSender::new(),
                now,
            };
            harness.with_io(|ring, now, io| ring.start(now, io));
            harness
        }

        fn with_io(&mut self, f: impl FnOnce(&mut RingInstance, Instant, &mut RingIo<'_>)) {
            let mut io = RingIo {
                offload: &mut self.offload,
                sender: &self.sender,
            };
            f(&mut self.ring, self.now, &mut io);
        }

        fn link(&mut self, port: PortRole, up: bool) {
            self.with_io(|ring, now, io| ring.link_change(port, up, now, io));
        }

        fn receive(&mut self, port: PortRole, frame: &MrpFrame) {
            self.with_io(|ring, now, io| ring.receive(port, frame, now, io));
        }

        fn advance(&mut self, by: Duration) {
            self.now += by;
            self.with_io(|ring, now, io| ring.poll_timers(now, io));
        }

        /// The last test frame sent on `port`.
        fn last_test(&self, ifindex: u32) -> MrpFrame {
            self.sender
                .frames()
                .into_iter()
                .rev()
                .find(|(i, f)| *i == ifindex && matches!(f.first(), Some(Tlv::RingTest(_))))
                .map(|(_, f)| f)
                .expect("no test frame sent")
        }

        fn state(&self) -> Option<MrmState> {
            self.ring.role().mrm_state()
        }
    }

    fn foreign_test(prio: u16, sa: MacAddr, sub_tlvs: Vec<SubTlv>) -> MrpFrame {
        let mut tlvs = vec![
            Tlv::RingTest(RingTest {
                prio,
                sa,
                port_role: 0,
                state: 1,
                transitions: 0,
                timestamp: 0,
            }),
            Tlv::Common(crate::pdu::Common {
                seq_id: 1,
                domain: DomainId::default(),
            }),
        ];
        if !sub_tlvs.is_empty() {
            tlvs.push(Tlv::Option(crate::pdu::OptionTlv::iec(sub_tlvs)));
        }
        MrpFrame::new(crate::types::MRP_TEST_DMAC, sa, tlvs)
    }

    #[test]
    fn test_first_link_starts_short_tests() {
        let mut h = Harness::new(RingRole::Mrm, false);
        h.link(PortRole::Primary, true);

        assert_eq!(h.state(), Some(MrmState::PrmUp));
        assert_eq!(h.offload.port_state(2), Some(PortState::Forwarding));
        let timer = h.ring.timers().get(TimerKind::RingTest);
        assert_eq!(timer.period(), Duration::from_millis(30));
        assert_eq!(timer.budget(), 4);
        assert_eq!(h.sender.frames().len(), 1);
    }

    #[test]
    fn test_own_test_closes_ring() {
        let mut h = Harness::new(RingRole::Mrm, false);
        h.link(PortRole::Primary, true);
        h.link(PortRole::Secondary, true);
        assert_eq!(h.state(), Some(MrmState::ChkRc));

        let frame = h.last_test(2);
        h.offload.clear();
        h.receive(PortRole::Secondary, &frame);

        assert_eq!(h.state(), Some(MrmState::ChkRc));
        assert_eq!(h.ring.test_tier(), TestTier::Default);
        assert_eq!(h.ring.stats().test_received, 1);
        assert!(!h.ring.port(PortRole::Secondary).loc());
    }

    #[test]
    fn test_reflected_test_is_ignored() {
        let mut h = Harness::new(RingRole::Mrm, false);
        h.link(PortRole::Primary, true);
        let frame = h.last_test(2);
        h.receive(PortRole::Primary, &frame);

        assert_eq!(h.state(), Some(MrmState::PrmUp));
        assert_eq!(h.ring.stats().test_received, 0);
    }

    #[test]
    fn test_lost_tests_open_ring() {
        let mut h = Harness::new(RingRole::Mrm, false);
        h.link(PortRole::Primary, true);
        let frame = h.last_test(2);
        h.receive(PortRole::Secondary, &frame);
        assert_eq!(h.state(), Some(MrmState::ChkRc));
        assert_eq!(h.offload.port_state(3), Some(PortState::Blocked));

        h.sender.clear();
        for _ in 0..5 {
            h.advance(Duration::from_millis(50));
        }

        assert_eq!(h.state(), Some(MrmState::ChkRo));
        assert_eq!(h.ring.ring_state(), RingState::Open);
        assert_eq!(h.offload.port_state(3), Some(PortState::Forwarding));
        assert_eq!(h.ring.transitions(), 1);
        assert!(h
            .sender
            .frames()
            .iter()
            .any(|(_, f)| matches!(f.first(), Some(Tlv::RingTopology(_)))));
    }

    #[test]
    fn test_unconfirmed_closure_announces_opening() {
        let mut h = Harness::new(RingRole::Mrm, false);
        h.link(PortRole::Primary, true);
        h.link(PortRole::Secondary, true);
        assert_eq!(h.state(), Some(MrmState::ChkRc));

        // the ring is broken elsewhere: no test frame ever comes back
        h.sender.clear();
        for _ in 0..5 {
            h.advance(Duration::from_millis(50));
        }

        assert_eq!(h.state(), Some(MrmState::ChkRo));
        assert_eq!(h.offload.port_state(3), Some(PortState::Forwarding));
        let topo: Vec<u32> = h
            .sender
            .frames()
            .iter()
            .filter(|(_, f)| matches!(f.first(), Some(Tlv::RingTopology(_))))
            .map(|(ifindex, _)| *ifindex)
            .collect();
        assert!(topo.contains(&2) && topo.contains(&3));
        assert!(h.ring.timers().is_running(TimerKind::ClearFdb));
    }

    #[test]
    fn test_primary_link_up_announces_topology_change() {
        let mut h = Harness::new(RingRole::Mrm, false);
        h.link(PortRole::Secondary, true);
        h.link(PortRole::Primary, true);
        assert_eq!(h.state(), Some(MrmState::ChkRc));
        assert_eq!(h.offload.port_state(2), Some(PortState::Forwarding));
        assert_eq!(h.offload.port_state(3), Some(PortState::Blocked));

        // the primary took over from the secondary: clients were told
        let topo = h
            .sender
            .frames()
            .iter()
            .filter(|(_, f)| matches!(f.first(), Some(Tlv::RingTopology(_))))
            .count();
        assert!(topo > 0);
    }

    #[test]
    fn test_secondary_down_in_closed_ring() {
        let mut h = Harness::new(RingRole::Mrm, false);
        h.link(PortRole::Primary, true);
        h.link(PortRole::Secondary, true);
        h.link(PortRole::Secondary, false);

        assert_eq!(h.state(), Some(MrmState::PrmUp));
        assert_eq!(h.ring.ring_state(), RingState::Open);
        assert_eq!(h.ring.transitions(), 1);
        assert_eq!(h.ring.test_tier(), TestTier::Short);
    }

    #[test]
    fn test_primary_down_in_closed_ring() {
        let mut h = Harness::new(RingRole::Mrm, false);
        h.link(PortRole::Primary, true);
        let frame = h.last_test(2);
        h.receive(PortRole::Secondary, &frame);
        h.link(PortRole::Secondary, true);
        h.sender.clear();

        h.link(PortRole::Primary, false);

        assert_eq!(h.state(), Some(MrmState::PrmUp));
        assert_eq!(h.offload.port_state(2), Some(PortState::Blocked));
        assert_eq!(h.offload.port_state(3), Some(PortState::Forwarding));
        assert!(h
            .sender
            .frames()
            .iter()
            .any(|(i, f)| *i == 3 && matches!(f.first(), Some(Tlv::RingTopology(_)))));
    }

    #[test]
    fn test_last_link_down_returns_to_idle() {
        let mut h = Harness::new(RingRole::Mrm, false);
        h.link(PortRole::Primary, true);
        h.link(PortRole::Primary, false);

        assert_eq!(h.state(), Some(MrmState::AcStat1));
        assert!(!h.ring.timers().is_running(TimerKind::RingTest));
        assert_eq!(h.offload.port_state(2), Some(PortState::Blocked));
    }

    #[test]
    fn test_link_up_frame_shortens_tests() {
        let mut h = Harness::new(RingRole::Mrm, false);
        h.link(PortRole::Primary, true);
        let frame = h.last_test(2);
        h.receive(PortRole::Secondary, &frame);
        for _ in 0..5 {
            h.advance(Duration::from_millis(50));
        }
        assert_eq!(h.state(), Some(MrmState::ChkRo));

        let link = MrpFrame::new(
            crate::types::MRP_CONTROL_DMAC,
            MacAddr([0x02, 0, 0, 0, 0, 0x77]),
            vec![Tlv::RingLinkUp(crate::pdu::RingLink {
                sa: MacAddr([0x02, 0, 0, 0, 0, 0x77]),
                port_role: 0,
                interval: 400,
                blocked: 1,
            })],
        );
        h.receive(PortRole::Primary, &link);

        assert_eq!(h.ring.test_tier(), TestTier::Short);
        assert_eq!(
            h.ring.timers().get(TimerKind::RingTest).period(),
            Duration::from_millis(30)
        );

        // the short round runs out without the ring closing: back to normal
        for _ in 0..4 {
            h.advance(Duration::from_millis(30));
        }
        assert_eq!(h.state(), Some(MrmState::ChkRo));
        assert_eq!(h.ring.test_tier(), TestTier::Default);
        assert_eq!(
            h.ring.timers().get(TimerKind::RingTest).period(),
            Duration::from_millis(50)
        );
        assert_eq!(h.ring.stats().ring_open_count, 1);
    }

    #[test]
    fn test_mrm_warns_about_foreign_manager() {
        let mut h = Harness::new(RingRole::Mrm, false);
        h.link(PortRole::Primary, true);
        let foreign = MacAddr([0x02, 0, 0, 0, 0, 0x01]);
        h.receive(PortRole::Primary, &foreign_test(0x1000, foreign, vec![]));

        assert_eq!(h.state(), Some(MrmState::PrmUp));
        assert_eq!(h.ring.stats().foreign_test_received, 1);
        assert_eq!(h.ring.manager(), Some(ManagerId::new(0x1000, foreign)));
    }

    #[test]
    fn test_mra_nacks_weaker_manager() {
        let mut h = Harness::new(RingRole::Mra, false);
        h.link(PortRole::Primary, true);
        h.sender.clear();

        let weaker = MacAddr([0x02, 0, 0, 0, 0, 0x99]);
        h.receive(PortRole::Primary, &foreign_test(0xA000, weaker, vec![]));

        assert_eq!(h.state(), Some(MrmState::PrmUp));
        assert_eq!(h.ring.test_tier(), TestTier::Extended);
        let frame = h.last_test(2);
        assert!(matches!(
            frame.option().unwrap().sub_tlvs(),
            [SubTlv::TestMgrNack(pair)] if pair.other_sa == weaker
        ));
    }

    #[test]
    fn test_mra_yields_to_better_manager() {
        let mut h = Harness::new(RingRole::Mra, false);
        h.link(PortRole::Primary, true);
        let better = MacAddr([0x02, 0, 0, 0, 0, 0x01]);
        h.receive(PortRole::Primary, &foreign_test(0x1000, better, vec![]));

        assert_eq!(h.ring.role().active(), RingRole::Mrc);
        assert!(h.ring.is_test_monitor());
        assert!(h.ring.timers().is_running(TimerKind::RingWatcher));
        assert!(!h.ring.timers().is_running(TimerKind::RingTest));
        assert!(h
            .offload
            .calls()
            .contains(&OffloadCall::RingRole(RING, RingRole::Mrc)));
    }

    #[test]
    fn test_mra_yields_on_nack() {
        let mut h = Harness::new(RingRole::Mra, false);
        h.link(PortRole::Primary, true);
        let own = h.ring.mac();
        let winner = MacAddr([0x02, 0, 0, 0, 0, 0x20]);
        let nack = SubTlv::TestMgrNack(ManagerPair {
            prio: 0x7000,
            sa: winner,
            other_prio: MRP_DEFAULT_PRIO,
            other_sa: own,
        });
        h.receive(PortRole::Primary, &foreign_test(0x7000, winner, vec![nack]));

        assert_eq!(h.ring.role().active(), RingRole::Mrc);
        assert_eq!(h.ring.manager(), Some(ManagerId::new(0x7000, winner)));
    }

    #[test]
    fn test_mra_resumes_when_manager_silent() {
        let mut h = Harness::new(RingRole::Mra, false);
        h.link(PortRole::Primary, true);
        let better = MacAddr([0x02, 0, 0, 0, 0, 0x01]);
        h.receive(PortRole::Primary, &foreign_test(0x1000, better, vec![]));
        assert_eq!(h.ring.role().active(), RingRole::Mrc);

        for _ in 0..15 {
            h.advance(Duration::from_millis(50));
        }

        assert_eq!(h.ring.role().active(), RingRole::Mrm);
        assert!(!h.ring.is_test_monitor());
        assert_eq!(h.state(), Some(MrmState::PrmUp));
    }

    #[test]
    fn test_hw_offload_replaces_software_tests() {
        let mut h = Harness::new(RingRole::Mrm, true);
        h.link(PortRole::Primary, true);

        assert!(h.sender.frames().is_empty());
        assert!(h.offload.calls().contains(&OffloadCall::StartTest {
            ring: RING,
            interval: Duration::from_millis(30),
            max_miss: 4,
            period: HW_TEST_PERIOD,
        }));

        h.link(PortRole::Primary, false);
        assert!(h.offload.calls().contains(&OffloadCall::StartTest {
            ring: RING,
            interval: Duration::ZERO,
            max_miss: 0,
            period: Duration::ZERO,
        }));
    }
}
