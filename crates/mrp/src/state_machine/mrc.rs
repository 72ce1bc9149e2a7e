//! Client behavior (MRC, and MRA while watching another manager).

use super::{ManagerId, RingInstance, RingIo};
use crate::pdu::{RingTest, SubTlv};
use crate::timer::{Expiry, TimerKind};
use crate::types::{MrcState, PortRole, PortState, RingRole};
use std::time::{Duration, Instant};
use tracing::{debug, info};

impl RingInstance {
    /// Enter the client role: both ports blocked, then replay the current
    /// link state.
    pub(super) fn mrc_init(&mut self, now: Instant, io: &mut RingIo<'_>) {
        self.stop_ring_test(io);
        for kind in [
            TimerKind::RingTopology,
            TimerKind::LinkUp,
            TimerKind::LinkDown,
        ] {
            self.timers.stop(kind);
        }
        self.primary.loc = true;
        self.secondary.loc = true;

        self.set_ring_role(RingRole::Mrc, io);
        self.set_port_state(PortRole::Primary, PortState::Blocked, io);
        self.set_port_state(PortRole::Secondary, PortState::Blocked, io);
        self.enter_mrc(MrcState::AcStat1);

        for port in [PortRole::Primary, PortRole::Secondary] {
            if self.port(port).oper_up {
                self.mrc_link_change(port, true, now, io);
            }
        }
    }

    pub(super) fn mrc_link_change(
        &mut self,
        port: PortRole,
        up: bool,
        now: Instant,
        io: &mut RingIo<'_>,
    ) {
        let Some(state) = self.role.mrc_state() else {
            return;
        };
        let other = port.other();
        let other_up = self.port(other).oper_up;

        if up {
            match state {
                MrcState::AcStat1 => {
                    self.set_port_state(port, PortState::Forwarding, io);
                    self.enter_mrc(MrcState::DeIdle);
                }
                MrcState::DeIdle => {
                    self.set_port_state(port, PortState::Blocked, io);
                    self.link_request(true, now, io);
                    self.enter_mrc(MrcState::Pt);
                }
                MrcState::De => {
                    self.set_port_state(port, PortState::Blocked, io);
                    self.link_request(true, now, io);
                    self.enter_mrc(MrcState::Pt);
                }
                MrcState::Pt | MrcState::PtIdle => {}
            }
            return;
        }

        self.port_mut(port).loc = true;
        match state {
            MrcState::AcStat1 => {}
            MrcState::DeIdle | MrcState::De => {
                self.set_port_state(port, PortState::Blocked, io);
                if !other_up {
                    self.timers.stop(TimerKind::LinkDown);
                    self.enter_mrc(MrcState::AcStat1);
                }
            }
            MrcState::Pt => {
                self.timers.stop(TimerKind::LinkUp);
                self.set_port_state(port, PortState::Blocked, io);
                if other_up {
                    self.set_port_state(other, PortState::Forwarding, io);
                    self.link_request(false, now, io);
                    self.enter_mrc(MrcState::De);
                } else {
                    self.enter_mrc(MrcState::AcStat1);
                }
            }
            MrcState::PtIdle => {
                self.set_port_state(port, PortState::Blocked, io);
                self.flush_fdb(io);
                if other_up {
                    self.link_request(false, now, io);
                    self.enter_mrc(MrcState::De);
                } else {
                    self.enter_mrc(MrcState::AcStat1);
                }
            }
        }
    }

    /// Start a burst of link change frames, cancelling the opposite burst.
    fn link_request(&mut self, up: bool, now: Instant, io: &mut RingIo<'_>) {
        let (kind, opposite) = if up {
            (TimerKind::LinkUp, TimerKind::LinkDown)
        } else {
            (TimerKind::LinkDown, TimerKind::LinkUp)
        };
        self.timers.stop(opposite);

        let interval = self.timings.link_interval;
        let count = self.timings.link_max;
        self.send_link(up, interval * count, io);

        let timer = self.timers.get_mut(kind);
        timer.set_repeat_count(count.saturating_sub(1));
        timer.start(now, interval);
    }

    pub(super) fn mrc_link_timer_expired(
        &mut self,
        up: bool,
        expiry: Expiry,
        io: &mut RingIo<'_>,
    ) {
        match expiry {
            Expiry::Tick { remaining } => {
                let left = self.timings.link_interval * (remaining + 1);
                self.send_link(up, left, io);
            }
            Expiry::Exhausted => match (self.role.mrc_state(), up) {
                (Some(MrcState::Pt), true) => {
                    debug!(ring = %self.key, "No manager answer, forwarding on both ports");
                    self.forward_both(io);
                    self.enter_mrc(MrcState::PtIdle);
                }
                (Some(MrcState::De), false) => self.enter_mrc(MrcState::DeIdle),
                _ => {}
            },
        }
    }

    fn forward_both(&mut self, io: &mut RingIo<'_>) {
        self.set_port_state(PortRole::Primary, PortState::Forwarding, io);
        self.set_port_state(PortRole::Secondary, PortState::Forwarding, io);
    }

    /// Ring confirmed closed by the manager.
    fn mrc_confirm(&mut self, io: &mut RingIo<'_>) {
        self.timers.stop(TimerKind::LinkUp);
        self.forward_both(io);
        self.enter_mrc(MrcState::PtIdle);
    }

    pub(super) fn mrc_test_received(
        &mut self,
        port: PortRole,
        test: &RingTest,
        sub_tlvs: &[SubTlv],
        now: Instant,
        io: &mut RingIo<'_>,
    ) {
        if test.sa == self.mac {
            return;
        }
        self.stats.test_received += 1;
        self.port_mut(port).loc = false;
        let sender = ManagerId::new(test.prio, test.sa);

        if self.test_monitor {
            if sender.is_better_than(&self.identity()) {
                self.mra_watch(sender, sub_tlvs);
            } else {
                info!(ring = %self.key, manager = %sender, "Weaker manager on the ring");
                self.mra_resume_manager(now, io);
                return;
            }
        } else if self.manager != Some(sender) {
            info!(ring = %self.key, manager = %sender, "Ring manager changed");
            self.manager = Some(sender);
        }

        let both_up = self.primary.oper_up && self.secondary.oper_up;
        match self.role.mrc_state() {
            Some(MrcState::Pt) => self.mrc_confirm(io),
            Some(MrcState::DeIdle) if both_up => self.mrc_confirm(io),
            _ => {}
        }
    }

    /// Track the manager an MRA client is watching.
    fn mra_watch(&mut self, sender: ManagerId, sub_tlvs: &[SubTlv]) {
        let propagated = sub_tlvs.iter().find_map(|sub| match sub {
            SubTlv::TestPropagate(pair) => Some(ManagerId::new(pair.other_prio, pair.other_sa)),
            _ => None,
        });
        let candidate = propagated.unwrap_or(sender);

        let current = self.manager.unwrap_or(candidate);
        if candidate <= current {
            if self.manager != Some(candidate) {
                debug!(ring = %self.key, manager = %candidate, "Watching manager");
            }
            self.manager = Some(candidate);
            self.timers.get_mut(TimerKind::RingWatcher).feed();
        }
    }

    pub(super) fn mrc_topology_received(&mut self, interval_ms: u16, now: Instant, io: &mut RingIo<'_>) {
        self.stats.topology_received += 1;
        self.flush_fdb(io);
        if interval_ms > 0 {
            self.timers
                .get_mut(TimerKind::ClearFdb)
                .start(now, Duration::from_millis(u64::from(interval_ms)));
        }

        match self.role.mrc_state() {
            Some(MrcState::Pt) => self.mrc_confirm(io),
            Some(MrcState::De) => {
                self.timers.stop(TimerKind::LinkDown);
                self.enter_mrc(MrcState::DeIdle);
            }
            _ => {}
        }
    }
}
