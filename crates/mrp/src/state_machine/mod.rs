//! MRP ring state machine.
//!
//! One [`RingInstance`] per configured ring. The instance reacts to four
//! kinds of events (link changes, received frames, timer expiries and
//! start/stop) and drives the kernel bridge through an [`Offload`] backend
//! and the wire through a [`FrameSender`].
//!
//! Manager transitions (IEC 62439-2 MRM):
//! - AC_STAT1 → PRM_UP (first ring port up)
//! - PRM_UP → CHK_RC (own test frame received, or second port up)
//! - CHK_RC → CHK_RO (test frames lost)
//! - CHK_RO → CHK_RC (own test frame received again)
//!
//! Client transitions (MRC):
//! - AC_STAT1 → DE_IDLE → PT → PT_IDLE on ports coming up
//! - PT_IDLE → DE → DE_IDLE on a port going down
//!
//! An MRA behaves as a manager until it sees a better manager, then as a
//! client watching that manager.

mod frames;
mod mrc;
mod mrm;

use crate::offload::Offload;
use crate::pdu::{MrpFrame, Tlv};
use crate::timer::{Expiry, TimerKind, TimerSet};
use crate::transport::FrameSender;
use crate::types::{
    DomainId, MacAddr, MrcState, MrmState, PortRole, PortState, RecoveryTimings, RingKey,
    RingRole, RingState, RingStats, RingStatus, SubState, TestTier,
};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Identifier assigned by the registry
pub type InstanceId = u64;

/// Validity period requested for kernel generated ring tests
pub const HW_TEST_PERIOD: Duration = Duration::from_secs(10);

/// Collaborators an instance talks to while handling one event.
pub struct RingIo<'a> {
    pub offload: &'a mut dyn Offload,
    pub sender: &'a dyn FrameSender,
}

/// Manager identity as carried in test frames; lower compares better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ManagerId {
    pub prio: u16,
    pub mac: MacAddr,
}

impl ManagerId {
    pub fn new(prio: u16, mac: MacAddr) -> Self {
        Self { prio, mac }
    }

    pub fn is_better_than(&self, other: &ManagerId) -> bool {
        self < other
    }
}

impl fmt::Display for ManagerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}/{}", self.prio, self.mac)
    }
}

/// Sub-state of an MRA
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MraState {
    Manager(MrmState),
    Client(MrcState),
}

/// Role together with its current sub-state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Disabled,
    Mrc(MrcState),
    Mrm(MrmState),
    Mra(MraState),
}

impl Role {
    /// Initial role for a configured ring role.
    pub fn from_config(role: RingRole) -> Self {
        match role {
            RingRole::Disabled => Role::Disabled,
            RingRole::Mrc => Role::Mrc(MrcState::AcStat1),
            RingRole::Mrm => Role::Mrm(MrmState::AcStat1),
            RingRole::Mra => Role::Mra(MraState::Manager(MrmState::AcStat1)),
        }
    }

    /// Role the instance was configured with.
    pub fn configured(&self) -> RingRole {
        match self {
            Role::Disabled => RingRole::Disabled,
            Role::Mrc(_) => RingRole::Mrc,
            Role::Mrm(_) => RingRole::Mrm,
            Role::Mra(_) => RingRole::Mra,
        }
    }

    /// Role the instance currently behaves as.
    pub fn active(&self) -> RingRole {
        match self {
            Role::Disabled => RingRole::Disabled,
            Role::Mrc(_) | Role::Mra(MraState::Client(_)) => RingRole::Mrc,
            Role::Mrm(_) | Role::Mra(MraState::Manager(_)) => RingRole::Mrm,
        }
    }

    pub fn mrm_state(&self) -> Option<MrmState> {
        match self {
            Role::Mrm(state) | Role::Mra(MraState::Manager(state)) => Some(*state),
            _ => None,
        }
    }

    pub fn mrc_state(&self) -> Option<MrcState> {
        match self {
            Role::Mrc(state) | Role::Mra(MraState::Client(state)) => Some(*state),
            _ => None,
        }
    }

    pub fn sub_state(&self) -> SubState {
        if let Some(state) = self.mrm_state() {
            SubState::Mrm(state)
        } else if let Some(state) = self.mrc_state() {
            SubState::Mrc(state)
        } else {
            SubState::None
        }
    }
}

/// One ring port as seen by the instance
#[derive(Debug, Clone)]
pub struct Port {
    ifindex: u32,
    mac: MacAddr,
    role: PortRole,
    state: PortState,
    /// Loss of continuity: no MRP evidence of a working ring on this port
    loc: bool,
    oper_up: bool,
}

impl Port {
    fn new(role: PortRole, params: PortParams) -> Self {
        Self {
            ifindex: params.ifindex,
            mac: params.mac,
            role,
            state: PortState::Blocked,
            loc: true,
            oper_up: params.oper_up,
        }
    }

    pub fn ifindex(&self) -> u32 {
        self.ifindex
    }

    pub fn mac(&self) -> MacAddr {
        self.mac
    }

    pub fn role(&self) -> PortRole {
        self.role
    }

    /// Last state the kernel acknowledged.
    pub fn state(&self) -> PortState {
        self.state
    }

    pub fn loc(&self) -> bool {
        self.loc
    }

    pub fn is_up(&self) -> bool {
        self.oper_up
    }
}

/// Resolved interface of a ring port
#[derive(Debug, Clone, Copy)]
pub struct PortParams {
    pub ifindex: u32,
    pub mac: MacAddr,
    pub oper_up: bool,
}

/// Everything needed to build an instance
#[derive(Debug, Clone)]
pub struct InstanceParams {
    pub key: RingKey,
    /// Bridge MAC, used as the manager identity and frame source
    pub mac: MacAddr,
    pub primary: PortParams,
    pub secondary: PortParams,
    pub role: RingRole,
    pub priority: u16,
    pub domain: DomainId,
    pub timings: RecoveryTimings,
    pub hw_test_offload: bool,
}

/// What the instance currently behaves as
#[derive(Debug, Clone, Copy)]
enum Behavior {
    Idle,
    Manager,
    Client,
}

/// State of one MRP ring
#[derive(Debug)]
pub struct RingInstance {
    id: InstanceId,
    key: RingKey,
    mac: MacAddr,
    primary: Port,
    secondary: Port,
    role: Role,
    priority: u16,
    domain: DomainId,
    ring_state: RingState,
    seq_id: u16,
    transitions: u16,
    /// Best manager heard on the ring (foreign managers only)
    manager: Option<ManagerId>,
    timings: RecoveryTimings,
    /// Tests restarted because a client reported a link up
    add_test: bool,
    /// Suppress topology change on the next transition
    no_tc: bool,
    /// MRA client watching the current manager
    test_monitor: bool,
    test_tier: TestTier,
    hw_test_offload: bool,
    /// Kernel test generation active until
    hw_test_until: Option<Instant>,
    timers: TimerSet,
    epoch: Instant,
    stats: RingStats,
}

impl RingInstance {
    /// Create an instance; nothing is pushed to the kernel until [`start`].
    ///
    /// [`start`]: RingInstance::start
    pub fn new(id: InstanceId, params: InstanceParams, now: Instant) -> Self {
        Self {
            id,
            key: params.key,
            mac: params.mac,
            primary: Port::new(PortRole::Primary, params.primary),
            secondary: Port::new(PortRole::Secondary, params.secondary),
            role: Role::from_config(params.role),
            priority: params.priority,
            domain: params.domain,
            ring_state: RingState::Open,
            seq_id: 0,
            transitions: 0,
            manager: None,
            timings: params.timings,
            add_test: false,
            no_tc: false,
            test_monitor: false,
            test_tier: TestTier::Default,
            hw_test_offload: params.hw_test_offload,
            hw_test_until: None,
            timers: TimerSet::new(),
            epoch: now,
            stats: RingStats::default(),
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn key(&self) -> RingKey {
        self.key
    }

    pub fn mac(&self) -> MacAddr {
        self.mac
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn priority(&self) -> u16 {
        self.priority
    }

    pub fn ring_state(&self) -> RingState {
        self.ring_state
    }

    pub fn transitions(&self) -> u16 {
        self.transitions
    }

    pub fn manager(&self) -> Option<ManagerId> {
        self.manager
    }

    pub fn test_tier(&self) -> TestTier {
        self.test_tier
    }

    pub fn timings(&self) -> &RecoveryTimings {
        &self.timings
    }

    pub fn timers(&self) -> &TimerSet {
        &self.timers
    }

    pub fn stats(&self) -> &RingStats {
        &self.stats
    }

    pub fn is_mra_capable(&self) -> bool {
        matches!(self.role, Role::Mra(_))
    }

    pub fn is_test_monitor(&self) -> bool {
        self.test_monitor
    }

    pub fn port(&self, role: PortRole) -> &Port {
        match role {
            PortRole::Primary => &self.primary,
            PortRole::Secondary => &self.secondary,
        }
    }

    fn port_mut(&mut self, role: PortRole) -> &mut Port {
        match role {
            PortRole::Primary => &mut self.primary,
            PortRole::Secondary => &mut self.secondary,
        }
    }

    /// Role of `ifindex` in this ring, if it is one of its ports.
    pub fn port_role_of(&self, ifindex: u32) -> Option<PortRole> {
        if self.primary.ifindex == ifindex {
            Some(PortRole::Primary)
        } else if self.secondary.ifindex == ifindex {
            Some(PortRole::Secondary)
        } else {
            None
        }
    }

    /// The bridge address changed; it is the manager identity.
    pub fn set_mac(&mut self, mac: MacAddr) {
        if self.mac != mac {
            info!(ring = %self.key, old = %self.mac, new = %mac, "Bridge address changed");
            self.mac = mac;
        }
    }

    pub fn set_port_mac(&mut self, ifindex: u32, mac: MacAddr) {
        if let Some(role) = self.port_role_of(ifindex) {
            self.port_mut(role).mac = mac;
        }
    }

    pub fn status(&self) -> RingStatus {
        RingStatus {
            bridge: self.key.bridge,
            ring_nr: self.key.ring_nr,
            primary: self.primary.ifindex,
            secondary: self.secondary.ifindex,
            role: self.role.active(),
            priority: self.priority,
            mra_capable: self.is_mra_capable(),
            state: self.role.sub_state(),
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    fn behavior(&self) -> Behavior {
        if self.role.mrm_state().is_some() {
            Behavior::Manager
        } else if self.role.mrc_state().is_some() {
            Behavior::Client
        } else {
            Behavior::Idle
        }
    }

    fn identity(&self) -> ManagerId {
        ManagerId::new(self.priority, self.mac)
    }

    /// Push the ring to the kernel and enter the configured role.
    pub fn start(&mut self, now: Instant, io: &mut RingIo<'_>) {
        info!(
            ring = %self.key,
            role = %self.role.configured(),
            primary = self.primary.ifindex,
            secondary = self.secondary.ifindex,
            "Starting ring instance"
        );

        let result = io.offload.create_ring(
            self.key,
            self.primary.ifindex,
            self.secondary.ifindex,
            self.priority,
        );
        self.check_offload("create_ring", result);

        for role in [PortRole::Primary, PortRole::Secondary] {
            let result = io
                .offload
                .set_port_role(self.key, self.port(role).ifindex, role);
            self.check_offload("set_port_role", result);
        }

        match self.behavior() {
            Behavior::Idle => {
                self.set_ring_role(RingRole::Disabled, io);
                self.set_port_state(PortRole::Primary, PortState::Disabled, io);
                self.set_port_state(PortRole::Secondary, PortState::Disabled, io);
            }
            Behavior::Manager => self.mrm_init(now, io),
            Behavior::Client => self.mrc_init(now, io),
        }
    }

    /// Stop all activity and remove the ring from the kernel, leaving both
    /// ports forwarding.
    pub fn stop(&mut self, io: &mut RingIo<'_>) {
        self.stop_ring_test(io);
        self.timers.stop_all();
        self.set_port_state(PortRole::Primary, PortState::Forwarding, io);
        self.set_port_state(PortRole::Secondary, PortState::Forwarding, io);
        let result = io.offload.delete_ring(self.key);
        self.check_offload("delete_ring", result);
        info!(ring = %self.key, "Ring instance stopped");
    }

    /// Operational state of a ring port changed.
    pub fn link_change(&mut self, port: PortRole, up: bool, now: Instant, io: &mut RingIo<'_>) {
        if self.port(port).oper_up == up {
            return;
        }
        self.port_mut(port).oper_up = up;
        info!(ring = %self.key, %port, up, "Ring port link changed");

        match self.behavior() {
            Behavior::Idle => {}
            Behavior::Manager => self.mrm_link_change(port, up, now, io),
            Behavior::Client => self.mrc_link_change(port, up, now, io),
        }
    }

    /// Handle a decoded MRP frame received on a ring port.
    pub fn receive(&mut self, port: PortRole, frame: &MrpFrame, now: Instant, io: &mut RingIo<'_>) {
        if let Some(common) = frame.common() {
            if common.domain != self.domain {
                trace!(ring = %self.key, domain = %common.domain, "Frame for another domain");
                return;
            }
        }

        let behavior = self.behavior();
        match (frame.first(), behavior) {
            (_, Behavior::Idle) => {}
            (Some(Tlv::RingTest(test)), Behavior::Manager) => {
                let sub_tlvs = frame.option().map(|o| o.sub_tlvs()).unwrap_or_default();
                self.mrm_test_received(port, test, sub_tlvs, now, io);
            }
            (Some(Tlv::RingTest(test)), Behavior::Client) => {
                let sub_tlvs = frame.option().map(|o| o.sub_tlvs()).unwrap_or_default();
                self.mrc_test_received(port, test, sub_tlvs, now, io);
            }
            (Some(Tlv::RingTopology(topo)), Behavior::Manager) => {
                if topo.sa != self.mac {
                    debug!(ring = %self.key, sa = %topo.sa, "Topology change from another manager");
                }
            }
            (Some(Tlv::RingTopology(topo)), Behavior::Client) => {
                self.mrc_topology_received(topo.interval, now, io);
            }
            (Some(Tlv::RingLinkDown(_)), Behavior::Manager) => {
                self.mrm_link_frame_received(false, now, io);
            }
            (Some(Tlv::RingLinkUp(_)), Behavior::Manager) => {
                self.mrm_link_frame_received(true, now, io);
            }
            (Some(tlv), _) => {
                trace!(ring = %self.key, kind = ?tlv.kind(), "Ignoring frame");
            }
            (None, _) => {}
        }
    }

    /// Fire every due timer.
    pub fn poll_timers(&mut self, now: Instant, io: &mut RingIo<'_>) {
        // each timer fires at most a few times per poll
        for _ in 0..TimerKind::ALL.len() * 4 {
            let Some((kind, expiry)) = self.timers.fire_next(now) else {
                break;
            };
            self.timer_expired(kind, expiry, now, io);
        }
    }

    /// Handle one timer expiry.
    pub fn timer_expired(
        &mut self,
        kind: TimerKind,
        expiry: Expiry,
        now: Instant,
        io: &mut RingIo<'_>,
    ) {
        trace!(ring = %self.key, ?kind, ?expiry, "Timer expired");

        match kind {
            TimerKind::RingTest => {
                if matches!(self.behavior(), Behavior::Manager) {
                    self.mrm_ring_test_expired(expiry, now, io);
                } else {
                    self.timers.stop(TimerKind::RingTest);
                }
            }
            TimerKind::RingTopology => {
                if let Expiry::Tick { remaining } = expiry {
                    let left = self.timings.topo_interval * (remaining + 1);
                    self.send_topology(left, io);
                }
            }
            TimerKind::LinkUp => self.mrc_link_timer_expired(true, expiry, io),
            TimerKind::LinkDown => self.mrc_link_timer_expired(false, expiry, io),
            TimerKind::ClearFdb => self.flush_fdb(io),
            TimerKind::RingWatcher => {
                if expiry == Expiry::Exhausted && self.test_monitor {
                    self.mra_resume_manager(now, io);
                }
            }
        }
    }

    fn check_offload(&mut self, op: &'static str, result: common::Result<()>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                self.stats.offload_failures += 1;
                warn!(ring = %self.key, op, error = %e, "Offload request failed");
                false
            }
        }
    }

    fn set_port_state(&mut self, role: PortRole, state: PortState, io: &mut RingIo<'_>) {
        let ifindex = self.port(role).ifindex;
        let result = io.offload.set_port_state(ifindex, state);
        if self.check_offload("set_port_state", result) {
            let key = self.key;
            let port = self.port_mut(role);
            if port.state != state {
                debug!(ring = %key, port = %role, %state, "Port state changed");
            }
            port.state = state;
        }
    }

    fn set_ring_state(&mut self, state: RingState, io: &mut RingIo<'_>) {
        self.ring_state = state;
        let result = io.offload.set_ring_state(self.key, state);
        self.check_offload("set_ring_state", result);
    }

    fn set_ring_role(&mut self, role: RingRole, io: &mut RingIo<'_>) {
        let result = io.offload.set_ring_role(self.key, role);
        self.check_offload("set_ring_role", result);
    }

    fn flush_fdb(&mut self, io: &mut RingIo<'_>) {
        for role in [PortRole::Primary, PortRole::Secondary] {
            let result = io.offload.flush_fdb(self.port(role).ifindex);
            self.check_offload("flush_fdb", result);
        }
        self.stats.fdb_flushes += 1;
    }

    fn enter_mrm(&mut self, state: MrmState) {
        let from = self.role;
        self.role = match self.role {
            Role::Mra(_) => Role::Mra(MraState::Manager(state)),
            _ => Role::Mrm(state),
        };
        if from != self.role {
            debug!(ring = %self.key, from = %from.sub_state(), to = %state, "Manager state change");
        }
    }

    fn enter_mrc(&mut self, state: MrcState) {
        let from = self.role;
        self.role = match self.role {
            Role::Mra(_) => Role::Mra(MraState::Client(state)),
            _ => Role::Mrc(state),
        };
        if from != self.role {
            debug!(ring = %self.key, from = %from.sub_state(), to = %state, "Client state change");
        }
    }

    /// Ring ports that take part in MRP traffic.
    fn active_ports(&self) -> Vec<PortRole> {
        [PortRole::Primary, PortRole::Secondary]
            .into_iter()
            .filter(|role| {
                let port = self.port(*role);
                port.oper_up && port.state != PortState::Disabled
            })
            .collect()
    }
}
