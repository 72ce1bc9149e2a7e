//! In-memory collaborators for driving ring instances without a kernel.

use crate::offload::Offload;
use crate::pdu::{self, MrpFrame};
use crate::transport::{FrameSender, InterfaceInfo};
use crate::types::{MacAddr, PortRole, PortState, RingKey, RingRole, RingState};
use bytes::Bytes;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One recorded offload request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OffloadCall {
    CreateRing {
        ring: RingKey,
        primary: u32,
        secondary: u32,
        priority: u16,
    },
    DeleteRing(RingKey),
    RingRole(RingKey, RingRole),
    RingState(RingKey, RingState),
    PortRole {
        ring: RingKey,
        port: u32,
        role: PortRole,
    },
    PortState {
        port: u32,
        state: PortState,
    },
    StartTest {
        ring: RingKey,
        interval: Duration,
        max_miss: u32,
        period: Duration,
    },
    FlushFdb(u32),
}

/// Offload backend that records every request. Clones share the record.
#[derive(Debug, Clone, Default)]
pub struct RecordingOffload {
    calls: Arc<Mutex<Vec<OffloadCall>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingOffload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<OffloadCall> {
        lock(&self.calls).clone()
    }

    pub fn clear(&self) {
        lock(&self.calls).clear();
    }

    /// Make every following request fail (after being recorded).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Last state requested for `port`.
    pub fn port_state(&self, port: u32) -> Option<PortState> {
        lock(&self.calls).iter().rev().find_map(|call| match call {
            OffloadCall::PortState { port: p, state } if *p == port => Some(*state),
            _ => None,
        })
    }

    pub fn flush_count(&self, port: u32) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| **call == OffloadCall::FlushFdb(port))
            .count()
    }

    fn record(&self, call: OffloadCall) -> common::Result<()> {
        lock(&self.calls).push(call);
        if self.failing.load(Ordering::SeqCst) {
            Err(common::Error::offload("injected failure"))
        } else {
            Ok(())
        }
    }
}

impl Offload for RecordingOffload {
    fn create_ring(&mut self, ring: RingKey, primary: u32, secondary: u32, priority: u16) -> common::Result<()> {
        self.record(OffloadCall::CreateRing {
            ring,
            primary,
            secondary,
            priority,
        })
    }

    fn delete_ring(&mut self, ring: RingKey) -> common::Result<()> {
        self.record(OffloadCall::DeleteRing(ring))
    }

    fn set_ring_role(&mut self, ring: RingKey, role: RingRole) -> common::Result<()> {
        self.record(OffloadCall::RingRole(ring, role))
    }

    fn set_ring_state(&mut self, ring: RingKey, state: RingState) -> common::Result<()> {
        self.record(OffloadCall::RingState(ring, state))
    }

    fn set_port_role(&mut self, ring: RingKey, port: u32, role: PortRole) -> common::Result<()> {
        self.record(OffloadCall::PortRole { ring, port, role })
    }

    fn set_port_state(&mut self, port: u32, state: PortState) -> common::Result<()> {
        self.record(OffloadCall::PortState { port, state })
    }

    fn send_ring_test(
        &mut self,
        ring: RingKey,
        interval: Duration,
        max_miss: u32,
        period: Duration,
    ) -> common::Result<()> {
        self.record(OffloadCall::StartTest {
            ring,
            interval,
            max_miss,
            period,
        })
    }

    fn flush_fdb(&mut self, port: u32) -> common::Result<()> {
        self.record(OffloadCall::FlushFdb(port))
    }
}

/// Frame sender that keeps every frame. Clones share the record.
#[derive(Debug, Clone, Default)]
pub struct RecordingSender {
    frames: Arc<Mutex<Vec<(u32, Bytes)>>>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sent frames in order, decoded.
    pub fn frames(&self) -> Vec<(u32, MrpFrame)> {
        lock(&self.frames)
            .iter()
            .filter_map(|(ifindex, data)| pdu::decode(data).ok().map(|f| (*ifindex, f)))
            .collect()
    }

    pub fn raw(&self) -> Vec<(u32, Bytes)> {
        lock(&self.frames).clone()
    }

    /// Remove and return everything sent so far.
    pub fn take(&self) -> Vec<(u32, Bytes)> {
        std::mem::take(&mut *lock(&self.frames))
    }

    pub fn clear(&self) {
        lock(&self.frames).clear();
    }
}

impl FrameSender for RecordingSender {
    fn send(&self, ifindex: u32, frame: &[u8]) -> io::Result<()> {
        lock(&self.frames).push((ifindex, Bytes::copy_from_slice(frame)));
        Ok(())
    }
}

/// Fixed interface table.
#[derive(Debug, Clone, Default)]
pub struct StaticInterfaces {
    table: Arc<Mutex<HashMap<u32, (MacAddr, bool)>>>,
}

impl StaticInterfaces {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, ifindex: u32, mac: MacAddr, up: bool) -> Self {
        lock(&self.table).insert(ifindex, (mac, up));
        self
    }

    pub fn set_up(&self, ifindex: u32, up: bool) {
        if let Some(entry) = lock(&self.table).get_mut(&ifindex) {
            entry.1 = up;
        }
    }
}

impl InterfaceInfo for StaticInterfaces {
    fn mac_address(&self, ifindex: u32) -> Option<MacAddr> {
        lock(&self.table).get(&ifindex).map(|(mac, _)| *mac)
    }

    fn is_up(&self, ifindex: u32) -> bool {
        lock(&self.table).get(&ifindex).is_some_and(|(_, up)| *up)
    }
}
