//! Ring instance registry.
//!
//! Owns every [`RingInstance`] and routes events to them by ring key or by
//! port interface. Locks are always taken in the order: instance table,
//! instance, backends.

use crate::offload::Offload;
use crate::pdu::MrpFrame;
use crate::state_machine::{InstanceId, InstanceParams, PortParams, RingInstance, RingIo};
use crate::transport::{FrameSender, InterfaceInfo};
use crate::types::{
    MAX_MRP_INSTANCES, MacAddr, RecoveryProfile, RingDefaults, RingKey, RingRole, RingStatus,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Why a ring could not be added
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddError {
    #[error("ring {0} already exists")]
    Duplicate(RingKey),

    #[error("interface {0} cannot be resolved")]
    InvalidInterface(u32),

    #[error("invalid ring role: {0}")]
    InvalidRole(String),

    #[error("invalid ring number {0}")]
    InvalidRingNumber(u32),

    #[error("interface {0} already belongs to ring {1}")]
    PortInUse(u32, RingKey),

    #[error("too many ring instances (limit {0})")]
    TooManyInstances(usize),
}

impl AddError {
    /// Errno reported over the control channel.
    pub fn errno(&self) -> i32 {
        match self {
            AddError::Duplicate(_) => libc::EEXIST,
            AddError::InvalidInterface(_) => libc::ENODEV,
            AddError::InvalidRole(_) | AddError::InvalidRingNumber(_) => libc::EINVAL,
            AddError::PortInUse(..) => libc::EBUSY,
            AddError::TooManyInstances(_) => libc::ENOSPC,
        }
    }
}

/// Why a ring could not be removed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoveError {
    #[error("ring {0} not found")]
    NotFound(RingKey),
}

impl RemoveError {
    pub fn errno(&self) -> i32 {
        match self {
            RemoveError::NotFound(_) => libc::ENOENT,
        }
    }
}

/// Parameters of a new ring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingConfig {
    pub bridge: u32,
    pub ring_nr: u32,
    pub primary: u32,
    pub secondary: u32,
    pub role: RingRole,
    pub priority: u16,
    /// Daemon default when unset
    pub recovery: Option<RecoveryProfile>,
}

impl RingConfig {
    pub fn key(&self) -> RingKey {
        RingKey::new(self.bridge, self.ring_nr)
    }
}

/// Kernel facing collaborators shared by all instances
pub struct Backends {
    pub offload: Box<dyn Offload>,
    pub sender: Arc<dyn FrameSender>,
}

impl Backends {
    pub fn new(offload: Box<dyn Offload>, sender: Arc<dyn FrameSender>) -> Self {
        Self { offload, sender }
    }

    fn io(&mut self) -> RingIo<'_> {
        RingIo {
            offload: self.offload.as_mut(),
            sender: self.sender.as_ref(),
        }
    }
}

#[derive(Default)]
struct Instances {
    by_id: BTreeMap<InstanceId, Arc<Mutex<RingInstance>>>,
    by_key: HashMap<RingKey, InstanceId>,
    by_port: HashMap<u32, InstanceId>,
    next_id: InstanceId,
}

impl Instances {
    fn by_port(&self, ifindex: u32) -> Option<Arc<Mutex<RingInstance>>> {
        let id = self.by_port.get(&ifindex)?;
        self.by_id.get(id).cloned()
    }

    fn all(&self) -> Vec<Arc<Mutex<RingInstance>>> {
        self.by_id.values().cloned().collect()
    }
}

/// All ring instances of the daemon
pub struct Registry {
    defaults: RingDefaults,
    interfaces: Arc<dyn InterfaceInfo>,
    instances: RwLock<Instances>,
    backends: Mutex<Backends>,
}

impl Registry {
    pub fn new(defaults: RingDefaults, backends: Backends, interfaces: Arc<dyn InterfaceInfo>) -> Self {
        Self {
            defaults,
            interfaces,
            instances: RwLock::new(Instances::default()),
            backends: Mutex::new(backends),
        }
    }

    pub fn defaults(&self) -> &RingDefaults {
        &self.defaults
    }

    fn resolve_port(&self, ifindex: u32) -> Result<PortParams, AddError> {
        let mac = self
            .interfaces
            .mac_address(ifindex)
            .ok_or(AddError::InvalidInterface(ifindex))?;
        Ok(PortParams {
            ifindex,
            mac,
            oper_up: self.interfaces.is_up(ifindex),
        })
    }

    /// Create and start a ring instance.
    pub async fn add(&self, config: RingConfig, now: Instant) -> Result<InstanceId, AddError> {
        let key = config.key();
        if config.ring_nr == 0 {
            return Err(AddError::InvalidRingNumber(config.ring_nr));
        }
        if config.primary == config.secondary {
            return Err(AddError::InvalidInterface(config.secondary));
        }

        let mut instances = self.instances.write().await;
        if instances.by_key.contains_key(&key) {
            return Err(AddError::Duplicate(key));
        }
        for port in [config.primary, config.secondary] {
            if let Some(owner) = instances.by_port.get(&port) {
                let owner = instances
                    .by_key
                    .iter()
                    .find_map(|(k, id)| (id == owner).then_some(*k))
                    .unwrap_or(key);
                return Err(AddError::PortInUse(port, owner));
            }
        }
        if instances.by_id.len() >= MAX_MRP_INSTANCES {
            return Err(AddError::TooManyInstances(MAX_MRP_INSTANCES));
        }

        let mac = self
            .interfaces
            .mac_address(config.bridge)
            .ok_or(AddError::InvalidInterface(config.bridge))?;
        let primary = self.resolve_port(config.primary)?;
        let secondary = self.resolve_port(config.secondary)?;

        let timings = match config.recovery {
            Some(profile) => profile.timings(),
            None => self.defaults.timings(),
        };
        let params = InstanceParams {
            key,
            mac,
            primary,
            secondary,
            role: config.role,
            priority: config.priority,
            domain: self.defaults.domain,
            timings,
            hw_test_offload: self.defaults.hw_test_offload,
        };

        let id = instances.next_id;
        instances.next_id += 1;
        let mut instance = RingInstance::new(id, params, now);
        {
            let mut backends = self.backends.lock().await;
            instance.start(now, &mut backends.io());
        }

        instances.by_id.insert(id, Arc::new(Mutex::new(instance)));
        instances.by_key.insert(key, id);
        instances.by_port.insert(config.primary, id);
        instances.by_port.insert(config.secondary, id);

        info!(ring = %key, id, role = %config.role, "Ring added");
        Ok(id)
    }

    /// Stop and remove a ring instance.
    pub async fn remove(&self, bridge: u32, ring_nr: u32) -> Result<(), RemoveError> {
        let key = RingKey::new(bridge, ring_nr);
        let mut instances = self.instances.write().await;
        let id = instances
            .by_key
            .remove(&key)
            .ok_or(RemoveError::NotFound(key))?;
        instances.by_port.retain(|_, owner| *owner != id);
        let Some(instance) = instances.by_id.remove(&id) else {
            return Err(RemoveError::NotFound(key));
        };

        let mut instance = instance.lock().await;
        let mut backends = self.backends.lock().await;
        instance.stop(&mut backends.io());

        info!(ring = %key, id, "Ring removed");
        Ok(())
    }

    pub async fn find(&self, bridge: u32, ring_nr: u32) -> Option<Arc<Mutex<RingInstance>>> {
        let instances = self.instances.read().await;
        let id = instances.by_key.get(&RingKey::new(bridge, ring_nr))?;
        instances.by_id.get(id).cloned()
    }

    /// Status of every ring, in creation order.
    pub async fn list(&self) -> Vec<RingStatus> {
        let instances = self.instances.read().await;
        let mut statuses = Vec::with_capacity(instances.by_id.len());
        for instance in instances.by_id.values() {
            statuses.push(instance.lock().await.status());
        }
        statuses
    }

    pub async fn len(&self) -> usize {
        self.instances.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Feed a link state change to the ring owning `ifindex`.
    pub async fn link_change(&self, ifindex: u32, up: bool, now: Instant) {
        let instances = self.instances.read().await;
        let Some(instance) = instances.by_port(ifindex) else {
            return;
        };
        let mut instance = instance.lock().await;
        let Some(port) = instance.port_role_of(ifindex) else {
            return;
        };
        let mut backends = self.backends.lock().await;
        instance.link_change(port, up, now, &mut backends.io());
    }

    /// An interface changed its hardware address.
    pub async fn mac_change(&self, ifindex: u32, mac: MacAddr) {
        let instances = self.instances.read().await;
        for instance in instances.by_id.values() {
            let mut instance = instance.lock().await;
            if instance.key().bridge == ifindex {
                instance.set_mac(mac);
            }
            instance.set_port_mac(ifindex, mac);
        }
    }

    /// Address of a ring port, if `ifindex` belongs to a ring.
    pub async fn port_mac(&self, ifindex: u32) -> Option<MacAddr> {
        let instances = self.instances.read().await;
        let instance = instances.by_port(ifindex)?;
        let instance = instance.lock().await;
        let role = instance.port_role_of(ifindex)?;
        Some(instance.port(role).mac())
    }

    /// Hand a decoded frame to the ring owning `ifindex`. Returns false if
    /// no ring owns the interface.
    pub async fn deliver(&self, ifindex: u32, frame: &MrpFrame, now: Instant) -> bool {
        let instances = self.instances.read().await;
        let Some(instance) = instances.by_port(ifindex) else {
            return false;
        };
        let mut instance = instance.lock().await;
        let Some(port) = instance.port_role_of(ifindex) else {
            return false;
        };
        let mut backends = self.backends.lock().await;
        instance.receive(port, frame, now, &mut backends.io());
        true
    }

    /// Earliest timer deadline across all rings.
    pub async fn next_deadline(&self) -> Option<Instant> {
        let instances = self.instances.read().await;
        let mut earliest: Option<Instant> = None;
        for instance in instances.by_id.values() {
            if let Some(deadline) = instance.lock().await.next_deadline() {
                earliest = Some(earliest.map_or(deadline, |e| e.min(deadline)));
            }
        }
        earliest
    }

    /// Fire all timers due at `now`.
    pub async fn expire_timers(&self, now: Instant) {
        let instances = self.instances.read().await.all();
        for instance in instances {
            let mut instance = instance.lock().await;
            if instance.next_deadline().is_some_and(|d| d <= now) {
                let mut backends = self.backends.lock().await;
                instance.poll_timers(now, &mut backends.io());
            }
        }
    }

    /// Stop and remove every ring.
    pub async fn shutdown(&self) {
        let keys: Vec<RingKey> = self.instances.read().await.by_key.keys().copied().collect();
        debug!(count = keys.len(), "Stopping all rings");
        for key in keys {
            if let Err(e) = self.remove(key.bridge, key.ring_nr).await {
                warn!(ring = %key, error = %e, "Failed to stop ring");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{OffloadCall, RecordingOffload, RecordingSender, StaticInterfaces};
    use crate::types::{MRP_DEFAULT_PRIO, MrcState, MrmState, SubState};
    use std::time::Duration;

    fn mac(last: u8) -> MacAddr {
        MacAddr([0x02, 0, 0, 0, 0, last])
    }

    fn setup() -> (Registry, RecordingOffload, RecordingSender, StaticInterfaces) {
        let offload = RecordingOffload::new();
        let sender = RecordingSender::new();
        let interfaces = StaticInterfaces::new()
            .with(1, mac(1), true)
            .with(2, mac(2), false)
            .with(3, mac(3), false)
            .with(4, mac(4), false)
            .with(5, mac(5), false);
        let registry = Registry::new(
            RingDefaults::default(),
            Backends::new(Box::new(offload.clone()), Arc::new(sender.clone())),
            Arc::new(interfaces.clone()),
        );
        (registry, offload, sender, interfaces)
    }

    fn config(ring_nr: u32, primary: u32, secondary: u32, role: RingRole) -> RingConfig {
        RingConfig {
            bridge: 1,
            ring_nr,
            primary,
            secondary,
            role,
            priority: MRP_DEFAULT_PRIO,
            recovery: None,
        }
    }

    #[tokio::test]
    async fn test_add_and_list() {
        let (registry, offload, _, _) = setup();
        let now = Instant::now();

        registry.add(config(1, 2, 3, RingRole::Mrm), now).await.unwrap();
        registry.add(config(2, 4, 5, RingRole::Mrc), now).await.unwrap();

        let list = registry.list().await;
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].ring_nr, 1);
        assert_eq!(list[0].role, RingRole::Mrm);
        assert_eq!(list[0].state, SubState::Mrm(MrmState::AcStat1));
        assert_eq!(list[1].state, SubState::Mrc(MrcState::AcStat1));
        assert!(offload.calls().contains(&OffloadCall::CreateRing {
            ring: RingKey::new(1, 1),
            primary: 2,
            secondary: 3,
            priority: MRP_DEFAULT_PRIO,
        }));
    }

    #[tokio::test]
    async fn test_add_rejects_duplicates_and_shared_ports() {
        let (registry, offload, _, _) = setup();
        let now = Instant::now();
        let id = registry.add(config(1, 2, 3, RingRole::Mrm), now).await.unwrap();
        let before = registry.list().await;
        let calls = offload.calls().len();

        let mut duplicate = config(1, 4, 5, RingRole::Mrc);
        duplicate.priority = 0x1000;
        assert_eq!(
            registry.add(duplicate, now).await,
            Err(AddError::Duplicate(RingKey::new(1, 1)))
        );
        assert_eq!(
            registry.add(config(2, 3, 4, RingRole::Mrc), now).await,
            Err(AddError::PortInUse(3, RingKey::new(1, 1)))
        );

        // the existing ring is untouched and nothing reached the kernel
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.list().await, before);
        assert_eq!(registry.find(1, 1).await.unwrap().lock().await.id(), id);
        assert_eq!(offload.calls().len(), calls);

        // its ports are still routed to it
        registry.link_change(2, true, now).await;
        assert_eq!(
            registry.list().await[0].state,
            SubState::Mrm(MrmState::PrmUp)
        );
    }

    #[tokio::test]
    async fn test_add_validates_input() {
        let (registry, offload, _, _) = setup();
        let now = Instant::now();

        assert_eq!(
            registry.add(config(0, 2, 3, RingRole::Mrm), now).await,
            Err(AddError::InvalidRingNumber(0))
        );
        assert_eq!(
            registry.add(config(1, 2, 99, RingRole::Mrm), now).await,
            Err(AddError::InvalidInterface(99))
        );
        assert_eq!(
            registry.add(config(1, 2, 2, RingRole::Mrm), now).await,
            Err(AddError::InvalidInterface(2))
        );
        assert!(registry.is_empty().await);
        assert!(offload.calls().is_empty());
    }

    #[tokio::test]
    async fn test_remove_is_not_idempotent() {
        let (registry, offload, _, _) = setup();
        let now = Instant::now();
        registry.add(config(1, 2, 3, RingRole::Mrm), now).await.unwrap();

        registry.remove(1, 1).await.unwrap();
        assert!(offload.calls().contains(&OffloadCall::DeleteRing(RingKey::new(1, 1))));
        assert_eq!(
            registry.remove(1, 1).await,
            Err(RemoveError::NotFound(RingKey::new(1, 1)))
        );

        // ports are free again
        registry.add(config(2, 2, 3, RingRole::Mrc), now).await.unwrap();
    }

    #[tokio::test]
    async fn test_link_events_drive_timers() {
        let (registry, _, sender, _) = setup();
        let t0 = Instant::now();
        registry.add(config(1, 2, 3, RingRole::Mrm), t0).await.unwrap();
        assert_eq!(registry.next_deadline().await, None);

        registry.link_change(2, true, t0).await;
        assert_eq!(registry.next_deadline().await, Some(t0 + Duration::from_millis(30)));
        assert_eq!(sender.frames().len(), 1);

        registry.expire_timers(t0 + Duration::from_millis(30)).await;
        assert_eq!(sender.frames().len(), 2);

        // events for interfaces outside any ring are ignored
        registry.link_change(9, true, t0).await;
    }

    #[tokio::test]
    async fn test_deliver_routes_by_port() {
        let (registry, _, sender, _) = setup();
        let t0 = Instant::now();
        registry.add(config(1, 2, 3, RingRole::Mrm), t0).await.unwrap();
        registry.link_change(2, true, t0).await;

        let (_, frame) = sender.frames().remove(0);
        assert!(registry.deliver(3, &frame, t0).await);
        assert!(!registry.deliver(7, &frame, t0).await);

        let status = registry.list().await.remove(0);
        assert_eq!(status.state, SubState::Mrm(MrmState::ChkRc));
    }

    #[tokio::test]
    async fn test_mac_change_updates_identity() {
        let (registry, _, _, _) = setup();
        let now = Instant::now();
        registry.add(config(1, 2, 3, RingRole::Mrm), now).await.unwrap();

        registry.mac_change(1, mac(0x42)).await;
        registry.mac_change(3, mac(0x43)).await;

        let ring = registry.find(1, 1).await.unwrap();
        let ring = ring.lock().await;
        assert_eq!(ring.mac(), mac(0x42));
        assert_eq!(ring.port(crate::types::PortRole::Secondary).mac(), mac(0x43));
    }

    #[tokio::test]
    async fn test_shutdown_removes_everything() {
        let (registry, offload, _, _) = setup();
        let now = Instant::now();
        registry.add(config(1, 2, 3, RingRole::Mrm), now).await.unwrap();
        registry.add(config(2, 4, 5, RingRole::Mra), now).await.unwrap();

        registry.shutdown().await;
        assert!(registry.is_empty().await);
        let deletes = offload
            .calls()
            .into_iter()
            .filter(|c| matches!(c, OffloadCall::DeleteRing(_)))
            .count();
        assert_eq!(deletes, 2);
    }
}
