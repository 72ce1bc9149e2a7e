//! MRP daemon event loop.

use crate::config::Config;
use crate::control::ControlServer;
use crate::netif::SystemInterfaces;
use crate::packet::PacketSocket;
use common::{Error, Result};
use mrp::types::MacAddr;
use mrp::{Backends, Dispatcher, Registry};
use mrp_netlink::{LinkEvent, LinkMonitor, NetlinkOffload};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::unix::AsyncFd;
use tracing::{debug, info, warn};

/// Largest frame read from the packet socket
const FRAME_BUFFER_LEN: usize = 2048;

/// MRP daemon
pub struct MrpServer {
    registry: Arc<Registry>,
    dispatcher: Dispatcher,
    packets: Arc<PacketSocket>,
    links: AsyncFd<LinkMonitor>,
    control: ControlServer,
}

impl MrpServer {
    /// Open every socket the daemon needs. Must run inside a tokio runtime.
    pub fn bind(config: &Config) -> Result<Self> {
        let defaults = config.ring_defaults().map_err(Error::config)?;

        let packets = Arc::new(PacketSocket::open()?);
        let offload = NetlinkOffload::new()?;
        let registry = Arc::new(Registry::new(
            defaults,
            Backends::new(Box::new(offload), packets.clone()),
            Arc::new(SystemInterfaces),
        ));

        let links = AsyncFd::new(LinkMonitor::new()?)?;
        let control = ControlServer::bind(&config.server.control_socket)?;

        Ok(Self {
            dispatcher: Dispatcher::new(registry.clone()),
            registry,
            packets,
            links,
            control,
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Run until `shutdown` completes, then stop every ring.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);
        let mut frame = vec![0u8; FRAME_BUFFER_LEN];

        info!("MRP server running");

        loop {
            let deadline = self.registry.next_deadline().await;
            let timers = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at.into()).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                _ = timers => {
                    self.registry.expire_timers(Instant::now()).await;
                }
                received = self.packets.recv(&mut frame) => match received {
                    Ok((len, ifindex)) => self.on_frame(ifindex, &frame[..len]).await,
                    Err(e) => warn!(error = %e, "Packet socket receive failed"),
                },
                events = read_link_events(&mut self.links) => {
                    for event in events {
                        self.on_link_event(event).await;
                    }
                }
                request = self.control.recv() => match request {
                    Ok((data, peer)) => {
                        let replied = self
                            .control
                            .dispatch(&self.registry, &data, peer.as_deref())
                            .await;
                        if let Err(e) = replied {
                            warn!(error = %e, "Control reply failed");
                        }
                    }
                    Err(e) => warn!(error = %e, "Control socket receive failed"),
                },
            }
        }

        self.registry.shutdown().await;
        info!("MRP server stopped");
        Ok(())
    }

    async fn on_frame(&mut self, ifindex: u32, data: &[u8]) {
        if data.len() < 14 {
            debug!(ifindex, len = data.len(), "Runt frame");
            return;
        }
        let mut source = [0u8; 6];
        source.copy_from_slice(&data[6..12]);

        self.dispatcher
            .on_frame(ifindex, MacAddr(source), data, Instant::now())
            .await;
    }

    async fn on_link_event(&self, event: LinkEvent) {
        debug!(?event, "Link event");
        if let Some(mac) = event.mac {
            self.registry.mac_change(event.ifindex, mac).await;
        }
        let up = event.up && !event.removed;
        self.registry
            .link_change(event.ifindex, up, Instant::now())
            .await;
    }
}

/// Wait for link notifications and drain them.
async fn read_link_events(links: &mut AsyncFd<LinkMonitor>) -> Vec<LinkEvent> {
    let mut guard = match links.readable_mut().await {
        Ok(guard) => guard,
        Err(e) => {
            warn!(error = %e, "Link monitor failed");
            return Vec::new();
        }
    };

    let events = guard.get_inner_mut().recv_events();
    guard.clear_ready();
    events.unwrap_or_else(|e| {
        warn!(error = %e, "Failed to read link notifications");
        Vec::new()
    })
}
