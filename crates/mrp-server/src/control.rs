//! Datagram control socket.
//!
//! The daemon answers every request on the sender's bound path. Requests
//! are handled one at a time from the event loop.

use crate::ctl::{
    self, AddRequest, Command, CtlError, Reply, Request, StatusRecord, STATUS_RECORD_LEN,
};
use mrp::types::{MAX_MRP_INSTANCES, RingRole};
use mrp::{AddError, Registry, RingConfig};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::UnixDatagram;
use tracing::{debug, info, warn};

/// Round trip limit of a client request
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest datagram either side sends
const MAX_MESSAGE_LEN: usize = 16 + 4 + MAX_MRP_INSTANCES * STATUS_RECORD_LEN;

fn ring_config(add: &AddRequest) -> Result<RingConfig, AddError> {
    let role = RingRole::try_from(add.role)?;
    // the priority has no error of its own; it travels with the role
    let priority = u16::try_from(add.priority)
        .map_err(|_| AddError::InvalidRole(format!("priority {} out of range", add.priority)))?;
    Ok(RingConfig {
        bridge: add.bridge,
        ring_nr: add.ring_nr,
        primary: add.primary,
        secondary: add.secondary,
        role,
        priority,
        recovery: None,
    })
}

/// Run one request against the registry.
pub async fn execute(registry: &Registry, request: Request, now: Instant) -> Reply {
    match request {
        Request::Add(add) => {
            let result = match ring_config(&add) {
                Ok(config) => registry.add(config, now).await.map(|_| ()),
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => Reply::new(Command::Add, 0),
                Err(e) => {
                    warn!(bridge = add.bridge, ring_nr = add.ring_nr, error = %e, "Add ring rejected");
                    Reply::new(Command::Add, -e.errno())
                }
            }
        }
        Request::Del { bridge, ring_nr } => match registry.remove(bridge, ring_nr).await {
            Ok(()) => Reply::new(Command::Del, 0),
            Err(e) => {
                warn!(bridge, ring_nr, error = %e, "Delete ring rejected");
                Reply::new(Command::Del, -e.errno())
            }
        },
        Request::Get { output_len } => {
            let records: Vec<StatusRecord> =
                registry.list().await.iter().map(StatusRecord::from).collect();
            match ctl::encode_status_list(&records, output_len) {
                Some(payload) => Reply {
                    command: Command::Get,
                    result: 0,
                    payload,
                },
                None => Reply::new(Command::Get, -libc::EINVAL),
            }
        }
    }
}

/// Decode a datagram and run it. Datagrams without a usable header get no
/// reply.
pub async fn handle(registry: &Registry, data: &[u8], now: Instant) -> Option<Reply> {
    match Request::decode(data) {
        Ok(request) => {
            debug!(?request, "Control request");
            Some(execute(registry, request, now).await)
        }
        Err((Some(command), e)) => {
            warn!(error = %e, "Malformed control request");
            Some(Reply::new(command, -libc::EINVAL))
        }
        Err((None, e)) => {
            warn!(error = %e, "Dropping control datagram");
            None
        }
    }
}

/// Daemon side of the control socket
pub struct ControlServer {
    socket: UnixDatagram,
    path: PathBuf,
}

impl ControlServer {
    /// Bind `path`, replacing a stale socket file.
    pub fn bind(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let socket = UnixDatagram::bind(&path)?;
        info!(socket = %path.display(), "Control socket listening");
        Ok(Self { socket, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the next request. Cancel safe.
    pub async fn recv(&self) -> io::Result<(Vec<u8>, Option<PathBuf>)> {
        let mut buf = vec![0u8; MAX_MESSAGE_LEN];
        let (len, peer) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(len);
        Ok((buf, peer.as_pathname().map(Path::to_path_buf)))
    }

    pub async fn reply(&self, peer: &Path, reply: &Reply) -> io::Result<()> {
        self.socket.send_to(&reply.encode(), peer).await?;
        Ok(())
    }

    /// Receive, execute and answer one request.
    pub async fn serve_one(&self, registry: &Registry) -> io::Result<()> {
        let (data, peer) = self.recv().await?;
        self.dispatch(registry, &data, peer.as_deref()).await
    }

    /// Answer a request received by [`recv`](Self::recv).
    pub async fn dispatch(
        &self,
        registry: &Registry,
        data: &[u8],
        peer: Option<&Path>,
    ) -> io::Result<()> {
        let Some(reply) = handle(registry, data, Instant::now()).await else {
            return Ok(());
        };
        match peer {
            Some(peer) => self.reply(peer, &reply).await,
            None => {
                warn!("Control request from unbound socket, not replying");
                Ok(())
            }
        }
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Client side errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("control socket error: {0}")]
    Io(#[from] io::Error),

    #[error("no reply from server within {0:?}")]
    Timeout(Duration),

    #[error("bad reply: {0}")]
    Protocol(#[from] CtlError),

    #[error("reply for {actual:?} to a {expected:?} request")]
    WrongCommand { expected: Command, actual: Command },

    /// Server side failure, carrying the positive errno
    #[error("{}", errno_text(.0))]
    Rejected(i32),
}

fn errno_text(errno: &i32) -> String {
    io::Error::from_raw_os_error(*errno).to_string()
}

/// `mrpctl` side of the control socket
pub struct ControlClient {
    socket: UnixDatagram,
    local: PathBuf,
    timeout: Duration,
}

impl ControlClient {
    /// Connect from a per-process path in the temp directory.
    pub fn connect(server: impl AsRef<Path>) -> io::Result<Self> {
        let local = std::env::temp_dir().join(format!("mrpctl_{}.sock", std::process::id()));
        Self::connect_from(server, local)
    }

    /// Connect from `local`. The server replies to the bound path, so the
    /// client socket is never left unnamed.
    pub fn connect_from(server: impl AsRef<Path>, local: impl AsRef<Path>) -> io::Result<Self> {
        let local = local.as_ref().to_path_buf();
        if local.exists() {
            std::fs::remove_file(&local)?;
        }
        let socket = UnixDatagram::bind(&local)?;
        socket.connect(server)?;
        Ok(Self {
            socket,
            local,
            timeout: REQUEST_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send a request and wait for its reply.
    pub async fn request(&self, request: &Request) -> Result<Reply, ClientError> {
        self.socket.send(&request.encode()).await?;

        let mut buf = vec![0u8; MAX_MESSAGE_LEN];
        let len = tokio::time::timeout(self.timeout, self.socket.recv(&mut buf))
            .await
            .map_err(|_| ClientError::Timeout(self.timeout))??;

        let reply = Reply::decode(&buf[..len])?;
        if reply.command != request.command() {
            return Err(ClientError::WrongCommand {
                expected: request.command(),
                actual: reply.command,
            });
        }
        Ok(reply)
    }

    async fn checked(&self, request: &Request) -> Result<Reply, ClientError> {
        let reply = self.request(request).await?;
        if reply.result != 0 {
            return Err(ClientError::Rejected(-reply.result));
        }
        Ok(reply)
    }

    pub async fn add(&self, add: AddRequest) -> Result<(), ClientError> {
        self.checked(&Request::Add(add)).await.map(|_| ())
    }

    pub async fn delete(&self, bridge: u32, ring_nr: u32) -> Result<(), ClientError> {
        self.checked(&Request::Del { bridge, ring_nr }).await.map(|_| ())
    }

    pub async fn list(&self) -> Result<Vec<StatusRecord>, ClientError> {
        let reply = self
            .checked(&Request::Get {
                output_len: 4 + MAX_MRP_INSTANCES * STATUS_RECORD_LEN,
            })
            .await?;
        Ok(ctl::decode_status_list(&reply.payload)?)
    }
}

impl Drop for ControlClient {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.local);
    }
}
