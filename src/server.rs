use std::{
    io::ErrorKind,
    net::{IpAddr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::Result;
use codec::{rtp::RtpPacket, srtp::SrtpSession};
use parking_lot::{Mutex, RwLock};
use service::directory::RoutingDirectory;
use tokio::{net::UdpSocket, task::JoinHandle};

use crate::statistics::{Statistics, Stats};

pub type PacketHandler = Box<dyn Fn(&[u8], SocketAddr) + Send + Sync>;

pub struct RtpListenerOptions {
    /// Hex encoded SRTP key material; SRTP is enabled when present.
    pub srtp_key: Option<String>,
    pub mtu: usize,
    pub directory: Arc<RoutingDirectory>,
    pub statistics: Statistics,
}

struct Bound {
    socket: Arc<UdpSocket>,
    port: u16,
}

/// One UDP listener bridging RTP senders into the gateway.
///
/// A listener owns its socket and its optional SRTP session
/// exclusively; the session is dropped, and its key material zeroed,
/// together with the listener. Several listeners may run at the same
/// time, one per configured port, each independent of the others.
pub struct RtpListener {
    srtp: Option<Arc<Mutex<SrtpSession>>>,
    handler: Arc<RwLock<Option<PacketHandler>>>,
    directory: Arc<RoutingDirectory>,
    statistics: Statistics,
    bound: Arc<RwLock<Option<Bound>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    stopped: Arc<AtomicBool>,
    mtu: usize,
}

impl RtpListener {
    /// Create a listener.
    ///
    /// Fails when SRTP is enabled and the key material does not
    /// decode, in which case no session is constructed; the failure
    /// is fatal to this listener only.
    pub fn new(options: RtpListenerOptions) -> Result<Self> {
        let srtp = match options.srtp_key {
            Some(key) => Some(Arc::new(Mutex::new(SrtpSession::open(&key)?))),
            None => None,
        };

        Ok(Self {
            srtp,
            handler: Arc::new(RwLock::new(None)),
            directory: options.directory,
            statistics: options.statistics,
            bound: Arc::new(RwLock::new(None)),
            task: Mutex::new(None),
            stopped: Arc::new(AtomicBool::new(true)),
            mtu: options.mtu,
        })
    }

    /// Register the packet handler, replacing any previous one. The
    /// handler receives the media payload and the sender's endpoint.
    pub fn set_packet_handler<F>(&self, handler: F)
    where
        F: Fn(&[u8], SocketAddr) + Send + Sync + 'static,
    {
        self.handler.write().replace(Box::new(handler));
    }

    /// Bind `port` and start receiving.
    ///
    /// A bind failure leaves the listener usable for a retry on a
    /// different port.
    pub async fn start(&self, listen: IpAddr, port: u16) -> Result<()> {
        if self.bound.read().is_some() {
            anyhow::bail!("listener is already receiving");
        }

        let socket = Arc::new(UdpSocket::bind(SocketAddr::new(listen, port)).await?);
        let port = socket.local_addr()?.port();

        self.stopped.store(false, Ordering::Relaxed);
        self.statistics.register(port);
        self.bound.write().replace(Bound {
            socket: socket.clone(),
            port,
        });

        self.task.lock().replace(tokio::spawn(receive_loop(
            socket,
            self.srtp.clone(),
            self.handler.clone(),
            self.directory.clone(),
            self.statistics.clone(),
            self.stopped.clone(),
            self.mtu,
            port,
        )));

        log::info!("rtp listener started: port={}", port);

        Ok(())
    }

    /// The bound address while receiving.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.bound
            .read()
            .as_ref()
            .and_then(|it| it.socket.local_addr().ok())
    }

    /// Send a synthesized packet back to a media origin through this
    /// listener's socket.
    pub async fn send_to(&self, bytes: &[u8], addr: SocketAddr) -> Result<()> {
        let bound = self
            .bound
            .read()
            .as_ref()
            .map(|it| (it.socket.clone(), it.port));

        let Some((socket, port)) = bound else {
            anyhow::bail!("listener is stopped");
        };

        socket.send_to(bytes, addr).await?;
        self.statistics
            .report(port, &[Stats::SendPkts(1), Stats::SendBytes(bytes.len())]);

        Ok(())
    }

    /// Stop receiving, closing the socket. Idempotent; pending
    /// receives are cancelled, not drained, and callbacks completing
    /// after the stop observe the stopped flag and become no-ops.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::Relaxed) {
            return;
        }

        if let Some(task) = self.task.lock().take() {
            task.abort();
        }

        if let Some(bound) = self.bound.write().take() {
            self.statistics.unregister(bound.port);
            log::info!("rtp listener stopped: port={}", bound.port);
        }
    }
}

impl Drop for RtpListener {
    fn drop(&mut self) {
        self.stop();
    }
}

/// udp socket process task.
///
/// Reads datagrams from the socket, peels the SRTP layer when
/// enabled, decodes the RTP framing and hands the payload to the
/// registered handler. A malformed or unauthenticated datagram is
/// dropped with a warning, it never terminates the loop.
#[allow(clippy::too_many_arguments)]
async fn receive_loop(
    socket: Arc<UdpSocket>,
    srtp: Option<Arc<Mutex<SrtpSession>>>,
    handler: Arc<RwLock<Option<PacketHandler>>>,
    directory: Arc<RoutingDirectory>,
    statistics: Statistics,
    stopped: Arc<AtomicBool>,
    mtu: usize,
    port: u16,
) {
    let mut buf = vec![0u8; mtu];

    loop {
        // An error is also reported here when a remote host is shut
        // down; those are skipped and the loop keeps receiving.
        let (size, addr) = match socket.recv_from(&mut buf).await {
            Ok(it) => it,
            Err(e) => {
                if stopped.load(Ordering::Relaxed) {
                    break;
                }

                if e.kind() != ErrorKind::ConnectionReset {
                    log::error!("udp socket receive failed: port={}, error={}", port, e);
                    break;
                }

                continue;
            }
        };

        if stopped.load(Ordering::Relaxed) {
            break;
        }

        statistics.report(
            port,
            &[Stats::ReceivedPkts(1), Stats::ReceivedBytes(size)],
        );

        log::trace!(
            "udp socket receive: size={}, addr={:?}, port={}",
            size,
            addr,
            port
        );

        let mut size = size;
        if let Some(session) = &srtp {
            size = match session.lock().unprotect(&mut buf[..size]) {
                Ok(it) => it,
                Err(e) => {
                    statistics.report(port, &[Stats::DroppedPkts(1)]);
                    log::warn!(
                        "srtp unprotect failed: port={}, addr={:?}, error={}",
                        port,
                        addr,
                        e
                    );

                    continue;
                }
            };
        }

        let packet = match RtpPacket::decode(&buf[..size]) {
            Ok(it) => it,
            Err(e) => {
                statistics.report(port, &[Stats::DroppedPkts(1)]);
                log::warn!(
                    "malformed rtp packet: port={}, addr={:?}, error={}",
                    port,
                    addr,
                    e
                );

                continue;
            }
        };

        // Remember where this stream lives so that the reverse path
        // can route back to it later.
        if let Err(e) = directory.record(packet.header.ssrc, addr).await {
            statistics.report(port, &[Stats::DroppedPkts(1)]);
            log::warn!(
                "routing directory unavailable: port={}, ssrc={:#010x}, error={}",
                port,
                packet.header.ssrc,
                e
            );

            continue;
        }

        if let Some(handler) = handler.read().as_ref() {
            handler(packet.payload(), addr);
        }
    }
}
