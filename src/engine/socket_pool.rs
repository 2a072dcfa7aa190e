use {
    async_trait::async_trait,
    futures_util::future::join_all,
    log::*,
    std::{
        collections::HashMap,
        io,
        net::{IpAddr, Ipv4Addr, SocketAddr},
    },
    tokio::net::UdpSocket,
};

/// A datagram socket that can be pointed at a TPU address, written to, and
/// later pointed somewhere else.
#[async_trait]
pub trait TpuSocket: Send + Sync + 'static {
    /// Set the default destination. No session is established.
    async fn connect(&self, addr: SocketAddr) -> io::Result<()>;

    async fn send(&self, buffer: &[u8]) -> io::Result<()>;

    /// Called when the socket goes back to the free list. Discards errors
    /// queued by the current destination. The socket keeps pointing at it
    /// until the next [`TpuSocket::connect`].
    fn reset(&self);
}

/// Allocates fresh sockets for the pool.
pub trait TpuTransport: Send + Sync + 'static {
    type Socket: TpuSocket;

    fn new_socket(&self) -> io::Result<Self::Socket>;
}

pub struct UdpTpuSocket(UdpSocket);

#[async_trait]
impl TpuSocket for UdpTpuSocket {
    async fn connect(&self, addr: SocketAddr) -> io::Result<()> {
        self.0.connect(addr).await
    }

    async fn send(&self, buffer: &[u8]) -> io::Result<()> {
        self.0.send(buffer).await.map(|_| ())
    }

    fn reset(&self) {
        // ICMP errors from the old destination would otherwise surface on
        // the first send to the next one
        if let Ok(Some(err)) = self.0.take_error() {
            trace!("Discarding pending socket error: {}", err);
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct UdpTransport;

impl TpuTransport for UdpTransport {
    type Socket = UdpTpuSocket;

    fn new_socket(&self) -> io::Result<UdpTpuSocket> {
        let socket = solana_net_utils::bind_with_any_port(IpAddr::V4(Ipv4Addr::UNSPECIFIED))?;
        socket.set_nonblocking(true)?;
        Ok(UdpTpuSocket(UdpSocket::from_std(socket)?))
    }
}

/// Live sockets keyed by TPU address plus a free list of released sockets.
pub struct SocketPool<T: TpuTransport> {
    transport: T,
    live: HashMap<SocketAddr, T::Socket>,
    free: Vec<T::Socket>,
    max_free: usize,
    allocated: usize,
}

impl<T: TpuTransport> SocketPool<T> {
    pub fn new(transport: T, max_free: usize) -> Self {
        Self {
            transport,
            live: HashMap::new(),
            free: Vec::new(),
            max_free,
            allocated: 0,
        }
    }

    /// Number of live sockets
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    /// Sockets created over the lifetime of the pool
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.live.keys().copied().collect()
    }

    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.live.contains_key(addr)
    }

    pub fn socket(&self, addr: &SocketAddr) -> Option<&T::Socket> {
        self.live.get(addr)
    }

    /// Point the pool at `targets`. Sockets of addresses that stay targeted
    /// are kept, new addresses get a pooled or fresh socket, and sockets of
    /// addresses that are no longer targeted go back to the free list.
    /// An address that fails to connect is left out. Returns the live count.
    pub async fn reconcile(&mut self, targets: &[SocketAddr]) -> io::Result<usize> {
        let mut old = std::mem::take(&mut self.live);
        let mut sockets = HashMap::with_capacity(targets.len());

        for addr in targets {
            if sockets.contains_key(addr) {
                continue;
            }
            if let Some(socket) = old.remove(addr) {
                sockets.insert(*addr, socket);
                continue;
            }
            let socket = match self.acquire() {
                Ok(socket) => socket,
                Err(err) => {
                    self.live = sockets;
                    old.into_values().for_each(|socket| self.release(socket));
                    return Err(err);
                }
            };
            match socket.connect(*addr).await {
                Ok(()) => {
                    sockets.insert(*addr, socket);
                }
                Err(err) => {
                    warn!("Failed to connect TPU socket to {}: {}", addr, err);
                    self.release(socket);
                }
            }
        }

        self.live = sockets;
        old.into_values().for_each(|socket| self.release(socket));
        Ok(self.live.len())
    }

    /// Write `buffer` to every live socket. A failed write only takes its own
    /// address out of the live set. Returns the number of sockets written to.
    pub async fn broadcast(&mut self, buffer: &[u8]) -> usize {
        let results = join_all(self.live.iter().map(|(addr, socket)| async move {
            (*addr, socket.send(buffer).await)
        }))
        .await;

        let fanout = results.len();
        for (addr, result) in results {
            if let Err(err) = result {
                warn!("Error proxying transaction to TPU {}: {}", addr, err);
                self.quarantine(&addr);
            }
        }
        fanout
    }

    /// Take `addr` out of the live set and return its socket to the free
    /// list. Returns whether `addr` was live.
    pub fn quarantine(&mut self, addr: &SocketAddr) -> bool {
        match self.live.remove(addr) {
            Some(socket) => {
                self.release(socket);
                true
            }
            None => false,
        }
    }

    fn acquire(&mut self) -> io::Result<T::Socket> {
        if let Some(socket) = self.free.pop() {
            return Ok(socket);
        }
        let socket = self.transport.new_socket()?;
        self.allocated += 1;
        Ok(socket)
    }

    fn release(&mut self, socket: T::Socket) {
        socket.reset();
        if self.free.len() < self.max_free {
            self.free.push(socket);
        }
    }
}
