//! Transporte de rede: canais sobre TCP, mensagens sobre UDP.
//!
//! - Abrir um canal cria uma conexão TCP de controle com preâmbulo `Open`.
//!   Ela fica aberta enquanto o canal existir; EOF nela significa canal
//!   fechado.
//! - Cada stream de saída é uma conexão TCP própria com preâmbulo `Stream`.
//!   Liberar o stream fecha a metade de escrita, e o leitor recebe EOF.
//! - Mensagens são datagramas UDP: preâmbulo `Message` + payload cru.
//!
//! O receiver escuta TCP e UDP na mesma porta ([`NetListener`]).

use super::{
    ChannelClient, ChannelListener, ClosedListener, ListenerId, MessageClient, MessageListener,
    NodeClient, TransportError,
};
use crate::protocol::{self, FrameKind, Preamble};
use crate::types::{ChannelId, PeerHandle};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{
    IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream, UdpSocket,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

/// Opções de tempo do transporte.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetOptions {
    /// Timeout de connect/leitura/escrita. `None` = sem limite.
    pub io_timeout: Option<Duration>,
    /// Timeout da sonda de alcance em `connected_nodes`. `None` desliga a
    /// sonda e todos os peers configurados são considerados conectados.
    pub probe_timeout: Option<Duration>,
}

struct Inner {
    peers: Vec<(PeerHandle, SocketAddr)>,
    options: NetOptions,
    /// Conexões de controle dos canais abertos
    channels: Mutex<HashMap<u64, TcpStream>>,
    next_id: AtomicU64,
    closed_listeners: Mutex<Vec<(ListenerId, ClosedListener)>>,
    next_listener: AtomicU64,
    udp: Mutex<Option<UdpSocket>>,
}

/// Lado sender do transporte de rede.
#[derive(Clone)]
pub struct NetTransport {
    inner: Arc<Inner>,
}

impl NetTransport {
    /// `peers` define a ordem em que os nós são reportados.
    pub fn new(peers: Vec<(PeerHandle, SocketAddr)>, options: NetOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                peers,
                options,
                channels: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                closed_listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(0),
                udp: Mutex::new(None),
            }),
        }
    }

    fn address_of(&self, peer: &PeerHandle) -> Option<SocketAddr> {
        self.inner
            .peers
            .iter()
            .find(|(p, _)| p == peer)
            .map(|(_, addr)| *addr)
    }

    fn connect(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        let timeout = self.inner.options.io_timeout;
        let stream = match timeout {
            Some(t) => TcpStream::connect_timeout(&addr, t)?,
            None => TcpStream::connect(addr)?,
        };
        stream.set_read_timeout(timeout)?;
        stream.set_write_timeout(timeout)?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    /// Conecta e envia o preâmbulo.
    fn connect_with(&self, addr: SocketAddr, preamble: &Preamble) -> Result<TcpStream, TransportError> {
        let mut stream = self.connect(addr)?;
        protocol::write_preamble(&mut stream, preamble)?;
        stream.flush()?;
        Ok(stream)
    }

    fn spawn_watcher(&self, channel: ChannelId, mut control: TcpStream) -> io::Result<()> {
        let inner = Arc::clone(&self.inner);
        std::thread::Builder::new()
            .name(format!("pulselink-ch-{}", channel.id))
            .spawn(move || {
                let mut buf = [0u8; 64];
                loop {
                    match control.read(&mut buf) {
                        Ok(0) => break,
                        Ok(_) => continue,
                        Err(ref e) if is_timeout(e) => continue,
                        Err(_) => break,
                    }
                }
                // Se ainda está no mapa, quem fechou foi o outro lado
                if lock(&inner.channels).remove(&channel.id).is_some() {
                    info!("Canal {} fechado por {}", channel.id, channel.peer);
                    let listeners: Vec<ClosedListener> = lock(&inner.closed_listeners)
                        .iter()
                        .map(|(_, listener)| Arc::clone(listener))
                        .collect();
                    for listener in listeners {
                        listener(&channel);
                    }
                }
            })?;
        Ok(())
    }

    fn udp_socket(&self, target: SocketAddr) -> io::Result<UdpSocket> {
        if target.is_ipv6() {
            return UdpSocket::bind((Ipv6Addr::UNSPECIFIED, 0));
        }
        let mut slot = lock(&self.inner.udp);
        if let Some(sock) = slot.as_ref() {
            return sock.try_clone();
        }
        let sock = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        sock.set_write_timeout(self.inner.options.io_timeout)?;
        let clone = sock.try_clone()?;
        *slot = Some(sock);
        Ok(clone)
    }
}

impl NodeClient for NetTransport {
    fn connected_nodes(&self) -> Result<Vec<PeerHandle>, TransportError> {
        let Some(probe) = self.inner.options.probe_timeout else {
            return Ok(self.inner.peers.iter().map(|(p, _)| p.clone()).collect());
        };

        let reachable = self
            .inner
            .peers
            .iter()
            .filter(|(peer, addr)| match TcpStream::connect_timeout(addr, probe) {
                Ok(_) => true,
                Err(e) => {
                    debug!("Peer {peer} ({addr}) inalcançável: {e}");
                    false
                }
            })
            .map(|(p, _)| p.clone())
            .collect();
        Ok(reachable)
    }
}

impl ChannelClient for NetTransport {
    fn open_channel(&self, peer: &PeerHandle, path: &str) -> Result<ChannelId, TransportError> {
        let addr = self.address_of(peer).ok_or(TransportError::PeerUnavailable)?;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let control = self.connect_with(addr, &Preamble::new(FrameKind::Open, id, path))?;
        let watcher = control.try_clone()?;

        let channel = ChannelId {
            id,
            peer: peer.clone(),
            path: path.to_string(),
        };
        lock(&self.inner.channels).insert(id, control);
        if let Err(e) = self.spawn_watcher(channel.clone(), watcher) {
            if let Some(control) = lock(&self.inner.channels).remove(&id) {
                let _ = control.shutdown(Shutdown::Both);
            }
            return Err(e.into());
        }

        debug!("Canal {id} aberto para {peer} ({addr})");
        Ok(channel)
    }

    fn output_stream(&self, channel: &ChannelId) -> Result<Box<dyn Write + Send>, TransportError> {
        if !lock(&self.inner.channels).contains_key(&channel.id) {
            return Err(TransportError::WriteFailed(format!(
                "canal {} não está aberto",
                channel.id
            )));
        }
        let addr = self
            .address_of(&channel.peer)
            .ok_or(TransportError::PeerUnavailable)?;
        let stream = self.connect_with(
            addr,
            &Preamble::new(FrameKind::Stream, channel.id, channel.path.as_str()),
        )?;
        Ok(Box::new(NetOutputStream { stream }))
    }

    fn close(&self, channel: &ChannelId) -> Result<(), TransportError> {
        let Some(control) = lock(&self.inner.channels).remove(&channel.id) else {
            return Ok(());
        };
        control
            .shutdown(Shutdown::Both)
            .map_err(|e| TransportError::CloseFailed(e.to_string()))
    }

    fn register_closed_listener(&self, listener: ClosedListener) -> ListenerId {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        lock(&self.inner.closed_listeners).push((id, listener));
        id
    }

    fn unregister_closed_listener(&self, id: ListenerId) {
        lock(&self.inner.closed_listeners).retain(|(registered, _)| *registered != id);
    }
}

impl MessageClient for NetTransport {
    fn send_message(&self, peer: &PeerHandle, path: &str, data: &[u8]) -> Result<(), TransportError> {
        let addr = self.address_of(peer).ok_or(TransportError::PeerUnavailable)?;
        let frame = protocol::encode_message(path, data)?;
        let sock = self.udp_socket(addr)?;
        let sent = sock.send_to(&frame, addr)?;
        if sent != frame.len() {
            return Err(TransportError::SendFailed(format!(
                "datagrama truncado ({sent} de {} bytes)",
                frame.len()
            )));
        }
        Ok(())
    }
}

/// Stream de saída; fechar a metade de escrita sinaliza EOF ao leitor.
struct NetOutputStream {
    stream: TcpStream,
}

impl Write for NetOutputStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Drop for NetOutputStream {
    fn drop(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Write);
    }
}

// ──────────────────────────────────────────────
// Lado receiver
// ──────────────────────────────────────────────

/// Escuta conexões TCP e datagramas UDP na mesma porta.
pub struct NetListener {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl NetListener {
    /// Faz bind em `addr` (porta 0 = efêmera) e inicia as threads de escuta.
    pub fn bind(
        addr: SocketAddr,
        channels: Arc<dyn ChannelListener>,
        messages: Arc<dyn MessageListener>,
        io_timeout: Option<Duration>,
    ) -> io::Result<Self> {
        let tcp = TcpListener::bind(addr)?;
        let local_addr = tcp.local_addr()?;
        let udp = UdpSocket::bind(local_addr)?;
        udp.set_read_timeout(Some(Duration::from_secs(1)))?;

        let shutdown = Arc::new(AtomicBool::new(false));

        let accept_stop = Arc::clone(&shutdown);
        let accept = std::thread::Builder::new()
            .name("pulselink-tcp".into())
            .spawn(move || accept_loop(&tcp, &accept_stop, &channels, io_timeout))?;

        let udp_stop = Arc::clone(&shutdown);
        let datagrams = std::thread::Builder::new()
            .name("pulselink-udp".into())
            .spawn(move || datagram_loop(&udp, &udp_stop, &messages))?;

        info!("Receiver escutando em {local_addr} (TCP + UDP)");
        Ok(Self {
            local_addr,
            shutdown,
            threads: vec![accept, datagrams],
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Para as threads de escuta. Conexões já aceitas terminam sozinhas.
    pub fn shutdown(&mut self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        // Acorda o accept bloqueado
        let wake = match self.local_addr.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => {
                SocketAddr::new(Ipv4Addr::LOCALHOST.into(), self.local_addr.port())
            }
            IpAddr::V6(ip) if ip.is_unspecified() => {
                SocketAddr::new(Ipv6Addr::LOCALHOST.into(), self.local_addr.port())
            }
            _ => self.local_addr,
        };
        let _ = TcpStream::connect_timeout(&wake, Duration::from_secs(1));
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for NetListener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(
    tcp: &TcpListener,
    stop: &AtomicBool,
    channels: &Arc<dyn ChannelListener>,
    io_timeout: Option<Duration>,
) {
    for incoming in tcp.incoming() {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let stream = match incoming {
            Ok(s) => s,
            Err(e) => {
                warn!("Erro ao aceitar conexão: {e}");
                continue;
            }
        };
        let channels = Arc::clone(channels);
        let spawned = std::thread::Builder::new()
            .name("pulselink-conn".into())
            .spawn(move || handle_connection(stream, &channels, io_timeout));
        if let Err(e) = spawned {
            error!("Falha ao criar thread de conexão: {e}");
        }
    }
}

fn handle_connection(
    mut stream: TcpStream,
    channels: &Arc<dyn ChannelListener>,
    io_timeout: Option<Duration>,
) {
    let source = match stream.peer_addr() {
        Ok(addr) => addr.ip().to_string(),
        Err(_) => "desconhecido".to_string(),
    };
    if let Err(e) = stream.set_read_timeout(io_timeout) {
        warn!("Falha ao configurar timeout de {source}: {e}");
    }

    let preamble = match protocol::read_preamble(&mut stream) {
        Ok(p) => p,
        Err(e) => {
            // Sondas de alcance conectam e fecham sem preâmbulo
            debug!("Conexão de {source} sem preâmbulo válido: {e}");
            return;
        }
    };

    let channel = ChannelId {
        id: preamble.channel_id,
        peer: PeerHandle::new(source),
        path: preamble.path,
    };

    match preamble.kind {
        FrameKind::Open => {
            channels.on_channel_opened(&channel);
            let mut buf = [0u8; 64];
            loop {
                match stream.read(&mut buf) {
                    Ok(0) => break,
                    Ok(_) => continue,
                    Err(ref e) if is_timeout(e) => continue,
                    Err(_) => break,
                }
            }
            channels.on_channel_closed(&channel);
        }
        FrameKind::Stream => channels.on_input_stream(&channel, &mut stream),
        FrameKind::Message => {
            debug!("Preâmbulo de mensagem em conexão TCP de {}, ignorando", channel.peer);
        }
    }
}

fn datagram_loop(udp: &UdpSocket, stop: &AtomicBool, messages: &Arc<dyn MessageListener>) {
    let mut buf = [0u8; 2048];
    while !stop.load(Ordering::SeqCst) {
        match udp.recv_from(&mut buf) {
            Ok((size, addr)) => match protocol::decode_message(&buf[..size]) {
                Ok((preamble, payload)) if preamble.kind == FrameKind::Message => {
                    let source = PeerHandle::new(addr.ip().to_string());
                    messages.on_message_received(&source, &preamble.path, payload);
                }
                Ok((preamble, _)) => {
                    debug!("Datagrama de {addr} com tipo inesperado {:?}", preamble.kind);
                }
                Err(e) => debug!("Datagrama inválido de {addr}: {e}"),
            },
            Err(ref e) if is_timeout(e) => {
                // Timeout normal, continua
            }
            Err(e) => warn!("Erro ao receber UDP: {e}"),
        }
    }
}
