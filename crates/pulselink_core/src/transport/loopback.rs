//! Rede pareada em memória.
//!
//! Liga os clientes do sender diretamente aos listeners do receiver no mesmo
//! processo. Serve para testes e demonstrações e permite injetar falhas em
//! cada etapa do transporte.

use super::{
    ChannelClient, ChannelListener, ClosedListener, ListenerId, MessageClient, MessageListener,
    NodeClient, TransportError,
};
use crate::types::{ChannelId, PeerHandle};
use std::collections::{HashMap, HashSet};
use std::io::{self, Cursor, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Etapa do transporte onde uma falha pode ser injetada.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    Discovery,
    Open,
    Write,
    Close,
    Send,
}

/// Contadores de operações observadas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopbackStats {
    pub opens: u64,
    pub close_attempts: u64,
    pub closes: u64,
    pub streams_acquired: u64,
    pub streams_released: u64,
    pub bytes_written: u64,
    pub messages: u64,
}

#[derive(Default)]
struct Shared {
    local: PeerHandle,
    nodes: Mutex<Vec<PeerHandle>>,
    faults: Mutex<HashSet<Fault>>,
    channels: Mutex<HashMap<u64, ChannelId>>,
    next_id: AtomicU64,
    channel_listeners: Mutex<Vec<Arc<dyn ChannelListener>>>,
    message_listeners: Mutex<Vec<Arc<dyn MessageListener>>>,
    closed_listeners: Mutex<Vec<(ListenerId, ClosedListener)>>,
    next_listener: AtomicU64,
    stats: Mutex<LoopbackStats>,
}

/// Lock que sobrevive a um thread que entrou em pânico segurando-o.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn injected(fault: Fault) -> TransportError {
    TransportError::Io(io::Error::other(format!("falha injetada: {fault:?}")))
}

/// Rede pareada em memória. Clonar compartilha o mesmo estado.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    shared: Arc<Shared>,
}

impl LoopbackNetwork {
    /// Cria uma rede sem nós conectados. `local` identifica o sender
    /// como origem das mensagens.
    pub fn new(local: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                local: PeerHandle::new(local),
                ..Default::default()
            }),
        }
    }

    /// Cria uma rede com os nós informados já conectados, na ordem dada.
    pub fn with_nodes<I, S>(local: impl Into<String>, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let net = Self::new(local);
        for id in nodes {
            net.connect_node(PeerHandle::new(id));
        }
        net
    }

    pub fn connect_node(&self, peer: PeerHandle) {
        lock(&self.shared.nodes).push(peer);
    }

    pub fn disconnect_all(&self) {
        lock(&self.shared.nodes).clear();
    }

    pub fn set_fault(&self, fault: Fault, enabled: bool) {
        let mut faults = lock(&self.shared.faults);
        if enabled {
            faults.insert(fault);
        } else {
            faults.remove(&fault);
        }
    }

    fn has_fault(&self, fault: Fault) -> bool {
        lock(&self.shared.faults).contains(&fault)
    }

    pub fn register_channel_listener(&self, listener: Arc<dyn ChannelListener>) {
        lock(&self.shared.channel_listeners).push(listener);
    }

    pub fn register_message_listener(&self, listener: Arc<dyn MessageListener>) {
        lock(&self.shared.message_listeners).push(listener);
    }

    /// Fecha um canal pelo lado do receiver, notificando o sender.
    pub fn close_remote(&self, channel: &ChannelId) {
        if lock(&self.shared.channels).remove(&channel.id).is_none() {
            return;
        }
        let closed: Vec<ClosedListener> = lock(&self.shared.closed_listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in closed {
            listener(channel);
        }
        for listener in self.channel_listeners() {
            listener.on_channel_closed(channel);
        }
    }

    /// Quantidade de callbacks de fechamento registrados.
    pub fn closed_listener_count(&self) -> usize {
        lock(&self.shared.closed_listeners).len()
    }

    /// Canais abertos no momento.
    pub fn open_channels(&self) -> Vec<ChannelId> {
        lock(&self.shared.channels).values().cloned().collect()
    }

    pub fn stats(&self) -> LoopbackStats {
        *lock(&self.shared.stats)
    }

    fn channel_listeners(&self) -> Vec<Arc<dyn ChannelListener>> {
        lock(&self.shared.channel_listeners).clone()
    }

    fn is_connected(&self, peer: &PeerHandle) -> bool {
        lock(&self.shared.nodes).contains(peer)
    }
}

impl NodeClient for LoopbackNetwork {
    fn connected_nodes(&self) -> Result<Vec<PeerHandle>, TransportError> {
        if self.has_fault(Fault::Discovery) {
            return Err(injected(Fault::Discovery));
        }
        Ok(lock(&self.shared.nodes).clone())
    }
}

impl ChannelClient for LoopbackNetwork {
    fn open_channel(&self, peer: &PeerHandle, path: &str) -> Result<ChannelId, TransportError> {
        if self.has_fault(Fault::Open) {
            return Err(injected(Fault::Open));
        }
        if !self.is_connected(peer) {
            return Err(TransportError::PeerUnavailable);
        }

        let channel = ChannelId {
            id: self.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            peer: peer.clone(),
            path: path.to_string(),
        };
        lock(&self.shared.channels).insert(channel.id, channel.clone());
        lock(&self.shared.stats).opens += 1;
        debug!("Loopback: canal {} aberto para {peer}", channel.id);

        for listener in self.channel_listeners() {
            listener.on_channel_opened(&channel);
        }
        Ok(channel)
    }

    fn output_stream(&self, channel: &ChannelId) -> Result<Box<dyn Write + Send>, TransportError> {
        if !lock(&self.shared.channels).contains_key(&channel.id) {
            return Err(TransportError::WriteFailed(format!(
                "canal {} não está aberto",
                channel.id
            )));
        }
        lock(&self.shared.stats).streams_acquired += 1;
        Ok(Box::new(LoopbackStream {
            network: self.clone(),
            channel: channel.clone(),
            buf: Vec::new(),
        }))
    }

    fn close(&self, channel: &ChannelId) -> Result<(), TransportError> {
        lock(&self.shared.stats).close_attempts += 1;
        if self.has_fault(Fault::Close) {
            return Err(injected(Fault::Close));
        }
        if lock(&self.shared.channels).remove(&channel.id).is_some() {
            lock(&self.shared.stats).closes += 1;
            for listener in self.channel_listeners() {
                listener.on_channel_closed(channel);
            }
        }
        Ok(())
    }

    fn register_closed_listener(&self, listener: ClosedListener) -> ListenerId {
        let id = ListenerId(self.shared.next_listener.fetch_add(1, Ordering::Relaxed));
        lock(&self.shared.closed_listeners).push((id, listener));
        id
    }

    fn unregister_closed_listener(&self, id: ListenerId) {
        lock(&self.shared.closed_listeners).retain(|(registered, _)| *registered != id);
    }
}

impl MessageClient for LoopbackNetwork {
    fn send_message(&self, peer: &PeerHandle, path: &str, data: &[u8]) -> Result<(), TransportError> {
        if self.has_fault(Fault::Send) {
            return Err(injected(Fault::Send));
        }
        if !self.is_connected(peer) {
            return Err(TransportError::PeerUnavailable);
        }
        lock(&self.shared.stats).messages += 1;

        let listeners: Vec<Arc<dyn MessageListener>> =
            lock(&self.shared.message_listeners).clone();
        for listener in listeners {
            listener.on_message_received(&self.shared.local, path, data);
        }
        Ok(())
    }
}

/// Stream de saída em memória. O conteúdo é entregue aos listeners quando o
/// stream é liberado.
struct LoopbackStream {
    network: LoopbackNetwork,
    channel: ChannelId,
    buf: Vec<u8>,
}

impl Write for LoopbackStream {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.network.has_fault(Fault::Write) {
            return Err(io::Error::other("falha injetada: Write"));
        }
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for LoopbackStream {
    fn drop(&mut self) {
        {
            let mut stats = lock(&self.network.shared.stats);
            stats.streams_released += 1;
            stats.bytes_written += self.buf.len() as u64;
        }
        if self.buf.is_empty() {
            return;
        }
        let data = std::mem::take(&mut self.buf);
        for listener in self.network.channel_listeners() {
            listener.on_input_stream(&self.channel, &mut Cursor::new(data.as_slice()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[derive(Default)]
    struct Recorder {
        opened: Mutex<Vec<u64>>,
        streams: Mutex<Vec<Vec<u8>>>,
        closed: Mutex<Vec<u64>>,
        messages: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl ChannelListener for Recorder {
        fn on_channel_opened(&self, channel: &ChannelId) {
            lock(&self.opened).push(channel.id);
        }
        fn on_input_stream(&self, _channel: &ChannelId, input: &mut dyn Read) {
            let mut data = Vec::new();
            input.read_to_end(&mut data).unwrap();
            lock(&self.streams).push(data);
        }
        fn on_channel_closed(&self, channel: &ChannelId) {
            lock(&self.closed).push(channel.id);
        }
    }

    impl MessageListener for Recorder {
        fn on_message_received(&self, _source: &PeerHandle, path: &str, data: &[u8]) {
            lock(&self.messages).push((path.to_string(), data.to_vec()));
        }
    }

    #[test]
    fn stream_is_delivered_on_release() {
        let net = LoopbackNetwork::with_nodes("watch", ["phone"]);
        let rec = Arc::new(Recorder::default());
        net.register_channel_listener(rec.clone());

        let ch = net.open_channel(&PeerHandle::new("phone"), "p").unwrap();
        assert_eq!(*lock(&rec.opened), vec![ch.id]);

        let mut out = net.output_stream(&ch).unwrap();
        out.write_all(&[1, 2, 3]).unwrap();
        assert!(lock(&rec.streams).is_empty(), "só entrega ao liberar");
        drop(out);
        assert_eq!(*lock(&rec.streams), vec![vec![1, 2, 3]]);

        net.close(&ch).unwrap();
        assert_eq!(*lock(&rec.closed), vec![ch.id]);
        assert!(net.open_channels().is_empty());
    }

    #[test]
    fn open_requires_connected_peer() {
        let net = LoopbackNetwork::new("watch");
        assert!(matches!(
            net.open_channel(&PeerHandle::new("phone"), "p"),
            Err(TransportError::PeerUnavailable)
        ));
    }

    #[test]
    fn write_fault_still_releases_stream() {
        let net = LoopbackNetwork::with_nodes("watch", ["phone"]);
        let ch = net.open_channel(&PeerHandle::new("phone"), "p").unwrap();
        net.set_fault(Fault::Write, true);
        {
            let mut out = net.output_stream(&ch).unwrap();
            assert!(out.write_all(&[0; 8]).is_err());
        }
        let stats = net.stats();
        assert_eq!(stats.streams_acquired, 1);
        assert_eq!(stats.streams_released, 1);
        assert_eq!(stats.bytes_written, 0);
    }

    #[test]
    fn remote_close_notifies_sender() {
        let net = LoopbackNetwork::with_nodes("watch", ["phone"]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        net.register_closed_listener(Arc::new(move |ch: &ChannelId| lock(&sink).push(ch.id)));

        let ch = net.open_channel(&PeerHandle::new("phone"), "p").unwrap();
        net.close_remote(&ch);
        assert_eq!(*lock(&seen), vec![ch.id]);
        assert!(net.output_stream(&ch).is_err());
    }

    #[test]
    fn messages_reach_listener() {
        let net = LoopbackNetwork::with_nodes("watch", ["phone"]);
        let rec = Arc::new(Recorder::default());
        net.register_message_listener(rec.clone());

        net.send_message(&PeerHandle::new("phone"), "p", &[9; 8]).unwrap();
        assert_eq!(*lock(&rec.messages), vec![("p".to_string(), vec![9; 8])]);

        net.set_fault(Fault::Send, true);
        assert!(net.send_message(&PeerHandle::new("phone"), "p", &[9; 8]).is_err());
        assert_eq!(net.stats().messages, 1);
    }
}
