//! Sessão de canal de bytes com um peer.
//!
//! Máquina de estados:
//!
//! ```text
//! Closed ──open──▶ Opening ──ok──▶ Open ──close──▶ Closing ──▶ Closed
//!                     │                │
//!                     └──erro/close──▶ Closed
//!                                      └──fechado pelo peer──▶ Failed ──close──▶ Closed
//! ```
//!
//! Uma sessão por vez. O handle do canal é o único estado mutável
//! compartilhado e fica sob um único mutex. A abertura roda sem o lock, para
//! que `close()` possa cancelar uma abertura em andamento; a escrita roda com
//! o lock, então um `close()` concorrente espera a escrita terminar.

use crate::transport::{ChannelClient, TransportError};
use crate::types::{ChannelId, PeerHandle};
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use tracing::{debug, info, warn};

/// Estado da sessão.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Opening,
    Open,
    Closing,
    Failed,
}

struct Slot {
    state: SessionState,
    channel: Option<ChannelId>,
    /// Incrementa a cada abertura/cancelamento para detectar aberturas obsoletas
    generation: u64,
}

pub struct ChannelSession {
    client: Arc<dyn ChannelClient>,
    slot: Mutex<Slot>,
}

impl ChannelSession {
    pub fn new(client: Arc<dyn ChannelClient>) -> Self {
        Self {
            client,
            slot: Mutex::new(Slot {
                state: SessionState::Closed,
                channel: None,
                generation: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Handle do canal aberto, se houver.
    pub fn channel(&self) -> Option<ChannelId> {
        self.lock().channel.clone()
    }

    /// Abre o canal. Válido apenas a partir de `Closed`.
    pub fn open(&self, peer: &PeerHandle, path: &str) -> Result<ChannelId, TransportError> {
        let generation = {
            let mut slot = self.lock();
            if slot.state != SessionState::Closed {
                return Err(TransportError::InvalidState(slot.state));
            }
            slot.state = SessionState::Opening;
            slot.generation += 1;
            slot.generation
        };

        let result = self.client.open_channel(peer, path);

        let mut slot = self.lock();
        let current = slot.state == SessionState::Opening && slot.generation == generation;
        match result {
            Ok(channel) if current => {
                slot.state = SessionState::Open;
                slot.channel = Some(channel.clone());
                info!("Canal {} aberto para {peer} em '{path}'", channel.id);
                Ok(channel)
            }
            Ok(channel) => {
                // close() chegou durante a abertura: descarta o canal novo
                drop(slot);
                debug!("Abertura do canal {} cancelada", channel.id);
                if let Err(e) = self.client.close(&channel) {
                    warn!("Falha ao descartar canal {}: {e}", channel.id);
                }
                Err(TransportError::ChannelOpenFailed {
                    path: path.to_string(),
                    reason: "sessão fechada durante a abertura".into(),
                })
            }
            Err(e) => {
                if current {
                    slot.state = SessionState::Closed;
                }
                Err(TransportError::ChannelOpenFailed {
                    path: path.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Escreve o payload inteiro num stream de saída e o libera.
    ///
    /// Válido apenas em `Open`. Uma falha de escrita não muda o estado.
    pub fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let slot = self.lock();
        let channel = match (&slot.state, &slot.channel) {
            (SessionState::Open, Some(channel)) => channel,
            (state, _) => return Err(TransportError::InvalidState(*state)),
        };

        let mut out = self
            .client
            .output_stream(channel)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        // `out` é liberado ao sair do escopo, com ou sem erro
        out.write_all(bytes)
            .and_then(|()| out.flush())
            .map_err(|e| TransportError::WriteFailed(e.to_string()))
    }

    /// Fecha o canal. Sem efeito a partir de `Closed`.
    ///
    /// O handle é descartado mesmo se o transporte falhar ao fechar.
    pub fn close(&self) -> Result<(), TransportError> {
        let channel = {
            let mut slot = self.lock();
            match slot.state {
                SessionState::Closed => return Ok(()),
                SessionState::Closing => {
                    return Err(TransportError::InvalidState(SessionState::Closing));
                }
                SessionState::Opening => {
                    slot.state = SessionState::Closed;
                    slot.generation += 1;
                    return Ok(());
                }
                SessionState::Open | SessionState::Failed => {
                    slot.state = SessionState::Closing;
                    slot.channel.take()
                }
            }
        };

        let result = match &channel {
            Some(ch) => self.client.close(ch),
            None => Ok(()),
        };

        self.lock().state = SessionState::Closed;

        match result {
            Ok(()) => {
                if let Some(ch) = channel {
                    info!("Canal {} fechado", ch.id);
                }
                Ok(())
            }
            Err(e @ TransportError::CloseFailed(_)) => Err(e),
            Err(e) => Err(TransportError::CloseFailed(e.to_string())),
        }
    }

    /// Cancela uma abertura em andamento sem esperar o transporte.
    ///
    /// Não bloqueia: se o lock estiver ocupado por uma escrita, a sessão está
    /// `Open` e não há abertura a cancelar. Retorna `true` se cancelou.
    pub fn cancel_open(&self) -> bool {
        let mut slot = match self.slot.try_lock() {
            Ok(slot) => slot,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return false,
        };
        if slot.state != SessionState::Opening {
            return false;
        }
        slot.state = SessionState::Closed;
        slot.generation += 1;
        true
    }

    /// Notificação de canal fechado pelo peer: `Open -> Failed`.
    pub fn on_remote_closed(&self, channel: &ChannelId) {
        let mut slot = self.lock();
        let matches = slot.channel.as_ref().is_some_and(|c| c.id == channel.id);
        if slot.state == SessionState::Open && matches {
            warn!("Canal {} fechado pelo peer", channel.id);
            slot.state = SessionState::Failed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ClosedListener, ListenerId};
    use crate::transport::loopback::{Fault, LoopbackNetwork};
    use crossbeam_channel::{Receiver, Sender, bounded};
    use std::time::Duration;

    fn setup() -> (LoopbackNetwork, ChannelSession, PeerHandle) {
        let net = LoopbackNetwork::with_nodes("watch", ["phone"]);
        let session = ChannelSession::new(Arc::new(net.clone()));
        (net, session, PeerHandle::new("phone"))
    }

    #[test]
    fn open_write_close_cycle() {
        let (net, session, peer) = setup();
        session.open(&peer, "p").unwrap();
        assert_eq!(session.state(), SessionState::Open);

        session.write(&[1; 8]).unwrap();
        assert_eq!(net.stats().bytes_written, 8);
        assert_eq!(net.stats().streams_released, 1);

        session.close().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.channel().is_none());
        assert!(net.open_channels().is_empty());
    }

    #[test]
    fn write_while_closed_does_no_io() {
        let (net, session, _) = setup();
        assert!(matches!(
            session.write(&[0; 8]),
            Err(TransportError::InvalidState(SessionState::Closed))
        ));
        assert_eq!(net.stats().streams_acquired, 0);
    }

    #[test]
    fn close_from_closed_is_noop() {
        let (net, session, _) = setup();
        session.close().unwrap();
        assert_eq!(net.stats().close_attempts, 0);
    }

    #[test]
    fn open_twice_is_rejected() {
        let (_net, session, peer) = setup();
        session.open(&peer, "p").unwrap();
        assert!(matches!(
            session.open(&peer, "p"),
            Err(TransportError::InvalidState(SessionState::Open))
        ));
    }

    #[test]
    fn open_failure_returns_to_closed() {
        let (net, session, peer) = setup();
        net.set_fault(Fault::Open, true);
        assert!(matches!(
            session.open(&peer, "p"),
            Err(TransportError::ChannelOpenFailed { .. })
        ));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn write_failure_keeps_state_and_releases_stream() {
        let (net, session, peer) = setup();
        session.open(&peer, "p").unwrap();
        net.set_fault(Fault::Write, true);
        assert!(matches!(
            session.write(&[0; 8]),
            Err(TransportError::WriteFailed(_))
        ));
        assert_eq!(session.state(), SessionState::Open);
        assert_eq!(net.stats().streams_released, 1);
    }

    #[test]
    fn failed_close_still_clears_handle() {
        let (net, session, peer) = setup();
        session.open(&peer, "p").unwrap();
        net.set_fault(Fault::Close, true);
        assert!(matches!(session.close(), Err(TransportError::CloseFailed(_))));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.channel().is_none());
        assert_eq!(net.stats().close_attempts, 1);
    }

    #[test]
    fn remote_close_marks_failed() {
        let (net, session, peer) = setup();
        let channel = session.open(&peer, "p").unwrap();
        net.close_remote(&channel);
        // sem listener registrado, notifica manualmente
        session.on_remote_closed(&channel);
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.write(&[0; 8]).is_err());

        session.close().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
    }

    /// Cliente cuja abertura bloqueia até ser liberada.
    struct GatedClient {
        inner: LoopbackNetwork,
        entered: Sender<()>,
        release: Receiver<()>,
    }

    impl ChannelClient for GatedClient {
        fn open_channel(&self, peer: &PeerHandle, path: &str) -> Result<ChannelId, TransportError> {
            self.entered.send(()).unwrap();
            self.release.recv().unwrap();
            self.inner.open_channel(peer, path)
        }
        fn output_stream(&self, channel: &ChannelId) -> Result<Box<dyn Write + Send>, TransportError> {
            self.inner.output_stream(channel)
        }
        fn close(&self, channel: &ChannelId) -> Result<(), TransportError> {
            self.inner.close(channel)
        }
        fn register_closed_listener(&self, listener: ClosedListener) -> ListenerId {
            self.inner.register_closed_listener(listener)
        }
        fn unregister_closed_listener(&self, id: ListenerId) {
            self.inner.unregister_closed_listener(id)
        }
    }

    #[test]
    fn close_during_open_discards_late_channel() {
        let net = LoopbackNetwork::with_nodes("watch", ["phone"]);
        let (entered_tx, entered_rx) = bounded(1);
        let (release_tx, release_rx) = bounded(1);
        let session = Arc::new(ChannelSession::new(Arc::new(GatedClient {
            inner: net.clone(),
            entered: entered_tx,
            release: release_rx,
        })));

        let opener = {
            let session = Arc::clone(&session);
            std::thread::spawn(move || session.open(&PeerHandle::new("phone"), "p"))
        };
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(session.state(), SessionState::Opening);

        // Escrita durante a abertura é rejeitada sem E/S
        assert!(matches!(
            session.write(&[0; 8]),
            Err(TransportError::InvalidState(SessionState::Opening))
        ));

        session.close().unwrap();
        assert_eq!(session.state(), SessionState::Closed);

        release_tx.send(()).unwrap();
        let result = opener.join().unwrap();
        assert!(matches!(result, Err(TransportError::ChannelOpenFailed { .. })));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(net.open_channels().is_empty(), "canal tardio foi fechado");
        assert_eq!(net.stats().streams_acquired, 0);
    }

    /// Cliente cujo stream de saída bloqueia na primeira escrita.
    struct GatedWriteClient {
        inner: LoopbackNetwork,
        entered: Sender<()>,
        release: Receiver<()>,
    }

    struct GatedWriter {
        inner: Box<dyn Write + Send>,
        entered: Sender<()>,
        release: Receiver<()>,
    }

    impl Write for GatedWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.entered.send(()).unwrap();
            self.release.recv().unwrap();
            self.inner.write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            self.inner.flush()
        }
    }

    impl ChannelClient for GatedWriteClient {
        fn open_channel(&self, peer: &PeerHandle, path: &str) -> Result<ChannelId, TransportError> {
            self.inner.open_channel(peer, path)
        }
        fn output_stream(&self, channel: &ChannelId) -> Result<Box<dyn Write + Send>, TransportError> {
            Ok(Box::new(GatedWriter {
                inner: self.inner.output_stream(channel)?,
                entered: self.entered.clone(),
                release: self.release.clone(),
            }))
        }
        fn close(&self, channel: &ChannelId) -> Result<(), TransportError> {
            self.inner.close(channel)
        }
        fn register_closed_listener(&self, listener: ClosedListener) -> ListenerId {
            self.inner.register_closed_listener(listener)
        }
        fn unregister_closed_listener(&self, id: ListenerId) {
            self.inner.unregister_closed_listener(id)
        }
    }

    #[test]
    fn close_during_write_waits_and_releases_stream() {
        let net = LoopbackNetwork::with_nodes("watch", ["phone"]);
        let (entered_tx, entered_rx) = bounded(1);
        let (release_tx, release_rx) = bounded(1);
        let session = Arc::new(ChannelSession::new(Arc::new(GatedWriteClient {
            inner: net.clone(),
            entered: entered_tx,
            release: release_rx,
        })));
        session.open(&PeerHandle::new("phone"), "p").unwrap();

        let writer = {
            let session = Arc::clone(&session);
            std::thread::spawn(move || session.write(&[1; 8]))
        };
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let closer = {
            let session = Arc::clone(&session);
            std::thread::spawn(move || session.close())
        };
        std::thread::sleep(Duration::from_millis(50));
        assert!(!closer.is_finished(), "close espera a escrita terminar");
        assert!(!session.cancel_open(), "escrita em andamento não é abertura");

        release_tx.send(()).unwrap();
        writer.join().unwrap().unwrap();
        closer.join().unwrap().unwrap();

        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.channel().is_none());
        let stats = net.stats();
        assert_eq!(stats.streams_acquired, 1);
        assert_eq!(stats.streams_released, 1);
        assert_eq!(stats.bytes_written, 8);
        assert!(net.open_channels().is_empty());
    }

    #[test]
    fn cancel_open_aborts_pending_open() {
        let net = LoopbackNetwork::with_nodes("watch", ["phone"]);
        let (entered_tx, entered_rx) = bounded(1);
        let (release_tx, release_rx) = bounded(1);
        let session = Arc::new(ChannelSession::new(Arc::new(GatedClient {
            inner: net.clone(),
            entered: entered_tx,
            release: release_rx,
        })));
        assert!(!session.cancel_open());

        let opener = {
            let session = Arc::clone(&session);
            std::thread::spawn(move || session.open(&PeerHandle::new("phone"), "p"))
        };
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(session.cancel_open());
        assert_eq!(session.state(), SessionState::Closed);

        release_tx.send(()).unwrap();
        assert!(opener.join().unwrap().is_err());
        assert!(net.open_channels().is_empty());
    }
}
