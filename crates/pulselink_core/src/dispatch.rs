//! Estratégias de transporte do sender.
//!
//! Duas políticas intercambiáveis para a mesma responsabilidade, escolhidas
//! por configuração ([`TransportPolicy`]):
//!
//! - [`ChannelDispatch`] – abre um canal ao iniciar e escreve cada payload
//!   nele; fecha ao parar.
//! - [`MessageDispatch`] – resolve o peer a cada payload e envia uma
//!   mensagem discreta.

use crate::datagram::DatagramSender;
use crate::peer::PeerLocator;
use crate::session::{ChannelSession, SessionState};
use crate::transport::{ChannelClient, ListenerId, MessageClient, NodeClient, TransportError};
use crate::types::{ChannelId, TransportPolicy};
use std::sync::Arc;
use tracing::{debug, warn};

/// Interface comum às políticas de transporte.
///
/// Todos os métodos podem bloquear; rodam no worker do controlador.
pub trait DispatchStrategy: Send + Sync {
    fn policy(&self) -> TransportPolicy;

    /// Chamado ao entrar em `Transmitting`.
    fn on_start(&self) -> Result<(), TransportError>;

    /// Envia um payload já codificado.
    fn dispatch(&self, payload: &[u8]) -> Result<(), TransportError>;

    /// Chamado ao voltar para `Idle`.
    fn on_stop(&self) -> Result<(), TransportError>;

    /// Interrompe uma preparação em andamento sem bloquear. Roda na thread
    /// de quem chamou `stop()`, antes de `on_stop` ser enfileirado.
    fn cancel(&self) {}
}

/// Monta a estratégia da política pedida sobre um mesmo transporte.
pub fn strategy_for<T>(policy: TransportPolicy, transport: Arc<T>, path: &str) -> Arc<dyn DispatchStrategy>
where
    T: NodeClient + ChannelClient + MessageClient + 'static,
{
    match policy {
        TransportPolicy::Channel => Arc::new(ChannelDispatch::new(
            transport.clone(),
            transport,
            path,
        )),
        TransportPolicy::Message => Arc::new(MessageDispatch::new(
            transport.clone(),
            transport,
            path,
        )),
    }
}

// ──────────────────────────────────────────────
// Canal
// ──────────────────────────────────────────────

pub struct ChannelDispatch {
    locator: PeerLocator,
    session: Arc<ChannelSession>,
    channels: Arc<dyn ChannelClient>,
    closed_listener: ListenerId,
    path: String,
}

impl ChannelDispatch {
    pub fn new(nodes: Arc<dyn NodeClient>, channels: Arc<dyn ChannelClient>, path: &str) -> Self {
        let session = Arc::new(ChannelSession::new(Arc::clone(&channels)));

        let weak = Arc::downgrade(&session);
        let closed_listener = channels.register_closed_listener(Arc::new(move |channel: &ChannelId| {
            if let Some(session) = weak.upgrade() {
                session.on_remote_closed(channel);
            }
        }));

        Self {
            locator: PeerLocator::new(nodes),
            session,
            channels,
            closed_listener,
            path: path.to_string(),
        }
    }

    pub fn session(&self) -> &ChannelSession {
        &self.session
    }

    /// Resolve o peer e abre o canal.
    fn establish(&self) -> Result<(), TransportError> {
        let peer = self.locator.resolve().ok_or(TransportError::PeerUnavailable)?;
        self.session.open(&peer, &self.path)?;
        Ok(())
    }
}

impl DispatchStrategy for ChannelDispatch {
    fn policy(&self) -> TransportPolicy {
        TransportPolicy::Channel
    }

    fn on_start(&self) -> Result<(), TransportError> {
        // Um payload enfileirado antes pode já ter aberto o canal
        if self.session.state() == SessionState::Open {
            return Ok(());
        }
        self.establish()
    }

    fn dispatch(&self, payload: &[u8]) -> Result<(), TransportError> {
        match self.session.state() {
            SessionState::Open => {}
            SessionState::Closed => {
                debug!("Sem canal aberto, reabrindo");
                self.establish()?;
            }
            SessionState::Failed => {
                if let Err(e) = self.session.close() {
                    warn!("Falha ao fechar canal perdido: {e}");
                }
                self.establish()?;
            }
            state @ (SessionState::Opening | SessionState::Closing) => {
                return Err(TransportError::InvalidState(state));
            }
        }
        self.session.write(payload)
    }

    fn on_stop(&self) -> Result<(), TransportError> {
        self.session.close()
    }

    fn cancel(&self) {
        if self.session.cancel_open() {
            debug!("Abertura de canal cancelada");
        }
    }
}

impl Drop for ChannelDispatch {
    fn drop(&mut self) {
        self.channels.unregister_closed_listener(self.closed_listener);
    }
}

// ──────────────────────────────────────────────
// Mensagem
// ──────────────────────────────────────────────

pub struct MessageDispatch {
    locator: PeerLocator,
    sender: DatagramSender,
    path: String,
}

impl MessageDispatch {
    pub fn new(nodes: Arc<dyn NodeClient>, messages: Arc<dyn MessageClient>, path: &str) -> Self {
        Self {
            locator: PeerLocator::new(nodes),
            sender: DatagramSender::new(messages),
            path: path.to_string(),
        }
    }
}

impl DispatchStrategy for MessageDispatch {
    fn policy(&self) -> TransportPolicy {
        TransportPolicy::Message
    }

    fn on_start(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn dispatch(&self, payload: &[u8]) -> Result<(), TransportError> {
        let peer = self.locator.resolve().ok_or(TransportError::PeerUnavailable)?;
        let mut outcome = Ok(());
        self.sender
            .send(&peer, &self.path, payload, |result| outcome = result);
        outcome
    }

    fn on_stop(&self) -> Result<(), TransportError> {
        Ok(())
    }
}
