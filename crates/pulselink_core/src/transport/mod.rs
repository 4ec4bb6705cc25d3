//! Interfaces com o transporte de dispositivos pareados.
//!
//! O núcleo fala com três colaboradores do lado do sender (descoberta de
//! nós, canais de bytes e mensagens discretas) e expõe dois callbacks do lado
//! do receiver. Implementações:
//!
//! - [`loopback`] – rede pareada em memória, com injeção de falhas
//! - [`net`] – TCP para canais, UDP para mensagens

pub mod loopback;
pub mod net;

use crate::protocol::ProtocolError;
use crate::session::SessionState;
use crate::types::{ChannelId, PeerHandle};
use std::io::{Read, Write};
use std::sync::Arc;

/// Erros de transporte.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Nenhum dispositivo pareado alcançável")]
    PeerUnavailable,

    #[error("Falha ao abrir canal '{path}': {reason}")]
    ChannelOpenFailed { path: String, reason: String },

    #[error("Falha ao escrever no canal: {0}")]
    WriteFailed(String),

    #[error("Falha ao enviar mensagem: {0}")]
    SendFailed(String),

    #[error("Operação inválida no estado {0:?}")]
    InvalidState(SessionState),

    #[error("Falha ao fechar canal: {0}")]
    CloseFailed(String),

    #[error("Consulta de dispositivos falhou: {0}")]
    Discovery(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Erro de E/S: {0}")]
    Io(#[from] std::io::Error),
}

/// Callback de fechamento remoto de canal.
pub type ClosedListener = Arc<dyn Fn(&ChannelId) + Send + Sync>;

/// Identifica um [`ClosedListener`] registrado.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Descoberta de nós conectados.
pub trait NodeClient: Send + Sync {
    /// Conjunto atual de peers alcançáveis, possivelmente vazio.
    fn connected_nodes(&self) -> Result<Vec<PeerHandle>, TransportError>;
}

/// Canais de bytes de longa duração.
pub trait ChannelClient: Send + Sync {
    fn open_channel(&self, peer: &PeerHandle, path: &str) -> Result<ChannelId, TransportError>;

    /// Adquire um stream de saída. Liberar o stream (drop) encerra aquele
    /// stream para o leitor do outro lado.
    fn output_stream(&self, channel: &ChannelId) -> Result<Box<dyn Write + Send>, TransportError>;

    fn close(&self, channel: &ChannelId) -> Result<(), TransportError>;

    /// Registra um callback para canais fechados pelo outro lado.
    fn register_closed_listener(&self, listener: ClosedListener) -> ListenerId;

    /// Remove um callback registrado. Ids desconhecidos são ignorados.
    fn unregister_closed_listener(&self, id: ListenerId);
}

/// Envio de mensagens discretas.
pub trait MessageClient: Send + Sync {
    fn send_message(&self, peer: &PeerHandle, path: &str, data: &[u8]) -> Result<(), TransportError>;
}

/// Callbacks de canal do lado do receiver.
pub trait ChannelListener: Send + Sync {
    fn on_channel_opened(&self, channel: &ChannelId);

    /// Um stream de entrada chegou; deve ser lido até o fim.
    fn on_input_stream(&self, channel: &ChannelId, input: &mut dyn Read);

    fn on_channel_closed(&self, channel: &ChannelId);
}

/// Callback de mensagens do lado do receiver.
pub trait MessageListener: Send + Sync {
    fn on_message_received(&self, source: &PeerHandle, path: &str, data: &[u8]);
}
