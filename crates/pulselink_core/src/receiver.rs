//! Caminho de recepção: lê, decodifica e carimba payloads.
//!
//! Atende tanto canais (stream lido até o fim) quanto mensagens discretas,
//! filtrando pelo caminho lógico configurado. As amostras decodificadas vão
//! para um channel limitado; se o consumidor atrasar, as novas são
//! descartadas.

use crate::clock::Clock;
use crate::protocol::{PAYLOAD_LEN, decode_timestamp};
use crate::transport::{ChannelListener, MessageListener};
use crate::types::{ChannelId, PeerHandle, ReceivedSample};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Capacidade do channel de amostras.
pub const SAMPLE_BUFFER: usize = 64;

pub struct PayloadReceiver {
    path: String,
    clock: Arc<dyn Clock>,
    tx: Sender<ReceivedSample>,
}

impl PayloadReceiver {
    /// Cria o receiver e retorna a ponta de consumo das amostras.
    pub fn new(path: &str, clock: Arc<dyn Clock>) -> (Self, Receiver<ReceivedSample>) {
        let (tx, rx) = bounded(SAMPLE_BUFFER);
        (
            Self {
                path: path.to_string(),
                clock,
                tx,
            },
            rx,
        )
    }

    fn accept(&self, path: &str, data: &[u8], source: &str) {
        let timestamp_ms = match decode_timestamp(data) {
            Ok(t) => t,
            Err(e) => {
                warn!("Payload inválido de {source}: {e}");
                return;
            }
        };
        let sample = ReceivedSample {
            timestamp_ms,
            received_at_ms: self.clock.now_millis(),
            path: path.to_string(),
            source: source.to_string(),
        };
        match self.tx.try_send(sample) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("Channel cheio, descartando amostra"),
            Err(TrySendError::Disconnected(_)) => debug!("Consumidor encerrado, descartando amostra"),
        }
    }
}

impl ChannelListener for PayloadReceiver {
    fn on_channel_opened(&self, channel: &ChannelId) {
        info!("Canal aberto: {} (de {})", channel.path, channel.peer);
    }

    fn on_input_stream(&self, channel: &ChannelId, input: &mut dyn Read) {
        if channel.path != self.path {
            debug!("Ignorando stream em '{}'", channel.path);
            return;
        }
        // Um byte além do payload basta para rejeitar streams maiores
        let mut data = Vec::with_capacity(PAYLOAD_LEN + 1);
        if let Err(e) = input.take(PAYLOAD_LEN as u64 + 1).read_to_end(&mut data) {
            warn!("Erro ao ler canal {}: {e}", channel.id);
            return;
        }
        self.accept(&channel.path, &data, &channel.peer.node_id);
    }

    fn on_channel_closed(&self, channel: &ChannelId) {
        info!("Canal fechado: {} (de {})", channel.path, channel.peer);
    }
}

impl MessageListener for PayloadReceiver {
    fn on_message_received(&self, source: &PeerHandle, path: &str, data: &[u8]) {
        if path != self.path {
            debug!("Ignorando mensagem em '{path}'");
            return;
        }
        self.accept(path, data, &source.node_id);
    }
}
