//! Envio de mensagens discretas, sem ciclo de vida de stream.
//!
//! Fire-and-forget: o resultado chega por um callback de conclusão chamado
//! exatamente uma vez, com sucesso ou falha. A confirmação é apenas local
//! (o transporte aceitou o envio), não da aplicação do outro lado.

use crate::transport::{MessageClient, TransportError};
use crate::types::PeerHandle;
use std::sync::Arc;

pub struct DatagramSender {
    client: Arc<dyn MessageClient>,
}

impl DatagramSender {
    pub fn new(client: Arc<dyn MessageClient>) -> Self {
        Self { client }
    }

    /// Envia `bytes` para `peer` no tópico `path`.
    ///
    /// Erros nunca sobem para quem chama; são entregues só a `on_complete`
    /// como [`TransportError::SendFailed`].
    pub fn send<F>(&self, peer: &PeerHandle, path: &str, bytes: &[u8], on_complete: F)
    where
        F: FnOnce(Result<(), TransportError>),
    {
        let outcome = self
            .client
            .send_message(peer, path, bytes)
            .map_err(|e| match e {
                TransportError::SendFailed(_) => e,
                other => TransportError::SendFailed(other.to_string()),
            });
        on_complete(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::loopback::{Fault, LoopbackNetwork};
    use std::cell::Cell;

    #[test]
    fn success_is_notified_once() {
        let net = LoopbackNetwork::with_nodes("watch", ["phone"]);
        let sender = DatagramSender::new(Arc::new(net.clone()));
        let calls = Cell::new(0);
        sender.send(&PeerHandle::new("phone"), "p", &[0; 8], |r| {
            assert!(r.is_ok());
            calls.set(calls.get() + 1);
        });
        assert_eq!(calls.get(), 1);
        assert_eq!(net.stats().messages, 1);
    }

    #[test]
    fn failure_is_notified_not_raised() {
        let net = LoopbackNetwork::with_nodes("watch", ["phone"]);
        net.set_fault(Fault::Send, true);
        let sender = DatagramSender::new(Arc::new(net));
        let mut outcome = None;
        sender.send(&PeerHandle::new("phone"), "p", &[0; 8], |r| outcome = Some(r));
        assert!(matches!(outcome, Some(Err(TransportError::SendFailed(_)))));
    }

    #[test]
    fn disconnected_peer_fails_send() {
        let net = LoopbackNetwork::new("watch");
        let sender = DatagramSender::new(Arc::new(net));
        let mut failed = false;
        sender.send(&PeerHandle::new("phone"), "p", &[0; 8], |r| failed = r.is_err());
        assert!(failed);
    }
}
