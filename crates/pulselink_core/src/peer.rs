//! Resolução do peer da sessão.
//!
//! Política: o primeiro nó do conjunto retornado pela descoberta. Sem
//! ordem de preferência e sem fan-out para múltiplos peers. O resultado não
//! é guardado; cada abertura ou envio resolve de novo.

use crate::transport::NodeClient;
use crate::types::PeerHandle;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct PeerLocator {
    nodes: Arc<dyn NodeClient>,
}

impl PeerLocator {
    pub fn new(nodes: Arc<dyn NodeClient>) -> Self {
        Self { nodes }
    }

    /// Retorna o primeiro peer conectado, ou `None` se a consulta falhar ou
    /// vier vazia.
    pub fn resolve(&self) -> Option<PeerHandle> {
        let nodes = match self.nodes.connected_nodes() {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!("Consulta de dispositivos conectados falhou: {e}");
                return None;
            }
        };

        if nodes.len() > 1 {
            debug!("{} peers conectados, usando o primeiro", nodes.len());
        }
        nodes.into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::loopback::{Fault, LoopbackNetwork};

    #[test]
    fn empty_set_resolves_to_none() {
        let net = LoopbackNetwork::new("watch");
        assert_eq!(PeerLocator::new(Arc::new(net)).resolve(), None);
    }

    #[test]
    fn first_peer_wins_and_is_stable() {
        let net = LoopbackNetwork::with_nodes("watch", ["phone", "tablet", "tv"]);
        let locator = PeerLocator::new(Arc::new(net));
        for _ in 0..3 {
            assert_eq!(locator.resolve(), Some(PeerHandle::new("phone")));
        }
    }

    #[test]
    fn discovery_error_is_soft() {
        let net = LoopbackNetwork::with_nodes("watch", ["phone"]);
        net.set_fault(Fault::Discovery, true);
        let locator = PeerLocator::new(Arc::new(net.clone()));
        assert_eq!(locator.resolve(), None);

        net.set_fault(Fault::Discovery, false);
        assert_eq!(locator.resolve(), Some(PeerHandle::new("phone")));
    }
}
