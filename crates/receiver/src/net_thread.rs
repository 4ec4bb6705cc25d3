//! Threads de rede que escutam o sender e entregam amostras via channel.

use crossbeam_channel::Receiver;
use pulselink_core::clock::SystemClock;
use pulselink_core::receiver::PayloadReceiver;
use pulselink_core::transport::net::NetListener;
use pulselink_core::types::ReceivedSample;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Faz bind em `bind_ip:port` e retorna o listener e a ponta de consumo das
/// amostras. Tenta de novo a cada 2s se a porta estiver ocupada.
pub fn spawn_receiver(
    bind_ip: &str,
    port: u16,
    path: &str,
    io_timeout: Option<Duration>,
) -> Result<(NetListener, Receiver<ReceivedSample>), String> {
    let ip: IpAddr = bind_ip
        .parse()
        .map_err(|e| format!("IP de bind inválido '{bind_ip}': {e}"))?;
    let addr = SocketAddr::new(ip, port);

    let (receiver, rx) = PayloadReceiver::new(path, Arc::new(SystemClock));
    let receiver = Arc::new(receiver);

    loop {
        match NetListener::bind(addr, receiver.clone(), receiver.clone(), io_timeout) {
            Ok(listener) => {
                info!("Aguardando canal em '{path}'");
                return Ok((listener, rx));
            }
            Err(e) => {
                error!("Falha ao bind {addr}: {e}. Tentando novamente em 2s...");
                std::thread::sleep(Duration::from_secs(2));
            }
        }
    }
}
