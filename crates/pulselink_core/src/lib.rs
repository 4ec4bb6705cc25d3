//! # PulseLink Core
//!
//! Transporte de telemetria entre o dispositivo de pulso e o dispositivo
//! companheiro pareado: decide quando amostrar, decima, codifica o payload
//! binário, envia por canal de bytes ou mensagem discreta e, do outro lado,
//! reconstrói e carimba o payload.
//!
//! ## Módulos
//! - [`types`] – Tipos de sensor, peers, estados
//! - [`protocol`] – Codec do payload de 8 bytes e preâmbulo de transporte
//! - [`decimator`] – Decimação do fluxo bruto de eventos
//! - [`peer`] – Resolução do peer da sessão
//! - [`session`] – Máquina de estados do canal
//! - [`datagram`] – Envio de mensagens discretas
//! - [`dispatch`] – Estratégias de transporte (canal ou mensagem)
//! - [`controller`] – Orquestração start/stop e despacho em segundo plano
//! - [`receiver`] – Recepção, decodificação e carimbo de tempo
//! - [`transport`] – Interfaces de transporte, loopback e rede
//! - [`config`] – Configuração unificada via TOML

pub mod clock;
pub mod config;
pub mod controller;
pub mod datagram;
pub mod decimator;
pub mod dispatch;
pub mod peer;
pub mod protocol;
pub mod receiver;
pub mod session;
pub mod transport;
pub mod types;
pub mod worker;

// Re-exports convenientes
pub use config::{AppConfig, ReceiverConfig, SenderConfig};
pub use controller::TransmissionController;
pub use protocol::{PROTOCOL_VERSION, decode_timestamp, encode_timestamp};
pub use transport::TransportError;
