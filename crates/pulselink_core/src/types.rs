//! Tipos compartilhados entre sender e receiver.

use serde::{Deserialize, Serialize};
use std::fmt;

// ──────────────────────────────────────────────
// Sensores
// ──────────────────────────────────────────────

/// Tipo de sensor que origina um evento.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    HeartRate,
    Gyroscope,
    Accelerometer,
}

impl SensorKind {
    pub const ALL: [SensorKind; 3] = [
        SensorKind::HeartRate,
        SensorKind::Gyroscope,
        SensorKind::Accelerometer,
    ];
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SensorKind::HeartRate => "heart_rate",
            SensorKind::Gyroscope => "gyroscope",
            SensorKind::Accelerometer => "accelerometer",
        };
        f.write_str(name)
    }
}

/// Evento bruto entregue pela plataforma.
///
/// O valor medido não é modelado: o núcleo só consome o tipo e a ordem de
/// chegada.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorEvent {
    pub kind: SensorKind,
    /// Posição do evento na sequência de entrega
    pub sequence: u64,
}

impl SensorEvent {
    pub fn new(kind: SensorKind, sequence: u64) -> Self {
        Self { kind, sequence }
    }
}

// ──────────────────────────────────────────────
// Peers e canais
// ──────────────────────────────────────────────

/// Dispositivo pareado alcançável.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerHandle {
    /// Identificador opaco do nó
    pub node_id: String,
}

impl PeerHandle {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
        }
    }
}

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.node_id)
    }
}

/// Identifica um canal aberto no transporte.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelId {
    pub id: u64,
    pub peer: PeerHandle,
    /// Caminho lógico (tópico) do canal
    pub path: String,
}

// ──────────────────────────────────────────────
// Estado de transmissão
// ──────────────────────────────────────────────

/// Estado do controlador, consumido pela UI para rotular o botão.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransmissionState {
    #[default]
    Idle,
    Transmitting,
}

impl TransmissionState {
    pub fn is_transmitting(self) -> bool {
        self == TransmissionState::Transmitting
    }
}

/// Política de transporte usada pelo sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportPolicy {
    /// Canal de bytes de longa duração
    #[default]
    Channel,
    /// Mensagem discreta por amostra
    Message,
}

// ──────────────────────────────────────────────
// Recepção
// ──────────────────────────────────────────────

/// Amostra decodificada no receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedSample {
    /// Timestamp gerado no sender (ms desde a época)
    pub timestamp_ms: i64,
    /// Relógio local no momento da recepção (ms desde a época)
    pub received_at_ms: i64,
    pub path: String,
    pub source: String,
}

impl ReceivedSample {
    /// Diferença entre recepção e envio. Pode ser negativa se os relógios
    /// dos dois dispositivos divergirem.
    pub fn latency_ms(&self) -> i64 {
        self.received_at_ms.saturating_sub(self.timestamp_ms)
    }
}
