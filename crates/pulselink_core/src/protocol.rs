//! Protocolo de comunicação binário.
//!
//! O payload de telemetria é fixo: 8 bytes, inteiro de 64 bits com sinal,
//! big-endian, milissegundos desde a época. Sem envelope, sem versão e sem
//! checksum; sender e receiver conhecem o formato de antemão.
//!
//! O transporte de rede prefixa cada conexão (ou datagrama) com um preâmbulo
//! bincode que carrega o endereçamento, equivalente ao metadado de caminho
//! do canal na plataforma:
//!
//! ```text
//! ┌──────────┬─────────┬─────────┬────────────────┬──────────────┐
//! │ Magic(1) │ Ver.(1) │ Tipo(4) │ Canal(8)       │ Caminho (8+N)│
//! └──────────┴─────────┴─────────┴────────────────┴──────────────┘
//! ```
//!
//! Depois do preâmbulo vem o payload cru, sem alteração.

use bincode::Options;
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read, Write};

/// Tamanho fixo do payload no fio.
pub const PAYLOAD_LEN: usize = 8;

/// Magic byte que identifica o preâmbulo PulseLink.
pub const MAGIC_BYTE: u8 = 0x57; // 'W'

/// Versão atual do preâmbulo.
pub const PROTOCOL_VERSION: u8 = 1;

/// Limite de bytes lidos ao decodificar um preâmbulo.
const MAX_PREAMBLE: u64 = 1024;

/// Erros do protocolo.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Payload malformado ({len} bytes, esperado {PAYLOAD_LEN})")]
    MalformedPayload { len: usize },

    #[error("Magic byte inválido: 0x{0:02X} (esperado 0x{MAGIC_BYTE:02X})")]
    InvalidMagic(u8),

    #[error("Versão incompatível: {0} (suportada: {PROTOCOL_VERSION})")]
    VersionMismatch(u8),

    #[error("Erro de serialização: {0}")]
    Serialize(String),

    #[error("Erro de deserialização: {0}")]
    Deserialize(String),
}

// ──────────────────────────────────────────────
// Payload
// ──────────────────────────────────────────────

/// Codifica um timestamp em 8 bytes big-endian (complemento de dois).
pub fn encode_timestamp(timestamp_ms: i64) -> [u8; PAYLOAD_LEN] {
    timestamp_ms.to_be_bytes()
}

/// Decodifica um payload de exatamente 8 bytes.
pub fn decode_timestamp(data: &[u8]) -> Result<i64, ProtocolError> {
    let bytes: [u8; PAYLOAD_LEN] = data
        .try_into()
        .map_err(|_| ProtocolError::MalformedPayload { len: data.len() })?;
    Ok(i64::from_be_bytes(bytes))
}

// ──────────────────────────────────────────────
// Preâmbulo de transporte
// ──────────────────────────────────────────────

/// Tipo de conexão ou datagrama.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameKind {
    /// Conexão de controle que representa o canal aberto
    Open,
    /// Um stream de saída; termina quando o escritor o libera
    Stream,
    /// Datagrama com um payload
    Message,
}

/// Cabeçalho de endereçamento enviado antes do payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preamble {
    pub magic: u8,
    pub version: u8,
    pub kind: FrameKind,
    pub channel_id: u64,
    pub path: String,
}

impl Preamble {
    pub fn new(kind: FrameKind, channel_id: u64, path: impl Into<String>) -> Self {
        Self {
            magic: MAGIC_BYTE,
            version: PROTOCOL_VERSION,
            kind,
            channel_id,
            path: path.into(),
        }
    }

    fn check(self) -> Result<Self, ProtocolError> {
        if self.magic != MAGIC_BYTE {
            return Err(ProtocolError::InvalidMagic(self.magic));
        }
        if self.version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch(self.version));
        }
        Ok(self)
    }
}

fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
        .with_limit(MAX_PREAMBLE)
}

/// Escreve o preâmbulo no início de uma conexão.
pub fn write_preamble<W: Write>(writer: &mut W, preamble: &Preamble) -> Result<(), ProtocolError> {
    wire_options()
        .serialize_into(writer, preamble)
        .map_err(|e| ProtocolError::Serialize(e.to_string()))
}

/// Lê e valida o preâmbulo de uma conexão.
pub fn read_preamble<R: Read>(reader: &mut R) -> Result<Preamble, ProtocolError> {
    let preamble: Preamble = wire_options()
        .deserialize_from(reader)
        .map_err(|e| ProtocolError::Deserialize(e.to_string()))?;
    preamble.check()
}

/// Monta um datagrama: `[preâmbulo][payload...]`.
pub fn encode_message(path: &str, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut frame = Vec::with_capacity(32 + path.len() + payload.len());
    write_preamble(&mut frame, &Preamble::new(FrameKind::Message, 0, path))?;
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Separa um datagrama em preâmbulo e payload.
pub fn decode_message(data: &[u8]) -> Result<(Preamble, &[u8]), ProtocolError> {
    let mut cursor = Cursor::new(data);
    let preamble = read_preamble(&mut cursor)?;
    let offset = usize::try_from(cursor.position()).unwrap_or(data.len());
    Ok((preamble, &data[offset.min(data.len())..]))
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
