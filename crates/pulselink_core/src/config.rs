//! Configuração unificada via TOML.
//!
//! Um único `config.toml` atende sender e receiver. Campos ausentes usam o
//! valor padrão.

use crate::decimator::DEFAULT_STRIDE;
use crate::transport::net::NetOptions;
use crate::types::{PeerHandle, SensorKind, TransportPolicy};
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Caminho lógico padrão do fluxo de telemetria.
pub const DEFAULT_PATH: &str = "combinedDataPath";

/// Período de amostragem padrão dos sensores (µs).
pub const DEFAULT_SAMPLING_PERIOD_US: u64 = 19_000;

/// Erros de configuração.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Erro de E/S: {0}")]
    Io(#[from] std::io::Error),

    #[error("Erro ao gerar TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Endereço inválido para o peer '{id}': {address}")]
    InvalidAddress { id: String, address: String },
}

/// Parâmetros compartilhados pelos dois lados do link.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Tópico lógico; precisa ser idêntico no sender e no receiver
    pub path: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_PATH.into(),
        }
    }
}

/// Sensor habilitado e sua cadência nativa.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorConfig {
    pub kind: SensorKind,
    /// Período de amostragem (µs)
    #[serde(default = "default_period")]
    pub period_us: u64,
}

fn default_period() -> u64 {
    DEFAULT_SAMPLING_PERIOD_US
}

/// Peer pareado conhecido.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub id: String,
    /// `host:porta` do receiver (TCP e UDP)
    pub address: String,
}

/// Configuração do Sender (dispositivo de pulso).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Política de transporte: "channel" ou "message"
    pub policy: TransportPolicy,
    /// Passo de decimação
    pub stride: u32,
    /// Tipo de sensor que gera payload
    pub trigger: SensorKind,
    /// Timeout da sonda de alcance (ms, 0 = sem sonda)
    pub probe_timeout_ms: u64,
    /// Timeout de E/S do transporte (ms, 0 = sem limite)
    pub io_timeout_ms: u64,
    /// Inicia a transmissão sem esperar comando
    pub autostart: bool,
    /// Sensores registrados durante a transmissão
    pub sensors: Vec<SensorConfig>,
    /// Peers pareados, na ordem de preferência da descoberta
    pub peers: Vec<PeerConfig>,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            policy: TransportPolicy::Channel,
            stride: DEFAULT_STRIDE,
            trigger: SensorKind::Gyroscope,
            probe_timeout_ms: 500,
            io_timeout_ms: 0,
            autostart: false,
            sensors: SensorKind::ALL
                .iter()
                .map(|&kind| SensorConfig {
                    kind,
                    period_us: DEFAULT_SAMPLING_PERIOD_US,
                })
                .collect(),
            peers: vec![PeerConfig {
                id: "companion".into(),
                address: "127.0.0.1:5006".into(),
            }],
        }
    }
}

impl SenderConfig {
    /// Resolve os peers configurados para endereços de socket.
    pub fn resolve_peers(&self) -> Result<Vec<(PeerHandle, SocketAddr)>, ConfigError> {
        self.peers
            .iter()
            .map(|peer| -> Result<(PeerHandle, SocketAddr), ConfigError> {
                let addr = peer
                    .address
                    .to_socket_addrs()
                    .ok()
                    .and_then(|mut addrs| addrs.next())
                    .ok_or_else(|| ConfigError::InvalidAddress {
                        id: peer.id.clone(),
                        address: peer.address.clone(),
                    })?;
                Ok((PeerHandle::new(peer.id.as_str()), addr))
            })
            .collect()
    }

    /// Opções de tempo para o transporte de rede.
    pub fn net_options(&self) -> NetOptions {
        NetOptions {
            io_timeout: millis(self.io_timeout_ms),
            probe_timeout: millis(self.probe_timeout_ms),
        }
    }
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Configuração do Receiver (dispositivo companheiro).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// IP local para bind
    pub bind_ip: String,
    /// Porta TCP/UDP para escutar
    pub port: u16,
    /// Timeout de leitura por conexão (ms, 0 = sem limite)
    pub io_timeout_ms: u64,
    /// A cada quantas amostras imprimir o resumo de latência (0 = nunca)
    pub summary_every: u64,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            bind_ip: "0.0.0.0".into(),
            port: 5006,
            io_timeout_ms: 0,
            summary_every: 50,
        }
    }
}

impl ReceiverConfig {
    pub fn io_timeout(&self) -> Option<Duration> {
        millis(self.io_timeout_ms)
    }
}

/// Configuração raiz do aplicativo (unifica sender e receiver).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub link: LinkConfig,
    pub sender: SenderConfig,
    pub receiver: ReceiverConfig,
}

impl AppConfig {
    /// Carrega configuração de um arquivo TOML.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<AppConfig>(&content) {
                    Ok(config) => {
                        info!("Configuração carregada de {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("Erro ao parsear {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    warn!("Erro ao ler {}: {}", path.display(), e);
                }
            }
        }

        info!("Usando configuração padrão");
        AppConfig::default()
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Retorna o caminho padrão do config.toml.
    pub fn default_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."));
        exe_dir.join("config.toml")
    }

    /// Valida a configuração e retorna lista de erros.
    /// Valida tudo. Cada item é um problema legível.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = self.validate_receiver();

        if self.sender.stride == 0 {
            errors.push("Passo de decimação não pode ser 0".into());
        }
        for sensor in &self.sender.sensors {
            if sensor.period_us == 0 {
                errors.push(format!("Período do sensor {} não pode ser 0", sensor.kind));
            }
        }
        if !self.sender.sensors.iter().any(|s| s.kind == self.sender.trigger) {
            errors.push(format!(
                "Sensor gatilho {} não está entre os sensores habilitados",
                self.sender.trigger
            ));
        }
        if let Err(e) = self.sender.resolve_peers() {
            errors.push(e.to_string());
        }

        errors
    }

    /// Só o que o receiver usa: link e seção `[receiver]`.
    pub fn validate_receiver(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.link.path.is_empty() {
            errors.push("Caminho lógico do link não pode ser vazio".into());
        }
        if self.receiver.port == 0 {
            errors.push("Porta do receiver não pode ser 0".into());
        }
        if self.receiver.bind_ip.parse::<std::net::IpAddr>().is_err() {
            errors.push(format!("IP de bind inválido: '{}'", self.receiver.bind_ip));
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        let errors = config.validate();
        assert!(errors.is_empty(), "Erros: {:?}", errors);
    }

    #[test]
    fn roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.link.path, parsed.link.path);
        assert_eq!(config.sender.sensors, parsed.sender.sensors);
        assert_eq!(config.sender.peers, parsed.sender.peers);
        assert_eq!(config.receiver.port, parsed.receiver.port);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let partial = r#"
[sender]
policy = "message"

[[sender.peers]]
id = "phone"
address = "10.0.0.2:7000"
"#;
        let config: AppConfig = toml::from_str(partial).unwrap();
        assert_eq!(config.sender.policy, TransportPolicy::Message);
        assert_eq!(config.sender.peers.len(), 1);
        // Outros campos devem ter valor padrão
        assert_eq!(config.sender.stride, 5);
        assert_eq!(config.sender.trigger, SensorKind::Gyroscope);
        assert_eq!(config.link.path, DEFAULT_PATH);
        assert_eq!(config.receiver.port, 5006);
    }

    #[test]
    fn sensor_period_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
[sender]
sensors = [{ kind = "gyroscope" }]
"#,
        )
        .unwrap();
        assert_eq!(config.sender.sensors[0].period_us, DEFAULT_SAMPLING_PERIOD_US);
    }

    #[test]
    fn validate_reports_problems() {
        let mut config = AppConfig::default();
        config.link.path.clear();
        config.sender.stride = 0;
        config.sender.sensors = vec![SensorConfig {
            kind: SensorKind::HeartRate,
            period_us: 0,
        }];
        config.sender.peers.push(PeerConfig {
            id: "bad".into(),
            address: "not an address".into(),
        });
        config.receiver.port = 0;
        assert_eq!(config.validate().len(), 6);
    }

    #[test]
    fn receiver_validation_ignores_sender_section() {
        let mut config = AppConfig::default();
        config.sender.stride = 0;
        assert!(config.validate_receiver().is_empty());

        config.link.path.clear();
        config.receiver.bind_ip = "localhost".into();
        let errors = config.validate_receiver();
        assert_eq!(errors.len(), 2, "Erros: {:?}", errors);
        assert!(errors[0].contains("Caminho"));
    }

    #[test]
    fn zero_timeouts_mean_unbounded() {
        let mut sender = SenderConfig::default();
        sender.probe_timeout_ms = 0;
        let opts = sender.net_options();
        assert!(opts.io_timeout.is_none());
        assert!(opts.probe_timeout.is_none());
    }

    #[test]
    fn save_and_load() {
        let path = std::env::temp_dir().join(format!("pulselink-{}.toml", std::process::id()));
        let mut config = AppConfig::default();
        config.sender.autostart = true;
        config.save(&path).unwrap();
        let loaded = AppConfig::load(&path);
        std::fs::remove_file(&path).ok();
        assert!(loaded.sender.autostart);
    }
}
