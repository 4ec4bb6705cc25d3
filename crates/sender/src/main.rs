//! # PulseLink Sender
//!
//! Lado do pulso: registra os sensores durante a transmissão, decima os
//! eventos e envia timestamps ao dispositivo pareado.
//!
//! ## Uso
//! ```bash
//! pulselink_sender              # Enter alterna Start/Stop, `q` sai
//! RUST_LOG=debug pulselink_sender
//! ```

mod sensors;

use pulselink_core::clock::SystemClock;
use pulselink_core::config::AppConfig;
use pulselink_core::dispatch::strategy_for;
use pulselink_core::transport::net::NetTransport;
use pulselink_core::types::TransmissionState;
use pulselink_core::TransmissionController;
use sensors::SensorHub;
use std::io::BufRead;
use std::sync::Arc;
use tracing::{error, info, warn};

fn main() {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── Carregar config ──
    let config_path = AppConfig::default_path();
    let config = AppConfig::load(&config_path);

    // Salva config padrão se não existir
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!("Config inválida: {e}");
        }
        std::process::exit(1);
    }

    let sender_cfg = &config.sender;
    let peers = match sender_cfg.resolve_peers() {
        Ok(peers) => peers,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    // ── Transporte ──
    let transport = Arc::new(NetTransport::new(peers, sender_cfg.net_options()));
    let strategy = strategy_for(sender_cfg.policy, transport, &config.link.path);

    // ── Sensores + controlador ──
    let hub = Arc::new(SensorHub::spawn(&sender_cfg.sensors).expect("Falha ao criar thread de sensores"));
    let controller = TransmissionController::new(
        strategy,
        Arc::new(SystemClock),
        sender_cfg.stride,
        sender_cfg.trigger,
    )
    .expect("Falha ao criar thread de transmissão")
    .with_registry(hub);

    // Rótulo do botão acompanha o estado observável
    let states = controller.subscribe();
    std::thread::Builder::new()
        .name("ui-label".into())
        .spawn(move || {
            for state in states {
                let label = match state {
                    TransmissionState::Transmitting => "Stop",
                    TransmissionState::Idle => "Start",
                };
                println!("  [ {label} ]");
            }
        })
        .expect("Falha ao criar thread de UI");

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   ⌚ PULSELINK SENDER");
    println!("══════════════════════════════════════════════");
    println!("  Caminho:   {}", config.link.path);
    println!("  Política:  {:?}", sender_cfg.policy);
    println!("  Passo:     {} (gatilho: {})", sender_cfg.stride, sender_cfg.trigger);
    for peer in &sender_cfg.peers {
        println!("  Peer:      {} → {}", peer.id, peer.address);
    }
    println!("  Enter = Start/Stop | s = estatísticas | q = sair");
    println!("══════════════════════════════════════════════");
    println!();

    if sender_cfg.autostart {
        controller.start();
    }

    // ── Loop da UI ──
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                warn!("Erro ao ler stdin: {e}");
                break;
            }
        };
        match line.trim() {
            "" | "t" => {
                controller.toggle();
            }
            "s" => {
                let stats = controller.stats();
                info!(
                    "Payloads: {} gerados | {} enviados | {} falhas | {} descartados | contador {}",
                    stats.emitted,
                    stats.delivered,
                    stats.failed,
                    stats.dropped,
                    controller.decimation_counter()
                );
            }
            "q" => break,
            other => warn!("Comando desconhecido: {other}"),
        }
    }

    controller.stop();
    controller.wait_idle();
    info!("Sender encerrado");
}
