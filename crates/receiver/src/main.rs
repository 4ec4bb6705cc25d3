//! # PulseLink Receiver
//!
//! Lado do dispositivo companheiro: aceita canais e mensagens do sender,
//! decodifica cada timestamp e registra a latência observada.

mod net_thread;
mod sink;

use pulselink_core::config::AppConfig;
use sink::LatencySummary;
use tracing::{error, info, warn};

fn main() {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── Config ──
    let config_path = AppConfig::default_path();
    let config = AppConfig::load(&config_path);

    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }

    let errors = config.validate_receiver();
    if !errors.is_empty() {
        for e in &errors {
            error!("Config inválida: {e}");
        }
        std::process::exit(1);
    }

    let recv_cfg = &config.receiver;
    let (listener, rx) = match net_thread::spawn_receiver(
        &recv_cfg.bind_ip,
        recv_cfg.port,
        &config.link.path,
        recv_cfg.io_timeout(),
    ) {
        Ok(pair) => pair,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    println!();
    println!("══════════════════════════════════════════════");
    println!("   📱 PULSELINK RECEIVER");
    println!("══════════════════════════════════════════════");
    println!("  Escutando: {}", listener.local_addr());
    println!("  Caminho:   {}", config.link.path);
    println!("══════════════════════════════════════════════");
    println!();

    // ── Loop principal ──
    let mut summary = LatencySummary::default();
    for sample in rx {
        sink::observe(&sample, &mut summary);
        if recv_cfg.summary_every > 0 && summary.count % recv_cfg.summary_every == 0 {
            info!(
                "Latência: {} amostras | min {} ms | média {:.1} ms | max {} ms",
                summary.count,
                summary.min_ms,
                summary.avg_ms(),
                summary.max_ms
            );
        }
    }
}
