//! # Uplink Collector
//!
//! Servidor de referência do protocolo de uplink: aceita conexões TCP,
//! lê frames com header de largura fixa, decodifica a leitura e responde
//! `ACK` (ou `NAK` para payload inválido).

mod net_thread;

use net_thread::{CollectorEvent, spawn_listener};
use std::process::ExitCode;
use tracing::{error, info, warn};
use uplink_core::config::AppConfig;

fn main() -> ExitCode {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── Config ──
    let config_path = AppConfig::resolve_path();
    let config = AppConfig::load(&config_path);

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
        return ExitCode::from(2);
    }

    let (local, rx) = match spawn_listener(&config.collector) {
        Ok(bound) => bound,
        Err(e) => {
            error!("Falha ao escutar em {}: {e}", config.collector.bind_addr());
            return ExitCode::FAILURE;
        }
    };

    println!();
    println!("══════════════════════════════════════════════");
    println!("   ⚡ UPLINK COLLECTOR – ATIVO");
    println!("══════════════════════════════════════════════");
    println!("  Escutando: {local}");
    println!("  Header:    {} bytes", config.collector.header_width);
    println!("══════════════════════════════════════════════");
    println!();

    let mut received: u64 = 0;
    let mut rejected: u64 = 0;
    for event in rx.iter() {
        match event {
            CollectorEvent::Connected { peer } => info!("[NOVA CONEXÃO] {peer}"),
            CollectorEvent::Reading {
                peer,
                reading,
                raw_size,
            } => {
                received += 1;
                info!(
                    "[{peer}] #{received} {raw_size} bytes | {:.2}°C {:.2}hPa {:.1}m",
                    reading.temperature, reading.pressure, reading.altitude
                );
            }
            CollectorEvent::Rejected { peer, reason } => {
                rejected += 1;
                warn!("[{peer}] Payload rejeitado ({rejected} no total): {reason}");
            }
            CollectorEvent::Disconnected { peer, reason } => {
                info!("[DESCONECTADO] {peer}: {reason}");
            }
        }
    }

    ExitCode::SUCCESS
}
