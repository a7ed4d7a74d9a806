//! # Uplink Sender
//!
//! Lê o barômetro periodicamente e entrega cada leitura ao coletor por
//! uma conexão TCP persistente, tolerando quedas breves de rede.
//!
//! ## Uso
//! ```bash
//! uplink_sender                  # config.toml ao lado do executável
//! uplink_sender /etc/uplink.toml # config explícito
//! RUST_LOG=debug uplink_sender   # logs detalhados
//! ```

mod connection;
mod sensor;
mod uplink;

use connection::{ConnectionManager, RetryPolicy, TcpConnector};
use sensor::{Sensor, SimulatedBarometer};
use std::process::ExitCode;
use tracing::{error, info, warn};
use uplink::{Supervisor, Uplink, UplinkSettings};
use uplink_core::config::AppConfig;

fn main() -> ExitCode {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── Carregar config ──
    let config_path = AppConfig::resolve_path();
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
        return ExitCode::from(2);
    }

    let up = &config.uplink;
    let settings = UplinkSettings::from_config(up);
    let policy = RetryPolicy::from_config(up);
    let supervisor = Supervisor::from_config(&up.supervisor);
    let sensor_name = SimulatedBarometer::new(&up.sensor).describe();

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   ⚡ UPLINK SENDER – ATIVO");
    println!("══════════════════════════════════════════════");
    println!("  Coletor:   {}", up.collector_addr());
    println!("  Sensor:    {sensor_name}");
    println!("  Intervalo: {:.1}s", up.interval_secs);
    println!("  Header:    {} bytes | escrita {:?}", up.header_width, up.write_mode);
    println!("  Retry:     {} tentativas extras a cada {:.1}s", up.max_retries, up.retry_delay_secs);
    println!("══════════════════════════════════════════════");
    println!();

    // ── Loop supervisionado ──
    let result = supervisor.supervise(
        || {
            let conn = ConnectionManager::new(TcpConnector::from_config(up), policy);
            Uplink::new(SimulatedBarometer::new(&up.sensor), conn, settings)
        },
        None,
    );

    match result {
        Ok(stats) => {
            info!("Uplink encerrado: {stats}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Uplink parado definitivamente: {e}");
            ExitCode::FAILURE
        }
    }
}
