//! Uplink Loop – ciclo de período fixo:
//! amostra → codifica → garante conexão → envia → aguarda ACK → reporta.
//!
//! Cada falha fica isolada no seu ciclo. Não há fila de reenvio: uma
//! leitura não entregue é simplesmente perdida (frescor > garantia).

use crate::connection::{
    ConnectionExhausted, ConnectionManager, Connector, ResponseError, Transmit,
};
use crate::sensor::{Sensor, SensorFault};
use std::fmt;
use std::io;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uplink_core::config::{SupervisorConfig, UplinkConfig};
use uplink_core::protocol::{self, Frame, ProtocolError};
use uplink_core::types::Reading;

/// A cada quantos ciclos as estatísticas são logadas.
const STATS_EVERY: u64 = 12;

/// Parâmetros do loop.
#[derive(Debug, Clone, Copy)]
pub struct UplinkSettings {
    pub header_width: usize,
    pub interval: Duration,
    pub transmit: Transmit,
}

impl UplinkSettings {
    pub fn from_config(config: &UplinkConfig) -> Self {
        Self {
            header_width: config.header_width,
            interval: config.interval(),
            transmit: Transmit::from_config(config),
        }
    }
}

/// Erros fatais: encerram o loop e sobem para o supervisor.
#[derive(Debug, thiserror::Error)]
pub enum UplinkError {
    #[error("Falha do sensor: {0}")]
    Sensor(#[from] SensorFault),

    /// Violação de contrato do codec; não é condição de runtime.
    #[error("Falha de protocolo: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Motivo de um ciclo descartado (recuperável).
#[derive(Debug, thiserror::Error)]
pub enum SkipReason {
    #[error(transparent)]
    Exhausted(#[from] ConnectionExhausted),

    #[error("Falha ao enviar frame: {0}")]
    SendFailed(#[source] io::Error),

    #[error(transparent)]
    UnexpectedResponse(#[from] ResponseError),
}

/// Resultado de um ciclo que não foi fatal.
#[derive(Debug)]
pub enum CycleOutcome {
    Delivered { reading: Reading, wire_len: usize },
    Skipped(SkipReason),
}

impl CycleOutcome {
    #[cfg(test)]
    pub fn is_delivered(&self) -> bool {
        matches!(self, CycleOutcome::Delivered { .. })
    }
}

/// Contadores acumulados do loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UplinkStats {
    pub cycles: u64,
    pub delivered: u64,
    pub exhausted: u64,
    pub send_failures: u64,
    pub unexpected_responses: u64,
    pub connect_attempts: u64,
}

impl fmt::Display for UplinkStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ciclos {} | entregues {} | sem conexão {} | falha de envio {} | resposta inesperada {} | tentativas {}",
            self.cycles,
            self.delivered,
            self.exhausted,
            self.send_failures,
            self.unexpected_responses,
            self.connect_attempts
        )
    }
}

/// Loop de uplink: dono do sensor e do gerenciador de conexão.
pub struct Uplink<S: Sensor, C: Connector> {
    sensor: S,
    conn: ConnectionManager<C>,
    settings: UplinkSettings,
    stats: UplinkStats,
}

impl<S: Sensor, C: Connector> Uplink<S, C> {
    pub fn new(sensor: S, conn: ConnectionManager<C>, settings: UplinkSettings) -> Self {
        Self {
            sensor,
            conn,
            settings,
            stats: UplinkStats::default(),
        }
    }

    #[cfg(test)]
    pub fn stats(&self) -> &UplinkStats {
        &self.stats
    }

    /// Executa um ciclo completo, sem a espera do período.
    pub fn run_cycle(&mut self) -> Result<CycleOutcome, UplinkError> {
        self.stats.cycles += 1;

        let reading = self.sensor.sample()?;
        let frame = protocol::frame_reading(&reading, self.settings.header_width)?;
        let outcome = self.exchange(reading, &frame);

        self.stats.connect_attempts = self.conn.total_attempts();
        match &outcome {
            CycleOutcome::Delivered { reading, wire_len } => {
                self.stats.delivered += 1;
                info!(
                    "✓ ACK | {} bytes → {} | {:.2}°C {:.2}hPa {:.1}m",
                    wire_len,
                    self.conn.endpoint(),
                    reading.temperature,
                    reading.pressure,
                    reading.altitude
                );
            }
            CycleOutcome::Skipped(reason) => {
                match reason {
                    SkipReason::Exhausted(_) => self.stats.exhausted += 1,
                    SkipReason::SendFailed(_) => self.stats.send_failures += 1,
                    SkipReason::UnexpectedResponse(_) => self.stats.unexpected_responses += 1,
                }
                warn!("✗ Ciclo {} descartado: {reason}", self.stats.cycles);
            }
        }

        Ok(outcome)
    }

    /// Troca de rede do ciclo; só toca o socket através da sessão.
    fn exchange(&mut self, reading: Reading, frame: &Frame) -> CycleOutcome {
        let mut session = match self.conn.ensure_connected() {
            Ok(session) => session,
            Err(e) => return CycleOutcome::Skipped(e.into()),
        };

        if let Err(e) = session.send(frame, self.settings.transmit) {
            return CycleOutcome::Skipped(SkipReason::SendFailed(e));
        }

        match session.await_response() {
            Ok(response) if protocol::is_ack(&response) => CycleOutcome::Delivered {
                reading,
                wire_len: frame.wire_len(),
            },
            Ok(response) => CycleOutcome::Skipped(
                ResponseError::Unexpected(String::from_utf8_lossy(&response).into_owned()).into(),
            ),
            Err(e) => CycleOutcome::Skipped(e.into()),
        }
    }

    /// Roda ciclos no período configurado até `max_cycles` (ou para sempre).
    ///
    /// O período vai do início de um ciclo ao início do próximo; se o
    /// ciclo demorar mais que o período, o próximo começa imediatamente.
    pub fn run(&mut self, max_cycles: Option<u64>) -> Result<UplinkStats, UplinkError> {
        let mut done: u64 = 0;
        loop {
            if max_cycles.is_some_and(|max| done >= max) {
                return Ok(self.stats.clone());
            }

            let cycle_start = Instant::now();
            self.run_cycle()?;
            done += 1;

            if self.stats.cycles % STATS_EVERY == 0 {
                info!("Estatísticas: {}", self.stats);
            }

            // Dormir pelo tempo restante do intervalo
            let elapsed = cycle_start.elapsed();
            if elapsed < self.settings.interval {
                std::thread::sleep(self.settings.interval - elapsed);
            }
        }
    }

    /// Encerra a conexão avisando o coletor.
    pub fn shutdown(&mut self) {
        let farewell = protocol::disconnect_frame(self.settings.header_width).ok();
        self.conn.close(farewell.as_ref());
    }
}

// ──────────────────────────────────────────────
// Supervisor
// ──────────────────────────────────────────────

/// Política de reinício para falhas fatais do loop.
#[derive(Debug, Clone, Copy)]
pub struct Supervisor {
    pub max_restarts: u32,
    pub backoff: Duration,
}

impl Supervisor {
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            max_restarts: config.max_restarts,
            backoff: Duration::from_secs_f64(config.restart_backoff_secs),
        }
    }

    /// Constrói e roda o loop; em falha fatal espera o backoff e reconstrói,
    /// até esgotar `max_restarts`.
    pub fn supervise<S, C, F>(
        &self,
        mut build: F,
        max_cycles: Option<u64>,
    ) -> Result<UplinkStats, UplinkError>
    where
        S: Sensor,
        C: Connector,
        F: FnMut() -> Uplink<S, C>,
    {
        let mut restarts: u32 = 0;
        loop {
            let mut uplink = build();
            let result = uplink.run(max_cycles);
            uplink.shutdown();

            match result {
                Ok(stats) => return Ok(stats),
                Err(e) if restarts >= self.max_restarts => {
                    error!("Falha fatal no uplink: {e}. Reinícios esgotados ({restarts}).");
                    return Err(e);
                }
                Err(e) => {
                    restarts += 1;
                    error!(
                        "Falha fatal no uplink: {e}. Reinício {restarts}/{} em {:.1}s",
                        self.max_restarts,
                        self.backoff.as_secs_f64()
                    );
                    std::thread::sleep(self.backoff);
                }
            }
        }
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
