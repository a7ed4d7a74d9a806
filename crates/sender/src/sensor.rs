//! Sensor Sampler – leitura de temperatura, pressão e altitude.
//!
//! O driver do periférico é uma caixa-preta atrás do trait [`Sensor`].
//! O sampler não repete leituras: uma falha vira [`SensorFault`] e o
//! chamador decide o que fazer.

use tracing::debug;
use uplink_core::config::SensorConfig;
use uplink_core::types::{Reading, ReadingLimits};

/// Expoente da fórmula barométrica internacional (1 / 5.255).
const BAROMETRIC_EXPONENT: f64 = 0.1903;

/// Falhas do periférico.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SensorFault {
    #[error("Sensor inacessível em 0x{address:02X}: {reason}")]
    Unreachable { address: u8, reason: String },

    #[error("Leitura fora da faixa: {field} = {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

/// Fonte de leituras ambientais.
pub trait Sensor {
    /// Lê as três grandezas do periférico.
    fn sample(&mut self) -> Result<Reading, SensorFault>;

    /// Nome legível para logs.
    fn describe(&self) -> String;
}

/// Altitude (m) a partir da pressão medida e da pressão ao nível do mar (hPa).
pub fn altitude_from_pressure(pressure_hpa: f64, sea_level_hpa: f64) -> f64 {
    44330.0 * (1.0 - (pressure_hpa / sea_level_hpa).powf(BAROMETRIC_EXPONENT))
}

/// Valida a leitura contra os limites e converte a violação em falha.
pub fn check_range(reading: Reading, limits: &ReadingLimits) -> Result<Reading, SensorFault> {
    match reading.out_of_range(limits) {
        None => Ok(reading),
        Some(field) => {
            let value = match field {
                "temperature" => reading.temperature,
                "pressure" => reading.pressure,
                _ => reading.altitude,
            };
            Err(SensorFault::OutOfRange { field, value })
        }
    }
}

// ──────────────────────────────────────────────
// Barômetro simulado
// ──────────────────────────────────────────────

/// Barômetro simulado com deriva determinística.
///
/// Usado quando não há periférico físico: temperatura e pressão oscilam
/// lentamente em torno de valores típicos e a altitude é derivada da
/// pressão, como o driver real faz.
pub struct SimulatedBarometer {
    address: u8,
    sea_level_hpa: f64,
    limits: ReadingLimits,
    tick: u64,
}

impl SimulatedBarometer {
    pub fn new(config: &SensorConfig) -> Self {
        Self {
            address: config.i2c_address,
            sea_level_hpa: config.sea_level_pressure_hpa,
            limits: config.limits,
            tick: 0,
        }
    }
}

impl Sensor for SimulatedBarometer {
    fn sample(&mut self) -> Result<Reading, SensorFault> {
        if !(self.sea_level_hpa.is_finite() && self.sea_level_hpa > 0.0) {
            return Err(SensorFault::Unreachable {
                address: self.address,
                reason: format!("pressão de referência inválida ({})", self.sea_level_hpa),
            });
        }

        let phase = self.tick as f64 * 0.05;
        self.tick = self.tick.wrapping_add(1);

        let temperature = 21.0 + 1.5 * phase.sin();
        let pressure = 1012.0 + 0.8 * (phase * 0.5).cos();
        let altitude = altitude_from_pressure(pressure, self.sea_level_hpa);

        let reading = check_range(Reading::new(temperature, pressure, altitude), &self.limits)?;
        debug!(
            "Leitura simulada: {:.2}°C {:.2}hPa {:.1}m",
            reading.temperature, reading.pressure, reading.altitude
        );
        Ok(reading)
    }

    fn describe(&self) -> String {
        format!("BMP280 simulado @0x{:02X}", self.address)
    }
}
