//! Definição da leitura ambiental transmitida pelo uplink.
//!
//! Uma [`Reading`] é criada uma vez por ciclo pelo sampler, nunca é
//! alterada e é descartada ao fim do ciclo (sucesso ou falha).

use serde::{Deserialize, Serialize};

// ──────────────────────────────────────────────
// Leitura
// ──────────────────────────────────────────────

/// Leitura do sensor barométrico.
///
/// Serializada com nomes de campo (`temperature`, `pressure`, `altitude`)
/// para que o coletor não dependa de ordem posicional.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Reading {
    /// Temperatura (°C)
    pub temperature: f64,
    /// Pressão atmosférica (hPa)
    pub pressure: f64,
    /// Altitude estimada (m)
    pub altitude: f64,
}

impl Reading {
    pub fn new(temperature: f64, pressure: f64, altitude: f64) -> Self {
        Self {
            temperature,
            pressure,
            altitude,
        }
    }

    /// Verifica a leitura contra os limites informados.
    ///
    /// Retorna o nome do primeiro campo fora da faixa (ou não finito).
    pub fn out_of_range(&self, limits: &ReadingLimits) -> Option<&'static str> {
        if !within(self.temperature, limits.temperature_min, limits.temperature_max) {
            return Some("temperature");
        }
        if !within(self.pressure, limits.pressure_min, limits.pressure_max) {
            return Some("pressure");
        }
        if !self.altitude.is_finite() {
            return Some("altitude");
        }
        None
    }
}

fn within(value: f64, min: f64, max: f64) -> bool {
    value.is_finite() && value >= min && value <= max
}

// ──────────────────────────────────────────────
// Limites
// ──────────────────────────────────────────────

/// Faixa aceita para cada grandeza medida.
///
/// Valores padrão seguem a faixa operacional do BMP280.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReadingLimits {
    pub temperature_min: f64,
    pub temperature_max: f64,
    pub pressure_min: f64,
    pub pressure_max: f64,
}

impl Default for ReadingLimits {
    fn default() -> Self {
        Self {
            temperature_min: -40.0,
            temperature_max: 85.0,
            pressure_min: 300.0,
            pressure_max: 1100.0,
        }
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_reading_is_zeroed() {
        let r = Reading::default();
        assert_eq!(r.temperature, 0.0);
        assert_eq!(r.pressure, 0.0);
        assert_eq!(r.altitude, 0.0);
    }

    #[test]
    fn typical_reading_is_in_range() {
        let r = Reading::new(22.5, 1012.3, 110.0);
        assert_eq!(r.out_of_range(&ReadingLimits::default()), None);
    }

    #[test]
    fn detects_out_of_range_fields() {
        let limits = ReadingLimits::default();
        assert_eq!(
            Reading::new(120.0, 1012.3, 0.0).out_of_range(&limits),
            Some("temperature")
        );
        assert_eq!(
            Reading::new(20.0, 50.0, 0.0).out_of_range(&limits),
            Some("pressure")
        );
        assert_eq!(
            Reading::new(20.0, 1000.0, f64::NAN).out_of_range(&limits),
            Some("altitude")
        );
    }

    #[test]
    fn nan_is_never_in_range() {
        let r = Reading::new(f64::NAN, 1000.0, 0.0);
        assert_eq!(r.out_of_range(&ReadingLimits::default()), Some("temperature"));
    }
}
