//! # Uplink Core
//!
//! Crate compartilhada que define a leitura do sensor, o protocolo de
//! frames com header de largura fixa e a configuração TOML do sistema de
//! uplink de telemetria.
//!
//! ## Módulos
//! - [`types`] – Leitura ambiental e limites de faixa
//! - [`protocol`] – Codec JSON, framing, parsing de header e ACK
//! - [`config`] – Configuração unificada via TOML

pub mod types;
pub mod protocol;
pub mod config;

// Re-exports convenientes
pub use types::{Reading, ReadingLimits};
pub use protocol::{Frame, ProtocolError, DEFAULT_HEADER_WIDTH};
pub use config::{AppConfig, CollectorConfig, UplinkConfig, WriteMode};
