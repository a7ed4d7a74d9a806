//! Configuração unificada via TOML.
//!
//! Um único `config.toml` descreve o sender (dispositivo) e o coletor.
//! Todas as seções usam `#[serde(default)]`, então arquivos parciais funcionam.

use crate::protocol::DEFAULT_HEADER_WIDTH;
use crate::types::ReadingLimits;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Erros ao persistir a configuração.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Erro ao serializar config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Erro ao gravar {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Forma de transmitir header e payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Header e payload em uma única escrita.
    #[default]
    Atomic,
    /// Duas escritas com pausa entre elas (receptores legados).
    Split,
}

/// Configuração do sensor barométrico.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Endereço I2C do periférico (0x76 ou 0x77)
    pub i2c_address: u8,
    /// Pressão ao nível do mar usada no cálculo de altitude (hPa)
    pub sea_level_pressure_hpa: f64,
    /// Faixa aceita das leituras
    pub limits: ReadingLimits,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            i2c_address: 0x76,
            sea_level_pressure_hpa: 1013.25,
            limits: ReadingLimits::default(),
        }
    }
}

/// Política de reinício após falha fatal do loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Espera antes de reiniciar o loop (segundos)
    pub restart_backoff_secs: f64,
    /// Reinícios permitidos antes de encerrar o processo
    pub max_restarts: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            restart_backoff_secs: 30.0,
            max_restarts: 3,
        }
    }
}

/// Configuração do Sender (dispositivo).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UplinkConfig {
    /// Host do coletor
    pub collector_host: String,
    /// Porta TCP do coletor
    pub port: u16,
    /// Largura do header do frame (bytes)
    pub header_width: usize,
    /// Período do ciclo em segundos
    pub interval_secs: f64,
    /// Tentativas extras de reconexão por ciclo
    pub max_retries: u32,
    /// Espera fixa entre tentativas de conexão (segundos)
    pub retry_delay_secs: f64,
    /// Timeout de cada tentativa de conexão (segundos)
    pub connect_timeout_secs: f64,
    /// Prazo máximo para a resposta do coletor (segundos)
    pub response_timeout_secs: f64,
    /// "atomic" ou "split"
    pub write_mode: WriteMode,
    /// Pausa entre header e payload no modo "split" (ms)
    pub inter_write_pause_ms: u64,
    pub sensor: SensorConfig,
    pub supervisor: SupervisorConfig,
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            collector_host: "127.0.0.1".into(),
            port: 5050,
            header_width: DEFAULT_HEADER_WIDTH,
            interval_secs: 5.0,
            max_retries: 5,
            retry_delay_secs: 1.0,
            connect_timeout_secs: 3.0,
            response_timeout_secs: 10.0,
            write_mode: WriteMode::Atomic,
            inter_write_pause_ms: 10,
            sensor: SensorConfig::default(),
            supervisor: SupervisorConfig::default(),
        }
    }
}

impl UplinkConfig {
    /// Endereço `host:porta` do coletor.
    pub fn collector_addr(&self) -> String {
        format!("{}:{}", self.collector_host, self.port)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.connect_timeout_secs)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.response_timeout_secs)
    }

    pub fn inter_write_pause(&self) -> Duration {
        Duration::from_millis(self.inter_write_pause_ms)
    }
}

/// Configuração do Coletor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// IP local para bind
    pub bind_ip: String,
    /// Porta TCP para escutar
    pub port: u16,
    /// Largura do header do frame (bytes)
    pub header_width: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            bind_ip: "0.0.0.0".into(),
            port: 5050,
            header_width: DEFAULT_HEADER_WIDTH,
        }
    }
}

impl CollectorConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_ip, self.port)
    }
}

/// Configuração raiz do aplicativo (unifica sender e coletor).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub uplink: UplinkConfig,
    pub collector: CollectorConfig,
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
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Caminho do config: primeiro argumento da linha de comando ou
    /// `config.toml` ao lado do executável.
    pub fn resolve_path() -> PathBuf {
        std::env::args_os()
            .nth(1)
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_path)
    }

    /// Retorna o caminho padrão do config.toml.
    pub fn default_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."));
        exe_dir.join("config.toml")
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let up = &self.uplink;

        if up.port == 0 {
            errors.push("Porta do coletor (uplink) não pode ser 0".into());
        }
        if up.collector_host.trim().is_empty() {
            errors.push("Host do coletor não pode ser vazio".into());
        }
        if up.header_width == 0 || up.header_width > DEFAULT_HEADER_WIDTH {
            errors.push(format!(
                "Largura do header inválida: {} (1–{DEFAULT_HEADER_WIDTH})",
                up.header_width
            ));
        }
        if !(0.1..=3600.0).contains(&up.interval_secs) {
            errors.push(format!(
                "Intervalo do uplink inválido: {} (0.1–3600.0)",
                up.interval_secs
            ));
        }
        if !(up.retry_delay_secs >= 0.0 && up.retry_delay_secs.is_finite()) {
            errors.push(format!("Espera entre tentativas inválida: {}", up.retry_delay_secs));
        }
        if !(up.connect_timeout_secs > 0.0 && up.connect_timeout_secs.is_finite()) {
            errors.push(format!(
                "Timeout de conexão inválido: {}",
                up.connect_timeout_secs
            ));
        }
        if !(up.response_timeout_secs > 0.0 && up.response_timeout_secs.is_finite()) {
            errors.push(format!(
                "Timeout de resposta inválido: {}",
                up.response_timeout_secs
            ));
        }
        if !(up.supervisor.restart_backoff_secs >= 0.0 && up.supervisor.restart_backoff_secs.is_finite()) {
            errors.push(format!(
                "Backoff de reinício inválido: {}",
                up.supervisor.restart_backoff_secs
            ));
        }
        if self.collector.port == 0 {
            errors.push("Porta do coletor não pode ser 0".into());
        }
        if self.collector.header_width == 0 || self.collector.header_width > DEFAULT_HEADER_WIDTH {
            errors.push(format!(
                "Largura do header do coletor inválida: {}",
                self.collector.header_width
            ));
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
        assert_eq!(config.uplink.port, parsed.uplink.port);
        assert_eq!(config.uplink.write_mode, parsed.uplink.write_mode);
        assert_eq!(config.collector.header_width, parsed.collector.header_width);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let partial = r#"
[uplink]
port = 9999
write_mode = "split"
"#;
        let config: AppConfig = toml::from_str(partial).unwrap();
        assert_eq!(config.uplink.port, 9999);
        assert_eq!(config.uplink.write_mode, WriteMode::Split);
        // Outros campos devem ter valor padrão
        assert_eq!(config.uplink.max_retries, 5);
        assert_eq!(config.uplink.header_width, 64);
        assert_eq!(config.uplink.sensor.i2c_address, 0x76);
        assert_eq!(config.collector.port, 5050);
    }

    #[test]
    fn validate_flags_bad_values() {
        let mut config = AppConfig::default();
        config.uplink.port = 0;
        config.uplink.header_width = 0;
        config.uplink.interval_secs = 0.0;
        config.uplink.response_timeout_secs = 0.0;
        assert_eq!(config.validate().len(), 4);
    }

    #[test]
    fn durations_follow_fields() {
        let up = UplinkConfig::default();
        assert_eq!(up.interval(), Duration::from_secs(5));
        assert_eq!(up.retry_delay(), Duration::from_secs(1));
        assert_eq!(up.inter_write_pause(), Duration::from_millis(10));
        assert_eq!(up.collector_addr(), "127.0.0.1:5050");
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = AppConfig::default();
        config.uplink.collector_host = "192.168.0.35".into();
        config.uplink.max_retries = 2;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path);
        assert_eq!(loaded.uplink.collector_host, "192.168.0.35");
        assert_eq!(loaded.uplink.max_retries, 2);
    }

    #[test]
    fn load_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = AppConfig::load(&dir.path().join("nope.toml"));
        assert_eq!(loaded.uplink.port, 5050);
    }
}
