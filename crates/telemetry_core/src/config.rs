//! Configuração unificada via TOML.
//!
//! Um único `config.toml` cobre o sensor (sender), os limiares de risco e o
//! gateway (receiver). Todos os structs usam `#[serde(default)]`, então um
//! arquivo parcial é válido.

use crate::protocol::WireFormat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Erros de persistência da configuração.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Erro de I/O em {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Erro ao serializar configuração: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Configuração do Sender (endpoint sensor).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Taxa de amostragem (Hz)
    pub sample_rate_hz: f64,
    /// Alpha da EMA
    pub smoothing_alpha: f64,
    /// Nome anunciado no link
    pub device_name: String,
    /// CSV de replay (vazio = sensor ao vivo ou tabela embutida)
    pub dataset_path: String,
    /// Lê o dataset sob demanda em vez de carregar tudo
    pub dataset_streaming: bool,
    /// Diretório IIO do sensor de temperatura/umidade (vazio = sem sensor)
    pub sensor_path: String,
    /// Endereço onde o sender aceita o central
    pub listen_addr: String,
    /// Arquivo `brightness` do LED (vazio = só log)
    pub indicator_path: String,
    /// Formato de fio das linhas enviadas
    pub wire_format: WireFormat,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 1.0,
            smoothing_alpha: crate::smoothing::DEFAULT_ALPHA,
            device_name: "21399066".into(),
            dataset_path: String::new(),
            dataset_streaming: false,
            sensor_path: String::new(),
            listen_addr: "0.0.0.0:5006".into(),
            indicator_path: String::new(),
            wire_format: WireFormat::Risk,
        }
    }
}

impl SenderConfig {
    /// Intervalo entre amostras (s).
    pub fn sampling_interval_secs(&self) -> f64 {
        1.0 / self.sample_rate_hz
    }
}

/// Limiares da máquina de risco.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskThresholds {
    /// Umidade para condição de alerta (%)
    pub rh_warn: f64,
    /// Umidade para condição alta (%)
    pub rh_high: f64,
    /// DPD máxima para condição alta (°C)
    pub dpd_high: f64,
    /// Exposição necessária para WARN (s)
    pub persist_warn_s: f64,
    /// Exposição necessária para HIGH (s)
    pub persist_high_s: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            rh_warn: 60.0,
            rh_high: 75.0,
            dpd_high: 3.0,
            persist_warn_s: 1800.0,
            persist_high_s: 7200.0,
        }
    }
}

/// Um par anunciado conhecido pelo central (tabela estática de anúncios).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    pub name: String,
    pub address: String,
    pub services: Vec<String>,
}

/// Configuração do Receiver (gateway/logger).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Modo: "serial" ou "central"
    pub mode: String,
    /// Dispositivo serial (vazio = detectar ACM/usbmodem)
    pub serial_port: String,
    /// Baud rate da porta serial
    pub baud: u32,
    /// Espera antes de reabrir a porta serial (s)
    pub reconnect_backoff_secs: f64,
    /// Espera antes de um novo scan sem candidatos (s)
    pub scan_backoff_secs: f64,
    /// Serviço de streaming exigido dos pares
    pub service: String,
    /// Formato esperado das linhas
    pub wire_format: WireFormat,
    /// Capacidade da fila I/O → processamento
    pub queue_capacity: usize,
    /// Identificador anexado aos registros encaminhados
    pub device_id: String,
    /// Pares anunciados (modo central)
    pub peers: Vec<PeerConfig>,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            mode: "serial".into(),
            serial_port: String::new(),
            baud: 115_200,
            reconnect_backoff_secs: 2.0,
            scan_backoff_secs: 1.0,
            service: crate::transport::UART_SERVICE.into(),
            wire_format: WireFormat::Risk,
            queue_capacity: 64,
            device_id: "21399066".into(),
            peers: Vec::new(),
        }
    }
}

/// Faixas usadas nas propriedades do registro encaminhado.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandThresholds {
    pub rh_high: f64,
    pub rh_warning: f64,
    pub dpd_high: f64,
}

impl Default for BandThresholds {
    fn default() -> Self {
        Self {
            rh_high: 80.0,
            rh_warning: 60.0,
            dpd_high: 4.0,
        }
    }
}

/// Configuração raiz do aplicativo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sender: SenderConfig,
    pub risk: RiskThresholds,
    pub receiver: ReceiverConfig,
    pub gateway: BandThresholds,
}

impl AppConfig {
    /// Carrega configuração de um arquivo TOML. Usa o padrão se falhar.
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
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Retorna o caminho padrão do config.toml (ao lado do executável).
    pub fn default_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."));
        exe_dir.join("config.toml")
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let s = &self.sender;
        let r = &self.risk;
        let rx = &self.receiver;

        if !(s.sample_rate_hz > 0.0 && s.sample_rate_hz <= 100.0) {
            errors.push(format!(
                "Taxa de amostragem inválida: {} (0–100 Hz)",
                s.sample_rate_hz
            ));
        }
        if !(s.smoothing_alpha > 0.0 && s.smoothing_alpha <= 1.0) {
            errors.push(format!(
                "Alpha da EMA inválido: {} (0 < alpha ≤ 1)",
                s.smoothing_alpha
            ));
        }
        if s.device_name.contains(',') {
            errors.push("Nome do dispositivo não pode conter vírgula".into());
        }
        if s.wire_format.carries_pressure() {
            errors.push(format!(
                "Formato {:?} exige pressão, que o sender não mede",
                s.wire_format
            ));
        }

        if !(r.rh_warn >= 0.0 && r.rh_warn <= r.rh_high && r.rh_high <= 100.0) {
            errors.push(format!(
                "Limiares de umidade inválidos: warn={} high={}",
                r.rh_warn, r.rh_high
            ));
        }
        if !(r.persist_warn_s > 0.0) || !(r.persist_high_s > 0.0) {
            errors.push("Janelas de persistência devem ser > 0".into());
        }
        if !r.dpd_high.is_finite() {
            errors.push("Limiar de DPD deve ser finito".into());
        }

        if rx.mode != "serial" && rx.mode != "central" {
            errors.push(format!("Modo do receiver inválido: {}", rx.mode));
        }
        if !(rx.reconnect_backoff_secs >= 0.0) || !(rx.scan_backoff_secs >= 0.0) {
            errors.push("Backoffs do receiver não podem ser negativos".into());
        }
        if rx.baud == 0 {
            errors.push("Baud rate da porta serial não pode ser 0".into());
        }
        if rx.queue_capacity == 0 {
            errors.push("Capacidade da fila não pode ser 0".into());
        }
        if rx.device_id.contains(',') {
            errors.push("device_id não pode conter vírgula".into());
        }

        errors
    }
}
