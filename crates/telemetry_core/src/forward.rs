//! Registro encaminhado pelo gateway ao consumidor (logger, hub na nuvem).
//!
//! O núcleo só entrega um registro bem formado com timestamp de captura; o
//! que o consumidor faz com ele fica fora daqui.

use crate::config::BandThresholds;
use crate::types::{RiskLevel, TelemetryRecord};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Faixa de umidade anexada como propriedade da mensagem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RhBand {
    Normal,
    Warning,
    High,
}

/// Faixa de DPD anexada como propriedade da mensagem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DpdBand {
    Safe,
    High,
}

pub fn rh_band(rh_pct: f64, bands: &BandThresholds) -> RhBand {
    if rh_pct >= bands.rh_high {
        RhBand::High
    } else if rh_pct >= bands.rh_warning {
        RhBand::Warning
    } else {
        RhBand::Normal
    }
}

pub fn dpd_band(dpd_c: f64, bands: &BandThresholds) -> DpdBand {
    if dpd_c <= bands.dpd_high {
        DpdBand::High
    } else {
        DpdBand::Safe
    }
}

/// Registro pronto para o consumidor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardRecord {
    /// Momento da captura no gateway (UTC)
    pub captured_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts_ms: Option<u64>,
    pub temperature_c: f64,
    pub humidity_pct: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pressure_hpa: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dewpoint_c: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dpd_c: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskLevel>,
    pub rh_band: RhBand,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dpd_band: Option<DpdBand>,
}

impl ForwardRecord {
    /// Monta o registro. O `device_id` da linha (formato gateway) tem
    /// prioridade sobre o configurado.
    pub fn new(
        record: TelemetryRecord,
        captured_at: DateTime<Utc>,
        fallback_device_id: Option<&str>,
        bands: &BandThresholds,
    ) -> Self {
        let device_id = record
            .device_id
            .or_else(|| fallback_device_id.filter(|id| !id.is_empty()).map(str::to_string));
        Self {
            captured_at,
            device_id,
            ts_ms: record.timestamp_ms,
            temperature_c: record.temperature_c,
            humidity_pct: record.humidity_pct,
            pressure_hpa: record.pressure_hpa,
            dewpoint_c: record.dewpoint_c,
            dpd_c: record.dpd_c,
            risk: record.risk,
            rh_band: rh_band(record.humidity_pct, bands),
            dpd_band: record.dpd_c.map(|d| dpd_band(d, bands)),
        }
    }

    /// Timestamp ISO 8601 com sufixo `Z`.
    pub fn iso_time(&self) -> String {
        self.captured_at.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    /// Corpo JSON da mensagem.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Consumidor dos registros decodificados.
pub trait Forwarder {
    type Error: std::fmt::Display;

    fn forward(&mut self, record: &ForwardRecord) -> Result<(), Self::Error>;
}
