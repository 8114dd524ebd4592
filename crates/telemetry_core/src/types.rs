//! Definição de tipos/structs do pipeline de risco de mofo.
//!
//! Tudo aqui é dado puro: leituras, amostras derivadas, nível de risco e o
//! registro decodificado de uma linha de telemetria.

use serde::{Deserialize, Serialize};

/// Faixa de temperatura válida do sensor (°C), aplicada a linhas decodificadas.
pub const TEMP_MIN_C: f64 = -40.0;
pub const TEMP_MAX_C: f64 = 85.0;

/// Faixa de umidade relativa (%).
pub const RH_MIN_PCT: f64 = 0.0;
pub const RH_MAX_PCT: f64 = 100.0;

// ──────────────────────────────────────────────
// Leitura
// ──────────────────────────────────────────────

/// Par temperatura/umidade vindo de uma fonte (sensor ou dataset).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Temperatura (°C)
    pub temperature_c: f64,
    /// Umidade relativa (0–100%)
    pub humidity_pct: f64,
}

impl Reading {
    pub const fn new(temperature_c: f64, humidity_pct: f64) -> Self {
        Self {
            temperature_c,
            humidity_pct,
        }
    }

    /// Aplica as faixas físicas do sensor. Usado só no lado de recepção.
    pub fn clamped(self) -> Self {
        Self {
            temperature_c: self.temperature_c.clamp(TEMP_MIN_C, TEMP_MAX_C),
            humidity_pct: self.humidity_pct.clamp(RH_MIN_PCT, RH_MAX_PCT),
        }
    }
}

// ──────────────────────────────────────────────
// Amostra derivada
// ──────────────────────────────────────────────

/// Leitura acrescida de ponto de orvalho e depressão (DPD).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivedSample {
    pub temperature_c: f64,
    pub humidity_pct: f64,
    pub dewpoint_c: f64,
    /// `temperature_c - dewpoint_c`
    pub dpd_c: f64,
}

// ──────────────────────────────────────────────
// Risco
// ──────────────────────────────────────────────

/// Classificação ordinal de risco.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Safe,
    Warn,
    High,
}

impl RiskLevel {
    /// Código inteiro transmitido na linha (0/1/2).
    pub const fn code(self) -> u8 {
        match self {
            RiskLevel::Safe => 0,
            RiskLevel::Warn => 1,
            RiskLevel::High => 2,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(RiskLevel::Safe),
            1 => Some(RiskLevel::Warn),
            2 => Some(RiskLevel::High),
            _ => None,
        }
    }

    /// Modo do indicador luminoso para este nível.
    pub const fn indicator_mode(self) -> IndicatorMode {
        match self {
            RiskLevel::Safe => IndicatorMode::Off,
            RiskLevel::Warn => IndicatorMode::Blink,
            RiskLevel::High => IndicatorMode::Solid,
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RiskLevel::Safe => "SAFE",
            RiskLevel::Warn => "WARN",
            RiskLevel::High => "HIGH",
        };
        f.write_str(label)
    }
}

/// Como o indicador deve se comportar a cada amostra.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorMode {
    Off,
    /// Alterna a cada amostra
    Blink,
    Solid,
}

// ──────────────────────────────────────────────
// Registro decodificado
// ──────────────────────────────────────────────

/// Uma linha de telemetria decodificada.
///
/// Os campos opcionais dependem do formato de fio; o codec garante que os
/// campos exigidos pelo formato estejam presentes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Timestamp relativo ao dispositivo (ms)
    pub timestamp_ms: Option<u64>,
    pub temperature_c: f64,
    pub humidity_pct: f64,
    pub pressure_hpa: Option<f64>,
    pub dewpoint_c: Option<f64>,
    pub dpd_c: Option<f64>,
    pub risk: Option<RiskLevel>,
    pub device_id: Option<String>,
}

impl TelemetryRecord {
    /// Registro no formato canônico (amostra + risco).
    pub fn from_risk_sample(sample: &DerivedSample, risk: RiskLevel) -> Self {
        Self {
            temperature_c: sample.temperature_c,
            humidity_pct: sample.humidity_pct,
            dewpoint_c: Some(sample.dewpoint_c),
            dpd_c: Some(sample.dpd_c),
            risk: Some(risk),
            ..Default::default()
        }
    }

    pub fn reading(&self) -> Reading {
        Reading::new(self.temperature_c, self.humidity_pct)
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
