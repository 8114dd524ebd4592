//! Protocolo de linha ASCII.
//!
//! Cada registro é uma linha de campos decimais separados por vírgula,
//! terminada em `\n`. Há cinco gerações de formato:
//!
//! ```text
//! ┌─────────────┬────────┬──────────────────────────────────────────────┐
//! │ Formato     │ Campos │ Ordem                                        │
//! ├─────────────┼────────┼──────────────────────────────────────────────┤
//! │ legacy      │ 3      │ temp, rh, pressure                           │
//! │ timestamped │ 4      │ ts_ms, temp, rh, pressure                    │
//! │ derived     │ 5      │ ts_ms, temp, rh, dewpoint, dpd               │
//! │ risk        │ 5      │ temp, rh, dewpoint, dpd, risk(0/1/2)         │
//! │ gateway     │ 6      │ ts_ms, temp, rh, dewpoint, dpd, device_id    │
//! └─────────────┴────────┴──────────────────────────────────────────────┘
//! ```
//!
//! `risk` é o formato canônico. `derived` e `risk` têm a mesma aridade, por
//! isso o decodificador sempre recebe o formato esperado em vez de adivinhar.
//!
//! A decodificação é tudo-ou-nada: qualquer campo inválido rejeita a linha
//! inteira. Temperatura e umidade decodificadas são limitadas às faixas do
//! sensor e todos os decimais são arredondados para 2 casas.

use crate::types::{DerivedSample, RiskLevel, TelemetryRecord};
use serde::{Deserialize, Serialize};

/// Casas decimais na codificação de grandezas físicas.
pub const ENCODE_DECIMALS: usize = 3;

/// Erros do protocolo.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Número de campos incorreto: {got} (esperado {expected})")]
    FieldCount { expected: usize, got: usize },

    #[error("Campo {index} não numérico: {value:?}")]
    InvalidNumber { index: usize, value: String },

    #[error("Timestamp inválido: {0:?}")]
    InvalidTimestamp(String),

    #[error("Código de risco inválido: {0:?}")]
    InvalidRiskCode(String),

    #[error("device_id inválido: {0:?}")]
    InvalidDeviceId(String),

    #[error("Campo obrigatório ausente para {format:?}: {field}")]
    MissingField {
        format: WireFormat,
        field: &'static str,
    },
}

/// Geração do formato de linha.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    Legacy,
    Timestamped,
    Derived,
    #[default]
    Risk,
    Gateway,
}

impl WireFormat {
    /// Número exato de campos da linha.
    pub const fn field_count(self) -> usize {
        match self {
            WireFormat::Legacy => 3,
            WireFormat::Timestamped => 4,
            WireFormat::Derived | WireFormat::Risk => 5,
            WireFormat::Gateway => 6,
        }
    }

    /// Formatos de pressão (legacy, timestamped), sem grandezas derivadas.
    pub const fn carries_pressure(self) -> bool {
        matches!(self, WireFormat::Legacy | WireFormat::Timestamped)
    }

    const fn has_timestamp(self) -> bool {
        matches!(
            self,
            WireFormat::Timestamped | WireFormat::Derived | WireFormat::Gateway
        )
    }
}

// ──────────────────────────────────────────────
// Encode
// ──────────────────────────────────────────────

/// Linha canônica (`risk`) para uma amostra suavizada e seu nível.
pub fn encode_risk_line(sample: &DerivedSample, risk: RiskLevel) -> String {
    format!(
        "{:.3},{:.3},{:.3},{:.3},{}\n",
        sample.temperature_c,
        sample.humidity_pct,
        sample.dewpoint_c,
        sample.dpd_c,
        risk.code()
    )
}

/// Codifica um registro no formato pedido.
///
/// Retorna [`ProtocolError::MissingField`] se o registro não tiver algum
/// campo exigido pelo formato.
pub fn encode_line(format: WireFormat, record: &TelemetryRecord) -> Result<String, ProtocolError> {
    let missing = |field| ProtocolError::MissingField { format, field };
    let decimal = |v: f64| format!("{:.p$}", v, p = ENCODE_DECIMALS);
    let mut fields = Vec::with_capacity(format.field_count());

    if format.has_timestamp() {
        let ts = record.timestamp_ms.ok_or_else(|| missing("timestamp_ms"))?;
        fields.push(ts.to_string());
    }
    fields.push(decimal(record.temperature_c));
    fields.push(decimal(record.humidity_pct));

    match format {
        WireFormat::Legacy | WireFormat::Timestamped => {
            let pressure = record.pressure_hpa.ok_or_else(|| missing("pressure_hpa"))?;
            fields.push(decimal(pressure));
        }
        WireFormat::Derived | WireFormat::Risk | WireFormat::Gateway => {
            let td = record.dewpoint_c.ok_or_else(|| missing("dewpoint_c"))?;
            let dpd = record.dpd_c.ok_or_else(|| missing("dpd_c"))?;
            fields.push(decimal(td));
            fields.push(decimal(dpd));
        }
    }

    match format {
        WireFormat::Risk => {
            let risk = record.risk.ok_or_else(|| missing("risk"))?;
            fields.push(risk.code().to_string());
        }
        WireFormat::Gateway => {
            let id = record.device_id.as_deref().ok_or_else(|| missing("device_id"))?;
            validate_device_id(id)?;
            fields.push(id.to_string());
        }
        _ => {}
    }

    let mut line = fields.join(",");
    line.push('\n');
    Ok(line)
}

fn validate_device_id(id: &str) -> Result<(), ProtocolError> {
    if id.is_empty() || id.contains([',', '\n', '\r']) || id.trim() != id {
        return Err(ProtocolError::InvalidDeviceId(id.to_string()));
    }
    Ok(())
}

// ──────────────────────────────────────────────
// Decode
// ──────────────────────────────────────────────

/// Decodifica uma linha (com ou sem `\n`/`\r\n` final).
pub fn decode_line(format: WireFormat, line: &str) -> Result<TelemetryRecord, ProtocolError> {
    let parts: Vec<&str> = line
        .trim_end_matches(['\r', '\n'])
        .split(',')
        .map(str::trim)
        .collect();

    let expected = format.field_count();
    if parts.len() != expected {
        return Err(ProtocolError::FieldCount {
            expected,
            got: parts.len(),
        });
    }

    let mut fields = parts.iter().copied().enumerate();
    let mut record = TelemetryRecord::default();

    if format.has_timestamp() {
        let (_, raw) = next_field(&mut fields);
        record.timestamp_ms = Some(
            raw.parse::<u64>()
                .map_err(|_| ProtocolError::InvalidTimestamp(raw.to_string()))?,
        );
    }

    let temperature = parse_number(next_field(&mut fields))?;
    let humidity = parse_number(next_field(&mut fields))?;
    let reading = crate::types::Reading::new(temperature, humidity).clamped();
    record.temperature_c = round2(reading.temperature_c);
    record.humidity_pct = round2(reading.humidity_pct);

    match format {
        WireFormat::Legacy | WireFormat::Timestamped => {
            record.pressure_hpa = Some(round2(parse_number(next_field(&mut fields))?));
        }
        WireFormat::Derived | WireFormat::Risk | WireFormat::Gateway => {
            record.dewpoint_c = Some(round2(parse_number(next_field(&mut fields))?));
            record.dpd_c = Some(round2(parse_number(next_field(&mut fields))?));
        }
    }

    match format {
        WireFormat::Risk => {
            let (_, raw) = next_field(&mut fields);
            let level = raw
                .parse::<u8>()
                .ok()
                .and_then(RiskLevel::from_code)
                .ok_or_else(|| ProtocolError::InvalidRiskCode(raw.to_string()))?;
            record.risk = Some(level);
        }
        WireFormat::Gateway => {
            let (_, raw) = next_field(&mut fields);
            validate_device_id(raw)?;
            record.device_id = Some(raw.to_string());
        }
        _ => {}
    }

    Ok(record)
}

// A aridade já foi conferida, então o iterador nunca acaba antes da hora.
fn next_field<'a>(fields: &mut impl Iterator<Item = (usize, &'a str)>) -> (usize, &'a str) {
    fields.next().unwrap_or((usize::MAX, ""))
}

fn parse_number((index, raw): (usize, &str)) -> Result<f64, ProtocolError> {
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(ProtocolError::InvalidNumber {
            index,
            value: raw.to_string(),
        }),
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
