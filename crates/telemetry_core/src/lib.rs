//! # Mould Core
//!
//! Crate compartilhada do pipeline de risco de mofo: amostragem, ponto de
//! orvalho, suavização, máquina de risco, protocolo de linha e sessões de
//! transporte usados pelo sensor (sender) e pelo gateway (receiver).
//!
//! ## Módulos
//! - [`types`] – Leitura, amostra derivada, nível de risco, registro
//! - [`scheduler`] – Agendador de amostragem com correção de deriva
//! - [`source`] – Fonte de leituras (sensor ao vivo ou replay)
//! - [`dewpoint`] – Ponto de orvalho (Magnus-Tetens)
//! - [`smoothing`] – EMA por canal
//! - [`risk`] – Acumuladores com vazamento, níveis e indicador
//! - [`pipeline`] – Struct dono de todo o estado do lado sensor
//! - [`protocol`] – Encode/decode das linhas CSV
//! - [`transport`] – Sessões periférico/central/serial com reconexão
//! - [`forward`] – Registro entregue ao consumidor do gateway
//! - [`shutdown`] – SIGINT/SIGTERM → parada cooperativa
//! - [`config`] – Configuração unificada via TOML

pub mod types;
pub mod scheduler;
pub mod source;
pub mod dewpoint;
pub mod smoothing;
pub mod risk;
pub mod pipeline;
pub mod protocol;
pub mod transport;
pub mod forward;
pub mod shutdown;
pub mod config;

// Re-exports convenientes
pub use config::{AppConfig, ReceiverConfig, RiskThresholds, SenderConfig};
pub use pipeline::{RiskPipeline, RiskSample, TickOutcome};
pub use protocol::{WireFormat, decode_line, encode_line, encode_risk_line};
pub use types::{DerivedSample, Reading, RiskLevel, TelemetryRecord};
