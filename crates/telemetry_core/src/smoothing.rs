//! Média móvel exponencial (EMA) por canal.

use crate::types::DerivedSample;

/// Alpha padrão do filtro.
pub const DEFAULT_ALPHA: f64 = 0.3;

/// Um passo da EMA. Sem histórico, devolve a entrada sem suavizar.
pub fn ema(prev: Option<f64>, new: f64, alpha: f64) -> f64 {
    match prev {
        None => new,
        Some(p) => alpha * new + (1.0 - alpha) * p,
    }
}

/// Entradas de um tick, canal a canal. Canal ausente mantém o valor anterior.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChannelInputs {
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub dewpoint_c: Option<f64>,
    pub dpd_c: Option<f64>,
}

impl From<DerivedSample> for ChannelInputs {
    fn from(s: DerivedSample) -> Self {
        Self {
            temperature_c: Some(s.temperature_c),
            humidity_pct: Some(s.humidity_pct),
            dewpoint_c: Some(s.dewpoint_c),
            dpd_c: Some(s.dpd_c),
        }
    }
}

/// Quatro acumuladores independentes.
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothedState {
    alpha: f64,
    pub t_ema: Option<f64>,
    pub rh_ema: Option<f64>,
    pub td_ema: Option<f64>,
    pub dpd_ema: Option<f64>,
}

impl Default for SmoothedState {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHA)
    }
}

impl SmoothedState {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            t_ema: None,
            rh_ema: None,
            td_ema: None,
            dpd_ema: None,
        }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Dobra as entradas do tick nos acumuladores.
    pub fn update(&mut self, inputs: impl Into<ChannelInputs>) {
        let inputs = inputs.into();
        let alpha = self.alpha;
        let step = |acc: &mut Option<f64>, new: Option<f64>| {
            if let Some(v) = new {
                *acc = Some(ema(*acc, v, alpha));
            }
        };
        step(&mut self.t_ema, inputs.temperature_c);
        step(&mut self.rh_ema, inputs.humidity_pct);
        step(&mut self.td_ema, inputs.dewpoint_c);
        step(&mut self.dpd_ema, inputs.dpd_c);
    }

    /// Estado suavizado completo, se todos os canais já tiverem valor.
    pub fn snapshot(&self) -> Option<DerivedSample> {
        Some(DerivedSample {
            temperature_c: self.t_ema?,
            humidity_pct: self.rh_ema?,
            dewpoint_c: self.td_ema?,
            dpd_c: self.dpd_ema?,
        })
    }
}
