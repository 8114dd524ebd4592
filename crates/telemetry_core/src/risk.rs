//! Máquina de risco – integradores com vazamento e níveis por persistência.
//!
//! Cada condição (alerta e alta) carrega um acumulador em segundos. Enquanto a
//! condição vale, o acumulador sobe pelo intervalo do tick; quando some, desce
//! na mesma taxa, sem nunca ficar negativo. O nível é recalculado a cada tick
//! só a partir dos acumuladores.

use crate::config::RiskThresholds;
use crate::types::{IndicatorMode, RiskLevel};
use serde::{Deserialize, Serialize};

/// Tempo de exposição acumulado por condição (s).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskAccumulators {
    pub warn_accum_s: f64,
    pub high_accum_s: f64,
}

impl RiskAccumulators {
    /// Nível correspondente aos acumuladores atuais.
    pub fn level(&self, thresholds: &RiskThresholds) -> RiskLevel {
        if self.high_accum_s >= thresholds.persist_high_s {
            RiskLevel::High
        } else if self.warn_accum_s >= thresholds.persist_warn_s {
            RiskLevel::Warn
        } else {
            RiskLevel::Safe
        }
    }
}

/// Condições instantâneas avaliadas sobre os valores suavizados.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskConditions {
    pub warn: bool,
    pub high: bool,
}

impl RiskConditions {
    pub fn evaluate(rh_ema: f64, dpd_ema: f64, thresholds: &RiskThresholds) -> Self {
        Self {
            warn: rh_ema >= thresholds.rh_warn,
            high: rh_ema >= thresholds.rh_high || dpd_ema <= thresholds.dpd_high,
        }
    }
}

fn integrate(accum: f64, active: bool, interval: f64) -> f64 {
    if active {
        (accum + interval).max(0.0)
    } else {
        (accum - interval).max(0.0)
    }
}

/// Estado completo da máquina de risco.
#[derive(Debug, Clone)]
pub struct RiskMonitor {
    thresholds: RiskThresholds,
    accum: RiskAccumulators,
    level: RiskLevel,
}

impl RiskMonitor {
    pub fn new(thresholds: RiskThresholds) -> Self {
        Self {
            thresholds,
            accum: RiskAccumulators::default(),
            level: RiskLevel::Safe,
        }
    }

    pub fn level(&self) -> RiskLevel {
        self.level
    }

    pub fn accumulators(&self) -> RiskAccumulators {
        self.accum
    }

    pub fn thresholds(&self) -> &RiskThresholds {
        &self.thresholds
    }

    /// Atualiza os acumuladores com `interval_s` segundos e devolve o novo nível.
    pub fn update(&mut self, rh_ema: f64, dpd_ema: f64, interval_s: f64) -> RiskLevel {
        let cond = RiskConditions::evaluate(rh_ema, dpd_ema, &self.thresholds);
        self.apply(cond, interval_s)
    }

    /// Mesmo que [`update`](Self::update), com as condições já avaliadas.
    pub fn apply(&mut self, cond: RiskConditions, interval_s: f64) -> RiskLevel {
        self.accum.warn_accum_s = integrate(self.accum.warn_accum_s, cond.warn, interval_s);
        self.accum.high_accum_s = integrate(self.accum.high_accum_s, cond.high, interval_s);
        self.level = self.accum.level(&self.thresholds);
        self.level
    }
}

impl Default for RiskMonitor {
    fn default() -> Self {
        Self::new(RiskThresholds::default())
    }
}

// ──────────────────────────────────────────────
// Indicador
// ──────────────────────────────────────────────

/// Saída física do indicador (LED).
pub trait Indicator {
    fn set(&mut self, on: bool);
}

/// Traduz o modo do nível em liga/desliga, uma vez por amostra.
#[derive(Debug, Default)]
pub struct IndicatorDriver {
    lit: bool,
}

impl IndicatorDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Estado que o indicador deve assumir nesta amostra.
    pub fn step(&mut self, mode: IndicatorMode) -> bool {
        self.lit = match mode {
            IndicatorMode::Off => false,
            IndicatorMode::Solid => true,
            IndicatorMode::Blink => !self.lit,
        };
        self.lit
    }

    pub fn drive(&mut self, mode: IndicatorMode, out: &mut dyn Indicator) {
        let on = self.step(mode);
        out.set(on);
    }
}
