//! Ponto de orvalho pela aproximação de Magnus-Tetens.

use crate::types::{DerivedSample, Reading};

/// Constante `A` de Magnus (adimensional).
pub const MAGNUS_A: f64 = 17.62;
/// Constante `B` de Magnus (°C).
pub const MAGNUS_B: f64 = 243.12;

/// Menor umidade aceita antes do `ln`.
const RH_FLOOR: f64 = 1e-6;

/// Ponto de orvalho (°C) para temperatura `t_c` e umidade `rh_pct`.
///
/// A umidade é limitada a `[1e-6, 100]`, então a função é total para
/// entradas finitas.
pub fn dew_point_c(t_c: f64, rh_pct: f64) -> f64 {
    let rh = rh_pct.clamp(RH_FLOOR, 100.0);
    let gamma = (rh / 100.0).ln() + MAGNUS_A * t_c / (MAGNUS_B + t_c);
    MAGNUS_B * gamma / (MAGNUS_A - gamma)
}

/// Depressão do ponto de orvalho. Perto de zero (ou negativa) indica ar saturado.
pub fn dew_point_depression_c(t_c: f64, rh_pct: f64) -> f64 {
    t_c - dew_point_c(t_c, rh_pct)
}

/// Calcula a amostra derivada completa de uma leitura.
pub fn derive(reading: Reading) -> DerivedSample {
    let dewpoint_c = dew_point_c(reading.temperature_c, reading.humidity_pct);
    DerivedSample {
        temperature_c: reading.temperature_c,
        humidity_pct: reading.humidity_pct,
        dewpoint_c,
        dpd_c: reading.temperature_c - dewpoint_c,
    }
}
