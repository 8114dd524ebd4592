//! Sensor de temperatura/umidade via Linux IIO (ex.: SHT3x com driver do kernel).
//!
//! O driver expõe `in_temp_input` (m°C) e `in_humidityrelative_input` (m%RH).

use mould_core::source::{SensorError, SensorPort};
use std::path::PathBuf;

const TEMP_FILE: &str = "in_temp_input";
const RH_FILE: &str = "in_humidityrelative_input";

pub struct IioSensor {
    dir: PathBuf,
}

impl IioSensor {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn read_milli(&self, file: &str) -> Result<f64, SensorError> {
        let path = self.dir.join(file);
        let raw = std::fs::read_to_string(&path)?;
        raw.trim()
            .parse::<f64>()
            .map(|v| v / 1000.0)
            .map_err(|e| SensorError::ReadFailed(format!("{}: {e}", path.display())))
    }
}

impl SensorPort for IioSensor {
    fn read(&mut self) -> Result<(f64, f64), SensorError> {
        // Os dois canais ou nada
        let t = self.read_milli(TEMP_FILE)?;
        let rh = self.read_milli(RH_FILE)?;
        Ok((t, rh))
    }
}
