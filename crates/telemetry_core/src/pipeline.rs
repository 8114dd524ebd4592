//! Pipeline de risco: agendador → fonte → orvalho → EMA → risco.
//!
//! Todo o estado mutável vive em [`RiskPipeline`]; várias instâncias
//! independentes podem coexistir (e coexistem nos testes).

use crate::config::{RiskThresholds, SenderConfig};
use crate::dewpoint;
use crate::risk::{Indicator, IndicatorDriver, RiskAccumulators, RiskMonitor};
use crate::scheduler::SampleScheduler;
use crate::smoothing::SmoothedState;
use crate::source::{ReadingSource, SourceError};
use crate::types::{DerivedSample, RiskLevel, TelemetryRecord};
use tracing::{debug, info, warn};

/// Resultado de uma amostra processada.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskSample {
    /// Valores crus da leitura
    pub raw: DerivedSample,
    /// Valores suavizados (os transmitidos)
    pub smoothed: DerivedSample,
    pub risk: RiskLevel,
    /// Tempo creditado aos acumuladores (s)
    pub elapsed_s: f64,
    /// Estado aplicado ao indicador
    pub indicator_on: bool,
}

impl RiskSample {
    /// Registro completo para formatos além do canônico (timestamp, device_id).
    pub fn record(&self, timestamp_ms: u64, device_id: &str) -> TelemetryRecord {
        TelemetryRecord {
            timestamp_ms: Some(timestamp_ms),
            device_id: Some(device_id.to_string()),
            ..TelemetryRecord::from_risk_sample(&self.smoothed, self.risk)
        }
    }
}

/// O que aconteceu em um tick.
#[derive(Debug)]
pub enum TickOutcome {
    /// Nenhuma amostra devida
    Idle,
    /// Amostra devida, mas a fonte falhou; estado suavizado mantido
    SampleFailed(SourceError),
    Sampled(RiskSample),
}

pub struct RiskPipeline {
    scheduler: SampleScheduler,
    source: ReadingSource,
    smoothed: SmoothedState,
    risk: RiskMonitor,
    indicator: IndicatorDriver,
    output: Option<Box<dyn Indicator + Send>>,
    samples: u64,
    failures: u64,
}

impl RiskPipeline {
    pub fn new(
        source: ReadingSource,
        sample_rate_hz: f64,
        alpha: f64,
        thresholds: RiskThresholds,
        now: f64,
    ) -> Self {
        Self {
            scheduler: SampleScheduler::new(sample_rate_hz, now),
            source,
            smoothed: SmoothedState::new(alpha),
            risk: RiskMonitor::new(thresholds),
            indicator: IndicatorDriver::new(),
            output: None,
            samples: 0,
            failures: 0,
        }
    }

    pub fn from_config(
        source: ReadingSource,
        sender: &SenderConfig,
        thresholds: RiskThresholds,
        now: f64,
    ) -> Self {
        Self::new(
            source,
            sender.sample_rate_hz,
            sender.smoothing_alpha,
            thresholds,
            now,
        )
    }

    /// Liga a saída física do indicador.
    pub fn with_indicator(mut self, output: impl Indicator + Send + 'static) -> Self {
        self.output = Some(Box::new(output));
        self
    }

    pub fn level(&self) -> RiskLevel {
        self.risk.level()
    }

    pub fn accumulators(&self) -> RiskAccumulators {
        self.risk.accumulators()
    }

    pub fn smoothed(&self) -> &SmoothedState {
        &self.smoothed
    }

    pub fn scheduler(&self) -> &SampleScheduler {
        &self.scheduler
    }

    /// (amostras, falhas) desde o início.
    pub fn counters(&self) -> (u64, u64) {
        (self.samples, self.failures)
    }

    /// Um passo do loop cooperativo. `now` em segundos monotônicos.
    pub fn tick(&mut self, now: f64) -> TickOutcome {
        let Some(slot) = self.scheduler.tick(now) else {
            return TickOutcome::Idle;
        };

        let reading = match self.source.next_reading() {
            Ok(r) => r,
            Err(e) => {
                self.failures += 1;
                warn!("Leitura falhou, amostra ignorada: {e}");
                return TickOutcome::SampleFailed(e);
            }
        };

        let raw = dewpoint::derive(reading);
        self.smoothed.update(raw);
        let Some(smoothed) = self.smoothed.snapshot() else {
            // Todos os canais chegam juntos; só falta se a fonte nunca respondeu.
            return TickOutcome::Idle;
        };

        let previous = self.risk.level();
        let risk = self
            .risk
            .update(smoothed.humidity_pct, smoothed.dpd_c, slot.elapsed_s);
        if risk != previous {
            let accum = self.risk.accumulators();
            info!(
                "Risco {previous} → {risk} (warn {:.0}s, high {:.0}s)",
                accum.warn_accum_s, accum.high_accum_s
            );
        }

        let indicator_on = self.indicator.step(risk.indicator_mode());
        if let Some(out) = self.output.as_mut() {
            out.set(indicator_on);
        }

        self.samples += 1;
        debug!(
            "Amostra #{} | {:.2}°C {:.2}% | td {:.2}°C dpd {:.2}°C | {}",
            self.samples,
            smoothed.temperature_c,
            smoothed.humidity_pct,
            smoothed.dewpoint_c,
            smoothed.dpd_c,
            risk
        );

        TickOutcome::Sampled(RiskSample {
            raw,
            smoothed,
            risk,
            elapsed_s: slot.elapsed_s,
            indicator_on,
        })
    }
}

impl std::fmt::Debug for RiskPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskPipeline")
            .field("source", &self.source)
            .field("level", &self.risk.level())
            .field("samples", &self.samples)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{SensorError, SensorPort};
    use std::sync::{Arc, Mutex};

    fn humid_pipeline(thresholds: RiskThresholds) -> RiskPipeline {
        let source = ReadingSource::preloaded(vec![(25.0, 80.0)]).unwrap();
        RiskPipeline::new(source, 1.0, 0.3, thresholds, 0.0)
    }

    fn run(p: &mut RiskPipeline, from: u32, to: u32) -> Vec<RiskSample> {
        (from..=to)
            .filter_map(|n| match p.tick(f64::from(n)) {
                TickOutcome::Sampled(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn constant_humid_feed_reaches_warn_at_1800_ticks() {
        let mut p = humid_pipeline(RiskThresholds::default());
        let samples = run(&mut p, 1, 1800);
        assert_eq!(samples.len(), 1800);
        assert!(samples[..1799].iter().all(|s| s.risk == RiskLevel::Safe));
        assert_eq!(samples[1799].risk, RiskLevel::Warn);

        let samples = run(&mut p, 1801, 7200);
        assert_eq!(samples.last().map(|s| s.risk), Some(RiskLevel::High));
        assert!(samples[..samples.len() - 1]
            .iter()
            .all(|s| s.risk == RiskLevel::Warn));
    }

    #[test]
    fn stalled_clock_credits_one_interval() {
        let mut p = humid_pipeline(RiskThresholds::default());
        match p.tick(100.0) {
            TickOutcome::Sampled(s) => assert_eq!(s.elapsed_s, 1.0),
            other => panic!("esperava amostra, veio {other:?}"),
        }
        assert_eq!(p.accumulators().warn_accum_s, 1.0);
    }

    #[test]
    fn first_sample_is_not_smoothed() {
        let source = ReadingSource::preloaded(vec![(20.0, 50.0), (30.0, 90.0)]).unwrap();
        let mut p = RiskPipeline::new(source, 1.0, 0.3, RiskThresholds::default(), 0.0);
        let s = run(&mut p, 1, 2);
        assert_eq!(s[0].smoothed, s[0].raw);
        assert!((s[1].smoothed.temperature_c - 23.0).abs() < 1e-9);
        assert!((s[1].smoothed.humidity_pct - 62.0).abs() < 1e-9);
    }

    struct DeadAfterOne {
        calls: u32,
    }

    impl SensorPort for DeadAfterOne {
        fn read(&mut self) -> Result<(f64, f64), SensorError> {
            self.calls += 1;
            if self.calls == 1 {
                Ok((22.0, 55.0))
            } else {
                Err(SensorError::ReadFailed("timeout".into()))
            }
        }
    }

    #[test]
    fn sensor_failure_keeps_smoothed_state() {
        let source = ReadingSource::live(DeadAfterOne { calls: 0 });
        let mut p = RiskPipeline::new(source, 1.0, 0.3, RiskThresholds::default(), 0.0);
        assert!(matches!(p.tick(1.0), TickOutcome::Sampled(_)));
        let before = p.smoothed().clone();
        let accum = p.accumulators();
        assert!(matches!(p.tick(2.0), TickOutcome::SampleFailed(_)));
        assert!(matches!(p.tick(3.0), TickOutcome::SampleFailed(_)));
        assert_eq!(p.smoothed(), &before);
        assert_eq!(p.accumulators(), accum);
        assert_eq!(p.counters(), (1, 2));
    }

    #[test]
    fn idle_between_samples() {
        let mut p = humid_pipeline(RiskThresholds::default());
        assert!(matches!(p.tick(0.0), TickOutcome::Idle));
        assert!(matches!(p.tick(0.5), TickOutcome::Sampled(_)));
        assert!(matches!(p.tick(0.9), TickOutcome::Idle));
    }

    #[derive(Clone, Default)]
    struct SharedLed(Arc<Mutex<Vec<bool>>>);

    impl Indicator for SharedLed {
        fn set(&mut self, on: bool) {
            if let Ok(mut v) = self.0.lock() {
                v.push(on);
            }
        }
    }

    #[test]
    fn indicator_follows_risk_level() {
        let thresholds = RiskThresholds {
            persist_warn_s: 2.0,
            persist_high_s: 5.0,
            ..Default::default()
        };
        let led = SharedLed::default();
        let mut p = humid_pipeline(thresholds).with_indicator(led.clone());
        run(&mut p, 1, 7);
        let states = led.0.lock().unwrap().clone();
        // SAFE, WARN(pisca) x3, HIGH x3
        assert_eq!(states, vec![false, true, false, true, true, true, true]);
    }

    #[test]
    fn sample_record_feeds_every_derived_format() {
        use crate::protocol::{WireFormat, decode_line, encode_line};
        let mut p = humid_pipeline(RiskThresholds::default());
        let s = run(&mut p, 1, 1).remove(0);
        let rec = s.record(1000, "21399066");
        for format in [WireFormat::Derived, WireFormat::Risk, WireFormat::Gateway] {
            let line = encode_line(format, &rec).unwrap();
            assert!(decode_line(format, &line).is_ok(), "{format:?}: {line}");
        }
        assert!(encode_line(WireFormat::Legacy, &rec).is_err());
    }

    #[test]
    fn independent_instances() {
        let mut a = humid_pipeline(RiskThresholds::default());
        let b = humid_pipeline(RiskThresholds::default());
        run(&mut a, 1, 10);
        assert_eq!(a.accumulators().warn_accum_s, 10.0);
        assert_eq!(b.accumulators(), RiskAccumulators::default());
    }
}
