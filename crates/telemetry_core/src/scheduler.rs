//! Agendador de amostragem com correção de deriva.
//!
//! Não é uma fila: a cada chamada responde só "amostra devida" ou não. Saltos
//! maiores que `5 × intervalo` (pausa do depurador, I/O bloqueante) contam como
//! um único intervalo.

/// Fator acima do qual um salto de tempo é tratado como travamento.
pub const STALL_FACTOR: f64 = 5.0;

/// Amostra devida neste tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleSlot {
    /// Tempo decorrido (já limitado) desde a amostra anterior (s)
    pub elapsed_s: f64,
}

#[derive(Debug, Clone)]
pub struct SampleScheduler {
    sampling_interval: f64,
    sampling_timer: f64,
    last_time: f64,
    /// Tempo limitado acumulado desde a última amostra
    pending: f64,
}

impl SampleScheduler {
    /// `now` é o relógio monotônico em segundos no momento da criação.
    pub fn new(sample_rate_hz: f64, now: f64) -> Self {
        Self {
            sampling_interval: 1.0 / sample_rate_hz,
            sampling_timer: 0.0,
            last_time: now,
            pending: 0.0,
        }
    }

    pub fn sampling_interval(&self) -> f64 {
        self.sampling_interval
    }

    /// Avança o relógio. Retorna `Some` quando uma amostra é devida.
    pub fn tick(&mut self, now: f64) -> Option<SampleSlot> {
        let mut interval = now - self.last_time;
        if interval > STALL_FACTOR * self.sampling_interval {
            interval = self.sampling_interval;
        }
        self.last_time = now;
        self.sampling_timer -= interval;
        self.pending += interval;

        if self.sampling_timer < 0.0 {
            self.sampling_timer += self.sampling_interval;
            let elapsed_s = std::mem::take(&mut self.pending);
            Some(SampleSlot { elapsed_s })
        } else {
            None
        }
    }

    /// Tempo até a próxima amostra (s), para o loop dormir.
    pub fn time_until_due(&self) -> f64 {
        self.sampling_timer.max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regular_ticks_fire_every_interval() {
        let mut s = SampleScheduler::new(1.0, 0.0);
        assert_eq!(s.tick(0.0), None);
        for n in 1..=10 {
            let slot = s.tick(f64::from(n)).expect("amostra devida");
            assert_eq!(slot.elapsed_s, 1.0);
        }
    }

    #[test]
    fn fast_polling_gates_samples() {
        let mut s = SampleScheduler::new(1.0, 0.0);
        let mut due = 0;
        let mut elapsed = 0.0;
        // Polls a cada 0.25 s durante 10 s
        for n in 1..=40 {
            if let Some(slot) = s.tick(f64::from(n) * 0.25) {
                due += 1;
                elapsed += slot.elapsed_s;
            }
        }
        // Primeira amostra no primeiro poll, depois uma por segundo
        assert_eq!(due, 10);
        assert!((elapsed - 9.25).abs() < 1e-9);
    }

    #[test]
    fn stall_is_clamped_to_one_interval() {
        let mut s = SampleScheduler::new(10.0, 0.0);
        let interval = s.sampling_interval();
        let stall = 100.0 * interval;
        let slot = s.tick(stall).expect("amostra devida");
        assert!((slot.elapsed_s - interval).abs() < 1e-12);

        // Sem rajada depois do salto: ~10 amostras no segundo seguinte
        let mut due = 0;
        for n in 1..=20 {
            if s.tick(stall + f64::from(n) * 0.05).is_some() {
                due += 1;
            }
        }
        assert!((9..=11).contains(&due), "due = {due}");
    }

    #[test]
    fn catch_up_fires_once_per_call() {
        let mut s = SampleScheduler::new(1.0, 0.0);
        let first = s.tick(4.0).expect("amostra devida");
        assert_eq!(first.elapsed_s, 4.0);
        // O atraso é pago uma amostra por chamada, sem tempo extra
        for _ in 0..3 {
            assert_eq!(s.tick(4.0), Some(SampleSlot { elapsed_s: 0.0 }));
        }
        assert_eq!(s.tick(4.0), None);
    }

    #[test]
    fn time_until_due_never_negative() {
        let mut s = SampleScheduler::new(2.0, 0.0);
        s.tick(0.2);
        assert!(s.time_until_due() >= 0.0);
        assert!(s.time_until_due() <= s.sampling_interval());
    }
}
