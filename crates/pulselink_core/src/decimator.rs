//! Decimação do fluxo bruto de eventos de sensor.
//!
//! Um único contador é compartilhado por todos os tipos de sensor: cada
//! evento avança o contador, e ao atingir o passo (`stride`) o contador volta
//! a zero e aquele evento é marcado para emissão. Só o tipo gatilho gera
//! payload de fato; os demais tipos apenas consomem posições do contador.
//!
//! Como cada sensor dispara na sua própria cadência nativa, a cadência
//! efetiva de payloads depende da combinação de sensores habilitados. Com só
//! o gatilho ativo, sai um payload a cada `stride` eventos dele.

use crate::types::{SensorEvent, SensorKind};

/// Passo padrão de decimação.
pub const DEFAULT_STRIDE: u32 = 5;

/// Decimador com contador compartilhado entre tipos.
#[derive(Debug, Clone)]
pub struct SampleDecimator {
    stride: u32,
    trigger: SensorKind,
    counter: u32,
}

impl SampleDecimator {
    /// `stride` zero é tratado como 1 (emite todo evento).
    pub fn new(stride: u32, trigger: SensorKind) -> Self {
        Self {
            stride: stride.max(1),
            trigger,
            counter: 0,
        }
    }

    /// Avança o contador. Retorna `true` quando o passo é atingido.
    pub fn observe(&mut self, _event: &SensorEvent) -> bool {
        self.counter += 1;
        if self.counter >= self.stride {
            self.counter = 0;
            true
        } else {
            false
        }
    }

    /// Avança o contador e retorna `true` só se o evento deve virar payload:
    /// passo atingido e tipo igual ao gatilho.
    pub fn admit(&mut self, event: &SensorEvent) -> bool {
        self.observe(event) && event.kind == self.trigger
    }

    pub fn reset(&mut self) {
        self.counter = 0;
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn trigger(&self) -> SensorKind {
        self.trigger
    }
}

impl Default for SampleDecimator {
    fn default() -> Self {
        Self::new(DEFAULT_STRIDE, SensorKind::Gyroscope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gyro(seq: u64) -> SensorEvent {
        SensorEvent::new(SensorKind::Gyroscope, seq)
    }

    #[test]
    fn emits_floor_n_over_stride() {
        for n in [0u64, 1, 4, 5, 6, 10, 23, 100] {
            let mut d = SampleDecimator::default();
            let emitted = (0..n).filter(|&i| d.admit(&gyro(i))).count() as u64;
            assert_eq!(emitted, n / 5, "n = {n}");
            assert_eq!(u64::from(d.counter()), n % 5, "n = {n}");
        }
    }

    #[test]
    fn fifth_event_is_the_one_emitted() {
        let mut d = SampleDecimator::default();
        let flags: Vec<bool> = (0..5).map(|i| d.admit(&gyro(i))).collect();
        assert_eq!(flags, vec![false, false, false, false, true]);
    }

    #[test]
    fn other_kinds_advance_shared_counter() {
        let mut d = SampleDecimator::default();
        for i in 0..4 {
            assert!(!d.admit(&SensorEvent::new(SensorKind::HeartRate, i)));
        }
        assert_eq!(d.counter(), 4);
        // 5º evento é do gatilho: emite
        assert!(d.admit(&gyro(4)));
        assert_eq!(d.counter(), 0);
    }

    #[test]
    fn non_trigger_on_stride_is_swallowed() {
        let mut d = SampleDecimator::default();
        for i in 0..4 {
            d.admit(&gyro(i));
        }
        let accel = SensorEvent::new(SensorKind::Accelerometer, 4);
        assert!(!d.admit(&accel));
        assert_eq!(d.counter(), 0, "contador zera mesmo sem payload");
    }

    #[test]
    fn reset_clears_counter() {
        let mut d = SampleDecimator::default();
        d.admit(&gyro(0));
        d.admit(&gyro(1));
        d.reset();
        assert_eq!(d.counter(), 0);
    }

    #[test]
    fn zero_stride_is_clamped() {
        let mut d = SampleDecimator::new(0, SensorKind::Gyroscope);
        assert_eq!(d.stride(), 1);
        assert!(d.admit(&gyro(0)));
    }
}
