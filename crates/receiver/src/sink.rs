//! Sink de observabilidade: uma linha estruturada por amostra e um resumo
//! periódico de latência.

use pulselink_core::types::ReceivedSample;
use tracing::info;

/// Estatísticas acumuladas de latência (ms).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatencySummary {
    pub count: u64,
    pub min_ms: i64,
    pub max_ms: i64,
    sum_ms: i128,
}

impl LatencySummary {
    pub fn record(&mut self, latency_ms: i64) {
        if self.count == 0 {
            self.min_ms = latency_ms;
            self.max_ms = latency_ms;
        } else {
            self.min_ms = self.min_ms.min(latency_ms);
            self.max_ms = self.max_ms.max(latency_ms);
        }
        self.count += 1;
        self.sum_ms += i128::from(latency_ms);
    }

    pub fn avg_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_ms as f64 / self.count as f64
        }
    }
}

/// Registra a amostra e atualiza o resumo.
pub fn observe(sample: &ReceivedSample, summary: &mut LatencySummary) {
    let latency_ms = sample.latency_ms();
    info!(
        timestamp_ms = sample.timestamp_ms,
        received_at_ms = sample.received_at_ms,
        latency_ms,
        path = %sample.path,
        source = %sample.source,
        "Dados recebidos"
    );
    summary.record(latency_ms);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_tracks_min_avg_max() {
        let mut s = LatencySummary::default();
        for l in [12, 4, 20] {
            s.record(l);
        }
        assert_eq!(s.count, 3);
        assert_eq!(s.min_ms, 4);
        assert_eq!(s.max_ms, 20);
        assert!((s.avg_ms() - 12.0).abs() < f64::EPSILON);
    }

    #[test]
    fn negative_latency_from_skew_is_kept() {
        let mut s = LatencySummary::default();
        let sample = ReceivedSample {
            timestamp_ms: 1_000,
            received_at_ms: 995,
            path: "p".into(),
            source: "watch".into(),
        };
        observe(&sample, &mut s);
        assert_eq!(s.min_ms, -5);
        assert_eq!(s.count, 1);
    }

    #[test]
    fn empty_summary_average_is_zero() {
        assert_eq!(LatencySummary::default().avg_ms(), 0.0);
    }
}
