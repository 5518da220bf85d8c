use std::{
    fmt,
    time::{Duration, Instant},
};

use serde::{Serialize, Serializer};

use crate::ConfigError;

/// The EWMA smoothing factor used when none is configured.
pub const DEFAULT_ALPHA: f64 = 0.1;

/// Message and round-trip bookkeeping for one session.
///
/// Pure bookkeeping: the caller supplies every timestamp and duration.
#[derive(Debug, Clone)]
pub struct Statistics {
    alpha: f64,
    start: Instant,
    messages: u64,
    samples: Vec<f64>,
    ewma: Option<f64>,
}

impl Statistics {
    pub fn new(alpha: f64) -> Result<Self, ConfigError> {
        Self::starting_at(alpha, Instant::now())
    }

    pub fn starting_at(alpha: f64, start: Instant) -> Result<Self, ConfigError> {
        // Written to also reject NaN.
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(ConfigError::InvalidAlpha(alpha));
        }

        Ok(Self {
            alpha,
            start,
            messages: 0,
            samples: Vec::new(),
            ewma: None,
        })
    }

    pub fn record_message(&mut self) {
        self.messages += 1;
    }

    /// Record a round trip in milliseconds. Non-finite or negative samples are ignored.
    pub fn record_rtt(&mut self, rtt_ms: f64) {
        if !rtt_ms.is_finite() || rtt_ms < 0.0 {
            log::debug!("ignoring invalid rtt sample: {}", rtt_ms);
            return;
        }

        self.samples.push(rtt_ms);
        self.ewma = Some(match self.ewma {
            Some(prev) => self.alpha * rtt_ms + (1.0 - self.alpha) * prev,
            None => rtt_ms,
        });
    }

    pub fn messages(&self) -> u64 {
        self.messages
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn ewma(&self) -> Option<f64> {
        self.ewma
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    pub fn messages_per_second(&self) -> f64 {
        self.rate(self.start.elapsed())
    }

    /// Throughput over the given elapsed time, zero if no time has passed.
    pub fn rate(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs <= f64::EPSILON {
            return 0.0;
        }

        self.messages as f64 / secs
    }

    pub fn summary(&self) -> Summary {
        self.summary_at(Instant::now())
    }

    pub fn summary_at(&self, now: Instant) -> Summary {
        let rtt = match self.samples.is_empty() {
            true => None,
            false => Some(RttSummary::new(&self.samples, self.ewma.unwrap_or_default())),
        };

        Summary {
            messages: self.messages,
            elapsed: now.saturating_duration_since(self.start),
            messages_per_second: self.rate(now.saturating_duration_since(self.start)),
            rtt,
        }
    }
}

/// The report printed at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub messages: u64,

    #[serde(rename = "elapsed_secs", serialize_with = "as_secs")]
    pub elapsed: Duration,
    pub messages_per_second: f64,

    /// Absent when no reply was ever matched.
    pub rtt: Option<RttSummary>,
}

/// Round-trip figures in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RttSummary {
    pub samples: usize,
    pub mean: f64,
    pub ewma: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

fn as_secs<S: Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(elapsed.as_secs_f64())
}

impl RttSummary {
    fn new(samples: &[f64], ewma: f64) -> Self {
        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);

        // Index floor(n * p) of the sorted samples, clamped to the last one.
        let percentile = |p: f64| sorted[((sorted.len() as f64 * p) as usize).min(sorted.len() - 1)];

        Self {
            samples: samples.len(),
            mean: samples.iter().sum::<f64>() / samples.len() as f64,
            ewma,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            p50: percentile(0.50),
            p95: percentile(0.95),
            p99: percentile(0.99),
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total messages sent: {}", self.messages)?;
        write!(f, "Messages per second: {:.2}", self.messages_per_second)?;

        if let Some(rtt) = &self.rtt {
            writeln!(f)?;
            writeln!(f, "Average RTT: {:.2} ms", rtt.mean)?;
            writeln!(f, "EWMA RTT: {:.2} ms", rtt.ewma)?;
            writeln!(f, "Min/Max RTT: {:.2}/{:.2} ms", rtt.min, rtt.max)?;
            write!(
                f,
                "RTT p50/p95/p99: {:.2}/{:.2}/{:.2} ms",
                rtt.p50, rtt.p95, rtt.p99
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;

    #[test]
    fn alpha_bounds() {
        assert!(Statistics::new(1.0).is_ok());
        assert!(Statistics::new(0.1).is_ok());
        assert_eq!(Statistics::new(0.0).unwrap_err(), ConfigError::InvalidAlpha(0.0));
        assert!(Statistics::new(1.5).is_err());
        assert!(Statistics::new(-0.1).is_err());
        assert!(Statistics::new(f64::NAN).is_err());
    }

    #[test]
    fn first_sample_is_ewma() {
        let mut stats = Statistics::new(0.1).unwrap();
        assert_eq!(stats.ewma(), None);

        stats.record_rtt(12.5);
        assert_eq!(stats.ewma(), Some(12.5));
    }

    #[test]
    fn ewma_recurrence() {
        let mut rng = rand::thread_rng();

        for _ in 0..50 {
            let alpha: f64 = rng.gen_range(0.01..=1.0);
            let samples: Vec<f64> = (0..rng.gen_range(1..40)).map(|_| rng.gen_range(0.0..500.0)).collect();

            let mut stats = Statistics::new(alpha).unwrap();
            for sample in &samples {
                stats.record_rtt(*sample);
            }

            let expected = samples[1..]
                .iter()
                .fold(samples[0], |prev, rtt| alpha * rtt + (1.0 - alpha) * prev);

            let ewma = stats.ewma().unwrap();
            assert!((ewma - expected).abs() < 1e-9, "alpha={} {} != {}", alpha, ewma, expected);
            assert_eq!(stats.samples(), &samples[..]);
        }
    }

    #[test]
    fn alpha_one_tracks_last_sample() {
        let mut stats = Statistics::new(1.0).unwrap();
        stats.record_rtt(10.0);
        stats.record_rtt(30.0);
        assert_eq!(stats.ewma(), Some(30.0));
    }

    #[test]
    fn rate() {
        let mut stats = Statistics::new(0.1).unwrap();
        assert_eq!(stats.rate(Duration::ZERO), 0.0);

        let elapsed = Duration::from_millis(500);
        let mut last = stats.rate(elapsed);
        for _ in 0..10 {
            stats.record_message();

            let rate = stats.rate(elapsed);
            assert!(rate >= last);
            last = rate;
        }

        assert_eq!(stats.rate(elapsed), 20.0);
        assert_eq!(stats.rate(Duration::ZERO), 0.0);
    }

    #[test]
    fn invalid_samples_ignored() {
        let mut stats = Statistics::new(0.5).unwrap();
        stats.record_rtt(f64::NAN);
        stats.record_rtt(f64::INFINITY);
        stats.record_rtt(-1.0);

        assert!(stats.samples().is_empty());
        assert_eq!(stats.ewma(), None);
    }

    #[test]
    fn summary_without_samples() {
        let start = Instant::now();
        let mut stats = Statistics::starting_at(0.1, start).unwrap();
        stats.record_message();

        let summary = stats.summary_at(start + Duration::from_secs(2));
        assert_eq!(summary.messages, 1);
        assert_eq!(summary.messages_per_second, 0.5);
        assert_eq!(summary.rtt, None);

        let text = summary.to_string();
        assert!(text.contains("Total messages sent: 1"));
        assert!(!text.contains("RTT"));
    }

    #[test]
    fn summary_with_samples() {
        let start = Instant::now();
        let mut stats = Statistics::starting_at(0.5, start).unwrap();
        for rtt in [4.0, 1.0, 3.0, 2.0] {
            stats.record_message();
            stats.record_rtt(rtt);
        }

        let rtt = stats.summary_at(start).rtt.unwrap();
        assert_eq!(rtt.samples, 4);
        assert_eq!(rtt.mean, 2.5);
        assert_eq!(rtt.ewma, 2.375);
        assert_eq!(rtt.min, 1.0);
        assert_eq!(rtt.max, 4.0);
        assert_eq!(rtt.p50, 3.0);
        assert_eq!(rtt.p99, 4.0);
    }
}
