use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Seconds, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min: f64,
    pub max: f64,
}

impl DelayRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min >= 0.0 && self.min <= self.max
    }

    fn sample(&self) -> Duration {
        let secs = if self.min < self.max {
            rand::thread_rng().gen_range(self.min..=self.max)
        } else {
            self.min
        };
        Duration::from_secs_f64(secs.max(0.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pause {
    /// Between two result items.
    Candidate,
    /// Between two search targets.
    Target,
    /// After a click or a typed value.
    Action,
    /// After a navigation, while the page renders.
    Settle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub enabled: bool,
    pub candidate: DelayRange,
    pub target: DelayRange,
    pub action: DelayRange,
    pub settle: DelayRange,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            candidate: DelayRange::new(3.0, 5.0),
            target: DelayRange::new(3.0, 5.0),
            action: DelayRange::new(1.0, 3.0),
            settle: DelayRange::new(2.0, 4.0),
        }
    }
}

impl PacingConfig {
    pub fn validate(&self) -> Vec<String> {
        [
            ("candidate", self.candidate),
            ("target", self.target),
            ("action", self.action),
            ("settle", self.settle),
        ]
        .iter()
        .filter(|(_, range)| !range.is_valid())
        .map(|(name, range)| {
            format!(
                "pacing.{} must satisfy 0 <= min <= max (got {} .. {})",
                name, range.min, range.max
            )
        })
        .collect()
    }
}

#[derive(Debug, Clone)]
pub struct Pacer {
    config: PacingConfig,
}

impl Pacer {
    pub fn new(config: PacingConfig) -> Self {
        Self { config }
    }

    /// Never waits.
    pub fn disabled() -> Self {
        Self {
            config: PacingConfig {
                enabled: false,
                ..PacingConfig::default()
            },
        }
    }

    pub fn delay_for(&self, pause: Pause) -> Duration {
        if !self.config.enabled {
            return Duration::ZERO;
        }
        match pause {
            Pause::Candidate => self.config.candidate,
            Pause::Target => self.config.target,
            Pause::Action => self.config.action,
            Pause::Settle => self.config.settle,
        }
        .sample()
    }

    /// Sleep for a sampled delay. Returns early when `cancel` fires.
    pub async fn pause(&self, pause: Pause, cancel: &CancellationToken) {
        let delay = self.delay_for(pause);
        if delay.is_zero() {
            return;
        }
        debug!("pausing {:.1}s ({:?})", delay.as_secs_f64(), pause);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => debug!("pause interrupted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_pacer_never_waits() {
        let pacer = Pacer::disabled();
        for pause in [Pause::Candidate, Pause::Target, Pause::Action, Pause::Settle] {
            assert_eq!(pacer.delay_for(pause), Duration::ZERO);
        }
    }

    #[test]
    fn test_delay_stays_in_range() {
        let pacer = Pacer::new(PacingConfig {
            candidate: DelayRange::new(0.5, 0.75),
            action: DelayRange::new(2.0, 2.0),
            ..PacingConfig::default()
        });
        for _ in 0..50 {
            let d = pacer.delay_for(Pause::Candidate).as_secs_f64();
            assert!((0.5..=0.75).contains(&d), "{d}");
        }
        assert_eq!(pacer.delay_for(Pause::Action), Duration::from_secs(2));
    }

    #[test]
    fn test_validate_reports_inverted_ranges() {
        let config = PacingConfig {
            target: DelayRange::new(5.0, 1.0),
            settle: DelayRange::new(-1.0, 1.0),
            ..PacingConfig::default()
        };
        let problems = config.validate();
        assert_eq!(problems.len(), 2);
        assert!(problems[0].starts_with("pacing.target"));
        assert!(PacingConfig::default().validate().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_cuts_a_pause_short() {
        let pacer = Pacer::new(PacingConfig {
            target: DelayRange::new(30.0, 30.0),
            ..PacingConfig::default()
        });
        let cancel = CancellationToken::new();
        cancel.cancel();
        let started = std::time::Instant::now();
        pacer.pause(Pause::Target, &cancel).await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
