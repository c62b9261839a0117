// ABOUTME: Skeptical timeout oracle deciding whether a pending action has really timed out
// ABOUTME: Scales overtime by confidence and transit knobs and rolls an injectable RNG for borderline cases

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How much the author trusts a configured timeout value.
///
/// `Hard` disables the skeptic score entirely: the timeout fires as soon as
/// the elapsed time exceeds the configured value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    #[default]
    Hard = 0,
    Low = 1,
    Unknown = 2,
    Known = 3,
    Stable = 4,
    Prod = 6,
}

/// Where the remote side of an action lives, from in-memory to wide area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Transit {
    #[default]
    Hard = 0,
    Ram = 1,
    Ssd = 2,
    Rpc = 3,
    Lan = 4,
    Disk = 5,
    Wan = 6,
}

impl Confidence {
    pub fn level(self) -> i32 {
        self as i32
    }
}

impl Transit {
    pub fn level(self) -> i32 {
        self as i32
    }
}

/// Skeptic score for an overdue action, or `None` when the timeout cannot fire.
///
/// Returns `Some(f64::INFINITY)` for hard timeouts. Otherwise the score is
/// `log10((timeout + overtime * 2^(confidence - transit)) / timeout)`: a score
/// of one or more is a certain timeout, anything lower is a probability.
pub fn skeptic_score(
    timeout: Duration,
    elapsed: Duration,
    confidence: Confidence,
    transit: Transit,
) -> Option<f64> {
    if timeout.is_zero() || elapsed <= timeout {
        return None;
    }
    if confidence == Confidence::Hard || transit == Transit::Hard {
        return Some(f64::INFINITY);
    }

    let to = timeout.as_secs_f64();
    let overtime = (elapsed - timeout).as_secs_f64();
    let scale = f64::from(confidence.level() - transit.level()).exp2();
    Some(((to + overtime * scale) / to).log10())
}

/// Timeout oracle owning its random source.
///
/// Clones share the same generator, so a seeded oracle handed to several
/// workers still produces one reproducible sequence.
#[derive(Clone)]
pub struct TimeoutOracle {
    rng: Arc<Mutex<StdRng>>,
}

impl TimeoutOracle {
    pub fn new() -> Self {
        Self {
            rng: Arc::new(Mutex::new(StdRng::from_entropy())),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    pub fn from_seed(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::seeded(seed),
            None => Self::new(),
        }
    }

    pub fn is_timed_out(
        &self,
        timeout: Duration,
        elapsed: Duration,
        confidence: Confidence,
        transit: Transit,
    ) -> bool {
        let Some(score) = skeptic_score(timeout, elapsed, confidence, transit) else {
            return false;
        };
        if score >= 1.0 {
            return true;
        }
        let roll: f64 = {
            let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            rng.gen()
        };
        roll + score >= 1.0
    }
}

impl Default for TimeoutOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TimeoutOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutOracle").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn test_never_fires_within_timeout() {
        let oracle = TimeoutOracle::seeded(7);
        for elapsed in [0, 1, 250, 999, 1000] {
            assert!(!oracle.is_timed_out(ms(1000), ms(elapsed), Confidence::Low, Transit::Wan));
            assert!(!oracle.is_timed_out(ms(1000), ms(elapsed), Confidence::Hard, Transit::Hard));
        }
    }

    #[test]
    fn test_zero_timeout_never_expires() {
        let oracle = TimeoutOracle::seeded(7);
        assert!(!oracle.is_timed_out(Duration::ZERO, ms(60_000), Confidence::Hard, Transit::Hard));
        assert!(!oracle.is_timed_out(Duration::ZERO, ms(60_000), Confidence::Prod, Transit::Ram));
    }

    #[test]
    fn test_hard_knobs_fire_immediately_after_deadline() {
        let oracle = TimeoutOracle::seeded(7);
        assert!(oracle.is_timed_out(ms(100), ms(101), Confidence::Hard, Transit::Lan));
        assert!(oracle.is_timed_out(ms(100), ms(101), Confidence::Known, Transit::Hard));
    }

    #[test]
    fn test_score_matches_log_scale() {
        // Equal knobs: score is log10(elapsed / timeout)
        let score = skeptic_score(ms(100), ms(1000), Confidence::Unknown, Transit::Ssd).unwrap();
        assert!((score - 1.0).abs() < 1e-9);

        // Confidence above transit stretches the overtime
        let score = skeptic_score(ms(100), ms(200), Confidence::Known, Transit::Ram).unwrap();
        assert!((score - (1.0f64 + 4.0).log10()).abs() < 1e-9);
    }

    #[test]
    fn test_certain_timeout_when_score_reaches_one() {
        let oracle = TimeoutOracle::seeded(1);
        for _ in 0..100 {
            assert!(oracle.is_timed_out(ms(100), ms(2000), Confidence::Unknown, Transit::Ssd));
        }
    }

    #[test]
    fn test_borderline_is_probabilistic_and_reproducible() {
        let a = TimeoutOracle::seeded(42);
        let b = TimeoutOracle::seeded(42);
        let draws_a: Vec<bool> = (0..200)
            .map(|_| a.is_timed_out(ms(100), ms(150), Confidence::Low, Transit::Wan))
            .collect();
        let draws_b: Vec<bool> = (0..200)
            .map(|_| b.is_timed_out(ms(100), ms(150), Confidence::Low, Transit::Wan))
            .collect();

        assert_eq!(draws_a, draws_b);
        // Score is tiny here, so almost every check is ignored.
        let fired = draws_a.iter().filter(|fired| **fired).count();
        assert!(fired < 50);
    }

    #[test]
    fn test_knob_serialization_uses_names() {
        assert_eq!(serde_json::to_string(&Confidence::Prod).unwrap(), "\"prod\"");
        let transit: Transit = serde_json::from_str("\"lan\"").unwrap();
        assert_eq!(transit, Transit::Lan);
        assert_eq!(transit.level(), 4);
    }
}
